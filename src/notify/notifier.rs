//! Package-side notification service.
//!
//! A package that reports events owns one [`PackageNotifier`]. The API side
//! registers with it by sending a [`ControlOpcode::NOTIFICATION_REGISTER`]
//! control packet whose buffer holds a [`NotificationElement`]; from then on
//! every matching event the package emits is delivered to the element's raw
//! callback, on the emitting thread.

use alloc::sync::Arc;
use alloc::vec::Vec;

use spin::Mutex;

use crate::package::{ObjectId, PackageId};
use crate::packet::{ControlOpcode, Packet};
use crate::status::{ControlStatus, PacketStatus};

use super::queue::{NotificationInfo, NotificationType, ObjectTypeMask};
use super::routing::same_callback;

/// Raw per-package callback, invoked on the thread that emits the event.
pub type RawNotificationFn = Arc<dyn Fn(ObjectId, &NotificationInfo) + Send + Sync>;

/// Aggregate filter an API instance registers with a package.
#[derive(Clone)]
pub struct NotificationElement {
    pub target_package: PackageId,
    pub callback: RawNotificationFn,
    pub notification_type: NotificationType,
    pub object_type: ObjectTypeMask,
}

impl NotificationElement {
    fn matches(&self, notification_type: NotificationType, object_type: ObjectTypeMask) -> bool {
        self.notification_type.intersects(notification_type) && self.object_type.intersects(object_type)
    }
}

impl core::fmt::Debug for NotificationElement {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("NotificationElement")
            .field("target_package", &self.target_package)
            .field("notification_type", &self.notification_type)
            .field("object_type", &self.object_type)
            .finish_non_exhaustive()
    }
}

/// Notification service of one package.
pub struct PackageNotifier {
    package: PackageId,
    elements: Mutex<Vec<NotificationElement>>,
}

impl PackageNotifier {
    pub fn new(package: PackageId) -> Self {
        Self {
            package,
            elements: Mutex::new(Vec::new()),
        }
    }

    pub fn package(&self) -> PackageId {
        self.package
    }

    /// Handles the register and unregister opcodes and completes the packet.
    ///
    /// Any other packet is handed back untouched so the package can route it
    /// elsewhere.
    pub fn handle_control(&self, mut packet: Packet) -> Result<PacketStatus, Packet> {
        let Some(operation) = packet.control_operation_mut() else {
            return Err(packet);
        };
        let opcode = operation.opcode();
        if opcode != ControlOpcode::NOTIFICATION_REGISTER
            && opcode != ControlOpcode::NOTIFICATION_UNREGISTER
        {
            return Err(packet);
        }

        let control_status = match operation.buffer().downcast_ref::<NotificationElement>() {
            None => {
                warn!("{}: notification request without an element", self.package);
                ControlStatus::Failure
            }
            Some(element) if opcode == ControlOpcode::NOTIFICATION_REGISTER => {
                self.register(element.clone());
                ControlStatus::Ok
            }
            Some(element) => {
                if self.unregister(&element.callback) {
                    ControlStatus::Ok
                } else {
                    debug!("{}: unregister for an unknown element", self.package);
                    ControlStatus::Failure
                }
            }
        };
        operation.set_status(control_status, 0);

        let packet_status = if control_status.is_ok() {
            PacketStatus::Ok
        } else {
            PacketStatus::GenericFailure
        };
        packet.set_status(packet_status, 0);
        packet.complete();
        Ok(packet_status)
    }

    /// Adds `element`, replacing the element registered with the same callback.
    pub fn register(&self, element: NotificationElement) {
        let mut elements = self.elements.lock();
        match elements
            .iter_mut()
            .find(|existing| same_callback(&existing.callback, &element.callback))
        {
            Some(existing) => {
                debug!("{}: updated notification element {:?}", self.package, element);
                *existing = element;
            }
            None => {
                debug!("{}: added notification element {:?}", self.package, element);
                elements.push(element);
            }
        }
    }

    /// Removes the element registered with `callback`.
    pub fn unregister(&self, callback: &RawNotificationFn) -> bool {
        let mut elements = self.elements.lock();
        let before = elements.len();
        elements.retain(|element| !same_callback(&element.callback, callback));
        elements.len() != before
    }

    /// Reports an event to every interested element. Returns the number of
    /// callbacks invoked.
    ///
    /// The source package of `info` is overwritten with this package.
    pub fn emit(&self, object_id: ObjectId, mut info: NotificationInfo) -> usize {
        info.source_package = self.package;
        let callbacks: Vec<RawNotificationFn> = self
            .elements
            .lock()
            .iter()
            .filter(|element| element.matches(info.notification_type, info.object_type))
            .map(|element| Arc::clone(&element.callback))
            .collect();

        for callback in &callbacks {
            callback(object_id, &info);
        }
        callbacks.len()
    }

    /// Returns the element registered with `callback`, if any.
    pub fn element(&self, callback: &RawNotificationFn) -> Option<NotificationElement> {
        self.elements
            .lock()
            .iter()
            .find(|element| same_callback(&element.callback, callback))
            .cloned()
    }

    pub fn registered_count(&self) -> usize {
        self.elements.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::ControlBuffer;
    use core::sync::atomic::{AtomicUsize, Ordering};

    fn control_packet(opcode: ControlOpcode, element: NotificationElement) -> Packet {
        let mut packet = Packet::new();
        packet
            .allocate_control_operation()
            .unwrap()
            .build(opcode, ControlBuffer::new(element));
        packet.set_completion(|_packet| {});
        packet
    }

    fn element(callback: &RawNotificationFn, notification_type: NotificationType) -> NotificationElement {
        NotificationElement {
            target_package: PackageId::Physical,
            callback: Arc::clone(callback),
            notification_type,
            object_type: ObjectTypeMask::ALL,
        }
    }

    #[test]
    fn test_register_replaces_same_callback() {
        let notifier = PackageNotifier::new(PackageId::Physical);
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_in_callback = Arc::clone(&hits);
        let callback: RawNotificationFn = Arc::new(move |_object: ObjectId, info: &NotificationInfo| {
            assert_eq!(info.source_package, PackageId::Physical);
            hits_in_callback.fetch_add(1, Ordering::SeqCst);
        });

        let status = notifier.handle_control(control_packet(
            ControlOpcode::NOTIFICATION_REGISTER,
            element(&callback, NotificationType::LIFECYCLE_STATE_READY),
        ));
        assert_eq!(status.ok(), Some(PacketStatus::Ok));

        let info = NotificationInfo::new(
            NotificationType::OBJECT_DESTROYED,
            PackageId::Sep,
            ObjectTypeMask::PORT,
        );
        assert_eq!(notifier.emit(ObjectId(3), info), 0);

        notifier.register(element(
            &callback,
            NotificationType::LIFECYCLE_STATE_READY | NotificationType::OBJECT_DESTROYED,
        ));
        assert_eq!(notifier.registered_count(), 1);
        assert_eq!(notifier.emit(ObjectId(3), info), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unregister_unknown_element_fails() {
        let notifier = PackageNotifier::new(PackageId::Physical);
        let callback: RawNotificationFn = Arc::new(|_object: ObjectId, _info: &NotificationInfo| {});

        let status = notifier.handle_control(control_packet(
            ControlOpcode::NOTIFICATION_UNREGISTER,
            element(&callback, NotificationType::ALL),
        ));
        assert_eq!(status.ok(), Some(PacketStatus::GenericFailure));

        notifier.register(element(&callback, NotificationType::ALL));
        let status = notifier.handle_control(control_packet(
            ControlOpcode::NOTIFICATION_UNREGISTER,
            element(&callback, NotificationType::ALL),
        ));
        assert_eq!(status.ok(), Some(PacketStatus::Ok));
        assert!(notifier.element(&callback).is_none());
    }

    #[test]
    fn test_other_opcodes_are_handed_back() {
        let notifier = PackageNotifier::new(PackageId::Esp);
        let mut packet = Packet::new();
        packet
            .allocate_control_operation()
            .unwrap()
            .build(ControlOpcode(0x99), ControlBuffer::empty());

        let packet = notifier.handle_control(packet).unwrap_err();
        assert_eq!(packet.status(), PacketStatus::Invalid);
        assert!(notifier.handle_control(Packet::new()).is_err());
    }
}
