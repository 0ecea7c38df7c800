//! Notification engine.
//!
//! The engine sits between the packages and the API's listeners:
//!
//! - Packages call the engine's raw callback on arbitrary threads. The
//!   callback copies the event onto the worker queue and returns.
//! - A dedicated worker thread pops events in order and walks the
//!   [`RegistrationList`], calling every listener whose filter matches.
//! - `register` / `unregister` maintain the listener list and keep each
//!   package's aggregate [`NotificationElement`] registered for as long as at
//!   least one listener needs that package.

use alloc::string::ToString;
use alloc::sync::{Arc, Weak};
use core::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::thread::{self, JoinHandle};

use axerrno::{ax_err, AxResult};
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex as StateMutex;
use spin::Mutex;

use crate::config::NotificationConfig;
use crate::dispatch::{ControlReply, ControlRequest, ControlTarget, Dispatcher};
use crate::package::{ObjectId, PackageId, PackageMask, ServiceId};
use crate::packet::{ControlBuffer, ControlOpcode};

use super::notifier::{NotificationElement, RawNotificationFn};
use super::queue::{
    EventQueue, NotificationEvent, NotificationInfo, NotificationType, ObjectTypeMask, WorkerMessage,
};
use super::routing::{NotificationCallback, NotificationFilter, RegistrationId, RegistrationList};

/// Run state of the notification worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WorkerState {
    Run = 0,
    Stop = 1,
    Done = 2,
}

impl WorkerState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            0 => WorkerState::Run,
            1 => WorkerState::Stop,
            _ => WorkerState::Done,
        }
    }
}

struct Worker {
    thread: JoinHandle<()>,
    done: Receiver<()>,
    state: Arc<AtomicU8>,
}

/// What has been registered with one package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
struct PackageRegistration {
    notification_type: NotificationType,
    object_type: ObjectTypeMask,
    registered: bool,
}

struct EngineInner {
    dispatcher: Arc<Dispatcher>,
    config: NotificationConfig,
    lifecycle: StateMutex<()>,
    initialized: AtomicBool,
    registrations: Arc<RegistrationList>,
    queue: Mutex<Option<EventQueue>>,
    worker: Mutex<Option<Worker>>,
    packages: StateMutex<[PackageRegistration; PackageId::COUNT]>,
    raw_notification: RawNotificationFn,
}

/// Fans package events out to registered listeners on a worker thread.
///
/// # Usage
///
/// ```rust,ignore
/// let engine = NotificationEngine::new(dispatcher, NotificationConfig::default());
/// engine.init()?;
///
/// let callback: NotificationCallback = Arc::new(|event| info!("{event:?}"));
/// let id = engine.register(
///     NotificationType::LIFECYCLE_ANY_STATE_CHANGE,
///     PackageMask::PHYSICAL,
///     ObjectTypeMask::ALL,
///     Arc::clone(&callback),
/// )?;
///
/// engine.unregister(&callback, id)?;
/// engine.destroy()?;
/// ```
pub struct NotificationEngine {
    inner: Arc<EngineInner>,
}

impl NotificationEngine {
    /// Creates an engine that talks to packages through `dispatcher`.
    ///
    /// # Arguments
    ///
    /// * `dispatcher` - Used to send register/unregister requests to packages.
    /// * `config` - Timeouts and the widened-registration policy.
    pub fn new(dispatcher: Arc<Dispatcher>, config: NotificationConfig) -> Self {
        let inner = Arc::new_cyclic(|weak: &Weak<EngineInner>| {
            let weak = weak.clone();
            let raw_notification: RawNotificationFn =
                Arc::new(move |object_id: ObjectId, info: &NotificationInfo| {
                    if let Some(inner) = weak.upgrade() {
                        inner.raw_callback(object_id, info);
                    }
                });
            EngineInner {
                dispatcher,
                config,
                lifecycle: StateMutex::new(()),
                initialized: AtomicBool::new(false),
                registrations: Arc::new(RegistrationList::new()),
                queue: Mutex::new(None),
                worker: Mutex::new(None),
                packages: StateMutex::new([PackageRegistration::default(); PackageId::COUNT]),
                raw_notification,
            }
        });
        Self { inner }
    }

    /// Starts the worker thread. Calling it again while initialized is a no-op.
    ///
    /// The engine reports itself initialized only once the event queue and
    /// the worker are in place.
    ///
    /// # Errors
    ///
    /// Returns `ResourceBusy` if the worker thread cannot be spawned.
    pub fn init(&self) -> AxResult {
        let inner = &self.inner;
        let _lifecycle = inner.lifecycle.lock();
        if inner.initialized.load(Ordering::Acquire) {
            debug!("notification engine already initialized");
            return Ok(());
        }

        let (queue, receiver) = EventQueue::new();
        let (done_tx, done_rx) = channel::bounded(1);
        let state = Arc::new(AtomicU8::new(WorkerState::Run as u8));
        let registrations = Arc::clone(&inner.registrations);
        let worker_state = Arc::clone(&state);

        let spawned = thread::Builder::new()
            .name("fbe-api-notification".to_string())
            .spawn(move || run_worker(receiver, registrations, worker_state, done_tx));
        let thread = match spawned {
            Ok(thread) => thread,
            Err(err) => {
                error!("failed to spawn notification worker: {err}");
                return ax_err!(ResourceBusy, "notification worker spawn failed");
            }
        };

        *inner.packages.lock() = [PackageRegistration::default(); PackageId::COUNT];
        *inner.queue.lock() = Some(queue);
        *inner.worker.lock() = Some(Worker {
            thread,
            done: done_rx,
            state,
        });
        inner.initialized.store(true, Ordering::Release);
        info!("notification engine initialized");
        Ok(())
    }

    /// Unregisters from every package, stops the worker and drops leftover
    /// registrations.
    ///
    /// A worker that does not exit within the configured timeout is reported
    /// and left behind.
    ///
    /// # Errors
    ///
    /// Returns `BadState` if the engine is not initialized.
    pub fn destroy(&self) -> AxResult {
        let inner = &self.inner;
        let _lifecycle = inner.lifecycle.lock();
        if !inner.initialized.load(Ordering::Acquire) {
            return ax_err!(BadState, "notification engine not initialized");
        }

        {
            let mut packages = inner.packages.lock();
            for package in PackageId::ALL {
                let entry = &mut packages[package.index()];
                if entry.registered {
                    inner.unregister_from_package(package, entry);
                }
                *entry = PackageRegistration::default();
            }
        }

        let queue = inner.queue.lock().take();
        let worker = inner.worker.lock().take();
        if let Some(worker) = worker {
            worker.state.store(WorkerState::Stop as u8, Ordering::Release);
            if let Some(queue) = &queue {
                queue.stop();
            }
            match worker.done.recv_timeout(inner.config.worker_exit_timeout) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                    if worker.thread.join().is_err() {
                        error!("notification worker panicked");
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    error!(
                        "notification worker did not exit within {:?}",
                        inner.config.worker_exit_timeout
                    );
                }
            }
        }
        drop(queue);

        let leaked = inner.registrations.drain();
        for registration in &leaked {
            warn!("dropping notification registration {:?} left at destroy", registration.id());
        }

        inner.initialized.store(false, Ordering::Release);
        info!("notification engine destroyed");
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.initialized.load(Ordering::Acquire)
    }

    /// State of the worker thread, `None` when no worker was started.
    pub fn worker_state(&self) -> Option<WorkerState> {
        self.inner
            .worker
            .lock()
            .as_ref()
            .map(|worker| WorkerState::from_raw(worker.state.load(Ordering::Acquire)))
    }

    /// Registers a listener.
    ///
    /// The listener is called on the worker thread for every event whose
    /// type, source package and object type intersect the given masks. Every
    /// package in `packages` is asked to report events if it was not already.
    ///
    /// # Arguments
    ///
    /// * `notification_type` - Event kinds to receive.
    /// * `packages` - Source packages to receive events from.
    /// * `object_type` - Source object classes to receive events from.
    /// * `callback` - The listener. Keep a clone to unregister.
    ///
    /// # Errors
    ///
    /// Returns `BadState` if the engine is not initialized.
    pub fn register(
        &self,
        notification_type: NotificationType,
        packages: PackageMask,
        object_type: ObjectTypeMask,
        callback: NotificationCallback,
    ) -> AxResult<RegistrationId> {
        let inner = &self.inner;
        if !inner.initialized.load(Ordering::Acquire) {
            return ax_err!(BadState, "notification engine not initialized");
        }

        let filter = NotificationFilter::new(notification_type, packages, object_type);
        let id = inner.registrations.insert(filter, callback);
        debug!("notification registration {id:?}: {filter:?}");

        for package in packages.packages() {
            inner.ensure_registered_with_package(package, notification_type, object_type);
        }
        Ok(id)
    }

    /// Removes a listener once none of its callbacks is running.
    ///
    /// Packages no other listener needs are told to stop reporting. Packages
    /// still needed keep the element they have.
    ///
    /// Must not be called from the listener's own callback: it would wait on
    /// itself.
    ///
    /// # Errors
    ///
    /// - `BadState` if the engine is not initialized.
    /// - `NotFound` if no registration matches both `callback` and `id`.
    pub fn unregister(&self, callback: &NotificationCallback, id: RegistrationId) -> AxResult {
        let inner = &self.inner;
        if !inner.initialized.load(Ordering::Acquire) {
            return ax_err!(BadState, "notification engine not initialized");
        }

        let removed = inner.registrations.remove_when_idle(
            callback,
            id,
            inner.config.unregister_poll_interval,
        )?;
        debug!("notification registration {id:?} removed");

        let mut packages = inner.packages.lock();
        let still_required = inner.registrations.required_packages();
        for package in removed.filter().packages.packages() {
            if still_required.has(package) {
                continue;
            }
            let entry = &mut packages[package.index()];
            if entry.registered {
                inner.unregister_from_package(package, entry);
            }
            *entry = PackageRegistration::default();
        }
        Ok(())
    }

    /// ORs the masks into `package`'s element and registers it with the
    /// package if needed. Returns whether the package is registered afterwards.
    pub fn ensure_registered_with_package(
        &self,
        package: PackageId,
        notification_type: NotificationType,
        object_type: ObjectTypeMask,
    ) -> bool {
        self.inner
            .ensure_registered_with_package(package, notification_type, object_type)
    }

    /// Entry point for package events. Never blocks.
    pub fn raw_callback(&self, object_id: ObjectId, info: &NotificationInfo) {
        self.inner.raw_callback(object_id, info);
    }

    /// The raw callback handed to packages inside the notification element.
    pub fn raw_notification_fn(&self) -> RawNotificationFn {
        Arc::clone(&self.inner.raw_notification)
    }

    /// Returns `true` if `package` accepted this engine's registration.
    pub fn is_registered_with(&self, package: PackageId) -> bool {
        self.inner.packages.lock()[package.index()].registered
    }

    /// The aggregate element tracked for `package`, if it is registered.
    pub fn package_element(&self, package: PackageId) -> Option<NotificationElement> {
        let entry = self.inner.packages.lock()[package.index()];
        entry
            .registered
            .then(|| self.inner.element_for(package, &entry))
    }

    /// Number of live listener registrations.
    pub fn registration_count(&self) -> usize {
        self.inner.registrations.len()
    }
}

impl Drop for NotificationEngine {
    fn drop(&mut self) {
        if self.is_initialized() {
            warn!("notification engine dropped while initialized, destroying");
            if let Err(err) = self.destroy() {
                error!("notification engine destroy on drop failed: {err:?}");
            }
        }
    }
}

impl EngineInner {
    fn raw_callback(&self, object_id: ObjectId, info: &NotificationInfo) {
        let event = NotificationEvent {
            object_id,
            info: *info,
        };
        match self.queue.lock().as_ref() {
            Some(queue) => {
                if let Err(err) = queue.push(event) {
                    error!("failed to queue notification for object {:#x}: {err:?}", object_id.0);
                }
            }
            None => error!(
                "notification for object {:#x} dropped, engine not running",
                object_id.0
            ),
        }
    }

    fn element_for(&self, package: PackageId, entry: &PackageRegistration) -> NotificationElement {
        NotificationElement {
            target_package: package,
            callback: Arc::clone(&self.raw_notification),
            notification_type: entry.notification_type,
            object_type: entry.object_type,
        }
    }

    fn send_package_request(
        &self,
        opcode: ControlOpcode,
        element: NotificationElement,
    ) -> AxResult<ControlReply> {
        let package = element.target_package;
        let request = ControlRequest::new(opcode, package, ControlTarget::Service(ServiceId::Notification))
            .with_buffer(ControlBuffer::new(element))
            .with_timeout(self.config.control_timeout);
        self.dispatcher.send_control_sync(request)
    }

    fn ensure_registered_with_package(
        &self,
        package: PackageId,
        notification_type: NotificationType,
        object_type: ObjectTypeMask,
    ) -> bool {
        let mut packages = self.packages.lock();
        let entry = &mut packages[package.index()];

        let widened =
            !entry.notification_type.contains(notification_type) || !entry.object_type.contains(object_type);
        entry.notification_type |= notification_type;
        entry.object_type |= object_type;

        if entry.registered {
            if !widened || !self.config.resend_widened_registration {
                return true;
            }
            debug!("re-registering widened notification element with {package}");
        }

        let element = self.element_for(package, entry);
        match self.send_package_request(ControlOpcode::NOTIFICATION_REGISTER, element) {
            Ok(reply) if reply.is_ok() => {
                entry.registered = true;
                debug!("registered for notifications with {package}");
            }
            Ok(reply) => {
                info!(
                    "{package} did not accept the notification registration: {:?}",
                    reply.status
                );
            }
            Err(err) => {
                error!("failed to send notification registration to {package}: {err:?}");
            }
        }
        entry.registered
    }

    fn unregister_from_package(&self, package: PackageId, entry: &PackageRegistration) {
        let element = self.element_for(package, entry);
        match self.send_package_request(ControlOpcode::NOTIFICATION_UNREGISTER, element) {
            Ok(reply) if reply.is_ok() => debug!("unregistered notifications from {package}"),
            Ok(reply) => info!(
                "{package} did not accept the notification unregister: {:?}",
                reply.status
            ),
            Err(err) => error!("failed to send notification unregister to {package}: {err:?}"),
        }
    }
}

fn run_worker(
    receiver: Receiver<WorkerMessage>,
    registrations: Arc<RegistrationList>,
    state: Arc<AtomicU8>,
    done: Sender<()>,
) {
    debug!("notification worker started");
    while let Ok(message) = receiver.recv() {
        match message {
            WorkerMessage::Event(event)
                if state.load(Ordering::Acquire) == WorkerState::Run as u8 =>
            {
                let delivered = registrations.dispatch(&event);
                trace!(
                    "notification {:?} for object {:#x} delivered to {delivered} listeners",
                    event.info.notification_type,
                    event.object_id.0
                );
            }
            WorkerMessage::Event(event) => {
                trace!("dropping notification for object {:#x} at shutdown", event.object_id.0);
            }
            WorkerMessage::Stop => break,
        }
    }
    state.store(WorkerState::Done as u8, Ordering::Release);
    debug!("notification worker exiting");
    if done.send(()).is_err() {
        debug!("notification worker outlived its destroy wait");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::Packet;
    use crate::pool::PacketPool;
    use crate::registry::{EntryRegistry, LibEntries};
    use crate::status::PacketStatus;
    use crate::notify::PackageNotifier;
    use core::sync::atomic::AtomicUsize;
    use core::time::Duration;

    struct MockPackage {
        notifier: PackageNotifier,
        registers: AtomicUsize,
        unregisters: AtomicUsize,
    }

    impl MockPackage {
        fn attach(registry: &EntryRegistry, package: PackageId) -> Arc<Self> {
            let mock = Arc::new(Self {
                notifier: PackageNotifier::new(package),
                registers: AtomicUsize::new(0),
                unregisters: AtomicUsize::new(0),
            });
            let control = Arc::clone(&mock);
            registry.set_package_entries(
                package,
                LibEntries::new(
                    Arc::new(|mut packet: Packet| {
                        packet.set_status(PacketStatus::GenericFailure, 0);
                        packet.complete();
                        PacketStatus::GenericFailure
                    }),
                    Arc::new(move |packet: Packet| control.control_entry(packet)),
                ),
            );
            mock
        }

        fn control_entry(&self, packet: Packet) -> PacketStatus {
            match packet.control_operation().map(|operation| operation.opcode()) {
                Some(ControlOpcode::NOTIFICATION_REGISTER) => {
                    self.registers.fetch_add(1, Ordering::SeqCst);
                }
                Some(ControlOpcode::NOTIFICATION_UNREGISTER) => {
                    self.unregisters.fetch_add(1, Ordering::SeqCst);
                }
                _ => {}
            }
            match self.notifier.handle_control(packet) {
                Ok(status) => status,
                Err(mut packet) => {
                    packet.set_status(PacketStatus::GenericFailure, 0);
                    packet.complete();
                    PacketStatus::GenericFailure
                }
            }
        }
    }

    fn engine(config: NotificationConfig) -> (NotificationEngine, Arc<EntryRegistry>) {
        let registry = Arc::new(EntryRegistry::new());
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::new(PacketPool::new(1, 8).unwrap()),
            Arc::clone(&registry),
        ));
        (NotificationEngine::new(dispatcher, config), registry)
    }

    fn channel_callback() -> (NotificationCallback, Receiver<NotificationEvent>) {
        let (tx, rx) = channel::unbounded();
        let callback: NotificationCallback = Arc::new(move |event: &NotificationEvent| {
            let _ = tx.send(*event);
        });
        (callback, rx)
    }

    #[test]
    fn test_register_requires_init() {
        let (engine, _registry) = engine(NotificationConfig::default());
        let (callback, _rx) = channel_callback();
        assert!(
            engine
                .register(NotificationType::ALL, PackageMask::ALL, ObjectTypeMask::ALL, callback)
                .is_err()
        );
        assert!(engine.destroy().is_err());
    }

    #[test]
    fn test_init_is_idempotent() {
        let (engine, _registry) = engine(NotificationConfig::default());
        engine.init().unwrap();
        engine.init().unwrap();
        assert_eq!(engine.worker_state(), Some(WorkerState::Run));
        engine.destroy().unwrap();
        assert!(!engine.is_initialized());
        assert!(engine.destroy().is_err());
    }

    #[test]
    fn test_concurrent_init_returns_running_engine() {
        use std::sync::Barrier;

        let (engine, _registry) = engine(NotificationConfig::default());
        let engine = Arc::new(engine);
        let barrier = Arc::new(Barrier::new(8));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let engine = Arc::clone(&engine);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    engine.init().unwrap();
                    engine.worker_state()
                })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), Some(WorkerState::Run));
        }

        let (callback, rx) = channel_callback();
        engine
            .register(NotificationType::ALL, PackageMask::ESP, ObjectTypeMask::ALL, callback)
            .unwrap();
        let info = NotificationInfo::new(NotificationType::OBJECT_CREATED, PackageId::Esp, ObjectTypeMask::BOARD);
        engine.raw_callback(ObjectId(3), &info);
        assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap().object_id, ObjectId(3));
        engine.destroy().unwrap();
    }

    #[test]
    fn test_event_reaches_listener_through_package() {
        let (engine, registry) = engine(NotificationConfig::default());
        let physical = MockPackage::attach(&registry, PackageId::Physical);
        engine.init().unwrap();

        let (callback, rx) = channel_callback();
        let id = engine
            .register(
                NotificationType::LIFECYCLE_ANY_STATE_CHANGE,
                PackageMask::PHYSICAL,
                ObjectTypeMask::ENCLOSURE,
                Arc::clone(&callback),
            )
            .unwrap();
        assert!(engine.is_registered_with(PackageId::Physical));
        assert_eq!(physical.registers.load(Ordering::SeqCst), 1);

        let info = NotificationInfo::new(
            NotificationType::LIFECYCLE_STATE_READY,
            PackageId::Physical,
            ObjectTypeMask::ENCLOSURE,
        );
        assert_eq!(physical.notifier.emit(ObjectId(0x20), info), 1);

        let event = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(event.object_id, ObjectId(0x20));
        assert_eq!(event.info.source_package, PackageId::Physical);

        engine.unregister(&callback, id).unwrap();
        assert!(!engine.is_registered_with(PackageId::Physical));
        assert_eq!(physical.unregisters.load(Ordering::SeqCst), 1);
        assert_eq!(physical.notifier.registered_count(), 0);
        engine.destroy().unwrap();
    }

    #[test]
    fn test_missing_package_is_tolerated() {
        let (engine, _registry) = engine(NotificationConfig::default());
        engine.init().unwrap();

        let (callback, _rx) = channel_callback();
        let id = engine
            .register(NotificationType::ALL, PackageMask::KMS, ObjectTypeMask::ALL, Arc::clone(&callback))
            .unwrap();
        assert!(!engine.is_registered_with(PackageId::Kms));
        engine.unregister(&callback, id).unwrap();
        assert!(engine.unregister(&callback, id).is_err());
        engine.destroy().unwrap();
    }

    #[test]
    fn test_widened_registration_is_resent() {
        let (engine, registry) = engine(NotificationConfig::default());
        let sep = MockPackage::attach(&registry, PackageId::Sep);
        engine.init().unwrap();

        let (callback, _rx) = channel_callback();
        engine
            .register(NotificationType::OBJECT_DESTROYED, PackageMask::SEP, ObjectTypeMask::LUN, Arc::clone(&callback))
            .unwrap();
        engine
            .register(NotificationType::OBJECT_DESTROYED, PackageMask::SEP, ObjectTypeMask::LUN, Arc::clone(&callback))
            .unwrap();
        assert_eq!(sep.registers.load(Ordering::SeqCst), 1);

        engine
            .register(NotificationType::ZEROING, PackageMask::SEP, ObjectTypeMask::LUN, Arc::clone(&callback))
            .unwrap();
        assert_eq!(sep.registers.load(Ordering::SeqCst), 2);

        let element = sep.notifier.element(&engine.raw_notification_fn()).unwrap();
        assert!(element.notification_type.contains(NotificationType::ZEROING));
        assert_eq!(sep.notifier.registered_count(), 1);
        engine.destroy().unwrap();
    }

    #[test]
    fn test_send_once_registration_when_resend_disabled() {
        let config = NotificationConfig::default().with_resend_widened_registration(false);
        let (engine, registry) = engine(config);
        let sep = MockPackage::attach(&registry, PackageId::Sep);
        engine.init().unwrap();

        let (callback, _rx) = channel_callback();
        engine
            .register(NotificationType::OBJECT_DESTROYED, PackageMask::SEP, ObjectTypeMask::LUN, Arc::clone(&callback))
            .unwrap();
        engine
            .register(NotificationType::ZEROING, PackageMask::SEP, ObjectTypeMask::LUN, Arc::clone(&callback))
            .unwrap();
        assert_eq!(sep.registers.load(Ordering::SeqCst), 1);

        // Tracked aggregate grew, the package still has the first element.
        let tracked = engine.package_element(PackageId::Sep).unwrap();
        assert!(tracked.notification_type.contains(NotificationType::ZEROING));
        let element = sep.notifier.element(&engine.raw_notification_fn()).unwrap();
        assert!(!element.notification_type.contains(NotificationType::ZEROING));
        engine.destroy().unwrap();
    }

    #[test]
    fn test_destroy_unregisters_and_drops_leaked_registrations() {
        let (engine, registry) = engine(NotificationConfig::default());
        let physical = MockPackage::attach(&registry, PackageId::Physical);
        engine.init().unwrap();

        let (callback, _rx) = channel_callback();
        engine
            .register(NotificationType::ALL, PackageMask::PHYSICAL, ObjectTypeMask::ALL, callback)
            .unwrap();
        assert_eq!(engine.registration_count(), 1);

        engine.destroy().unwrap();
        assert_eq!(engine.registration_count(), 0);
        assert_eq!(physical.unregisters.load(Ordering::SeqCst), 1);
        assert_eq!(physical.notifier.registered_count(), 0);
        assert_eq!(engine.worker_state(), None);
    }

    #[test]
    fn test_raw_callback_without_worker_does_not_block() {
        let (engine, _registry) = engine(NotificationConfig::default());
        let info = NotificationInfo::new(
            NotificationType::OBJECT_CREATED,
            PackageId::Esp,
            ObjectTypeMask::BOARD,
        );
        engine.raw_callback(ObjectId(1), &info);
        (engine.raw_notification_fn())(ObjectId(1), &info);
    }
}
