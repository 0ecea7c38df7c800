//! Registration list of notification listeners.
//!
//! The list is walked by the worker for every event. A callback is never
//! invoked with the list locked; instead each registration carries a
//! reference count that is raised for the duration of the callback, and
//! removal waits for that count to drop to zero.

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use core::time::Duration;

use axerrno::{ax_err, AxResult};
use parking_lot::{Condvar, Mutex as WaitMutex};
use spin::Mutex;

use crate::package::PackageMask;

use super::queue::{NotificationEvent, NotificationInfo, NotificationType, ObjectTypeMask};

/// Identifier handed out by `register`. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RegistrationId(pub u64);

/// Listener callback. Context is whatever the closure captures.
pub type NotificationCallback = Arc<dyn Fn(&NotificationEvent) + Send + Sync>;

/// Returns `true` if both handles point at the same callback object.
pub(crate) fn same_callback<T: ?Sized>(a: &Arc<T>, b: &Arc<T>) -> bool {
    core::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// Which events a registration wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotificationFilter {
    pub notification_type: NotificationType,
    pub packages: PackageMask,
    pub object_type: ObjectTypeMask,
}

impl NotificationFilter {
    pub const fn new(
        notification_type: NotificationType,
        packages: PackageMask,
        object_type: ObjectTypeMask,
    ) -> Self {
        Self {
            notification_type,
            packages,
            object_type,
        }
    }

    /// Type, source package and object type must all intersect.
    pub fn matches(&self, info: &NotificationInfo) -> bool {
        self.notification_type.intersects(info.notification_type)
            && self.packages.has(info.source_package)
            && self.object_type.intersects(info.object_type)
    }
}

/// One registered listener.
pub struct NotificationRegistration {
    id: RegistrationId,
    filter: NotificationFilter,
    callback: NotificationCallback,
    refs: AtomicUsize,
}

impl NotificationRegistration {
    pub fn id(&self) -> RegistrationId {
        self.id
    }

    pub fn filter(&self) -> &NotificationFilter {
        &self.filter
    }

    /// Number of callbacks currently running for this registration.
    pub fn ref_count(&self) -> usize {
        self.refs.load(Ordering::Acquire)
    }
}

impl core::fmt::Debug for NotificationRegistration {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("NotificationRegistration")
            .field("id", &self.id)
            .field("filter", &self.filter)
            .field("refs", &self.ref_count())
            .finish()
    }
}

/// Process-wide ordered list of registrations.
///
/// Registrations are kept in id order, which is also insertion order.
pub struct RegistrationList {
    list: Mutex<Vec<Arc<NotificationRegistration>>>,
    next_id: AtomicU64,
    idle_lock: WaitMutex<()>,
    idle: Condvar,
}

impl RegistrationList {
    pub fn new() -> Self {
        Self {
            list: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            idle_lock: WaitMutex::new(()),
            idle: Condvar::new(),
        }
    }

    /// Appends a registration and returns its id.
    pub fn insert(&self, filter: NotificationFilter, callback: NotificationCallback) -> RegistrationId {
        let mut list = self.list.lock();
        let id = RegistrationId(self.next_id.fetch_add(1, Ordering::Relaxed));
        list.push(Arc::new(NotificationRegistration {
            id,
            filter,
            callback,
            refs: AtomicUsize::new(0),
        }));
        id
    }

    /// Takes a reference on the first matching registration after `after`.
    fn next_match(
        &self,
        after: Option<RegistrationId>,
        info: &NotificationInfo,
    ) -> Option<Arc<NotificationRegistration>> {
        let list = self.list.lock();
        let start = after.map_or(0, |after| list.partition_point(|reg| reg.id <= after));
        let registration = list[start..].iter().find(|reg| reg.filter.matches(info))?;
        registration.refs.fetch_add(1, Ordering::AcqRel);
        Some(Arc::clone(registration))
    }

    /// Delivers `event` to every matching registration. Returns the number
    /// of callbacks invoked.
    ///
    /// Registrations added or removed during the walk are seen or skipped
    /// according to their position relative to the walk.
    pub fn dispatch(&self, event: &NotificationEvent) -> usize {
        let mut last = None;
        let mut delivered = 0;

        while let Some(registration) = self.next_match(last, &event.info) {
            last = Some(registration.id);
            (registration.callback)(event);
            delivered += 1;

            let _guard = self.idle_lock.lock();
            registration.refs.fetch_sub(1, Ordering::AcqRel);
            self.idle.notify_all();
        }
        delivered
    }

    /// Returns the registration matching both `id` and `callback`.
    pub fn find(
        &self,
        callback: &NotificationCallback,
        id: RegistrationId,
    ) -> Option<Arc<NotificationRegistration>> {
        self.list
            .lock()
            .iter()
            .find(|reg| reg.id == id && same_callback(&reg.callback, callback))
            .cloned()
    }

    /// Removes the registration matching `id` and `callback` once no callback
    /// is running for it.
    ///
    /// The wait is woken whenever a callback finishes and re-checks at least
    /// every `poll_interval`. Must not be called from the registration's own
    /// callback.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no registration matches.
    pub fn remove_when_idle(
        &self,
        callback: &NotificationCallback,
        id: RegistrationId,
        poll_interval: Duration,
    ) -> AxResult<Arc<NotificationRegistration>> {
        if self.find(callback, id).is_none() {
            return ax_err!(NotFound, "notification registration not found");
        }

        let mut guard = self.idle_lock.lock();
        loop {
            {
                let mut list = self.list.lock();
                let Some(position) = list.iter().position(|reg| reg.id == id) else {
                    return ax_err!(NotFound, "notification registration removed concurrently");
                };
                let refs = list[position].refs.load(Ordering::Acquire);
                if refs == 0 {
                    return Ok(list.remove(position));
                }
                trace!("registration {id:?} busy with {refs} callbacks, waiting");
            }
            self.idle.wait_for(&mut guard, poll_interval);
        }
    }

    /// Union of the package masks of all registrations.
    pub fn required_packages(&self) -> PackageMask {
        self.list
            .lock()
            .iter()
            .fold(PackageMask::empty(), |mask, reg| mask | reg.filter.packages)
    }

    /// Removes every registration regardless of reference counts.
    pub fn drain(&self) -> Vec<Arc<NotificationRegistration>> {
        core::mem::take(&mut *self.list.lock())
    }

    pub fn len(&self) -> usize {
        self.list.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.lock().is_empty()
    }
}

impl Default for RegistrationList {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::{ObjectId, PackageId};
    use std::sync::mpsc;
    use std::thread;
    use std::time::Instant;

    fn event(package: PackageId, object_type: ObjectTypeMask) -> NotificationEvent {
        NotificationEvent {
            object_id: ObjectId(1),
            info: NotificationInfo::new(NotificationType::LIFECYCLE_STATE_READY, package, object_type),
        }
    }

    fn counting_callback(counter: &Arc<AtomicUsize>) -> NotificationCallback {
        let counter = Arc::clone(counter);
        Arc::new(move |_event: &NotificationEvent| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_filter_requires_all_three_masks() {
        let filter = NotificationFilter::new(
            NotificationType::LIFECYCLE_ANY_STATE_CHANGE,
            PackageMask::SEP,
            ObjectTypeMask::LUN | ObjectTypeMask::RAID_GROUP,
        );
        assert!(filter.matches(&event(PackageId::Sep, ObjectTypeMask::LUN).info));
        assert!(!filter.matches(&event(PackageId::Esp, ObjectTypeMask::LUN).info));
        assert!(!filter.matches(&event(PackageId::Sep, ObjectTypeMask::PORT).info));

        let mut info = event(PackageId::Sep, ObjectTypeMask::LUN).info;
        info.notification_type = NotificationType::OBJECT_DATA_CHANGED;
        assert!(!filter.matches(&info));
    }

    #[test]
    fn test_ids_are_monotonic_and_not_reused() {
        let list = RegistrationList::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let callback = counting_callback(&counter);
        let filter = NotificationFilter::new(NotificationType::ALL, PackageMask::ALL, ObjectTypeMask::ALL);

        let a = list.insert(filter, Arc::clone(&callback));
        let b = list.insert(filter, Arc::clone(&callback));
        assert!(b > a);
        list.remove_when_idle(&callback, b, Duration::from_millis(10)).unwrap();
        let c = list.insert(filter, Arc::clone(&callback));
        assert!(c > b);
    }

    #[test]
    fn test_remove_requires_matching_callback() {
        let list = RegistrationList::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let callback = counting_callback(&counter);
        let other = counting_callback(&counter);
        let filter = NotificationFilter::new(NotificationType::ALL, PackageMask::ALL, ObjectTypeMask::ALL);

        let id = list.insert(filter, Arc::clone(&callback));
        assert!(list.remove_when_idle(&other, id, Duration::from_millis(10)).is_err());
        assert!(list.remove_when_idle(&callback, RegistrationId(999), Duration::from_millis(10)).is_err());
        assert!(list.remove_when_idle(&callback, id, Duration::from_millis(10)).is_ok());
        assert!(list.is_empty());
    }

    #[test]
    fn test_required_packages() {
        let list = RegistrationList::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let callback = counting_callback(&counter);

        list.insert(
            NotificationFilter::new(
                NotificationType::LIFECYCLE_STATE_READY,
                PackageMask::PHYSICAL,
                ObjectTypeMask::PORT,
            ),
            Arc::clone(&callback),
        );
        list.insert(
            NotificationFilter::new(
                NotificationType::OBJECT_DESTROYED,
                PackageMask::PHYSICAL | PackageMask::SEP,
                ObjectTypeMask::LUN,
            ),
            Arc::clone(&callback),
        );

        assert_eq!(list.required_packages(), PackageMask::PHYSICAL | PackageMask::SEP);
    }

    #[test]
    fn test_remove_waits_for_running_callback() {
        let list = Arc::new(RegistrationList::new());
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let release_rx = std::sync::Mutex::new(release_rx);
        let finished = Arc::new(AtomicUsize::new(0));

        let finished_in_callback = Arc::clone(&finished);
        let callback: NotificationCallback = Arc::new(move |_event: &NotificationEvent| {
            entered_tx.send(()).unwrap();
            release_rx.lock().unwrap().recv().unwrap();
            finished_in_callback.fetch_add(1, Ordering::SeqCst);
        });
        let id = list.insert(
            NotificationFilter::new(NotificationType::ALL, PackageMask::ALL, ObjectTypeMask::ALL),
            Arc::clone(&callback),
        );

        let worker = {
            let list = Arc::clone(&list);
            thread::spawn(move || list.dispatch(&event(PackageId::Physical, ObjectTypeMask::PORT)))
        };
        entered_rx.recv().unwrap();

        let releaser = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            release_tx.send(()).unwrap();
        });

        let start = Instant::now();
        let removed = list
            .remove_when_idle(&callback, id, Duration::from_secs(5))
            .unwrap();
        assert!(start.elapsed() >= Duration::from_millis(40));
        // Woken by the callback finishing, not by the poll interval.
        assert!(start.elapsed() < Duration::from_secs(5));
        assert_eq!(finished.load(Ordering::SeqCst), 1);
        assert_eq!(removed.ref_count(), 0);

        assert_eq!(worker.join().unwrap(), 1);
        releaser.join().unwrap();
        assert!(list.is_empty());
    }
}
