//! Notification payloads and the queue feeding the notification worker.
//!
//! Packages report events on whatever thread they happen to run; the engine
//! copies each one into a [`NotificationEvent`] and pushes it on an
//! [`EventQueue`]. The worker pops events in FIFO order until it receives
//! [`WorkerMessage::Stop`].

use axerrno::{ax_err, AxResult};
use bitflags::bitflags;
use crossbeam::channel::{self, Receiver, Sender};

use crate::package::{ClassId, ObjectId, PackageId};

bitflags! {
    /// Kinds of notifications a listener can subscribe to.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct NotificationType: u64 {
        const LIFECYCLE_STATE_SPECIALIZE = 1 << 0;
        const LIFECYCLE_STATE_ACTIVATE = 1 << 1;
        const LIFECYCLE_STATE_READY = 1 << 2;
        const LIFECYCLE_STATE_HIBERNATE = 1 << 3;
        const LIFECYCLE_STATE_OFFLINE = 1 << 4;
        const LIFECYCLE_STATE_FAIL = 1 << 5;
        const LIFECYCLE_STATE_DESTROY = 1 << 6;
        const LIFECYCLE_STATE_PENDING_READY = 1 << 7;
        const LIFECYCLE_STATE_PENDING_ACTIVATE = 1 << 8;
        const LIFECYCLE_STATE_PENDING_HIBERNATE = 1 << 9;
        const LIFECYCLE_STATE_PENDING_OFFLINE = 1 << 10;
        const LIFECYCLE_STATE_PENDING_FAIL = 1 << 11;
        const LIFECYCLE_STATE_PENDING_DESTROY = 1 << 12;
        const OBJECT_CREATED = 1 << 13;
        const OBJECT_DESTROYED = 1 << 14;
        const OBJECT_DATA_CHANGED = 1 << 15;
        const JOB_ACTION_STATE_CHANGED = 1 << 16;
        const CONFIGURATION_CHANGED = 1 << 17;
        const SWAP_INFO = 1 << 18;
        const DATA_RECONSTRUCTION = 1 << 19;
        const ZEROING = 1 << 20;
        const END_OF_LIFE = 1 << 21;
        const RECOVERY = 1 << 22;
        const CALLHOME = 1 << 23;
        const ENCRYPTION_STATE_CHANGED = 1 << 24;

        /// Every lifecycle state transition, pending states included.
        const LIFECYCLE_ANY_STATE_CHANGE = 0x1fff;
        const ALL = u64::MAX;
    }
}

bitflags! {
    /// Classes of topology objects, used to filter notifications by source object.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ObjectTypeMask: u64 {
        const BOARD = 1 << 0;
        const PORT = 1 << 1;
        const ENCLOSURE = 1 << 2;
        const LCC = 1 << 3;
        const PHYSICAL_DRIVE = 1 << 4;
        const LOGICAL_DRIVE = 1 << 5;
        const RAID_GROUP = 1 << 6;
        const VIRTUAL_DRIVE = 1 << 7;
        const PROVISIONED_DRIVE = 1 << 8;
        const LUN = 1 << 9;
        const ENVIRONMENT_MGMT = 1 << 10;
        const EXTENT_POOL = 1 << 11;
        const EXT_POOL_LUN = 1 << 12;
        const ALL = u64::MAX;
    }
}

/// Outcome of a finished job, carried by `JOB_ACTION_STATE_CHANGED` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobActionInfo {
    pub job_number: u64,
    /// Raw job status as reported by the job service.
    pub status: u32,
    pub error_code: u32,
    /// Object created or affected by the job.
    pub object_id: ObjectId,
}

/// Notification payload reported by a package.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotificationInfo {
    pub notification_type: NotificationType,
    pub source_package: PackageId,
    pub object_type: ObjectTypeMask,
    pub class_id: ClassId,
    pub job: Option<JobActionInfo>,
}

impl NotificationInfo {
    pub fn new(
        notification_type: NotificationType,
        source_package: PackageId,
        object_type: ObjectTypeMask,
    ) -> Self {
        Self {
            notification_type,
            source_package,
            object_type,
            class_id: ClassId::INVALID,
            job: None,
        }
    }

    pub fn with_class(mut self, class_id: ClassId) -> Self {
        self.class_id = class_id;
        self
    }

    pub fn with_job(mut self, job: JobActionInfo) -> Self {
        self.job = Some(job);
        self
    }
}

/// An event waiting for, or being delivered by, the notification worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotificationEvent {
    pub object_id: ObjectId,
    pub info: NotificationInfo,
}

/// Items consumed by the notification worker.
#[derive(Debug)]
pub(crate) enum WorkerMessage {
    Event(NotificationEvent),
    Stop,
}

/// Producer side of the worker queue.
#[derive(Clone)]
pub(crate) struct EventQueue {
    sender: Sender<WorkerMessage>,
}

impl EventQueue {
    /// Creates the queue and the receiver the worker drains.
    pub fn new() -> (Self, Receiver<WorkerMessage>) {
        let (sender, receiver) = channel::unbounded();
        (Self { sender }, receiver)
    }

    /// Queues an event. Never blocks.
    pub fn push(&self, event: NotificationEvent) -> AxResult {
        if self.sender.send(WorkerMessage::Event(event)).is_err() {
            return ax_err!(BadState, "notification worker is gone");
        }
        Ok(())
    }

    /// Asks the worker to exit once it reaches this point of the queue.
    pub fn stop(&self) -> bool {
        self.sender.send(WorkerMessage::Stop).is_ok()
    }

    pub fn len(&self) -> usize {
        self.sender.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(object: u32) -> NotificationEvent {
        NotificationEvent {
            object_id: ObjectId(object),
            info: NotificationInfo::new(
                NotificationType::LIFECYCLE_STATE_READY,
                PackageId::Physical,
                ObjectTypeMask::PORT,
            ),
        }
    }

    #[test]
    fn test_queue_is_fifo_until_stop() {
        let (queue, receiver) = EventQueue::new();
        queue.push(event(1)).unwrap();
        queue.push(event(2)).unwrap();
        assert!(queue.stop());
        assert_eq!(queue.len(), 3);

        let mut seen = alloc::vec::Vec::new();
        while let Ok(WorkerMessage::Event(event)) = receiver.recv() {
            seen.push(event.object_id.0);
        }
        assert_eq!(seen, [1, 2]);
    }

    #[test]
    fn test_push_fails_without_worker() {
        let (queue, receiver) = EventQueue::new();
        drop(receiver);
        assert!(queue.push(event(1)).is_err());
        assert!(!queue.stop());
    }

    #[test]
    fn test_lifecycle_union_covers_states() {
        let any = NotificationType::LIFECYCLE_ANY_STATE_CHANGE;
        assert!(any.contains(NotificationType::LIFECYCLE_STATE_READY));
        assert!(any.contains(NotificationType::LIFECYCLE_STATE_PENDING_DESTROY));
        assert!(!any.intersects(NotificationType::OBJECT_DATA_CHANGED));
    }
}
