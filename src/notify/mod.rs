//! Notification subsystem.
//!
//! Packages report state changes of their objects; API clients register
//! listeners filtered by notification type, source package and object type.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐
//! │ Package          │ PackageNotifier::emit(object, info)
//! │ (PackageNotifier)│
//! └──────┬───────────┘
//!        │ raw callback (any thread, never blocks)
//!        ▼
//! ┌──────────────────┐
//! │ EventQueue       │ FIFO, crossbeam channel
//! └──────┬───────────┘
//!        │ worker thread
//!        ▼
//! ┌──────────────────┐
//! │ RegistrationList │ filter match, ref-counted callback
//! └──────┬───────────┘
//!        ▼
//! ┌──────────────────┐
//! │ Listener         │ NotificationCallback(&event)
//! └──────────────────┘
//! ```
//!
//! The [`NotificationEngine`] keeps one aggregate [`NotificationElement`]
//! registered with each package that at least one listener needs, sending the
//! register/unregister control requests through the
//! [`Dispatcher`](crate::Dispatcher).
//!
//! # Usage Example
//!
//! ```rust,ignore
//! use fbe_api::notify::{NotificationCallback, NotificationType, ObjectTypeMask};
//! use fbe_api::PackageMask;
//!
//! let callback: NotificationCallback = Arc::new(|event| {
//!     info!("object {:#x} changed: {:?}", event.object_id.0, event.info.notification_type);
//! });
//! let id = api.notification_register(
//!     NotificationType::LIFECYCLE_ANY_STATE_CHANGE,
//!     PackageMask::PHYSICAL | PackageMask::SEP,
//!     ObjectTypeMask::ALL,
//!     Arc::clone(&callback),
//! )?;
//!
//! // ...
//!
//! api.notification_unregister(&callback, id)?;
//! ```

mod job;
mod manager;
mod notifier;
mod queue;
mod routing;

pub use job::{JobNotifications, DEFAULT_FINISHED_JOB_CAPACITY};
pub use manager::{NotificationEngine, WorkerState};
pub use notifier::{NotificationElement, PackageNotifier, RawNotificationFn};
pub use queue::{JobActionInfo, NotificationEvent, NotificationInfo, NotificationType, ObjectTypeMask};
pub use routing::{
    NotificationCallback, NotificationFilter, NotificationRegistration, RegistrationId, RegistrationList,
};
