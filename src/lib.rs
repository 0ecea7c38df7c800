//! # FBE API transport core
//!
//! This crate is the packet transport and notification core of the FBE
//! storage-stack API. Client code (CLIs, test harnesses, management
//! services) uses it to send control and I/O requests to the cooperating
//! storage-stack packages (physical, NEIT, SEP, ESP, KMS) and to receive
//! state-change notifications from them.
//!
//! ## Architecture
//!
//! ### Transport
//! - [`Packet`]: Owned request envelope with address, attributes, status and completion hook
//! - [`PacketPool`]: Pre-allocated packets with overflow allocation and bounded draining
//! - [`EntryRegistry`]: One I/O + control entry pair per [`PackageId`]
//! - [`Dispatcher`]: Builds packets, routes them to packages, waits for synchronous sends
//!
//! ### Notifications
//! - [`NotificationEngine`]: Worker thread fanning package events out to listeners
//! - [`PackageNotifier`]: Package side of the register/unregister contract
//! - [`JobNotifications`]: Waiting for job completions
//!
//! ### Lifecycle
//! - [`FbeApi`]: Process context with reference-counted init/destroy
//! - [`FbeApiConfig`]: Pool geometry, timeouts and notification policy
//!
//! ## Features
//!
//! - **Completion always fires**: every submitted packet is completed exactly once,
//!   including packets for packages that have no entries
//! - **Bounded shutdown**: outstanding packets and a stuck worker are waited for
//!   with a cap, then reported
//! - **Safe unregistration**: a listener is never removed while its callback runs
//!
//! ## Examples
//!
//! ### Attaching a package and sending a control request
//!
//! ```rust,ignore
//! use fbe_api::{ControlOpcode, ControlRequest, ControlTarget, FbeApi, LibEntries, PackageId, ServiceId};
//!
//! let api = FbeApi::default();
//! api.set_entries(PackageId::Sep as u32, LibEntries::from_package(sep_package))?;
//! api.init()?;
//!
//! let request = ControlRequest::new(
//!     ControlOpcode(0x2001),
//!     PackageId::Sep,
//!     ControlTarget::Service(ServiceId::Database),
//! )
//! .with_buffer(ControlBuffer::new(query))
//! .with_timeout(Some(Duration::from_secs(300)));
//! let reply = api.send_control_sync(request)?;
//! if !reply.is_ok() {
//!     warn!("query failed: {:?}", reply.status);
//! }
//!
//! api.destroy()?;
//! ```
//!
//! ### Asynchronous I/O on a pool packet
//!
//! ```rust,ignore
//! let api = Arc::new(api);
//! let packet = api.acquire_packet()?;
//! let api_for_completion = Arc::clone(&api);
//! api.send_io(packet, ObjectId(0x10a), PackageId::Physical, move |packet| {
//!     debug!("io done: {:?}", packet.status());
//!     api_for_completion.release_packet(packet).ok();
//! }, None);
//! ```

extern crate alloc;
#[macro_use]
extern crate log;

mod config;
mod dispatch;
mod lifecycle;
mod package;
mod packet;
mod registry;
mod status;

pub mod notify;
pub mod pool;

pub use config::{FbeApiConfig, NotificationConfig};
pub use dispatch::{ControlReply, ControlRequest, ControlTarget, DispatchStats, Dispatcher};
pub use lifecycle::FbeApi;
pub use package::{ClassId, ObjectId, PackageId, PackageMask, PacketAddress, ServiceId};
pub use packet::{
    CancelFn, CompletionFn, ControlBuffer, ControlOpcode, ControlOperation, Packet, PacketAttr,
    PacketMagic, SgElement,
};
pub use pool::{PacketPool, PoolStats};
pub use registry::{EntryRegistry, LibEntries, PackageEntry, PacketEntryFn};
pub use status::{ControlStatus, ControlStatusInfo, PacketStatus};

// Re-export the notification types most callers need
pub use notify::{
    JobActionInfo, JobNotifications, NotificationCallback, NotificationElement, NotificationEngine,
    NotificationEvent, NotificationInfo, NotificationType, ObjectTypeMask, PackageNotifier,
    RegistrationId,
};
