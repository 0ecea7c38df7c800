//! Packet construction and routing to package entry points.
//!
//! The [`Dispatcher`] is the only place where packets cross into a package.
//! Whatever happens on the way (unknown package, downstream failure, success)
//! the packet's completion hook runs exactly once.

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::mem;
use core::sync::atomic::{AtomicU64, Ordering};
use core::time::Duration;
use std::time::Instant;

use axerrno::AxResult;
use parking_lot::{Condvar, Mutex};

use crate::package::{ClassId, ObjectId, PackageId, PacketAddress, ServiceId};
use crate::packet::{CancelFn, ControlBuffer, ControlOpcode, Packet, PacketAttr, SgElement};
use crate::pool::PacketPool;
use crate::registry::EntryRegistry;
use crate::status::{ControlStatus, ControlStatusInfo, PacketStatus};

/// Counters of routed packets.
#[derive(Debug, Default)]
pub struct DispatchStats {
    /// Control packets submitted.
    pub control_count: AtomicU64,
    /// I/O packets submitted.
    pub io_count: AtomicU64,
    /// Packets completed with a failure because their package had no entries.
    pub rejected_count: AtomicU64,
}

impl DispatchStats {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    fn record_control(&self) {
        self.control_count.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    fn record_io(&self) {
        self.io_count.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    fn record_rejected(&self) {
        self.rejected_count.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn controls(&self) -> u64 {
        self.control_count.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn ios(&self) -> u64 {
        self.io_count.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn rejected(&self) -> u64 {
        self.rejected_count.load(Ordering::Relaxed)
    }
}

/// What a control packet is addressed to inside its package.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlTarget {
    Object(ObjectId),
    Service(ServiceId),
    Class(ClassId),
}

/// A control request, built up with `with_*` setters and consumed by a send.
#[derive(Debug)]
pub struct ControlRequest {
    opcode: ControlOpcode,
    package: PackageId,
    target: ControlTarget,
    attr: PacketAttr,
    buffer: ControlBuffer,
    sg_list: Vec<SgElement>,
    timeout: Option<Duration>,
}

impl ControlRequest {
    /// A request for `opcode` addressed to `target` in `package`.
    pub fn new(opcode: ControlOpcode, package: PackageId, target: ControlTarget) -> Self {
        Self {
            opcode,
            package,
            target,
            attr: PacketAttr::empty(),
            buffer: ControlBuffer::empty(),
            sg_list: Vec::new(),
            timeout: None,
        }
    }

    pub fn with_buffer(mut self, buffer: ControlBuffer) -> Self {
        self.buffer = buffer;
        self
    }

    /// Extra packet attributes, OR'd with the sync/async flag of the send.
    pub fn with_attr(mut self, attr: PacketAttr) -> Self {
        self.attr = attr;
        self
    }

    pub fn with_sg_list(mut self, sg_list: Vec<SgElement>) -> Self {
        self.sg_list = sg_list;
        self
    }

    /// Bounds a synchronous wait for completion.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn opcode(&self) -> ControlOpcode {
        self.opcode
    }

    pub fn package(&self) -> PackageId {
        self.package
    }

    fn address(&self) -> PacketAddress {
        match self.target {
            ControlTarget::Object(object) => PacketAddress::object(self.package, object),
            ControlTarget::Service(service) => PacketAddress::service(self.package, service),
            ControlTarget::Class(class) => PacketAddress::class(self.package, class),
        }
    }

    /// Moves the request into `packet`. Fails if the packet already carries
    /// a control operation.
    fn install(self, packet: &mut Packet, mode: PacketAttr) -> Result<(), Self> {
        let address = self.address();
        let Ok(operation) = packet.allocate_control_operation() else {
            return Err(self);
        };
        operation.build(self.opcode, self.buffer);
        packet.set_address(address);
        packet.set_attr(self.attr | mode);
        packet.set_sg_list(self.sg_list);
        Ok(())
    }
}

/// Result of a synchronous control send.
#[derive(Debug)]
pub struct ControlReply {
    pub status: ControlStatusInfo,
    /// The request buffer as the package left it.
    pub buffer: ControlBuffer,
    pub sg_list: Vec<SgElement>,
}

impl ControlReply {
    fn failed(packet_status: PacketStatus) -> Self {
        Self {
            status: ControlStatusInfo::failed(packet_status),
            buffer: ControlBuffer::empty(),
            sg_list: Vec::new(),
        }
    }

    /// Both the packet and the control operation completed successfully.
    pub fn is_ok(&self) -> bool {
        self.status.is_ok()
    }
}

enum SlotState {
    Waiting,
    Done(Packet),
    Abandoned,
}

/// Rendezvous between a synchronous sender and the packet completion.
struct CompletionSlot {
    state: Mutex<SlotState>,
    done: Condvar,
    pool: Arc<PacketPool>,
}

impl CompletionSlot {
    fn new(pool: Arc<PacketPool>) -> Self {
        Self {
            state: Mutex::new(SlotState::Waiting),
            done: Condvar::new(),
            pool,
        }
    }

    fn complete(&self, packet: Packet) {
        let mut state = self.state.lock();
        if matches!(*state, SlotState::Abandoned) {
            drop(state);
            debug!("late completion of abandoned packet, returning it to the pool");
            if let Err(err) = self.pool.release(packet) {
                warn!("failed to release abandoned packet: {err:?}");
            }
            return;
        }
        *state = SlotState::Done(packet);
        self.done.notify_one();
    }

    /// Waits for the completion. On timeout the slot is marked abandoned and
    /// a later completion returns the packet to the pool.
    fn wait(&self, timeout: Option<Duration>) -> Option<Packet> {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        let mut state = self.state.lock();
        loop {
            if let SlotState::Done(packet) = mem::replace(&mut *state, SlotState::Waiting) {
                return Some(packet);
            }
            match deadline {
                None => self.done.wait(&mut state),
                Some(deadline) => {
                    if self.done.wait_until(&mut state, deadline).timed_out() {
                        return match mem::replace(&mut *state, SlotState::Abandoned) {
                            SlotState::Done(packet) => Some(packet),
                            _ => None,
                        };
                    }
                }
            }
        }
    }
}

/// Routes packets to package entry points.
pub struct Dispatcher {
    pool: Arc<PacketPool>,
    registry: Arc<EntryRegistry>,
    stats: DispatchStats,
}

impl Dispatcher {
    pub fn new(pool: Arc<PacketPool>, registry: Arc<EntryRegistry>) -> Self {
        Self {
            pool,
            registry,
            stats: DispatchStats::new(),
        }
    }

    pub fn pool(&self) -> &Arc<PacketPool> {
        &self.pool
    }

    pub fn registry(&self) -> &Arc<EntryRegistry> {
        &self.registry
    }

    pub fn stats(&self) -> &DispatchStats {
        &self.stats
    }

    fn reject(&self, mut packet: Packet, status: PacketStatus) -> PacketStatus {
        self.stats.record_rejected();
        packet.set_status(status, 0);
        packet.complete();
        PacketStatus::GenericFailure
    }

    /// Hands an addressed control packet to its package's control entry.
    ///
    /// Packets not marked [`PacketAttr::INTERNAL`] are marked
    /// [`PacketAttr::EXTERNAL`]. A packet for a package without entries is
    /// completed with [`PacketStatus::NoObject`] and `GenericFailure` is returned.
    pub fn send_control_to_package(&self, mut packet: Packet) -> PacketStatus {
        self.stats.record_control();
        let Some(package) = packet.package_id() else {
            warn!("control packet without an address");
            return self.reject(packet, PacketStatus::NoObject);
        };
        let Some(entries) = self.registry.get(package) else {
            warn!("control packet for package {package} which has no entries");
            return self.reject(packet, PacketStatus::NoObject);
        };

        if !packet.attr().intersects(PacketAttr::INTERNAL) {
            packet.set_attr(PacketAttr::EXTERNAL);
        }
        trace!("control packet to {package}");
        (entries.control_entry)(packet)
    }

    /// Hands an addressed I/O packet to its package's I/O entry.
    ///
    /// A packet for a package without entries is completed with
    /// [`PacketStatus::GenericFailure`].
    pub fn send_io_to_package(&self, packet: Packet) -> PacketStatus {
        self.stats.record_io();
        let Some(package) = packet.package_id() else {
            warn!("io packet without an address");
            return self.reject(packet, PacketStatus::GenericFailure);
        };
        let Some(entries) = self.registry.get(package) else {
            warn!("io packet for package {package} which has no entries");
            return self.reject(packet, PacketStatus::GenericFailure);
        };

        trace!("io packet to {package}");
        (entries.io_entry)(packet)
    }

    /// Sends a control request on a pool packet and blocks until it completes.
    ///
    /// When the request's timeout expires first, the reply carries
    /// [`PacketStatus::Timeout`] and the packet is returned to the pool
    /// whenever the package eventually completes it.
    ///
    /// # Errors
    ///
    /// Returns an error only if no packet could be acquired from the pool.
    /// Transport outcomes are reported in [`ControlReply::status`].
    pub fn send_control_sync(&self, request: ControlRequest) -> AxResult<ControlReply> {
        let opcode = request.opcode;
        let package = request.package;
        let timeout = request.timeout;

        let mut packet = self.pool.acquire()?;
        if request.install(&mut packet, PacketAttr::SYNC).is_err() {
            warn!("pool packet already carried a control operation");
            self.pool.release(packet)?;
            return Ok(ControlReply::failed(PacketStatus::GenericFailure));
        }

        let slot = Arc::new(CompletionSlot::new(Arc::clone(&self.pool)));
        let completion = Arc::clone(&slot);
        packet.set_completion(move |packet| completion.complete(packet));

        let submitted = self.send_control_to_package(packet);
        if !submitted.is_ok() && !submitted.is_in_flight() {
            debug!("control {opcode:?} to {package}: submit returned {submitted:?}");
        }

        let Some(mut packet) = slot.wait(timeout) else {
            error!("control {opcode:?} to {package} timed out after {timeout:?}");
            return Ok(ControlReply::failed(PacketStatus::Timeout));
        };

        let (control_status, control_qualifier, buffer) = match packet.release_control_operation() {
            Some(operation) => (operation.status(), operation.qualifier(), operation.into_buffer()),
            None => (ControlStatus::Invalid, 0, ControlBuffer::empty()),
        };
        let status = ControlStatusInfo {
            packet_status: packet.status(),
            packet_qualifier: packet.status_qualifier(),
            control_status,
            control_qualifier,
        };
        let sg_list = packet.take_sg_list();
        if let Err(err) = self.pool.release(packet) {
            warn!("failed to return control packet to the pool: {err:?}");
        }

        if status.packet_status.is_object_gone() {
            info!("control {opcode:?} to {package}: {:?}", status.packet_status);
        } else if !status.packet_status.is_ok() {
            warn!("control {opcode:?} to {package}: packet status {:?}", status.packet_status);
        } else if !status.control_status.is_ok() {
            debug!("control {opcode:?} to {package}: control status {:?}", status.control_status);
        }

        Ok(ControlReply {
            status,
            buffer,
            sg_list,
        })
    }

    /// Sends a control request on a caller-owned packet without waiting.
    ///
    /// `completion` receives the packet back and owns releasing it.
    pub fn send_control_async<F>(
        &self,
        mut packet: Packet,
        request: ControlRequest,
        completion: F,
    ) -> PacketStatus
    where
        F: FnOnce(Packet) + Send + 'static,
    {
        packet.set_completion(completion);
        if request.install(&mut packet, PacketAttr::ASYNC).is_err() {
            warn!("async control packet already carries a control operation");
            packet.set_status(PacketStatus::GenericFailure, 0);
            packet.complete();
            return PacketStatus::GenericFailure;
        }

        let status = self.send_control_to_package(packet);
        if !status.is_ok() && !status.is_in_flight() {
            debug!("async control submit returned {status:?}");
        }
        status
    }

    /// Sends an I/O packet to `object_id` in `package`.
    ///
    /// `completion` receives the packet back. `cancel`, if given, is
    /// installed as the packet's cancel hook.
    pub fn send_io<F>(
        &self,
        mut packet: Packet,
        object_id: ObjectId,
        package: PackageId,
        completion: F,
        cancel: Option<CancelFn>,
    ) -> PacketStatus
    where
        F: FnOnce(Packet) + Send + 'static,
    {
        packet.set_address(PacketAddress::object(package, object_id));
        packet.set_completion(completion);
        packet.set_boxed_cancel(cancel);

        let status = self.send_io_to_package(packet);
        if status.is_object_gone() {
            info!("io to object {:#x} in {package}: object went away ({status:?})", object_id.0);
        } else if !status.is_ok() && !status.is_in_flight() {
            error!("io to object {:#x} in {package} failed: {status:?}", object_id.0);
        }
        status
    }
}
