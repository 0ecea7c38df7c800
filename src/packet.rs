//! The transport packet handed between callers, the dispatcher and packages.
//!
//! A [`Packet`] is an owned request envelope: it moves into a package entry
//! point when submitted and comes back to whoever installed the completion
//! function when the package calls [`Packet::complete`]. Ownership is what
//! guarantees a packet is completed at most once.

use core::any::Any;
use core::fmt;

use axerrno::{ax_err, AxResult};
use bitflags::bitflags;

use crate::package::{PackageId, PacketAddress};
use crate::status::{ControlStatus, PacketStatus};

bitflags! {
    /// Packet attribute flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PacketAttr: u32 {
        /// The sender blocks until completion.
        const SYNC = 0x1;
        /// The sender installed its own completion and does not wait.
        const ASYNC = 0x2;
        /// Re-issued from inside the stack; left unmarked by the dispatcher.
        const INTERNAL = 0x4;
        /// Originated from an API caller.
        const EXTERNAL = 0x8;
        /// The request may traverse edges to reach the object.
        const TRAVERSE = 0x10;
    }
}

/// Liveness marker of a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketMagic {
    /// Checked out and usable.
    Live,
    /// Parked in the pool free queue.
    Destroyed,
}

/// Where a packet came from, which decides what `release` does with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) enum PacketOrigin {
    /// Pre-allocated pool element.
    Pooled { pool: u64, chunk: usize, slot: usize },
    /// Overflow element allocated when the pool was exhausted.
    Dynamic { pool: u64, serial: u64 },
    /// Created by a caller with [`Packet::new`].
    Standalone,
}

/// Opcode of a control operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ControlOpcode(pub u32);

impl ControlOpcode {
    /// Registers a notification element with a package.
    pub const NOTIFICATION_REGISTER: Self = Self(0x0001_0001);
    /// Removes a previously registered notification element.
    pub const NOTIFICATION_UNREGISTER: Self = Self(0x0001_0002);
}

/// Typed control payload.
///
/// Stands in for the untyped buffer/length pair of the driver boundary: the
/// sender boxes any `Send` value and the package downcasts it back.
#[derive(Default)]
pub struct ControlBuffer(Option<Box<dyn Any + Send>>);

impl ControlBuffer {
    pub fn new<T: Any + Send>(value: T) -> Self {
        Self(Some(Box::new(value)))
    }

    pub const fn empty() -> Self {
        Self(None)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_none()
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.as_ref()?.downcast_ref::<T>()
    }

    pub fn downcast_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.0.as_mut()?.downcast_mut::<T>()
    }

    /// Takes the payload out if it holds a `T`, leaving the buffer empty.
    /// A payload of another type is left in place.
    pub fn take<T: Any>(&mut self) -> Option<T> {
        match self.0.take()?.downcast::<T>() {
            Ok(value) => Some(*value),
            Err(other) => {
                self.0 = Some(other);
                None
            }
        }
    }
}

impl fmt::Debug for ControlBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_some() {
            f.write_str("ControlBuffer(..)")
        } else {
            f.write_str("ControlBuffer(empty)")
        }
    }
}

/// A control request riding inside a packet.
#[derive(Debug)]
pub struct ControlOperation {
    opcode: ControlOpcode,
    buffer: ControlBuffer,
    status: ControlStatus,
    qualifier: u32,
}

impl ControlOperation {
    fn new() -> Self {
        Self {
            opcode: ControlOpcode(0),
            buffer: ControlBuffer::empty(),
            status: ControlStatus::Invalid,
            qualifier: 0,
        }
    }

    /// Fills in the opcode and payload.
    pub fn build(&mut self, opcode: ControlOpcode, buffer: ControlBuffer) {
        self.opcode = opcode;
        self.buffer = buffer;
        self.status = ControlStatus::Invalid;
        self.qualifier = 0;
    }

    pub fn opcode(&self) -> ControlOpcode {
        self.opcode
    }

    pub fn buffer(&self) -> &ControlBuffer {
        &self.buffer
    }

    pub fn buffer_mut(&mut self) -> &mut ControlBuffer {
        &mut self.buffer
    }

    pub fn set_status(&mut self, status: ControlStatus, qualifier: u32) {
        self.status = status;
        self.qualifier = qualifier;
    }

    pub fn status(&self) -> ControlStatus {
        self.status
    }

    pub fn qualifier(&self) -> u32 {
        self.qualifier
    }

    pub fn into_buffer(self) -> ControlBuffer {
        self.buffer
    }
}

/// One element of a scatter-gather list.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SgElement {
    pub data: Vec<u8>,
}

impl SgElement {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    pub fn count(&self) -> usize {
        self.data.len()
    }
}

/// Completion hook. Receives the packet back by value.
pub type CompletionFn = Box<dyn FnOnce(Packet) + Send>;

/// Cancellation hook. Runs at most once.
pub type CancelFn = Box<dyn FnOnce(&mut Packet) + Send>;

/// A transport packet.
pub struct Packet {
    origin: PacketOrigin,
    magic: PacketMagic,
    address: Option<PacketAddress>,
    attr: PacketAttr,
    status: PacketStatus,
    qualifier: u32,
    control: Option<ControlOperation>,
    sg_list: Vec<SgElement>,
    completion: Option<CompletionFn>,
    cancel: Option<CancelFn>,
}

impl Packet {
    /// Creates a caller-owned packet that does not belong to any pool.
    pub fn new() -> Self {
        Self::with_origin(PacketOrigin::Standalone)
    }

    pub(crate) fn with_origin(origin: PacketOrigin) -> Self {
        Self {
            origin,
            magic: PacketMagic::Live,
            address: None,
            attr: PacketAttr::empty(),
            status: PacketStatus::Invalid,
            qualifier: 0,
            control: None,
            sg_list: Vec::new(),
            completion: None,
            cancel: None,
        }
    }

    pub(crate) fn origin(&self) -> PacketOrigin {
        self.origin
    }

    /// Returns `true` for overflow packets allocated outside the pre-allocated chunks.
    pub fn is_dynamically_allocated(&self) -> bool {
        matches!(self.origin, PacketOrigin::Dynamic { .. })
    }

    pub fn magic(&self) -> PacketMagic {
        self.magic
    }

    pub(crate) fn set_magic(&mut self, magic: PacketMagic) {
        self.magic = magic;
    }

    /// Clears everything a previous user left on the packet.
    pub fn reuse(&mut self) {
        self.address = None;
        self.attr = PacketAttr::empty();
        self.status = PacketStatus::Invalid;
        self.qualifier = 0;
        self.control = None;
        self.sg_list.clear();
        self.completion = None;
        self.cancel = None;
    }

    pub fn set_address(&mut self, address: PacketAddress) {
        self.address = Some(address);
    }

    pub fn address(&self) -> Option<&PacketAddress> {
        self.address.as_ref()
    }

    /// Package the packet is addressed to, if it has been addressed.
    pub fn package_id(&self) -> Option<PackageId> {
        self.address.map(|address| address.package)
    }

    /// ORs `attr` into the packet attributes.
    pub fn set_attr(&mut self, attr: PacketAttr) {
        self.attr |= attr;
    }

    pub fn attr(&self) -> PacketAttr {
        self.attr
    }

    pub fn set_status(&mut self, status: PacketStatus, qualifier: u32) {
        self.status = status;
        self.qualifier = qualifier;
    }

    pub fn status(&self) -> PacketStatus {
        self.status
    }

    pub fn status_qualifier(&self) -> u32 {
        self.qualifier
    }

    pub fn set_completion<F>(&mut self, completion: F)
    where
        F: FnOnce(Packet) + Send + 'static,
    {
        self.completion = Some(Box::new(completion));
    }

    pub fn set_cancel<F>(&mut self, cancel: F)
    where
        F: FnOnce(&mut Packet) + Send + 'static,
    {
        self.cancel = Some(Box::new(cancel));
    }

    pub(crate) fn set_boxed_cancel(&mut self, cancel: Option<CancelFn>) {
        self.cancel = cancel;
    }

    /// Attaches an empty control operation.
    ///
    /// # Errors
    ///
    /// Returns `BadState` if the packet already carries one.
    pub fn allocate_control_operation(&mut self) -> AxResult<&mut ControlOperation> {
        if self.control.is_some() {
            return ax_err!(BadState, "packet already carries a control operation");
        }
        Ok(self.control.insert(ControlOperation::new()))
    }

    pub fn control_operation(&self) -> Option<&ControlOperation> {
        self.control.as_ref()
    }

    pub fn control_operation_mut(&mut self) -> Option<&mut ControlOperation> {
        self.control.as_mut()
    }

    /// Detaches the control operation so its buffer can be handed back.
    pub fn release_control_operation(&mut self) -> Option<ControlOperation> {
        self.control.take()
    }

    pub fn set_sg_list(&mut self, sg_list: Vec<SgElement>) {
        self.sg_list = sg_list;
    }

    pub fn sg_list(&self) -> &[SgElement] {
        &self.sg_list
    }

    pub fn take_sg_list(&mut self) -> Vec<SgElement> {
        core::mem::take(&mut self.sg_list)
    }

    /// Runs the cancel hook, if any, and marks the packet cancelled.
    ///
    /// Returns `false` when no hook was installed or it already ran.
    pub fn cancel(&mut self) -> bool {
        match self.cancel.take() {
            Some(cancel) => {
                cancel(self);
                self.set_status(PacketStatus::Cancelled, 0);
                true
            }
            None => false,
        }
    }

    /// Hands the packet to its completion hook.
    ///
    /// A packet without a completion hook is dropped; a pooled packet dropped
    /// this way stays in the pool's outstanding set.
    pub fn complete(mut self) {
        match self.completion.take() {
            Some(completion) => completion(self),
            None => {
                warn!(
                    "packet {:?} completed with status {:?} but has no completion",
                    self.origin, self.status
                );
            }
        }
    }
}

impl Default for Packet {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Packet")
            .field("origin", &self.origin)
            .field("magic", &self.magic)
            .field("address", &self.address)
            .field("attr", &self.attr)
            .field("status", &self.status)
            .field("control", &self.control)
            .field("sg_elements", &self.sg_list.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::ObjectId;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_packet_completion_fires_once() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = Arc::clone(&counter);

        let mut packet = Packet::new();
        packet.set_completion(move |packet| {
            assert_eq!(packet.status(), PacketStatus::Ok);
            counter_clone.fetch_add(1, Ordering::SeqCst);
        });
        packet.set_status(PacketStatus::Ok, 0);
        packet.complete();

        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_packet_attr_is_or_ed() {
        let mut packet = Packet::new();
        packet.set_attr(PacketAttr::TRAVERSE);
        packet.set_attr(PacketAttr::SYNC);
        assert!(packet.attr().contains(PacketAttr::TRAVERSE | PacketAttr::SYNC));
        assert!(!packet.attr().intersects(PacketAttr::EXTERNAL));
    }

    #[test]
    fn test_control_operation_lifecycle() {
        let mut packet = Packet::new();
        packet
            .allocate_control_operation()
            .unwrap()
            .build(ControlOpcode(7), ControlBuffer::new(42u32));
        assert!(packet.allocate_control_operation().is_err());

        let op = packet.control_operation_mut().unwrap();
        assert_eq!(op.opcode(), ControlOpcode(7));
        assert_eq!(op.buffer().downcast_ref::<u32>(), Some(&42));
        *op.buffer_mut().downcast_mut::<u32>().unwrap() = 43;
        op.set_status(ControlStatus::Ok, 5);

        let op = packet.release_control_operation().unwrap();
        assert_eq!(op.status(), ControlStatus::Ok);
        assert_eq!(op.qualifier(), 5);
        let mut buffer = op.into_buffer();
        assert_eq!(buffer.take::<u64>(), None);
        assert_eq!(buffer.take::<u32>(), Some(43));
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_reuse_clears_packet() {
        let mut packet = Packet::new();
        packet.set_address(PacketAddress::object(PackageId::Sep, ObjectId(9)));
        packet.set_attr(PacketAttr::EXTERNAL);
        packet.set_status(PacketStatus::GenericFailure, 3);
        packet.set_sg_list(vec![SgElement::new(vec![1, 2, 3])]);
        packet.allocate_control_operation().unwrap();

        packet.reuse();
        assert!(packet.address().is_none());
        assert!(packet.attr().is_empty());
        assert_eq!(packet.status(), PacketStatus::Invalid);
        assert!(packet.control_operation().is_none());
        assert!(packet.sg_list().is_empty());
    }

    #[test]
    fn test_cancel_runs_once() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = Arc::clone(&counter);

        let mut packet = Packet::new();
        packet.set_cancel(move |_| {
            counter_clone.fetch_add(1, Ordering::SeqCst);
        });

        assert!(packet.cancel());
        assert!(!packet.cancel());
        assert_eq!(packet.status(), PacketStatus::Cancelled);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
