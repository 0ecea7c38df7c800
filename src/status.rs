//! Transport status codes carried on packets and control operations.

use axerrno::{AxError, AxResult};

/// Status of a packet as reported by the transport or the target package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PacketStatus {
    /// The packet has not been completed yet.
    #[default]
    Invalid,
    Ok,
    /// Accepted by the package and still in flight.
    Pending,
    /// The package is busy; the packet will complete later.
    Busy,
    GenericFailure,
    /// The addressed package or object does not exist.
    NoObject,
    /// The edge to the target object is not enabled (object went away).
    EdgeNotEnabled,
    /// A bounded wait for completion expired.
    Timeout,
    Cancelled,
    InsufficientResources,
}

impl PacketStatus {
    #[inline]
    pub const fn is_ok(self) -> bool {
        matches!(self, PacketStatus::Ok)
    }

    /// `Pending` and `Busy` are normal outcomes of a submit and are never
    /// reported as errors.
    #[inline]
    pub const fn is_in_flight(self) -> bool {
        matches!(self, PacketStatus::Pending | PacketStatus::Busy)
    }

    /// Statuses meaning the target object disappeared while the request was
    /// on its way. Expected in a dynamic topology.
    #[inline]
    pub const fn is_object_gone(self) -> bool {
        matches!(self, PacketStatus::EdgeNotEnabled | PacketStatus::NoObject)
    }

    /// Converts the status into a result for callers that propagate with `?`.
    pub fn into_result(self) -> AxResult {
        match self {
            PacketStatus::Ok | PacketStatus::Pending => Ok(()),
            PacketStatus::Busy => Err(AxError::ResourceBusy),
            PacketStatus::NoObject | PacketStatus::EdgeNotEnabled => Err(AxError::NotFound),
            PacketStatus::InsufficientResources => Err(AxError::NoMemory),
            PacketStatus::Invalid | PacketStatus::Cancelled => Err(AxError::BadState),
            PacketStatus::Timeout => Err(AxError::WouldBlock),
            PacketStatus::GenericFailure => Err(AxError::Io),
        }
    }
}

/// Status of the control operation inside a control packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ControlStatus {
    #[default]
    Invalid,
    Ok,
    Failure,
    Busy,
    InsufficientBuffer,
}

impl ControlStatus {
    #[inline]
    pub const fn is_ok(self) -> bool {
        matches!(self, ControlStatus::Ok)
    }
}

/// Everything a synchronous control send reports back about its packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ControlStatusInfo {
    pub packet_status: PacketStatus,
    pub packet_qualifier: u32,
    pub control_status: ControlStatus,
    pub control_qualifier: u32,
}

impl ControlStatusInfo {
    /// Both the packet and its control operation succeeded.
    #[inline]
    pub const fn is_ok(&self) -> bool {
        self.packet_status.is_ok() && self.control_status.is_ok()
    }

    /// Status info for a request that never got a completed packet back.
    pub(crate) const fn failed(packet_status: PacketStatus) -> Self {
        Self {
            packet_status,
            packet_qualifier: 0,
            control_status: ControlStatus::Failure,
            control_qualifier: 0,
        }
    }
}
