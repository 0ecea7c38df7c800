//! Package identifiers, package notification bitmaps and packet addressing.
//!
//! A *package* is one of the cooperating storage-stack domains (physical,
//! NEIT, SEP, ESP, KMS). Each package owns one slot in the
//! [`EntryRegistry`](crate::EntryRegistry) and one bit in a [`PackageMask`].

use core::fmt;

use arrayvec::ArrayVec;
use axerrno::{AxError, AxResult};
use bitflags::bitflags;

/// Identifier of a package the API can route to.
///
/// The raw values match the package enumeration used on the driver boundary,
/// where `0` is the "invalid" sentinel and `6` the "last" sentinel. Neither
/// sentinel is representable here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum PackageId {
    /// Physical package (ports, enclosures, drives).
    Physical = 1,
    /// NEIT error-injection package.
    Neit = 2,
    /// Storage extent package.
    Sep = 3,
    /// Environmental services package.
    Esp = 4,
    /// Key management package.
    Kms = 5,
}

impl PackageId {
    /// Number of routable packages.
    pub const COUNT: usize = 5;

    /// Every routable package, in slot order.
    pub const ALL: [PackageId; Self::COUNT] = [
        PackageId::Physical,
        PackageId::Neit,
        PackageId::Sep,
        PackageId::Esp,
        PackageId::Kms,
    ];

    /// Slot index of this package in per-package tables.
    #[inline]
    pub const fn index(self) -> usize {
        self as usize - 1
    }

    /// The bit this package occupies in a [`PackageMask`].
    pub const fn notification_bit(self) -> PackageMask {
        match self {
            PackageId::Physical => PackageMask::PHYSICAL,
            PackageId::Sep => PackageMask::SEP,
            PackageId::Esp => PackageMask::ESP,
            PackageId::Neit => PackageMask::NEIT,
            PackageId::Kms => PackageMask::KMS,
        }
    }

    /// Short human readable name.
    pub const fn name(self) -> &'static str {
        match self {
            PackageId::Physical => "physical",
            PackageId::Neit => "neit",
            PackageId::Sep => "sep",
            PackageId::Esp => "esp",
            PackageId::Kms => "kms",
        }
    }
}

impl TryFrom<u32> for PackageId {
    type Error = AxError;

    /// Validates a raw package id, rejecting the invalid and last sentinels.
    fn try_from(raw: u32) -> AxResult<Self> {
        match raw {
            1 => Ok(PackageId::Physical),
            2 => Ok(PackageId::Neit),
            3 => Ok(PackageId::Sep),
            4 => Ok(PackageId::Esp),
            5 => Ok(PackageId::Kms),
            _ => Err(axerrno::ax_err_type!(InvalidInput, "package id out of range")),
        }
    }
}

impl fmt::Display for PackageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

bitflags! {
    /// Bitmap of packages, used to filter notifications by their origin.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PackageMask: u32 {
        const PHYSICAL = 0x1;
        const SEP = 0x2;
        const ESP = 0x4;
        const NEIT = 0x8;
        const KMS = 0x10;
        const ALL = 0x1f;
    }
}

impl PackageMask {
    /// Decodes the mask into concrete package ids, in slot order.
    pub fn packages(self) -> ArrayVec<PackageId, { PackageId::COUNT }> {
        PackageId::ALL
            .into_iter()
            .filter(|package| self.intersects(package.notification_bit()))
            .collect()
    }

    /// Returns `true` if `package`'s bit is set.
    #[inline]
    pub const fn has(self, package: PackageId) -> bool {
        self.intersects(package.notification_bit())
    }
}

impl From<PackageId> for PackageMask {
    fn from(package: PackageId) -> Self {
        package.notification_bit()
    }
}

/// Identifier of an addressable object inside a package (drive, RAID group, LUN...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId(pub u32);

impl ObjectId {
    /// Object id used when a packet targets a service or class instead of an object.
    pub const INVALID: Self = Self(u32::MAX);
}

/// Package services that can be the target of a control packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceId {
    Topology,
    Notification,
    Trace,
    Scheduler,
    Database,
    JobService,
    EventLog,
}

/// Object class identifier, used for class-wide control requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClassId(pub u32);

impl ClassId {
    pub const INVALID: Self = Self(0);
}

/// Full destination of a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketAddress {
    pub package: PackageId,
    pub service: ServiceId,
    pub class: ClassId,
    pub object: ObjectId,
}

impl PacketAddress {
    /// Address of an object reached through the package topology service.
    pub const fn object(package: PackageId, object: ObjectId) -> Self {
        Self {
            package,
            service: ServiceId::Topology,
            class: ClassId::INVALID,
            object,
        }
    }

    /// Address of a package service.
    pub const fn service(package: PackageId, service: ServiceId) -> Self {
        Self {
            package,
            service,
            class: ClassId::INVALID,
            object: ObjectId::INVALID,
        }
    }

    /// Address of every object of a class.
    pub const fn class(package: PackageId, class: ClassId) -> Self {
        Self {
            package,
            service: ServiceId::Topology,
            class,
            object: ObjectId::INVALID,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_package_id_range() {
        assert!(PackageId::try_from(0).is_err());
        assert!(PackageId::try_from(6).is_err());
        assert_eq!(PackageId::try_from(3).unwrap(), PackageId::Sep);

        for (slot, package) in PackageId::ALL.iter().enumerate() {
            assert_eq!(package.index(), slot);
            assert_eq!(PackageId::try_from(*package as u32).unwrap(), *package);
        }
    }

    #[test]
    fn test_package_mask_decoding() {
        let mask = PackageMask::PHYSICAL | PackageMask::KMS;
        let packages = mask.packages();
        assert_eq!(packages.as_slice(), &[PackageId::Physical, PackageId::Kms]);

        assert_eq!(PackageMask::ALL.packages().len(), PackageId::COUNT);
        assert!(PackageMask::empty().packages().is_empty());
        assert!(mask.has(PackageId::Kms));
        assert!(!mask.has(PackageId::Sep));
    }

    #[test]
    fn test_package_bits_are_distinct() {
        let mut seen = PackageMask::empty();
        for package in PackageId::ALL {
            let bit = package.notification_bit();
            assert!(!seen.intersects(bit));
            seen |= bit;
        }
        assert_eq!(seen, PackageMask::ALL);
    }
}
