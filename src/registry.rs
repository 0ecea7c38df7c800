//! Per-package entry table.
//!
//! Every package the API can talk to installs one pair of entry points: one
//! for I/O packets and one for control packets. A slot is either empty or
//! holds a complete pair, so a dispatch can never observe a half-written
//! entry.

use alloc::sync::Arc;
use alloc::vec::Vec;

use axerrno::{ax_err, AxResult};
use spin::RwLock;

use crate::package::PackageId;
use crate::packet::Packet;
use crate::status::PacketStatus;

/// A package entry point. Takes ownership of the packet and returns the
/// submit status; the packet is completed through its completion hook.
pub type PacketEntryFn = Arc<dyn Fn(Packet) -> PacketStatus + Send + Sync>;

/// Entry points a package exposes to the API.
pub trait PackageEntry: Send + Sync {
    /// Handles an I/O packet.
    fn io_entry(&self, packet: Packet) -> PacketStatus;

    /// Handles a control packet.
    fn control_entry(&self, packet: Packet) -> PacketStatus;
}

/// The I/O and control entry pair of one package.
#[derive(Clone)]
pub struct LibEntries {
    pub io_entry: PacketEntryFn,
    pub control_entry: PacketEntryFn,
}

impl LibEntries {
    pub fn new(io_entry: PacketEntryFn, control_entry: PacketEntryFn) -> Self {
        Self {
            io_entry,
            control_entry,
        }
    }

    /// Wraps a [`PackageEntry`] implementation.
    pub fn from_package<P: PackageEntry + 'static>(package: Arc<P>) -> Self {
        let io = Arc::clone(&package);
        Self {
            io_entry: Arc::new(move |packet| io.io_entry(packet)),
            control_entry: Arc::new(move |packet| package.control_entry(packet)),
        }
    }
}

/// Table of installed package entries, one slot per [`PackageId`].
///
/// # Concurrency
///
/// Lookups take a read lock and clone the entry pair out, so a package is
/// never called with the table locked. Installing or clearing an entry
/// replaces the whole slot under the write lock.
pub struct EntryRegistry {
    entries: RwLock<[Option<LibEntries>; PackageId::COUNT]>,
}

impl EntryRegistry {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(core::array::from_fn(|_| None)),
        }
    }

    /// Installs the entry pair of `package`, replacing any previous one.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if `package` is not a routable package id
    /// (including the invalid and last sentinels).
    pub fn set_entries(&self, package: u32, entries: LibEntries) -> AxResult {
        let package = PackageId::try_from(package)?;
        self.set_package_entries(package, entries);
        Ok(())
    }

    /// Installs the entry pair of a known package.
    pub fn set_package_entries(&self, package: PackageId, entries: LibEntries) {
        let previous = self.entries.write()[package.index()].replace(entries);
        if previous.is_some() {
            info!("replaced entries of package {package}");
        } else {
            debug!("installed entries of package {package}");
        }
    }

    /// Detaches `package`. Returns `true` if it had entries.
    pub fn clear_entries(&self, package: PackageId) -> bool {
        self.entries.write()[package.index()].take().is_some()
    }

    /// Returns `true` if `package` has a usable entry pair.
    pub fn is_initialized(&self, package: PackageId) -> bool {
        self.entries.read()[package.index()].is_some()
    }

    /// Returns the entry pair of `package`, if installed.
    pub fn get(&self, package: PackageId) -> Option<LibEntries> {
        self.entries.read()[package.index()].clone()
    }

    /// Lists the packages that currently have entries.
    pub fn registered_packages(&self) -> Vec<PackageId> {
        let entries = self.entries.read();
        PackageId::ALL
            .into_iter()
            .filter(|package| entries[package.index()].is_some())
            .collect()
    }

    /// Detaches every package.
    pub fn clear(&self) {
        self.entries.write().iter_mut().for_each(|slot| *slot = None);
    }
}

impl Default for EntryRegistry {
    fn default() -> Self {
        Self::new()
    }
}
