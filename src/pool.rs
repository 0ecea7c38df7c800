//! Pre-allocated packet pool with overflow allocation and bounded draining.
//!
//! Packets are allocated up front in chunks and handed out by value. Every
//! checked-out packet keeps its [`PacketOrigin`] as a handle, and the pool
//! tracks the handles of all outstanding packets so that `release` can tell
//! its own packets from foreign or already returned ones.

use alloc::collections::{BTreeSet, VecDeque};
use alloc::vec::Vec;
use core::mem::size_of;
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use core::time::Duration;

use axerrno::{ax_err, ax_err_type, AxResult};
use parking_lot::{Condvar, Mutex as WaitMutex};
use spin::Mutex;

use crate::config::FbeApiConfig;
use crate::packet::{Packet, PacketMagic, PacketOrigin};

/// Fixed byte budget of one pre-allocated chunk.
pub const CHUNK_BYTES: usize = 1 << 20;

/// Source of pool ids. Every pool gets a fresh one, so packets of another
/// pool or of an earlier generation never match this pool's handles.
static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

/// Snapshot of pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    /// Number of pre-allocated packets.
    pub capacity: usize,
    /// Packets sitting in the free queue.
    pub free: usize,
    /// Packets checked out, pooled and dynamic.
    pub outstanding: usize,
    /// Checked-out packets that were allocated on overflow.
    pub dynamic_outstanding: usize,
}

struct PoolQueues {
    free: VecDeque<Packet>,
    outstanding: BTreeSet<PacketOrigin>,
    dynamic_outstanding: usize,
    destroyed: bool,
}

/// A pool of reusable transport packets.
pub struct PacketPool {
    id: u64,
    queues: Mutex<PoolQueues>,
    capacity: usize,
    max_overflow: Option<usize>,
    drain_attempts: u32,
    drain_interval: Duration,
    next_serial: AtomicU64,
    draining: AtomicBool,
    drain_lock: WaitMutex<()>,
    drained: Condvar,
}

impl PacketPool {
    /// Allocates `chunk_count` chunks of `packets_per_chunk` packets each.
    ///
    /// # Errors
    ///
    /// - `InvalidInput` if either count is zero or a chunk would exceed
    ///   [`CHUNK_BYTES`].
    /// - `NoMemory` if a chunk cannot be allocated. No partial pool is kept.
    pub fn new(chunk_count: usize, packets_per_chunk: usize) -> AxResult<Self> {
        if chunk_count == 0 || packets_per_chunk == 0 {
            return ax_err!(InvalidInput, "packet pool needs at least one chunk and one packet");
        }
        if packets_per_chunk.saturating_mul(size_of::<Packet>()) > CHUNK_BYTES {
            return ax_err!(InvalidInput, "packets per chunk exceed the chunk byte budget");
        }

        let id = NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed);
        let capacity = chunk_count * packets_per_chunk;
        let mut free = VecDeque::new();
        free.try_reserve_exact(capacity)
            .map_err(|_| ax_err_type!(NoMemory, "packet pool free queue"))?;

        for chunk in 0..chunk_count {
            let mut packets: Vec<Packet> = Vec::new();
            packets
                .try_reserve_exact(packets_per_chunk)
                .map_err(|_| ax_err_type!(NoMemory, "packet pool chunk"))?;
            packets.extend((0..packets_per_chunk).map(|slot| {
                let mut packet = Packet::with_origin(PacketOrigin::Pooled { pool: id, chunk, slot });
                packet.set_magic(PacketMagic::Destroyed);
                packet
            }));
            free.extend(packets);
        }

        debug!("packet pool {id}: {chunk_count} chunks x {packets_per_chunk} packets");

        Ok(Self {
            id,
            queues: Mutex::new(PoolQueues {
                free,
                outstanding: BTreeSet::new(),
                dynamic_outstanding: 0,
                destroyed: false,
            }),
            capacity,
            max_overflow: None,
            drain_attempts: 10,
            drain_interval: Duration::from_millis(500),
            next_serial: AtomicU64::new(0),
            draining: AtomicBool::new(false),
            drain_lock: WaitMutex::new(()),
            drained: Condvar::new(),
        })
    }

    /// Builds a pool from the pool settings of `config`.
    pub fn from_config(config: &FbeApiConfig) -> AxResult<Self> {
        Ok(Self::new(config.packet_chunks, config.packets_per_chunk)?
            .with_max_overflow(config.max_overflow_packets)
            .with_drain(config.drain_attempts, config.drain_interval))
    }

    /// Caps the number of overflow packets outstanding at once.
    pub fn with_max_overflow(mut self, max: Option<usize>) -> Self {
        self.max_overflow = max;
        self
    }

    /// Sets the bounded wait used by [`drain_and_destroy`](Self::drain_and_destroy).
    pub fn with_drain(mut self, attempts: u32, interval: Duration) -> Self {
        self.drain_attempts = attempts;
        self.drain_interval = interval;
        self
    }

    /// Checks out a packet, allocating one on overflow when the free queue is empty.
    ///
    /// Never blocks waiting for capacity.
    ///
    /// # Errors
    ///
    /// - `BadState` after [`drain_and_destroy`](Self::drain_and_destroy).
    /// - `NoMemory` when the overflow cap is reached.
    pub fn acquire(&self) -> AxResult<Packet> {
        let mut queues = self.queues.lock();
        if queues.destroyed {
            return ax_err!(BadState, "packet pool destroyed");
        }

        if let Some(mut packet) = queues.free.pop_front() {
            packet.set_magic(PacketMagic::Live);
            queues.outstanding.insert(packet.origin());
            return Ok(packet);
        }

        if let Some(max) = self.max_overflow {
            if queues.dynamic_outstanding >= max {
                return ax_err!(NoMemory, "packet pool overflow limit reached");
            }
        }
        queues.dynamic_outstanding += 1;
        drop(queues);

        let serial = self.next_serial.fetch_add(1, Ordering::Relaxed);
        let packet = Packet::with_origin(PacketOrigin::Dynamic { pool: self.id, serial });
        debug!("packet pool exhausted, allocated dynamic packet {serial}");

        self.queues.lock().outstanding.insert(packet.origin());
        Ok(packet)
    }

    /// Returns a packet to the pool.
    ///
    /// Dynamic packets are dropped. Pooled packets are reset, marked
    /// [`PacketMagic::Destroyed`] and queued for reuse.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for standalone packets and packets that are not
    /// outstanding in this pool.
    pub fn release(&self, mut packet: Packet) -> AxResult {
        let origin = packet.origin();
        let owner = match origin {
            PacketOrigin::Pooled { pool, .. } | PacketOrigin::Dynamic { pool, .. } => pool,
            PacketOrigin::Standalone => {
                return ax_err!(InvalidInput, "packet does not belong to the pool");
            }
        };
        if owner != self.id {
            return ax_err!(InvalidInput, "packet belongs to another pool");
        }

        let now_idle = {
            let mut queues = self.queues.lock();
            if !queues.outstanding.remove(&origin) {
                return ax_err!(InvalidInput, "packet is not outstanding in this pool");
            }
            match origin {
                PacketOrigin::Dynamic { .. } => {
                    queues.dynamic_outstanding -= 1;
                    drop(packet);
                }
                _ if queues.destroyed => drop(packet),
                _ => {
                    packet.reuse();
                    packet.set_magic(PacketMagic::Destroyed);
                    queues.free.push_back(packet);
                }
            }
            queues.outstanding.is_empty()
        };

        if now_idle && self.draining.load(Ordering::Acquire) {
            let _guard = self.drain_lock.lock();
            self.drained.notify_all();
        }
        Ok(())
    }

    fn outstanding_count(&self) -> usize {
        self.queues.lock().outstanding.len()
    }

    /// Waits for outstanding packets to come back, then tears the pool down.
    ///
    /// The wait is bounded by the configured drain attempts and interval.
    /// Packets still outstanding after that are reported and leaked. Returns
    /// the number of leaked packets.
    ///
    /// # Errors
    ///
    /// Returns `BadState` if the pool was already destroyed.
    pub fn drain_and_destroy(&self) -> AxResult<usize> {
        if self.queues.lock().destroyed {
            return ax_err!(BadState, "packet pool already destroyed");
        }

        self.draining.store(true, Ordering::Release);
        {
            let mut guard = self.drain_lock.lock();
            for attempt in 0..self.drain_attempts {
                let outstanding = self.outstanding_count();
                if outstanding == 0 {
                    break;
                }
                debug!(
                    "packet pool drain: {outstanding} outstanding, attempt {}/{}",
                    attempt + 1,
                    self.drain_attempts
                );
                self.drained.wait_for(&mut guard, self.drain_interval);
            }
        }
        self.draining.store(false, Ordering::Release);

        let mut queues = self.queues.lock();
        queues.destroyed = true;
        let leaked = queues.outstanding.len();
        if leaked > 0 {
            error!("packet pool destroyed with {leaked} outstanding packets");
        }
        queues.free = VecDeque::new();
        Ok(leaked)
    }

    /// Returns `true` once the pool has been drained and destroyed.
    pub fn is_destroyed(&self) -> bool {
        self.queues.lock().destroyed
    }

    /// Returns a snapshot of the pool occupancy.
    pub fn stats(&self) -> PoolStats {
        let queues = self.queues.lock();
        PoolStats {
            capacity: self.capacity,
            free: queues.free.len(),
            outstanding: queues.outstanding.len(),
            dynamic_outstanding: queues.dynamic_outstanding,
        }
    }
}
