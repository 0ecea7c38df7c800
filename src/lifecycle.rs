//! Process context with reference-counted init/destroy.
//!
//! Several unrelated call sites may each bring the API up and down. The
//! first [`FbeApi::init`] builds the packet pool, the dispatcher and the
//! notification engine; later calls only count. The matching last
//! [`FbeApi::destroy`] tears everything down in reverse order:
//!
//! 1. job-notification tracking,
//! 2. the notification engine,
//! 3. the packet pool (bounded drain of outstanding packets).
//!
//! The count and the init/teardown work are serialized by one lock, so
//! concurrent init/destroy calls from different threads are safe.

use alloc::sync::Arc;
use core::time::Duration;

use axerrno::{ax_err, AxResult};
use parking_lot::Mutex;
use spin::RwLock;

use crate::config::FbeApiConfig;
use crate::dispatch::{ControlReply, ControlRequest, Dispatcher};
use crate::notify::{
    JobActionInfo, JobNotifications, NotificationCallback, NotificationEngine, NotificationType,
    ObjectTypeMask, RegistrationId,
};
use crate::package::{ObjectId, PackageId, PackageMask};
use crate::packet::{CancelFn, Packet};
use crate::pool::{PacketPool, PoolStats};
use crate::registry::{EntryRegistry, LibEntries};
use crate::status::PacketStatus;

#[derive(Clone)]
struct Components {
    pool: Arc<PacketPool>,
    dispatcher: Arc<Dispatcher>,
    engine: Arc<NotificationEngine>,
    jobs: Option<Arc<JobNotifications>>,
}

/// The API context shared by every caller in a process.
///
/// Package entries live in the context's [`EntryRegistry`] and survive
/// init/destroy cycles; everything else exists only while initialized.
pub struct FbeApi {
    config: FbeApiConfig,
    registry: Arc<EntryRegistry>,
    refs: Mutex<usize>,
    components: RwLock<Option<Components>>,
}

impl FbeApi {
    pub fn new(config: FbeApiConfig) -> Self {
        Self {
            config,
            registry: Arc::new(EntryRegistry::new()),
            refs: Mutex::new(0),
            components: RwLock::new(None),
        }
    }

    pub fn config(&self) -> &FbeApiConfig {
        &self.config
    }

    /// Takes a reference on the API, initializing it on the first call.
    ///
    /// # Errors
    ///
    /// Fails if the pool configuration is invalid or the notification worker
    /// cannot be started. The reference count is unchanged on failure.
    pub fn init(&self) -> AxResult {
        let mut refs = self.refs.lock();
        if *refs > 0 {
            *refs += 1;
            debug!("fbe api init: {} references", *refs);
            return Ok(());
        }

        let pool = Arc::new(PacketPool::from_config(&self.config)?);
        let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&pool), Arc::clone(&self.registry)));
        let engine = Arc::new(NotificationEngine::new(
            Arc::clone(&dispatcher),
            self.config.notifications.clone(),
        ));
        engine.init()?;

        let jobs = if self.config.job_notifications {
            let jobs = Arc::new(JobNotifications::new(Arc::clone(&engine)));
            if let Err(err) = jobs.init() {
                if let Err(destroy_err) = engine.destroy() {
                    warn!("notification engine cleanup failed: {destroy_err:?}");
                }
                return Err(err);
            }
            Some(jobs)
        } else {
            None
        };

        *self.components.write() = Some(Components {
            pool,
            dispatcher,
            engine,
            jobs,
        });
        *refs = 1;
        info!(
            "fbe api initialized: {} x {} packets",
            self.config.packet_chunks, self.config.packets_per_chunk
        );
        Ok(())
    }

    /// Drops a reference on the API, tearing it down on the last one.
    ///
    /// Teardown always completes; stragglers are reported, not waited for
    /// forever.
    ///
    /// # Errors
    ///
    /// Returns `BadState` if the API is not initialized.
    pub fn destroy(&self) -> AxResult {
        let mut refs = self.refs.lock();
        match *refs {
            0 => return ax_err!(BadState, "fbe api not initialized"),
            1 => {}
            _ => {
                *refs -= 1;
                debug!("fbe api destroy: {} references left", *refs);
                return Ok(());
            }
        }

        let components = self.components.write().take();
        if let Some(components) = components {
            if let Some(jobs) = &components.jobs {
                if let Err(err) = jobs.destroy() {
                    warn!("job notification teardown failed: {err:?}");
                }
            }
            if let Err(err) = components.engine.destroy() {
                warn!("notification engine teardown failed: {err:?}");
            }
            match components.pool.drain_and_destroy() {
                Ok(0) => {}
                Ok(leaked) => warn!("fbe api destroyed with {leaked} packets outstanding"),
                Err(err) => warn!("packet pool teardown failed: {err:?}"),
            }
        }

        *refs = 0;
        info!("fbe api destroyed");
        Ok(())
    }

    pub fn reference_count(&self) -> usize {
        *self.refs.lock()
    }

    pub fn is_initialized(&self) -> bool {
        self.components.read().is_some()
    }

    fn components(&self) -> AxResult<Components> {
        match self.components.read().as_ref() {
            Some(components) => Ok(components.clone()),
            None => ax_err!(BadState, "fbe api not initialized"),
        }
    }

    /// The package entry table. Usable whether or not the API is initialized.
    pub fn registry(&self) -> &Arc<EntryRegistry> {
        &self.registry
    }

    /// Installs the entry pair of a package.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for an out-of-range package id.
    pub fn set_entries(&self, package: u32, entries: LibEntries) -> AxResult {
        self.registry.set_entries(package, entries)
    }

    pub fn dispatcher(&self) -> AxResult<Arc<Dispatcher>> {
        Ok(self.components()?.dispatcher)
    }

    pub fn notification_engine(&self) -> AxResult<Arc<NotificationEngine>> {
        Ok(self.components()?.engine)
    }

    pub fn pool_stats(&self) -> AxResult<PoolStats> {
        Ok(self.components()?.pool.stats())
    }

    /// Checks a packet out of the pool.
    pub fn acquire_packet(&self) -> AxResult<Packet> {
        self.components()?.pool.acquire()
    }

    /// Returns a packet to the pool.
    pub fn release_packet(&self, packet: Packet) -> AxResult {
        self.components()?.pool.release(packet)
    }

    /// See [`Dispatcher::send_control_sync`].
    pub fn send_control_sync(&self, request: ControlRequest) -> AxResult<ControlReply> {
        self.components()?.dispatcher.send_control_sync(request)
    }

    /// See [`Dispatcher::send_control_async`]. When the API is not
    /// initialized the packet is completed with `GenericFailure`.
    pub fn send_control_async<F>(&self, mut packet: Packet, request: ControlRequest, completion: F) -> PacketStatus
    where
        F: FnOnce(Packet) + Send + 'static,
    {
        match self.components() {
            Ok(components) => components.dispatcher.send_control_async(packet, request, completion),
            Err(_) => {
                packet.set_completion(completion);
                packet.set_status(PacketStatus::GenericFailure, 0);
                packet.complete();
                PacketStatus::GenericFailure
            }
        }
    }

    /// See [`Dispatcher::send_io`]. When the API is not initialized the
    /// packet is completed with `GenericFailure`.
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
        match self.components() {
            Ok(components) => components
                .dispatcher
                .send_io(packet, object_id, package, completion, cancel),
            Err(_) => {
                packet.set_completion(completion);
                packet.set_status(PacketStatus::GenericFailure, 0);
                packet.complete();
                PacketStatus::GenericFailure
            }
        }
    }

    /// See [`NotificationEngine::register`].
    pub fn notification_register(
        &self,
        notification_type: NotificationType,
        packages: PackageMask,
        object_type: ObjectTypeMask,
        callback: NotificationCallback,
    ) -> AxResult<RegistrationId> {
        self.components()?
            .engine
            .register(notification_type, packages, object_type, callback)
    }

    /// See [`NotificationEngine::unregister`].
    pub fn notification_unregister(&self, callback: &NotificationCallback, id: RegistrationId) -> AxResult {
        self.components()?.engine.unregister(callback, id)
    }

    /// See [`JobNotifications::wait_for_job`].
    ///
    /// # Errors
    ///
    /// Returns `BadState` if the API is not initialized or job tracking is
    /// disabled.
    pub fn wait_for_job(&self, job_number: u64, timeout: Duration) -> AxResult<Option<JobActionInfo>> {
        match self.components()?.jobs {
            Some(jobs) => jobs.wait_for_job(job_number, timeout),
            None => ax_err!(BadState, "job notifications disabled"),
        }
    }
}

impl Default for FbeApi {
    fn default() -> Self {
        Self::new(FbeApiConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::thread;

    fn small_config() -> FbeApiConfig {
        FbeApiConfig::default()
            .with_pool(1, 4)
            .with_drain(2, Duration::from_millis(10))
    }

    #[test]
    fn test_init_destroy_counting() {
        let api = FbeApi::new(small_config());
        assert!(api.destroy().is_err());
        assert!(api.acquire_packet().is_err());

        api.init().unwrap();
        api.init().unwrap();
        assert_eq!(api.reference_count(), 2);

        api.destroy().unwrap();
        assert!(api.is_initialized());
        api.destroy().unwrap();
        assert!(!api.is_initialized());
        assert_eq!(api.reference_count(), 0);
        assert!(api.destroy().is_err());
    }

    #[test]
    fn test_bad_pool_config_leaves_api_down() {
        let api = FbeApi::new(FbeApiConfig::default().with_pool(0, 4));
        assert!(api.init().is_err());
        assert_eq!(api.reference_count(), 0);
        assert!(!api.is_initialized());
    }

    #[test]
    fn test_reinit_after_destroy_gets_fresh_pool() {
        let api = FbeApi::new(small_config());
        api.init().unwrap();
        let packet = api.acquire_packet().unwrap();
        api.release_packet(packet).unwrap();
        api.destroy().unwrap();

        api.init().unwrap();
        let stats = api.pool_stats().unwrap();
        assert_eq!(stats.free, 4);
        assert_eq!(stats.outstanding, 0);
        api.destroy().unwrap();
    }

    #[test]
    fn test_concurrent_init_destroy() {
        let api = Arc::new(FbeApi::new(small_config().with_job_notifications(false)));
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let api = Arc::clone(&api);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    api.init().unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(api.reference_count(), 8);

        let handles: Vec<_> = (0..7)
            .map(|_| {
                let api = Arc::clone(&api);
                thread::spawn(move || api.destroy().unwrap())
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(api.is_initialized());
        api.destroy().unwrap();
        assert!(!api.is_initialized());
    }

    #[test]
    fn test_sends_complete_when_not_initialized() {
        let api = FbeApi::new(small_config());
        let (tx, rx) = crossbeam::channel::bounded(1);
        let status = api.send_io(
            Packet::new(),
            ObjectId(1),
            PackageId::Physical,
            move |packet| tx.send(packet.status()).unwrap(),
            None,
        );
        assert_eq!(status, PacketStatus::GenericFailure);
        assert_eq!(rx.try_recv().unwrap(), PacketStatus::GenericFailure);
        assert!(api.wait_for_job(1, Duration::from_millis(1)).is_err());
    }
}
