//! Tracking of finished jobs reported through `JOB_ACTION_STATE_CHANGED`.

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use core::time::Duration;
use std::time::Instant;

use axerrno::{ax_err, AxResult};
use parking_lot::{Condvar, Mutex as WaitMutex};
use spin::Mutex;

use crate::package::PackageMask;

use super::manager::NotificationEngine;
use super::queue::{JobActionInfo, NotificationEvent, NotificationType, ObjectTypeMask};
use super::routing::{NotificationCallback, RegistrationId};

/// Finished jobs kept for waiters by default.
pub const DEFAULT_FINISHED_JOB_CAPACITY: usize = 1024;

struct FinishedJobs {
    jobs: WaitMutex<BTreeMap<u64, JobActionInfo>>,
    arrived: Condvar,
    capacity: usize,
}

impl FinishedJobs {
    fn new(capacity: usize) -> Self {
        Self {
            jobs: WaitMutex::new(BTreeMap::new()),
            arrived: Condvar::new(),
            capacity: capacity.max(1),
        }
    }

    /// Records a result, evicting the lowest-numbered jobs beyond capacity.
    fn record(&self, job: JobActionInfo) {
        trace!("job {} finished with status {}", job.job_number, job.status);
        let mut jobs = self.jobs.lock();
        jobs.insert(job.job_number, job);
        while jobs.len() > self.capacity {
            if let Some((evicted, _)) = jobs.pop_first() {
                debug!("dropping unclaimed result of job {evicted}");
            }
        }
        drop(jobs);
        self.arrived.notify_all();
    }
}

/// Records job completions so callers can wait for a specific job.
pub struct JobNotifications {
    engine: Arc<NotificationEngine>,
    finished: Arc<FinishedJobs>,
    registration: Mutex<Option<(NotificationCallback, RegistrationId)>>,
}

impl JobNotifications {
    pub fn new(engine: Arc<NotificationEngine>) -> Self {
        Self::with_capacity(engine, DEFAULT_FINISHED_JOB_CAPACITY)
    }

    /// Keeps at most `capacity` unclaimed results; older job numbers go first.
    pub fn with_capacity(engine: Arc<NotificationEngine>, capacity: usize) -> Self {
        Self {
            engine,
            finished: Arc::new(FinishedJobs::new(capacity)),
            registration: Mutex::new(None),
        }
    }

    /// Starts listening for job events from SEP. No-op if already listening.
    ///
    /// # Errors
    ///
    /// Fails if the notification engine is not initialized.
    pub fn init(&self) -> AxResult {
        let mut registration = self.registration.lock();
        if registration.is_some() {
            return Ok(());
        }

        let finished = Arc::clone(&self.finished);
        let callback: NotificationCallback = Arc::new(move |event: &NotificationEvent| {
            match event.info.job {
                Some(job) => finished.record(job),
                None => debug!("job notification for object {:#x} without job info", event.object_id.0),
            }
        });
        let id = self.engine.register(
            NotificationType::JOB_ACTION_STATE_CHANGED,
            PackageMask::SEP,
            ObjectTypeMask::ALL,
            Arc::clone(&callback),
        )?;
        *registration = Some((callback, id));
        debug!("job notifications initialized");
        Ok(())
    }

    /// Stops listening and forgets every recorded job.
    ///
    /// # Errors
    ///
    /// Returns `BadState` if not listening.
    pub fn destroy(&self) -> AxResult {
        let Some((callback, id)) = self.registration.lock().take() else {
            return ax_err!(BadState, "job notifications not initialized");
        };
        if let Err(err) = self.engine.unregister(&callback, id) {
            warn!("failed to unregister job notifications: {err:?}");
        }
        self.finished.jobs.lock().clear();
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.registration.lock().is_some()
    }

    /// Waits up to `timeout` for `job_number` to finish and takes its result.
    ///
    /// Returns `Ok(None)` if the job did not finish in time.
    ///
    /// # Errors
    ///
    /// Returns `BadState` if not listening.
    pub fn wait_for_job(&self, job_number: u64, timeout: Duration) -> AxResult<Option<JobActionInfo>> {
        if !self.is_initialized() {
            return ax_err!(BadState, "job notifications not initialized");
        }

        let deadline = Instant::now() + timeout;
        let mut jobs = self.finished.jobs.lock();
        loop {
            if let Some(job) = jobs.remove(&job_number) {
                return Ok(Some(job));
            }
            if self.finished.arrived.wait_until(&mut jobs, deadline).timed_out() {
                return Ok(jobs.remove(&job_number));
            }
        }
    }
}
