use core::time::Duration;

/// Settings of the notification engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationConfig {
    /// How long `destroy` waits for the worker thread to report that it exited.
    pub worker_exit_timeout: Duration,
    /// Fallback re-check interval while `unregister` waits for in-flight callbacks.
    pub unregister_poll_interval: Duration,
    /// Bound on package register/unregister requests. `None` waits forever.
    pub control_timeout: Option<Duration>,
    /// Re-send the register request when a new registration widens a
    /// package's aggregate masks.
    pub resend_widened_registration: bool,
}

impl NotificationConfig {
    /// The default notification settings.
    pub const fn new() -> Self {
        Self {
            worker_exit_timeout: Duration::from_secs(20),
            unregister_poll_interval: Duration::from_millis(200),
            control_timeout: Some(Duration::from_millis(300_000)),
            resend_widened_registration: true,
        }
    }

    pub fn with_worker_exit_timeout(mut self, timeout: Duration) -> Self {
        self.worker_exit_timeout = timeout;
        self
    }

    pub fn with_unregister_poll_interval(mut self, interval: Duration) -> Self {
        self.unregister_poll_interval = interval;
        self
    }

    pub fn with_control_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.control_timeout = timeout;
        self
    }

    pub fn with_resend_widened_registration(mut self, resend: bool) -> Self {
        self.resend_widened_registration = resend;
        self
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration of an [`FbeApi`](crate::FbeApi) context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FbeApiConfig {
    /// Number of pre-allocated packet chunks.
    pub packet_chunks: usize,
    /// Packets per chunk. Must fit in [`CHUNK_BYTES`](crate::pool::CHUNK_BYTES).
    pub packets_per_chunk: usize,
    /// Cap on overflow packets outstanding at once. `None` is unbounded.
    pub max_overflow_packets: Option<usize>,
    /// How many times `drain_and_destroy` re-checks the outstanding set.
    pub drain_attempts: u32,
    /// Wait between two drain checks.
    pub drain_interval: Duration,
    /// Notification engine settings.
    pub notifications: NotificationConfig,
    /// Start job-completion tracking on init.
    pub job_notifications: bool,
}

impl FbeApiConfig {
    /// The default configuration.
    pub const fn new() -> Self {
        Self {
            packet_chunks: 4,
            packets_per_chunk: 100,
            max_overflow_packets: None,
            drain_attempts: 10,
            drain_interval: Duration::from_millis(500),
            notifications: NotificationConfig::new(),
            job_notifications: true,
        }
    }

    /// Sets the pool geometry.
    pub fn with_pool(mut self, packet_chunks: usize, packets_per_chunk: usize) -> Self {
        self.packet_chunks = packet_chunks;
        self.packets_per_chunk = packets_per_chunk;
        self
    }

    pub fn with_max_overflow_packets(mut self, max: Option<usize>) -> Self {
        self.max_overflow_packets = max;
        self
    }

    /// Sets the bounded wait of pool draining.
    pub fn with_drain(mut self, attempts: u32, interval: Duration) -> Self {
        self.drain_attempts = attempts;
        self.drain_interval = interval;
        self
    }

    pub fn with_notifications(mut self, notifications: NotificationConfig) -> Self {
        self.notifications = notifications;
        self
    }

    pub fn with_job_notifications(mut self, enabled: bool) -> Self {
        self.job_notifications = enabled;
        self
    }
}

impl Default for FbeApiConfig {
    fn default() -> Self {
        Self::new()
    }
}
