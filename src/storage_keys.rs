/// Centralizes the Redis key naming scheme used by `KeyStore`.
#[derive(Clone)]
pub(crate) struct StorageKeys {
    /// Normalized namespace prefix applied to every Redis key
    /// (e.g. `switchyard` or `switchyard:<custom>`).
    pub(crate) namespace: String,
    /// Redis set holding the names of every known queue.
    pub(crate) queues: String,
    /// Prefix for the per-queue Redis lists of JSON job envelopes
    /// (actual keys look like `{queue_prefix}:<queue>`).
    pub(crate) queue_prefix: String,
    /// Redis sorted set (ZSET) of delayed-job timestamps; each unix-second
    /// timestamp is stored as both member and score.
    pub(crate) delayed_schedule: String,
    /// Prefix for the per-timestamp Redis lists of delayed envelopes
    /// (keys look like `{delayed_prefix}:<ts>`).
    pub(crate) delayed_prefix: String,
    /// Redis set of registered worker identifiers.
    pub(crate) workers: String,
    /// Prefix for per-worker records: `{worker_prefix}:<id>` is the
    /// working-on record, with `:started` and `:heartbeat` companions.
    pub(crate) worker_prefix: String,
    /// Prefix for the monotone counters (`{stat_prefix}:<name>`).
    pub(crate) stat_prefix: String,
    /// Redis list acting as the default failure sink, one JSON record per
    /// failed job.
    pub(crate) failed: String,
}

impl StorageKeys {
    /// Builds a namespaced collection of Redis keys, defaulting to the
    /// `switchyard` namespace when none is provided.
    pub(crate) fn new(namespace: impl Into<String>) -> Self {
        let namespace = namespace.into();
        let namespace = if namespace.is_empty() {
            "switchyard".to_string()
        } else {
            format!("switchyard:{namespace}")
        };

        Self {
            queues: format!("{namespace}:queues"),
            queue_prefix: format!("{namespace}:queue"),
            delayed_schedule: format!("{namespace}:delayed_queue_schedule"),
            delayed_prefix: format!("{namespace}:delayed"),
            workers: format!("{namespace}:workers"),
            worker_prefix: format!("{namespace}:worker"),
            stat_prefix: format!("{namespace}:stat"),
            failed: format!("{namespace}:failed"),
            namespace,
        }
    }

    pub(crate) fn queue(&self, name: &str) -> String {
        format!("{}:{}", self.queue_prefix, name)
    }

    pub(crate) fn delayed(&self, timestamp: i64) -> String {
        format!("{}:{}", self.delayed_prefix, timestamp)
    }

    pub(crate) fn worker(&self, id: &str) -> String {
        format!("{}:{}", self.worker_prefix, id)
    }

    pub(crate) fn worker_started(&self, id: &str) -> String {
        format!("{}:{}:started", self.worker_prefix, id)
    }

    pub(crate) fn worker_heartbeat(&self, id: &str) -> String {
        format!("{}:{}:heartbeat", self.worker_prefix, id)
    }

    pub(crate) fn stat(&self, name: &str) -> String {
        format!("{}:{}", self.stat_prefix, name)
    }

    /// Status records honor the prefix recorded in the envelope at enqueue
    /// time, so a worker running under a different namespace still updates
    /// the producer's record.
    pub(crate) fn job_status(&self, prefix: Option<&str>, id: &str) -> String {
        format!("{}:job:{}:status", prefix.unwrap_or(&self.namespace), id)
    }

    pub(crate) fn job_pid(&self, id: &str) -> String {
        format!("{}:job:{}:pid", self.namespace, id)
    }
}
