use crate::error::SwitchyardError;
use crate::job::{Job, WorkingOn};
use crate::job_envelope::JobEnvelope;
use crate::status::{JobStatus, STATUS_EXPIRE_SECS, StatusState};
use crate::storage_builder::StorageBuilder;
use crate::storage_internal::KeyStore;

/// Storage is the Redis-backed engine behind every switchyard component:
/// the FIFO queues, the delayed schedule, status records, worker registry
/// records and the monotone stat counters.
///
/// Instances are created with [`Storage::builder()`]:
///
/// ```rust,no_run
/// # fn example() -> Result<(), switchyard::SwitchyardError> {
/// let storage = switchyard::Storage::builder().from_env()?.build()?;
/// # Ok(())
/// # }
/// ```
///
/// Transport failures surface unchanged as
/// [`SwitchyardError::Transport`]/[`SwitchyardError::Pool`]; nothing at this
/// layer retries.
#[derive(Clone)]
pub struct Storage {
    pub(crate) internal: KeyStore,
}

impl Storage {
    /// Creates a new [`StorageBuilder`] for configuring and building a
    /// Storage instance.
    pub fn builder() -> StorageBuilder {
        StorageBuilder::new()
    }

    /// Returns the key namespace this storage instance is using.
    pub fn namespace(&self) -> &str {
        &self.internal.keys.namespace
    }

    // Queue engine

    /// Registers `queue` and appends the envelope at the tail of its list.
    pub async fn push(&self, queue: &str, envelope: &JobEnvelope) -> Result<(), SwitchyardError> {
        let payload = serde_json::to_string(envelope)?;
        self.internal.sadd(&self.internal.keys.queues, queue).await?;
        self.internal
            .rpush(&self.internal.keys.queue(queue), &payload)
            .await?;
        Ok(())
    }

    /// Removes and returns the head envelope of `queue`; non-blocking.
    pub async fn pop(&self, queue: &str) -> Result<Option<JobEnvelope>, SwitchyardError> {
        let payload = self.internal.lpop(&self.internal.keys.queue(queue)).await?;
        match payload {
            Some(payload) => Ok(Some(serde_json::from_str(&payload)?)),
            None => Ok(None),
        }
    }

    /// Blocks up to `timeout` seconds across the supplied queues and returns
    /// the first available envelope together with the queue it came from.
    /// With zero queues it returns `None` immediately.
    pub async fn blocking_pop(
        &self,
        queues: &[String],
        timeout: f64,
    ) -> Result<Option<(String, JobEnvelope)>, SwitchyardError> {
        if queues.is_empty() {
            return Ok(None);
        }
        let keys: Vec<String> = queues
            .iter()
            .map(|queue| self.internal.keys.queue(queue))
            .collect();
        match self.internal.blpop(&keys, timeout).await? {
            Some((key, payload)) => {
                let prefix = format!("{}:", self.internal.keys.queue_prefix);
                let queue = key.strip_prefix(&prefix).unwrap_or(&key).to_string();
                Ok(Some((queue, serde_json::from_str(&payload)?)))
            }
            None => Ok(None),
        }
    }

    pub async fn size(&self, queue: &str) -> Result<usize, SwitchyardError> {
        self.internal.llen(&self.internal.keys.queue(queue)).await
    }

    /// All known queue names, sorted for deterministic iteration.
    pub async fn queues(&self) -> Result<Vec<String>, SwitchyardError> {
        let mut queues = self.internal.smembers(&self.internal.keys.queues).await?;
        queues.sort();
        Ok(queues)
    }

    /// Drops the queue list and unregisters the name; returns the number of
    /// jobs discarded with it.
    pub async fn remove_queue(&self, queue: &str) -> Result<usize, SwitchyardError> {
        let key = self.internal.keys.queue(queue);
        let dropped = self.internal.llen(&key).await?;
        self.internal.del(&key).await?;
        self.internal.srem(&self.internal.keys.queues, queue).await?;
        Ok(dropped)
    }

    // Delayed schedule

    /// Appends the envelope to `delayed:<ts>` and makes `ts` a member of the
    /// schedule with itself as score.
    pub async fn delay(
        &self,
        timestamp: i64,
        envelope: &JobEnvelope,
    ) -> Result<(), SwitchyardError> {
        let payload = serde_json::to_string(envelope)?;
        self.internal
            .rpush(&self.internal.keys.delayed(timestamp), &payload)
            .await?;
        self.internal
            .zadd(
                &self.internal.keys.delayed_schedule,
                &timestamp.to_string(),
                timestamp,
            )
            .await?;
        Ok(())
    }

    /// Re-inserts an envelope at the head of its timestamp list. Used when a
    /// promotion push fails after the pop succeeded, keeping delivery
    /// at-least-once.
    pub(crate) async fn requeue_delayed(
        &self,
        timestamp: i64,
        envelope: &JobEnvelope,
    ) -> Result<(), SwitchyardError> {
        let payload = serde_json::to_string(envelope)?;
        self.internal
            .lpush(&self.internal.keys.delayed(timestamp), &payload)
            .await?;
        self.internal
            .zadd(
                &self.internal.keys.delayed_schedule,
                &timestamp.to_string(),
                timestamp,
            )
            .await?;
        Ok(())
    }

    /// Smallest scheduled timestamp at or before `at` (default: now). Any
    /// past-due timestamp is eventually observed, regardless of when the
    /// scheduler last ran.
    pub async fn next_delayed_timestamp(
        &self,
        at: Option<i64>,
    ) -> Result<Option<i64>, SwitchyardError> {
        let cutoff = at.unwrap_or_else(|| chrono::Utc::now().timestamp());
        let member = self
            .internal
            .zfirst_at_most(&self.internal.keys.delayed_schedule, cutoff)
            .await?;
        match member {
            Some(member) => {
                let timestamp = member.parse().map_err(|_| {
                    SwitchyardError::Generic(format!(
                        "malformed delayed schedule member `{member}`"
                    ))
                })?;
                Ok(Some(timestamp))
            }
            None => Ok(None),
        }
    }

    /// Head-pops the list for `timestamp`, pruning the schedule entry once
    /// the list is emptied.
    pub async fn next_item_for_timestamp(
        &self,
        timestamp: i64,
    ) -> Result<Option<JobEnvelope>, SwitchyardError> {
        let payload = self
            .internal
            .lpop(&self.internal.keys.delayed(timestamp))
            .await?;
        self.cleanup_timestamp(timestamp).await?;
        match payload {
            Some(payload) => Ok(Some(serde_json::from_str(&payload)?)),
            None => Ok(None),
        }
    }

    /// Restores the schedule invariant: `timestamp` stays in the sorted set
    /// iff its list is non-empty.
    pub async fn cleanup_timestamp(&self, timestamp: i64) -> Result<(), SwitchyardError> {
        let key = self.internal.keys.delayed(timestamp);
        if self.internal.llen(&key).await? == 0 {
            self.internal.del(&key).await?;
            self.internal
                .zrem(&self.internal.keys.delayed_schedule, &timestamp.to_string())
                .await?;
        }
        Ok(())
    }

    /// Removes every delayed entry byte-equal to the canonical envelope for
    /// `(queue, class, args)` across all timestamp lists. Empty lists are
    /// pruned from the schedule by a later pop or cleanup, not here.
    pub async fn remove_delayed(
        &self,
        queue: &str,
        class: &str,
        args: Option<serde_json::Value>,
    ) -> Result<usize, SwitchyardError> {
        let needle = JobEnvelope::delayed(queue, class, args).canonical_json()?;
        let pattern = format!("{}:*", self.internal.keys.delayed_prefix);
        let mut removed = 0;
        for key in self.internal.matching_keys(&pattern).await? {
            removed += self.internal.lrem(&key, &needle).await?;
        }
        Ok(removed)
    }

    /// Removes matching entries from `delayed:<ts>` only, then prunes the
    /// timestamp if its list is now empty.
    pub async fn remove_delayed_from_timestamp(
        &self,
        timestamp: i64,
        queue: &str,
        class: &str,
        args: Option<serde_json::Value>,
    ) -> Result<usize, SwitchyardError> {
        let needle = JobEnvelope::delayed(queue, class, args).canonical_json()?;
        let removed = self
            .internal
            .lrem(&self.internal.keys.delayed(timestamp), &needle)
            .await?;
        self.cleanup_timestamp(timestamp).await?;
        Ok(removed)
    }

    /// Number of distinct timestamps currently scheduled.
    pub async fn delayed_queue_size(&self) -> Result<usize, SwitchyardError> {
        self.internal
            .zcard(&self.internal.keys.delayed_schedule)
            .await
    }

    pub async fn size_at_timestamp(&self, timestamp: i64) -> Result<usize, SwitchyardError> {
        self.internal
            .llen(&self.internal.keys.delayed(timestamp))
            .await
    }

    // Status tracker

    /// Initializes the status record for `id` to WAITING.
    pub async fn create_status(&self, id: &str) -> Result<(), SwitchyardError> {
        let record = serde_json::to_string(&JobStatus::waiting())?;
        self.internal
            .set(&self.internal.keys.job_status(None, id), &record)
            .await
    }

    /// Applies a state transition, ignoring late writers that would move the
    /// record backwards. Returns whether the record was written; untracked
    /// jobs return `false`.
    pub async fn update_status(
        &self,
        id: &str,
        prefix: Option<&str>,
        state: StatusState,
        result: Option<serde_json::Value>,
    ) -> Result<bool, SwitchyardError> {
        let key = self.internal.keys.job_status(prefix, id);
        let Some(raw) = self.internal.get(&key).await? else {
            return Ok(false);
        };
        let current: JobStatus = serde_json::from_str(&raw)?;
        if !current.status.allows(state) {
            tracing::debug!(
                job_id = id,
                from = ?current.status,
                to = ?state,
                "Ignoring out-of-order status update"
            );
            return Ok(false);
        }
        let record = serde_json::to_string(&current.advanced(state, result))?;
        if state.is_terminal() {
            self.internal.set_ex(&key, &record, STATUS_EXPIRE_SECS).await?;
        } else {
            self.internal.set(&key, &record).await?;
        }
        Ok(true)
    }

    pub async fn job_status(&self, id: &str) -> Result<Option<JobStatus>, SwitchyardError> {
        let raw = self
            .internal
            .get(&self.internal.keys.job_status(None, id))
            .await?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub async fn is_tracking(&self, id: &str) -> Result<bool, SwitchyardError> {
        self.internal
            .exists(&self.internal.keys.job_status(None, id))
            .await
    }

    // Stat counters

    pub async fn incr_stat(&self, name: &str, by: u64) -> Result<u64, SwitchyardError> {
        self.internal.incr_by(&self.internal.keys.stat(name), by).await
    }

    pub async fn stat(&self, name: &str) -> Result<u64, SwitchyardError> {
        let raw = self.internal.get(&self.internal.keys.stat(name)).await?;
        Ok(raw.and_then(|raw| raw.parse().ok()).unwrap_or(0))
    }

    pub async fn clear_stat(&self, name: &str) -> Result<(), SwitchyardError> {
        self.internal.del(&self.internal.keys.stat(name)).await
    }

    // Worker registry

    pub async fn register_worker(&self, id: &str) -> Result<(), SwitchyardError> {
        self.internal.sadd(&self.internal.keys.workers, id).await?;
        self.internal
            .set(
                &self.internal.keys.worker_started(id),
                &chrono::Utc::now().timestamp().to_string(),
            )
            .await
    }

    /// Removes the worker and every record it owns, including its stat
    /// counters.
    pub async fn unregister_worker(&self, id: &str) -> Result<(), SwitchyardError> {
        self.internal.srem(&self.internal.keys.workers, id).await?;
        let keys = vec![
            self.internal.keys.worker(id),
            self.internal.keys.worker_started(id),
            self.internal.keys.worker_heartbeat(id),
            self.internal.keys.stat(&format!("processed:{id}")),
            self.internal.keys.stat(&format!("failed:{id}")),
        ];
        self.internal.del_many(&keys).await
    }

    pub async fn workers(&self) -> Result<Vec<String>, SwitchyardError> {
        self.internal.smembers(&self.internal.keys.workers).await
    }

    pub async fn worker_started(&self, id: &str) -> Result<Option<i64>, SwitchyardError> {
        let raw = self.internal.get(&self.internal.keys.worker_started(id)).await?;
        Ok(raw.and_then(|raw| raw.parse().ok()))
    }

    pub async fn set_working_on(&self, id: &str, job: &Job) -> Result<(), SwitchyardError> {
        let record = WorkingOn {
            queue: job.queue.clone(),
            run_at: chrono::Utc::now().to_rfc3339(),
            payload: job.envelope.clone(),
        };
        self.internal
            .set(&self.internal.keys.worker(id), &serde_json::to_string(&record)?)
            .await
    }

    pub async fn working_on(&self, id: &str) -> Result<Option<WorkingOn>, SwitchyardError> {
        let raw = self.internal.get(&self.internal.keys.worker(id)).await?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub async fn clear_working_on(&self, id: &str) -> Result<(), SwitchyardError> {
        self.internal.del(&self.internal.keys.worker(id)).await
    }

    pub async fn heartbeat(&self, id: &str) -> Result<(), SwitchyardError> {
        self.internal
            .set(
                &self.internal.keys.worker_heartbeat(id),
                &chrono::Utc::now().timestamp().to_string(),
            )
            .await
    }

    // PID records

    pub async fn set_job_pid(&self, id: &str, pid: u32) -> Result<(), SwitchyardError> {
        self.internal
            .set(&self.internal.keys.job_pid(id), &pid.to_string())
            .await
    }

    pub async fn job_pid(&self, id: &str) -> Result<Option<u32>, SwitchyardError> {
        let raw = self.internal.get(&self.internal.keys.job_pid(id)).await?;
        Ok(raw.and_then(|raw| raw.parse().ok()))
    }

    pub async fn clear_job_pid(&self, id: &str) -> Result<(), SwitchyardError> {
        self.internal.del(&self.internal.keys.job_pid(id)).await
    }
}
