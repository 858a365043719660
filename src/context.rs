use std::sync::Arc;

use crate::error::SwitchyardError;
use crate::events::{Event, EventData, Events};
use crate::failure::{FailureBackend, RedisFailureBackend};
use crate::job_envelope::{JobEnvelope, JobId};
use crate::registry::HandlerRegistry;
use crate::storage::Storage;

/// The service handle threaded into every API entry point: storage, the
/// event bus, the failure sink and the handler registry.
///
/// Workers and the scheduler take a `Context` at construction; producers use
/// it directly to enqueue. Cloning is cheap; all services are shared.
#[derive(Clone)]
pub struct Context {
    pub storage: Storage,
    pub events: Arc<Events>,
    pub failure: Arc<dyn FailureBackend>,
    pub registry: Arc<HandlerRegistry>,
}

impl Context {
    /// Builds a context with the default Redis-list failure backend.
    pub fn new(storage: Storage, registry: HandlerRegistry) -> Self {
        let failure = Arc::new(RedisFailureBackend::new(&storage));
        Self {
            storage,
            events: Arc::new(Events::new()),
            failure,
            registry: Arc::new(registry),
        }
    }

    /// Swaps in a custom failure backend.
    pub fn with_failure_backend(mut self, backend: Arc<dyn FailureBackend>) -> Self {
        self.failure = backend;
        self
    }

    /// Enqueues a job for immediate processing.
    ///
    /// Returns the assigned job id, or `None` when a `BeforeEnqueue`
    /// listener vetoed the operation, in which case nothing was written.
    /// With `track`, a status record is created alongside the envelope.
    pub async fn enqueue(
        &self,
        queue: &str,
        class: &str,
        args: Option<serde_json::Value>,
        track: bool,
    ) -> Result<Option<JobId>, SwitchyardError> {
        ensure_destination(queue, class)?;

        let id = JobEnvelope::generate_id();
        let args_value = args.clone().unwrap_or(serde_json::Value::Null);
        let data = EventData::Enqueue {
            queue,
            class,
            args: &args_value,
            id: &id,
        };
        if self.events.emit(Event::BeforeEnqueue, &data).vetoed() {
            tracing::debug!(queue, class, "Enqueue vetoed by listener");
            return Ok(None);
        }

        let envelope =
            JobEnvelope::queued(class, args, id.clone(), self.storage.namespace().to_string());
        tracing::trace!(queue, class, job_id = id, "Enqueuing job");

        if track {
            self.storage.create_status(&id).await?;
        }
        self.storage.push(queue, &envelope).await?;
        self.events.emit(Event::AfterEnqueue, &data);

        Ok(Some(id))
    }

    /// Schedules a job to become available at `timestamp` (unix seconds).
    ///
    /// Returns `false` when a `BeforeSchedule` listener vetoed the
    /// operation.
    pub async fn enqueue_at(
        &self,
        timestamp: i64,
        queue: &str,
        class: &str,
        args: Option<serde_json::Value>,
    ) -> Result<bool, SwitchyardError> {
        ensure_destination(queue, class)?;

        let args_value = args.clone().unwrap_or(serde_json::Value::Null);
        let data = EventData::Schedule {
            timestamp,
            queue,
            class,
            args: &args_value,
        };
        if self.events.emit(Event::BeforeSchedule, &data).vetoed() {
            tracing::debug!(queue, class, timestamp, "Schedule vetoed by listener");
            return Ok(false);
        }

        tracing::trace!(queue, class, timestamp, "Scheduling delayed job");
        self.storage
            .delay(timestamp, &JobEnvelope::delayed(queue, class, args))
            .await?;
        self.events.emit(Event::AfterSchedule, &data);

        Ok(true)
    }

    /// Schedules a job to become available `seconds` from now.
    pub async fn enqueue_in(
        &self,
        seconds: i64,
        queue: &str,
        class: &str,
        args: Option<serde_json::Value>,
    ) -> Result<bool, SwitchyardError> {
        self.enqueue_at(chrono::Utc::now().timestamp() + seconds, queue, class, args)
            .await
    }

    /// Removes every delayed entry matching `(queue, class, args)`; returns
    /// the number removed.
    pub async fn remove_delayed(
        &self,
        queue: &str,
        class: &str,
        args: Option<serde_json::Value>,
    ) -> Result<usize, SwitchyardError> {
        self.storage.remove_delayed(queue, class, args).await
    }

    /// Removes matching entries due at exactly `timestamp`.
    pub async fn remove_delayed_from_timestamp(
        &self,
        timestamp: i64,
        queue: &str,
        class: &str,
        args: Option<serde_json::Value>,
    ) -> Result<usize, SwitchyardError> {
        self.storage
            .remove_delayed_from_timestamp(timestamp, queue, class, args)
            .await
    }
}

fn ensure_destination(queue: &str, class: &str) -> Result<(), SwitchyardError> {
    if queue.is_empty() {
        return Err(SwitchyardError::config("queue name must not be empty"));
    }
    if class.is_empty() {
        return Err(SwitchyardError::config("job class must not be empty"));
    }
    Ok(())
}
