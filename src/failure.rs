use async_trait::async_trait;
use serde::Serialize;

use crate::error::SwitchyardError;
use crate::job::JobError;
use crate::job_envelope::JobEnvelope;
use crate::storage::Storage;

/// Classification of a job failure as routed to the failure sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    /// `set_up`/`perform`/`tear_down` returned an error.
    Handler,
    /// The handler panicked.
    Panic,
    /// The envelope's class is missing from the handler registry.
    Resolution,
    /// The job process exited without completing the protocol; carries the
    /// exit code, or -1 when no code is known (orphaned work).
    DirtyExit(i32),
}

impl FailureKind {
    pub fn exception(&self) -> &'static str {
        match self {
            FailureKind::Handler => "HandlerError",
            FailureKind::Panic => "Panic",
            FailureKind::Resolution => "JobResolutionError",
            FailureKind::DirtyExit(_) => "DirtyExit",
        }
    }
}

/// A failed-job description handed to the failure sink. Language-level
/// errors (panics) and recoverable handler errors are distinguished by
/// [`FailureKind`] but treated the same at the sink interface.
#[derive(Debug, Clone)]
pub struct JobFailure {
    pub kind: FailureKind,
    pub error: String,
    pub backtrace: Vec<String>,
}

impl JobFailure {
    pub fn handler(error: &JobError) -> Self {
        let mut backtrace = Vec::new();
        let mut source = error.source();
        while let Some(cause) = source {
            backtrace.push(cause.to_string());
            source = cause.source();
        }
        Self {
            kind: FailureKind::Handler,
            error: error.to_string(),
            backtrace,
        }
    }

    pub fn handler_message(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Handler,
            error: message.into(),
            backtrace: Vec::new(),
        }
    }

    pub fn panic(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Panic,
            error: message.into(),
            backtrace: Vec::new(),
        }
    }

    pub fn resolution(class: &str) -> Self {
        Self {
            kind: FailureKind::Resolution,
            error: format!("job class not registered: {class}"),
            backtrace: Vec::new(),
        }
    }

    pub fn dirty_exit(code: i32) -> Self {
        Self {
            kind: FailureKind::DirtyExit(code),
            error: format!("job process exited dirty (code {code})"),
            backtrace: Vec::new(),
        }
    }

    /// Failure recorded for a job owned by a worker whose process died.
    pub fn orphaned(worker: &str) -> Self {
        Self {
            kind: FailureKind::DirtyExit(-1),
            error: format!("worker {worker} died without completing the job"),
            backtrace: Vec::new(),
        }
    }
}

/// Pluggable writer for failed-job records; one `record` call per failure.
#[async_trait]
pub trait FailureBackend: Send + Sync {
    async fn record(
        &self,
        payload: &JobEnvelope,
        queue: &str,
        worker: &str,
        failure: &JobFailure,
    ) -> Result<(), SwitchyardError>;

    async fn count(&self) -> Result<usize, SwitchyardError>;

    async fn clear(&self) -> Result<(), SwitchyardError>;
}

#[derive(Serialize)]
struct FailureRecord<'a> {
    failed_at: String,
    payload: &'a JobEnvelope,
    exception: &'static str,
    error: &'a str,
    backtrace: &'a [String],
    worker: &'a str,
    queue: &'a str,
}

/// Default backend: one JSON record per failure appended to the `failed`
/// list.
pub struct RedisFailureBackend {
    storage: Storage,
}

impl RedisFailureBackend {
    pub fn new(storage: &Storage) -> Self {
        Self {
            storage: storage.clone(),
        }
    }

    /// Raw failure records, newest last.
    pub async fn all(
        &self,
        offset: usize,
        count: usize,
    ) -> Result<Vec<serde_json::Value>, SwitchyardError> {
        let start = offset as isize;
        let stop = (offset + count).saturating_sub(1) as isize;
        let raw = self
            .storage
            .internal
            .lrange(&self.storage.internal.keys.failed, start, stop)
            .await?;
        let mut records = Vec::with_capacity(raw.len());
        for record in raw {
            records.push(serde_json::from_str(&record)?);
        }
        Ok(records)
    }
}

#[async_trait]
impl FailureBackend for RedisFailureBackend {
    async fn record(
        &self,
        payload: &JobEnvelope,
        queue: &str,
        worker: &str,
        failure: &JobFailure,
    ) -> Result<(), SwitchyardError> {
        let record = FailureRecord {
            failed_at: chrono::Utc::now().to_rfc3339(),
            payload,
            exception: failure.kind.exception(),
            error: &failure.error,
            backtrace: &failure.backtrace,
            worker,
            queue,
        };
        self.storage
            .internal
            .rpush(
                &self.storage.internal.keys.failed,
                &serde_json::to_string(&record)?,
            )
            .await
    }

    async fn count(&self) -> Result<usize, SwitchyardError> {
        self.storage
            .internal
            .llen(&self.storage.internal.keys.failed)
            .await
    }

    async fn clear(&self) -> Result<(), SwitchyardError> {
        self.storage
            .internal
            .del(&self.storage.internal.keys.failed)
            .await
    }
}
