use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::job_envelope::{JobEnvelope, JobId};

/// Error type surfaced by user job handlers.
pub type JobError = Box<dyn std::error::Error + Send + Sync>;

pub type BoxedHandler = Box<dyn JobHandler>;

/// A job reserved from a queue: the envelope plus the queue it came from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub queue: String,
    pub envelope: JobEnvelope,
}

impl Job {
    pub fn new(queue: impl Into<String>, envelope: JobEnvelope) -> Self {
        Self {
            queue: queue.into(),
            envelope,
        }
    }

    pub fn id(&self) -> Option<&str> {
        self.envelope.id.as_deref()
    }

    pub fn class(&self) -> &str {
        &self.envelope.class
    }

    pub fn args(&self) -> &serde_json::Value {
        self.envelope.args_value()
    }

    pub(crate) fn context(&self) -> JobContext {
        JobContext {
            queue: self.queue.clone(),
            job_id: self.envelope.id.clone(),
            args: self.args().clone(),
        }
    }
}

/// Execution-time context handed to a handler's `perform`.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub queue: String,
    pub job_id: Option<JobId>,
    pub args: serde_json::Value,
}

/// Capability implemented by user job payload types.
///
/// Handlers are built from the envelope's args by a factory registered under
/// the envelope's `class` identifier. `set_up` and `tear_down` bracket
/// `perform`; an error from any of the three is recorded as a job failure.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn set_up(&mut self) -> Result<(), JobError> {
        Ok(())
    }

    async fn perform(&mut self, ctx: &JobContext) -> Result<(), JobError>;

    async fn tear_down(&mut self) -> Result<(), JobError> {
        Ok(())
    }
}

/// Record of the job a worker is currently busy with, stored under
/// `worker:<id>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkingOn {
    pub queue: String,
    /// RFC 3339 instant at which the worker picked the job up.
    pub run_at: String,
    pub payload: JobEnvelope,
}
