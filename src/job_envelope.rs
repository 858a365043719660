use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type JobId = String;

/// Wire format of a job pushed onto a queue.
///
/// Field order is part of the contract: serde serializes fields in
/// declaration order, and delayed-job removal matches list entries by byte
/// equality of this JSON across processes. Delayed entries carry `queue` and
/// omit `id`, `prefix` and `queue_time`; promotion preserves the stored
/// envelope as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobEnvelope {
    /// Single-element sequence holding either a mapping of named arguments
    /// or null.
    pub args: Vec<serde_json::Value>,
    /// Opaque handler identifier resolved through the handler registry.
    pub class: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<JobId>,
    /// Key prefix for status updates, recorded at enqueue time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    /// Destination queue; present only on delayed entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue: Option<String>,
    /// Enqueue instant as float unix seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_time: Option<f64>,
}

impl JobEnvelope {
    /// Envelope for the primary queues, stamped with an id, the status-key
    /// prefix and the enqueue time.
    pub(crate) fn queued(
        class: impl Into<String>,
        args: Option<serde_json::Value>,
        id: JobId,
        prefix: String,
    ) -> Self {
        Self {
            args: vec![args.unwrap_or(serde_json::Value::Null)],
            class: class.into(),
            id: Some(id),
            prefix: Some(prefix),
            queue: None,
            queue_time: Some(now_secs_f64()),
        }
    }

    /// Envelope for the delayed lists: destination queue plus the canonical
    /// `(args, class, queue)` triple, nothing else.
    pub(crate) fn delayed(
        queue: impl Into<String>,
        class: impl Into<String>,
        args: Option<serde_json::Value>,
    ) -> Self {
        Self {
            args: vec![args.unwrap_or(serde_json::Value::Null)],
            class: class.into(),
            id: None,
            prefix: None,
            queue: Some(queue.into()),
            queue_time: None,
        }
    }

    pub(crate) fn generate_id() -> JobId {
        Uuid::new_v4().to_string()
    }

    /// The job's argument mapping, or JSON null when enqueued without args.
    pub fn args_value(&self) -> &serde_json::Value {
        self.args.first().unwrap_or(&serde_json::Value::Null)
    }

    /// Deterministic JSON used for byte-equality matching of delayed
    /// entries.
    pub fn canonical_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

fn now_secs_f64() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}
