use serde::{Deserialize, Serialize};

/// TTL applied to a status record once it reaches a terminal state.
pub const STATUS_EXPIRE_SECS: u64 = 24 * 3600;

/// Lifecycle state of a tracked job.
///
/// Transitions are monotone with respect to the partial order
/// `Waiting < Running < {Complete, Failed}`; updates from late writers that
/// would move a record backwards (or sideways between terminal states) are
/// ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusState {
    Waiting,
    Running,
    Failed,
    Complete,
}

impl StatusState {
    pub fn is_terminal(self) -> bool {
        matches!(self, StatusState::Failed | StatusState::Complete)
    }

    fn rank(self) -> u8 {
        match self {
            StatusState::Waiting => 0,
            StatusState::Running => 1,
            StatusState::Failed | StatusState::Complete => 2,
        }
    }

    /// Whether moving from `self` to `next` respects the monotone order.
    pub(crate) fn allows(self, next: StatusState) -> bool {
        if self.is_terminal() {
            next == self
        } else {
            next.rank() >= self.rank()
        }
    }
}

/// Per-job status record stored under `job:<id>:status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatus {
    pub status: StatusState,
    /// Unix seconds of the last transition.
    pub updated: i64,
    /// Unix seconds of record creation.
    pub started: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
}

impl JobStatus {
    pub(crate) fn waiting() -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            status: StatusState::Waiting,
            updated: now,
            started: now,
            result: None,
        }
    }

    pub(crate) fn advanced(&self, state: StatusState, result: Option<serde_json::Value>) -> Self {
        Self {
            status: state,
            updated: chrono::Utc::now().timestamp(),
            started: self.started,
            result: result.or_else(|| self.result.clone()),
        }
    }
}
