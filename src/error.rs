/// Errors surfaced by the switchyard public API.
///
/// Transport and pool errors are propagated to the caller unchanged and are
/// never retried inside the engine; configuration errors are fatal for the
/// calling operation. Handler failures do not appear here: they are routed
/// to the failure sink as [`crate::JobFailure`] values.
#[derive(Debug, thiserror::Error)]
pub enum SwitchyardError {
    #[error("redis transport error: {0}")]
    Transport(#[from] deadpool_redis::redis::RedisError),

    #[error("redis pool error: {0}")]
    Pool(#[from] deadpool_redis::PoolError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("job class not registered: {0}")]
    NotRegistered(String),

    #[error("{0}")]
    Generic(String),
}

impl SwitchyardError {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}
