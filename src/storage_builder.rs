use crate::dsn::Dsn;
use crate::error::SwitchyardError;
use crate::storage::Storage;
use crate::storage_internal::KeyStore;

const DEFAULT_DSN: &str = "redis://127.0.0.1:6379";

/// Builder for [`Storage`] instances.
///
/// The usual path reads everything from the environment:
/// `REDIS_BACKEND` (DSN), `REDIS_BACKEND_DB` (database override) and
/// `PREFIX` (key namespace).
pub struct StorageBuilder {
    dsn: Option<Dsn>,
    namespace: Option<String>,
    pool_size: usize,
}

impl StorageBuilder {
    pub fn new() -> Self {
        Self {
            dsn: None,
            namespace: None,
            pool_size: 16,
        }
    }

    /// Reads `REDIS_BACKEND`, `REDIS_BACKEND_DB` and `PREFIX`, falling back
    /// to a local server when no DSN is configured.
    pub fn from_env(mut self) -> Result<Self, SwitchyardError> {
        let raw = std::env::var("REDIS_BACKEND").unwrap_or_else(|_| DEFAULT_DSN.to_string());
        let mut dsn = Dsn::parse(&raw)?;

        if let Ok(db) = std::env::var("REDIS_BACKEND_DB") {
            dsn.db = Some(db.parse().map_err(|_| {
                SwitchyardError::Config(format!("invalid REDIS_BACKEND_DB `{db}`"))
            })?);
        }
        if let Ok(prefix) = std::env::var("PREFIX") {
            if !prefix.is_empty() {
                self.namespace = Some(prefix);
            }
        }

        self.dsn = Some(dsn);
        Ok(self)
    }

    pub fn dsn(mut self, dsn: Dsn) -> Self {
        self.dsn = Some(dsn);
        self
    }

    pub fn url(mut self, url: &str) -> Result<Self, SwitchyardError> {
        self.dsn = Some(Dsn::parse(url)?);
        Ok(self)
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn max_pool_size(mut self, size: usize) -> Self {
        self.pool_size = size;
        self
    }

    pub fn build(self) -> Result<Storage, SwitchyardError> {
        let dsn = match self.dsn {
            Some(dsn) => dsn,
            None => Dsn::parse(DEFAULT_DSN)?,
        };

        let mut cfg = deadpool_redis::Config::from_url(dsn.connection_url());
        cfg.pool = Some(deadpool_redis::PoolConfig {
            max_size: self.pool_size,
            ..Default::default()
        });
        let pool = cfg
            .create_pool(Some(deadpool_redis::Runtime::Tokio1))
            .map_err(|e| SwitchyardError::Config(format!("failed to create Redis pool: {e}")))?;

        Ok(Storage {
            internal: KeyStore::new(pool, self.namespace),
        })
    }
}

impl Default for StorageBuilder {
    fn default() -> Self {
        Self::new()
    }
}
