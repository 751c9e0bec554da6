use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

use sync_domain::Error;

use crate::Tx;

#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// `sqlite://path/to/file.db` or `sqlite::memory:` for tests.
    pub dsn: String,
    /// Should be at least the number of concurrent request workers.
    pub max_connections: u32,
}

impl StorageConfig {
    pub fn in_memory() -> Self {
        StorageConfig {
            dsn: "sqlite::memory:".to_string(),
            max_connections: 5,
        }
    }
}

/// Owns the connection pool. Cheaply cloneable; share one instance across
/// both transports.
#[derive(Clone)]
pub struct Storage {
    pool: SqlitePool,
}

impl Storage {
    #[tracing::instrument(skip(config), fields(dsn = %config.dsn))]
    pub async fn connect(config: &StorageConfig) -> Result<Self, Error> {
        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.dsn)
            .await
            .map_err(crate::map_sqlx_err)?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| Error::internal(format!("migration failed: {e}")))?;

        Ok(Storage { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Begins a request-scoped transaction. Mutating operations take this
    /// handle rather than the bare pool, so batch pushes commit or roll
    /// back as a unit.
    pub async fn begin(&self) -> Result<Tx<'_>, Error> {
        self.pool.begin().await.map_err(crate::map_sqlx_err)
    }
}
