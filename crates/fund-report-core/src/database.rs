//! Database startup: schema migration, pool construction, readiness probe.
//!
//! One entry point, [`connect`], brings the schema up to date, opens the
//! bb8 pool with configured sizing, and round-trips a probe query so a
//! misconfigured database fails at startup instead of mid-batch.

use std::time::Duration;

use diesel::prelude::*;
use diesel_async::pooled_connection::bb8::Pool;
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::AsyncPgConnection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use tracing::{debug, info};

use crate::config::DatabaseConfig;
use crate::error::{IngestError, IngestResult};

const MIGRATIONS: EmbeddedMigrations = embed_migrations!();

/// Shared async connection pool.
pub type DatabasePool = Pool<AsyncPgConnection>;

/// Migrate, pool and verify the database described by `config`.
pub async fn connect(config: &DatabaseConfig) -> IngestResult<DatabasePool> {
    apply_migrations(&config.url).await?;

    let manager = AsyncDieselConnectionManager::<AsyncPgConnection>::new(&config.url);
    let pool = Pool::builder()
        .max_size(config.max_connections)
        .connection_timeout(Duration::from_secs(config.connect_timeout_secs))
        .build(manager)
        .await
        .map_err(|e| IngestError::DbTransport(format!("cannot open connection pool: {}", e)))?;

    probe(&pool).await?;
    info!(
        max_connections = config.max_connections,
        "database ready"
    );
    Ok(pool)
}

/// Apply pending embedded migrations, reporting the versions that ran.
///
/// diesel_migrations drives a synchronous connection, so the harness runs
/// on the blocking thread pool.
pub async fn apply_migrations(url: &str) -> IngestResult<()> {
    let url = url.to_string();
    let applied = tokio::task::spawn_blocking(move || -> IngestResult<Vec<String>> {
        let mut conn = PgConnection::establish(&url)
            .map_err(|e| IngestError::DbTransport(format!("cannot reach database: {}", e)))?;
        let versions = conn
            .run_pending_migrations(MIGRATIONS)
            .map_err(|e| IngestError::DbTransport(format!("migration failed: {}", e)))?;
        Ok(versions.iter().map(|v| v.to_string()).collect())
    })
    .await
    .map_err(|e| IngestError::Internal(format!("migration worker died: {}", e)))??;

    if applied.is_empty() {
        debug!("schema already up to date");
    } else {
        info!(versions = ?applied, "schema migrations applied");
    }
    Ok(())
}

/// Readiness check against an ingestion table rather than a bare
/// `SELECT 1`: it proves the migrated schema is actually reachable through
/// the pool.
async fn probe(pool: &DatabasePool) -> IngestResult<()> {
    use crate::schema::download_tasks;

    let mut conn = pool
        .get()
        .await
        .map_err(|e| IngestError::DbTransport(format!("cannot check out a connection: {}", e)))?;

    let _tasks: i64 = diesel_async::RunQueryDsl::get_result(download_tasks::table.count(), &mut conn)
        .await?;
    Ok(())
}
