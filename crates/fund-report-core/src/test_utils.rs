//! Test utilities shared by the pipeline crates.

use crate::config::DatabaseConfig;
use crate::database::DatabasePool;

/// Database handle for integration tests.
///
/// Tests that need Postgres read `TEST_DATABASE_URL` and skip themselves
/// when it is absent, so the unit suite stays runnable without
/// infrastructure. Point the variable at a scratch database; connecting
/// migrates it, table truncation is left to the individual test.
pub struct TestDb {
    pool: DatabasePool,
}

impl TestDb {
    /// Connect to the test database, or `None` when none is configured.
    pub async fn connect() -> Option<Self> {
        let url = std::env::var("TEST_DATABASE_URL").ok()?;
        let config = DatabaseConfig {
            url,
            ..DatabaseConfig::default()
        };
        // database::connect migrates and probes before handing the pool out.
        let pool = crate::database::connect(&config)
            .await
            .expect("failed to connect to TEST_DATABASE_URL");
        Some(Self { pool })
    }

    pub fn pool(&self) -> &DatabasePool {
        &self.pool
    }

    /// Remove all ingestion rows so a test starts from a clean slate.
    pub async fn clean(&self) {
        use diesel_async::RunQueryDsl;

        let mut conn = self.pool.get().await.expect("pool connection");
        for table in [
            "asset_allocations",
            "top_holdings",
            "industry_allocations",
            "fund_reports",
            "download_tasks",
        ] {
            diesel::sql_query(format!("TRUNCATE TABLE {} CASCADE", table))
                .execute(&mut conn)
                .await
                .expect("truncate failed");
        }
    }
}
