//! Runtime configuration.
//!
//! Loaded from environment variables with the `FUND_INGEST` prefix (nested
//! fields via `__`, e.g. `FUND_INGEST__PORTAL__LIST_URL`), optionally merged
//! over an `ingest.toml` file in the working directory. `.env` files are
//! honored through dotenvy.

use serde::{Deserialize, Serialize};

use crate::error::{IngestError, IngestResult};

/// Top-level configuration for the ingestion pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub portal: PortalConfig,

    #[serde(default)]
    pub download: DownloadConfig,

    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    #[serde(default)]
    pub taxonomy: TaxonomyConfig,
}

/// Database connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Postgres connection string.
    #[serde(default = "default_database_url")]
    pub url: String,

    /// Pool size. Persists are short-lived single transactions, so the
    /// pool stays close to the worker count.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Seconds to wait for a pooled connection before giving up.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

/// Disclosure portal endpoints and pacing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortalConfig {
    /// DataTables-style list endpoint.
    #[serde(default = "default_list_url")]
    pub list_url: String,

    /// Base URL of the authoritative instance download endpoint.
    /// The legacy `downloadFile.do` endpoint is deliberately absent.
    #[serde(default = "default_instance_base")]
    pub instance_base: String,

    /// Fixed User-Agent sent on every request.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Minimum spacing between portal requests, in milliseconds.
    #[serde(default = "default_min_request_interval_ms")]
    pub min_request_interval_ms: u64,
}

/// Artifact download behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Total timeout for a single artifact fetch, in seconds.
    #[serde(default = "default_download_timeout_secs")]
    pub timeout_secs: u64,

    /// Streaming chunk flush threshold, in bytes.
    #[serde(default = "default_chunk_bytes")]
    pub chunk_bytes: usize,

    /// Retry attempts for transient failures.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial retry delay, in seconds; doubles per attempt.
    #[serde(default = "default_initial_retry_delay_secs")]
    pub initial_retry_delay_secs: u64,
}

/// Batch orchestration limits and step timeouts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Concurrent per-report chains per process.
    #[serde(default = "default_worker_pool_size")]
    pub worker_pool_size: usize,

    /// Maximum number of reports accepted in one batch.
    #[serde(default = "default_batch_cap")]
    pub batch_cap: usize,

    /// Step timeout for the download stage, in seconds.
    #[serde(default = "default_download_timeout_secs")]
    pub download_timeout_secs: u64,

    /// Step timeout for the parse stage, in seconds.
    #[serde(default = "default_parse_timeout_secs")]
    pub parse_timeout_secs: u64,

    /// Step timeout for the persist stage, in seconds.
    #[serde(default = "default_persist_timeout_secs")]
    pub persist_timeout_secs: u64,
}

/// Taxonomy and concept-mapping file locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaxonomyConfig {
    /// Directory holding one subdirectory of schema + linkbase files per
    /// taxonomy version.
    #[serde(default = "default_taxonomy_root")]
    pub root_dir: String,

    /// Directory holding one concept-mapping JSON file per version
    /// (filename stem = version).
    #[serde(default = "default_mappings_dir")]
    pub mappings_dir: String,

    /// Version used when a report's schemaRef matches nothing known.
    #[serde(default = "default_taxonomy_version")]
    pub default_version: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            list_url: default_list_url(),
            instance_base: default_instance_base(),
            user_agent: default_user_agent(),
            min_request_interval_ms: default_min_request_interval_ms(),
        }
    }
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_download_timeout_secs(),
            chunk_bytes: default_chunk_bytes(),
            max_attempts: default_max_attempts(),
            initial_retry_delay_secs: default_initial_retry_delay_secs(),
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            worker_pool_size: default_worker_pool_size(),
            batch_cap: default_batch_cap(),
            download_timeout_secs: default_download_timeout_secs(),
            parse_timeout_secs: default_parse_timeout_secs(),
            persist_timeout_secs: default_persist_timeout_secs(),
        }
    }
}

impl Default for TaxonomyConfig {
    fn default() -> Self {
        Self {
            root_dir: default_taxonomy_root(),
            mappings_dir: default_mappings_dir(),
            default_version: default_taxonomy_version(),
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            portal: PortalConfig::default(),
            download: DownloadConfig::default(),
            orchestrator: OrchestratorConfig::default(),
            taxonomy: TaxonomyConfig::default(),
        }
    }
}

impl IngestConfig {
    /// Load configuration from the environment and an optional `ingest.toml`.
    pub fn from_env() -> IngestResult<Self> {
        dotenvy::dotenv().ok();

        let settings = config::Config::builder()
            .add_source(config::File::with_name("ingest").required(false))
            .add_source(
                config::Environment::with_prefix("FUND_INGEST")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| IngestError::Internal(format!("failed to read configuration: {}", e)))?;

        settings
            .try_deserialize()
            .map_err(|e| IngestError::Internal(format!("invalid configuration: {}", e)))
    }
}

fn default_database_url() -> String {
    "postgres://localhost/fund_reports".to_string()
}

fn default_max_connections() -> u32 {
    10
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_list_url() -> String {
    "http://eid.csrc.gov.cn/fund/disclose/advanced_search_report.do".to_string()
}

fn default_instance_base() -> String {
    "http://eid.csrc.gov.cn/fund/disclose/instance_html_view.do".to_string()
}

fn default_user_agent() -> String {
    "FundReportIngest/0.1 (research; contact: ops@fundreport.local)".to_string()
}

fn default_min_request_interval_ms() -> u64 {
    500
}

fn default_download_timeout_secs() -> u64 {
    120
}

fn default_chunk_bytes() -> usize {
    64 * 1024
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_retry_delay_secs() -> u64 {
    1
}

fn default_worker_pool_size() -> usize {
    10
}

fn default_batch_cap() -> usize {
    500
}

fn default_parse_timeout_secs() -> u64 {
    60
}

fn default_persist_timeout_secs() -> u64 {
    30
}

fn default_taxonomy_root() -> String {
    "taxonomies".to_string()
}

fn default_mappings_dir() -> String {
    "taxonomies/mappings".to_string()
}

fn default_taxonomy_version() -> String {
    "csrc_v2.1".to_string()
}
