use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// **Artifact Record**
///
/// Outcome of a successful artifact download: where the bytes landed and
/// their integrity hash. Owned by the chain that produced it; once the
/// parsed report is persisted the record is only kept for audit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    /// URL the artifact was fetched from.
    pub url: String,

    /// Absolute path of the file on local disk.
    pub file_path: String,

    /// Size of the artifact in bytes.
    pub bytes: u64,

    /// Lowercase hex SHA-256 of the content.
    pub sha256: String,

    /// When the fetch completed.
    pub fetched_at: DateTime<Utc>,
}
