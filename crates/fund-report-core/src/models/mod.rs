//! # Data Models
//!
//! Data models and database entities for the fund report ingestion pipeline.
//!
//! Two families live here:
//!
//! - **Persisted entities**: Diesel-mapped rows (`FundReport` and its child
//!   tables, `DownloadTaskRow`) matching the tables in `schema.rs`.
//! - **Pipeline DTOs**: plain serde structs exchanged between chain steps
//!   (`ReportRef`, `ArtifactRecord`, `ParsedFundReport`, `ItemOutcome`).
//!   These deliberately carry no ORM state so they can cross worker
//!   boundaries as plain data.

pub mod artifact;
pub mod download_task;
pub mod fund_report;
pub mod parsed_report;
pub mod report_ref;

pub use artifact::*;
pub use download_task::*;
pub use fund_report::*;
pub use parsed_report::*;
pub use report_ref::*;
