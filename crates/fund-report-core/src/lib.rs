//! Core types for the fund report ingestion pipeline.
//!
//! This crate owns everything the other pipeline crates share: the error
//! taxonomy, portal and lifecycle enumerations, the database pool and
//! embedded migrations, configuration, and the data models — both the
//! Diesel-mapped rows and the plain serde DTOs that flow between pipeline
//! steps.

pub mod config;
pub mod database;
pub mod enums;
pub mod error;
pub mod models;
pub mod schema;
pub mod test_utils;

pub use config::IngestConfig;
pub use database::DatabasePool;
pub use error::{ErrorKind, IngestError, IngestResult};
