//! Hybrid parser engine for fund disclosure artifacts.
//!
//! Reports arrive in four shapes: standards-compliant XBRL instances,
//! iXBRL containers with an XBRL island under `<body>`, plain HTML tables,
//! and the occasional artifact nothing recognizes. The facade detects the
//! shape, routes to the matching extractor, and falls back down the chain
//! until something produces a report or every path has been attempted.
//!
//! Extraction is CPU-bound and synchronous by design; callers running on an
//! async worker pool wrap it in a blocking task.

pub mod detector;
pub mod facade;
pub mod html;
pub mod ixbrl;
pub mod mapper;
pub mod mapping;
pub mod normalize;
pub mod taxonomy;
pub mod xbrl;

pub use detector::{detect, DetectedFormat, Detection};
pub use facade::{FundReportParser, LlmExtractor, ParseAttempt, ParseResult};
pub use mapping::ConceptMappingsConfig;
pub use taxonomy::{ConceptMeta, Taxonomy, TaxonomyManager};
