//! Disclosure portal scraper.
//!
//! This crate speaks the portal's two wire protocols: the DataTables-style
//! report listing (brittle `aoData` form payload, capped pages) and the
//! redirect-following artifact download. Search criteria are validated here
//! before anything reaches the network, and every portal request passes
//! through an in-process rate limiter.

pub mod criteria;
pub mod downloader;
pub mod portal;
pub mod rate_limiter;

pub use criteria::SearchCriteria;
pub use downloader::Downloader;
pub use portal::{PortalClient, SearchPage};
pub use rate_limiter::PortalRateLimiter;
