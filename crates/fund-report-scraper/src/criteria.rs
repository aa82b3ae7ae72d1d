//! Search criteria for the portal's report listing.

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use fund_report_core::enums::{FundType, ReportType};
use fund_report_core::error::{IngestError, IngestResult};

// [0-9] rather than \d: the regex crate's \d also matches full-width
// digits, which the portal rejects.
static FUND_CODE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9]{6}$").expect("valid regex"));

/// The portal caps list pages at 20 rows regardless of what is requested.
pub const PORTAL_PAGE_CAP: u32 = 20;

/// **Search Criteria**
///
/// User-facing search filter, validated before the portal is contacted.
///
/// Invariant: `year` may be absent only for [`ReportType::FundProfile`]
/// searches; every periodic report type requires one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchCriteria {
    /// Reporting year; mandatory unless searching fund profiles.
    pub year: Option<i32>,

    /// Report category to search for.
    pub report_type: ReportType,

    /// Optional fund category filter.
    pub fund_type: Option<FundType>,

    /// Fund company short name, in Chinese.
    pub fund_company_short_name: Option<String>,

    /// Six-digit fund code.
    pub fund_code: Option<String>,

    /// Fund short name, in Chinese.
    pub fund_short_name: Option<String>,

    /// Closed upload-date range `(start, end)`; either side may be open.
    pub upload_date_range: (Option<NaiveDate>, Option<NaiveDate>),

    /// 1-based page number.
    pub page: u32,

    /// Requested rows per page, `1..=100`.
    pub page_size: u32,
}

impl SearchCriteria {
    /// Criteria for one report type with pipeline defaults for paging.
    pub fn for_report_type(report_type: ReportType) -> Self {
        Self {
            year: None,
            report_type,
            fund_type: None,
            fund_company_short_name: None,
            fund_code: None,
            fund_short_name: None,
            upload_date_range: (None, None),
            page: 1,
            page_size: PORTAL_PAGE_CAP,
        }
    }

    /// Apply every acceptance rule of the search contract.
    pub fn validate(&self) -> IngestResult<()> {
        if self.report_type.requires_year() && self.year.is_none() {
            return Err(IngestError::Validation(format!(
                "year is required for {} searches",
                self.report_type.as_str()
            )));
        }

        if let Some(code) = &self.fund_code {
            if !FUND_CODE_RE.is_match(code) {
                return Err(IngestError::Validation(format!(
                    "fund_code must be exactly six digits, got {:?}",
                    code
                )));
            }
        }

        if let (Some(start), Some(end)) = self.upload_date_range {
            if start > end {
                return Err(IngestError::Validation(format!(
                    "upload date range starts after it ends: {} > {}",
                    start, end
                )));
            }
        }

        if self.page < 1 {
            return Err(IngestError::Validation("page must be >= 1".to_string()));
        }

        if !(1..=100).contains(&self.page_size) {
            return Err(IngestError::Validation(format!(
                "page_size must be within 1..=100, got {}",
                self.page_size
            )));
        }

        Ok(())
    }
}
