use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::enums::{ParserKind, ReportType};
use crate::schema::{asset_allocations, fund_reports, industry_allocations, top_holdings};

/// **Fund Report Row**
///
/// Persisted form of a parsed fund report. One row per
/// `(fund_code, report_period_end, report_type)`; a reparse updates the
/// scalars in place, stamps `reparsed_at` and replaces the child tables as a
/// unit.
///
/// # Database Schema
/// Maps to `fund_reports`. Monetary columns are `numeric(20,2)`, ratio
/// columns `numeric(8,4)` constrained to `[0,1]`. Indexed on
/// `(fund_code, report_period_end)`.
#[derive(Debug, Clone, Queryable, Selectable, Insertable, Serialize, Deserialize)]
#[diesel(table_name = fund_reports)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct FundReport {
    /// Surrogate primary key.
    pub id: Uuid,

    /// Six-digit fund code; part of the natural key.
    pub fund_code: String,

    /// Full fund name as reported.
    pub fund_name: String,

    /// Fund management company, when disclosed.
    pub fund_manager: Option<String>,

    /// Report category; part of the natural key.
    pub report_type: ReportType,

    /// First day of the reporting period.
    pub report_period_start: Option<NaiveDate>,

    /// Last day of the reporting period; part of the natural key.
    pub report_period_end: NaiveDate,

    /// Per-share net asset value at period end.
    pub net_asset_value: Option<BigDecimal>,

    /// Total net assets at period end.
    pub total_net_assets: Option<BigDecimal>,

    /// Profit over the reporting period.
    pub period_profit: Option<BigDecimal>,

    /// Extraction path that produced this row.
    pub parser_kind: ParserKind,

    /// Taxonomy version used for concept mapping.
    pub taxonomy_version: Option<String>,

    /// Extraction confidence in `[0, 1]`.
    pub confidence: BigDecimal,

    /// Row creation time.
    pub created_at: DateTime<Utc>,

    /// Audit stamp of the most recent reparse, if any.
    pub reparsed_at: Option<DateTime<Utc>>,
}

/// One persisted asset-allocation row, owned by a fund report.
#[derive(Debug, Clone, Queryable, Selectable, Insertable, Serialize, Deserialize)]
#[diesel(table_name = asset_allocations)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct AssetAllocationRow {
    pub id: Uuid,
    pub fund_report_id: Uuid,
    pub asset_type: String,
    pub asset_subtype: Option<String>,
    pub market_value: BigDecimal,
    pub net_value_ratio: BigDecimal,
}

/// One persisted top-holding row, owned by a fund report.
#[derive(Debug, Clone, Queryable, Selectable, Insertable, Serialize, Deserialize)]
#[diesel(table_name = top_holdings)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct TopHoldingRow {
    pub id: Uuid,
    pub fund_report_id: Uuid,
    pub rank: i32,
    pub security_code: String,
    pub security_name: String,
    pub shares: Option<i64>,
    pub market_value: BigDecimal,
    pub net_value_ratio: BigDecimal,
}

/// One persisted industry-allocation row, owned by a fund report.
#[derive(Debug, Clone, Queryable, Selectable, Insertable, Serialize, Deserialize)]
#[diesel(table_name = industry_allocations)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct IndustryAllocationRow {
    pub id: Uuid,
    pub fund_report_id: Uuid,
    pub industry_name: String,
    pub market_value: BigDecimal,
    pub net_value_ratio: BigDecimal,
}
