use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::enums::{ParserKind, ReportType};

/// **Parsed Fund Report**
///
/// Aggregate root produced by the parser engine and consumed by the
/// persistence layer. A plain serde structure: parsed reports travel between
/// pipeline steps (potentially across worker processes) and must therefore
/// never reference ORM entities or connections.
///
/// All monetary and ratio fields use arbitrary-precision decimals; binary
/// floating point is not acceptable for these columns.
///
/// # Examples
/// ```rust
/// use bigdecimal::BigDecimal;
/// use chrono::NaiveDate;
/// use std::str::FromStr;
/// use fund_report_core::enums::{ParserKind, ReportType};
/// use fund_report_core::models::ParsedFundReport;
///
/// let report = ParsedFundReport {
///     fund_code: "000001".to_string(),
///     fund_name: "华夏成长混合".to_string(),
///     fund_manager: Some("华夏基金管理有限公司".to_string()),
///     report_type: ReportType::Annual,
///     report_period_start: Some(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()),
///     report_period_end: NaiveDate::from_ymd_opt(2024, 12, 31).unwrap(),
///     net_asset_value: Some(BigDecimal::from_str("1.0521").unwrap()),
///     total_net_assets: Some(BigDecimal::from_str("3521000000.00").unwrap()),
///     period_profit: None,
///     asset_allocations: vec![],
///     top_holdings: vec![],
///     industry_allocations: vec![],
///     parser_kind: ParserKind::Xbrl,
///     taxonomy_version: Some("csrc_v2.1".to_string()),
///     confidence: BigDecimal::from_str("0.95").unwrap(),
///     warnings: vec![],
/// };
/// assert_eq!(report.report_type, ReportType::Annual);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedFundReport {
    /// Six-digit fund code.
    pub fund_code: String,

    /// Full fund name as reported.
    pub fund_name: String,

    /// Fund management company, when disclosed.
    pub fund_manager: Option<String>,

    /// Report category; derived from a document-type concept fact, falling
    /// back to the portal's report description. Never guessed from dates.
    pub report_type: ReportType,

    /// First day of the reporting period, when disclosed.
    pub report_period_start: Option<NaiveDate>,

    /// Last day of the reporting period. Part of the persistence natural
    /// key, so a report without it cannot be produced.
    pub report_period_end: NaiveDate,

    /// Per-share net asset value at period end.
    pub net_asset_value: Option<BigDecimal>,

    /// Total net assets of the fund at period end.
    pub total_net_assets: Option<BigDecimal>,

    /// Profit realized over the reporting period.
    pub period_profit: Option<BigDecimal>,

    /// Asset-class breakdown. Insertion order is irrelevant.
    pub asset_allocations: Vec<AssetAllocation>,

    /// Largest portfolio positions.
    pub top_holdings: Vec<Holding>,

    /// Industry breakdown of equity holdings.
    pub industry_allocations: Vec<IndustryAllocation>,

    /// Which extraction path produced this report.
    pub parser_kind: ParserKind,

    /// Taxonomy version the concept mapping was resolved against.
    pub taxonomy_version: Option<String>,

    /// Extraction confidence in `[0, 1]`.
    pub confidence: BigDecimal,

    /// Non-fatal anomalies observed during extraction.
    pub warnings: Vec<String>,
}

/// One asset-class row of the allocation table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetAllocation {
    /// Asset class label, e.g. "股票".
    pub asset_type: String,

    /// Finer-grained label when the report provides one.
    pub asset_subtype: Option<String>,

    /// Market value in CNY.
    pub market_value: BigDecimal,

    /// Share of fund net assets, in `[0, 1]`.
    pub net_value_ratio: BigDecimal,
}

/// One position of the top-holdings table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Holding {
    /// 1-based rank within the report.
    pub rank: i32,

    /// Exchange security code.
    pub security_code: String,

    /// Security display name.
    pub security_name: String,

    /// Quantity held, when disclosed.
    pub shares: Option<i64>,

    /// Market value in CNY.
    pub market_value: BigDecimal,

    /// Share of fund net assets, in `[0, 1]`.
    pub net_value_ratio: BigDecimal,
}

/// One industry row of the industry allocation table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndustryAllocation {
    /// Industry label, resolved from the taxonomy when mapped by dimension.
    pub industry_name: String,

    /// Market value in CNY.
    pub market_value: BigDecimal,

    /// Share of fund net assets, in `[0, 1]`.
    pub net_value_ratio: BigDecimal,
}

impl ParsedFundReport {
    /// Sum of asset-allocation ratios; used by the 2% closure check.
    pub fn allocation_ratio_sum(&self) -> BigDecimal {
        self.asset_allocations
            .iter()
            .map(|a| a.net_value_ratio.clone())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn allocation_ratio_sum_adds_child_rows() {
        let mut report = minimal_report();
        report.asset_allocations = vec![
            AssetAllocation {
                asset_type: "股票".to_string(),
                asset_subtype: None,
                market_value: BigDecimal::from(100),
                net_value_ratio: BigDecimal::from_str("0.6").unwrap(),
            },
            AssetAllocation {
                asset_type: "债券".to_string(),
                asset_subtype: None,
                market_value: BigDecimal::from(50),
                net_value_ratio: BigDecimal::from_str("0.4").unwrap(),
            },
        ];
        assert_eq!(
            report.allocation_ratio_sum(),
            BigDecimal::from_str("1.0").unwrap()
        );
    }

    pub(crate) fn minimal_report() -> ParsedFundReport {
        ParsedFundReport {
            fund_code: "000001".to_string(),
            fund_name: "测试基金".to_string(),
            fund_manager: None,
            report_type: ReportType::Annual,
            report_period_start: None,
            report_period_end: NaiveDate::from_ymd_opt(2024, 12, 31).unwrap(),
            net_asset_value: None,
            total_net_assets: None,
            period_profit: None,
            asset_allocations: vec![],
            top_holdings: vec![],
            industry_allocations: vec![],
            parser_kind: ParserKind::Xbrl,
            taxonomy_version: None,
            confidence: BigDecimal::from(1),
            warnings: vec![],
        }
    }
}
