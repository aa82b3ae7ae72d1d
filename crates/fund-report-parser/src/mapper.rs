//! Taxonomy-driven mapping of raw facts onto the relational report shape.
//!
//! The mapper never guesses: an unmapped scalar stays unset, the report
//! type comes from a document-type fact or the caller's report-description
//! hint (never from a date), and any closure violation of the allocation
//! ratios is surfaced as a warning with a confidence penalty instead of
//! being patched up.

use std::collections::BTreeMap;

use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use tracing::debug;

use fund_report_core::enums::{ParserKind, ReportType};
use fund_report_core::error::{IngestError, IngestResult};
use fund_report_core::models::{
    AssetAllocation, Holding, IndustryAllocation, ParsedFundReport,
};

use crate::mapping::ConceptMappingsConfig;
use crate::normalize;
use crate::taxonomy::Taxonomy;
use crate::xbrl::{concept_matches, local_name, XbrlDocument, XbrlFact, XbrlPeriod};

/// Allowed deviation of the asset-allocation ratio sum from 1.0.
fn ratio_sum_tolerance() -> BigDecimal {
    BigDecimal::from(2) / BigDecimal::from(100)
}

/// **Concept Mapper**
///
/// Applies one version's concept mapping to an extracted fact set. The
/// taxonomy is optional: without it dimension members keep their QNames as
/// row labels and datatype hints are unavailable, but mapping proceeds.
pub struct ConceptMapper<'a> {
    config: &'a ConceptMappingsConfig,
    taxonomy: Option<&'a Taxonomy>,
}

impl<'a> ConceptMapper<'a> {
    pub fn new(config: &'a ConceptMappingsConfig, taxonomy: Option<&'a Taxonomy>) -> Self {
        Self { config, taxonomy }
    }

    /// Build a [`ParsedFundReport`] from one extracted document.
    ///
    /// `desc_hint` is the portal's report description, used only as the
    /// documented fallback for the report type.
    pub fn map_document(
        &self,
        doc: &XbrlDocument,
        desc_hint: Option<&str>,
    ) -> IngestResult<ParsedFundReport> {
        let mut warnings: Vec<String> = Vec::new();

        let fund_code = self
            .scalar_text(doc, "fund_code")
            .ok_or_else(|| IngestError::Parse("no fund code fact found".to_string()))?;
        let fund_name = self
            .scalar_text(doc, "fund_name")
            .ok_or_else(|| IngestError::Parse("no fund name fact found".to_string()))?;
        let fund_manager = self.scalar_text(doc, "fund_manager");

        let report_period_end = self
            .scalar_date(doc, "report_period_end")
            .or_else(|| latest_duration_end(doc))
            .ok_or_else(|| {
                IngestError::Parse("cannot determine report period end".to_string())
            })?;
        let report_period_start = self.scalar_date(doc, "report_period_start");

        let report_type = self.resolve_report_type(doc, desc_hint).ok_or_else(|| {
            IngestError::Parse(
                "report type is neither tagged nor derivable from the report description"
                    .to_string(),
            )
        })?;

        let net_asset_value = self.scalar_decimal(doc, "net_asset_value");
        let total_net_assets = self.scalar_decimal(doc, "total_net_assets");
        let period_profit = self.scalar_decimal(doc, "period_profit");

        let top_holdings = self.map_top_holdings(doc, &mut warnings);
        let industry_allocations = self.map_industry_allocations(doc, &mut warnings);
        let asset_allocations = self.map_asset_allocations(doc, &mut warnings);

        let mut confidence = BigDecimal::from(95) / BigDecimal::from(100);
        if !asset_allocations.is_empty() {
            let sum: BigDecimal = asset_allocations
                .iter()
                .map(|a| a.net_value_ratio.clone())
                .sum();
            let deviation = (sum.clone() - BigDecimal::from(1)).abs();
            if deviation > ratio_sum_tolerance() {
                warnings.push(format!(
                    "asset allocation ratios sum to {} (deviation {})",
                    sum, deviation
                ));
                confidence = confidence - BigDecimal::from(1) / BigDecimal::from(10);
            }
        }

        debug!(
            fund_code,
            holdings = top_holdings.len(),
            industries = industry_allocations.len(),
            "concept mapping complete"
        );

        Ok(ParsedFundReport {
            fund_code,
            fund_name,
            fund_manager,
            report_type,
            report_period_start,
            report_period_end,
            net_asset_value,
            total_net_assets,
            period_profit,
            asset_allocations,
            top_holdings,
            industry_allocations,
            parser_kind: ParserKind::Xbrl,
            taxonomy_version: self.taxonomy.map(|t| t.version.clone()),
            confidence,
            warnings,
        })
    }

    fn find_fact<'d>(&self, doc: &'d XbrlDocument, ids: &[String]) -> Option<&'d XbrlFact> {
        doc.facts.iter().find(|f| concept_matches(&f.concept, ids))
    }

    fn scalar_text(&self, doc: &XbrlDocument, field: &str) -> Option<String> {
        let fact = self.find_fact(doc, self.config.scalar(field))?;
        let value = fact.value_raw.trim();
        if value.is_empty() {
            None
        } else {
            Some(value.to_string())
        }
    }

    fn scalar_decimal(&self, doc: &XbrlDocument, field: &str) -> Option<BigDecimal> {
        let fact = self.find_fact(doc, self.config.scalar(field))?;
        let value = normalize::parse_decimal(&fact.value_raw)?;
        Some(normalize::apply_decimals(value, fact.decimals))
    }

    fn scalar_date(&self, doc: &XbrlDocument, field: &str) -> Option<NaiveDate> {
        let fact = self.find_fact(doc, self.config.scalar(field))?;
        normalize::parse_date(&fact.value_raw)
    }

    /// Report type from a tagged document-type concept, falling back to the
    /// portal description. Dates are never consulted.
    fn resolve_report_type(&self, doc: &XbrlDocument, desc_hint: Option<&str>) -> Option<ReportType> {
        if let Some(fact) = self.find_fact(doc, self.config.scalar("report_type")) {
            let value = fact.value_raw.trim();
            if let Some(by_code) = report_type_from_code(value) {
                return Some(by_code);
            }
            if let Ok(by_name) = value.parse::<ReportType>() {
                return Some(by_name);
            }
            if let Some(by_desc) = ReportType::from_report_desc(value) {
                return Some(by_desc);
            }
        }
        desc_hint.and_then(ReportType::from_report_desc)
    }

    fn map_top_holdings(&self, doc: &XbrlDocument, warnings: &mut Vec<String>) -> Vec<Holding> {
        let Some(cfg) = &self.config.tables.top_holdings else {
            return Vec::new();
        };
        let all_ids: Vec<String> = cfg.fields.values().flatten().cloned().collect();

        // Group by contextRef: one reporting context per table row.
        let mut groups: BTreeMap<&str, Vec<&XbrlFact>> = BTreeMap::new();
        for fact in doc.facts_for(&all_ids) {
            groups.entry(fact.context_ref.as_str()).or_default().push(fact);
        }

        let field = |group: &[&XbrlFact], name: &str| -> Option<String> {
            let ids = cfg.fields.get(name)?;
            group
                .iter()
                .find(|f| concept_matches(&f.concept, ids))
                .map(|f| f.value_raw.clone())
        };

        let mut rows: Vec<Holding> = Vec::new();
        let mut rescaled = false;
        for group in groups.values() {
            let Some(security_code) = field(group, "security_code") else {
                continue;
            };
            let Some(market_value_raw) = field(group, "market_value") else {
                warnings.push(format!("holding {} has no market value", security_code));
                continue;
            };
            let Some(market_value) = normalize::parse_decimal(&market_value_raw) else {
                warnings.push(format!(
                    "holding {} has unparseable market value {:?}",
                    security_code, market_value_raw
                ));
                continue;
            };
            let Some((net_value_ratio, was_percent)) = field(group, "net_value_ratio")
                .and_then(|v| normalize::parse_ratio(&v))
            else {
                warnings.push(format!("holding {} has no net value ratio", security_code));
                continue;
            };
            rescaled |= was_percent;

            rows.push(Holding {
                rank: field(group, "rank")
                    .and_then(|v| normalize::parse_rank(&v))
                    .unwrap_or(0),
                security_code,
                security_name: field(group, "security_name").unwrap_or_default(),
                shares: field(group, "shares").and_then(|v| normalize::parse_shares(&v)),
                market_value,
                net_value_ratio,
            });
        }

        if rescaled {
            warnings.push("holding ratios reported as percentages".to_string());
        }

        rows.sort_by_key(|h| h.rank);
        // Untagged ranks get their post-sort position.
        for (idx, row) in rows.iter_mut().enumerate() {
            if row.rank == 0 {
                row.rank = idx as i32 + 1;
            }
        }
        rows
    }

    fn map_industry_allocations(
        &self,
        doc: &XbrlDocument,
        warnings: &mut Vec<String>,
    ) -> Vec<IndustryAllocation> {
        let Some(cfg) = &self.config.tables.industry_allocations else {
            return Vec::new();
        };
        let all_ids: Vec<String> = cfg.fields.values().flatten().cloned().collect();
        let axis_ids = [cfg.axis.clone()];

        // Group by the explicit member on the configured axis.
        let mut groups: BTreeMap<String, Vec<&XbrlFact>> = BTreeMap::new();
        for fact in doc.facts_for(&all_ids) {
            let Some(context) = doc.contexts.get(&fact.context_ref) else {
                continue;
            };
            let member = context
                .dimensions
                .iter()
                .find(|(axis, _)| concept_matches(axis, &axis_ids))
                .map(|(_, member)| member.clone());
            if let Some(member) = member {
                groups.entry(member).or_default().push(fact);
            }
        }

        let mut rescaled = false;
        let mut rows = Vec::new();
        for (member, group) in &groups {
            let value_ids = cfg.fields.get("market_value").cloned().unwrap_or_default();
            let ratio_ids = cfg
                .fields
                .get("net_value_ratio")
                .cloned()
                .unwrap_or_default();

            let market_value = group
                .iter()
                .find(|f| concept_matches(&f.concept, &value_ids))
                .and_then(|f| normalize::parse_decimal(&f.value_raw));
            let ratio = group
                .iter()
                .find(|f| concept_matches(&f.concept, &ratio_ids))
                .and_then(|f| normalize::parse_ratio(&f.value_raw));

            let (Some(market_value), Some((net_value_ratio, was_percent))) = (market_value, ratio)
            else {
                warnings.push(format!("industry member {} is missing values", member));
                continue;
            };
            rescaled |= was_percent;

            // Row label: resolved taxonomy label of the member, QName local
            // name otherwise.
            let industry_name = self
                .taxonomy
                .and_then(|t| t.get(member))
                .and_then(|c| c.label_zh.clone())
                .unwrap_or_else(|| local_name(member).to_string());

            rows.push(IndustryAllocation {
                industry_name,
                market_value,
                net_value_ratio,
            });
        }

        if rescaled {
            warnings.push("industry ratios reported as percentages".to_string());
        }
        rows
    }

    fn map_asset_allocations(
        &self,
        doc: &XbrlDocument,
        warnings: &mut Vec<String>,
    ) -> Vec<AssetAllocation> {
        let Some(cfg) = &self.config.tables.asset_allocations else {
            return Vec::new();
        };

        let mut rescaled = false;
        let mut rows = Vec::new();
        for entry in &cfg.entries {
            let market_value = self
                .find_fact(doc, &entry.market_value)
                .and_then(|f| normalize::parse_decimal(&f.value_raw));
            let ratio = self
                .find_fact(doc, &entry.net_value_ratio)
                .and_then(|f| normalize::parse_ratio(&f.value_raw));

            // Absent asset classes are normal; only half-present ones are
            // suspicious.
            match (market_value, ratio) {
                (Some(market_value), Some((net_value_ratio, was_percent))) => {
                    rescaled |= was_percent;
                    rows.push(AssetAllocation {
                        asset_type: entry.label.clone(),
                        asset_subtype: entry.subtype.clone(),
                        market_value,
                        net_value_ratio,
                    });
                }
                (Some(_), None) => {
                    warnings.push(format!("asset class {} has value but no ratio", entry.label))
                }
                _ => {}
            }
        }

        if rescaled {
            warnings.push("asset allocation ratios reported as percentages".to_string());
        }
        rows
    }
}

/// Latest period date among contexts actually referenced by facts; the
/// deterministic stand-in when the period-end concept is untagged.
fn latest_duration_end(doc: &XbrlDocument) -> Option<NaiveDate> {
    doc.facts
        .iter()
        .filter_map(|f| doc.contexts.get(&f.context_ref))
        .filter_map(|c| match &c.period {
            XbrlPeriod::Duration { end, .. } => normalize::parse_date(end),
            XbrlPeriod::Instant { date } => normalize::parse_date(date),
            XbrlPeriod::Unspecified => None,
        })
        .max()
}

/// Match a tagged document-type value against the portal report codes.
fn report_type_from_code(value: &str) -> Option<ReportType> {
    [
        ReportType::Annual,
        ReportType::SemiAnnual,
        ReportType::Q1,
        ReportType::Q2,
        ReportType::Q3,
        ReportType::Q4,
        ReportType::FundProfile,
    ]
    .into_iter()
    .find(|t| t.portal_code() == value)
}
