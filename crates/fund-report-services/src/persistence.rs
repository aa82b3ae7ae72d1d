//! Relational persistence of parsed reports.
//!
//! One transaction per report: upsert the parent row on its natural key,
//! drop the child rows, insert the fresh ones. A retried chain therefore
//! never duplicates anything, and a reparse replaces the children as a
//! single unit while stamping `reparsed_at` on the parent.

use bigdecimal::BigDecimal;
use chrono::Utc;
use diesel::prelude::*;
use diesel::upsert::excluded;
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, RunQueryDsl};
use tracing::debug;
use uuid::Uuid;

use fund_report_core::database::DatabasePool;
use fund_report_core::error::{IngestError, IngestResult};
use fund_report_core::models::{
    AssetAllocationRow, FundReport, IndustryAllocationRow, ParsedFundReport, TopHoldingRow,
};
use fund_report_core::schema::{asset_allocations, fund_reports, industry_allocations, top_holdings};

/// **Fund Report Store**
///
/// Transactional writer for `fund_reports` and its child tables.
#[derive(Clone)]
pub struct FundReportStore {
    pool: DatabasePool,
}

impl FundReportStore {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    /// Persist one parsed report; returns the `fund_reports` row id.
    ///
    /// Idempotent on `(fund_code, report_period_end, report_type)`: the same
    /// report persisted twice keeps one parent row and one set of children.
    pub async fn save(&self, report: &ParsedFundReport) -> IngestResult<Uuid> {
        let out_of_range = report
            .top_holdings
            .iter()
            .map(|h| &h.net_value_ratio)
            .chain(report.asset_allocations.iter().map(|a| &a.net_value_ratio))
            .chain(
                report
                    .industry_allocations
                    .iter()
                    .map(|i| &i.net_value_ratio),
            )
            .find(|r| !ratio_in_range(r));
        if let Some(ratio) = out_of_range {
            return Err(IngestError::DbConstraint(format!(
                "net value ratio {} outside [0, 1]",
                ratio
            )));
        }

        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| IngestError::DbTransport(format!("failed to get connection: {}", e)))?;

        let report = report.clone();
        let report_id = conn
            .transaction::<Uuid, IngestError, _>(|conn| {
                async move {
                    let now = Utc::now();
                    let parent = FundReport {
                        id: Uuid::new_v4(),
                        fund_code: report.fund_code.clone(),
                        fund_name: report.fund_name.clone(),
                        fund_manager: report.fund_manager.clone(),
                        report_type: report.report_type,
                        report_period_start: report.report_period_start,
                        report_period_end: report.report_period_end,
                        net_asset_value: report.net_asset_value.clone(),
                        total_net_assets: report.total_net_assets.clone(),
                        period_profit: report.period_profit.clone(),
                        parser_kind: report.parser_kind,
                        taxonomy_version: report.taxonomy_version.clone(),
                        confidence: report.confidence.clone(),
                        created_at: now,
                        reparsed_at: None,
                    };

                    let report_id: Uuid = diesel::insert_into(fund_reports::table)
                        .values(&parent)
                        .on_conflict((
                            fund_reports::fund_code,
                            fund_reports::report_period_end,
                            fund_reports::report_type,
                        ))
                        .do_update()
                        .set((
                            fund_reports::fund_name.eq(excluded(fund_reports::fund_name)),
                            fund_reports::fund_manager.eq(excluded(fund_reports::fund_manager)),
                            fund_reports::report_period_start
                                .eq(excluded(fund_reports::report_period_start)),
                            fund_reports::net_asset_value
                                .eq(excluded(fund_reports::net_asset_value)),
                            fund_reports::total_net_assets
                                .eq(excluded(fund_reports::total_net_assets)),
                            fund_reports::period_profit.eq(excluded(fund_reports::period_profit)),
                            fund_reports::parser_kind.eq(excluded(fund_reports::parser_kind)),
                            fund_reports::taxonomy_version
                                .eq(excluded(fund_reports::taxonomy_version)),
                            fund_reports::confidence.eq(excluded(fund_reports::confidence)),
                            fund_reports::reparsed_at.eq(now),
                        ))
                        .returning(fund_reports::id)
                        .get_result(conn)
                        .await?;

                    // Children are replaced as a unit on every (re)parse.
                    diesel::delete(
                        asset_allocations::table
                            .filter(asset_allocations::fund_report_id.eq(report_id)),
                    )
                    .execute(conn)
                    .await?;
                    diesel::delete(
                        top_holdings::table.filter(top_holdings::fund_report_id.eq(report_id)),
                    )
                    .execute(conn)
                    .await?;
                    diesel::delete(
                        industry_allocations::table
                            .filter(industry_allocations::fund_report_id.eq(report_id)),
                    )
                    .execute(conn)
                    .await?;

                    let asset_rows: Vec<AssetAllocationRow> = report
                        .asset_allocations
                        .iter()
                        .map(|a| AssetAllocationRow {
                            id: Uuid::new_v4(),
                            fund_report_id: report_id,
                            asset_type: a.asset_type.clone(),
                            asset_subtype: a.asset_subtype.clone(),
                            market_value: a.market_value.clone(),
                            net_value_ratio: a.net_value_ratio.clone(),
                        })
                        .collect();
                    if !asset_rows.is_empty() {
                        diesel::insert_into(asset_allocations::table)
                            .values(&asset_rows)
                            .execute(conn)
                            .await?;
                    }

                    let holding_rows: Vec<TopHoldingRow> = report
                        .top_holdings
                        .iter()
                        .map(|h| TopHoldingRow {
                            id: Uuid::new_v4(),
                            fund_report_id: report_id,
                            rank: h.rank,
                            security_code: h.security_code.clone(),
                            security_name: h.security_name.clone(),
                            shares: h.shares,
                            market_value: h.market_value.clone(),
                            net_value_ratio: h.net_value_ratio.clone(),
                        })
                        .collect();
                    if !holding_rows.is_empty() {
                        diesel::insert_into(top_holdings::table)
                            .values(&holding_rows)
                            .execute(conn)
                            .await?;
                    }

                    let industry_rows: Vec<IndustryAllocationRow> = report
                        .industry_allocations
                        .iter()
                        .map(|i| IndustryAllocationRow {
                            id: Uuid::new_v4(),
                            fund_report_id: report_id,
                            industry_name: i.industry_name.clone(),
                            market_value: i.market_value.clone(),
                            net_value_ratio: i.net_value_ratio.clone(),
                        })
                        .collect();
                    if !industry_rows.is_empty() {
                        diesel::insert_into(industry_allocations::table)
                            .values(&industry_rows)
                            .execute(conn)
                            .await?;
                    }

                    Ok(report_id)
                }
                .scope_boxed()
            })
            .await?;

        debug!(%report_id, "fund report persisted");
        Ok(report_id)
    }

    /// Look a persisted report up by its natural key.
    pub async fn find_by_natural_key(
        &self,
        fund_code: &str,
        report_period_end: chrono::NaiveDate,
        report_type: fund_report_core::enums::ReportType,
    ) -> IngestResult<Option<FundReport>> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| IngestError::DbTransport(format!("failed to get connection: {}", e)))?;

        let row = fund_reports::table
            .filter(fund_reports::fund_code.eq(fund_code))
            .filter(fund_reports::report_period_end.eq(report_period_end))
            .filter(fund_reports::report_type.eq(report_type))
            .first::<FundReport>(&mut conn)
            .await
            .optional()?;
        Ok(row)
    }

    /// Child row counts for one report, in schema order.
    pub async fn child_counts(&self, report_id: Uuid) -> IngestResult<(i64, i64, i64)> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| IngestError::DbTransport(format!("failed to get connection: {}", e)))?;

        let assets: i64 = asset_allocations::table
            .filter(asset_allocations::fund_report_id.eq(report_id))
            .count()
            .get_result(&mut conn)
            .await?;
        let holdings: i64 = top_holdings::table
            .filter(top_holdings::fund_report_id.eq(report_id))
            .count()
            .get_result(&mut conn)
            .await?;
        let industries: i64 = industry_allocations::table
            .filter(industry_allocations::fund_report_id.eq(report_id))
            .count()
            .get_result(&mut conn)
            .await?;
        Ok((assets, holdings, industries))
    }
}

// Same bound as the CHECK constraints on the child tables.
pub(crate) fn ratio_in_range(ratio: &BigDecimal) -> bool {
    *ratio >= BigDecimal::from(0) && *ratio <= BigDecimal::from(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn ratio_range_guard() {
        assert!(ratio_in_range(&BigDecimal::from_str("0").unwrap()));
        assert!(ratio_in_range(&BigDecimal::from_str("0.5961").unwrap()));
        assert!(ratio_in_range(&BigDecimal::from_str("1").unwrap()));
        assert!(!ratio_in_range(&BigDecimal::from_str("1.01").unwrap()));
        assert!(!ratio_in_range(&BigDecimal::from_str("-0.01").unwrap()));
    }
}
