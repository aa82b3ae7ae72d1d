//! Portal and pipeline enumerations.
//!
//! The portal codes carried by `ReportType` and `FundType` are the wire
//! contract with the disclosure portal and must not be altered. This module
//! is the single source of truth for them; no other crate hardcodes a code.

use std::io::Write;
use std::str::FromStr;

use diesel::deserialize::{self, FromSql, FromSqlRow};
use diesel::expression::AsExpression;
use diesel::pg::{Pg, PgValue};
use diesel::serialize::{self, IsNull, Output, ToSql};
use diesel::sql_types::Text;
use serde::{Deserialize, Serialize};

/// Periodic report categories published on the disclosure portal.
///
/// Each member is bound to the portal's `reportTypeCode` value.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsExpression, FromSqlRow,
)]
#[diesel(sql_type = Text)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReportType {
    Annual,
    SemiAnnual,
    Q1,
    Q2,
    Q3,
    Q4,
    FundProfile,
}

impl ReportType {
    /// The portal's `reportTypeCode` for this report type.
    pub fn portal_code(&self) -> &'static str {
        match self {
            ReportType::Annual => "FB010010",
            ReportType::SemiAnnual => "FB020010",
            ReportType::Q1 => "FB030010",
            ReportType::Q2 => "FB030020",
            ReportType::Q3 => "FB030030",
            ReportType::Q4 => "FB030040",
            ReportType::FundProfile => "FB040010",
        }
    }

    /// Stable identifier used for persistence and serde.
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportType::Annual => "ANNUAL",
            ReportType::SemiAnnual => "SEMI_ANNUAL",
            ReportType::Q1 => "Q1",
            ReportType::Q2 => "Q2",
            ReportType::Q3 => "Q3",
            ReportType::Q4 => "Q4",
            ReportType::FundProfile => "FUND_PROFILE",
        }
    }

    /// Whether the portal's `reportYear` field is mandatory for this type.
    ///
    /// Fund profiles are the only report kind searchable without a year.
    pub fn requires_year(&self) -> bool {
        !matches!(self, ReportType::FundProfile)
    }

    /// Best-effort classification of a portal report description.
    ///
    /// Used only as the documented fallback when the instance document
    /// carries no document-type concept. Never inferred from dates.
    pub fn from_report_desc(desc: &str) -> Option<ReportType> {
        // Order matters: "半年度" contains "年度".
        if desc.contains("半年度") {
            Some(ReportType::SemiAnnual)
        } else if desc.contains("年度报告") || desc.contains("年报") {
            Some(ReportType::Annual)
        } else if desc.contains("第一季度") || desc.contains("1季度") {
            Some(ReportType::Q1)
        } else if desc.contains("第二季度") || desc.contains("2季度") {
            Some(ReportType::Q2)
        } else if desc.contains("第三季度") || desc.contains("3季度") {
            Some(ReportType::Q3)
        } else if desc.contains("第四季度") || desc.contains("4季度") {
            Some(ReportType::Q4)
        } else if desc.contains("概况") || desc.contains("基本信息") {
            Some(ReportType::FundProfile)
        } else {
            None
        }
    }
}

impl FromStr for ReportType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ANNUAL" => Ok(ReportType::Annual),
            "SEMI_ANNUAL" => Ok(ReportType::SemiAnnual),
            "Q1" => Ok(ReportType::Q1),
            "Q2" => Ok(ReportType::Q2),
            "Q3" => Ok(ReportType::Q3),
            "Q4" => Ok(ReportType::Q4),
            "FUND_PROFILE" => Ok(ReportType::FundProfile),
            other => Err(format!("unknown report type: {}", other)),
        }
    }
}

impl ToSql<Text, Pg> for ReportType {
    fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Pg>) -> serialize::Result {
        out.write_all(self.as_str().as_bytes())?;
        Ok(IsNull::No)
    }
}

impl FromSql<Text, Pg> for ReportType {
    fn from_sql(bytes: PgValue<'_>) -> deserialize::Result<Self> {
        let s = std::str::from_utf8(bytes.as_bytes())?;
        ReportType::from_str(s).map_err(Into::into)
    }
}

/// Fund categories recognized by the portal's advanced search.
///
/// Each member is bound to the portal's `fundType` value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FundType {
    Stock,
    Mixed,
    Bond,
    Money,
    Qdii,
    Fof,
    Infrastructure,
    Commodity,
}

impl FundType {
    /// The portal's `fundType` form value.
    pub fn portal_code(&self) -> &'static str {
        match self {
            FundType::Stock => "6020-6010",
            FundType::Mixed => "6020-6020",
            FundType::Bond => "6020-6030",
            FundType::Money => "6020-6040",
            FundType::Qdii => "6020-6050",
            FundType::Fof => "6020-6060",
            FundType::Infrastructure => "6020-6070",
            FundType::Commodity => "6020-6080",
        }
    }
}

/// Which extraction path produced a parsed report.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsExpression, FromSqlRow,
)]
#[diesel(sql_type = Text)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ParserKind {
    Xbrl,
    Ixbrl,
    Html,
    Llm,
}

impl ParserKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParserKind::Xbrl => "XBRL",
            ParserKind::Ixbrl => "IXBRL",
            ParserKind::Html => "HTML",
            ParserKind::Llm => "LLM",
        }
    }
}

impl FromStr for ParserKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "XBRL" => Ok(ParserKind::Xbrl),
            "IXBRL" => Ok(ParserKind::Ixbrl),
            "HTML" => Ok(ParserKind::Html),
            "LLM" => Ok(ParserKind::Llm),
            other => Err(format!("unknown parser kind: {}", other)),
        }
    }
}

impl ToSql<Text, Pg> for ParserKind {
    fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Pg>) -> serialize::Result {
        out.write_all(self.as_str().as_bytes())?;
        Ok(IsNull::No)
    }
}

impl FromSql<Text, Pg> for ParserKind {
    fn from_sql(bytes: PgValue<'_>) -> deserialize::Result<Self> {
        let s = std::str::from_utf8(bytes.as_bytes())?;
        ParserKind::from_str(s).map_err(Into::into)
    }
}

/// Lifecycle of a batch download task.
///
/// A task transitions `Pending -> Running`, then terminally to one of
/// `Completed`, `Failed`, `Partial` or `Cancelled`. `Cancelling` is the
/// cooperative in-between state while in-flight chains drain.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsExpression, FromSqlRow,
)]
#[diesel(sql_type = Text)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    Running,
    Cancelling,
    Completed,
    Failed,
    Partial,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::Running => "RUNNING",
            TaskStatus::Cancelling => "CANCELLING",
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::Failed => "FAILED",
            TaskStatus::Partial => "PARTIAL",
            TaskStatus::Cancelled => "CANCELLED",
        }
    }

    /// Terminal states are written exactly once and never leave.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Partial | TaskStatus::Cancelled
        )
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(TaskStatus::Pending),
            "RUNNING" => Ok(TaskStatus::Running),
            "CANCELLING" => Ok(TaskStatus::Cancelling),
            "COMPLETED" => Ok(TaskStatus::Completed),
            "FAILED" => Ok(TaskStatus::Failed),
            "PARTIAL" => Ok(TaskStatus::Partial),
            "CANCELLED" => Ok(TaskStatus::Cancelled),
            other => Err(format!("unknown task status: {}", other)),
        }
    }
}

impl ToSql<Text, Pg> for TaskStatus {
    fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Pg>) -> serialize::Result {
        out.write_all(self.as_str().as_bytes())?;
        Ok(IsNull::No)
    }
}

impl FromSql<Text, Pg> for TaskStatus {
    fn from_sql(bytes: PgValue<'_>) -> deserialize::Result<Self> {
        let s = std::str::from_utf8(bytes.as_bytes())?;
        TaskStatus::from_str(s).map_err(Into::into)
    }
}

/// Per-report progress inside a batch task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ItemStatus {
    Pending,
    Downloaded,
    Parsed,
    Persisted,
    Failed,
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn portal_codes_are_frozen() {
        assert_eq!(ReportType::Annual.portal_code(), "FB010010");
        assert_eq!(ReportType::SemiAnnual.portal_code(), "FB020010");
        assert_eq!(ReportType::Q1.portal_code(), "FB030010");
        assert_eq!(ReportType::Q2.portal_code(), "FB030020");
        assert_eq!(ReportType::Q3.portal_code(), "FB030030");
        assert_eq!(ReportType::Q4.portal_code(), "FB030040");
        assert_eq!(ReportType::FundProfile.portal_code(), "FB040010");

        assert_eq!(FundType::Stock.portal_code(), "6020-6010");
        assert_eq!(FundType::Mixed.portal_code(), "6020-6020");
        assert_eq!(FundType::Bond.portal_code(), "6020-6030");
        assert_eq!(FundType::Money.portal_code(), "6020-6040");
        assert_eq!(FundType::Qdii.portal_code(), "6020-6050");
        assert_eq!(FundType::Fof.portal_code(), "6020-6060");
        assert_eq!(FundType::Infrastructure.portal_code(), "6020-6070");
        assert_eq!(FundType::Commodity.portal_code(), "6020-6080");
    }

    #[test]
    fn only_fund_profile_is_searchable_without_a_year() {
        assert!(ReportType::Annual.requires_year());
        assert!(ReportType::Q3.requires_year());
        assert!(!ReportType::FundProfile.requires_year());
    }

    #[test]
    fn report_desc_classification_prefers_semi_annual_over_annual() {
        assert_eq!(
            ReportType::from_report_desc("易方达蓝筹精选2024年半年度报告"),
            Some(ReportType::SemiAnnual)
        );
        assert_eq!(
            ReportType::from_report_desc("易方达蓝筹精选2024年年度报告"),
            Some(ReportType::Annual)
        );
        assert_eq!(
            ReportType::from_report_desc("2024年第一季度报告"),
            Some(ReportType::Q1)
        );
        assert_eq!(ReportType::from_report_desc("无关描述"), None);
    }

    #[test]
    fn status_round_trips_and_terminality() {
        for status in [
            TaskStatus::Pending,
            TaskStatus::Running,
            TaskStatus::Cancelling,
            TaskStatus::Completed,
            TaskStatus::Failed,
            TaskStatus::Partial,
            TaskStatus::Cancelled,
        ] {
            assert_eq!(TaskStatus::from_str(status.as_str()).unwrap(), status);
        }
        assert!(!TaskStatus::Running.is_terminal());
        assert!(!TaskStatus::Cancelling.is_terminal());
        assert!(TaskStatus::Partial.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
    }
}
