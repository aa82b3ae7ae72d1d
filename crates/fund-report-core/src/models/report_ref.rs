use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// **Report Reference**
///
/// One row of the portal's report listing: everything needed to identify and
/// later fetch a single uploaded report instance.
///
/// `upload_info_id` is the portal's opaque handle; it is the only key the
/// download endpoint understands and the key per-item task outcomes are
/// recorded under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportRef {
    /// Opaque portal handle for the uploaded instance.
    pub upload_info_id: String,

    /// Six-digit fund code.
    pub fund_code: String,

    /// Short display name of the fund.
    pub fund_short_name: String,

    /// Fund management company name.
    pub organization_name: String,

    /// Date the report was uploaded to the portal.
    pub report_send_date: NaiveDate,

    /// Portal description of the report, e.g. "XX基金2024年年度报告".
    pub report_desc: String,
}

impl ReportRef {
    /// A filesystem-safe artifact filename derived from the reference.
    ///
    /// The portal's descriptions routinely contain characters that are
    /// hostile to paths (slashes, colons, whitespace runs).
    pub fn artifact_filename(&self) -> String {
        let desc: String = self
            .report_desc
            .chars()
            .map(|c| match c {
                '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
                c if c.is_whitespace() => '_',
                c => c,
            })
            .take(60)
            .collect();
        format!("{}_{}_{}.xml", self.fund_code, self.upload_info_id, desc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ReportRef {
        ReportRef {
            upload_info_id: "19052421".to_string(),
            fund_code: "000001".to_string(),
            fund_short_name: "华夏成长".to_string(),
            organization_name: "华夏基金管理有限公司".to_string(),
            report_send_date: NaiveDate::from_ymd_opt(2024, 3, 29).unwrap(),
            report_desc: "华夏成长混合2024年年度报告".to_string(),
        }
    }

    #[test]
    fn artifact_filename_is_path_safe() {
        let mut r = sample();
        r.report_desc = "恶意/名称: 报告*?".to_string();
        let name = r.artifact_filename();
        assert!(!name.contains('/'));
        assert!(!name.contains(':'));
        assert!(!name.contains('*'));
        assert!(name.starts_with("000001_19052421_"));
        assert!(name.ends_with(".xml"));
    }

    #[test]
    fn refs_round_trip_as_plain_data() {
        let r = sample();
        let json = serde_json::to_string(&r).unwrap();
        let back: ReportRef = serde_json::from_str(&json).unwrap();
        assert_eq!(back, r);
    }
}
