//! Portal client: report listing and download-URL resolution.
//!
//! The listing endpoint is a legacy DataTables server: it expects a single
//! form field `aoData` holding a JSON array of name/value pairs, and it
//! silently caps pages at 20 rows. The field set and its spelling are the
//! contract with the portal; absent optionals travel as empty strings, not
//! as omitted fields.

use std::time::Duration;

use chrono::NaiveDate;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use fund_report_core::config::PortalConfig;
use fund_report_core::error::{IngestError, IngestResult};
use fund_report_core::models::ReportRef;

use crate::criteria::SearchCriteria;
use crate::rate_limiter::PortalRateLimiter;

/// One name/value pair of the `aoData` array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AoField {
    pub name: String,
    pub value: String,
}

impl AoField {
    fn new(name: &str, value: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            value: value.into(),
        }
    }
}

/// Result page of a report search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchPage {
    pub rows: Vec<ReportRef>,
    pub has_next: bool,
    pub total_records: u64,
}

/// Compose the exact `aoData` field set for one search.
///
/// Field names, their order and the empty-string encoding of absent
/// optionals are frozen by the portal contract. Chinese text fields are
/// percent-encoded UTF-8.
pub fn build_ao_data(criteria: &SearchCriteria) -> Vec<AoField> {
    let display_start = (criteria.page - 1) * criteria.page_size;
    let report_year = match criteria.year {
        Some(year) if criteria.report_type.requires_year() => year.to_string(),
        _ => String::new(),
    };
    let encode_zh = |s: &Option<String>| {
        s.as_deref()
            .map(|v| urlencoding::encode(v).into_owned())
            .unwrap_or_default()
    };
    let date_str = |d: &Option<NaiveDate>| {
        d.map(|v| v.format("%Y-%m-%d").to_string())
            .unwrap_or_default()
    };

    vec![
        AoField::new("sEcho", criteria.page.to_string()),
        AoField::new("iColumns", "6"),
        AoField::new("sColumns", ",,,,,"),
        AoField::new("iDisplayStart", display_start.to_string()),
        AoField::new("iDisplayLength", criteria.page_size.to_string()),
        AoField::new("mDataProp_0", "fundCode"),
        AoField::new("mDataProp_1", "fundId"),
        AoField::new("mDataProp_2", "organName"),
        AoField::new("mDataProp_3", "reportSendDate"),
        AoField::new("mDataProp_4", "reportDesp"),
        AoField::new("mDataProp_5", "uploadInfoId"),
        AoField::new(
            "fundType",
            criteria
                .fund_type
                .map(|t| t.portal_code().to_string())
                .unwrap_or_default(),
        ),
        AoField::new("reportTypeCode", criteria.report_type.portal_code()),
        AoField::new("reportYear", report_year),
        AoField::new(
            "fundCompanyShortName",
            encode_zh(&criteria.fund_company_short_name),
        ),
        AoField::new("fundCode", criteria.fund_code.clone().unwrap_or_default()),
        AoField::new("fundShortName", encode_zh(&criteria.fund_short_name)),
        AoField::new("startUploadDate", date_str(&criteria.upload_date_range.0)),
        AoField::new("endUploadDate", date_str(&criteria.upload_date_range.1)),
    ]
}

/// **Portal Client**
///
/// HTTP client for the disclosure portal's list endpoint and the
/// authoritative instance download endpoint. All listing traffic is paced by
/// the in-process rate limiter.
pub struct PortalClient {
    client: Client,
    limiter: PortalRateLimiter,
    config: PortalConfig,
}

impl PortalClient {
    pub fn new(config: PortalConfig) -> IngestResult<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&config.user_agent)
                .map_err(|e| IngestError::Internal(format!("invalid user agent: {}", e)))?,
        );

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| IngestError::Internal(format!("failed to build HTTP client: {}", e)))?;

        let limiter =
            PortalRateLimiter::new(Duration::from_millis(config.min_request_interval_ms));

        Ok(Self {
            client,
            limiter,
            config,
        })
    }

    /// List report references matching validated criteria.
    ///
    /// `has_next` is derived from the portal's `iTotalRecords` counter.
    pub async fn list_reports(&self, criteria: &SearchCriteria) -> IngestResult<SearchPage> {
        criteria.validate()?;

        let ao_data = serde_json::to_string(&build_ao_data(criteria))
            .map_err(|e| IngestError::Internal(format!("failed to encode aoData: {}", e)))?;

        self.limiter.wait_for_permit().await;
        debug!(page = criteria.page, "listing reports");

        let response = self
            .client
            .post(&self.config.list_url)
            .form(&[("aoData", ao_data.as_str())])
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(IngestError::Portal {
                status: status.as_u16(),
                snippet: snippet(&body),
            });
        }

        let parsed: ListResponse =
            serde_json::from_str(&body).map_err(|_| IngestError::Portal {
                status: status.as_u16(),
                snippet: snippet(&body),
            })?;

        let mut rows = Vec::with_capacity(parsed.aa_data.len());
        for raw in parsed.aa_data {
            match raw.into_report_ref() {
                Ok(r) => rows.push(r),
                Err(e) => warn!("skipping malformed portal row: {}", e),
            }
        }

        let seen = u64::from(criteria.page) * u64::from(criteria.page_size);
        Ok(SearchPage {
            has_next: parsed.i_total_records > seen,
            total_records: parsed.i_total_records,
            rows,
        })
    }

    /// The authoritative download URL for an uploaded report instance.
    ///
    /// Only `instance_html_view.do` is valid here; the portal's legacy
    /// `downloadFile.do` endpoint must never be used.
    pub fn resolve_download_url(&self, upload_info_id: &str) -> String {
        format!(
            "{}?instanceid={}",
            self.config.instance_base, upload_info_id
        )
    }
}

fn snippet(body: &str) -> String {
    body.chars().take(200).collect()
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(rename = "iTotalRecords", default)]
    i_total_records: u64,
    #[serde(rename = "aaData", default)]
    aa_data: Vec<PortalRow>,
}

/// Raw listing row. The server names columns after its DataTables
/// `mDataProp` properties, with `fundId` doubling as the fund short name on
/// older deployments; both spellings are accepted.
#[derive(Debug, Deserialize)]
struct PortalRow {
    #[serde(rename = "fundCode", deserialize_with = "string_or_number", default)]
    fund_code: String,
    #[serde(rename = "fundShortName", alias = "fundId", default)]
    fund_short_name: String,
    #[serde(rename = "organName", default)]
    organ_name: String,
    #[serde(rename = "reportSendDate", default)]
    report_send_date: String,
    #[serde(rename = "reportDesp", default)]
    report_desp: String,
    #[serde(
        rename = "uploadInfoId",
        deserialize_with = "string_or_number",
        default
    )]
    upload_info_id: String,
}

impl PortalRow {
    fn into_report_ref(self) -> Result<ReportRef, String> {
        if self.upload_info_id.is_empty() {
            return Err("row without uploadInfoId".to_string());
        }
        let date_part: String = self.report_send_date.chars().take(10).collect();
        let report_send_date = NaiveDate::parse_from_str(&date_part, "%Y-%m-%d")
            .map_err(|e| format!("bad reportSendDate {:?}: {}", self.report_send_date, e))?;
        Ok(ReportRef {
            upload_info_id: self.upload_info_id,
            fund_code: self.fund_code,
            fund_short_name: self.fund_short_name,
            organization_name: self.organ_name,
            report_send_date,
            report_desc: self.report_desp,
        })
    }
}

/// The portal is inconsistent about numeric ids: some deployments send them
/// as JSON numbers, others as strings.
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    match value {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        serde_json::Value::Null => Ok(String::new()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, got {}",
            other
        ))),
    }
}
