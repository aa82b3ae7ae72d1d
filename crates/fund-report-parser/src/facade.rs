//! Parser facade: detection, routing and ordered fallback.
//!
//! Routing order is fixed: an iXBRL container is unwrapped and fed to the
//! XBRL path, a bare XBRL instance goes there directly, anything else (or
//! any failure upstream) falls back to the HTML table parser, and an
//! optional LLM extractor gets the last word when one is installed. Every
//! attempt is recorded with its outcome so a failed parse explains itself.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use fund_report_core::config::TaxonomyConfig;
use fund_report_core::enums::ParserKind;
use fund_report_core::error::{IngestError, IngestResult};
use fund_report_core::models::ParsedFundReport;

use crate::detector::{detect, DetectedFormat};
use crate::html;
use crate::ixbrl;
use crate::mapper::ConceptMapper;
use crate::mapping::ConceptMappingsConfig;
use crate::taxonomy::TaxonomyManager;
use crate::xbrl;

/// One routing attempt and how it ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseAttempt {
    pub kind: ParserKind,
    pub outcome: String,
}

/// Outcome of routing one artifact through the parser engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ParseResult {
    Success {
        report: ParsedFundReport,
        attempts: Vec<ParseAttempt>,
    },
    Failure {
        attempts: Vec<ParseAttempt>,
    },
}

impl ParseResult {
    pub fn is_success(&self) -> bool {
        matches!(self, ParseResult::Success { .. })
    }

    pub fn report(&self) -> Option<&ParsedFundReport> {
        match self {
            ParseResult::Success { report, .. } => Some(report),
            ParseResult::Failure { .. } => None,
        }
    }

    pub fn attempts(&self) -> &[ParseAttempt] {
        match self {
            ParseResult::Success { attempts, .. } | ParseResult::Failure { attempts } => attempts,
        }
    }

    /// Collapse a failure into the item-level error recorded on the task.
    pub fn into_report(self) -> IngestResult<ParsedFundReport> {
        match self {
            ParseResult::Success { report, .. } => Ok(report),
            ParseResult::Failure { attempts } => {
                let tried: Vec<String> = attempts
                    .iter()
                    .map(|a| format!("{}: {}", a.kind.as_str(), a.outcome))
                    .collect();
                Err(IngestError::Parse(format!(
                    "all parser paths failed [{}]",
                    tried.join("; ")
                )))
            }
        }
    }
}

/// Extractor of last resort. Not shipped in v1; the facade keeps the slot
/// in its fallback order for deployments that install one.
pub trait LlmExtractor: Send + Sync {
    fn extract(&self, bytes: &[u8], desc_hint: Option<&str>) -> IngestResult<ParsedFundReport>;
}

/// **Fund Report Parser**
///
/// The parser engine behind `parse_file`: format detection plus the ordered
/// extractor chain, with concept mappings and taxonomies resolved per
/// version. Parsing is synchronous CPU work; async callers run it on a
/// blocking worker.
pub struct FundReportParser {
    taxonomies: TaxonomyManager,
    mappings: HashMap<String, ConceptMappingsConfig>,
    default_version: String,
    llm: Option<Arc<dyn LlmExtractor>>,
}

impl FundReportParser {
    pub fn new(config: &TaxonomyConfig) -> Self {
        let mappings = ConceptMappingsConfig::load_dir(Path::new(&config.mappings_dir));
        Self {
            taxonomies: TaxonomyManager::new(config),
            mappings,
            default_version: config.default_version.clone(),
            llm: None,
        }
    }

    /// Install an extractor of last resort.
    pub fn with_llm(mut self, llm: Arc<dyn LlmExtractor>) -> Self {
        self.llm = Some(llm);
        self
    }

    /// Parse an artifact from disk.
    pub fn parse_file(&self, path: &Path, desc_hint: Option<&str>) -> ParseResult {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) => {
                return ParseResult::Failure {
                    attempts: vec![ParseAttempt {
                        kind: ParserKind::Xbrl,
                        outcome: format!("cannot read {}: {}", path.display(), e),
                    }],
                }
            }
        };
        self.parse_bytes(&bytes, path.to_str(), desc_hint)
    }

    /// Route raw artifact bytes through the extractor chain.
    pub fn parse_bytes(
        &self,
        bytes: &[u8],
        path_hint: Option<&str>,
        desc_hint: Option<&str>,
    ) -> ParseResult {
        let detection = detect(bytes, path_hint);
        debug!(format = ?detection.format, confidence = detection.confidence, "artifact detected");

        let mut attempts: Vec<ParseAttempt> = Vec::new();

        if detection.format == DetectedFormat::Ixbrl {
            match ixbrl::extract(bytes) {
                Some(xml) => match self.try_xbrl(&xml, desc_hint) {
                    Ok(report) => {
                        attempts.push(ParseAttempt {
                            kind: ParserKind::Ixbrl,
                            outcome: "ok: unwrapped embedded instance".to_string(),
                        });
                        return ParseResult::Success { report, attempts };
                    }
                    Err(e) => attempts.push(ParseAttempt {
                        kind: ParserKind::Ixbrl,
                        outcome: e.to_string(),
                    }),
                },
                None => attempts.push(ParseAttempt {
                    kind: ParserKind::Ixbrl,
                    outcome: "no embedded xbrl subtree".to_string(),
                }),
            }
        }

        if detection.format == DetectedFormat::Xbrl {
            match self.try_xbrl(bytes, desc_hint) {
                Ok(report) => {
                    attempts.push(ParseAttempt {
                        kind: ParserKind::Xbrl,
                        outcome: "ok".to_string(),
                    });
                    return ParseResult::Success { report, attempts };
                }
                Err(e) => attempts.push(ParseAttempt {
                    kind: ParserKind::Xbrl,
                    outcome: e.to_string(),
                }),
            }
        }

        match html::parse_html(bytes, desc_hint) {
            Ok(report) => {
                attempts.push(ParseAttempt {
                    kind: ParserKind::Html,
                    outcome: "ok".to_string(),
                });
                return ParseResult::Success { report, attempts };
            }
            Err(e) => attempts.push(ParseAttempt {
                kind: ParserKind::Html,
                outcome: e.to_string(),
            }),
        }

        if let Some(llm) = &self.llm {
            match llm.extract(bytes, desc_hint) {
                Ok(mut report) => {
                    report.parser_kind = ParserKind::Llm;
                    let cap = BigDecimal::from(6) / BigDecimal::from(10);
                    if report.confidence > cap {
                        report.confidence = cap;
                    }
                    attempts.push(ParseAttempt {
                        kind: ParserKind::Llm,
                        outcome: "ok".to_string(),
                    });
                    return ParseResult::Success { report, attempts };
                }
                Err(e) => attempts.push(ParseAttempt {
                    kind: ParserKind::Llm,
                    outcome: e.to_string(),
                }),
            }
        }

        warn!(
            attempts = attempts.len(),
            "artifact exhausted every parser path"
        );
        ParseResult::Failure { attempts }
    }

    /// XBRL path: extract facts, pick the taxonomy version, map concepts.
    fn try_xbrl(&self, bytes: &[u8], desc_hint: Option<&str>) -> IngestResult<ParsedFundReport> {
        let doc = xbrl::extract_facts(bytes)?;
        if doc.facts.is_empty() {
            return Err(IngestError::Parse("instance carries no facts".to_string()));
        }

        let version = self.taxonomies.select_version(doc.schema_ref.as_deref());
        let taxonomy = match self.taxonomies.load(&version) {
            Ok(taxonomy) => Some(taxonomy),
            Err(e) => {
                debug!(version, "proceeding without taxonomy: {}", e);
                None
            }
        };

        let mapping = self
            .mappings
            .get(&version)
            .or_else(|| self.mappings.get(&self.default_version))
            .ok_or_else(|| {
                IngestError::Parse(format!("no concept mapping for taxonomy version {}", version))
            })?;

        let mapper = ConceptMapper::new(mapping, taxonomy.as_deref());
        let mut report = mapper.map_document(&doc, desc_hint)?;
        report.taxonomy_version = Some(version);
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::TEST_MAPPING_JSON;
    use fund_report_core::enums::ReportType;

    const XBRL_INSTANCE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<xbrl xmlns="http://www.xbrl.org/2003/instance"
      xmlns:link="http://www.xbrl.org/2003/linkbase"
      xmlns:xlink="http://www.w3.org/1999/xlink"
      xmlns:cn="http://csrc.example/fund">
  <link:schemaRef xlink:type="simple" xlink:href="http://csrc.example/taxonomy/csrc_v2.1/fund.xsd"/>
  <context id="c_dur">
    <entity><identifier scheme="http://csrc.example">000001</identifier></entity>
    <period><startDate>2024-01-01</startDate><endDate>2024-12-31</endDate></period>
  </context>
  <cn:FundCode contextRef="c_dur">000001</cn:FundCode>
  <cn:FundName contextRef="c_dur">华夏成长混合</cn:FundName>
  <cn:ReportTypeCode contextRef="c_dur">FB010010</cn:ReportTypeCode>
  <cn:ReportPeriodEndDate contextRef="c_dur">2024-12-31</cn:ReportPeriodEndDate>
</xbrl>"#;

    fn parser_with_mapping(dir: &std::path::Path) -> FundReportParser {
        let mappings_dir = dir.join("mappings");
        std::fs::create_dir_all(&mappings_dir).unwrap();
        std::fs::write(mappings_dir.join("csrc_v2.1.json"), TEST_MAPPING_JSON).unwrap();

        let mut config = TaxonomyConfig::default();
        config.root_dir = dir.join("taxonomies").to_string_lossy().into_owned();
        config.mappings_dir = mappings_dir.to_string_lossy().into_owned();
        config.default_version = "csrc_v2.1".to_string();
        FundReportParser::new(&config)
    }

    #[test]
    fn xbrl_artifacts_take_the_xbrl_path() {
        let dir = tempfile::tempdir().unwrap();
        let parser = parser_with_mapping(dir.path());

        let result = parser.parse_bytes(XBRL_INSTANCE.as_bytes(), Some("r.xml"), None);
        let report = result.report().expect("success");
        assert_eq!(report.parser_kind, ParserKind::Xbrl);
        assert_eq!(report.taxonomy_version.as_deref(), Some("csrc_v2.1"));
        assert_eq!(report.report_type, ReportType::Annual);
        assert_eq!(result.attempts().len(), 1);
        assert_eq!(result.attempts()[0].kind, ParserKind::Xbrl);
    }

    #[test]
    fn ixbrl_containers_are_unwrapped_onto_the_xbrl_path() {
        let dir = tempfile::tempdir().unwrap();
        let parser = parser_with_mapping(dir.path());

        let container = format!(
            "<html xmlns:ix=\"http://www.xbrl.org/2013/inlineXBRL\"><body><div style=\"display:none\">{}</div></body></html>",
            XBRL_INSTANCE.replace("<?xml version=\"1.0\" encoding=\"UTF-8\"?>", "")
        );
        let result = parser.parse_bytes(container.as_bytes(), Some("r.html"), None);
        let report = result.report().expect("success");
        // The report itself is XBRL-extracted; the attempt records the
        // unwrap route.
        assert_eq!(report.parser_kind, ParserKind::Xbrl);
        assert_eq!(result.attempts()[0].kind, ParserKind::Ixbrl);
    }

    #[test]
    fn failed_xbrl_mapping_falls_back_to_html() {
        let dir = tempfile::tempdir().unwrap();
        let parser = parser_with_mapping(dir.path());

        // iXBRL island with no usable facts, but valid HTML tables around it.
        let artifact = r#"<html xmlns:ix="http://www.xbrl.org/2013/inlineXBRL">
<head><title>测试基金2024年年度报告</title></head>
<body>
<p>报告期：2024年1月1日至2024年12月31日</p>
<div style="display:none"><xbrl xmlns="http://www.xbrl.org/2003/instance"><context id="c"><entity><identifier scheme="s">x</identifier></entity><period><instant>2024-12-31</instant></period></context></xbrl></div>
<table><tr><td>基金主代码</td><td>000009</td></tr><tr><td>基金名称</td><td>测试基金</td></tr></table>
</body></html>"#;

        let result = parser.parse_bytes(artifact.as_bytes(), None, Some("2024年年度报告"));
        let report = result.report().expect("fallback success");
        assert_eq!(report.parser_kind, ParserKind::Html);
        assert_eq!(report.fund_code, "000009");

        let kinds: Vec<ParserKind> = result.attempts().iter().map(|a| a.kind).collect();
        assert_eq!(kinds, vec![ParserKind::Ixbrl, ParserKind::Html]);
    }

    #[test]
    fn exhausted_chain_reports_every_attempt() {
        let dir = tempfile::tempdir().unwrap();
        let parser = parser_with_mapping(dir.path());

        let result = parser.parse_bytes(b"completely opaque bytes", None, None);
        assert!(!result.is_success());
        // Unknown format goes straight to the HTML fallback, which fails.
        let kinds: Vec<ParserKind> = result.attempts().iter().map(|a| a.kind).collect();
        assert_eq!(kinds, vec![ParserKind::Html]);

        let err = result.into_report().unwrap_err();
        assert!(matches!(err, IngestError::Parse(_)));
    }

    #[test]
    fn llm_slot_is_last_and_capped() {
        struct FixedExtractor;
        impl LlmExtractor for FixedExtractor {
            fn extract(
                &self,
                _bytes: &[u8],
                _desc_hint: Option<&str>,
            ) -> IngestResult<ParsedFundReport> {
                let mut report = crate::facade::tests::minimal_report();
                report.confidence = BigDecimal::from(1);
                Ok(report)
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let parser = parser_with_mapping(dir.path()).with_llm(Arc::new(FixedExtractor));

        let result = parser.parse_bytes(b"opaque", None, None);
        let report = result.report().expect("llm fallback");
        assert_eq!(report.parser_kind, ParserKind::Llm);
        assert_eq!(report.confidence, BigDecimal::from(6) / BigDecimal::from(10));
        let kinds: Vec<ParserKind> = result.attempts().iter().map(|a| a.kind).collect();
        assert_eq!(kinds, vec![ParserKind::Html, ParserKind::Llm]);
    }

    pub(crate) fn minimal_report() -> ParsedFundReport {
        use chrono::NaiveDate;
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
