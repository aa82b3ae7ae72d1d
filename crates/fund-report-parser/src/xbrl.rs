//! XBRL instance parsing.
//!
//! A single streaming pass over the document collects every fact, context
//! and unit. Facts are recognized structurally — any element carrying a
//! `contextRef` attribute — so no concept is ever dropped for being unknown
//! to the taxonomy; the concept mapper decides relevance later.

use std::collections::HashMap;
use std::io::Cursor;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde::{Deserialize, Serialize};

use fund_report_core::error::{IngestError, IngestResult};

/// One reported fact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct XbrlFact {
    /// Concept QName exactly as written in the instance, e.g. `cn:FundCode`.
    pub concept: String,
    pub value_raw: String,
    pub context_ref: String,
    pub unit_ref: Option<String>,
    /// XBRL `decimals` attribute; `None` covers both absence and `INF`.
    pub decimals: Option<i32>,
}

/// Period binding of a context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum XbrlPeriod {
    Instant { date: String },
    Duration { start: String, end: String },
    Unspecified,
}

/// One `xbrli:context`: entity, period and explicit dimension members.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct XbrlContext {
    pub id: String,
    pub entity_identifier: String,
    pub period: XbrlPeriod,
    /// Axis QName -> member QName, from `scenario`/`segment` explicit
    /// members.
    pub dimensions: HashMap<String, String>,
}

/// One `xbrli:unit`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct XbrlUnit {
    pub id: String,
    pub measure: String,
}

/// Everything extracted from one instance document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct XbrlDocument {
    pub facts: Vec<XbrlFact>,
    pub contexts: HashMap<String, XbrlContext>,
    pub units: HashMap<String, XbrlUnit>,
    /// `xlink:href` of the first `link:schemaRef`, used for taxonomy
    /// version selection.
    pub schema_ref: Option<String>,
}

impl XbrlDocument {
    /// Facts joined with their context, filtered to one concept set.
    pub fn facts_for<'a>(&'a self, concept_ids: &[String]) -> Vec<&'a XbrlFact> {
        self.facts
            .iter()
            .filter(|f| concept_matches(&f.concept, concept_ids))
            .collect()
    }
}

/// Whether a fact concept QName matches any configured concept id.
///
/// Exact QName match first; a local-name match second, so configs survive
/// prefix renames between taxonomy releases.
pub fn concept_matches(concept: &str, concept_ids: &[String]) -> bool {
    concept_ids.iter().any(|id| {
        if id == concept {
            return true;
        }
        local_name(id) == local_name(concept)
    })
}

pub(crate) fn local_name(qname: &str) -> &str {
    qname.rsplit(':').next().unwrap_or(qname)
}

/// Parse XBRL bytes into facts, contexts and units.
pub fn extract_facts(xbrl_bytes: &[u8]) -> IngestResult<XbrlDocument> {
    let mut reader = Reader::from_reader(Cursor::new(xbrl_bytes));
    reader.config_mut().trim_text(true);

    let mut doc = XbrlDocument::default();
    let mut buf = Vec::new();

    loop {
        match reader
            .read_event_into(&mut buf)
            .map_err(|e| IngestError::Parse(format!("malformed XBRL: {}", e)))?
        {
            Event::Start(e) => {
                let local = e.local_name().as_ref().to_vec();
                match local.as_slice() {
                    b"context" => {
                        let context = read_context(&mut reader, &e)?;
                        doc.contexts.insert(context.id.clone(), context);
                    }
                    b"unit" => {
                        let unit = read_unit(&mut reader, &e)?;
                        doc.units.insert(unit.id.clone(), unit);
                    }
                    b"schemaRef" => {
                        if doc.schema_ref.is_none() {
                            doc.schema_ref = attr_local(&e, b"href");
                        }
                    }
                    _ => {
                        if let Some(context_ref) = attr_local(&e, b"contextRef") {
                            let fact = read_fact(&mut reader, &e, context_ref)?;
                            doc.facts.push(fact);
                        }
                    }
                }
            }
            Event::Empty(e) => {
                let local = e.local_name().as_ref().to_vec();
                if local.as_slice() == b"schemaRef" {
                    if doc.schema_ref.is_none() {
                        doc.schema_ref = attr_local(&e, b"href");
                    }
                } else if let Some(context_ref) = attr_local(&e, b"contextRef") {
                    // Nil fact: surfaced with an empty value, never dropped.
                    doc.facts.push(XbrlFact {
                        concept: qname_of(&e),
                        value_raw: String::new(),
                        context_ref,
                        unit_ref: attr_local(&e, b"unitRef"),
                        decimals: parse_decimals(attr_local(&e, b"decimals")),
                    });
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(doc)
}

fn qname_of(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.name().as_ref()).into_owned()
}

/// Attribute lookup by local name, tolerating namespace prefixes
/// (`xlink:href` vs `href`).
fn attr_local(e: &BytesStart<'_>, name: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.local_name().as_ref() == name)
        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
}

fn parse_decimals(raw: Option<String>) -> Option<i32> {
    raw.and_then(|v| v.trim().parse::<i32>().ok())
}

/// Consume a fact element, accumulating all nested text.
fn read_fact(
    reader: &mut Reader<Cursor<&[u8]>>,
    start: &BytesStart<'_>,
    context_ref: String,
) -> IngestResult<XbrlFact> {
    let concept = qname_of(start);
    let unit_ref = attr_local(start, b"unitRef");
    let decimals = parse_decimals(attr_local(start, b"decimals"));
    let closing = start.name().as_ref().to_vec();

    let mut value = String::new();
    let mut depth: usize = 0;
    let mut buf = Vec::new();
    loop {
        match reader
            .read_event_into(&mut buf)
            .map_err(|e| IngestError::Parse(format!("malformed fact content: {}", e)))?
        {
            Event::Start(_) => depth += 1,
            Event::End(e) => {
                if depth == 0 && e.name().as_ref() == closing.as_slice() {
                    break;
                }
                depth = depth.saturating_sub(1);
            }
            Event::Text(t) => {
                let piece = t
                    .unescape()
                    .map_err(|e| IngestError::Parse(format!("bad fact text: {}", e)))?;
                value.push_str(&piece);
            }
            Event::CData(c) => {
                value.push_str(&String::from_utf8_lossy(&c));
            }
            Event::Eof => {
                return Err(IngestError::Parse(format!(
                    "unterminated fact element {}",
                    concept
                )))
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(XbrlFact {
        concept,
        value_raw: value.trim().to_string(),
        context_ref,
        unit_ref,
        decimals,
    })
}

/// Consume an `xbrli:context` subtree.
fn read_context(
    reader: &mut Reader<Cursor<&[u8]>>,
    start: &BytesStart<'_>,
) -> IngestResult<XbrlContext> {
    let id = attr_local(start, b"id")
        .ok_or_else(|| IngestError::Parse("context without id".to_string()))?;
    let closing = start.name().as_ref().to_vec();

    let mut entity_identifier = String::new();
    let mut instant = None;
    let mut period_start = None;
    let mut period_end = None;
    let mut dimensions = HashMap::new();

    let mut current: Vec<u8> = Vec::new();
    let mut current_dimension: Option<String> = None;
    let mut buf = Vec::new();

    loop {
        match reader
            .read_event_into(&mut buf)
            .map_err(|e| IngestError::Parse(format!("malformed context: {}", e)))?
        {
            Event::Start(e) => {
                current = e.local_name().as_ref().to_vec();
                if current.as_slice() == b"explicitMember" {
                    current_dimension = attr_local(&e, b"dimension");
                }
            }
            Event::Text(t) => {
                let text = t
                    .unescape()
                    .map_err(|e| IngestError::Parse(format!("bad context text: {}", e)))?
                    .trim()
                    .to_string();
                match current.as_slice() {
                    b"identifier" => entity_identifier = text,
                    b"instant" => instant = Some(text),
                    b"startDate" => period_start = Some(text),
                    b"endDate" => period_end = Some(text),
                    b"explicitMember" => {
                        if let Some(axis) = current_dimension.take() {
                            dimensions.insert(axis, text);
                        }
                    }
                    _ => {}
                }
            }
            Event::End(e) => {
                if e.name().as_ref() == closing.as_slice() {
                    break;
                }
                current.clear();
            }
            Event::Eof => {
                return Err(IngestError::Parse(format!("unterminated context {}", id)))
            }
            _ => {}
        }
        buf.clear();
    }

    let period = match (instant, period_start, period_end) {
        (Some(date), _, _) => XbrlPeriod::Instant { date },
        (None, Some(start), Some(end)) => XbrlPeriod::Duration { start, end },
        _ => XbrlPeriod::Unspecified,
    };

    Ok(XbrlContext {
        id,
        entity_identifier,
        period,
        dimensions,
    })
}

/// Consume an `xbrli:unit` subtree; the first measure wins.
fn read_unit(
    reader: &mut Reader<Cursor<&[u8]>>,
    start: &BytesStart<'_>,
) -> IngestResult<XbrlUnit> {
    let id = attr_local(start, b"id")
        .ok_or_else(|| IngestError::Parse("unit without id".to_string()))?;
    let closing = start.name().as_ref().to_vec();

    let mut measure = String::new();
    let mut in_measure = false;
    let mut buf = Vec::new();

    loop {
        match reader
            .read_event_into(&mut buf)
            .map_err(|e| IngestError::Parse(format!("malformed unit: {}", e)))?
        {
            Event::Start(e) => {
                in_measure = e.local_name().as_ref() == b"measure";
            }
            Event::Text(t) => {
                if in_measure && measure.is_empty() {
                    measure = t
                        .unescape()
                        .map_err(|e| IngestError::Parse(format!("bad unit text: {}", e)))?
                        .trim()
                        .to_string();
                }
            }
            Event::End(e) => {
                if e.name().as_ref() == closing.as_slice() {
                    break;
                }
                in_measure = false;
            }
            Event::Eof => return Err(IngestError::Parse(format!("unterminated unit {}", id))),
            _ => {}
        }
        buf.clear();
    }

    Ok(XbrlUnit { id, measure })
}

#[cfg(test)]
mod tests {
    use super::*;

    const INSTANCE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<xbrl xmlns="http://www.xbrl.org/2003/instance"
      xmlns:link="http://www.xbrl.org/2003/linkbase"
      xmlns:xlink="http://www.w3.org/1999/xlink"
      xmlns:xbrldi="http://xbrl.org/2006/xbrldi"
      xmlns:cn="http://csrc.example/fund">
  <link:schemaRef xlink:type="simple" xlink:href="http://csrc.example/taxonomy/csrc_v2.1/fund.xsd"/>
  <context id="c_dur">
    <entity><identifier scheme="http://csrc.example">000001</identifier></entity>
    <period><startDate>2024-01-01</startDate><endDate>2024-12-31</endDate></period>
  </context>
  <context id="c_inst">
    <entity><identifier scheme="http://csrc.example">000001</identifier></entity>
    <period><instant>2024-12-31</instant></period>
  </context>
  <context id="c_ind_1">
    <entity><identifier scheme="http://csrc.example">000001</identifier></entity>
    <period><instant>2024-12-31</instant></period>
    <scenario>
      <xbrldi:explicitMember dimension="cn:IndustryAxis">cn:Manufacturing</xbrldi:explicitMember>
    </scenario>
  </context>
  <unit id="u_cny"><measure>iso4217:CNY</measure></unit>
  <unit id="u_pure"><measure>pure</measure></unit>
  <cn:FundCode contextRef="c_dur">000001</cn:FundCode>
  <cn:FundName contextRef="c_dur">华夏成长混合</cn:FundName>
  <cn:NetAssetValue contextRef="c_inst" unitRef="u_cny" decimals="4">1.0521</cn:NetAssetValue>
  <cn:TotalNetAssets contextRef="c_inst" unitRef="u_cny" decimals="-2">3521000123.45</cn:TotalNetAssets>
  <cn:IndustryMarketValue contextRef="c_ind_1" unitRef="u_cny" decimals="2">1200000.00</cn:IndustryMarketValue>
  <cn:FundManager contextRef="c_dur" xsi:nil="true" xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance"/>
</xbrl>"#;

    #[test]
    fn every_fact_is_surfaced() {
        let doc = extract_facts(INSTANCE.as_bytes()).unwrap();
        let concepts: Vec<&str> = doc.facts.iter().map(|f| f.concept.as_str()).collect();
        assert_eq!(
            concepts,
            vec![
                "cn:FundCode",
                "cn:FundName",
                "cn:NetAssetValue",
                "cn:TotalNetAssets",
                "cn:IndustryMarketValue",
                "cn:FundManager",
            ]
        );
    }

    #[test]
    fn contexts_resolve_entity_period_and_dimensions() {
        let doc = extract_facts(INSTANCE.as_bytes()).unwrap();
        assert_eq!(doc.contexts.len(), 3);

        let dur = &doc.contexts["c_dur"];
        assert_eq!(dur.entity_identifier, "000001");
        assert_eq!(
            dur.period,
            XbrlPeriod::Duration {
                start: "2024-01-01".to_string(),
                end: "2024-12-31".to_string()
            }
        );
        assert!(dur.dimensions.is_empty());

        let ind = &doc.contexts["c_ind_1"];
        assert_eq!(
            ind.period,
            XbrlPeriod::Instant {
                date: "2024-12-31".to_string()
            }
        );
        assert_eq!(ind.dimensions["cn:IndustryAxis"], "cn:Manufacturing");
    }

    #[test]
    fn units_decimals_and_nil_facts_are_kept() {
        let doc = extract_facts(INSTANCE.as_bytes()).unwrap();
        assert_eq!(doc.units["u_cny"].measure, "iso4217:CNY");
        assert_eq!(doc.units["u_pure"].measure, "pure");

        let nav = doc
            .facts
            .iter()
            .find(|f| f.concept == "cn:NetAssetValue")
            .unwrap();
        assert_eq!(nav.decimals, Some(4));
        assert_eq!(nav.unit_ref.as_deref(), Some("u_cny"));

        let tna = doc
            .facts
            .iter()
            .find(|f| f.concept == "cn:TotalNetAssets")
            .unwrap();
        assert_eq!(tna.decimals, Some(-2));

        let nil = doc
            .facts
            .iter()
            .find(|f| f.concept == "cn:FundManager")
            .unwrap();
        assert_eq!(nil.value_raw, "");
    }

    #[test]
    fn schema_ref_href_is_captured() {
        let doc = extract_facts(INSTANCE.as_bytes()).unwrap();
        assert_eq!(
            doc.schema_ref.as_deref(),
            Some("http://csrc.example/taxonomy/csrc_v2.1/fund.xsd")
        );
    }

    #[test]
    fn concept_matching_tolerates_prefix_renames() {
        assert!(concept_matches(
            "cnfund:FundCode",
            &["cn:FundCode".to_string()]
        ));
        assert!(concept_matches("cn:FundCode", &["cn:FundCode".to_string()]));
        assert!(!concept_matches("cn:FundName", &["cn:FundCode".to_string()]));
    }

    #[test]
    fn truncated_fact_is_a_parse_error() {
        let err = extract_facts(b"<xbrl><cn:FundCode contextRef=\"c1\">000001").unwrap_err();
        assert!(matches!(err, IngestError::Parse(_)));
    }
}
