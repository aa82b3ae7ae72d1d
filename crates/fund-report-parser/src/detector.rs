//! Artifact format detection.
//!
//! Detection never throws: each candidate format is scored independently
//! over the first 128 KiB and the argmax wins, with ties broken in favor of
//! `iXBRL > XBRL > HTML`. Ambiguous content simply comes back with a low
//! confidence, or as `Unknown` when nothing scores at all.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// How much of the artifact the detector inspects.
const SNIFF_WINDOW: usize = 128 * 1024;

const XBRL_INSTANCE_NS: &str = "http://www.xbrl.org/2003/instance";

static XBRL_SUBTREE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)<([A-Za-z][\w.-]*:)?xbrl[\s>]").expect("valid regex"));

/// Shape of a downloaded artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DetectedFormat {
    Xbrl,
    Ixbrl,
    Html,
    Unknown,
}

/// Detection verdict with the winning score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub format: DetectedFormat,
    pub confidence: f64,
}

/// Classify raw artifact bytes, optionally aided by the file extension.
pub fn detect(bytes: &[u8], path_hint: Option<&str>) -> Detection {
    let window = &bytes[..bytes.len().min(SNIFF_WINDOW)];
    let text = String::from_utf8_lossy(window);
    let lower = text.to_lowercase();

    let root = first_element_local_name(&lower);
    let html_root = root.as_deref() == Some("html");
    let root_is_xbrl = root.as_deref() == Some("xbrl");
    let has_xbrl_ns = text.contains(XBRL_INSTANCE_NS);
    let has_ix_marker = lower.contains("xmlns:ix") || lower.contains("<ix:");
    let body_pos = lower.find("<body");
    let has_xbrl_subtree = match body_pos {
        Some(pos) => XBRL_SUBTREE_RE.is_match(&lower[pos..]),
        None => false,
    };

    let hint = path_hint.map(str::to_lowercase);
    let hint_xmlish = hint
        .as_deref()
        .map(|h| h.ends_with(".xml") || h.ends_with(".xbrl"))
        .unwrap_or(false);
    let hint_htmlish = hint
        .as_deref()
        .map(|h| h.ends_with(".html") || h.ends_with(".htm"))
        .unwrap_or(false);

    let mut xbrl_score: f64 = 0.0;
    if !html_root {
        if root_is_xbrl {
            xbrl_score = 0.85;
            if has_xbrl_ns {
                xbrl_score += 0.1;
            }
        } else if has_xbrl_ns {
            xbrl_score = 0.6;
        }
        if xbrl_score > 0.0 && hint_xmlish {
            xbrl_score += 0.03;
        }
    }

    let mut ixbrl_score: f64 = 0.0;
    if html_root && (has_ix_marker || has_xbrl_subtree) {
        ixbrl_score = 0.85;
        if has_ix_marker && has_xbrl_subtree {
            ixbrl_score += 0.1;
        }
    }

    let mut html_score: f64 = 0.0;
    if html_root {
        html_score = 0.7;
        if hint_htmlish {
            html_score += 0.05;
        }
    }

    // Candidates in tie-break order (iXBRL > XBRL > HTML): a strict
    // comparison lets the earlier entry keep equal scores.
    let mut best = Detection {
        format: DetectedFormat::Unknown,
        confidence: 0.2,
    };
    for (format, score) in [
        (DetectedFormat::Ixbrl, ixbrl_score),
        (DetectedFormat::Xbrl, xbrl_score),
        (DetectedFormat::Html, html_score),
    ] {
        if score > best.confidence {
            best = Detection {
                format,
                confidence: score,
            };
        }
    }

    best.confidence = best.confidence.min(0.99);
    best
}

/// Local name of the first real element, skipping prolog, doctype and
/// comments. Expects lowercase input.
fn first_element_local_name(lower: &str) -> Option<String> {
    let bytes = lower.as_bytes();
    let mut i = 0;
    while let Some(off) = lower[i..].find('<') {
        let start = i + off;
        let rest = &lower[start..];
        if rest.starts_with("<?") {
            i = start + rest.find("?>").map(|p| p + 2).unwrap_or(rest.len());
            continue;
        }
        if rest.starts_with("<!--") {
            i = start + rest.find("-->").map(|p| p + 3).unwrap_or(rest.len());
            continue;
        }
        if rest.starts_with("<!") {
            i = start + rest.find('>').map(|p| p + 1).unwrap_or(rest.len());
            continue;
        }
        if rest.starts_with("</") {
            i = start + 2;
            continue;
        }
        // A real start tag.
        let name_start = start + 1;
        let mut end = name_start;
        while end < bytes.len() {
            let c = bytes[end];
            if c == b' ' || c == b'>' || c == b'/' || c == b'\t' || c == b'\n' || c == b'\r' {
                break;
            }
            end += 1;
        }
        if end == name_start {
            return None;
        }
        let qname = &lower[name_start..end];
        let local = qname.rsplit(':').next().unwrap_or(qname);
        return Some(local.to_string());
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const XBRL_DOC: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<xbrl xmlns="http://www.xbrl.org/2003/instance" xmlns:cn="http://csrc.example/fund">
  <cn:FundCode contextRef="c1">000001</cn:FundCode>
</xbrl>"#;

    const IXBRL_DOC: &str = r#"<!DOCTYPE html>
<html xmlns:ix="http://www.xbrl.org/2013/inlineXBRL">
<head><title>年度报告</title></head>
<body><div style="display:none"><xbrl xmlns="http://www.xbrl.org/2003/instance"></xbrl></div></body>
</html>"#;

    const HTML_DOC: &str = r#"<html><head><title>基金年度报告</title></head>
<body><table><tr><th>证券代码</th></tr></table></body></html>"#;

    #[test]
    fn labeled_corpus_is_classified_stably() {
        assert_eq!(detect(XBRL_DOC.as_bytes(), None).format, DetectedFormat::Xbrl);
        assert_eq!(
            detect(IXBRL_DOC.as_bytes(), None).format,
            DetectedFormat::Ixbrl
        );
        assert_eq!(detect(HTML_DOC.as_bytes(), None).format, DetectedFormat::Html);
    }

    #[test]
    fn prolog_and_doctype_do_not_confuse_root_detection() {
        let doc = "<?xml version=\"1.0\"?>\n<!-- generated -->\n<xbrl xmlns=\"http://www.xbrl.org/2003/instance\"></xbrl>";
        assert_eq!(detect(doc.as_bytes(), None).format, DetectedFormat::Xbrl);
    }

    #[test]
    fn garbage_is_unknown_not_an_error() {
        let det = detect(b"%PDF-1.7 binary soup", None);
        assert_eq!(det.format, DetectedFormat::Unknown);
        assert!(det.confidence < 0.5);
    }

    #[test]
    fn html_with_embedded_xbrl_prefers_ixbrl() {
        // Both the HTML and iXBRL signals fire; the tie-break order wins.
        let det = detect(IXBRL_DOC.as_bytes(), Some("report.html"));
        assert_eq!(det.format, DetectedFormat::Ixbrl);
        assert!(det.confidence > 0.8);
    }

    #[test]
    fn path_hint_nudges_but_never_decides() {
        let det = detect(XBRL_DOC.as_bytes(), Some("19052421.html"));
        assert_eq!(det.format, DetectedFormat::Xbrl);
    }
}
