//! iXBRL unwrapping.
//!
//! The portal's inline documents embed a complete XBRL instance as a
//! (usually hidden) subtree under `<body>`. Extraction slices the raw bytes
//! of that subtree rather than round-tripping through an HTML DOM: concept
//! QNames are case-sensitive and an HTML serializer would fold them.

use once_cell::sync::Lazy;
use regex::Regex;

static XBRL_OPEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)<([A-Za-z][\w.-]*:)?xbrl[\s>]").expect("valid regex"));

/// Extract the embedded XBRL instance from an iXBRL container.
///
/// Looks for the first element with local name `xbrl` under `<body>`,
/// falling back to anywhere in the document, and returns the subtree as
/// UTF-8 XML bytes. Returns `None` when no such subtree exists. Side-effect
/// free.
pub fn extract(ixbrl_bytes: &[u8]) -> Option<Vec<u8>> {
    let text = String::from_utf8_lossy(ixbrl_bytes);

    let body_pos = find_case_insensitive(&text, "<body");
    let search_from = body_pos.unwrap_or(0);

    let subtree = extract_from(&text, search_from).or_else(|| {
        if search_from > 0 {
            extract_from(&text, 0)
        } else {
            None
        }
    })?;

    Some(subtree.into_bytes())
}

fn extract_from(text: &str, from: usize) -> Option<String> {
    let m = XBRL_OPEN_RE.find(&text[from..])?;
    let open_start = from + m.start();

    // Recover the exact qname as written so the close tag matches case.
    let after_lt = &text[open_start + 1..];
    let name_len = after_lt
        .find(|c: char| c.is_whitespace() || c == '>' || c == '/')
        .unwrap_or(after_lt.len());
    let qname = &after_lt[..name_len];

    // Self-closing island carries no facts.
    let open_tag_end = text[open_start..].find('>').map(|p| open_start + p)?;
    if text[open_start..=open_tag_end].ends_with("/>") {
        return None;
    }

    let close_tag = format!("</{}>", qname);
    let close_start = find_case_insensitive(&text[open_tag_end..], &close_tag)
        .map(|p| open_tag_end + p)?;
    let end = close_start + close_tag.len();

    Some(text[open_start..end].to_string())
}

fn find_case_insensitive(haystack: &str, needle: &str) -> Option<usize> {
    let lower_haystack = haystack.to_lowercase();
    let lower_needle = needle.to_lowercase();
    // Byte offsets survive lowercasing for the ASCII needles used here only
    // when the haystack maps 1:1; fall back to a linear scan otherwise.
    if lower_haystack.len() == haystack.len() {
        lower_haystack.find(&lower_needle)
    } else {
        let needle_bytes = lower_needle.as_bytes();
        haystack.as_bytes().windows(needle_bytes.len()).position(|w| {
            w.iter()
                .zip(needle_bytes)
                .all(|(a, b)| a.to_ascii_lowercase() == *b)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONTAINER: &str = r#"<html>
<head><title>2024年年度报告</title></head>
<body>
<p>正文</p>
<div style="display:none">
<xbrl xmlns="http://www.xbrl.org/2003/instance" xmlns:cn="http://csrc.example/fund">
  <cn:FundCode contextRef="c1">000001</cn:FundCode>
  <cn:FundName contextRef="c1">华夏成长</cn:FundName>
</xbrl>
</div>
</body>
</html>"#;

    #[test]
    fn extracts_the_subtree_under_body() {
        let xml = extract(CONTAINER.as_bytes()).expect("subtree");
        let xml = String::from_utf8(xml).unwrap();
        assert!(xml.starts_with("<xbrl"));
        assert!(xml.ends_with("</xbrl>"));
        // Concept case is preserved byte for byte.
        assert!(xml.contains("<cn:FundCode contextRef=\"c1\">000001</cn:FundCode>"));
        assert!(!xml.contains("<html"));
    }

    #[test]
    fn falls_back_to_anywhere_when_body_is_absent() {
        let doc = r#"<html><xbrli:xbrl xmlns:xbrli="http://www.xbrl.org/2003/instance">
<fact contextRef="c1">1</fact></xbrli:xbrl></html>"#;
        let xml = extract(doc.as_bytes()).expect("subtree");
        let xml = String::from_utf8(xml).unwrap();
        assert!(xml.starts_with("<xbrli:xbrl"));
        assert!(xml.ends_with("</xbrli:xbrl>"));
    }

    #[test]
    fn plain_html_yields_none() {
        let doc = "<html><body><table><tr><td>基金代码</td></tr></table></body></html>";
        assert!(extract(doc.as_bytes()).is_none());
    }

    #[test]
    fn self_closing_island_yields_none() {
        let doc = "<html><body><xbrl/></body></html>";
        assert!(extract(doc.as_bytes()).is_none());
    }

    #[test]
    fn extraction_is_pure() {
        let first = extract(CONTAINER.as_bytes());
        let second = extract(CONTAINER.as_bytes());
        assert_eq!(first, second);
    }
}
