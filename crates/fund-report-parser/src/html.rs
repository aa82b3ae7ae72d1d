//! Heuristic parser for un-tagged HTML reports.
//!
//! Nothing here trusts document layout. Tables are recognized by their
//! header labels (with several Chinese aliases per logical field — fixed
//! column indices are forbidden, the portal reshuffles them), scalars by
//! label patterns with a short ordered list of DOM-neighbor strategies, and
//! every number goes through the shared normalization.

use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashMap;
use tracing::debug;

use fund_report_core::enums::{ParserKind, ReportType};
use fund_report_core::error::{IngestError, IngestResult};
use fund_report_core::models::{
    AssetAllocation, Holding, IndustryAllocation, ParsedFundReport,
};

use crate::normalize;

static TABLE_SEL: Lazy<Selector> = Lazy::new(|| Selector::parse("table").expect("valid selector"));
static TR_SEL: Lazy<Selector> = Lazy::new(|| Selector::parse("tr").expect("valid selector"));
static CELL_SEL: Lazy<Selector> = Lazy::new(|| Selector::parse("th, td").expect("valid selector"));

static FUND_CODE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[0-9]{6}").expect("valid regex"));
static PERIOD_RANGE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"([0-9]{4})年([0-9]{1,2})月([0-9]{1,2})日(?:起?至|-)([0-9]{4})年([0-9]{1,2})月([0-9]{1,2})日",
    )
    .expect("valid regex")
});
static PERIOD_END_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:截至|至)([0-9]{4})年([0-9]{1,2})月([0-9]{1,2})日").expect("valid regex")
});

/// Header aliases of the top-holdings table. Required fields must all be
/// present for a table to qualify.
const HOLDING_ALIASES: &[(&str, &[&str])] = &[
    ("rank", &["序号", "排名"]),
    ("security_code", &["证券代码", "股票代码", "债券代码"]),
    ("security_name", &["证券名称", "股票名称", "债券名称"]),
    ("shares", &["数量（股）", "数量(股)", "持股数量", "数量"]),
    (
        "market_value",
        &["公允价值（元）", "公允价值(元)", "市值（元）", "市值(元)", "公允价值", "市值"],
    ),
    (
        "net_value_ratio",
        &[
            "占基金资产净值比例（%）",
            "占基金资产净值比例(%)",
            "占基金资产净值比例",
            "占净值比例（%）",
            "占净值比例(%)",
            "占净值比例",
        ],
    ),
];
const HOLDING_REQUIRED: &[&str] = &["security_code", "security_name", "market_value", "net_value_ratio"];

const INDUSTRY_ALIASES: &[(&str, &[&str])] = &[
    ("industry_name", &["行业类别", "行业名称", "行业"]),
    (
        "market_value",
        &["公允价值（元）", "公允价值(元)", "市值（元）", "金额（元）", "公允价值", "市值"],
    ),
    (
        "net_value_ratio",
        &[
            "占基金资产净值比例（%）",
            "占基金资产净值比例(%)",
            "占基金资产净值比例",
            "占净值比例（%）",
            "占净值比例",
        ],
    ),
];
const INDUSTRY_REQUIRED: &[&str] = &["industry_name", "market_value", "net_value_ratio"];

const ASSET_ALIASES: &[(&str, &[&str])] = &[
    ("asset_type", &["项目", "资产类别", "科目"]),
    (
        "market_value",
        &["金额（元）", "金额(元)", "市值（元）", "市值(元)", "公允价值（元）", "金额", "市值"],
    ),
    (
        "net_value_ratio",
        &[
            "占基金总资产的比例（%）",
            "占基金总资产的比例(%)",
            "占基金资产净值比例（%）",
            "占基金资产净值比例(%)",
            "占总资产比例",
            "占净值比例",
            "比例",
        ],
    ),
];
const ASSET_REQUIRED: &[&str] = &["asset_type", "market_value", "net_value_ratio"];

/// Scalar labels with their DOM-neighbor strategies applied in order:
/// value in the same cell after a colon, next cell in the row, same column
/// of the next row.
const SCALAR_LABELS: &[(&str, &[&str])] = &[
    ("fund_code", &["基金主代码", "基金代码"]),
    ("fund_name", &["基金名称", "基金简称"]),
    ("fund_manager", &["基金管理人"]),
    ("net_asset_value", &["期末基金份额净值", "基金份额净值"]),
    ("total_net_assets", &["期末基金资产净值", "基金资产净值"]),
    ("period_profit", &["本期利润"]),
];

/// Parse a plain-HTML report into the common report shape.
pub fn parse_html(bytes: &[u8], desc_hint: Option<&str>) -> IngestResult<ParsedFundReport> {
    let text = String::from_utf8_lossy(bytes);
    let document = Html::parse_document(&text);

    let grids: Vec<Vec<Vec<String>>> = document
        .select(&TABLE_SEL)
        .map(table_grid)
        .filter(|g| !g.is_empty())
        .collect();

    let mut warnings: Vec<String> = Vec::new();

    let mut top_holdings: Vec<Holding> = Vec::new();
    let mut industry_allocations: Vec<IndustryAllocation> = Vec::new();
    let mut asset_allocations: Vec<AssetAllocation> = Vec::new();

    for grid in &grids {
        if top_holdings.is_empty() {
            if let Some((header_idx, columns)) =
                detect_header(grid, HOLDING_ALIASES, HOLDING_REQUIRED)
            {
                top_holdings = extract_holdings(grid, header_idx, &columns, &mut warnings);
                continue;
            }
        }
        if industry_allocations.is_empty() {
            if let Some((header_idx, columns)) =
                detect_header(grid, INDUSTRY_ALIASES, INDUSTRY_REQUIRED)
            {
                industry_allocations =
                    extract_industries(grid, header_idx, &columns, &mut warnings);
                continue;
            }
        }
        if asset_allocations.is_empty() {
            if let Some((header_idx, columns)) =
                detect_header(grid, ASSET_ALIASES, ASSET_REQUIRED)
            {
                asset_allocations = extract_assets(grid, header_idx, &columns, &mut warnings);
            }
        }
    }

    let scalars = extract_scalars(&grids);

    let fund_code = scalars
        .get("fund_code")
        .and_then(|v| FUND_CODE_RE.find(v).map(|m| m.as_str().to_string()))
        .ok_or_else(|| IngestError::Parse("no fund code found in HTML report".to_string()))?;
    let fund_name = scalars
        .get("fund_name")
        .cloned()
        .ok_or_else(|| IngestError::Parse("no fund name found in HTML report".to_string()))?;

    let flat_text = normalize_text(&document.root_element().text().collect::<String>());
    let (report_period_start, report_period_end) = extract_period(&flat_text)
        .ok_or_else(|| IngestError::Parse("no reporting period found in HTML report".to_string()))?;

    let report_type = desc_hint
        .and_then(ReportType::from_report_desc)
        .or_else(|| ReportType::from_report_desc(head_of(&flat_text, 400)))
        .ok_or_else(|| {
            IngestError::Parse("report type not recognizable from HTML report".to_string())
        })?;

    let net_asset_value = scalars
        .get("net_asset_value")
        .and_then(|v| normalize::parse_decimal(v));
    let total_net_assets = scalars
        .get("total_net_assets")
        .and_then(|v| normalize::parse_decimal(v));
    let period_profit = scalars
        .get("period_profit")
        .and_then(|v| normalize::parse_decimal(v));

    // Confidence: 0.7 base, each populated field group adds, capped at 0.95.
    let step = BigDecimal::from(5) / BigDecimal::from(100);
    let mut confidence = BigDecimal::from(70) / BigDecimal::from(100);
    for populated in [
        fund_name.len() > 0,
        net_asset_value.is_some() || total_net_assets.is_some(),
        !top_holdings.is_empty(),
        !asset_allocations.is_empty(),
        !industry_allocations.is_empty(),
    ] {
        if populated {
            confidence = confidence + step.clone();
        }
    }
    let cap = BigDecimal::from(95) / BigDecimal::from(100);
    if confidence > cap {
        confidence = cap;
    }

    if !asset_allocations.is_empty() {
        let sum: BigDecimal = asset_allocations
            .iter()
            .map(|a| a.net_value_ratio.clone())
            .sum();
        let deviation = (sum.clone() - BigDecimal::from(1)).abs();
        if deviation > BigDecimal::from(2) / BigDecimal::from(100) {
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
        "HTML extraction complete"
    );

    Ok(ParsedFundReport {
        fund_code,
        fund_name,
        fund_manager: scalars.get("fund_manager").cloned(),
        report_type,
        report_period_start,
        report_period_end,
        net_asset_value,
        total_net_assets,
        period_profit,
        asset_allocations,
        top_holdings,
        industry_allocations,
        parser_kind: ParserKind::Html,
        taxonomy_version: None,
        confidence,
        warnings,
    })
}

/// Flatten one `<table>` into trimmed cell text.
fn table_grid(table: ElementRef<'_>) -> Vec<Vec<String>> {
    table
        .select(&TR_SEL)
        .map(|row| {
            row.select(&CELL_SEL)
                .map(|cell| normalize_text(&cell.text().collect::<String>()))
                .collect()
        })
        .filter(|cells: &Vec<String>| !cells.is_empty())
        .collect()
}

/// Find a header row binding every required logical field to a column.
///
/// Scans the first rows of the grid; a row qualifies when all required
/// aliases resolve. Returns `(header_row_index, field -> column_index)`.
fn detect_header(
    grid: &[Vec<String>],
    aliases: &[(&str, &[&str])],
    required: &[&str],
) -> Option<(usize, HashMap<String, usize>)> {
    for (row_idx, row) in grid.iter().take(3).enumerate() {
        let mut columns: HashMap<String, usize> = HashMap::new();
        for (field, names) in aliases {
            let hit = row.iter().position(|cell| {
                let cell = cell.as_str();
                !cell.is_empty() && names.iter().any(|n| cell.contains(n))
            });
            if let Some(col) = hit {
                columns.insert((*field).to_string(), col);
            }
        }
        if required.iter().all(|f| columns.contains_key(*f)) {
            return Some((row_idx, columns));
        }
    }
    None
}

fn cell<'g>(row: &'g [String], columns: &HashMap<String, usize>, field: &str) -> Option<&'g str> {
    columns
        .get(field)
        .and_then(|&idx| row.get(idx))
        .map(|s| s.as_str())
}

fn is_total_row(label: &str) -> bool {
    label.contains("合计") || label.contains("总计")
}

fn extract_holdings(
    grid: &[Vec<String>],
    header_idx: usize,
    columns: &HashMap<String, usize>,
    warnings: &mut Vec<String>,
) -> Vec<Holding> {
    let mut rows = Vec::new();
    for row in &grid[header_idx + 1..] {
        let Some(code) = cell(row, columns, "security_code").filter(|c| !c.is_empty()) else {
            continue;
        };
        if is_total_row(code) {
            continue;
        }
        let Some(market_value) =
            cell(row, columns, "market_value").and_then(normalize::parse_decimal)
        else {
            continue;
        };
        let Some((net_value_ratio, _)) =
            cell(row, columns, "net_value_ratio").and_then(normalize::parse_ratio)
        else {
            warnings.push(format!("holding {} has no parseable ratio", code));
            continue;
        };
        rows.push(Holding {
            rank: cell(row, columns, "rank")
                .and_then(normalize::parse_rank)
                .unwrap_or((rows.len() + 1) as i32),
            security_code: code.to_string(),
            security_name: cell(row, columns, "security_name")
                .unwrap_or_default()
                .to_string(),
            shares: cell(row, columns, "shares").and_then(normalize::parse_shares),
            market_value,
            net_value_ratio,
        });
    }
    rows.sort_by_key(|h| h.rank);
    rows
}

fn extract_industries(
    grid: &[Vec<String>],
    header_idx: usize,
    columns: &HashMap<String, usize>,
    warnings: &mut Vec<String>,
) -> Vec<IndustryAllocation> {
    let mut rows = Vec::new();
    for row in &grid[header_idx + 1..] {
        let Some(name) = cell(row, columns, "industry_name").filter(|c| !c.is_empty()) else {
            continue;
        };
        if is_total_row(name) {
            continue;
        }
        let value = cell(row, columns, "market_value").and_then(normalize::parse_decimal);
        let ratio = cell(row, columns, "net_value_ratio").and_then(normalize::parse_ratio);
        let (Some(market_value), Some((net_value_ratio, _))) = (value, ratio) else {
            warnings.push(format!("industry row {} is incomplete", name));
            continue;
        };
        rows.push(IndustryAllocation {
            industry_name: name.to_string(),
            market_value,
            net_value_ratio,
        });
    }
    rows
}

fn extract_assets(
    grid: &[Vec<String>],
    header_idx: usize,
    columns: &HashMap<String, usize>,
    warnings: &mut Vec<String>,
) -> Vec<AssetAllocation> {
    let mut rows = Vec::new();
    for row in &grid[header_idx + 1..] {
        let Some(label) = cell(row, columns, "asset_type").filter(|c| !c.is_empty()) else {
            continue;
        };
        if is_total_row(label) {
            continue;
        }
        let value = cell(row, columns, "market_value").and_then(normalize::parse_decimal);
        let ratio = cell(row, columns, "net_value_ratio").and_then(normalize::parse_ratio);
        let value_is_some = value.is_some();
        let ratio_is_some = ratio.is_some();
        let (Some(market_value), Some((net_value_ratio, _))) = (value, ratio) else {
            // Section headers ("其中：股票") share the label column; silence
            // rows with no numbers at all.
            if value_is_some || ratio_is_some {
                warnings.push(format!("asset row {} is incomplete", label));
            }
            continue;
        };
        rows.push(AssetAllocation {
            asset_type: label.to_string(),
            asset_subtype: None,
            market_value,
            net_value_ratio,
        });
    }
    rows
}

/// Label/value extraction across every table grid.
fn extract_scalars(grids: &[Vec<Vec<String>>]) -> HashMap<String, String> {
    let mut values: HashMap<String, String> = HashMap::new();

    for (field, labels) in SCALAR_LABELS {
        'field: for grid in grids {
            for (row_idx, row) in grid.iter().enumerate() {
                for (col_idx, cell_text) in row.iter().enumerate() {
                    for &label in *labels {
                        if !cell_text.contains(label) {
                            continue;
                        }
                        // Strategy 1: value after a colon in the same cell.
                        if let Some(value) = after_colon(cell_text) {
                            values.insert((*field).to_string(), value);
                            break 'field;
                        }
                        // Strategy 2: next cell in the same row.
                        if let Some(value) = row.get(col_idx + 1).filter(|v| !v.is_empty()) {
                            if is_label_cell(cell_text, label) {
                                values.insert((*field).to_string(), value.clone());
                                break 'field;
                            }
                        }
                        // Strategy 3: same column of the next row.
                        if let Some(value) = grid
                            .get(row_idx + 1)
                            .and_then(|next| next.get(col_idx))
                            .filter(|v| !v.is_empty())
                        {
                            if is_label_cell(cell_text, label) {
                                values.insert((*field).to_string(), value.clone());
                                break 'field;
                            }
                        }
                    }
                }
            }
        }
    }
    values
}

/// Whether a cell is the label itself rather than prose mentioning it.
fn is_label_cell(cell_text: &str, label: &str) -> bool {
    cell_text.len() <= label.len() + 12
}

fn after_colon(cell_text: &str) -> Option<String> {
    let idx = cell_text.find(['：', ':'])?;
    let value = cell_text[idx..]
        .trim_start_matches(['：', ':'])
        .trim()
        .to_string();
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

/// Reporting period from the flattened document text.
fn extract_period(flat_text: &str) -> Option<(Option<NaiveDate>, NaiveDate)> {
    if let Some(caps) = PERIOD_RANGE_RE.captures(flat_text) {
        let start = ymd(&caps, 1);
        let end = ymd(&caps, 4)?;
        return Some((start, end));
    }
    if let Some(caps) = PERIOD_END_RE.captures(flat_text) {
        let end = ymd(&caps, 1)?;
        return Some((None, end));
    }
    None
}

fn ymd(caps: &regex::Captures<'_>, first_group: usize) -> Option<NaiveDate> {
    let year = caps.get(first_group)?.as_str().parse().ok()?;
    let month = caps.get(first_group + 1)?.as_str().parse().ok()?;
    let day = caps.get(first_group + 2)?.as_str().parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

fn head_of(text: &str, chars: usize) -> &str {
    match text.char_indices().nth(chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

fn normalize_text(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_whitespace() && *c != '\u{feff}')
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    const HTML_REPORT: &str = r#"<html>
<head><title>华夏成长混合2024年年度报告</title></head>
<body>
<p>报告期：2024年1月1日至2024年12月31日</p>
<table>
  <tr><td>基金名称</td><td>华夏成长混合</td></tr>
  <tr><td>基金主代码</td><td>000001</td></tr>
  <tr><td>基金管理人</td><td>华夏基金管理有限公司</td></tr>
</table>
<table>
  <tr><td>期末基金资产净值（元）</td><td>3,521,000,123.45</td></tr>
  <tr><td>期末基金份额净值：1.0521元</td></tr>
</table>
<table>
  <tr><th>项目</th><th>金额（元）</th><th>占基金总资产的比例（%）</th></tr>
  <tr><td>股票</td><td>2,099,000,000.00</td><td>59.61</td></tr>
  <tr><td>债券</td><td>1,056,000,000.00</td><td>29.99</td></tr>
  <tr><td>银行存款</td><td>366,000,000.00</td><td>10.40</td></tr>
  <tr><td>合计</td><td>3,521,000,000.00</td><td>100.00</td></tr>
</table>
<table>
  <tr><th>序号</th><th>股票代码</th><th>股票名称</th><th>数量（股）</th><th>公允价值（元）</th><th>占基金资产净值比例（%）</th></tr>
  <tr><td>1</td><td>600519</td><td>贵州茅台</td><td>120,000</td><td>204,000,000.00</td><td>5.79</td></tr>
  <tr><td>2</td><td>601318</td><td>中国平安</td><td>8,000,000</td><td>152,000,000.00</td><td>4.32</td></tr>
</table>
<table>
  <tr><th>行业类别</th><th>公允价值（元）</th><th>占基金资产净值比例（%）</th></tr>
  <tr><td>制造业</td><td>1,200,000,000.00</td><td>34.08</td></tr>
  <tr><td>金融业</td><td>800,000,000.00</td><td>22.72</td></tr>
  <tr><td>合计</td><td>2,000,000,000.00</td><td>56.80</td></tr>
</table>
</body>
</html>"#;

    #[test]
    fn header_driven_tables_extract_without_fixed_indices() {
        let report = parse_html(HTML_REPORT.as_bytes(), None).unwrap();

        assert_eq!(report.top_holdings.len(), 2);
        assert_eq!(report.top_holdings[0].rank, 1);
        assert_eq!(report.top_holdings[0].security_code, "600519");
        assert_eq!(report.top_holdings[0].shares, Some(120_000));
        assert_eq!(
            report.top_holdings[0].net_value_ratio,
            BigDecimal::from_str("0.0579").unwrap()
        );

        assert_eq!(report.industry_allocations.len(), 2);
        assert_eq!(report.industry_allocations[0].industry_name, "制造业");

        // The 合计 row is not data.
        assert_eq!(report.asset_allocations.len(), 3);
        assert_eq!(report.asset_allocations[0].asset_type, "股票");
        assert_eq!(
            report.asset_allocations[0].net_value_ratio,
            BigDecimal::from_str("0.5961").unwrap()
        );
    }

    #[test]
    fn scalars_resolve_via_neighbor_strategies() {
        let report = parse_html(HTML_REPORT.as_bytes(), None).unwrap();
        assert_eq!(report.fund_code, "000001");
        assert_eq!(report.fund_name, "华夏成长混合");
        assert_eq!(report.fund_manager.as_deref(), Some("华夏基金管理有限公司"));
        // Strategy 1: same-cell colon value.
        assert_eq!(
            report.net_asset_value,
            Some(BigDecimal::from_str("1.0521").unwrap())
        );
        // Strategy 2: next-cell value with thousand separators.
        assert_eq!(
            report.total_net_assets,
            Some(BigDecimal::from_str("3521000123.45").unwrap())
        );
    }

    #[test]
    fn period_and_type_come_from_text_and_hint() {
        let report = parse_html(HTML_REPORT.as_bytes(), None).unwrap();
        assert_eq!(
            report.report_period_start,
            NaiveDate::from_ymd_opt(2024, 1, 1)
        );
        assert_eq!(
            report.report_period_end,
            NaiveDate::from_ymd_opt(2024, 12, 31).unwrap()
        );
        // Title text carries the type when no hint is given.
        assert_eq!(report.report_type, ReportType::Annual);

        let hinted = parse_html(
            HTML_REPORT.as_bytes(),
            Some("华夏成长混合2024年第一季度报告"),
        )
        .unwrap();
        assert_eq!(hinted.report_type, ReportType::Q1);
    }

    #[test]
    fn confidence_grows_additively_and_is_capped() {
        let report = parse_html(HTML_REPORT.as_bytes(), None).unwrap();
        assert_eq!(report.parser_kind, ParserKind::Html);
        // All five field groups populated: 0.70 + 5 * 0.05, capped at 0.95.
        assert_eq!(
            report.confidence,
            BigDecimal::from(95) / BigDecimal::from(100)
        );
        assert!(report.warnings.is_empty(), "{:?}", report.warnings);
    }

    #[test]
    fn tables_without_required_aliases_are_rejected() {
        let html = r#"<html><body>
<p>基金主代码：000007</p><p>基金名称：测试基金</p>
<p>报告期：2024年1月1日至2024年12月31日</p><p>年度报告</p>
<table>
  <tr><th>股票代码</th><th>随便什么</th></tr>
  <tr><td>600000</td><td>1234</td></tr>
</table>
</body></html>"#;
        // The only table lacks the market-value and ratio headers; the
        // report still parses but carries no holdings.
        let report = parse_html(html.as_bytes(), Some("2024年年度报告"));
        // Scalars living in <p> tags are not reachable either way.
        assert!(report.is_err());
    }

    #[test]
    fn missing_fund_code_is_terminal() {
        let html = "<html><body><table><tr><td>基金名称</td><td>某基金</td></tr></table></body></html>";
        let err = parse_html(html.as_bytes(), None).unwrap_err();
        assert!(matches!(err, IngestError::Parse(_)));
    }
}
