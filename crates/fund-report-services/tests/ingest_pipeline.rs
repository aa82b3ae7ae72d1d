//! End-to-end pipeline tests: mocked portal, real parser, real Postgres.
//!
//! These tests need a scratch database; they skip themselves unless
//! `TEST_DATABASE_URL` points at one. The portal's instance endpoint is
//! served by mockito.

use std::time::Duration;

use bigdecimal::BigDecimal;
use uuid::Uuid;

use fund_report_core::config::IngestConfig;
use fund_report_core::enums::{ItemStatus, ParserKind, ReportType, TaskStatus};
use fund_report_core::ErrorKind;
use fund_report_core::models::{DownloadTask, ReportRef};
use fund_report_core::test_utils::TestDb;
use fund_report_services::FundReportService;

const MAPPING_JSON: &str = r#"{
  "scalars": {
    "fund_code": ["cn:FundCode"],
    "fund_name": ["cn:FundName"],
    "fund_manager": ["cn:FundManager"],
    "report_type": ["cn:ReportTypeCode"],
    "report_period_start": ["cn:ReportPeriodStartDate"],
    "report_period_end": ["cn:ReportPeriodEndDate"],
    "net_asset_value": ["cn:NetAssetValuePerShare"],
    "total_net_assets": ["cn:TotalNetAssets"],
    "period_profit": ["cn:PeriodProfit"]
  },
  "tables": {
    "top_holdings": {
      "group_by": "contextRef",
      "fields": {
        "rank": ["cn:HoldingRank"],
        "security_code": ["cn:SecurityCode"],
        "security_name": ["cn:SecurityName"],
        "shares": ["cn:SharesHeld"],
        "market_value": ["cn:HoldingMarketValue"],
        "net_value_ratio": ["cn:HoldingNetValueRatio"]
      }
    },
    "industry_allocations": {
      "group_by": "dimension",
      "axis": "cn:IndustryAxis",
      "fields": {
        "market_value": ["cn:IndustryMarketValue"],
        "net_value_ratio": ["cn:IndustryNetValueRatio"]
      }
    },
    "asset_allocations": {
      "kind": "scalar_group",
      "entries": [
        {"label": "股票", "market_value": ["cn:EquityMarketValue"], "net_value_ratio": ["cn:EquityNetValueRatio"]},
        {"label": "债券", "market_value": ["cn:BondMarketValue"], "net_value_ratio": ["cn:BondNetValueRatio"]},
        {"label": "银行存款", "market_value": ["cn:DepositMarketValue"], "net_value_ratio": ["cn:DepositNetValueRatio"]}
      ]
    }
  }
}"#;

fn xbrl_instance(fund_code: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<xbrl xmlns="http://www.xbrl.org/2003/instance"
      xmlns:link="http://www.xbrl.org/2003/linkbase"
      xmlns:xlink="http://www.w3.org/1999/xlink"
      xmlns:cn="http://csrc.example/fund">
  <link:schemaRef xlink:type="simple" xlink:href="http://csrc.example/taxonomy/csrc_v2.1/fund.xsd"/>
  <context id="c_dur">
    <entity><identifier scheme="http://csrc.example">{code}</identifier></entity>
    <period><startDate>2024-01-01</startDate><endDate>2024-12-31</endDate></period>
  </context>
  <context id="c_inst">
    <entity><identifier scheme="http://csrc.example">{code}</identifier></entity>
    <period><instant>2024-12-31</instant></period>
  </context>
  <context id="c_h1">
    <entity><identifier scheme="http://csrc.example">{code}</identifier></entity>
    <period><instant>2024-12-31</instant></period>
  </context>
  <unit id="u_cny"><measure>iso4217:CNY</measure></unit>
  <unit id="u_pure"><measure>pure</measure></unit>
  <cn:FundCode contextRef="c_dur">{code}</cn:FundCode>
  <cn:FundName contextRef="c_dur">测试基金{code}</cn:FundName>
  <cn:ReportTypeCode contextRef="c_dur">FB010010</cn:ReportTypeCode>
  <cn:ReportPeriodEndDate contextRef="c_dur">2024-12-31</cn:ReportPeriodEndDate>
  <cn:NetAssetValuePerShare contextRef="c_inst" unitRef="u_cny" decimals="4">1.0521</cn:NetAssetValuePerShare>
  <cn:TotalNetAssets contextRef="c_inst" unitRef="u_cny" decimals="2">3521000123.45</cn:TotalNetAssets>
  <cn:HoldingRank contextRef="c_h1">1</cn:HoldingRank>
  <cn:SecurityCode contextRef="c_h1">600519</cn:SecurityCode>
  <cn:SecurityName contextRef="c_h1">贵州茅台</cn:SecurityName>
  <cn:SharesHeld contextRef="c_h1" unitRef="u_pure" decimals="0">120000</cn:SharesHeld>
  <cn:HoldingMarketValue contextRef="c_h1" unitRef="u_cny" decimals="2">204000000.00</cn:HoldingMarketValue>
  <cn:HoldingNetValueRatio contextRef="c_h1" unitRef="u_pure" decimals="4">0.0579</cn:HoldingNetValueRatio>
  <cn:EquityMarketValue contextRef="c_inst" unitRef="u_cny" decimals="2">2099000000.00</cn:EquityMarketValue>
  <cn:EquityNetValueRatio contextRef="c_inst" unitRef="u_pure" decimals="4">0.5961</cn:EquityNetValueRatio>
  <cn:BondMarketValue contextRef="c_inst" unitRef="u_cny" decimals="2">1056000000.00</cn:BondMarketValue>
  <cn:BondNetValueRatio contextRef="c_inst" unitRef="u_pure" decimals="4">0.2999</cn:BondNetValueRatio>
  <cn:DepositMarketValue contextRef="c_inst" unitRef="u_cny" decimals="2">366000000.00</cn:DepositMarketValue>
  <cn:DepositNetValueRatio contextRef="c_inst" unitRef="u_pure" decimals="4">0.1040</cn:DepositNetValueRatio>
</xbrl>"#,
        code = fund_code
    )
}

fn ixbrl_container(fund_code: &str) -> String {
    let instance = xbrl_instance(fund_code)
        .replace("<?xml version=\"1.0\" encoding=\"UTF-8\"?>", "");
    format!(
        "<html xmlns:ix=\"http://www.xbrl.org/2013/inlineXBRL\"><head><title>年度报告</title></head><body><div style=\"display:none\">{}</div></body></html>",
        instance
    )
}

fn html_report(fund_code: &str) -> String {
    format!(
        r#"<html><head><title>测试基金{code}2024年年度报告</title></head><body>
<p>报告期：2024年1月1日至2024年12月31日</p>
<table>
  <tr><td>基金主代码</td><td>{code}</td></tr>
  <tr><td>基金名称</td><td>测试基金{code}</td></tr>
</table>
<table>
  <tr><th>序号</th><th>股票代码</th><th>股票名称</th><th>数量（股）</th><th>公允价值（元）</th><th>占基金资产净值比例（%）</th></tr>
  <tr><td>1</td><td>600519</td><td>贵州茅台</td><td>120,000</td><td>204,000,000.00</td><td>5.79</td></tr>
</table>
</body></html>"#,
        code = fund_code
    )
}

fn report_ref(upload_info_id: &str, fund_code: &str) -> ReportRef {
    ReportRef {
        upload_info_id: upload_info_id.to_string(),
        fund_code: fund_code.to_string(),
        fund_short_name: format!("测试基金{}", fund_code),
        organization_name: "测试基金管理有限公司".to_string(),
        report_send_date: chrono::NaiveDate::from_ymd_opt(2025, 3, 31).unwrap(),
        report_desc: format!("测试基金{}2024年年度报告", fund_code),
    }
}

struct PipelineHarness {
    service: FundReportService,
    _server: mockito::ServerGuard,
    _dirs: (tempfile::TempDir, tempfile::TempDir),
    save_dir: String,
}

/// Stand a full service up against a mocked portal, or `None` without a
/// test database.
async fn harness(artifacts: &[(&str, String)]) -> Option<PipelineHarness> {
    let Some(db) = TestDb::connect().await else {
        eprintln!("skipping: TEST_DATABASE_URL not set");
        return None;
    };
    db.clean().await;

    let mut server = mockito::Server::new_async().await;
    // Catch-all first: mockito matches newest-first, so the specific
    // instance mocks defined below win for known ids.
    server
        .mock("GET", mockito::Matcher::Any)
        .with_status(404)
        .create_async()
        .await;
    for (upload_info_id, body) in artifacts {
        server
            .mock("GET", "/instance_html_view.do")
            .match_query(mockito::Matcher::UrlEncoded(
                "instanceid".into(),
                (*upload_info_id).into(),
            ))
            .with_status(200)
            .with_body(body.clone())
            .create_async()
            .await;
    }

    let mappings = tempfile::tempdir().unwrap();
    std::fs::write(mappings.path().join("csrc_v2.1.json"), MAPPING_JSON).unwrap();
    let downloads = tempfile::tempdir().unwrap();
    let save_dir = downloads.path().to_string_lossy().into_owned();

    let mut config = IngestConfig::default();
    config.portal.instance_base = format!("{}/instance_html_view.do", server.url());
    config.portal.min_request_interval_ms = 1;
    config.download.initial_retry_delay_secs = 0;
    config.taxonomy.mappings_dir = mappings.path().to_string_lossy().into_owned();
    config.taxonomy.default_version = "csrc_v2.1".to_string();

    let service = FundReportService::new(db.pool().clone(), config).expect("service");
    Some(PipelineHarness {
        service,
        _server: server,
        _dirs: (mappings, downloads),
        save_dir,
    })
}

async fn await_terminal(service: &FundReportService, task_id: Uuid) -> DownloadTask {
    for _ in 0..300 {
        if let Some(task) = service.task_status(task_id).await.expect("status") {
            if task.status.is_terminal() {
                return task;
            }
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("task {} never reached a terminal state", task_id);
}

#[tokio::test]
#[serial_test::serial]
async fn mixed_format_batch_persists_every_item() {
    let artifacts = vec![
        ("90001", xbrl_instance("000001")),
        ("90002", ixbrl_container("000002")),
        ("90003", html_report("000003")),
    ];
    let Some(harness) = harness(&artifacts).await else {
        return;
    };
    let service = &harness.service;

    let refs = vec![
        report_ref("90001", "000001"),
        report_ref("90002", "000002"),
        report_ref("90003", "000003"),
    ];
    let task_id = service
        .enqueue_batch(refs, &harness.save_dir)
        .await
        .expect("enqueue");

    let task = await_terminal(service, task_id).await;
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.progress.total, 3);
    assert_eq!(task.progress.completed, 3);
    assert_eq!(task.progress.failed, 0);
    assert_eq!(
        task.progress.completed + task.progress.failed + task.progress.cancelled,
        task.progress.total
    );
    assert!(task
        .per_item
        .values()
        .all(|o| o.status == ItemStatus::Persisted && o.fund_report_id.is_some()));

    let period_end = chrono::NaiveDate::from_ymd_opt(2024, 12, 31).unwrap();

    // Plain XBRL artifact.
    let xbrl_row = service
        .reports()
        .find_by_natural_key("000001", period_end, ReportType::Annual)
        .await
        .expect("query")
        .expect("row");
    assert_eq!(xbrl_row.parser_kind, ParserKind::Xbrl);
    let (assets, holdings, _) = service
        .reports()
        .child_counts(xbrl_row.id)
        .await
        .expect("counts");
    assert_eq!(assets, 3);
    assert_eq!(holdings, 1);

    // iXBRL artifact lands through the unwrap path as XBRL.
    let ixbrl_row = service
        .reports()
        .find_by_natural_key("000002", period_end, ReportType::Annual)
        .await
        .expect("query")
        .expect("row");
    assert_eq!(ixbrl_row.parser_kind, ParserKind::Xbrl);

    // HTML artifact uses the fallback parser with bounded confidence.
    let html_row = service
        .reports()
        .find_by_natural_key("000003", period_end, ReportType::Annual)
        .await
        .expect("query")
        .expect("row");
    assert_eq!(html_row.parser_kind, ParserKind::Html);
    assert!(html_row.confidence <= BigDecimal::from(95) / BigDecimal::from(100));
}

#[tokio::test]
#[serial_test::serial]
async fn partial_failure_is_isolated_to_the_failing_item() {
    let artifacts = vec![("91001", xbrl_instance("000011"))];
    let Some(harness) = harness(&artifacts).await else {
        return;
    };
    let service = &harness.service;

    // 91002 has no mock behind it: the catch-all answers 404.
    let refs = vec![
        report_ref("91001", "000011"),
        report_ref("91002", "000012"),
    ];
    let task_id = service
        .enqueue_batch(refs, &harness.save_dir)
        .await
        .expect("enqueue");

    let task = await_terminal(service, task_id).await;
    assert_eq!(task.status, TaskStatus::Partial);
    assert_eq!(task.progress.completed, 1);
    assert_eq!(task.progress.failed, 1);

    let failed = &task.per_item["91002"];
    assert_eq!(failed.status, ItemStatus::Failed);
    let error = failed.error.as_ref().expect("error recorded");
    assert_eq!(error.kind, ErrorKind::Http);

    let ok = &task.per_item["91001"];
    assert_eq!(ok.status, ItemStatus::Persisted);
    assert!(ok.file_path.is_some());
}

#[tokio::test]
#[serial_test::serial]
async fn persisting_the_same_report_twice_never_duplicates() {
    let artifacts: Vec<(&str, String)> = vec![];
    let Some(harness) = harness(&artifacts).await else {
        return;
    };
    let service = &harness.service;

    let instance = xbrl_instance("000021");
    let path = std::env::temp_dir().join("idempotence_000021.xml");
    std::fs::write(&path, &instance).unwrap();
    let report = service
        .parse_file(&path)
        .into_report()
        .expect("parse fixture");
    std::fs::remove_file(&path).ok();

    let first = service.reports().save(&report).await.expect("first save");
    let second = service.reports().save(&report).await.expect("second save");
    assert_eq!(first, second);

    let (assets, holdings, industries) = service
        .reports()
        .child_counts(first)
        .await
        .expect("counts");
    assert_eq!(assets, 3);
    assert_eq!(holdings, 1);
    assert_eq!(industries, 0);

    let row = service
        .reports()
        .find_by_natural_key(
            "000021",
            chrono::NaiveDate::from_ymd_opt(2024, 12, 31).unwrap(),
            ReportType::Annual,
        )
        .await
        .expect("query")
        .expect("row");
    assert!(row.reparsed_at.is_some(), "second save stamps reparsed_at");
}

#[tokio::test]
#[serial_test::serial]
async fn oversized_batches_are_refused_up_front() {
    let artifacts: Vec<(&str, String)> = vec![];
    let Some(harness) = harness(&artifacts).await else {
        return;
    };
    let service = &harness.service;

    let refs: Vec<ReportRef> = (0..501)
        .map(|i| report_ref(&format!("{}", 95000 + i), "000031"))
        .collect();
    let err = service
        .enqueue_batch(refs, &harness.save_dir)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        fund_report_core::error::IngestError::Validation(_)
    ));

    let err = service
        .enqueue_batch(vec![], &harness.save_dir)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        fund_report_core::error::IngestError::Validation(_)
    ));
}

#[tokio::test]
#[serial_test::serial]
async fn cancellation_skips_remaining_steps() {
    let artifacts = vec![("92001", xbrl_instance("000041"))];
    let Some(harness) = harness(&artifacts).await else {
        return;
    };
    let service = &harness.service;

    let refs = vec![report_ref("92001", "000041")];
    let task_id = service
        .enqueue_batch(refs, &harness.save_dir)
        .await
        .expect("enqueue");

    // Whether the cancel lands before or after the chain finishes is
    // timing-dependent; both terminal states are legal, losing the task is
    // not.
    service.cancel(task_id).await.expect("cancel");
    let task = await_terminal(service, task_id).await;
    assert!(
        matches!(task.status, TaskStatus::Cancelled | TaskStatus::Completed),
        "unexpected terminal state {:?}",
        task.status
    );
}
