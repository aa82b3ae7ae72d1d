//! The public contract of the ingestion core.
//!
//! Hosting shells (HTTP, CLI, messaging) map 1:1 onto these operations and
//! add no business logic of their own: `search`, `download`, `parse_file`,
//! `enqueue_batch`, `task_status`, plus the cooperative `cancel`.

use std::path::Path;
use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use fund_report_core::config::IngestConfig;
use fund_report_core::database::DatabasePool;
use fund_report_core::error::{IngestError, IngestResult};
use fund_report_core::models::{ArtifactRecord, DownloadTask, ReportRef};
use fund_report_parser::{FundReportParser, ParseResult};
use fund_report_scraper::{Downloader, PortalClient, SearchCriteria, SearchPage};

use crate::orchestrator::IngestOrchestrator;
use crate::persistence::FundReportStore;
use crate::task_store::TaskStore;

/// **Fund Report Service**
///
/// Single entry point for searching the portal, ingesting batches and
/// inspecting task state.
pub struct FundReportService {
    portal: Arc<PortalClient>,
    downloader: Arc<Downloader>,
    parser: Arc<FundReportParser>,
    reports: FundReportStore,
    tasks: TaskStore,
    orchestrator: Arc<IngestOrchestrator>,
    config: IngestConfig,
}

impl FundReportService {
    pub fn new(pool: DatabasePool, config: IngestConfig) -> IngestResult<Self> {
        let portal = Arc::new(PortalClient::new(config.portal.clone())?);
        let downloader = Arc::new(Downloader::new(
            config.download.clone(),
            &config.portal.user_agent,
        )?);
        let parser = Arc::new(FundReportParser::new(&config.taxonomy));
        let reports = FundReportStore::new(pool.clone());
        let tasks = TaskStore::new(pool);

        let orchestrator = Arc::new(IngestOrchestrator::new(
            Arc::clone(&portal),
            Arc::clone(&downloader),
            Arc::clone(&parser),
            reports.clone(),
            tasks.clone(),
            config.orchestrator.clone(),
        ));

        Ok(Self {
            portal,
            downloader,
            parser,
            reports,
            tasks,
            orchestrator,
            config,
        })
    }

    /// Search the portal for report references.
    pub async fn search(&self, criteria: &SearchCriteria) -> IngestResult<SearchPage> {
        self.portal.list_reports(criteria).await
    }

    /// Download one report artifact outside of any batch.
    pub async fn download(
        &self,
        report_ref: &ReportRef,
        dir: &Path,
    ) -> IngestResult<ArtifactRecord> {
        let url = self.portal.resolve_download_url(&report_ref.upload_info_id);
        let destination = dir.join(report_ref.artifact_filename());
        self.downloader
            .download_with_retry(&url, &destination)
            .await
    }

    /// Parse one artifact from disk, bypassing download and persistence.
    /// Useful for reparse workflows over retained artifacts.
    pub fn parse_file(&self, path: &Path) -> ParseResult {
        self.parser.parse_file(path, None)
    }

    /// Accept a batch, persist it as a `Pending` task and launch the
    /// orchestrator. Returns immediately with the task id.
    pub async fn enqueue_batch(
        &self,
        refs: Vec<ReportRef>,
        save_dir: &str,
    ) -> IngestResult<Uuid> {
        if refs.is_empty() {
            return Err(IngestError::Validation(
                "batch contains no report references".to_string(),
            ));
        }
        let cap = self.config.orchestrator.batch_cap;
        if refs.len() > cap {
            return Err(IngestError::Validation(format!(
                "batch of {} reports exceeds the cap of {}",
                refs.len(),
                cap
            )));
        }

        let task_id = Uuid::new_v4();
        let ids: Vec<String> = refs.iter().map(|r| r.upload_info_id.clone()).collect();
        let task = DownloadTask::new(task_id, &ids, save_dir);
        self.tasks.create(&task).await?;

        let orchestrator = Arc::clone(&self.orchestrator);
        let save_dir = save_dir.to_string();
        tokio::spawn(async move {
            orchestrator.run_batch(task_id, refs, save_dir).await;
        });

        info!(%task_id, "batch accepted");
        Ok(task_id)
    }

    /// Read-through task status.
    pub async fn task_status(&self, task_id: Uuid) -> IngestResult<Option<DownloadTask>> {
        self.tasks.get(task_id).await
    }

    /// Request cooperative cancellation of a batch.
    ///
    /// In-flight chains complete their current step; everything else is
    /// skipped and the task terminates as `Cancelled`.
    pub async fn cancel(&self, task_id: Uuid) -> IngestResult<bool> {
        self.tasks.request_cancel(task_id).await
    }

    /// The persistence layer, exposed for read-side queries in tests and
    /// reparse tooling.
    pub fn reports(&self) -> &FundReportStore {
        &self.reports
    }
}
