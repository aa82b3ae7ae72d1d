//! Batch orchestration of per-report ingest chains.
//!
//! A batch fans out one `download -> parse -> persist` chain per report
//! over a bounded worker pool. Chains are independent: an item failure is
//! recorded and the batch moves on. Values crossing step boundaries are
//! plain serde structures, never ORM entities. Cancellation is cooperative:
//! a cancelling task lets the current step finish and skips the rest.
//! Finalization runs exactly once, after every chain has terminated.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use fund_report_core::config::OrchestratorConfig;
use fund_report_core::enums::{ItemStatus, TaskStatus};
use fund_report_core::error::{IngestError, IngestResult};
use fund_report_core::models::{ArtifactRecord, ItemOutcome, ParsedFundReport, ReportRef};
use fund_report_parser::FundReportParser;
use fund_report_scraper::{Downloader, PortalClient};

use crate::persistence::FundReportStore;
use crate::task_store::TaskStore;

/// **Ingest Orchestrator**
///
/// Drives one batch task to its terminal state.
pub struct IngestOrchestrator {
    portal: Arc<PortalClient>,
    downloader: Arc<Downloader>,
    parser: Arc<FundReportParser>,
    reports: FundReportStore,
    tasks: TaskStore,
    config: OrchestratorConfig,
}

impl IngestOrchestrator {
    pub fn new(
        portal: Arc<PortalClient>,
        downloader: Arc<Downloader>,
        parser: Arc<FundReportParser>,
        reports: FundReportStore,
        tasks: TaskStore,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            portal,
            downloader,
            parser,
            reports,
            tasks,
            config,
        }
    }

    /// Run every chain of a batch, then finalize the task.
    pub async fn run_batch(
        self: Arc<Self>,
        task_id: Uuid,
        refs: Vec<ReportRef>,
        save_dir: String,
    ) {
        info!(%task_id, reports = refs.len(), "batch starting");
        if let Err(e) = self.tasks.update_status(task_id, TaskStatus::Running).await {
            error!(%task_id, "cannot mark task running: {}", e);
            return;
        }

        let semaphore = Arc::new(Semaphore::new(self.config.worker_pool_size.max(1)));
        let mut handles = Vec::new();

        for report_ref in refs {
            let orchestrator = Arc::clone(&self);
            let semaphore = Arc::clone(&semaphore);
            let save_dir = save_dir.clone();

            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire().await.unwrap();
                orchestrator.run_chain(task_id, report_ref, &save_dir).await;
            }));
        }

        for handle in handles {
            if let Err(e) = handle.await {
                error!(%task_id, "chain task panicked: {}", e);
            }
        }

        match self.tasks.finalize(task_id).await {
            Ok(task) => info!(
                %task_id,
                status = task.status.as_str(),
                completed = task.progress.completed,
                failed = task.progress.failed,
                cancelled = task.progress.cancelled,
                "batch finished"
            ),
            Err(e) => error!(%task_id, "finalize failed: {}", e),
        }
    }

    /// One report's `download -> parse -> persist` chain.
    async fn run_chain(&self, task_id: Uuid, report_ref: ReportRef, save_dir: &str) {
        let upload_info_id = report_ref.upload_info_id.clone();

        if self.cancelled(task_id).await {
            self.record(task_id, &upload_info_id, cancelled_outcome(None)).await;
            return;
        }

        // Step 1: download.
        let artifact = match self.download_step(&report_ref, save_dir).await {
            Ok(artifact) => artifact,
            Err(e) => {
                warn!(%task_id, upload_info_id, "download failed: {}", e);
                self.record(task_id, &upload_info_id, ItemOutcome::failed(&e)).await;
                return;
            }
        };
        self.record(
            task_id,
            &upload_info_id,
            ItemOutcome {
                status: ItemStatus::Downloaded,
                file_path: Some(artifact.file_path.clone()),
                fund_report_id: None,
                error: None,
            },
        )
        .await;

        if self.cancelled(task_id).await {
            self.record(
                task_id,
                &upload_info_id,
                cancelled_outcome(Some(artifact.file_path.clone())),
            )
            .await;
            return;
        }

        // Step 2: parse.
        let report = match self.parse_step(&artifact, &report_ref).await {
            Ok(report) => report,
            Err(e) => {
                warn!(%task_id, upload_info_id, "parse failed: {}", e);
                let mut outcome = ItemOutcome::failed(&e);
                outcome.file_path = Some(artifact.file_path.clone());
                self.record(task_id, &upload_info_id, outcome).await;
                return;
            }
        };
        self.record(
            task_id,
            &upload_info_id,
            ItemOutcome {
                status: ItemStatus::Parsed,
                file_path: Some(artifact.file_path.clone()),
                fund_report_id: None,
                error: None,
            },
        )
        .await;

        if self.cancelled(task_id).await {
            self.record(
                task_id,
                &upload_info_id,
                cancelled_outcome(Some(artifact.file_path.clone())),
            )
            .await;
            return;
        }

        // Step 3: persist.
        match self.persist_step(&report).await {
            Ok(report_id) => {
                debug!(%task_id, upload_info_id, %report_id, "chain persisted");
                self.record(
                    task_id,
                    &upload_info_id,
                    ItemOutcome {
                        status: ItemStatus::Persisted,
                        file_path: Some(artifact.file_path.clone()),
                        fund_report_id: Some(report_id),
                        error: None,
                    },
                )
                .await;
            }
            Err(e) => {
                warn!(%task_id, upload_info_id, "persist failed: {}", e);
                let mut outcome = ItemOutcome::failed(&e);
                outcome.file_path = Some(artifact.file_path.clone());
                self.record(task_id, &upload_info_id, outcome).await;
            }
        }
    }

    async fn download_step(
        &self,
        report_ref: &ReportRef,
        save_dir: &str,
    ) -> IngestResult<ArtifactRecord> {
        let url = self.portal.resolve_download_url(&report_ref.upload_info_id);
        let destination = Path::new(save_dir).join(report_ref.artifact_filename());

        match timeout(
            Duration::from_secs(self.config.download_timeout_secs),
            self.downloader.download_with_retry(&url, &destination),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(IngestError::Timeout {
                operation: "download step".to_string(),
                seconds: self.config.download_timeout_secs,
            }),
        }
    }

    /// Parse on a blocking worker: extraction is CPU-bound and may hold a
    /// thread for seconds, which the async scheduler must not interpret as
    /// a hang below the step timeout.
    async fn parse_step(
        &self,
        artifact: &ArtifactRecord,
        report_ref: &ReportRef,
    ) -> IngestResult<ParsedFundReport> {
        let parser = Arc::clone(&self.parser);
        let path = PathBuf::from(&artifact.file_path);
        let desc_hint = report_ref.report_desc.clone();

        let joined = timeout(
            Duration::from_secs(self.config.parse_timeout_secs),
            tokio::task::spawn_blocking(move || parser.parse_file(&path, Some(&desc_hint))),
        )
        .await;

        match joined {
            Err(_) => Err(IngestError::Timeout {
                operation: "parse step".to_string(),
                seconds: self.config.parse_timeout_secs,
            }),
            Ok(Err(join_err)) => Err(IngestError::Internal(format!(
                "parse worker failed: {}",
                join_err
            ))),
            Ok(Ok(parse_result)) => parse_result.into_report(),
        }
    }

    /// Persist with retry on transport failures; constraint violations are
    /// terminal immediately.
    async fn persist_step(&self, report: &ParsedFundReport) -> IngestResult<Uuid> {
        let mut delay = Duration::from_secs(1);
        let mut attempt: u32 = 1;
        loop {
            let result = timeout(
                Duration::from_secs(self.config.persist_timeout_secs),
                self.reports.save(report),
            )
            .await
            .unwrap_or_else(|_| {
                Err(IngestError::Timeout {
                    operation: "persist step".to_string(),
                    seconds: self.config.persist_timeout_secs,
                })
            });

            match result {
                Ok(id) => return Ok(id),
                Err(e) if e.is_retryable() && attempt < 3 => {
                    warn!(attempt, "transient persist failure, retrying: {}", e);
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn cancelled(&self, task_id: Uuid) -> bool {
        match self.tasks.is_cancelling(task_id).await {
            Ok(cancelling) => cancelling,
            Err(e) => {
                warn!(%task_id, "cancellation probe failed: {}", e);
                false
            }
        }
    }

    async fn record(&self, task_id: Uuid, upload_info_id: &str, outcome: ItemOutcome) {
        if let Err(e) = self.tasks.update_item(task_id, upload_info_id, outcome).await {
            warn!(%task_id, upload_info_id, "item update failed: {}", e);
        }
    }
}

fn cancelled_outcome(file_path: Option<String>) -> ItemOutcome {
    ItemOutcome {
        status: ItemStatus::Cancelled,
        file_path,
        fund_report_id: None,
        error: None,
    }
}
