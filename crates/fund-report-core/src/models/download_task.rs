use std::collections::HashMap;

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::enums::{ItemStatus, TaskStatus};
use crate::error::{ErrorKind, IngestError, IngestResult};
use crate::schema::download_tasks;

/// **Download Task**
///
/// Durable record of one batch ingest request: the requested report
/// references, the per-report outcomes keyed by `upload_info_id`, and an
/// aggregate progress block recomputed from the outcomes on every update.
///
/// The task store is the single writer of this state; everything else reads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadTask {
    pub task_id: Uuid,
    pub status: TaskStatus,
    pub save_dir: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// The `upload_info_id`s requested, in submission order.
    pub requested_refs: Vec<String>,

    /// Outcome of each requested report, keyed by `upload_info_id`.
    pub per_item: HashMap<String, ItemOutcome>,

    /// Aggregate counters derived from `per_item`.
    pub progress: TaskProgress,
}

/// Outcome of one per-report chain within a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemOutcome {
    pub status: ItemStatus,

    /// Where the downloaded artifact landed, once the download step ran.
    pub file_path: Option<String>,

    /// Persisted report row id, once the persist step ran.
    pub fund_report_id: Option<Uuid>,

    /// Error details when `status == Failed`.
    pub error: Option<ItemError>,
}

/// Structured error recorded on a failed item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemError {
    pub kind: ErrorKind,
    pub message: String,
}

/// Aggregate progress of a batch task.
///
/// `completed` counts persisted items, `failed` failed ones, `cancelled`
/// items skipped by cooperative cancellation. For every finished task
/// `completed + failed + cancelled == total`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TaskProgress {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub percent: f64,
}

impl ItemOutcome {
    pub fn pending() -> Self {
        Self {
            status: ItemStatus::Pending,
            file_path: None,
            fund_report_id: None,
            error: None,
        }
    }

    pub fn failed(err: &IngestError) -> Self {
        Self {
            status: ItemStatus::Failed,
            file_path: None,
            fund_report_id: None,
            error: Some(ItemError {
                kind: err.kind(),
                message: err.to_string(),
            }),
        }
    }
}

impl DownloadTask {
    /// A fresh `Pending` task covering `refs`, all items `Pending`.
    pub fn new(task_id: Uuid, refs: &[String], save_dir: &str) -> Self {
        let per_item: HashMap<String, ItemOutcome> = refs
            .iter()
            .map(|r| (r.clone(), ItemOutcome::pending()))
            .collect();
        let now = Utc::now();
        let mut task = Self {
            task_id,
            status: TaskStatus::Pending,
            save_dir: save_dir.to_string(),
            created_at: now,
            updated_at: now,
            requested_refs: refs.to_vec(),
            per_item,
            progress: TaskProgress::default(),
        };
        task.recompute_progress();
        task
    }

    /// Recompute the aggregate counters from `per_item`.
    ///
    /// Counters are never incremented in place; deriving them from the
    /// outcome map on every update keeps them drift-free.
    pub fn recompute_progress(&mut self) {
        let total = self.requested_refs.len();
        let completed = self
            .per_item
            .values()
            .filter(|o| o.status == ItemStatus::Persisted)
            .count();
        let failed = self
            .per_item
            .values()
            .filter(|o| o.status == ItemStatus::Failed)
            .count();
        let cancelled = self
            .per_item
            .values()
            .filter(|o| o.status == ItemStatus::Cancelled)
            .count();
        let done = completed + failed + cancelled;
        let percent = if total == 0 {
            100.0
        } else {
            done as f64 * 100.0 / total as f64
        };
        self.progress = TaskProgress {
            total,
            completed,
            failed,
            cancelled,
            percent,
        };
    }

    /// The terminal status implied by the per-item outcomes.
    pub fn terminal_status(&self, was_cancelled: bool) -> TaskStatus {
        if was_cancelled {
            return TaskStatus::Cancelled;
        }
        let total = self.requested_refs.len();
        if total > 0 && self.progress.completed == total {
            TaskStatus::Completed
        } else if self.progress.completed == 0 {
            TaskStatus::Failed
        } else {
            TaskStatus::Partial
        }
    }
}

/// Diesel row form of a [`DownloadTask`]; the collection-valued fields are
/// stored as JSONB.
#[derive(Debug, Clone, Queryable, Selectable, Insertable, Serialize, Deserialize)]
#[diesel(table_name = download_tasks)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct DownloadTaskRow {
    pub task_id: Uuid,
    pub status: TaskStatus,
    pub save_dir: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub requested_refs: serde_json::Value,
    pub per_item: serde_json::Value,
    pub progress: serde_json::Value,
}

impl DownloadTaskRow {
    pub fn from_task(task: &DownloadTask) -> IngestResult<Self> {
        Ok(Self {
            task_id: task.task_id,
            status: task.status,
            save_dir: task.save_dir.clone(),
            created_at: task.created_at,
            updated_at: task.updated_at,
            requested_refs: serde_json::to_value(&task.requested_refs)?,
            per_item: serde_json::to_value(&task.per_item)?,
            progress: serde_json::to_value(&task.progress)?,
        })
    }

    pub fn into_task(self) -> IngestResult<DownloadTask> {
        Ok(DownloadTask {
            task_id: self.task_id,
            status: self.status,
            save_dir: self.save_dir,
            created_at: self.created_at,
            updated_at: self.updated_at,
            requested_refs: serde_json::from_value(self.requested_refs)
                .map_err(|e| IngestError::Internal(format!("corrupt requested_refs: {}", e)))?,
            per_item: serde_json::from_value(self.per_item)
                .map_err(|e| IngestError::Internal(format!("corrupt per_item: {}", e)))?,
            progress: serde_json::from_value(self.progress)
                .map_err(|e| IngestError::Internal(format!("corrupt progress: {}", e)))?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task_with(refs: &[&str]) -> DownloadTask {
        let refs: Vec<String> = refs.iter().map(|s| s.to_string()).collect();
        DownloadTask::new(Uuid::new_v4(), &refs, "/tmp/reports")
    }

    #[test]
    fn new_task_starts_pending_with_zero_progress() {
        let task = task_with(&["a", "b", "c"]);
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.progress.total, 3);
        assert_eq!(task.progress.completed, 0);
        assert_eq!(task.progress.percent, 0.0);
        assert!(task
            .per_item
            .values()
            .all(|o| o.status == ItemStatus::Pending));
    }

    #[test]
    fn progress_counters_are_recomputed_not_incremented() {
        let mut task = task_with(&["a", "b", "c", "d"]);
        task.per_item.get_mut("a").unwrap().status = ItemStatus::Persisted;
        task.per_item.get_mut("b").unwrap().status = ItemStatus::Failed;
        task.per_item.get_mut("c").unwrap().status = ItemStatus::Cancelled;
        task.recompute_progress();

        assert_eq!(task.progress.total, 4);
        assert_eq!(task.progress.completed, 1);
        assert_eq!(task.progress.failed, 1);
        assert_eq!(task.progress.cancelled, 1);
        assert_eq!(task.progress.percent, 75.0);
        assert_eq!(
            task.progress.completed + task.progress.failed + task.progress.cancelled,
            3
        );
    }

    #[test]
    fn terminal_status_aggregates_outcomes() {
        let mut task = task_with(&["a", "b"]);
        task.per_item.get_mut("a").unwrap().status = ItemStatus::Persisted;
        task.per_item.get_mut("b").unwrap().status = ItemStatus::Persisted;
        task.recompute_progress();
        assert_eq!(task.terminal_status(false), TaskStatus::Completed);

        task.per_item.get_mut("b").unwrap().status = ItemStatus::Failed;
        task.recompute_progress();
        assert_eq!(task.terminal_status(false), TaskStatus::Partial);

        task.per_item.get_mut("a").unwrap().status = ItemStatus::Failed;
        task.recompute_progress();
        assert_eq!(task.terminal_status(false), TaskStatus::Failed);

        assert_eq!(task.terminal_status(true), TaskStatus::Cancelled);
    }

    #[test]
    fn row_conversion_round_trips() {
        let mut task = task_with(&["x"]);
        task.per_item.get_mut("x").unwrap().status = ItemStatus::Persisted;
        task.per_item.get_mut("x").unwrap().fund_report_id = Some(Uuid::new_v4());
        task.recompute_progress();

        let row = DownloadTaskRow::from_task(&task).unwrap();
        let back = row.into_task().unwrap();
        assert_eq!(back, task);
    }
}
