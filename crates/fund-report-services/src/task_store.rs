//! Durable store for batch download tasks.
//!
//! Single writer: only the service (create/cancel) and the orchestrator
//! (status, per-item outcomes, finalize) mutate rows, always under a
//! row-level lock. Progress counters are recomputed from the outcome map on
//! every write, never incremented, so they cannot drift. Terminal statuses
//! are written exactly once.

use chrono::Utc;
use diesel::prelude::*;
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use tracing::debug;
use uuid::Uuid;

use fund_report_core::database::DatabasePool;
use fund_report_core::enums::TaskStatus;
use fund_report_core::error::{IngestError, IngestResult};
use fund_report_core::models::{DownloadTask, DownloadTaskRow, ItemOutcome};
use fund_report_core::schema::download_tasks;

/// **Task Store**
///
/// CRUD surface over the `download_tasks` table.
#[derive(Clone)]
pub struct TaskStore {
    pool: DatabasePool,
}

impl TaskStore {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    /// Persist a freshly created task.
    pub async fn create(&self, task: &DownloadTask) -> IngestResult<()> {
        let mut conn = self.conn().await?;
        let row = DownloadTaskRow::from_task(task)?;
        diesel::insert_into(download_tasks::table)
            .values(&row)
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    /// Read one task by id.
    pub async fn get(&self, task_id: Uuid) -> IngestResult<Option<DownloadTask>> {
        let mut conn = self.conn().await?;
        let row = download_tasks::table
            .find(task_id)
            .first::<DownloadTaskRow>(&mut conn)
            .await
            .optional()?;
        row.map(DownloadTaskRow::into_task).transpose()
    }

    /// Move a task to a new lifecycle status.
    ///
    /// Writes onto a terminal status are ignored: the first terminal write
    /// wins.
    pub async fn update_status(&self, task_id: Uuid, status: TaskStatus) -> IngestResult<()> {
        let mut conn = self.conn().await?;
        conn.transaction::<(), IngestError, _>(|conn| {
            async move {
                let mut task = load_for_update(conn, task_id).await?;
                if task.status.is_terminal() {
                    debug!(%task_id, ?status, "ignoring status write on terminal task");
                    return Ok(());
                }
                // A cancel requested before the orchestrator picked the
                // task up outranks the late Running mark.
                if task.status == TaskStatus::Cancelling && status == TaskStatus::Running {
                    return Ok(());
                }
                task.status = status;
                write_back(conn, &task).await
            }
            .scope_boxed()
        })
        .await
    }

    /// Record the outcome of one per-report chain step.
    pub async fn update_item(
        &self,
        task_id: Uuid,
        upload_info_id: &str,
        outcome: ItemOutcome,
    ) -> IngestResult<()> {
        let mut conn = self.conn().await?;
        let upload_info_id = upload_info_id.to_string();
        conn.transaction::<(), IngestError, _>(|conn| {
            async move {
                let mut task = load_for_update(conn, task_id).await?;
                task.per_item.insert(upload_info_id, outcome);
                task.recompute_progress();
                write_back(conn, &task).await
            }
            .scope_boxed()
        })
        .await
    }

    /// Flip a pending or running task to `Cancelling`.
    ///
    /// Returns whether the task is (now) cancelling; terminal tasks are left
    /// untouched.
    pub async fn request_cancel(&self, task_id: Uuid) -> IngestResult<bool> {
        let mut conn = self.conn().await?;
        conn.transaction::<bool, IngestError, _>(|conn| {
            async move {
                let mut task = load_for_update(conn, task_id).await?;
                match task.status {
                    TaskStatus::Pending | TaskStatus::Running => {
                        task.status = TaskStatus::Cancelling;
                        write_back(conn, &task).await?;
                        Ok(true)
                    }
                    TaskStatus::Cancelling => Ok(true),
                    _ => Ok(false),
                }
            }
            .scope_boxed()
        })
        .await
    }

    /// Whether cooperative cancellation has been requested.
    pub async fn is_cancelling(&self, task_id: Uuid) -> IngestResult<bool> {
        Ok(self
            .get(task_id)
            .await?
            .map(|t| t.status == TaskStatus::Cancelling)
            .unwrap_or(false))
    }

    /// Aggregate the per-item outcomes into the task's terminal status.
    ///
    /// Runs exactly once per batch (after every chain has terminated); a
    /// second call observes the terminal status and leaves it untouched.
    pub async fn finalize(&self, task_id: Uuid) -> IngestResult<DownloadTask> {
        let mut conn = self.conn().await?;
        conn.transaction::<DownloadTask, IngestError, _>(|conn| {
            async move {
                let mut task = load_for_update(conn, task_id).await?;
                if task.status.is_terminal() {
                    return Ok(task);
                }
                let was_cancelled = task.status == TaskStatus::Cancelling;
                task.recompute_progress();
                task.status = task.terminal_status(was_cancelled);
                write_back(conn, &task).await?;
                Ok(task)
            }
            .scope_boxed()
        })
        .await
    }

    async fn conn(
        &self,
    ) -> IngestResult<diesel_async::pooled_connection::bb8::PooledConnection<'_, AsyncPgConnection>>
    {
        self.pool
            .get()
            .await
            .map_err(|e| IngestError::DbTransport(format!("failed to get connection: {}", e)))
    }
}

async fn load_for_update(
    conn: &mut AsyncPgConnection,
    task_id: Uuid,
) -> IngestResult<DownloadTask> {
    let row = download_tasks::table
        .find(task_id)
        .for_update()
        .first::<DownloadTaskRow>(conn)
        .await
        .optional()?
        .ok_or_else(|| IngestError::Internal(format!("unknown task {}", task_id)))?;
    row.into_task()
}

async fn write_back(conn: &mut AsyncPgConnection, task: &DownloadTask) -> IngestResult<()> {
    let mut task = task.clone();
    task.updated_at = Utc::now();
    let row = DownloadTaskRow::from_task(&task)?;
    diesel::update(download_tasks::table.find(task.task_id))
        .set((
            download_tasks::status.eq(row.status),
            download_tasks::updated_at.eq(row.updated_at),
            download_tasks::per_item.eq(row.per_item),
            download_tasks::progress.eq(row.progress),
        ))
        .execute(conn)
        .await?;
    Ok(())
}
