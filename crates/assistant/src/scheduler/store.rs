//! TaskStore: SQLite persistence for scheduled tasks.
//!
//! One table, no joins. Each operation opens a short-lived connection
//! and runs on the blocking pool; the runtime is the single writer.
//! Databases written by older layouts (no `model` column) are migrated
//! on open, and the row deserialiser tolerates eleven-column rows.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::Connection;

use valet_domain::error::{Error, Result};

use super::model::{ScheduledTask, TaskRow};

const CREATE_TABLE: &str = "
CREATE TABLE IF NOT EXISTS scheduled_tasks (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    task_type TEXT NOT NULL,
    schedule TEXT NOT NULL,
    action TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    notification_channel TEXT,
    model TEXT,
    active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL,
    last_run_at TEXT,
    next_run_at TEXT
)";

const SELECT_COLUMNS: &str = "id, name, task_type, schedule, action, description, \
     notification_channel, model, active, created_at, last_run_at, next_run_at";

pub struct TaskStore {
    db_path: PathBuf,
}

impl TaskStore {
    pub fn new(db_path: PathBuf) -> Self {
        Self { db_path }
    }

    fn open(path: &Path) -> Result<Connection> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(storage_err)?;
        conn.execute(CREATE_TABLE, []).map_err(storage_err)?;
        migrate_model_column(&conn)?;
        Ok(conn)
    }

    /// Run a closure against a fresh connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let conn = Self::open(&path)?;
            f(&conn)
        })
        .await
        .map_err(|e| Error::Storage(format!("task store worker: {e}")))?
    }

    // ── CRUD ──────────────────────────────────────────────────────

    pub async fn add(&self, task: &ScheduledTask) -> Result<()> {
        let row = task.to_row()?;
        let (name, id) = (task.name.clone(), task.id.clone());
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO scheduled_tasks \
                     (id, name, task_type, schedule, action, description, \
                      notification_channel, model, active, created_at, last_run_at, next_run_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                rusqlite::params![
                    row.id,
                    row.name,
                    row.task_type,
                    row.schedule,
                    row.action,
                    row.description,
                    row.notification_channel,
                    row.model,
                    row.active,
                    row.created_at,
                    row.last_run_at,
                    row.next_run_at,
                ],
            )
            .map_err(storage_err)?;
            Ok(())
        })
        .await?;
        tracing::info!(task = %name, task_id = %id, "added scheduled task");
        Ok(())
    }

    pub async fn get(&self, task_id: &str) -> Result<Option<ScheduledTask>> {
        let id = task_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {SELECT_COLUMNS} FROM scheduled_tasks WHERE id = ?1"
                ))
                .map_err(storage_err)?;
            let mut rows = stmt
                .query_map([id], read_row)
                .map_err(storage_err)?
                .collect::<std::result::Result<Vec<TaskRow>, _>>()
                .map_err(storage_err)?;
            match rows.pop() {
                Some(row) => Ok(Some(ScheduledTask::from_row(row)?)),
                None => Ok(None),
            }
        })
        .await
    }

    pub async fn list_active(&self) -> Result<Vec<ScheduledTask>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {SELECT_COLUMNS} FROM scheduled_tasks \
                     WHERE active = 1 ORDER BY created_at"
                ))
                .map_err(storage_err)?;
            let rows = stmt
                .query_map([], read_row)
                .map_err(storage_err)?
                .collect::<std::result::Result<Vec<TaskRow>, _>>()
                .map_err(storage_err)?;
            rows.into_iter().map(ScheduledTask::from_row).collect()
        })
        .await
    }

    /// Case-insensitive search over active task names and descriptions.
    pub async fn search_active(&self, query: &str) -> Result<Vec<ScheduledTask>> {
        let pattern = format!("%{}%", query.to_lowercase());
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {SELECT_COLUMNS} FROM scheduled_tasks \
                     WHERE active = 1 \
                       AND (lower(name) LIKE ?1 OR lower(description) LIKE ?1) \
                     ORDER BY created_at"
                ))
                .map_err(storage_err)?;
            let rows = stmt
                .query_map([pattern], read_row)
                .map_err(storage_err)?
                .collect::<std::result::Result<Vec<TaskRow>, _>>()
                .map_err(storage_err)?;
            rows.into_iter().map(ScheduledTask::from_row).collect()
        })
        .await
    }

    /// Mark a task inactive. Returns whether a row changed.
    pub async fn deactivate(&self, task_id: &str) -> Result<bool> {
        let id = task_id.to_string();
        let updated = self
            .with_conn(move |conn| {
                conn.execute("UPDATE scheduled_tasks SET active = 0 WHERE id = ?1", [id])
                    .map_err(storage_err)
            })
            .await?;
        if updated > 0 {
            tracing::info!(task_id, "deactivated scheduled task");
        }
        Ok(updated > 0)
    }

    /// Set `last_run_at` (defaults to now).
    pub async fn update_last_run(
        &self,
        task_id: &str,
        timestamp: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let id = task_id.to_string();
        let ts = timestamp.unwrap_or_else(Utc::now).to_rfc3339();
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE scheduled_tasks SET last_run_at = ?1 WHERE id = ?2",
                rusqlite::params![ts, id],
            )
            .map_err(storage_err)?;
            Ok(())
        })
        .await
    }

    /// Set or clear `next_run_at`.
    pub async fn update_next_run(
        &self,
        task_id: &str,
        timestamp: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let id = task_id.to_string();
        let ts = timestamp.map(|t| t.to_rfc3339());
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE scheduled_tasks SET next_run_at = ?1 WHERE id = ?2",
                rusqlite::params![ts, id],
            )
            .map_err(storage_err)?;
            Ok(())
        })
        .await
    }

    /// Set or clear the model override.
    pub async fn update_model(&self, task_id: &str, model: Option<String>) -> Result<()> {
        let id = task_id.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE scheduled_tasks SET model = ?1 WHERE id = ?2",
                rusqlite::params![model, id],
            )
            .map_err(storage_err)?;
            Ok(())
        })
        .await
    }
}

fn storage_err(e: rusqlite::Error) -> Error {
    Error::Storage(e.to_string())
}

/// Add the `model` column to databases created before it existed.
fn migrate_model_column(conn: &Connection) -> Result<()> {
    let mut stmt = conn
        .prepare("PRAGMA table_info(scheduled_tasks)")
        .map_err(storage_err)?;
    let columns: Vec<String> = stmt
        .query_map([], |row| row.get::<_, String>(1))
        .map_err(storage_err)?
        .collect::<std::result::Result<_, _>>()
        .map_err(storage_err)?;
    if !columns.iter().any(|c| c == "model") {
        tracing::info!("migrating scheduled_tasks: adding model column");
        conn.execute("ALTER TABLE scheduled_tasks ADD COLUMN model TEXT", [])
            .map_err(storage_err)?;
    }
    Ok(())
}

/// Map a result row to a [`TaskRow`], tolerating rows from layouts
/// that predate the `model` column (eleven columns, everything after
/// `notification_channel` shifted left).
fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<TaskRow> {
    let has_model = row.as_ref().column_count() > 11;
    let shift = usize::from(!has_model);
    Ok(TaskRow {
        id: row.get(0)?,
        name: row.get(1)?,
        task_type: row.get(2)?,
        schedule: row.get(3)?,
        action: row.get(4)?,
        description: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
        notification_channel: row.get(6)?,
        model: if has_model { row.get(7)? } else { None },
        active: row.get(8 - shift)?,
        created_at: row.get(9 - shift)?,
        last_run_at: row.get(10 - shift)?,
        next_run_at: row.get(11 - shift)?,
    })
}
