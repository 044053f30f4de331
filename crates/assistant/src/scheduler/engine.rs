//! SchedulerEngine: trigger evaluation and job lifecycle.
//!
//! A periodic tick loads active tasks and fires the ones whose
//! `next_run_at` has arrived, sequentially, through the executor.
//! One-shots are deactivated after firing; recurring tasks get their
//! next fire time written back. Fire times are recomputed fresh at
//! startup, so recurring windows missed while offline never replay
//! (one-shots that elapsed are handed to missed-task recovery
//! instead).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::task::JoinHandle;

use valet_domain::error::Result;

use super::cron::parse_tz;
use super::executor::TaskExecutor;
use super::model::ScheduledTask;
use super::store::TaskStore;

pub struct SchedulerEngine {
    store: Arc<TaskStore>,
    tz: chrono_tz::Tz,
    tick_interval: Duration,
    tick_task: Mutex<Option<JoinHandle<()>>>,
    running: AtomicBool,
}

impl SchedulerEngine {
    pub fn new(store: Arc<TaskStore>, timezone: &str, tick_interval: Duration) -> Self {
        Self {
            store,
            tz: parse_tz(timezone),
            tick_interval,
            tick_task: Mutex::new(None),
            running: AtomicBool::new(false),
        }
    }

    pub fn timezone(&self) -> chrono_tz::Tz {
        self.tz
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    // ── Lifecycle ─────────────────────────────────────────────────

    /// Compute fire times for every active task and start the tick
    /// loop.
    pub async fn start(self: Arc<Self>, executor: Arc<TaskExecutor>) -> Result<()> {
        let count = self.reload().await?;

        let engine = Arc::clone(&self);
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(engine.tick_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                engine.tick(&executor).await;
            }
        });
        *self.tick_task.lock() = Some(handle);
        self.running.store(true, Ordering::SeqCst);

        tracing::info!(tasks = count, timezone = %self.tz, "scheduler started");
        Ok(())
    }

    /// Stop the tick loop without waiting for in-flight work.
    pub fn stop(&self) {
        if let Some(handle) = self.tick_task.lock().take() {
            handle.abort();
        }
        if self.running.swap(false, Ordering::SeqCst) {
            tracing::info!("scheduler stopped");
        }
    }

    /// Recompute `next_run_at` for all active tasks from their
    /// triggers. Returns how many tasks are registered.
    pub async fn reload(&self) -> Result<usize> {
        let tasks = self.store.list_active().await?;
        let now = Utc::now();
        for task in &tasks {
            match task.schedule.next_occurrence(&now, self.tz) {
                Ok(next) => self.store.update_next_run(&task.id, next).await?,
                Err(e) => {
                    tracing::warn!(task_id = %task.id, error = %e, "task has an unusable trigger");
                    self.store.update_next_run(&task.id, None).await?;
                }
            }
        }
        Ok(tasks.len())
    }

    // ── Task management ───────────────────────────────────────────

    /// Persist a task and register its trigger. The returned task
    /// carries the computed `next_run_at`.
    pub async fn schedule_task(&self, mut task: ScheduledTask) -> Result<ScheduledTask> {
        // Derive the trigger before persisting so a bad schedule is
        // reported to the caller instead of festering in the store.
        let next = task.schedule.next_occurrence(&Utc::now(), self.tz)?;

        self.store.add(&task).await?;
        self.store.update_next_run(&task.id, next).await?;
        task.next_run_at = next;

        tracing::info!(task = %task.name, task_id = %task.id, next_run = ?next, "scheduled task");
        Ok(task)
    }

    /// Deactivate a task and clear its fire time. Returns false for
    /// unknown or already-inactive tasks.
    pub async fn cancel_task(&self, task_id: &str) -> Result<bool> {
        let deactivated = self.store.deactivate(task_id).await?;
        if deactivated {
            self.store.update_next_run(task_id, None).await?;
            tracing::info!(task_id, "cancelled task");
        } else {
            tracing::debug!(task_id, "cancel requested for unknown or inactive task");
        }
        Ok(deactivated)
    }

    // ── Trigger evaluation ────────────────────────────────────────

    /// One scheduler pass: run every due task, then update its row.
    /// Public so the binary's shutdown path and tests can drive it
    /// directly.
    pub async fn tick(&self, executor: &TaskExecutor) {
        let now = Utc::now();
        let tasks = match self.store.list_active().await {
            Ok(tasks) => tasks,
            Err(e) => {
                tracing::error!(error = %e, "scheduler tick could not list tasks");
                return;
            }
        };

        for task in tasks {
            let due = task.next_run_at.is_some_and(|next| next <= now);
            if !due {
                continue;
            }
            tracing::info!(task = %task.name, task_id = %task.id, "task due, executing");
            executor.execute(&task.id).await;
            if let Err(e) = self.after_execution(&task).await {
                tracing::error!(task_id = %task.id, error = %e, "post-execution bookkeeping failed");
            }
        }
    }

    async fn after_execution(&self, task: &ScheduledTask) -> Result<()> {
        if task.is_one_off() {
            self.store.deactivate(&task.id).await?;
            self.store.update_next_run(&task.id, None).await?;
        } else {
            let next = task.schedule.next_occurrence(&Utc::now(), self.tz)?;
            self.store.update_next_run(&task.id, next).await?;
        }
        Ok(())
    }
}

impl Drop for SchedulerEngine {
    fn drop(&mut self) {
        if let Some(handle) = self.tick_task.lock().take() {
            handle.abort();
        }
    }
}
