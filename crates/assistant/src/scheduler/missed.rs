//! Missed-task recovery.
//!
//! Runs once at startup, after the scheduler is live: active one-shot
//! tasks whose fire time elapsed while the process was down get a
//! notification with Run Now / Delete buttons. Recurring tasks are
//! never flagged; their next trigger fires naturally.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;

use valet_domain::error::Result;

use crate::notify::{Button, MessageRef, NotificationRouter};
use crate::runtime::callback_key;

use super::cron::parse_run_at;
use super::engine::SchedulerEngine;
use super::executor::TaskExecutor;
use super::model::ScheduleSpec;
use super::store::TaskStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissedAction {
    Run,
    Delete,
}

struct MissedEntry {
    task_id: String,
    /// The notification text, kept so the outcome edit can append to it.
    message: String,
    message_ref: Option<MessageRef>,
}

pub struct MissedTaskRecovery {
    store: Arc<TaskStore>,
    engine: Arc<SchedulerEngine>,
    executor: Arc<TaskExecutor>,
    router: Arc<NotificationRouter>,
    owner_user_id: String,
    pending: Mutex<HashMap<String, MissedEntry>>,
}

impl MissedTaskRecovery {
    pub fn new(
        store: Arc<TaskStore>,
        engine: Arc<SchedulerEngine>,
        executor: Arc<TaskExecutor>,
        router: Arc<NotificationRouter>,
        owner_user_id: impl Into<String>,
    ) -> Self {
        Self {
            store,
            engine,
            executor,
            router,
            owner_user_id: owner_user_id.into(),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Detect missed one-shots and notify the owner about each.
    /// Returns how many were found.
    pub async fn scan(&self) -> Result<usize> {
        let tz = self.engine.timezone();
        let now = Utc::now();
        let mut missed = 0;

        for task in self.store.list_active().await? {
            if !task.is_one_off() || task.last_run_at.is_some() {
                continue;
            }
            let ScheduleSpec::RunAt { run_at } = &task.schedule else {
                continue;
            };
            let Ok(run_at) = parse_run_at(run_at, tz) else {
                tracing::warn!(task_id = %task.id, "one-shot task has unparseable run_at");
                continue;
            };
            if run_at >= now {
                continue;
            }

            let key = callback_key();
            let message = format!(
                "Missed scheduled task: {}\nWas scheduled for: {}",
                task.name,
                run_at.with_timezone(&tz).format("%Y-%m-%d %H:%M %Z")
            );
            let buttons = vec![vec![
                Button::callback("Run Now", format!("mst:{key}:run")),
                Button::callback("Delete", format!("mst:{key}:del")),
            ]];

            let outcome = self
                .router
                .send_rich(&self.owner_user_id, &message, Some(&buttons), None, None)
                .await;

            self.pending.lock().insert(
                key,
                MissedEntry {
                    task_id: task.id.clone(),
                    message,
                    message_ref: outcome.message_ref,
                },
            );
            missed += 1;
            tracing::info!(task = %task.name, task_id = %task.id, "notified owner about missed task");
        }

        if missed > 0 {
            tracing::info!(count = missed, "found missed scheduled tasks");
        }
        Ok(missed)
    }

    /// Handle a `mst:<key>:<run|del>` button press. Returns the reply
    /// text for the transport to surface.
    pub async fn handle_callback(&self, key: &str, action: MissedAction) -> String {
        let Some(entry) = self.pending.lock().remove(key) else {
            return "This notification has expired.".to_string();
        };

        let status = match action {
            MissedAction::Run => {
                self.executor.execute(&entry.task_id).await;
                if let Err(e) = self.engine.cancel_task(&entry.task_id).await {
                    tracing::error!(task_id = %entry.task_id, error = %e, "could not retire executed task");
                }
                "Executed"
            }
            MissedAction::Delete => {
                if let Err(e) = self.engine.cancel_task(&entry.task_id).await {
                    tracing::error!(task_id = %entry.task_id, error = %e, "could not delete missed task");
                }
                "Deleted"
            }
        };

        if let Some(message_ref) = &entry.message_ref {
            let edited = format!("{}\n\n\u{2192} {status}", entry.message);
            self.router
                .edit_message(&self.owner_user_id, message_ref, &edited, None)
                .await;
        }

        status.to_string()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}
