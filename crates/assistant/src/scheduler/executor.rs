//! TaskExecutor: runs a scheduled task's action.
//!
//! Parameterised on an erased "generate response" callable so the
//! unattended scheduler path reuses the turn loop without streaming or
//! confirmation hooks. Failures notify the owner and leave
//! `last_run_at` untouched so the miss stays visible.

use std::sync::Arc;

use valet_domain::error::Result;
use valet_domain::tool::{BoxFuture, Message};

use crate::notify::NotificationRouter;

use super::model::{ScheduledTask, TaskAction};
use super::store::TaskStore;

/// Erased LLM entry point: `(history, model_override) -> reply text`.
pub type Responder =
    Arc<dyn Fn(Vec<Message>, Option<String>) -> BoxFuture<'static, Result<String>> + Send + Sync>;

pub struct TaskExecutor {
    store: Arc<TaskStore>,
    router: Arc<NotificationRouter>,
    responder: Responder,
    owner_user_id: String,
}

impl TaskExecutor {
    pub fn new(
        store: Arc<TaskStore>,
        router: Arc<NotificationRouter>,
        responder: Responder,
        owner_user_id: impl Into<String>,
    ) -> Self {
        Self {
            store,
            router,
            responder,
            owner_user_id: owner_user_id.into(),
        }
    }

    /// Look up and execute a task. Never propagates failures; the
    /// owner gets an error notification instead.
    pub async fn execute(&self, task_id: &str) {
        let task = match self.store.get(task_id).await {
            Ok(Some(task)) => task,
            Ok(None) => {
                tracing::warn!(task_id, "scheduled task not found");
                return;
            }
            Err(e) => {
                tracing::error!(task_id, error = %e, "could not load scheduled task");
                return;
            }
        };
        if !task.active {
            tracing::info!(task = %task.name, task_id, "skipping inactive task");
            return;
        }

        tracing::info!(
            task = %task.name,
            task_id,
            action = task.action.kind(),
            channel = ?task.notification_channel,
            "executing task"
        );

        match self.dispatch(&task).await {
            Ok(()) => {
                if let Err(e) = self.store.update_last_run(task_id, None).await {
                    tracing::error!(task_id, error = %e, "could not record last run");
                }
                tracing::info!(task = %task.name, task_id, "task executed");
            }
            Err(e) => {
                tracing::error!(task = %task.name, task_id, error = %e, "task execution failed");
                self.send_error(&task).await;
            }
        }
    }

    async fn dispatch(&self, task: &ScheduledTask) -> Result<()> {
        match &task.action {
            TaskAction::SimpleMessage { message } => {
                if message.is_empty() {
                    tracing::warn!(task_id = %task.id, "simple_message task has empty message");
                    return Ok(());
                }
                self.router
                    .send(
                        &self.owner_user_id,
                        message,
                        task.notification_channel.as_deref(),
                    )
                    .await;
                Ok(())
            }
            TaskAction::AiTask { prompt } => {
                if prompt.is_empty() {
                    tracing::warn!(task_id = %task.id, "ai_task has empty prompt");
                    return Ok(());
                }
                let history = vec![Message::user(prompt.clone())];
                let reply = (self.responder)(history, task.model.clone()).await?;
                self.router
                    .send(
                        &self.owner_user_id,
                        &reply,
                        task.notification_channel.as_deref(),
                    )
                    .await;
                Ok(())
            }
        }
    }

    /// Best-effort owner notification about a failed task.
    async fn send_error(&self, task: &ScheduledTask) {
        let message = format!(
            "Scheduled task \"{}\" ({}) failed. Check the logs for details.",
            task.name, task.id
        );
        self.router
            .send(
                &self.owner_user_id,
                &message,
                task.notification_channel.as_deref(),
            )
            .await;
    }
}
