//! Scheduling tools: create, list, and cancel scheduled tasks.

use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::json;

use valet_domain::error::Error;
use valet_domain::tool::ToolResult;
use valet_tools::registry::empty_schema;
use valet_tools::{params_schema, Tool};

use crate::scheduler::{ScheduleSpec, ScheduledTask, TaskAction, TaskType};
use crate::state::Services;

const CATEGORY: &str = "scheduler";

pub fn register(services: &Services) {
    services.registry.register(schedule_task_tool(services));
    services.registry.register(list_tasks_tool(services));
    services.registry.register(cancel_task_tool(services));
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// schedule_task
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize, JsonSchema)]
struct ScheduleTaskParams {
    /// Human-readable name for this task.
    name: String,
    /// Optional longer description of the task.
    #[serde(default)]
    description: Option<String>,
    /// Either "one_off" (runs once) or "recurring" (runs on a schedule).
    task_type: String,
    /// ISO 8601 datetime for one-off tasks (e.g. '2025-06-01T15:00:00-06:00').
    /// Required when task_type is 'one_off'.
    #[serde(default)]
    run_at: Option<String>,
    /// Cron expression for recurring tasks (e.g. '0 8 * * *' for daily
    /// at 8am). Required when task_type is 'recurring'.
    #[serde(default)]
    cron: Option<String>,
    /// "simple_message" to send a plain text message, or "ai_task" to
    /// run a prompt through the AI with full tool access.
    action_type: String,
    /// The message text (for simple_message) or the AI prompt (for ai_task).
    action_content: String,
    /// Notification channel override (defaults to the current channel).
    #[serde(default)]
    notification_channel: Option<String>,
}

fn schedule_task_tool(services: &Services) -> Tool {
    let svc = services.clone();
    Tool::new(
        "schedule_task",
        "Schedule a task to run at a specific time or on a recurring schedule. \
         Use 'simple_message' for plain reminders or 'ai_task' for tasks that \
         need AI reasoning and tool access (e.g. checking email, summarising).",
        CATEGORY,
        params_schema::<ScheduleTaskParams>(),
        move |args, ctx| {
            let svc = svc.clone();
            async move {
                let params: ScheduleTaskParams =
                    serde_json::from_value(args).map_err(Error::Json)?;

                let task_type = match TaskType::parse(&params.task_type) {
                    Ok(t) => t,
                    Err(_) => {
                        return Ok(ToolResult::error(format!(
                            "Invalid task_type: {}",
                            params.task_type
                        )))
                    }
                };
                let schedule = match (task_type, params.run_at, params.cron) {
                    (TaskType::OneOff, Some(run_at), _) => ScheduleSpec::RunAt { run_at },
                    (TaskType::OneOff, None, _) => {
                        return Ok(ToolResult::error("run_at is required for one_off tasks"))
                    }
                    (TaskType::Recurring, _, Some(cron)) => ScheduleSpec::Cron { cron },
                    (TaskType::Recurring, _, None) => {
                        return Ok(ToolResult::error("cron is required for recurring tasks"))
                    }
                };
                let action = match params.action_type.as_str() {
                    "simple_message" => TaskAction::SimpleMessage {
                        message: params.action_content,
                    },
                    "ai_task" => TaskAction::AiTask {
                        prompt: params.action_content,
                    },
                    other => {
                        return Ok(ToolResult::error(format!("Invalid action_type: {other}")))
                    }
                };

                let mut task = ScheduledTask::new(params.name, task_type, schedule, action);
                task.description = params.description.unwrap_or_default();
                // Default the delivery channel to wherever the request
                // came from.
                task.notification_channel = params
                    .notification_channel
                    .or_else(|| ctx.map(|c| c.reply_channel));

                let task = match svc.scheduler.schedule_task(task).await {
                    Ok(task) => task,
                    Err(Error::Schedule(reason)) => {
                        return Ok(ToolResult::error(format!("Invalid schedule: {reason}")))
                    }
                    Err(e) => return Err(e),
                };

                Ok(ToolResult::ok(json!({
                    "scheduled": true,
                    "task_id": task.id,
                    "name": task.name,
                    "task_type": task.task_type.as_str(),
                    "schedule": task.schedule,
                    "action_type": task.action.kind(),
                    "next_run_at": task.next_run_at.map(|t| t.to_rfc3339()),
                })))
            }
        },
    )
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// list_scheduled_tasks
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn list_tasks_tool(services: &Services) -> Tool {
    let svc = services.clone();
    Tool::new(
        "list_scheduled_tasks",
        "List all active scheduled tasks with their details and next run time.",
        CATEGORY,
        empty_schema(),
        move |_args, _ctx| {
            let svc = svc.clone();
            async move {
                let tasks = svc.task_store.list_active().await?;
                let entries: Vec<_> = tasks
                    .iter()
                    .map(|t| {
                        json!({
                            "id": t.id,
                            "name": t.name,
                            "description": t.description,
                            "task_type": t.task_type.as_str(),
                            "schedule": t.schedule,
                            "action_type": t.action.kind(),
                            "action": t.action,
                            "notification_channel": t.notification_channel,
                            "next_run_at": t.next_run_at.map(|ts| ts.to_rfc3339()),
                            "last_run_at": t.last_run_at.map(|ts| ts.to_rfc3339()),
                            "created_at": t.created_at.to_rfc3339(),
                        })
                    })
                    .collect();
                let count = entries.len();
                Ok(ToolResult::ok(json!({
                    "tasks": entries,
                    "count": count,
                })))
            }
        },
    )
    .without_confirmation()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// cancel_scheduled_task
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize, JsonSchema)]
struct CancelTaskParams {
    /// Exact task ID to cancel.
    #[serde(default)]
    task_id: Option<String>,
    /// Search task names/descriptions to find the task to cancel.
    #[serde(default)]
    search_query: Option<String>,
}

fn cancel_task_tool(services: &Services) -> Tool {
    let svc = services.clone();
    Tool::new(
        "cancel_scheduled_task",
        "Cancel a scheduled task by ID or by searching task names/descriptions. \
         If a search matches multiple tasks, returns them so the user can choose.",
        CATEGORY,
        params_schema::<CancelTaskParams>(),
        move |args, _ctx| {
            let svc = svc.clone();
            async move {
                let params: CancelTaskParams =
                    serde_json::from_value(args).map_err(Error::Json)?;

                if params.task_id.is_none() && params.search_query.is_none() {
                    return Ok(ToolResult::error("Provide either task_id or search_query"));
                }

                if let Some(task_id) = params.task_id {
                    // The model sometimes reformats hex ids as dashed
                    // UUIDs.
                    let task_id = task_id.replace('-', "");
                    if svc.scheduler.cancel_task(&task_id).await? {
                        return Ok(ToolResult::ok(json!({
                            "cancelled": true,
                            "task_id": task_id,
                        })));
                    }
                    return Ok(ToolResult::error(format!(
                        "Task not found or already inactive: {task_id}"
                    )));
                }

                let query = params.search_query.unwrap_or_default();
                let matches = svc.task_store.search_active(&query).await?;
                match matches.as_slice() {
                    [] => Ok(ToolResult::ok(json!({
                        "cancelled": false,
                        "message": format!("No active tasks matching '{query}'"),
                    }))),
                    [task] => {
                        let cancelled = svc.scheduler.cancel_task(&task.id).await?;
                        Ok(ToolResult::ok(json!({
                            "cancelled": cancelled,
                            "task_id": task.id,
                            "name": task.name,
                        })))
                    }
                    several => Ok(ToolResult::ok(json!({
                        "cancelled": false,
                        "message": "Multiple tasks match. Ask which one to cancel.",
                        "matches": several
                            .iter()
                            .map(|t| json!({
                                "id": t.id,
                                "name": t.name,
                                "description": t.description,
                            }))
                            .collect::<Vec<_>>(),
                    }))),
                }
            }
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use valet_domain::config::Config;
    use valet_domain::context::MessageContext;
    use valet_providers::{ChatRequest, ChatResponse, LlmProvider};
    use valet_tools::policy::ConfirmationPolicy;
    use valet_tools::{ScratchSpace, ToolRegistry};

    use crate::notify::NotificationRouter;
    use crate::runtime::confirm::ConfirmationBroker;
    use crate::scheduler::{SchedulerEngine, TaskStore};

    struct NoLlm;

    #[async_trait::async_trait]
    impl LlmProvider for NoLlm {
        async fn chat(&self, _req: ChatRequest) -> valet_domain::Result<ChatResponse> {
            Err(Error::Other("no llm in this test".into()))
        }

        async fn chat_stream(
            &self,
            _req: ChatRequest,
        ) -> valet_domain::Result<
            valet_domain::stream::BoxStream<'static, valet_domain::Result<valet_domain::stream::StreamEvent>>,
        > {
            Err(Error::Other("no llm in this test".into()))
        }

        fn provider_id(&self) -> &str {
            "none"
        }
    }

    fn services() -> (tempfile::TempDir, Services) {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.owner_user_id = "owner".into();
        config.state_dir = dir.path().join("state");
        config.config_dir = dir.path().join("config");

        let registry = Arc::new(ToolRegistry::new(ConfirmationPolicy::unconfigured()));
        let router = Arc::new(NotificationRouter::new(None));
        let broker = Arc::new(ConfirmationBroker::new(router.clone(), Duration::from_secs(1)));
        let task_store = Arc::new(TaskStore::new(config.database_path()));
        let scheduler = Arc::new(SchedulerEngine::new(
            task_store.clone(),
            "UTC",
            Duration::from_secs(30),
        ));
        let scratch = Arc::new(ScratchSpace::new(config.scratch_root()).unwrap());

        let services = Services {
            config: Arc::new(config),
            llm: Arc::new(NoLlm),
            registry,
            router,
            sessions: Arc::new(valet_sessions::SessionStore::new(50)),
            broker,
            task_store,
            scheduler,
            scratch,
            memory: None,
        };
        register(&services);
        (dir, services)
    }

    #[tokio::test]
    async fn schedule_then_list_then_cancel() {
        let (_dir, svc) = services();
        let ctx = MessageContext::new("owner", "telegram");

        let result = svc
            .registry
            .execute(
                "schedule_task",
                json!({
                    "name": "hydrate",
                    "task_type": "recurring",
                    "cron": "0 8 * * *",
                    "action_type": "simple_message",
                    "action_content": "drink water",
                }),
                Some(&ctx),
            )
            .await;
        assert!(result.is_success(), "{result:?}");
        let data = result.data().unwrap();
        assert_eq!(data["scheduled"], true);
        assert!(data["next_run_at"].is_string());
        let task_id = data["task_id"].as_str().unwrap().to_string();

        // The channel override defaulted to the request's reply channel.
        let stored = svc.task_store.get(&task_id).await.unwrap().unwrap();
        assert_eq!(stored.notification_channel.as_deref(), Some("telegram"));

        let listed = svc
            .registry
            .execute("list_scheduled_tasks", json!({}), None)
            .await;
        assert_eq!(listed.data().unwrap()["count"], 1);

        let cancelled = svc
            .registry
            .execute("cancel_scheduled_task", json!({"task_id": task_id}), None)
            .await;
        assert_eq!(cancelled.data().unwrap()["cancelled"], true);

        let listed = svc
            .registry
            .execute("list_scheduled_tasks", json!({}), None)
            .await;
        assert_eq!(listed.data().unwrap()["count"], 0);
    }

    #[tokio::test]
    async fn schedule_validation_errors_are_reported_inline() {
        let (_dir, svc) = services();

        let missing_run_at = svc
            .registry
            .execute(
                "schedule_task",
                json!({
                    "name": "x",
                    "task_type": "one_off",
                    "action_type": "simple_message",
                    "action_content": "hi",
                }),
                None,
            )
            .await;
        assert!(missing_run_at
            .error_message()
            .unwrap()
            .contains("run_at is required"));

        let bad_type = svc
            .registry
            .execute(
                "schedule_task",
                json!({
                    "name": "x",
                    "task_type": "sometimes",
                    "action_type": "simple_message",
                    "action_content": "hi",
                }),
                None,
            )
            .await;
        assert!(bad_type.error_message().unwrap().contains("Invalid task_type"));

        let bad_cron = svc
            .registry
            .execute(
                "schedule_task",
                json!({
                    "name": "x",
                    "task_type": "recurring",
                    "cron": "not a cron",
                    "action_type": "simple_message",
                    "action_content": "hi",
                }),
                None,
            )
            .await;
        assert!(bad_cron.error_message().unwrap().contains("Invalid schedule"));
    }

    #[tokio::test]
    async fn cancel_by_search_disambiguates() {
        let (_dir, svc) = services();
        for name in ["standup ping", "standup summary"] {
            svc.registry
                .execute(
                    "schedule_task",
                    json!({
                        "name": name,
                        "task_type": "recurring",
                        "cron": "0 9 * * 1",
                        "action_type": "simple_message",
                        "action_content": "go",
                    }),
                    None,
                )
                .await;
        }

        let ambiguous = svc
            .registry
            .execute(
                "cancel_scheduled_task",
                json!({"search_query": "standup"}),
                None,
            )
            .await;
        let data = ambiguous.data().unwrap();
        assert_eq!(data["cancelled"], false);
        assert_eq!(data["matches"].as_array().unwrap().len(), 2);

        let exact = svc
            .registry
            .execute(
                "cancel_scheduled_task",
                json!({"search_query": "summary"}),
                None,
            )
            .await;
        assert_eq!(exact.data().unwrap()["cancelled"], true);
    }

    #[tokio::test]
    async fn cancel_with_dashed_uuid_finds_the_task() {
        let (_dir, svc) = services();
        let result = svc
            .registry
            .execute(
                "schedule_task",
                json!({
                    "name": "dentist",
                    "task_type": "one_off",
                    "run_at": "2099-01-01T10:00:00Z",
                    "action_type": "simple_message",
                    "action_content": "go to the dentist",
                }),
                None,
            )
            .await;
        let id = result.data().unwrap()["task_id"].as_str().unwrap().to_string();
        let dashed = format!(
            "{}-{}-{}-{}-{}",
            &id[0..8],
            &id[8..12],
            &id[12..16],
            &id[16..20],
            &id[20..32]
        );

        let cancelled = svc
            .registry
            .execute("cancel_scheduled_task", json!({"task_id": dashed}), None)
            .await;
        assert_eq!(cancelled.data().unwrap()["cancelled"], true);
    }

    #[tokio::test]
    async fn cancel_without_arguments_is_rejected() {
        let (_dir, svc) = services();
        let result = svc
            .registry
            .execute("cancel_scheduled_task", json!({}), None)
            .await;
        assert!(result
            .error_message()
            .unwrap()
            .contains("task_id or search_query"));
    }
}
