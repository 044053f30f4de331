//! End-to-end scheduler behaviour: firing, bookkeeping, missed-task
//! recovery, and failure notifications, driven through the public API
//! with a recording channel standing in for a transport.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;

use valet_assistant::notify::{
    Button, ButtonRows, MessageRef, NotificationChannel, NotificationRouter, SendOutcome,
};
use valet_assistant::scheduler::{
    MissedAction, MissedTaskRecovery, Responder, ScheduleSpec, ScheduledTask, SchedulerEngine,
    TaskAction, TaskExecutor, TaskStore, TaskType,
};
use valet_domain::error::Error;
use valet_domain::tool::Message;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Fakes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
struct RecordingChannel {
    sent: Mutex<Vec<(String, String)>>,
    rich: Mutex<Vec<(String, ButtonRows)>>,
    edits: Mutex<Vec<String>>,
}

impl RecordingChannel {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn buttons(&self) -> Vec<Button> {
        self.rich
            .lock()
            .iter()
            .flat_map(|(_, rows)| rows.iter().flatten().cloned())
            .collect()
    }
}

#[async_trait::async_trait]
impl NotificationChannel for RecordingChannel {
    fn name(&self) -> &str {
        "recorder"
    }

    async fn send(&self, user_id: &str, message: &str) -> bool {
        self.sent.lock().push((user_id.into(), message.into()));
        true
    }

    async fn send_rich(
        &self,
        _user_id: &str,
        message: &str,
        buttons: Option<&ButtonRows>,
        _parse_mode: Option<&str>,
    ) -> SendOutcome {
        self.rich
            .lock()
            .push((message.into(), buttons.cloned().unwrap_or_default()));
        SendOutcome::sent(Some(MessageRef(format!("m{}", self.rich.lock().len()))))
    }

    async fn edit_message(&self, _user_id: &str, _message: &MessageRef, text: &str) -> bool {
        self.edits.lock().push(text.into());
        true
    }
}

struct Harness {
    _dir: tempfile::TempDir,
    channel: Arc<RecordingChannel>,
    store: Arc<TaskStore>,
    engine: Arc<SchedulerEngine>,
    executor: Arc<TaskExecutor>,
}

fn echo_responder() -> Responder {
    Arc::new(|history: Vec<Message>, model: Option<String>| {
        Box::pin(async move {
            let prompt = history
                .first()
                .map(|m| m.content.text())
                .unwrap_or_default();
            match model.as_deref() {
                Some(m) => Ok(format!("[{m}] {prompt}")),
                None => Ok(format!("reply: {prompt}")),
            }
        })
    })
}

fn failing_responder() -> Responder {
    Arc::new(|_history, _model| {
        Box::pin(async { Err(Error::Other("model unavailable".into())) })
    })
}

fn harness_with(responder: Responder) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let channel = RecordingChannel::new();
    let router = Arc::new(NotificationRouter::new(None));
    router.register_channel(channel.clone()).unwrap();

    let store = Arc::new(TaskStore::new(dir.path().join("tasks.db")));
    let engine = Arc::new(SchedulerEngine::new(
        store.clone(),
        "UTC",
        Duration::from_secs(3600),
    ));
    let executor = Arc::new(TaskExecutor::new(
        store.clone(),
        router,
        responder,
        "owner",
    ));

    Harness {
        _dir: dir,
        channel,
        store,
        engine,
        executor,
    }
}

fn harness() -> Harness {
    harness_with(echo_responder())
}

fn one_off(message: &str, run_at: &str) -> ScheduledTask {
    ScheduledTask::new(
        "reminder",
        TaskType::OneOff,
        ScheduleSpec::RunAt {
            run_at: run_at.into(),
        },
        TaskAction::SimpleMessage {
            message: message.into(),
        },
    )
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Firing & bookkeeping
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn one_shot_fires_and_is_retired() {
    let h = harness();

    // Due one second from now.
    let run_at = (Utc::now() + chrono::Duration::seconds(1)).to_rfc3339();
    let task = h
        .engine
        .schedule_task(one_off("drink water", &run_at))
        .await
        .unwrap();
    assert!(task.next_run_at.is_some());

    tokio::time::sleep(Duration::from_millis(1100)).await;
    h.engine.tick(&h.executor).await;

    // Delivered through the router with no channel override.
    let sent = h.channel.sent.lock().clone();
    assert_eq!(sent, vec![("owner".to_string(), "drink water".to_string())]);

    // Row retired: inactive, next cleared, last recorded.
    let row = h.store.get(&task.id).await.unwrap().unwrap();
    assert!(!row.active);
    assert!(row.next_run_at.is_none());
    let last = row.last_run_at.expect("last_run_at set");
    assert!((Utc::now() - last).num_seconds() < 5);
}

#[tokio::test]
async fn recurring_task_gets_a_fresh_next_run() {
    let h = harness();

    let mut task = ScheduledTask::new(
        "hourly check",
        TaskType::Recurring,
        ScheduleSpec::Cron {
            cron: "0 * * * *".into(),
        },
        TaskAction::SimpleMessage {
            message: "check".into(),
        },
    );
    task = h.engine.schedule_task(task).await.unwrap();
    let first_next = task.next_run_at.unwrap();
    assert!(first_next > Utc::now());

    // Force the task due, then tick.
    h.store
        .update_next_run(&task.id, Some(Utc::now() - chrono::Duration::seconds(5)))
        .await
        .unwrap();
    h.engine.tick(&h.executor).await;

    let row = h.store.get(&task.id).await.unwrap().unwrap();
    assert!(row.active, "recurring tasks stay active");
    assert!(row.last_run_at.is_some());
    let next = row.next_run_at.expect("next run recomputed");
    assert!(next > Utc::now());
    assert_eq!(next.timestamp() % 3600, 0, "top of the hour");
}

#[tokio::test]
async fn ai_task_runs_through_the_responder_with_model_override() {
    let h = harness();

    let mut task = ScheduledTask::new(
        "briefing",
        TaskType::OneOff,
        ScheduleSpec::RunAt {
            run_at: (Utc::now() - chrono::Duration::seconds(1)).to_rfc3339(),
        },
        TaskAction::AiTask {
            prompt: "summarise my day".into(),
        },
    );
    task.model = Some("claude-opus-4-20250514".into());
    h.store.add(&task).await.unwrap();

    h.executor.execute(&task.id).await;

    let sent = h.channel.sent.lock().clone();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].1, "[claude-opus-4-20250514] summarise my day");
    assert!(h
        .store
        .get(&task.id)
        .await
        .unwrap()
        .unwrap()
        .last_run_at
        .is_some());
}

#[tokio::test]
async fn failed_task_notifies_owner_and_keeps_last_run_clear() {
    let h = harness_with(failing_responder());

    let task = ScheduledTask::new(
        "doomed",
        TaskType::OneOff,
        ScheduleSpec::RunAt {
            run_at: (Utc::now() - chrono::Duration::seconds(1)).to_rfc3339(),
        },
        TaskAction::AiTask {
            prompt: "explode".into(),
        },
    );
    h.store.add(&task).await.unwrap();

    h.executor.execute(&task.id).await;

    let sent = h.channel.sent.lock().clone();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].1.contains("doomed"));
    assert!(sent[0].1.contains(&task.id));
    assert!(sent[0].1.contains("failed"));

    // The failure stays visible.
    let row = h.store.get(&task.id).await.unwrap().unwrap();
    assert!(row.last_run_at.is_none());
}

#[tokio::test]
async fn executing_unknown_or_inactive_tasks_is_quiet() {
    let h = harness();

    h.executor.execute("no-such-task").await;

    let task = one_off("never", "2099-01-01T00:00:00Z");
    h.store.add(&task).await.unwrap();
    h.store.deactivate(&task.id).await.unwrap();
    h.executor.execute(&task.id).await;

    assert!(h.channel.sent.lock().is_empty());
}

#[tokio::test]
async fn cancel_is_idempotent() {
    let h = harness();
    let task = h
        .engine
        .schedule_task(one_off("x", "2099-01-01T00:00:00Z"))
        .await
        .unwrap();

    assert!(h.engine.cancel_task(&task.id).await.unwrap());
    // Already cancelled: false, and the row stays inactive.
    assert!(!h.engine.cancel_task(&task.id).await.unwrap());
    assert!(!h.engine.cancel_task("missing").await.unwrap());

    let row = h.store.get(&task.id).await.unwrap().unwrap();
    assert!(!row.active);
    assert!(row.next_run_at.is_none());
}

#[tokio::test]
async fn bad_schedules_are_rejected_before_persisting() {
    let h = harness();
    let task = ScheduledTask::new(
        "broken",
        TaskType::Recurring,
        ScheduleSpec::Cron {
            cron: "not a cron".into(),
        },
        TaskAction::SimpleMessage {
            message: "x".into(),
        },
    );
    let id = task.id.clone();
    assert!(h.engine.schedule_task(task).await.is_err());
    assert!(h.store.get(&id).await.unwrap().is_none());
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Missed-task recovery
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn recovery(h: &Harness) -> MissedTaskRecovery {
    let router = Arc::new(NotificationRouter::new(None));
    router.register_channel(h.channel.clone()).unwrap();
    MissedTaskRecovery::new(
        h.store.clone(),
        h.engine.clone(),
        h.executor.clone(),
        router,
        "owner",
    )
}

#[tokio::test]
async fn missed_one_shot_is_flagged_with_buttons() {
    let h = harness();
    let missed_task = one_off("too late", &(Utc::now() - chrono::Duration::hours(1)).to_rfc3339());
    h.store.add(&missed_task).await.unwrap();

    // Recurring and future tasks are never flagged.
    let recurring = ScheduledTask::new(
        "cron",
        TaskType::Recurring,
        ScheduleSpec::Cron {
            cron: "0 * * * *".into(),
        },
        TaskAction::SimpleMessage {
            message: "x".into(),
        },
    );
    h.store.add(&recurring).await.unwrap();
    h.store
        .add(&one_off("future", "2099-01-01T00:00:00Z"))
        .await
        .unwrap();

    let rec = recovery(&h);
    assert_eq!(rec.scan().await.unwrap(), 1);
    assert_eq!(rec.pending_count(), 1);

    let rich = h.channel.rich.lock().clone();
    assert_eq!(rich.len(), 1);
    assert!(rich[0].0.contains("Missed scheduled task"));
    assert!(rich[0].0.contains("reminder"));

    let buttons = h.channel.buttons();
    assert_eq!(buttons.len(), 2);
    let run_payload = buttons[0].callback_data.as_ref().unwrap();
    let del_payload = buttons[1].callback_data.as_ref().unwrap();
    assert!(run_payload.starts_with("mst:") && run_payload.ends_with(":run"));
    assert!(del_payload.starts_with("mst:") && del_payload.ends_with(":del"));
}

#[tokio::test]
async fn run_now_executes_and_retires_the_task() {
    let h = harness();
    let task = one_off("catch up", &(Utc::now() - chrono::Duration::hours(2)).to_rfc3339());
    h.store.add(&task).await.unwrap();

    let rec = recovery(&h);
    rec.scan().await.unwrap();
    let key = h.channel.buttons()[0]
        .callback_data
        .clone()
        .unwrap()
        .split(':')
        .nth(1)
        .unwrap()
        .to_string();

    let answer = rec.handle_callback(&key, MissedAction::Run).await;
    assert_eq!(answer, "Executed");

    // The action ran, the row is retired, the prompt got its outcome.
    assert!(h
        .channel
        .sent
        .lock()
        .iter()
        .any(|(_, msg)| msg == "catch up"));
    let row = h.store.get(&task.id).await.unwrap().unwrap();
    assert!(!row.active);
    let edits = h.channel.edits.lock().clone();
    assert_eq!(edits.len(), 1);
    assert!(edits[0].contains("\u{2192} Executed"));
    assert_eq!(rec.pending_count(), 0);
}

#[tokio::test]
async fn delete_cancels_without_running() {
    let h = harness();
    let task = one_off("stale", &(Utc::now() - chrono::Duration::hours(2)).to_rfc3339());
    h.store.add(&task).await.unwrap();

    let rec = recovery(&h);
    rec.scan().await.unwrap();
    let key = h.channel.buttons()[1]
        .callback_data
        .clone()
        .unwrap()
        .split(':')
        .nth(1)
        .unwrap()
        .to_string();

    let answer = rec.handle_callback(&key, MissedAction::Delete).await;
    assert_eq!(answer, "Deleted");

    assert!(h.channel.sent.lock().is_empty(), "nothing executed");
    assert!(!h.store.get(&task.id).await.unwrap().unwrap().active);
}

#[tokio::test]
async fn unknown_keys_get_an_expired_reply() {
    let h = harness();
    let rec = recovery(&h);
    let answer = rec.handle_callback("deadbeef", MissedAction::Run).await;
    assert!(answer.contains("expired"));
}

#[tokio::test]
async fn already_run_one_shots_are_not_flagged() {
    let h = harness();
    let mut task = one_off("done already", &(Utc::now() - chrono::Duration::hours(1)).to_rfc3339());
    task.last_run_at = Some(Utc::now() - chrono::Duration::minutes(30));
    h.store.add(&task).await.unwrap();

    let rec = recovery(&h);
    assert_eq!(rec.scan().await.unwrap(), 0);
}
