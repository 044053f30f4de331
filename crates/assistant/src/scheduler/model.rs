//! Scheduled-task data model and row (de)serialisation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use valet_domain::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Task type / schedule / action
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    OneOff,
    Recurring,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::OneOff => "one_off",
            TaskType::Recurring => "recurring",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "one_off" => Ok(TaskType::OneOff),
            "recurring" => Ok(TaskType::Recurring),
            other => Err(Error::Schedule(format!("unknown task_type: {other:?}"))),
        }
    }
}

/// Day-of-week in field-based schedules: a number (0 or 7 = Sunday) or
/// a name ("mon").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DowValue {
    Num(u32),
    Name(String),
}

/// Individual recurring-schedule fields, the long-hand alternative to
/// a crontab string.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CronFields {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minute: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hour: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub month: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day_of_week: Option<DowValue>,
}

impl CronFields {
    pub fn is_empty(&self) -> bool {
        self.minute.is_none()
            && self.hour.is_none()
            && self.day.is_none()
            && self.month.is_none()
            && self.day_of_week.is_none()
    }
}

/// Timing record: `{run_at}` for one-shots; `{cron}` or individual
/// fields for recurring tasks. Stored as opaque JSON in the task row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScheduleSpec {
    RunAt { run_at: String },
    Cron { cron: String },
    Fields(CronFields),
}

/// What a task does when it fires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskAction {
    /// Send a fixed text through the notification router.
    SimpleMessage { message: String },
    /// Run a prompt through the LLM turn loop and send the reply.
    AiTask { prompt: String },
}

impl TaskAction {
    pub fn kind(&self) -> &'static str {
        match self {
            TaskAction::SimpleMessage { .. } => "simple_message",
            TaskAction::AiTask { .. } => "ai_task",
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ScheduledTask
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A durable task executed at a moment in time (one-off) or on a
/// recurring cron schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledTask {
    /// 32-hex-character id.
    pub id: String,
    pub name: String,
    pub task_type: TaskType,
    pub schedule: ScheduleSpec,
    pub action: TaskAction,
    #[serde(default)]
    pub description: String,
    /// Channel override; `None` uses the router default.
    #[serde(default)]
    pub notification_channel: Option<String>,
    /// Model override for ai_task execution.
    #[serde(default)]
    pub model: Option<String>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub last_run_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub next_run_at: Option<DateTime<Utc>>,
}

/// Generate a new 32-hex task id.
pub fn make_task_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

impl ScheduledTask {
    pub fn new(
        name: impl Into<String>,
        task_type: TaskType,
        schedule: ScheduleSpec,
        action: TaskAction,
    ) -> Self {
        Self {
            id: make_task_id(),
            name: name.into(),
            task_type,
            schedule,
            action,
            description: String::new(),
            notification_channel: None,
            model: None,
            active: true,
            created_at: Utc::now(),
            last_run_at: None,
            next_run_at: None,
        }
    }

    pub fn is_one_off(&self) -> bool {
        self.task_type == TaskType::OneOff
    }

    pub fn is_recurring(&self) -> bool {
        self.task_type == TaskType::Recurring
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Row serialisation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One `scheduled_tasks` row in column order. Schedule and action are
/// opaque JSON strings; timestamps are RFC 3339 text.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskRow {
    pub id: String,
    pub name: String,
    pub task_type: String,
    pub schedule: String,
    pub action: String,
    pub description: String,
    pub notification_channel: Option<String>,
    pub model: Option<String>,
    pub active: i64,
    pub created_at: String,
    pub last_run_at: Option<String>,
    pub next_run_at: Option<String>,
}

impl ScheduledTask {
    pub fn to_row(&self) -> Result<TaskRow> {
        Ok(TaskRow {
            id: self.id.clone(),
            name: self.name.clone(),
            task_type: self.task_type.as_str().to_string(),
            schedule: serde_json::to_string(&self.schedule)?,
            action: serde_json::to_string(&self.action)?,
            description: self.description.clone(),
            notification_channel: self.notification_channel.clone(),
            model: self.model.clone(),
            active: i64::from(self.active),
            created_at: self.created_at.to_rfc3339(),
            last_run_at: self.last_run_at.map(|t| t.to_rfc3339()),
            next_run_at: self.next_run_at.map(|t| t.to_rfc3339()),
        })
    }

    pub fn from_row(row: TaskRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            name: row.name,
            task_type: TaskType::parse(&row.task_type)?,
            schedule: serde_json::from_str(&row.schedule)?,
            action: serde_json::from_str(&row.action)?,
            description: row.description,
            notification_channel: row.notification_channel,
            model: row.model,
            active: row.active != 0,
            created_at: parse_ts(&row.created_at)?,
            last_run_at: row.last_run_at.as_deref().map(parse_ts).transpose()?,
            next_run_at: row.next_run_at.as_deref().map(parse_ts).transpose()?,
        })
    }
}

fn parse_ts(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Storage(format!("bad timestamp {value:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn water_task() -> ScheduledTask {
        let mut task = ScheduledTask::new(
            "water reminder",
            TaskType::Recurring,
            ScheduleSpec::Cron {
                cron: "0 8 * * *".into(),
            },
            TaskAction::SimpleMessage {
                message: "drink water".into(),
            },
        );
        task.description = "morning hydration nudge".into();
        task.notification_channel = Some("telegram".into());
        task.model = Some("claude-3-5-haiku-20241022".into());
        task.last_run_at = Some(Utc::now());
        task.next_run_at = Some(Utc::now());
        task
    }

    #[test]
    fn row_round_trip_preserves_every_field() {
        let task = water_task();
        let row = task.to_row().unwrap();
        let back = ScheduledTask::from_row(row).unwrap();
        assert_eq!(back, task);
    }

    #[test]
    fn legacy_rows_without_model_deserialize() {
        let mut row = water_task().to_row().unwrap();
        // Databases that predate the model column surface it as None.
        row.model = None;
        let back = ScheduledTask::from_row(row).unwrap();
        assert!(back.model.is_none());
        assert_eq!(back.name, "water reminder");
    }

    #[test]
    fn schedule_spec_variants_deserialize_from_json() {
        let one_off: ScheduleSpec =
            serde_json::from_str(r#"{"run_at": "2025-06-01T15:00:00Z"}"#).unwrap();
        assert!(matches!(one_off, ScheduleSpec::RunAt { .. }));

        let cron: ScheduleSpec = serde_json::from_str(r#"{"cron": "0 8 * * *"}"#).unwrap();
        assert!(matches!(cron, ScheduleSpec::Cron { .. }));

        let fields: ScheduleSpec =
            serde_json::from_str(r#"{"hour": 9, "day_of_week": "mon"}"#).unwrap();
        match fields {
            ScheduleSpec::Fields(f) => {
                assert_eq!(f.hour, Some(9));
                assert_eq!(f.day_of_week, Some(DowValue::Name("mon".into())));
            }
            other => panic!("expected fields variant, got {other:?}"),
        }
    }

    #[test]
    fn action_json_is_tagged_by_type() {
        let action = TaskAction::AiTask {
            prompt: "summarise my inbox".into(),
        };
        let json = serde_json::to_value(&action).unwrap();
        assert_eq!(json["type"], "ai_task");
        assert_eq!(json["prompt"], "summarise my inbox");

        let back: TaskAction =
            serde_json::from_str(r#"{"type":"simple_message","message":"hi"}"#).unwrap();
        assert_eq!(back.kind(), "simple_message");
    }

    #[test]
    fn task_ids_are_32_hex() {
        let id = make_task_id();
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn task_type_parses_and_rejects() {
        assert_eq!(TaskType::parse("one_off").unwrap(), TaskType::OneOff);
        assert_eq!(TaskType::parse("recurring").unwrap(), TaskType::Recurring);
        assert!(TaskType::parse("sometimes").is_err());
    }
}
