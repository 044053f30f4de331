//! Human-readable summaries of pending tool calls, rendered into
//! confirmation prompts. Per-tool formatters keep the dangerous ones
//! legible; everything else falls back to the tool description plus
//! truncated parameters.

use serde_json::Value;

use crate::scheduler::cron::CronSpec;

const MAX_FIELD: usize = 200;

fn trunc(text: &str) -> String {
    if text.chars().count() <= MAX_FIELD {
        return text.to_string();
    }
    let cut: String = text.chars().take(MAX_FIELD).collect();
    format!("{cut}\u{2026}")
}

fn str_arg<'a>(input: &'a Value, key: &str) -> Option<&'a str> {
    input.get(key).and_then(Value::as_str)
}

/// Build the summary block shown in an approve/deny prompt.
pub fn format_tool_summary(tool_name: &str, input: &Value, description: &str) -> String {
    match tool_name {
        "schedule_task" => fmt_schedule_task(input),
        "cancel_scheduled_task" => fmt_cancel_scheduled_task(input, description),
        "scratch_delete_file" => fmt_scratch_delete(input),
        _ => fmt_generic(tool_name, input, description),
    }
}

fn fmt_schedule_task(input: &Value) -> String {
    let mut lines = vec!["Schedule task".to_string()];
    if let Some(name) = str_arg(input, "name") {
        lines.push(format!("Name: {name}"));
    }
    if let Some(task_type) = str_arg(input, "task_type") {
        lines.push(format!("Type: {task_type}"));
    }
    if let Some(run_at) = str_arg(input, "run_at") {
        lines.push(format!("When: {run_at}"));
    }
    if let Some(cron) = str_arg(input, "cron") {
        let human = CronSpec::parse(cron)
            .map(|spec| spec.describe())
            .unwrap_or_else(|_| cron.to_string());
        lines.push(format!("When: {human}"));
    }
    if let Some(action_type) = str_arg(input, "action_type") {
        lines.push(format!("Action: {action_type}"));
    }
    if let Some(content) = str_arg(input, "action_content") {
        lines.push(format!("Content: {}", trunc(content)));
    }
    lines.join("\n")
}

fn fmt_cancel_scheduled_task(input: &Value, description: &str) -> String {
    let mut lines = vec!["Cancel scheduled task".to_string()];
    // The turn loop enriches the description with the target task's
    // stored state; show it instead of an opaque id when present.
    if description.starts_with("Cancel task") {
        lines.push(description.to_string());
    }
    if let Some(task_id) = str_arg(input, "task_id") {
        lines.push(format!("Task ID: {task_id}"));
    }
    if let Some(query) = str_arg(input, "search_query") {
        lines.push(format!("Search: {query}"));
    }
    lines.join("\n")
}

fn fmt_scratch_delete(input: &Value) -> String {
    let filename = str_arg(input, "filename").unwrap_or("?");
    format!("Delete scratch file\nFile: {filename}")
}

fn fmt_generic(tool_name: &str, input: &Value, description: &str) -> String {
    let params = trunc(&input.to_string());
    format!("{tool_name}\n{description}\nParams: {params}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schedule_task_summary_humanises_cron() {
        let summary = format_tool_summary(
            "schedule_task",
            &serde_json::json!({
                "name": "morning briefing",
                "task_type": "recurring",
                "cron": "0 8 * * *",
                "action_type": "ai_task",
                "action_content": "summarise my calendar",
            }),
            "Schedule a task",
        );
        assert!(summary.contains("Name: morning briefing"));
        assert!(summary.contains("When: daily at 08:00"));
        assert!(summary.contains("Action: ai_task"));
    }

    #[test]
    fn cancel_summary_shows_enriched_description() {
        let summary = format_tool_summary(
            "cancel_scheduled_task",
            &serde_json::json!({"task_id": "abc123"}),
            "Cancel task \"water reminder\" (recurring, daily at 08:00)",
        );
        assert!(summary.contains("water reminder"));
        assert!(summary.contains("Task ID: abc123"));
    }

    #[test]
    fn generic_fallback_truncates_parameters() {
        let long = "x".repeat(500);
        let summary = format_tool_summary(
            "send_email",
            &serde_json::json!({"body": long}),
            "Send an email",
        );
        assert!(summary.starts_with("send_email\nSend an email\nParams:"));
        assert!(summary.contains('\u{2026}'));
        assert!(summary.chars().count() < 300);
    }
}
