//! Small utility tools.

use chrono::Utc;
use serde_json::json;

use valet_domain::tool::ToolResult;
use valet_tools::registry::empty_schema;
use valet_tools::Tool;

use crate::state::Services;

pub fn register(services: &Services) {
    let tz = services.scheduler.timezone();
    services.registry.register(
        Tool::new(
            "get_current_time",
            "Get the current date and time, in UTC and in the assistant's \
             configured timezone.",
            "utility",
            empty_schema(),
            move |_args, _ctx| async move {
                let now = Utc::now();
                Ok(ToolResult::ok(json!({
                    "time": now.to_rfc3339(),
                    "local_time": now.with_timezone(&tz).to_rfc3339(),
                    "timezone": tz.name(),
                })))
            },
        )
        .without_confirmation(),
    );
}
