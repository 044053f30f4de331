//! Console channel: prints notifications to stdout.
//!
//! Used by the `valet` binary so the whole runtime (scheduler output,
//! confirmation prompts, missed-task notices) works in a terminal
//! without a chat transport. Button payloads are printed so the
//! operator can type them back as callback input.

use super::channel::{ButtonRows, NotificationChannel, SendOutcome};

pub struct ConsoleChannel;

impl ConsoleChannel {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ConsoleChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl NotificationChannel for ConsoleChannel {
    fn name(&self) -> &str {
        "console"
    }

    async fn send(&self, _user_id: &str, message: &str) -> bool {
        println!("\n[valet] {message}");
        true
    }

    async fn send_rich(
        &self,
        _user_id: &str,
        message: &str,
        buttons: Option<&ButtonRows>,
        _parse_mode: Option<&str>,
    ) -> SendOutcome {
        println!("\n[valet] {message}");
        if let Some(rows) = buttons {
            for button in rows.iter().flatten() {
                match &button.callback_data {
                    Some(data) => println!("  [{}] -> type: {}", button.text, data),
                    None => println!("  [{}]", button.text),
                }
            }
        }
        // The console has no editable message handles.
        SendOutcome::sent(None)
    }
}
