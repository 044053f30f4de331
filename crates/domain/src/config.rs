use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// User id of the assistant's owner; scheduled-task notifications
    /// and missed-task prompts are addressed to this user.
    #[serde(default)]
    pub owner_user_id: String,
    /// Directory for mutable state (task database, scratch space).
    #[serde(default = "d_state_dir")]
    pub state_dir: PathBuf,
    /// Directory for prompt documents and the confirmation policy file.
    #[serde(default = "d_config_dir")]
    pub config_dir: PathBuf,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
    #[serde(default)]
    pub notifications: NotificationsConfig,
    #[serde(default)]
    pub confirmations: ConfirmationsConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub scratch: ScratchConfig,
}

fn d_state_dir() -> PathBuf {
    PathBuf::from("data")
}

fn d_config_dir() -> PathBuf {
    PathBuf::from("config")
}

impl Config {
    /// Load configuration from a TOML file. A missing file yields the
    /// defaults; a malformed file is an error.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::info!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        toml::from_str(&raw).map_err(|e| Error::Config(format!("{}: {e}", path.display())))
    }

    /// Path of the scheduled-task database.
    pub fn database_path(&self) -> PathBuf {
        self.scheduler
            .database_path
            .clone()
            .unwrap_or_else(|| self.state_dir.join("valet.db"))
    }

    /// Root of the scratch file space.
    pub fn scratch_root(&self) -> PathBuf {
        self.scratch
            .root
            .clone()
            .unwrap_or_else(|| self.state_dir.join("scratch"))
    }

    /// Path of the tool-confirmation policy file.
    pub fn confirmation_policy_path(&self) -> PathBuf {
        self.confirmations
            .policy_path
            .clone()
            .unwrap_or_else(|| self.config_dir.join("tool_confirmations.toml"))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LLM
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "d_base_url")]
    pub base_url: String,
    /// Environment variable holding the API key.
    #[serde(default = "d_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "d_model")]
    pub default_model: String,
    #[serde(default = "d_max_tokens")]
    pub max_tokens: u32,
    /// Whole-request timeout; streaming turns can run for minutes.
    #[serde(default = "d_request_timeout")]
    pub request_timeout_secs: u64,
    /// Friendly model aliases (e.g. "haiku" -> full model id).
    #[serde(default = "d_aliases")]
    pub aliases: HashMap<String, String>,
}

fn d_base_url() -> String {
    "https://api.anthropic.com".into()
}

fn d_api_key_env() -> String {
    "ANTHROPIC_API_KEY".into()
}

fn d_model() -> String {
    "claude-sonnet-4-20250514".into()
}

fn d_max_tokens() -> u32 {
    4096
}

fn d_request_timeout() -> u64 {
    300
}

fn d_aliases() -> HashMap<String, String> {
    HashMap::from([
        ("haiku".to_string(), "claude-3-5-haiku-20241022".to_string()),
        ("sonnet".to_string(), "claude-sonnet-4-20250514".to_string()),
        ("opus".to_string(), "claude-opus-4-20250514".to_string()),
    ])
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: d_base_url(),
            api_key_env: d_api_key_env(),
            default_model: d_model(),
            max_tokens: d_max_tokens(),
            request_timeout_secs: d_request_timeout(),
            aliases: d_aliases(),
        }
    }
}

impl LlmConfig {
    /// Resolve a friendly alias or a full model id. Returns `None` for
    /// names that are neither.
    pub fn resolve_model(&self, name_or_id: &str) -> Option<String> {
        if let Some(id) = self.aliases.get(name_or_id) {
            return Some(id.clone());
        }
        if self.aliases.values().any(|id| id == name_or_id) {
            return Some(name_or_id.to_string());
        }
        None
    }

    /// Friendly name for a model id, or the id itself.
    pub fn friendly<'a>(&'a self, model_id: &'a str) -> &'a str {
        self.aliases
            .iter()
            .find(|(_, id)| id.as_str() == model_id)
            .map(|(name, _)| name.as_str())
            .unwrap_or(model_id)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Sessions / notifications / confirmations
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsConfig {
    /// Sliding-window size per conversation.
    #[serde(default = "d_window")]
    pub window_size: usize,
}

fn d_window() -> usize {
    50
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            window_size: d_window(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NotificationsConfig {
    /// Channel used when neither the caller nor the task picks one.
    #[serde(default)]
    pub default_channel: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmationsConfig {
    #[serde(default = "d_confirm_timeout")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub policy_path: Option<PathBuf>,
}

fn d_confirm_timeout() -> u64 {
    120
}

impl Default for ConfirmationsConfig {
    fn default() -> Self {
        Self {
            timeout_secs: d_confirm_timeout(),
            policy_path: None,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scheduler / scratch
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// IANA timezone name the scheduler evaluates triggers in.
    #[serde(default = "d_timezone")]
    pub timezone: String,
    #[serde(default = "d_tick")]
    pub tick_interval_secs: u64,
    #[serde(default)]
    pub database_path: Option<PathBuf>,
}

fn d_timezone() -> String {
    "UTC".into()
}

fn d_tick() -> u64 {
    30
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            timezone: d_timezone(),
            tick_interval_secs: d_tick(),
            database_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ScratchConfig {
    #[serde(default)]
    pub root: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alias_resolution() {
        let llm = LlmConfig::default();
        assert_eq!(
            llm.resolve_model("sonnet").as_deref(),
            Some("claude-sonnet-4-20250514")
        );
        // A full id already in the alias table passes through.
        assert_eq!(
            llm.resolve_model("claude-opus-4-20250514").as_deref(),
            Some("claude-opus-4-20250514")
        );
        assert!(llm.resolve_model("gpt-4o").is_none());
    }

    #[test]
    fn friendly_name_lookup() {
        let llm = LlmConfig::default();
        assert_eq!(llm.friendly("claude-3-5-haiku-20241022"), "haiku");
        assert_eq!(llm.friendly("something-else"), "something-else");
    }

    #[test]
    fn derived_paths_follow_state_dir() {
        let mut config = Config::default();
        config.state_dir = PathBuf::from("/var/lib/valet");
        assert_eq!(config.database_path(), PathBuf::from("/var/lib/valet/valet.db"));
        assert_eq!(config.scratch_root(), PathBuf::from("/var/lib/valet/scratch"));
    }
}
