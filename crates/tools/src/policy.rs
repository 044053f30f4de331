//! Tool confirmation policy file.
//!
//! A single `[tools]` table mapping tool name to a boolean. The file is
//! re-read on every lookup so edits take effect without a restart. A
//! missing or malformed file is treated as empty, never fatal.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::Deserialize;

#[derive(Debug, Deserialize, Default)]
struct PolicyFile {
    #[serde(default)]
    tools: HashMap<String, bool>,
}

/// Live per-tool confirmation overrides.
#[derive(Debug, Clone, Default)]
pub struct ConfirmationPolicy {
    path: Option<PathBuf>,
}

impl ConfirmationPolicy {
    pub fn new(path: PathBuf) -> Self {
        Self { path: Some(path) }
    }

    /// A policy with no backing file; every lookup is `None`.
    pub fn unconfigured() -> Self {
        Self { path: None }
    }

    /// The file's value for a tool, if listed.
    pub fn lookup(&self, tool_name: &str) -> Option<bool> {
        self.load().tools.get(tool_name).copied()
    }

    fn load(&self) -> PolicyFile {
        let Some(path) = &self.path else {
            return PolicyFile::default();
        };
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(_) => return PolicyFile::default(),
        };
        match toml::from_str(&raw) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "malformed confirmation policy file, ignoring");
                PolicyFile::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let policy = ConfirmationPolicy::new(dir.path().join("missing.toml"));
        assert_eq!(policy.lookup("send_email"), None);
    }

    #[test]
    fn listed_tools_resolve() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tool_confirmations.toml");
        std::fs::write(&path, "[tools]\nsend_email = true\nsearch_emails = false\n").unwrap();

        let policy = ConfirmationPolicy::new(path);
        assert_eq!(policy.lookup("send_email"), Some(true));
        assert_eq!(policy.lookup("search_emails"), Some(false));
        assert_eq!(policy.lookup("unlisted"), None);
    }

    #[test]
    fn malformed_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tool_confirmations.toml");
        std::fs::write(&path, "this is not valid [[[ toml").unwrap();

        let policy = ConfirmationPolicy::new(path);
        assert_eq!(policy.lookup("anything"), None);
    }

    #[test]
    fn edits_are_picked_up_without_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tool_confirmations.toml");
        std::fs::write(&path, "[tools]\nmy_tool = true\n").unwrap();

        let policy = ConfirmationPolicy::new(path.clone());
        assert_eq!(policy.lookup("my_tool"), Some(true));

        std::fs::write(&path, "[tools]\nmy_tool = false\n").unwrap();
        assert_eq!(policy.lookup("my_tool"), Some(false));
    }
}
