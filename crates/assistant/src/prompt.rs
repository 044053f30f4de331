//! System prompt assembly.
//!
//! The static parts come from markdown documents in the config
//! directory (`SOUL.md` for the persona, `USER.md` for the owner
//! profile) and are flagged cacheable so providers reuse them across
//! tool-calling rounds. Memories recalled for the current user message
//! are appended as a separate, uncached block.

use valet_providers::SystemBlock;

use crate::memory::MemoryEntry;
use crate::state::Services;

const FALLBACK_PERSONA: &str =
    "You are Valet, a personal assistant. Be concise, practical, and direct.";

fn read_config_doc(services: &Services, filename: &str) -> Option<String> {
    let path = services.config.config_dir.join(filename);
    match std::fs::read_to_string(&path) {
        Ok(text) if !text.trim().is_empty() => Some(text),
        _ => None,
    }
}

fn format_memories(entries: &[MemoryEntry]) -> String {
    let mut lines = vec!["## Recalled Memories".to_string(), String::new()];
    for entry in entries {
        lines.push(format!(
            "- [{}/{}] {}",
            entry.source, entry.category, entry.content
        ));
    }
    lines.join("\n")
}

/// Assemble the system blocks for one turn. `user_message` drives
/// memory retrieval; pass an empty string to skip it.
pub async fn build_system_prompt(services: &Services, user_message: &str) -> Vec<SystemBlock> {
    let mut sections = Vec::new();
    if let Some(soul) = read_config_doc(services, "SOUL.md") {
        sections.push(soul);
    }
    if let Some(user) = read_config_doc(services, "USER.md") {
        sections.push(format!("# Owner Profile\n\n{user}"));
    }
    let static_text = if sections.is_empty() {
        FALLBACK_PERSONA.to_string()
    } else {
        sections.join("\n\n---\n\n")
    };

    let mut blocks = vec![SystemBlock::cached(static_text)];

    if !user_message.is_empty() {
        if let Some(memory) = &services.memory {
            match memory.recall(user_message, 10).await {
                Ok(entries) if !entries.is_empty() => {
                    blocks.push(SystemBlock::plain(format_memories(&entries)));
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "memory retrieval failed"),
            }
        }
    }

    blocks
}
