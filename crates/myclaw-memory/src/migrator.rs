//! One-shot legacy workspace migrator: imports `AGENTS.md`, `SOUL.md`, and
//! `memory/MEMORY.md`/`memory/YYYY-MM-DD.md` day files into tier-1/tier-3
//! rows (§6 "Persisted state", supplemented feature 2).

use std::path::Path;

use tracing::{info, warn};

use crate::error::Result;
use crate::manager::MemoryEngine;
use crate::types::{MemoryCategory, NewMemory, Tier, DEFAULT_PROJECT, DEFAULT_TOPIC};

const MARKER_SOURCE: &str = "legacy_migration";

/// Imports a legacy workspace directory once. Safe to call on every boot:
/// it checks for a tier-1 row with `source = "legacy_migration"` before
/// touching the filesystem and is a no-op if one already exists.
pub fn migrate_if_needed(memory: &MemoryEngine, workspace: &Path) -> Result<()> {
    if memory.active_tier1()?.iter().any(|m| m.source == MARKER_SOURCE) {
        return Ok(());
    }

    let mut imported_any = false;

    for name in ["AGENTS.md", "SOUL.md"] {
        let path = workspace.join(name);
        match std::fs::read_to_string(&path) {
            Ok(content) if !content.trim().is_empty() => {
                memory.insert(NewMemory {
                    tier: Tier::Profile,
                    project: DEFAULT_PROJECT.to_string(),
                    topic: DEFAULT_TOPIC.to_string(),
                    category: MemoryCategory::Identity,
                    content: content.trim().to_string(),
                    importance: 1.0,
                    source: MARKER_SOURCE.to_string(),
                })?;
                imported_any = true;
                info!(file = name, "migrated legacy profile file into tier-1");
            }
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(file = name, error = %e, "failed to read legacy profile file"),
        }
    }

    let memory_dir = workspace.join("memory");
    if let Ok(content) = std::fs::read_to_string(memory_dir.join("MEMORY.md")) {
        if !content.trim().is_empty() {
            memory.insert(NewMemory::tier2(
                MemoryCategory::Conversation,
                content.trim().to_string(),
                0.5,
                MARKER_SOURCE,
            ))?;
            imported_any = true;
            info!("migrated legacy MEMORY.md into tier-2");
        }
    }

    if let Ok(dir) = std::fs::read_dir(&memory_dir) {
        for entry in dir.flatten() {
            let path = entry.path();
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if !is_day_file_name(stem) {
                continue;
            }
            match std::fs::read_to_string(&path) {
                Ok(content) if !content.trim().is_empty() => {
                    memory.insert_event(stem, "legacy", "unknown", content.trim(), 0)?;
                    imported_any = true;
                }
                Ok(_) => {}
                Err(e) => warn!(file = %path.display(), error = %e, "failed to read legacy day file"),
            }
        }
    }

    if !imported_any {
        // Nothing to migrate; leave no marker row so a future run with a
        // newly-populated legacy directory still imports it.
        return Ok(());
    }
    Ok(())
}

fn is_day_file_name(stem: &str) -> bool {
    let bytes = stem.as_bytes();
    bytes.len() == 10
        && bytes[4] == b'-'
        && bytes[7] == b'-'
        && stem.chars().enumerate().all(|(i, c)| match i {
            4 | 7 => c == '-',
            _ => c.is_ascii_digit(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn day_file_name_matches_iso_date() {
        assert!(is_day_file_name("2026-07-29"));
        assert!(!is_day_file_name("MEMORY"));
        assert!(!is_day_file_name("2026-07-2x"));
    }
}
