//! System-prompt assembly (§4.9 composition step 1: "concatenate AGENTS.md
//! + SOUL.md + recent memory context").

use std::path::Path;

use tracing::warn;

/// Concatenates `AGENTS.md`, `SOUL.md` (both optional; a missing file
/// contributes nothing rather than failing the boot sequence) and a
/// caller-supplied recent-memory-context block.
pub fn build_system_prompt(workspace: Option<&Path>, memory_context: &str) -> String {
    let mut sections = Vec::new();

    if let Some(workspace) = workspace {
        if let Some(agents) = read_optional(&workspace.join("AGENTS.md")) {
            sections.push(agents);
        }
        if let Some(soul) = read_optional(&workspace.join("SOUL.md")) {
            sections.push(soul);
        }
    }

    if !memory_context.trim().is_empty() {
        sections.push(memory_context.to_string());
    }

    sections.join("\n\n")
}

fn read_optional(path: &Path) -> Option<String> {
    match std::fs::read_to_string(path) {
        Ok(content) => Some(content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to read system-prompt file, skipping");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_workspace_files_contribute_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let prompt = build_system_prompt(Some(dir.path()), "");
        assert_eq!(prompt, "");
    }

    #[test]
    fn concatenates_agents_soul_and_memory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("AGENTS.md"), "agents").unwrap();
        std::fs::write(dir.path().join("SOUL.md"), "soul").unwrap();
        let prompt = build_system_prompt(Some(dir.path()), "memory context");
        assert_eq!(prompt, "agents\n\nsoul\n\nmemory context");
    }
}
