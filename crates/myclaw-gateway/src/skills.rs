//! Skill loading: a directory of `SKILL.md` files with YAML front matter,
//! each becoming a system-prompt overlay (§4.9 composition step 2).

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use gray_matter::{engine::YAML, Matter};
use serde::Deserialize;
use tracing::warn;

use crate::error::{GatewayError, Result};

#[derive(Debug, Deserialize)]
struct SkillFrontMatter {
    name: String,
    description: String,
    #[serde(default)]
    keywords: Vec<String>,
}

/// A loaded skill: front matter plus the markdown body used as a
/// system-prompt overlay when `matches` fires.
#[derive(Debug, Clone)]
pub struct Skill {
    pub name: String,
    pub description: String,
    pub keywords: Vec<String>,
    pub body: String,
}

impl Skill {
    /// Keyword matcher: an empty keyword list means the skill is always
    /// eligible; otherwise any case-insensitive substring match fires it.
    pub fn matches(&self, text: &str) -> bool {
        if self.keywords.is_empty() {
            return true;
        }
        let lower = text.to_ascii_lowercase();
        self.keywords
            .iter()
            .any(|kw| lower.contains(&kw.to_ascii_lowercase()))
    }
}

/// Loads every `SKILL.md` found directly in `dir` or one level down inside a
/// subdirectory. Invalid front matter is a warning and the file is skipped;
/// a repeated skill `name` is a hard error (§4.9 composition step 2).
pub fn load_skills(dir: &Path) -> Result<Vec<Skill>> {
    let mut skills = Vec::new();
    let mut seen = HashSet::new();

    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(skills),
        Err(e) => return Err(e.into()),
    };

    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        let md_path = if path.is_dir() {
            let candidate = path.join("SKILL.md");
            if candidate.is_file() {
                candidate
            } else {
                continue;
            }
        } else if path.extension().map(|e| e == "md").unwrap_or(false) {
            path
        } else {
            continue
        };

        match parse_skill_file(&md_path) {
            Ok(skill) => {
                if !seen.insert(skill.name.clone()) {
                    return Err(GatewayError::DuplicateSkill(skill.name));
                }
                skills.push(skill);
            }
            Err(e) => {
                warn!(path = %md_path.display(), error = %e, "invalid skill front matter, skipping");
            }
        }
    }

    Ok(skills)
}

fn parse_skill_file(path: &Path) -> std::result::Result<Skill, String> {
    let raw = fs::read_to_string(path).map_err(|e| e.to_string())?;
    let matter = Matter::<YAML>::new();
    let parsed = matter.parse(&raw);
    let front_matter: SkillFrontMatter = parsed
        .data
        .ok_or_else(|| "missing YAML front matter".to_string())?
        .deserialize()
        .map_err(|e| e.to_string())?;

    Ok(Skill {
        name: front_matter.name,
        description: front_matter.description,
        keywords: front_matter.keywords,
        body: parsed.content,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_skill(dir: &Path, name: &str, content: &str) {
        fs::write(dir.join(name), content).unwrap();
    }

    #[test]
    fn loads_skill_with_front_matter() {
        let dir = tempfile::tempdir().unwrap();
        write_skill(
            dir.path(),
            "a.md",
            "---\nname: greet\ndescription: says hello\nkeywords: [\"hi\"]\n---\nBody text\n",
        );
        let skills = load_skills(dir.path()).unwrap();
        assert_eq!(skills.len(), 1);
        assert_eq!(skills[0].name, "greet");
        assert!(skills[0].matches("hi there"));
        assert!(!skills[0].matches("bye"));
    }

    #[test]
    fn invalid_front_matter_is_skipped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        write_skill(dir.path(), "bad.md", "no front matter here\n");
        let skills = load_skills(dir.path()).unwrap();
        assert!(skills.is_empty());
    }

    #[test]
    fn duplicate_skill_name_is_a_hard_error() {
        let dir = tempfile::tempdir().unwrap();
        write_skill(
            dir.path(),
            "a.md",
            "---\nname: dup\ndescription: one\n---\nbody\n",
        );
        write_skill(
            dir.path(),
            "b.md",
            "---\nname: dup\ndescription: two\n---\nbody\n",
        );
        let result = load_skills(dir.path());
        assert!(result.is_err());
    }

    #[test]
    fn empty_keywords_means_always_eligible() {
        let dir = tempfile::tempdir().unwrap();
        write_skill(
            dir.path(),
            "a.md",
            "---\nname: general\ndescription: no keywords\n---\nbody\n",
        );
        let skills = load_skills(dir.path()).unwrap();
        assert!(skills[0].matches("anything at all"));
    }
}
