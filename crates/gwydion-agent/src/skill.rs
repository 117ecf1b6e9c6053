//! Skill discovery and parsing.
//!
//! A skill is a named markdown instruction bundle, one per
//! `skills/<name>/SKILL.md` under a discovery root. The file opens with a
//! frontmatter block delimited by `---` lines carrying at least `name:`
//! and `description:`; everything after the closing delimiter is the body
//! the skill tool returns on activation.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// A parsed skill.
#[derive(Debug, Clone)]
pub struct SkillInfo {
    /// Skill name: lowercase alphanumeric with single hyphen separators.
    pub name: String,
    /// One-line description.
    pub description: String,
    /// Markdown body after the frontmatter.
    pub body: String,
    /// Where the skill was loaded from.
    pub source_path: PathBuf,
}

/// Validate a skill name: 1-64 chars matching `^[a-z0-9]+(-[a-z0-9]+)*$`.
pub fn validate_skill_name(name: &str) -> bool {
    if name.is_empty() || name.len() > 64 {
        return false;
    }
    let mut prev_hyphen = true; // rejects a leading hyphen
    for c in name.chars() {
        match c {
            'a'..='z' | '0'..='9' => prev_hyphen = false,
            '-' if !prev_hyphen => prev_hyphen = true,
            _ => return false,
        }
    }
    !prev_hyphen // rejects a trailing hyphen
}

/// Parse SKILL.md content. Returns the skill or a reason it is invalid.
pub fn parse_skill_content(
    content: &str,
    source_path: &Path,
) -> Result<SkillInfo, String> {
    let mut lines = content.lines();

    if lines.next().map(str::trim) != Some("---") {
        return Err("missing frontmatter opening delimiter".to_string());
    }

    let mut name = None;
    let mut description = None;
    let mut body_start = None;

    let mut consumed = 1;
    for line in lines {
        consumed += 1;
        let trimmed = line.trim();
        if trimmed == "---" {
            body_start = Some(consumed);
            break;
        }
        if let Some((key, value)) = trimmed.split_once(':') {
            match key.trim() {
                "name" => name = Some(value.trim().to_string()),
                "description" => description = Some(value.trim().to_string()),
                _ => {}
            }
        }
    }

    let body_start = body_start.ok_or("missing frontmatter closing delimiter")?;
    let name = name.ok_or("frontmatter missing 'name'")?;
    let description = description.ok_or("frontmatter missing 'description'")?;

    if !validate_skill_name(&name) {
        return Err(format!("invalid skill name '{name}'"));
    }
    if description.is_empty() || description.len() > 1024 {
        return Err("description must be 1-1024 characters".to_string());
    }

    let body = content
        .lines()
        .skip(body_start)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string();

    Ok(SkillInfo {
        name,
        description,
        body,
        source_path: source_path.to_path_buf(),
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Registry
// ─────────────────────────────────────────────────────────────────────────────

/// Discovered skills, keyed by name. Later discoveries win on conflicts.
#[derive(Debug, Default)]
pub struct SkillRegistry {
    skills: Mutex<BTreeMap<String, SkillInfo>>,
}

impl SkillRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Discover skills under `<root>/skills/*/SKILL.md` for each root.
    ///
    /// Unreadable or invalid files are logged and skipped. Returns the
    /// number of skills registered by this call.
    pub fn discover(&self, roots: &[PathBuf]) -> usize {
        let mut found = 0;

        for root in roots {
            let skills_dir = root.join("skills");
            let entries = match std::fs::read_dir(&skills_dir) {
                Ok(entries) => entries,
                Err(_) => continue,
            };

            for entry in entries.flatten() {
                let skill_file = entry.path().join("SKILL.md");
                let content = match std::fs::read_to_string(&skill_file) {
                    Ok(content) => content,
                    Err(_) => continue,
                };

                match parse_skill_content(&content, &skill_file) {
                    Ok(skill) => {
                        tracing::debug!(skill = %skill.name, path = %skill_file.display(), "skill discovered");
                        self.register(skill);
                        found += 1;
                    }
                    Err(reason) => {
                        tracing::warn!(path = %skill_file.display(), %reason, "skipping invalid skill");
                    }
                }
            }
        }

        if found > 0 {
            tracing::info!(count = found, "skills discovered");
        }
        found
    }

    /// Register one skill directly.
    pub fn register(&self, skill: SkillInfo) {
        self.skills.lock().unwrap().insert(skill.name.clone(), skill);
    }

    /// Get a skill by name.
    pub fn get(&self, name: &str) -> Option<SkillInfo> {
        self.skills.lock().unwrap().get(name).cloned()
    }

    /// All skill names, sorted.
    pub fn names(&self) -> Vec<String> {
        self.skills.lock().unwrap().keys().cloned().collect()
    }

    /// All skills, sorted by name.
    pub fn all(&self) -> Vec<SkillInfo> {
        self.skills.lock().unwrap().values().cloned().collect()
    }

    /// Number of registered skills.
    pub fn len(&self) -> usize {
        self.skills.lock().unwrap().len()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.skills.lock().unwrap().is_empty()
    }

    /// Drop all registered skills.
    pub fn clear(&self) {
        self.skills.lock().unwrap().clear();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
