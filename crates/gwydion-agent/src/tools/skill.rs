//! The `skill` tool: activates a named instruction bundle.
//!
//! Its description is computed per request so the model always sees the
//! currently discovered skill names. Results of this tool are exempt from
//! history pruning — an activated skill's instructions must keep steering
//! the session.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use crate::context::ToolContext;
use crate::error::Result;
use crate::skill::SkillRegistry;
use crate::tool::{ParameterSchema, Tool, ToolOutput};

/// Registry id of the skill tool. History pruning keys its exemption on
/// this name.
pub const SKILL_TOOL_ID: &str = "skill";

/// Tool exposing the skill registry to the model.
pub struct SkillTool {
    skills: Arc<SkillRegistry>,
}

impl SkillTool {
    /// Create the tool over a skill registry.
    pub fn new(skills: Arc<SkillRegistry>) -> Self {
        Self { skills }
    }
}

#[async_trait]
impl Tool for SkillTool {
    fn id(&self) -> &str {
        SKILL_TOOL_ID
    }

    fn description(&self) -> String {
        let names = self.skills.names();
        if names.is_empty() {
            "Activate a skill by name to receive its instructions. \
             No skills are currently available."
                .to_string()
        } else {
            format!(
                "Activate a skill by name to receive its instructions. \
                 Available skills: {}",
                names.join(", ")
            )
        }
    }

    fn parameters(&self) -> Vec<ParameterSchema> {
        let mut name =
            ParameterSchema::string("name", "Name of the skill to activate", true);
        let names = self.skills.names();
        if !names.is_empty() {
            name = name.with_enum(names.into_iter().map(Value::String).collect());
        }
        vec![name]
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<ToolOutput> {
        let Some(name) = args.get("name").and_then(|v| v.as_str()) else {
            return Ok(ToolOutput::error("missing required parameter 'name'"));
        };

        match self.skills.get(name) {
            Some(skill) => {
                tracing::info!(skill = %name, "skill activated");
                Ok(ToolOutput::text(format!(
                    "# Skill: {}\n\n{}",
                    skill.name, skill.body
                )))
            }
            None => {
                let names = self.skills.names();
                Ok(ToolOutput::error(if names.is_empty() {
                    format!("unknown skill '{name}': no skills are available")
                } else {
                    format!(
                        "unknown skill '{name}'. Available skills: {}",
                        names.join(", ")
                    )
                }))
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
