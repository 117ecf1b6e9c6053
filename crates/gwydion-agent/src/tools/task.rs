//! The `task` tool: delegate a prompt to an independent sub-agent session.
//!
//! The child session comes from the `create_child_session` hook on the
//! tool context. The tool streams the child's response text into a buffer
//! and returns it as the parent-side result; the child keeps its own
//! history and turn loop but shares the process-wide registries.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};

use crate::context::ToolContext;
use crate::error::Result;
use crate::permission::AgentType;
use crate::tool::{ParameterSchema, Tool, ToolOutput};

/// Registry id of the task tool.
pub const TASK_TOOL_ID: &str = "task";

/// Tool that runs a prompt in a child session.
#[derive(Debug, Default)]
pub struct TaskTool;

impl TaskTool {
    /// Create the tool.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Tool for TaskTool {
    fn id(&self) -> &str {
        TASK_TOOL_ID
    }

    fn description(&self) -> String {
        "Launch a new agent to handle complex, multi-step tasks autonomously.".to_string()
    }

    fn parameters(&self) -> Vec<ParameterSchema> {
        vec![
            ParameterSchema::string("prompt", "The task for the agent to perform", true),
            ParameterSchema::string("description", "A short description of the task", true),
            ParameterSchema::string("agent_type", "The type of agent to use", false)
                .with_default(json!("general"))
                .with_enum(vec![json!("general"), json!("explore")]),
        ]
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let Some(prompt) = args.get("prompt").and_then(|v| v.as_str()) else {
            return Ok(ToolOutput::error("missing required parameter 'prompt'"));
        };
        let description = args
            .get("description")
            .and_then(|v| v.as_str())
            .unwrap_or("subtask");
        let agent_type = args
            .get("agent_type")
            .and_then(|v| v.as_str())
            .and_then(AgentType::from_str_opt)
            .unwrap_or(AgentType::General);

        let Some(factory) = &ctx.create_child_session else {
            return Ok(ToolOutput::error(
                "task tool requires a session context that can create child sessions",
            ));
        };
        let Some(child) = factory(agent_type) else {
            return Ok(ToolOutput::error("failed to create child session"));
        };

        tracing::info!(
            parent = %ctx.session_id,
            child = %child.id(),
            agent_type = agent_type.as_str(),
            description,
            "spawning child session"
        );

        // Capture the child's streamed text; its terminal outcome comes
        // back from run_prompt directly.
        let buffer = Arc::new(Mutex::new(String::new()));
        let capture = Arc::clone(&buffer);
        child.on_stream(move |text| {
            capture.lock().unwrap().push_str(text);
        });

        match child.run_prompt(prompt).await {
            Ok(_) => {
                let text = buffer.lock().unwrap().clone();
                Ok(ToolOutput::text(if text.is_empty() {
                    "Task completed with no output".to_string()
                } else {
                    text
                }))
            }
            Err(e) => Ok(ToolOutput::error(format!("child session failed: {e}"))),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permission::{AgentConfig, PermissionEngine};
    use crate::registry::ToolRegistry;
    use crate::session::ChildSessionFactory;
    use gwydion_llm::{MockProvider, MockTurn};

    fn child_factory(turns: Vec<MockTurn>) -> Arc<crate::context::ChildSessionFn> {
        ChildSessionFactory::new(Arc::new(MockProvider::new(turns)), |agent_type| {
            AgentConfig::new(agent_type, "mock-model")
        })
        .with_tools(Arc::new(ToolRegistry::new()))
        .with_permissions(Arc::new(PermissionEngine::new()))
        .into_fn()
    }

    #[tokio::test]
    async fn test_task_runs_child_and_captures_text() {
        let ctx = ToolContext::new("parent", "m1")
            .with_child_factory(child_factory(vec![MockTurn::text("child findings")]));

        let out = TaskTool::new()
            .execute(
                json!({
                    "prompt": "explore the codebase",
                    "description": "explore",
                    "agent_type": "explore"
                }),
                &ctx,
            )
            .await
            .unwrap();

        assert!(!out.is_error);
        assert_eq!(out.content, "child findings");
    }

    #[tokio::test]
    async fn test_task_without_factory_errors() {
        let ctx = ToolContext::new("parent", "m1");
        let out = TaskTool::new()
            .execute(json!({"prompt": "x", "description": "d"}), &ctx)
            .await
            .unwrap();

        assert!(out.is_error);
        assert!(out.content.contains("child sessions"));
    }

    #[tokio::test]
    async fn test_task_missing_prompt_errors() {
        let ctx = ToolContext::new("parent", "m1")
            .with_child_factory(child_factory(vec![MockTurn::text("unused")]));

        let out = TaskTool::new()
            .execute(json!({"description": "d"}), &ctx)
            .await
            .unwrap();

        assert!(out.is_error);
        assert!(out.content.contains("prompt"));
    }

    #[tokio::test]
    async fn test_task_child_failure_is_tool_error() {
        // An exhausted provider makes the child's first turn fail.
        let ctx = ToolContext::new("parent", "m1").with_child_factory(child_factory(vec![]));

        let out = TaskTool::new()
            .execute(json!({"prompt": "x", "description": "d"}), &ctx)
            .await
            .unwrap();

        assert!(out.is_error);
        assert!(out.content.contains("child session failed"));
    }
}
