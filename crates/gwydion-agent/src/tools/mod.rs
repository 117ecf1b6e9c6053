//! Built-in tools that live inside the runtime itself.
//!
//! Filesystem and shell tools are the embedder's concern; the runtime
//! ships only the tools that need its own machinery — sub-agent spawning
//! and skill activation.

pub mod skill;
pub mod task;

pub use skill::{SkillTool, SKILL_TOOL_ID};
pub use task::TaskTool;
