//! Permission engine: policy evaluation over (tool id, agent config).
//!
//! Evaluation order is fixed: denied list, allowed list, per-tool map,
//! runtime cache, default. The runtime cache records user decisions
//! (`grant` / `deny` for the session) and is the only mutable state; for a
//! fixed (tool, config, cache) triple the check is a pure function.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

// ─────────────────────────────────────────────────────────────────────────────
// Permission & Agent Config
// ─────────────────────────────────────────────────────────────────────────────

/// Outcome of a permission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    /// Run without asking.
    Allow,
    /// Resolve through the installed question handler.
    Ask,
    /// Refuse; the call becomes an error-flagged tool result.
    Deny,
}

/// The kind of conversational agent a session runs as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentType {
    Build,
    Explore,
    General,
    Plan,
    Compaction,
}

impl AgentType {
    /// Stable lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Build => "build",
            Self::Explore => "explore",
            Self::General => "general",
            Self::Plan => "plan",
            Self::Compaction => "compaction",
        }
    }

    /// Parse a lowercase name.
    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s {
            "build" => Some(Self::Build),
            "explore" => Some(Self::Explore),
            "general" => Some(Self::General),
            "plan" => Some(Self::Plan),
            "compaction" => Some(Self::Compaction),
            _ => None,
        }
    }
}

/// Per-session agent policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Agent kind.
    pub agent_type: AgentType,
    /// Model id to request.
    pub model: String,
    /// System prompt carried out-of-band.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    /// Max tokens per turn.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Sampling temperature.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Stop sequences.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop_sequences: Vec<String>,
    /// Fallback when nothing more specific applies.
    pub default_permission: Permission,
    /// Whitelist: when non-empty, tools outside it are denied.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_tools: Vec<String>,
    /// Blacklist: always denied.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub denied_tools: Vec<String>,
    /// Explicit per-tool permissions.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub permissions: HashMap<String, Permission>,
}

impl AgentConfig {
    /// Create a config for the given agent type and model.
    pub fn new(agent_type: AgentType, model: impl Into<String>) -> Self {
        Self {
            agent_type,
            model: model.into(),
            system_prompt: None,
            max_tokens: None,
            temperature: None,
            stop_sequences: Vec::new(),
            default_permission: Permission::Allow,
            allowed_tools: Vec::new(),
            denied_tools: Vec::new(),
            permissions: HashMap::new(),
        }
    }

    /// Set the system prompt.
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Set the per-turn token budget.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Set the sampling temperature.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Set the default permission.
    pub fn with_default_permission(mut self, permission: Permission) -> Self {
        self.default_permission = permission;
        self
    }

    /// Restrict to a whitelist of tools.
    pub fn with_allowed_tools(mut self, tools: Vec<String>) -> Self {
        self.allowed_tools = tools;
        self
    }

    /// Blacklist tools.
    pub fn with_denied_tools(mut self, tools: Vec<String>) -> Self {
        self.denied_tools = tools;
        self
    }

    /// Set an explicit per-tool permission.
    pub fn with_permission(mut self, tool_id: impl Into<String>, permission: Permission) -> Self {
        self.permissions.insert(tool_id.into(), permission);
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Permission Engine
// ─────────────────────────────────────────────────────────────────────────────

/// Policy evaluator with a runtime decision cache.
#[derive(Default)]
pub struct PermissionEngine {
    cache: Mutex<HashMap<String, Permission>>,
}

impl PermissionEngine {
    /// Create an engine with an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// The default process-wide engine.
    pub fn global() -> Arc<PermissionEngine> {
        static GLOBAL: OnceLock<Arc<PermissionEngine>> = OnceLock::new();
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(PermissionEngine::new())))
    }

    /// Evaluate the policy for one tool under one agent config.
    pub fn check(&self, tool_id: &str, config: &AgentConfig) -> Permission {
        // 1. Blacklist wins outright.
        if config.denied_tools.iter().any(|t| t == tool_id) {
            return Permission::Deny;
        }

        // 2. A non-empty whitelist excludes everything outside it.
        if !config.allowed_tools.is_empty()
            && !config.allowed_tools.iter().any(|t| t == tool_id)
        {
            return Permission::Deny;
        }

        // 3. Explicit per-tool permission.
        if let Some(permission) = config.permissions.get(tool_id) {
            return *permission;
        }

        // 4. Runtime cache of prior user decisions.
        if let Some(permission) = self.cache.lock().unwrap().get(tool_id) {
            return *permission;
        }

        // 5. Config default.
        config.default_permission
    }

    /// Record a grant-for-session decision.
    pub fn grant(&self, tool_id: impl Into<String>) {
        self.cache
            .lock()
            .unwrap()
            .insert(tool_id.into(), Permission::Allow);
    }

    /// Record a deny-for-session decision.
    pub fn deny(&self, tool_id: impl Into<String>) {
        self.cache
            .lock()
            .unwrap()
            .insert(tool_id.into(), Permission::Deny);
    }

    /// The cached decision for a tool, if any.
    pub fn cached(&self, tool_id: &str) -> Option<Permission> {
        self.cache.lock().unwrap().get(tool_id).copied()
    }

    /// Drop all cached decisions.
    pub fn clear_cache(&self) {
        self.cache.lock().unwrap().clear();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
