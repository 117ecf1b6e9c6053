//! Process-wide, thread-safe tool registry.
//!
//! One registry is shared by every session; tools are held by `Arc` and
//! referenced concurrently. A single mutex guards the map, so any lookup
//! observing a registration observes all of its fields. A default global
//! instance exists for convenience, but sessions take the registry as an
//! injected dependency so tests and embedders can isolate their own.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

use gwydion_llm::ToolDefinition;

use crate::tool::{definition_for, Tool};

/// Name-keyed set of tool descriptors.
#[derive(Default)]
pub struct ToolRegistry {
    tools: Mutex<HashMap<String, Arc<dyn Tool>>>,
}

impl ToolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The default process-wide registry.
    pub fn global() -> Arc<ToolRegistry> {
        static GLOBAL: OnceLock<Arc<ToolRegistry>> = OnceLock::new();
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(ToolRegistry::new())))
    }

    /// Register a tool. Registration is idempotent by id: a same-id
    /// registration replaces the previous one.
    pub fn register(&self, tool: Arc<dyn Tool>) {
        let id = tool.id().to_string();
        tracing::debug!(tool = %id, "registering tool");
        self.tools.lock().unwrap().insert(id, tool);
    }

    /// Register a concrete tool value.
    pub fn register_tool<T: Tool + 'static>(&self, tool: T) {
        self.register(Arc::new(tool));
    }

    /// Unregister by id. Returns whether a tool was removed.
    pub fn unregister(&self, id: &str) -> bool {
        self.tools.lock().unwrap().remove(id).is_some()
    }

    /// Look up a tool by id.
    pub fn get(&self, id: &str) -> Option<Arc<dyn Tool>> {
        self.tools.lock().unwrap().get(id).cloned()
    }

    /// Check if a tool is registered.
    pub fn contains(&self, id: &str) -> bool {
        self.tools.lock().unwrap().contains_key(id)
    }

    /// All registered tools, sorted by id for deterministic catalogs.
    pub fn list(&self) -> Vec<Arc<dyn Tool>> {
        let mut tools: Vec<Arc<dyn Tool>> =
            self.tools.lock().unwrap().values().cloned().collect();
        tools.sort_by(|a, b| a.id().cmp(b.id()));
        tools
    }

    /// All registered ids, sorted.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.tools.lock().unwrap().keys().cloned().collect();
        ids.sort_unstable();
        ids
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.tools.lock().unwrap().len()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.tools.lock().unwrap().is_empty()
    }

    /// Provider-facing definitions for every registered tool.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.list()
            .iter()
            .map(|tool| definition_for(tool.as_ref()))
            .collect()
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.ids())
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::MockTool;

    #[test]
    fn test_register_get_unregister() {
        let registry = ToolRegistry::new();
        assert!(registry.is_empty());

        registry.register_tool(MockTool::new("read", "data"));
        assert_eq!(registry.len(), 1);
        assert!(registry.contains("read"));
        assert_eq!(registry.get("read").unwrap().id(), "read");
        assert!(registry.get("write").is_none());

        assert!(registry.unregister("read"));
        assert!(!registry.unregister("read"));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_register_same_id_replaces() {
        let registry = ToolRegistry::new();
        registry.register_tool(MockTool::new("dup", "first"));
        registry.register_tool(MockTool::new("dup", "second"));

        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_list_sorted() {
        let registry = ToolRegistry::new();
        registry.register_tool(MockTool::new("zeta", ""));
        registry.register_tool(MockTool::new("alpha", ""));

        let tools = registry.list();
        let ids: Vec<&str> = tools.iter().map(|t| t.id()).collect();
        assert_eq!(ids, vec!["alpha", "zeta"]);
    }

    #[test]
    fn test_definitions() {
        let registry = ToolRegistry::new();
        registry.register_tool(MockTool::new("read", ""));

        let defs = registry.definitions();
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].name, "read");
    }

    #[test]
    fn test_concurrent_registration_and_lookup() {
        let registry = Arc::new(ToolRegistry::new());
        let mut handles = Vec::new();

        for i in 0..8 {
            let registry = Arc::clone(&registry);
            handles.push(std::thread::spawn(move || {
                registry.register_tool(MockTool::new(format!("tool-{i}"), ""));
                registry.get(&format!("tool-{i}"))
            }));
        }

        for handle in handles {
            // A reader that observes its own registration sees a complete tool.
            assert!(handle.join().unwrap().is_some());
        }
        assert_eq!(registry.len(), 8);
    }
}
