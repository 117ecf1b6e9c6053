//! Session persistence for the Gwydion agent runtime.
//!
//! Defines the pluggable [`MessageStore`] contract the orchestrator saves
//! through, plus two implementations: an in-memory store for tests and
//! ephemeral embedding, and a JSON-file store as the reference persistence
//! format.

pub mod error;
pub mod json;
pub mod store;

pub use error::{Result, StoreError};
pub use json::JsonFileStore;
pub use store::{MemoryStore, MessageStore, SessionMeta, SessionSnapshot};
