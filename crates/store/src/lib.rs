//! `store` crate: pure persistence layer.
//!
//! Stores workflow definitions and component setup profiles as JSON
//! documents, keyed by owner. No business logic lives here: documents are
//! handed out as `serde_json::Value` and interpreted by the engine.

pub mod error;
pub mod file;
pub mod memory;

use async_trait::async_trait;
use serde_json::{Map, Value};

pub use error::StoreError;
pub use file::FileStore;
pub use memory::MemoryStore;

/// Setup profiles are flat JSON objects (e.g. `{"bot_token": "..."}`).
pub type SetupProfile = Map<String, Value>;

/// Profile name used when a step does not name one.
pub const DEFAULT_PROFILE: &str = "default";

/// Persistence collaborator for workflows and setup profiles.
///
/// The owner is a local identity only; there is no access control.
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    async fn load_workflow(&self, owner: &str, name: &str) -> Result<Value, StoreError>;

    async fn save_workflow(&self, owner: &str, name: &str, document: &Value)
        -> Result<(), StoreError>;

    /// Workflow names stored for `owner`, sorted.
    async fn list_workflows(&self, owner: &str) -> Result<Vec<String>, StoreError>;

    async fn workflow_exists(&self, owner: &str, name: &str) -> Result<bool, StoreError> {
        match self.load_workflow(owner, name).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn load_setup_profile(
        &self,
        owner: &str,
        component: &str,
        profile: &str,
    ) -> Result<SetupProfile, StoreError>;

    async fn save_setup_profile(
        &self,
        owner: &str,
        component: &str,
        profile: &str,
        document: &SetupProfile,
    ) -> Result<(), StoreError>;
}

/// Reject names that could escape the store's directory layout.
pub(crate) fn check_name(name: &str) -> Result<(), StoreError> {
    if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
        Err(StoreError::InvalidName(name.to_owned()))
    } else {
        Ok(())
    }
}
