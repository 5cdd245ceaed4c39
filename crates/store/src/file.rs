//! JSON-file store.
//!
//! Layout under the root directory:
//! - `workflows/<owner>_<name>.json`: one workflow document per file.
//! - `setups/<owner>_<component>.json`: a map of profile name → profile.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use tokio::fs;
use tracing::{debug, info};

use crate::{check_name, SetupProfile, StoreError, WorkflowStore};

const WORKFLOWS_DIR: &str = "workflows";
const SETUPS_DIR: &str = "setups";

#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// A store rooted at `root`. Directories are created lazily on first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn workflow_path(&self, owner: &str, name: &str) -> PathBuf {
        self.root
            .join(WORKFLOWS_DIR)
            .join(format!("{owner}_{name}.json"))
    }

    fn setup_path(&self, owner: &str, component: &str) -> PathBuf {
        self.root
            .join(SETUPS_DIR)
            .join(format!("{owner}_{component}.json"))
    }

    async fn read_json(path: &Path, kind: &'static str) -> Result<Value, StoreError> {
        match fs::read_to_string(path).await {
            Ok(text) => Ok(serde_json::from_str(&text)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::not_found(kind, path.display().to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn write_json(path: &Path, document: &Value) -> Result<(), StoreError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let text = serde_json::to_string_pretty(document)?;
        fs::write(path, text).await?;
        debug!(path = %path.display(), "document written");
        Ok(())
    }
}

#[async_trait]
impl WorkflowStore for FileStore {
    async fn load_workflow(&self, owner: &str, name: &str) -> Result<Value, StoreError> {
        check_name(owner)?;
        check_name(name)?;
        Self::read_json(&self.workflow_path(owner, name), "workflow").await
    }

    async fn save_workflow(
        &self,
        owner: &str,
        name: &str,
        document: &Value,
    ) -> Result<(), StoreError> {
        check_name(owner)?;
        check_name(name)?;
        Self::write_json(&self.workflow_path(owner, name), document).await?;
        info!(owner, workflow = name, "workflow saved");
        Ok(())
    }

    async fn list_workflows(&self, owner: &str) -> Result<Vec<String>, StoreError> {
        check_name(owner)?;
        let dir = self.root.join(WORKFLOWS_DIR);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let prefix = format!("{owner}_");
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if let Some(name) = stem.strip_prefix(&prefix) {
                    names.push(name.to_owned());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    async fn load_setup_profile(
        &self,
        owner: &str,
        component: &str,
        profile: &str,
    ) -> Result<SetupProfile, StoreError> {
        check_name(owner)?;
        check_name(component)?;
        let document = Self::read_json(&self.setup_path(owner, component), "setup").await?;
        match document.get(profile) {
            Some(Value::Object(map)) => Ok(map.clone()),
            Some(_) => Err(StoreError::InvalidDocument(format!(
                "setup profile '{profile}' for '{component}' is not an object"
            ))),
            None => Err(StoreError::not_found(
                "setup profile",
                format!("{owner}/{component}/{profile}"),
            )),
        }
    }

    async fn save_setup_profile(
        &self,
        owner: &str,
        component: &str,
        profile: &str,
        document: &SetupProfile,
    ) -> Result<(), StoreError> {
        check_name(owner)?;
        check_name(component)?;
        let path = self.setup_path(owner, component);
        let mut profiles = match Self::read_json(&path, "setup").await {
            Ok(Value::Object(map)) => map,
            Ok(_) => {
                return Err(StoreError::InvalidDocument(format!(
                    "setup file for '{component}' is not an object"
                )))
            }
            Err(e) if e.is_not_found() => serde_json::Map::new(),
            Err(e) => return Err(e),
        };
        profiles.insert(profile.to_owned(), Value::Object(document.clone()));
        Self::write_json(&path, &Value::Object(profiles)).await?;
        info!(owner, component, profile, "setup profile saved");
        Ok(())
    }
}
