//! In-memory store for tests and embedding.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde_json::Value;

use crate::{check_name, SetupProfile, StoreError, WorkflowStore};

type Key = (String, String);

#[derive(Debug, Default)]
struct Inner {
    workflows: BTreeMap<Key, Value>,
    setups: BTreeMap<Key, BTreeMap<String, SetupProfile>>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl WorkflowStore for MemoryStore {
    async fn load_workflow(&self, owner: &str, name: &str) -> Result<Value, StoreError> {
        self.lock()
            .workflows
            .get(&(owner.to_owned(), name.to_owned()))
            .cloned()
            .ok_or_else(|| StoreError::not_found("workflow", format!("{owner}/{name}")))
    }

    async fn save_workflow(
        &self,
        owner: &str,
        name: &str,
        document: &Value,
    ) -> Result<(), StoreError> {
        check_name(owner)?;
        check_name(name)?;
        self.lock()
            .workflows
            .insert((owner.to_owned(), name.to_owned()), document.clone());
        Ok(())
    }

    async fn list_workflows(&self, owner: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .lock()
            .workflows
            .keys()
            .filter(|(o, _)| o == owner)
            .map(|(_, name)| name.clone())
            .collect())
    }

    async fn load_setup_profile(
        &self,
        owner: &str,
        component: &str,
        profile: &str,
    ) -> Result<SetupProfile, StoreError> {
        self.lock()
            .setups
            .get(&(owner.to_owned(), component.to_owned()))
            .and_then(|profiles| profiles.get(profile))
            .cloned()
            .ok_or_else(|| {
                StoreError::not_found("setup profile", format!("{owner}/{component}/{profile}"))
            })
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
        self.lock()
            .setups
            .entry((owner.to_owned(), component.to_owned()))
            .or_default()
            .insert(profile.to_owned(), document.clone());
        Ok(())
    }
}
