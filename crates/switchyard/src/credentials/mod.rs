//! Pluggable credential stores.
//!
//! The ledger holds credential *references*; the secrets live in stores
//! registered here by id. The runtime never logs raw values, and deleting a
//! reference fires a best-effort delete against the backing store before the
//! local row is removed.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use zeroize::Zeroizing;

#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("credential store not found: {0}")]
    StoreNotFound(String),

    #[error("credential not found")]
    NotFound,

    #[error("credential store error: {0}")]
    Store(String),
}

/// A backing secret store.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    fn id(&self) -> &str;

    async fn get(&self, key: &str) -> Result<Zeroizing<String>, CredentialError>;
    async fn set(&self, key: &str, value: &str) -> Result<(), CredentialError>;
    async fn delete(&self, key: &str) -> Result<(), CredentialError>;
    async fn has(&self, key: &str) -> Result<bool, CredentialError>;
}

// ─── Registry ─────────────────────────────────────────────────────────────────

/// Store lookup by id.
#[derive(Clone, Default)]
pub struct CredentialStoreRegistry {
    stores: HashMap<String, Arc<dyn CredentialStore>>,
}

impl CredentialStoreRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, store: Arc<dyn CredentialStore>) {
        self.stores.insert(store.id().to_string(), store);
    }

    pub fn get(&self, store_id: &str) -> Result<Arc<dyn CredentialStore>, CredentialError> {
        self.stores
            .get(store_id)
            .cloned()
            .ok_or_else(|| CredentialError::StoreNotFound(store_id.to_string()))
    }

    /// Fire the external delete for a reference. Failures are logged and
    /// swallowed: the local row removal must not be blocked.
    pub async fn delete_best_effort(&self, store_id: &str, key: &str) {
        let result = match self.get(store_id) {
            Ok(store) => store.delete(key).await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            tracing::warn!(store = store_id, error = %e, "external credential delete failed");
        }
    }
}

// ─── In-memory store ──────────────────────────────────────────────────────────

/// Process-local store, primarily for tests and single-node deployments.
pub struct MemoryCredentialStore {
    id: String,
    values: Mutex<HashMap<String, String>>,
}

impl MemoryCredentialStore {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            values: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    fn id(&self) -> &str {
        &self.id
    }

    async fn get(&self, key: &str) -> Result<Zeroizing<String>, CredentialError> {
        self.values
            .lock()
            .map_err(|_| CredentialError::Store("lock poisoned".into()))?
            .get(key)
            .map(|v| Zeroizing::new(v.clone()))
            .ok_or(CredentialError::NotFound)
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), CredentialError> {
        self.values
            .lock()
            .map_err(|_| CredentialError::Store("lock poisoned".into()))?
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CredentialError> {
        self.values
            .lock()
            .map_err(|_| CredentialError::Store("lock poisoned".into()))?
            .remove(key);
        Ok(())
    }

    async fn has(&self, key: &str) -> Result<bool, CredentialError> {
        Ok(self
            .values
            .lock()
            .map_err(|_| CredentialError::Store("lock poisoned".into()))?
            .contains_key(key))
    }
}

// ─── Environment store ────────────────────────────────────────────────────────

/// Read-only store backed by process environment variables.
pub struct EnvCredentialStore {
    id: String,
}

impl EnvCredentialStore {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

#[async_trait]
impl CredentialStore for EnvCredentialStore {
    fn id(&self) -> &str {
        &self.id
    }

    async fn get(&self, key: &str) -> Result<Zeroizing<String>, CredentialError> {
        std::env::var(key)
            .map(Zeroizing::new)
            .map_err(|_| CredentialError::NotFound)
    }

    async fn set(&self, _key: &str, _value: &str) -> Result<(), CredentialError> {
        Err(CredentialError::Store("environment store is read-only".into()))
    }

    async fn delete(&self, _key: &str) -> Result<(), CredentialError> {
        Err(CredentialError::Store("environment store is read-only".into()))
    }

    async fn has(&self, key: &str) -> Result<bool, CredentialError> {
        Ok(std::env::var(key).is_ok())
    }
}
