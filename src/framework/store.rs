//! Trigger state store
//!
//! Triggers persist small JSON values between runs (polling cursors, vendor
//! webhook ids). Each store is scoped to a single trigger instance.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::framework::error::PieceError;

#[async_trait]
pub trait Store: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>, PieceError>;
    async fn put(&self, key: &str, value: Value) -> Result<(), PieceError>;
    async fn delete(&self, key: &str) -> Result<(), PieceError>;
}

/// Process-local store, used for dry runs and tests
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: RwLock<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, PieceError> {
        Ok(self.values.read().await.get(key).cloned())
    }

    async fn put(&self, key: &str, value: Value) -> Result<(), PieceError> {
        self.values.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), PieceError> {
        self.values.write().await.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_memory_store_roundtrip() {
        let store = MemoryStore::new();
        assert_eq!(store.get("lastPoll").await.unwrap(), None);

        store.put("lastPoll", json!(1700000000000i64)).await.unwrap();
        assert_eq!(
            store.get("lastPoll").await.unwrap(),
            Some(json!(1700000000000i64))
        );

        store.delete("lastPoll").await.unwrap();
        assert_eq!(store.get("lastPoll").await.unwrap(), None);
    }
}
