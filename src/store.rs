//! Database-backed trigger state store

use async_trait::async_trait;
use sea_orm::DatabaseConnection;
use serde_json::Value;
use uuid::Uuid;

use crate::framework::{PieceError, Store};
use crate::repositories::TriggerStateRepository;

/// [`Store`] scoped to one trigger instance, persisted in `trigger_states`
#[derive(Clone)]
pub struct DbStore {
    instance_id: Uuid,
    states: TriggerStateRepository,
}

impl DbStore {
    pub fn new(db: DatabaseConnection, instance_id: Uuid) -> Self {
        Self {
            instance_id,
            states: TriggerStateRepository::new(db),
        }
    }
}

#[async_trait]
impl Store for DbStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, PieceError> {
        Ok(self.states.get(self.instance_id, key).await?)
    }

    async fn put(&self, key: &str, value: Value) -> Result<(), PieceError> {
        Ok(self.states.put(self.instance_id, key, value).await?)
    }

    async fn delete(&self, key: &str) -> Result<(), PieceError> {
        Ok(self.states.delete(self.instance_id, key).await?)
    }
}
