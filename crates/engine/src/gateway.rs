//! Entity Gateway: read access to the entities operations target.
//!
//! The engine only checks existence at creation and loads each target
//! before handing it to a handler. Mutations are the handlers' business;
//! they hold whatever store handle the surrounding application gives them.

use std::collections::HashMap;

use async_trait::async_trait;
use bulkops_core::error::CoreError;
use bulkops_core::types::TargetId;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

// ---------------------------------------------------------------------------
// Entity
// ---------------------------------------------------------------------------

/// A record in the entity store, as seen by handlers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: TargetId,
    /// Human-readable name used in error and warning entries.
    pub label: String,
    pub attributes: serde_json::Value,
}

impl Entity {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            attributes: serde_json::Value::Object(Default::default()),
        }
    }

    pub fn with_attributes(mut self, attributes: serde_json::Value) -> Self {
        self.attributes = attributes;
        self
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    /// No entity with this id exists.
    #[error("Entity {0} not found")]
    NotFound(TargetId),

    /// The backing store could not be reached or failed the request.
    #[error("Entity store unavailable: {0}")]
    Unavailable(String),
}

impl From<GatewayError> for CoreError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::NotFound(id) => CoreError::NotFound {
                entity: "Entity",
                id,
            },
            GatewayError::Unavailable(msg) => CoreError::Internal(msg),
        }
    }
}

// ---------------------------------------------------------------------------
// EntityGateway
// ---------------------------------------------------------------------------

#[async_trait]
pub trait EntityGateway: Send + Sync {
    async fn exists(&self, id: &str) -> Result<bool, GatewayError>;

    async fn get(&self, id: &str) -> Result<Entity, GatewayError>;
}

// ---------------------------------------------------------------------------
// InMemoryGateway
// ---------------------------------------------------------------------------

/// Entity store kept in a map. Used by the worker binary and tests.
///
/// Thread-safe via interior `RwLock`; share it behind an `Arc` between the
/// engine and the handlers that mutate it.
#[derive(Default)]
pub struct InMemoryGateway {
    entities: RwLock<HashMap<TargetId, Entity>>,
}

impl InMemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a gateway pre-populated with `entities`.
    pub fn with_entities(entities: impl IntoIterator<Item = Entity>) -> Self {
        Self {
            entities: RwLock::new(entities.into_iter().map(|e| (e.id.clone(), e)).collect()),
        }
    }

    /// Insert or replace an entity.
    pub async fn insert(&self, entity: Entity) {
        self.entities.write().await.insert(entity.id.clone(), entity);
    }

    /// Set one attribute on an entity.
    pub async fn set_attribute(
        &self,
        id: &str,
        key: &str,
        value: serde_json::Value,
    ) -> Result<(), GatewayError> {
        let mut entities = self.entities.write().await;
        let entity = entities
            .get_mut(id)
            .ok_or_else(|| GatewayError::NotFound(id.to_string()))?;
        if !entity.attributes.is_object() {
            entity.attributes = serde_json::Value::Object(Default::default());
        }
        if let Some(map) = entity.attributes.as_object_mut() {
            map.insert(key.to_string(), value);
        }
        Ok(())
    }

    /// Remove an entity, returning it.
    pub async fn remove(&self, id: &str) -> Result<Entity, GatewayError> {
        self.entities
            .write()
            .await
            .remove(id)
            .ok_or_else(|| GatewayError::NotFound(id.to_string()))
    }

    pub async fn len(&self) -> usize {
        self.entities.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entities.read().await.is_empty()
    }
}

#[async_trait]
impl EntityGateway for InMemoryGateway {
    async fn exists(&self, id: &str) -> Result<bool, GatewayError> {
        Ok(self.entities.read().await.contains_key(id))
    }

    async fn get(&self, id: &str) -> Result<Entity, GatewayError> {
        self.entities
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| GatewayError::NotFound(id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn gateway() -> InMemoryGateway {
        InMemoryGateway::with_entities([Entity::new("u1", "Alice"), Entity::new("u2", "Bob")])
    }

    #[tokio::test]
    async fn exists_reflects_contents() {
        let gw = gateway();
        assert!(gw.exists("u1").await.unwrap());
        assert!(!gw.exists("u9").await.unwrap());
    }

    #[tokio::test]
    async fn get_missing_is_not_found() {
        let err = gateway().get("u9").await.unwrap_err();
        assert_eq!(err, GatewayError::NotFound("u9".into()));
    }

    #[tokio::test]
    async fn set_attribute_updates_entity() {
        let gw = gateway();
        gw.set_attribute("u1", "status", json!("archived")).await.unwrap();
        assert_eq!(gw.get("u1").await.unwrap().attributes["status"], "archived");
    }

    #[tokio::test]
    async fn remove_deletes_entity() {
        let gw = gateway();
        let removed = gw.remove("u2").await.unwrap();
        assert_eq!(removed.label, "Bob");
        assert_eq!(gw.len().await, 1);
        assert!(gw.remove("u2").await.is_err());
    }

    #[test]
    fn gateway_error_converts_to_core_error() {
        let err: CoreError = GatewayError::Unavailable("timeout".into()).into();
        assert!(matches!(err, CoreError::Internal(ref m) if m == "timeout"));
    }
}
