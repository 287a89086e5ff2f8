// # Entity Store Trait
//
// Defines the query/write contract of the shared entity store.
//
// ## Purpose
//
// The controller never owns entity data. It reads configuration entities
// (templates, reminder interval), resolves entity names from notification
// payloads, and writes alert requests to target entities.
//
// ## Usage
//
// ```rust,ignore
// use garage_core::traits::{EntityQuery, EntityStore, WriteRequest};
//
// let controllers = store.find(&EntityQuery::of_type("GarageController")).await?;
// for controller in controllers {
//     let interval = controller.field("OpenReminderInterval");
// }
//
// store.write(vec![WriteRequest::new(id, "Description", "Door open")]).await?;
// ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::value::{EntityId, EntityName, Value};

/// Snapshot of an entity returned by a store query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Store identifier
    pub id: EntityId,
    /// Stable name
    pub name: EntityName,
    /// Entity type (e.g. "GarageDoor")
    pub entity_type: String,
    /// Field values at query time
    #[serde(default)]
    pub fields: HashMap<String, Value>,
}

impl Entity {
    /// Create an entity with no fields
    pub fn new(id: impl Into<String>, name: impl Into<String>, entity_type: impl Into<String>) -> Self {
        Self {
            id: EntityId::new(id),
            name: EntityName::new(name),
            entity_type: entity_type.into(),
            fields: HashMap::new(),
        }
    }

    /// Builder-style field assignment
    pub fn with_field(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(field.into(), value.into());
        self
    }

    /// Get a field value, if set
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }
}

/// A condition a queried entity must satisfy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum FieldCondition {
    /// Field is present and equal to `value`
    Equals { field: String, value: Value },
}

impl FieldCondition {
    /// Check the condition against an entity snapshot
    pub fn matches(&self, entity: &Entity) -> bool {
        match self {
            FieldCondition::Equals { field, value } => entity.field(field) == Some(value),
        }
    }
}

/// Search criteria for [`EntityStore::find`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityQuery {
    pub entity_type: String,
    #[serde(default)]
    pub conditions: Vec<FieldCondition>,
}

impl EntityQuery {
    /// Match every entity of a type
    pub fn of_type(entity_type: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            conditions: Vec::new(),
        }
    }

    /// Add an equality condition
    pub fn with_condition(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions.push(FieldCondition::Equals {
            field: field.into(),
            value: value.into(),
        });
        self
    }

    /// Check whether an entity satisfies this query
    pub fn matches(&self, entity: &Entity) -> bool {
        entity.entity_type == self.entity_type && self.conditions.iter().all(|c| c.matches(entity))
    }
}

/// A single field write, batched by [`EntityStore::write`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteRequest {
    pub id: EntityId,
    pub field: String,
    pub value: Value,
}

impl WriteRequest {
    pub fn new(id: EntityId, field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            id,
            field: field.into(),
            value: value.into(),
        }
    }
}

/// Trait for entity store implementations
///
/// Implementations must be thread-safe and usable across async tasks.
///
/// # Blocking
///
/// Every method may wait on the external store. The controller never calls
/// them while holding its own state lock.
///
/// # Errors
///
/// Failures are reported as [`crate::Error::Store`]. They are treated as
/// transient: the caller logs them and abandons the operation for the
/// current cycle. Implementations must not retry internally.
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Find entities of a type matching all conditions
    ///
    /// # Returns
    ///
    /// - `Ok(Vec<Entity>)`: Matching snapshots (possibly empty)
    /// - `Err(Error)`: Store unreachable
    async fn find(&self, query: &EntityQuery) -> Result<Vec<Entity>, crate::Error>;

    /// Look up one entity by id
    ///
    /// # Returns
    ///
    /// - `Ok(Some(Entity))`: The entity snapshot
    /// - `Ok(None)`: No such entity
    /// - `Err(Error)`: Store unreachable
    async fn entity(&self, id: &EntityId) -> Result<Option<Entity>, crate::Error>;

    /// Write a batch of field values
    ///
    /// A batch is applied as a unit; one batch is issued per target per dispatch.
    async fn write(&self, requests: Vec<WriteRequest>) -> Result<(), crate::Error>;
}
