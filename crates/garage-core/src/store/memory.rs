// # Memory Entity Store
//
// In-memory implementation of EntityStore and NotificationSource.
//
// ## Purpose
//
// Stands in for the shared, replicated entity store when the controller runs
// as a single standalone replica, and gives tests a store whose behavior they
// control (outages, per-target write failures, write history).
//
// ## Notification Delivery
//
// Writes are applied under the entity lock; matching subscriber callbacks are
// invoked after the lock is released, in write order. Subscriptions created
// with `notify_on_change` only fire when the value actually changed.
//
// ## Crash Behavior
//
// - All state is lost on restart
// - A seed file can repopulate the initial entities

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::RwLock;
use tracing::debug;

use crate::Error;
use crate::traits::{
    Entity, EntityQuery, EntityStore, Notification, NotificationCallback, NotificationConfig,
    NotificationSource, NotificationToken, WriteRequest,
};
use crate::value::EntityId;

/// Initial store contents, loaded from JSON
///
/// ```json
/// {
///   "entities": [
///     {
///       "id": "door-1",
///       "name": "GarageDoor1",
///       "entity_type": "GarageDoor",
///       "fields": { "IsClosed": { "type": "bool", "value": true } }
///     }
///   ]
/// }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreSeed {
    #[serde(default)]
    pub entities: Vec<Entity>,
}

type Subscribers = Mutex<HashMap<u64, (NotificationConfig, NotificationCallback)>>;

/// In-memory entity store with change notifications
///
/// # Example
///
/// ```rust,no_run
/// use garage_core::store::MemoryEntityStore;
/// use garage_core::traits::{Entity, EntityQuery, EntityStore};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = MemoryEntityStore::new();
///     store.insert(Entity::new("door-1", "GarageDoor1", "GarageDoor").with_field("IsClosed", true)).await;
///
///     let doors = store.find(&EntityQuery::of_type("GarageDoor")).await?;
///     assert_eq!(doors.len(), 1);
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct MemoryEntityStore {
    entities: Arc<RwLock<HashMap<EntityId, Entity>>>,
    subscribers: Arc<Subscribers>,
    next_token: Arc<AtomicU64>,
    available: Arc<AtomicBool>,
    failing_targets: Arc<Mutex<HashSet<EntityId>>>,
    write_log: Arc<Mutex<Vec<Vec<WriteRequest>>>>,
}

impl MemoryEntityStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            entities: Arc::new(RwLock::new(HashMap::new())),
            subscribers: Arc::new(Mutex::new(HashMap::new())),
            next_token: Arc::new(AtomicU64::new(1)),
            available: Arc::new(AtomicBool::new(true)),
            failing_targets: Arc::new(Mutex::new(HashSet::new())),
            write_log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Create a store populated from a seed
    pub async fn from_seed(seed: StoreSeed) -> Self {
        let store = Self::new();
        for entity in seed.entities {
            store.insert(entity).await;
        }
        store
    }

    /// Load a seed from a JSON file
    pub async fn from_seed_file(path: impl AsRef<Path>) -> Result<Self, Error> {
        let content = tokio::fs::read_to_string(path.as_ref()).await?;
        let seed: StoreSeed = serde_json::from_str(&content)?;
        debug!(
            "Loaded {} seed entities from {}",
            seed.entities.len(),
            path.as_ref().display()
        );
        Ok(Self::from_seed(seed).await)
    }

    /// Insert or replace an entity without notifying subscribers
    pub async fn insert(&self, entity: Entity) {
        self.entities.write().await.insert(entity.id.clone(), entity);
    }

    /// Snapshot of every entity, sorted by id
    pub async fn snapshot(&self) -> Vec<Entity> {
        let mut all: Vec<Entity> = self.entities.read().await.values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    /// Simulate the store becoming reachable or unreachable
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    /// Make every write batch addressed to `id` fail
    pub fn fail_writes_to(&self, id: EntityId) {
        lock(&self.failing_targets).insert(id);
    }

    /// Every batch successfully applied by [`EntityStore::write`], in order
    pub fn write_log(&self) -> Vec<Vec<WriteRequest>> {
        lock(&self.write_log).clone()
    }

    /// Forget the recorded write history
    pub fn clear_write_log(&self) {
        lock(&self.write_log).clear();
    }

    /// Number of active subscriptions
    pub fn subscriber_count(&self) -> usize {
        lock(&self.subscribers).len()
    }

    fn ensure_available(&self) -> Result<(), Error> {
        if self.is_available() {
            Ok(())
        } else {
            Err(Error::store("entity store unreachable"))
        }
    }

    fn matching_callbacks(&self, notification: &Notification, entity_type: &str, changed: bool) -> Vec<NotificationCallback> {
        lock(&self.subscribers)
            .values()
            .filter(|(config, _)| {
                config.entity_type == entity_type
                    && config.field == notification.field
                    && (changed || !config.notify_on_change)
            })
            .map(|(_, callback)| Arc::clone(callback))
            .collect()
    }
}

impl Default for MemoryEntityStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EntityStore for MemoryEntityStore {
    async fn find(&self, query: &EntityQuery) -> Result<Vec<Entity>, Error> {
        self.ensure_available()?;
        let guard = self.entities.read().await;
        let mut found: Vec<Entity> = guard.values().filter(|e| query.matches(e)).cloned().collect();
        found.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(found)
    }

    async fn entity(&self, id: &EntityId) -> Result<Option<Entity>, Error> {
        self.ensure_available()?;
        Ok(self.entities.read().await.get(id).cloned())
    }

    async fn write(&self, requests: Vec<WriteRequest>) -> Result<(), Error> {
        self.ensure_available()?;

        {
            let failing = lock(&self.failing_targets);
            if let Some(request) = requests.iter().find(|r| failing.contains(&r.id)) {
                return Err(Error::store(format!("write to {} rejected", request.id)));
            }
        }

        let mut pending = Vec::new();
        {
            let mut guard = self.entities.write().await;
            if let Some(missing) = requests.iter().find(|r| !guard.contains_key(&r.id)) {
                return Err(Error::not_found(missing.id.to_string()));
            }

            for request in &requests {
                let Some(entity) = guard.get_mut(&request.id) else {
                    continue;
                };
                let previous = entity.fields.insert(request.field.clone(), request.value.clone());
                let changed = previous.as_ref() != Some(&request.value);
                let notification = Notification {
                    entity_id: request.id.clone(),
                    field: request.field.clone(),
                    current: request.value.clone(),
                    previous,
                };
                pending.push((notification, entity.entity_type.clone(), changed));
            }
        }

        lock(&self.write_log).push(requests);

        for (notification, entity_type, changed) in pending {
            for callback in self.matching_callbacks(&notification, &entity_type, changed) {
                callback(notification.clone());
            }
        }

        Ok(())
    }
}

#[async_trait]
impl NotificationSource for MemoryEntityStore {
    async fn notify(
        &self,
        config: NotificationConfig,
        callback: NotificationCallback,
    ) -> Result<Box<dyn NotificationToken>, Error> {
        if !self.is_available() {
            return Err(Error::notification("notification layer unreachable"));
        }

        let id = self.next_token.fetch_add(1, Ordering::SeqCst);
        lock(&self.subscribers).insert(id, (config, callback));
        Ok(Box::new(MemoryToken {
            id,
            subscribers: Arc::downgrade(&self.subscribers),
        }))
    }
}

/// Token for a [`MemoryEntityStore`] subscription
struct MemoryToken {
    id: u64,
    subscribers: Weak<Subscribers>,
}

impl NotificationToken for MemoryToken {
    fn unbind(&self) {
        if let Some(subscribers) = self.subscribers.upgrade() {
            lock(&subscribers).remove(&self.id);
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
