//! Templated action fan-out
//!
//! An action key ("opened", "closed", "reminder") names a template field on
//! every configuration entity. Each configuration entity with a non-empty
//! template produces one rendered alert, written to every alert target. This
//! lets several configuration entities (zones) phrase the same event their
//! own way.
//!
//! ```text
//! dispatch(GarageDoor1, Opened)
//!   ├─ GarageController A: OpenTTS = "{Door} is open"  ─┬─> AlertController 1
//!   │                                                  └─> AlertController 2
//!   └─ GarageController B: OpenTTS = ""                 (suppressed)
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::config::AlertChannels;
use crate::error::Result;
use crate::schema;
use crate::traits::{Entity, EntityQuery, EntityStore, WriteRequest};
use crate::value::{EntityId, EntityName, TypeMismatch, Value};

/// Placeholder replaced with the entity name when rendering
pub const ENTITY_NAME_TOKEN: &str = "{Door}";

/// Symbolic action names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKey {
    /// Entity entered the reminder condition
    Opened,
    /// Entity left the reminder condition
    Closed,
    /// Entity is still in the condition after the reminder interval
    Reminder,
}

impl ActionKey {
    /// Configuration field holding this action's template
    pub fn template_field(&self) -> &'static str {
        match self {
            ActionKey::Opened => schema::FIELD_OPEN_TTS,
            ActionKey::Closed => schema::FIELD_CLOSE_TTS,
            ActionKey::Reminder => schema::FIELD_OPEN_REMINDER_TTS,
        }
    }
}

impl fmt::Display for ActionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionKey::Opened => f.write_str("opened"),
            ActionKey::Closed => f.write_str("closed"),
            ActionKey::Reminder => f.write_str("reminder"),
        }
    }
}

/// A target write that failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetFailure {
    pub target: EntityId,
    pub error: String,
}

/// Outcome of one [`ActionDispatcher::dispatch`] call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    pub entity: EntityName,
    pub key: ActionKey,
    /// Rendered texts, one per configuration entity with a non-empty template
    pub rendered: Vec<String>,
    /// Targets successfully written
    pub writes: usize,
    /// Targets whose write failed
    pub failures: Vec<TargetFailure>,
    /// Alert target lookups that failed, one per rendered text affected
    pub lookup_errors: Vec<String>,
}

impl DispatchReport {
    fn new(entity: &EntityName, key: ActionKey) -> Self {
        Self {
            entity: entity.clone(),
            key,
            rendered: Vec::new(),
            writes: 0,
            failures: Vec::new(),
            lookup_errors: Vec::new(),
        }
    }

    /// Nothing was rendered: the first template was empty or missing
    pub fn is_suppressed(&self) -> bool {
        self.rendered.is_empty()
    }
}

/// Template text for `key` on a configuration entity
///
/// A missing field yields the empty string ("suppressed"). A field holding
/// something other than a string is a [`TypeMismatch`].
pub fn resolve(config_entity: &Entity, key: ActionKey) -> std::result::Result<String, TypeMismatch> {
    match config_entity.field(key.template_field()) {
        Some(value) => value.as_str().map(str::to_string),
        None => Ok(String::new()),
    }
}

/// Replace every entity-name placeholder with `entity_name`
///
/// Other `{...}` tokens are left untouched.
pub fn render(template: &str, entity_name: &EntityName) -> String {
    template.replace(ENTITY_NAME_TOKEN, entity_name.as_str())
}

/// Resolves, renders and fans out actions to alert targets
pub struct ActionDispatcher {
    store: Arc<dyn EntityStore>,
    application_name: String,
    alerts: AlertChannels,
}

impl ActionDispatcher {
    pub fn new(store: Arc<dyn EntityStore>, application_name: impl Into<String>, alerts: AlertChannels) -> Self {
        Self {
            store,
            application_name: application_name.into(),
            alerts,
        }
    }

    /// Dispatch `key` for `entity` to every alert target
    ///
    /// Configuration entities are visited in store order. The first empty
    /// (or non-string) template ends the dispatch without error; whatever was
    /// already written stays written. Each target write is independent: a
    /// failed target, or a failed target lookup, is logged and recorded in the
    /// report, and the dispatch carries on.
    ///
    /// # Returns
    ///
    /// - `Ok(DispatchReport)`: What was rendered and written
    /// - `Err(Error)`: Configuration entities could not be listed
    pub async fn dispatch(&self, entity: &EntityName, key: ActionKey) -> Result<DispatchReport> {
        let mut report = DispatchReport::new(entity, key);

        let config_entities = self
            .store
            .find(&EntityQuery::of_type(schema::GARAGE_CONTROLLER))
            .await?;

        for config_entity in &config_entities {
            let template = match resolve(config_entity, key) {
                Ok(template) => template,
                Err(e) => {
                    warn!(
                        "{} on {} is not a string ({}), treating as suppressed",
                        key.template_field(),
                        config_entity.name,
                        e
                    );
                    break;
                }
            };

            if template.is_empty() {
                debug!("No {} template on {}, suppressed", key, config_entity.name);
                break;
            }

            let text = render(&template, entity);
            if let Err(e) = self.write_to_targets(&text, &mut report).await {
                error!("Failed to look up alert targets for {}: {}", config_entity.name, e);
                report.lookup_errors.push(e.to_string());
            }
            report.rendered.push(text);
        }

        Ok(report)
    }

    async fn write_to_targets(&self, text: &str, report: &mut DispatchReport) -> Result<()> {
        let targets = self
            .store
            .find(&EntityQuery::of_type(schema::ALERT_CONTROLLER))
            .await?;

        for target in targets {
            let batch = self.alert_batch(&target.id, text);
            match self.store.write(batch).await {
                Ok(()) => {
                    debug!("Alert for {} written to {}", report.entity, target.name);
                    report.writes += 1;
                }
                Err(e) => {
                    error!("Failed to write alert to {}: {}", target.name, e);
                    report.failures.push(TargetFailure {
                        target: target.id.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        Ok(())
    }

    fn alert_batch(&self, target: &EntityId, text: &str) -> Vec<WriteRequest> {
        vec![
            WriteRequest::new(
                target.clone(),
                schema::FIELD_APPLICATION_NAME,
                self.application_name.as_str(),
            ),
            WriteRequest::new(target.clone(), schema::FIELD_DESCRIPTION, text),
            WriteRequest::new(target.clone(), schema::FIELD_TTS_ALERT, self.alerts.tts),
            WriteRequest::new(target.clone(), schema::FIELD_EMAIL_ALERT, self.alerts.email),
            WriteRequest::new(target.clone(), schema::FIELD_SEND_TRIGGER, Value::Int(0)),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::store::MemoryEntityStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn garage_controller(open: &str) -> Entity {
        Entity::new("gc-1", "Garage", schema::GARAGE_CONTROLLER)
            .with_field(schema::FIELD_OPEN_TTS, open)
            .with_field(schema::FIELD_CLOSE_TTS, "{Door} closed")
            .with_field(schema::FIELD_OPEN_REMINDER_TTS, "{Door} is still open")
            .with_field(schema::FIELD_OPEN_REMINDER_INTERVAL, 5i64)
    }

    fn alert_controller(id: &str) -> Entity {
        Entity::new(id, id, schema::ALERT_CONTROLLER)
    }

    fn door() -> EntityName {
        EntityName::new("GarageDoor1")
    }

    #[test]
    fn render_replaces_every_placeholder() {
        assert_eq!(
            render("{Door} open. Close {Door}!", &door()),
            "GarageDoor1 open. Close GarageDoor1!"
        );
        assert_eq!(render("{Zone}: {Door}", &door()), "{Zone}: GarageDoor1");
        assert_eq!(render("", &door()), "");
    }

    #[test]
    fn resolve_missing_field_is_empty() {
        let entity = Entity::new("gc-1", "Garage", schema::GARAGE_CONTROLLER);
        assert_eq!(resolve(&entity, ActionKey::Opened).unwrap(), "");
    }

    #[test]
    fn resolve_wrong_type_is_mismatch() {
        let entity = Entity::new("gc-1", "Garage", schema::GARAGE_CONTROLLER)
            .with_field(schema::FIELD_OPEN_TTS, 3i64);
        assert!(resolve(&entity, ActionKey::Opened).is_err());
    }

    #[tokio::test]
    async fn dispatch_writes_full_batch_to_each_target() {
        let store = Arc::new(MemoryEntityStore::new());
        store.insert(garage_controller("{Door} is open")).await;
        store.insert(alert_controller("alert-1")).await;
        store.insert(alert_controller("alert-2")).await;

        let alerts = AlertChannels { tts: true, email: false };
        let dispatcher = ActionDispatcher::new(store.clone(), "garage", alerts);
        let report = dispatcher.dispatch(&door(), ActionKey::Opened).await.unwrap();

        assert_eq!(report.rendered, vec!["GarageDoor1 is open".to_string()]);
        assert_eq!(report.writes, 2);
        assert!(report.failures.is_empty());

        let log = store.write_log();
        assert_eq!(log.len(), 2);
        let batch = &log[0];
        assert_eq!(batch.len(), 5);
        assert_eq!(batch[0].value, Value::from("garage"));
        assert_eq!(batch[1].value, Value::from("GarageDoor1 is open"));
        assert_eq!(batch[2].value, Value::Bool(true));
        assert_eq!(batch[3].value, Value::Bool(false));
        assert_eq!(batch[4].value, Value::Int(0));
    }

    #[tokio::test]
    async fn empty_template_performs_zero_writes() {
        let store = Arc::new(MemoryEntityStore::new());
        store.insert(garage_controller("")).await;
        store.insert(alert_controller("alert-1")).await;

        let dispatcher = ActionDispatcher::new(store.clone(), "garage", AlertChannels::default());
        let report = dispatcher.dispatch(&door(), ActionKey::Opened).await.unwrap();

        assert!(report.is_suppressed());
        assert_eq!(report.writes, 0);
        assert!(store.write_log().is_empty());
    }

    #[tokio::test]
    async fn failed_target_does_not_block_others() {
        let store = Arc::new(MemoryEntityStore::new());
        store.insert(garage_controller("{Door} is open")).await;
        store.insert(alert_controller("alert-1")).await;
        store.insert(alert_controller("alert-2")).await;
        store.insert(alert_controller("alert-3")).await;
        store.fail_writes_to(EntityId::new("alert-2"));

        let dispatcher = ActionDispatcher::new(store.clone(), "garage", AlertChannels::default());
        let report = dispatcher.dispatch(&door(), ActionKey::Opened).await.unwrap();

        assert_eq!(report.writes, 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].target, EntityId::new("alert-2"));
        let written: Vec<_> = store.write_log().iter().map(|b| b[0].id.clone()).collect();
        assert_eq!(written, vec![EntityId::new("alert-1"), EntityId::new("alert-3")]);
    }

    #[tokio::test]
    async fn each_configuration_entity_supplies_its_own_text() {
        let store = Arc::new(MemoryEntityStore::new());
        store.insert(garage_controller("{Door} is open")).await;
        store
            .insert(
                Entity::new("gc-2", "Shed", schema::GARAGE_CONTROLLER)
                    .with_field(schema::FIELD_OPEN_TTS, "Open: {Door}"),
            )
            .await;
        store
            .insert(
                Entity::new("gc-3", "Quiet", schema::GARAGE_CONTROLLER)
                    .with_field(schema::FIELD_OPEN_TTS, ""),
            )
            .await;
        store.insert(alert_controller("alert-1")).await;

        let dispatcher = ActionDispatcher::new(store.clone(), "garage", AlertChannels::default());
        let report = dispatcher.dispatch(&door(), ActionKey::Opened).await.unwrap();

        assert_eq!(
            report.rendered,
            vec!["GarageDoor1 is open".to_string(), "Open: GarageDoor1".to_string()]
        );
        assert_eq!(report.writes, 2);
    }

    #[tokio::test]
    async fn empty_template_stops_later_configuration_entities() {
        let store = Arc::new(MemoryEntityStore::new());
        store.insert(garage_controller("")).await;
        store
            .insert(
                Entity::new("gc-2", "Shed", schema::GARAGE_CONTROLLER)
                    .with_field(schema::FIELD_OPEN_TTS, "{Door} open"),
            )
            .await;
        store.insert(alert_controller("alert-1")).await;

        let dispatcher = ActionDispatcher::new(store.clone(), "garage", AlertChannels::default());
        let report = dispatcher.dispatch(&door(), ActionKey::Opened).await.unwrap();

        assert!(report.is_suppressed());
        assert_eq!(report.writes, 0);
        assert!(store.write_log().is_empty());
    }

    /// Lists alert targets once, then fails every later target lookup
    struct TargetsOnce {
        inner: MemoryEntityStore,
        target_lookups: AtomicUsize,
    }

    #[async_trait]
    impl EntityStore for TargetsOnce {
        async fn find(&self, query: &EntityQuery) -> Result<Vec<Entity>> {
            if query.entity_type == schema::ALERT_CONTROLLER
                && self.target_lookups.fetch_add(1, Ordering::SeqCst) > 0
            {
                return Err(Error::store("alert targets unavailable"));
            }
            self.inner.find(query).await
        }

        async fn entity(&self, id: &EntityId) -> Result<Option<Entity>> {
            self.inner.entity(id).await
        }

        async fn write(&self, requests: Vec<WriteRequest>) -> Result<()> {
            self.inner.write(requests).await
        }
    }

    #[tokio::test]
    async fn failed_target_lookup_keeps_earlier_writes() {
        let inner = MemoryEntityStore::new();
        inner.insert(garage_controller("{Door} is open")).await;
        inner
            .insert(
                Entity::new("gc-2", "Shed", schema::GARAGE_CONTROLLER)
                    .with_field(schema::FIELD_OPEN_TTS, "Open: {Door}"),
            )
            .await;
        inner
            .insert(
                Entity::new("gc-3", "Barn", schema::GARAGE_CONTROLLER)
                    .with_field(schema::FIELD_OPEN_TTS, "Barn: {Door}"),
            )
            .await;
        inner.insert(alert_controller("alert-1")).await;
        let store = Arc::new(TargetsOnce {
            inner: inner.clone(),
            target_lookups: AtomicUsize::new(0),
        });

        let dispatcher = ActionDispatcher::new(store, "garage", AlertChannels::default());
        let report = dispatcher.dispatch(&door(), ActionKey::Opened).await.unwrap();

        assert_eq!(report.writes, 1);
        assert_eq!(report.lookup_errors.len(), 2);
        assert_eq!(report.rendered.len(), 3);
        assert_eq!(inner.write_log().len(), 1);
    }

    #[tokio::test]
    async fn unreachable_store_is_an_error() {
        let store = Arc::new(MemoryEntityStore::new());
        store.set_available(false);

        let dispatcher = ActionDispatcher::new(store.clone(), "garage", AlertChannels::default());
        let err = dispatcher.dispatch(&door(), ActionKey::Closed).await.unwrap_err();
        assert!(err.is_transient());
    }
}
