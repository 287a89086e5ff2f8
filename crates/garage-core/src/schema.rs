//! Entity types and fields the controller depends on
//!
//! The store's schema is defined and validated externally. This module names
//! the parts of it the controller touches and can check that a set of entity
//! snapshots carries them, which the daemon uses as an availability criterion.

use std::collections::HashMap;

use crate::traits::Entity;

/// Monitored door entities
pub const GARAGE_DOOR: &str = "GarageDoor";
/// Configuration entities (templates, reminder interval)
pub const GARAGE_CONTROLLER: &str = "GarageController";
/// Alert target entities
pub const ALERT_CONTROLLER: &str = "AlertController";

pub const FIELD_IS_CLOSED: &str = "IsClosed";
pub const FIELD_OPEN_REMINDER_INTERVAL: &str = "OpenReminderInterval";
pub const FIELD_OPEN_TTS: &str = "OpenTTS";
pub const FIELD_CLOSE_TTS: &str = "CloseTTS";
pub const FIELD_OPEN_REMINDER_TTS: &str = "OpenReminderTTS";

pub const FIELD_APPLICATION_NAME: &str = "ApplicationName";
pub const FIELD_DESCRIPTION: &str = "Description";
pub const FIELD_TTS_ALERT: &str = "TTSAlert";
pub const FIELD_EMAIL_ALERT: &str = "EmailAlert";
pub const FIELD_SEND_TRIGGER: &str = "SendTrigger";

/// Required entity types and their fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    types: HashMap<String, Vec<String>>,
}

impl Schema {
    /// Empty schema
    pub fn new() -> Self {
        Self {
            types: HashMap::new(),
        }
    }

    /// Declare a required entity type with its fields
    pub fn with_type(mut self, entity_type: &str, fields: &[&str]) -> Self {
        self.types.insert(
            entity_type.to_string(),
            fields.iter().map(|f| f.to_string()).collect(),
        );
        self
    }

    /// Schema the garage controller needs
    pub fn garage() -> Self {
        Self::new()
            .with_type(GARAGE_DOOR, &[FIELD_IS_CLOSED])
            .with_type(
                GARAGE_CONTROLLER,
                &[
                    FIELD_OPEN_REMINDER_INTERVAL,
                    FIELD_OPEN_TTS,
                    FIELD_CLOSE_TTS,
                    FIELD_OPEN_REMINDER_TTS,
                ],
            )
            .with_type(
                ALERT_CONTROLLER,
                &[
                    FIELD_APPLICATION_NAME,
                    FIELD_DESCRIPTION,
                    FIELD_TTS_ALERT,
                    FIELD_EMAIL_ALERT,
                    FIELD_SEND_TRIGGER,
                ],
            )
    }

    /// Entity types this schema requires
    pub fn entity_types(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(String::as_str)
    }

    /// Fields required for an entity type
    pub fn fields(&self, entity_type: &str) -> Option<&[String]> {
        self.types.get(entity_type).map(Vec::as_slice)
    }

    /// Check that every entity of a declared type carries all declared fields
    ///
    /// Entities of undeclared types are ignored. Returns the list of
    /// `(entity name, missing field)` pairs; empty means valid.
    pub fn missing_fields(&self, entities: &[Entity]) -> Vec<(String, String)> {
        let mut missing = Vec::new();
        for entity in entities {
            let Some(fields) = self.types.get(&entity.entity_type) else {
                continue;
            };
            for field in fields {
                if entity.field(field).is_none() {
                    missing.push((entity.name.to_string(), field.clone()));
                }
            }
        }
        missing
    }

    /// Whether `entities` satisfy this schema
    pub fn validate(&self, entities: &[Entity]) -> bool {
        self.missing_fields(entities).is_empty()
    }
}

impl Default for Schema {
    fn default() -> Self {
        Self::new()
    }
}
