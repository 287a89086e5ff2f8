//! Per-entity reminder scheduling
//!
//! Tracks when each monitored entity entered the "needs reminding" condition
//! (e.g. a door left open) and decides when a repeat action is due.
//!
//! Computing what is due ([`ReminderScheduler::due_entities`]) is separate
//! from re-arming after a firing ([`ReminderScheduler::on_fire`]), so a slow
//! dispatch never observes half-updated state.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;

use crate::value::EntityName;

/// Default reminder interval in minutes
pub const DEFAULT_REMINDER_INTERVAL_MINUTES: i64 = 5;

/// Process-wide reminder interval, in whole minutes, never below one
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ReminderInterval(i64);

impl ReminderInterval {
    /// Interval from a raw minute count, clamped to a minimum of 1
    pub fn clamped(minutes: i64) -> Self {
        Self(minutes.max(1))
    }

    /// Minutes in this interval
    pub fn minutes(&self) -> i64 {
        self.0
    }

    /// Interval as a chrono duration
    pub fn as_duration(&self) -> Duration {
        Duration::minutes(self.0)
    }
}

impl Default for ReminderInterval {
    fn default() -> Self {
        Self(DEFAULT_REMINDER_INTERVAL_MINUTES)
    }
}

/// Reminder state: entity → time the condition began or last fired
///
/// A key exists if and only if the entity is currently in the condition.
#[derive(Debug, Clone, Default)]
pub struct ReminderScheduler {
    last_triggered: HashMap<EntityName, DateTime<Utc>>,
}

impl ReminderScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `entity` entered the condition at `now`
    ///
    /// Calling this again while the entity is still tracked keeps the
    /// original timestamp. Returns `true` if the entity was newly tracked.
    pub fn mark_entered(&mut self, entity: EntityName, now: DateTime<Utc>) -> bool {
        match self.last_triggered.entry(entity) {
            std::collections::hash_map::Entry::Occupied(_) => false,
            std::collections::hash_map::Entry::Vacant(slot) => {
                slot.insert(now);
                true
            }
        }
    }

    /// Forget `entity`. No-op if absent.
    pub fn mark_left(&mut self, entity: &EntityName) -> bool {
        self.last_triggered.remove(entity).is_some()
    }

    /// Entities whose elapsed time strictly exceeds `interval`
    ///
    /// Sorted by name so callers dispatch in a stable order.
    pub fn due_entities(&self, now: DateTime<Utc>, interval: ReminderInterval) -> Vec<EntityName> {
        let interval = interval.as_duration();
        let mut due: Vec<EntityName> = self
            .last_triggered
            .iter()
            .filter(|(_, last)| now.signed_duration_since(**last) > interval)
            .map(|(name, _)| name.clone())
            .collect();
        due.sort();
        due
    }

    /// Re-arm the interval for `entity` after a firing
    ///
    /// Only refreshes entities that are still tracked; an entity that left the
    /// condition while its reminder was being dispatched stays removed.
    pub fn on_fire(&mut self, entity: &EntityName, now: DateTime<Utc>) -> bool {
        match self.last_triggered.get_mut(entity) {
            Some(last) => {
                *last = now;
                true
            }
            None => false,
        }
    }

    /// Timestamp recorded for `entity`
    pub fn last_triggered(&self, entity: &EntityName) -> Option<DateTime<Utc>> {
        self.last_triggered.get(entity).copied()
    }

    /// Every tracked entity, sorted by name
    pub fn tracked(&self) -> Vec<EntityName> {
        let mut names: Vec<EntityName> = self.last_triggered.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn contains(&self, entity: &EntityName) -> bool {
        self.last_triggered.contains_key(entity)
    }

    pub fn len(&self) -> usize {
        self.last_triggered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_triggered.is_empty()
    }
}
