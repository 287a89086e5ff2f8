//! Test doubles and common utilities for controller contract tests
//!
//! This module provides a controllable leadership source and a seeded
//! in-memory store so tests can drive the controller deterministically.

#![allow(dead_code)]

use garage_core::controller::{Controller, ControllerEvent};
use garage_core::schema;
use garage_core::store::MemoryEntityStore;
use garage_core::traits::{Entity, EntityStore, LeadershipEvent, LeadershipSource, WriteRequest};
use garage_core::{AlertChannels, ControllerConfig, EntityId, Value};
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::mpsc;
use tokio_stream::Stream;

pub const DOOR_ID: &str = "door-1";
pub const DOOR_NAME: &str = "GarageDoor1";

/// A LeadershipSource the test drives by sending events
pub struct ControlledLeadership {
    engine_rx: std::sync::Mutex<Option<mpsc::UnboundedReceiver<LeadershipEvent>>>,
    watch_call_count: Arc<AtomicUsize>,
}

impl ControlledLeadership {
    pub fn new() -> (Self, mpsc::UnboundedSender<LeadershipEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let source = Self {
            engine_rx: std::sync::Mutex::new(Some(rx)),
            watch_call_count: Arc::new(AtomicUsize::new(0)),
        };
        (source, tx)
    }

    pub fn watch_call_count(&self) -> usize {
        self.watch_call_count.load(Ordering::SeqCst)
    }
}

impl LeadershipSource for ControlledLeadership {
    fn watch(&self) -> Pin<Box<dyn Stream<Item = LeadershipEvent> + Send + 'static>> {
        self.watch_call_count.fetch_add(1, Ordering::SeqCst);

        let rx = self
            .engine_rx
            .lock()
            .unwrap()
            .take()
            .expect("watch() can only be called once");

        Box::pin(tokio_stream::wrappers::UnboundedReceiverStream::new(rx))
    }
}

/// Store with one closed door, one configuration entity and two alert targets
pub async fn garage_store() -> Arc<MemoryEntityStore> {
    let store = Arc::new(MemoryEntityStore::new());
    store
        .insert(Entity::new(DOOR_ID, DOOR_NAME, schema::GARAGE_DOOR).with_field(schema::FIELD_IS_CLOSED, true))
        .await;
    store
        .insert(
            Entity::new("gc-1", "Garage", schema::GARAGE_CONTROLLER)
                .with_field(schema::FIELD_OPEN_REMINDER_INTERVAL, 5i64)
                .with_field(schema::FIELD_OPEN_TTS, "{Door} is open")
                .with_field(schema::FIELD_CLOSE_TTS, "{Door} is closed")
                .with_field(schema::FIELD_OPEN_REMINDER_TTS, "{Door} is still open"),
        )
        .await;
    store.insert(Entity::new("alert-1", "Kitchen", schema::ALERT_CONTROLLER)).await;
    store.insert(Entity::new("alert-2", "Office", schema::ALERT_CONTROLLER)).await;
    store
}

/// Controller configuration with both alert channels enabled
pub fn minimal_config() -> ControllerConfig {
    ControllerConfig::new("garage-test")
        .with_alerts(AlertChannels { tts: true, email: true })
        .with_tick_rate_ms(20)
}

/// Build a controller over `store` with a test-driven leadership source
pub fn controller_over(
    store: &Arc<MemoryEntityStore>,
) -> (Controller, mpsc::Receiver<ControllerEvent>, mpsc::UnboundedSender<LeadershipEvent>) {
    let (leadership, leadership_tx) = ControlledLeadership::new();
    let (controller, events) = Controller::new(
        store.clone(),
        store.clone(),
        Box::new(leadership),
        minimal_config(),
    )
    .expect("controller construction succeeds");
    (controller, events, leadership_tx)
}

/// Set the door's `IsClosed` field through the store's write path
pub async fn set_door_closed(store: &MemoryEntityStore, closed: bool) {
    store
        .write(vec![WriteRequest::new(EntityId::new(DOOR_ID), schema::FIELD_IS_CLOSED, closed)])
        .await
        .expect("door write succeeds");
}

/// Descriptions written to alert targets, in order
pub fn descriptions(store: &MemoryEntityStore) -> Vec<String> {
    store
        .write_log()
        .iter()
        .flatten()
        .filter(|request| request.field == schema::FIELD_DESCRIPTION)
        .filter_map(|request| match &request.value {
            Value::String(text) => Some(text.clone()),
            _ => None,
        })
        .collect()
}

/// Alert batches only (door writes made by the test are excluded)
pub fn alert_batches(store: &MemoryEntityStore) -> Vec<Vec<WriteRequest>> {
    store
        .write_log()
        .into_iter()
        .filter(|batch| batch.iter().any(|r| r.field == schema::FIELD_DESCRIPTION))
        .collect()
}

/// Drain every event currently queued
pub fn drain(events: &mut mpsc::Receiver<ControllerEvent>) -> Vec<ControllerEvent> {
    let mut drained = Vec::new();
    while let Ok(event) = events.try_recv() {
        drained.push(event);
    }
    drained
}

/// Wait until `predicate` holds or the timeout elapses
pub async fn eventually<F, Fut>(mut predicate: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..50 {
        if predicate().await {
            return true;
        }
        tokio::time::sleep(tokio::time::Duration::from_millis(20)).await;
    }
    false
}
