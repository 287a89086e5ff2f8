//! Architectural Contract Test: Leadership Lifecycle
//!
//! This test verifies the controller's leader-gated lifecycle.
//!
//! Constraints verified:
//! - Subscriptions exist only while leader, and never accumulate across rebinds
//! - Door notifications drive exactly one dispatch each
//! - Reminders fire after the interval, re-arm, and stop once the door closes
//! - Reminder state survives loss of leadership
//!
//! If this test fails, someone has:
//! - Let a follower act on notifications or ticks
//! - Cleared reminder state on leadership loss
//! - Re-announced an open door after regaining leadership

mod common;

use chrono::{Duration, Utc};
use common::*;
use garage_core::controller::{ControllerEvent, LifecycleState, SubscriptionKind};
use garage_core::traits::Notification;
use garage_core::{ActionKey, EntityId, EntityName, Value};

fn door_notification(closed: bool) -> Notification {
    Notification {
        entity_id: EntityId::new(DOOR_ID),
        field: "IsClosed".to_string(),
        current: Value::Bool(closed),
        previous: Some(Value::Bool(!closed)),
    }
}

fn interval_notification(value: Value) -> Notification {
    Notification {
        entity_id: EntityId::new("gc-1"),
        field: "OpenReminderInterval".to_string(),
        current: value,
        previous: None,
    }
}

fn dispatched(events: &[ControllerEvent], key: ActionKey) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, ControllerEvent::Dispatched { key: k, .. } if *k == key))
        .count()
}

#[tokio::test]
async fn door_open_remind_close_scenario() {
    let store = garage_store().await;
    let (controller, mut events, _leadership) = controller_over(&store);

    controller.on_became_leader().await.expect("rebind succeeds");
    assert_eq!(controller.lifecycle().await, LifecycleState::LeaderActive);
    assert_eq!(controller.active_subscriptions().await.len(), 2);
    assert_eq!(controller.reminder_interval().await.minutes(), 5);

    // Door opens: one "opened" dispatch, door tracked
    controller
        .on_notification(SubscriptionKind::DoorStatus, door_notification(false))
        .await
        .unwrap();
    assert_eq!(descriptions(&store), vec!["GarageDoor1 is open"; 2]);
    assert_eq!(controller.open_doors().await, vec![EntityName::new(DOOR_NAME)]);
    assert_eq!(dispatched(&drain(&mut events), ActionKey::Opened), 1);

    // Six minutes later: one reminder, re-armed
    store.clear_write_log();
    let six_minutes_later = Utc::now() + Duration::minutes(6);
    assert_eq!(controller.do_work(six_minutes_later).await, 1);
    assert_eq!(descriptions(&store), vec!["GarageDoor1 is still open"; 2]);
    assert_eq!(
        controller.reminder_armed_at(&EntityName::new(DOOR_NAME)).await,
        Some(six_minutes_later)
    );

    // Re-armed: the next tick does not fire again
    store.clear_write_log();
    assert_eq!(controller.do_work(six_minutes_later + Duration::minutes(1)).await, 0);
    assert!(store.write_log().is_empty());

    // Door closes: one "closed" dispatch, door forgotten
    controller
        .on_notification(SubscriptionKind::DoorStatus, door_notification(true))
        .await
        .unwrap();
    assert_eq!(descriptions(&store), vec!["GarageDoor1 is closed"; 2]);
    assert!(controller.open_doors().await.is_empty());

    store.clear_write_log();
    assert_eq!(controller.do_work(Utc::now() + Duration::hours(3)).await, 0);
    assert!(store.write_log().is_empty());

    let remaining = drain(&mut events);
    assert_eq!(dispatched(&remaining, ActionKey::Reminder), 1);
    assert_eq!(dispatched(&remaining, ActionKey::Closed), 1);
}

#[tokio::test]
async fn alert_batch_carries_identity_and_channels() {
    let store = garage_store().await;
    let (controller, _events, _leadership) = controller_over(&store);

    controller.on_became_leader().await.unwrap();
    controller
        .on_notification(SubscriptionKind::DoorStatus, door_notification(false))
        .await
        .unwrap();

    let batches = alert_batches(&store);
    assert_eq!(batches.len(), 2);
    for batch in &batches {
        let fields: Vec<(&str, &Value)> = batch.iter().map(|r| (r.field.as_str(), &r.value)).collect();
        assert_eq!(
            fields,
            vec![
                ("ApplicationName", &Value::from("garage-test")),
                ("Description", &Value::from("GarageDoor1 is open")),
                ("TTSAlert", &Value::Bool(true)),
                ("EmailAlert", &Value::Bool(true)),
                ("SendTrigger", &Value::Int(0)),
            ]
        );
    }
}

#[tokio::test]
async fn lost_leadership_retains_open_door() {
    let store = garage_store().await;
    let (controller, _events, _leadership) = controller_over(&store);

    controller.on_became_leader().await.unwrap();
    controller
        .on_notification(SubscriptionKind::DoorStatus, door_notification(false))
        .await
        .unwrap();

    controller.on_lost_leadership().await;
    assert_eq!(controller.lifecycle().await, LifecycleState::Follower);
    assert!(controller.active_subscriptions().await.is_empty());
    assert_eq!(store.subscriber_count(), 0);
    assert_eq!(controller.open_doors().await, vec![EntityName::new(DOOR_NAME)]);

    // Followers neither tick nor handle late notifications
    store.clear_write_log();
    assert_eq!(controller.do_work(Utc::now() + Duration::minutes(30)).await, 0);
    controller
        .on_notification(SubscriptionKind::DoorStatus, door_notification(true))
        .await
        .unwrap();
    assert!(store.write_log().is_empty());
    assert_eq!(controller.open_doors().await, vec![EntityName::new(DOOR_NAME)]);

    // Regaining leadership resumes without re-announcing the open door
    controller.on_became_leader().await.unwrap();
    assert_eq!(controller.lifecycle().await, LifecycleState::LeaderActive);
    assert!(store.write_log().is_empty());
    assert_eq!(controller.open_doors().await, vec![EntityName::new(DOOR_NAME)]);

    assert_eq!(controller.do_work(Utc::now() + Duration::minutes(6)).await, 1);
    assert_eq!(descriptions(&store), vec!["GarageDoor1 is still open"; 2]);
}

#[tokio::test]
async fn repeated_rebinds_do_not_accumulate_subscriptions() {
    let store = garage_store().await;
    let (controller, _events, _leadership) = controller_over(&store);

    // Followers ignore schema updates
    controller.on_schema_updated().await.unwrap();
    assert_eq!(store.subscriber_count(), 0);

    controller.on_became_leader().await.unwrap();
    for _ in 0..4 {
        controller.on_schema_updated().await.unwrap();
    }
    controller.on_became_leader().await.unwrap();

    assert_eq!(store.subscriber_count(), 2);
    let active = controller.active_subscriptions().await;
    assert_eq!(
        active,
        vec![
            SubscriptionKind::DoorStatus.config(),
            SubscriptionKind::ReminderInterval.config()
        ]
    );
}

#[tokio::test]
async fn reminder_interval_updates_are_clamped() {
    let store = garage_store().await;
    let (controller, _events, _leadership) = controller_over(&store);
    controller.on_became_leader().await.unwrap();

    controller
        .on_notification(SubscriptionKind::ReminderInterval, interval_notification(Value::Int(0)))
        .await
        .unwrap();
    assert_eq!(controller.reminder_interval().await.minutes(), 1);

    controller
        .on_notification(SubscriptionKind::ReminderInterval, interval_notification(Value::Int(5)))
        .await
        .unwrap();
    assert_eq!(controller.reminder_interval().await.minutes(), 5);

    controller
        .on_notification(SubscriptionKind::ReminderInterval, interval_notification(Value::Int(-12)))
        .await
        .unwrap();
    assert_eq!(controller.reminder_interval().await.minutes(), 1);

    controller
        .on_notification(
            SubscriptionKind::ReminderInterval,
            interval_notification(Value::from("ten")),
        )
        .await
        .unwrap();
    assert_eq!(controller.reminder_interval().await.minutes(), 1);
}

#[tokio::test]
async fn rebind_loads_interval_from_configuration() {
    let store = garage_store().await;
    store
        .insert(
            garage_core::traits::Entity::new("gc-1", "Garage", "GarageController")
                .with_field("OpenReminderInterval", 9i64)
                .with_field("OpenReminderTTS", "{Door} reminder"),
        )
        .await;
    let (controller, _events, _leadership) = controller_over(&store);

    controller.on_became_leader().await.unwrap();
    assert_eq!(controller.reminder_interval().await.minutes(), 9);
}

#[tokio::test]
async fn wrong_door_value_type_is_recoverable() {
    let store = garage_store().await;
    let (controller, _events, _leadership) = controller_over(&store);
    controller.on_became_leader().await.unwrap();

    let mut notification = door_notification(false);
    notification.current = Value::Int(1);
    let err = controller
        .on_notification(SubscriptionKind::DoorStatus, notification)
        .await
        .unwrap_err();
    assert!(matches!(err, garage_core::Error::TypeMismatch(_)));
    assert!(controller.open_doors().await.is_empty());
    assert_eq!(controller.lifecycle().await, LifecycleState::LeaderActive);
}
