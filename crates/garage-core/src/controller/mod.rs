//! Leader-gated garage controller
//!
//! The Controller is responsible for:
//! - Binding change subscriptions while this replica is leader
//! - Tracking open doors in the reminder scheduler
//! - Dispatching opened/closed alerts immediately and reminders on the tick
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────┐                      ┌────────────────────┐
//! │ LeadershipSource │── LeadershipEvent ──┐│ NotificationSource │
//! └──────────────────┘                     ││  (via callbacks)   │
//!                                          ▼└────────────────────┘
//!                                  ┌──────────────┐      │
//!                     tick ──────► │  Controller  │◄─────┘
//!                                  └──────────────┘
//!                                          │
//!         ┌────────────────────────────────┼────────────────────────┐
//!         ▼                                ▼                        ▼
//! ┌──────────────────┐           ┌──────────────────┐       ┌─────────────┐
//! │ ReminderScheduler│           │ ActionDispatcher │       │   Events    │
//! │ (open doors)     │           │ (alert targets)  │       │  (monitor)  │
//! └──────────────────┘           └──────────────────┘       └─────────────┘
//! ```
//!
//! ## Lifecycle
//!
//! ```text
//! Follower ──BecameLeader──► LeaderUnvalidated ──rebind ok──► LeaderActive
//!    ▲                              │  ▲                          │
//!    │                              │  └── rebind failed,         │
//!    │                              │      retried on tick        │
//!    └────────── LostLeadership ────┴─────────────────────────────┘
//! ```
//!
//! Reminder state survives leadership loss, so a door that is still open when
//! leadership returns keeps its reminder schedule without being re-announced.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio_stream::StreamExt;
use tracing::{debug, error, info, warn};

use crate::config::ControllerConfig;
use crate::dispatch::{ActionDispatcher, ActionKey};
use crate::error::{Error, Result};
use crate::reminder::{ReminderInterval, ReminderScheduler};
use crate::schema;
use crate::subscription::{Subscription, SubscriptionManager};
use crate::traits::{
    EntityQuery, EntityStore, LeadershipEvent, LeadershipSource, Notification, NotificationCallback,
    NotificationConfig, NotificationSource,
};
use crate::value::{EntityName, Value};

/// Leadership lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Not permitted to act (initial and resting state)
    Follower,
    /// Leader, subscriptions not yet bound
    LeaderUnvalidated,
    /// Leader with current subscriptions bound
    LeaderActive,
}

impl LifecycleState {
    pub fn is_leader(&self) -> bool {
        !matches!(self, LifecycleState::Follower)
    }
}

/// Which subscription delivered a notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscriptionKind {
    /// `GarageDoor.IsClosed`
    DoorStatus,
    /// `GarageController.OpenReminderInterval`
    ReminderInterval,
}

impl SubscriptionKind {
    /// Notification filter for this kind
    pub fn config(&self) -> NotificationConfig {
        match self {
            SubscriptionKind::DoorStatus => {
                NotificationConfig::new(schema::GARAGE_DOOR, schema::FIELD_IS_CLOSED, true)
            }
            SubscriptionKind::ReminderInterval => NotificationConfig::new(
                schema::GARAGE_CONTROLLER,
                schema::FIELD_OPEN_REMINDER_INTERVAL,
                false,
            ),
        }
    }
}

/// Events emitted by the Controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerEvent {
    /// Lifecycle state changed
    StateChanged {
        from: LifecycleState,
        to: LifecycleState,
    },

    /// Subscriptions recreated
    Rebound { subscriptions: usize },

    /// Subscriptions could not be recreated
    RebindFailed { error: String },

    /// Subscriptions released
    Unbound { subscriptions: usize },

    /// An action was dispatched
    Dispatched {
        entity: EntityName,
        key: ActionKey,
        writes: usize,
        failures: usize,
    },

    /// An action could not be dispatched
    DispatchFailed {
        entity: EntityName,
        key: ActionKey,
        error: String,
    },

    /// Reminder interval updated
    ReminderIntervalChanged { minutes: i64 },

    /// Controller started
    Started,

    /// Controller stopped
    Stopped { reason: String },
}

struct ControllerState {
    lifecycle: LifecycleState,
    reminders: ReminderScheduler,
    interval: ReminderInterval,
}

type NotificationEnvelope = (SubscriptionKind, Notification);

/// Leader-gated, notification-driven garage controller
///
/// ## Lifecycle
///
/// 1. Create with [`Controller::new()`]
/// 2. Start with [`Controller::run()`]
/// 3. Controller runs until shutdown signal received
///
/// The `on_*` handlers and [`Controller::do_work`] are public so hosts with
/// their own event loop can drive the controller directly.
///
/// ## Threading
///
/// Leadership state, reminder state and the reminder interval live behind
/// one mutex; the subscription set behind another. Store lookups and alert
/// writes run with neither held.
pub struct Controller {
    /// Entity store for configuration lookups and name resolution
    store: Arc<dyn EntityStore>,

    /// Leadership transitions
    leadership: Box<dyn LeadershipSource>,

    /// Alert fan-out
    dispatcher: ActionDispatcher,

    /// Lifecycle, reminders, interval
    state: Mutex<ControllerState>,

    /// Active change subscriptions
    subscriptions: Mutex<SubscriptionManager>,

    /// Subscription callbacks forward into this channel
    notification_tx: mpsc::UnboundedSender<NotificationEnvelope>,

    /// Taken by the event loop
    notification_rx: Mutex<Option<mpsc::UnboundedReceiver<NotificationEnvelope>>>,

    /// Period of the reminder tick
    tick_interval: Duration,

    /// Event sender for external monitoring
    event_tx: mpsc::Sender<ControllerEvent>,
}

impl Controller {
    /// Create a new controller
    ///
    /// # Parameters
    ///
    /// - `store`: Entity store implementation
    /// - `notifications`: Change-notification implementation
    /// - `leadership`: Leadership signal implementation
    /// - `config`: Controller configuration
    ///
    /// # Returns
    ///
    /// A tuple of (controller, event_receiver) where event_receiver yields controller events
    pub fn new(
        store: Arc<dyn EntityStore>,
        notifications: Arc<dyn NotificationSource>,
        leadership: Box<dyn LeadershipSource>,
        config: ControllerConfig,
    ) -> Result<(Self, mpsc::Receiver<ControllerEvent>)> {
        config.validate()?;

        let (event_tx, event_rx) = mpsc::channel(config.event_channel_capacity);
        let (notification_tx, notification_rx) = mpsc::unbounded_channel();

        let controller = Self {
            dispatcher: ActionDispatcher::new(Arc::clone(&store), config.application_name.clone(), config.alerts),
            store,
            leadership,
            state: Mutex::new(ControllerState {
                lifecycle: LifecycleState::Follower,
                reminders: ReminderScheduler::new(),
                interval: ReminderInterval::default(),
            }),
            subscriptions: Mutex::new(SubscriptionManager::new(notifications)),
            notification_tx,
            notification_rx: Mutex::new(Some(notification_rx)),
            tick_interval: config.tick_interval(),
            event_tx,
        };

        Ok((controller, event_rx))
    }

    /// Run the controller until SIGINT
    pub async fn run(&self) -> Result<()> {
        self.run_internal(None).await
    }

    /// Run the controller until `shutdown_rx` fires
    ///
    /// Passing `None` falls back to SIGINT, like [`Controller::run`].
    pub async fn run_with_shutdown(&self, shutdown_rx: Option<oneshot::Receiver<()>>) -> Result<()> {
        self.run_internal(shutdown_rx).await
    }

    async fn run_internal(&self, shutdown_rx: Option<oneshot::Receiver<()>>) -> Result<()> {
        let mut notifications = self
            .notification_rx
            .lock()
            .await
            .take()
            .ok_or_else(|| Error::Other("controller is already running".to_string()))?;

        self.emit_event(ControllerEvent::Started);
        info!("Controller started (tick every {:?})", self.tick_interval);

        let mut leadership = self.leadership.watch();
        let mut ticker = tokio::time::interval(self.tick_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        let shutdown = async move {
            match shutdown_rx {
                Some(rx) => {
                    let _ = rx.await;
                }
                None => {
                    let _ = tokio::signal::ctrl_c().await;
                }
            }
        };
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                Some(event) = leadership.next() => {
                    self.handle_leadership_event(event).await;
                }

                Some((kind, notification)) = notifications.recv() => {
                    if let Err(e) = self.on_notification(kind, notification).await {
                        error!("Failed to handle {:?} notification: {}", kind, e);
                    }
                }

                _ = ticker.tick() => {
                    self.do_work(Utc::now()).await;
                }

                _ = &mut shutdown => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        let released = self.subscriptions.lock().await.unbind_all();
        debug!("Released {} subscription(s) on shutdown", released);
        *self.notification_rx.lock().await = Some(notifications);

        self.emit_event(ControllerEvent::Stopped {
            reason: "Shutdown signal".to_string(),
        });
        info!("Controller stopped");
        Ok(())
    }

    async fn handle_leadership_event(&self, event: LeadershipEvent) {
        match event {
            LeadershipEvent::BecameLeader => {
                if let Err(e) = self.on_became_leader().await {
                    warn!("Rebind after becoming leader failed, retrying on next tick: {}", e);
                }
            }
            LeadershipEvent::LostLeadership => self.on_lost_leadership().await,
            LeadershipEvent::SchemaUpdated => {
                if let Err(e) = self.on_schema_updated().await {
                    warn!("Rebind after schema update failed, retrying on next tick: {}", e);
                }
            }
        }
    }

    /// This replica became leader: bind subscriptions
    ///
    /// On failure the controller stays in `LeaderUnvalidated` and the tick
    /// retries the rebind.
    pub async fn on_became_leader(&self) -> Result<()> {
        {
            let mut state = self.state.lock().await;
            if state.lifecycle == LifecycleState::Follower {
                info!("Became leader");
                self.transition(&mut state, LifecycleState::LeaderUnvalidated);
            }
        }
        self.validate().await
    }

    /// The store schema changed: recreate subscriptions in place
    pub async fn on_schema_updated(&self) -> Result<()> {
        if !self.lifecycle().await.is_leader() {
            debug!("Schema updated while follower, nothing to rebind");
            return Ok(());
        }
        info!("Schema updated, rebinding");
        self.validate().await
    }

    /// This replica lost leadership: release subscriptions, keep reminders
    pub async fn on_lost_leadership(&self) {
        {
            let mut state = self.state.lock().await;
            if state.lifecycle.is_leader() {
                info!(
                    "Lost leadership ({} open door(s) retained)",
                    state.reminders.len()
                );
                self.transition(&mut state, LifecycleState::Follower);
            }
        }

        let released = self.subscriptions.lock().await.unbind_all();
        self.emit_event(ControllerEvent::Unbound {
            subscriptions: released,
        });
    }

    /// Handle a change notification
    ///
    /// Ignored unless the controller is `LeaderActive`; this also covers
    /// notifications already in flight when subscriptions were released.
    pub async fn on_notification(&self, kind: SubscriptionKind, notification: Notification) -> Result<()> {
        if self.lifecycle().await != LifecycleState::LeaderActive {
            debug!("Ignoring {:?} notification while not active leader", kind);
            return Ok(());
        }

        match kind {
            SubscriptionKind::DoorStatus => self.on_door_status_changed(notification).await,
            SubscriptionKind::ReminderInterval => {
                self.on_reminder_interval_changed(&notification.current).await;
                Ok(())
            }
        }
    }

    async fn on_door_status_changed(&self, notification: Notification) -> Result<()> {
        let is_closed = notification.current.as_bool()?;

        let door = self
            .store
            .entity(&notification.entity_id)
            .await?
            .ok_or_else(|| Error::not_found(notification.entity_id.to_string()))?
            .name;

        let key = {
            let mut state = self.state.lock().await;
            if state.lifecycle != LifecycleState::LeaderActive {
                debug!("Leadership changed while resolving {}, dropping", door);
                return Ok(());
            }
            if is_closed {
                state.reminders.mark_left(&door);
                ActionKey::Closed
            } else {
                state.reminders.mark_entered(door.clone(), Utc::now());
                ActionKey::Opened
            }
        };

        info!("{} {}", door, key);
        self.dispatch(&door, key).await;
        Ok(())
    }

    async fn on_reminder_interval_changed(&self, value: &Value) {
        let minutes = match value.as_int() {
            Ok(minutes) => minutes,
            Err(e) => {
                warn!("Reminder interval is not an integer ({}), clamping to 1", e);
                0
            }
        };
        self.set_reminder_interval(ReminderInterval::clamped(minutes)).await;
    }

    async fn set_reminder_interval(&self, interval: ReminderInterval) {
        let mut state = self.state.lock().await;
        if state.interval != interval {
            info!("Reminder interval set to {} minute(s)", interval.minutes());
            state.interval = interval;
            self.emit_event(ControllerEvent::ReminderIntervalChanged {
                minutes: interval.minutes(),
            });
        }
    }

    /// Periodic tick
    ///
    /// While `LeaderActive`, dispatches a reminder for every door open longer
    /// than the reminder interval and re-arms it, whether or not the dispatch
    /// succeeded. While `LeaderUnvalidated`, retries the rebind instead.
    ///
    /// Returns the number of reminders fired.
    pub async fn do_work(&self, now: DateTime<Utc>) -> usize {
        let due = {
            let state = self.state.lock().await;
            let lifecycle = state.lifecycle;
            match lifecycle {
                LifecycleState::Follower => return 0,
                LifecycleState::LeaderUnvalidated => {
                    drop(state);
                    if let Err(e) = self.validate().await {
                        debug!("Rebind retry failed: {}", e);
                    }
                    return 0;
                }
                LifecycleState::LeaderActive => state.reminders.due_entities(now, state.interval),
            }
        };

        for door in &due {
            info!("{} still open, sending reminder", door);
            self.dispatch(door, ActionKey::Reminder).await;
        }

        let mut state = self.state.lock().await;
        for door in &due {
            state.reminders.on_fire(door, now);
        }
        due.len()
    }

    /// Rebind subscriptions and reload the reminder interval, then go active
    async fn validate(&self) -> Result<()> {
        match self.rebind().await {
            Ok(true) => {
                let mut state = self.state.lock().await;
                if state.lifecycle == LifecycleState::LeaderUnvalidated {
                    self.transition(&mut state, LifecycleState::LeaderActive);
                }
                Ok(())
            }
            Ok(false) => Ok(()),
            Err(e) => {
                self.emit_event(ControllerEvent::RebindFailed {
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Returns `Ok(false)` if leadership was lost before binding
    async fn rebind(&self) -> Result<bool> {
        {
            let mut subscriptions = self.subscriptions.lock().await;
            if !self.lifecycle().await.is_leader() {
                subscriptions.unbind_all();
                return Ok(false);
            }

            let bound = subscriptions.rebind(self.desired_subscriptions()).await?;
            self.emit_event(ControllerEvent::Rebound {
                subscriptions: bound,
            });
        }

        self.reload_reminder_interval().await?;
        Ok(true)
    }

    fn desired_subscriptions(&self) -> Vec<Subscription> {
        [SubscriptionKind::DoorStatus, SubscriptionKind::ReminderInterval]
            .into_iter()
            .map(|kind| Subscription::new(kind.config(), self.forward_to_loop(kind)))
            .collect()
    }

    fn forward_to_loop(&self, kind: SubscriptionKind) -> NotificationCallback {
        let tx = self.notification_tx.clone();
        Arc::new(move |notification| {
            if tx.send((kind, notification)).is_err() {
                debug!("Controller gone, dropping {:?} notification", kind);
            }
        })
    }

    async fn reload_reminder_interval(&self) -> Result<()> {
        let config_entities = self
            .store
            .find(&EntityQuery::of_type(schema::GARAGE_CONTROLLER))
            .await?;

        // The last configuration entity wins, matching notification order.
        let Some(value) = config_entities
            .iter()
            .filter_map(|e| e.field(schema::FIELD_OPEN_REMINDER_INTERVAL))
            .last()
        else {
            return Ok(());
        };
        self.on_reminder_interval_changed(value).await;
        Ok(())
    }

    fn transition(&self, state: &mut ControllerState, to: LifecycleState) {
        let from = state.lifecycle;
        if from != to {
            debug!("Lifecycle {:?} -> {:?}", from, to);
            state.lifecycle = to;
            self.emit_event(ControllerEvent::StateChanged { from, to });
        }
    }

    async fn dispatch(&self, door: &EntityName, key: ActionKey) {
        match self.dispatcher.dispatch(door, key).await {
            Ok(report) => self.emit_event(ControllerEvent::Dispatched {
                entity: door.clone(),
                key,
                writes: report.writes,
                failures: report.failures.len(),
            }),
            Err(e) => {
                error!("Failed to dispatch {} for {}: {}", key, door, e);
                self.emit_event(ControllerEvent::DispatchFailed {
                    entity: door.clone(),
                    key,
                    error: e.to_string(),
                });
            }
        }
    }

    /// Current lifecycle state
    pub async fn lifecycle(&self) -> LifecycleState {
        self.state.lock().await.lifecycle
    }

    /// Current reminder interval
    pub async fn reminder_interval(&self) -> ReminderInterval {
        self.state.lock().await.interval
    }

    /// Doors currently tracked as open, sorted by name
    pub async fn open_doors(&self) -> Vec<EntityName> {
        self.state.lock().await.reminders.tracked()
    }

    /// When a door's reminder was last armed
    pub async fn reminder_armed_at(&self, door: &EntityName) -> Option<DateTime<Utc>> {
        self.state.lock().await.reminders.last_triggered(door)
    }

    /// Filters of the active subscriptions
    pub async fn active_subscriptions(&self) -> Vec<NotificationConfig> {
        self.subscriptions.lock().await.active()
    }

    /// Emit a controller event
    fn emit_event(&self, event: ControllerEvent) {
        match self.event_tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("Event channel full, dropping event. Consider increasing event_channel_capacity.");
            }
            // Nobody is monitoring
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }
}
