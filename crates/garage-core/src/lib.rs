// # garage-core
//
// Core library for the leader-gated garage alert controller.
//
// ## Architecture Overview
//
// This library drives voice/email alerts from change events on a shared entity
// store while only the leader replica acts:
// - **EntityStore / NotificationSource / LeadershipSource**: Traits for the external collaborators
// - **ReminderScheduler**: Per-door "open since" state and due-reminder computation
// - **SubscriptionManager**: Owns change subscriptions; unbind-all then bind on every rebind
// - **ActionDispatcher**: Resolves templates on configuration entities and fans alerts out to targets
// - **Controller**: Leadership/schema lifecycle, notification handling and the reminder tick
// - **MemoryEntityStore / StandaloneLeadership**: In-process collaborators for single-replica use
//
// ## Design Principles
//
// 1. **Leader-gated**: Nothing is bound or dispatched unless this replica is leader
// 2. **Event-Driven**: Notifications and leadership transitions arrive as streams
// 3. **Isolated failures**: One target's failed write never blocks another
// 4. **Library-First**: The daemon is a thin wiring layer over this crate

pub mod config;
pub mod controller;
pub mod dispatch;
pub mod error;
pub mod leadership;
pub mod reminder;
pub mod schema;
pub mod store;
pub mod subscription;
pub mod traits;
pub mod value;

// Re-export core types for convenience
pub use config::{AlertChannels, ControllerConfig};
pub use controller::{Controller, ControllerEvent, LifecycleState, SubscriptionKind};
pub use dispatch::{ActionDispatcher, ActionKey, DispatchReport};
pub use error::{Error, Result};
pub use leadership::StandaloneLeadership;
pub use reminder::{ReminderInterval, ReminderScheduler};
pub use schema::Schema;
pub use store::MemoryEntityStore;
pub use subscription::{Subscription, SubscriptionManager};
pub use traits::{EntityStore, LeadershipSource, NotificationSource};
pub use value::{EntityId, EntityName, Value};
