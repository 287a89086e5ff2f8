// # Notification Source Trait
//
// Defines the subscribe/unsubscribe/callback contract of the change
// notification layer.
//
// ## Delivery
//
// How notifications are transported is the implementation's concern. The
// contract only promises that, for one (entity, field) pair, notifications
// reach the callback in the order the writes were applied. There is no
// cross-field ordering guarantee.
//
// ## Cancellation
//
// `NotificationToken::unbind` stops future deliveries. A notification that was
// already handed to the callback before `unbind` may still be processed; the
// consumer must tolerate that (the controller guards on leadership state).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::value::{EntityId, Value};

/// Subscription filter: which entity type and field to watch
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// Entity type to watch
    pub entity_type: String,
    /// Field to watch
    pub field: String,
    /// `true`: deliver only when the value changes. `false`: deliver on every write.
    pub notify_on_change: bool,
}

impl NotificationConfig {
    pub fn new(entity_type: impl Into<String>, field: impl Into<String>, notify_on_change: bool) -> Self {
        Self {
            entity_type: entity_type.into(),
            field: field.into(),
            notify_on_change,
        }
    }
}

/// A change event pushed to a subscriber
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// Entity that was written
    pub entity_id: EntityId,
    /// Field that was written
    pub field: String,
    /// Value after the write
    pub current: Value,
    /// Value before the write, if any
    pub previous: Option<Value>,
}

/// Callback invoked for every delivered notification
///
/// Callbacks must not block; forward the notification to a channel instead.
pub type NotificationCallback = Arc<dyn Fn(Notification) + Send + Sync>;

/// Handle to an active subscription
pub trait NotificationToken: Send + Sync {
    /// Stop delivering notifications for this subscription
    ///
    /// Must be idempotent.
    fn unbind(&self);
}

/// Trait for change-notification implementations
#[async_trait]
pub trait NotificationSource: Send + Sync {
    /// Register a subscription
    ///
    /// # Returns
    ///
    /// - `Ok(token)`: Subscription is active until `token.unbind()`
    /// - `Err(Error)`: The notification layer is unreachable
    async fn notify(
        &self,
        config: NotificationConfig,
        callback: NotificationCallback,
    ) -> Result<Box<dyn NotificationToken>, crate::Error>;
}
