//! Change-subscription ownership
//!
//! The [`SubscriptionManager`] holds every subscription token the controller
//! has registered. Leadership and schema transitions call
//! [`SubscriptionManager::rebind`], which drops all held subscriptions before
//! creating the current set, so no stale token outlives a rebind.

use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::Result;
use crate::traits::{NotificationCallback, NotificationConfig, NotificationSource, NotificationToken};

/// A subscription to create: filter plus callback
#[derive(Clone)]
pub struct Subscription {
    pub config: NotificationConfig,
    pub callback: NotificationCallback,
}

impl Subscription {
    pub fn new(config: NotificationConfig, callback: NotificationCallback) -> Self {
        Self { config, callback }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Owns the active subscription set
pub struct SubscriptionManager {
    source: Arc<dyn NotificationSource>,
    held: Vec<(NotificationConfig, Box<dyn NotificationToken>)>,
}

impl SubscriptionManager {
    pub fn new(source: Arc<dyn NotificationSource>) -> Self {
        Self {
            source,
            held: Vec::new(),
        }
    }

    /// Register one subscription
    ///
    /// A filter that is already held is not registered again.
    ///
    /// # Returns
    ///
    /// - `Ok(true)`: Subscription registered
    /// - `Ok(false)`: Identical filter already active, skipped
    /// - `Err(Error)`: Notification layer unreachable; nothing was added
    pub async fn bind(&mut self, subscription: Subscription) -> Result<bool> {
        if self.is_bound(&subscription.config) {
            debug!(
                "Subscription {}.{} already bound, skipping",
                subscription.config.entity_type, subscription.config.field
            );
            return Ok(false);
        }

        let token = self
            .source
            .notify(subscription.config.clone(), subscription.callback)
            .await?;
        debug!(
            "Bound {}.{} (notify_on_change={})",
            subscription.config.entity_type,
            subscription.config.field,
            subscription.config.notify_on_change
        );
        self.held.push((subscription.config, token));
        Ok(true)
    }

    /// Unbind every held subscription and clear the set
    ///
    /// Safe to call repeatedly. Returns how many subscriptions were released.
    pub fn unbind_all(&mut self) -> usize {
        let count = self.held.len();
        for (_, token) in self.held.drain(..) {
            token.unbind();
        }
        if count > 0 {
            debug!("Unbound {} subscription(s)", count);
        }
        count
    }

    /// Replace the held set with `subscriptions`, bound in the order supplied
    ///
    /// A bind failure stops the sequence and is returned. Subscriptions bound
    /// before the failure stay held so a later `unbind_all` releases them.
    pub async fn rebind(&mut self, subscriptions: Vec<Subscription>) -> Result<usize> {
        self.unbind_all();

        for subscription in subscriptions {
            self.bind(subscription).await?;
        }

        info!("Rebound {} subscription(s)", self.held.len());
        Ok(self.held.len())
    }

    /// Whether a subscription with this filter is active
    pub fn is_bound(&self, config: &NotificationConfig) -> bool {
        self.held.iter().any(|(held, _)| held == config)
    }

    /// Filters of the active subscriptions, in bind order
    pub fn active(&self) -> Vec<NotificationConfig> {
        self.held.iter().map(|(config, _)| config.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.held.len()
    }

    pub fn is_empty(&self) -> bool {
        self.held.is_empty()
    }
}

impl Drop for SubscriptionManager {
    fn drop(&mut self) {
        self.unbind_all();
    }
}
