//! Core traits for the garage controller
//!
//! This module defines the interfaces of the external collaborators the
//! controller consumes. None of them are implemented as real distributed
//! systems here; [`crate::store::MemoryEntityStore`] is the in-process stand-in.
//!
//! - [`EntityStore`]: Query and write typed entity fields
//! - [`NotificationSource`]: Register change subscriptions
//! - [`LeadershipSource`]: Leadership and schema transition signals

pub mod entity_store;
pub mod leadership;
pub mod notification_source;

pub use entity_store::{Entity, EntityQuery, EntityStore, FieldCondition, WriteRequest};
pub use leadership::{LeadershipEvent, LeadershipSource};
pub use notification_source::{
    Notification, NotificationCallback, NotificationConfig, NotificationSource, NotificationToken,
};
