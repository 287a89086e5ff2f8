// # Leadership Source Trait
//
// The controller is told when this replica became leader, when it is losing
// leadership, and when the store schema changed. How leaders are elected is
// outside this crate; [`crate::leadership::StandaloneLeadership`] covers the
// single-replica case.

use std::pin::Pin;
use tokio_stream::Stream;

/// Leadership and schema transitions delivered to the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeadershipEvent {
    /// This replica is now the leader and all availability criteria hold
    BecameLeader,
    /// This replica is no longer permitted to act
    LostLeadership,
    /// Entity type or field definitions changed
    SchemaUpdated,
}

/// Trait for leadership signal implementations
pub trait LeadershipSource: Send + Sync {
    /// Stream of leadership transitions
    ///
    /// Intended to be called once; the stream ends when the source shuts down.
    fn watch(&self) -> Pin<Box<dyn Stream<Item = LeadershipEvent> + Send + 'static>>;
}
