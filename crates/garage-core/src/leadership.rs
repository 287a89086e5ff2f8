//! Single-replica leadership gate
//!
//! [`StandaloneLeadership`] is the [`LeadershipSource`] used when the
//! controller runs as the only replica. It grants leadership as soon as the
//! store is connected and every availability criterion holds, and revokes it
//! when either stops being true. Multi-replica election belongs to the
//! external store and plugs in through the same trait.
//!
//! Criteria are plain predicates. When the inputs of a criterion change (for
//! example, a schema check finished), call [`StandaloneLeadership::reevaluate`].

use std::pin::Pin;
use std::sync::Mutex;
use tokio::sync::mpsc;
use tokio_stream::Stream;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, info, warn};

use crate::traits::{LeadershipEvent, LeadershipSource};

/// Predicate that must hold for this replica to act
pub type AvailabilityCriterion = Box<dyn Fn() -> bool + Send + Sync>;

struct Gate {
    connected: bool,
    leader: bool,
    criteria: Vec<AvailabilityCriterion>,
}

impl Gate {
    fn available(&self) -> bool {
        self.connected && self.criteria.iter().all(|criterion| criterion())
    }
}

/// Leadership for a single standalone replica
pub struct StandaloneLeadership {
    gate: Mutex<Gate>,
    tx: mpsc::UnboundedSender<LeadershipEvent>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<LeadershipEvent>>>,
}

impl StandaloneLeadership {
    /// Disconnected, no criteria, not leader
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            gate: Mutex::new(Gate {
                connected: false,
                leader: false,
                criteria: Vec::new(),
            }),
            tx,
            rx: Mutex::new(Some(rx)),
        }
    }

    /// Add a predicate that must hold before leadership is granted
    pub fn add_availability_criteria(&self, criterion: AvailabilityCriterion) {
        lock(&self.gate).criteria.push(criterion);
        self.reevaluate();
    }

    /// The entity store connection came up
    pub fn on_database_connected(&self) {
        info!("Entity store connected");
        lock(&self.gate).connected = true;
        self.reevaluate();
    }

    /// The entity store connection went down
    pub fn on_database_disconnected(&self) {
        warn!("Entity store disconnected");
        lock(&self.gate).connected = false;
        self.reevaluate();
    }

    /// Announce a schema change
    ///
    /// Re-checks availability first, since schema validity is usually one of
    /// the criteria. `SchemaUpdated` is only delivered while leader.
    pub fn schema_updated(&self) {
        self.reevaluate();
        if self.is_leader() {
            self.send(LeadershipEvent::SchemaUpdated);
        }
    }

    /// Re-check availability and emit a transition if it changed
    pub fn reevaluate(&self) {
        let event = {
            let mut gate = lock(&self.gate);
            let available = gate.available();
            if available == gate.leader {
                return;
            }
            gate.leader = available;
            if available {
                LeadershipEvent::BecameLeader
            } else {
                LeadershipEvent::LostLeadership
            }
        };
        info!("Leadership transition: {:?}", event);
        self.send(event);
    }

    /// Whether leadership is currently granted
    pub fn is_leader(&self) -> bool {
        lock(&self.gate).leader
    }

    fn send(&self, event: LeadershipEvent) {
        if self.tx.send(event).is_err() {
            debug!("No leadership watcher, dropping {:?}", event);
        }
    }
}

impl Default for StandaloneLeadership {
    fn default() -> Self {
        Self::new()
    }
}

impl LeadershipSource for StandaloneLeadership {
    fn watch(&self) -> Pin<Box<dyn Stream<Item = LeadershipEvent> + Send + 'static>> {
        match lock(&self.rx).take() {
            Some(rx) => Box::pin(UnboundedReceiverStream::new(rx)),
            None => {
                warn!("Leadership already watched, returning an empty stream");
                Box::pin(tokio_stream::empty())
            }
        }
    }
}

impl LeadershipSource for std::sync::Arc<StandaloneLeadership> {
    fn watch(&self) -> Pin<Box<dyn Stream<Item = LeadershipEvent> + Send + 'static>> {
        self.as_ref().watch()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio_stream::StreamExt;

    async fn next(stream: &mut Pin<Box<dyn Stream<Item = LeadershipEvent> + Send>>) -> LeadershipEvent {
        tokio::time::timeout(std::time::Duration::from_millis(100), stream.next())
            .await
            .expect("event delivered")
            .expect("stream open")
    }

    #[tokio::test]
    async fn connect_grants_and_disconnect_revokes() {
        let leadership = StandaloneLeadership::new();
        let mut events = leadership.watch();

        leadership.on_database_connected();
        assert_eq!(next(&mut events).await, LeadershipEvent::BecameLeader);
        assert!(leadership.is_leader());

        leadership.on_database_connected();
        leadership.on_database_disconnected();
        assert_eq!(next(&mut events).await, LeadershipEvent::LostLeadership);
        assert!(!leadership.is_leader());
    }

    #[tokio::test]
    async fn criteria_gate_leadership() {
        let schema_valid = Arc::new(AtomicBool::new(false));
        let leadership = StandaloneLeadership::new();
        let mut events = leadership.watch();

        let flag = Arc::clone(&schema_valid);
        leadership.add_availability_criteria(Box::new(move || flag.load(Ordering::SeqCst)));
        leadership.on_database_connected();
        assert!(!leadership.is_leader());

        schema_valid.store(true, Ordering::SeqCst);
        leadership.schema_updated();
        assert_eq!(next(&mut events).await, LeadershipEvent::BecameLeader);
        assert_eq!(next(&mut events).await, LeadershipEvent::SchemaUpdated);

        schema_valid.store(false, Ordering::SeqCst);
        leadership.schema_updated();
        assert_eq!(next(&mut events).await, LeadershipEvent::LostLeadership);
    }

    #[tokio::test]
    async fn second_watch_is_empty() {
        let leadership = StandaloneLeadership::new();
        let _first = leadership.watch();
        let mut second = leadership.watch();
        assert!(second.next().await.is_none());
    }
}
