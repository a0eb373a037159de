// Per-draft event bus: sequenced broadcast plus snapshot-on-subscribe.

use thiserror::Error;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use crate::draft::state::DraftSnapshot;
use crate::protocol::DraftEvent;

/// An event together with its per-draft sequence number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sequenced {
    pub seq: u64,
    pub event: DraftEvent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SubscriptionError {
    /// The subscriber fell behind and `n` events were dropped. The
    /// subscription is closed; subscribe again for a fresh snapshot.
    #[error("subscriber lagged by {0} events")]
    Lagged(u64),

    #[error("subscription closed")]
    Closed,
}

/// Publishing side of one draft's events. Owned by the draft actor, so
/// publishing and subscribing never interleave.
#[derive(Debug)]
pub struct EventBus {
    tx: broadcast::Sender<Sequenced>,
    seq: u64,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        EventBus { tx, seq: 0 }
    }

    /// Sequence number of the last published event.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Publish to every current subscriber. Returns the event's sequence
    /// number. Publishing with no subscribers still consumes a number.
    pub fn publish(&mut self, event: DraftEvent) -> u64 {
        self.seq += 1;
        let _ = self.tx.send(Sequenced {
            seq: self.seq,
            event,
        });
        self.seq
    }

    /// Register a subscriber that will see every event after `snapshot`.
    ///
    /// `snapshot` must reflect exactly the events published so far.
    pub fn subscribe(&self, snapshot: DraftSnapshot) -> Subscription {
        debug_assert_eq!(snapshot.seq, self.seq);
        Subscription {
            snapshot,
            events: Some(self.tx.subscribe()),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// A snapshot and the live stream of events that follow it.
#[derive(Debug)]
pub struct Subscription {
    pub snapshot: DraftSnapshot,
    events: Option<broadcast::Receiver<Sequenced>>,
}

impl Subscription {
    /// A subscription to a draft that will publish nothing more. `recv`
    /// reports `Closed` straight away.
    pub fn finished(snapshot: DraftSnapshot) -> Self {
        Subscription {
            snapshot,
            events: None,
        }
    }

    pub fn draft_id(&self) -> &str {
        &self.snapshot.draft.id
    }

    pub fn is_active(&self) -> bool {
        self.events.is_some()
    }

    /// Next event in publish order.
    pub async fn recv(&mut self) -> Result<Sequenced, SubscriptionError> {
        let Some(rx) = self.events.as_mut() else {
            return Err(SubscriptionError::Closed);
        };
        match rx.recv().await {
            Ok(event) => Ok(event),
            Err(RecvError::Lagged(n)) => {
                self.events = None;
                Err(SubscriptionError::Lagged(n))
            }
            Err(RecvError::Closed) => {
                self.events = None;
                Err(SubscriptionError::Closed)
            }
        }
    }

    /// Stop receiving events. Calling it again is a no-op.
    pub fn unsubscribe(&mut self) {
        self.events = None;
    }
}
