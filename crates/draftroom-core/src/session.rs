// Per-connection session: joined drafts, their event forwarders, and
// dispatch of client messages to the engine.

use std::collections::HashMap;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::engine::bus::{Sequenced, Subscription, SubscriptionError};
use crate::engine::DraftEngine;
use crate::error::EngineError;
use crate::protocol::{parse_client_message, ClientMessage, DraftEvent, ServerMessage};

pub struct Session {
    engine: DraftEngine,
    peer: String,
    out: mpsc::Sender<ServerMessage>,
    joined: HashMap<String, JoinHandle<()>>,
}

impl Session {
    /// `out` is the connection's outgoing queue. It is bounded so a slow
    /// client lags behind the event bus and gets resynchronised.
    pub fn new(engine: DraftEngine, peer: &str, out: mpsc::Sender<ServerMessage>) -> Self {
        Session {
            engine,
            peer: peer.to_string(),
            out,
            joined: HashMap::new(),
        }
    }

    /// Ids of the drafts this session has joined, sorted.
    pub fn joined(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.joined.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Handle one raw text frame. Returns `Err(())` once the outgoing
    /// queue is closed.
    pub async fn handle_text(&mut self, text: &str) -> Result<(), ()> {
        match parse_client_message(text) {
            Ok(msg) => self.handle(msg).await,
            Err(e) => {
                warn!("Malformed message from {}: {e}", self.peer);
                self.reply(ServerMessage::direct("", DraftEvent::error(&e)))
                    .await
            }
        }
    }

    pub async fn handle(&mut self, msg: ClientMessage) -> Result<(), ()> {
        let draft_id = msg.draft_id().to_string();
        let result = match msg {
            ClientMessage::JoinDraft { draft_id } => self.join(&draft_id).await,
            ClientMessage::Ping => {
                let resident_drafts = self.engine.resident_drafts().len();
                return self
                    .reply(ServerMessage::direct("", DraftEvent::Pong { resident_drafts }))
                    .await;
            }
            ClientMessage::LeaveDraft { draft_id } => {
                self.leave(&draft_id);
                return self
                    .reply(ServerMessage::direct(&draft_id, DraftEvent::LeftDraft))
                    .await;
            }
            ClientMessage::PickMade {
                draft_id,
                participant_id,
                item_id,
            } => self
                .engine
                .make_pick(&draft_id, &participant_id, &item_id)
                .await
                .map(|_| ()),
            ClientMessage::StartDraft { draft_id, setup } => self
                .engine
                .start_draft(&draft_id, setup)
                .await
                .map(|_| ()),
            ClientMessage::ForceAutoPick {
                draft_id,
                participant_id,
                item_id,
            } => self
                .engine
                .force_auto_pick(&draft_id, &participant_id, item_id.as_deref())
                .await
                .map(|_| ()),
        };

        match result {
            Ok(()) => Ok(()),
            Err(e) => {
                debug!("Request from {} on draft {draft_id} failed: {e}", self.peer);
                self.reply(ServerMessage::direct(&draft_id, DraftEvent::error(&e)))
                    .await
            }
        }
    }

    async fn join(&mut self, draft_id: &str) -> Result<(), EngineError> {
        let subscription = self.engine.subscribe(draft_id).await?;
        self.leave(draft_id);
        info!("{} joined draft {draft_id}", self.peer);
        let task = tokio::spawn(forward(
            self.engine.clone(),
            subscription,
            self.out.clone(),
            self.peer.clone(),
        ));
        self.joined.insert(draft_id.to_string(), task);
        Ok(())
    }

    /// Stop receiving a draft's events. Leaving a draft that was never
    /// joined is a no-op.
    pub fn leave(&mut self, draft_id: &str) {
        if let Some(task) = self.joined.remove(draft_id) {
            task.abort();
            debug!("{} left draft {draft_id}", self.peer);
        }
    }

    /// Leave every joined draft.
    pub fn close(&mut self) {
        for (_, task) in self.joined.drain() {
            task.abort();
        }
    }

    async fn reply(&self, msg: ServerMessage) -> Result<(), ()> {
        self.out.send(msg).await.map_err(|_| ())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

/// Send the subscription's snapshot, then its events, to `out`. A lagging
/// subscriber is resubscribed and gets a fresh snapshot.
async fn forward(
    engine: DraftEngine,
    mut subscription: Subscription,
    out: mpsc::Sender<ServerMessage>,
    peer: String,
) {
    let draft_id = subscription.draft_id().to_string();
    loop {
        let snapshot = subscription.snapshot.clone();
        let state = ServerMessage::sequenced(&draft_id, snapshot.seq, DraftEvent::DraftState(snapshot));
        if out.send(state).await.is_err() {
            return;
        }

        loop {
            match subscription.recv().await {
                Ok(Sequenced { seq, event }) => {
                    if out
                        .send(ServerMessage::sequenced(&draft_id, seq, event))
                        .await
                        .is_err()
                    {
                        return;
                    }
                }
                Err(SubscriptionError::Lagged(n)) => {
                    warn!("{peer} fell {n} events behind on draft {draft_id}, resynchronising");
                    break;
                }
                Err(SubscriptionError::Closed) => {
                    debug!("Draft {draft_id} stream closed for {peer}");
                    return;
                }
            }
        }

        subscription = match engine.subscribe(&draft_id).await {
            Ok(s) => s,
            Err(e) => {
                let _ = out
                    .send(ServerMessage::direct(&draft_id, DraftEvent::error(&e)))
                    .await;
                return;
            }
        };
    }
}
