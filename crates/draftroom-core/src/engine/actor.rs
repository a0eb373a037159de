// Draft actor: the single task that owns and mutates one draft.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::bus::{EventBus, Subscription};
use super::committer::{self, PickRequest};
use super::scheduler::{Advance, TurnScheduler};
use super::store::DraftStore;
use super::timer::{Clock, TimerSignal};
use crate::draft::pick::{PickOrigin, PickRecord};
use crate::draft::roster::Roster;
use crate::draft::state::{DraftSnapshot, DraftStatus, RuntimeState};
use crate::error::EngineError;
use crate::persistence::{participant_updates, DraftChange};
use crate::protocol::DraftEvent;

/// Requests processed by a draft actor, one at a time.
pub enum Command {
    Snapshot {
        resp: oneshot::Sender<DraftSnapshot>,
    },
    Subscribe {
        resp: oneshot::Sender<Subscription>,
    },
    Pick {
        request: PickRequest,
        resp: oneshot::Sender<Result<PickRecord, EngineError>>,
    },
    Start {
        roster: Option<Roster>,
        resp: oneshot::Sender<Result<DraftSnapshot, EngineError>>,
    },
    Shutdown,
}

pub(crate) struct DraftActor {
    pub(crate) state: RuntimeState,
    pub(crate) bus: EventBus,
    pub(crate) scheduler: TurnScheduler,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) commands: mpsc::Receiver<Command>,
    pub(crate) timer_rx: mpsc::UnboundedReceiver<TimerSignal>,
    pub(crate) persist: Option<mpsc::UnboundedSender<DraftChange>>,
    pub(crate) writer: Option<JoinHandle<()>>,
    pub(crate) store: DraftStore,
    pub(crate) instance: u64,
    pub(crate) idle_timeout: Duration,
    /// Set once the draft completed; the actor only waits for queued
    /// writes to drain before exiting.
    pub(crate) closing: bool,
}

async fn drained(writer: &mut Option<JoinHandle<()>>) {
    if let Some(handle) = writer {
        if let Err(e) = handle.await {
            error!("Persistence writer task failed: {e}");
        }
    }
}

impl DraftActor {
    pub(crate) async fn run(mut self) {
        let draft_id = self.state.draft_id().to_string();
        info!(
            "Draft {draft_id} resident ({}, {} picks)",
            self.state.status(),
            self.state.picks().len()
        );

        if self.state.status() == DraftStatus::Active {
            self.scheduler.arm(&self.state);
            if let Some(turn) = self.state.current_turn() {
                info!(
                    "Draft {draft_id} resumed at pick #{} ({})",
                    turn.pick_number, turn.participant_id
                );
            }
        }

        let idle = tokio::time::sleep(self.idle_timeout);
        tokio::pin!(idle);

        loop {
            tokio::select! {
                cmd = self.commands.recv() => match cmd {
                    Some(Command::Shutdown) | None => {
                        info!("Draft {draft_id} shutting down");
                        break;
                    }
                    Some(cmd) => self.handle_command(cmd),
                },
                Some(signal) = self.timer_rx.recv() => self.handle_timer(signal),
                _ = drained(&mut self.writer), if self.closing => {
                    self.writer = None;
                    info!("Draft {draft_id} completed and persisted");
                    break;
                }
                _ = &mut idle, if !self.closing => {
                    if self.state.status() != DraftStatus::Active
                        && self.bus.subscriber_count() == 0
                    {
                        info!("Draft {draft_id} idle, evicting");
                        break;
                    }
                }
            }
            if !self.closing {
                idle.as_mut().reset(Instant::now() + self.idle_timeout);
            }
        }

        self.scheduler.cancel();
        self.persist = None;
        drained(&mut self.writer).await;
        self.store.release(&draft_id, self.instance);
        debug!("Draft {draft_id} actor stopped");
    }

    fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Snapshot { resp } => {
                let _ = resp.send(self.snapshot());
            }
            Command::Subscribe { resp } => {
                let subscription = self.bus.subscribe(self.snapshot());
                let _ = resp.send(subscription);
            }
            Command::Pick { request, resp } => {
                let _ = resp.send(self.apply_pick(request));
            }
            Command::Start { roster, resp } => {
                let _ = resp.send(self.start(roster));
            }
            Command::Shutdown => {}
        }
    }

    fn snapshot(&self) -> DraftSnapshot {
        self.state
            .snapshot(self.bus.seq(), self.scheduler.seconds_remaining())
    }

    fn handle_timer(&mut self, signal: TimerSignal) {
        if !self.scheduler.is_current(&self.state, &signal) {
            debug!(
                "Draft {}: dropping stale timer signal {signal:?} (generation {})",
                self.state.draft_id(),
                self.state.generation()
            );
            return;
        }

        match signal {
            TimerSignal::Tick {
                seconds_remaining, ..
            } => {
                self.bus.publish(DraftEvent::TimerUpdate { seconds_remaining });
            }
            TimerSignal::Expired { .. } => {
                let Some(request) = self.scheduler.expiry_request(&self.state) else {
                    return;
                };
                info!(
                    "Draft {}: pick timer expired for {}",
                    self.state.draft_id(),
                    request.participant_id
                );
                if let Err(e) = self.apply_pick(request) {
                    warn!(
                        "Draft {}: automatic pick failed: {e}",
                        self.state.draft_id()
                    );
                }
            }
        }
    }

    /// Validate and apply a claim, then advance the turn and broadcast.
    fn apply_pick(&mut self, request: PickRequest) -> Result<PickRecord, EngineError> {
        let pick = match committer::commit(&mut self.state, &request, self.clock.now()) {
            Ok(pick) => pick,
            Err(e) => {
                warn!(
                    "Draft {}: rejected {} pick by {}: {e}",
                    self.state.draft_id(),
                    request.origin,
                    request.participant_id
                );
                return Err(e.into());
            }
        };
        let next = self.scheduler.advance(&mut self.state);

        self.persist(DraftChange::PickCommitted {
            pick: pick.clone(),
            participants: participant_updates(&self.state),
            status: self.state.status(),
        });

        info!(
            "Draft {}: pick #{} {} -> {} ({})",
            pick.draft_id, pick.pick_number, pick.participant_id, pick.item_id, pick.origin
        );
        let event = match pick.origin {
            PickOrigin::Manual => DraftEvent::PickUpdate(pick.clone()),
            PickOrigin::Timer => DraftEvent::AutoPickTriggered(pick.clone()),
            PickOrigin::Admin => DraftEvent::AutoPickMade(pick.clone()),
        };
        self.bus.publish(event);

        match next {
            Advance::Next(turn) => {
                self.bus.publish(DraftEvent::TurnUpdate(turn));
            }
            Advance::Completed => self.complete(),
        }
        self.debug_check();
        Ok(pick)
    }

    fn start(&mut self, roster: Option<Roster>) -> Result<DraftSnapshot, EngineError> {
        if self.state.status() != DraftStatus::Pending {
            return Err(EngineError::invalid_state(
                self.state.draft_id(),
                format!("cannot start a {} draft", self.state.status()),
            ));
        }
        if let Some(roster) = roster.clone() {
            self.state.install_roster(roster)?;
        }
        let first = self.state.activate()?;

        self.persist(DraftChange::Activated {
            draft_id: self.state.draft_id().to_string(),
            roster,
            participants: participant_updates(&self.state),
            status: self.state.status(),
        });
        self.scheduler.arm(&self.state);

        let snapshot = self
            .state
            .snapshot(self.bus.seq() + 1, self.scheduler.seconds_remaining());
        self.bus.publish(DraftEvent::DraftStarted(snapshot.clone()));
        info!(
            "Draft {} started with {} participants and {} items",
            self.state.draft_id(),
            self.state.participants().len(),
            self.state.items().len()
        );

        if first.is_none() {
            self.complete();
        }
        self.debug_check();
        Ok(snapshot)
    }

    fn complete(&mut self) {
        self.scheduler.cancel();
        self.bus.publish(DraftEvent::DraftCompleted);
        info!(
            "Draft {} completed after {} picks",
            self.state.draft_id(),
            self.state.picks().len()
        );
        self.closing = true;
        // Closing the queue lets the writer drain and exit.
        self.persist = None;
    }

    fn persist(&self, change: DraftChange) {
        match &self.persist {
            Some(tx) => {
                if tx.send(change).is_err() {
                    error!(
                        target: "draftroom::alert",
                        "Draft {}: persistence writer is gone, change not recorded",
                        self.state.draft_id()
                    );
                }
            }
            None => {
                error!(
                    target: "draftroom::alert",
                    "Draft {}: change {} after persistence closed",
                    self.state.draft_id(),
                    change.describe()
                );
            }
        }
    }

    fn debug_check(&self) {
        if cfg!(debug_assertions) {
            if let Err(e) = self.state.check_invariants() {
                error!("Draft {}: invariant violated: {e}", self.state.draft_id());
            }
        }
    }
}
