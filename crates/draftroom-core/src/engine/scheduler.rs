// Turn scheduling: advances the pick sequence and owns the turn countdown.

use std::time::Duration;

use tokio::sync::mpsc;

use super::committer::PickRequest;
use super::timer::{Countdown, TimerService, TimerSignal};
use crate::draft::pick::PickOrigin;
use crate::draft::state::{RuntimeState, TurnInfo};

/// Result of moving past a filled turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Advance {
    Next(TurnInfo),
    Completed,
}

pub struct TurnScheduler {
    timers: TimerService,
    signals: mpsc::UnboundedSender<TimerSignal>,
    countdown: Option<Countdown>,
}

impl TurnScheduler {
    pub fn new(timers: TimerService, signals: mpsc::UnboundedSender<TimerSignal>) -> Self {
        TurnScheduler {
            timers,
            signals,
            countdown: None,
        }
    }

    /// Start a full countdown for the current turn of `state`, replacing any
    /// running one. Untimed drafts and drafts without a current turn get no
    /// countdown.
    pub fn arm(&mut self, state: &RuntimeState) {
        self.cancel();
        let pick_seconds = state.draft().pick_seconds;
        if pick_seconds == 0 || state.current_turn().is_none() {
            return;
        }
        self.countdown = Some(self.timers.start(
            state.generation(),
            Duration::from_secs(u64::from(pick_seconds)),
            self.signals.clone(),
        ));
    }

    pub fn cancel(&mut self) {
        if let Some(countdown) = self.countdown.take() {
            countdown.cancel();
        }
    }

    /// Move `state` past the turn just filled and arm the next countdown.
    pub fn advance(&mut self, state: &mut RuntimeState) -> Advance {
        self.cancel();
        match state.advance() {
            Some(turn) => {
                self.arm(state);
                Advance::Next(turn)
            }
            None => Advance::Completed,
        }
    }

    /// Whether `signal` belongs to the countdown of the current turn.
    pub fn is_current(&self, state: &RuntimeState, signal: &TimerSignal) -> bool {
        match &self.countdown {
            Some(countdown) => {
                countdown.generation() == signal.generation()
                    && signal.generation() == state.generation()
            }
            None => false,
        }
    }

    pub fn seconds_remaining(&self) -> Option<u32> {
        self.countdown.as_ref().map(Countdown::seconds_remaining)
    }

    /// The automatic pick to apply when the current turn expires.
    pub fn expiry_request(&self, state: &RuntimeState) -> Option<PickRequest> {
        let participant = state.current_participant()?;
        Some(PickRequest {
            participant_id: participant.id.clone(),
            item_id: None,
            origin: PickOrigin::Timer,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::draft::roster::{Item, Participant, ParticipantStatus};
    use crate::draft::state::{DraftInfo, StoredDraft};

    fn active_state(pick_seconds: u32) -> RuntimeState {
        let participants = (0..2)
            .map(|i| Participant {
                id: format!("p{i}"),
                name: format!("P{i}"),
                pick_order: i,
                status: ParticipantStatus::Waiting,
            })
            .collect();
        let items = (0..3)
            .map(|i| Item {
                id: format!("i{i}"),
                name: format!("I{i}"),
                image_url: None,
                taken: false,
                fallback_rank: None,
            })
            .collect();
        let mut state = RuntimeState::hydrate(StoredDraft {
            draft: DraftInfo::new("d1", "Draft", pick_seconds),
            participants,
            items,
            picks: vec![],
        })
        .unwrap();
        state.activate().unwrap();
        state
    }

    #[tokio::test(start_paused = true)]
    async fn advance_rearms_under_new_generation() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut scheduler = TurnScheduler::new(TimerService::default(), tx);
        let mut state = active_state(30);
        scheduler.arm(&state);
        let old = TimerSignal::Expired {
            generation: state.generation(),
        };
        assert!(scheduler.is_current(&state, &old));

        let idx = state.fallback_index().unwrap();
        state.claim(idx, PickOrigin::Manual, chrono::Utc::now());
        let next = scheduler.advance(&mut state);
        assert!(matches!(next, Advance::Next(ref t) if t.participant_id == "p1"));
        assert!(!scheduler.is_current(&state, &old));
        assert_eq!(scheduler.seconds_remaining(), Some(30));
    }

    #[tokio::test(start_paused = true)]
    async fn untimed_draft_has_no_countdown() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut scheduler = TurnScheduler::new(TimerService::default(), tx);
        let state = active_state(0);
        scheduler.arm(&state);
        assert_eq!(scheduler.seconds_remaining(), None);
        let signal = TimerSignal::Expired {
            generation: state.generation(),
        };
        assert!(!scheduler.is_current(&state, &signal));
    }

    #[tokio::test(start_paused = true)]
    async fn last_turn_completes_and_disarms() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut scheduler = TurnScheduler::new(TimerService::default(), tx);
        let mut state = active_state(10);
        scheduler.arm(&state);
        for _ in 0..2 {
            let idx = state.fallback_index().unwrap();
            state.claim(idx, PickOrigin::Manual, chrono::Utc::now());
            scheduler.advance(&mut state);
        }
        assert_eq!(scheduler.seconds_remaining(), None);
        assert!(scheduler.expiry_request(&state).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn expiry_request_targets_current_picker() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let scheduler = TurnScheduler::new(TimerService::default(), tx);
        let state = active_state(10);
        let request = scheduler.expiry_request(&state).unwrap();
        assert_eq!(request.participant_id, "p0");
        assert_eq!(request.origin, PickOrigin::Timer);
        assert!(request.item_id.is_none());
    }
}
