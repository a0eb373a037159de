// Draft runtime state: turn order, item pool, and pick history of one draft.

use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::pick::{PickOrigin, PickRecord};
use super::roster::{Item, Participant, ParticipantStatus, Roster};
use crate::error::EngineError;
use crate::protocol::DraftEvent;

/// Lifecycle of a draft: `pending -> active -> completed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DraftStatus {
    Pending,
    Active,
    Completed,
}

impl DraftStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DraftStatus::Pending => "pending",
            DraftStatus::Active => "active",
            DraftStatus::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(DraftStatus::Pending),
            "active" => Some(DraftStatus::Active),
            "completed" => Some(DraftStatus::Completed),
            _ => None,
        }
    }
}

impl fmt::Display for DraftStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the pick order repeats across rounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderPolicy {
    /// Every round follows the pick order.
    #[default]
    Linear,
    /// Even rounds reverse the pick order.
    Snake,
}

impl OrderPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderPolicy::Linear => "linear",
            OrderPolicy::Snake => "snake",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "linear" => Some(OrderPolicy::Linear),
            "snake" => Some(OrderPolicy::Snake),
            _ => None,
        }
    }
}

/// Draft-level settings and lifecycle status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DraftInfo {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    /// Seconds each participant has to pick. Zero disables the countdown.
    pub pick_seconds: u32,
    /// Number of times every participant picks.
    pub rounds: u32,
    pub order: OrderPolicy,
    pub status: DraftStatus,
}

impl DraftInfo {
    /// A pending single-round draft with linear order.
    pub fn new(id: &str, name: &str, pick_seconds: u32) -> Self {
        DraftInfo {
            id: id.to_string(),
            name: name.to_string(),
            description: None,
            start_time: None,
            pick_seconds,
            rounds: 1,
            order: OrderPolicy::Linear,
            status: DraftStatus::Pending,
        }
    }
}

/// Everything the persistence layer holds for one draft.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredDraft {
    pub draft: DraftInfo,
    pub participants: Vec<Participant>,
    pub items: Vec<Item>,
    pub picks: Vec<PickRecord>,
}

/// Whose turn it is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnInfo {
    pub participant_id: String,
    pub participant_name: String,
    pub round: u32,
    /// 1-based number the pick made in this turn will get.
    pub pick_number: u32,
}

/// A complete point-in-time view of a draft, sent to joining observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DraftSnapshot {
    /// Sequence number of the last event this snapshot reflects.
    pub seq: u64,
    pub draft: DraftInfo,
    pub participants: Vec<Participant>,
    pub items: Vec<Item>,
    pub picks: Vec<PickRecord>,
    pub current: Option<TurnInfo>,
    pub seconds_remaining: Option<u32>,
}

impl DraftSnapshot {
    /// Fold a subsequent event into this snapshot, the way an observer
    /// rebuilds live state from `draft-state` plus the event stream.
    pub fn apply(&mut self, seq: u64, event: &DraftEvent) {
        match event {
            DraftEvent::DraftState(snapshot) | DraftEvent::DraftStarted(snapshot) => {
                *self = snapshot.clone();
            }
            DraftEvent::PickUpdate(pick)
            | DraftEvent::AutoPickTriggered(pick)
            | DraftEvent::AutoPickMade(pick) => self.apply_pick(pick),
            DraftEvent::TurnUpdate(turn) => {
                for p in &mut self.participants {
                    if p.id == turn.participant_id {
                        p.status = ParticipantStatus::Picking;
                    }
                }
                self.current = Some(turn.clone());
                self.seconds_remaining =
                    (self.draft.pick_seconds > 0).then_some(self.draft.pick_seconds);
            }
            DraftEvent::TimerUpdate { seconds_remaining } => {
                self.seconds_remaining = Some(*seconds_remaining);
            }
            DraftEvent::DraftCompleted => {
                self.draft.status = DraftStatus::Completed;
                for p in &mut self.participants {
                    p.status = ParticipantStatus::Completed;
                }
                self.current = None;
                self.seconds_remaining = None;
            }
            DraftEvent::Error { .. } | DraftEvent::LeftDraft | DraftEvent::Pong { .. } => {}
        }
        self.seq = seq;
    }

    fn apply_pick(&mut self, pick: &PickRecord) {
        if let Some(item) = self.items.iter_mut().find(|i| i.id == pick.item_id) {
            item.taken = true;
        }
        let picked = self
            .picks
            .iter()
            .filter(|p| p.participant_id == pick.participant_id)
            .count()
            + 1;
        let rounds = self.draft.rounds.max(1) as usize;
        if let Some(p) = self
            .participants
            .iter_mut()
            .find(|p| p.id == pick.participant_id)
        {
            p.status = if picked >= rounds {
                ParticipantStatus::Completed
            } else {
                ParticipantStatus::Waiting
            };
        }
        self.picks.push(pick.clone());
        self.current = None;
        self.seconds_remaining = None;
    }
}

/// One entry in the expanded pick sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TurnSlot {
    participant: usize,
    round: u32,
}

/// Authoritative in-memory state of one draft.
///
/// Owned by exactly one draft actor; every read and write of turn order,
/// taken items, and the current picker goes through it.
#[derive(Debug, Clone)]
pub struct RuntimeState {
    draft: DraftInfo,
    /// Sorted by pick order.
    participants: Vec<Participant>,
    /// In pool order.
    items: Vec<Item>,
    picks: Vec<PickRecord>,
    sequence: Vec<TurnSlot>,
    /// Index into `sequence` of the turn being played.
    turn: usize,
    /// Bumped every time a new turn starts. Timers armed for an older
    /// generation are stale.
    generation: u64,
}

impl RuntimeState {
    /// Build runtime state from a persisted draft.
    ///
    /// Participants are ordered by pick order and the pick history is
    /// replayed; taken flags are derived from the history. An active draft
    /// resumes at the first unfilled turn.
    pub fn hydrate(stored: StoredDraft) -> Result<Self, EngineError> {
        if stored.draft.status == DraftStatus::Completed {
            return Err(EngineError::invalid_state(&stored.draft.id, "draft is completed"));
        }
        let mut state = Self::replay(stored)?;

        match state.draft.status {
            DraftStatus::Pending if !state.picks.is_empty() => {
                return Err(EngineError::invalid_state(
                    &state.draft.id,
                    "pending draft already has picks",
                ));
            }
            DraftStatus::Active => {
                if state.participants.is_empty() {
                    return Err(EngineError::invalid_state(
                        &state.draft.id,
                        "active draft has no participants",
                    ));
                }
                if state.is_exhausted() {
                    return Err(EngineError::invalid_state(
                        &state.draft.id,
                        "every turn of the draft has already been played",
                    ));
                }
                state.generation = 1;
            }
            _ => {}
        }

        state.refresh_statuses();
        Ok(state)
    }

    /// Final, read-only view of a draft persisted as completed.
    pub fn completed_snapshot(stored: StoredDraft) -> Result<DraftSnapshot, EngineError> {
        if stored.draft.status != DraftStatus::Completed {
            return Err(EngineError::invalid_state(
                &stored.draft.id,
                format!("draft is {}", stored.draft.status),
            ));
        }
        let mut state = Self::replay(stored)?;
        state.refresh_statuses();
        Ok(state.snapshot(0, None))
    }

    /// Rebuild the turn sequence and replay the stored history onto it.
    ///
    /// The history must be dense (`1..=n`) and every pick must belong to the
    /// participant and round of its slot in the sequence.
    fn replay(stored: StoredDraft) -> Result<Self, EngineError> {
        let StoredDraft {
            draft,
            mut participants,
            items,
            mut picks,
        } = stored;

        participants.sort_by_key(|p| p.pick_order);
        if let Some(w) = participants
            .windows(2)
            .find(|w| w[0].pick_order == w[1].pick_order)
        {
            return Err(EngineError::invalid_state(
                &draft.id,
                format!("pick order {} is shared by two participants", w[0].pick_order),
            ));
        }
        picks.sort_by_key(|p| p.pick_number);

        let stored_taken: Vec<bool> = items.iter().map(|i| i.taken).collect();
        let mut state = RuntimeState {
            draft,
            participants,
            items,
            picks: Vec::new(),
            sequence: Vec::new(),
            turn: 0,
            generation: 0,
        };
        state.rebuild_sequence();

        for item in &mut state.items {
            item.taken = false;
        }
        for (idx, pick) in picks.into_iter().enumerate() {
            state.check_replayed(idx, &pick)?;
            match state.items.iter_mut().find(|i| i.id == pick.item_id) {
                Some(item) if !item.taken => item.taken = true,
                Some(_) => {
                    return Err(EngineError::invalid_state(
                        &state.draft.id,
                        format!("item {} was picked twice", pick.item_id),
                    ));
                }
                None => {
                    return Err(EngineError::invalid_state(
                        &state.draft.id,
                        format!(
                            "pick {} references unknown item {}",
                            pick.pick_number, pick.item_id
                        ),
                    ));
                }
            }
            state.picks.push(pick);
        }
        for (item, was_taken) in state.items.iter().zip(stored_taken) {
            if item.taken != was_taken {
                warn!(
                    "Draft {}: stored taken flag for item {} disagrees with pick history",
                    state.draft.id, item.id
                );
            }
        }
        state.turn = state.picks.len();
        Ok(state)
    }

    /// Check that the `idx`-th stored pick fills the `idx`-th turn.
    fn check_replayed(&self, idx: usize, pick: &PickRecord) -> Result<(), EngineError> {
        let expected = idx as u32 + 1;
        if pick.pick_number != expected {
            return Err(EngineError::invalid_state(
                &self.draft.id,
                format!(
                    "pick history has a gap: expected pick {expected}, found pick {}",
                    pick.pick_number
                ),
            ));
        }
        let Some(slot) = self.sequence.get(idx) else {
            return Err(EngineError::invalid_state(
                &self.draft.id,
                format!(
                    "pick {} exceeds the {} turns of the draft",
                    pick.pick_number,
                    self.sequence.len()
                ),
            ));
        };
        let owner = &self.participants[slot.participant];
        if owner.id != pick.participant_id || slot.round != pick.round {
            return Err(EngineError::invalid_state(
                &self.draft.id,
                format!(
                    "pick {} by {} in round {} does not match the turn of {} in round {}",
                    pick.pick_number, pick.participant_id, pick.round, owner.id, slot.round
                ),
            ));
        }
        Ok(())
    }

    pub fn draft(&self) -> &DraftInfo {
        &self.draft
    }

    pub fn draft_id(&self) -> &str {
        &self.draft.id
    }

    pub fn status(&self) -> DraftStatus {
        self.draft.status
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn participants(&self) -> &[Participant] {
        &self.participants
    }

    pub fn items(&self) -> &[Item] {
        &self.items
    }

    pub fn picks(&self) -> &[PickRecord] {
        &self.picks
    }

    /// Total number of turns the draft plays if the pool does not run out.
    pub fn total_turns(&self) -> usize {
        self.sequence.len()
    }

    fn current_slot(&self) -> Option<TurnSlot> {
        if self.draft.status != DraftStatus::Active {
            return None;
        }
        self.sequence.get(self.turn).copied()
    }

    /// The participant whose turn it is, if the draft is active.
    pub fn current_participant(&self) -> Option<&Participant> {
        self.current_slot().map(|s| &self.participants[s.participant])
    }

    pub fn current_turn(&self) -> Option<TurnInfo> {
        let slot = self.current_slot()?;
        let participant = &self.participants[slot.participant];
        Some(TurnInfo {
            participant_id: participant.id.clone(),
            participant_name: participant.name.clone(),
            round: slot.round,
            pick_number: self.turn as u32 + 1,
        })
    }

    pub fn find_item(&self, item_id: &str) -> Option<usize> {
        self.items.iter().position(|i| i.id == item_id)
    }

    /// Index of the untaken item with the highest fallback priority.
    pub fn fallback_index(&self) -> Option<usize> {
        self.items
            .iter()
            .enumerate()
            .filter(|(_, item)| !item.taken)
            .min_by_key(|(pos, item)| item.fallback_key(*pos))
            .map(|(pos, _)| pos)
    }

    pub fn fallback_item(&self) -> Option<&Item> {
        self.fallback_index().map(|idx| &self.items[idx])
    }

    /// Replace the participants and item pool of a pending draft.
    pub fn install_roster(&mut self, roster: Roster) -> Result<(), EngineError> {
        if self.draft.status != DraftStatus::Pending {
            return Err(EngineError::invalid_state(
                &self.draft.id,
                format!("cannot replace the roster of a {} draft", self.draft.status),
            ));
        }
        roster.validate()?;
        let Roster {
            mut participants,
            items,
        } = roster;
        participants.sort_by_key(|p| p.pick_order);
        self.participants = participants;
        self.items = items;
        self.rebuild_sequence();
        self.refresh_statuses();
        Ok(())
    }

    /// Move a pending draft to `active` and start the first turn.
    ///
    /// Returns the first turn, or `None` when there is nothing to pick and
    /// the draft completed immediately.
    pub fn activate(&mut self) -> Result<Option<TurnInfo>, EngineError> {
        if self.draft.status != DraftStatus::Pending {
            return Err(EngineError::invalid_state(
                &self.draft.id,
                format!("cannot start a {} draft", self.draft.status),
            ));
        }
        if self.participants.is_empty() {
            return Err(EngineError::invalid_state(
                &self.draft.id,
                "draft has no participants",
            ));
        }

        self.draft.status = DraftStatus::Active;
        self.turn = 0;
        self.rebuild_sequence();
        if self.is_exhausted() {
            self.draft.status = DraftStatus::Completed;
            self.refresh_statuses();
            return Ok(None);
        }
        self.generation += 1;
        self.refresh_statuses();
        Ok(self.current_turn())
    }

    /// Mark an item taken by the current picker and append the pick.
    ///
    /// Callers validate first (see `engine::committer`); this only applies.
    pub(crate) fn claim(
        &mut self,
        item_idx: usize,
        origin: PickOrigin,
        now: DateTime<Utc>,
    ) -> PickRecord {
        let slot = self.sequence[self.turn];
        let participant = &self.participants[slot.participant];
        let item = &mut self.items[item_idx];
        item.taken = true;

        let pick = PickRecord {
            draft_id: self.draft.id.clone(),
            pick_number: self.picks.len() as u32 + 1,
            participant_id: participant.id.clone(),
            participant_name: participant.name.clone(),
            item_id: item.id.clone(),
            item_name: item.name.clone(),
            round: slot.round,
            timestamp: now,
            automatic: origin.is_automatic(),
            origin,
        };
        self.picks.push(pick.clone());
        pick
    }

    /// Move past the filled turn. Returns the next turn, or `None` once the
    /// draft has completed.
    pub fn advance(&mut self) -> Option<TurnInfo> {
        if self.draft.status != DraftStatus::Active {
            return None;
        }
        self.turn += 1;
        if self.is_exhausted() {
            self.draft.status = DraftStatus::Completed;
            self.refresh_statuses();
            return None;
        }
        self.generation += 1;
        self.refresh_statuses();
        self.current_turn()
    }

    /// True when every turn has been played or the pool is empty.
    fn is_exhausted(&self) -> bool {
        self.turn >= self.sequence.len() || self.items.iter().all(|i| i.taken)
    }

    pub fn snapshot(&self, seq: u64, seconds_remaining: Option<u32>) -> DraftSnapshot {
        DraftSnapshot {
            seq,
            draft: self.draft.clone(),
            participants: self.participants.clone(),
            items: self.items.clone(),
            picks: self.picks.clone(),
            current: self.current_turn(),
            seconds_remaining: seconds_remaining.filter(|_| self.current_slot().is_some()),
        }
    }

    fn rebuild_sequence(&mut self) {
        let count = self.participants.len();
        let mut sequence = Vec::with_capacity(count * self.draft.rounds.max(1) as usize);
        for round in 1..=self.draft.rounds.max(1) {
            let mut order: Vec<usize> = (0..count).collect();
            if self.draft.order == OrderPolicy::Snake && round % 2 == 0 {
                order.reverse();
            }
            sequence.extend(order.into_iter().map(|participant| TurnSlot { participant, round }));
        }
        self.sequence = sequence;
    }

    fn refresh_statuses(&mut self) {
        let status = self.draft.status;
        let current = self.current_slot().map(|s| s.participant);
        let remaining: HashSet<usize> = match status {
            DraftStatus::Active => self.sequence[self.turn.min(self.sequence.len())..]
                .iter()
                .map(|s| s.participant)
                .collect(),
            _ => HashSet::new(),
        };

        for (idx, p) in self.participants.iter_mut().enumerate() {
            p.status = match status {
                DraftStatus::Pending => ParticipantStatus::Waiting,
                DraftStatus::Completed => ParticipantStatus::Completed,
                DraftStatus::Active if current == Some(idx) => ParticipantStatus::Picking,
                DraftStatus::Active if remaining.contains(&idx) => ParticipantStatus::Waiting,
                DraftStatus::Active => ParticipantStatus::Completed,
            };
        }
    }

    /// Verify the draft invariants: one picker while active, taken items
    /// matching the pick history, and a dense pick history.
    pub fn check_invariants(&self) -> Result<(), String> {
        let picking = self
            .participants
            .iter()
            .filter(|p| p.status == ParticipantStatus::Picking)
            .count();
        let expected = usize::from(self.draft.status == DraftStatus::Active);
        if picking != expected {
            return Err(format!(
                "{picking} participants picking in a {} draft",
                self.draft.status
            ));
        }

        let mut picked = HashSet::new();
        for (idx, pick) in self.picks.iter().enumerate() {
            if pick.pick_number as usize != idx + 1 {
                return Err(format!("pick {} out of sequence", pick.pick_number));
            }
            if !picked.insert(pick.item_id.as_str()) {
                return Err(format!("item {} picked twice", pick.item_id));
            }
        }
        let taken: HashSet<&str> = self
            .items
            .iter()
            .filter(|i| i.taken)
            .map(|i| i.id.as_str())
            .collect();
        if taken != picked {
            return Err("taken items disagree with pick history".to_string());
        }
        if self.draft.status == DraftStatus::Active && self.picks.len() != self.turn {
            return Err(format!(
                "{} picks recorded but turn {} is being played",
                self.picks.len(),
                self.turn + 1
            ));
        }
        Ok(())
    }
}
