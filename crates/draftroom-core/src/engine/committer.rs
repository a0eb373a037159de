// Pick validation and application.

use chrono::{DateTime, Utc};

use crate::draft::pick::{PickOrigin, PickRecord};
use crate::draft::state::{DraftStatus, RuntimeState};
use crate::error::PickError;

/// A claim on an item for the current turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PickRequest {
    pub participant_id: String,
    /// `None` takes the fallback item.
    pub item_id: Option<String>,
    pub origin: PickOrigin,
}

impl PickRequest {
    pub fn manual(participant_id: &str, item_id: &str) -> Self {
        PickRequest {
            participant_id: participant_id.to_string(),
            item_id: Some(item_id.to_string()),
            origin: PickOrigin::Manual,
        }
    }

    pub fn admin(participant_id: &str, item_id: Option<&str>) -> Self {
        PickRequest {
            participant_id: participant_id.to_string(),
            item_id: item_id.map(str::to_string),
            origin: PickOrigin::Admin,
        }
    }
}

/// Validate `request` against the current turn and, if it holds, take the
/// item and append the pick. On error nothing changed.
///
/// Checks run in a fixed order: the draft is active, the caller holds the
/// turn (timer picks always act for the current picker), the item exists
/// and is untaken.
pub fn commit(
    state: &mut RuntimeState,
    request: &PickRequest,
    now: DateTime<Utc>,
) -> Result<PickRecord, PickError> {
    let not_active = || PickError::DraftNotActive {
        draft_id: state.draft_id().to_string(),
    };
    if state.status() != DraftStatus::Active {
        return Err(not_active());
    }
    let current = state.current_participant().ok_or_else(not_active)?;

    if request.origin != PickOrigin::Timer && current.id != request.participant_id {
        return Err(PickError::NotYourTurn {
            participant_id: request.participant_id.clone(),
        });
    }

    let item_idx = match &request.item_id {
        Some(item_id) => state
            .find_item(item_id)
            .filter(|&idx| !state.items()[idx].taken)
            .ok_or_else(|| PickError::ItemUnavailable {
                item_id: item_id.clone(),
            })?,
        None => state.fallback_index().ok_or_else(|| PickError::ItemUnavailable {
            item_id: "fallback".to_string(),
        })?,
    };

    Ok(state.claim(item_idx, request.origin, now))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::draft::roster::{Item, Participant, ParticipantStatus};
    use crate::draft::state::{DraftInfo, StoredDraft};

    fn state(active: bool) -> RuntimeState {
        let participants = ["a", "b"]
            .iter()
            .enumerate()
            .map(|(i, id)| Participant {
                id: id.to_string(),
                name: id.to_string(),
                pick_order: i as i64,
                status: ParticipantStatus::Waiting,
            })
            .collect();
        let items = [("x", Some(2)), ("y", Some(1)), ("z", None)]
            .iter()
            .map(|(id, rank)| Item {
                id: id.to_string(),
                name: id.to_string(),
                image_url: None,
                taken: false,
                fallback_rank: *rank,
            })
            .collect();
        let mut state = RuntimeState::hydrate(StoredDraft {
            draft: DraftInfo::new("d1", "Draft", 30),
            participants,
            items,
            picks: vec![],
        })
        .unwrap();
        if active {
            state.activate().unwrap();
        }
        state
    }

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    #[test]
    fn pending_draft_rejects_picks() {
        let mut s = state(false);
        let err = commit(&mut s, &PickRequest::manual("a", "x"), now()).unwrap_err();
        assert_eq!(err.code(), "draft-not-active");
    }

    #[test]
    fn not_active_is_checked_before_turn_and_item() {
        let mut s = state(false);
        let err = commit(&mut s, &PickRequest::manual("b", "nope"), now()).unwrap_err();
        assert!(matches!(err, PickError::DraftNotActive { .. }));
    }

    #[test]
    fn wrong_participant_is_rejected_before_item_check() {
        let mut s = state(true);
        let err = commit(&mut s, &PickRequest::manual("b", "nope"), now()).unwrap_err();
        assert_eq!(
            err,
            PickError::NotYourTurn {
                participant_id: "b".into()
            }
        );
        assert!(s.picks().is_empty());
    }

    #[test]
    fn unknown_or_taken_items_are_unavailable() {
        let mut s = state(true);
        let err = commit(&mut s, &PickRequest::manual("a", "nope"), now()).unwrap_err();
        assert!(matches!(err, PickError::ItemUnavailable { .. }));

        commit(&mut s, &PickRequest::manual("a", "x"), now()).unwrap();
        s.advance();
        let err = commit(&mut s, &PickRequest::manual("b", "x"), now()).unwrap_err();
        assert_eq!(
            err,
            PickError::ItemUnavailable {
                item_id: "x".into()
            }
        );
    }

    #[test]
    fn manual_commit_records_pick() {
        let mut s = state(true);
        let pick = commit(&mut s, &PickRequest::manual("a", "z"), now()).unwrap();
        assert_eq!(pick.pick_number, 1);
        assert_eq!(pick.round, 1);
        assert!(!pick.automatic);
        assert_eq!(pick.origin, PickOrigin::Manual);
        assert!(s.items()[2].taken);
    }

    #[test]
    fn timer_pick_takes_fallback_for_current_picker() {
        let mut s = state(true);
        let request = PickRequest {
            participant_id: String::new(),
            item_id: None,
            origin: PickOrigin::Timer,
        };
        let pick = commit(&mut s, &request, now()).unwrap();
        assert_eq!(pick.participant_id, "a");
        assert_eq!(pick.item_id, "y");
        assert!(pick.automatic);
    }

    #[test]
    fn admin_pick_is_turn_checked() {
        let mut s = state(true);
        let err = commit(&mut s, &PickRequest::admin("b", None), now()).unwrap_err();
        assert!(matches!(err, PickError::NotYourTurn { .. }));

        let pick = commit(&mut s, &PickRequest::admin("a", Some("x")), now()).unwrap();
        assert_eq!(pick.item_id, "x");
        assert_eq!(pick.origin, PickOrigin::Admin);
        assert!(pick.automatic);
    }
}
