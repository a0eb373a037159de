// Participants, items, and the roster supplied when a draft starts.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Turn status of a single participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantStatus {
    Waiting,
    Picking,
    Completed,
}

impl ParticipantStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParticipantStatus::Waiting => "waiting",
            ParticipantStatus::Picking => "picking",
            ParticipantStatus::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "waiting" => Some(ParticipantStatus::Waiting),
            "picking" => Some(ParticipantStatus::Picking),
            "completed" => Some(ParticipantStatus::Completed),
            _ => None,
        }
    }
}

impl fmt::Display for ParticipantStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A participant taking turns in a draft.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub id: String,
    pub name: String,
    /// Position in the pick order. Unique per draft; only the relative order
    /// matters.
    pub pick_order: i64,
    pub status: ParticipantStatus,
}

/// An item in the shared pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    pub taken: bool,
    /// Rank used for automatic picks. Lower ranks are chosen first; unranked
    /// items come after every ranked item.
    #[serde(default)]
    pub fallback_rank: Option<i64>,
}

impl Item {
    /// Sort key for automatic selection: ranked items by rank, then unranked
    /// items. Ties fall back to pool position, which callers supply.
    pub fn fallback_key(&self, position: usize) -> (bool, i64, usize) {
        match self.fallback_rank {
            Some(rank) => (false, rank, position),
            None => (true, 0, position),
        }
    }
}

/// The validated participant list and item pool of one draft.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Roster {
    pub participants: Vec<Participant>,
    pub items: Vec<Item>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RosterError {
    #[error("a draft needs at least one participant")]
    NoParticipants,

    #[error("participant `{0}` appears more than once")]
    DuplicateParticipant(String),

    #[error("pick order {0} is used by more than one participant")]
    DuplicatePickOrder(i64),

    #[error("item `{0}` appears more than once")]
    DuplicateItem(String),
}

/// A participant as supplied by the control plane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewParticipant {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    /// Defaults to the participant's position in the list.
    #[serde(default)]
    pub pick_order: Option<i64>,
}

/// An item as supplied by the control plane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewItem {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub fallback_rank: Option<i64>,
}

/// Ordered participants and item pool passed along with `start-draft`,
/// replacing whatever roster was stored for the draft.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DraftSetup {
    pub participants: Vec<NewParticipant>,
    #[serde(default)]
    pub items: Vec<NewItem>,
}

impl DraftSetup {
    /// Validate the setup and turn it into a roster with every participant
    /// waiting and every item untaken.
    pub fn into_roster(self) -> Result<Roster, RosterError> {
        let participants = self
            .participants
            .into_iter()
            .enumerate()
            .map(|(idx, p)| Participant {
                name: p.name.unwrap_or_else(|| p.id.clone()),
                pick_order: p.pick_order.unwrap_or(idx as i64),
                id: p.id,
                status: ParticipantStatus::Waiting,
            })
            .collect();
        let items = self
            .items
            .into_iter()
            .map(|i| Item {
                name: i.name.unwrap_or_else(|| i.id.clone()),
                id: i.id,
                image_url: i.image_url,
                taken: false,
                fallback_rank: i.fallback_rank,
            })
            .collect();

        let roster = Roster {
            participants,
            items,
        };
        roster.validate()?;
        Ok(roster)
    }
}

impl Roster {
    /// Check that participant ids, pick orders, and item ids are unique and
    /// that there is someone to pick.
    pub fn validate(&self) -> Result<(), RosterError> {
        if self.participants.is_empty() {
            return Err(RosterError::NoParticipants);
        }

        let mut ids = HashSet::new();
        let mut orders = HashSet::new();
        for p in &self.participants {
            if !ids.insert(p.id.as_str()) {
                return Err(RosterError::DuplicateParticipant(p.id.clone()));
            }
            if !orders.insert(p.pick_order) {
                return Err(RosterError::DuplicatePickOrder(p.pick_order));
            }
        }

        let mut item_ids = HashSet::new();
        for item in &self.items {
            if !item_ids.insert(item.id.as_str()) {
                return Err(RosterError::DuplicateItem(item.id.clone()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup(ids: &[&str], items: &[&str]) -> DraftSetup {
        DraftSetup {
            participants: ids
                .iter()
                .map(|id| NewParticipant {
                    id: id.to_string(),
                    name: None,
                    pick_order: None,
                })
                .collect(),
            items: items
                .iter()
                .map(|id| NewItem {
                    id: id.to_string(),
                    name: None,
                    image_url: None,
                    fallback_rank: None,
                })
                .collect(),
        }
    }

    #[test]
    fn into_roster_defaults_names_and_pick_order() {
        let roster = setup(&["a", "b"], &["x"]).into_roster().unwrap();
        assert_eq!(roster.participants[0].name, "a");
        assert_eq!(roster.participants[0].pick_order, 0);
        assert_eq!(roster.participants[1].pick_order, 1);
        assert!(roster
            .participants
            .iter()
            .all(|p| p.status == ParticipantStatus::Waiting));
        assert_eq!(roster.items[0].name, "x");
        assert!(!roster.items[0].taken);
    }

    #[test]
    fn into_roster_rejects_empty_participants() {
        let err = setup(&[], &["x"]).into_roster().unwrap_err();
        assert_eq!(err, RosterError::NoParticipants);
    }

    #[test]
    fn into_roster_rejects_duplicates() {
        let err = setup(&["a", "a"], &[]).into_roster().unwrap_err();
        assert_eq!(err, RosterError::DuplicateParticipant("a".into()));

        let err = setup(&["a"], &["x", "x"]).into_roster().unwrap_err();
        assert_eq!(err, RosterError::DuplicateItem("x".into()));

        let mut s = setup(&["a", "b"], &[]);
        s.participants[0].pick_order = Some(3);
        s.participants[1].pick_order = Some(3);
        assert_eq!(
            s.into_roster().unwrap_err(),
            RosterError::DuplicatePickOrder(3)
        );
    }

    #[test]
    fn fallback_key_puts_unranked_last() {
        let ranked = Item {
            id: "r".into(),
            name: "r".into(),
            image_url: None,
            taken: false,
            fallback_rank: Some(10),
        };
        let unranked = Item {
            fallback_rank: None,
            ..ranked.clone()
        };
        assert!(ranked.fallback_key(5) < unranked.fallback_key(0));
    }

    #[test]
    fn status_parse_round_trips_strings() {
        for status in [
            ParticipantStatus::Waiting,
            ParticipantStatus::Picking,
            ParticipantStatus::Completed,
        ] {
            assert_eq!(ParticipantStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(ParticipantStatus::parse("idle"), None);
    }
}
