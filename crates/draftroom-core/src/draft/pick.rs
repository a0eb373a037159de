// Committed pick records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a commit came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PickOrigin {
    /// The participant chose the item themselves.
    Manual,
    /// The turn timer expired and the fallback item was taken.
    Timer,
    /// An administrator forced an automatic pick.
    Admin,
}

impl PickOrigin {
    pub fn is_automatic(&self) -> bool {
        !matches!(self, PickOrigin::Manual)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PickOrigin::Manual => "manual",
            PickOrigin::Timer => "timer",
            PickOrigin::Admin => "admin",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "manual" => Some(PickOrigin::Manual),
            "timer" => Some(PickOrigin::Timer),
            "admin" => Some(PickOrigin::Admin),
            _ => None,
        }
    }
}

impl fmt::Display for PickOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One committed pick. Append-only: the picks of a draft are its full
/// history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PickRecord {
    pub draft_id: String,
    /// 1-based position in the draft's pick history.
    pub pick_number: u32,
    pub participant_id: String,
    pub participant_name: String,
    pub item_id: String,
    pub item_name: String,
    /// 1-based round the pick was made in.
    pub round: u32,
    pub timestamp: DateTime<Utc>,
    pub automatic: bool,
    pub origin: PickOrigin,
}
