// WebSocket wire protocol: `{"event": ..., "data": {...}}` JSON messages.

use serde::{Deserialize, Serialize};

use crate::draft::pick::PickRecord;
use crate::draft::roster::DraftSetup;
use crate::draft::state::{DraftSnapshot, TurnInfo};
use crate::error::EngineError;

/// Messages sent by clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ClientMessage {
    /// Subscribe to a draft. Answered with `draft-state`, then live events.
    JoinDraft { draft_id: String },
    LeaveDraft { draft_id: String },
    PickMade {
        draft_id: String,
        participant_id: String,
        item_id: String,
    },
    /// Control plane: activate a pending draft, optionally replacing its
    /// roster first.
    StartDraft {
        draft_id: String,
        #[serde(default)]
        setup: Option<DraftSetup>,
    },
    /// Control plane: pick for the current participant. Without an item id
    /// the fallback item is taken.
    ForceAutoPick {
        draft_id: String,
        participant_id: String,
        #[serde(default)]
        item_id: Option<String>,
    },
    /// Liveness check, answered with `pong`.
    Ping,
}

impl ClientMessage {
    pub fn draft_id(&self) -> &str {
        match self {
            ClientMessage::JoinDraft { draft_id }
            | ClientMessage::LeaveDraft { draft_id }
            | ClientMessage::PickMade { draft_id, .. }
            | ClientMessage::StartDraft { draft_id, .. }
            | ClientMessage::ForceAutoPick { draft_id, .. } => draft_id,
            ClientMessage::Ping => "",
        }
    }
}

/// Events delivered to clients. Everything except `error`, `left-draft`, and `pong`
/// is published on the draft's event bus and carries a sequence number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum DraftEvent {
    DraftState(DraftSnapshot),
    DraftStarted(DraftSnapshot),
    PickUpdate(PickRecord),
    TimerUpdate { seconds_remaining: u32 },
    TurnUpdate(TurnInfo),
    AutoPickTriggered(PickRecord),
    AutoPickMade(PickRecord),
    DraftCompleted,
    Error { code: String, message: String },
    LeftDraft,
    /// Reply to `ping`.
    Pong { resident_drafts: usize },
}

impl DraftEvent {
    pub fn error(err: &EngineError) -> Self {
        DraftEvent::Error {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DraftEvent::DraftState(_) => "draft-state",
            DraftEvent::DraftStarted(_) => "draft-started",
            DraftEvent::PickUpdate(_) => "pick-update",
            DraftEvent::TimerUpdate { .. } => "timer-update",
            DraftEvent::TurnUpdate(_) => "turn-update",
            DraftEvent::AutoPickTriggered(_) => "auto-pick-triggered",
            DraftEvent::AutoPickMade(_) => "auto-pick-made",
            DraftEvent::DraftCompleted => "draft-completed",
            DraftEvent::Error { .. } => "error",
            DraftEvent::LeftDraft => "left-draft",
            DraftEvent::Pong { .. } => "pong",
        }
    }
}

/// Envelope for every server message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    pub draft_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,
    #[serde(flatten)]
    pub event: DraftEvent,
}

impl ServerMessage {
    pub fn sequenced(draft_id: &str, seq: u64, event: DraftEvent) -> Self {
        ServerMessage {
            draft_id: draft_id.to_string(),
            seq: Some(seq),
            event,
        }
    }

    pub fn direct(draft_id: &str, event: DraftEvent) -> Self {
        ServerMessage {
            draft_id: draft_id.to_string(),
            seq: None,
            event,
        }
    }

    pub fn to_json(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Parse a raw text frame from a client.
pub fn parse_client_message(text: &str) -> Result<ClientMessage, EngineError> {
    serde_json::from_str(text).map_err(|e| EngineError::BadRequest(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PickError;
    use serde_json::json;

    #[test]
    fn parse_pick_made() {
        let msg = parse_client_message(
            r#"{"event":"pick-made","data":{"draftId":"d1","participantId":"a","itemId":"x"}}"#,
        )
        .unwrap();
        assert_eq!(
            msg,
            ClientMessage::PickMade {
                draft_id: "d1".into(),
                participant_id: "a".into(),
                item_id: "x".into(),
            }
        );
        assert_eq!(msg.draft_id(), "d1");
    }

    #[test]
    fn parse_start_draft_with_and_without_setup() {
        let bare =
            parse_client_message(r#"{"event":"start-draft","data":{"draftId":"d1"}}"#).unwrap();
        assert_eq!(
            bare,
            ClientMessage::StartDraft {
                draft_id: "d1".into(),
                setup: None
            }
        );

        let with_setup = parse_client_message(
            r#"{"event":"start-draft","data":{"draftId":"d1","setup":{
                "participants":[{"id":"a","name":"Ann"},{"id":"b","pickOrder":9}],
                "items":[{"id":"x","fallbackRank":1}]}}}"#,
        )
        .unwrap();
        match with_setup {
            ClientMessage::StartDraft {
                setup: Some(setup), ..
            } => {
                assert_eq!(setup.participants.len(), 2);
                assert_eq!(setup.participants[1].pick_order, Some(9));
                assert_eq!(setup.items[0].fallback_rank, Some(1));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn parse_force_auto_pick_item_is_optional() {
        let msg = parse_client_message(
            r#"{"event":"force-auto-pick","data":{"draftId":"d1","participantId":"a"}}"#,
        )
        .unwrap();
        assert_eq!(
            msg,
            ClientMessage::ForceAutoPick {
                draft_id: "d1".into(),
                participant_id: "a".into(),
                item_id: None,
            }
        );
    }

    #[test]
    fn ping_needs_no_data() {
        let msg = parse_client_message(r#"{"event":"ping"}"#).unwrap();
        assert_eq!(msg, ClientMessage::Ping);
        assert_eq!(msg.draft_id(), "");

        let pong = ServerMessage::direct("", DraftEvent::Pong { resident_drafts: 2 });
        let value = serde_json::to_value(&pong).unwrap();
        assert_eq!(
            value,
            json!({"draftId": "", "event": "pong", "data": {"residentDrafts": 2}})
        );
    }

    #[test]
    fn malformed_messages_are_bad_requests() {
        for text in [
            "not json",
            r#"{"event":"pick-made","data":{"draftId":"d1"}}"#,
            r#"{"event":"dance","data":{}}"#,
            r#"{"data":{"draftId":"d1"}}"#,
        ] {
            let err = parse_client_message(text).unwrap_err();
            assert_eq!(err.code(), "bad-request", "{text}");
        }
    }

    #[test]
    fn server_envelope_carries_draft_id_and_seq() {
        let msg = ServerMessage::sequenced(
            "d1",
            7,
            DraftEvent::TimerUpdate {
                seconds_remaining: 12,
            },
        );
        let value: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "draftId": "d1",
                "seq": 7,
                "event": "timer-update",
                "data": {"secondsRemaining": 12}
            })
        );
    }

    #[test]
    fn unit_events_have_no_data_and_errors_have_no_seq() {
        let done = ServerMessage::sequenced("d1", 3, DraftEvent::DraftCompleted);
        let value = serde_json::to_value(&done).unwrap();
        assert_eq!(value["event"], "draft-completed");
        assert!(value.get("data").is_none());

        let err = EngineError::from(PickError::ItemUnavailable {
            item_id: "x".into(),
        });
        let msg = ServerMessage::direct("d1", DraftEvent::error(&err));
        let value = serde_json::to_value(&msg).unwrap();
        assert!(value.get("seq").is_none());
        assert_eq!(value["data"]["code"], "item-unavailable");
    }

    #[test]
    fn server_message_parses_back() {
        let turn = TurnInfo {
            participant_id: "b".into(),
            participant_name: "Bea".into(),
            round: 1,
            pick_number: 2,
        };
        let msg = ServerMessage::sequenced("d1", 4, DraftEvent::TurnUpdate(turn));
        let text = msg.to_json().unwrap();
        assert!(text.contains(r#""participantName":"Bea""#));
        let parsed: ServerMessage = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, msg);
        assert_eq!(parsed.event.name(), "turn-update");
    }
}
