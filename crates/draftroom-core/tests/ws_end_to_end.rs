// End-to-end tests over a real WebSocket connection.
//
// Each test binds the server on a loopback port backed by an in-memory
// SQLite database, then talks to it with tokio-tungstenite clients.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use draftroom_core::db::Database;
use draftroom_core::draft::pick::PickOrigin;
use draftroom_core::draft::roster::{Item, Participant, ParticipantStatus};
use draftroom_core::draft::state::{DraftInfo, DraftStatus};
use draftroom_core::persistence::SqliteGateway;
use draftroom_core::protocol::{DraftEvent, ServerMessage};
use draftroom_core::{ws_server, DraftEngine, EngineSettings};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

// ===========================================================================
// Test helpers
// ===========================================================================

fn seeded_db() -> Arc<Database> {
    let db = Database::open(":memory:").unwrap();
    db.create_draft(&DraftInfo::new("d1", "Loopback Draft", 30)).unwrap();
    for (order, id) in ["A", "B"].iter().enumerate() {
        db.add_participant(
            "d1",
            &Participant {
                id: id.to_string(),
                name: format!("Player {id}"),
                pick_order: order as i64 + 1,
                status: ParticipantStatus::Waiting,
            },
        )
        .unwrap();
    }
    for (rank, id) in ["x", "y"].iter().enumerate() {
        db.add_item(
            "d1",
            &Item {
                id: id.to_string(),
                name: format!("Item {id}"),
                image_url: None,
                taken: false,
                fallback_rank: Some(rank as i64 + 1),
            },
        )
        .unwrap();
    }
    Arc::new(db)
}

/// Start a server on an ephemeral port and return its address.
async fn start_server(db: Arc<Database>) -> (String, DraftEngine) {
    let engine = DraftEngine::new(
        Arc::new(SqliteGateway::new(db)),
        EngineSettings::default(),
    );
    let listener = ws_server::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let server_engine = engine.clone();
    tokio::spawn(async move {
        let _ = ws_server::run(listener, server_engine).await;
    });
    (addr, engine)
}

async fn connect(addr: &str) -> Client {
    let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}"))
        .await
        .unwrap();
    ws
}

async fn send(ws: &mut Client, json: &str) {
    ws.send(Message::Text(json.into())).await.unwrap();
}

/// Next server message other than a timer tick.
async fn recv(ws: &mut Client) -> ServerMessage {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for a server message")
            .expect("connection closed")
            .unwrap();
        let Message::Text(text) = frame else {
            continue;
        };
        let msg: ServerMessage = serde_json::from_str(text.as_str()).unwrap();
        if !matches!(msg.event, DraftEvent::TimerUpdate { .. }) {
            return msg;
        }
    }
}

const JOIN: &str = r#"{"event":"join-draft","data":{"draftId":"d1"}}"#;
const START: &str = r#"{"event":"start-draft","data":{"draftId":"d1"}}"#;

fn pick(participant: &str, item: &str) -> String {
    format!(
        r#"{{"event":"pick-made","data":{{"draftId":"d1","participantId":"{participant}","itemId":"{item}"}}}}"#
    )
}

// ===========================================================================
// Tests
// ===========================================================================

#[tokio::test]
async fn two_clients_follow_a_draft_to_completion() {
    let db = seeded_db();
    let (addr, _engine) = start_server(db.clone()).await;

    let mut host = connect(&addr).await;
    send(&mut host, JOIN).await;
    let state = recv(&mut host).await;
    assert_eq!(state.seq, Some(0));
    match state.event {
        DraftEvent::DraftState(snapshot) => {
            assert_eq!(snapshot.draft.status, DraftStatus::Pending);
            assert_eq!(snapshot.participants.len(), 2);
        }
        other => panic!("expected draft-state, got {other:?}"),
    }

    send(&mut host, START).await;
    let started = recv(&mut host).await;
    assert_eq!(started.seq, Some(1));
    assert!(matches!(started.event, DraftEvent::DraftStarted(_)));

    // A late joiner gets the active state and then the live stream.
    let mut guest = connect(&addr).await;
    send(&mut guest, JOIN).await;
    let joined = recv(&mut guest).await;
    let late_seq = joined.seq.unwrap();
    match joined.event {
        DraftEvent::DraftState(snapshot) => {
            assert_eq!(snapshot.draft.status, DraftStatus::Active);
            assert_eq!(snapshot.current.unwrap().participant_id, "A");
        }
        other => panic!("expected draft-state, got {other:?}"),
    }

    send(&mut host, &pick("A", "x")).await;
    for ws in [&mut host, &mut guest] {
        let update = recv(ws).await;
        assert!(update.seq.unwrap() > late_seq);
        match update.event {
            DraftEvent::PickUpdate(p) => {
                assert_eq!((p.participant_id.as_str(), p.item_id.as_str()), ("A", "x"))
            }
            other => panic!("expected pick-update, got {other:?}"),
        }
        match recv(ws).await.event {
            DraftEvent::TurnUpdate(turn) => assert_eq!(turn.participant_id, "B"),
            other => panic!("expected turn-update, got {other:?}"),
        }
    }

    // A rejected pick is reported to the sender only.
    send(&mut guest, &pick("B", "x")).await;
    let rejected = recv(&mut guest).await;
    assert_eq!(rejected.seq, None);
    match rejected.event {
        DraftEvent::Error { code, .. } => assert_eq!(code, "item-unavailable"),
        other => panic!("expected error, got {other:?}"),
    }

    send(&mut guest, &pick("B", "y")).await;
    for ws in [&mut guest, &mut host] {
        assert!(matches!(recv(ws).await.event, DraftEvent::PickUpdate(_)));
        assert_eq!(recv(ws).await.event, DraftEvent::DraftCompleted);
    }

    // Give the writer a moment to flush, then check what was stored.
    let mut stored = None;
    for _ in 0..50 {
        if db.draft_status("d1").unwrap() == Some(DraftStatus::Completed) {
            stored = Some(db.load_picks("d1").unwrap());
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let picks = stored.expect("draft was never persisted as completed");
    let rows: Vec<(&str, &str, PickOrigin)> = picks
        .iter()
        .map(|p| (p.participant_id.as_str(), p.item_id.as_str(), p.origin))
        .collect();
    assert_eq!(
        rows,
        vec![("A", "x", PickOrigin::Manual), ("B", "y", PickOrigin::Manual)]
    );
}

#[tokio::test]
async fn unknown_draft_and_bad_frames_get_errors() {
    let (addr, engine) = start_server(seeded_db()).await;
    let mut ws = connect(&addr).await;

    send(&mut ws, r#"{"event":"join-draft","data":{"draftId":"ghost"}}"#).await;
    let msg = recv(&mut ws).await;
    assert_eq!(msg.draft_id, "ghost");
    match msg.event {
        DraftEvent::Error { code, .. } => assert_eq!(code, "not-found"),
        other => panic!("expected error, got {other:?}"),
    }

    send(&mut ws, r#"{"event":"teleport","data":{}}"#).await;
    match recv(&mut ws).await.event {
        DraftEvent::Error { code, .. } => assert_eq!(code, "bad-request"),
        other => panic!("expected error, got {other:?}"),
    }

    assert!(engine.resident_drafts().is_empty());
}

#[tokio::test]
async fn disconnect_unsubscribes_without_stopping_the_draft() {
    let (addr, engine) = start_server(seeded_db()).await;

    let mut leaving = connect(&addr).await;
    send(&mut leaving, JOIN).await;
    recv(&mut leaving).await;
    send(&mut leaving, START).await;
    recv(&mut leaving).await;
    leaving.close(None).await.unwrap();
    drop(leaving);

    let mut staying = connect(&addr).await;
    send(&mut staying, JOIN).await;
    recv(&mut staying).await;
    send(&mut staying, &pick("A", "y")).await;
    assert!(matches!(recv(&mut staying).await.event, DraftEvent::PickUpdate(_)));

    let snapshot = engine.snapshot("d1").await.unwrap();
    assert_eq!(snapshot.draft.status, DraftStatus::Active);
    assert_eq!(snapshot.picks.len(), 1);
}
