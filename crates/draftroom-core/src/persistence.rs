// Persistence gateway: durable record of drafts, written behind the live state.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::db::Database;
use crate::draft::pick::PickRecord;
use crate::draft::roster::{ParticipantStatus, Roster};
use crate::draft::state::{DraftStatus, RuntimeState, StoredDraft};

/// New turn status of one participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParticipantUpdate {
    pub participant_id: String,
    pub status: ParticipantStatus,
}

/// Current statuses of every participant in `state`.
pub fn participant_updates(state: &RuntimeState) -> Vec<ParticipantUpdate> {
    state
        .participants()
        .iter()
        .map(|p| ParticipantUpdate {
            participant_id: p.id.clone(),
            status: p.status,
        })
        .collect()
}

/// One committed change, applied by the gateway as a single transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DraftChange {
    /// The draft left `pending`. `roster` is set when the start request
    /// replaced the stored participants and items.
    Activated {
        draft_id: String,
        roster: Option<Roster>,
        participants: Vec<ParticipantUpdate>,
        status: DraftStatus,
    },
    /// A pick was committed. `status` is the draft status after the pick,
    /// so the final pick also records completion.
    PickCommitted {
        pick: PickRecord,
        participants: Vec<ParticipantUpdate>,
        status: DraftStatus,
    },
}

impl DraftChange {
    pub fn draft_id(&self) -> &str {
        match self {
            DraftChange::Activated { draft_id, .. } => draft_id,
            DraftChange::PickCommitted { pick, .. } => &pick.draft_id,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            DraftChange::Activated { status, .. } => format!("activation ({status})"),
            DraftChange::PickCommitted { pick, .. } => {
                format!("pick #{} ({} -> {})", pick.pick_number, pick.participant_id, pick.item_id)
            }
        }
    }
}

/// Storage seen by the engine: the initial state of a draft is read from it
/// and committed changes are appended to it.
#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    /// Read a draft with its participants, items, and picks. `None` when no
    /// such draft exists.
    async fn load_draft(&self, draft_id: &str) -> Result<Option<StoredDraft>>;

    /// Apply one change atomically. Re-applying a pick already stored is a
    /// no-op.
    async fn apply(&self, change: &DraftChange) -> Result<()>;
}

/// Gateway over the SQLite [`Database`]. Calls run on the blocking pool.
#[derive(Clone)]
pub struct SqliteGateway {
    db: Arc<Database>,
}

impl SqliteGateway {
    pub fn new(db: Arc<Database>) -> Self {
        SqliteGateway { db }
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }
}

#[async_trait]
impl PersistenceGateway for SqliteGateway {
    async fn load_draft(&self, draft_id: &str) -> Result<Option<StoredDraft>> {
        let db = Arc::clone(&self.db);
        let draft_id = draft_id.to_string();
        tokio::task::spawn_blocking(move || db.load_draft(&draft_id))
            .await
            .context("database task panicked")?
    }

    async fn apply(&self, change: &DraftChange) -> Result<()> {
        let db = Arc::clone(&self.db);
        let change = change.clone();
        tokio::task::spawn_blocking(move || db.apply_change(&change))
            .await
            .context("database task panicked")?
    }
}

/// Exponential backoff for persistence writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// Delay before retrying after the given (1-based) failed attempt.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 5,
            base_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(5),
        }
    }
}

/// Apply `change`, retrying with backoff. Returns `false` once every attempt
/// failed; the failure is logged as an operational alert.
pub async fn write_with_retry(
    gateway: &dyn PersistenceGateway,
    change: &DraftChange,
    policy: RetryPolicy,
) -> bool {
    let mut attempt = 1;
    loop {
        match gateway.apply(change).await {
            Ok(()) => {
                debug!("Persisted {} for draft {}", change.describe(), change.draft_id());
                return true;
            }
            Err(e) if attempt >= policy.max_attempts.max(1) => {
                error!(
                    target: "draftroom::alert",
                    "Giving up on persisting {} for draft {} after {attempt} attempts: {e:#}",
                    change.describe(),
                    change.draft_id()
                );
                return false;
            }
            Err(e) => {
                let delay = policy.backoff(attempt);
                warn!(
                    "Persisting {} for draft {} failed (attempt {attempt}), retrying in {delay:?}: {e:#}",
                    change.describe(),
                    change.draft_id()
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// Start the writer task for one draft. Changes sent on the returned queue
/// are written in order; the task ends once every sender is dropped and the
/// queue is drained.
pub fn spawn_writer(
    gateway: Arc<dyn PersistenceGateway>,
    policy: RetryPolicy,
) -> (mpsc::UnboundedSender<DraftChange>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<DraftChange>();
    let handle = tokio::spawn(async move {
        while let Some(change) = rx.recv().await {
            write_with_retry(gateway.as_ref(), &change, policy).await;
        }
    });
    (tx, handle)
}
