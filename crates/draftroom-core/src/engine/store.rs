// Registry of resident drafts and the handles used to reach their actors.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{mpsc, oneshot, OnceCell};

use super::actor::Command;
use super::bus::Subscription;
use super::committer::PickRequest;
use crate::draft::pick::PickRecord;
use crate::draft::roster::Roster;
use crate::draft::state::DraftSnapshot;
use crate::error::EngineError;

/// The actor behind a handle has stopped; the command was not processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Closed;

/// Mailbox of one running draft actor.
#[derive(Debug, Clone)]
pub struct DraftHandle {
    draft_id: Arc<str>,
    instance: u64,
    tx: mpsc::Sender<Command>,
}

impl DraftHandle {
    pub(crate) fn new(draft_id: &str, instance: u64, tx: mpsc::Sender<Command>) -> Self {
        DraftHandle {
            draft_id: Arc::from(draft_id),
            instance,
            tx,
        }
    }

    pub fn draft_id(&self) -> &str {
        &self.draft_id
    }

    pub fn instance(&self) -> u64 {
        self.instance
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, Closed> {
        let (resp, rx) = oneshot::channel();
        self.tx.send(make(resp)).await.map_err(|_| Closed)?;
        rx.await.map_err(|_| Closed)
    }

    pub async fn snapshot(&self) -> Result<DraftSnapshot, Closed> {
        self.request(|resp| Command::Snapshot { resp }).await
    }

    pub async fn subscribe(&self) -> Result<Subscription, Closed> {
        self.request(|resp| Command::Subscribe { resp }).await
    }

    pub async fn pick(
        &self,
        request: PickRequest,
    ) -> Result<Result<PickRecord, EngineError>, Closed> {
        self.request(|resp| Command::Pick { request, resp }).await
    }

    pub async fn start(
        &self,
        roster: Option<Roster>,
    ) -> Result<Result<DraftSnapshot, EngineError>, Closed> {
        self.request(|resp| Command::Start { roster, resp }).await
    }

    /// Ask the actor to stop and wait until it has.
    pub async fn shutdown(&self) {
        let _ = self.tx.send(Command::Shutdown).await;
        self.tx.closed().await;
    }
}

type Slot = Arc<OnceCell<DraftHandle>>;

/// Resident drafts by id. Each entry is created on first load and removed
/// only by its own actor on exit.
#[derive(Clone, Default)]
pub struct DraftStore {
    slots: Arc<Mutex<HashMap<String, Slot>>>,
}

impl DraftStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Handle for `draft_id`, running `spawn` to create the actor if the
    /// draft is not resident. Concurrent callers share one `spawn`. On error
    /// no entry is left behind.
    pub async fn get_or_spawn<F, Fut>(
        &self,
        draft_id: &str,
        spawn: F,
    ) -> Result<DraftHandle, EngineError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<DraftHandle, EngineError>>,
    {
        let slot = Arc::clone(
            self.slots()
                .entry(draft_id.to_string())
                .or_insert_with(|| Arc::new(OnceCell::new())),
        );

        match slot.get_or_try_init(spawn).await {
            Ok(handle) => Ok(handle.clone()),
            Err(e) => {
                let mut slots = self.slots();
                if let Some(current) = slots.get(draft_id) {
                    if Arc::ptr_eq(current, &slot) && !current.initialized() {
                        slots.remove(draft_id);
                    }
                }
                Err(e)
            }
        }
    }

    pub fn get(&self, draft_id: &str) -> Option<DraftHandle> {
        self.slots().get(draft_id).and_then(|slot| slot.get().cloned())
    }

    /// Remove the entry for `draft_id` if it still belongs to `instance`.
    pub fn release(&self, draft_id: &str, instance: u64) -> bool {
        let mut slots = self.slots();
        let owned = slots
            .get(draft_id)
            .and_then(|slot| slot.get())
            .is_some_and(|handle| handle.instance == instance);
        if owned {
            slots.remove(draft_id);
        }
        owned
    }

    pub fn handles(&self) -> Vec<DraftHandle> {
        self.slots()
            .values()
            .filter_map(|slot| slot.get().cloned())
            .collect()
    }

    pub fn resident(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .slots()
            .iter()
            .filter(|(_, slot)| slot.initialized())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }
}
