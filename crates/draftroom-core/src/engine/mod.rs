// Draft turn-coordination engine: one serializing actor per resident draft.

mod actor;
pub mod bus;
pub mod committer;
pub mod scheduler;
pub mod store;
pub mod timer;

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::draft::pick::PickRecord;
use crate::draft::roster::DraftSetup;
use crate::draft::state::{DraftSnapshot, DraftStatus, RuntimeState, StoredDraft};
use crate::error::{EngineError, PickError};
use crate::persistence::{spawn_writer, PersistenceGateway, RetryPolicy};

use actor::DraftActor;
use bus::{EventBus, Subscription};
use committer::PickRequest;
use scheduler::TurnScheduler;
use store::{Closed, DraftHandle, DraftStore};
use timer::{Clock, SystemClock, TimerService};

/// Runtime tuning for the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    pub mailbox_capacity: usize,
    pub event_buffer: usize,
    pub idle_timeout: Duration,
    pub tick_interval: Duration,
    pub retry: RetryPolicy,
}

impl EngineSettings {
    pub fn from_config(config: &Config) -> Self {
        EngineSettings {
            mailbox_capacity: config.runtime.mailbox_capacity,
            event_buffer: config.runtime.event_buffer,
            idle_timeout: Duration::from_secs(config.runtime.idle_timeout_secs),
            tick_interval: Duration::from_millis(config.turns.tick_interval_ms),
            retry: RetryPolicy {
                max_attempts: config.persistence.max_attempts,
                base_backoff: Duration::from_millis(config.persistence.base_backoff_ms),
                max_backoff: Duration::from_millis(config.persistence.max_backoff_ms),
            },
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        EngineSettings {
            mailbox_capacity: 64,
            event_buffer: 256,
            idle_timeout: Duration::from_secs(300),
            tick_interval: Duration::from_secs(1),
            retry: RetryPolicy::default(),
        }
    }
}

struct EngineInner {
    gateway: Arc<dyn PersistenceGateway>,
    clock: Arc<dyn Clock>,
    settings: EngineSettings,
    store: DraftStore,
    next_instance: AtomicU64,
}

/// Entry point for every draft operation. Cheap to clone.
#[derive(Clone)]
pub struct DraftEngine {
    inner: Arc<EngineInner>,
}

impl DraftEngine {
    pub fn new(gateway: Arc<dyn PersistenceGateway>, settings: EngineSettings) -> Self {
        Self::with_clock(gateway, settings, Arc::new(SystemClock))
    }

    pub fn with_clock(
        gateway: Arc<dyn PersistenceGateway>,
        settings: EngineSettings,
        clock: Arc<dyn Clock>,
    ) -> Self {
        DraftEngine {
            inner: Arc::new(EngineInner {
                gateway,
                clock,
                settings,
                store: DraftStore::new(),
                next_instance: AtomicU64::new(1),
            }),
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.inner.settings
    }

    /// Ids of the drafts currently held in memory.
    pub fn resident_drafts(&self) -> Vec<String> {
        self.inner.store.resident()
    }

    /// Make the draft resident, hydrating it from storage if needed, and
    /// return its snapshot.
    pub async fn load(&self, draft_id: &str) -> Result<DraftSnapshot, EngineError> {
        self.snapshot(draft_id).await
    }

    pub async fn snapshot(&self, draft_id: &str) -> Result<DraftSnapshot, EngineError> {
        self.call(draft_id, |h| async move { h.snapshot().await })
            .await
    }

    /// Snapshot plus every event published after it. A completed draft
    /// yields its final snapshot and an already finished stream.
    pub async fn subscribe(&self, draft_id: &str) -> Result<Subscription, EngineError> {
        match self
            .call(draft_id, |h| async move { h.subscribe().await })
            .await
        {
            Err(e @ EngineError::InvalidState { .. }) => match self.completed_draft(draft_id).await {
                Some(stored) => Ok(Subscription::finished(RuntimeState::completed_snapshot(
                    stored,
                )?)),
                None => Err(e),
            },
            other => other,
        }
    }

    /// Validate and commit a claim. The single mutation entry point for
    /// picks.
    pub async fn apply_pick(
        &self,
        draft_id: &str,
        request: PickRequest,
    ) -> Result<PickRecord, EngineError> {
        let result = self
            .call(draft_id, |h| {
                let request = request.clone();
                async move { h.pick(request).await }
            })
            .await;
        match result {
            Ok(outcome) => outcome,
            Err(e @ EngineError::InvalidState { .. }) => match self.completed_draft(draft_id).await {
                Some(_) => Err(PickError::DraftNotActive {
                    draft_id: draft_id.to_string(),
                }
                .into()),
                None => Err(e),
            },
            Err(e) => Err(e),
        }
    }

    /// A participant's own pick.
    pub async fn make_pick(
        &self,
        draft_id: &str,
        participant_id: &str,
        item_id: &str,
    ) -> Result<PickRecord, EngineError> {
        self.apply_pick(draft_id, PickRequest::manual(participant_id, item_id))
            .await
    }

    /// Admin override: pick `item_id`, or the fallback item, for the
    /// current participant.
    pub async fn force_auto_pick(
        &self,
        draft_id: &str,
        participant_id: &str,
        item_id: Option<&str>,
    ) -> Result<PickRecord, EngineError> {
        self.apply_pick(draft_id, PickRequest::admin(participant_id, item_id))
            .await
    }

    /// Activate a pending draft, optionally replacing its roster first.
    pub async fn start_draft(
        &self,
        draft_id: &str,
        setup: Option<DraftSetup>,
    ) -> Result<DraftSnapshot, EngineError> {
        let roster = setup.map(DraftSetup::into_roster).transpose()?;
        self.call(draft_id, |h| {
            let roster = roster.clone();
            async move { h.start(roster).await }
        })
        .await?
    }

    /// Stop every draft actor, letting queued writes drain.
    pub async fn shutdown(&self) {
        let handles = self.inner.store.handles();
        info!("Shutting down {} resident drafts", handles.len());
        for handle in handles {
            handle.shutdown().await;
        }
    }

    /// [`shutdown`](Self::shutdown), giving up after `limit`. Returns
    /// `false` when some actors were still draining queued writes.
    pub async fn shutdown_within(&self, limit: Duration) -> bool {
        tokio::time::timeout(limit, self.shutdown()).await.is_ok()
    }

    /// The stored draft, if it is persisted as completed. Completed drafts
    /// are never made resident, so their reads go straight to storage.
    async fn completed_draft(&self, draft_id: &str) -> Option<StoredDraft> {
        match self.inner.gateway.load_draft(draft_id).await {
            Ok(Some(stored)) if stored.draft.status == DraftStatus::Completed => Some(stored),
            Ok(_) => None,
            Err(e) => {
                warn!("Failed to read draft {draft_id} from storage: {e:#}");
                None
            }
        }
    }

    /// Run `f` against the draft's actor. If the actor stopped before
    /// handling the request, load the draft again and retry once.
    async fn call<T, F, Fut>(&self, draft_id: &str, f: F) -> Result<T, EngineError>
    where
        F: Fn(DraftHandle) -> Fut,
        Fut: Future<Output = Result<T, Closed>>,
    {
        for _ in 0..2 {
            let handle = self.handle(draft_id).await?;
            let instance = handle.instance();
            match f(handle).await {
                Ok(value) => return Ok(value),
                Err(Closed) => {
                    debug!("Draft {draft_id} actor {instance} stopped, reloading");
                    self.inner.store.release(draft_id, instance);
                }
            }
        }
        Err(EngineError::Unavailable(draft_id.to_string()))
    }

    async fn handle(&self, draft_id: &str) -> Result<DraftHandle, EngineError> {
        self.inner
            .store
            .get_or_spawn(draft_id, || self.spawn(draft_id))
            .await
    }

    async fn spawn(&self, draft_id: &str) -> Result<DraftHandle, EngineError> {
        let inner = &self.inner;
        let stored = inner
            .gateway
            .load_draft(draft_id)
            .await
            .map_err(|e| EngineError::Persistence(format!("{e:#}")))?
            .ok_or_else(|| EngineError::NotFound(draft_id.to_string()))?;
        let state = RuntimeState::hydrate(stored)?;

        let settings = inner.settings;
        let instance = inner.next_instance.fetch_add(1, Ordering::Relaxed);
        let (tx, commands) = mpsc::channel(settings.mailbox_capacity.max(1));
        let (timer_tx, timer_rx) = mpsc::unbounded_channel();
        let (persist, writer) = spawn_writer(Arc::clone(&inner.gateway), settings.retry);

        let actor = DraftActor {
            state,
            bus: EventBus::new(settings.event_buffer),
            scheduler: TurnScheduler::new(TimerService::new(settings.tick_interval), timer_tx),
            clock: Arc::clone(&inner.clock),
            commands,
            timer_rx,
            persist: Some(persist),
            writer: Some(writer),
            store: inner.store.clone(),
            instance,
            idle_timeout: settings.idle_timeout,
            closing: false,
        };
        tokio::spawn(actor.run());

        Ok(DraftHandle::new(draft_id, instance, tx))
    }
}
