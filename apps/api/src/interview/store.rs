//! In-memory session registry. Nothing is persisted; sessions live until
//! deleted, evicted as idle, or the process exits.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{broadcast, watch, Mutex, MutexGuard, OwnedSemaphorePermit, RwLock, Semaphore};
use tokio::time::Instant;
use tracing::info;
use uuid::Uuid;

use crate::interview::session::{FeedbackBuffer, Session, SessionSnapshot};
use crate::llm_client::{Credential, Provider};

pub(crate) const FEEDBACK_CHANNEL_CAPACITY: usize = 256;

/// Upper bound on how often the idle sweeper wakes.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Feedback progress pushed to stream subscribers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedbackEvent {
    /// Full buffer state; always the first event a subscriber sees.
    Snapshot {
        text: String,
        #[serde(rename = "inProgress")]
        in_progress: bool,
    },
    Started {
        #[serde(rename = "questionId")]
        question_id: String,
    },
    Fragment {
        text: String,
    },
    Completed,
    Failed {
        message: String,
    },
}

impl FeedbackEvent {
    pub fn name(&self) -> &'static str {
        match self {
            FeedbackEvent::Snapshot { .. } => "snapshot",
            FeedbackEvent::Started { .. } => "started",
            FeedbackEvent::Fragment { .. } => "fragment",
            FeedbackEvent::Completed => "completed",
            FeedbackEvent::Failed { .. } => "failed",
        }
    }

    /// True once nothing more will arrive for the current feedback run. An
    /// idle snapshot (sent first, or after a Restart) also ends it.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            FeedbackEvent::Completed
                | FeedbackEvent::Failed { .. }
                | FeedbackEvent::Snapshot {
                    in_progress: false,
                    ..
                }
        )
    }
}

impl From<&FeedbackBuffer> for FeedbackEvent {
    fn from(buffer: &FeedbackBuffer) -> Self {
        FeedbackEvent::Snapshot {
            text: buffer.text.clone(),
            in_progress: buffer.in_progress,
        }
    }
}

/// One session plus its feedback broadcast channel.
///
/// `operation` has a single permit, held by whichever provider call is running.
/// It is released when that call finishes or its future is dropped, so a
/// cancelled call must be gone before the next one can start.
pub struct SessionEntry {
    session: Mutex<Session>,
    feedback_tx: broadcast::Sender<FeedbackEvent>,
    cancel_tx: watch::Sender<u64>,
    operation: Arc<Semaphore>,
    last_touched: StdMutex<Instant>,
}

impl SessionEntry {
    pub fn new(session: Session) -> Self {
        let (feedback_tx, _) = broadcast::channel(FEEDBACK_CHANNEL_CAPACITY);
        let (cancel_tx, _) = watch::channel(0);
        Self {
            session: Mutex::new(session),
            feedback_tx,
            cancel_tx,
            operation: Arc::new(Semaphore::new(1)),
            last_touched: StdMutex::new(Instant::now()),
        }
    }

    /// Never hold the guard across a provider call.
    pub async fn lock(&self) -> MutexGuard<'_, Session> {
        self.touch();
        self.session.lock().await
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        self.session.lock().await.snapshot()
    }

    /// Publish while holding the session lock so subscribers never see an
    /// event that disagrees with the snapshot they started from.
    pub fn publish(&self, _guard: &MutexGuard<'_, Session>, event: FeedbackEvent) {
        // no receivers is fine
        let _ = self.feedback_tx.send(event);
    }

    /// Current buffer state plus a receiver for everything after it.
    pub async fn subscribe(&self) -> (FeedbackEvent, broadcast::Receiver<FeedbackEvent>) {
        let session = self.session.lock().await;
        let rx = self.feedback_tx.subscribe();
        (FeedbackEvent::from(session.feedback()), rx)
    }

    /// Claims the operation slot, or `None` while a provider call still runs.
    pub fn try_claim_operation(&self) -> Option<OwnedSemaphorePermit> {
        self.operation.clone().try_acquire_owned().ok()
    }

    /// Taken under the session lock together with a ticket; resolves once
    /// the session is restarted after that point.
    pub fn cancellation(&self, _guard: &MutexGuard<'_, Session>) -> watch::Receiver<u64> {
        self.cancel_tx.subscribe()
    }

    /// Signals every in-flight provider call to drop its request.
    pub fn cancel_in_flight(&self, _guard: &MutexGuard<'_, Session>) {
        self.cancel_tx.send_modify(|restarts| *restarts += 1);
    }

    pub fn touch(&self) {
        *self.last_touched.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    fn idle_for(&self, now: Instant) -> Duration {
        let touched = *self.last_touched.lock().unwrap_or_else(PoisonError::into_inner);
        now.saturating_duration_since(touched)
    }
}

#[derive(Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<Uuid, Arc<SessionEntry>>>,
}

impl SessionStore {
    pub async fn create(
        &self,
        provider: Provider,
        credential: Option<Credential>,
    ) -> Arc<SessionEntry> {
        let session = Session::new(provider, credential);
        let id = session.id();
        let entry = Arc::new(SessionEntry::new(session));
        self.sessions.write().await.insert(id, entry.clone());
        entry
    }

    /// Looking a session up counts as activity.
    pub async fn get(&self, id: Uuid) -> Option<Arc<SessionEntry>> {
        let entry = self.sessions.read().await.get(&id).cloned()?;
        entry.touch();
        Some(entry)
    }

    pub async fn remove(&self, id: Uuid) -> bool {
        self.sessions.write().await.remove(&id).is_some()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Drops sessions untouched for at least `ttl`. Tasks still holding an
    /// evicted entry finish against it; it is freed when they do.
    pub async fn evict_idle(&self, ttl: Duration) -> usize {
        let now = Instant::now();
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, entry| entry.idle_for(now) < ttl);
        before - sessions.len()
    }
}

/// Runs for the life of the process, evicting idle sessions.
pub async fn run_idle_sweeper(store: Arc<SessionStore>, ttl: Duration) {
    let mut ticker = tokio::time::interval(SWEEP_INTERVAL.min(ttl));
    loop {
        ticker.tick().await;
        let evicted = store.evict_idle(ttl).await;
        if evicted > 0 {
            info!("Evicted {evicted} idle sessions (ttl {}s)", ttl.as_secs());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm_client::testing::test_credential;

    #[tokio::test]
    async fn test_create_get_remove() {
        let store = SessionStore::default();
        let entry = store.create(Provider::OpenAi, Some(test_credential())).await;
        let id = entry.snapshot().await.id;

        assert!(store.get(id).await.is_some());
        assert_eq!(store.len().await, 1);
        assert!(store.remove(id).await);
        assert!(!store.remove(id).await);
        assert!(store.get(id).await.is_none());
    }

    #[tokio::test]
    async fn test_subscribe_starts_with_snapshot_then_receives_events() {
        let store = SessionStore::default();
        let entry = store.create(Provider::OpenAi, None).await;

        let (initial, mut rx) = entry.subscribe().await;
        assert_eq!(
            initial,
            FeedbackEvent::Snapshot {
                text: String::new(),
                in_progress: false
            }
        );

        {
            let guard = entry.lock().await;
            entry.publish(&guard, FeedbackEvent::Fragment { text: "hi".to_string() });
        }
        assert_eq!(
            rx.recv().await.unwrap(),
            FeedbackEvent::Fragment { text: "hi".to_string() }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_sessions_are_evicted() {
        let store = SessionStore::default();
        let ttl = Duration::from_secs(600);
        let idle = store.create(Provider::OpenAi, None).await;
        let active = store.create(Provider::OpenAi, None).await;
        let active_id = active.snapshot().await.id;
        drop(idle);

        tokio::time::advance(Duration::from_secs(599)).await;
        assert_eq!(store.evict_idle(ttl).await, 0);
        assert!(store.get(active_id).await.is_some());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(store.evict_idle(ttl).await, 1);
        assert_eq!(store.len().await, 1);
        assert!(store.get(active_id).await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_evicts_in_background() {
        let store = Arc::new(SessionStore::default());
        store.create(Provider::OpenAi, None).await;
        let ttl = Duration::from_secs(120);
        let sweeper = tokio::spawn(run_idle_sweeper(store.clone(), ttl));

        tokio::time::sleep(ttl + SWEEP_INTERVAL * 2).await;
        assert_eq!(store.len().await, 0);
        sweeper.abort();
    }

    #[tokio::test]
    async fn test_operation_slot_is_exclusive() {
        let entry = SessionEntry::new(Session::new(Provider::OpenAi, None));
        let permit = entry.try_claim_operation();
        assert!(permit.is_some());
        assert!(entry.try_claim_operation().is_none());
        drop(permit);
        assert!(entry.try_claim_operation().is_some());
    }

    #[test]
    fn test_event_serialization() {
        let json = serde_json::to_value(FeedbackEvent::Snapshot {
            text: "x".to_string(),
            in_progress: true,
        })
        .unwrap();
        assert_eq!(json["type"], "snapshot");
        assert_eq!(json["inProgress"], true);
        assert!(FeedbackEvent::Completed.is_terminal());
        assert!(!FeedbackEvent::Fragment { text: String::new() }.is_terminal());
        assert!(FeedbackEvent::from(&FeedbackBuffer::default()).is_terminal());
        assert!(!FeedbackEvent::Snapshot {
            text: String::new(),
            in_progress: true
        }
        .is_terminal());
    }
}
