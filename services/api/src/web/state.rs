//! services/api/src/web/state.rs
//!
//! Defines the application's shared state and the registry of live sessions.

use crate::config::Config;
use mri_core::{Services, SessionOrchestrator};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

//=========================================================================================
// AppState (Shared Across All Connections)
//=========================================================================================

/// The shared application state, created once at startup and passed to all handlers.
pub struct AppState {
    pub services: Services,
    pub config: Arc<Config>,
    pub sessions: SessionRegistry,
}

//=========================================================================================
// Session Registry (One Orchestrator per Browser Session)
//=========================================================================================

/// A session's state machine. The mutex serializes requests from the same
/// browser, so a double-clicked submit is handled one call at a time.
pub type SharedSession = Arc<Mutex<SessionOrchestrator>>;

/// The session attached to the current request by the session middleware.
#[derive(Clone)]
pub struct SessionHandle {
    pub id: Uuid,
    pub session: SharedSession,
}

/// A registered session and when a request last touched it.
struct SessionEntry {
    session: SharedSession,
    last_seen: Instant,
}

/// In-process map from session cookie to orchestrator. Sessions never share
/// mutable state with each other.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<Uuid, SessionEntry>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the session for `id`, or creates a fresh anonymous one.
    /// The flag is `true` when a new session was created.
    pub async fn resolve(&self, id: Option<Uuid>, services: &Services) -> (SessionHandle, bool) {
        let mut sessions = self.sessions.write().await;
        if let Some(id) = id {
            if let Some(entry) = sessions.get_mut(&id) {
                entry.last_seen = Instant::now();
                return (
                    SessionHandle {
                        id,
                        session: entry.session.clone(),
                    },
                    false,
                );
            }
        }

        let id = Uuid::new_v4();
        let session = Arc::new(Mutex::new(SessionOrchestrator::new(services.clone())));
        sessions.insert(
            id,
            SessionEntry {
                session: session.clone(),
                last_seen: Instant::now(),
            },
        );
        (SessionHandle { id, session }, true)
    }

    /// Drops a session entirely, e.g. on sign-out.
    pub async fn remove(&self, id: Uuid) {
        self.sessions.write().await.remove(&id);
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Discards sessions idle for at least `idle` and not held by a request.
    /// Returns how many were removed.
    pub async fn evict_idle(&self, idle: Duration) -> usize {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, entry| {
            entry.last_seen.elapsed() < idle || Arc::strong_count(&entry.session) > 1
        });
        before - sessions.len()
    }
}

/// Sweeps idle sessions until `shutdown` is cancelled.
pub fn spawn_session_sweeper(state: Arc<AppState>, shutdown: CancellationToken) -> JoinHandle<()> {
    let idle = state.config.session_idle_timeout;
    let period = (idle / 4).clamp(Duration::from_secs(1), Duration::from_secs(60));
    tokio::spawn(async move {
        let mut ticker = interval(period);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let evicted = state.sessions.evict_idle(idle).await;
                    if evicted > 0 {
                        let remaining = state.sessions.len().await;
                        info!(evicted, remaining, "Evicted idle sessions");
                    }
                }
            }
        }
        debug!("Session sweeper stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use image::DynamicImage;
    use mri_core::{
        AuthError, Classifier, CredentialHasher, InferenceError, Prediction, RecordStore,
        ScanRecord, StoreError, StoreResult, UserCredentials,
    };

    struct OfflineStore;

    #[async_trait]
    impl RecordStore for OfflineStore {
        async fn create_user(&self, _: &str, _: &str, _: &str) -> StoreResult<()> {
            Err(StoreError::Unavailable("offline".to_string()))
        }
        async fn find_user_by_email(&self, _: &str) -> StoreResult<Option<UserCredentials>> {
            Ok(None)
        }
        async fn append_scan_record(&self, _: &ScanRecord) -> StoreResult<()> {
            Err(StoreError::Unavailable("offline".to_string()))
        }
        async fn list_scan_records(&self, _: &str) -> StoreResult<Vec<ScanRecord>> {
            Ok(Vec::new())
        }
    }

    struct NoModel;

    #[async_trait]
    impl Classifier for NoModel {
        async fn classify(&self, _: &DynamicImage) -> Result<Prediction, InferenceError> {
            Err(InferenceError::ModelUnavailable("no model".to_string()))
        }
    }

    struct NoHasher;

    impl CredentialHasher for NoHasher {
        fn hash(&self, _: &str) -> Result<String, AuthError> {
            Err(AuthError::Hashing("disabled".to_string()))
        }
        fn verify(&self, _: &str, _: &str) -> Result<bool, AuthError> {
            Ok(false)
        }
    }

    fn services() -> Services {
        Services {
            store: Arc::new(OfflineStore),
            classifier: Arc::new(NoModel),
            hasher: Arc::new(NoHasher),
        }
    }

    #[tokio::test]
    async fn known_cookies_resolve_to_the_same_session() {
        let registry = SessionRegistry::new();
        let services = services();
        let (first, created) = registry.resolve(None, &services).await;
        assert!(created);
        let (again, created) = registry.resolve(Some(first.id), &services).await;
        assert!(!created);
        assert!(Arc::ptr_eq(&first.session, &again.session));

        let (other, created) = registry.resolve(Some(Uuid::new_v4()), &services).await;
        assert!(created);
        assert_ne!(other.id, first.id);
        assert_eq!(registry.len().await, 2);
    }

    #[tokio::test]
    async fn idle_sessions_are_evicted() {
        let registry = SessionRegistry::new();
        let services = services();
        for _ in 0..5 {
            registry.resolve(None, &services).await;
        }
        assert_eq!(registry.len().await, 5);

        assert_eq!(registry.evict_idle(Duration::from_secs(3600)).await, 0);
        assert_eq!(registry.evict_idle(Duration::ZERO).await, 5);
        assert_eq!(registry.len().await, 0);
    }

    #[tokio::test]
    async fn sessions_in_use_survive_eviction() {
        let registry = SessionRegistry::new();
        let services = services();
        let (held, _) = registry.resolve(None, &services).await;
        registry.resolve(None, &services).await;

        assert_eq!(registry.evict_idle(Duration::ZERO).await, 1);
        let (again, created) = registry.resolve(Some(held.id), &services).await;
        assert!(!created);
        assert!(Arc::ptr_eq(&held.session, &again.session));
    }
}
