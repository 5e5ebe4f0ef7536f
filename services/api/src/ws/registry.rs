//! The process-wide map from client identifier to live session.
//!
//! The registry is the only writer of session phases. A client that
//! reconnects under the same identifier supersedes its previous session: the
//! old entry is replaced and its relay is told to stop.

use crate::models::{SessionPhase, SessionSummary};
use chrono::{DateTime, Utc};
use gemini_realtime::UpstreamConnection;
use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
};
use tokio::sync::Notify;
use tracing::{info, warn};
use uuid::Uuid;

/// One connected client and the upstream connection it exclusively owns.
pub struct Session {
    pub id: Uuid,
    pub client_id: String,
    pub created_at: DateTime<Utc>,
    pub upstream: Arc<UpstreamConnection>,
    superseded: AtomicBool,
    stop: Notify,
    torn_down: AtomicBool,
}

impl Session {
    fn new(client_id: &str, upstream: Arc<UpstreamConnection>) -> Self {
        Self {
            id: Uuid::new_v4(),
            client_id: client_id.to_string(),
            created_at: Utc::now(),
            upstream,
            superseded: AtomicBool::new(false),
            stop: Notify::new(),
            torn_down: AtomicBool::new(false),
        }
    }

    fn supersede(&self) {
        self.superseded.store(true, Ordering::SeqCst);
        self.stop.notify_waiters();
    }

    pub fn is_superseded(&self) -> bool {
        self.superseded.load(Ordering::SeqCst)
    }

    /// Resolves once a newer session has replaced this one.
    pub async fn superseded(&self) {
        loop {
            let notified = self.stop.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_superseded() {
                return;
            }
            notified.await;
        }
    }

    /// Claims the right to tear this session down. Returns `true` exactly once.
    pub fn begin_teardown(&self) -> bool {
        !self.torn_down.swap(true, Ordering::SeqCst)
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::SeqCst)
    }
}

struct Entry {
    session: Arc<Session>,
    phase: SessionPhase,
}

#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, Entry>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a new session for `client_id`, superseding any existing one.
    pub fn create(&self, client_id: &str, upstream: Arc<UpstreamConnection>) -> Arc<Session> {
        let session = Arc::new(Session::new(client_id, upstream));
        let previous = self.entries().insert(
            client_id.to_string(),
            Entry {
                session: session.clone(),
                phase: SessionPhase::AwaitingConfig,
            },
        );

        if let Some(previous) = previous {
            warn!(
                client_id,
                previous_session = %previous.session.id,
                "Client reconnected. Superseding previous session."
            );
            previous.session.supersede();
        }
        info!(client_id, session_id = %session.id, "Session registered.");
        session
    }

    pub fn lookup(&self, client_id: &str) -> Option<Arc<Session>> {
        self.entries()
            .get(client_id)
            .map(|entry| entry.session.clone())
    }

    /// Removes whatever session is registered for `client_id`. No-op if absent.
    pub fn remove(&self, client_id: &str) -> Option<Arc<Session>> {
        self.entries().remove(client_id).map(|entry| entry.session)
    }

    /// Removes `session` only if it is still the registered one for its
    /// client, so a superseded session never evicts its replacement.
    pub fn remove_session(&self, session: &Session) -> bool {
        let mut entries = self.entries();
        match entries.get(&session.client_id) {
            Some(entry) if entry.session.id == session.id => {
                entries.remove(&session.client_id);
                true
            }
            _ => false,
        }
    }

    pub fn set_phase(&self, session: &Session, phase: SessionPhase) -> bool {
        match self.entries().get_mut(&session.client_id) {
            Some(entry) if entry.session.id == session.id => {
                entry.phase = phase;
                true
            }
            _ => false,
        }
    }

    pub fn phase(&self, client_id: &str) -> Option<SessionPhase> {
        self.entries().get(client_id).map(|entry| entry.phase)
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// Live sessions, oldest first.
    pub fn snapshot(&self) -> Vec<SessionSummary> {
        let mut sessions: Vec<SessionSummary> = self
            .entries()
            .values()
            .map(|entry| SessionSummary {
                client_id: entry.session.client_id.clone(),
                session_id: entry.session.id,
                phase: entry.phase,
                created_at: entry.session.created_at,
            })
            .collect();
        sessions.sort_by_key(|summary| summary.created_at);
        sessions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gemini_realtime::loopback::LoopbackConnector;
    use std::time::Duration;

    fn upstream() -> Arc<UpstreamConnection> {
        let (connector, _server) = LoopbackConnector::new();
        Arc::new(UpstreamConnection::new(Arc::new(connector)))
    }

    #[test]
    fn test_create_lookup_remove() {
        let registry = SessionRegistry::new();
        let session = registry.create("alice", upstream());

        assert_eq!(registry.lookup("alice").unwrap().id, session.id);
        assert_eq!(registry.phase("alice"), Some(SessionPhase::AwaitingConfig));
        assert!(registry.lookup("bob").is_none());

        assert!(registry.remove("alice").is_some());
        assert!(registry.remove("alice").is_none());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_reconnect_supersedes_previous_session() {
        let registry = SessionRegistry::new();
        let first = registry.create("alice", upstream());
        let second = registry.create("alice", upstream());

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.lookup("alice").unwrap().id, second.id);
        assert!(first.is_superseded());
        assert!(!second.is_superseded());
        tokio::time::timeout(Duration::from_secs(1), first.superseded())
            .await
            .expect("superseded signal should fire");

        // The old session's teardown leaves the replacement in place.
        assert!(!registry.remove_session(&first));
        assert!(!registry.set_phase(&first, SessionPhase::Closing));
        assert_eq!(registry.lookup("alice").unwrap().id, second.id);

        assert!(registry.remove_session(&second));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_superseded_wakes_waiting_task() {
        let registry = Arc::new(SessionRegistry::new());
        let first = registry.create("alice", upstream());

        let waiter = {
            let first = first.clone();
            tokio::spawn(async move { first.superseded().await })
        };
        tokio::task::yield_now().await;
        registry.create("alice", upstream());

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake")
            .unwrap();
    }

    #[test]
    fn test_teardown_is_claimed_once() {
        let registry = SessionRegistry::new();
        let session = registry.create("alice", upstream());
        assert!(!session.is_torn_down());
        assert!(session.begin_teardown());
        assert!(!session.begin_teardown());
        assert!(session.is_torn_down());
    }

    #[test]
    fn test_snapshot_reports_phases() {
        let registry = SessionRegistry::new();
        let alice = registry.create("alice", upstream());
        registry.create("bob", upstream());
        assert!(registry.set_phase(&alice, SessionPhase::Relaying));

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 2);
        let alice_summary = snapshot.iter().find(|s| s.client_id == "alice").unwrap();
        assert_eq!(alice_summary.session_id, alice.id);
        assert_eq!(alice_summary.phase, SessionPhase::Relaying);
        let bob_summary = snapshot.iter().find(|s| s.client_id == "bob").unwrap();
        assert_eq!(bob_summary.phase, SessionPhase::AwaitingConfig);
    }
}
