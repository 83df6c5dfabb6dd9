use std::sync::Arc;

use dashmap::DashMap;
use metrics::gauge;
use sandcastle_core::Session;
use tracing::info;
use uuid::Uuid;

/// Live sessions keyed by id, shared between connection tasks and shutdown.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<DashMap<Uuid, Arc<Session>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, session: Arc<Session>) {
        self.sessions.insert(session.id(), session);
        self.report();
    }

    pub fn unregister(&self, id: Uuid) -> Option<Arc<Session>> {
        let removed = self.sessions.remove(&id).map(|(_, session)| session);
        self.report();
        removed
    }


    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Stops every session from accepting work; their sockets receive a close
    /// frame once pending frames are written.
    pub fn close_all(&self) -> Vec<Arc<Session>> {
        let sessions: Vec<Arc<Session>> = self
            .sessions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        info!(sessions = sessions.len(), "closing open sessions");
        for session in &sessions {
            session.close();
        }
        sessions
    }

    /// Closes every session and waits for their writers to flush.
    pub async fn shutdown_all(&self) {
        for session in self.close_all() {
            session.shutdown().await;
            self.unregister(session.id());
        }
    }

    fn report(&self) {
        gauge!("sandcastle_sessions_active", self.sessions.len() as f64);
    }
}
