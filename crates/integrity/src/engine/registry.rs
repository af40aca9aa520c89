// Open document sessions, keyed by document id.

use std::collections::HashMap;

use tracing::info;
use uuid::Uuid;

use crate::config::IntegrityConfig;
use crate::hash::HashEngineError;

use super::session::{DocumentSession, SharedSession};

pub struct SessionRegistry {
    config: IntegrityConfig,
    sessions: HashMap<Uuid, SharedSession>,
}

impl SessionRegistry {
    pub fn new(config: IntegrityConfig) -> Self {
        Self { config, sessions: HashMap::new() }
    }

    pub fn config(&self) -> &IntegrityConfig {
        &self.config
    }

    /// Open a session, or return the existing one for `doc_id`.
    pub fn open(&mut self, doc_id: Uuid) -> Result<SharedSession, HashEngineError> {
        if let Some(session) = self.sessions.get(&doc_id) {
            return Ok(session.clone());
        }
        let session = SharedSession::new(DocumentSession::open(doc_id, &self.config)?);
        self.sessions.insert(doc_id, session.clone());
        info!(%doc_id, open_sessions = self.sessions.len(), "integrity session opened");
        Ok(session)
    }

    pub fn get(&self, doc_id: Uuid) -> Option<SharedSession> {
        self.sessions.get(&doc_id).cloned()
    }

    /// Tear down a session. Returns `false` if it was not open.
    pub fn close(&mut self, doc_id: Uuid) -> bool {
        let closed = self.sessions.remove(&doc_id).is_some();
        if closed {
            info!(%doc_id, open_sessions = self.sessions.len(), "integrity session closed");
        }
        closed
    }

    pub fn contains(&self, doc_id: Uuid) -> bool {
        self.sessions.contains_key(&doc_id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn doc_ids(&self) -> Vec<Uuid> {
        let mut ids: Vec<Uuid> = self.sessions.keys().copied().collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::EditOperation;
    use crate::hash::DigestBackend;

    #[tokio::test]
    async fn open_is_idempotent_per_document() {
        let mut registry = SessionRegistry::new(IntegrityConfig::default());
        let doc_id = Uuid::new_v4();

        let first = registry.open(doc_id).unwrap();
        first.lock().await.apply_edit(&EditOperation::BlockDelete { block_id: "b1".into() });

        let second = registry.open(doc_id).unwrap();
        assert_eq!(second.lock().await.scheduler().stats().operations_recorded, 1);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn sessions_are_isolated_per_document() {
        let mut registry = SessionRegistry::new(IntegrityConfig::default());
        let a = registry.open(Uuid::new_v4()).unwrap();
        let b = registry.open(Uuid::new_v4()).unwrap();

        a.lock().await.apply_edit(&EditOperation::BlockDelete { block_id: "x".into() });
        assert!(a.lock().await.tracker().is_block_dirty("x"));
        assert!(!b.lock().await.tracker().is_block_dirty("x"));
        assert_eq!(registry.doc_ids().len(), 2);
    }

    #[test]
    fn close_removes_session() {
        let mut registry = SessionRegistry::new(IntegrityConfig::default());
        let doc_id = Uuid::new_v4();
        registry.open(doc_id).unwrap();
        assert!(registry.close(doc_id));
        assert!(!registry.close(doc_id));
        assert!(registry.get(doc_id).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn open_fails_for_rejected_backend() {
        let mut config = IntegrityConfig::default();
        config.hash.backend = DigestBackend::FnvInsecure;
        let mut registry = SessionRegistry::new(config);
        assert_eq!(
            registry.open(Uuid::new_v4()).err(),
            Some(HashEngineError::InsecureBackendRejected(DigestBackend::FnvInsecure))
        );
        assert!(registry.is_empty());
    }
}
