// Process-wide map of live document sessions.
//
// Lookup/create is a short critical section; all real work happens
// inside the session's own lock. A session is reclaimed once its roster
// empties.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;

use scrawl_core::protocol::ServerFrame;
use scrawl_core::types::{ClientId, DocId};
use tokio::sync::{mpsc, RwLock};
use tracing::info;

use crate::session::DocumentSession;

#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<DocId, Arc<DocumentSession>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join `doc_id`, creating the session on first join. Returns the
    /// session and the client id the roster knows the caller by.
    pub async fn join(
        &self,
        doc_id: &DocId,
        requested_id: Option<ClientId>,
        name: &str,
        outbound: mpsc::Sender<ServerFrame>,
    ) -> (Arc<DocumentSession>, ClientId) {
        loop {
            let session = self.get_or_create(doc_id).await;
            let client_id = session.join(requested_id.clone(), name, outbound.clone()).await;

            // A concurrent reclaim may have removed the session between the
            // lookup and the join; only a still-registered join counts.
            let registered = self.sessions.read().await.get(doc_id).cloned();
            if registered.as_ref().is_some_and(|current| Arc::ptr_eq(current, &session)) {
                return (session, client_id);
            }
            session.disconnect(&client_id).await;
        }
    }

    pub async fn get(&self, doc_id: &DocId) -> Option<Arc<DocumentSession>> {
        self.sessions.read().await.get(doc_id).cloned()
    }

    /// Remove a client from a document, reclaiming the session when its
    /// roster empties.
    pub async fn disconnect(&self, doc_id: &DocId, client_id: &ClientId) {
        let Some(session) = self.get(doc_id).await else {
            return;
        };
        if session.disconnect(client_id).await {
            let mut sessions = self.sessions.write().await;
            if let Some(current) = sessions.get(doc_id) {
                if Arc::ptr_eq(current, &session) && current.client_count().await == 0 {
                    sessions.remove(doc_id);
                    info!(doc_id = %doc_id, "reclaimed empty document session");
                }
            }
        }
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    async fn get_or_create(&self, doc_id: &DocId) -> Arc<DocumentSession> {
        if let Some(existing) = self.sessions.read().await.get(doc_id).cloned() {
            return existing;
        }

        let mut sessions = self.sessions.write().await;
        match sessions.entry(doc_id.clone()) {
            Entry::Occupied(occupied) => Arc::clone(occupied.get()),
            Entry::Vacant(vacant) => {
                info!(doc_id = %doc_id, "created document session");
                Arc::clone(vacant.insert(Arc::new(DocumentSession::new(doc_id.clone()))))
            }
        }
    }
}
