use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use tokio::sync::oneshot;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use super::{peer::PeerConnection, signaling::IceCandidate};

/// Signaling state of one bridged peer connection.
pub struct RtcSession {
    id: String,
    connection: Arc<dyn PeerConnection>,
    state: Mutex<CandidateQueue>,
    closed: CancellationToken,
}

#[derive(Default)]
struct CandidateQueue {
    pending: Vec<IceCandidate>,
    /// At most one caller waits for local candidates.
    waiter: Option<oneshot::Sender<()>>,
    gathering_complete: bool,
}

impl RtcSession {
    pub fn new(id: impl Into<String>, connection: Arc<dyn PeerConnection>) -> Self {
        Self {
            id: id.into(),
            connection,
            state: Mutex::new(CandidateQueue::default()),
            closed: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn connection(&self) -> &Arc<dyn PeerConnection> {
        &self.connection
    }

    pub fn push_local_candidate(&self, candidate: IceCandidate) {
        let mut state = self.lock();
        state.pending.push(candidate);
        if let Some(waiter) = state.waiter.take() {
            let _ = waiter.send(());
        }
    }

    /// Wakes a pending waiter even if nothing was queued.
    pub fn gathering_complete(&self) {
        let mut state = self.lock();
        state.gathering_complete = true;
        if let Some(waiter) = state.waiter.take() {
            let _ = waiter.send(());
        }
    }

    /// Ends the session. Whoever drives the bridge tears it down; a pending
    /// waiter returns an empty list.
    pub fn close(&self) {
        self.closed.cancel();
        self.lock().waiter.take();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    pub fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.closed.cancelled()
    }

    pub fn close_token(&self) -> CancellationToken {
        self.closed.clone()
    }

    pub fn pending_len(&self) -> usize {
        self.lock().pending.len()
    }

    /// Returns and clears the queued local candidates, waiting for the first
    /// one if the queue is empty. A newer caller displaces an older waiter,
    /// which returns empty-handed.
    pub async fn next_candidates(&self) -> Vec<IceCandidate> {
        let woken = {
            let mut state = self.lock();
            if !state.pending.is_empty() || state.gathering_complete || self.is_closed() {
                return std::mem::take(&mut state.pending);
            }
            let (tx, rx) = oneshot::channel();
            state.waiter = Some(tx);
            rx
        };

        match woken.await {
            Ok(()) => std::mem::take(&mut self.lock().pending),
            Err(_) => Vec::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CandidateQueue> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Live sessions by id, owned by the hosting process.
#[derive(Clone, Default)]
pub struct RtcSessionTable {
    sessions: Arc<Mutex<HashMap<String, Arc<RtcSession>>>>,
}

impl RtcSessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, session: Arc<RtcSession>) {
        self.lock().insert(session.id().to_string(), session);
    }

    pub fn get(&self, id: &str) -> Option<Arc<RtcSession>> {
        self.lock().get(id).cloned()
    }

    pub fn remove(&self, id: &str) -> Option<Arc<RtcSession>> {
        self.lock().remove(id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ids(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<RtcSession>>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
#[path = "session_test.rs"]
mod session_test;
