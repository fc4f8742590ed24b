use std::{collections::HashMap, sync::Arc};

use media_relay::{FFmpegInput, RebroadcastOptions, RebroadcastSession, Transcoder};
use serde::Serialize;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RebroadcastStatus {
    pub id: String,
    pub port: u16,
    pub active: bool,
    pub clients: usize,
    pub input: FFmpegInput,
}

impl RebroadcastStatus {
    fn of(id: &str, session: &RebroadcastSession) -> Self {
        Self {
            id: id.to_string(),
            port: session.port(),
            active: session.is_active(),
            clients: session.clients(),
            input: session.ffmpeg_input(),
        }
    }
}

/// Live rebroadcast sessions by id. Sessions leave the table on their own
/// once killed, whether by `remove` or by their idle timer.
#[derive(Clone)]
pub struct RebroadcastManager {
    transcoder: Arc<dyn Transcoder>,
    sessions: Arc<RwLock<HashMap<String, RebroadcastSession>>>,
    /// One lock per id being started, so a slow transcoder holds up only
    /// requests for its own id.
    starting: Arc<std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl RebroadcastManager {
    pub fn new(transcoder: Arc<dyn Transcoder>) -> Self {
        Self {
            transcoder,
            sessions: Arc::new(RwLock::new(HashMap::new())),
            starting: Arc::new(std::sync::Mutex::new(HashMap::new())),
        }
    }

    pub async fn get(&self, id: &str) -> Option<RebroadcastSession> {
        self.sessions
            .read()
            .await
            .get(id)
            .filter(|session| session.is_active())
            .cloned()
    }

    pub async fn status(&self, id: &str) -> Option<RebroadcastStatus> {
        self.get(id)
            .await
            .map(|session| RebroadcastStatus::of(id, &session))
    }

    pub async fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sessions.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Reuses the live session for `id` or starts a new one. A reused session
    /// without clients gets its idle deadline pushed back.
    pub async fn get_or_start(
        &self,
        id: &str,
        input: &FFmpegInput,
        options: RebroadcastOptions,
    ) -> anyhow::Result<RebroadcastSession> {
        let _starting = self.lock_id(id).await;
        if let Some(session) = self.get(id).await {
            session.reset_activity_timer();
            return Ok(session);
        }
        self.start(id, input, options).await
    }

    /// Starts a session for `id`. An existing one is an error unless
    /// `replace` is set, in which case it is killed first.
    pub async fn add(
        &self,
        id: &str,
        input: &FFmpegInput,
        options: RebroadcastOptions,
        replace: bool,
    ) -> anyhow::Result<RebroadcastSession> {
        let _starting = self.lock_id(id).await;
        if self.get(id).await.is_some() {
            if !replace {
                return Err(anyhow::anyhow!("rebroadcast {} already exists", id));
            }
            self.remove(id).await;
        }
        self.start(id, input, options).await
    }

    pub async fn remove(&self, id: &str) -> bool {
        let removed = self.sessions.write().await.remove(id);
        match removed {
            Some(session) => {
                session.kill();
                true
            }
            None => false,
        }
    }

    /// Kills every session.
    pub async fn shutdown(&self) {
        let sessions: Vec<RebroadcastSession> =
            self.sessions.write().await.drain().map(|(_, s)| s).collect();
        for session in sessions {
            session.kill();
        }
    }

    async fn lock_id(&self, id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut starting = self.starting.lock().unwrap_or_else(|e| e.into_inner());
            // entries nobody holds or waits on
            starting.retain(|_, lock| Arc::strong_count(lock) > 1);
            Arc::clone(starting.entry(id.to_string()).or_default())
        };
        lock.lock_owned().await
    }

    async fn start(
        &self,
        id: &str,
        input: &FFmpegInput,
        options: RebroadcastOptions,
    ) -> anyhow::Result<RebroadcastSession> {
        let session = RebroadcastSession::start(self.transcoder.as_ref(), input, options).await?;
        log::info!("rebroadcast {} serving on port {}", id, session.port());
        self.sessions
            .write()
            .await
            .insert(id.to_string(), session.clone());

        let sessions = Arc::clone(&self.sessions);
        let killed = session.kill_token();
        let port = session.port();
        let id = id.to_string();
        tokio::spawn(async move {
            killed.cancelled().await;
            let mut sessions = sessions.write().await;
            if sessions.get(&id).map(|s| s.port()) == Some(port) {
                sessions.remove(&id);
                log::info!("rebroadcast {} removed", id);
            }
        });
        Ok(session)
    }
}

#[cfg(test)]
#[path = "manager_test.rs"]
mod manager_test;
