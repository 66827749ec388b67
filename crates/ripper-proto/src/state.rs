use crate::protocol::SessionSnapshot;
use crate::track::TrackMetadata;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Shared, read-mostly view of the session controller's state.  The
/// controller is the only writer; the control socket only reads.
pub struct StateManager {
    state: Arc<RwLock<SessionSnapshot>>,
}

impl StateManager {
    pub fn new(save_path: PathBuf, max_reconnect_attempts: u32) -> Self {
        let state = SessionSnapshot {
            rev: 1,
            save_path,
            max_reconnect_attempts,
            ..SessionSnapshot::default()
        };

        Self {
            state: Arc::new(RwLock::new(state)),
        }
    }

    pub async fn get_state(&self) -> SessionSnapshot {
        self.state.read().await.clone()
    }

    /// Apply several changes under one write lock, as one revision.
    pub async fn update<F>(&self, f: F)
    where
        F: FnOnce(&mut SessionSnapshot),
    {
        let mut state = self.state.write().await;
        f(&mut state);
        if !state.phase.is_active() {
            state.now_playing = None;
        }
        state.rev += 1;
    }

    pub async fn set_now_playing(&self, track: Option<TrackMetadata>) {
        let mut state = self.state.write().await;
        state.now_playing = track;
        state.rev += 1;
    }

    pub async fn record_saved(&self) {
        let mut state = self.state.write().await;
        state.tracks_saved += 1;
        state.rev += 1;
    }
}
