use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::track::TrackMetadata;

/// Current protocol version.  Bump this when the wire format changes in a
/// breaking way.
pub const PROTOCOL_VERSION: u32 = 1;

/// Messages sent from a control client to the daemon
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd")]
pub enum Command {
    /// Start recording. `None` reuses the last stream URL.
    Start { url: Option<String> },
    Stop,
    /// Save the track that is playing right now once it completes.
    SaveCurrent,
    /// Replace the filter phrases (one per line).
    SetFilters { text: String },
    SetSavePath { path: PathBuf },
    SetMaxReconnect { value: u32 },
    GetState,
}

/// Messages sent from the daemon to control clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "broadcast")]
pub enum Broadcast {
    /// Sent immediately on connect: protocol version + full state snapshot.
    Hello {
        protocol_version: u32,
        state: SessionSnapshot,
    },
    State {
        data: SessionSnapshot,
    },
    Status {
        text: String,
    },
    Log {
        message: String,
    },
    SaveIntent {
        save_next: bool,
    },
    NowPlaying {
        track: TrackMetadata,
    },
}

/// Lifecycle of one recording session.
///
/// Transitions:
///   Idle -> Starting -> Connected <-> Reconnecting
///   Starting | Connected | Reconnecting -> Stopped
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum SessionPhase {
    #[default]
    Idle,
    Starting,
    Connected,
    Reconnecting,
    Stopped,
}

impl SessionPhase {
    /// True while a stream connection is owned by the session.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SessionPhase::Starting | SessionPhase::Connected | SessionPhase::Reconnecting
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            SessionPhase::Idle => "idle",
            SessionPhase::Starting => "starting",
            SessionPhase::Connected => "connected",
            SessionPhase::Reconnecting => "reconnecting",
            SessionPhase::Stopped => "stopped",
        }
    }
}

/// Observable state of the session controller.  `rev` is incremented on
/// every change.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct SessionSnapshot {
    #[serde(default)]
    pub rev: u64,
    pub phase: SessionPhase,
    pub stream_url: Option<String>,
    pub save_path: PathBuf,
    #[serde(default)]
    pub filters: Vec<String>,
    pub save_next: bool,
    pub reconnect_attempts: u32,
    pub max_reconnect_attempts: u32,
    pub now_playing: Option<TrackMetadata>,
    #[serde(default)]
    pub tracks_saved: u64,
}

/// Wrapper for socket communication
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
    Command(Command),
    Broadcast(Broadcast),
}

impl Message {
    pub fn encode(&self) -> anyhow::Result<Vec<u8>> {
        let json = serde_json::to_vec(self)?;
        let len = json.len() as u32;
        let mut result = Vec::with_capacity(4 + json.len());
        result.extend_from_slice(&len.to_be_bytes());
        result.extend_from_slice(&json);
        Ok(result)
    }

    pub fn decode(data: &[u8]) -> anyhow::Result<(Self, usize)> {
        if data.len() < 4 {
            anyhow::bail!("Insufficient data for length header");
        }
        let len = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
        if data.len() < 4 + len {
            anyhow::bail!("Insufficient data for message");
        }
        let msg: Self = serde_json::from_slice(&data[4..4 + len])?;
        Ok((msg, 4 + len))
    }
}
