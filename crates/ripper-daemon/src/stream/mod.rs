//! Stream client boundary.
//!
//! A `StreamClient` connects to a URL and reports what happens on the
//! connection as `StreamEvent`s pushed into the session queue.  The session
//! controller never sees transport details: it only learns that a stream
//! started, that metadata changed, that a track completed, or that the
//! connection failed.

pub mod client;
pub mod icy;

use bytes::Bytes;
use ripper_proto::track::TrackMetadata;
use tokio::sync::mpsc;

use crate::core::SessionEvent;
use crate::error::ConnectError;

pub use client::IcyStreamClient;

/// Container format of the audio bytes, derived from the response
/// `Content-Type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AudioFormat {
    #[default]
    Mp3,
    Aac,
    Ogg,
    Opus,
    Flac,
}

impl AudioFormat {
    pub fn from_content_type(content_type: &str) -> Self {
        let mime = content_type
            .split(';')
            .next()
            .unwrap_or("")
            .trim()
            .to_ascii_lowercase();
        match mime.as_str() {
            "audio/aac" | "audio/aacp" | "audio/x-aac" | "audio/mp4" => AudioFormat::Aac,
            "audio/ogg" | "application/ogg" | "audio/vorbis" => AudioFormat::Ogg,
            "audio/opus" => AudioFormat::Opus,
            "audio/flac" | "audio/x-flac" => AudioFormat::Flac,
            _ => AudioFormat::Mp3,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "mp3",
            AudioFormat::Aac => "aac",
            AudioFormat::Ogg => "ogg",
            AudioFormat::Opus => "opus",
            AudioFormat::Flac => "flac",
        }
    }
}

/// A track that just finished playing, with everything recorded for it.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackEvent {
    pub metadata: Option<TrackMetadata>,
    pub audio: Bytes,
    pub format: AudioFormat,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// The connection was accepted and audio is about to flow.
    Started { track: Option<TrackMetadata> },
    /// The stream announced new metadata for the current track.
    MetadataChanged { metadata: Option<TrackMetadata> },
    /// A track ended; carries the completed track.
    SongChanged { completed: TrackEvent },
    /// The connection is gone.  No further events follow for it.
    Failed,
}

/// Where a connection delivers its events.  Every event is stamped with the
/// connection's generation so the controller can drop stragglers from a
/// connection it has already replaced or stopped.
#[derive(Clone)]
pub struct EventSink {
    generation: u64,
    tx: mpsc::Sender<SessionEvent>,
}

impl EventSink {
    pub fn new(generation: u64, tx: mpsc::Sender<SessionEvent>) -> Self {
        Self { generation, tx }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Queue an event.  Returns false once the controller has gone away.
    pub async fn emit(&self, event: StreamEvent) -> bool {
        self.tx
            .send(SessionEvent::Stream {
                generation: self.generation,
                event,
            })
            .await
            .is_ok()
    }
}

/// Connects to streams.  `connect` must return promptly: it validates the URL
/// and hands the actual network work to a background task.
pub trait StreamClient: Send + Sync {
    fn connect(
        &self,
        url: &str,
        max_buffer_bytes: usize,
        events: EventSink,
    ) -> Result<Box<dyn StreamSession>, ConnectError>;
}

/// A live connection.  `stop` releases it; calling it again is a no-op.  No
/// events are emitted after `stop` returns.
pub trait StreamSession: Send + Sync {
    fn stop(&mut self);
}

/// Accept only absolute http(s) URLs.
pub fn validate_stream_url(url: &str) -> Result<reqwest::Url, ConnectError> {
    let parsed = reqwest::Url::parse(url.trim()).map_err(|e| ConnectError::InvalidUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })?;
    match parsed.scheme() {
        "http" | "https" => {}
        other => {
            return Err(ConnectError::UnsupportedScheme {
                scheme: other.to_string(),
            })
        }
    }
    if parsed.host_str().map(str::is_empty).unwrap_or(true) {
        return Err(ConnectError::InvalidUrl {
            url: url.to_string(),
            reason: "missing host".to_string(),
        });
    }
    Ok(parsed)
}
