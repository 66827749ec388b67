//! HTTP/ICY stream client.
//!
//! `connect` validates the URL and spawns one task per connection:
//!
//! ```text
//!   GET url (Icy-MetaData: 1)
//!         │
//!         ├── response accepted        → Started
//!         ├── body → IcyDemuxer        → audio bytes / titles
//!         │            └── TrackAssembler → MetadataChanged / SongChanged
//!         └── error, stall or EOF      → Failed
//! ```
//!
//! Stopping a session aborts its task, so nothing is emitted afterwards.

use std::time::Duration;

use futures_util::StreamExt;
use reqwest::Client;
use tracing::{debug, info, warn};

use super::icy::{IcyDemuxer, IcyFrame, TrackAssembler};
use super::{validate_stream_url, AudioFormat, EventSink, StreamClient, StreamEvent, StreamSession};
use crate::error::ConnectError;

/// A stream that delivers nothing for this long is considered dead.
const STALL_TIMEOUT: Duration = Duration::from_secs(30);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

pub struct IcyStreamClient {
    client: Client,
}

impl IcyStreamClient {
    pub fn new() -> anyhow::Result<Self> {
        let client = Client::builder()
            // Icecast relays and playlist hosts redirect a lot
            .redirect(reqwest::redirect::Policy::limited(10))
            .connect_timeout(CONNECT_TIMEOUT)
            .user_agent(concat!("ripperd/", env!("CARGO_PKG_VERSION")))
            .default_headers({
                let mut h = reqwest::header::HeaderMap::new();
                h.insert(
                    "Icy-MetaData",
                    reqwest::header::HeaderValue::from_static("1"),
                );
                h
            })
            .build()?;
        Ok(Self { client })
    }
}

impl StreamClient for IcyStreamClient {
    fn connect(
        &self,
        url: &str,
        max_buffer_bytes: usize,
        events: EventSink,
    ) -> Result<Box<dyn StreamSession>, ConnectError> {
        let url = validate_stream_url(url)?;
        info!("icy: connecting to {} (generation {})", url, events.generation());
        let handle = tokio::spawn(run_connection(
            self.client.clone(),
            url,
            max_buffer_bytes,
            events,
        ));
        Ok(Box::new(IcySession {
            handle: Some(handle),
        }))
    }
}

struct IcySession {
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl StreamSession for IcySession {
    fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl Drop for IcySession {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_connection(
    client: Client,
    url: reqwest::Url,
    max_buffer_bytes: usize,
    events: EventSink,
) {
    let response = match client.get(url.clone()).send().await {
        Ok(r) => match r.error_for_status() {
            Ok(ok) => ok,
            Err(e) => {
                warn!("icy: upstream returned error for {}: {}", url, e);
                events.emit(StreamEvent::Failed).await;
                return;
            }
        },
        Err(e) => {
            warn!("icy: connect failed for {}: {}", url, e);
            events.emit(StreamEvent::Failed).await;
            return;
        }
    };

    let headers = response.headers();
    let format = headers
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(AudioFormat::from_content_type)
        .unwrap_or_default();
    let metaint = headers
        .get("icy-metaint")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<usize>().ok());
    let station = headers
        .get("icy-name")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    info!(
        "icy: connected to {} station={:?} format={:?} metaint={:?}",
        url, station, format, metaint
    );
    if metaint.is_none() {
        warn!("icy: {} sends no icy-metaint, track boundaries will not be detected", url);
    }

    if !events.emit(StreamEvent::Started { track: None }).await {
        return;
    }

    let mut demux = IcyDemuxer::new(metaint);
    let mut assembler = TrackAssembler::new(format, max_buffer_bytes);
    let mut body = response.bytes_stream();
    let mut total_bytes: u64 = 0;

    loop {
        let next = match tokio::time::timeout(STALL_TIMEOUT, body.next()).await {
            Ok(next) => next,
            Err(_) => {
                warn!("icy: no data from {} for {:?}", url, STALL_TIMEOUT);
                break;
            }
        };
        let chunk = match next {
            Some(Ok(chunk)) => chunk,
            Some(Err(e)) => {
                warn!("icy: read error from {} after {} bytes: {}", url, total_bytes, e);
                break;
            }
            None => {
                info!("icy: {} closed the stream after {} bytes", url, total_bytes);
                break;
            }
        };
        total_bytes += chunk.len() as u64;

        for frame in demux.feed(&chunk) {
            match frame {
                IcyFrame::Audio(audio) => assembler.push_audio(&audio),
                IcyFrame::Title(title) => {
                    debug!("icy: StreamTitle={:?}", title);
                    for event in assembler.on_title(&title) {
                        if !events.emit(event).await {
                            return;
                        }
                    }
                }
            }
        }
    }

    events.emit(StreamEvent::Failed).await;
}
