//! SessionCore: single-owner event loop for the recording session.
//!
//! Everything that can change the session arrives as a `SessionEvent` on one
//! mpsc queue: stream events from the live connection, commands from the
//! control socket or CLI, delayed reconnect ticks and shutdown.  SessionCore
//! owns the filter set, the save intent, the connection bookkeeping and the
//! live `StreamSession` exclusively; no other task touches them, so every
//! event is applied atomically with respect to every other.
//!
//! Stream events carry the generation of the connection that produced them.
//! Each connect, stop and restart bumps the generation, so events still in
//! flight from a replaced or stopped connection are dropped on arrival.
//!
//! After each event the snapshot in `StateManager` is refreshed and
//! listeners are told via `Notification::StateChanged`.

use std::sync::Arc;
use std::time::Duration;

use ripper_proto::config::SessionSettings;
use ripper_proto::protocol::{Command, SessionPhase, SessionSnapshot};
use ripper_proto::state::StateManager;
use ripper_proto::track::TrackMetadata;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::connection::{ConnectionState, ReconnectDecision};
use crate::error::SessionError;
use crate::filters::FilterSet;
use crate::intent::SaveIntent;
use crate::notify::Notifier;
use crate::persist::{self, PendingWrite, WriteQueue, WRITE_QUEUE_CAPACITY};
use crate::stream::{EventSink, StreamClient, StreamEvent, StreamSession, TrackEvent};

pub const EVENT_QUEUE_CAPACITY: usize = 256;

// ── SessionEvent ──────────────────────────────────────────────────────────────

/// All inputs into the SessionCore loop.
#[derive(Debug)]
pub enum SessionEvent {
    /// Something happened on connection `generation`.
    Stream { generation: u64, event: StreamEvent },
    /// A command from the command line; nobody waits for the outcome.
    Command(Command),
    /// A command from a control client, answered with the snapshot taken
    /// after the command was applied.
    Request {
        cmd: Command,
        reply: oneshot::Sender<SessionSnapshot>,
    },
    /// The reconnect delay for connection `generation` elapsed.
    ReconnectDue { generation: u64 },
    /// Stop the session and leave the loop.
    Shutdown,
}

/// Why a session ended.
#[derive(Debug)]
pub enum StopCause {
    Requested,
    Shutdown,
    Failed(SessionError),
}

impl StopCause {
    fn describe(&self) -> String {
        match self {
            StopCause::Requested => "stopped by user".to_string(),
            StopCause::Shutdown => "shutting down".to_string(),
            StopCause::Failed(e) => e.to_string(),
        }
    }
}

// ── SessionCore ───────────────────────────────────────────────────────────────

pub struct SessionCore {
    settings: SessionSettings,
    client: Box<dyn StreamClient>,
    filters: FilterSet,
    intent: SaveIntent,
    connection: ConnectionState,
    phase: SessionPhase,
    /// Live connection.  `None` when idle or stopped.
    session: Option<Box<dyn StreamSession>>,
    stream_url: Option<String>,
    /// Generation of the live connection.
    generation: u64,
    event_tx: mpsc::Sender<SessionEvent>,
    writes: WriteQueue,
    writer_handle: tokio::task::JoinHandle<()>,
    notifier: Notifier,
    state_manager: Arc<StateManager>,
}

impl SessionCore {
    /// Must be called from within a tokio runtime (spawns the track writer).
    pub fn new(
        settings: SessionSettings,
        client: Box<dyn StreamClient>,
        notifier: Notifier,
        event_tx: mpsc::Sender<SessionEvent>,
    ) -> Self {
        let state_manager = Arc::new(StateManager::new(
            settings.last_save_path.clone(),
            settings.max_reconnect_attempts,
        ));
        let (writes, writer_handle) =
            persist::spawn_writer(notifier.clone(), state_manager.clone(), WRITE_QUEUE_CAPACITY);

        let filters = FilterSet::from_text(&settings.filter_text);
        // Without filters every track is captured
        let intent = SaveIntent::new(filters.is_empty(), notifier.clone());
        let connection = ConnectionState::new(settings.max_reconnect_attempts);

        notifier.on_save_intent_changed(intent.get());
        notifier.on_status("Waiting for start...");

        Self {
            settings,
            client,
            filters,
            intent,
            connection,
            phase: SessionPhase::Idle,
            session: None,
            stream_url: None,
            generation: 0,
            event_tx,
            writes,
            writer_handle,
            notifier,
            state_manager,
        }
    }

    pub fn state_manager(&self) -> Arc<StateManager> {
        Arc::clone(&self.state_manager)
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn save_next(&self) -> bool {
        self.intent.get()
    }

    pub fn connection(&self) -> &ConnectionState {
        &self.connection
    }

    pub fn filters(&self) -> &FilterSet {
        &self.filters
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Generation of the live connection (the one whose events are accepted).
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Run the event loop until `Shutdown`, then stop the session, wait for
    /// pending writes and hand the settings back for persisting.
    pub async fn run(mut self, mut event_rx: mpsc::Receiver<SessionEvent>) -> SessionSettings {
        info!("SessionCore: starting event loop");
        self.publish().await;

        while let Some(event) = event_rx.recv().await {
            if !self.handle(event).await {
                break;
            }
        }

        self.shutdown().await
    }

    /// Apply one event.  Returns false on `Shutdown`.
    pub async fn handle(&mut self, event: SessionEvent) -> bool {
        match event {
            SessionEvent::Stream { generation, event } => {
                if generation != self.generation || !self.phase.is_active() {
                    debug!(
                        "SessionCore: dropping event from stale connection {} (live {}, {:?})",
                        generation, self.generation, self.phase
                    );
                    return true;
                }
                self.handle_stream_event(event).await;
            }
            SessionEvent::Command(cmd) => {
                info!("SessionCore: command {:?}", cmd);
                self.handle_command(cmd).await;
            }
            SessionEvent::Request { cmd, reply } => {
                info!("SessionCore: client command {:?}", cmd);
                self.handle_command(cmd).await;
                self.publish().await;
                // The client may have hung up already
                let _ = reply.send(self.state_manager.get_state().await);
                return true;
            }
            SessionEvent::ReconnectDue { generation } => {
                if generation == self.generation && self.phase == SessionPhase::Reconnecting {
                    self.reconnect();
                }
            }
            SessionEvent::Shutdown => {
                info!("SessionCore: shutdown requested");
                return false;
            }
        }
        self.publish().await;
        true
    }

    /// Stop the session, drain the write queue and return the settings.
    pub async fn shutdown(mut self) -> SessionSettings {
        self.stop(StopCause::Shutdown);
        self.publish().await;

        let SessionCore {
            settings,
            writes,
            writer_handle,
            ..
        } = self;
        drop(writes);
        if let Err(e) = writer_handle.await {
            warn!("SessionCore: track writer ended abnormally: {}", e);
        }
        settings
    }

    // ── stream events ─────────────────────────────────────────────────────────

    async fn handle_stream_event(&mut self, event: StreamEvent) {
        match event {
            StreamEvent::Started { track } => self.on_stream_started(track).await,
            StreamEvent::MetadataChanged { metadata } => self.on_metadata_changed(metadata).await,
            StreamEvent::SongChanged { completed } => self.on_song_changed(completed),
            StreamEvent::Failed => self.on_stream_failed(),
        }
    }

    async fn on_stream_started(&mut self, track: Option<TrackMetadata>) {
        self.phase = SessionPhase::Connected;
        if self.connection.reconnect_attempts() > 0 {
            self.notifier.on_log("Attempting to reconnect...", false);
        } else {
            self.notifier.on_log("Attempting to connect...", false);
        }
        if let Some(track) = track {
            self.notifier.on_log("Connected!", false);
            self.show_now_playing(&track).await;
        }
    }

    async fn on_metadata_changed(&mut self, metadata: Option<TrackMetadata>) {
        if self.filters.is_empty() {
            self.intent.set(true);
        }
        if self.connection.on_link_up() {
            self.notifier.on_log("Connected!", false);
        }
        let Some(metadata) = metadata else {
            return;
        };

        // Metadata proves the stream works; from here on failures are retried
        self.connection.on_connected();

        let name = metadata.display();
        if self.filters.matches(&name) {
            self.intent.set(true);
            self.notifier.on_log(
                format!(
                    "Found a matching song! Will save when completed playing: {}",
                    name
                ),
                false,
            );
        } else if !self.filters.is_empty() {
            self.intent.set(false);
        }

        self.show_now_playing(&metadata).await;
    }

    fn on_song_changed(&mut self, completed: TrackEvent) {
        let name = match completed.metadata.as_ref() {
            Some(meta) if meta.has_artist() => meta.display(),
            _ => {
                // Startup, ads and station idents come without an artist
                debug!("SessionCore: completed track without artist, not saving");
                self.intent.set(false);
                return;
            }
        };

        let save = self.intent.get() || self.filters.is_empty() || self.filters.matches(&name);
        if save {
            debug!(track = %name, "SessionCore: queueing save");
            self.writes.submit(PendingWrite {
                track: completed,
                destination: self.settings.last_save_path.clone(),
            });
        }

        self.intent.set(false);
    }

    fn on_stream_failed(&mut self) {
        self.connection.on_disconnected();
        self.release_stream();

        if !self.connection.ever_succeeded() {
            self.notifier.on_log(
                "Stream Failed to run. Ensure it's the correct type of url!",
                true,
            );
            self.stop(StopCause::Failed(SessionError::NeverConnected));
            return;
        }

        match self.connection.record_attempt() {
            ReconnectDecision::Retry => {
                warn!(
                    "SessionCore: {} (attempt {}/{})",
                    SessionError::ConnectionLost,
                    self.connection.reconnect_attempts(),
                    self.connection.max_reconnect_attempts()
                );
                self.phase = SessionPhase::Reconnecting;
                self.notifier.on_status(format!(
                    "Reconnecting ({}/{})...",
                    self.connection.reconnect_attempts(),
                    self.connection.max_reconnect_attempts()
                ));
                self.schedule_reconnect();
            }
            ReconnectDecision::GiveUp => {
                self.notifier.on_log(
                    "Tried reconnecting max times. Stream may be down or URL is incorrect.",
                    true,
                );
                let attempts = self.connection.reconnect_attempts();
                self.stop(StopCause::Failed(SessionError::ReconnectExhausted { attempts }));
            }
        }
    }

    async fn show_now_playing(&mut self, track: &TrackMetadata) {
        if !track.has_title() {
            return;
        }
        self.notifier.now_playing(track);
        self.state_manager.set_now_playing(Some(track.clone())).await;
    }

    // ── commands ──────────────────────────────────────────────────────────────

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Start { url } => self.start(url).await,
            Command::Stop => self.stop(StopCause::Requested),
            Command::SaveCurrent => {
                self.intent.set(true);
                self.notifier
                    .on_log("Will save the current track when it completes.", false);
            }
            Command::SetFilters { text } => self.set_filters(text),
            Command::SetSavePath { path } => {
                if persist::check_destination(&path).await.is_err() {
                    self.notifier
                        .warn(format!("Save path invalid: {}", path.display()));
                }
                self.settings.last_save_path = path;
            }
            Command::SetMaxReconnect { value } => {
                self.settings.max_reconnect_attempts = value;
                self.connection.set_max_reconnect_attempts(value);
            }
            Command::GetState => {}
        }
    }

    async fn start(&mut self, url: Option<String>) {
        let url = url
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty())
            .or_else(|| {
                Some(self.settings.last_stream_url.trim().to_string()).filter(|u| !u.is_empty())
            });
        let Some(url) = url else {
            self.notifier.on_log("No stream URL given. Can't start.", true);
            return;
        };

        if let Err(e) = persist::check_destination(&self.settings.last_save_path).await {
            debug!("SessionCore: {}", e);
            self.notifier.on_log("Save Path Invalid! Can't start.", true);
            return;
        }

        // Replace whatever is running without a stop notice
        self.release_stream();
        self.connection.reset();
        self.intent.set(self.filters.is_empty());
        self.settings.last_stream_url = url.clone();
        self.stream_url = Some(url);
        self.phase = SessionPhase::Starting;
        self.notifier.on_status("Starting...");

        if let Err(e) = self.connect_stream() {
            warn!("SessionCore: {}", e);
            self.notifier.on_log(
                "Stream Failed to run. Ensure it's the correct type of url!",
                true,
            );
            self.stop(StopCause::Failed(e));
        }
    }

    fn set_filters(&mut self, text: String) {
        self.filters.rebuild(&text);
        self.settings.filter_text = text;
        info!("SessionCore: {} filter phrase(s)", self.filters.len());
        if self.filters.is_empty() {
            self.intent.set(true);
        } else if !self.intent.get() {
            self.intent.set(false);
        }
    }

    // ── connection lifecycle ──────────────────────────────────────────────────

    fn connect_stream(&mut self) -> Result<(), SessionError> {
        let url = self.stream_url.clone().unwrap_or_default();
        self.generation += 1;
        let sink = EventSink::new(self.generation, self.event_tx.clone());
        let session = self
            .client
            .connect(&url, self.settings.max_buffer_bytes, sink)?;
        self.session = Some(session);
        Ok(())
    }

    fn schedule_reconnect(&mut self) {
        let delay = self.settings.reconnect_delay_ms;
        if delay == 0 {
            self.reconnect();
            return;
        }
        let generation = self.generation;
        let tx = self.event_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(delay)).await;
            let _ = tx.send(SessionEvent::ReconnectDue { generation }).await;
        });
    }

    fn reconnect(&mut self) {
        info!(
            "SessionCore: reconnecting to {:?} (attempt {})",
            self.stream_url,
            self.connection.reconnect_attempts()
        );
        if let Err(e) = self.connect_stream() {
            warn!("SessionCore: reconnect refused: {}", e);
            self.stop(StopCause::Failed(e));
        }
    }

    /// Drop the live connection, if any, and invalidate its events.
    fn release_stream(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.stop();
        }
        self.generation += 1;
    }

    /// End the session.  A no-op unless a session is active.
    fn stop(&mut self, cause: StopCause) {
        if !self.phase.is_active() {
            return;
        }
        self.release_stream();
        self.connection.reset();
        self.phase = SessionPhase::Stopped;
        self.notifier
            .on_log(format!("STREAM STOPPED: {}", cause.describe()), false);
        self.notifier.on_status("Waiting to start.");
    }

    async fn publish(&self) {
        let phase = self.phase;
        let stream_url = self.stream_url.clone();
        let save_path = self.settings.last_save_path.clone();
        let filters = self.filters.phrases().to_vec();
        let save_next = self.intent.get();
        let reconnect_attempts = self.connection.reconnect_attempts();
        let max_reconnect_attempts = self.connection.max_reconnect_attempts();
        self.state_manager
            .update(move |s| {
                s.phase = phase;
                s.stream_url = stream_url;
                s.save_path = save_path;
                s.filters = filters;
                s.save_next = save_next;
                s.reconnect_attempts = reconnect_attempts;
                s.max_reconnect_attempts = max_reconnect_attempts;
            })
            .await;
        self.notifier.state_changed();
    }
}
