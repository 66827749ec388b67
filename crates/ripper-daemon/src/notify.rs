//! Outbound notifications for whatever is presenting the session (console,
//! control-socket clients).
//!
//! Every notification is fanned out on a `tokio::sync::broadcast` channel, so
//! it can be raised from any task or thread without knowing who is listening
//! or where they run.  Each listener owns its receiver and renders in its own
//! context.

use ripper_proto::track::TrackMetadata;
use tokio::sync::broadcast;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// Replace the one-line status display.
    Status(String),
    /// Append to the log; `also_status` asks the listener to show it as the
    /// status line as well.
    Log { text: String, also_status: bool },
    /// A log line that reports a problem the session survived.
    Warning(String),
    /// The "save the current track" flag changed.
    SaveIntentChanged(bool),
    NowPlaying(TrackMetadata),
    /// The session snapshot was updated; fetch it from the `StateManager`.
    StateChanged,
}

/// Cheaply cloneable sending half.  Sends never block and never fail: with
/// no listeners the notification is simply dropped.
#[derive(Clone)]
pub struct Notifier {
    tx: broadcast::Sender<Notification>,
}

impl Notifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }

    pub fn on_status(&self, text: impl Into<String>) {
        let text = text.into();
        info!("status: {}", text);
        self.send(Notification::Status(text));
    }

    pub fn on_log(&self, text: impl Into<String>, also_status: bool) {
        let text = text.into();
        info!("{}", text);
        self.send(Notification::Log { text, also_status });
    }

    pub fn warn(&self, text: impl Into<String>) {
        let text = text.into();
        warn!("{}", text);
        self.send(Notification::Warning(text));
    }

    pub fn on_save_intent_changed(&self, save_next: bool) {
        self.send(Notification::SaveIntentChanged(save_next));
    }

    pub fn now_playing(&self, track: &TrackMetadata) {
        self.on_status(format!("Now Playing: {}", track));
        self.send(Notification::NowPlaying(track.clone()));
    }

    pub fn state_changed(&self) {
        self.send(Notification::StateChanged);
    }

    fn send(&self, notification: Notification) {
        // No receivers is fine
        let _ = self.tx.send(notification);
    }
}
