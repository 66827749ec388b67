//! Writing completed tracks to disk.
//!
//! Writes go through a bounded queue drained by one writer task, so the
//! session loop never waits on the filesystem.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ripper_proto::state::StateManager;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::debug;

use crate::error::PersistError;
use crate::notify::Notifier;
use crate::stream::TrackEvent;

pub const WRITE_QUEUE_CAPACITY: usize = 32;

/// Characters that are not allowed in file names on at least one of the
/// platforms we run on.  Replaced everywhere so rips can be copied freely.
const ILLEGAL_FILENAME_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Replace every character that cannot appear in a file name with `_`.
pub fn sanitize_file_stem(display: &str) -> String {
    let stem: String = display
        .chars()
        .map(|c| {
            if c.is_control() || ILLEGAL_FILENAME_CHARS.contains(&c) {
                '_'
            } else {
                c
            }
        })
        .collect();
    if stem.trim().is_empty() {
        "untitled".to_string()
    } else {
        stem
    }
}

pub fn display_name(track: &TrackEvent) -> String {
    track
        .metadata
        .as_ref()
        .map(|m| m.display())
        .unwrap_or_default()
}

/// Target path for `track` inside `dir`.
pub fn track_path(track: &TrackEvent, dir: &Path) -> PathBuf {
    let stem = sanitize_file_stem(&display_name(track));
    dir.join(format!("{}.{}", stem, track.format.extension()))
}

/// Created and removed again by `check_destination`.
const WRITE_CHECK_FILE: &str = ".ripper-write-check";

/// The directory must exist and accept new files.  Mode bits alone do not
/// say that (ACLs, read-only mounts), so a scratch file is written.
pub async fn check_destination(dir: &Path) -> Result<(), PersistError> {
    let invalid = || PersistError::InvalidDestination(dir.to_path_buf());
    match tokio::fs::metadata(dir).await {
        Ok(meta) if meta.is_dir() => {}
        _ => return Err(invalid()),
    }
    let scratch = dir.join(WRITE_CHECK_FILE);
    tokio::fs::write(&scratch, b"").await.map_err(|_| invalid())?;
    if let Err(e) = tokio::fs::remove_file(&scratch).await {
        debug!("persist: could not remove {:?}: {}", scratch, e);
    }
    Ok(())
}

/// A refused write means the directory went bad under us; anything else is
/// an I/O failure on that one file.
fn write_error(dir: &Path, path: &Path, source: std::io::Error) -> PersistError {
    match source.kind() {
        ErrorKind::PermissionDenied | ErrorKind::NotFound => {
            PersistError::InvalidDestination(dir.to_path_buf())
        }
        _ => PersistError::Io {
            path: path.to_path_buf(),
            source,
        },
    }
}

/// Write `track` into `dir`, replacing any file of the same name.
pub async fn persist(track: &TrackEvent, dir: &Path) -> Result<PathBuf, PersistError> {
    check_destination(dir).await?;
    let path = track_path(track, dir);
    tokio::fs::write(&path, &track.audio)
        .await
        .map_err(|source| write_error(dir, &path, source))?;
    Ok(path)
}

#[derive(Debug)]
pub struct PendingWrite {
    pub track: TrackEvent,
    pub destination: PathBuf,
}

/// Sending half of the write queue.
#[derive(Clone)]
pub struct WriteQueue {
    tx: mpsc::Sender<PendingWrite>,
    notifier: Notifier,
}

impl WriteQueue {
    /// Hand a write to the writer task without waiting.  A full queue drops
    /// the write with a warning.
    pub fn submit(&self, write: PendingWrite) -> bool {
        match self.tx.try_send(write) {
            Ok(()) => true,
            Err(TrySendError::Full(write)) => {
                self.notifier.warn(format!(
                    "Too many pending saves, dropped: {}",
                    display_name(&write.track)
                ));
                false
            }
            Err(TrySendError::Closed(write)) => {
                self.notifier.warn(format!(
                    "Track writer is gone, dropped: {}",
                    display_name(&write.track)
                ));
                false
            }
        }
    }
}

/// Start the writer task.  It exits once every `WriteQueue` clone is dropped
/// and the queue is drained.
pub fn spawn_writer(
    notifier: Notifier,
    state_manager: Arc<StateManager>,
    capacity: usize,
) -> (WriteQueue, tokio::task::JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<PendingWrite>(capacity);
    let queue = WriteQueue {
        tx,
        notifier: notifier.clone(),
    };

    let handle = tokio::spawn(async move {
        while let Some(write) = rx.recv().await {
            let name = display_name(&write.track);
            match persist(&write.track, &write.destination).await {
                Ok(path) => {
                    debug!("persist: wrote {} bytes to {:?}", write.track.audio.len(), path);
                    notifier.on_log(format!("SAVED SONG: {}", name), false);
                    state_manager.record_saved().await;
                    notifier.state_changed();
                }
                Err(PersistError::InvalidDestination(dir)) => {
                    notifier.warn(format!(
                        "Save path invalid ({})! Skipped: {}",
                        dir.display(),
                        name
                    ));
                }
                Err(e) => {
                    notifier.warn(format!("Failed to save {}: {}", name, e));
                }
            }
        }
        debug!("persist: writer exiting");
    });

    (queue, handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::Notification;
    use crate::stream::AudioFormat;
    use bytes::Bytes;
    use ripper_proto::track::TrackMetadata;
    use tempfile::TempDir;

    fn track(artist: &str, title: &str, audio: &'static [u8]) -> TrackEvent {
        TrackEvent {
            metadata: Some(TrackMetadata::new(artist, title)),
            audio: Bytes::from_static(audio),
            format: AudioFormat::Mp3,
        }
    }

    #[test]
    fn test_sanitize_replaces_each_illegal_char() {
        assert_eq!(
            sanitize_file_stem("AC/DC - What? <Live>: \"1979\" | a*b\\c"),
            "AC_DC - What_ _Live__ _1979_ _ a_b_c"
        );
        assert_eq!(sanitize_file_stem("tab\there"), "tab_here");
        assert_eq!(sanitize_file_stem("Plain Name"), "Plain Name");
        assert_eq!(sanitize_file_stem(""), "untitled");
    }

    #[tokio::test]
    async fn test_persist_writes_and_overwrites() {
        let dir = TempDir::new().unwrap();
        let path = persist(&track("A", "B", b"first"), dir.path()).await.unwrap();
        assert_eq!(path, dir.path().join("A - B.mp3"));
        assert_eq!(std::fs::read(&path).unwrap(), b"first");

        persist(&track("A", "B", b"second"), dir.path()).await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"second");
    }

    #[tokio::test]
    async fn test_persist_rejects_missing_directory() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope");
        let err = persist(&track("A", "B", b"x"), &missing).await.unwrap_err();
        assert!(matches!(err, PersistError::InvalidDestination(p) if p == missing));
        assert!(!missing.exists());
    }

    #[tokio::test]
    async fn test_persist_rejects_file_as_directory() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("file.txt");
        std::fs::write(&file, b"").unwrap();
        assert!(matches!(
            check_destination(&file).await,
            Err(PersistError::InvalidDestination(_))
        ));
    }

    #[tokio::test]
    async fn test_check_leaves_no_scratch_file() {
        let dir = TempDir::new().unwrap();
        check_destination(dir.path()).await.unwrap();
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_refused_write_is_invalid_destination() {
        let dir = Path::new("/music");
        let path = dir.join("A - B.mp3");
        let denied = std::io::Error::from(ErrorKind::PermissionDenied);
        assert!(matches!(
            write_error(dir, &path, denied),
            PersistError::InvalidDestination(p) if p == dir
        ));

        let full = std::io::Error::other("disk full");
        assert!(matches!(
            write_error(dir, &path, full),
            PersistError::Io { path: p, .. } if p == path
        ));
    }

    #[tokio::test]
    async fn test_writer_logs_original_name() {
        let dir = TempDir::new().unwrap();
        let notifier = Notifier::new(32);
        let mut rx = notifier.subscribe();
        let sm = Arc::new(StateManager::new(dir.path().to_path_buf(), 1));
        let (queue, handle) = spawn_writer(notifier, sm.clone(), 4);

        assert!(queue.submit(PendingWrite {
            track: track("Who?", "Live: 1/2", b"data"),
            destination: dir.path().to_path_buf(),
        }));
        assert!(queue.submit(PendingWrite {
            track: track("A", "B", b"data"),
            destination: dir.path().join("missing"),
        }));
        drop(queue);
        handle.await.unwrap();

        assert!(dir.path().join("Who_ - Live_ 1_2.mp3").exists());
        assert_eq!(sm.get_state().await.tracks_saved, 1);

        let mut logs = Vec::new();
        let mut warnings = Vec::new();
        while let Ok(n) = rx.try_recv() {
            match n {
                Notification::Log { text, .. } => logs.push(text),
                Notification::Warning(text) => warnings.push(text),
                _ => {}
            }
        }
        assert_eq!(logs, vec!["SAVED SONG: Who? - Live: 1/2".to_string()]);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("Save path invalid"));
        assert!(warnings[0].ends_with("A - B"));
    }
}
