use std::path::PathBuf;
use thiserror::Error;

/// Why a recording session ended on its own.  An invalid save directory is
/// not among them: the writer reports it as `PersistError::InvalidDestination`
/// and the session carries on.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("invalid stream url: {0}")]
    InvalidStreamUrl(#[from] ConnectError),
    #[error("stream failed before it ever delivered metadata")]
    NeverConnected,
    #[error("connection to the stream was lost")]
    ConnectionLost,
    #[error("gave up after {attempts} reconnect attempts")]
    ReconnectExhausted { attempts: u32 },
}

/// Returned synchronously by a stream client when it refuses a URL.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConnectError {
    #[error("'{url}' is not a valid url: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("unsupported scheme '{scheme}' (expected http or https)")]
    UnsupportedScheme { scheme: String },
}

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("save path invalid: {}", .0.display())]
    InvalidDestination(PathBuf),
    #[error("failed to write {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
