use serde::{Deserialize, Serialize};
use std::fmt;

/// Artist and title of a track as announced by the stream.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TrackMetadata {
    #[serde(default)]
    pub artist: String,
    #[serde(default)]
    pub title: String,
}

impl TrackMetadata {
    pub fn new(artist: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            artist: artist.into(),
            title: title.into(),
        }
    }

    /// Parse an ICY `StreamTitle` value. Most stations send "Artist - Title";
    /// anything without the separator is treated as a bare title.
    pub fn from_stream_title(raw: &str) -> Self {
        let raw = raw.trim();
        match raw.split_once(" - ") {
            Some((artist, title)) => Self::new(artist.trim(), title.trim()),
            None => Self::new("", raw),
        }
    }

    /// "Artist - Title", or just the title when no artist is known.
    /// Used for filter matching and as the saved filename stem.
    pub fn display(&self) -> String {
        let artist = self.artist.trim();
        let title = self.title.trim();
        match (artist.is_empty(), title.is_empty()) {
            (true, _) => title.to_string(),
            (false, true) => artist.to_string(),
            (false, false) => format!("{} - {}", artist, title),
        }
    }

    pub fn has_artist(&self) -> bool {
        !self.artist.trim().is_empty()
    }

    pub fn has_title(&self) -> bool {
        !self.title.trim().is_empty()
    }
}

impl fmt::Display for TrackMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_stream_title_splits_artist() {
        let meta = TrackMetadata::from_stream_title("  Boards of Canada - Roygbiv ");
        assert_eq!(meta.artist, "Boards of Canada");
        assert_eq!(meta.title, "Roygbiv");
        assert_eq!(meta.display(), "Boards of Canada - Roygbiv");
    }

    #[test]
    fn test_from_stream_title_keeps_later_separators_in_title() {
        let meta = TrackMetadata::from_stream_title("Artist - Song - Live Edit");
        assert_eq!(meta.artist, "Artist");
        assert_eq!(meta.title, "Song - Live Edit");
    }

    #[test]
    fn test_bare_title_has_no_artist() {
        let meta = TrackMetadata::from_stream_title("Station ID jingle");
        assert!(!meta.has_artist());
        assert!(meta.has_title());
        assert_eq!(meta.to_string(), "Station ID jingle");
    }
}
