//! ICY (Shoutcast/Icecast) in-band metadata.
//!
//! With `Icy-MetaData: 1` the server interleaves a metadata block after every
//! `icy-metaint` audio bytes: one length byte (×16) followed by that many
//! bytes of `StreamTitle='...';StreamUrl='...';` padded with NULs.

use bytes::Bytes;
use ripper_proto::track::TrackMetadata;
use tracing::{debug, warn};

use super::{AudioFormat, StreamEvent, TrackEvent};

/// Largest metaint we accept; anything above is a misconfigured server.
pub const MAX_METAINT: usize = 256_000;

#[derive(Debug, Clone, PartialEq)]
pub enum IcyFrame {
    Audio(Bytes),
    /// A metadata block carrying a `StreamTitle`, possibly empty.
    Title(String),
}

#[derive(Debug)]
enum DemuxState {
    Audio { remaining: usize },
    Length,
    Meta { remaining: usize, buf: Vec<u8> },
}

/// Splits a raw ICY byte stream into audio and metadata.  Without a metaint
/// everything is audio.
#[derive(Debug)]
pub struct IcyDemuxer {
    metaint: Option<usize>,
    state: DemuxState,
}

impl IcyDemuxer {
    pub fn new(metaint: Option<usize>) -> Self {
        let metaint = metaint.filter(|m| (1..=MAX_METAINT).contains(m));
        Self {
            metaint,
            state: DemuxState::Audio {
                remaining: metaint.unwrap_or(0),
            },
        }
    }

    pub fn feed(&mut self, mut data: &[u8]) -> Vec<IcyFrame> {
        let mut frames = Vec::new();
        let Some(metaint) = self.metaint else {
            if !data.is_empty() {
                frames.push(IcyFrame::Audio(Bytes::copy_from_slice(data)));
            }
            return frames;
        };

        while !data.is_empty() {
            match &mut self.state {
                DemuxState::Audio { remaining } => {
                    let take = (*remaining).min(data.len());
                    frames.push(IcyFrame::Audio(Bytes::copy_from_slice(&data[..take])));
                    *remaining -= take;
                    data = &data[take..];
                    if *remaining == 0 {
                        self.state = DemuxState::Length;
                    }
                }
                DemuxState::Length => {
                    let len = data[0] as usize * 16;
                    data = &data[1..];
                    self.state = if len == 0 {
                        DemuxState::Audio { remaining: metaint }
                    } else {
                        DemuxState::Meta {
                            remaining: len,
                            buf: Vec::with_capacity(len),
                        }
                    };
                }
                DemuxState::Meta { remaining, buf } => {
                    let take = (*remaining).min(data.len());
                    buf.extend_from_slice(&data[..take]);
                    *remaining -= take;
                    data = &data[take..];
                    if *remaining == 0 {
                        if let Some(title) = parse_stream_title(buf) {
                            frames.push(IcyFrame::Title(title));
                        }
                        self.state = DemuxState::Audio { remaining: metaint };
                    }
                }
            }
        }
        frames
    }
}

/// Extract the `StreamTitle` value.  `None` when the block has no title
/// field at all; `Some("")` when the station cleared it.
pub fn parse_stream_title(meta: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(meta);
    let text = text.trim_matches(char::from(0)).trim();

    for (open, close) in [("StreamTitle='", "';"), ("StreamTitle=\"", "\";")] {
        if let Some(start) = text.find(open) {
            let rest = &text[start + open.len()..];
            // Titles may contain the quote char; the terminator is quote + ';'
            let value = match rest.find(close) {
                Some(end) => &rest[..end],
                None => rest.trim_end_matches(['\'', '"']),
            };
            return Some(value.trim().to_string());
        }
    }
    None
}

/// Turns a sequence of audio bytes and titles into track events.
///
/// The track playing when the connection opened is only partially recorded,
/// so it is never reported as completed.
#[derive(Debug)]
pub struct TrackAssembler {
    format: AudioFormat,
    max_buffer_bytes: usize,
    current: Option<String>,
    buffer: Vec<u8>,
    partial: bool,
    overflowed: bool,
}

impl TrackAssembler {
    pub fn new(format: AudioFormat, max_buffer_bytes: usize) -> Self {
        Self {
            format,
            max_buffer_bytes,
            current: None,
            buffer: Vec::new(),
            partial: true,
            overflowed: false,
        }
    }

    pub fn push_audio(&mut self, audio: &[u8]) {
        if self.current.is_none() {
            return;
        }
        let room = self.max_buffer_bytes.saturating_sub(self.buffer.len());
        if audio.len() > room {
            if !self.overflowed {
                warn!(
                    "icy: track buffer full ({} bytes), dropping the rest of {:?}",
                    self.max_buffer_bytes, self.current
                );
                self.overflowed = true;
            }
            self.buffer.extend_from_slice(&audio[..room]);
            return;
        }
        self.buffer.extend_from_slice(audio);
    }

    /// Feed a title from a metadata block.  Repeats of the current title
    /// produce nothing.
    pub fn on_title(&mut self, title: &str) -> Vec<StreamEvent> {
        if self.current.as_deref() == Some(title) {
            return Vec::new();
        }
        let mut events = Vec::new();

        if let Some(previous) = self.current.take() {
            let audio = Bytes::from(std::mem::take(&mut self.buffer));
            if self.partial {
                debug!("icy: discarding partial first track {:?}", previous);
            } else {
                events.push(StreamEvent::SongChanged {
                    completed: TrackEvent {
                        metadata: to_metadata(&previous),
                        audio,
                        format: self.format,
                    },
                });
            }
            self.partial = false;
        }

        self.buffer.clear();
        self.overflowed = false;
        self.current = Some(title.to_string());
        events.push(StreamEvent::MetadataChanged {
            metadata: to_metadata(title),
        });
        events
    }
}

fn to_metadata(title: &str) -> Option<TrackMetadata> {
    if title.trim().is_empty() {
        None
    } else {
        Some(TrackMetadata::from_stream_title(title))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta_block(body: &str) -> Vec<u8> {
        let blocks = body.len().div_ceil(16);
        let mut out = vec![blocks as u8];
        out.extend_from_slice(body.as_bytes());
        out.resize(1 + blocks * 16, 0);
        out
    }

    fn audio_of(frames: &[IcyFrame]) -> Vec<u8> {
        frames
            .iter()
            .filter_map(|f| match f {
                IcyFrame::Audio(a) => Some(a.to_vec()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    fn titles_of(frames: &[IcyFrame]) -> Vec<String> {
        frames
            .iter()
            .filter_map(|f| match f {
                IcyFrame::Title(t) => Some(t.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_parse_stream_title() {
        assert_eq!(
            parse_stream_title(b"StreamTitle='Artist - Song';StreamUrl='';\0\0"),
            Some("Artist - Song".to_string())
        );
        assert_eq!(
            parse_stream_title(b"StreamTitle=\"Quoted\";"),
            Some("Quoted".to_string())
        );
        assert_eq!(
            parse_stream_title(b"StreamTitle='Don't Stop';"),
            Some("Don't Stop".to_string())
        );
        assert_eq!(parse_stream_title(b"StreamTitle='';"), Some(String::new()));
        assert_eq!(parse_stream_title(b"StreamUrl='http://x';"), None);
        assert_eq!(parse_stream_title(b"\0\0\0"), None);
    }

    #[test]
    fn test_demux_split_across_chunks() {
        let metaint = 8;
        let mut raw = vec![1u8; metaint];
        raw.extend(meta_block("StreamTitle='A - B';"));
        raw.extend(vec![2u8; metaint]);
        raw.push(0); // empty metadata block
        raw.extend(vec![3u8; 4]);

        // Feed one byte at a time to hit every state boundary
        let mut demux = IcyDemuxer::new(Some(metaint));
        let mut frames = Vec::new();
        for b in &raw {
            frames.extend(demux.feed(std::slice::from_ref(b)));
        }

        let mut expected_audio = vec![1u8; metaint];
        expected_audio.extend(vec![2u8; metaint]);
        expected_audio.extend(vec![3u8; 4]);
        assert_eq!(audio_of(&frames), expected_audio);
        assert_eq!(titles_of(&frames), vec!["A - B".to_string()]);

        // Same result in one chunk
        let mut demux = IcyDemuxer::new(Some(metaint));
        let frames = demux.feed(&raw);
        assert_eq!(audio_of(&frames), expected_audio);
        assert_eq!(titles_of(&frames), vec!["A - B".to_string()]);
    }

    #[test]
    fn test_demux_without_metaint_is_all_audio() {
        let mut demux = IcyDemuxer::new(None);
        let frames = demux.feed(b"StreamTitle='not metadata';");
        assert_eq!(audio_of(&frames), b"StreamTitle='not metadata';".to_vec());
        assert!(titles_of(&frames).is_empty());

        // Out-of-range metaint is ignored
        let mut demux = IcyDemuxer::new(Some(MAX_METAINT + 1));
        assert_eq!(audio_of(&demux.feed(b"abc")), b"abc".to_vec());
    }

    #[test]
    fn test_assembler_skips_partial_first_track() {
        let mut asm = TrackAssembler::new(AudioFormat::Mp3, 1024);
        asm.push_audio(b"before any title");

        let events = asm.on_title("First - Partial");
        assert_eq!(
            events,
            vec![StreamEvent::MetadataChanged {
                metadata: Some(TrackMetadata::new("First", "Partial"))
            }]
        );
        asm.push_audio(b"tail of first");

        let events = asm.on_title("Second - Whole");
        assert_eq!(events.len(), 1, "partial first track must not complete");

        asm.push_audio(b"second ");
        asm.push_audio(b"audio");
        assert!(asm.on_title("Second - Whole").is_empty());

        let events = asm.on_title("Third - Next");
        match &events[..] {
            [StreamEvent::SongChanged { completed }, StreamEvent::MetadataChanged { metadata }] => {
                assert_eq!(
                    completed.metadata,
                    Some(TrackMetadata::new("Second", "Whole"))
                );
                assert_eq!(completed.audio.as_ref(), b"second audio");
                assert_eq!(metadata, &Some(TrackMetadata::new("Third", "Next")));
            }
            other => panic!("unexpected events: {:?}", other),
        }
    }

    #[test]
    fn test_assembler_caps_buffer() {
        let mut asm = TrackAssembler::new(AudioFormat::Aac, 4);
        asm.on_title("a");
        asm.on_title("b");
        asm.push_audio(b"123");
        asm.push_audio(b"456");
        let events = asm.on_title("c");
        match &events[0] {
            StreamEvent::SongChanged { completed } => {
                assert_eq!(completed.audio.as_ref(), b"1234");
                assert_eq!(completed.format, AudioFormat::Aac);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_cleared_title_completes_with_no_metadata() {
        let mut asm = TrackAssembler::new(AudioFormat::Mp3, 64);
        asm.on_title("x");
        asm.on_title("");
        asm.push_audio(b"ad break");
        let events = asm.on_title("Artist - Back");
        match &events[0] {
            StreamEvent::SongChanged { completed } => assert!(completed.metadata.is_none()),
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
