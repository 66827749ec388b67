use crate::core::SessionEvent;
use crate::notify::{Notification, Notifier};
use ripper_proto::protocol::{Broadcast, Command, Message, PROTOCOL_VERSION};
use ripper_proto::state::StateManager;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{error, info, warn};

/// Bind the control socket.  Binding happens before returning so callers
/// (and tests using port 0) know the real address.
pub async fn bind(bind_address: &str, port: u16) -> anyhow::Result<TcpListener> {
    let addr = ripper_proto::platform::control_address(bind_address, port);
    let listener = TcpListener::bind(&addr).await?;
    info!("Control socket listening at {}", listener.local_addr()?);
    Ok(listener)
}

pub fn start_server(
    listener: TcpListener,
    state_manager: Arc<StateManager>,
    event_tx: mpsc::Sender<SessionEvent>,
    notifier: Notifier,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut client_id = 0usize;

        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    client_id += 1;
                    let id = client_id;
                    info!("Client {} connected from {}", id, peer);

                    let sm = state_manager.clone();
                    let evt_tx = event_tx.clone();
                    let notify_rx = notifier.subscribe();

                    tokio::spawn(async move {
                        handle_client(stream, sm, id, evt_tx, notify_rx).await;
                        info!("Client {} disconnected", id);
                    });
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                }
            }
        }
    })
}

async fn handle_client(
    stream: TcpStream,
    state_manager: Arc<StateManager>,
    client_id: usize,
    event_tx: mpsc::Sender<SessionEvent>,
    mut notify_rx: broadcast::Receiver<Notification>,
) {
    let (mut read_half, mut write_half) = stream.into_split();
    let mut tmp = [0u8; 4096];
    let mut read_buf: Vec<u8> = Vec::new();

    if let Ok(encoded) = encode_hello(&state_manager).await {
        if write_half.write_all(&encoded).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            result = read_half.read(&mut tmp) => {
                match result {
                    Ok(0) => {
                        info!("Client {} closed connection", client_id);
                        break;
                    }
                    Ok(n) => {
                        read_buf.extend_from_slice(&tmp[..n]);

                        loop {
                            match next_frame(&mut read_buf) {
                                Frame::Incomplete => break,
                                Frame::Command(cmd) => {
                                    info!("Client {} sent command: {:?}", client_id, cmd);

                                    let (reply_tx, reply_rx) = oneshot::channel();
                                    let request = SessionEvent::Request { cmd, reply: reply_tx };
                                    if event_tx.send(request).await.is_err() {
                                        warn!("SessionEvent channel closed");
                                        return;
                                    }

                                    let encoded = match reply_rx.await {
                                        Ok(state) => Message::Broadcast(Broadcast::State { data: state }).encode(),
                                        Err(_) => encode_state(&state_manager).await,
                                    };
                                    if let Ok(encoded) = encoded {
                                        if write_half.write_all(&encoded).await.is_err() {
                                            return;
                                        }
                                    }
                                }
                                Frame::Ignored => {}
                                Frame::Invalid(e) => {
                                    warn!("Client {} sent an unreadable frame: {}", client_id, e);
                                }
                                Frame::TooLarge(len) => {
                                    warn!(
                                        "Client {} announced a {} byte frame (limit {}), closing",
                                        client_id, len, MAX_FRAME_LEN
                                    );
                                    return;
                                }
                            }
                        }
                    }
                    Err(e) => {
                        error!("Read error from client {}: {}", client_id, e);
                        break;
                    }
                }
            }

            msg = notify_rx.recv() => {
                let frames = match msg {
                    Ok(Notification::StateChanged) => match encode_state(&state_manager).await {
                        Ok(encoded) => vec![encoded],
                        Err(_) => Vec::new(),
                    },
                    Ok(notification) => encode_notification(notification),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Client {} missed {} notifications", client_id, n);
                        match encode_state(&state_manager).await {
                            Ok(encoded) => vec![encoded],
                            Err(_) => Vec::new(),
                        }
                    }
                    Err(_) => break,
                };
                for encoded in frames {
                    if write_half.write_all(&encoded).await.is_err() {
                        return;
                    }
                }
            }
        }
    }
}

/// Largest frame a client may send.
const MAX_FRAME_LEN: usize = 1024 * 1024;

#[derive(Debug)]
enum Frame {
    /// Not enough bytes buffered yet.
    Incomplete,
    Command(Command),
    /// A well-formed frame that is not a command.
    Ignored,
    /// A complete frame that does not decode.
    Invalid(String),
    /// The length prefix is over `MAX_FRAME_LEN`.
    TooLarge(usize),
}

/// Take the next frame off the front of `buf`.  Complete frames are always
/// drained, readable or not.
fn next_frame(buf: &mut Vec<u8>) -> Frame {
    if buf.len() < 4 {
        return Frame::Incomplete;
    }
    let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    if len > MAX_FRAME_LEN {
        return Frame::TooLarge(len);
    }
    if buf.len() < 4 + len {
        return Frame::Incomplete;
    }
    let frame = match Message::decode(&buf[..4 + len]) {
        Ok((Message::Command(cmd), _)) => Frame::Command(cmd),
        Ok(_) => Frame::Ignored,
        Err(e) => Frame::Invalid(e.to_string()),
    };
    buf.drain(..4 + len);
    frame
}

/// Frames for a notification that does not need the state snapshot.
fn encode_notification(notification: Notification) -> Vec<Vec<u8>> {
    let broadcasts = match notification {
        Notification::Status(text) => vec![Broadcast::Status { text }],
        Notification::Log { text, also_status } => {
            let mut out = vec![Broadcast::Log {
                message: text.clone(),
            }];
            if also_status {
                out.push(Broadcast::Status { text });
            }
            out
        }
        Notification::Warning(message) => vec![Broadcast::Log { message }],
        Notification::SaveIntentChanged(save_next) => vec![Broadcast::SaveIntent { save_next }],
        Notification::NowPlaying(track) => vec![Broadcast::NowPlaying { track }],
        Notification::StateChanged => Vec::new(),
    };

    broadcasts
        .into_iter()
        .filter_map(|b| Message::Broadcast(b).encode().ok())
        .collect()
}

async fn encode_hello(state_manager: &StateManager) -> anyhow::Result<Vec<u8>> {
    let state = state_manager.get_state().await;
    Message::Broadcast(Broadcast::Hello {
        protocol_version: PROTOCOL_VERSION,
        state,
    })
    .encode()
}

async fn encode_state(state_manager: &StateManager) -> anyhow::Result<Vec<u8>> {
    let state = state_manager.get_state().await;
    Message::Broadcast(Broadcast::State { data: state }).encode()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ripper_proto::protocol::SessionSnapshot;
    use std::path::PathBuf;

    fn frame(json: &[u8]) -> Vec<u8> {
        let mut out = (json.len() as u32).to_be_bytes().to_vec();
        out.extend_from_slice(json);
        out
    }

    async fn read_message(stream: &mut TcpStream, buf: &mut Vec<u8>) -> Message {
        let mut tmp = [0u8; 4096];
        loop {
            if let Ok((msg, consumed)) = Message::decode(buf) {
                buf.drain(..consumed);
                return msg;
            }
            let n = stream.read(&mut tmp).await.unwrap();
            assert!(n > 0, "server closed connection");
            buf.extend_from_slice(&tmp[..n]);
        }
    }

    async fn connect_client() -> (TcpStream, Vec<u8>, mpsc::Receiver<SessionEvent>, Notifier) {
        let sm = Arc::new(StateManager::new(PathBuf::from("/tmp/rips"), 5));
        let notifier = Notifier::new(16);
        let (event_tx, event_rx) = mpsc::channel(8);

        let listener = bind("127.0.0.1", 0).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _server = start_server(listener, sm, event_tx, notifier.clone());

        let mut stream = TcpStream::connect(addr).await.unwrap();
        let mut buf = Vec::new();
        match read_message(&mut stream, &mut buf).await {
            Message::Broadcast(Broadcast::Hello {
                protocol_version,
                state,
            }) => {
                assert_eq!(protocol_version, PROTOCOL_VERSION);
                assert_eq!(state.max_reconnect_attempts, 5);
            }
            other => panic!("expected Hello, got {:?}", other),
        }
        (stream, buf, event_rx, notifier)
    }

    #[test]
    fn test_log_with_status_becomes_two_frames() {
        let frames = encode_notification(Notification::Log {
            text: "Connected!".into(),
            also_status: true,
        });
        assert_eq!(frames.len(), 2);
        let (first, _) = Message::decode(&frames[0]).unwrap();
        let (second, _) = Message::decode(&frames[1]).unwrap();
        assert!(matches!(first, Message::Broadcast(Broadcast::Log { message }) if message == "Connected!"));
        assert!(matches!(second, Message::Broadcast(Broadcast::Status { text }) if text == "Connected!"));
    }

    #[test]
    fn test_next_frame_drains_unreadable_frames() {
        let mut buf = frame(br#"{"cmd":"Bogus"}"#);
        buf.extend(frame(b"not json"));
        buf.extend(Message::Command(Command::SaveCurrent).encode().unwrap());
        let partial = Message::Command(Command::Stop).encode().unwrap();
        buf.extend_from_slice(&partial[..5]);

        assert!(matches!(next_frame(&mut buf), Frame::Invalid(_)));
        assert!(matches!(next_frame(&mut buf), Frame::Invalid(_)));
        assert!(matches!(next_frame(&mut buf), Frame::Command(Command::SaveCurrent)));
        assert!(matches!(next_frame(&mut buf), Frame::Incomplete));
        assert_eq!(buf, &partial[..5]);
    }

    #[test]
    fn test_next_frame_rejects_oversized_length() {
        let mut buf = vec![0xFF, 0xFF, 0xFF, 0xFF, b'{'];
        assert!(matches!(next_frame(&mut buf), Frame::TooLarge(len) if len == u32::MAX as usize));

        let mut buf = ((MAX_FRAME_LEN + 1) as u32).to_be_bytes().to_vec();
        assert!(matches!(next_frame(&mut buf), Frame::TooLarge(_)));
    }

    #[tokio::test]
    async fn test_command_reply_carries_applied_state() {
        let (mut stream, mut buf, mut event_rx, notifier) = connect_client().await;

        let encoded = Message::Command(Command::SaveCurrent).encode().unwrap();
        stream.write_all(&encoded).await.unwrap();

        match event_rx.recv().await {
            Some(SessionEvent::Request {
                cmd: Command::SaveCurrent,
                reply,
            }) => {
                reply
                    .send(SessionSnapshot {
                        rev: 7,
                        save_next: true,
                        ..SessionSnapshot::default()
                    })
                    .unwrap();
            }
            other => panic!("expected SaveCurrent request, got {:?}", other),
        }
        match read_message(&mut stream, &mut buf).await {
            Message::Broadcast(Broadcast::State { data }) => {
                assert_eq!(data.rev, 7);
                assert!(data.save_next);
            }
            other => panic!("expected State, got {:?}", other),
        }

        notifier.on_save_intent_changed(true);
        assert!(matches!(
            read_message(&mut stream, &mut buf).await,
            Message::Broadcast(Broadcast::SaveIntent { save_next: true })
        ));
    }

    #[tokio::test]
    async fn test_bad_frame_does_not_block_later_commands() {
        let (mut stream, _buf, mut event_rx, _notifier) = connect_client().await;

        stream.write_all(&frame(br#"{"cmd":"Bogus"}"#)).await.unwrap();
        let encoded = Message::Command(Command::SaveCurrent).encode().unwrap();
        stream.write_all(&encoded).await.unwrap();

        match event_rx.recv().await {
            Some(SessionEvent::Request {
                cmd: Command::SaveCurrent,
                ..
            }) => {}
            other => panic!("expected SaveCurrent request, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_oversized_frame_closes_client() {
        let (mut stream, _buf, mut event_rx, _notifier) = connect_client().await;

        stream.write_all(&[0xFF, 0xFF, 0xFF, 0xFF]).await.unwrap();

        let mut tmp = [0u8; 64];
        let closed = match stream.read(&mut tmp).await {
            Ok(n) => n == 0,
            Err(_) => true,
        };
        assert!(closed);
        assert!(event_rx.try_recv().is_err());
    }
}
