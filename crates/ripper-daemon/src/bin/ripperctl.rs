//! `ripperctl` sends one command to a running `ripperd` and prints the
//! resulting session state.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use ripper_proto::protocol::{Broadcast, Command, Message, SessionSnapshot};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

#[derive(Parser, Debug)]
#[command(name = "ripperctl", version)]
struct Args {
    /// Control socket of the daemon
    #[arg(long, default_value_t = ripper_proto::platform::default_control_address())]
    address: String,

    #[command(subcommand)]
    action: Action,
}

#[derive(Subcommand, Debug)]
enum Action {
    /// Start recording, optionally from a new URL
    Start { url: Option<String> },
    Stop,
    /// Keep the track that is playing now
    Save,
    /// Replace the filter phrases (one per argument; none clears them)
    Filters { phrases: Vec<String> },
    SavePath { dir: PathBuf },
    MaxReconnect { value: u32 },
    Status,
}

impl Action {
    fn into_command(self) -> Command {
        match self {
            Action::Start { url } => Command::Start { url },
            Action::Stop => Command::Stop,
            Action::Save => Command::SaveCurrent,
            Action::Filters { phrases } => Command::SetFilters {
                text: phrases.join("\n"),
            },
            Action::SavePath { dir } => Command::SetSavePath { path: dir },
            Action::MaxReconnect { value } => Command::SetMaxReconnect { value },
            Action::Status => Command::GetState,
        }
    }
}

struct DaemonConnection {
    stream: TcpStream,
    read_buffer: Vec<u8>,
}

impl DaemonConnection {
    async fn connect(address: &str) -> anyhow::Result<Self> {
        let stream = TcpStream::connect(address)
            .await
            .with_context(|| format!("cannot reach ripperd at {}", address))?;
        Ok(Self {
            stream,
            read_buffer: Vec::with_capacity(4096),
        })
    }

    async fn send_command(&mut self, cmd: Command) -> anyhow::Result<()> {
        let encoded = Message::Command(cmd).encode()?;
        self.stream.write_all(&encoded).await?;
        Ok(())
    }

    /// Next complete frame, or `None` once the daemon hangs up.
    async fn receive_message(&mut self) -> anyhow::Result<Option<Message>> {
        let mut buf = vec![0u8; 4096];
        loop {
            if self.read_buffer.len() >= 4 {
                if let Ok((msg, consumed)) = Message::decode(&self.read_buffer) {
                    self.read_buffer.drain(..consumed);
                    return Ok(Some(msg));
                }
            }
            let n = self.stream.read(&mut buf).await?;
            if n == 0 {
                return Ok(None);
            }
            self.read_buffer.extend_from_slice(&buf[..n]);
        }
    }
}

fn print_state(state: &SessionSnapshot) {
    println!("phase:        {}", state.phase.label());
    println!(
        "stream:       {}",
        state.stream_url.as_deref().unwrap_or("-")
    );
    println!("save path:    {}", state.save_path.display());
    if state.filters.is_empty() {
        println!("filters:      (none, saving everything)");
    } else {
        println!("filters:      {}", state.filters.join(" | "));
    }
    println!("save next:    {}", if state.save_next { "yes" } else { "no" });
    println!(
        "reconnects:   {}/{}",
        state.reconnect_attempts, state.max_reconnect_attempts
    );
    match &state.now_playing {
        Some(track) => println!("now playing:  {}", track),
        None => println!("now playing:  -"),
    }
    println!("saved:        {}", state.tracks_saved);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let mut conn = DaemonConnection::connect(&args.address).await?;

    match conn.receive_message().await? {
        Some(Message::Broadcast(Broadcast::Hello {
            protocol_version, ..
        })) if protocol_version != ripper_proto::protocol::PROTOCOL_VERSION => {
            anyhow::bail!(
                "ripperd speaks protocol {}, expected {}",
                protocol_version,
                ripper_proto::protocol::PROTOCOL_VERSION
            );
        }
        Some(_) => {}
        None => anyhow::bail!("ripperd closed the connection"),
    }

    conn.send_command(args.action.into_command()).await?;

    while let Some(msg) = conn.receive_message().await? {
        match msg {
            Message::Broadcast(Broadcast::Log { message }) => println!("{}", message),
            Message::Broadcast(Broadcast::State { data }) => {
                print_state(&data);
                return Ok(());
            }
            _ => {}
        }
    }
    anyhow::bail!("ripperd closed the connection before replying")
}
