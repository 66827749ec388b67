use std::path::PathBuf;

use clap::Parser;
use ripper_daemon::core::{SessionCore, SessionEvent, EVENT_QUEUE_CAPACITY};
use ripper_daemon::notify::{Notification, Notifier};
use ripper_daemon::socket;
use ripper_daemon::stream::IcyStreamClient;
use ripper_proto::config::Config;
use ripper_proto::protocol::Command;
use tokio::sync::{broadcast, oneshot};
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser, Debug)]
#[command(name = "ripperd", version)]
struct Args {
    /// Stream URL to record; defaults to the last one used
    #[arg(long)]
    url: Option<String>,

    /// Directory completed tracks are written to
    #[arg(long)]
    save_dir: Option<PathBuf>,

    /// Only keep tracks containing this phrase (repeatable)
    #[arg(long = "filter")]
    filters: Vec<String>,

    /// Reconnect attempts after the stream drops
    #[arg(long)]
    max_reconnect: Option<u32>,

    /// Wait for a start command instead of connecting right away
    #[arg(long)]
    no_autostart: bool,

    /// Do not open the control socket
    #[arg(long)]
    no_control: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let log_path = ripper_proto::platform::log_path();
    if let Some(dir) = log_path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,ripper_daemon=debug")),
        )
        .init();

    eprintln!("Logging to {}", log_path.display());
    info!("Log file: {:?}", log_path);

    let mut config = Config::load()?;
    info!("Config loaded from: {:?}", Config::config_path());

    if let Some(dir) = args.save_dir {
        config.session.last_save_path = dir;
    }
    if !args.filters.is_empty() {
        config.session.filter_text = args.filters.join("\n");
    }
    if let Some(max) = args.max_reconnect {
        config.session.max_reconnect_attempts = max;
    }

    let notifier = Notifier::new(1024);
    let (console_stop, console_stop_rx) = oneshot::channel();
    let console = spawn_console(notifier.subscribe(), console_stop_rx);

    // All external inputs funnel into SessionCore
    let (event_tx, event_rx) = tokio::sync::mpsc::channel::<SessionEvent>(EVENT_QUEUE_CAPACITY);

    let client = IcyStreamClient::new()?;
    let core = SessionCore::new(
        config.session.clone(),
        Box::new(client),
        notifier.clone(),
        event_tx.clone(),
    );
    let state_manager = core.state_manager();

    if config.control.enabled && !args.no_control {
        match socket::bind(&config.control.bind_address, config.control.port).await {
            Ok(listener) => {
                let _socket_handle = socket::start_server(
                    listener,
                    state_manager.clone(),
                    event_tx.clone(),
                    notifier.clone(),
                );
            }
            Err(e) => warn!("Control socket disabled: {}", e),
        }
    }

    if !args.no_autostart {
        event_tx
            .send(SessionEvent::Command(Command::Start { url: args.url }))
            .await?;
    }

    let shutdown_tx = event_tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received");
            let _ = shutdown_tx.send(SessionEvent::Shutdown).await;
        }
    });
    drop(event_tx);

    info!("Session initialised, running event loop");
    config.session = core.run(event_rx).await;

    if let Err(e) = config.save() {
        warn!("Failed to save config: {}", e);
    }
    drop(notifier);
    let _ = console_stop.send(());
    if let Err(e) = console.await {
        warn!("Console task failed: {}", e);
    }
    Ok(())
}

/// Render notifications on stdout until `stop` fires, then print whatever is
/// still queued.
fn spawn_console(
    mut rx: broadcast::Receiver<Notification>,
    mut stop: oneshot::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                received = rx.recv() => match received {
                    Ok(n) => render(n),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        println!("{} ({} messages skipped)", timestamp(), n);
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                },
                _ = &mut stop => break,
            }
        }
        loop {
            match rx.try_recv() {
                Ok(n) => render(n),
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    println!("{} ({} messages skipped)", timestamp(), n);
                }
                Err(_) => break,
            }
        }
    })
}

fn render(notification: Notification) {
    match notification {
        Notification::Status(text) => println!("[status] {}", text),
        Notification::Log { text, also_status } => {
            println!("{} {}", timestamp(), text);
            if also_status {
                println!("[status] {}", text);
            }
        }
        Notification::Warning(text) => println!("{} WARNING: {}", timestamp(), text),
        Notification::SaveIntentChanged(save_next) => {
            if save_next {
                println!("[status] Saving currently playing song");
            } else {
                println!("[status] Save currently playing song?");
            }
        }
        // Announced through Status already
        Notification::NowPlaying(_) | Notification::StateChanged => {}
    }
}

fn timestamp() -> String {
    chrono::Local::now().format("%H:%M:%S").to_string()
}
