//! Kaleido panel entry point
//!
//! Plays the kaleidoscope's live stream (WHEP) with automatic reconnect and
//! drives the motor and light from console commands.
//!
//! # Usage
//!
//! ```bash
//! # Defaults: public stream, control socket on localhost:5000
//! cargo run -p kaleido-panel
//!
//! # REST control channel with throttled sends
//! cargo run -p kaleido-panel -- \
//!   --channel rest \
//!   --api-base-url http://kaleido.local:5000 \
//!   --rate-limit throttle
//!
//! # Everything from a file, stream URL from the environment
//! KALEIDO_STREAM_URL=https://cam.local/whep cargo run -p kaleido-panel -- --config panel.toml
//! ```
//!
//! Console commands (one per line): `brightness 30`, `frequency -500`,
//! `cw`, `ccw`, `script frequency 500; wait 1000`, `run show.kscript`,
//! `load song.json`, `play 1`, `stop`, `state`.

mod config;

use anyhow::Context;
use clap::Parser;
use config::PanelConfig;
use kaleido_control::{
    ChannelEvent, ChannelKind, ControlChannel, ControlKey, ControlPanel, ControlSynchronizer,
    RateLimitMode, RestChannel, SocketChannel, TracingNotifier, UiEvent,
};
use kaleido_whep::{StreamReconnector, WebRtcPeerFactory};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Kaleido Panel
///
/// Live kaleidoscope stream with motor and light controls.
/// Flags override the config file; env vars stand in for flags.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML config file with [stream] and [control] sections
    #[arg(short, long, env = "KALEIDO_CONFIG")]
    config: Option<PathBuf>,

    /// WHEP endpoint of the camera
    #[arg(long, env = "KALEIDO_STREAM_URL")]
    stream_url: Option<String>,

    /// Bearer token for the WHEP endpoint
    #[arg(long, env = "KALEIDO_STREAM_TOKEN")]
    stream_token: Option<String>,

    /// STUN servers (comma-separated)
    #[arg(long, value_delimiter = ',', env = "KALEIDO_STUN_SERVERS")]
    stun_servers: Option<Vec<String>>,

    /// Give up after this many consecutive failed attempts (default: never)
    #[arg(long, env = "KALEIDO_MAX_ATTEMPTS")]
    max_attempts: Option<u32>,

    /// Control channel: 'websocket' or 'rest'
    #[arg(long, env = "KALEIDO_CHANNEL")]
    channel: Option<ChannelKind>,

    /// Control socket URL (WebSocket channel)
    #[arg(long, env = "KALEIDO_CONTROL_URL")]
    control_url: Option<String>,

    /// Base URL of the control API (REST channel)
    #[arg(long, env = "KALEIDO_API_BASE_URL")]
    api_base_url: Option<String>,

    /// Rate limiting for slider sends: 'debounce' or 'throttle'
    #[arg(long, env = "KALEIDO_RATE_LIMIT")]
    rate_limit: Option<RateLimitMode>,

    /// Debounce quiet period or throttle window in milliseconds
    #[arg(long, env = "KALEIDO_RATE_LIMIT_MS")]
    rate_limit_ms: Option<u64>,
}

impl Args {
    /// Overlay the flags that were given onto `config`
    fn apply_to(&self, config: &mut PanelConfig) {
        if let Some(url) = &self.stream_url {
            config.stream.stream_url = url.clone();
        }
        if let Some(token) = &self.stream_token {
            config.stream.auth_token = Some(token.clone());
        }
        if let Some(servers) = &self.stun_servers {
            config.stream.stun_servers = servers.clone();
        }
        if let Some(max) = self.max_attempts {
            config.stream.max_attempts = Some(max);
        }
        if let Some(kind) = self.channel {
            config.control.channel = kind;
        }
        if let Some(url) = &self.control_url {
            config.control.socket_url = url.clone();
        }
        if let Some(url) = &self.api_base_url {
            config.control.api_base_url = url.clone();
        }
        if let Some(mode) = self.rate_limit {
            config.control.rate_limit = mode;
        }
        if let Some(ms) = self.rate_limit_ms {
            config.control.rate_limit_ms = Some(ms);
        }
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Set up Ctrl+C handler at the very start
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let signalled = Arc::new(AtomicBool::new(false));

    ctrlc::set_handler(move || {
        if signalled.swap(true, Ordering::SeqCst) {
            eprintln!("[SIGNAL] Shutdown already in progress, forcing immediate exit");
            std::process::exit(0);
        }
        eprintln!("\n[SIGNAL] Ctrl+C received, shutting down...");
        let _ = shutdown_tx.send(true);

        std::thread::spawn(|| {
            std::thread::sleep(std::time::Duration::from_secs(3));
            eprintln!("[WATCHDOG] Graceful shutdown timeout (3s), forcing exit");
            std::process::exit(0);
        });
    })
    .context("Failed to set Ctrl+C handler")?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(num_cpus::get())
        .thread_name("kaleido-worker")
        .enable_all()
        .build()?;

    runtime.block_on(async_main(args, shutdown_rx))
}

async fn async_main(args: Args, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
    init_tracing();

    let mut config = PanelConfig::load(args.config.as_deref())?;
    args.apply_to(&mut config);
    config.validate()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        stream_url = %config.stream.stream_url,
        channel = ?config.control.channel,
        rate_limit = ?config.control.rate_limit(),
        "Kaleido panel starting"
    );

    // Live stream
    let reconnector =
        StreamReconnector::with_webrtc(config.stream.clone(), WebRtcPeerFactory::new())?;
    tokio::spawn({
        let reconnector = reconnector.clone();
        async move { reconnector.start().await }
    });

    // Controls
    let mut initial = None;
    let (channel, socket, events): (Arc<dyn ControlChannel>, _, _) = match config.control.channel {
        ChannelKind::WebSocket => {
            let (socket, events) = SocketChannel::spawn(
                config.control.socket_url.clone(),
                config.control.socket_reconnect_delay(),
            );
            let socket = Arc::new(socket);
            (Arc::clone(&socket) as Arc<dyn ControlChannel>, Some(socket), Some(events))
        }
        ChannelKind::Rest => {
            let rest = RestChannel::new(
                config.control.api_base_url.clone(),
                config.control.request_timeout(),
            )?;
            match rest.fetch_state().await {
                Ok(state) => initial = Some(state),
                Err(e) => warn!("Failed to fetch control state: {}", e),
            }
            (Arc::new(rest) as Arc<dyn ControlChannel>, None, None)
        }
    };

    let sync = ControlSynchronizer::new(
        channel,
        Arc::new(TracingNotifier),
        config.control.rate_limit(),
        config.control.rotation(),
    );
    let panel = ControlPanel::new(sync);

    // The stream's status decides whether its dependent controls accept input
    tokio::spawn(follow_stream_status(reconnector.clone(), panel.synchronizer().clone()));

    match events {
        Some(events) => {
            tokio::spawn(forward_channel_events(panel.clone(), events));
        }
        None => {
            // REST has no connect event: seed the sliders and enable at once
            if let Some(state) = initial {
                for (key, value) in [
                    (ControlKey::Brightness, state.brightness),
                    (ControlKey::Frequency, state.frequency),
                ] {
                    panel.dispatch(UiEvent::RemoteValue { key, value }).await;
                }
            }
            panel.dispatch(UiEvent::SocketConnected).await;
        }
    }

    run_console(panel, socket, reconnector, &mut shutdown).await
}

/// Read console commands until stdin closes or Ctrl+C, then shut down
async fn run_console(
    panel: ControlPanel,
    socket: Option<Arc<SocketChannel>>,
    reconnector: StreamReconnector,
    shutdown: &mut watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    info!("Console ready; type 'state' to show the panel");

    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match UiEvent::parse(&line) {
                        Ok(event) => {
                            panel.dispatch(event).await;
                        }
                        Err(e) => warn!("{}", e),
                    }
                }
                Ok(None) => {
                    info!("Console closed; waiting for Ctrl+C");
                    let _ = shutdown.wait_for(|stop| *stop).await;
                    break;
                }
                Err(e) => {
                    warn!("Failed to read console: {}", e);
                    let _ = shutdown.wait_for(|stop| *stop).await;
                    break;
                }
            },
            _ = async { let _ = shutdown.wait_for(|stop| *stop).await; } => break,
        }
    }

    info!("Shutting down");
    if panel.performer().is_running() {
        panel.performer().stop().await;
    }
    panel.synchronizer().shutdown();
    if let Some(socket) = socket {
        socket.close();
    }
    reconnector.stop().await;
    info!("Kaleido panel stopped");

    Ok(())
}

async fn forward_channel_events(
    panel: ControlPanel,
    mut events: mpsc::UnboundedReceiver<ChannelEvent>,
) {
    while let Some(event) = events.recv().await {
        panel.dispatch(UiEvent::from(event)).await;
    }
    debug!("Channel event stream ended");
}

async fn follow_stream_status(reconnector: StreamReconnector, sync: ControlSynchronizer) {
    let mut status = reconnector.subscribe();
    loop {
        let current = *status.borrow_and_update();
        let view = current.view();
        info!(
            status = current.as_str(),
            text = view.text,
            offline_overlay = view.offline_overlay,
            controls_enabled = view.controls_enabled,
            "Stream status"
        );
        sync.set_stream_ready(view.controls_enabled);

        if status.changed().await.is_err() {
            break;
        }
    }
}

fn init_tracing() {
    // RUST_LOG wins; a bad directive falls back to info
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
