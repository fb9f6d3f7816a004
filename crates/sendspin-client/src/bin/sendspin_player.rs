//! Sendspin player binary entry point
//!
//! Connects to a Sendspin server as a player and renders the stream on the
//! default audio device.
//!
//! # Usage
//!
//! ```bash
//! # Play from a local server
//! cargo run --bin sendspin-player --features cpal-output -- \
//!   --url ws://localhost:8927/sendspin
//!
//! # Custom name, larger buffer, half volume
//! cargo run --bin sendspin-player -- \
//!   --name "Kitchen" --buffer-ahead-ms 800 --volume 0.5 -v
//! ```

use anyhow::Context;
use clap::Parser;
use sendspin_client::playback::AudioSink;
use sendspin_client::sync::MonotonicClock;
use sendspin_client::{load_config, ClientEvent, SendspinClient, SessionState};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Sendspin Player
///
/// Synchronized audio playback from a Sendspin server.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server WebSocket URL (overrides the config file)
    #[arg(short, long, env = "SENDSPIN_URL")]
    url: Option<String>,

    /// Player name shown by the server
    #[arg(short, long, env = "SENDSPIN_NAME")]
    name: Option<String>,

    /// Config file path
    #[arg(short, long, env = "SENDSPIN_CONFIG")]
    config: Option<PathBuf>,

    /// Playback buffer ahead of now, in milliseconds
    #[arg(long, env = "SENDSPIN_BUFFER_AHEAD_MS")]
    buffer_ahead_ms: Option<u64>,

    /// Initial volume (0.0-1.0)
    #[arg(long, env = "SENDSPIN_VOLUME")]
    volume: Option<f32>,

    /// Verbose output (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    info!(version = sendspin_client::version(), "Sendspin player starting");

    let mut config = load_config(args.config.as_deref())?;
    if let Some(url) = args.url {
        config.server_url = url;
    }
    if let Some(name) = args.name {
        config.client_name = name;
    }
    if let Some(ms) = args.buffer_ahead_ms {
        config.playback.buffer_ahead_ms = ms;
    }
    if let Some(volume) = args.volume {
        config.playback.initial_volume = volume;
    }
    config.validate()?;

    info!(
        server_url = %config.server_url,
        name = %config.client_name,
        buffer_ahead_ms = config.playback.buffer_ahead_ms,
        formats = config.capabilities.supported_formats.len(),
        "Player configuration"
    );

    let clock = MonotonicClock::new();
    let sink = open_sink(clock)?;
    let client = SendspinClient::with_clock(config, clock, sink)?;

    let mut events = client.subscribe();
    let printer = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            print_event(&event);
        }
    });

    client
        .connect()
        .await
        .context("Failed to connect to Sendspin server")?;

    let mut state = client.watch_state();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            result = &mut ctrl_c => {
                result.context("Failed to listen for Ctrl+C")?;
                info!("Shutting down");
                break;
            }
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                if *state.borrow() == SessionState::Disconnected {
                    // Let a reconnect start before deciding the session is over
                    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                    if !client.is_running() {
                        info!("Session ended");
                        break;
                    }
                }
            }
        }
    }

    client.disconnect().await?;
    printer.abort();
    Ok(())
}

#[cfg(feature = "cpal-output")]
fn open_sink(clock: MonotonicClock) -> anyhow::Result<Box<dyn AudioSink>> {
    let sink = sendspin_client::CpalSink::open(clock).context("Failed to open audio device")?;
    info!(
        rate = sink.device_rate(),
        channels = sink.device_channels(),
        "Audio output ready"
    );
    Ok(Box::new(sink))
}

#[cfg(not(feature = "cpal-output"))]
fn open_sink(_clock: MonotonicClock) -> anyhow::Result<Box<dyn AudioSink>> {
    tracing::warn!("Built without cpal-output; audio will be discarded");
    Ok(Box::new(sendspin_client::NullSink::new()))
}

fn print_event(event: &ClientEvent) {
    match event {
        ClientEvent::StateChanged { from, to } => println!("state: {} -> {}", from, to),
        ClientEvent::StreamStarted(info) => println!(
            "stream started: {} {} Hz, {} ch",
            info.codec, info.sample_rate, info.channels
        ),
        ClientEvent::StreamEnded { stream_id } => println!("stream ended: {}", stream_id),
        ClientEvent::StreamCleared => println!("stream cleared"),
        ClientEvent::VolumeChanged { volume, muted } => {
            println!("volume: {:.0}%{}", volume * 100.0, if *muted { " (muted)" } else { "" })
        }
        ClientEvent::AudioReady { stream_id } => println!("audio ready: {}", stream_id),
        ClientEvent::Error(report) => eprintln!("{}", report),
    }
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
