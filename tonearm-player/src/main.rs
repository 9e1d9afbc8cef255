//! tonearm-player - demo entry point
//!
//! Plays a generated tone through a player and pulls its frames at the real
//! time frame rate, the way an audio sink would. Events are printed as they
//! arrive, optionally as JSON lines.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tokio::sync::mpsc::UnboundedReceiver;
use tonearm_common::EngineConfig;
use tonearm_player::source::ToneDecoder;
use tonearm_player::{AudioEvent, PlayerManager};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for tonearm-player
#[derive(Parser, Debug)]
#[command(name = "tonearm-player")]
#[command(about = "Plays a test tone through the tonearm playback engine")]
#[command(version)]
struct Args {
    /// Config file (overrides TONEARM_CONFIG and the per-user config)
    #[arg(short, long, env = "TONEARM_CONFIG")]
    config: Option<PathBuf>,

    /// Tone frequency in Hz
    #[arg(short, long, default_value = "440")]
    frequency: f64,

    /// Tone length in milliseconds
    #[arg(short, long, default_value = "5000")]
    duration_ms: u64,

    /// Seek to this position right after starting
    #[arg(long)]
    seek_ms: Option<i64>,

    /// Player volume, 0-1000 with 100 as unity
    #[arg(long, default_value = "100")]
    volume: u16,

    /// Write the raw frame data to this file
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Print events as JSON lines
    #[arg(long)]
    json_events: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = EngineConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    // RUST_LOG wins over the configured level
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        "Starting tonearm-player {} ({} {}, built {})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_PROFILE"),
        env!("BUILD_TIMESTAMP")
    );

    let manager = PlayerManager::with_config(&config).context("Failed to start player manager")?;
    let player = manager.create_player();
    player.set_volume(args.volume);

    let events = player.subscribe();
    let printer = tokio::spawn(print_events(events, args.json_events));

    let track = ToneDecoder::new(args.frequency, args.duration_ms).into_track(format!("tone-{}hz", args.frequency));
    player.play_track(track.clone()).context("Failed to start track")?;

    if let Some(position) = args.seek_ms {
        info!("Seeking to {}ms", position);
        track.set_position(position);
    }

    let mut output = match &args.output {
        Some(path) => Some(BufWriter::new(
            File::create(path).with_context(|| format!("Failed to create {}", path.display()))?,
        )),
        None => None,
    };

    let frame_duration = Duration::from_millis(config.playback.audio_format().frame_duration_ms().max(1));
    let mut ticker = tokio::time::interval(frame_duration);
    let mut frames = 0u64;

    let ctrl_c = signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Received Ctrl+C, stopping");
                player.stop_track();
                break;
            }
            _ = ticker.tick() => {
                if let Some(frame) = player.provide() {
                    frames += 1;
                    if let Some(out) = output.as_mut() {
                        out.write_all(&frame.data).context("Failed to write frame data")?;
                    }
                } else if player.playing_track().is_none() {
                    break;
                }
            }
        }
    }

    if let Some(mut out) = output {
        out.flush().context("Failed to flush output")?;
    }

    info!("Pulled {} frames, position {}ms", frames, track.position());

    let shutdown = tokio::task::spawn_blocking(move || manager.shutdown());
    shutdown.await.context("Shutdown task failed")?;

    // Last player handle; closes the event channel
    drop(player);
    if printer.await.is_err() {
        warn!("Event printer stopped abnormally");
    }

    Ok(())
}

/// Print events until the player's channel closes
async fn print_events(mut events: UnboundedReceiver<AudioEvent>, json: bool) {
    while let Some(event) = events.recv().await {
        if json {
            match serde_json::to_string(&event.to_record()) {
                Ok(line) => println!("{}", line),
                Err(e) => warn!("Failed to serialize {}: {}", event.event_type(), e),
            }
            continue;
        }

        match &event {
            AudioEvent::TrackEnd { track, reason, .. } => info!("Track {} ended: {:?}", track.identifier(), reason),
            AudioEvent::TrackException { track, error, .. } => warn!("Track {} failed: {}", track.identifier(), error),
            AudioEvent::TrackStuck { track, threshold_ms, .. } => {
                warn!("Track {} stuck for {}ms", track.identifier(), threshold_ms)
            }
            other => info!("{} on player {}", other.event_type(), other.player_id()),
        }
    }
}
