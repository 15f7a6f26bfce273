//! guardiand - guardian camera ingestion daemon
//!
//! This daemon:
//! 1. Loads source and consumer settings (config file, GUARDIAN_* env, CLI flags)
//! 2. Starts resilient ingestion for one camera source
//! 3. Polls the latest frame at the target rate and hands every Nth new frame
//!    to the detection sink
//! 4. Logs a status line at a fixed interval
//! 5. Stops cleanly on Ctrl-C

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::{Duration, Instant};

use guardian_ingest::{
    parse_resolution, ConnectionState, Frame, GuardianConfig, Ingestion, SourceId,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Guardian camera ingestion daemon")]
struct Args {
    /// Config file (JSON, or TOML with a .toml extension).
    #[arg(long, env = "GUARDIAN_CONFIG")]
    config: Option<PathBuf>,

    /// Camera source: a device index (0, 1, ...) or a stream URI.
    #[arg(long)]
    source: Option<String>,

    /// Frame rate requested from the camera and used for polling.
    #[arg(long)]
    fps: Option<u32>,

    /// Hand every Nth new frame to detection.
    #[arg(long)]
    skip_frames: Option<u32>,

    /// Target resolution as WIDTHxHEIGHT.
    #[arg(long)]
    resolution: Option<String>,

    /// Do not log per-frame previews at info level.
    #[arg(long)]
    no_display: bool,
}

/// Downstream consumer of sampled frames.
trait FrameSink {
    fn process(&mut self, frame: &Frame) -> Result<()>;
}

/// Stand-in for the detection pipeline: records what it was handed.
struct LoggingSink {
    display: bool,
    processed: u64,
}

impl FrameSink for LoggingSink {
    fn process(&mut self, frame: &Frame) -> Result<()> {
        self.processed += 1;
        let age_ms = frame.age_at(Instant::now()).as_millis();
        if self.display {
            log::info!(
                "frame #{} ({}x{}, {} ms old) -> detection",
                frame.sequence,
                frame.width,
                frame.height,
                age_ms
            );
        } else {
            log::debug!("frame #{} -> detection", frame.sequence);
        }
        Ok(())
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut cfg = GuardianConfig::load_from(args.config.as_deref())?;
    if let Some(source) = args.source.as_deref() {
        cfg.source.source = SourceId::parse(source)?;
    }
    if let Some(fps) = args.fps {
        cfg.source.target_fps = fps;
    }
    if let Some(skip) = args.skip_frames {
        cfg.consumer.skip_frames = skip;
    }
    if let Some(resolution) = args.resolution.as_deref() {
        let (width, height) = parse_resolution(resolution)?;
        cfg.source.width = width;
        cfg.source.height = height;
    }
    if args.no_display {
        cfg.consumer.display = false;
    }
    cfg.validate()?;

    log::info!(
        "guardiand {} source={} resolution={}x{} fps={} skip_frames={}",
        env!("CARGO_PKG_VERSION"),
        cfg.source.source,
        cfg.source.width,
        cfg.source.height,
        cfg.source.target_fps,
        cfg.consumer.skip_frames
    );

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .context("set Ctrl-C handler")?;

    let mut ingestion = Ingestion::new(cfg.source.clone());
    ingestion.start()?;

    let mut sink = LoggingSink {
        display: cfg.consumer.display,
        processed: 0,
    };
    let poll_interval = Duration::from_secs_f64(1.0 / cfg.source.target_fps.max(1) as f64);
    let mut last_sequence = 0u64;
    let mut new_frames = 0u64;
    let mut last_status = Instant::now();

    let outcome = loop {
        match rx.recv_timeout(poll_interval) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                log::info!("shutdown signal received, stopping ingestion...");
                break Ok(());
            }
            Err(RecvTimeoutError::Timeout) => {}
        }

        if let Some(frame) = ingestion.latest_frame() {
            if frame.sequence != last_sequence {
                last_sequence = frame.sequence;
                new_frames += 1;
                if new_frames.is_multiple_of(u64::from(cfg.consumer.skip_frames)) {
                    if let Err(err) = sink.process(&frame) {
                        log::warn!("detection sink rejected frame #{}: {}", frame.sequence, err);
                    }
                }
            }
        }

        if last_status.elapsed() >= cfg.consumer.health_log_interval {
            last_status = Instant::now();
            let health = ingestion.health();
            if health.healthy {
                log::info!("status: {} processed={}", health, sink.processed);
            } else {
                log::warn!("status: {} processed={}", health, sink.processed);
            }
            if let Some(fps) = ingestion.measured_fps() {
                log::info!("measured capture rate: {:.1} fps", fps);
            }
        }

        let health = ingestion.health();
        if health.state == ConnectionState::Failed {
            break Err(anyhow!(
                "ingestion failed: {}",
                health.last_error.unwrap_or_else(|| "unknown error".into())
            ));
        }
    };

    ingestion.stop();
    log::info!(
        "guardiand stopped after {} new frames ({} processed)",
        new_frames,
        sink.processed
    );
    outcome
}
