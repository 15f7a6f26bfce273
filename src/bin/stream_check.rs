//! stream_check - measure how stable a camera stream is
//!
//! Runs ingestion for a fixed duration, samples frame rate every second and
//! health every 100 frames, then prints a report with a verdict.

use anyhow::{anyhow, Result};
use clap::Parser;
use std::time::{Duration, Instant};

use guardian_ingest::{Ingestion, SourceConfig, SourceId, StabilityMonitor, Verdict};

#[derive(Parser, Debug)]
#[command(author, version, about = "Measure camera stream stability")]
struct Args {
    /// Camera source: a device index or a stream URI.
    #[arg(long, env = "GUARDIAN_SOURCE", default_value = "0")]
    source: String,

    /// Test duration in seconds.
    #[arg(long, default_value_t = 60)]
    duration: u64,

    /// Requested frame rate.
    #[arg(long, default_value_t = 10)]
    fps: u32,

    /// Print the report as JSON.
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    if args.fps == 0 {
        return Err(anyhow!("fps must be >= 1"));
    }

    let mut config = SourceConfig::new(SourceId::parse(&args.source)?);
    config.target_fps = args.fps;
    log::info!(
        "stream_check: testing {} for {}s at {} fps",
        config.source,
        args.duration,
        args.fps
    );

    let mut ingestion = Ingestion::new(config);
    ingestion.start()?;

    // Poll faster than the capture rate so no frame is missed.
    let poll = Duration::from_secs_f64(1.0 / (args.fps as f64 * 2.0));
    let started = Instant::now();
    let deadline = started + Duration::from_secs(args.duration);
    let mut monitor = StabilityMonitor::new(started);
    let mut last_progress = started;

    while Instant::now() < deadline {
        let now = Instant::now();
        let frame = ingestion.latest_frame();
        if monitor.observe(frame.as_deref(), now) && monitor.wants_health_sample() {
            let health = ingestion.health();
            log::info!("stream_check: health sample: {}", health);
            monitor.record_health(health);
        }
        if now.duration_since(last_progress) >= Duration::from_secs(10) {
            last_progress = now;
            if let Some(fps) = monitor.fps_samples().last() {
                log::info!(
                    "stream_check: {:.0}s elapsed, current {:.1} fps",
                    now.duration_since(started).as_secs_f64(),
                    fps
                );
            }
        }
        std::thread::sleep(poll);
    }

    let final_health = ingestion.health();
    ingestion.stop();
    let report = monitor.finish(final_health, Instant::now());

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", report);
    }

    match report.verdict {
        Verdict::Stable => log::info!("stream is stable"),
        Verdict::Acceptable => log::warn!("stream is usable but drops frames"),
        Verdict::Unstable => log::error!("stream is unstable"),
    }
    Ok(())
}
