//! probe_cameras - find local capture devices that deliver frames
//!
//! Opens device indices 0..N in turn, reads one frame from each and reports
//! its native resolution.

use anyhow::{anyhow, Result};
use clap::Parser;

use guardian_ingest::{connector_for, SourceConfig, SourceId};

#[derive(Parser, Debug)]
#[command(author, version, about = "Probe local camera device indices")]
struct Args {
    /// Number of device indices to try, starting at 0.
    #[arg(long, default_value_t = 10)]
    max_index: u32,
}

#[derive(Debug)]
enum ProbeResult {
    Working { width: u32, height: u32 },
    NoFrame(String),
    Unavailable(String),
}

fn probe(index: u32) -> Result<ProbeResult> {
    let config = SourceConfig::new(SourceId::Device(index));
    let mut connector = connector_for(&config)?;
    let mut handle = match connector.open(&config) {
        Ok(handle) => handle,
        Err(err) => return Ok(ProbeResult::Unavailable(err.to_string())),
    };
    let result = match handle.read_frame() {
        Ok(frame) => ProbeResult::Working {
            width: frame.width,
            height: frame.height,
        },
        Err(err) => ProbeResult::NoFrame(err.to_string()),
    };
    handle.close();
    Ok(result)
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args = Args::parse();
    let mut working = Vec::new();
    for index in 0..args.max_index {
        match probe(index)? {
            ProbeResult::Working { width, height } => {
                println!("camera {}: working ({}x{})", index, width, height);
                working.push(index);
            }
            ProbeResult::NoFrame(reason) => {
                println!("camera {}: opened but no frame ({})", index, reason);
            }
            ProbeResult::Unavailable(reason) => {
                log::debug!("camera {}: {}", index, reason);
            }
        }
    }

    if working.is_empty() {
        return Err(anyhow!(
            "no working cameras among indices 0..{}",
            args.max_index
        ));
    }
    println!(
        "working camera indices: {}",
        working
            .iter()
            .map(|index| index.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    );
    Ok(())
}
