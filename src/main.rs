//! Approximate N-body gravity simulation
//!
//! Headless driver: runs the producer/consumer pipeline with a fixed-rate
//! render loop, records sequences and plays them back.

mod headless;

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use gravity_simulation::{Recording, SimulationConfig};

#[derive(Parser, Debug)]
#[command(version, about = "Approximate N-body gravity simulation")]
struct Cli {
    /// YAML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override the particle count
    #[arg(short = 'n', long, global = true)]
    particles: Option<usize>,

    /// Override the random seed
    #[arg(short, long, global = true)]
    seed: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the interpolated render loop at the target rate
    Run {
        #[arg(long, default_value_t = 10.0)]
        seconds: f64,
        /// Also record the delivered steps to this file
        #[arg(long)]
        record: Option<PathBuf>,
    },
    /// Step as fast as possible and write a recording
    Record {
        output: PathBuf,
        #[arg(long, default_value_t = 600)]
        frames: usize,
    },
    /// Replay a recording
    Play {
        input: PathBuf,
        #[arg(long)]
        looping: bool,
        /// Stop after this many seconds
        #[arg(long)]
        seconds: Option<f64>,
    },
}

fn load_config(cli: &Cli) -> Result<SimulationConfig> {
    let mut config: SimulationConfig = match &cli.config {
        Some(path) => {
            let file =
                File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
            serde_yaml::from_reader(BufReader::new(file))
                .with_context(|| format!("failed to parse {}", path.display()))?
        }
        None => SimulationConfig::default(),
    };
    if let Some(particles) = cli.particles {
        config.particle_count = particles;
    }
    if let Some(seed) = cli.seed {
        config.seed = seed;
    }
    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn write_recording(path: &Path, recording: &Recording) -> Result<()> {
    std::fs::write(path, recording.encode())
        .with_context(|| format!("failed to write {}", path.display()))?;
    log::info!(
        "✓ Wrote {} frames ({} bytes) to {}",
        recording.frame_count(),
        recording.byte_len(),
        path.display()
    );
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    match &cli.command {
        Command::Run { seconds, record } => {
            let config = load_config(&cli)?;
            log::info!(
                "Starting simulation: {} particles, {:?} initializer, {} fps target",
                config.particle_count,
                config.initializer,
                config.target_rate
            );
            if let Some(recording) = headless::run(&config, *seconds, record.is_some())? {
                if let Some(path) = record {
                    write_recording(path, &recording)?;
                }
            }
        }
        Command::Record { output, frames } => {
            let config = load_config(&cli)?;
            let recording = headless::record(&config, *frames)?;
            write_recording(output, &recording)?;
        }
        Command::Play {
            input,
            looping,
            seconds,
        } => {
            let bytes = std::fs::read(input)
                .with_context(|| format!("failed to read {}", input.display()))?;
            let recording = Recording::decode(&bytes)
                .with_context(|| format!("{} is not a valid recording", input.display()))?;
            headless::play(recording, *looping, *seconds)?;
        }
    }

    Ok(())
}
