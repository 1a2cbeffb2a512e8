//! TinyHAL CLI Application

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tinyhal_core::domain::audio::{DeviceMask, Direction};
use tinyhal_core::domain::config::{device_mask, load_routes, HalConfig, Properties};
use tinyhal_core::domain::routing::RouteTable;
use tinyhal_infra::audio::{
    AudioDevice, ControlWrite, DeviceSnapshot, MixerLog, NullPcm, PcmBackend, SimMixer, WavPcm,
    INPUT_CONFIG,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tinyhal")]
#[command(about = "Inspect and exercise TinyHAL audio routes", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// HAL settings file (TOML)
    #[arg(long, global = true)]
    hal_config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List the devices a route file declares
    Devices {
        /// Route description; defaults to the board's file
        #[arg(long)]
        routes: Option<PathBuf>,
    },

    /// Run a playback and capture cycle against the software mixer
    Simulate {
        /// Route description; defaults to the board's file
        #[arg(long)]
        routes: Option<PathBuf>,

        /// Output devices, comma separated (e.g. speaker,headphone)
        #[arg(long, default_value = "speaker")]
        output: String,

        /// Input devices, comma separated (e.g. builtin-mic)
        #[arg(long, default_value = "builtin-mic")]
        input: String,

        /// Frames moved through each stream
        #[arg(long, default_value_t = 1920)]
        frames: usize,

        /// Record playback into WAV files in this directory
        #[arg(long)]
        wav_dir: Option<PathBuf>,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
}

/// Control writes issued during one step of the simulation
#[derive(Serialize)]
struct Phase {
    name: &'static str,
    writes: Vec<ControlWrite>,
}

#[derive(Serialize)]
struct Report {
    phases: Vec<Phase>,
    device: DeviceSnapshot,
}

fn hal_config(path: Option<&Path>) -> anyhow::Result<HalConfig> {
    if let Some(path) = path {
        return HalConfig::load_from_file(path)
            .with_context(|| format!("loading {}", path.display()));
    }

    let default = dirs::config_dir().map(|dir| dir.join("tinyhal").join("hal.toml"));
    match default {
        Some(path) if path.exists() => HalConfig::load_from_file(&path)
            .with_context(|| format!("loading {}", path.display())),
        _ => Ok(HalConfig::default()),
    }
}

fn route_path(config: &HalConfig, routes: Option<PathBuf>) -> anyhow::Result<PathBuf> {
    match routes {
        Some(path) => Ok(path),
        None => {
            let properties = Properties::load(&config.build_prop)?;
            Ok(config.route_file(&properties))
        }
    }
}

fn parse_devices(names: &str, direction: Direction) -> anyhow::Result<DeviceMask> {
    let mut mask = DeviceMask::NONE;

    for name in names.split(',').map(str::trim).filter(|n| !n.is_empty()) {
        let Some(device) = device_mask(name) else {
            bail!("unknown device '{}'", name);
        };
        if device.direction() != direction {
            bail!("'{}' is not an {} device", name, direction);
        }
        mask |= device;
    }

    Ok(mask)
}

fn list_devices(table: &RouteTable) {
    println!("{:<14} {:>12} {:>4} {:>4}", "DEVICE", "MASK", "ON", "OFF");
    for entry in table.entries() {
        println!(
            "{:<14} {:>12} {:>4} {:>4}",
            entry.name,
            entry.mask.to_string(),
            entry.on.len(),
            entry.off.len()
        );
    }
    println!("Default sequence: {} controls", table.defaults().len());
    println!("Supported devices: {}", table.supported_devices());
}

fn tone(frames: usize, channels: usize) -> Vec<u8> {
    (0..frames)
        .flat_map(|i| {
            let phase = 2.0 * std::f32::consts::PI * 440.0 * i as f32 / 44100.0;
            let sample = (phase.sin() * 8192.0) as i16;
            std::iter::repeat(sample).take(channels)
        })
        .flat_map(i16::to_le_bytes)
        .collect()
}

fn simulate(
    table: RouteTable,
    output: DeviceMask,
    input: DeviceMask,
    frames: usize,
    pcm: Box<dyn PcmBackend>,
) -> anyhow::Result<Report> {
    let mixer = SimMixer::from_table(&table, 2);
    let log: MixerLog = mixer.log();
    let mut phases = Vec::new();

    let device = AudioDevice::with_routes(table, Box::new(mixer), pcm);
    phases.push(Phase { name: "open", writes: log.take() });

    let mut out = device.open_output_stream(output)?;
    phases.push(Phase { name: "open_output", writes: log.take() });

    let buffer = tone(frames, out.channels() as usize);
    out.write(&buffer)?;
    phases.push(Phase { name: "write", writes: log.take() });

    out.standby()?;
    phases.push(Phase { name: "output_standby", writes: log.take() });

    let stream_in = device.open_input_stream(input, &INPUT_CONFIG)?;
    phases.push(Phase { name: "open_input", writes: log.take() });

    let mut captured = vec![0u8; frames * INPUT_CONFIG.channels as usize * 2];
    stream_in.read(&mut captured)?;
    phases.push(Phase { name: "read", writes: log.take() });

    stream_in.standby()?;
    phases.push(Phase { name: "input_standby", writes: log.take() });

    device.close_output_stream(out)?;
    device.close_input_stream(stream_in)?;

    let snapshot = device.dump();
    device.close();

    Ok(Report {
        phases,
        device: snapshot,
    })
}

fn print_report(report: &Report) {
    for phase in &report.phases {
        println!("== {} ({} writes)", phase.name, phase.writes.len());
        for write in &phase.writes {
            println!("   {}", write);
        }
    }
    println!();
    print!("{}", report.device);
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = hal_config(cli.hal_config.as_deref())?;

    match cli.command {
        Command::Devices { routes } => {
            let path = route_path(&config, routes)?;
            let table =
                load_routes(&path).with_context(|| format!("loading {}", path.display()))?;
            list_devices(&table);
        }
        Command::Simulate {
            routes,
            output,
            input,
            frames,
            wav_dir,
            json,
        } => {
            let output = parse_devices(&output, Direction::Output)?;
            let input = parse_devices(&input, Direction::Input)?;

            let path = route_path(&config, routes)?;
            let table =
                load_routes(&path).with_context(|| format!("loading {}", path.display()))?;

            let pcm: Box<dyn PcmBackend> = match wav_dir {
                Some(dir) => {
                    std::fs::create_dir_all(&dir)
                        .with_context(|| format!("creating {}", dir.display()))?;
                    Box::new(WavPcm::new(dir))
                }
                None => Box::new(NullPcm),
            };

            tracing::info!(output = %output, input = %input, frames, "Simulating stream cycle");
            let report = simulate(table, output, input, frames, pcm)?;

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_report(&report);
            }
        }
    }

    Ok(())
}
