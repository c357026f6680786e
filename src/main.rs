//! CLI Entry Point for fli-daq
//!
//! Provides command-line control of an FLI camera and filter wheel:
//! - `list`: enumerate attached cameras and filter wheels
//! - `status`: camera status and cooling telemetry as JSON
//! - `expose`: take one exposure and print its header
//! - `cool`: enable or disable cooling
//! - `filter`: show or change the current filter
//!
//! # Usage
//!
//! ```bash
//! fli-daq --mock expose --exptime 1.0 --window 0,0,100,100 --binning 2,2
//! fli-daq cool --setpoint -25
//! fli-daq filter V
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use daq_core::camera::{Binning, Window};
use daq_core::driver::DeviceKind;
use fli_daq::config::{Settings, DEFAULT_CONFIG_PATH};
use fli_daq::daq_driver_fli::{FliCamera, FliFilterWheel};
use fli_daq::tracing_setup::{self, OutputFormat, TracingConfig};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "fli-daq")]
#[command(about = "Finger Lakes Instrumentation camera control", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Use simulated devices instead of libfli
    #[arg(long)]
    mock: bool,

    /// Log output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Compact)]
    log_format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List attached cameras and filter wheels
    List,

    /// Print camera status and cooling telemetry
    Status,

    /// Take one exposure
    Expose {
        /// Exposure time in seconds
        #[arg(long, default_value_t = 1.0)]
        exptime: f64,

        /// Keep the shutter closed
        #[arg(long)]
        dark: bool,

        /// Window as left,top,width,height in unbinned pixels
        #[arg(long, value_parser = parse_window)]
        window: Option<Window>,

        /// Binning as x,y
        #[arg(long, value_parser = parse_binning)]
        binning: Option<Binning>,
    },

    /// Enable or disable cooling
    Cool {
        /// Setpoint in degrees Celsius; defaults to the configured one
        #[arg(long, allow_hyphen_values = true)]
        setpoint: Option<f64>,

        /// Switch cooling off
        #[arg(long, conflicts_with = "setpoint")]
        off: bool,
    },

    /// Show the current filter, or move to another one
    Filter {
        /// Filter to move to
        name: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = Settings::load_from(&cli.config)?;
    tracing_setup::init(TracingConfig::from_settings(&settings)?.with_format(cli.log_format))?;

    let backend = fli_daq::select_backend(cli.mock)?;

    match cli.command {
        Commands::List => {
            for kind in [DeviceKind::Camera, DeviceKind::FilterWheel] {
                let devices = backend.list_devices(kind)?;
                if devices.is_empty() {
                    println!("No {kind} found");
                }
                for device in devices {
                    println!("{:<13} {:<24} {}", kind, device.name, device.path);
                }
            }
            Ok(())
        }
        Commands::Status => {
            let camera = FliCamera::open(backend, settings.camera).await?;
            let report = camera.status_report().await;
            camera.close().await?;
            println!("{}", serde_json::to_string_pretty(&report?)?);
            Ok(())
        }
        Commands::Expose {
            exptime,
            dark,
            window,
            binning,
        } => {
            let camera = FliCamera::open(backend, settings.camera).await?;
            let result = expose(&camera, exptime, !dark, window, binning).await;
            camera.close().await?;
            result
        }
        Commands::Cool { setpoint, off } => {
            let setpoint = setpoint.unwrap_or(settings.camera.setpoint);
            let camera = FliCamera::open(backend, settings.camera).await?;
            let result = async {
                camera.set_cooling(!off, setpoint).await?;
                camera.get_cooling_state().await
            }
            .await;
            camera.close().await?;
            println!("{}", serde_json::to_string_pretty(&result?)?);
            Ok(())
        }
        Commands::Filter { name } => {
            let config = settings
                .filter_wheel
                .context("No [filter_wheel] section in the configuration")?;
            let wheel = FliFilterWheel::open(backend, config).await?;
            let result = async {
                if let Some(name) = &name {
                    wheel.set_filter(name).await?;
                }
                wheel.get_filter().await
            }
            .await;
            wheel.close().await?;
            println!("{}", result?);
            Ok(())
        }
    }
}

async fn expose(
    camera: &FliCamera,
    exptime: f64,
    open_shutter: bool,
    window: Option<Window>,
    binning: Option<Binning>,
) -> Result<()> {
    if !(0.0..=u32::MAX as f64 / 1000.0).contains(&exptime) {
        bail!("Invalid exposure time {exptime}");
    }
    if let Some(window) = window {
        camera.set_window(window)?;
    }
    if let Some(binning) = binning {
        camera.set_binning(binning)?;
    }

    let request = camera.request((exptime * 1000.0).round() as u32, open_shutter);
    let cancel = CancellationToken::new();
    let ctrl_c = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupted, aborting exposure");
                cancel.cancel();
            }
        }
    });

    let result = camera.expose_with_cancel(&request, &cancel).await;
    ctrl_c.abort();
    let image = result?;

    for card in image.header.iter() {
        println!("{:<8}= {:>24} / {}", card.key, card.value.to_string(), card.comment);
    }
    println!("{}x{} pixels", image.frame.width, image.frame.height);
    Ok(())
}

fn parse_window(s: &str) -> Result<Window, String> {
    let parts = parse_list::<i64>(s, 4)?;
    let (left, top) = (
        i32::try_from(parts[0]).map_err(|_| "left is out of range".to_string())?,
        i32::try_from(parts[1]).map_err(|_| "top is out of range".to_string())?,
    );
    let (width, height) = (
        u32::try_from(parts[2]).map_err(|_| "width must be positive".to_string())?,
        u32::try_from(parts[3]).map_err(|_| "height must be positive".to_string())?,
    );
    Ok(Window::new(left, top, width, height))
}

fn parse_binning(s: &str) -> Result<Binning, String> {
    let parts = parse_list::<u32>(s, 2)?;
    Ok(Binning::new(parts[0], parts[1]))
}

fn parse_list<T: std::str::FromStr>(s: &str, len: usize) -> Result<Vec<T>, String> {
    let parts = s
        .split(',')
        .map(|p| p.trim().parse::<T>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| format!("expected {len} comma-separated integers, got '{s}'"))?;
    if parts.len() != len {
        return Err(format!("expected {len} comma-separated integers, got '{s}'"));
    }
    Ok(parts)
}
