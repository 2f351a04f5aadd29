//! Operator front-end for the emitter control library.
//!
//! Thin external collaborator: it only calls the public controller and
//! device-manager operations and renders their results.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use euv_emitter::{
    DeviceManager, EmissionRequest, EmitterController, EmitterEvent, EventKind, Settings,
};

#[derive(Parser)]
#[command(name = "euv-emitter", version, about = "Pulsed EUV light source control")]
struct Cli {
    /// Path to the configuration file
    #[arg(long, default_value = "config/emitter.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Load and validate the configuration, then print a summary
    ValidateConfig,
    /// Power on, run one timed emission, print status, power off
    Demo {
        /// Emission power in watts
        #[arg(long, default_value_t = 2.5e-9)]
        power_w: f64,
        /// Emission length in seconds
        #[arg(long, default_value_t = 0.5)]
        duration_secs: f64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load_from(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .or_else(|_| EnvFilter::try_new(&settings.application.log_level))?,
        )
        .init();

    match cli.command {
        Command::ValidateConfig => validate_config(&settings),
        Command::Demo {
            power_w,
            duration_secs,
        } => run_demo(&settings, power_w, duration_secs).await,
    }
}

fn validate_config(settings: &Settings) -> anyhow::Result<()> {
    println!("configuration ok");
    println!("  application : {}", settings.application.name);
    println!("  wavelength  : {:.1} nm", settings.emitter.wavelength_m * 1e9);
    println!("  max power   : {:.3e} W", settings.emitter.max_power_w);
    println!("  warm-up     : {} s", settings.emitter.warmup_secs);
    for device in &settings.devices {
        let enabled = if device.enabled { "enabled" } else { "disabled" };
        println!("  device      : {} ({}, {})", device.id, device.r#type, enabled);
    }
    Ok(())
}

async fn run_demo(settings: &Settings, power_w: f64, duration_secs: f64) -> anyhow::Result<()> {
    let controller = EmitterController::new(settings.emitter.clone())?;

    controller.subscribe(
        EventKind::StateChange,
        Box::new(|event| {
            if let EmitterEvent::StateChange { old, new, .. } = event {
                println!("[event] state: {old} -> {new}");
            }
            Ok(())
        }),
    );
    controller.subscribe(
        EventKind::PowerUpdate,
        Box::new(|event| {
            if let EmitterEvent::PowerUpdate { power_w } = event {
                println!("[event] power: {power_w:.3e} W");
            }
            Ok(())
        }),
    );

    let mut devices = DeviceManager::from_settings(&settings.devices)?;
    if !devices.device_ids().is_empty() {
        let results = devices.connect_all().await;
        for (id, connected) in &results {
            println!("[device] {id}: connected={connected}");
        }
    }

    controller.power_on().await?;
    controller
        .start_emission(EmissionRequest::new(power_w).with_duration(duration_secs))
        .await?;

    tokio::time::sleep(Duration::from_secs_f64(duration_secs) + Duration::from_millis(200)).await;

    let status = controller.status().await;
    println!("{}", serde_json::to_string_pretty(&status)?);

    controller.power_off().await;
    devices.disconnect_all().await;
    Ok(())
}
