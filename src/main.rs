mod command;
mod config;
mod hardware;
mod link;
mod safety;
mod transport;

use anyhow::Result;
use clap::Parser;
use crate::command::CommandExecutor;
use crate::config::{LinkMode, RoverConfig};
use crate::hardware::SimulatedPins;
use crate::safety::{spawn_range_feed, FileRangefinder, LinkWatchdog};
use rover_shared::{ActuatorDriver, Resolver};
use tokio::time::{timeout, Duration};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// How long shutdown waits for the control task to drain
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

#[derive(Parser, Debug)]
#[command(name = "rover-edge", about = "Remote-controlled rover firmware")]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long)]
    config: Option<String>,

    /// Override the configured link adapter
    #[arg(long, value_enum)]
    link: Option<LinkMode>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let cli = Cli::parse();
    let mut config = RoverConfig::load(cli.config.as_deref())?;
    if let Some(mode) = cli.link {
        config.link.mode = mode;
    }

    info!("Rover starting: {}", config.device_id);
    info!("  Link: {:?}", config.link.mode);
    info!("  Drive mode: {:?}", config.drive.mode);
    info!(
        "  Interlock: {} ({} cm, {:?})",
        if config.interlock.enabled { "on" } else { "off" },
        config.interlock.stop_distance_cm,
        config.interlock.policy
    );

    let driver = ActuatorDriver::new(SimulatedPins::new(config.pins.clone()));
    let resolver = Resolver::new(
        driver,
        config.drive.mode,
        config.interlock.resolver_config(),
    );

    let (link, events) = link::channel(config.link.queue_depth);
    let executor = tokio::spawn(CommandExecutor::new(resolver, events).run());

    let mut safety_tasks = Vec::new();
    if let Some(command_timeout) = config.link.command_timeout() {
        safety_tasks.push(LinkWatchdog::new(link.clone(), command_timeout).spawn());
    }
    if config.interlock.enabled {
        match &config.interlock.sensor_path {
            Some(path) => {
                let sensor = FileRangefinder::new(path, config.interlock.sensor_scale);
                safety_tasks.push(spawn_range_feed(
                    sensor,
                    link.with_origin("rangefinder"),
                    Duration::from_millis(config.interlock.poll_interval_ms),
                ));
            }
            None => warn!("Interlock enabled without a sensor_path; no readings will arrive"),
        }
    }

    let adapter = transport::from_config(&config.link);
    info!("Starting {} link", adapter.name());
    let mut adapter_task = tokio::spawn(adapter.run(link.clone()));

    tokio::select! {
        result = &mut adapter_task => match result {
            Ok(Ok(())) => warn!("Link adapter exited"),
            Ok(Err(e)) => error!("Link adapter failed: {:#}", e),
            Err(e) => error!("Link adapter task failed: {}", e),
        },
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown requested");
        }
    }

    adapter_task.abort();
    for task in &safety_tasks {
        task.abort();
    }

    // Stop first; the executor stops again once every sender is gone
    if link.lost("shutdown").await.is_err() {
        error!("Control task already gone");
    }
    drop(link);

    match timeout(SHUTDOWN_GRACE, executor).await {
        Ok(Ok((resolver, stats))) => info!(
            "Vehicle stopped in {:?} after {} commands: {} applied, {} suppressed, {} ignored, \
             {} blocked, {} parse errors, {} forced stops",
            resolver.phase(),
            stats.commands,
            stats.applied,
            stats.suppressed,
            stats.ignored,
            stats.blocked,
            stats.parse_errors,
            stats.forced_stops
        ),
        Ok(Err(e)) => error!("Control task failed: {}", e),
        Err(_) => warn!("Open connections kept the control task alive; exiting stopped"),
    }

    Ok(())
}
