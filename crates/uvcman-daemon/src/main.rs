//! uvcman Daemon - Main entry point
//!
//! Runs the session coordinator against a simulated driver configured from
//! a TOML file.

mod config;
mod policy;
mod sim;

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;
use uvcman_session::{Handlers, SessionCoordinator, SessionEvent};

use crate::policy::ConfigPolicy;
use crate::sim::{SimSurfaces, SimulatedDriver};

#[derive(Parser, Debug)]
#[command(name = "uvcd")]
#[command(about = "UVC device session manager daemon")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "uvcd.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Stop after this many seconds instead of waiting for Ctrl-C
    #[arg(long)]
    run_secs: Option<u64>,

    /// Write a default configuration file and exit
    #[arg(long)]
    write_default_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("uvcd v{}", env!("CARGO_PKG_VERSION"));

    if args.write_default_config {
        config::save_default_config(&args.config)?;
        println!("Wrote default configuration to {}", args.config.display());
        return Ok(());
    }

    let config = config::load_config(&args.config)?;
    info!(
        default_width = config.session.default_width,
        default_height = config.session.default_height,
        prefer_h264 = config.session.prefer_h264,
        "Configuration loaded"
    );

    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let driver = Arc::new(SimulatedDriver::new(config.devices.clone(), event_tx));
    let surfaces = Arc::new(SimSurfaces::default());
    let coordinator = Arc::new(SessionCoordinator::new(
        config.to_coordinator_config(),
        driver.clone(),
        surfaces.clone(),
        Handle::current(),
    ));

    let policy = Arc::new(ConfigPolicy::from_config(&config.policy));
    coordinator.set_handlers(Handlers {
        attach: policy.clone(),
        detach: policy.clone(),
        resolution: policy.clone(),
        preview: policy,
    });

    let mut session_events = coordinator.subscribe();
    tokio::spawn(async move {
        loop {
            match session_events.recv().await {
                Ok(SessionEvent::StateChanged { device, from, to }) => {
                    info!(device = %device, from = %from, to = %to, "Session state changed");
                }
                Ok(SessionEvent::SessionCreated(device)) => {
                    info!(device = %device, "Session created");
                }
                Ok(SessionEvent::SessionRemoved(device)) => {
                    info!(device = %device, "Session removed");
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Session event listener lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let pump = tokio::spawn({
        let coordinator = coordinator.clone();
        async move { coordinator.run(event_rx).await }
    });

    driver.attach_all();

    match args.run_secs {
        Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
        None => tokio::signal::ctrl_c().await?,
    }

    for session in coordinator.devices() {
        let id = session.device.id().to_string();
        println!(
            "  - {} [{}] state={} frames={}",
            id,
            session.device,
            session.state,
            surfaces.frames(&id)
        );
    }

    info!("Shutting down");
    driver.detach_all();
    driver.shutdown();
    pump.await?;

    Ok(())
}
