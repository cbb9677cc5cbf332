use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

use canvas_relay_core::config::Config;
use canvas_relay_host::{Dispatcher, HostOptions, spawn_host};
use canvas_relay_surface::{BackendLimits, SoftwareBackend};

mod demo;
mod logging;

#[derive(Parser)]
#[command(
    name = "canvas-relay",
    about = "Remote 2D canvas host and driver over WebSocket",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a surface host that connects out to a driver
    Host {
        /// Driver address, `host:port` or a ws:// URL
        #[arg(long)]
        address: Option<String>,

        /// Delay between a lost connection and the next attempt
        #[arg(long)]
        reconnect_delay_ms: Option<u64>,
    },

    /// Start a driver, draw a sample scene on the first host and save it
    Demo {
        /// Address to listen on
        #[arg(long)]
        bind: Option<String>,

        /// Output PNG path
        #[arg(long, default_value = "canvas-relay-demo.png")]
        out: PathBuf,

        /// Also run a host in this process
        #[arg(long)]
        local: bool,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,
    /// Print the config file path
    Path,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .map(PathBuf::from)
        .unwrap_or_else(Config::default_path);
    let config = Config::load(&config_path)?;

    logging::init(&config.logging(), cli.verbose)?;

    let (warnings, errors) = config.validate();
    for warning in &warnings {
        warn!("Config: {warning}");
    }
    if !errors.is_empty() {
        for err in &errors {
            error!("Config: {err}");
        }
        anyhow::bail!("invalid configuration in {}", config_path.display());
    }

    match cli.command {
        Commands::Host {
            address,
            reconnect_delay_ms,
        } => {
            let mut host = config.host();
            if let Some(address) = address {
                host.address = address;
            }
            if let Some(delay) = reconnect_delay_ms {
                host.reconnect_delay_ms = delay;
            }

            let backend = if host.system_fonts {
                SoftwareBackend::new()
            } else {
                SoftwareBackend::without_system_fonts()
            }
            .with_limits(BackendLimits::from(&host));
            if !backend.has_fonts() {
                warn!("No font faces available; text commands will fail");
            }
            let (handle, task) = spawn_host(HostOptions::from(&host), Dispatcher::new(Box::new(backend)));

            tokio::signal::ctrl_c().await?;
            info!("Shutdown signal received");
            handle.shutdown();
            let dispatcher = task.await?;
            let surfaces = dispatcher.registry().surface_ids();
            info!(count = surfaces.len(), ?surfaces, "Host exited");
        }
        Commands::Demo { bind, out, local } => {
            let bind = bind.unwrap_or_else(|| config.driver().bind);
            demo::run(&bind, &out, local).await?;
        }
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                let json = serde_json::to_string_pretty(&config)?;
                println!("{json}");
            }
            ConfigAction::Path => {
                println!("{}", config_path.display());
            }
        },
    }

    Ok(())
}
