//! Network request service.
//!
//! # Architecture Overview
//!
//! ```text
//!   client process                       request-service
//!  ┌──────────────┐  frames  ┌──────────────────────────────────────────────────────────┐
//!  │ ServiceClient│◀────────▶│ net/listener ─▶ service/channel ─▶ protocol/dispatcher    │
//!  └──────────────┘  (unix   │                                        │                  │
//!                    socket) │                                        ▼                  │
//!                            │ session/registry ◀── service/state ──▶ request/machine    │
//!                            │                                        │                  │
//!                            │                     net/pool ◀─────────┤                  │
//!                            │                         │ miss         ▼                  │
//!                            │                     net/connector ─▶ net/tls ─▶ origin ───┼──▶ remote
//!                            │                                 (certs/store)             │     server
//!                            │  ┌──────────────────────────────────────────────────┐    │
//!                            │  │ config · observability · lifecycle               │    │
//!                            │  └──────────────────────────────────────────────────┘    │
//!                            └──────────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;

use request_service::certs::CertificateStore;
use request_service::config::{load_config, ServiceConfig};
use request_service::lifecycle::{signals, startup, Shutdown};
use request_service::net::ClientListener;
use request_service::observability::{logging, metrics};
use request_service::service::Service;

/// Default socket path when neither the config nor the command line names one.
const DEFAULT_SOCKET: &str = "/tmp/request-service.sock";

#[derive(Parser, Debug)]
#[command(name = "request-service")]
#[command(about = "Performs network requests on behalf of sandboxed clients", long_about = None)]
struct Cli {
    /// Certificate bundle to trust (repeatable, loaded in order)
    #[arg(short = 'C', long = "certificate", value_name = "PATH")]
    certificates: Vec<PathBuf>,

    /// Directory holding bundled resources (certs/cacert.pem)
    #[arg(short = 'r', long, value_name = "DIR")]
    resource_root: Option<PathBuf>,

    /// Unix socket clients connect to
    #[arg(long, value_name = "PATH")]
    socket: Option<PathBuf>,

    /// TOML configuration file
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Name the platform supervisor registered for this process
    #[arg(long, value_name = "NAME")]
    mach_server_name: Option<String>,

    /// Wait for a debugger to attach before starting
    #[arg(long)]
    wait_for_debugger: bool,
}

impl Cli {
    /// Command-line values take precedence over the file.
    fn overlay(&self, config: &mut ServiceConfig) {
        if !self.certificates.is_empty() {
            config.certificates.paths = self.certificates.clone();
        }
        if let Some(root) = &self.resource_root {
            config.certificates.resource_root = Some(root.clone());
        }
        if let Some(socket) = &self.socket {
            config.listener.socket_path = Some(socket.clone());
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ServiceConfig::default(),
    };
    cli.overlay(&mut config);

    logging::init(&config.observability.log_level);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), pid = std::process::id(), "request-service starting");

    if cli.wait_for_debugger {
        startup::wait_for_debugger().await;
    }
    startup::register_platform_handle(cli.mach_server_name.as_deref());

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let paths = startup::resolve_certificate_paths(
        &config.certificates.paths,
        config.certificates.resource_root.as_deref(),
        &startup::SYSTEM_BUNDLES,
    )
    .inspect_err(|e| tracing::error!(error = %e, "No certificate bundle"))?;
    let store = CertificateStore::load(&paths).inspect_err(|e| tracing::error!(error = %e, "Failed to load trust roots"))?;

    let socket = config
        .listener
        .socket_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SOCKET));
    let listener = ClientListener::bind(&socket)?;

    let service = Service::new(config, store)?;
    let shutdown = Shutdown::new();
    let events = shutdown.subscribe();
    tokio::spawn(signals::wait_for_termination(shutdown.clone()));

    service.run(Some(listener), events).await;
    shutdown.trigger();

    tracing::info!("Shutdown complete");
    Ok(())
}
