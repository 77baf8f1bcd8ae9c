//! decoy - service virtualization server.
//!
//! Starts the admin API and, when given a config file, the imposters it
//! declares.

use clap::Parser;
use decoy_server::admin_api::AdminApiServer;
use decoy_server::config::{ConfigFile, EngineSettings};
use decoy_server::imposter::ImposterManager;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "decoy")]
#[command(version, about = "Service virtualization server with stub matching and proxy recording")]
struct Args {
    /// Admin API port
    #[arg(short, long, default_value = "2525", env = "DECOY_PORT")]
    port: u16,

    /// Admin API bind address
    #[arg(long, default_value = "0.0.0.0", env = "DECOY_HOST")]
    host: IpAddr,

    /// Allow JavaScript injection in predicates and responses
    #[arg(long, env = "DECOY_ALLOW_INJECTION")]
    allow_injection: bool,

    /// Wall-clock budget for one injection, in milliseconds
    #[arg(long, default_value = "5000", env = "DECOY_INJECTION_TIMEOUT_MS")]
    injection_timeout_ms: u64,

    /// Timeout for one proxied request, in milliseconds
    #[arg(long, default_value = "30000", env = "DECOY_PROXY_TIMEOUT_MS")]
    proxy_timeout_ms: u64,

    /// YAML or JSON file with `imposters` to create at startup
    #[arg(short, long, env = "DECOY_CONFIG_FILE")]
    config_file: Option<PathBuf>,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, default_value = "info", env = "DECOY_LOG_LEVEL")]
    log_level: String,
}

impl Args {
    fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            allow_injection: self.allow_injection,
            injection_timeout: Duration::from_millis(self.injection_timeout_ms),
            proxy_timeout: Duration::from_millis(self.proxy_timeout_ms),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&args.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let settings = args.engine_settings();
    if settings.allow_injection {
        warn!("JavaScript injection is enabled");
    }
    let manager = Arc::new(ImposterManager::new(settings)?);

    if let Some(path) = &args.config_file {
        let config = ConfigFile::from_file(path)?;
        for imposter in config.imposters {
            let requested = imposter.port;
            let port = manager
                .create_imposter(imposter)
                .await
                .map_err(|e| anyhow::anyhow!("imposter {:?} from {}: {}", requested, path.display(), e))?;
            info!("Loaded imposter on port {} from {}", port, path.display());
        }
    }

    let addr = SocketAddr::new(args.host, args.port);
    let server = AdminApiServer::new(addr, Arc::clone(&manager));

    tokio::select! {
        result = server.run() => {
            if let Err(e) = &result {
                error!("Admin API stopped: {}", e);
            }
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
    }

    manager.shutdown().await;
    Ok(())
}
