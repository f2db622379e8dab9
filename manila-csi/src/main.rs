use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use libmanila::config::DEFAULT_CLOUD_CONFIG;
use libmanila::driver::{DEFAULT_DRIVER_NAME, DEFAULT_REQUEST_TIMEOUT};
use libmanila::transport::server::CsiServer;
use libmanila::transport::server_tls_config;
use libmanila::{CredentialSource, ManilaConnector, ManilaDriver, SessionManager};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum LogFormat {
    Plain,
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "manila-csi", version, about = "CSI controller plugin for OpenStack Manila")]
pub struct Args {
    /// Address the QUIC endpoint listens on
    #[arg(long, value_name = "ADDR", default_value = "0.0.0.0:7443")]
    pub endpoint: SocketAddr,

    /// Cloud-config file holding the `[Global]` credentials
    #[arg(long, value_name = "FILE", default_value = DEFAULT_CLOUD_CONFIG)]
    pub cloud_config: PathBuf,

    /// Name reported by GetPluginInfo
    #[arg(long, default_value = DEFAULT_DRIVER_NAME)]
    pub driver_name: String,

    /// PEM certificate chain served on the QUIC endpoint
    #[arg(long, value_name = "FILE")]
    pub tls_cert: PathBuf,

    /// PEM private key matching --tls-cert
    #[arg(long, value_name = "FILE")]
    pub tls_key: PathBuf,

    /// Per-request deadline in seconds, also applied to backend HTTP calls
    #[arg(long, value_name = "SECS", default_value_t = DEFAULT_REQUEST_TIMEOUT.as_secs())]
    pub request_timeout: u64,

    /// Log output format
    #[arg(long, value_enum, default_value = "plain")]
    pub log_format: LogFormat,
}

fn init_logging(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Plain => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.log_format);

    let request_timeout = Duration::from_secs(args.request_timeout);
    let connector =
        ManilaConnector::new(request_timeout).context("failed to build the backend HTTP client")?;
    let sessions = SessionManager::new(
        CredentialSource::new(&args.cloud_config),
        Arc::new(connector),
    );
    let driver = ManilaDriver::new(sessions)
        .with_name(&args.driver_name)
        .with_request_timeout(request_timeout);

    let tls = server_tls_config(&args.tls_cert, &args.tls_key)
        .context("failed to load the endpoint TLS material")?;
    let server = CsiServer::new(args.endpoint, tls, Arc::new(driver))
        .with_context(|| format!("failed to listen on {}", args.endpoint))?;

    info!(
        driver = %args.driver_name,
        endpoint = %args.endpoint,
        cloud_config = %args.cloud_config.display(),
        "manila CSI controller started"
    );

    tokio::select! {
        served = server.serve() => served.context("CSI server stopped")?,
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                warn!(error = %e, "failed to wait for shutdown signal");
            }
            info!("shutting down");
            server.shutdown().await;
        }
    }
    Ok(())
}
