//! TlsProxy - Main entry point
//!
//! Serves HTTPS with a fresh self-signed certificate and forwards every request to REMOTE

use anyhow::{Context, Result};
use clap::Parser;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tlsproxy::{
    parse_mappings, CertificateMaterial, CertificateOptions, ProxyConfig, ProxyServer,
    ReverseProxyRouter, ServerSettings,
};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// TlsProxy - A TLS-terminating HTTP reverse proxy
#[derive(Parser, Debug)]
#[command(name = "tlsproxy")]
#[command(author = "TlsProxy Contributors")]
#[command(version = "1.0.0")]
#[command(about = "Serve HTTPS with a self-signed certificate and proxy to REMOTE")]
struct Args {
    /// Upstream base URL (http or https)
    remote: String,

    /// Port to listen on
    #[arg(long, env = "PORT", default_value = "8001")]
    port: u16,

    /// Address to bind
    #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0")]
    bind: IpAddr,

    /// DANGEROUS: ignore SSL errors on outgoing connections
    #[arg(long, alias = "disableCertificateValidation")]
    disable_certificate_validation: bool,

    /// Fixed Host header sent upstream
    #[arg(long = "host", env = "OVERRIDE_HOST", default_value = "")]
    override_host: String,

    /// Space separated "prefix target" pairs, e.g. "/img/ http://127.0.0.1:12345"
    #[arg(long, env = "MAPPING", default_value = "")]
    mapping: String,

    /// Host name or IP the certificate is issued for (repeatable)
    #[arg(long = "cert-host")]
    cert_hosts: Vec<String>,

    /// Log level
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    let mappings = parse_mappings(&args.mapping).context("Invalid --mapping")?;
    let config = ProxyConfig::new(&args.remote)
        .context("Invalid REMOTE")?
        .with_host_override(&args.override_host)
        .context("Invalid --host")?
        .with_mappings(mappings);

    info!("Proxying to {}", config.upstream());
    for mapping in config.mappings() {
        info!("Mapping {} -> {}", mapping.prefix(), mapping.target());
    }
    if let Some(host) = config.host_override() {
        info!("Overriding Host header with {:?}", host);
    }

    let settings = ServerSettings {
        listen_addr: SocketAddr::new(args.bind, args.port),
        disable_certificate_validation: args.disable_certificate_validation,
        certificate: CertificateOptions::with_hosts(&args.cert_hosts),
    };

    let certificate = CertificateMaterial::generate(&settings.certificate)
        .context("Failed to generate certificate")?;

    let server = Arc::new(ProxyServer::new(
        settings,
        ReverseProxyRouter::new(config),
        &certificate,
    )?);

    info!("Serving at https://localhost:{}/", args.port);

    server.run().await
}
