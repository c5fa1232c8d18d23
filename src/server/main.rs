//! Duo Chat Server - Main Entry Point
//!
//! TCP listener (optionally TLS) for presence, chat relay and call signaling.

use anyhow::Result;
use clap::Parser;
use log::{error, info};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_rustls::rustls::{self, pki_types::PrivateKeyDer};
use tokio_rustls::TlsAcceptor;

use duo_chat::config::TlsConfig;
use duo_chat::transport::serve_connection;
use duo_chat::{ConnectionHub, HubOptions, ServerConfig};

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(name = "duo-server")]
#[command(about = "Duo Chat Server - presence and call signaling")]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config/server.toml")]
    config: PathBuf,

    /// Override host to bind to
    #[arg(long)]
    host: Option<String>,

    /// Override listening port
    #[arg(short, long)]
    port: Option<u16>,

    /// Log level
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let config_found = args.config.exists();
    let config = if config_found {
        ServerConfig::from_file(&args.config)?
    } else {
        ServerConfig::default()
    };

    let log_level = args.log_level.clone().unwrap_or(config.log_level.clone());
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&log_level))
        .init();
    if !config_found {
        info!("Config file {} not found, using defaults", args.config.display());
    }

    let host = args.host.unwrap_or(config.host.clone());
    let port = args.port.unwrap_or(config.port);

    let acceptor = match &config.tls {
        Some(tls) => Some(build_acceptor(tls)?),
        None => None,
    };

    let hub = Arc::new(ConnectionHub::new(HubOptions::from(&config)));
    let max_frame_bytes = config.max_frame_bytes;

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    info!(
        "Duo Chat Server listening on {} ({})",
        addr,
        if acceptor.is_some() { "TLS" } else { "plain TCP" }
    );

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer_addr) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        error!("Accept failed: {}", e);
                        continue;
                    }
                };
                let acceptor = acceptor.clone();
                let hub = hub.clone();

                tokio::spawn(async move {
                    let result = match acceptor {
                        Some(acceptor) => match acceptor.accept(stream).await {
                            Ok(tls_stream) => {
                                serve_connection(tls_stream, peer_addr, hub, max_frame_bytes).await
                            }
                            Err(e) => {
                                error!("TLS handshake failed for {}: {}", peer_addr, e);
                                return;
                            }
                        },
                        None => serve_connection(stream, peer_addr, hub, max_frame_bytes).await,
                    };
                    if let Err(e) = result {
                        error!("Client {} error: {}", peer_addr, e);
                    }
                });
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                return Ok(());
            }
        }
    }
}

fn build_acceptor(tls: &TlsConfig) -> Result<TlsAcceptor> {
    let certs = load_certs(&tls.certfile)?;
    let key = load_key(&tls.keyfile)?;

    let tls_config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)?;

    Ok(TlsAcceptor::from(Arc::new(tls_config)))
}

/// Load TLS certificates
fn load_certs(path: &Path) -> Result<Vec<rustls::pki_types::CertificateDer<'static>>> {
    let file = std::fs::File::open(path)?;
    let mut reader = std::io::BufReader::new(file);
    let certs = rustls_pemfile::certs(&mut reader).collect::<Result<Vec<_>, _>>()?;
    Ok(certs)
}

/// Load TLS private key
fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let file = std::fs::File::open(path)?;
    let mut reader = std::io::BufReader::new(file);
    let key = rustls_pemfile::private_key(&mut reader)?;
    key.ok_or_else(|| anyhow::anyhow!("No private key found in {}", path.display()))
}
