//! Interactive Duo Chat Client
//!
//! Terminal client for poking at a running server: log in, chat, and walk
//! through the call-signaling handshake by hand.

use anyhow::Result;
use clap::Parser;
use log::{error, info};
use serde_json::{json, Value};
use std::io::{self, Write};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_rustls::rustls::{self, pki_types::ServerName};
use tokio_rustls::TlsConnector;

use duo_chat::protocol::{read_frame, write_frame};
use duo_chat::{ChatMessage, ClientConfig, InboundEvent, OutboundEvent};

const MAX_FRAME_BYTES: usize = 64 * 1024;

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(name = "duo-interactive")]
#[command(about = "Duo Chat Interactive Client")]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config/client.toml")]
    config: PathBuf,

    /// Server host
    #[arg(long)]
    host: Option<String>,

    /// Server port
    #[arg(short, long)]
    port: Option<u16>,

    /// User id to announce on connect
    #[arg(short, long)]
    user: Option<String>,

    /// Connect over TLS (self-signed certificates accepted)
    #[arg(long)]
    tls: bool,

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
        ClientConfig::from_file(&args.config)?
    } else {
        ClientConfig::default()
    };

    let log_level = effective_log_level(&args, &config);
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&log_level))
        .init();
    if !config_found {
        info!("Config file {} not found, using defaults", args.config.display());
    }

    let host = args.host.unwrap_or(config.server_host.clone());
    let port = args.port.unwrap_or(config.port);
    let user = args.user.or(config.user_id.clone());
    let use_tls = args.tls || config.tls;

    println!("Duo Chat Interactive Client");
    println!("===========================");
    println!("Server: {}:{}{}", host, port, if use_tls { " (TLS)" } else { "" });
    println!();

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    let stream = TcpStream::connect(addr).await?;
    println!("Connected to server");

    if use_tls {
        // Accept self-signed certificates for development
        let tls_config = rustls::ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoVerifier))
            .with_no_client_auth();
        let connector = TlsConnector::from(Arc::new(tls_config));
        let server_name = ServerName::try_from(host.clone())?;
        let tls_stream = connector.connect(server_name, stream).await?;
        run_session(tls_stream, user).await
    } else {
        run_session(stream, user).await
    }
}

/// `--log-level` wins over the config file
fn effective_log_level(args: &Args, config: &ClientConfig) -> String {
    args.log_level.clone().unwrap_or_else(|| config.log_level.clone())
}

async fn run_session<S>(stream: S, user: Option<String>) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (read_half, mut write_half) = tokio::io::split(stream);

    let mut server_task = tokio::spawn(handle_server_events(read_half));

    let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel::<String>();
    let input_task = tokio::spawn(handle_user_input(cmd_tx));

    let mut me = user;
    if let Some(user_id) = &me {
        write_frame(&mut write_half, &InboundEvent::AddUser(user_id.clone())).await?;
        println!("Logged in as {}", user_id);
    }

    print_help();

    loop {
        tokio::select! {
            Some(line) = cmd_rx.recv() => {
                let parts: Vec<&str> = line.split_whitespace().collect();
                if parts.is_empty() {
                    prompt();
                    continue;
                }

                let command = parts[0].to_lowercase();
                if command == "quit" || command == "exit" {
                    println!("Goodbye!");
                    break;
                }
                if command == "help" {
                    print_help();
                    continue;
                }
                if command == "login" {
                    let Some(user_id) = parts.get(1) else {
                        println!("Usage: login <userId>");
                        prompt();
                        continue;
                    };
                    write_frame(&mut write_half, &InboundEvent::AddUser(user_id.to_string())).await?;
                    me = Some(user_id.to_string());
                    continue;
                }

                let Some(from) = me.clone() else {
                    println!("Log in first: login <userId>");
                    prompt();
                    continue;
                };
                match build_event(&from, &parts) {
                    Ok(event) => write_frame(&mut write_half, &event).await?,
                    Err(usage) => {
                        println!("{}", usage);
                        prompt();
                    }
                }
            }
            _ = &mut server_task => {
                println!("Server connection lost");
                break;
            }
        }
    }

    input_task.abort();
    server_task.abort();
    Ok(())
}

/// Turn a command line into an event sent as `from`
fn build_event(from: &str, parts: &[&str]) -> Result<InboundEvent, String> {
    let target = |usage: &str| -> Result<String, String> {
        parts
            .get(1)
            .map(|s| s.to_string())
            .ok_or_else(|| format!("Usage: {}", usage))
    };
    let blob = |default: Value| -> Value {
        if parts.len() > 2 {
            let raw = parts[2..].join(" ");
            serde_json::from_str(&raw).unwrap_or(Value::String(raw))
        } else {
            default
        }
    };

    match parts[0].to_lowercase().as_str() {
        "msg" => {
            let to = target("msg <userId> <text>")?;
            Ok(InboundEvent::SendMsg(ChatMessage::text(
                from,
                &to,
                &parts[2..].join(" "),
            )))
        }
        "call" => Ok(InboundEvent::CallUser {
            from_user_id: from.to_string(),
            to_user_id: target("call <userId> [offer-json]")?,
            offer: blob(json!({"type": "offer", "sdp": ""})),
        }),
        "answer" => Ok(InboundEvent::AnswerCall {
            from_user_id: from.to_string(),
            to_user_id: target("answer <userId> [answer-json]")?,
            answer: blob(json!({"type": "answer", "sdp": ""})),
        }),
        "ice" => Ok(InboundEvent::IceCandidate {
            from_user_id: from.to_string(),
            to_user_id: target("ice <userId> <candidate-json>")?,
            candidate: blob(Value::Null),
        }),
        "end" => Ok(InboundEvent::EndCall {
            from_user_id: from.to_string(),
            to_user_id: target("end <userId>")?,
        }),
        other => Err(format!(
            "Unknown command: {}. Type 'help' for available commands.",
            other
        )),
    }
}

fn print_help() {
    println!();
    println!("Interactive Commands:");
    println!("  login <userId>             - Announce yourself (addUser)");
    println!("  msg <userId> <text>        - Send a chat message");
    println!("  call <userId> [offer]      - Start a call");
    println!("  answer <userId> [answer]   - Answer an incoming call");
    println!("  ice <userId> <candidate>   - Send an ICE candidate");
    println!("  end <userId>               - Hang up");
    println!("  quit                       - Exit client");
    println!();
    prompt();
}

fn prompt() {
    print!("> ");
    let _ = io::stdout().flush();
}

async fn handle_server_events<R>(mut reader: R) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    loop {
        let frame = match read_frame(&mut reader, MAX_FRAME_BYTES).await {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(e) => {
                error!("Error receiving event: {}", e);
                break;
            }
        };

        match OutboundEvent::from_bytes(&frame) {
            Ok(OutboundEvent::OnlineUsers(users)) => {
                println!();
                println!("Online: {}", if users.is_empty() { "(nobody)".to_string() } else { users.join(", ") });
            }
            Ok(OutboundEvent::ShareMsg(msg)) => {
                println!();
                let text = msg.message().unwrap_or("");
                match msg.file_name() {
                    Some(file) => println!("[{} -> {}] {} (file: {})", msg.sender_id, msg.receiver_id, text, file),
                    None => println!("[{} -> {}] {}", msg.sender_id, msg.receiver_id, text),
                }
            }
            Ok(OutboundEvent::IncomingCall { from_user_id, offer }) => {
                println!();
                println!("Incoming call from {} (offer: {})", from_user_id, offer);
            }
            Ok(OutboundEvent::CallAnswered { from_user_id, answer }) => {
                println!();
                println!("{} answered (answer: {})", from_user_id, answer);
            }
            Ok(OutboundEvent::IceCandidate { from_user_id, candidate }) => {
                println!();
                println!("ICE candidate from {}: {}", from_user_id, candidate);
            }
            Ok(OutboundEvent::CallEnded { from_user_id }) => {
                println!();
                println!("{} ended the call", from_user_id);
            }
            Ok(OutboundEvent::CallUnavailable { to_user_id, message }) => {
                println!();
                println!("Cannot call {}: {}", to_user_id, message);
            }
            Err(e) => {
                error!("Undecodable event from server: {}", e);
                continue;
            }
        }
        prompt();
    }
    Ok(())
}

async fn handle_user_input(cmd_tx: mpsc::UnboundedSender<String>) -> Result<()> {
    let stdin = tokio::io::stdin();
    let reader = BufReader::new(stdin);
    let mut lines = reader.lines();

    while let Some(line) = lines.next_line().await? {
        if cmd_tx.send(line).is_err() {
            break;
        }
    }
    Ok(())
}

/// Certificate verifier that accepts any certificate (for development)
#[derive(Debug)]
struct NoVerifier;

impl rustls::client::danger::ServerCertVerifier for NoVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::RSA_PKCS1_SHA256,
            rustls::SignatureScheme::RSA_PKCS1_SHA384,
            rustls::SignatureScheme::RSA_PKCS1_SHA512,
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP384_SHA384,
            rustls::SignatureScheme::ECDSA_NISTP521_SHA512,
            rustls::SignatureScheme::RSA_PSS_SHA256,
            rustls::SignatureScheme::RSA_PSS_SHA384,
            rustls::SignatureScheme::RSA_PSS_SHA512,
            rustls::SignatureScheme::ED25519,
        ]
    }
}
