use anyhow::{bail, Result};
use clap::Parser;
use ofconn::connection::{ConnectionConfig, ConnectionEvent, ConnectionManager};
use ofconn::{OpenOptions, Registry};
use ofconn_shared::codec::encode_message;
use ofconn_shared::{msg_type, OfpHeader, VersionBitmap};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "ofconn-agent")]
#[command(about = "Keeps a message connection open and answers echo requests", long_about = None)]
#[command(version)]
struct Args {
    /// Target as <transport>:<address>
    #[arg(long, env = "OFCONN_TARGET", default_value = "udp:127.0.0.1:6653")]
    target: String,

    /// Allowed wire versions, comma separated (e.g. "1,4")
    #[arg(long, env = "OFCONN_VERSIONS", value_parser = parse_versions)]
    versions: Option<VersionBitmap>,

    /// Local address to bind before connecting
    #[arg(long, env = "OFCONN_BIND")]
    bind: Option<SocketAddr>,

    /// DSCP value for outgoing packets (0-63)
    #[arg(long, env = "OFCONN_DSCP", value_parser = clap::value_parser!(u8).range(0..=63))]
    dscp: Option<u8>,

    /// Echo probe interval in milliseconds
    #[arg(long, env = "OFCONN_PROBE_INTERVAL")]
    probe_interval: Option<u64>,
}

fn parse_versions(s: &str) -> Result<VersionBitmap> {
    let mut versions = Vec::new();
    for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let v = match part.strip_prefix("0x") {
            Some(hex) => u8::from_str_radix(hex, 16)?,
            None => part.parse::<u8>()?,
        };
        if v == 0 || v > 31 {
            bail!("version {} out of range", v);
        }
        versions.push(v);
    }
    if versions.is_empty() {
        bail!("no versions given");
    }
    Ok(VersionBitmap::from_versions(&versions))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let args = Args::parse();

    let mut config = ConnectionConfig {
        target: args.target,
        open_options: OpenOptions {
            bind: args.bind,
            dscp: args.dscp,
        },
        ..Default::default()
    };
    if let Some(versions) = args.versions {
        config.allowed_versions = versions;
    }
    if let Some(ms) = args.probe_interval {
        config.probe_interval = Duration::from_millis(ms);
    }

    let registry = Arc::new(Registry::with_default_transports());
    info!("ofconn-agent starting: {}", config.target);
    info!("  transports: {}", registry.names().join(", "));
    info!("  versions: {}", config.allowed_versions);

    let hello_version = config.allowed_versions.highest().unwrap_or(ofconn_shared::version::OFP10);
    let mut conn = ConnectionManager::new(config, registry);

    // Main event loop
    loop {
        match conn.recv().await {
            Some(ConnectionEvent::Connected { target }) => {
                info!("Connected to {}", target);
                let hello = encode_message(hello_version, msg_type::HELLO, 0, &[])?;
                if let Err(e) = conn.send(hello).await {
                    error!("Failed to send hello: {}", e);
                }
            }
            Some(ConnectionEvent::Disconnected { reason }) => {
                warn!("Disconnected: {}", reason);
            }
            Some(ConnectionEvent::ConnectionFailed { reason }) => {
                error!("Connection failed: {}", reason);
            }
            Some(ConnectionEvent::Received(msg)) => {
                handle_message(&msg, &conn).await;
            }
            None => {
                error!("Connection manager closed");
                break;
            }
        }
    }

    Ok(())
}

async fn handle_message(msg: &[u8], conn: &ConnectionManager) {
    let header = match OfpHeader::parse(msg) {
        Some(h) => h,
        None => {
            error!("Received message without header");
            return;
        }
    };

    debug!(
        "Received: version=0x{:02x} type={} xid={} len={}",
        header.version, header.msg_type, header.xid, header.length
    );

    match header.msg_type {
        msg_type::ECHO_REQUEST => {
            let body = &msg[ofconn_shared::OFP_HEADER_LEN..];
            match encode_message(header.version, msg_type::ECHO_REPLY, header.xid, body) {
                Ok(reply) => {
                    if let Err(e) = conn.send(reply).await {
                        error!("Failed to send echo reply: {}", e);
                    }
                }
                Err(e) => error!("Failed to build echo reply: {}", e),
            }
        }
        msg_type::HELLO => info!("  Peer hello: version=0x{:02x}", header.version),
        msg_type::ERROR => warn!("  Peer error: xid={}", header.xid),
        msg_type::ECHO_REPLY => debug!("  Echo reply: xid={}", header.xid),
        other => debug!("  Unhandled message type {}", other),
    }
}
