//! Connection manager with automatic reconnection

use crate::registry::Registry;
use crate::transport::{OpenOptions, StreamError, Wait};
use crate::vconn::{Vconn, VconnError};
use anyhow::{anyhow, Result};
use bytes::Bytes;
use futures::future::poll_fn;
use ofconn_shared::codec::encode_message;
use ofconn_shared::{msg_type, probe, version, VersionBitmap};
use std::sync::Arc;
use std::task::Poll;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval_at, timeout, Instant};
use tracing::{debug, info, warn};

/// Events emitted by the connection manager
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// Connection is up and ready for traffic
    Connected { target: String },
    /// An established connection went away
    Disconnected { reason: String },
    /// One complete message from the peer
    Received(Bytes),
    /// Opening or connecting failed; a retry follows after backoff
    ConnectionFailed { reason: String },
}

/// Configuration for connection manager
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// `<transport>:<address>`, e.g. `udp:127.0.0.1:6653`
    pub target: String,
    pub allowed_versions: VersionBitmap,
    pub open_options: OpenOptions,
    /// Reconnection delay (initial)
    pub reconnect_delay: Duration,
    /// Maximum reconnection delay
    pub max_reconnect_delay: Duration,
    /// Connection timeout
    pub connect_timeout: Duration,
    /// Echo request period, for transports that need probes
    pub probe_interval: Duration,
    /// Silence after which a probed connection is dropped
    pub inactivity_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            target: format!("udp:127.0.0.1:{}", ofconn_shared::OFP_PORT),
            allowed_versions: VersionBitmap::ALL,
            open_options: OpenOptions::default(),
            reconnect_delay: Duration::from_millis(probe::RECONNECT_DELAY_MS),
            max_reconnect_delay: Duration::from_millis(probe::MAX_RECONNECT_DELAY_MS),
            connect_timeout: Duration::from_secs(5),
            probe_interval: Duration::from_millis(probe::PROBE_INTERVAL_MS),
            inactivity_timeout: Duration::from_millis(probe::INACTIVITY_TIMEOUT_MS),
        }
    }
}

/// Manages one persistent connection
pub struct ConnectionManager {
    config: ConnectionConfig,
    /// Channel to send messages to the peer
    outbound_tx: mpsc::Sender<Bytes>,
    /// Channel to receive connection events
    event_rx: mpsc::Receiver<ConnectionEvent>,
}

impl ConnectionManager {
    /// Create a new connection manager and start the connection loop
    pub fn new(config: ConnectionConfig, registry: Arc<Registry>) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::channel::<Bytes>(100);
        let (event_tx, event_rx) = mpsc::channel::<ConnectionEvent>(100);

        let config_clone = config.clone();
        tokio::spawn(async move {
            connection_loop(config_clone, registry, outbound_rx, event_tx).await;
        });

        Self {
            config,
            outbound_tx,
            event_rx,
        }
    }

    /// Queue a message for the peer
    pub async fn send(&self, msg: Bytes) -> Result<()> {
        self.outbound_tx
            .send(msg)
            .await
            .map_err(|_| anyhow!("Connection closed"))
    }

    /// Receive the next connection event
    pub async fn recv(&mut self) -> Option<ConnectionEvent> {
        self.event_rx.recv().await
    }

    pub fn target(&self) -> &str {
        &self.config.target
    }

    /// Get a clone of the sender for outbound messages
    pub fn get_sender(&self) -> mpsc::Sender<Bytes> {
        self.outbound_tx.clone()
    }
}

/// Main connection loop with reconnection logic
async fn connection_loop(
    config: ConnectionConfig,
    registry: Arc<Registry>,
    mut outbound_rx: mpsc::Receiver<Bytes>,
    event_tx: mpsc::Sender<ConnectionEvent>,
) {
    let mut reconnect_delay = config.reconnect_delay;

    loop {
        match establish(&config, &registry).await {
            Ok(mut vconn) => {
                reconnect_delay = config.reconnect_delay;

                let _ = event_tx
                    .send(ConnectionEvent::Connected {
                        target: config.target.clone(),
                    })
                    .await;

                let result = drive_connection(&mut vconn, &config, &mut outbound_rx, &event_tx).await;
                vconn.close();
                match result {
                    Ok(()) => {
                        info!("{}: outbound channel closed, stopping", config.target);
                        return;
                    }
                    Err(reason) => {
                        let _ = event_tx
                            .send(ConnectionEvent::Disconnected {
                                reason: reason.to_string(),
                            })
                            .await;
                    }
                }
            }
            Err(e) => {
                let _ = event_tx
                    .send(ConnectionEvent::ConnectionFailed {
                        reason: e.to_string(),
                    })
                    .await;
            }
        }

        if event_tx.is_closed() {
            debug!("{}: event receiver gone, stopping", config.target);
            return;
        }

        // Wait before reconnecting
        tokio::time::sleep(reconnect_delay).await;

        // Exponential backoff
        reconnect_delay = std::cmp::min(reconnect_delay * 2, config.max_reconnect_delay);
    }
}

/// Open the target and wait for it to leave `Connecting`
async fn establish(config: &ConnectionConfig, registry: &Registry) -> Result<Vconn> {
    let mut vconn = registry.open_with(&config.target, config.allowed_versions, &config.open_options)?;

    let connected = async {
        loop {
            match vconn.connect() {
                Ok(()) => return Ok(()),
                Err(VconnError::WouldBlock) => {
                    poll_fn(|cx| vconn.wait(cx, Wait::Connect)).await;
                }
                Err(e) => return Err(e),
            }
        }
    };

    let outcome = timeout(config.connect_timeout, connected).await;
    match outcome {
        Ok(Ok(())) => Ok(vconn),
        Ok(Err(e)) => {
            vconn.close();
            Err(e.into())
        }
        Err(_) => {
            vconn.close();
            Err(anyhow!("Timed out connecting to {}", config.target))
        }
    }
}

enum Step {
    Io,
    Outbound(Bytes),
    Probe,
    Shutdown,
}

/// Handle an established connection until it fails or the outbound
/// channel closes
async fn drive_connection(
    vconn: &mut Vconn,
    config: &ConnectionConfig,
    outbound_rx: &mut mpsc::Receiver<Bytes>,
    event_tx: &mpsc::Sender<ConnectionEvent>,
) -> Result<()> {
    let probes = vconn.needs_probes();
    let mut probe_interval = interval_at(Instant::now() + config.probe_interval, config.probe_interval);
    let mut last_rx = Instant::now();
    let mut probe_xid: u32 = 0;
    // Message the vconn refused because its transmit slot was busy
    let mut backlog: Option<Bytes> = None;

    loop {
        // Process all complete messages
        loop {
            match vconn.recv() {
                Ok(msg) => {
                    last_rx = Instant::now();
                    let _ = event_tx.send(ConnectionEvent::Received(msg)).await;
                }
                Err(VconnError::WouldBlock) => break,
                Err(VconnError::Eof) => return Err(anyhow!("Peer closed connection")),
                Err(e) if is_transient(vconn, &e) => {
                    warn!("{}: receive error, keeping connection: {}", vconn.name(), e);
                    break;
                }
                Err(e) => return Err(anyhow!("Receive error: {}", e)),
            }
        }

        vconn.run();
        match vconn.take_error() {
            Some(e) if is_transient(vconn, &e) => {
                warn!("{}: send error, keeping connection: {}", vconn.name(), e);
            }
            Some(e) => return Err(anyhow!("Send error: {}", e)),
            None => {}
        }

        if let Some(msg) = backlog.take() {
            backlog = transmit(vconn, msg)?;
        }

        let step = tokio::select! {
            _ = poll_fn(|cx| {
                let recv = vconn.wait(cx, Wait::Recv);
                let send = vconn.wait(cx, Wait::Send);
                if recv.is_ready() || send.is_ready() {
                    Poll::Ready(())
                } else {
                    Poll::Pending
                }
            }) => Step::Io,

            msg = outbound_rx.recv(), if backlog.is_none() => match msg {
                Some(msg) => Step::Outbound(msg),
                None => Step::Shutdown,
            },

            _ = probe_interval.tick(), if probes => Step::Probe,
        };

        match step {
            Step::Io => {}
            Step::Outbound(msg) => backlog = transmit(vconn, msg)?,
            Step::Probe => {
                if last_rx.elapsed() >= config.inactivity_timeout {
                    return Err(anyhow!("No traffic for {:?}", last_rx.elapsed()));
                }
                if last_rx.elapsed() >= config.probe_interval {
                    probe_xid = probe_xid.wrapping_add(1);
                    let ofp_version = vconn
                        .version()
                        .or_else(|| vconn.allowed_versions().highest())
                        .unwrap_or(version::OFP10);
                    let echo = encode_message(ofp_version, msg_type::ECHO_REQUEST, probe_xid, &[])?;
                    debug!("{}: sending echo request xid={}", vconn.name(), probe_xid);
                    backlog = backlog.or(transmit(vconn, echo)?);
                }
            }
            Step::Shutdown => return Ok(()),
        }
    }
}

/// Hand one message to the vconn. Returns the message back if the vconn
/// cannot take it yet.
fn transmit(vconn: &mut Vconn, msg: Bytes) -> Result<Option<Bytes>> {
    match vconn.send(msg.clone()) {
        Ok(_) => Ok(None),
        Err(VconnError::WouldBlock) => Ok(Some(msg)),
        Err(VconnError::MessageTooLarge { len, max }) => {
            warn!("{}: dropping {}-byte message, limit is {}", vconn.name(), len, max);
            Ok(None)
        }
        Err(e) if is_transient(vconn, &e) => {
            warn!("{}: send error, keeping connection: {}", vconn.name(), e);
            Ok(None)
        }
        Err(e) => Err(anyhow!("Send error: {}", e)),
    }
}

/// Socket errors on connectionless transports (ICMP unreachable, routing
/// hiccups) concern single datagrams, not the connection
fn is_transient(vconn: &Vconn, e: &VconnError) -> bool {
    !vconn.needs_probes()
        && matches!(
            e,
            VconnError::Stream(StreamError::Io(_)) | VconnError::Stream(StreamError::PartialDatagram { .. })
        )
}
