//! UDP text protocol.
//!
//! Inbound datagrams carry one command each:
//!
//! ```text
//! <id> read
//! <id> write <value>
//! ```
//!
//! Outbound reports carry one value each as `<id> <value>`.

use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::UdpSocket;

use crate::codec::Value;
use crate::error::GatewayError;
use crate::scheduler::Scheduler;

/// Receive buffer size; larger than any UDP payload.
const RECV_BUFFER_SIZE: usize = 65_536;

/// Malformed inbound datagrams.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("Message is not valid UTF-8")]
    InvalidUtf8,
    #[error("Datagram of {0} bytes fills the receive buffer and may be truncated")]
    Truncated(usize),
    #[error("Unknown message '{message}': {reason}")]
    Malformed {
        message: String,
        reason: &'static str,
    },
}

impl ProtocolError {
    fn malformed(message: &str, reason: &'static str) -> Self {
        Self::Malformed {
            message: message.to_string(),
            reason,
        }
    }
}

/// A parsed inbound command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Read { id: String },
    Write { id: String, value: String },
}

fn is_token(token: &str) -> bool {
    !token.is_empty()
        && token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
}

impl FromStr for Command {
    type Err = ProtocolError;

    fn from_str(message: &str) -> Result<Self, Self::Err> {
        let mut tokens = message.split_ascii_whitespace();

        let id = tokens
            .next()
            .ok_or_else(|| ProtocolError::malformed(message, "empty message"))?;
        if !is_token(id) {
            return Err(ProtocolError::malformed(message, "invalid id"));
        }

        let operation = tokens
            .next()
            .ok_or_else(|| ProtocolError::malformed(message, "missing operation"))?;

        let value = tokens.next();
        if let Some(value) = value {
            if !is_token(value) {
                return Err(ProtocolError::malformed(message, "invalid value"));
            }
        }

        if tokens.next().is_some() {
            return Err(ProtocolError::malformed(message, "too many tokens"));
        }

        match (operation, value) {
            // a value after `read` is allowed and ignored
            ("read", _) => Ok(Command::Read { id: id.to_string() }),
            ("write", Some(value)) => Ok(Command::Write {
                id: id.to_string(),
                value: value.to_string(),
            }),
            ("write", None) => Err(ProtocolError::malformed(message, "write needs a value")),
            _ => Err(ProtocolError::malformed(message, "operation must be read or write")),
        }
    }
}

/// Decode one inbound datagram.
pub fn parse_datagram(data: &[u8]) -> Result<Command, ProtocolError> {
    std::str::from_utf8(data)
        .map_err(|_| ProtocolError::InvalidUtf8)?
        .parse()
}

/// Render one outbound report.
pub fn format_report(id: &str, value: &Value) -> String {
    format!("{} {}", id, value)
}

/// Destination of decoded values.
#[async_trait]
pub trait ReportSink: Send + Sync {
    /// Emit one `(id, value)` pair. Delivery failures are logged by the sink.
    async fn report(&self, id: &str, value: &Value);
}

/// Sends each report as one datagram to a fixed destination.
pub struct UdpReporter {
    socket: Arc<UdpSocket>,
    target: SocketAddr,
}

impl UdpReporter {
    pub fn new(socket: Arc<UdpSocket>, target: SocketAddr) -> Self {
        Self { socket, target }
    }

    /// Resolve `host:port` once and report to the first address found.
    pub async fn resolve(socket: Arc<UdpSocket>, host: &str, port: u16) -> std::io::Result<Self> {
        let target = tokio::net::lookup_host((host, port))
            .await?
            .next()
            .ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("No address for {}:{}", host, port),
                )
            })?;

        Ok(Self::new(socket, target))
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }
}

#[async_trait]
impl ReportSink for UdpReporter {
    async fn report(&self, id: &str, value: &Value) {
        let msg = format_report(id, value);
        match self.socket.send_to(msg.as_bytes(), self.target).await {
            Ok(_) => tracing::debug!(to = %self.target, "Sent {}", msg),
            Err(e) => tracing::warn!(to = %self.target, error = %e, "Failed to send {}", msg),
        }
    }
}

/// Receive one datagram into `buf`.
///
/// A datagram that fills the whole buffer may have been cut short by the OS
/// and is rejected rather than parsed.
pub async fn receive<'a>(
    socket: &UdpSocket,
    buf: &'a mut [u8],
) -> std::io::Result<(SocketAddr, Result<&'a [u8], ProtocolError>)> {
    let (len, addr) = socket.recv_from(buf).await?;
    if len >= buf.len() {
        return Ok((addr, Err(ProtocolError::Truncated(len))));
    }
    Ok((addr, Ok(&buf[..len])))
}

/// Run a parsed command to completion.
pub async fn dispatch(scheduler: &Scheduler, command: Command) -> Result<(), GatewayError> {
    match command {
        Command::Read { id } => scheduler.read_id(&id).await.map(|_| ()),
        Command::Write { id, value } => scheduler.write_id(&id, &value).await,
    }
}

/// Parse and run one inbound datagram.
pub async fn handle_datagram(scheduler: &Scheduler, data: &[u8]) -> Result<(), GatewayError> {
    let command = parse_datagram(data)?;
    tracing::debug!(?command, "Received command");
    dispatch(scheduler, command).await
}

/// Receive commands until the socket fails permanently.
///
/// Each datagram runs in its own task so a slow bus never blocks the socket.
pub async fn serve(socket: Arc<UdpSocket>, scheduler: Arc<Scheduler>) {
    if let Ok(addr) = socket.local_addr() {
        tracing::info!("UDP command listener started on {}", addr);
    }

    let mut buf = vec![0u8; RECV_BUFFER_SIZE];

    loop {
        match receive(&socket, &mut buf).await {
            Ok((addr, Ok(data))) => {
                let data = data.to_vec();
                let scheduler = scheduler.clone();

                tokio::spawn(async move {
                    if let Err(e) = handle_datagram(&scheduler, &data).await {
                        crate::scheduler::log_failure(&e, &format!("command from {}", addr));
                    }
                });
            }
            Ok((addr, Err(e))) => {
                tracing::error!("Dropped datagram from {}: {}", addr, e);
            }
            Err(e) => {
                tracing::error!("UDP receive error: {}", e);
            }
        }
    }
}
