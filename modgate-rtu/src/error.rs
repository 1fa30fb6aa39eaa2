//! Gateway error taxonomy.

use thiserror::Error;

use crate::codec::EncodeError;
use crate::master::TransportError;
use crate::protocol::ProtocolError;

/// Failures of a single poll, write or inbound command.
///
/// None of these stop the gateway; each is logged against the register or
/// datagram that caused it.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Bad register definition, detected when the register is used.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A symbolic id that no default-interval register declares.
    #[error("Unknown id '{0}'")]
    UnknownId(String),

    /// A write value that cannot be encoded for the register.
    #[error("Invalid value: {0}")]
    Encode(#[from] EncodeError),

    /// The master reported a failed transaction.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// A malformed inbound datagram.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

impl GatewayError {
    pub(crate) fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }
}
