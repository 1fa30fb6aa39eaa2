//! Modbus master capability.
//!
//! [`ModbusMaster`] is the seam between the gateway and a serial bus: one
//! request in, exactly one completion out. [`RtuMaster`] implements it on top
//! of `tokio-modbus` and `tokio-serial`, keeps at most one transaction in
//! flight per bus and reports link changes as [`LinkEvent`]s.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc};
use tokio_modbus::client::{Context, Reader, Writer};
use tokio_modbus::prelude::*;
use tokio_modbus::ExceptionCode;

use crate::config::{NetworkConfig, SerialOptions};

/// A single Modbus transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    ReadCoils { address: u16, count: u16 },
    ReadDiscreteInputs { address: u16, count: u16 },
    ReadHoldingRegisters { address: u16, count: u16 },
    ReadInputRegisters { address: u16, count: u16 },
    WriteSingleRegister { address: u16, value: u16 },
}

impl Request {
    /// Short name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Request::ReadCoils { .. } => "read_coils",
            Request::ReadDiscreteInputs { .. } => "read_discrete_inputs",
            Request::ReadHoldingRegisters { .. } => "read_holding_registers",
            Request::ReadInputRegisters { .. } => "read_input_registers",
            Request::WriteSingleRegister { .. } => "write_single_register",
        }
    }
}

/// Completion payload of a successful transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Bits(Vec<bool>),
    Words(Vec<u16>),
    Written,
}

/// Per-request transport settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestOptions {
    /// Unit (slave) id of the addressed device
    pub unit: u8,
    /// Attempts after the first failure
    pub max_retries: u32,
    /// Timeout of each attempt
    pub timeout: Duration,
}

/// Transaction failures reported by a master.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
    #[error("Exception: {0}")]
    Exception(String),
    #[error("Protocol error: {0}")]
    Protocol(String),
    #[error("I/O error: {0}")]
    Io(String),
    #[error("Serial port is not open")]
    Disconnected,
    #[error("Unexpected response to {0}")]
    UnexpectedResponse(&'static str),
}

/// Link state notification emitted by a master.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    Connected,
    Disconnected,
}

/// Channel carrying `(network, event)` pairs to the bus manager.
pub type LinkSender = mpsc::UnboundedSender<(Arc<str>, LinkEvent)>;

/// Receiving side of [`LinkSender`].
pub type LinkReceiver = mpsc::UnboundedReceiver<(Arc<str>, LinkEvent)>;

/// A Modbus master bound to one bus.
#[async_trait]
pub trait ModbusMaster: Send + Sync {
    /// Run one transaction, retrying per `options`.
    async fn execute(
        &self,
        request: Request,
        options: RequestOptions,
    ) -> Result<Response, TransportError>;
}

/// Modbus RTU master over a serial port.
pub struct RtuMaster {
    network: Arc<str>,
    port: String,
    options: SerialOptions,
    unit: u8,
    reconnect: Duration,
    /// `None` while the port is closed. The lock serialises transactions.
    context: Mutex<Option<Context>>,
    events: LinkSender,
}

impl RtuMaster {
    /// Create a master for a network. The port is opened by [`supervise`](Self::supervise).
    pub fn new(config: &NetworkConfig, events: LinkSender) -> Self {
        Self {
            network: Arc::from(config.name.as_str()),
            port: config.serial_port.clone(),
            options: config.options.clone(),
            unit: config.unit_id,
            reconnect: Duration::from_secs(config.reconnect_secs.max(1)),
            context: Mutex::new(None),
            events,
        }
    }

    /// Keep the serial port open, reopening it after failures.
    pub async fn supervise(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.reconnect);

        loop {
            ticker.tick().await;

            let mut context = self.context.lock().await;
            if context.is_some() {
                continue;
            }

            match self.open() {
                Ok(ctx) => {
                    *context = Some(ctx);
                    self.notify(LinkEvent::Connected);
                }
                Err(e) => {
                    tracing::warn!(
                        network = %self.network,
                        port = %self.port,
                        error = %e,
                        "Failed to open serial port"
                    );
                }
            }
        }
    }

    fn open(&self) -> Result<Context, TransportError> {
        let parity = match self.options.parity.to_lowercase().as_str() {
            "even" => tokio_serial::Parity::Even,
            "odd" => tokio_serial::Parity::Odd,
            _ => tokio_serial::Parity::None,
        };

        let stop_bits = match self.options.stop_bits {
            2 => tokio_serial::StopBits::Two,
            _ => tokio_serial::StopBits::One,
        };

        let data_bits = match self.options.data_bits {
            5 => tokio_serial::DataBits::Five,
            6 => tokio_serial::DataBits::Six,
            7 => tokio_serial::DataBits::Seven,
            _ => tokio_serial::DataBits::Eight,
        };

        let builder = tokio_serial::new(&self.port, self.options.baud_rate)
            .parity(parity)
            .stop_bits(stop_bits)
            .data_bits(data_bits);

        let serial = tokio_serial::SerialStream::open(&builder)
            .map_err(|e| TransportError::Io(format!("Serial open failed: {}", e)))?;

        Ok(rtu::attach_slave(serial, Slave(self.unit)))
    }

    fn notify(&self, event: LinkEvent) {
        if self.events.send((self.network.clone(), event)).is_err() {
            tracing::debug!(network = %self.network, "Link event receiver dropped");
        }
    }
}

#[async_trait]
impl ModbusMaster for RtuMaster {
    async fn execute(
        &self,
        request: Request,
        options: RequestOptions,
    ) -> Result<Response, TransportError> {
        let mut context = self.context.lock().await;
        let mut last_error = TransportError::Disconnected;

        for attempt in 0..=options.max_retries {
            let Some(ctx) = context.as_mut() else {
                return Err(TransportError::Disconnected);
            };

            ctx.set_slave(Slave(options.unit));
            let outcome = tokio::time::timeout(options.timeout, call(ctx, &request)).await;

            last_error = match outcome {
                Ok(Ok(Ok(response))) => return Ok(response),
                Ok(Ok(Err(code))) => TransportError::Exception(format!("{:?}", code)),
                Ok(Err(tokio_modbus::Error::Transport(e))) => {
                    // The port is gone; drop it and let the supervisor reopen it.
                    *context = None;
                    self.notify(LinkEvent::Disconnected);
                    return Err(TransportError::Io(e.to_string()));
                }
                Ok(Err(e)) => TransportError::Protocol(e.to_string()),
                Err(_) => TransportError::Timeout(options.timeout),
            };

            tracing::debug!(
                network = %self.network,
                request = request.name(),
                attempt,
                error = %last_error,
                "Modbus transaction failed"
            );
        }

        Err(last_error)
    }
}

async fn call(
    ctx: &mut Context,
    request: &Request,
) -> Result<Result<Response, ExceptionCode>, tokio_modbus::Error> {
    Ok(match *request {
        Request::ReadCoils { address, count } => {
            ctx.read_coils(address, count).await?.map(Response::Bits)
        }
        Request::ReadDiscreteInputs { address, count } => ctx
            .read_discrete_inputs(address, count)
            .await?
            .map(Response::Bits),
        Request::ReadHoldingRegisters { address, count } => ctx
            .read_holding_registers(address, count)
            .await?
            .map(Response::Words),
        Request::ReadInputRegisters { address, count } => ctx
            .read_input_registers(address, count)
            .await?
            .map(Response::Words),
        Request::WriteSingleRegister { address, value } => ctx
            .write_single_register(address, value)
            .await?
            .map(|()| Response::Written),
    })
}
