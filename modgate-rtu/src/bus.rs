//! Per-network link state and the poll/write primitives.
//!
//! Every request to a serial bus goes through [`BusManager`]. Requests against
//! a network that is not connected are skipped without touching the master.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::codec::{self, DecodeError, EncodeError, Value};
use crate::config::{NetworkConfig, RegisterKind};
use crate::directory::PollSpec;
use crate::error::GatewayError;
use crate::master::{
    LinkEvent, LinkReceiver, ModbusMaster, Request, RequestOptions, Response, TransportError,
};

/// One decoded id of a poll; decode failures stay attached to their id.
pub type Reading = (String, Result<Value, DecodeError>);

/// A serial bus and its master.
pub struct Network {
    name: Arc<str>,
    master: Arc<dyn ModbusMaster>,
    connected: AtomicBool,
    unit: u8,
    timeout: Duration,
    retries: u32,
}

impl Network {
    /// Bind a master to a configured network. Starts disconnected.
    pub fn new(config: &NetworkConfig, master: Arc<dyn ModbusMaster>) -> Self {
        Self {
            name: Arc::from(config.name.as_str()),
            master,
            connected: AtomicBool::new(false),
            unit: config.unit_id,
            timeout: Duration::from_millis(config.timeout_ms),
            retries: config.retries,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn options(&self, spec: &PollSpec) -> RequestOptions {
        RequestOptions {
            unit: spec.unit(self.unit),
            max_retries: self.retries,
            timeout: self.timeout,
        }
    }
}

/// Owner of every network; the only path from the gateway to a bus.
#[derive(Default)]
pub struct BusManager {
    networks: HashMap<Arc<str>, Network>,
}

impl BusManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a network during setup.
    pub fn add(&mut self, network: Network) {
        self.networks.insert(network.name.clone(), network);
    }

    pub fn network(&self, name: &str) -> Option<&Network> {
        self.networks.get(name)
    }

    /// Apply a link notification from a network's master.
    pub fn set_link_state(&self, name: &str, event: LinkEvent) {
        let Some(network) = self.networks.get(name) else {
            tracing::warn!(network = %name, ?event, "Link event for unknown network");
            return;
        };

        let connected = event == LinkEvent::Connected;
        let was = network.connected.swap(connected, Ordering::AcqRel);
        if was != connected {
            if connected {
                tracing::info!(network = %name, "Network connected");
            } else {
                tracing::info!(network = %name, "Network disconnected");
            }
        }
    }

    /// Consume link notifications until every master has gone away.
    pub async fn watch_links(self: Arc<Self>, mut events: LinkReceiver) {
        while let Some((name, event)) = events.recv().await {
            self.set_link_state(&name, event);
        }
    }

    fn lookup(&self, spec: &PollSpec) -> Result<&Network, GatewayError> {
        self.networks.get(&*spec.network).ok_or_else(|| {
            GatewayError::configuration(format!("Unknown network '{}'", spec.network))
        })
    }

    /// Read every id of a register group.
    ///
    /// Returns `Ok(None)` when the network is down and nothing was sent.
    pub async fn poll(&self, spec: &PollSpec) -> Result<Option<Vec<Reading>>, GatewayError> {
        let network = self.lookup(spec)?;
        let register = &spec.register;

        if !network.is_connected() {
            tracing::debug!(network = %network.name, ids = ?register.ids, "Skipping poll, network not connected");
            return Ok(None);
        }

        let address = register.address;
        let count = register.read_count();
        let request = match &register.kind {
            RegisterKind::Input => Request::ReadInputRegisters { address, count },
            RegisterKind::Holding => Request::ReadHoldingRegisters { address, count },
            RegisterKind::Coil => Request::ReadCoils { address, count },
            RegisterKind::Discrete => Request::ReadDiscreteInputs { address, count },
            RegisterKind::Other(kind) => {
                return Err(GatewayError::configuration(format!(
                    "No valid type '{}' for register {:?}",
                    kind, register.ids
                )));
            }
        };

        let name = request.name();
        let response = network
            .master
            .execute(request, network.options(spec))
            .await?;

        tracing::trace!(network = %network.name, kind = %register.kind, ?response, "Raw response");

        let ids = register.ids.len();
        let values = match (register.kind.is_bit(), response) {
            (true, Response::Bits(bits)) => codec::decode_bits(&bits, ids),
            (false, Response::Words(words)) => {
                codec::decode_words(&words, ids, register.converter.as_deref())
            }
            _ => return Err(TransportError::UnexpectedResponse(name).into()),
        };

        Ok(Some(register.ids.iter().cloned().zip(values).collect()))
    }

    /// Write one value to a single-id register.
    ///
    /// Returns the value to report on success, or `Ok(None)` when the network
    /// is down and nothing was sent.
    pub async fn write(&self, spec: &PollSpec, value: &str) -> Result<Option<Value>, GatewayError> {
        let network = self.lookup(spec)?;
        let register = &spec.register;

        if !network.is_connected() {
            tracing::debug!(network = %network.name, ids = ?register.ids, "Skipping write, network not connected");
            return Ok(None);
        }

        if register.ids.len() != 1 {
            return Err(GatewayError::configuration(format!(
                "Cannot write register group {:?}",
                register.ids
            )));
        }

        // every kind goes out as a single-register write, coils included
        if let RegisterKind::Other(kind) = &register.kind {
            return Err(GatewayError::configuration(format!(
                "No valid type '{}' for register {:?}",
                kind, register.ids
            )));
        }

        let converter = register.converter.as_deref();
        let word = codec::encode_register_value(value, converter)?;
        let reported = codec::decode_written_word(word, converter).map_err(EncodeError::from)?;
        let request = Request::WriteSingleRegister {
            address: register.address,
            value: word,
        };

        let name = request.name();
        match network.master.execute(request, network.options(spec)).await? {
            Response::Written => Ok(Some(reported)),
            _ => Err(TransportError::UnexpectedResponse(name).into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RegisterConfig, SerialOptions};
    use async_trait::async_trait;

    struct Unreachable;

    #[async_trait]
    impl ModbusMaster for Unreachable {
        async fn execute(
            &self,
            request: Request,
            _options: RequestOptions,
        ) -> Result<Response, TransportError> {
            panic!("unexpected {}", request.name());
        }
    }

    fn bus() -> BusManager {
        let config = NetworkConfig {
            name: "line".to_string(),
            serial_port: "/dev/ttyS9".to_string(),
            options: SerialOptions::default(),
            unit_id: 1,
            timeout_ms: 600,
            retries: 1,
            reconnect_secs: 5,
            registers: Vec::new(),
        };

        let mut bus = BusManager::new();
        bus.add(Network::new(&config, Arc::new(Unreachable)));
        bus
    }

    fn spec(network: &str) -> PollSpec {
        PollSpec::new(
            network,
            RegisterConfig {
                ids: vec!["level".to_string()],
                address: 3,
                kind: RegisterKind::Holding,
                length: None,
                converter: None,
                slave_id: None,
                polling: None,
            },
        )
    }

    #[test]
    fn test_link_state_follows_events() {
        let bus = bus();
        assert!(!bus.network("line").unwrap().is_connected());

        bus.set_link_state("line", LinkEvent::Connected);
        assert!(bus.network("line").unwrap().is_connected());

        bus.set_link_state("line", LinkEvent::Disconnected);
        assert!(!bus.network("line").unwrap().is_connected());

        // ignored
        bus.set_link_state("elsewhere", LinkEvent::Connected);
    }

    #[tokio::test]
    async fn test_disconnected_skips_master() {
        let bus = bus();
        assert_eq!(bus.poll(&spec("line")).await.unwrap(), None);
        assert_eq!(bus.write(&spec("line"), "5").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_unknown_network() {
        let bus = bus();
        let result = bus.poll(&spec("missing")).await;
        assert!(matches!(result, Err(GatewayError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_watch_links_applies_events() {
        let bus = Arc::new(bus());
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        tx.send((Arc::from("line"), LinkEvent::Connected)).unwrap();
        drop(tx);

        bus.clone().watch_links(rx).await;
        assert!(bus.network("line").unwrap().is_connected());
    }
}
