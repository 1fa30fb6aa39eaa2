//! Symbolic id resolution over the default-interval registers.

use std::sync::Arc;

use crate::config::{GatewayConfig, RegisterConfig};

/// A register to poll or write on a named network.
#[derive(Debug, Clone, PartialEq)]
pub struct PollSpec {
    /// Name of the owning network
    pub network: Arc<str>,
    /// Configured register, or a single-id register built by [`RegisterDirectory::resolve`]
    pub register: Arc<RegisterConfig>,
}

impl PollSpec {
    /// Create a poll spec.
    pub fn new(network: impl Into<Arc<str>>, register: impl Into<Arc<RegisterConfig>>) -> Self {
        Self {
            network: network.into(),
            register: register.into(),
        }
    }

    /// Symbolic ids covered by this spec, in read order.
    pub fn ids(&self) -> &[String] {
        &self.register.ids
    }

    /// Unit id of the addressed device, falling back to the network default.
    pub fn unit(&self, network_default: u8) -> u8 {
        self.register.slave_id.unwrap_or(network_default)
    }
}

/// Registers serviced by the default poll tick, in configuration order.
///
/// Built once at startup; the shared tick iterates it and on-demand commands
/// resolve ids against it.
#[derive(Debug, Default)]
pub struct RegisterDirectory {
    entries: Vec<PollSpec>,
}

impl RegisterDirectory {
    /// Create an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Collect every register without an explicit polling interval.
    pub fn from_config(config: &GatewayConfig) -> Self {
        let mut directory = Self::new();

        for network in &config.networks {
            let name: Arc<str> = Arc::from(network.name.as_str());

            for register in &network.registers {
                if let Some(polling) = &register.polling {
                    tracing::warn!(
                        network = %network.name,
                        ids = ?register.ids,
                        polling = %polling,
                        "Register has an explicit interval and is not scheduled"
                    );
                    continue;
                }

                directory.push(name.clone(), Arc::clone(register));
            }
        }

        directory
    }

    /// Append a register during setup.
    pub fn push(&mut self, network: impl Into<Arc<str>>, register: impl Into<Arc<RegisterConfig>>) {
        self.entries.push(PollSpec::new(network, register));
    }

    /// All default-interval registers.
    pub fn entries(&self) -> &[PollSpec] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Resolve a symbolic id to a single-id poll spec.
    ///
    /// The first register listing `id` wins. The address advances by the
    /// group's `length` per position; kind, unit and converter are copied.
    pub fn resolve(&self, id: &str) -> Option<PollSpec> {
        self.entries.iter().find_map(|entry| {
            let group = &entry.register;
            let index = group.ids.iter().position(|candidate| candidate == id)?;

            let offset = u32::from(group.length()) * index as u32;
            let address = u16::try_from(u32::from(group.address) + offset).ok()?;

            let register = RegisterConfig {
                ids: vec![id.to_string()],
                address,
                kind: group.kind.clone(),
                length: None,
                converter: group.converter.clone(),
                slave_id: group.slave_id,
                polling: None,
            };

            Some(PollSpec::new(entry.network.clone(), register))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RegisterKind;
    use modgate_common::parse_config;

    fn register(ids: &[&str], address: u16, length: Option<u16>) -> RegisterConfig {
        RegisterConfig {
            ids: ids.iter().map(|id| id.to_string()).collect(),
            address,
            kind: RegisterKind::Holding,
            length,
            converter: Some("tenths".to_string()),
            slave_id: Some(4),
            polling: None,
        }
    }

    #[test]
    fn test_resolve_group_offset() {
        let mut directory = RegisterDirectory::new();
        directory.push("bus", register(&["a", "b", "c"], 100, Some(2)));

        let spec = directory.resolve("c").unwrap();
        assert_eq!(&*spec.network, "bus");
        assert_eq!(spec.register.address, 104);
        assert_eq!(spec.ids(), ["c".to_string()]);
        assert_eq!(spec.register.kind, RegisterKind::Holding);
        assert_eq!(spec.register.converter.as_deref(), Some("tenths"));
        assert_eq!(spec.register.slave_id, Some(4));
        assert_eq!(spec.register.length, None);
    }

    #[test]
    fn test_resolve_default_stride() {
        let mut directory = RegisterDirectory::new();
        directory.push("bus", register(&["x", "y"], 7, None));

        assert_eq!(directory.resolve("x").unwrap().register.address, 7);
        assert_eq!(directory.resolve("y").unwrap().register.address, 8);
    }

    #[test]
    fn test_resolve_unknown() {
        let mut directory = RegisterDirectory::new();
        directory.push("bus", register(&["a"], 1, None));

        assert!(directory.resolve("ghost").is_none());
    }

    #[test]
    fn test_first_match_wins() {
        let mut directory = RegisterDirectory::new();
        directory.push("first", register(&["dup"], 10, None));
        directory.push("second", register(&["dup"], 20, None));

        let spec = directory.resolve("dup").unwrap();
        assert_eq!(&*spec.network, "first");
        assert_eq!(spec.register.address, 10);
    }

    #[test]
    fn test_unit_fallback() {
        let mut reg = register(&["a"], 1, None);
        reg.slave_id = None;
        let spec = PollSpec::new("bus", reg);
        assert_eq!(spec.unit(9), 9);
    }

    #[test]
    fn test_from_config_skips_explicit_interval() {
        let json = r#"{
            gateway: { port: 9000, local_port: 9001 },
            networks: [
                {
                    name: "n1",
                    serial_port: "/dev/ttyS0",
                    registers: [
                        { id: "fast", address: 1, type: "input" },
                        { id: "slow", address: 2, type: "input", polling: "0 0 * * * *" },
                    ]
                },
                {
                    name: "n2",
                    serial_port: "/dev/ttyS1",
                    registers: [ { id: ["p", "q"], address: 3, type: "coil" } ]
                }
            ]
        }"#;
        let config: GatewayConfig = parse_config(json).unwrap();
        let directory = RegisterDirectory::from_config(&config);

        assert_eq!(directory.len(), 2);
        assert_eq!(&*directory.entries()[0].network, "n1");
        assert_eq!(directory.entries()[1].ids(), ["p".to_string(), "q".to_string()]);
        assert!(directory.resolve("slow").is_none());
        assert_eq!(directory.resolve("q").unwrap().register.address, 4);
    }

    #[test]
    fn test_from_config_shares_registers() {
        let json = r#"{
            gateway: { port: 9000, local_port: 9001 },
            networks: [
                {
                    name: "n1",
                    serial_port: "/dev/ttyS0",
                    registers: [ { id: ["a", "b"], address: 1, type: "holding" } ]
                }
            ]
        }"#;
        let config: GatewayConfig = parse_config(json).unwrap();
        let directory = RegisterDirectory::from_config(&config);

        assert!(Arc::ptr_eq(
            &directory.entries()[0].register,
            &config.networks[0].registers[0]
        ));
    }
}
