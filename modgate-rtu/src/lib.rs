//! Modbus RTU to UDP text gateway.
//!
//! Polls registers on one or more serial Modbus networks on a shared cron
//! schedule and reports each decoded value to a peer as a UDP datagram. The
//! peer can request reads and writes by symbolic id.
//!
//! # Wire format
//!
//! ```text
//! inbound:  <id> read
//!           <id> write <value>
//! outbound: <id> <value>
//! ```
//!
//! # Layout
//!
//! - [`config`] - JSON5 configuration and validation
//! - [`codec`] - Register bytes to values and back
//! - [`directory`] - Symbolic id resolution
//! - [`master`] - Modbus master seam and the RTU implementation
//! - [`bus`] - Link state and poll/write primitives per network
//! - [`scheduler`] - Cron tick and on-demand operations
//! - [`protocol`] - UDP command parsing and reporting

pub mod bus;
pub mod codec;
pub mod config;
pub mod directory;
pub mod error;
pub mod master;
pub mod protocol;
pub mod scheduler;

pub use bus::{BusManager, Network};
pub use codec::Value;
pub use config::GatewayConfig;
pub use directory::{PollSpec, RegisterDirectory};
pub use error::GatewayError;
pub use master::{ModbusMaster, RtuMaster};
pub use protocol::{ReportSink, UdpReporter};
pub use scheduler::Scheduler;
