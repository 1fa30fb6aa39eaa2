//! Modbus RTU to UDP gateway.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::info;

use modgate_common::GatewayArgs;
use modgate_rtu::config::GatewayConfig;
use modgate_rtu::{BusManager, Network, RegisterDirectory, RtuMaster, Scheduler, UdpReporter};

#[tokio::main]
async fn main() -> Result<()> {
    let args = GatewayArgs::parse_with_default("modgate.json5");

    let config = GatewayConfig::load_from_file(&args.config)
        .with_context(|| format!("Failed to load config from {:?}", args.config))?;

    let log_config = config
        .logging
        .with_level_override(args.log_level.as_deref());
    modgate_common::init_tracing(&log_config)
        .map_err(|e| anyhow::anyhow!("Failed to init tracing: {}", e))?;

    info!("Starting modgate-rtu");
    info!("Loaded configuration from {:?}", args.config);

    let schedule = config.gateway.schedule()?;

    // Open every serial network
    let (link_tx, link_rx) = mpsc::unbounded_channel();
    let mut bus = BusManager::new();
    let mut tasks = Vec::new();

    for network in &config.networks {
        let master = Arc::new(RtuMaster::new(network, link_tx.clone()));

        info!(
            "Opening network '{}' on {} ({} baud)",
            network.name, network.serial_port, network.options.baud_rate
        );

        tasks.push(tokio::spawn(master.clone().supervise()));
        bus.add(Network::new(network, master));
    }
    drop(link_tx);

    let bus = Arc::new(bus);
    tasks.push(tokio::spawn(bus.clone().watch_links(link_rx)));

    let directory = Arc::new(RegisterDirectory::from_config(&config));
    info!("{} register group(s) on the default schedule", directory.len());

    // UDP endpoint shared by commands and reports
    let socket = UdpSocket::bind(("0.0.0.0", config.gateway.local_port))
        .await
        .with_context(|| format!("Failed to bind UDP port {}", config.gateway.local_port))?;
    let socket = Arc::new(socket);

    let reporter = UdpReporter::resolve(socket.clone(), &config.gateway.host, config.gateway.port)
        .await
        .with_context(|| {
            format!(
                "Failed to resolve {}:{}",
                config.gateway.host, config.gateway.port
            )
        })?;
    info!("Reporting to {}", reporter.target());

    let scheduler = Arc::new(Scheduler::new(bus, directory, Arc::new(reporter)));

    tasks.push(tokio::spawn(scheduler.clone().run(schedule)));
    tasks.push(tokio::spawn(modgate_rtu::protocol::serve(socket, scheduler)));

    info!(
        "Gateway running with {} network(s)",
        config.networks.len()
    );

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Received shutdown signal");

    for task in tasks {
        task.abort();
    }

    info!("Gateway stopped");

    Ok(())
}
