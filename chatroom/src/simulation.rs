//! Runs a fleet of servers and self-driving clients for a fixed time, then
//! stops clients first and servers second.

use std::net::SocketAddr;

use tracing::{info, warn};

use crate::{
    client::{Client, ClientReport},
    config::{ClientConfig, ServerConfig, SimulationConfig},
    error::Result,
    server::Server,
    task::TaskHandle,
};

/// Outcome of one simulation run.
#[derive(Debug, Default)]
pub struct SimulationReport {
    /// Messages each server stored, indexed by server ordinal.
    pub stored: Vec<usize>,
    /// Reports of the clients that stopped cleanly, indexed by client ordinal.
    pub clients: Vec<Option<ClientReport>>,
}

pub async fn run(config: SimulationConfig) -> Result<SimulationReport> {
    info!(
        servers = config.servers,
        clients = config.clients,
        "simulation started"
    );

    let mut addrs = Vec::with_capacity(config.servers);
    let mut stores = Vec::with_capacity(config.servers);
    let mut servers = Vec::with_capacity(config.servers);
    for ordinal in 0..config.servers {
        let server = Server::bind(server_config(&config, ordinal)).await?;
        let addr = server.local_addr()?;
        info!(server = ordinal, %addr, "server listening");
        addrs.push(addr);
        stores.push(server.store());
        servers.push(server.spawn());
    }

    let clients: Vec<_> = (0..config.clients)
        .filter_map(|ordinal| client_addr(&addrs, ordinal).map(|addr| (ordinal, addr)))
        .map(|(ordinal, addr)| {
            let mut client = ClientConfig::new(addr, format!("client #{ordinal}"));
            client.charset = config.server.charset;
            client.interval = config.client_interval;
            client.join = config.server.join;
            Client::new(client).spawn()
        })
        .collect();

    tokio::time::sleep(config.working_time).await;

    info!("terminating clients");
    let clients = terminate(clients, "client").await;
    info!("terminating servers");
    terminate(servers, "server").await;

    let report = SimulationReport {
        stored: stores.iter().map(|store| store.len()).collect(),
        clients,
    };
    info!(stored = ?report.stored, "simulation stopped");
    Ok(report)
}

fn server_config(config: &SimulationConfig, ordinal: usize) -> ServerConfig {
    let port = match config.first_port {
        0 => 0,
        first => u16::try_from(ordinal)
            .ok()
            .and_then(|offset| first.checked_add(offset))
            .unwrap_or(0),
    };
    ServerConfig {
        port,
        ..config.server.clone()
    }
}

/// Clients are spread over the servers round robin.
fn client_addr(addrs: &[SocketAddr], ordinal: usize) -> Option<SocketAddr> {
    if addrs.is_empty() {
        return None;
    }
    addrs.get(ordinal % addrs.len()).copied()
}

/// Cancels every task, gives each the bounded join window, then joins them.
async fn terminate<T>(handles: Vec<TaskHandle<Result<T>>>, kind: &str) -> Vec<Option<T>>
where
    T: Send + 'static,
{
    for handle in &handles {
        handle.cancel();
    }
    for (ordinal, handle) in handles.iter().enumerate() {
        if !handle.await_completion().await {
            warn!(kind, ordinal, "task still active after join window");
        }
    }

    let mut outcomes = Vec::with_capacity(handles.len());
    for (ordinal, handle) in handles.into_iter().enumerate() {
        match handle.join().await {
            Ok(Ok(output)) => outcomes.push(Some(output)),
            Ok(Err(err)) | Err(err) => {
                warn!(kind, ordinal, error = ?err, "task ended with error");
                outcomes.push(None);
            }
        }
    }
    outcomes
}
