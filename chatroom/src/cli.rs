use std::{
    net::{IpAddr, SocketAddr},
    time::Duration,
};

use clap::{Args, Parser, Subcommand};

use crate::{
    config::{Charset, ClientConfig, DEFAULT_CLIENT_TEXT, ServerConfig, SimulationConfig},
    task::JoinPolicy,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a broadcast server until Ctrl-C.
    Serve(ServeArgs),
    /// Connect a self-driving client that chats until Ctrl-C.
    Client(ClientArgs),
    /// Start several servers and clients, let them chat, then stop them all.
    Simulate(SimulateArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Address to listen on.
    #[arg(long, default_value = "127.0.0.1")]
    pub host: IpAddr,

    /// Port to listen on. Use 0 for an ephemeral port.
    #[arg(long, default_value_t = crate::config::DEFAULT_PORT)]
    pub port: u16,

    #[command(flatten)]
    pub server: ServerOptions,
}

impl ServeArgs {
    pub fn to_config(&self) -> ServerConfig {
        self.server.to_config(self.host, self.port)
    }
}

/// Tuning shared by `serve` and `simulate`.
#[derive(Args, Debug, Clone)]
pub struct ServerOptions {
    /// Character set of the wire protocol.
    #[arg(long, value_enum, default_value_t = Charset::Utf8)]
    pub charset: Charset,

    /// How long one accept attempt waits before re-checking for shutdown.
    #[arg(long, default_value_t = 1000)]
    pub accept_wait_ms: u64,

    /// Pause between two broadcast cycles of a session.
    #[arg(long, default_value_t = 100)]
    pub poll_interval_ms: u64,

    /// Interval between two checks while waiting for tasks to stop.
    #[arg(long, default_value_t = 100)]
    pub join_interval_ms: u64,

    /// Number of checks before giving up on a stopping task.
    #[arg(long, default_value_t = 5)]
    pub join_attempts: u32,
}

impl ServerOptions {
    pub fn join_policy(&self) -> JoinPolicy {
        JoinPolicy {
            interval: Duration::from_millis(self.join_interval_ms),
            attempts: self.join_attempts,
        }
    }

    pub fn to_config(&self, host: IpAddr, port: u16) -> ServerConfig {
        ServerConfig {
            host,
            port,
            charset: self.charset,
            accept_wait: Duration::from_millis(self.accept_wait_ms),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            join: self.join_policy(),
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    /// Name stated during the handshake.
    #[arg(long)]
    pub name: String,

    /// Address of the server to connect to.
    #[arg(long, default_value = "127.0.0.1:4444")]
    pub server: SocketAddr,

    /// Pause between two stimulus lines.
    #[arg(long, default_value_t = 100)]
    pub interval_ms: u64,

    /// Text carried by every stimulus line.
    #[arg(long, default_value = DEFAULT_CLIENT_TEXT)]
    pub text: String,

    #[arg(long, value_enum, default_value_t = Charset::Utf8)]
    pub charset: Charset,
}

impl ClientArgs {
    pub fn to_config(&self) -> ClientConfig {
        ClientConfig {
            charset: self.charset,
            interval: Duration::from_millis(self.interval_ms),
            text: self.text.clone(),
            ..ClientConfig::new(self.server, self.name.clone())
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct SimulateArgs {
    #[arg(long, default_value_t = 1)]
    pub servers: usize,

    #[arg(long, default_value_t = 2)]
    pub clients: usize,

    #[arg(long, default_value = "127.0.0.1")]
    pub host: IpAddr,

    /// Port of the first server; the others follow consecutively. Use 0 for
    /// ephemeral ports.
    #[arg(long, default_value_t = crate::config::DEFAULT_PORT)]
    pub first_port: u16,

    /// How long everybody chats before the shutdown starts.
    #[arg(long, default_value_t = 20_000)]
    pub working_time_ms: u64,

    /// Pause between two stimulus lines of every client.
    #[arg(long, default_value_t = 100)]
    pub client_interval_ms: u64,

    #[command(flatten)]
    pub server: ServerOptions,
}

impl SimulateArgs {
    pub fn to_config(&self) -> SimulationConfig {
        SimulationConfig {
            servers: self.servers,
            clients: self.clients,
            first_port: self.first_port,
            working_time: Duration::from_millis(self.working_time_ms),
            server: self.server.to_config(self.host, self.first_port),
            client_interval: Duration::from_millis(self.client_interval_ms),
        }
    }
}
