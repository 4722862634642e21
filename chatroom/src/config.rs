//! Runtime settings for servers, clients and simulations.
//!
//! Everything here is provided at startup, either by [`crate::cli`] or by
//! tests constructing the structs directly. Nothing is persisted.

use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    time::Duration,
};

use clap::ValueEnum;

use crate::task::JoinPolicy;

pub const DEFAULT_PORT: u16 = 4444;
pub const DEFAULT_HOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);
pub const DEFAULT_ACCEPT_WAIT: Duration = Duration::from_secs(1);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);
pub const DEFAULT_CLIENT_TEXT: &str = "hello!";

/// Character set used to encode lines on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum Charset {
    #[default]
    #[value(name = "utf-8", alias = "utf8")]
    Utf8,
    /// ISO-8859-1. Characters outside the set are sent as `?`.
    #[value(name = "latin1", alias = "iso-8859-1")]
    Latin1,
}

impl Charset {
    pub fn encode(self, text: &str) -> Vec<u8> {
        match self {
            Self::Utf8 => text.as_bytes().to_vec(),
            Self::Latin1 => text
                .chars()
                .map(|ch| u8::try_from(u32::from(ch)).unwrap_or(b'?'))
                .collect(),
        }
    }

    pub fn decode(self, bytes: &[u8]) -> String {
        match self {
            Self::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
            Self::Latin1 => bytes.iter().copied().map(char::from).collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: IpAddr,
    /// Port to listen on. Use 0 for an ephemeral port.
    pub port: u16,
    pub charset: Charset,
    /// How long one accept attempt waits before the loop re-checks cancellation.
    pub accept_wait: Duration,
    /// Pause between two broadcast cycles of a session.
    pub poll_interval: Duration,
    pub join: JoinPolicy,
}

impl ServerConfig {
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// Loopback config on an ephemeral port with short waits, handy for tests.
    pub fn ephemeral() -> Self {
        Self {
            port: 0,
            accept_wait: Duration::from_millis(100),
            poll_interval: Duration::from_millis(20),
            ..Self::default()
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST,
            port: DEFAULT_PORT,
            charset: Charset::default(),
            accept_wait: DEFAULT_ACCEPT_WAIT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            join: JoinPolicy::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server: SocketAddr,
    /// Display name sent during the handshake.
    pub name: String,
    pub charset: Charset,
    /// Pause between two stimulus lines.
    pub interval: Duration,
    pub text: String,
    pub join: JoinPolicy,
}

impl ClientConfig {
    pub fn new(server: SocketAddr, name: impl Into<String>) -> Self {
        Self {
            server,
            name: name.into(),
            charset: Charset::default(),
            interval: DEFAULT_POLL_INTERVAL,
            text: DEFAULT_CLIENT_TEXT.to_string(),
            join: JoinPolicy::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SimulationConfig {
    pub servers: usize,
    pub clients: usize,
    /// Port of server #0; server #k listens on `first_port + k`. With 0 every
    /// server picks an ephemeral port.
    pub first_port: u16,
    pub working_time: Duration,
    /// Template for every server; its port is overridden per server.
    pub server: ServerConfig,
    pub client_interval: Duration,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            servers: 1,
            clients: 2,
            first_port: DEFAULT_PORT,
            working_time: Duration::from_secs(20),
            server: ServerConfig::default(),
            client_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}
