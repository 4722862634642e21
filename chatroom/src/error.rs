use std::{io, net::SocketAddr};

use thiserror::Error;
use tokio::task::JoinError;

pub type Result<T, E = ChatError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("failed to bind listener on {addr}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("failed to connect to {addr}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("listener failed while accepting connections")]
    Accept(#[source] io::Error),

    #[error("communication failure")]
    Communication(#[from] io::Error),

    /// The peer closed its stream before sending the lines we were waiting for.
    #[error("stream ended after {received} of {expected} expected lines")]
    ProtocolViolation { expected: usize, received: usize },

    #[error("client hasn't responded with any meaningful name")]
    BlankName,

    #[error("task did not run to completion")]
    TaskJoin(#[from] JoinError),
}

impl ChatError {
    /// True for failures caused by the peer not following the handshake.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(self, Self::ProtocolViolation { .. } | Self::BlankName)
    }
}
