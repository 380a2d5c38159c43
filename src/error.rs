use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Datagram is not a rendezvous message this crate understands.
    #[error("malformed message: {0}")]
    MalformedMessage(#[source] serde_json::Error),

    #[error("encode message: {0}")]
    Encode(#[source] serde_json::Error),

    /// Rendezvous gave up without being paired with a peer.
    #[error("rendezvous timed out after {attempts} attempts")]
    Timeout { attempts: u32 },

    /// Peer was found but no confirmed path came up before the deadline.
    #[error("hole punching timed out after {0:?}")]
    PunchTimeout(Duration),

    #[error("peer has no usable candidate address")]
    NoCandidates,

    #[error("could not resolve address {0}")]
    AddrResolve(String),

    #[error("network error: {0}")]
    Network(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
