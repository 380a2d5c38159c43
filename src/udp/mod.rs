//! UDP rendezvous and hole punching.
//!
//! use `Session` to find the peer sharing your secret, then `Connection` to punch through to it.
//!
//! use `Server` (or `AsyncServer`) to run the rendezvous point.

use std::io::{self, ErrorKind};

/// Rendezvous messages are small, keep them within one ethernet frame.
pub(crate) const MAX_DATAGRAM: usize = 1500;

/// read timeouts surface as `WouldBlock` on unix and `TimedOut` on windows
pub(crate) fn is_timeout(e: &io::Error) -> bool {
    matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut)
}

/// An ICMP unreachable for some earlier datagram, reported on a later call: `ConnectionReset`
/// on windows, `ConnectionRefused` on a connected socket on unix. The socket is still usable.
#[cfg(feature = "client")]
pub(crate) fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        ErrorKind::ConnectionReset | ErrorKind::ConnectionRefused
    )
}

/// floor for the server sweep period, a zero period can not drive a timer
#[cfg(feature = "server")]
pub(crate) const MIN_GC_INTERVAL: std::time::Duration = std::time::Duration::from_millis(10);

#[cfg(feature = "client")]
mod connection;
#[cfg(feature = "client")]
mod session;
#[cfg(feature = "client")]
pub use connection::Connection;
#[cfg(feature = "client")]
pub use session::Session;

#[cfg(feature = "server")]
mod server;
#[cfg(feature = "server")]
mod store;
#[cfg(feature = "server")]
pub use server::Server;
#[cfg(feature = "server")]
pub use store::{Match, Peer, SessionStore};

#[cfg(feature = "async")]
mod server_async;
#[cfg(feature = "async")]
pub use server_async::AsyncServer;
