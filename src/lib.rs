//!Rendezvous and UDP hole punching, to connect two peers that are both behind NAT.
//!
//!Neither peer can accept inbound traffic until it has sent something out first, and neither knows
//!the public address its NAT gives it. A rendezvous server reachable by both solves this.
//!
//!## How it works
//!Both peers agree on a secret out of band, then each sends the server a `request` carrying the
//!secret and its locally bound address. The server sees the *source* address of each request, which
//!is the public side of the peer's NAT mapping. When a second request for the same secret arrives
//!within the session window, the server tells each peer the other's observed address followed by the
//!addresses it reported, and tells exactly one of them it is the host.
//!
//!Each peer then sends `PUNCH` from the same socket to every candidate. Outbound packets open the
//!NAT mapping, so once both sides have sent, packets start crossing. A peer answers each `PUNCH` with
//!`CONFIRM`; the link is up when a peer has both confirmed the other and been confirmed itself.
//!
//!After that, [`udp::Connection`] carries application datagrams over the punched socket, tagged so
//!stray control messages never reach the caller.
//!
//!## Feature flags
//!- `client`: [`udp::Session`], [`udp::Connection`]
//!- `server`: blocking rendezvous server [`udp::Server`]
//!- `async`: [`udp::AsyncServer`], the rendezvous server on tokio
//!
//!```toml
//!punch = { version = "0.1", default-features=false, features=["client"]}
//!```

mod config;
mod error;
pub mod proto;
pub mod secret;
pub mod udp;

pub use config::{Config, INIT_TIMEOUT, SESSION_DURATION, SESSION_RETRIES};
pub use error::{Error, Result};
