use crate::proto::{self, Candidate, Message};
use crate::Config;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

struct Pending {
    since: Instant,
    addr: SocketAddr,
    local: Vec<Candidate>,
}

/// One side of a pairing: where the server saw it, and what it says about itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    pub addr: SocketAddr,
    pub local: Vec<Candidate>,
}

impl Peer {
    fn candidates(&self) -> Vec<Candidate> {
        let mut cs = Vec::with_capacity(self.local.len() + 1);
        cs.push(self.addr.into());
        cs.extend_from_slice(&self.local);
        cs
    }
}

/// Two requests presenting the same secret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Match {
    /// the requester that was waiting
    pub first: Peer,
    pub second: Peer,
}

impl Match {
    /// `session` replies for both sides. The waiting side is told it is host.
    pub fn replies(&self) -> [(SocketAddr, Message); 2] {
        [
            (
                self.first.addr,
                Message::Session {
                    candidates: self.second.candidates(),
                    host: true,
                },
            ),
            (
                self.second.addr,
                Message::Session {
                    candidates: self.first.candidates(),
                    host: false,
                },
            ),
        ]
    }
}

/// Pending rendezvous requests, keyed by secret.
///
/// Not synchronized: the owning server loop is the only writer.
pub struct SessionStore {
    pending: HashMap<String, Pending>,
    session_duration: Duration,
    eviction_age: Duration,
}

impl SessionStore {
    pub fn new(config: &Config) -> Self {
        Self {
            pending: Default::default(),
            session_duration: config.session_duration,
            eviction_age: config.eviction_age.max(config.session_duration),
        }
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn contains(&self, secret: &str) -> bool {
        self.pending.contains_key(secret)
    }

    /// Pair `addr` with the request already waiting under `secret`, or become the waiting one.
    ///
    /// A waiting record only matches while younger than the session duration and when it
    /// came from a different address; otherwise it is replaced. Matching consumes the record.
    pub fn match_or_register(
        &mut self,
        secret: &str,
        addr: SocketAddr,
        local: Vec<Candidate>,
        now: Instant,
    ) -> Option<Match> {
        match self.pending.remove(secret) {
            Some(p)
                if p.addr != addr
                    && now.saturating_duration_since(p.since) < self.session_duration =>
            {
                log::debug!("paired {} with {}", p.addr, addr);
                Some(Match {
                    first: Peer {
                        addr: p.addr,
                        local: p.local,
                    },
                    second: Peer { addr, local },
                })
            }
            old => {
                match old {
                    Some(p) if p.addr == addr => log::debug!("refresh {}", addr),
                    Some(p) => log::debug!("{} replaces expired request from {}", addr, p.addr),
                    None => log::debug!("{} waiting", addr),
                }

                self.pending.insert(
                    secret.to_string(),
                    Pending {
                        since: now,
                        addr,
                        local,
                    },
                );
                None
            }
        }
    }

    /// Drop records older than the eviction age, returns how many.
    pub fn gc(&mut self, now: Instant) -> usize {
        let before = self.pending.len();
        let max_age = self.eviction_age;
        self.pending.retain(|_, p| {
            let keep = now.saturating_duration_since(p.since) < max_age;
            if !keep {
                log::debug!("expired {}", p.addr);
            }
            keep
        });

        before - self.pending.len()
    }

    /// Handle one datagram, returning the replies to send.
    ///
    /// Anything that is not a well formed request is dropped.
    pub fn dispatch(
        &mut self,
        buf: &[u8],
        addr: SocketAddr,
        now: Instant,
    ) -> Vec<(SocketAddr, Message)> {
        let msg = match proto::decode(buf) {
            Ok(msg) => msg,
            Err(e) => {
                log::debug!("drop datagram from {}: {}", addr, e);
                return vec![];
            }
        };

        match msg {
            Message::Request { secret, local } => {
                match self.match_or_register(&secret, addr, local, now) {
                    Some(m) => Vec::from(m.replies()),
                    None => vec![(
                        addr,
                        Message::Wait {
                            expires: self.session_duration.as_secs_f64(),
                        },
                    )],
                }
            }
            Message::Ignore => {
                log::trace!("probe from {}", addr);
                vec![]
            }
            other => {
                log::debug!("unexpected {:?} from {}", other, addr);
                vec![]
            }
        }
    }
}
