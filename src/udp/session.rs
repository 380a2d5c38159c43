use super::{is_timeout, is_transient, MAX_DATAGRAM};
use crate::proto::{self, Candidate, Message};
use crate::secret::generate_secret;
use crate::{Config, Error, Result};
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{IpAddr, SocketAddr, ToSocketAddrs, UdpSocket};
use std::time::{Duration, Instant};

/// upper bound on a server announced `expires`
const MAX_WAIT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
struct Remote {
    candidates: Vec<SocketAddr>,
    host: bool,
}

/// Client side of the rendezvous.
///
/// Resolves a secret into the other peer's candidate addresses, using the same socket that
/// will later be punched through.
///
/// # example
/// ```no_run
/// use punch::udp::Session;
/// use punch::Config;
///
/// let mut s = Session::new("rendezvous:8888", None, Config::default()).unwrap();
/// println!("share this: {}", s.secret());
/// let peers = s.get_candidates().unwrap();
/// ```
pub struct Session {
    socket: UdpSocket,
    server_addr: SocketAddr,
    secret: String,
    config: Config,
    remote: Option<Remote>,
}

impl Session {
    /// bind a fresh socket matching the server address family.
    /// if no secret is given, a random one is generated.
    pub fn new(server_addr: &str, secret: Option<&str>, config: Config) -> Result<Self> {
        let server_addr = Self::lookup(server_addr)?;

        let local_addr: SocketAddr = match server_addr {
            SocketAddr::V4(_) => (IpAddr::from([0u8; 4]), 0).into(),
            SocketAddr::V6(_) => (IpAddr::from([0u16; 8]), 0).into(),
        };

        let socket = Socket::new(
            Domain::for_address(local_addr),
            Type::DGRAM,
            Some(Protocol::UDP),
        )?;
        socket.set_reuse_address(true)?;
        socket.bind(&local_addr.into())?;

        Ok(Self::with_socket(socket.into(), server_addr, secret, config))
    }

    /// use an already bound socket.
    pub fn new_with_socket(
        server_addr: &str,
        secret: Option<&str>,
        socket: UdpSocket,
        config: Config,
    ) -> Result<Self> {
        let server_addr = Self::lookup(server_addr)?;
        Ok(Self::with_socket(socket, server_addr, secret, config))
    }

    /// a session whose peer is already known, no server involved.
    pub fn resolved(
        socket: UdpSocket,
        candidates: Vec<SocketAddr>,
        host: bool,
        config: Config,
    ) -> Result<Self> {
        let server_addr = socket.local_addr()?;
        let mut s = Self::with_socket(socket, server_addr, None, config);
        s.remote = Some(Remote { candidates, host });
        Ok(s)
    }

    fn with_socket(
        socket: UdpSocket,
        server_addr: SocketAddr,
        secret: Option<&str>,
        config: Config,
    ) -> Self {
        Self {
            socket,
            server_addr,
            secret: secret.map(str::to_string).unwrap_or_else(generate_secret),
            config,
            remote: None,
        }
    }

    fn lookup(addr: &str) -> Result<SocketAddr> {
        addr.to_socket_addrs()?
            .next()
            .ok_or_else(|| Error::AddrResolve(addr.to_string()))
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }

    pub fn server_addr(&self) -> SocketAddr {
        self.server_addr
    }

    pub fn socket(&self) -> &UdpSocket {
        &self.socket
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn is_resolved(&self) -> bool {
        self.remote.is_some()
    }

    /// peer candidates, server observed address first. Resolves on first call.
    pub fn get_candidates(&mut self) -> Result<&[SocketAddr]> {
        Ok(self.remote()?.candidates.as_slice())
    }

    /// exactly one side of a pair is host. Resolves on first call.
    pub fn is_host(&mut self) -> Result<bool> {
        Ok(self.remote()?.host)
    }

    pub(crate) fn into_parts(mut self) -> Result<(UdpSocket, Vec<SocketAddr>, bool, Config)> {
        self.resolve()?;
        let remote = self.remote.take().ok_or(Error::NoCandidates)?;
        Ok((self.socket, remote.candidates, remote.host, self.config))
    }

    fn remote(&mut self) -> Result<&Remote> {
        self.resolve()?;
        self.remote.as_ref().ok_or(Error::NoCandidates)
    }

    /// Register with the rendezvous server and wait to be paired.
    ///
    /// Each attempt probes, requests, then waits `init_timeout` for a reply; a `wait` reply
    /// extends that by the announced expiry. Fails with [`Error::Timeout`] once
    /// `session_retries` attempts went unanswered.
    pub fn resolve(&mut self) -> Result<()> {
        if self.remote.is_some() {
            return Ok(());
        }

        let attempts = self.config.session_retries;
        for attempt in 1..=attempts {
            log::debug!("rendezvous attempt {}/{}", attempt, attempts);

            self.send(&Message::Ignore)?;
            let local = self.local_candidate()?;
            self.send(&Message::Request {
                secret: self.secret.clone(),
                local: vec![local],
            })?;

            let mut reply = self.recv_message(self.config.init_timeout)?;
            if let Some(Message::Wait { expires }) = reply {
                let wait = Duration::try_from_secs_f64(expires)
                    .unwrap_or(self.config.session_duration)
                    .min(MAX_WAIT);
                log::debug!("waiting {:?} for peer", wait);
                reply = self.recv_message(wait)?;
            }

            match reply {
                Some(Message::Session { candidates, host }) => {
                    let candidates = usable(candidates);
                    if candidates.is_empty() {
                        return Err(Error::NoCandidates);
                    }
                    log::debug!("paired, host: {}, candidates: {:?}", host, candidates);
                    self.remote = Some(Remote { candidates, host });
                    return Ok(());
                }
                Some(m) => log::debug!("unexpected reply {:?}", m),
                None => log::debug!("no reply from {}", self.server_addr),
            }
        }

        Err(Error::Timeout { attempts })
    }

    fn send(&self, msg: &Message) -> Result<()> {
        match self.socket.send_to(&proto::encode(msg)?, self.server_addr) {
            Ok(_) => Ok(()),
            // a pending ICMP error from an earlier datagram, this one may still get through
            Err(e) if is_transient(&e) => {
                log::debug!("send to {}: {}", self.server_addr, e);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Bound port, with the address the OS routes toward the server if bound to a wildcard.
    fn local_candidate(&self) -> Result<Candidate> {
        let mut local = self.socket.local_addr()?;
        if local.ip().is_unspecified() {
            match route_ip(local.ip(), self.server_addr) {
                Ok(ip) => local.set_ip(ip),
                Err(e) => log::debug!("no route toward {}: {}", self.server_addr, e),
            }
        }
        Ok(local.into())
    }

    /// Next decodable message from the server within `timeout`, or `None`.
    ///
    /// Other traffic does not extend the deadline.
    fn recv_message(&self, timeout: Duration) -> Result<Option<Message>> {
        let deadline = Instant::now() + timeout;
        let old_timeout = self.socket.read_timeout()?;
        let mut buf = [0; MAX_DATAGRAM];

        let r = loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break Ok(None);
            }
            self.socket.set_read_timeout(Some(remaining))?;

            let (n, addr) = match self.socket.recv_from(&mut buf) {
                Ok(r) => r,
                Err(e) if is_timeout(&e) => break Ok(None),
                Err(e) if is_transient(&e) => {
                    log::debug!("recv: {}", e);
                    continue;
                }
                Err(e) => break Err(e.into()),
            };

            if addr != self.server_addr {
                log::trace!("ignore {} bytes from {}", n, addr);
                continue;
            }

            match proto::decode(&buf[..n]) {
                Ok(msg) => break Ok(Some(msg)),
                Err(e) => log::debug!("ignore reply: {}", e),
            }
        };

        self.socket.set_read_timeout(old_timeout)?;
        r
    }
}

fn route_ip(unspecified: IpAddr, to: SocketAddr) -> std::io::Result<IpAddr> {
    let probe = UdpSocket::bind((unspecified, 0))?;
    probe.connect(to)?;
    Ok(probe.local_addr()?.ip())
}

/// drop duplicates and addresses nobody can send to, keeping order
fn usable(candidates: Vec<Candidate>) -> Vec<SocketAddr> {
    let mut out: Vec<SocketAddr> = Vec::with_capacity(candidates.len());
    for c in candidates {
        let addr = SocketAddr::from(c);
        if addr.ip().is_unspecified() || addr.port() == 0 || out.contains(&addr) {
            continue;
        }
        out.push(addr);
    }
    out
}
