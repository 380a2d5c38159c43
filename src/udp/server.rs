use super::store::SessionStore;
use super::{is_timeout, MAX_DATAGRAM, MIN_GC_INTERVAL};
use crate::proto::{self, Message};
use crate::{Config, Result};
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::time::{Duration, Instant};

/// Udp rendezvous server
///
/// pair two requests sharing a secret, and tell each side how to reach the other.
pub struct Server {
    socket: UdpSocket,
    store: SessionStore,
    gc_interval: Duration,
    next_gc: Instant,
}

impl Server {
    pub fn new<A: ToSocketAddrs>(listen_addr: A, config: Config) -> Result<Self> {
        let socket = UdpSocket::bind(listen_addr)?;
        let gc_interval = config.gc_interval.max(MIN_GC_INTERVAL);

        Ok(Self {
            socket,
            store: SessionStore::new(&config),
            gc_interval,
            next_gc: Instant::now() + gc_interval,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Serve forever. Only fails if the socket itself can not be configured.
    pub fn run(mut self) -> Result<()> {
        let mut buf = [0; MAX_DATAGRAM];

        // wake up when idle so the sweep still runs
        self.socket.set_read_timeout(Some(self.gc_interval))?;

        log::info!("rendezvous server listening on {}", self.socket.local_addr()?);

        loop {
            self.serve_once(&mut buf);
        }
    }

    /// Handle at most one datagram, then sweep if due.
    fn serve_once(&mut self, buf: &mut [u8]) {
        match self.socket.recv_from(buf) {
            Ok((size, addr)) => self.handle_datagram(&buf[..size], addr),
            Err(e) if is_timeout(&e) => {}
            Err(e) => log::debug!("recv: {}", e),
        }

        let now = Instant::now();
        if now > self.next_gc {
            self.gc(now);
        }
    }

    fn handle_datagram(&mut self, buf: &[u8], addr: SocketAddr) {
        for (to, msg) in self.store.dispatch(buf, addr, Instant::now()) {
            self.send_response(&msg, to);
        }
    }

    fn send_response(&self, msg: &Message, addr: SocketAddr) {
        let buf = match proto::encode(msg) {
            Ok(buf) => buf,
            Err(e) => {
                log::warn!("encode {:?}: {}", msg, e);
                return;
            }
        };

        if let Err(e) = self.socket.send_to(&buf, addr) {
            log::warn!("send to {}: {}", addr, e);
        }
    }

    fn gc(&mut self, now: Instant) {
        let n = self.store.gc(now);
        if n > 0 {
            log::debug!("swept {} pending sessions, {} left", n, self.store.len());
        }

        self.next_gc = now + self.gc_interval;
    }
}
