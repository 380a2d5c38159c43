use super::store::SessionStore;
use super::{MAX_DATAGRAM, MIN_GC_INTERVAL};
use crate::proto;
use crate::{Config, Result};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::{
    net::{ToSocketAddrs, UdpSocket},
    select,
    time::{interval_at, MissedTickBehavior},
};

/// Udp rendezvous server on tokio
///
/// same protocol as [`super::Server`]; the task running [`AsyncServer::run`] owns the session
/// table, so no locking is involved.
pub struct AsyncServer {
    socket: UdpSocket,
    store: SessionStore,
    gc_interval: Duration,
}

impl AsyncServer {
    pub async fn new<A: ToSocketAddrs>(listen_addr: A, config: Config) -> Result<Self> {
        let socket = UdpSocket::bind(listen_addr).await?;

        Ok(Self {
            socket,
            store: SessionStore::new(&config),
            gc_interval: config.gc_interval.max(MIN_GC_INTERVAL),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub async fn run(mut self) -> Result<()> {
        let mut buf = vec![0; MAX_DATAGRAM];
        let start = tokio::time::Instant::now() + self.gc_interval;
        let mut gc = interval_at(start, self.gc_interval);
        gc.set_missed_tick_behavior(MissedTickBehavior::Delay);

        log::info!("rendezvous server listening on {}", self.socket.local_addr()?);

        loop {
            select! {
                r = self.socket.recv_from(&mut buf) => match r {
                    Ok((size, addr)) => self.handle_datagram(&buf[..size], addr).await,
                    Err(e) => log::debug!("recv: {}", e),
                },
                _ = gc.tick() => {
                    let n = self.store.gc(Instant::now());
                    if n > 0 {
                        log::debug!("swept {} pending sessions, {} left", n, self.store.len());
                    }
                }
            }
        }
    }

    async fn handle_datagram(&mut self, buf: &[u8], addr: SocketAddr) {
        for (to, msg) in self.store.dispatch(buf, addr, Instant::now()) {
            let buf = match proto::encode(&msg) {
                Ok(buf) => buf,
                Err(e) => {
                    log::warn!("encode {:?}: {}", msg, e);
                    continue;
                }
            };

            if let Err(e) = self.socket.send_to(&buf, to).await {
                log::warn!("send to {}: {}", to, e);
            }
        }
    }
}
