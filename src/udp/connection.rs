use super::{is_timeout, is_transient, Session};
use crate::proto::{Control, Frame};
use crate::{Config, Error, Result};
use std::collections::VecDeque;
use std::net::{SocketAddr, UdpSocket};
use std::time::{Duration, Instant};

/// fits any UDP datagram
const RECV_BUF: usize = 65536;

/// Direct channel to the peer found by a [`Session`].
///
/// Datagrams carry a one byte tag, so the same socket keeps answering stray `PUNCH`
/// messages after the link is up. Delivery is plain UDP: no ordering, no retransmission.
///
/// # example
/// ```no_run
/// use punch::udp::{Connection, Session};
/// use punch::Config;
///
/// let s = Session::new("rendezvous:8888", Some("shared secret"), Config::default()).unwrap();
/// let mut c = Connection::connect(s).unwrap();
/// c.send(b"hello").unwrap();
///
/// let mut buf = [0u8; 1500];
/// let n = c.recv(&mut buf).unwrap();
/// ```
pub struct Connection {
    socket: UdpSocket,
    target: SocketAddr,
    host: bool,
    held: VecDeque<Vec<u8>>,
    scratch: Vec<u8>,
}

impl Connection {
    /// Resolve the session if needed, then punch toward every candidate until the link is
    /// confirmed in both directions.
    ///
    /// Gives up with [`Error::PunchTimeout`] after `Config::punch_timeout`.
    pub fn connect(session: Session) -> Result<Self> {
        let (socket, candidates, host, config) = session.into_parts()?;
        let old_timeout = socket.read_timeout()?;

        let mut scratch = vec![0; RECV_BUF];
        let mut punch = Punch::new(&socket);
        let target = punch.run(&candidates, &config, &mut scratch)?;
        let held = punch.held;

        socket.set_read_timeout(old_timeout)?;
        log::info!("connected to {} (host: {})", target, host);

        Ok(Self {
            socket,
            target,
            host,
            held,
            scratch,
        })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.target
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn is_host(&self) -> bool {
        self.host
    }

    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        Ok(self.socket.set_read_timeout(timeout)?)
    }

    /// Send one datagram to the peer, returns the payload bytes sent.
    pub fn send(&self, payload: &[u8]) -> Result<usize> {
        let n = self
            .socket
            .send_to(&Frame::Data(payload).encode(), self.target)?;
        Ok(n.saturating_sub(1))
    }

    /// Next payload from the peer. Like a UDP receive, excess bytes are discarded when `buf`
    /// is too small.
    ///
    /// Payloads that arrived while punching come first, in arrival order.
    pub fn recv(&mut self, buf: &mut [u8]) -> Result<usize> {
        if let Some(payload) = self.held.pop_front() {
            return Ok(copy_truncated(&payload, buf));
        }

        loop {
            let (n, from) = match self.socket.recv_from(&mut self.scratch) {
                Ok(r) => r,
                Err(e) if is_transient(&e) => {
                    log::debug!("recv: {}", e);
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            match Frame::parse(&self.scratch[..n]) {
                Some(Frame::Data(payload)) => return Ok(copy_truncated(payload, buf)),
                Some(Frame::Control(Control::Punch)) => {
                    log::trace!("late punch from {}", from);
                    send_control(&self.socket, Control::Confirm, from)?;
                }
                Some(Frame::Control(Control::Confirm)) => {
                    log::trace!("late confirm from {}", from);
                }
                None => log::trace!("drop {} bytes from {}", n, from),
            }
        }
    }
}

fn copy_truncated(payload: &[u8], buf: &mut [u8]) -> usize {
    let n = payload.len().min(buf.len());
    buf[..n].copy_from_slice(&payload[..n]);
    n
}

fn send_control(socket: &UdpSocket, c: Control, to: SocketAddr) -> Result<()> {
    match socket.send_to(&Frame::Control(c).encode(), to) {
        Ok(_) => Ok(()),
        // reported for an earlier datagram, not this one
        Err(e) if is_transient(&e) => {
            log::debug!("send {:?} to {}: {}", c, to, e);
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// Handshake state. Established once we confirmed a PUNCH and got our own confirmed.
struct Punch<'a> {
    socket: &'a UdpSocket,
    target: Option<SocketAddr>,
    sent_confirm: bool,
    got_confirm: bool,
    held: VecDeque<Vec<u8>>,
}

impl<'a> Punch<'a> {
    fn new(socket: &'a UdpSocket) -> Self {
        Self {
            socket,
            target: None,
            sent_confirm: false,
            got_confirm: false,
            held: VecDeque::new(),
        }
    }

    fn established(&self) -> Option<SocketAddr> {
        if self.sent_confirm && self.got_confirm {
            self.target
        } else {
            None
        }
    }

    fn run(
        &mut self,
        candidates: &[SocketAddr],
        config: &Config,
        buf: &mut [u8],
    ) -> Result<SocketAddr> {
        let started = Instant::now();
        let mut next_punch = started;

        loop {
            if let Some(target) = self.established() {
                return Ok(target);
            }

            let now = Instant::now();
            let elapsed = now.duration_since(started);
            if let Some(limit) = config.punch_timeout {
                if elapsed >= limit {
                    log::debug!("no confirmed path after {:?}", elapsed);
                    return Err(Error::PunchTimeout(limit));
                }
            }

            if now >= next_punch {
                self.punch_all(candidates);
                next_punch = now + config.punch_interval;
            }

            let mut wait = next_punch.saturating_duration_since(now);
            if let Some(limit) = config.punch_timeout {
                wait = wait.min(limit.saturating_sub(elapsed));
            }
            self.socket
                .set_read_timeout(Some(wait.max(Duration::from_millis(1))))?;

            let (n, from) = match self.socket.recv_from(buf) {
                Ok(r) => r,
                Err(e) if is_timeout(&e) => continue,
                // a dead candidate answered with ICMP unreachable
                Err(e) if is_transient(&e) => {
                    log::debug!("recv: {}", e);
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            match Frame::parse(&buf[..n]) {
                Some(Frame::Control(c)) => self.handle_control(c, from)?,
                Some(Frame::Data(payload)) if self.held.len() >= config.max_held => {
                    log::debug!("held queue full, drop {} bytes from {}", payload.len(), from);
                }
                Some(Frame::Data(payload)) => {
                    log::trace!("hold {} bytes from {}", payload.len(), from);
                    self.held.push_back(payload.to_vec());
                }
                None => log::trace!("drop {} bytes from {}", n, from),
            }
        }
    }

    fn punch_all(&self, candidates: &[SocketAddr]) {
        for c in candidates {
            log::trace!("punch {}", c);
            // some candidates are simply unreachable from here
            if let Err(e) = send_control(self.socket, Control::Punch, *c) {
                log::debug!("punch {}: {}", c, e);
            }
        }
    }

    fn handle_control(&mut self, c: Control, from: SocketAddr) -> Result<()> {
        match c {
            Control::Punch => {
                log::debug!("punch from {}", from);
                self.target = Some(from);
                self.sent_confirm = true;
                send_control(self.socket, Control::Confirm, from)?;
                if !self.got_confirm {
                    send_control(self.socket, Control::Punch, from)?;
                }
            }
            Control::Confirm => {
                log::debug!("confirm from {}", from);
                self.got_confirm = true;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::udp::Server;
    use std::thread;

    fn socket() -> UdpSocket {
        UdpSocket::bind("127.0.0.1:0").unwrap()
    }

    fn quick() -> Config {
        Config {
            punch_timeout: Some(Duration::from_secs(5)),
            punch_interval: Duration::from_millis(100),
            ..Default::default()
        }
    }

    fn pair(delay_a: Duration, delay_b: Duration) -> (Connection, Connection) {
        let a = socket();
        let b = socket();
        let a_addr = a.local_addr().unwrap();
        let b_addr = b.local_addr().unwrap();

        // first candidate goes nowhere, like an unreachable private address
        let dead = socket().local_addr().unwrap();
        let sa = Session::resolved(a, vec![dead, b_addr], true, quick()).unwrap();
        let sb = Session::resolved(b, vec![a_addr], false, quick()).unwrap();

        let ta = thread::spawn(move || {
            thread::sleep(delay_a);
            Connection::connect(sa).unwrap()
        });
        let tb = thread::spawn(move || {
            thread::sleep(delay_b);
            Connection::connect(sb).unwrap()
        });

        (ta.join().unwrap(), tb.join().unwrap())
    }

    fn recv(c: &mut Connection) -> Vec<u8> {
        let mut buf = [0; 1500];
        let n = c.recv(&mut buf).unwrap();
        buf[..n].to_vec()
    }

    #[test]
    fn test_converges_either_order() {
        for (da, db) in [
            (Duration::ZERO, Duration::from_millis(300)),
            (Duration::from_millis(300), Duration::ZERO),
            (Duration::ZERO, Duration::ZERO),
        ] {
            let (mut a, mut b) = pair(da, db);
            assert_eq!(a.peer_addr(), b.local_addr().unwrap());
            assert_eq!(b.peer_addr(), a.local_addr().unwrap());
            assert!(a.is_host());
            assert!(!b.is_host());

            a.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
            b.set_read_timeout(Some(Duration::from_secs(5))).unwrap();

            assert_eq!(a.send(b"ping").unwrap(), 4);
            assert_eq!(recv(&mut b), b"ping");
            b.send(b"pong").unwrap();
            assert_eq!(recv(&mut a), b"pong");
        }
    }

    #[test]
    fn test_data_during_punch_is_held() {
        let peer = socket();
        peer.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let b = socket();
        let b_addr = b.local_addr().unwrap();

        let early: [&[u8]; 5] = [b"1first", b"1second", b"0PUNCH", b"1third", b"0CONFIRM"];
        for d in early {
            peer.send_to(d, b_addr).unwrap();
        }

        let s = Session::resolved(b, vec![peer.local_addr().unwrap()], false, quick()).unwrap();
        let mut c = Connection::connect(s).unwrap();
        c.set_read_timeout(Some(Duration::from_secs(5))).unwrap();

        assert_eq!(recv(&mut c), b"first");
        assert_eq!(recv(&mut c), b"second");
        assert_eq!(recv(&mut c), b"third");

        // the punched peer saw our PUNCH, then CONFIRM and a PUNCH back
        let mut buf = [0; 64];
        let mut got = vec![];
        for _ in 0..3 {
            let (n, _) = peer.recv_from(&mut buf).unwrap();
            got.push(buf[..n].to_vec());
        }
        assert_eq!(got, vec![b"0PUNCH".to_vec(), b"0CONFIRM".to_vec(), b"0PUNCH".to_vec()]);
    }

    #[test]
    fn test_held_queue_is_bounded() {
        let peer = socket();
        let b = socket();
        let b_addr = b.local_addr().unwrap();

        let early: [&[u8]; 5] = [b"1a", b"1b", b"1c", b"0PUNCH", b"0CONFIRM"];
        for d in early {
            peer.send_to(d, b_addr).unwrap();
        }

        let config = Config {
            max_held: 2,
            ..quick()
        };
        let s = Session::resolved(b, vec![peer.local_addr().unwrap()], false, config).unwrap();
        let mut c = Connection::connect(s).unwrap();
        c.set_read_timeout(Some(Duration::from_secs(5))).unwrap();

        // the earliest payloads are kept, the overflow is gone
        assert_eq!(recv(&mut c), b"a");
        assert_eq!(recv(&mut c), b"b");
        peer.send_to(b"1d", b_addr).unwrap();
        assert_eq!(recv(&mut c), b"d");
    }

    #[test]
    fn test_unreachable_candidate_keeps_punching() {
        let closed = socket();
        let dead = closed.local_addr().unwrap();
        drop(closed);

        // connected, so the port unreachable reply surfaces on this socket
        let s = socket();
        s.connect(dead).unwrap();

        let config = Config {
            punch_timeout: Some(Duration::from_millis(300)),
            punch_interval: Duration::from_millis(50),
            ..Default::default()
        };
        let s = Session::resolved(s, vec![dead], true, config).unwrap();

        match Connection::connect(s) {
            Err(Error::PunchTimeout(_)) => {}
            r => panic!("unexpected {:?}", r.err()),
        }
    }

    #[test]
    fn test_control_after_established() {
        let (mut a, b) = pair(Duration::ZERO, Duration::ZERO);
        let b_addr = b.local_addr().unwrap();
        a.set_read_timeout(Some(Duration::from_secs(5))).unwrap();

        let stray = socket();
        stray
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        let a_addr = a.local_addr().unwrap();
        stray.send_to(b"0PUNCH", a_addr).unwrap();
        stray.send_to(b"0CONFIRM", a_addr).unwrap();
        stray.send_to(b"xjunk", a_addr).unwrap();
        b.send(b"data").unwrap();

        assert_eq!(recv(&mut a), b"data");
        assert_eq!(a.peer_addr(), b_addr);

        let mut buf = [0; 64];
        let (n, _) = stray.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"0CONFIRM");
    }

    #[test]
    fn test_recv_truncates() {
        let (mut a, b) = pair(Duration::ZERO, Duration::ZERO);
        a.set_read_timeout(Some(Duration::from_secs(5))).unwrap();

        b.send(b"0123456789").unwrap();
        let mut small = [0; 4];
        assert_eq!(a.recv(&mut small).unwrap(), 4);
        assert_eq!(&small, b"0123");
    }

    #[test]
    fn test_punch_timeout() {
        let silent = socket();
        let config = Config {
            punch_timeout: Some(Duration::from_millis(300)),
            punch_interval: Duration::from_millis(50),
            ..Default::default()
        };
        let s = Session::resolved(socket(), vec![silent.local_addr().unwrap()], true, config)
            .unwrap();

        let start = Instant::now();
        match Connection::connect(s) {
            Err(Error::PunchTimeout(d)) => assert_eq!(d, Duration::from_millis(300)),
            r => panic!("unexpected {:?}", r.err()),
        }
        assert!(start.elapsed() < Duration::from_secs(2));

        // PUNCH kept being repeated while waiting
        silent
            .set_read_timeout(Some(Duration::from_millis(100)))
            .unwrap();
        let mut buf = [0; 64];
        let mut punches = 0;
        while let Ok((n, _)) = silent.recv_from(&mut buf) {
            assert_eq!(&buf[..n], b"0PUNCH");
            punches += 1;
        }
        assert!(punches >= 2);
    }

    #[test]
    fn test_through_server() {
        let server = Server::new("127.0.0.1:0", Config::default()).unwrap();
        let server_addr = server.local_addr().unwrap().to_string();
        thread::spawn(move || server.run());

        let s1 = Session::new(&server_addr, None, quick()).unwrap();
        let secret = s1.secret().to_string();

        let t = thread::spawn(move || {
            let s2 = Session::new(&server_addr, Some(&secret), quick()).unwrap();
            let mut c2 = Connection::connect(s2).unwrap();
            c2.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
            let got = recv(&mut c2);
            c2.send(b"world").unwrap();
            (got, c2.is_host())
        });

        let mut c1 = Connection::connect(s1).unwrap();
        c1.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        c1.send(b"hello").unwrap();
        assert_eq!(recv(&mut c1), b"world");

        let (got, host2) = t.join().unwrap();
        assert_eq!(got, b"hello");
        assert_ne!(c1.is_host(), host2);
    }
}
