//! Wire formats.
//!
//! Rendezvous traffic is one JSON object per datagram, discriminated by its `type` field.
//! Once a peer is found, the punched socket carries tagged frames instead: the first byte is
//! `'0'` for control (`PUNCH` / `CONFIRM`) or `'1'` for application data.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};

/// An address at which a peer might be reachable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Candidate {
    pub ip: IpAddr,
    pub port: u16,
}

impl From<SocketAddr> for Candidate {
    fn from(addr: SocketAddr) -> Self {
        Self {
            ip: addr.ip(),
            port: addr.port(),
        }
    }
}

impl From<Candidate> for SocketAddr {
    fn from(c: Candidate) -> Self {
        SocketAddr::new(c.ip, c.port)
    }
}

/// Rendezvous message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Message {
    /// client -> server: register under `secret`.
    Request {
        secret: String,
        local: Vec<Candidate>,
    },
    /// server -> client: no peer yet, wait up to `expires` seconds.
    Wait { expires: f64 },
    /// server -> client: peer found. The first candidate is the address the server observed.
    Session { candidates: Vec<Candidate>, host: bool },
    /// client -> server: probe, never answered.
    Ignore,
}

pub fn encode(msg: &Message) -> Result<Vec<u8>> {
    serde_json::to_vec(msg).map_err(Error::Encode)
}

pub fn decode(buf: &[u8]) -> Result<Message> {
    serde_json::from_slice(buf).map_err(Error::MalformedMessage)
}

pub const TAG_CONTROL: u8 = b'0';
pub const TAG_DATA: u8 = b'1';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Punch,
    Confirm,
}

impl Control {
    pub fn token(self) -> &'static [u8] {
        match self {
            Control::Punch => b"PUNCH",
            Control::Confirm => b"CONFIRM",
        }
    }

    fn from_token(token: &[u8]) -> Option<Self> {
        match token {
            b"PUNCH" => Some(Control::Punch),
            b"CONFIRM" => Some(Control::Confirm),
            _ => None,
        }
    }
}

/// A datagram on the punched channel.
#[derive(Debug, PartialEq, Eq)]
pub enum Frame<'a> {
    Control(Control),
    Data(&'a [u8]),
}

impl<'a> Frame<'a> {
    /// Returns `None` for anything that is not a well formed frame.
    pub fn parse(buf: &'a [u8]) -> Option<Self> {
        let (tag, rest) = buf.split_first()?;
        match *tag {
            TAG_CONTROL => Control::from_token(rest).map(Frame::Control),
            TAG_DATA => Some(Frame::Data(rest)),
            _ => None,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let (tag, body) = match self {
            Frame::Control(c) => (TAG_CONTROL, c.token()),
            Frame::Data(d) => (TAG_DATA, *d),
        };
        let mut buf = Vec::with_capacity(body.len() + 1);
        buf.push(tag);
        buf.extend_from_slice(body);
        buf
    }
}
