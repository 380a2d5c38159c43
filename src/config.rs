use std::time::Duration;

/// Rendezvous attempts before a session gives up.
pub const SESSION_RETRIES: u32 = 4;
/// How long a client waits for the first reply to a request.
pub const INIT_TIMEOUT: Duration = Duration::from_secs(10);
/// How long the server keeps a pending request matchable.
pub const SESSION_DURATION: Duration = Duration::from_secs(10);

/// Protocol timing, shared by client and server.
///
/// Only `session_duration` crosses the wire (as `expires` in `wait` replies); the other
/// values are local to each process.
#[derive(Debug, Clone)]
pub struct Config {
    pub session_retries: u32,
    pub init_timeout: Duration,
    pub session_duration: Duration,
    /// Give up punching after this long. `None` waits forever.
    pub punch_timeout: Option<Duration>,
    /// PUNCH is repeated to every candidate at this period until the link is confirmed.
    pub punch_interval: Duration,
    /// Pending server records older than this are dropped by the sweep.
    pub eviction_age: Duration,
    /// Server sweep period, raised to a few milliseconds if smaller.
    pub gc_interval: Duration,
    /// Payloads kept while punching; later ones are dropped until the link is up.
    pub max_held: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            session_retries: SESSION_RETRIES,
            init_timeout: INIT_TIMEOUT,
            session_duration: SESSION_DURATION,
            punch_timeout: Some(Duration::from_secs(30)),
            punch_interval: Duration::from_secs(1),
            eviction_age: SESSION_DURATION * 6,
            gc_interval: Duration::from_secs(30),
            max_held: 1024,
        }
    }
}
