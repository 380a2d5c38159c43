use rand::{distributions::Alphanumeric, Rng};

pub const SECRET_LEN: usize = 32;

/// Random rendezvous key, `[A-Za-z0-9]{32}`.
///
/// Both peers must present the same secret; getting it to the other side is up to the caller.
pub fn generate_secret() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SECRET_LEN)
        .map(char::from)
        .collect()
}
