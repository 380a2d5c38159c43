use punch::udp::{Connection, Server, Session};
use punch::{Config, Result};
use std::net::SocketAddr;
use std::time::Duration;
use structopt::StructOpt;

#[derive(StructOpt, Debug)]
#[structopt(name = "punch")]
enum Opt {
    Client(ClientOpt),
    Server(ServerOpt),
}

#[derive(StructOpt, Debug)]
struct ClientOpt {
    #[structopt(long = "server-addr")]
    server_addr: String,

    /// shared with the other peer; generated and printed when omitted
    #[structopt(long = "secret")]
    secret: Option<String>,

    /// sent to the peer once connected
    #[structopt(long = "message")]
    message: Option<String>,

    #[structopt(long = "session-retries", default_value = "4")]
    session_retries: u32,

    /// seconds
    #[structopt(long = "init-timeout", default_value = "10")]
    init_timeout: u64,

    /// seconds, 0 waits forever
    #[structopt(long = "punch-timeout", default_value = "30")]
    punch_timeout: u64,
}

#[derive(StructOpt, Debug)]
struct ServerOpt {
    #[structopt(long = "listen-addr", default_value = "0.0.0.0:8888")]
    listen_addr: SocketAddr,

    /// seconds
    #[structopt(long = "session-duration", default_value = "10")]
    session_duration: u64,
}

fn main() -> Result<()> {
    env_logger::init();

    let opt: Opt = StructOpt::from_args();

    match opt {
        Opt::Server(opt) => run_server(opt),
        Opt::Client(opt) => run_client(opt),
    }
}

fn run_server(opt: ServerOpt) -> Result<()> {
    let session_duration = Duration::from_secs(opt.session_duration);
    let config = Config {
        session_duration,
        eviction_age: session_duration * 6,
        ..Default::default()
    };

    let s = Server::new(opt.listen_addr, config)?;
    s.run()
}

fn run_client(opt: ClientOpt) -> Result<()> {
    let config = Config {
        session_retries: opt.session_retries,
        init_timeout: Duration::from_secs(opt.init_timeout),
        punch_timeout: match opt.punch_timeout {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        },
        ..Default::default()
    };

    let session = Session::new(&opt.server_addr, opt.secret.as_deref(), config)?;
    println!("secret {}", session.secret());

    let mut c = Connection::connect(session)?;
    println!("connected {} host {}", c.peer_addr(), c.is_host());

    if let Some(msg) = opt.message {
        c.send(msg.as_bytes())?;
    }

    let mut buf = [0; 65536];
    loop {
        let n = c.recv(&mut buf)?;
        println!("{}", String::from_utf8_lossy(&buf[..n]));
    }
}
