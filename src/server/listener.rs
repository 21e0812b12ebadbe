use std::collections::HashMap;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::os::fd::AsRawFd;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token};
use nix::sys::socket::{
    AddressFamily, Backlog, SockFlag, SockType, SockaddrStorage, bind, listen, setsockopt, socket,
    sockopt,
};
use signal_hook::consts::{SIGINT, SIGTERM};
use tracing::{debug, error, info, info_span, warn};

use crate::config::ServerConfig;
use crate::http::connection::Connection;

const LISTENER: Token = Token(0);
const EVENTS_CAPACITY: usize = 1024;
const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

struct Entry {
    conn: Connection<TcpStream>,
    interest: Interest,
}

/// Single-threaded event loop serving one listening socket.
pub struct Server {
    poll: Poll,
    listener: TcpListener,
    local_addr: SocketAddr,
    connections: HashMap<Token, Entry>,
    next_token: usize,
    config: Arc<ServerConfig>,
    shutdown: Arc<AtomicBool>,
    last_sweep: Instant,
}

impl Server {
    /// Binds the listening socket with port sharing enabled, so sibling
    /// worker processes can bind the same address.
    pub fn bind(config: Arc<ServerConfig>) -> Result<Self> {
        let addr = config.address()?;
        let std_listener = reuseport_listener(addr, config.backlog)
            .with_context(|| format!("binding {addr}"))?;

        let mut listener = TcpListener::from_std(std_listener);
        let local_addr = listener.local_addr()?;

        let poll = Poll::new().context("creating poller")?;
        poll.registry()
            .register(&mut listener, LISTENER, Interest::READABLE)
            .context("registering listener")?;

        info!(
            address = %local_addr,
            root = %config.document_root.display(),
            "listening"
        );

        Ok(Self {
            poll,
            listener,
            local_addr,
            connections: HashMap::new(),
            next_token: LISTENER.0 + 1,
            config,
            shutdown: Arc::new(AtomicBool::new(false)),
            last_sweep: Instant::now(),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Flag checked once per poll round; setting it stops [`run`](Self::run).
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Drives the loop until shutdown is requested.
    ///
    /// Only a failing poller ends it with an error; connection errors are
    /// handled inside the connection.
    pub fn run(&mut self) -> Result<()> {
        let mut events = Events::with_capacity(EVENTS_CAPACITY);

        while !self.shutdown.load(Ordering::Relaxed) {
            if let Err(e) = self.poll.poll(&mut events, Some(self.config.poll_timeout)) {
                if e.kind() == ErrorKind::Interrupted {
                    continue;
                }
                return Err(e).context("waiting for readiness");
            }

            for event in events.iter() {
                match event.token() {
                    LISTENER => self.accept(),
                    token => self.ready(token),
                }
            }

            if self.last_sweep.elapsed() >= SWEEP_INTERVAL {
                self.sweep_idle();
            }
        }

        info!("shutdown requested");
        Ok(())
    }

    /// Runs the loop and closes every socket however it ended.
    ///
    /// A poller failure is logged and returned after cleanup.
    pub fn serve_forever(mut self) -> Result<()> {
        let outcome = self.run();
        if let Err(e) = &outcome {
            error!(error = %format!("{e:#}"), "event loop failed");
        }

        let open = self.connections.len();
        for (_, mut entry) in self.connections.drain() {
            entry.conn.close();
            let _ = self.poll.registry().deregister(entry.conn.transport_mut());
        }
        let _ = self.poll.registry().deregister(&mut self.listener);
        info!(address = %self.local_addr, dropped_connections = open, "listener closed");
        outcome
    }

    fn accept(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((mut stream, peer)) => {
                    let token = Token(self.next_token);
                    self.next_token += 1;

                    if let Err(e) = self.poll.registry().register(&mut stream, token, Interest::READABLE) {
                        warn!(%peer, error = %e, "could not register connection");
                        continue;
                    }

                    debug!(%peer, token = token.0, "accepted connection");
                    let conn = Connection::new(stream, peer.to_string(), Arc::clone(&self.config));
                    self.connections.insert(
                        token,
                        Entry {
                            conn,
                            interest: Interest::READABLE,
                        },
                    );
                }
                // Nothing left to accept, or another worker got there first.
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if matches!(e.kind(), ErrorKind::Interrupted | ErrorKind::ConnectionAborted) => {
                    continue;
                }
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    break;
                }
            }
        }
    }

    fn ready(&mut self, token: Token) {
        // Closed earlier in this round.
        let Some(entry) = self.connections.get_mut(&token) else {
            return;
        };

        if entry.interest == Interest::READABLE {
            entry.conn.handle_readable();
        } else {
            entry.conn.handle_writable();
        }
        self.sync(token);
    }

    /// Re-registers the socket when its connection changed interest, or
    /// drops it once closing.
    fn sync(&mut self, token: Token) {
        let Some(entry) = self.connections.get_mut(&token) else {
            return;
        };

        match entry.conn.interest() {
            None => {
                if let Some(mut entry) = self.connections.remove(&token) {
                    let _ = self.poll.registry().deregister(entry.conn.transport_mut());
                }
                debug!(token = token.0, "connection closed");
            }
            Some(interest) if interest != entry.interest => {
                match self
                    .poll
                    .registry()
                    .reregister(entry.conn.transport_mut(), token, interest)
                {
                    Ok(()) => entry.interest = interest,
                    Err(e) => {
                        warn!(token = token.0, error = %e, "could not re-register connection");
                        entry.conn.close();
                        self.connections.remove(&token);
                    }
                }
            }
            Some(_) => {}
        }
    }

    fn sweep_idle(&mut self) {
        let now = Instant::now();
        self.last_sweep = now;

        let changed: Vec<Token> = self
            .connections
            .iter_mut()
            .filter_map(|(token, entry)| {
                entry.conn.check_idle(now);
                (entry.conn.interest() != Some(entry.interest)).then_some(*token)
            })
            .collect();

        for token in changed {
            self.sync(token);
        }
    }
}

/// Non-blocking listening socket with `SO_REUSEADDR` and `SO_REUSEPORT` set
/// before bind, so the kernel spreads connections across every worker bound
/// to `addr`.
fn reuseport_listener(addr: SocketAddr, backlog: i32) -> nix::Result<std::net::TcpListener> {
    let family = match addr {
        SocketAddr::V4(_) => AddressFamily::Inet,
        SocketAddr::V6(_) => AddressFamily::Inet6,
    };

    let fd = socket(
        family,
        SockType::Stream,
        SockFlag::SOCK_NONBLOCK | SockFlag::SOCK_CLOEXEC,
        None,
    )?;
    setsockopt(&fd, sockopt::ReuseAddr, &true)?;
    setsockopt(&fd, sockopt::ReusePort, &true)?;
    bind(fd.as_raw_fd(), &SockaddrStorage::from(addr))?;
    listen(&fd, Backlog::new(backlog)?)?;

    Ok(std::net::TcpListener::from(fd))
}

/// Entry point of a worker process: serve until SIGINT or SIGTERM.
pub fn run_worker(id: usize, config: Arc<ServerConfig>) -> Result<()> {
    let span = info_span!("worker", id);
    let _enter = span.enter();

    let server = Server::bind(config)?;

    let shutdown = server.shutdown_handle();
    for signal in [SIGINT, SIGTERM] {
        signal_hook::flag::register(signal, Arc::clone(&shutdown))
            .context("installing signal handler")?;
    }

    info!(pid = std::process::id(), "worker started");
    server.serve_forever()
}
