use std::io::{self, ErrorKind, Read, Write};
use std::net::Shutdown;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use mio::Interest;
use tracing::{debug, error, info, trace, warn};

use crate::config::ServerConfig;
use crate::files::{self, PathResolver, ResolveError, Resolved};
use crate::http::parser::{ParseStatus, RequestParser};
use crate::http::request::{Method, Request};
use crate::http::response::{Response, StatusCode};
use crate::http::writer::{ResponseWriter, WriteProgress};

/// Bytes pulled from the socket per read call.
pub const READ_CHUNK: usize = 4096;

/// What a connection needs from its socket.
///
/// Head and body bytes go out through `Write`; `close` ends the stream.
/// The descriptor itself is released when the transport is dropped.
pub trait Transport: Read + Write {
    fn close(&mut self) -> io::Result<()>;
}

impl Transport for mio::net::TcpStream {
    fn close(&mut self) -> io::Result<()> {
        self.shutdown(Shutdown::Write)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    ReadingHeaders,
    ReadingBody,
    Dispatching,
    WritingResponse,
    Closing,
}

impl ConnectionState {
    fn is_reading(self) -> bool {
        matches!(self, ConnectionState::ReadingHeaders | ConnectionState::ReadingBody)
    }
}

/// One client socket and the request/response cycle running on it.
///
/// The event loop calls [`handle_readable`](Self::handle_readable) or
/// [`handle_writable`](Self::handle_writable) on every readiness event and then
/// re-registers the socket for [`interest`](Self::interest). Handlers never
/// block: they work until the socket reports `WouldBlock` and return.
pub struct Connection<T> {
    transport: T,
    peer: String,
    state: ConnectionState,
    parser: RequestParser,
    writer: Option<ResponseWriter>,
    config: Arc<ServerConfig>,
    last_activity: Instant,
    request_line: Option<String>,
    status: Option<StatusCode>,
}

impl<T: Transport> Connection<T> {
    pub fn new(transport: T, peer: impl Into<String>, config: Arc<ServerConfig>) -> Self {
        Self {
            transport,
            peer: peer.into(),
            state: ConnectionState::ReadingHeaders,
            parser: RequestParser::new(config.limits()),
            writer: None,
            config,
            last_activity: Instant::now(),
            request_line: None,
            status: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Readiness the socket must be registered for; `None` once closing.
    pub fn interest(&self) -> Option<Interest> {
        match self.state {
            ConnectionState::ReadingHeaders | ConnectionState::ReadingBody => {
                Some(Interest::READABLE)
            }
            ConnectionState::Dispatching | ConnectionState::WritingResponse => {
                Some(Interest::WRITABLE)
            }
            ConnectionState::Closing => None,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn handle_readable(&mut self) {
        if !self.state.is_reading() {
            return;
        }

        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match self.transport.read(&mut chunk) {
                Ok(0) => {
                    debug!(peer = %self.peer, state = ?self.state, "peer closed before sending a full request");
                    self.close();
                    return;
                }
                Ok(n) => {
                    self.last_activity = Instant::now();
                    match self.parser.feed(&chunk[..n]) {
                        Ok(ParseStatus::Incomplete) => {
                            if self.parser.awaiting_body() {
                                self.transition(ConnectionState::ReadingBody);
                            }
                        }
                        Ok(ParseStatus::Complete(request)) => {
                            self.dispatch(request);
                            break;
                        }
                        Err(e) => {
                            debug!(peer = %self.peer, error = %e, "rejecting request");
                            self.respond(Response::error(e.status()));
                            break;
                        }
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    debug!(peer = %self.peer, error = %e, "read failed");
                    self.close();
                    return;
                }
            }
        }

        // The socket is usually writable right away; skip a round trip
        // through the poller.
        self.flush();
    }

    pub fn handle_writable(&mut self) {
        if self.state != ConnectionState::WritingResponse {
            return;
        }
        self.last_activity = Instant::now();
        self.flush();
    }

    /// Expires a connection that has been quiet for longer than the idle timeout.
    ///
    /// A client still sending its request is told 408 first. A client not
    /// draining its response is dropped.
    pub fn check_idle(&mut self, now: Instant) {
        if now.saturating_duration_since(self.last_activity) < self.config.idle_timeout {
            return;
        }

        match self.state {
            ConnectionState::ReadingHeaders | ConnectionState::ReadingBody => {
                debug!(peer = %self.peer, "request timed out");
                self.last_activity = now;
                self.respond(Response::error(StatusCode::RequestTimeout));
                self.flush();
            }
            ConnectionState::Dispatching | ConnectionState::WritingResponse => {
                debug!(peer = %self.peer, "client stopped reading, dropping response");
                self.close();
            }
            ConnectionState::Closing => {}
        }
    }

    /// Moves to `Closing`, ends the stream and drops any open file.
    pub fn close(&mut self) {
        if self.state == ConnectionState::Closing {
            return;
        }
        self.transition(ConnectionState::Closing);
        self.writer = None;
        if let Err(e) = self.transport.close() {
            if e.kind() != ErrorKind::NotConnected {
                trace!(peer = %self.peer, error = %e, "shutdown failed");
            }
        }
    }

    fn dispatch(&mut self, request: Request) {
        self.transition(ConnectionState::Dispatching);
        self.request_line = Some(format!("{} {} {}", request.method, request.uri, request.version));

        let trailing = self.parser.trailing_bytes();
        if trailing > 0 {
            debug!(peer = %self.peer, trailing, "discarding bytes sent past the request");
        }

        let config = &self.config;
        let mut response = isolate_panics(&self.peer, &request.uri, || handle_request(config, &request));

        if request.method == Method::HEAD {
            response.strip_body();
        }
        self.respond(response.with_version(request.version));
    }

    fn respond(&mut self, response: Response) {
        self.status = Some(response.status);
        self.writer = Some(ResponseWriter::new(response));
        self.transition(ConnectionState::WritingResponse);
    }

    fn flush(&mut self) {
        let Some(writer) = self.writer.as_mut() else {
            return;
        };

        match writer.write_to(&mut self.transport) {
            Ok(WriteProgress::Complete) => {
                self.log_completed();
                self.close();
            }
            Ok(WriteProgress::Pending) => {}
            Err(e) => {
                debug!(peer = %self.peer, error = %e, "write failed");
                self.close();
            }
        }
    }

    fn log_completed(&self) {
        let status = self.status.map(|s| s.as_u16()).unwrap_or_default();
        let bytes = self.writer.as_ref().map(|w| w.bytes_written()).unwrap_or_default();
        info!(
            peer = %self.peer,
            request = self.request_line.as_deref().unwrap_or("-"),
            status,
            bytes,
            "response sent"
        );
    }

    fn transition(&mut self, next: ConnectionState) {
        if self.state != next {
            trace!(peer = %self.peer, from = ?self.state, to = ?next, "state change");
            self.state = next;
        }
    }
}

/// Runs a request handler; a panic inside it becomes a 500 for this request
/// only.
fn isolate_panics(peer: &str, uri: &str, handler: impl FnOnce() -> Response) -> Response {
    panic::catch_unwind(AssertUnwindSafe(handler)).unwrap_or_else(|_| {
        error!(peer, uri, "request handler panicked");
        Response::internal_error()
    })
}

/// Builds the response for a complete request.
///
/// Only GET and HEAD reach the filesystem. HEAD gets the same response as
/// GET here; the caller strips the body.
pub fn handle_request(config: &ServerConfig, request: &Request) -> Response {
    if !matches!(request.method, Method::GET | Method::HEAD) {
        return Response::method_not_allowed();
    }

    let served = match PathResolver::new(config).resolve(&request.uri) {
        Ok(Resolved::File(path)) => files::file_response(&path),
        Ok(Resolved::Directory(dir)) => files::listing_response(&dir, &request.uri),
        Err(ResolveError::Io(e)) => Err(e),
        Err(e) => return Response::error(e.status()),
    };

    served.unwrap_or_else(|e| {
        if e.kind() == ErrorKind::NotFound {
            // Removed between resolution and open.
            return Response::not_found();
        }
        warn!(uri = %request.uri, error = %e, "filesystem error");
        Response::internal_error()
    })
}
