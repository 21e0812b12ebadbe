use bytes::{Buf, BytesMut};
use thiserror::Error;
use url::Url;

use crate::http::request::{Headers, Method, Request, RequestHead, Version};
use crate::http::response::StatusCode;

const HEAD_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Default cap on the request line plus headers.
pub const DEFAULT_MAX_HEADER_BYTES: usize = 8 * 1024;
/// Default cap on a POST/PUT body.
pub const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("unsupported protocol version `{0}`")]
    UnsupportedProtocol(String),
    #[error("malformed request line")]
    MalformedStartLine,
    #[error("malformed header line")]
    MalformedHeader,
    #[error("invalid Content-Length `{0}`")]
    InvalidContentLength(String),
    #[error("request head exceeds {0} bytes")]
    HeadersTooLarge(usize),
    #[error("request body of {size} bytes exceeds the {limit} byte limit")]
    BodyTooLarge { size: usize, limit: usize },
}

impl ParseError {
    /// Status code sent back before the connection is closed.
    pub fn status(&self) -> StatusCode {
        match self {
            ParseError::BodyTooLarge { .. } => StatusCode::PayloadTooLarge,
            _ => StatusCode::BadRequest,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub max_header_bytes: usize,
    pub max_body_bytes: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_header_bytes: DEFAULT_MAX_HEADER_BYTES,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum ParseStatus {
    Incomplete,
    Complete(Request),
}

/// Incremental request assembler.
///
/// Bytes are buffered until the blank line closes the head; the head is then
/// parsed once and the body length is fixed from it. The request completes
/// when that many body bytes have arrived. How the input is split across
/// `feed` calls has no effect on the resulting request.
#[derive(Debug)]
pub struct RequestParser {
    buffer: BytesMut,
    head: Option<(RequestHead, usize)>,
    limits: Limits,
    trailing: usize,
}

impl RequestParser {
    pub fn new(limits: Limits) -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
            head: None,
            limits,
            trailing: 0,
        }
    }

    pub fn feed(&mut self, data: &[u8]) -> Result<ParseStatus, ParseError> {
        self.buffer.extend_from_slice(data);

        let (head, body_len) = match self.head.take() {
            Some(parsed) => parsed,
            None => match self.take_head()? {
                Some(parsed) => parsed,
                None => return Ok(ParseStatus::Incomplete),
            },
        };

        if self.buffer.len() < body_len {
            self.head = Some((head, body_len));
            return Ok(ParseStatus::Incomplete);
        }

        let body = self.buffer.split_to(body_len).to_vec();
        // One request per connection: anything sent past it is dropped.
        self.trailing = self.buffer.len();
        self.buffer.clear();

        Ok(ParseStatus::Complete(Request::from_head(head, body)))
    }

    /// True once the head is parsed and body bytes are still outstanding.
    pub fn awaiting_body(&self) -> bool {
        self.head.is_some()
    }

    /// Bytes received after the end of the completed request.
    pub fn trailing_bytes(&self) -> usize {
        self.trailing
    }

    fn take_head(&mut self) -> Result<Option<(RequestHead, usize)>, ParseError> {
        let max = self.limits.max_header_bytes;
        let end = match find_headers_end(&self.buffer) {
            Some(end) if end > max => return Err(ParseError::HeadersTooLarge(max)),
            Some(end) => end,
            None if self.buffer.len() > max => return Err(ParseError::HeadersTooLarge(max)),
            None => return Ok(None),
        };

        let head = parse_head(&self.buffer[..end])?;
        let body_len = body_length(&head)?;
        if body_len > self.limits.max_body_bytes {
            return Err(ParseError::BodyTooLarge {
                size: body_len,
                limit: self.limits.max_body_bytes,
            });
        }

        self.buffer.advance(end + HEAD_TERMINATOR.len());
        Ok(Some((head, body_len)))
    }
}

/// Parses a request head, without its terminating blank line.
pub fn parse_head(buf: &[u8]) -> Result<RequestHead, ParseError> {
    let mut lines = split_crlf(buf);

    // Request line
    let request_line = lines.next().ok_or(ParseError::MalformedStartLine)?;
    let request_line =
        std::str::from_utf8(request_line).map_err(|_| ParseError::MalformedStartLine)?;

    let parts: Vec<&str> = request_line.split_whitespace().collect();
    let &[method, target, version] = parts.as_slice() else {
        return Err(ParseError::MalformedStartLine);
    };

    if !method.bytes().all(is_token_byte) {
        return Err(ParseError::MalformedStartLine);
    }
    let version = Version::parse(version)
        .ok_or_else(|| ParseError::UnsupportedProtocol(version.to_string()))?;
    let uri = request_target(target)?;

    // Headers
    let mut headers = Headers::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }

        let line = std::str::from_utf8(line).map_err(|_| ParseError::MalformedHeader)?;
        let (name, value) = line.split_once(':').ok_or(ParseError::MalformedHeader)?;
        if name.is_empty() || !name.bytes().all(is_token_byte) {
            return Err(ParseError::MalformedHeader);
        }

        headers.insert(name, value.trim_start());
    }

    Ok(RequestHead {
        method: Method::parse(method),
        uri,
        version,
        headers,
    })
}

/// Number of body bytes that follow the head.
///
/// Only POST and PUT carry a body, framed by Content-Length. A missing header
/// means there is nothing to read.
pub fn body_length(head: &RequestHead) -> Result<usize, ParseError> {
    if !head.method.allows_body() {
        return Ok(0);
    }

    let Some(raw) = head.headers.get("Content-Length") else {
        return Ok(0);
    };
    let digits = raw.trim();
    // 1*DIGIT only; `usize::from_str` alone would accept a leading `+`.
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ParseError::InvalidContentLength(raw.to_string()));
    }
    digits
        .parse::<usize>()
        .map_err(|_| ParseError::InvalidContentLength(raw.to_string()))
}

pub fn find_headers_end(buf: &[u8]) -> Option<usize> {
    buf.windows(HEAD_TERMINATOR.len())
        .position(|w| w == HEAD_TERMINATOR)
}

fn split_crlf(mut buf: &[u8]) -> impl Iterator<Item = &[u8]> {
    std::iter::from_fn(move || {
        if buf.is_empty() {
            return None;
        }
        match buf.windows(2).position(|w| w == b"\r\n") {
            Some(i) => {
                let line = &buf[..i];
                buf = &buf[i + 2..];
                Some(line)
            }
            None => {
                let line = buf;
                buf = &[];
                Some(line)
            }
        }
    })
}

/// Origin-form targets pass through; absolute-form targets are reduced to
/// path and query.
fn request_target(raw: &str) -> Result<String, ParseError> {
    if raw.starts_with('/') || raw == "*" {
        return Ok(raw.to_string());
    }

    let url = Url::parse(raw).map_err(|_| ParseError::MalformedStartLine)?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ParseError::MalformedStartLine);
    }

    let mut target = url.path().to_string();
    if let Some(query) = url.query() {
        target.push('?');
        target.push_str(query);
    }
    Ok(target)
}

// RFC 9110 tchar
fn is_token_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
}
