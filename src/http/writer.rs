use std::fs::File;
use std::io::{self, ErrorKind, Read, Write};
use std::time::SystemTime;

use crate::http::response::{Body, Response};

pub const SERVER_NAME: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// File bodies are read from disk this many bytes at a time.
pub const CHUNK_SIZE: usize = 8192;

/// Serializes the status line and headers, blank line included.
///
/// `Server`, `Date` and `Connection: close` are always emitted; every
/// connection ends after one response.
pub fn serialize_head(resp: &Response) -> Vec<u8> {
    let mut buf = Vec::with_capacity(256);

    // Status line
    let status_line = format!(
        "{} {} {}\r\n",
        resp.version,
        resp.status.as_u16(),
        resp.status.reason_phrase()
    );
    buf.extend_from_slice(status_line.as_bytes());

    push_header(&mut buf, "Server", SERVER_NAME);
    push_header(&mut buf, "Date", &httpdate::fmt_http_date(SystemTime::now()));

    for (k, v) in resp.headers.iter() {
        if is_managed_header(k) {
            continue;
        }
        push_header(&mut buf, k, v);
    }

    push_header(&mut buf, "Connection", "close");

    // Header/body separator
    buf.extend_from_slice(b"\r\n");
    buf
}

fn push_header(buf: &mut Vec<u8>, name: &str, value: &str) {
    buf.extend_from_slice(name.as_bytes());
    buf.extend_from_slice(b": ");
    buf.extend_from_slice(value.as_bytes());
    buf.extend_from_slice(b"\r\n");
}

fn is_managed_header(name: &str) -> bool {
    ["Server", "Date", "Connection"]
        .iter()
        .any(|h| h.eq_ignore_ascii_case(name))
}

/// Writes as many bytes as `out` accepts right now.
///
/// Returns 0 when the peer cannot take more without blocking.
pub fn write_body_chunk<W: Write>(out: &mut W, bytes: &[u8]) -> io::Result<usize> {
    loop {
        match out.write(bytes) {
            Ok(0) if !bytes.is_empty() => {
                return Err(io::Error::new(ErrorKind::WriteZero, "peer stopped accepting data"));
            }
            Ok(n) => return Ok(n),
            Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(0),
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteProgress {
    /// Head and body fully handed to the socket
    Complete,
    /// Socket is full, call again on the next writable event
    Pending,
}

/// Reads a file body one chunk at a time.
#[derive(Debug)]
struct FileProducer {
    file: File,
    remaining: u64,
}

impl FileProducer {
    fn fill(&mut self, buf: &mut Vec<u8>) -> io::Result<()> {
        let want = self.remaining.min(CHUNK_SIZE as u64) as usize;
        buf.clear();
        buf.resize(want, 0);

        let n = loop {
            match self.file.read(&mut buf[..]) {
                Ok(n) => break n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        };
        if n == 0 {
            return Err(io::Error::new(
                ErrorKind::UnexpectedEof,
                "file shrank while it was being served",
            ));
        }

        buf.truncate(n);
        self.remaining -= n as u64;
        Ok(())
    }
}

/// Non-blocking response serializer.
///
/// Holds the serialized head plus whatever body bytes are currently staged.
/// Buffered bodies are staged in full; file bodies are staged chunk by chunk
/// as the socket drains.
#[derive(Debug)]
pub struct ResponseWriter {
    pending: Vec<u8>,
    offset: usize,
    producer: Option<FileProducer>,
    written: u64,
}

impl ResponseWriter {
    pub fn new(response: Response) -> Self {
        let mut pending = serialize_head(&response);

        let producer = match response.body {
            Body::Empty => None,
            Body::Buffer(body) => {
                pending.extend_from_slice(&body);
                None
            }
            Body::File { file, len } => Some(FileProducer { file, remaining: len }),
        };

        Self {
            pending,
            offset: 0,
            producer,
            written: 0,
        }
    }

    pub fn write_to<W: Write>(&mut self, out: &mut W) -> io::Result<WriteProgress> {
        loop {
            if self.offset == self.pending.len() {
                match self.producer.as_mut() {
                    Some(producer) if producer.remaining > 0 => {
                        producer.fill(&mut self.pending)?;
                        self.offset = 0;
                    }
                    _ => {
                        // Drop the file handle as soon as the last chunk is out.
                        self.producer = None;
                        return Ok(WriteProgress::Complete);
                    }
                }
            }

            let accepted = write_body_chunk(out, &self.pending[self.offset..])?;
            if accepted == 0 {
                return Ok(WriteProgress::Pending);
            }

            self.offset += accepted;
            self.written += accepted as u64;
        }
    }

    /// Total bytes handed to the socket so far, head included.
    pub fn bytes_written(&self) -> u64 {
        self.written
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::response::{ResponseBuilder, StatusCode};
    use std::io::{Seek, SeekFrom};

    /// Accepts at most `limit` bytes per call and blocks on every other call.
    struct Throttled {
        out: Vec<u8>,
        limit: usize,
        block_next: bool,
    }

    impl Write for Throttled {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.block_next = !self.block_next;
            if !self.block_next {
                return Err(ErrorKind::WouldBlock.into());
            }
            let n = buf.len().min(self.limit);
            self.out.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn body_of(raw: &[u8]) -> &[u8] {
        let pos = raw.windows(4).position(|w| w == b"\r\n\r\n").unwrap();
        &raw[pos + 4..]
    }

    #[test]
    fn head_has_status_line_and_standard_headers() {
        let head = serialize_head(&Response::not_found());
        let text = String::from_utf8(head).unwrap();

        assert!(text.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert!(text.contains("\r\nServer: beacon/"));
        assert!(text.contains("\r\nDate: "));
        assert!(text.contains("\r\nConnection: close\r\n"));
        assert!(text.ends_with("\r\n\r\n"));
    }

    #[test]
    fn resumes_after_would_block() {
        let mut writer = ResponseWriter::new(Response::ok(b"helloworld".to_vec()));
        let mut sink = Throttled { out: Vec::new(), limit: 7, block_next: false };

        let mut rounds = 0;
        while writer.write_to(&mut sink).unwrap() == WriteProgress::Pending {
            rounds += 1;
            assert!(rounds < 1000);
        }

        assert!(rounds > 0);
        assert_eq!(body_of(&sink.out), b"helloworld");
        assert_eq!(writer.bytes_written(), sink.out.len() as u64);
    }

    #[test]
    fn streams_file_in_chunks() {
        let contents: Vec<u8> = (0..(CHUNK_SIZE * 3 + 17)).map(|i| (i % 251) as u8).collect();
        let mut file = tempfile::tempfile().unwrap();
        file.write_all(&contents).unwrap();
        file.seek(SeekFrom::Start(0)).unwrap();

        let response = ResponseBuilder::new(StatusCode::Ok)
            .file(file, contents.len() as u64)
            .build();
        let mut writer = ResponseWriter::new(response);
        let mut sink = Throttled { out: Vec::new(), limit: 5000, block_next: false };

        while writer.write_to(&mut sink).unwrap() == WriteProgress::Pending {}

        assert_eq!(body_of(&sink.out), &contents[..]);
    }

    #[test]
    fn truncated_file_is_an_error() {
        let mut file = tempfile::tempfile().unwrap();
        file.write_all(b"short").unwrap();
        file.seek(SeekFrom::Start(0)).unwrap();

        let response = ResponseBuilder::new(StatusCode::Ok).file(file, 100).build();
        let mut writer = ResponseWriter::new(response);
        let mut out = Vec::new();

        let err = writer.write_to(&mut out).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnexpectedEof);
    }
}
