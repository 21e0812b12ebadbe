//! End-to-end tests against a live event loop on an ephemeral port.

use std::fs;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, mpsc};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use beacon::config::ServerConfig;
use beacon::server::Server;
use tempfile::TempDir;

struct Running {
    _root: TempDir,
    addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Running {
    fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            handle.join().unwrap();
        }
    }
}

impl Drop for Running {
    fn drop(&mut self) {
        self.stop();
    }
}

fn test_config(root: &TempDir, port: u16) -> Arc<ServerConfig> {
    let mut config = ServerConfig::new(root.path()).unwrap();
    config.port = port;
    config.poll_timeout = Duration::from_millis(50);
    Arc::new(config)
}

fn spawn_server(config: Arc<ServerConfig>) -> (SocketAddr, Arc<AtomicBool>, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel();
    let handle = thread::spawn(move || {
        let server = Server::bind(config).unwrap();
        tx.send((server.local_addr(), server.shutdown_handle())).unwrap();
        server.serve_forever().unwrap();
    });
    let (addr, shutdown) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    (addr, shutdown, handle)
}

fn start() -> Running {
    let root = tempfile::tempdir().unwrap();
    fs::write(root.path().join("index.html"), "helloworld").unwrap();
    fs::create_dir(root.path().join("assets")).unwrap();
    fs::write(root.path().join("assets").join("big.bin"), vec![7u8; 200_000]).unwrap();

    let (addr, shutdown, handle) = spawn_server(test_config(&root, 0));
    Running {
        _root: root,
        addr,
        shutdown,
        handle: Some(handle),
    }
}

fn fetch(addr: SocketAddr, raw: &[u8]) -> (String, Vec<u8>) {
    let mut stream = TcpStream::connect(addr).unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    stream.write_all(raw).unwrap();

    let mut response = Vec::new();
    stream.read_to_end(&mut response).unwrap();

    let pos = response
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .expect("response has a blank line");
    (
        String::from_utf8(response[..pos + 4].to_vec()).unwrap(),
        response[pos + 4..].to_vec(),
    )
}

#[test]
fn test_serves_file_over_tcp() {
    let server = start();
    let (head, body) = fetch(server.addr, b"GET /index.html HTTP/1.1\r\nHost: localhost\r\n\r\n");

    assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(head.contains("\r\nContent-Length: 10\r\n"));
    assert!(head.contains("\r\nConnection: close\r\n"));
    assert_eq!(body, b"helloworld");
}

#[test]
fn test_error_statuses_over_tcp() {
    let server = start();

    let (head, _) = fetch(server.addr, b"GET /missing HTTP/1.1\r\n\r\n");
    assert!(head.starts_with("HTTP/1.1 404 "));

    let (head, _) = fetch(server.addr, b"GET /../../etc/passwd HTTP/1.1\r\n\r\n");
    assert!(head.starts_with("HTTP/1.1 404 "));

    let (head, _) = fetch(server.addr, b"DELETE / HTTP/1.1\r\n\r\n");
    assert!(head.starts_with("HTTP/1.1 405 "));

    let (head, _) = fetch(server.addr, b"GET / FTP/1.0\r\n\r\n");
    assert!(head.starts_with("HTTP/1.1 400 "));
}

#[test]
fn test_head_over_tcp() {
    let server = start();
    let (head, body) = fetch(server.addr, b"HEAD /index.html HTTP/1.1\r\n\r\n");

    assert!(head.contains("\r\nContent-Length: 10\r\n"));
    assert!(body.is_empty());
}

#[test]
fn test_request_sent_in_pieces() {
    let server = start();
    let mut stream = TcpStream::connect(server.addr).unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();

    for piece in [&b"GET /ind"[..], b"ex.html HT", b"TP/1.1\r\n", b"\r\n"] {
        stream.write_all(piece).unwrap();
        stream.flush().unwrap();
        thread::sleep(Duration::from_millis(20));
    }

    let mut response = Vec::new();
    stream.read_to_end(&mut response).unwrap();
    assert!(response.starts_with(b"HTTP/1.1 200 OK\r\n"));
    assert!(response.ends_with(b"helloworld"));
}

#[test]
fn test_large_file_streams_completely() {
    let server = start();
    let (head, body) = fetch(server.addr, b"GET /assets/big.bin HTTP/1.1\r\n\r\n");

    assert!(head.contains("\r\nContent-Length: 200000\r\n"));
    assert!(head.contains("\r\nContent-Type: application/octet-stream\r\n"));
    assert_eq!(body.len(), 200_000);
    assert!(body.iter().all(|&b| b == 7));
}

#[test]
fn test_concurrent_clients() {
    let server = start();
    let addr = server.addr;

    let clients: Vec<_> = (0..16)
        .map(|_| thread::spawn(move || fetch(addr, b"GET / HTTP/1.0\r\n\r\n")))
        .collect();

    for client in clients {
        let (head, body) = client.join().unwrap();
        assert!(head.starts_with("HTTP/1.0 200 OK\r\n"));
        assert_eq!(body, b"helloworld");
    }
}

#[test]
fn test_two_listeners_share_a_port() {
    let mut first = start();
    let (addr, shutdown, handle) = spawn_server(test_config(&first._root, first.addr.port()));
    let mut second = Running {
        _root: tempfile::tempdir().unwrap(),
        addr,
        shutdown,
        handle: Some(handle),
    };
    assert_eq!(first.addr, second.addr);

    for _ in 0..4 {
        let (head, _) = fetch(first.addr, b"GET / HTTP/1.1\r\n\r\n");
        assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
    }

    second.stop();
    first.stop();
}

#[test]
fn test_shutdown_flag_stops_loop() {
    let mut server = start();
    server.stop();

    assert!(server.handle.is_none());
    assert!(TcpStream::connect(server.addr).is_err());
}
