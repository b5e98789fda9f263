//! End-to-end scenarios against a real `Reactor` bound to a loopback port:
//! idle-close, keep-alive, large file, busy reject, bad request.
//!
//! Each test picks an unused high port, starts the reactor on a background
//! thread, and drives it with a plain `std::net::TcpStream` client. No
//! database or cache server is assumed to be present, so `conn_pool_num`/
//! `cache_pool_num` are kept at `1` and any pool-backed route degrades to a
//! `503` rather than failing the test.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU16, Ordering};
use std::thread;
use std::time::Duration;

use hivewire::{Config, Reactor};

static NEXT_PORT: AtomicU16 = AtomicU16::new(18_000);

fn next_port() -> u16 {
    NEXT_PORT.fetch_add(1, Ordering::SeqCst)
}

fn base_config(doc_root: PathBuf) -> Config {
    let mut config = Config::default();
    config.port = next_port();
    config.doc_root = doc_root;
    config.conn_pool_num = 1;
    config.cache_pool_num = 1;
    config.thread_num = 2;
    config
}

fn spawn_server(config: Config) -> u16 {
    let port = config.port;
    thread::spawn(move || {
        let mut reactor = Reactor::new(&config).expect("reactor should start on a free port");
        let _ = reactor.run();
    });
    // Give the listener thread time to bind before the test connects.
    thread::sleep(Duration::from_millis(100));
    port
}

fn connect(port: u16) -> TcpStream {
    TcpStream::connect(("127.0.0.1", port)).expect("server should be listening")
}

#[test]
fn idle_connection_is_closed_after_its_timeout() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = base_config(dir.path().to_path_buf());
    config.timeout_ms = 100;
    let port = spawn_server(config);

    let mut client = connect(port);
    client.set_read_timeout(Some(Duration::from_secs(2))).unwrap();

    let mut buf = [0u8; 16];
    let n = client.read(&mut buf).unwrap();
    assert_eq!(n, 0, "server should close the idle connection with EOF");
}

#[test]
fn keep_alive_serves_two_requests_on_one_connection() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("index.html"), b"hello world").unwrap();
    let config = base_config(dir.path().to_path_buf());
    let port = spawn_server(config);

    let mut client = connect(port);
    client
        .set_read_timeout(Some(Duration::from_secs(2)))
        .unwrap();

    client
        .write_all(b"GET / HTTP/1.1\r\nConnection: keep-alive\r\n\r\n")
        .unwrap();
    let first = read_one_response(&mut client);
    assert!(first.starts_with("HTTP/1.1 200"));
    assert!(first.contains("Content-Length: 11"));

    client
        .write_all(b"GET / HTTP/1.1\r\nConnection: close\r\n\r\n")
        .unwrap();
    let second = read_one_response(&mut client);
    assert!(second.starts_with("HTTP/1.1 200"));
    assert!(second.contains("Connection: close"));
}

#[test]
fn bad_request_gets_a_400_response() {
    let dir = tempfile::tempdir().unwrap();
    let config = base_config(dir.path().to_path_buf());
    let port = spawn_server(config);

    let mut client = connect(port);
    client
        .set_read_timeout(Some(Duration::from_secs(2)))
        .unwrap();
    client.write_all(b"GARBAGE\r\n\r\n").unwrap();

    let response = read_one_response(&mut client);
    assert!(response.starts_with("HTTP/1.1 400"));
}

#[test]
fn large_file_is_served_whole_across_multiple_partial_writes() {
    let dir = tempfile::tempdir().unwrap();
    let body = vec![b'x'; 10 * 1024 * 1024];
    std::fs::write(dir.path().join("big.bin"), &body).unwrap();
    let config = base_config(dir.path().to_path_buf());
    let port = spawn_server(config);

    let mut client = connect(port);
    client
        .set_read_timeout(Some(Duration::from_secs(10)))
        .unwrap();
    client
        .write_all(b"GET /big.bin HTTP/1.1\r\nConnection: close\r\n\r\n")
        .unwrap();

    let mut received = Vec::new();
    client.read_to_end(&mut received).unwrap();

    let header_end = find(&received, b"\r\n\r\n").expect("response should have a header section");
    let header = std::str::from_utf8(&received[..header_end]).unwrap();
    assert!(header.starts_with("HTTP/1.1 200"));
    assert!(header.contains(&format!("Content-Length: {}", body.len())));
    assert_eq!(&received[header_end + 4..], body.as_slice());
}

#[test]
fn a_fifth_connection_past_max_fd_is_rejected_with_the_busy_message() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = base_config(dir.path().to_path_buf());
    config.max_fd = 4;
    let port = spawn_server(config);

    let mut held = Vec::new();
    for _ in 0..4 {
        held.push(connect(port));
    }

    let mut fifth = connect(port);
    fifth
        .set_read_timeout(Some(Duration::from_secs(2)))
        .unwrap();
    let mut buf = Vec::new();
    fifth.read_to_end(&mut buf).unwrap();
    assert_eq!(buf, b"Server busy!");
}

fn read_one_response(client: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = client.read(&mut chunk).unwrap();
        buf.extend_from_slice(&chunk[..n]);
        if let Some(header_end) = find(&buf, b"\r\n\r\n") {
            let text = String::from_utf8_lossy(&buf[..header_end]).to_string();
            let content_length = text
                .lines()
                .find_map(|line| line.strip_prefix("Content-Length: "))
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if buf.len() >= header_end + 4 + content_length {
                return String::from_utf8_lossy(&buf).to_string();
            }
        }
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}
