#![allow(dead_code)]

use httpstub::MockServer;
use std::{
    io::{Read, Write},
    net::{TcpListener, TcpStream},
    time::Duration,
};

/// Starts a server on an ephemeral port.
pub fn start_server() -> MockServer {
    let _ = env_logger::try_init();
    let server = MockServer::new();
    server.start(0).expect("cannot start mock server");
    server
}

pub fn url(server: &MockServer, path: &str) -> String {
    server.url(path).expect("server is not running")
}

/// A port that was free a moment ago.
pub fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

pub fn connect(server: &MockServer) -> TcpStream {
    let stream = TcpStream::connect(("127.0.0.1", server.port())).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    stream
}

/// Writes `raw` on a fresh connection and reads until the server closes it.
pub fn send_raw(server: &MockServer, raw: &[u8]) -> String {
    let mut stream = connect(server);
    stream.write_all(raw).unwrap();

    let mut out = Vec::new();
    stream.read_to_end(&mut out).unwrap();
    String::from_utf8(out).unwrap()
}

/// Reads one response with a `Content-Length` framed body from `stream`.
pub fn read_response(stream: &mut TcpStream) -> String {
    let mut out = Vec::new();
    let mut byte = [0u8; 1];
    while !out.ends_with(b"\r\n\r\n") {
        stream.read_exact(&mut byte).unwrap();
        out.push(byte[0]);
    }

    let head = String::from_utf8(out.clone()).unwrap();
    let length = head
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.eq_ignore_ascii_case("content-length")
                .then(|| value.trim().parse::<usize>().unwrap())
        })
        .unwrap_or(0);

    let mut body = vec![0u8; length];
    stream.read_exact(&mut body).unwrap();
    out.extend_from_slice(&body);

    String::from_utf8(out).unwrap()
}
