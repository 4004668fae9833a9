#![allow(dead_code)]

use serde_json::Value;
use std::fs;
use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

const ACCEPT_DEADLINE: Duration = Duration::from_secs(15);

#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub path: String,
    pub body: Value,
}

#[derive(Debug, Clone)]
pub struct CannedResponse {
    pub status: &'static str,
    pub content_type: &'static str,
    pub body: String,
}

impl CannedResponse {
    pub fn json(body: Value) -> Self {
        Self {
            status: "200 OK",
            content_type: "application/json",
            body: body.to_string(),
        }
    }

    pub fn ndjson(chunks: &[Value]) -> Self {
        let body = chunks
            .iter()
            .map(|chunk| format!("{chunk}\n"))
            .collect::<String>();
        Self {
            status: "200 OK",
            content_type: "application/x-ndjson",
            body,
        }
    }

    pub fn status(status: &'static str, body: Value) -> Self {
        Self {
            status,
            content_type: "application/json",
            body: body.to_string(),
        }
    }
}

/// A one-connection-per-response stand-in for an Ollama server.
pub struct MockOllama {
    pub addr: SocketAddr,
    handle: JoinHandle<Vec<CapturedRequest>>,
}

impl MockOllama {
    pub fn serve(responses: Vec<CannedResponse>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind should succeed");
        listener
            .set_nonblocking(true)
            .expect("listener should become non-blocking");
        let addr = listener.local_addr().expect("address should be available");

        let handle = thread::spawn(move || {
            let mut captured = Vec::new();
            for response in responses {
                let Some(mut stream) = accept_before_deadline(&listener) else {
                    break;
                };
                captured.push(read_request(&mut stream));
                write_response(&mut stream, &response);
            }
            captured
        });

        Self { addr, handle }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn finish(self) -> Vec<CapturedRequest> {
        self.handle.join().expect("mock server thread should join")
    }
}

fn accept_before_deadline(listener: &TcpListener) -> Option<TcpStream> {
    let started = Instant::now();
    loop {
        match listener.accept() {
            Ok((stream, _)) => {
                stream
                    .set_nonblocking(false)
                    .expect("stream should become blocking");
                stream
                    .set_read_timeout(Some(Duration::from_secs(5)))
                    .expect("read timeout should apply");
                return Some(stream);
            }
            Err(err) if err.kind() == ErrorKind::WouldBlock => {
                if started.elapsed() > ACCEPT_DEADLINE {
                    return None;
                }
                thread::sleep(Duration::from_millis(10));
            }
            Err(err) => panic!("accept failed: {err}"),
        }
    }
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|window| window == b"\r\n\r\n")
}

fn read_request(stream: &mut TcpStream) -> CapturedRequest {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    let header_end = loop {
        if let Some(pos) = find_header_end(&buf) {
            break pos;
        }
        let read = stream.read(&mut chunk).expect("request should be readable");
        assert!(read > 0, "client closed before sending headers");
        buf.extend_from_slice(&chunk[..read]);
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).into_owned();
    let path = head
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .unwrap_or_default()
        .to_string();
    let content_length = head
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0);

    let body_start = header_end + 4;
    while buf.len() < body_start + content_length {
        let read = stream.read(&mut chunk).expect("body should be readable");
        assert!(read > 0, "client closed before sending body");
        buf.extend_from_slice(&chunk[..read]);
    }

    let body_bytes = &buf[body_start..body_start + content_length];
    let body = serde_json::from_slice(body_bytes).unwrap_or(Value::Null);
    CapturedRequest { path, body }
}

fn write_response(stream: &mut TcpStream, response: &CannedResponse) {
    let head = format!(
        "HTTP/1.1 {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        response.status,
        response.content_type,
        response.body.len()
    );
    stream
        .write_all(head.as_bytes())
        .and_then(|_| stream.write_all(response.body.as_bytes()))
        .and_then(|_| stream.flush())
        .expect("response should be writable");
}

pub fn free_local_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind should succeed");
    let addr = listener.local_addr().expect("address should be available");
    drop(listener);
    addr
}

pub fn unique_temp_dir(suffix: &str) -> PathBuf {
    let stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock should be after unix epoch")
        .as_nanos();
    let dir = std::env::temp_dir().join(format!(
        "refiner-{suffix}-{stamp}-{}",
        std::process::id()
    ));
    fs::create_dir_all(&dir).expect("failed to create temp directory");
    dir
}

pub fn write_config(dir: &Path, yaml: &str) -> PathBuf {
    let path = dir.join("config.yaml");
    fs::write(&path, yaml).expect("failed to write config");
    path
}

/// The binary with a predictable environment: quiet stderr logging and
/// no inherited endpoint or timeout settings.
pub fn refiner_command() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_refiner"));
    cmd.env_remove("OLLAMA_HOST")
        .env_remove("MODEL_TIMEOUT_SECS")
        .env_remove("LOG_FILE_PATH")
        .env("RUST_LOG", "off")
        .env("LOG_OUTPUT", "stderr")
        .env("LOG_FORMAT", "pretty");
    cmd
}

pub fn run(cmd: &mut Command) -> Output {
    cmd.output().expect("failed to run refiner binary")
}
