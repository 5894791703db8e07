//! In-process mock of the arena backend for integration tests.
//!
//! Each connection serves exactly one request and then closes, so reqwest
//! never reuses a socket between test steps.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use translation_arena::ArenaConfig;

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub query: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        let name = name.to_ascii_lowercase();
        self.headers
            .iter()
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn json(&self) -> serde_json::Value {
        serde_json::from_str(&self.body).unwrap()
    }
}

pub enum Reply {
    Json { status: u16, body: String },
    /// SSE body written chunk by chunk, then the connection is closed unless
    /// `hold_open` is set. A held connection waits up to 30s for the client
    /// to hang up and records it in `MockBackend::disconnects`.
    Sse { chunks: Vec<String>, hold_open: bool },
}

impl Reply {
    pub fn json(status: u16, body: serde_json::Value) -> Self {
        Reply::Json {
            status,
            body: body.to_string(),
        }
    }

    pub fn sse(chunks: Vec<String>) -> Self {
        Reply::Sse {
            chunks,
            hold_open: false,
        }
    }
}

pub type Router = Arc<dyn Fn(&RecordedRequest) -> Reply + Send + Sync>;

pub struct MockBackend {
    pub base_url: String,
    pub requests: Arc<Mutex<Vec<RecordedRequest>>>,
    /// Paths of held-open streams the client closed.
    pub disconnects: Arc<Mutex<Vec<String>>>,
    handle: JoinHandle<()>,
}

impl MockBackend {
    pub async fn start<F>(router: F) -> Self
    where
        F: Fn(&RecordedRequest) -> Reply + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let disconnects = Arc::new(Mutex::new(Vec::new()));
        let router: Router = Arc::new(router);

        let log = Arc::clone(&requests);
        let hangups = Arc::clone(&disconnects);
        let handle = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                let router = Arc::clone(&router);
                let log = Arc::clone(&log);
                let hangups = Arc::clone(&hangups);
                tokio::spawn(async move {
                    handle_connection(stream, router, log, hangups).await;
                });
            }
        });

        MockBackend {
            base_url: format!("http://{}", addr),
            requests,
            disconnects,
            handle,
        }
    }

    pub fn config(&self) -> ArenaConfig {
        ArenaConfig {
            base_url: self.base_url.clone(),
            csrf_token: Some("csrf-123".to_string()),
            session_cookie: Some("session=abc".to_string()),
            connect_timeout_secs: 2,
            request_timeout_secs: 5,
            stream_idle_timeout_secs: 5,
            ..ArenaConfig::default()
        }
    }

    pub fn requests_to(&self, path: &str) -> Vec<RecordedRequest> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.path == path)
            .cloned()
            .collect()
    }

    /// Wait up to `within` for the client to hang up on a held stream at `path`.
    pub async fn wait_for_disconnect(&self, path: &str, within: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + within;
        loop {
            if self.disconnects.lock().unwrap().iter().any(|p| p == path) {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}

impl Drop for MockBackend {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    router: Router,
    log: Arc<Mutex<Vec<RecordedRequest>>>,
    hangups: Arc<Mutex<Vec<String>>>,
) {
    let Some(request) = read_request(&mut stream).await else {
        return;
    };
    log.lock().unwrap().push(request.clone());

    match router(&request) {
        Reply::Json { status, body } => {
            let reason = if status < 400 { "OK" } else { "Error" };
            let response = format!(
                "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                reason,
                body.len(),
                body
            );
            let _ = stream.write_all(response.as_bytes()).await;
        }
        Reply::Sse { chunks, hold_open } => {
            let head = "HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nCache-Control: no-cache\r\nConnection: close\r\n\r\n";
            if stream.write_all(head.as_bytes()).await.is_err() {
                return;
            }
            for chunk in chunks {
                if stream.write_all(chunk.as_bytes()).await.is_err() {
                    return;
                }
                let _ = stream.flush().await;
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            if hold_open {
                let mut byte = [0u8; 1];
                let read = tokio::time::timeout(Duration::from_secs(30), stream.read(&mut byte)).await;
                if matches!(read, Ok(Ok(0)) | Ok(Err(_))) {
                    hangups.lock().unwrap().push(request.path.clone());
                }
            }
        }
    }
    let _ = stream.shutdown().await;
}

struct Head {
    len: usize,
    method: String,
    target: String,
    headers: Vec<(String, String)>,
}

fn parse_head(buf: &[u8]) -> Option<Option<Head>> {
    let mut headers = [httparse::EMPTY_HEADER; 32];
    let mut req = httparse::Request::new(&mut headers);
    match req.parse(buf) {
        Ok(httparse::Status::Complete(len)) => Some(Some(Head {
            len,
            method: req.method?.to_string(),
            target: req.path?.to_string(),
            headers: req
                .headers
                .iter()
                .map(|h| {
                    (
                        h.name.to_ascii_lowercase(),
                        String::from_utf8_lossy(h.value).into_owned(),
                    )
                })
                .collect(),
        })),
        Ok(httparse::Status::Partial) => Some(None),
        Err(_) => None,
    }
}

async fn read_request(stream: &mut TcpStream) -> Option<RecordedRequest> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    let head = loop {
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(head) = parse_head(&buf)? {
            break head;
        }
    };

    let content_length = head
        .headers
        .iter()
        .find(|(k, _)| k == "content-length")
        .and_then(|(_, v)| v.parse::<usize>().ok())
        .unwrap_or(0);
    while buf.len() < head.len + content_length {
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    let end = (head.len + content_length).min(buf.len());
    let body = String::from_utf8_lossy(&buf[head.len..end]).into_owned();

    let (path, query) = match head.target.split_once('?') {
        Some((p, q)) => (p.to_string(), q.to_string()),
        None => (head.target.clone(), String::new()),
    };

    Some(RecordedRequest {
        method: head.method,
        path,
        query,
        headers: head.headers,
        body,
    })
}

// -- Payload helpers ---------------------------------------------------------

pub fn result_event(model: &str, id: i64, cost: f64) -> String {
    format!(
        "data: {}\n\n",
        serde_json::json!({
            "model": model,
            "id": id,
            "query_id": 42,
            "translation": format!("{} translation", model),
            "cost": cost,
            "response_hash": format!("hash-{}", model),
        })
    )
}

pub fn error_event(model: &str, message: &str) -> String {
    format!(
        "data: {}\n\n",
        serde_json::json!({ "error": message, "model": model })
    )
}

pub fn auth_event() -> String {
    "data: {\"error\":\"Authentication required\",\"type\":\"auth_error\"}\n\n".to_string()
}

pub const END_EVENT: &str = "event: end\ndata: {}\n\n";
