//! Loopback HTTP server answering JSON requests from a closure.

use std::sync::Arc;

use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

/// A request as the server saw it.
#[derive(Debug, Clone)]
pub(crate) struct StubRequest {
    pub(crate) method: String,
    pub(crate) path: String,
    pub(crate) body: Value,
}

type Handler = dyn Fn(&StubRequest) -> (u16, Value) + Send + Sync;

/// Running server; stops when its runtime shuts down.
pub(crate) struct StubServer {
    pub(crate) url: String,
    requests: mpsc::UnboundedReceiver<StubRequest>,
}

impl StubServer {
    /// Next request received, in arrival order.
    pub(crate) async fn request(&mut self) -> StubRequest {
        self.requests.recv().await.expect("stub server stopped")
    }
}

/// Bind an ephemeral port and answer every request with `handler`.
pub(crate) async fn serve(
    handler: impl Fn(&StubRequest) -> (u16, Value) + Send + Sync + 'static,
) -> StubServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    let (tx, requests) = mpsc::unbounded_channel();
    let handler: Arc<Handler> = Arc::new(handler);

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let handler = Arc::clone(&handler);
            let tx = tx.clone();
            tokio::spawn(async move {
                if let Some((stream, request)) = read_request(stream).await {
                    let (status, body) = handler(&request);
                    let _ = tx.send(request);
                    write_response(stream, status, &body).await;
                }
            });
        }
    });

    StubServer { url, requests }
}

async fn read_request(mut stream: TcpStream) -> Option<(TcpStream, StubRequest)> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    let header_end = loop {
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).into_owned();
    let mut lines = head.lines();
    let mut start = lines.next()?.split_whitespace();
    let method = start.next()?.to_string();
    let path = start.next()?.to_string();
    let content_length = lines
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0);

    while buf.len() < header_end + content_length {
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    let raw = &buf[header_end..header_end + content_length];
    let body = if raw.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(raw).unwrap_or(Value::Null)
    };

    Some((stream, StubRequest { method, path, body }))
}

async fn write_response(mut stream: TcpStream, status: u16, body: &Value) {
    let body = body.to_string();
    let response = format!(
        "HTTP/1.1 {status} Stub\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    let _ = stream.write_all(response.as_bytes()).await;
    let _ = stream.shutdown().await;
}
