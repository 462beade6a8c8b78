//! HTTP control surface (component E): a connection-per-request dispatcher.
//!
//! Grounded on the teacher's `http.rs` `Service<Request<Incoming>>` dispatch
//! pattern (path match -> handler), simplified to a raw `TcpListener` accept
//! loop because SPEC_FULL.md §4.E wants a single-read/single-response,
//! `Connection: close` dispatcher for four fixed paths, not a persistent
//! HTTP/1.1 server.

use std::sync::Arc;

use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use crate::queue::QueueError;
use crate::sequence::Registry;
use crate::settings::ComboLoopMode;

const MAX_REQUEST_BYTES: usize = 2048;

/// Outcome of a start request. Kept distinct from a plain `bool` so a
/// monitor-gated refusal (I6: external-active implies not streaming) reports
/// differently from an ordinary already-running no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    AlreadyRunning,
    BlockedByMonitor,
}

/// The subset of application state the control surface needs, kept minimal so
/// this module never reaches into pipeline internals directly.
pub trait Controllable: Send + Sync {
    fn start(&self) -> anyhow::Result<StartOutcome>;
    fn stop(&self) -> anyhow::Result<bool>;
    fn registry(&self) -> Arc<Registry>;
    fn combo_loop_mode(&self) -> ComboLoopMode;
    fn enqueue(&self, name: &str) -> Result<(), QueueError>;
}

pub async fn serve(port: u16, app: Arc<dyn Controllable>) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    log::info!("control surface listening on :{port}");
    loop {
        let (socket, _) = listener.accept().await?;
        let app = app.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(socket, app).await {
                log::warn!("control surface: connection error: {e}");
            }
        });
    }
}

async fn handle_connection(mut socket: tokio::net::TcpStream, app: Arc<dyn Controllable>) -> anyhow::Result<()> {
    let mut buf = vec![0u8; MAX_REQUEST_BYTES];
    let n = socket.read(&mut buf).await?;
    let request = &buf[..n];

    let line_end = request.iter().position(|&b| b == b'\n').unwrap_or(request.len());
    let line = String::from_utf8_lossy(&request[..line_end]);
    let line = line.trim_end_matches('\r');

    let mut parts = line.split_whitespace();
    let method = parts.next().unwrap_or("");
    let path = parts.next().unwrap_or("");

    let (status, body) = if method != "GET" {
        (405, json!({"status": "method_not_allowed"}))
    } else {
        dispatch(path, &app)
    };

    write_response(&mut socket, status, &body.to_string()).await
}

fn dispatch(path: &str, app: &Arc<dyn Controllable>) -> (u16, serde_json::Value) {
    if path == "/request/start" {
        return match app.start() {
            Ok(StartOutcome::Started) => (200, json!({"status": "started"})),
            Ok(StartOutcome::AlreadyRunning) => (200, json!({"status": "already_running"})),
            Ok(StartOutcome::BlockedByMonitor) => (409, json!({"status": "blocked_by_monitor"})),
            Err(e) => (500, json!({"status": "error", "message": e.to_string()})),
        };
    }
    if path == "/request/stop" {
        return match app.stop() {
            Ok(true) => (200, json!({"status": "stopped"})),
            Ok(false) => (200, json!({"status": "already_stopped"})),
            Err(e) => (500, json!({"status": "error", "message": e.to_string()})),
        };
    }
    if path == "/request/list" {
        let registry = app.registry();
        let sequences: Vec<&str> = registry.sequences().iter().map(|s| s.name.as_str()).collect();
        let combos: Vec<_> = registry
            .combos()
            .iter()
            .map(|c| {
                json!({
                    "name": c.name,
                    "order": c.order.iter().map(|&i| registry.sequence(i).name.clone()).collect::<Vec<_>>(),
                    "loop_at_end": c.loop_at_end,
                })
            })
            .collect();
        return (200, json!({"sequences": sequences, "combos": combos}));
    }
    if let Some(encoded) = path.strip_prefix("/request/enqueue/") {
        let name = url_decode(encoded);
        return match app.enqueue(&name) {
            Ok(()) => (200, json!({"status": "queued"})),
            Err(QueueError::NotFound) => (404, json!({"status": "not_found"})),
            Err(QueueError::EmptyName) => (400, json!({"status": "empty_name"})),
            Err(QueueError::Full) => (409, json!({"status": "queue_full"})),
            Err(QueueError::InvalidIndex) => (400, json!({"status": "invalid_index"})),
        };
    }
    (404, json!({"status": "not_found"}))
}

async fn write_response(socket: &mut tokio::net::TcpStream, status: u16, body: &str) -> anyhow::Result<()> {
    let reason = match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        409 => "Conflict",
        500 => "Internal Server Error",
        _ => "Unknown",
    };
    let response = format!(
        "HTTP/1.1 {status} {reason}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    socket.write_all(response.as_bytes()).await?;
    socket.shutdown().await.ok();
    Ok(())
}

fn url_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let Ok(byte) = u8::from_str_radix(std::str::from_utf8(&bytes[i + 1..i + 3]).unwrap_or(""), 16) {
                out.push(byte);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_percent_encoded_names() {
        assert_eq!(url_decode("hello%20world"), "hello world");
        assert_eq!(url_decode("plain"), "plain");
    }
}
