//! HTTP front end: landing page, MJPEG video feed and health probe.
//!
//! One accept thread, one thread per connection. Each `/video_feed` viewer
//! reads from its own broadcaster queue, so a stalled client only ever loses
//! its own frames.

use anyhow::{anyhow, Context, Result};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::stream::{response_content_type, FrameBroadcaster, ViewerPoll};

const MAX_REQUEST_BYTES: usize = 8192;
const INDEX_HTML: &str = include_str!("index.html");
const VIEWER_POLL_INTERVAL: Duration = Duration::from_millis(200);
const VIEWER_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:5000".to_string(),
        }
    }
}

#[derive(Debug)]
pub struct ServerHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ServerHandle {
    /// Stop accepting, end every viewer stream and wait for all threads.
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("stream server thread panicked"))?;
        }
        Ok(())
    }
}

pub struct StreamServer {
    cfg: ServerConfig,
    broadcaster: FrameBroadcaster,
}

impl StreamServer {
    pub fn new(cfg: ServerConfig, broadcaster: FrameBroadcaster) -> Self {
        Self { cfg, broadcaster }
    }

    pub fn spawn(self) -> Result<ServerHandle> {
        let configured_addr: SocketAddr = self
            .cfg
            .addr
            .parse()
            .with_context(|| format!("invalid server address {}", self.cfg.addr))?;
        let listener = TcpListener::bind(configured_addr)
            .with_context(|| format!("bind {}", configured_addr))?;
        let addr = listener.local_addr()?;
        if configured_addr.ip().is_loopback() && !addr.ip().is_loopback() {
            return Err(anyhow!(
                "server configured for loopback address '{}', but bound to non-loopback address '{}'",
                configured_addr,
                addr
            ));
        }
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let broadcaster = self.broadcaster;
        let join = std::thread::spawn(move || {
            if let Err(err) = run_server(listener, broadcaster, shutdown_thread) {
                log::error!("stream server stopped: {}", err);
            }
        });

        Ok(ServerHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_server(
    listener: TcpListener,
    broadcaster: FrameBroadcaster,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    let mut connections: Vec<JoinHandle<()>> = Vec::new();
    let result = loop {
        if shutdown.load(Ordering::SeqCst) {
            break Ok(());
        }
        match listener.accept() {
            Ok((stream, peer)) => {
                let broadcaster = broadcaster.clone();
                let shutdown = shutdown.clone();
                connections.push(std::thread::spawn(move || {
                    if let Err(err) = handle_connection(stream, &broadcaster, &shutdown) {
                        log::warn!("request from {} failed: {:#}", peer, err);
                    }
                }));
                connections.retain(|handle| !handle.is_finished());
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(50));
                continue;
            }
            Err(err) => break Err(err.into()),
        }
    };
    shutdown.store(true, Ordering::SeqCst);
    for handle in connections {
        let _ = handle.join();
    }
    result
}

fn handle_connection(
    mut stream: TcpStream,
    broadcaster: &FrameBroadcaster,
    shutdown: &AtomicBool,
) -> Result<()> {
    stream.set_nonblocking(false)?;
    let request = read_request(&mut stream)?;
    if request.method != "GET" {
        return write_json_response(&mut stream, 405, r#"{"error":"method_not_allowed"}"#);
    }
    match request.path.as_str() {
        "/" | "/index.html" => write_response(
            &mut stream,
            200,
            "text/html; charset=utf-8",
            INDEX_HTML.as_bytes(),
        ),
        "/video_feed" => stream_video(stream, &request, broadcaster, shutdown),
        "/health" => {
            let stats = broadcaster.stats();
            let body = serde_json::json!({
                "status": if broadcaster.is_closed() { "stopped" } else { "ok" },
                "frames_published": stats.published,
                "frames_dropped": stats.dropped,
                "viewers": stats.viewers,
            });
            write_json_response(&mut stream, 200, &body.to_string())
        }
        _ => write_json_response(&mut stream, 404, r#"{"error":"not_found"}"#),
    }
}

/// Serve one viewer until it disconnects, the producer closes, or shutdown.
fn stream_video(
    mut stream: TcpStream,
    request: &HttpRequest,
    broadcaster: &FrameBroadcaster,
    shutdown: &AtomicBool,
) -> Result<()> {
    let viewer = broadcaster.subscribe();
    let peer = stream.peer_addr()?;
    stream.set_write_timeout(Some(VIEWER_WRITE_TIMEOUT))?;
    let header = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: {}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
        response_content_type()
    );
    stream.write_all(header.as_bytes())?;
    log::info!(
        "viewer {} connected from {} ({})",
        viewer.id(),
        peer,
        request.header("user-agent").unwrap_or("unknown client")
    );

    let mut sent = 0u64;
    let outcome = loop {
        if shutdown.load(Ordering::SeqCst) {
            break Ok("server shutting down");
        }
        match viewer.poll(VIEWER_POLL_INTERVAL) {
            ViewerPoll::Part(part) => {
                if let Err(err) = stream.write_all(&part).and_then(|()| stream.flush()) {
                    break Err(err);
                }
                sent += 1;
            }
            ViewerPoll::Idle => continue,
            ViewerPoll::Closed => break Ok("stream ended"),
        }
    };

    let reason = outcome.map_or_else(|err| err.to_string(), str::to_string);
    log::info!(
        "viewer {} disconnected after {} frames: {}",
        viewer.id(),
        sent,
        reason
    );
    Ok(())
}

fn read_request(stream: &mut TcpStream) -> Result<HttpRequest> {
    stream.set_read_timeout(Some(Duration::from_secs(2)))?;
    let mut buf = [0u8; 1024];
    let mut data = Vec::new();
    loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            break;
        }
        data.extend_from_slice(&buf[..n]);
        if data.len() > MAX_REQUEST_BYTES {
            return Err(anyhow!("request too large"));
        }
        if data.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }
    parse_request(&data)
}

fn parse_request(data: &[u8]) -> Result<HttpRequest> {
    let text = String::from_utf8_lossy(data);
    let mut lines = text.split("\r\n");
    let request_line = lines.next().ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let raw_path = parts.next().ok_or_else(|| anyhow!("missing path"))?;
    let mut headers = HashMap::new();
    for line in lines {
        if line.is_empty() {
            break;
        }
        if let Some((k, v)) = line.split_once(':') {
            headers.insert(k.trim().to_lowercase(), v.trim().to_string());
        }
    }
    let path = raw_path.split('?').next().unwrap_or(raw_path).to_string();
    Ok(HttpRequest {
        method: method.to_string(),
        path,
        headers,
    })
}

fn write_json_response(stream: &mut TcpStream, status: u16, body: &str) -> Result<()> {
    write_response(stream, status, "application/json", body.as_bytes())
}

fn write_response(
    stream: &mut TcpStream,
    status: u16,
    content_type: &str,
    body: &[u8],
) -> Result<()> {
    let status_line = match status {
        200 => "HTTP/1.1 200 OK",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let header = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
        status_line = status_line,
        content_type = content_type,
        len = body.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(body)?;
    Ok(())
}

#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
    headers: HashMap<String, String>,
}

impl HttpRequest {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }
}
