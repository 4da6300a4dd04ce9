//! Minimal Docker Engine API client over a Unix domain socket.
//!
//! Every call opens a fresh connection, so lifecycle requests never
//! share a stream: a forced stop cannot be starved or torn down by the
//! caller abandoning an in-flight attach. The attach endpoint upgrades
//! the connection (`Upgrade: tcp`) and hands back the raw hijacked
//! byte stream for the demultiplexer.

use std::io;
use std::path::PathBuf;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

/// Default Docker Engine socket path.
pub const DEFAULT_SOCKET: &str = "/var/run/docker.sock";

/// A fully-read Engine API response.
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Parse the body as JSON.
    pub fn json(&self) -> io::Result<Value> {
        serde_json::from_slice(&self.body)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))
    }

    /// The daemon's error `message` field, falling back to the raw body.
    pub fn error_message(&self) -> String {
        serde_json::from_slice::<Value>(&self.body)
            .ok()
            .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_owned))
            .unwrap_or_else(|| String::from_utf8_lossy(&self.body).trim().to_string())
    }
}

struct ResponseHead {
    status: u16,
    content_length: Option<usize>,
    chunked: bool,
}

#[derive(Clone)]
pub struct DockerClient {
    socket_path: PathBuf,
}

impl DockerClient {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
        }
    }

    async fn connect(&self) -> io::Result<BufReader<UnixStream>> {
        let stream = UnixStream::connect(&self.socket_path).await?;
        Ok(BufReader::new(stream))
    }

    /// Issue one request and read the full response.
    pub async fn request(
        &self,
        method: &str,
        path: &str,
        body: Option<&Value>,
    ) -> io::Result<HttpResponse> {
        let mut stream = self.connect().await?;
        write_request(stream.get_mut(), method, path, body, false).await?;

        let head = read_head(&mut stream).await?;
        let body = read_body(&mut stream, &head).await?;
        Ok(HttpResponse {
            status: head.status,
            body,
        })
    }

    /// Issue a request that hijacks the connection (`Upgrade: tcp`) and
    /// return the raw post-upgrade byte stream.
    pub async fn upgrade(&self, method: &str, path: &str) -> io::Result<BufReader<UnixStream>> {
        let mut stream = self.connect().await?;
        write_request(stream.get_mut(), method, path, None, true).await?;

        let head = read_head(&mut stream).await?;
        // 101 on upgrade; older daemons answer 200 and stream directly.
        if head.status != 101 && head.status != 200 {
            // This request was not sent with Connection: close, so only
            // a self-delimiting rejection body can be read safely.
            let body = if head.chunked || head.content_length.is_some() {
                read_body(&mut stream, &head).await.unwrap_or_default()
            } else {
                Vec::new()
            };
            let resp = HttpResponse {
                status: head.status,
                body,
            };
            return Err(io::Error::other(format!(
                "upgrade rejected ({}): {}",
                resp.status,
                resp.error_message()
            )));
        }
        Ok(stream)
    }
}

async fn write_request(
    stream: &mut UnixStream,
    method: &str,
    path: &str,
    body: Option<&Value>,
    upgrade: bool,
) -> io::Result<()> {
    let mut req = format!("{method} {path} HTTP/1.1\r\nHost: docker\r\n");
    if upgrade {
        req.push_str("Connection: Upgrade\r\nUpgrade: tcp\r\n");
    } else {
        req.push_str("Connection: close\r\n");
    }
    match body {
        Some(value) => {
            let payload = value.to_string();
            req.push_str("Content-Type: application/json\r\n");
            req.push_str(&format!("Content-Length: {}\r\n\r\n", payload.len()));
            req.push_str(&payload);
        }
        None => req.push_str("Content-Length: 0\r\n\r\n"),
    }
    stream.write_all(req.as_bytes()).await?;
    stream.flush().await
}

async fn read_line_crlf(reader: &mut BufReader<UnixStream>) -> io::Result<String> {
    let mut line = String::new();
    let n = reader.read_line(&mut line).await?;
    if n == 0 {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "connection closed mid-response",
        ));
    }
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

async fn read_head(reader: &mut BufReader<UnixStream>) -> io::Result<ResponseHead> {
    let status_line = read_line_crlf(reader).await?;
    let status = status_line
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse::<u16>().ok())
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("malformed status line: {status_line}"),
            )
        })?;

    let mut content_length = None;
    let mut chunked = false;
    loop {
        let line = read_line_crlf(reader).await?;
        if line.is_empty() {
            break;
        }
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        match name.trim().to_ascii_lowercase().as_str() {
            "content-length" => content_length = value.trim().parse().ok(),
            "transfer-encoding" => {
                chunked = value.trim().to_ascii_lowercase().contains("chunked");
            }
            _ => {}
        }
    }

    Ok(ResponseHead {
        status,
        content_length,
        chunked,
    })
}

async fn read_body(
    reader: &mut BufReader<UnixStream>,
    head: &ResponseHead,
) -> io::Result<Vec<u8>> {
    if head.status == 204 || head.status == 304 {
        return Ok(Vec::new());
    }
    if head.chunked {
        return read_chunked(reader).await;
    }
    match head.content_length {
        Some(n) => {
            let mut buf = vec![0u8; n];
            reader.read_exact(&mut buf).await?;
            Ok(buf)
        }
        None => {
            // Connection: close delimits the body.
            let mut buf = Vec::new();
            reader.read_to_end(&mut buf).await?;
            Ok(buf)
        }
    }
}

async fn read_chunked(reader: &mut BufReader<UnixStream>) -> io::Result<Vec<u8>> {
    let mut body = Vec::new();
    loop {
        let line = read_line_crlf(reader).await?;
        let size_str = line.split(';').next().unwrap_or("").trim();
        let size = usize::from_str_radix(size_str, 16).map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("malformed chunk size: {line}"),
            )
        })?;
        if size == 0 {
            // Drain optional trailers up to the final empty line.
            loop {
                if read_line_crlf(reader).await?.is_empty() {
                    break;
                }
            }
            return Ok(body);
        }
        let mut chunk = vec![0u8; size];
        reader.read_exact(&mut chunk).await?;
        body.extend_from_slice(&chunk);
        let mut crlf = [0u8; 2];
        reader.read_exact(&mut crlf).await?;
    }
}
