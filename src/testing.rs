use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use crate::{Client, Config, Credential, Settings};

/// Create a test client pointed at a local mock server (Proxy mode, `v1`).
pub fn test_client(base_url: &str) -> Client {
    Client::new(Config {
        credential: Some(Credential::new("sk-test", None).expect("api key")),
        settings: Some(Settings::proxy(base_url, None)),
        ..Default::default()
    })
    .expect("client")
}

/// Start a local server that answers one request with a chunked
/// `text/event-stream` body.
///
/// Each step waits its delay and then writes its payload as one chunk, so
/// payloads may deliberately split or join SSE records. `extra_headers` are
/// written verbatim as `Name: value` lines.
pub async fn start_chunked_sse_server(
    steps: Vec<(Duration, String)>,
    finish_after: Option<Duration>,
    extra_headers: Vec<(String, String)>,
) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");

    tokio::spawn(async move {
        let (mut socket, _) = match listener.accept().await {
            Ok(conn) => conn,
            Err(_) => return,
        };

        // Read request headers and body.
        let mut buf = [0u8; 4096];
        let mut received = Vec::new();
        loop {
            let n = match socket.read(&mut buf).await {
                Ok(n) => n,
                Err(_) => return,
            };
            if n == 0 {
                return;
            }
            received.extend_from_slice(&buf[..n]);
            if request_complete(&received) {
                break;
            }
        }

        let mut head = String::from(
            "HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nTransfer-Encoding: chunked\r\n",
        );
        for (name, value) in &extra_headers {
            head.push_str(&format!("{name}: {value}\r\n"));
        }
        head.push_str("\r\n");
        if socket.write_all(head.as_bytes()).await.is_err() {
            return;
        }

        for (delay, payload) in steps {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let chunk = format!("{:X}\r\n{}\r\n", payload.len(), payload);
            if socket.write_all(chunk.as_bytes()).await.is_err() {
                return;
            }
        }

        if let Some(delay) = finish_after {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }

        let _ = socket.write_all(b"0\r\n\r\n").await;
    });

    format!("http://{}", addr)
}

/// Start a local SSE server that immediately emits the given `data:` payloads
/// followed by `data: [DONE]`.
pub async fn start_sse_server(payloads: Vec<String>) -> String {
    let mut steps: Vec<(Duration, String)> = payloads
        .into_iter()
        .map(|p| (Duration::ZERO, format!("data: {p}\n\n")))
        .collect();
    steps.push((Duration::ZERO, "data: [DONE]\n\n".to_string()));
    start_chunked_sse_server(steps, None, Vec::new()).await
}

fn request_complete(received: &[u8]) -> bool {
    let Some(end) = received.windows(4).position(|w| w == b"\r\n\r\n") else {
        return false;
    };
    let head = String::from_utf8_lossy(&received[..end]).to_ascii_lowercase();
    let content_length = head
        .lines()
        .find_map(|line| line.strip_prefix("content-length:"))
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(0);
    received.len() >= end + 4 + content_length
}
