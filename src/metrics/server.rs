use std::net::SocketAddr;

use anyhow::{Context, Result};
use prometheus::{Encoder, TextEncoder};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Bind the Prometheus endpoint and serve it in the background
pub async fn start_metrics_server(port: u16) -> Result<JoinHandle<()>> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind metrics server to {addr}"))?;

    info!(
        "Starting Prometheus metrics server on http://{}/metrics",
        addr
    );

    Ok(tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    debug!("Metrics request from {}", peer);
                    tokio::spawn(serve_connection(stream));
                }
                Err(e) => error!("Metrics server accept error: {}", e),
            }
        }
    }))
}

async fn serve_connection(mut stream: TcpStream) {
    let mut buffer = [0; 1024];
    let read = match stream.read(&mut buffer).await {
        Ok(read) => read,
        Err(e) => {
            error!("Failed to read from stream: {}", e);
            return;
        }
    };

    let request = String::from_utf8_lossy(&buffer[..read]);
    let response = if request.starts_with("GET /metrics") {
        match render_metrics() {
            Ok(body) => http_response("200 OK", "text/plain; version=0.0.4", &body),
            Err(e) => {
                error!("Failed to encode metrics: {}", e);
                http_response("500 Internal Server Error", "text/plain", "encoding failed")
            }
        }
    } else {
        http_response("404 Not Found", "text/plain", "not found")
    };

    if let Err(e) = stream.write_all(response.as_bytes()).await {
        debug!("Failed to write metrics response: {}", e);
    }
}

/// Text exposition of every registered metric
pub fn render_metrics() -> Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .context("Failed to encode metrics")?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

fn http_response(status: &str, content_type: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        content_type,
        body.len(),
        body
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chainhook::PipelineMetricsContext;

    #[test]
    fn test_render_includes_pipeline_metrics() {
        PipelineMetricsContext::new("render-test").acknowledgement("accepted");
        let text = render_metrics().unwrap();
        assert!(text.contains("chainhook_acknowledgements_total"));
        assert!(text.contains("render-test"));
    }

    #[test]
    fn test_http_response_framing() {
        let response = http_response("404 Not Found", "text/plain", "not found");
        assert!(response.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert!(response.contains("Content-Length: 9\r\n"));
        assert!(response.ends_with("\r\n\r\nnot found"));
    }
}
