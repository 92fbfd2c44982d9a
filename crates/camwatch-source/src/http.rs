use std::{
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use async_trait::async_trait;
use camwatch_types::{config::SourceConfig, Result};
use reqwest::{header, Client};
use url::Url;

use crate::{source_error, FetchedImage, FrameSource, SourceMetrics};

const DEFAULT_USER_AGENT: &str = concat!("camwatch/", env!("CARGO_PKG_VERSION"));

/// Fetches still frames from an HTTP endpoint that serves one image per GET.
pub struct HttpFrameSource {
    client: Client,
    metrics: Arc<Mutex<SourceMetrics>>,
}

impl HttpFrameSource {
    pub fn new(config: &SourceConfig) -> Result<Self> {
        let user_agent = config
            .user_agent
            .clone()
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string());
        let client = Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .user_agent(user_agent)
            .build()
            .map_err(|err| source_error(format!("failed to build HTTP client: {err}")))?;

        Ok(Self {
            client,
            metrics: Arc::new(Mutex::new(SourceMetrics::default())),
        })
    }

    async fn get(&self, url: &Url) -> Result<FetchedImage> {
        let start = Instant::now();
        let response = self
            .client
            .get(url.clone())
            .header(header::CACHE_CONTROL, "no-cache")
            .send()
            .await
            .map_err(|err| source_error(format!("request to {url} failed: {err}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(source_error(format!("{url} answered {status}")));
        }

        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);
        if let Some(kind) = &content_type {
            if !kind.starts_with("image/") {
                return Err(source_error(format!(
                    "{url} returned non-image content type '{kind}'"
                )));
            }
        }

        let body = response
            .bytes()
            .await
            .map_err(|err| source_error(format!("reading body from {url} failed: {err}")))?;
        if body.is_empty() {
            return Err(source_error(format!("{url} returned an empty body")));
        }

        Ok(FetchedImage {
            body,
            content_type,
            elapsed_ms: start.elapsed().as_millis() as u64,
        })
    }
}

#[async_trait]
impl FrameSource for HttpFrameSource {
    async fn fetch(&self, url: &Url) -> Result<FetchedImage> {
        let result = self.get(url).await;
        if let Ok(mut guard) = self.metrics.lock() {
            match &result {
                Ok(image) => guard.record_success(image.elapsed_ms),
                Err(err) => {
                    tracing::debug!("HTTP frame fetch failed: {err}");
                    guard.record_failure();
                }
            }
        }
        result
    }

    fn metrics(&self) -> SourceMetrics {
        self.metrics.lock().map(|m| m.clone()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::TcpListener,
    };

    async fn serve_once(status_line: &'static str, content_type: &'static str, body: &'static [u8]) -> Url {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind listener");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            if let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = [0u8; 2048];
                let _ = socket.read(&mut buf).await;
                let head = format!(
                    "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    body.len()
                );
                let _ = socket.write_all(head.as_bytes()).await;
                let _ = socket.write_all(body).await;
                let _ = socket.shutdown().await;
            }
        });
        Url::parse(&format!("http://{addr}/frame?t=1")).expect("valid url")
    }

    #[tokio::test]
    async fn fetches_image_body() {
        let url = serve_once("HTTP/1.1 200 OK", "image/jpeg", b"\xff\xd8\xff\xe0fake").await;
        let source = HttpFrameSource::new(&SourceConfig::default()).expect("client");
        let image = source.fetch(&url).await.expect("fetch succeeds");
        assert_eq!(image.content_type.as_deref(), Some("image/jpeg"));
        assert_eq!(&image.body[..], b"\xff\xd8\xff\xe0fake");
        assert_eq!(source.metrics().successful_fetches, 1);
    }

    #[tokio::test]
    async fn non_success_status_is_a_failure() {
        let url = serve_once("HTTP/1.1 503 Service Unavailable", "text/plain", b"busy").await;
        let source = HttpFrameSource::new(&SourceConfig::default()).expect("client");
        assert!(source.fetch(&url).await.is_err());
        assert_eq!(source.metrics().failed_fetches, 1);
    }

    #[tokio::test]
    async fn json_error_payload_is_rejected() {
        let url = serve_once(
            "HTTP/1.1 200 OK",
            "application/json",
            br#"{"error":"No frame available"}"#,
        )
        .await;
        let source = HttpFrameSource::new(&SourceConfig::default()).expect("client");
        assert!(source.fetch(&url).await.is_err());
    }
}
