//! HTTP upload transport
//!
//! One multipart POST per attempt. Any response with a status line counts
//! as received, whatever the code; only connection-level failures are
//! transport errors.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use tracing::debug;

use super::ports::{Payload, TransportError, UploadResponse, UploadTransport};
use crate::config::UploadConfig;

const IMAGE_MIME: &str = "image/jpeg";

pub struct HttpUploadTransport {
    client: reqwest::Client,
    url: String,
    field_name: String,
    file_name: String,
}

impl HttpUploadTransport {
    pub fn new(config: &UploadConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .read_timeout(config.read_timeout())
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self {
            client,
            url: config.url.clone(),
            field_name: config.field_name.clone(),
            file_name: config.file_name.clone(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

fn transport_error(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout
    } else {
        TransportError::Io(e.to_string())
    }
}

#[async_trait]
impl UploadTransport for HttpUploadTransport {
    async fn post(&self, payload: Payload) -> Result<UploadResponse, TransportError> {
        let part = Part::bytes(payload.to_vec())
            .file_name(self.file_name.clone())
            .mime_str(IMAGE_MIME)
            .map_err(|e| TransportError::Io(format!("mime error: {e}")))?;
        let form = Form::new().part(self.field_name.clone(), part);

        debug!(url = %self.url, bytes = payload.len(), "posting image");
        let resp = self
            .client
            .post(&self.url)
            .multipart(form)
            .send()
            .await
            .map_err(transport_error)?;

        let status = resp.status().as_u16();
        let body = resp.text().await.map_err(transport_error)?;
        Ok(UploadResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use tokio::io::AsyncReadExt;

    use super::*;

    #[test]
    fn test_transport_builds_from_config() {
        let config = UploadConfig::default();
        let transport = HttpUploadTransport::new(&config).unwrap();
        assert_eq!(transport.url(), config.url);
    }

    #[tokio::test]
    async fn test_silent_server_hits_read_timeout() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            // take the request, never answer
            let mut buf = vec![0u8; 64 * 1024];
            while let Ok(n) = socket.read(&mut buf).await {
                if n == 0 {
                    break;
                }
            }
        });

        let config = UploadConfig {
            url: format!("http://{addr}/upload"),
            connect_timeout_ms: 2_000,
            read_timeout_ms: 200,
            write_timeout_ms: 60_000,
            ..UploadConfig::default()
        };
        let transport = HttpUploadTransport::new(&config).unwrap();
        let payload: Payload = Arc::from(vec![0xFF, 0xD8, 0xFF, 0xD9]);

        let started = std::time::Instant::now();
        let result = tokio::time::timeout(Duration::from_secs(10), transport.post(payload))
            .await
            .expect("read timeout did not fire");
        assert_eq!(result.unwrap_err(), TransportError::Timeout);
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_transport_error() {
        let config = UploadConfig {
            // port 9 (discard) on localhost is closed in test environments
            url: "http://127.0.0.1:9/upload".to_string(),
            connect_timeout_ms: 2000,
            ..UploadConfig::default()
        };
        let transport = HttpUploadTransport::new(&config).unwrap();
        let payload: Payload = Arc::from(vec![0xFF, 0xD8, 0xFF, 0xD9]);
        let err = transport.post(payload).await.unwrap_err();
        assert!(matches!(err, TransportError::Io(_) | TransportError::Timeout));
    }
}
