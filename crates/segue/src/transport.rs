use std::time::Duration;

use async_trait::async_trait;
use bytes::{Buf, Bytes};
use reqwest::{Client, Response};
use tracing::{debug, instrument};
use url::Url;

use crate::{
    SegueError, StreamSettings,
    client::{RedirectMode, create_client},
};

/// An open byte source for one physical segment.
///
/// Owned exclusively by the stream that opened it.
#[async_trait]
pub trait SegmentTransport: Send {
    /// Where the bytes actually come from.
    fn uri(&self) -> &Url;

    /// Declared size, `None` when the origin did not announce one.
    fn content_length(&self) -> Option<u64>;

    /// Copy up to `buf.len()` bytes. `Ok(0)` marks the end of this segment.
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, SegueError>;

    async fn close(&mut self);
}

/// Opens transports for resolved segment URIs.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn open(&self, uri: &Url) -> Result<Box<dyn SegmentTransport>, SegueError>;
}

#[derive(Debug, Clone)]
pub struct HttpTransportFactory {
    client: Client,
    read_timeout: Duration,
}

impl HttpTransportFactory {
    pub fn new(settings: &StreamSettings) -> Result<Self, SegueError> {
        let client = create_client(settings, RedirectMode::Follow)?;
        Ok(Self::with_client(client, settings.read_timeout()))
    }

    pub fn with_client(client: Client, read_timeout: Duration) -> Self {
        Self {
            client,
            read_timeout,
        }
    }
}

#[async_trait]
impl TransportFactory for HttpTransportFactory {
    #[instrument(skip_all, fields(uri = %uri), level = "debug")]
    async fn open(&self, uri: &Url) -> Result<Box<dyn SegmentTransport>, SegueError> {
        // headers must arrive within the read timeout too
        let response = tokio::time::timeout(self.read_timeout, self.client.get(uri.clone()).send())
            .await
            .map_err(|_| SegueError::timeout(format!("waiting for response from {uri}")))??;

        let status = response.status();
        if !status.is_success() {
            return Err(SegueError::http_status(status, uri.as_str(), "segment open"));
        }

        let content_length = response.content_length();
        debug!(final_url = %response.url(), ?content_length, "Segment response received");

        Ok(Box::new(HttpTransport {
            uri: response.url().clone(),
            content_length,
            read_timeout: self.read_timeout,
            response: Some(response),
            current_chunk: Bytes::new(),
        }))
    }
}

/// Streams one HTTP response body chunk by chunk.
pub struct HttpTransport {
    uri: Url,
    content_length: Option<u64>,
    read_timeout: Duration,
    response: Option<Response>,
    current_chunk: Bytes,
}

#[async_trait]
impl SegmentTransport for HttpTransport {
    fn uri(&self) -> &Url {
        &self.uri
    }

    fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, SegueError> {
        if buf.is_empty() {
            return Ok(0);
        }

        loop {
            if self.current_chunk.has_remaining() {
                let n = buf.len().min(self.current_chunk.remaining());
                self.current_chunk.copy_to_slice(&mut buf[..n]);
                return Ok(n);
            }

            let Some(response) = self.response.as_mut() else {
                return Ok(0);
            };

            let chunk = tokio::time::timeout(self.read_timeout, response.chunk())
                .await
                .map_err(|_| SegueError::timeout(format!("reading body of {}", self.uri)))??;

            match chunk {
                Some(chunk) => self.current_chunk = chunk,
                None => {
                    self.response = None;
                    return Ok(0);
                }
            }
        }
    }

    async fn close(&mut self) {
        // dropping the response releases the connection
        self.response = None;
        self.current_chunk = Bytes::new();
    }
}
