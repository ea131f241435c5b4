//! Redirect resolution.
//!
//! A live origin answers a header-only probe of the base URI with a redirect to
//! the segment it currently serves. Resolution never fails: any problem is
//! logged and the probed URI comes back unchanged, which the stream treats as
//! "no progress".

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, header::LOCATION};
use tracing::{debug, instrument, warn};
use url::Url;

use crate::{
    SegueError, StreamSettings,
    client::{RedirectMode, create_client},
};

#[async_trait]
pub trait RedirectResolver: Send + Sync {
    /// Probe `uri` and return where it currently points.
    async fn resolve(&self, uri: &Url) -> Url;
}

/// Resolves one redirect hop with a `HEAD` request.
///
/// No caching: every call is a fresh probe, since the origin mints new
/// targets over time.
#[derive(Debug, Clone)]
pub struct HttpRedirectResolver {
    client: Client,
    timeout: Duration,
}

impl HttpRedirectResolver {
    pub fn new(settings: &StreamSettings) -> Result<Self, SegueError> {
        let client = create_client(settings, RedirectMode::Manual)?;
        Ok(Self::with_client(client, settings.redirect_timeout()))
    }

    /// The client must not follow redirects itself.
    pub fn with_client(client: Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    async fn probe(&self, uri: &Url) -> Result<Option<Url>, SegueError> {
        let response = self
            .client
            .head(uri.clone())
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SegueError::timeout(format!("redirect probe of {uri}"))
                } else {
                    SegueError::from(e)
                }
            })?;

        let status = response.status();
        if status == StatusCode::OK {
            return Ok(None);
        }
        if !is_redirect(status) {
            return Err(SegueError::http_status(status, uri.as_str(), "redirect probe"));
        }

        let location = response
            .headers()
            .get(LOCATION)
            .ok_or_else(|| SegueError::invalid_url(uri.as_str(), "redirect without Location"))?
            .to_str()
            .map_err(|e| SegueError::invalid_url(uri.as_str(), e.to_string()))?;

        resolve_location(uri, location).map(Some)
    }
}

#[async_trait]
impl RedirectResolver for HttpRedirectResolver {
    #[instrument(skip_all, fields(uri = %uri), level = "debug")]
    async fn resolve(&self, uri: &Url) -> Url {
        match self.probe(uri).await {
            Ok(Some(target)) => {
                debug!(target = %target, "Redirect resolved");
                target
            }
            Ok(None) => {
                debug!("Origin served content directly, no redirect");
                uri.clone()
            }
            Err(e) => {
                warn!(error = %e, "Redirect resolution failed, keeping the probed URI");
                uri.clone()
            }
        }
    }
}

fn is_redirect(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::MOVED_PERMANENTLY
            | StatusCode::FOUND
            | StatusCode::SEE_OTHER
            | StatusCode::TEMPORARY_REDIRECT
            | StatusCode::PERMANENT_REDIRECT
    )
}

/// Absolute locations are taken as-is; anything else hangs off the origin of
/// `base` (scheme, host and port).
pub fn resolve_location(base: &Url, location: &str) -> Result<Url, SegueError> {
    if let Ok(absolute) = Url::parse(location) {
        return Ok(absolute);
    }

    let origin = base
        .join("/")
        .map_err(|e| SegueError::invalid_url(base.as_str(), e.to_string()))?;
    origin
        .join(location)
        .map_err(|e| SegueError::invalid_url(location, e.to_string()))
}
