use std::sync::OnceLock;

use reqwest::Client;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::redirect::Policy;
use tracing::debug;

use crate::{SegueError, StreamSettings};

/// Redirect hops followed by the segment transport before giving up.
const MAX_FOLLOWED_REDIRECTS: usize = 10;

/// How a client reacts to 3xx responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectMode {
    /// Hand redirect responses back to the caller untouched.
    Manual,
    /// Follow redirects, honouring the cross-protocol setting.
    Follow,
}

pub fn default_headers() -> HeaderMap {
    let mut default_headers = HeaderMap::new();

    default_headers.insert(reqwest::header::ACCEPT, HeaderValue::from_static("*/*"));

    default_headers.insert(
        reqwest::header::CONNECTION,
        HeaderValue::from_static("keep-alive"),
    );

    default_headers.insert(
        reqwest::header::ACCEPT_LANGUAGE,
        HeaderValue::from_static("en-US,en;q=0.5,zh-CN;q=0.3,zh;q=0.2"),
    );
    default_headers
}

/// Merge configured headers over the defaults. Configured values win.
fn build_headers(settings: &StreamSettings) -> Result<HeaderMap, SegueError> {
    let mut headers = default_headers();
    for (name, value) in &settings.headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| SegueError::configuration(format!("invalid header name `{name}`: {e}")))?;
        let value = HeaderValue::from_str(value).map_err(|e| {
            SegueError::configuration(format!("invalid value for header `{name}`: {e}"))
        })?;
        headers.insert(name, value);
    }
    Ok(headers)
}

fn follow_policy(allow_cross_protocol: bool) -> Policy {
    Policy::custom(move |attempt| {
        if attempt.previous().len() >= MAX_FOLLOWED_REDIRECTS {
            return attempt.error("too many redirects");
        }
        let scheme_changed = attempt
            .previous()
            .last()
            .is_some_and(|previous| previous.scheme() != attempt.url().scheme());
        if scheme_changed && !allow_cross_protocol {
            attempt.stop()
        } else {
            attempt.follow()
        }
    })
}

/// reqwest is built without a bundled TLS provider, so one has to be in place
/// before the first client is created.
pub fn install_rustls_provider() {
    static PROVIDER_INSTALLED: OnceLock<()> = OnceLock::new();
    PROVIDER_INSTALLED.get_or_init(|| {
        if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
            debug!(existing_provider = ?e, "rustls CryptoProvider already installed");
        }
    });
}

/// Create a reqwest Client with the provided settings
pub fn create_client(settings: &StreamSettings, mode: RedirectMode) -> Result<Client, SegueError> {
    install_rustls_provider();

    let redirect = match mode {
        RedirectMode::Manual => Policy::none(),
        RedirectMode::Follow => follow_policy(settings.allow_cross_protocol_redirects),
    };

    let client_builder = Client::builder()
        .pool_max_idle_per_host(5)
        .user_agent(&settings.user_agent)
        .default_headers(build_headers(settings)?)
        .connect_timeout(settings.connect_timeout())
        .redirect(redirect);

    debug!(?mode, user_agent = %settings.user_agent, "Building HTTP client");

    client_builder.build().map_err(SegueError::from)
}
