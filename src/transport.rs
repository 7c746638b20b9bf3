//! Per-job HTTP transport: client settings and redirect handling.

use crate::error::DownloadError;
use crate::types::DownloadConfig;
use reqwest::header::{LOCATION, RANGE};
use reqwest::{Client, Response, StatusCode, Url};
use std::time::Duration;
use tracing::debug;

/// HTTP client configured for one job.
///
/// Automatic redirects are disabled on the underlying client; [`Transport::get`]
/// follows them itself so it can cap the chain and carry the `Range` header
/// onto every hop, including hops to another host.
///
/// The header ceiling bounds the wait for a response; a body may stream for
/// as long as it keeps making progress within the client's read timeout.
#[derive(Debug, Clone)]
pub struct Transport {
    client: Client,
    max_redirects: usize,
    header_timeout: Option<Duration>,
}

impl Transport {
    /// Builds the client from the job configuration.
    pub fn new(config: &DownloadConfig) -> Result<Self, DownloadError> {
        let mut builder = Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(config.connect_timeout)
            .tcp_keepalive(Duration::from_secs(30))
            .danger_accept_invalid_certs(config.skip_tls_verify);
        if let Some(timeout) = config.read_timeout {
            builder = builder.read_timeout(timeout);
        }

        Ok(Self {
            client: builder.build()?,
            max_redirects: config.max_redirects,
            header_timeout: config.request_timeout,
        })
    }

    /// Issues a GET, following redirects up to the configured limit.
    ///
    /// When `range` is given it is sent as the `Range` header on the first
    /// request and on every redirected request. The final non-redirect
    /// response is returned without inspecting its status. The whole chain
    /// must answer within the header ceiling, or the call fails with
    /// [`DownloadError::Timeout`].
    pub async fn get(&self, url: &str, range: Option<&str>) -> Result<Response, DownloadError> {
        match self.header_timeout {
            Some(limit) => tokio::time::timeout(limit, self.follow(url, range))
                .await
                .map_err(|_| DownloadError::Timeout(limit))?,
            None => self.follow(url, range).await,
        }
    }

    async fn follow(&self, url: &str, range: Option<&str>) -> Result<Response, DownloadError> {
        let mut current = parse_url(url)?;
        let mut redirects = 0usize;

        loop {
            let mut request = self.client.get(current.clone());
            if let Some(range) = range {
                request = request.header(RANGE, range);
            }
            let response = request.send().await?;

            let Some(next) = redirect_target(&current, &response) else {
                return Ok(response);
            };

            redirects += 1;
            if redirects > self.max_redirects {
                return Err(DownloadError::RedirectLimitExceeded(redirects));
            }
            debug!("Redirect {} from {} to {}", redirects, current, next);
            current = next;
        }
    }
}

/// Parses an absolute URL.
pub(crate) fn parse_url(url: &str) -> Result<Url, DownloadError> {
    Url::parse(url).map_err(|_| DownloadError::InvalidUrl(url.to_string()))
}

/// Where a redirect response points, resolved against the request URL.
fn redirect_target(current: &Url, response: &Response) -> Option<Url> {
    match response.status() {
        StatusCode::MOVED_PERMANENTLY
        | StatusCode::FOUND
        | StatusCode::SEE_OTHER
        | StatusCode::TEMPORARY_REDIRECT
        | StatusCode::PERMANENT_REDIRECT => {}
        _ => return None,
    }
    let location = response.headers().get(LOCATION)?.to_str().ok()?;
    current.join(location).ok()
}
