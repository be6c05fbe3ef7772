use std::time::Duration;

use rand::Rng;
use reqwest::{
    header::{self, HeaderMap, HeaderName, HeaderValue},
    StatusCode,
};
use serde_json::Value;
use tokio::time::sleep;
use tracing::{debug, instrument, warn};
use url::Url;

use crate::{config::Settings, error};

const SNIPPET_LEN: usize = 100;
const RETRY_STATUSES: [StatusCode; 4] = [
    StatusCode::INTERNAL_SERVER_ERROR,
    StatusCode::BAD_GATEWAY,
    StatusCode::SERVICE_UNAVAILABLE,
    StatusCode::GATEWAY_TIMEOUT,
];

/// Something that can GET a URL and hand back the body of a usable
/// response.
#[allow(async_fn_in_trait)]
pub trait Fetch {
    async fn fetch(
        &self,
        url: &Url,
        headers: HeaderMap,
    ) -> Result<String, error::Fetch>;
}

/// The header sets requests are sent with. The upstream service only
/// answers requests that look like an in-page AJAX call, so each request
/// carries a browser User-Agent, a referer and the XMLHttpRequest marker.
#[derive(Clone, Debug)]
pub struct Identities {
    user_agents: Vec<HeaderValue>,
    referer: HeaderValue,
}

impl Identities {
    pub fn new(settings: &Settings) -> Result<Self, error::Init> {
        if settings.user_agents.is_empty() {
            return Err(error::Init::NoUserAgents);
        }
        let user_agents = settings
            .user_agents
            .iter()
            .map(|ua| {
                HeaderValue::from_str(ua)
                    .map_err(|_| error::Init::InvalidUserAgent(ua.clone()))
            })
            .collect::<Result<_, _>>()?;
        let referer =
            HeaderValue::from_str(&settings.referer).map_err(|_| {
                error::Init::InvalidReferer(settings.referer.clone())
            })?;
        Ok(Self {
            user_agents,
            referer,
        })
    }

    /// Build request headers around a User-Agent drawn from `rng`.
    pub fn pick<R: Rng + ?Sized>(&self, rng: &mut R) -> HeaderMap {
        let index = rng.random_range(0..self.user_agents.len());
        let user_agent = &self.user_agents[index];
        HeaderMap::from_iter([
            (header::USER_AGENT, user_agent.clone()),
            (
                header::ACCEPT,
                HeaderValue::from_static(
                    "application/json, text/javascript, */*; q=0.01",
                ),
            ),
            (header::REFERER, self.referer.clone()),
            (
                HeaderName::from_static("x-requested-with"),
                HeaderValue::from_static("XMLHttpRequest"),
            ),
        ])
    }
}

#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn should_retry(&self, status: StatusCode, attempt: u32) -> bool {
        attempt < self.max_retries && RETRY_STATUSES.contains(&status)
    }

    /// Linear backoff: the first retry waits one factor, the second two...
    pub fn delay(&self, attempt: u32) -> Duration {
        self.backoff * attempt
    }
}

#[derive(Clone)]
pub struct Client {
    inner: reqwest::Client,
    retry: RetryPolicy,
}

impl Client {
    pub fn new(settings: &Settings) -> Result<Self, error::Init> {
        let inner = reqwest::Client::builder()
            .timeout(settings.timeout())
            .build()
            .map_err(error::Init::ClientInitialization)?;
        Ok(Self {
            inner,
            retry: RetryPolicy {
                max_retries: settings.max_retries,
                backoff: settings.backoff(),
            },
        })
    }
}

impl Fetch for Client {
    #[instrument(skip_all, err, fields(url = %url))]
    async fn fetch(
        &self,
        url: &Url,
        headers: HeaderMap,
    ) -> Result<String, error::Fetch> {
        let mut attempt = 0;
        loop {
            let response = self
                .inner
                .get(url.clone())
                .headers(headers.clone())
                .send()
                .await
                .map_err(error::Fetch::transport)?;
            let status = response.status();
            if self.retry.should_retry(status, attempt) {
                attempt += 1;
                let delay = self.retry.delay(attempt);
                warn!(
                    status = %status,
                    attempt,
                    ?delay,
                    "Server error, retrying"
                );
                sleep(delay).await;
                continue;
            }
            let body = response.text().await.map_err(error::Fetch::transport)?;
            debug!(status = %status, len = body.len(), "Got response");
            return classify(status, body);
        }
    }
}

/// Decide whether a response carries usable data. An HTML body means an
/// anti-automation page was served, whatever the status code says.
pub fn classify(
    status: StatusCode,
    body: String,
) -> Result<String, error::Fetch> {
    if body.to_lowercase().contains("<html") {
        return Err(error::Fetch::Blocked(status));
    }
    if status != StatusCode::OK {
        return Err(error::Fetch::HttpStatus {
            status,
            snippet: body.chars().take(SNIPPET_LEN).collect(),
        });
    }
    Ok(body)
}

pub fn parse_body(body: &str) -> Result<Value, error::Fetch> {
    Ok(serde_json::from_str(body)?)
}
