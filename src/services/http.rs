use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use std::num::NonZeroU32;
use std::sync::Arc;

use crate::config::PlatformSettings;
use crate::error::{HistoryError, HistoryResult};

/// Paced JSON client shared by the platform adapters.
#[derive(Clone)]
pub struct PlatformHttp {
    client: Client,
    limiter: Arc<DefaultDirectRateLimiter>,
    label: &'static str,
}

impl PlatformHttp {
    pub fn new(label: &'static str, settings: &PlatformSettings) -> HistoryResult<Self> {
        let client = Client::builder()
            .timeout(settings.http_timeout)
            .user_agent(concat!("league-history/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let per_minute = NonZeroU32::new(settings.requests_per_minute).unwrap_or(NonZeroU32::MIN);

        Ok(Self {
            client,
            limiter: Arc::new(RateLimiter::direct(Quota::per_minute(per_minute))),
            label,
        })
    }

    /// GET `url` and decode the JSON body, mapping HTTP failures onto the error taxonomy.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        bearer: Option<&str>,
        query: &[(&str, &str)],
    ) -> HistoryResult<T> {
        self.limiter.until_ready().await;
        tracing::debug!("{} GET {}", self.label, url);

        let mut request = self.client.get(url).query(query);
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(self.label, status, &body));
        }

        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// Map a non-success status onto the error taxonomy.
pub fn classify_status(label: &str, status: StatusCode, body: &str) -> HistoryError {
    let snippet: String = body.chars().take(200).collect();
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            HistoryError::Auth(format!("{} rejected the credentials ({})", label, status))
        }
        StatusCode::NOT_FOUND => HistoryError::NotFound(format!("{} returned 404: {}", label, snippet)),
        StatusCode::TOO_MANY_REQUESTS => {
            HistoryError::RateLimited(format!("{} is throttling requests (429)", label))
        }
        _ => HistoryError::Upstream(format!("{} API error {}: {}", label, status, snippet)),
    }
}
