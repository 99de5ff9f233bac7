use crate::policy::SamplingPolicy;
use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::ETAG;
use serde::Deserialize;
use shared::APPLICATION_ID_HEADER;
use std::collections::HashMap;
use url::Url;

#[derive(thiserror::Error, Debug)]
pub enum FetchError {
    #[error("config request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("config endpoint returned status {0}")]
    Status(reqwest::StatusCode),

    #[error("invalid config URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

/// Remote source of the sampling policy.
#[async_trait]
pub trait PolicyFetcher: Send + Sync {
    async fn fetch(&self) -> Result<SamplingPolicy, FetchError>;
}

/// Wire shape of the config document served by the collector. Missing
/// fields fall back to keeping everything.
#[derive(Deserialize)]
struct PolicyDocument {
    #[serde(default = "default_sample_rate")]
    sample_rate: i32,
    #[serde(default)]
    user_sample_rate: HashMap<String, i32>,
    #[serde(default)]
    company_sample_rate: HashMap<String, i32>,
}

fn default_sample_rate() -> i32 {
    100
}

/// Fetches the sampling policy from the collector's config endpoint.
pub struct HttpPolicyFetcher {
    client: reqwest::Client,
    config_url: Url,
    application_id: String,
}

impl HttpPolicyFetcher {
    pub fn new(base_url: &Url, application_id: String) -> Result<Self, FetchError> {
        Ok(HttpPolicyFetcher {
            client: reqwest::Client::new(),
            config_url: base_url.join("v1/config")?,
            application_id,
        })
    }
}

#[async_trait]
impl PolicyFetcher for HttpPolicyFetcher {
    async fn fetch(&self) -> Result<SamplingPolicy, FetchError> {
        let response = self
            .client
            .get(self.config_url.clone())
            .header(APPLICATION_ID_HEADER, &self.application_id)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(FetchError::Status(response.status()));
        }

        let etag = response
            .headers()
            .get(ETAG)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.trim_matches('"').to_string());

        let document = response.json::<PolicyDocument>().await?;

        Ok(SamplingPolicy {
            global_percentage: document.sample_rate,
            user_percentages: document.user_sample_rate,
            company_percentages: document.company_sample_rate,
            etag,
            fetched_at: Utc::now(),
        })
    }
}
