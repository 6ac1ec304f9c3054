//! Device authorization grant: obtain a token by polling while the user
//! approves the device elsewhere.

use super::http::check_status;
use crate::error::OfflinerError;
use crate::retry::{self, ExponentialBackoffPolicy, PollingPolicy};
use serde::Deserialize;
use std::time::Duration;
use tracing::info;

const DEVICE_CODE_GRANT: &str = "urn:ietf:params:oauth:grant-type:device_code";

#[derive(Debug, Clone, Deserialize)]
pub struct DeviceAuthorization {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    pub expires_in: u64,
    #[serde(default = "default_interval")]
    pub interval: u64,
}

fn default_interval() -> u64 {
    5
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
}

pub struct DeviceAuthClient {
    client: reqwest::Client,
    base_url: String,
    client_id: String,
    retry: ExponentialBackoffPolicy,
}

impl DeviceAuthClient {
    pub fn new(
        base_url: &str,
        client_id: &str,
        timeout_sec: u64,
        retry: ExponentialBackoffPolicy,
    ) -> Result<Self, OfflinerError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_sec))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            client_id: client_id.to_string(),
            retry,
        })
    }

    pub async fn start(&self) -> Result<DeviceAuthorization, OfflinerError> {
        let url = format!("{}/oauth2/device_authorization", self.base_url);
        let (url, client, client_id) = (url.as_str(), &self.client, self.client_id.as_str());
        retry::execute(&self.retry, move || async move {
            let response = check_status(
                client
                    .post(url)
                    .form(&[("client_id", client_id)])
                    .send()
                    .await?,
            )
            .await?;
            Ok::<_, OfflinerError>(response.json::<DeviceAuthorization>().await?)
        })
        .await
    }

    /// Poll the token endpoint until the user approves, the authorization
    /// expires or a non-pending failure comes back.
    ///
    /// Each poll is retried on transport and server failures by the inner
    /// exponential policy; the outer polling policy only retries while the
    /// server keeps answering "authorization pending".
    pub async fn poll_token(
        &self,
        authorization: &DeviceAuthorization,
    ) -> Result<TokenResponse, OfflinerError> {
        info!(
            "Visit {} and enter code {}",
            authorization.verification_uri, authorization.user_code
        );
        let polling = PollingPolicy::new(
            Duration::from_secs(authorization.expires_in),
            Duration::from_secs(authorization.interval),
        );
        let device_code = authorization.device_code.as_str();
        retry::execute(&polling, move || async move {
            retry::execute(&self.retry, move || self.request_token(device_code)).await
        })
        .await
    }

    async fn request_token(&self, device_code: &str) -> Result<TokenResponse, OfflinerError> {
        let url = format!("{}/oauth2/token", self.base_url);
        let response = check_status(
            self.client
                .post(&url)
                .form(&[
                    ("grant_type", DEVICE_CODE_GRANT),
                    ("device_code", device_code),
                    ("client_id", self.client_id.as_str()),
                ])
                .send()
                .await?,
        )
        .await?;
        Ok(response.json::<TokenResponse>().await?)
    }
}
