//! Plumbing shared by the HTTP collaborators.

use super::credentials::CredentialsProvider;
use super::wire::WireError;
use crate::error::OfflinerError;
use crate::retry::ExponentialBackoffPolicy;
use reqwest::{RequestBuilder, Response};
use std::sync::Arc;
use std::time::Duration;

pub(crate) struct ApiClient {
    client: reqwest::Client,
    base_url: String,
    credentials: Arc<dyn CredentialsProvider>,
    retry: ExponentialBackoffPolicy,
}

impl ApiClient {
    pub fn new(
        base_url: &str,
        timeout_sec: u64,
        credentials: Arc<dyn CredentialsProvider>,
        retry: ExponentialBackoffPolicy,
    ) -> Result<Self, OfflinerError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_sec))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
            retry,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    pub fn retry(&self) -> &ExponentialBackoffPolicy {
        &self.retry
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// `/installations/{id}`, the prefix of every per-device endpoint.
    pub fn installation_path(&self) -> Result<String, OfflinerError> {
        let id = self
            .credentials
            .installation_id()
            .ok_or_else(|| OfflinerError::Configuration("installation id".to_string()))?;
        Ok(format!("/installations/{}", urlencoding::encode(&id)))
    }

    pub fn access_token(&self) -> Option<String> {
        self.credentials.access_token()
    }

    pub fn authorized(&self, builder: RequestBuilder) -> Result<RequestBuilder, OfflinerError> {
        let token = self
            .access_token()
            .ok_or_else(|| OfflinerError::Configuration("access token".to_string()))?;
        Ok(builder.bearer_auth(token))
    }
}

/// Turn a non-success response into [`OfflinerError::Http`], picking up the
/// sub-status from the error body when there is one.
pub(crate) async fn check_status(response: Response) -> Result<Response, OfflinerError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(error_from_body(status.as_u16(), &body))
}

pub(crate) fn error_from_body(status: u16, body: &str) -> OfflinerError {
    match serde_json::from_str::<WireError>(body) {
        Ok(error) => OfflinerError::Http {
            status,
            sub_status: error.sub_status,
            message: error
                .user_message
                .or(error.detail)
                .unwrap_or_else(|| body.to_string()),
        },
        Err(_) => OfflinerError::http(status, body),
    }
}
