//! HTTP content fetcher: media files, artwork and DRM licenses.

use super::credentials::CredentialsProvider;
use super::http::{check_status, ApiClient};
use super::wire::{WireLicenseRequest, WireLicenseResponse, WireMediaManifest};
use super::{ArtworkDownloader, DownloadedMedia, LicenseExchanger, MediaDownloader, ProgressFn};
use crate::error::{LicenseError, OfflinerError};
use crate::retry::{self, ExponentialBackoffPolicy};
use crate::tasks::MediaMetadata;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use futures::StreamExt;
use std::path::Path;
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub struct HttpContentFetcher {
    api: ApiClient,
}

impl HttpContentFetcher {
    pub fn new(
        base_url: &str,
        timeout_sec: u64,
        credentials: Arc<dyn CredentialsProvider>,
        retry: ExponentialBackoffPolicy,
    ) -> Result<Self, OfflinerError> {
        Ok(Self {
            api: ApiClient::new(base_url, timeout_sec, credentials, retry)?,
        })
    }

    async fn fetch_manifest(&self, media: &MediaMetadata) -> Result<WireMediaManifest, OfflinerError> {
        let url = self.api.url(&format!(
            "/{}/{}/offline-manifest",
            media.resource_type.as_str(),
            urlencoding::encode(&media.resource_id)
        ));
        let url = url.as_str();
        let api = &self.api;
        retry::execute(api.retry(), move || async move {
            let request = api.authorized(api.client().get(url))?;
            let response = check_status(request.send().await?).await?;
            Ok::<_, OfflinerError>(response.json::<WireMediaManifest>().await?)
        })
        .await
    }

    /// Stream `url` into `dest`, truncating whatever a previous attempt left.
    async fn stream_to_file(
        &self,
        url: &str,
        dest: &Path,
        on_progress: &ProgressFn,
    ) -> Result<u64, OfflinerError> {
        let response = check_status(self.api.client().get(url).send().await?).await?;
        let total = response.content_length().filter(|len| *len > 0);

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = File::create(dest).await?;
        let mut written: u64 = 0;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
            if let Some(total) = total {
                on_progress((written as f64 / total as f64).min(1.0));
            }
        }
        file.flush().await?;
        on_progress(1.0);
        Ok(written)
    }
}

fn decode_base64(resource: &str, field: &str, value: &str) -> Result<Vec<u8>, OfflinerError> {
    STANDARD
        .decode(value)
        .map_err(|e| OfflinerError::MalformedManifest {
            resource: resource.to_string(),
            reason: format!("invalid {}: {}", field, e),
        })
}

#[async_trait]
impl MediaDownloader for HttpContentFetcher {
    async fn download_media(
        &self,
        media: &MediaMetadata,
        dest: &Path,
        on_progress: &ProgressFn,
        cancel: &CancellationToken,
    ) -> Result<DownloadedMedia, OfflinerError> {
        let resource = format!("{}/{}", media.resource_type, media.resource_id);
        let manifest = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(OfflinerError::Cancelled),
            manifest = self.fetch_manifest(media) => manifest?,
        };
        let key_request = match &manifest.key_request {
            Some(encoded) => Some(decode_base64(&resource, "key request", encoded)?),
            None => None,
        };

        let part = dest.with_extension("part");
        let download = {
            let url = manifest.url.as_str();
            let part = part.as_path();
            retry::execute(self.api.retry(), move || async move {
                self.stream_to_file(url, part, on_progress).await
            })
        };
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(OfflinerError::Cancelled),
            bytes = download => bytes,
        };

        match outcome {
            Ok(bytes) => {
                tokio::fs::rename(&part, dest).await?;
                debug!("Downloaded {} ({} bytes) to {:?}", resource, bytes, dest);
                Ok(DownloadedMedia {
                    path: dest.to_path_buf(),
                    requires_license: manifest.requires_license,
                    key_request,
                })
            }
            Err(e) => {
                let _ = tokio::fs::remove_file(&part).await;
                Err(e)
            }
        }
    }
}

#[async_trait]
impl ArtworkDownloader for HttpContentFetcher {
    async fn download_artwork(&self, url: &str, dest: &Path) -> Result<(), OfflinerError> {
        let client = self.api.client();
        let bytes = retry::execute(self.api.retry(), move || async move {
            let response = check_status(client.get(url).send().await?).await?;
            Ok::<_, OfflinerError>(response.bytes().await?)
        })
        .await?;

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(dest, &bytes).await?;
        Ok(())
    }
}

#[async_trait]
impl LicenseExchanger for HttpContentFetcher {
    async fn exchange_license(
        &self,
        media: &MediaMetadata,
        key_request: &[u8],
    ) -> Result<Vec<u8>, OfflinerError> {
        let token = self.api.access_token().ok_or(LicenseError::MissingToken)?;
        let url = self.api.url("/drm/licenses");
        let body = WireLicenseRequest {
            resource_type: media.resource_type,
            resource_id: &media.resource_id,
            key_request: STANDARD.encode(key_request),
        };

        let (url, body, token, client) = (url.as_str(), &body, token.as_str(), self.api.client());
        let response = retry::execute(self.api.retry(), move || async move {
            let response = check_status(
                client
                    .post(url)
                    .bearer_auth(token)
                    .json(body)
                    .send()
                    .await?,
            )
            .await?;
            Ok::<_, OfflinerError>(response.json::<WireLicenseResponse>().await?)
        })
        .await?;

        let encoded = response
            .license
            .filter(|l| !l.is_empty())
            .ok_or(LicenseError::EmptyLicense)?;
        let license = decode_base64(
            &format!("{}/{}", media.resource_type, media.resource_id),
            "license",
            &encoded,
        )?;
        if license.is_empty() {
            return Err(LicenseError::EmptyLicense.into());
        }
        Ok(license)
    }
}
