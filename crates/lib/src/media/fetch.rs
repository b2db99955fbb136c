//! Platform media API client: metadata lookup, then content download.

use serde::Deserialize;
use std::time::Duration;

/// Metadata call budget. Small JSON response; a slow connect means trouble.
const METADATA_TIMEOUT: Duration = Duration::from_secs(10);
/// Content download budget. Larger than the metadata budget so a big file in
/// transit is not penalized by a budget meant for a small lookup.
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(30);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("platform access token not configured")]
    ConfigMissing,
    #[error("media api request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("media api error: {0}")]
    Api(String),
    #[error("media metadata has no download url")]
    MissingUrl,
}

/// Media metadata response from `{base}/{media_id}`.
#[derive(Debug, Deserialize)]
struct MediaMetadata {
    url: Option<String>,
    mime_type: Option<String>,
    #[serde(default)]
    #[allow(dead_code)]
    file_size: Option<u64>,
    filename: Option<String>,
}

/// Downloaded media bytes plus the resolved metadata. Consumed by the
/// storage writer; `byte_len` is the actual downloaded length, which may
/// differ from the size declared in the webhook payload.
#[derive(Debug)]
pub struct FetchedMedia {
    pub content: Vec<u8>,
    pub mime_type: String,
    pub byte_len: u64,
    pub filename: Option<String>,
    pub download_url: String,
}

/// Client for the platform media API (metadata lookup + file download).
#[derive(Clone)]
pub struct MediaFetcher {
    api_base: String,
    token: Option<String>,
    client: reqwest::Client,
}

impl MediaFetcher {
    pub fn new(api_base: impl Into<String>, token: Option<String>) -> Self {
        let api_base = api_base.into().trim_end_matches('/').to_string();
        // Build only fails when the TLS backend cannot initialize, which is
        // fatal for this process anyway.
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .expect("building reqwest client");
        Self {
            api_base,
            token,
            client,
        }
    }

    /// Fetch one media object: GET `{base}/{media_id}` for the metadata,
    /// then GET the returned url for the bytes. Both calls carry the bearer
    /// token and their own timeout budget. No retry here; a failed task is
    /// not retried at all.
    pub async fn fetch(&self, media_id: &str) -> Result<FetchedMedia, FetchError> {
        let token = self.token.as_ref().ok_or(FetchError::ConfigMissing)?;

        let meta_url = format!("{}/{}", self.api_base, media_id);
        log::debug!("media metadata lookup: {}", meta_url);
        let res = self
            .client
            .get(&meta_url)
            .bearer_auth(token)
            .timeout(METADATA_TIMEOUT)
            .send()
            .await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(FetchError::Api(format!(
                "metadata lookup failed: {} {}",
                status, body
            )));
        }
        let meta: MediaMetadata = res.json().await?;
        let download_url = meta.url.ok_or(FetchError::MissingUrl)?;
        let mime_type = meta.mime_type.unwrap_or_else(|| "unknown".to_string());

        let res = self
            .client
            .get(&download_url)
            .bearer_auth(token)
            .timeout(DOWNLOAD_TIMEOUT)
            .send()
            .await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(FetchError::Api(format!(
                "content download failed: {} {}",
                status, body
            )));
        }
        let content = res.bytes().await?.to_vec();
        log::info!(
            "media downloaded: id={} mime={} bytes={}",
            media_id,
            mime_type,
            content.len()
        );
        Ok(FetchedMedia {
            byte_len: content.len() as u64,
            content,
            mime_type,
            filename: meta.filename,
            download_url,
        })
    }
}
