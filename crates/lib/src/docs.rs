//! Document service client: multipart upload, then a per-id process trigger.
//! The service authenticates with a cookie-style access token.

use std::time::Duration;

/// Overall client budget; the pipeline additionally bounds each call with
/// its own configured timeout.
const CLIENT_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, thiserror::Error)]
pub enum DocsError {
    #[error("document service not configured (api url or access token missing)")]
    ConfigMissing,
    #[error("document service request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("document service error: {0}")]
    Api(String),
}

/// Upload result: the id assigned by the service (when present) plus the raw
/// response body for the task record.
#[derive(Debug, Clone)]
pub struct RemoteDocument {
    pub document_id: Option<u64>,
    pub raw: serde_json::Value,
}

/// Per-id outcome of a process trigger. The service reports success and
/// failure as id lists, so overall HTTP 200 alone means nothing for our id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// The submitted id appeared in the response's success list.
    Processed,
    /// The submitted id appeared in the response's failed list.
    Rejected,
    /// The response named neither list for the submitted id.
    Unknown,
}

/// Client for the external document service.
#[derive(Clone)]
pub struct DocsClient {
    api_url: Option<String>,
    token: Option<String>,
    client: reqwest::Client,
}

impl DocsClient {
    pub fn new(api_url: Option<String>, token: Option<String>) -> Self {
        let api_url = api_url.map(|u| u.trim_end_matches('/').to_string());
        // Build only fails when the TLS backend cannot initialize, which is
        // fatal for this process anyway.
        let client = reqwest::Client::builder()
            .timeout(CLIENT_TIMEOUT)
            .build()
            .expect("building reqwest client");
        Self {
            api_url,
            token,
            client,
        }
    }

    /// True when both URL and token are present; checked before any I/O.
    pub fn is_configured(&self) -> bool {
        self.api_url.is_some() && self.token.is_some()
    }

    fn credentials(&self) -> Result<(&str, String), DocsError> {
        match (&self.api_url, &self.token) {
            (Some(url), Some(token)) => Ok((url, format!("access_token={}", token))),
            _ => Err(DocsError::ConfigMissing),
        }
    }

    /// Multipart POST to `{base}/documents`; 200 and 201 are success. An id
    /// missing from the response is not an error here.
    pub async fn upload(
        &self,
        content: Vec<u8>,
        filename: &str,
        mime_type: &str,
    ) -> Result<RemoteDocument, DocsError> {
        let (base, cookie) = self.credentials()?;
        let url = format!("{}/documents", base);
        // The platform sometimes reports a bare "unknown"; multipart needs a
        // parseable type.
        let mime = if mime_type.contains('/') {
            mime_type
        } else {
            "application/octet-stream"
        };
        let part = reqwest::multipart::Part::bytes(content)
            .file_name(filename.to_string())
            .mime_str(mime)?;
        let form = reqwest::multipart::Form::new().part("file", part);
        log::info!("document upload: {} ({})", filename, mime_type);
        let res = self
            .client
            .post(&url)
            .header(reqwest::header::ACCEPT, "application/json")
            .header(reqwest::header::COOKIE, cookie)
            .multipart(form)
            .send()
            .await?;
        let status = res.status();
        if status != reqwest::StatusCode::OK && status != reqwest::StatusCode::CREATED {
            let body = res.text().await.unwrap_or_default();
            return Err(DocsError::Api(format!("upload failed: {} {}", status, body)));
        }
        let raw: serde_json::Value = res.json().await?;
        let document_id = raw.get("id").and_then(|v| v.as_u64());
        Ok(RemoteDocument { document_id, raw })
    }

    /// JSON POST to `{base}/documents/process` with our single id; parses
    /// the `success`/`failed` id lists to report which applies to it.
    pub async fn trigger_process(&self, document_id: u64) -> Result<ProcessOutcome, DocsError> {
        let (base, cookie) = self.credentials()?;
        let url = format!("{}/documents/process", base);
        let body = serde_json::json!({ "document_ids": [document_id] });
        log::info!("document process trigger: id={}", document_id);
        let res = self
            .client
            .post(&url)
            .header(reqwest::header::ACCEPT, "application/json")
            .header(reqwest::header::COOKIE, cookie)
            .json(&body)
            .send()
            .await?;
        let status = res.status();
        if status != reqwest::StatusCode::OK && status != reqwest::StatusCode::CREATED {
            let text = res.text().await.unwrap_or_default();
            return Err(DocsError::Api(format!(
                "process trigger failed: {} {}",
                status, text
            )));
        }
        let raw: serde_json::Value = res.json().await?;
        Ok(process_outcome(&raw, document_id))
    }
}

fn id_in_list(raw: &serde_json::Value, list: &str, id: u64) -> bool {
    raw.get(list)
        .and_then(|v| v.as_array())
        .map(|ids| ids.iter().any(|v| v.as_u64() == Some(id)))
        .unwrap_or(false)
}

fn process_outcome(raw: &serde_json::Value, id: u64) -> ProcessOutcome {
    if id_in_list(raw, "success", id) {
        ProcessOutcome::Processed
    } else if id_in_list(raw, "failed", id) {
        ProcessOutcome::Rejected
    } else {
        log::warn!("process response names neither list for document {}", id);
        ProcessOutcome::Unknown
    }
}
