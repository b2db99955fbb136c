//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.sluice/config.json`) and
//! environment. Credentials may come from env instead of the file; a missing
//! credential degrades the corresponding pipeline stage, it never crashes
//! the process.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Webhook gateway server settings.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Chat platform (WhatsApp Cloud API) settings.
    #[serde(default)]
    pub platform: PlatformConfig,

    /// External document service settings.
    #[serde(default)]
    pub docs: DocsConfig,

    /// Local media storage settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Dedup window, settle delay, timeouts, forward policy.
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

/// Gateway bind, port, and webhook verification settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    /// Port for the webhook and status endpoints (default 8490).
    #[serde(default = "default_gateway_port")]
    pub port: u16,

    /// Bind address (default "127.0.0.1").
    #[serde(default = "default_gateway_bind")]
    pub bind: String,

    /// Verify token echoed during the platform's GET /webhook handshake.
    pub verify_token: Option<String>,
}

fn default_gateway_port() -> u16 {
    8490
}

fn default_gateway_bind() -> String {
    "127.0.0.1".to_string()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_gateway_port(),
            bind: default_gateway_bind(),
            verify_token: None,
        }
    }
}

/// Chat platform config: media API base URL and access token.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformConfig {
    /// Graph API base for media metadata lookups (no trailing slash).
    #[serde(default = "default_platform_api_base")]
    pub api_base: String,

    /// Bearer token for the media API. Overridden by WHATSAPP_ACCESS_TOKEN env.
    pub access_token: Option<String>,
}

fn default_platform_api_base() -> String {
    "https://graph.facebook.com/v18.0".to_string()
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            api_base: default_platform_api_base(),
            access_token: None,
        }
    }
}

/// Document service config: base URL and cookie access token.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocsConfig {
    /// API base URL (no trailing slash). No default; uploads are skipped when unset.
    pub api_url: Option<String>,

    /// Access token sent as a cookie. Overridden by DOCS_ACCESS_TOKEN env.
    pub access_token: Option<String>,
}

/// Local media storage config.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageConfig {
    /// Root directory for stored media (default "./media").
    #[serde(default = "default_storage_root")]
    pub root: PathBuf,

    /// Per-kind size ceiling overrides in bytes, keyed by kind name
    /// (e.g. {"image": 10485760}). Unlisted kinds use built-in ceilings.
    #[serde(default)]
    pub size_limits: std::collections::HashMap<String, u64>,
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("./media")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_storage_root(),
            size_limits: Default::default(),
        }
    }
}

/// Which stored files are forwarded to the document service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ForwardPolicy {
    /// Every successfully stored file is uploaded.
    #[default]
    All,
    /// Only business-document MIME types (pdf, office, csv, text) are uploaded;
    /// other files complete after the local write.
    DocumentsOnly,
}

/// Pipeline tuning: dedup window, settle delay, timeouts, forward policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineConfig {
    /// Minutes a seen message key is suppressed (default 60).
    #[serde(default = "default_dedup_window_minutes")]
    pub dedup_window_minutes: u64,

    /// Seconds to wait between upload and the remote process trigger
    /// (default 30). The document service indexes uploads asynchronously;
    /// triggering immediately races its own ingestion.
    #[serde(default = "default_settle_delay_secs")]
    pub settle_delay_secs: u64,

    /// Timeout budget for the document upload call (default 30).
    #[serde(default = "default_upload_timeout_secs")]
    pub upload_timeout_secs: u64,

    /// Timeout budget for the remote process trigger (default 30).
    #[serde(default = "default_process_timeout_secs")]
    pub process_timeout_secs: u64,

    #[serde(default)]
    pub forward_policy: ForwardPolicy,
}

fn default_dedup_window_minutes() -> u64 {
    60
}

fn default_settle_delay_secs() -> u64 {
    30
}

fn default_upload_timeout_secs() -> u64 {
    30
}

fn default_process_timeout_secs() -> u64 {
    30
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            dedup_window_minutes: default_dedup_window_minutes(),
            settle_delay_secs: default_settle_delay_secs(),
            upload_timeout_secs: default_upload_timeout_secs(),
            process_timeout_secs: default_process_timeout_secs(),
            forward_policy: ForwardPolicy::default(),
        }
    }
}

impl PipelineConfig {
    pub fn dedup_window(&self) -> Duration {
        Duration::from_secs(self.dedup_window_minutes * 60)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_secs(self.settle_delay_secs)
    }

    pub fn upload_timeout(&self) -> Duration {
        Duration::from_secs(self.upload_timeout_secs)
    }

    pub fn process_timeout(&self) -> Duration {
        Duration::from_secs(self.process_timeout_secs)
    }
}

fn env_nonempty(name: &str) -> Option<String> {
    std::env::var(name).ok().and_then(|s| {
        let t = s.trim();
        if t.is_empty() {
            None
        } else {
            Some(t.to_string())
        }
    })
}

/// Resolve the platform access token: env WHATSAPP_ACCESS_TOKEN overrides config.
pub fn resolve_platform_token(config: &Config) -> Option<String> {
    env_nonempty("WHATSAPP_ACCESS_TOKEN").or_else(|| {
        config
            .platform
            .access_token
            .as_ref()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    })
}

/// Resolve the document service token: env DOCS_ACCESS_TOKEN overrides config.
pub fn resolve_docs_token(config: &Config) -> Option<String> {
    env_nonempty("DOCS_ACCESS_TOKEN").or_else(|| {
        config
            .docs
            .access_token
            .as_ref()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    })
}

/// Resolve the webhook verify token: env WEBHOOK_VERIFY_TOKEN overrides config.
pub fn resolve_verify_token(config: &Config) -> Option<String> {
    env_nonempty("WEBHOOK_VERIFY_TOKEN").or_else(|| {
        config
            .gateway
            .verify_token
            .as_ref()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    })
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("SLUICE_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .map(|h| h.join(".sluice").join("config.json"))
                .unwrap_or_else(|| PathBuf::from("config.json"))
        })
}

/// Load config from the default path (or SLUICE_CONFIG_PATH). Missing file => default config.
/// Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}
