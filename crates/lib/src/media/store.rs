//! Local media storage: size ceilings, subdirectory resolution, safe
//! filename derivation, and the actual write.

use crate::media::FetchedMedia;
use crate::message::MessageKind;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

const MIB: u64 = 1024 * 1024;
/// Ceiling for kinds without a specific one.
const DEFAULT_SIZE_LIMIT: u64 = 100 * MIB;

/// Storage subdirectories created under the root.
pub const SUBDIRECTORIES: [&str; 5] = ["images", "videos", "audio", "documents", "other"];

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("size limit exceeded: {size} bytes over the {limit} byte {kind} ceiling")]
    SizeLimit {
        size: u64,
        limit: u64,
        kind: &'static str,
    },
    #[error("writing media file failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Result of a successful write; the path and filename feed the upload stage
/// and the status endpoint.
#[derive(Debug, Clone)]
pub struct StoredFile {
    pub path: PathBuf,
    pub subdirectory: String,
    pub filename: String,
    pub extension: String,
}

/// Writes validated media bytes under `{root}/{subdirectory}/{filename}`.
pub struct StorageWriter {
    root: PathBuf,
    size_limits: HashMap<String, u64>,
}

impl StorageWriter {
    pub fn new(root: impl Into<PathBuf>, size_limits: HashMap<String, u64>) -> Self {
        Self {
            root: root.into(),
            size_limits,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Size ceiling for a message kind, in bytes. Config overrides (keyed by
    /// kind name) win over the built-in limits.
    pub fn size_limit(&self, kind: MessageKind) -> u64 {
        if let Some(limit) = self.size_limits.get(kind.as_str()) {
            return *limit;
        }
        match kind {
            MessageKind::Image => 5 * MIB,
            MessageKind::Video => 100 * MIB,
            MessageKind::Audio => 16 * MIB,
            MessageKind::Document => 100 * MIB,
            MessageKind::Sticker => MIB,
            _ => DEFAULT_SIZE_LIMIT,
        }
    }

    /// Validate size, resolve placement, write the bytes. On a size-limit
    /// rejection nothing is written.
    pub async fn store(
        &self,
        phone: &str,
        kind: MessageKind,
        media: &FetchedMedia,
    ) -> Result<StoredFile, StoreError> {
        let limit = self.size_limit(kind);
        if media.byte_len > limit {
            return Err(StoreError::SizeLimit {
                size: media.byte_len,
                limit,
                kind: kind.as_str(),
            });
        }

        let subdirectory = media_subdirectory(kind, &media.mime_type).to_string();
        let extension = file_extension(&media.mime_type, media.filename.as_deref()).to_string();
        let filename = safe_filename(phone, kind, &extension, media.filename.as_deref());
        let dir = self.root.join(&subdirectory);
        tokio::fs::create_dir_all(&dir).await?;
        let path = dir.join(&filename);
        tokio::fs::write(&path, &media.content).await?;
        log::info!("media stored: {}", path.display());
        Ok(StoredFile {
            path,
            subdirectory,
            filename,
            extension,
        })
    }
}

/// Create the storage subdirectory layout. Called once at gateway startup;
/// the writer also creates directories on demand.
pub fn ensure_media_dirs(root: &Path) -> std::io::Result<()> {
    for sub in SUBDIRECTORIES {
        std::fs::create_dir_all(root.join(sub))?;
    }
    Ok(())
}

/// Map (message kind, MIME type) to a storage subdirectory. A "document"
/// message carrying a media MIME type is reclassified into the matching
/// media subdirectory.
pub fn media_subdirectory(kind: MessageKind, mime_type: &str) -> &'static str {
    match kind {
        MessageKind::Image => "images",
        MessageKind::Video => "videos",
        MessageKind::Audio => "audio",
        MessageKind::Document => {
            if mime_type.starts_with("image/") {
                "images"
            } else if mime_type.starts_with("video/") {
                "videos"
            } else if mime_type.starts_with("audio/") {
                "audio"
            } else {
                "documents"
            }
        }
        _ => "other",
    }
}

/// File extension: MIME lookup first, then the original filename's
/// extension, then a generic binary extension.
pub fn file_extension(mime_type: &str, filename: Option<&str>) -> String {
    if let Some(ext) = mime_extension(mime_type) {
        return ext.to_string();
    }
    if let Some(name) = filename {
        if let Some((_, ext)) = name.rsplit_once('.') {
            if !ext.is_empty() {
                return ext.to_lowercase();
            }
        }
    }
    "bin".to_string()
}

/// Build `{sanitized_phone}_{kind}_{timestamp}_{suffix}.{ext}`. The suffix is
/// the sanitized original filename when present, else a random short id.
pub fn safe_filename(
    phone: &str,
    kind: MessageKind,
    extension: &str,
    original_filename: Option<&str>,
) -> String {
    let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    let phone_clean: String = phone.chars().filter(|c| *c != '+' && *c != ' ').collect();
    let suffix = match original_filename.map(str::trim).filter(|s| !s.is_empty()) {
        Some(name) => {
            let safe: String = name
                .chars()
                .filter(|c| c.is_alphanumeric() || matches!(c, '.' | '_' | '-'))
                .take(50)
                .collect();
            if safe.is_empty() {
                short_id()
            } else {
                safe
            }
        }
        None => short_id(),
    };
    format!(
        "{}_{}_{}_{}.{}",
        phone_clean,
        kind.as_str(),
        timestamp,
        suffix,
        extension
    )
}

fn short_id() -> String {
    uuid::Uuid::new_v4().to_string()[..8].to_string()
}

/// MIME type to extension table.
fn mime_extension(mime_type: &str) -> Option<&'static str> {
    let ext = match mime_type {
        "application/pdf" => "pdf",

        "application/msword" => "doc",
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => "docx",
        "application/vnd.ms-excel" => "xls",
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet" => "xlsx",
        "application/vnd.ms-powerpoint" => "ppt",
        "application/vnd.openxmlformats-officedocument.presentationml.presentation" => "pptx",

        "text/csv" => "csv",
        "text/plain" => "txt",
        "text/html" => "html",
        "text/xml" => "xml",

        "image/jpeg" | "image/jpg" => "jpg",
        "image/png" => "png",
        "image/gif" => "gif",
        "image/webp" => "webp",

        "audio/mpeg" | "audio/mp3" => "mp3",
        "audio/wav" => "wav",
        "audio/ogg" => "ogg",
        "audio/m4a" => "m4a",
        "audio/amr" => "amr",

        "video/mp4" => "mp4",
        "video/3gpp" => "3gp",
        "video/quicktime" => "mov",
        "video/webm" => "webm",

        "application/zip" => "zip",
        "application/x-rar-compressed" => "rar",
        "application/x-7z-compressed" => "7z",
        "application/x-tar" => "tar",
        "application/gzip" => "gz",

        "application/octet-stream" => "bin",
        _ => return None,
    };
    Some(ext)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::FetchedMedia;

    fn media(mime: &str, bytes: usize, filename: Option<&str>) -> FetchedMedia {
        FetchedMedia {
            content: vec![0u8; bytes],
            mime_type: mime.to_string(),
            byte_len: bytes as u64,
            filename: filename.map(str::to_string),
            download_url: "https://cdn.example/x".to_string(),
        }
    }

    #[test]
    fn subdirectory_for_plain_kinds() {
        assert_eq!(media_subdirectory(MessageKind::Image, "image/png"), "images");
        assert_eq!(media_subdirectory(MessageKind::Video, "video/mp4"), "videos");
        assert_eq!(media_subdirectory(MessageKind::Audio, "audio/ogg"), "audio");
        assert_eq!(media_subdirectory(MessageKind::Sticker, "image/webp"), "other");
        assert_eq!(media_subdirectory(MessageKind::Unknown, "x/y"), "other");
    }

    #[test]
    fn document_kind_reclassifies_by_mime_prefix() {
        assert_eq!(
            media_subdirectory(MessageKind::Document, "image/png"),
            "images"
        );
        assert_eq!(
            media_subdirectory(MessageKind::Document, "video/mp4"),
            "videos"
        );
        assert_eq!(
            media_subdirectory(MessageKind::Document, "audio/mpeg"),
            "audio"
        );
        assert_eq!(
            media_subdirectory(MessageKind::Document, "application/pdf"),
            "documents"
        );
    }

    #[test]
    fn extension_prefers_mime_then_filename_then_bin() {
        assert_eq!(file_extension("application/pdf", Some("x.csv")), "pdf");
        assert_eq!(file_extension("application/x-custom", Some("report.CSV")), "csv");
        assert_eq!(file_extension("application/x-custom", Some("noext")), "bin");
        assert_eq!(file_extension("application/x-custom", None), "bin");
    }

    #[test]
    fn filename_strips_phone_and_sanitizes_original() {
        let name = safe_filename(
            "+49 151 234",
            MessageKind::Document,
            "pdf",
            Some("Q3 report (final)!.pdf"),
        );
        assert!(name.starts_with("49151234_document_"));
        // The sanitized suffix keeps the original's ".pdf", then the resolved
        // extension is appended on top.
        assert!(name.ends_with("_Q3reportfinal.pdf.pdf"), "got {}", name);
    }

    #[test]
    fn filename_uses_random_suffix_without_original() {
        let a = safe_filename("+1", MessageKind::Image, "jpg", None);
        let b = safe_filename("+1", MessageKind::Image, "jpg", None);
        assert_ne!(a, b);
        assert!(a.ends_with(".jpg"));
    }

    #[tokio::test]
    async fn store_writes_pdf_under_documents() {
        let root = std::env::temp_dir().join(format!("sluice-store-{}", uuid::Uuid::new_v4()));
        let writer = StorageWriter::new(&root, HashMap::new());
        let stored = writer
            .store("+49123", MessageKind::Document, &media("application/pdf", 16, Some("a.pdf")))
            .await
            .expect("store pdf");
        assert_eq!(stored.subdirectory, "documents");
        assert_eq!(stored.extension, "pdf");
        assert!(stored.path.exists());
        std::fs::remove_dir_all(&root).ok();
    }

    #[tokio::test]
    async fn oversize_media_writes_nothing() {
        let root = std::env::temp_dir().join(format!("sluice-store-{}", uuid::Uuid::new_v4()));
        let mut limits = HashMap::new();
        limits.insert("image".to_string(), 8u64);
        let writer = StorageWriter::new(&root, limits);
        let err = writer
            .store("+49123", MessageKind::Image, &media("image/png", 64, None))
            .await
            .expect_err("oversize must fail");
        assert!(matches!(err, StoreError::SizeLimit { limit: 8, .. }));
        assert!(!root.exists());
    }

    #[test]
    fn builtin_size_limits() {
        let writer = StorageWriter::new("/tmp", HashMap::new());
        assert_eq!(writer.size_limit(MessageKind::Image), 5 * MIB);
        assert_eq!(writer.size_limit(MessageKind::Audio), 16 * MIB);
        assert_eq!(writer.size_limit(MessageKind::Sticker), MIB);
        assert_eq!(writer.size_limit(MessageKind::Unknown), 100 * MIB);
    }
}
