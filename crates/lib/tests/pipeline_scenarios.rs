//! End-to-end pipeline scenarios against in-process mock servers for the
//! platform media API and the document service. No real network access.

use axum::{
    extract::Path,
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use lib::config::Config;
use lib::message::{InboundMessage, MediaRef, MessageKind};
use lib::pipeline::{Pipeline, TaskSnapshot, TaskStatus};
use serde_json::json;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Bind a router on a free loopback port; returns its base URL.
async fn spawn_server(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind free port");
    let addr = listener.local_addr().expect("local_addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    format!("http://{}", addr)
}

/// Mock platform media API: metadata at `/{id}`, bytes at `/files/{id}`.
/// Rejects requests without a bearer header, like the real API.
async fn spawn_platform(mime: &'static str, bytes: usize, filename: Option<&'static str>) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind free port");
    let addr = listener.local_addr().expect("local_addr");
    let base = format!("http://{}", addr);
    let meta_base = base.clone();
    let router = Router::new()
        .route(
            "/:id",
            get(move |Path(id): Path<String>, headers: HeaderMap| {
                let base = meta_base.clone();
                async move {
                    if !headers.contains_key("authorization") {
                        return (StatusCode::UNAUTHORIZED, Json(json!({})));
                    }
                    (
                        StatusCode::OK,
                        Json(json!({
                            "url": format!("{}/files/{}", base, id),
                            "mime_type": mime,
                            "file_size": bytes,
                            "filename": filename,
                        })),
                    )
                }
            }),
        )
        .route(
            "/files/:id",
            get(move |_: Path<String>| async move { vec![0u8; bytes] }),
        );
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    base
}

/// Mock document service: counts uploads, returns a fixed upload id and a
/// fixed process response.
async fn spawn_docs(
    upload_body: serde_json::Value,
    process_body: serde_json::Value,
) -> (String, Arc<AtomicUsize>) {
    let uploads = Arc::new(AtomicUsize::new(0));
    let counter = uploads.clone();
    let router = Router::new()
        .route(
            "/documents",
            post(move || {
                let counter = counter.clone();
                let body = upload_body.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Json(body)
                }
            }),
        )
        .route(
            "/documents/process",
            post(move || {
                let body = process_body.clone();
                async move { Json(body) }
            }),
        );
    (spawn_server(router).await, uploads)
}

fn test_config(platform_base: &str, docs_base: Option<&str>) -> (Config, PathBuf) {
    let root = std::env::temp_dir().join(format!("sluice-e2e-{}", uuid::Uuid::new_v4()));
    let mut config = Config::default();
    config.platform.api_base = platform_base.to_string();
    config.platform.access_token = Some("test-token".to_string());
    config.docs.api_url = docs_base.map(str::to_string);
    config.docs.access_token = docs_base.map(|_| "docs-token".to_string());
    config.storage.root = root.clone();
    config.pipeline.settle_delay_secs = 0;
    config.pipeline.upload_timeout_secs = 5;
    config.pipeline.process_timeout_secs = 5;
    (config, root)
}

fn image_message(id: &str, media_id: &str) -> InboundMessage {
    InboundMessage {
        message_id: id.to_string(),
        sender: "+49151234".to_string(),
        timestamp: 1700000000,
        kind: MessageKind::Image,
        text: None,
        media: Some(MediaRef {
            media_id: media_id.to_string(),
            mime_type: "image/jpeg".to_string(),
            declared_size: Some(2 * 1024 * 1024),
            filename: None,
            caption: None,
        }),
    }
}

/// Poll until the task for `message_id` reaches a terminal state.
async fn wait_terminal(pipeline: &Arc<Pipeline>, message_id: &str) -> TaskSnapshot {
    for _ in 0..500 {
        let status = pipeline.status();
        if let Some(task) = status
            .recent_tasks
            .iter()
            .find(|t| t.message_id == message_id)
        {
            if task.status.is_terminal() {
                return task.clone();
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("task for {} did not reach a terminal state within 5s", message_id);
}

#[tokio::test]
async fn scenario_a_text_message_completes_without_media_stages() {
    let (config, _root) = test_config("http://127.0.0.1:1", None);
    let pipeline = Arc::new(Pipeline::from_config(&config));
    pipeline.clone().enqueue(InboundMessage::text("wamid.text", "+49151234", 1700000000, "hi"));

    let task = wait_terminal(&pipeline, "wamid.text").await;
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.history, vec![TaskStatus::Queued, TaskStatus::Completed]);
    assert!(!task.has_media);
    assert!(task.file_path.is_none());
    pipeline.shutdown().await;
}

#[tokio::test]
async fn scenario_b_image_runs_the_full_stage_sequence() {
    let platform = spawn_platform("image/jpeg", 64, None).await;
    let (docs, uploads) = spawn_docs(json!({ "id": 42 }), json!({ "success": [42] })).await;
    let (config, root) = test_config(&platform, Some(&docs));
    let pipeline = Arc::new(Pipeline::from_config(&config));
    pipeline.clone().enqueue(image_message("wamid.img", "media-1"));

    let task = wait_terminal(&pipeline, "wamid.img").await;
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(
        task.history,
        vec![
            TaskStatus::Queued,
            TaskStatus::Downloading,
            TaskStatus::ProcessingLocal,
            TaskStatus::Uploading,
            TaskStatus::ProcessingRemote,
            TaskStatus::Completed,
        ]
    );
    assert!(task.has_media);
    assert_eq!(task.document_id, Some(42));
    let path = task.file_path.expect("file path");
    assert!(path.starts_with(root.join("images")));
    assert!(path.exists());
    assert_eq!(uploads.load(Ordering::SeqCst), 1);
    pipeline.shutdown().await;
    std::fs::remove_dir_all(&root).ok();
}

#[tokio::test]
async fn scenario_c_replayed_message_is_suppressed_at_enqueue() {
    let platform = spawn_platform("image/jpeg", 64, None).await;
    let (docs, _uploads) = spawn_docs(json!({ "id": 42 }), json!({ "success": [42] })).await;
    let (config, root) = test_config(&platform, Some(&docs));
    let pipeline = Arc::new(Pipeline::from_config(&config));

    pipeline.clone().enqueue(image_message("wamid.dup", "media-1"));
    pipeline.clone().enqueue(image_message("wamid.dup", "media-1"));
    let _ = wait_terminal(&pipeline, "wamid.dup").await;

    let tasks = pipeline.status().recent_tasks;
    assert_eq!(
        tasks.iter().filter(|t| t.message_id == "wamid.dup").count(),
        1,
        "second enqueue must not create a task"
    );
    pipeline.shutdown().await;
    std::fs::remove_dir_all(&root).ok();
}

#[tokio::test]
async fn scenario_d_metadata_404_terminates_at_download_failed() {
    let router = Router::new().route(
        "/:id",
        get(|_: Path<String>| async { (StatusCode::NOT_FOUND, Json(json!({"error": "gone"}))) }),
    );
    let platform = spawn_server(router).await;
    let (docs, uploads) = spawn_docs(json!({ "id": 1 }), json!({ "success": [1] })).await;
    let (config, root) = test_config(&platform, Some(&docs));
    let pipeline = Arc::new(Pipeline::from_config(&config));
    pipeline.clone().enqueue(image_message("wamid.404", "media-404"));

    let task = wait_terminal(&pipeline, "wamid.404").await;
    assert_eq!(task.status, TaskStatus::DownloadFailed);
    assert!(task.error.is_some());
    assert!(task.file_path.is_none());
    assert_eq!(uploads.load(Ordering::SeqCst), 0, "no upload may be attempted");
    assert!(!root.join("images").exists() || dir_is_empty(&root.join("images")));
    pipeline.shutdown().await;
    std::fs::remove_dir_all(&root).ok();
}

#[tokio::test]
async fn oversize_media_completes_without_file_or_upload() {
    let platform = spawn_platform("image/jpeg", 4096, None).await;
    let (docs, uploads) = spawn_docs(json!({ "id": 9 }), json!({ "success": [9] })).await;
    let (mut config, root) = test_config(&platform, Some(&docs));
    config
        .storage
        .size_limits
        .insert("image".to_string(), 1024);
    let pipeline = Arc::new(Pipeline::from_config(&config));
    pipeline.clone().enqueue(image_message("wamid.big", "media-big"));

    let task = wait_terminal(&pipeline, "wamid.big").await;
    assert_eq!(task.status, TaskStatus::Completed);
    assert!(!task.has_media);
    assert!(task.error.as_deref().unwrap_or("").contains("size limit"));
    assert_eq!(uploads.load(Ordering::SeqCst), 0);
    pipeline.shutdown().await;
    std::fs::remove_dir_all(&root).ok();
}

#[tokio::test]
async fn upload_failure_terminates_at_upload_failed() {
    let platform = spawn_platform("application/pdf", 64, Some("inv.pdf")).await;
    let router = Router::new().route(
        "/documents",
        post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
    );
    let docs = spawn_server(router).await;
    let (config, root) = test_config(&platform, Some(&docs));
    let pipeline = Arc::new(Pipeline::from_config(&config));
    pipeline.clone().enqueue(InboundMessage {
        kind: MessageKind::Document,
        media: Some(MediaRef {
            media_id: "media-doc".to_string(),
            mime_type: "application/pdf".to_string(),
            declared_size: None,
            filename: Some("inv.pdf".to_string()),
            caption: None,
        }),
        ..image_message("wamid.up", "media-doc")
    });

    let task = wait_terminal(&pipeline, "wamid.up").await;
    assert_eq!(task.status, TaskStatus::UploadFailed);
    // The local write already happened and is not rolled back.
    assert!(task.has_media);
    pipeline.shutdown().await;
    std::fs::remove_dir_all(&root).ok();
}

#[tokio::test]
async fn remote_rejection_terminates_at_remote_process_failed() {
    let platform = spawn_platform("application/pdf", 64, Some("inv.pdf")).await;
    let (docs, _uploads) = spawn_docs(json!({ "id": 7 }), json!({ "success": [], "failed": [7] })).await;
    let (config, root) = test_config(&platform, Some(&docs));
    let pipeline = Arc::new(Pipeline::from_config(&config));
    pipeline.clone().enqueue(image_message("wamid.rej", "media-rej"));

    let task = wait_terminal(&pipeline, "wamid.rej").await;
    assert_eq!(task.status, TaskStatus::RemoteProcessFailed);
    assert_eq!(task.document_id, Some(7));
    pipeline.shutdown().await;
    std::fs::remove_dir_all(&root).ok();
}

#[tokio::test]
async fn documents_only_policy_skips_non_document_upload() {
    let platform = spawn_platform("image/jpeg", 64, None).await;
    let (docs, uploads) = spawn_docs(json!({ "id": 5 }), json!({ "success": [5] })).await;
    let (mut config, root) = test_config(&platform, Some(&docs));
    config.pipeline.forward_policy = lib::config::ForwardPolicy::DocumentsOnly;
    let pipeline = Arc::new(Pipeline::from_config(&config));
    pipeline.clone().enqueue(image_message("wamid.pol", "media-1"));

    let task = wait_terminal(&pipeline, "wamid.pol").await;
    assert_eq!(task.status, TaskStatus::Completed);
    assert!(task.has_media, "file is still stored locally");
    assert_eq!(uploads.load(Ordering::SeqCst), 0);
    pipeline.shutdown().await;
    std::fs::remove_dir_all(&root).ok();
}

#[tokio::test]
async fn stalled_remote_processing_terminates_at_timeout() {
    let platform = spawn_platform("application/pdf", 64, Some("inv.pdf")).await;
    let router = Router::new()
        .route("/documents", post(|| async { Json(json!({ "id": 11 })) }))
        .route(
            "/documents/process",
            post(|| async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Json(json!({ "success": [11] }))
            }),
        );
    let docs = spawn_server(router).await;
    let (mut config, root) = test_config(&platform, Some(&docs));
    config.pipeline.process_timeout_secs = 1;
    let pipeline = Arc::new(Pipeline::from_config(&config));
    pipeline.clone().enqueue(image_message("wamid.stall", "media-stall"));

    let task = wait_terminal(&pipeline, "wamid.stall").await;
    assert_eq!(task.status, TaskStatus::Timeout);
    assert_eq!(task.document_id, Some(11));
    assert!(task.error.as_deref().unwrap_or("").contains("timed out"));
    pipeline.shutdown().await;
    std::fs::remove_dir_all(&root).ok();
}

#[tokio::test]
async fn upload_without_document_id_completes_and_skips_processing() {
    let platform = spawn_platform("application/pdf", 64, Some("inv.pdf")).await;
    let process_calls = Arc::new(AtomicUsize::new(0));
    let counter = process_calls.clone();
    let router = Router::new()
        .route("/documents", post(|| async { Json(json!({})) }))
        .route(
            "/documents/process",
            post(move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Json(json!({ "success": [] }))
                }
            }),
        );
    let docs = spawn_server(router).await;
    let (config, root) = test_config(&platform, Some(&docs));
    let pipeline = Arc::new(Pipeline::from_config(&config));
    pipeline.clone().enqueue(image_message("wamid.noid", "media-noid"));

    let task = wait_terminal(&pipeline, "wamid.noid").await;
    assert_eq!(task.status, TaskStatus::Completed);
    assert!(task.has_media);
    assert_eq!(task.document_id, None);
    assert_eq!(
        process_calls.load(Ordering::SeqCst),
        0,
        "processing must not be triggered without a document id"
    );
    pipeline.shutdown().await;
    std::fs::remove_dir_all(&root).ok();
}

fn dir_is_empty(path: &std::path::Path) -> bool {
    std::fs::read_dir(path)
        .map(|mut d| d.next().is_none())
        .unwrap_or(true)
}
