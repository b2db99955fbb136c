//! Work queue and the single background worker loop.

use crate::config::{Config, ForwardPolicy};
use crate::dedup::Deduplicator;
use crate::docs::{DocsClient, ProcessOutcome};
use crate::media::{MediaFetcher, StorageWriter, StoreError, StoredFile};
use crate::message::{InboundMessage, MediaRef};
use crate::pipeline::task::{ProcessingTask, TaskSnapshot, TaskStatus};
use serde::Serialize;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// How many task snapshots the status endpoint can look back on.
const RECENT_TASKS: usize = 100;

/// MIME types forwarded under the documentsOnly policy.
const DOCUMENT_MIME_WHITELIST: [&str; 9] = [
    "application/pdf",
    "application/msword",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "application/vnd.ms-excel",
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    "application/vnd.ms-powerpoint",
    "application/vnd.openxmlformats-officedocument.presentationml.presentation",
    "text/csv",
    "text/plain",
];

/// Pipeline health for the status endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineStatus {
    pub queue_depth: usize,
    pub worker_running: bool,
    pub worker_busy: bool,
    pub recent_tasks: Vec<TaskSnapshot>,
}

/// Tuning knobs the worker reads per stage.
struct Tuning {
    settle_delay: Duration,
    upload_timeout: Duration,
    process_timeout: Duration,
    forward_policy: ForwardPolicy,
}

/// The ingestion pipeline: dedup gate in front of an unbounded work channel
/// drained by exactly one background loop. `enqueue` is the sole entry point
/// and never blocks on network I/O; every downstream failure is recorded on
/// the task, never raised to the caller.
pub struct Pipeline {
    dedup: Deduplicator,
    fetcher: MediaFetcher,
    storage: StorageWriter,
    docs: DocsClient,
    tuning: Tuning,
    tx: Mutex<Option<mpsc::UnboundedSender<ProcessingTask>>>,
    /// Taken by the worker loop on first start.
    rx: Mutex<Option<mpsc::UnboundedReceiver<ProcessingTask>>>,
    worker_started: AtomicBool,
    worker_busy: AtomicBool,
    worker_handle: Mutex<Option<JoinHandle<()>>>,
    depth: AtomicUsize,
    recent: Mutex<VecDeque<TaskSnapshot>>,
}

impl Pipeline {
    /// Build a pipeline from config. Tokens resolve env-over-file here, once.
    pub fn from_config(config: &Config) -> Self {
        let fetcher = MediaFetcher::new(
            config.platform.api_base.clone(),
            crate::config::resolve_platform_token(config),
        );
        let storage = StorageWriter::new(
            config.storage.root.clone(),
            config.storage.size_limits.clone(),
        );
        let docs = DocsClient::new(
            config.docs.api_url.clone(),
            crate::config::resolve_docs_token(config),
        );
        let dedup = Deduplicator::new(config.pipeline.dedup_window());
        let tuning = Tuning {
            settle_delay: config.pipeline.settle_delay(),
            upload_timeout: config.pipeline.upload_timeout(),
            process_timeout: config.pipeline.process_timeout(),
            forward_policy: config.pipeline.forward_policy,
        };
        Self::new(dedup, fetcher, storage, docs, tuning)
    }

    fn new(
        dedup: Deduplicator,
        fetcher: MediaFetcher,
        storage: StorageWriter,
        docs: DocsClient,
        tuning: Tuning,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            dedup,
            fetcher,
            storage,
            docs,
            tuning,
            tx: Mutex::new(Some(tx)),
            rx: Mutex::new(Some(rx)),
            worker_started: AtomicBool::new(false),
            worker_busy: AtomicBool::new(false),
            worker_handle: Mutex::new(None),
            depth: AtomicUsize::new(0),
            recent: Mutex::new(VecDeque::new()),
        }
    }

    /// Accept one inbound message. Duplicates are dropped silently; anything
    /// else becomes a queued task. Fire-and-forget: returns before any I/O.
    pub fn enqueue(self: Arc<Self>, msg: InboundMessage) {
        if self.dedup.is_duplicate(&msg) {
            log::debug!("duplicate message suppressed: {}", msg.message_id);
            return;
        }
        let task = ProcessingTask::new(msg);
        let guard = self.tx.lock().unwrap_or_else(|e| e.into_inner());
        let Some(tx) = guard.as_ref() else {
            log::debug!("pipeline stopped; dropping message {}", task.message.message_id);
            return;
        };
        self.push_snapshot(TaskSnapshot::new(&task));
        log::info!(
            "queued {} message {} from {}",
            task.message.kind.as_str(),
            task.message.message_id,
            task.message.sender
        );
        if tx.send(task).is_ok() {
            self.depth.fetch_add(1, Ordering::SeqCst);
        }
        drop(guard);
        self.clone().ensure_worker();
    }

    /// Start the worker loop if it is not already running. Idempotent.
    pub fn ensure_worker(self: Arc<Self>) {
        if self.worker_started.swap(true, Ordering::SeqCst) {
            return;
        }
        let pipeline = self.clone();
        let handle = tokio::spawn(async move {
            run_worker(pipeline).await;
        });
        *self.worker_handle.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
    }

    /// Phase one of shutdown: stop accepting new tasks. Closing the sender
    /// lets the worker drain what is queued and then exit.
    pub fn stop(&self) {
        self.tx.lock().unwrap_or_else(|e| e.into_inner()).take();
    }

    /// Stop accepting, then wait for the worker to drain and exit. In-flight
    /// tasks run to completion or to their own timeouts.
    pub async fn shutdown(&self) {
        self.stop();
        let handle = self
            .worker_handle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                log::warn!("pipeline worker join failed: {}", e);
            }
        }
    }

    /// Current queue depth, worker flags, and recent task snapshots.
    pub fn status(&self) -> PipelineStatus {
        let accepting = self
            .tx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some();
        let recent = self.recent.lock().unwrap_or_else(|e| e.into_inner());
        PipelineStatus {
            queue_depth: self.depth.load(Ordering::SeqCst),
            worker_running: self.worker_started.load(Ordering::SeqCst) && accepting,
            worker_busy: self.worker_busy.load(Ordering::SeqCst),
            recent_tasks: recent.iter().cloned().collect(),
        }
    }

    /// Snapshot for one task id, if still in the recent ring.
    pub fn task(&self, id: &str) -> Option<TaskSnapshot> {
        let recent = self.recent.lock().unwrap_or_else(|e| e.into_inner());
        recent.iter().find(|t| t.id == id).cloned()
    }

    fn push_snapshot(&self, snapshot: TaskSnapshot) {
        let mut recent = self.recent.lock().unwrap_or_else(|e| e.into_inner());
        if recent.len() == RECENT_TASKS {
            recent.pop_front();
        }
        recent.push_back(snapshot);
    }

    fn update_snapshot(&self, id: &str, f: impl FnOnce(&mut TaskSnapshot)) {
        let mut recent = self.recent.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(snapshot) = recent.iter_mut().find(|t| t.id == id) {
            f(snapshot);
        }
    }

    fn set_status(&self, id: &str, status: TaskStatus) {
        self.update_snapshot(id, |s| {
            s.status = status;
            s.history.push(status);
        });
    }

    fn set_error(&self, id: &str, error: impl Into<String>) {
        self.update_snapshot(id, |s| s.error = Some(error.into()));
    }

    fn set_file(&self, id: &str, path: PathBuf) {
        self.update_snapshot(id, |s| {
            s.has_media = true;
            s.file_path = Some(path);
        });
    }

    fn should_forward(&self, mime_type: &str) -> bool {
        match self.tuning.forward_policy {
            ForwardPolicy::All => true,
            ForwardPolicy::DocumentsOnly => DOCUMENT_MIME_WHITELIST.contains(&mime_type),
        }
    }

    /// Drive one task through the stage sequence, updating its snapshot at
    /// every transition. Failures terminate this task only.
    async fn process_task(&self, task: ProcessingTask) {
        let msg = &task.message;
        let Some(media) = &msg.media else {
            // Text and unknown kinds carry nothing to fetch.
            self.set_status(&task.id, TaskStatus::Completed);
            return;
        };

        self.set_status(&task.id, TaskStatus::Downloading);
        let fetched = match self.fetcher.fetch(&media.media_id).await {
            Ok(f) => f,
            Err(e) => {
                log::warn!("media download failed: {}: {}", media.media_id, e);
                self.set_error(&task.id, e.to_string());
                self.set_status(&task.id, TaskStatus::DownloadFailed);
                return;
            }
        };

        self.set_status(&task.id, TaskStatus::ProcessingLocal);
        let stored = match self.storage.store(&msg.sender, msg.kind, &fetched).await {
            Ok(stored) => stored,
            Err(e @ StoreError::SizeLimit { .. }) => {
                // Oversize media completes like the non-media flow, with the
                // rejection noted on the task.
                log::warn!("media rejected: {}: {}", media.media_id, e);
                self.set_error(&task.id, e.to_string());
                self.set_status(&task.id, TaskStatus::Completed);
                return;
            }
            Err(e) => {
                log::error!("media storage failed: {}: {}", media.media_id, e);
                self.set_error(&task.id, e.to_string());
                self.set_status(&task.id, TaskStatus::StorageFailed);
                return;
            }
        };
        self.set_file(&task.id, stored.path.clone());

        if !self.docs.is_configured() {
            log::debug!("document service not configured; stored only: {}", stored.filename);
            self.set_status(&task.id, TaskStatus::Completed);
            return;
        }
        if !self.should_forward(&fetched.mime_type) {
            log::debug!(
                "forward policy skips {} ({})",
                stored.filename,
                fetched.mime_type
            );
            self.set_status(&task.id, TaskStatus::Completed);
            return;
        }

        let Some(document_id) = self.upload_stage(&task, media, &fetched, &stored).await else {
            return;
        };
        self.process_stage(&task, document_id).await;
    }

    /// Upload stage. Returns the remote document id when the following
    /// process stage should run; None when the task already reached a
    /// terminal state here.
    async fn upload_stage(
        &self,
        task: &ProcessingTask,
        media: &MediaRef,
        fetched: &crate::media::FetchedMedia,
        stored: &StoredFile,
    ) -> Option<u64> {
        self.set_status(&task.id, TaskStatus::Uploading);
        // Prefer the original filename for the remote side; fall back to the
        // generated one.
        let upload_filename = fetched
            .filename
            .clone()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| stored.filename.clone());
        let upload = tokio::time::timeout(
            self.tuning.upload_timeout,
            self.docs
                .upload(fetched.content.clone(), &upload_filename, &fetched.mime_type),
        )
        .await;
        let document = match upload {
            Err(_) => {
                log::warn!("document upload timed out: {}", upload_filename);
                self.set_error(&task.id, "document upload timed out");
                self.set_status(&task.id, TaskStatus::UploadFailed);
                return None;
            }
            Ok(Err(e)) => {
                log::warn!("document upload failed: {}: {}", upload_filename, e);
                self.set_error(&task.id, e.to_string());
                self.set_status(&task.id, TaskStatus::UploadFailed);
                return None;
            }
            Ok(Ok(doc)) => doc,
        };
        match document.document_id {
            Some(id) => {
                self.update_snapshot(&task.id, |s| s.document_id = Some(id));
                Some(id)
            }
            None => {
                // The upload itself succeeded; only downstream processing is
                // skipped.
                log::warn!(
                    "upload response has no document id: {} ({})",
                    upload_filename,
                    media.media_id
                );
                self.set_status(&task.id, TaskStatus::Completed);
                None
            }
        }
    }

    /// Settle delay, then the remote process trigger. The delay lets the
    /// remote service finish its own async ingestion of the just-uploaded
    /// file; triggering immediately was observed to fail.
    async fn process_stage(&self, task: &ProcessingTask, document_id: u64) {
        self.set_status(&task.id, TaskStatus::ProcessingRemote);
        log::info!(
            "waiting {:?} before processing document {}",
            self.tuning.settle_delay,
            document_id
        );
        tokio::time::sleep(self.tuning.settle_delay).await;
        let outcome = tokio::time::timeout(
            self.tuning.process_timeout,
            self.docs.trigger_process(document_id),
        )
        .await;
        match outcome {
            Err(_) => {
                log::warn!("document processing timed out: {}", document_id);
                self.set_error(&task.id, "document processing timed out");
                self.set_status(&task.id, TaskStatus::Timeout);
            }
            Ok(Err(e)) => {
                log::warn!("document processing failed: {}: {}", document_id, e);
                self.set_error(&task.id, e.to_string());
                self.set_status(&task.id, TaskStatus::RemoteProcessFailed);
            }
            Ok(Ok(ProcessOutcome::Rejected)) => {
                self.set_error(&task.id, "document rejected by remote processing");
                self.set_status(&task.id, TaskStatus::RemoteProcessFailed);
            }
            Ok(Ok(_)) => {
                self.set_status(&task.id, TaskStatus::Completed);
            }
        }
    }
}

/// The single drain loop: FIFO, one task at a time, cooperative block on an
/// empty queue. Exits once the sender side is closed and the queue drained.
async fn run_worker(pipeline: Arc<Pipeline>) {
    let rx = pipeline.rx.lock().unwrap_or_else(|e| e.into_inner()).take();
    let Some(mut rx) = rx else {
        log::error!("pipeline worker receiver already taken");
        return;
    };
    log::info!("pipeline worker started");
    while let Some(task) = rx.recv().await {
        pipeline.depth.fetch_sub(1, Ordering::SeqCst);
        pipeline.worker_busy.store(true, Ordering::SeqCst);
        pipeline.process_task(task).await;
        pipeline.worker_busy.store(false, Ordering::SeqCst);
    }
    log::info!("pipeline worker stopped");
}
