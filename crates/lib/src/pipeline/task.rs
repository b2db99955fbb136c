//! Task lifecycle types: the state machine and the observable snapshot.

use crate::message::{InboundMessage, MessageKind};
use serde::Serialize;
use std::path::PathBuf;

/// Task lifecycle. Happy path runs top to bottom; the failure states are
/// terminal and a failed task is never retried (the webhook caller was
/// already acknowledged and remote uploads are not idempotent).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    Downloading,
    ProcessingLocal,
    Uploading,
    ProcessingRemote,
    Completed,
    DownloadFailed,
    StorageFailed,
    UploadFailed,
    RemoteProcessFailed,
    Timeout,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(
            self,
            TaskStatus::Queued
                | TaskStatus::Downloading
                | TaskStatus::ProcessingLocal
                | TaskStatus::Uploading
                | TaskStatus::ProcessingRemote
        )
    }
}

/// One unit of pipeline work. Owned exclusively by the worker once queued;
/// dropped after its terminal snapshot update.
#[derive(Debug)]
pub struct ProcessingTask {
    pub id: String,
    pub message: InboundMessage,
}

impl ProcessingTask {
    pub fn new(message: InboundMessage) -> Self {
        Self {
            id: format!("task-{}", uuid::Uuid::new_v4()),
            message,
        }
    }
}

/// What the status endpoint sees for one task. Kept in a bounded recent-task
/// ring after the task itself is gone.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSnapshot {
    pub id: String,
    pub message_id: String,
    pub sender: String,
    pub kind: MessageKind,
    pub status: TaskStatus,
    /// Every status the task has passed through, in order.
    pub history: Vec<TaskStatus>,
    pub has_media: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TaskSnapshot {
    pub fn new(task: &ProcessingTask) -> Self {
        Self {
            id: task.id.clone(),
            message_id: task.message.message_id.clone(),
            sender: task.message.sender.clone(),
            kind: task.message.kind,
            status: TaskStatus::Queued,
            history: vec![TaskStatus::Queued],
            has_media: false,
            file_path: None,
            document_id: None,
            error: None,
        }
    }
}
