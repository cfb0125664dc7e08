//! Offline queue for messages published while disconnected.
//!
//! `FileQueue` stores one JSON file per message, named by a UUIDv7 so that
//! lexical file order is enqueue order. The thing flushes the queue after
//! every successful connect and deletes each file only once its publish
//! has been accepted by the transport.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{QueueError, QueueResult};

/// A message waiting for the next connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedMessage {
    pub id: Uuid,
    pub topic: String,
    /// MQTT QoS level (0-2).
    pub qos: u8,
    pub payload: Vec<u8>,
    pub queued_at: DateTime<Utc>,
}

/// Durable FIFO of outbound messages.
#[async_trait]
pub trait OfflineQueue: Send + Sync {
    async fn enqueue(&self, topic: &str, qos: u8, payload: &[u8]) -> QueueResult<QueuedMessage>;

    /// All queued messages, oldest first.
    async fn pending(&self) -> QueueResult<Vec<QueuedMessage>>;

    /// Drop a delivered message. Removing an unknown id is not an error.
    async fn remove(&self, id: Uuid) -> QueueResult<()>;
}

/// Directory-backed [`OfflineQueue`].
#[derive(Debug, Clone)]
pub struct FileQueue {
    dir: PathBuf,
}

impl FileQueue {
    /// The directory is created on first enqueue.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: Uuid) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }
}

fn io_error(context: &str, path: &Path, e: std::io::Error) -> QueueError {
    QueueError::Io(format!("{context} '{}': {e}", path.display()))
}

#[async_trait]
impl OfflineQueue for FileQueue {
    async fn enqueue(&self, topic: &str, qos: u8, payload: &[u8]) -> QueueResult<QueuedMessage> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| io_error("failed to create queue directory", &self.dir, e))?;

        let message = QueuedMessage {
            id: Uuid::now_v7(),
            topic: topic.to_string(),
            qos,
            payload: payload.to_vec(),
            queued_at: Utc::now(),
        };
        let json = serde_json::to_vec(&message)
            .map_err(|e| QueueError::Serialization(e.to_string()))?;

        // Write under a temporary name so a crash never leaves a partial entry.
        let path = self.path_for(message.id);
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| io_error("failed to write", &tmp, e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| io_error("failed to commit", &path, e))?;

        tracing::debug!(id = %message.id, topic, "message queued for later delivery");
        Ok(message)
    }

    async fn pending(&self) -> QueueResult<Vec<QueuedMessage>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error("failed to list", &self.dir, e)),
        };

        let mut paths = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| io_error("failed to list", &self.dir, e))?
        {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                paths.push(path);
            }
        }
        paths.sort();

        let mut messages = Vec::with_capacity(paths.len());
        for path in paths {
            let bytes = tokio::fs::read(&path)
                .await
                .map_err(|e| io_error("failed to read", &path, e))?;
            match serde_json::from_slice::<QueuedMessage>(&bytes) {
                Ok(message) => messages.push(message),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping corrupt queue entry");
                }
            }
        }
        Ok(messages)
    }

    async fn remove(&self, id: Uuid) -> QueueResult<()> {
        let path = self.path_for(id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error("failed to remove", &path, e)),
        }
    }
}
