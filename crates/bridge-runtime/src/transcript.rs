//! Append-only, per-conversation transcript logging.
//!
//! Writes are fire-and-forget: a slow or failing disk never delays the
//! chat path. Each conversation gets its own writer task fed by a channel,
//! which serializes that conversation's lines in enqueue order while
//! distinct conversations interleave freely.

use std::{
    collections::HashMap,
    path::PathBuf,
    sync::{Mutex, MutexGuard},
};

use anyhow::{Context, Result};
use bridge_context::ConversationId;
use bridge_core::{format_utc_timestamp, now_utc, sanitize_single_line};
use tokio::{io::AsyncWriteExt, sync::mpsc};

pub struct TranscriptStore {
    base_dir: PathBuf,
    writers: Mutex<HashMap<ConversationId, mpsc::UnboundedSender<String>>>,
}

impl TranscriptStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            writers: Mutex::new(HashMap::new()),
        }
    }

    /// Queues one transcript line. Never blocks and never surfaces errors
    /// to the caller; failed writes are logged and dropped.
    ///
    /// Must be called from within a tokio runtime (the first enqueue for a
    /// conversation spawns its writer task).
    pub fn enqueue(&self, conversation: ConversationId, role: &str, content: &str) {
        let line = format!(
            "{} | {} | {}\n",
            format_utc_timestamp(now_utc()),
            role,
            sanitize_single_line(content),
        );
        if self.writer_for(conversation).send(line).is_err() {
            tracing::warn!(conversation, "transcript writer task is gone; line dropped");
        }
    }

    fn writer_for(&self, conversation: ConversationId) -> mpsc::UnboundedSender<String> {
        let mut writers = lock_unpoisoned(&self.writers);
        writers
            .entry(conversation)
            .or_insert_with(|| {
                let (sender, mut receiver) = mpsc::unbounded_channel::<String>();
                let base_dir = self.base_dir.clone();
                let path = base_dir.join(format!("channel_{conversation}.log"));
                tokio::spawn(async move {
                    while let Some(line) = receiver.recv().await {
                        if let Err(error) = append_line(&base_dir, &path, &line).await {
                            tracing::warn!(%error, conversation, "transcript write failed");
                        }
                    }
                });
                sender
            })
            .clone()
    }
}

async fn append_line(base_dir: &PathBuf, path: &PathBuf, line: &str) -> Result<()> {
    tokio::fs::create_dir_all(base_dir)
        .await
        .with_context(|| format!("failed to create {}", base_dir.display()))?;
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .with_context(|| format!("failed to open {}", path.display()))?;
    file.write_all(line.as_bytes())
        .await
        .with_context(|| format!("failed to append to {}", path.display()))?;
    Ok(())
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
