//! File outbox: one JSONL file per partition.
//!
//! A relay process (or a human) tails these files; appends take an
//! exclusive file lock so concurrent processes never interleave lines.

use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use fs2::FileExt;
use serde::Serialize;

use super::{Envelope, EventBus};
use crate::error::{MediaError, MediaResult};

pub struct OutboxBus {
    dir: PathBuf,
}

impl OutboxBus {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the JSONL file for a partition
    pub fn partition_path(&self, partition: u32) -> PathBuf {
        self.dir.join(format!("events-p{}.jsonl", partition))
    }

    /// Read back every envelope of a partition, oldest first
    pub fn read_partition(&self, partition: u32) -> MediaResult<Vec<Envelope>> {
        let path = self.partition_path(partition);
        if !path.exists() {
            return Ok(Vec::new());
        }

        let file = std::fs::File::open(&path)?;
        let mut envelopes = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let envelope: Envelope = serde_json::from_str(&line).map_err(|e| {
                MediaError::Repository(format!("Bad outbox line in {}: {}", path.display(), e))
            })?;
            envelopes.push(envelope);
        }
        Ok(envelopes)
    }
}

/// Append one line under an exclusive lock
fn append_line(path: &Path, line: &str) -> MediaResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.lock_exclusive()?;

    writeln!(file, "{}", line)?;
    file.flush()?;
    file.sync_data()?;

    // Lock is released when file is dropped
    Ok(())
}

#[async_trait]
impl EventBus for OutboxBus {
    fn name(&self) -> &str {
        "outbox"
    }

    async fn send(&self, envelope: &Envelope) -> MediaResult<()> {
        let line = to_line(envelope)?;
        let path = self.partition_path(envelope.partition);

        tokio::task::spawn_blocking(move || append_line(&path, &line))
            .await
            .map_err(|e| MediaError::TransientIo(format!("Outbox write task failed: {}", e)))?
    }
}

/// One JSONL record; an unencodable event can never be delivered
fn to_line<T: Serialize>(value: &T) -> MediaResult<String> {
    serde_json::to_string(value).map_err(|e| MediaError::PublishFailed {
        attempts: 1,
        reason: format!("Failed to serialize event: {}", e),
    })
}
