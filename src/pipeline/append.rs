//! Long-lived per-run file pair used by poll-append mode.
//!
//! `<tag>.json` holds every event of the run as one JSON array and is
//! rewritten in full on each append; `<tag>.txt` gets one line per event.

use std::io;
use std::path::{Path, PathBuf};

use log::{info, warn};
use tokio::io::AsyncWriteExt;

use super::flusher::encode_batch;
use super::StorageError;
use crate::models::AdvertisementEvent;

#[derive(Debug, Clone)]
pub struct AppendStore {
    json_path: PathBuf,
    txt_path: PathBuf,
}

impl AppendStore {
    pub fn new(dir: &Path, tag: &str) -> Self {
        AppendStore {
            json_path: dir.join(format!("{}.json", tag)),
            txt_path: dir.join(format!("{}.txt", tag)),
        }
    }

    pub fn json_path(&self) -> &Path {
        &self.json_path
    }

    pub fn txt_path(&self) -> &Path {
        &self.txt_path
    }

    /// Truncate both files to an empty run
    pub async fn clear(&self) -> Result<(), StorageError> {
        tokio::fs::write(&self.json_path, b"[]").await?;
        info!("Old data cleared from {}.", self.json_path.display());
        tokio::fs::write(&self.txt_path, b"").await?;
        info!("Old data cleared from {}.", self.txt_path.display());
        Ok(())
    }

    /// Events currently recorded in the JSON document
    ///
    /// A missing or unreadable document counts as empty.
    pub async fn load(&self) -> Result<Vec<AdvertisementEvent>, StorageError> {
        let bytes = match tokio::fs::read(&self.json_path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_slice(&bytes) {
            Ok(events) => Ok(events),
            Err(e) => {
                warn!(
                    "Unreadable data in {} ({}), starting from an empty list",
                    self.json_path.display(),
                    e
                );
                Ok(Vec::new())
            }
        }
    }

    /// Append `batch` to both files
    pub async fn append(&self, batch: &[AdvertisementEvent]) -> Result<(), StorageError> {
        let mut all = self.load().await?;
        all.extend_from_slice(batch);

        // Rewrite through a sibling file so a crash never leaves half a document
        let body = encode_batch(&all)?;
        let staging = self.json_path.with_extension("json.tmp");
        tokio::fs::write(&staging, &body).await?;
        tokio::fs::rename(&staging, &self.json_path).await?;
        info!("Data saved to {}.", self.json_path.display());

        let mut lines = String::new();
        for event in batch {
            lines.push_str(&event.to_text_line());
            lines.push('\n');
        }
        let mut txt = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.txt_path)
            .await?;
        txt.write_all(lines.as_bytes()).await?;
        txt.flush().await?;
        info!("Data saved to {}.", self.txt_path.display());

        Ok(())
    }
}
