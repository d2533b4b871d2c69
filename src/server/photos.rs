//! # Photo Store
//!
//! Persists captured images as `photo_<step>_<timestamp>.jpg` in the upload
//! directory, which doubles as the reconstruction input. Files are created
//! with `create_new`, so an existing photo is never overwritten; repeated
//! saves of the same step land in distinct files.

use bytes::Bytes;
use chrono::Utc;
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use log::{info, warn};
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;

use crate::common::error::{CoordError, CoordResult};

/// Image data in either of the shapes it reaches the coordinator:
/// a buffer relayed from the capture device, or a streamed upload.
pub enum PhotoPayload<'a> {
    Buffer(Bytes),
    Stream(BoxStream<'a, io::Result<Bytes>>),
}

impl<'a> PhotoPayload<'a> {
    pub fn stream<S>(stream: S) -> Self
    where
        S: Stream<Item = io::Result<Bytes>> + Send + 'a,
    {
        PhotoPayload::Stream(stream.boxed())
    }
}

impl From<Bytes> for PhotoPayload<'_> {
    fn from(bytes: Bytes) -> Self {
        PhotoPayload::Buffer(bytes)
    }
}

impl From<Vec<u8>> for PhotoPayload<'_> {
    fn from(bytes: Vec<u8>) -> Self {
        PhotoPayload::Buffer(Bytes::from(bytes))
    }
}

const MAX_NAME_ATTEMPTS: u32 = 1000;

#[derive(Debug, Clone)]
pub struct PhotoStore {
    dir: PathBuf,
}

impl PhotoStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write `payload` for `step` and return the stored file name.
    ///
    /// # Errors
    /// - `Storage` if the write fails or the file is not on disk with the
    ///   expected size afterwards. A partially written file is removed.
    pub async fn save(&self, step: i64, payload: PhotoPayload<'_>) -> CoordResult<String> {
        fs::create_dir_all(&self.dir).await?;
        let (name, file) = self.create_unique(step).await?;
        let path = self.dir.join(&name);

        let written = match write_payload(file, payload).await {
            Ok(written) => written,
            Err(e) => {
                let _ = fs::remove_file(&path).await;
                return Err(CoordError::Storage(format!("Failed to write {}: {}", name, e)));
            }
        };

        let metadata = fs::metadata(&path).await.map_err(|e| {
            CoordError::Storage(format!("{} missing after write: {}", name, e))
        })?;
        if !metadata.is_file() || metadata.len() != written {
            return Err(CoordError::Storage(format!(
                "{} has {} bytes on disk, expected {}",
                name,
                metadata.len(),
                written
            )));
        }

        info!("📸 Stored {} ({} bytes)", name, written);
        Ok(name)
    }

    async fn create_unique(&self, step: i64) -> CoordResult<(String, File)> {
        let base = format!("photo_{}_{}", step, Utc::now().timestamp_micros());

        for attempt in 0..MAX_NAME_ATTEMPTS {
            let name = if attempt == 0 {
                format!("{}.jpg", base)
            } else {
                format!("{}_{}.jpg", base, attempt)
            };

            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(self.dir.join(&name))
                .await
            {
                Ok(file) => return Ok((name, file)),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    warn!("📸 {} already exists, picking another name", name);
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(CoordError::Storage(format!(
            "No free file name for {} after {} attempts",
            base, MAX_NAME_ATTEMPTS
        )))
    }
}

async fn write_payload(mut file: File, payload: PhotoPayload<'_>) -> io::Result<u64> {
    let mut written = 0u64;

    match payload {
        PhotoPayload::Buffer(bytes) => {
            file.write_all(&bytes).await?;
            written += bytes.len() as u64;
        }
        PhotoPayload::Stream(mut stream) => {
            while let Some(chunk) = stream.next().await {
                let chunk = chunk?;
                file.write_all(&chunk).await?;
                written += chunk.len() as u64;
            }
        }
    }

    file.flush().await?;
    file.sync_all().await?;
    Ok(written)
}
