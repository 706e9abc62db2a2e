//! File-backed cover cache and transfer files using Tokio

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    CoverCache, ExportSink, ImportSource, MediaKind,
};
use bytes::Bytes;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Covers stored one file per item under a cache directory.
///
/// File names are the SHA-256 of the internal id, so ids never reach the
/// filesystem verbatim.
pub struct FsCoverCache {
    dir: PathBuf,
}

impl FsCoverCache {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
        }
    }

    pub fn path_for(&self, item_id: &str) -> PathBuf {
        let digest = Sha256::digest(item_id.as_bytes());
        self.dir.join(format!("{:x}.img", digest))
    }
}

#[async_trait]
impl CoverCache for FsCoverCache {
    async fn get_cached(&self, item_id: &str) -> Result<Option<Bytes>> {
        match fs::read(self.path_for(item_id)).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(BridgeError::Io(e)),
        }
    }

    async fn put(&self, item_id: &str, data: Bytes) -> Result<()> {
        fs::create_dir_all(&self.dir).await?;

        // Write then rename so readers never see a partial cover.
        let path = self.path_for(item_id);
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, &data).await?;
        fs::rename(&tmp, &path).await?;

        debug!(item_id, bytes = data.len(), "Cover cached");
        Ok(())
    }

    async fn invalidate(&self, item_id: &str) -> Result<()> {
        match fs::remove_file(self.path_for(item_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(BridgeError::Io(e)),
        }
    }
}

fn transfer_file(dir: &Path, kind: MediaKind) -> PathBuf {
    dir.join(format!("{}.json", kind.as_str()))
}

/// Reads `{dir}/{kind}.json`.
///
/// The file may hold a JSON array of records or one record per line.
pub struct JsonFileImportSource {
    dir: PathBuf,
}

impl JsonFileImportSource {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
        }
    }
}

/// Parse an import file body: a JSON array, or newline-delimited records.
pub fn parse_records(text: &str) -> Result<Vec<Value>> {
    let trimmed = text.trim_start();
    if trimmed.starts_with('[') {
        return Ok(serde_json::from_str(trimmed)?);
    }

    trimmed
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| serde_json::from_str(line).map_err(BridgeError::from))
        .collect()
}

#[async_trait]
impl ImportSource for JsonFileImportSource {
    async fn read_records(&self, kind: MediaKind) -> Result<Vec<Value>> {
        let path = transfer_file(&self.dir, kind);
        let text = match fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(BridgeError::SourceUnavailable(path.display().to_string()));
            }
            Err(e) => return Err(BridgeError::Io(e)),
        };

        let records = parse_records(&text)?;
        debug!(path = ?path, records = records.len(), "Read import file");
        Ok(records)
    }
}

/// Writes `{dir}/{kind}.json`, one record per line.
///
/// Each append is flushed before it returns, so a resumed export can keep
/// appending to the same file.
pub struct JsonFileExportSink {
    dir: PathBuf,
    open: Mutex<HashMap<MediaKind, File>>,
}

impl JsonFileExportSink {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
            open: Mutex::new(HashMap::new()),
        }
    }

    pub fn path_for(&self, kind: MediaKind) -> PathBuf {
        transfer_file(&self.dir, kind)
    }
}

#[async_trait]
impl ExportSink for JsonFileExportSink {
    async fn begin(&self, kind: MediaKind, truncate: bool) -> Result<()> {
        fs::create_dir_all(&self.dir).await?;

        let mut options = OpenOptions::new();
        options.create(true);
        if truncate {
            options.write(true).truncate(true);
        } else {
            options.append(true);
        }
        let file = options.open(self.path_for(kind)).await?;

        if self.open.lock().await.insert(kind, file).is_some() {
            warn!(kind = %kind, "Export file reopened before finish");
        }
        debug!(kind = %kind, truncate, "Export file opened");
        Ok(())
    }

    async fn append(&self, kind: MediaKind, record: Value) -> Result<()> {
        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');

        let mut open = self.open.lock().await;
        let file = open.get_mut(&kind).ok_or_else(|| {
            BridgeError::OperationFailed(format!("Export for {} was not started", kind))
        })?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }

    async fn finish(&self, kind: MediaKind) -> Result<()> {
        if let Some(file) = self.open.lock().await.remove(&kind) {
            file.sync_all().await?;
            debug!(kind = %kind, "Export file closed");
        }
        Ok(())
    }
}
