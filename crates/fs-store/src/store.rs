//! Directory-backed store with chunked-upload assembly.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chunkdav_transfer::{
    ASSEMBLED_OBJECT, ObjectStat, TOTAL_LENGTH_HEADER, Transport, TransportFuture,
};
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::error::StoreError;

/// A [`Transport`] over a local directory tree.
///
/// Slash paths are resolved under `root`. Moving `<staging>/.file` assembles
/// the numerically named chunks of `<staging>` in offset order, checks them
/// against the `OC-Total-Length` header when it is set, and removes the
/// staging collection.
#[derive(Debug)]
pub struct FsStore {
    root: PathBuf,
    headers: Mutex<HashMap<String, String>>,
}

impl FsStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            headers: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Current value of a protocol header (case-insensitive).
    pub fn header(&self, name: &str) -> Option<String> {
        self.headers().get(&name.to_ascii_lowercase()).cloned()
    }

    /// Maps a slash path to a filesystem path under the root.
    pub fn resolve(&self, path: &str) -> Result<PathBuf, StoreError> {
        let mut out = self.root.clone();
        for segment in path.split('/') {
            match segment {
                "" | "." => {}
                ".." => return Err(StoreError::InvalidPath(path.to_string())),
                s if s.contains('\\') => return Err(StoreError::InvalidPath(path.to_string())),
                s => out.push(s),
            }
        }
        Ok(out)
    }

    pub async fn mkcol(&self, path: &str, recursive: bool) -> Result<(), StoreError> {
        let target = self.resolve(path)?;
        if recursive {
            return tokio::fs::create_dir_all(&target)
                .await
                .map_err(|e| StoreError::io(path, e));
        }

        if tokio::fs::try_exists(&target).await.unwrap_or(false) {
            return Err(StoreError::AlreadyExists(path.to_string()));
        }
        self.require_parent(path, &target).await?;
        tokio::fs::create_dir(&target)
            .await
            .map_err(|e| StoreError::io(path, e))
    }

    pub async fn put(&self, path: &str, data: &[u8]) -> Result<(), StoreError> {
        let target = self.resolve(path)?;
        self.require_parent(path, &target).await?;
        tokio::fs::write(&target, data)
            .await
            .map_err(|e| StoreError::io(path, e))
    }

    pub async fn stat(&self, path: &str) -> Result<Option<ObjectStat>, StoreError> {
        let target = self.resolve(path)?;
        match tokio::fs::metadata(&target).await {
            Ok(meta) => Ok(Some(ObjectStat {
                size: if meta.is_dir() { 0 } else { meta.len() },
                is_dir: meta.is_dir(),
            })),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::io(path, e)),
        }
    }

    /// Moves `src` to `dst`, or assembles chunks when `src` names the
    /// assembled object of a staging collection.
    pub async fn mv(&self, src: &str, dst: &str, overwrite: bool) -> Result<(), StoreError> {
        let dst_path = self.resolve(dst)?;
        self.require_parent(dst, &dst_path).await?;
        match tokio::fs::metadata(&dst_path).await {
            Ok(meta) if meta.is_dir() || !overwrite => {
                return Err(StoreError::DestinationExists(dst.to_string()));
            }
            _ => {}
        }

        if let Some(staging) = src.strip_suffix(ASSEMBLED_OBJECT)
            && (staging.is_empty() || staging.ends_with('/'))
        {
            return self.assemble(staging.trim_end_matches('/'), dst, &dst_path).await;
        }

        let src_path = self.resolve(src)?;
        tokio::fs::rename(&src_path, &dst_path)
            .await
            .map_err(|e| StoreError::io(src, e))
    }

    pub async fn delete(&self, path: &str) -> Result<(), StoreError> {
        let target = self.resolve(path)?;
        let result = match tokio::fs::metadata(&target).await {
            Ok(meta) if meta.is_dir() => tokio::fs::remove_dir_all(&target).await,
            Ok(_) => tokio::fs::remove_file(&target).await,
            Err(e) => Err(e),
        };
        match result {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(StoreError::io(path, e)),
            _ => Ok(()),
        }
    }

    async fn assemble(&self, staging: &str, dst: &str, dst_path: &Path) -> Result<(), StoreError> {
        let staging_path = self.resolve(staging)?;
        let chunks = list_chunks(staging, &staging_path).await?;

        let mut expected = 0u64;
        for (offset, len, _) in &chunks {
            if *offset != expected {
                return Err(StoreError::ChunkGap {
                    dir: staging.to_string(),
                    expected,
                    found: *offset,
                });
            }
            expected += len;
        }

        if let Some(value) = self.header(TOTAL_LENGTH_HEADER) {
            let declared = value.parse::<u64>().map_err(|_| StoreError::BadHeader {
                header: TOTAL_LENGTH_HEADER,
                value: value.clone(),
            })?;
            if declared != expected {
                return Err(StoreError::LengthMismatch {
                    declared,
                    actual: expected,
                });
            }
        }

        let tmp = assembling_path(dst_path);
        if let Err(e) = write_assembled(&tmp, &chunks).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(StoreError::io(dst, e));
        }
        tokio::fs::rename(&tmp, dst_path)
            .await
            .map_err(|e| StoreError::io(dst, e))?;

        if let Err(e) = tokio::fs::remove_dir_all(&staging_path).await {
            debug!(path = %staging, error = %e, "staging removal failed");
        }
        debug!(dst = %dst, size = expected, chunks = chunks.len(), "chunks assembled");
        Ok(())
    }

    async fn require_parent(&self, path: &str, target: &Path) -> Result<(), StoreError> {
        let exists = match target.parent() {
            Some(parent) => tokio::fs::metadata(parent).await.is_ok_and(|m| m.is_dir()),
            None => true,
        };
        if exists {
            Ok(())
        } else {
            Err(StoreError::ParentMissing(path.to_string()))
        }
    }

    fn headers(&self) -> MutexGuard<'_, HashMap<String, String>> {
        self.headers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Chunk files of a staging directory as `(offset, len, path)`, by offset.
/// Entries whose name is not a decimal offset are ignored.
async fn list_chunks(staging: &str, dir: &Path) -> Result<Vec<(u64, u64, PathBuf)>, StoreError> {
    let mut rd = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| StoreError::io(staging, e))?;

    let mut chunks = Vec::new();
    while let Some(entry) = rd.next_entry().await.map_err(|e| StoreError::io(staging, e))? {
        let Ok(offset) = entry.file_name().to_string_lossy().parse::<u64>() else {
            continue;
        };
        let meta = entry
            .metadata()
            .await
            .map_err(|e| StoreError::io(staging, e))?;
        if meta.is_file() {
            chunks.push((offset, meta.len(), entry.path()));
        }
    }
    chunks.sort_by_key(|c| c.0);
    Ok(chunks)
}

async fn write_assembled(tmp: &Path, chunks: &[(u64, u64, PathBuf)]) -> std::io::Result<()> {
    let mut out = tokio::fs::File::create(tmp).await?;
    for (_, _, path) in chunks {
        let mut chunk = tokio::fs::File::open(path).await?;
        tokio::io::copy(&mut chunk, &mut out).await?;
    }
    out.flush().await?;
    out.sync_all().await
}

fn assembling_path(dst: &Path) -> PathBuf {
    let name = dst
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    dst.with_file_name(format!(".{name}.assembling"))
}

impl Transport for FsStore {
    fn create_collection<'a>(&'a self, path: &'a str, recursive: bool) -> TransportFuture<'a, ()> {
        Box::pin(async move { Ok(self.mkcol(path, recursive).await?) })
    }

    fn write_object<'a>(&'a self, path: &'a str, data: &'a [u8]) -> TransportFuture<'a, ()> {
        Box::pin(async move { Ok(self.put(path, data).await?) })
    }

    fn stat_object<'a>(&'a self, path: &'a str) -> TransportFuture<'a, Option<ObjectStat>> {
        Box::pin(async move { Ok(self.stat(path).await?) })
    }

    fn rename_object<'a>(
        &'a self,
        src: &'a str,
        dst: &'a str,
        overwrite: bool,
    ) -> TransportFuture<'a, ()> {
        Box::pin(async move { Ok(self.mv(src, dst, overwrite).await?) })
    }

    fn remove_all<'a>(&'a self, path: &'a str) -> TransportFuture<'a, ()> {
        Box::pin(async move { Ok(self.delete(path).await?) })
    }

    fn set_protocol_header(&self, name: &str, value: &str) {
        let mut headers = self.headers();
        let key = name.to_ascii_lowercase();
        if value.is_empty() {
            headers.remove(&key);
        } else {
            headers.insert(key, value.to_string());
        }
    }
}
