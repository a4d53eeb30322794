use anyhow::Context;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use uuid::Uuid;

const OBJECTS_DIR: &str = "evidence/objects";

#[derive(Debug, Clone)]
pub struct UploadTarget {
    pub storage_id: String,
    pub path: PathBuf,
}

// Storage ids are daemon-minted UUIDs. Reject anything else before it can be
// joined onto a filesystem path.
pub fn parse_storage_id(raw: &str) -> Option<String> {
    Uuid::parse_str(raw.trim()).ok().map(|u| u.to_string())
}

pub fn objects_dir(workspace: &Path) -> PathBuf {
    workspace.join(OBJECTS_DIR)
}

pub fn object_path(workspace: &Path, storage_id: &str) -> PathBuf {
    objects_dir(workspace).join(storage_id)
}

pub fn allocate_upload_target(workspace: &Path) -> anyhow::Result<UploadTarget> {
    let dir = objects_dir(workspace);
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create evidence store {}", dir.to_string_lossy()))?;
    let storage_id = Uuid::new_v4().to_string();
    let path = dir.join(&storage_id);
    Ok(UploadTarget { storage_id, path })
}

/// Size of the staged object in bytes, or None when nothing was uploaded.
pub fn stat_object(workspace: &Path, storage_id: &str) -> anyhow::Result<Option<u64>> {
    let path = object_path(workspace, storage_id);
    match std::fs::metadata(&path) {
        Ok(meta) if meta.is_file() => Ok(Some(meta.len())),
        Ok(_) => Ok(None),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => {
            Err(e).with_context(|| format!("failed to stat object {}", path.to_string_lossy()))
        }
    }
}

pub fn checksum_object(workspace: &Path, storage_id: &str) -> anyhow::Result<(u64, String)> {
    let path = object_path(workspace, storage_id);
    let mut file = File::open(&path)
        .with_context(|| format!("failed to open object {}", path.to_string_lossy()))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    let mut total: u64 = 0;
    loop {
        let read = file
            .read(&mut buf)
            .with_context(|| format!("failed to read object {}", path.to_string_lossy()))?;
        if read == 0 {
            break;
        }
        total += read as u64;
        hasher.update(&buf[..read]);
    }
    Ok((total, format!("{:x}", hasher.finalize())))
}

/// Remove the object file. An already-absent object is treated as deleted, so a
/// repeated delete stays a no-op instead of failing the whole operation.
pub fn delete_object(workspace: &Path, storage_id: &str) -> anyhow::Result<bool> {
    let path = object_path(workspace, storage_id);
    match std::fs::remove_file(&path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => {
            Err(e).with_context(|| format!("failed to delete object {}", path.to_string_lossy()))
        }
    }
}
