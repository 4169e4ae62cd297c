// src/persistence.rs
use crate::config::Config;
use crate::db::{Records, Store};
use crate::error::StoreError;
use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{info, warn};

/// Reads the store file. A missing or malformed file yields an empty store.
pub async fn load_records(path: &Path) -> Records {
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Records::new(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "unreadable store, starting empty");
            return Records::new();
        }
    };
    match serde_json::from_slice(&bytes) {
        Ok(records) => records,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "corrupt store, starting empty");
            Records::new()
        }
    }
}

/// Writes the whole store next to its target, then renames it into place.
pub async fn save_records(path: &Path, records: &Records) -> Result<(), StoreError> {
    let json = serde_json::to_vec_pretty(records)?;
    let tmp = temp_path(path);
    if let Err(source) = fs::write(&tmp, &json).await {
        return Err(StoreError::Write { path: tmp, source });
    }
    if let Err(source) = fs::rename(&tmp, path).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(StoreError::Write {
            path: path.to_path_buf(),
            source,
        });
    }
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Removes an image file. Failures are logged and otherwise ignored.
pub async fn delete_image_file(upload_dir: &Path, filename: &str) -> bool {
    let path = upload_dir.join(filename);
    match fs::remove_file(&path).await {
        Ok(()) => true,
        Err(e) => {
            warn!(file = %path.display(), error = %e, "error deleting image file");
            false
        }
    }
}

/// Brings the store and the upload directory back in line at startup:
/// records without a file are dropped and files without a record deleted.
pub async fn restore_state(store: &Store, config: &Config) -> Result<(), StoreError> {
    fs::create_dir_all(&config.upload_dir).await?;

    let mut tx = store.begin().await;
    let before = tx.records.len();
    let mut kept = Records::new();
    for (id, record) in std::mem::take(&mut tx.records) {
        if fs::try_exists(config.upload_dir.join(&record.filename)).await? {
            kept.insert(id, record);
        } else {
            warn!(id = %id, file = %record.filename, "dropping record with missing file");
        }
    }
    tx.records = kept;

    let referenced: HashSet<&str> = tx.records.values().map(|r| r.filename.as_str()).collect();
    let mut entries = fs::read_dir(&config.upload_dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_file() {
            continue;
        }
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if !referenced.contains(name.as_ref()) {
            info!(file = %name, "removing orphaned image");
            delete_image_file(&config.upload_dir, &name).await;
        }
    }

    let remaining = tx.records.len();
    if remaining < before {
        tx.commit().await?;
    }
    info!(images = remaining, dropped = before - remaining, "state restored");
    Ok(())
}
