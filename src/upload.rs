// src/upload.rs
use crate::config::{ALLOWED_EXTENSIONS, MAX_COMMENT_CHARS};
use crate::db::{oldest_id, ImageRecord, Records};
use crate::error::UploadError;
use crate::persistence::delete_image_file;
use crate::server::AppState;
use axum::body::Bytes;
use axum::extract::{Multipart, State};
use axum::response::Redirect;
use chrono::{DateTime, Utc};
use std::io::ErrorKind;
use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::info;

/// A file pulled out of the `image` form field.
#[derive(Debug)]
pub struct ImageUpload {
    pub original_name: String,
    pub bytes: Bytes,
}

/// `POST /upload`
pub async fn upload_image(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Redirect, UploadError> {
    let mut image = None;
    let mut comment = String::new();
    while let Some(field) = multipart.next_field().await? {
        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            // A part without a filename is a plain form value, not a file.
            Some("image") => {
                let Some(original_name) = field.file_name().map(str::to_owned) else {
                    continue;
                };
                let bytes = field.bytes().await?;
                image = Some(ImageUpload {
                    original_name,
                    bytes,
                });
            }
            Some("comment") => comment = field.text().await?,
            _ => {}
        }
    }

    let (image, extension) = validate(image, &comment)?;
    store_image(&state, &extension, &image.bytes, comment).await?;
    Ok(Redirect::to("/gallery"))
}

/// Checks an upload in the order clients see the errors and returns it with
/// its normalized extension.
pub fn validate(
    image: Option<ImageUpload>,
    comment: &str,
) -> Result<(ImageUpload, String), UploadError> {
    let image = image.ok_or(UploadError::MissingImagePart)?;
    if image.original_name.is_empty() {
        return Err(UploadError::NoSelectedFile);
    }
    if comment.chars().count() > MAX_COMMENT_CHARS {
        return Err(UploadError::CommentTooLong);
    }
    let extension = allowed_extension(&image.original_name).ok_or(UploadError::InvalidFileType)?;
    Ok((image, extension))
}

/// Lower-cased text after the last `.`, if it is an accepted image type.
pub fn allowed_extension(filename: &str) -> Option<String> {
    let (_, ext) = filename.rsplit_once('.')?;
    let ext = ext.to_ascii_lowercase();
    ALLOWED_EXTENSIONS.contains(&ext.as_str()).then_some(ext)
}

/// Filesystem-safe id for an instant, e.g. `2026-10-19T12-30-45-123456`.
pub fn image_id(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%dT%H-%M-%S-%6f").to_string()
}

static LAST_ISSUED_MICROS: AtomicI64 = AtomicI64::new(i64::MIN);

/// Current instant, strictly later than any previously issued one so ids
/// never repeat within the process.
fn unique_now() -> DateTime<Utc> {
    let now = Utc::now();
    let micros = now.timestamp_micros();
    let prev = LAST_ISSUED_MICROS
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
            Some(micros.max(last.saturating_add(1)))
        })
        .unwrap_or(micros);
    let issued = micros.max(prev.saturating_add(1));
    DateTime::from_timestamp_micros(issued).unwrap_or(now)
}

/// Writes the image, then records it, evicting the oldest record if the
/// store is full. Evicted files are only deleted once the store is saved;
/// if the save fails the new file is removed and nothing else changes.
pub async fn store_image(
    state: &AppState,
    extension: &str,
    bytes: &[u8],
    comment: String,
) -> Result<String, UploadError> {
    let upload_dir = &state.config.upload_dir;
    let (id, filename, timestamp) = write_new_file(upload_dir, extension, bytes).await?;

    let mut tx = state.store.begin().await;
    let evicted = evict_oldest(&mut tx.records, state.config.max_images);
    tx.records.insert(
        id.clone(),
        ImageRecord {
            filename: filename.clone(),
            comment,
            timestamp,
        },
    );
    if let Err(e) = tx.commit().await {
        delete_image_file(upload_dir, &filename).await;
        return Err(e.into());
    }
    for (old_id, record) in evicted {
        delete_image_file(upload_dir, &record.filename).await;
        info!(id = %old_id, file = %record.filename, "evicted oldest image to make space");
    }
    drop(tx);

    info!(id = %id, file = %filename, "stored image");
    Ok(id)
}

/// Creates `{id}.{ext}` without ever replacing an existing file.
async fn write_new_file(
    upload_dir: &Path,
    extension: &str,
    bytes: &[u8],
) -> Result<(String, String, DateTime<Utc>), UploadError> {
    loop {
        let timestamp = unique_now();
        let id = image_id(timestamp);
        let filename = format!("{id}.{extension}");
        let path = upload_dir.join(&filename);
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e.into()),
        };
        let written = async {
            file.write_all(bytes).await?;
            file.flush().await
        }
        .await;
        if let Err(e) = written {
            drop(file);
            let _ = tokio::fs::remove_file(&path).await;
            return Err(e.into());
        }
        return Ok((id, filename, timestamp));
    }
}

/// Takes the oldest records out until there is room for one more and
/// returns them. Their files are left for the caller to delete after commit.
pub fn evict_oldest(records: &mut Records, max_images: usize) -> Vec<(String, ImageRecord)> {
    let mut evicted = Vec::new();
    while records.len() >= max_images {
        let Some(id) = oldest_id(records) else { break };
        if let Some(record) = records.remove(&id) {
            evicted.push((id, record));
        }
    }
    evicted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::db::Store;
    use chrono::{Duration, TimeZone};
    use std::collections::BTreeSet;
    use std::sync::Arc;

    fn upload(name: &str) -> ImageUpload {
        ImageUpload {
            original_name: name.to_string(),
            bytes: Bytes::from_static(b"data"),
        }
    }

    #[test]
    fn extension_check() {
        assert_eq!(allowed_extension("cat.PNG").as_deref(), Some("png"));
        assert_eq!(allowed_extension("a.b.jpeg").as_deref(), Some("jpeg"));
        assert_eq!(allowed_extension("x.webp").as_deref(), Some("webp"));
        assert_eq!(allowed_extension("anim.gif"), None);
        assert_eq!(allowed_extension("png"), None);
        assert_eq!(allowed_extension("trailing."), None);
    }

    #[test]
    fn validation_order() {
        assert!(matches!(validate(None, ""), Err(UploadError::MissingImagePart)));
        assert!(matches!(validate(Some(upload("")), ""), Err(UploadError::NoSelectedFile)));

        let long = "x".repeat(101);
        assert!(matches!(
            validate(Some(upload("a.gif")), &long),
            Err(UploadError::CommentTooLong)
        ));
        assert!(matches!(
            validate(Some(upload("a.gif")), "ok"),
            Err(UploadError::InvalidFileType)
        ));
        let (image, extension) = validate(Some(upload("a.JPG")), &"é".repeat(100)).unwrap();
        assert_eq!(extension, "jpg");
        assert_eq!(image.original_name, "a.JPG");
    }

    #[test]
    fn id_is_filesystem_safe() {
        let at = Utc.with_ymd_and_hms(2026, 10, 19, 12, 30, 45).unwrap()
            + Duration::microseconds(123_456);
        let id = image_id(at);
        assert_eq!(id, "2026-10-19T12-30-45-123456");
        assert!(!id.contains(':') && !id.contains('.'));
    }

    #[test]
    fn issued_instants_strictly_increase() {
        let ids: Vec<String> = (0..1000).map(|_| image_id(unique_now())).collect();
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn eviction_takes_single_oldest() {
        let base = Utc::now();
        let mut records = Records::new();
        for i in 0..3 {
            records.insert(
                i.to_string(),
                ImageRecord {
                    filename: format!("{i}.png"),
                    comment: String::new(),
                    timestamp: base + Duration::seconds(i),
                },
            );
        }

        assert!(evict_oldest(&mut records, 4).is_empty());
        let evicted = evict_oldest(&mut records, 3);
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].0, "0");
        assert_eq!(evicted[0].1.filename, "0.png");
        assert_eq!(records.len(), 2);
    }

    /// Fills the store with `count` records, each with its file on disk.
    async fn full_state(count: usize) -> (tempfile::TempDir, AppState) {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::new(dir.path().join("uploads"), dir.path().join("data.json"));
        std::fs::create_dir_all(&config.upload_dir).unwrap();
        let store = Store::shared(&config.data_file);

        let base = Utc::now() - Duration::seconds(5);
        let mut tx = store.begin().await;
        for i in 0..count {
            let filename = format!("seed{i}.png");
            std::fs::write(config.upload_dir.join(&filename), b"x").unwrap();
            tx.records.insert(
                format!("seed{i}"),
                ImageRecord {
                    filename,
                    comment: String::new(),
                    timestamp: base + Duration::milliseconds(i as i64),
                },
            );
        }
        tx.commit().await.unwrap();
        drop(tx);

        let state = AppState {
            store,
            config: Arc::new(config),
        };
        (dir, state)
    }

    fn files_on_disk(state: &AppState) -> BTreeSet<String> {
        std::fs::read_dir(&state.config.upload_dir)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect()
    }

    async fn referenced_files(state: &AppState) -> BTreeSet<String> {
        state
            .store
            .snapshot()
            .await
            .values()
            .map(|r| r.filename.clone())
            .collect()
    }

    #[tokio::test]
    async fn full_store_evicts_oldest_record_and_file() {
        let (_dir, state) = full_state(10).await;

        let id = store_image(&state, "png", b"new", "hi".to_string()).await.unwrap();

        let records = state.store.snapshot().await;
        assert_eq!(records.len(), 10);
        assert!(!records.contains_key("seed0"));
        assert!(records.contains_key(&id));
        assert!(!state.config.upload_dir.join("seed0.png").exists());
        assert_eq!(referenced_files(&state).await, files_on_disk(&state));
    }

    #[tokio::test]
    async fn failed_save_keeps_records_and_files_together() {
        let (_dir, state) = full_state(10).await;
        // A directory where the temporary store file goes makes the save fail.
        let mut tmp = state.config.data_file.clone().into_os_string();
        tmp.push(".tmp");
        std::fs::create_dir(&tmp).unwrap();

        let result = store_image(&state, "png", b"new", "hi".to_string()).await;
        assert!(matches!(result, Err(UploadError::Store(_))));

        let records = state.store.snapshot().await;
        assert_eq!(records.len(), 10);
        assert!(records.contains_key("seed0"));
        assert!(state.config.upload_dir.join("seed0.png").exists());
        assert_eq!(referenced_files(&state).await, files_on_disk(&state));
    }
}
