// src/gallery.rs
use crate::config::Config;
use crate::db::Records;
use crate::server::AppState;
use axum::extract::State;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One record as the gallery page sees it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GalleryImage {
    pub id: String,
    pub filename: String,
    pub comment: String,
    pub timestamp: DateTime<Utc>,
    /// Seconds since upload.
    pub age: f64,
    pub lifetime: u64,
    pub fadeout_duration: u64,
}

/// `GET /api/images`
pub async fn list_images(State(state): State<AppState>) -> Json<Vec<GalleryImage>> {
    let records = state.store.snapshot().await;
    Json(gallery_view(&records, &state.config, Utc::now()))
}

/// Newest first, ties broken by id.
pub fn gallery_view(records: &Records, config: &Config, now: DateTime<Utc>) -> Vec<GalleryImage> {
    let mut images: Vec<GalleryImage> = records
        .iter()
        .map(|(id, record)| GalleryImage {
            id: id.clone(),
            filename: record.filename.clone(),
            comment: record.comment.clone(),
            timestamp: record.timestamp,
            age: (now - record.timestamp).num_microseconds().unwrap_or(i64::MAX) as f64 / 1e6,
            lifetime: config.image_lifetime.as_secs(),
            fadeout_duration: config.fadeout.as_secs(),
        })
        .collect();
    images.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| b.id.cmp(&a.id)));
    images
}
