// src/sweeper.rs
use crate::config::Config;
use crate::db::Db;
use crate::error::StoreError;
use crate::persistence::delete_image_file;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info};

/// Starts the background expiry loop. It runs until the runtime shuts down.
pub fn spawn_sweeper(store: Db, config: Arc<Config>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = interval(config.sweep_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick of an interval fires immediately.
        tick.tick().await;
        loop {
            tick.tick().await;
            if let Err(e) = sweep_once(&store, &config, Utc::now()).await {
                error!(error = %e, "expiry sweep failed");
            }
        }
    })
}

/// Removes every record older than the total lifetime, together with its
/// file. Saves the store once, and only if something expired; files are
/// deleted after that save succeeds.
pub async fn sweep_once(store: &Db, config: &Config, now: DateTime<Utc>) -> Result<usize, StoreError> {
    let total = chrono::Duration::from_std(config.total_lifetime())
        .unwrap_or(chrono::Duration::MAX);

    let mut tx = store.begin().await;
    let expired: Vec<String> = tx
        .records
        .iter()
        .filter(|(_, record)| now - record.timestamp > total)
        .map(|(id, _)| id.clone())
        .collect();
    if expired.is_empty() {
        return Ok(0);
    }

    let removed: Vec<(String, String)> = expired
        .into_iter()
        .filter_map(|id| tx.records.remove(&id).map(|record| (id, record.filename)))
        .collect();
    tx.commit().await?;
    for (id, filename) in &removed {
        if delete_image_file(&config.upload_dir, filename).await {
            info!(id = %id, file = %filename, "deleted expired image");
        }
    }
    Ok(removed.len())
}
