//! Background garbage collection.
//!
//! Two independent, idempotent sweeps:
//! - the orphan sweep deletes assets no build references and nothing holds
//! - the empty directory sweep collapses directories emptied by deletions
//!
//! Both take the write side of the asset gate, so they never interleave with
//! an upload between promotion and registration.

use crate::error::ApiResult;
use crate::state::AppState;
use appdistrib_core::AssetKey;
use appdistrib_metadata::models::AssetRow;
use appdistrib_metadata::repos::AssetRepo;
use serde::Serialize;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::instrument;

/// Counters of one sweep run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct GcStats {
    pub items_processed: u64,
    pub items_deleted: u64,
    pub errors: u64,
}

/// Reclaim up to `batch` orphan assets: the stored blob and aliases first,
/// then the row. Per-asset failures are counted and do not stop the batch.
#[instrument(skip(state))]
pub async fn sweep_orphan_assets(state: &AppState, batch: u32) -> ApiResult<GcStats> {
    let mut stats = GcStats::default();
    let candidates = state.metadata.find_orphan_assets(batch).await?;

    for asset in candidates {
        stats.items_processed += 1;
        let _gate = state.asset_gate.write().await;
        match reclaim_asset(state, &asset).await {
            Ok(true) => {
                stats.items_deleted += 1;
                crate::metrics::ORPHAN_ASSETS_RECLAIMED.inc();
            }
            Ok(false) => {
                tracing::debug!(asset = %asset.asset_id, "Asset no longer orphaned, skipping");
            }
            Err(e) => {
                stats.errors += 1;
                tracing::warn!(asset = %asset.asset_id, error = %e, "Failed to reclaim orphan asset");
            }
        }
    }

    if stats.items_processed > 0 {
        tracing::info!(
            processed = stats.items_processed,
            deleted = stats.items_deleted,
            errors = stats.errors,
            "Orphan asset sweep finished"
        );
    }
    Ok(stats)
}

/// Must run under the write side of the asset gate.
async fn reclaim_asset(state: &AppState, asset: &AssetRow) -> ApiResult<bool> {
    // A build may have claimed the asset since the candidate query ran.
    if !state.metadata.is_orphan_asset(&asset.asset_id).await? {
        return Ok(false);
    }
    let key = AssetKey::from_hex(&asset.asset_id)?;
    state.storage.remove(&key, &asset.filename).await?;
    Ok(state
        .metadata
        .delete_asset_if_orphaned(&asset.asset_id)
        .await?)
}

/// Remove empty directories below the published roots.
#[instrument(skip(state))]
pub async fn sweep_empty_dirs(state: &AppState) -> ApiResult<u64> {
    let _gate = state.asset_gate.write().await;
    let removed = state.storage.sweep_empty_dirs().await?;
    crate::metrics::EMPTY_DIRS_REMOVED.inc_by(removed);
    if removed > 0 {
        tracing::info!(removed, "Empty directory sweep finished");
    }
    Ok(removed)
}

/// Spawn both sweeps on their configured intervals.
pub fn spawn_gc_tasks(state: AppState) -> Vec<JoinHandle<()>> {
    let gc = state.config.gc.clone();
    tracing::info!(
        orphan_interval_secs = gc.orphan_sweep_interval_secs,
        orphan_batch_size = gc.orphan_batch_size,
        empty_dir_interval_secs = gc.empty_dir_sweep_interval_secs,
        "Garbage collection scheduler enabled"
    );

    let orphan_state = state.clone();
    let orphans = spawn_periodic(gc.orphan_sweep_interval(), move || {
        let state = orphan_state.clone();
        async move {
            if let Err(e) = sweep_orphan_assets(&state, gc.orphan_batch_size).await {
                tracing::error!(error = %e, "Orphan asset sweep failed");
            }
        }
    });

    let dirs = spawn_periodic(gc.empty_dir_sweep_interval(), move || {
        let state = state.clone();
        async move {
            if let Err(e) = sweep_empty_dirs(&state).await {
                tracing::error!(error = %e, "Empty directory sweep failed");
            }
        }
    });

    vec![orphans, dirs]
}

fn spawn_periodic<F, Fut>(interval: Duration, mut job: F) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send,
{
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;
            job().await;
        }
    })
}
