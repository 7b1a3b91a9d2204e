use std::path::{Path, PathBuf};
use chrono::Utc;
use crate::pipeline::records::{parse_last_played, TrackRecord};
use crate::pipeline::StageReport;
use crate::services::player::{hfs_to_posix, PlayerBridge, TrackInfo};
use crate::utils::checkpoint::{backup_existing, write_checkpoint};
use crate::utils::parallel::ParallelProcessor;
use crate::Result;

pub const SNAPSHOT_FILE_NAME: &str = "library_snapshot.csv";

/// Concurrent metadata requests. The bridge serializes commands, so more
/// workers only queue up behind it.
pub const DEFAULT_WORKERS: usize = 8;

impl TrackRecord {
    pub fn from_track_info(persistent_id: &str, info: TrackInfo) -> Self {
        let location = if info.location.is_empty() {
            PathBuf::new()
        } else {
            PathBuf::from(hfs_to_posix(&info.location))
        };
        Self {
            persistent_id: persistent_id.to_string(),
            track_number: info.track_number.parse().unwrap_or(0),
            track_name: info.name,
            track_artist: info.artist,
            album: info.album,
            album_artist: info.album_artist,
            track_year: info.year,
            last_played: parse_last_played(&info.last_played),
            play_count: info.play_count.parse().unwrap_or(0),
            location,
        }
    }
}

/// Sort key giving a stable order regardless of fetch completion order.
fn snapshot_order(a: &TrackRecord, b: &TrackRecord) -> std::cmp::Ordering {
    (&a.album_artist, &a.album, a.track_number, &a.persistent_id)
        .cmp(&(&b.album_artist, &b.album, b.track_number, &b.persistent_id))
}

pub struct LibrarySnapshotLoader<'a> {
    bridge: &'a dyn PlayerBridge,
    data_path: PathBuf,
    workers: usize,
}

impl ParallelProcessor for LibrarySnapshotLoader<'_> {}

impl<'a> LibrarySnapshotLoader<'a> {
    pub fn new(bridge: &'a dyn PlayerBridge, data_path: impl Into<PathBuf>, workers: usize) -> Self {
        Self {
            bridge,
            data_path: data_path.into(),
            workers,
        }
    }

    pub fn data_path(&self) -> &Path {
        &self.data_path
    }

    /// Fetches every track and returns them sorted, plus the number of
    /// tracks whose metadata could not be fetched.
    pub fn collect(&self) -> Result<(Vec<TrackRecord>, usize)> {
        let ids = self.bridge.enumerate_all_persistent_ids()?;
        let total = ids.len();
        log::info!("Collecting details for {} tracks with {} workers", total, self.workers);

        let pool = Self::build_pool(self.workers)?;
        let progress = Self::get_progress_counter();
        let bridge = self.bridge;

        let fetched = Self::parallel_map(&pool, &ids, |id| {
            let result = bridge
                .track_info(id)
                .map(|info| TrackRecord::from_track_info(id, info));
            Self::tick_progress(&progress, total, "Collecting library details");
            (id.clone(), result)
        });

        let mut tracks = Vec::with_capacity(total);
        let mut failed = 0;
        for (id, result) in fetched {
            match result {
                Ok(track) => tracks.push(track),
                Err(e) => {
                    log::warn!("Could not read track {}: {}", id, e);
                    failed += 1;
                }
            }
        }

        tracks.sort_by(snapshot_order);
        Ok((tracks, failed))
    }

    /// Moves any previous snapshot aside, then writes a fresh one.
    pub fn run(&self) -> Result<StageReport> {
        let mut report = StageReport::new("load-library");
        let (tracks, failed) = self.collect()?;

        if let Some(parent) = self.data_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        if let Some(backup) = backup_existing(&self.data_path, Utc::now())? {
            println!("Backed up previous snapshot to {}", backup.display());
        }
        write_checkpoint(&self.data_path, &tracks)?;

        report.outputs.push(self.data_path.clone());
        report.tallies.insert("collected".into(), tracks.len());
        if failed > 0 {
            report.tallies.insert("failed".into(), failed);
        }
        Ok(report)
    }
}
