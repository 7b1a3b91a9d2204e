use std::path::{Path, PathBuf};
use chrono::Utc;
use crate::pipeline::records::{ApplyRecord, MaterializedRecord};
use crate::pipeline::{finish, process_rows, StageReport};
use crate::services::player::{posix_to_hfs, PlayerBridge};
use crate::utils::checkpoint::{read_checkpoint, write_new_checkpoint};
use crate::utils::file_ops::FileManager;
use crate::{Result, UpgraderError};

pub const APPLIED_PREFIX: &str = "applied";

/// Removes each incumbent file and points the player at its replacement.
pub struct ApplyUpgrade<'a> {
    bridge: &'a dyn PlayerBridge,
    files: FileManager,
    volume_name: String,
    data_dir: PathBuf,
}

impl<'a> ApplyUpgrade<'a> {
    pub fn new(bridge: &'a dyn PlayerBridge, volume_name: impl Into<String>, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            bridge,
            files: FileManager::new(),
            volume_name: volume_name.into(),
            data_dir: data_dir.into(),
        }
    }

    /// A failed repoint or a missing replacement file is recorded as
    /// `success = false`. Only filesystem errors other than a missing
    /// incumbent are returned.
    pub fn apply(&self, record: MaterializedRecord) -> Result<ApplyRecord> {
        let persistent_id = &record.check.track.persistent_id;
        let incumbent = &record.check.track.location;
        let replacement = &record.file.path;

        // Without the replacement on disk the incumbent is the only copy of the track.
        if !replacement.is_file() {
            log::warn!(
                "Skipping track {}: {}",
                persistent_id,
                UpgraderError::ReplacementMissing(replacement.clone())
            );
            return Ok(ApplyRecord { materialized: record, success: false });
        }

        // The player renames files that appear next to a still-present old one.
        // When the replacement took over the incumbent's path, the old file is already backed up.
        if !incumbent.as_os_str().is_empty() && incumbent != replacement {
            if self.files.remove_if_exists(incumbent)? {
                log::info!("Removed old file {}", incumbent.display());
            }
        }

        let hfs_path = posix_to_hfs(&replacement.to_string_lossy(), &self.volume_name);
        log::info!("Setting new file location for track with persistent ID {}", persistent_id);
        let success = match self.bridge.set_file_location(persistent_id, &hfs_path) {
            Ok(()) => {
                log::info!("Update complete");
                true
            }
            Err(e) => {
                log::warn!("Could not update track {}: {}", persistent_id, e);
                false
            }
        };

        Ok(ApplyRecord { materialized: record, success })
    }

    pub fn run(&self, input: &Path) -> Result<StageReport> {
        let rows: Vec<MaterializedRecord> = read_checkpoint(input)?;
        let mut report = StageReport::new("apply-updates");

        let (applied, error) = process_rows(rows, |row| self.apply(row));
        for row in &applied {
            report.tally(if row.success { "applied" } else { "apply_failed" });
        }

        report.outputs.push(write_new_checkpoint(&self.data_dir, APPLIED_PREFIX, &applied, Utc::now())?);
        finish(report, error)
    }
}
