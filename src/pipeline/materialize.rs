use std::cell::RefCell;
use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};
use chrono::Utc;
use serde::Deserialize;
use crate::audio::metadata::{TagReader, TagWriter};
use crate::config::{LibraryConfig, MaterializeSettings};
use crate::pipeline::records::{
    Candidate, MaterializeFailure, MaterializedFile, MaterializedRecord, UpgradeCheckRecord, YearUpdate,
};
use crate::pipeline::{finish, process_rows, StageReport};
use crate::services::library::LibraryService;
use crate::utils::checkpoint::{read_checkpoint, write_new_checkpoint};
use crate::utils::file_ops::FileManager;
use crate::{Result, UpgraderError};

pub const MATERIALIZED_PREFIX: &str = "materialized";
pub const FAILED_PREFIX: &str = "materialize_failed";

/// Extension of conversion output.
const CONVERTED_EXTENSION: &str = "m4a";

/// Directories kept above the file name when a source has no `<EXT>`
/// component, enough for `artist/album/`.
const KEPT_PARENT_DIRS: usize = 2;

/// Where replacement files are put.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Placement {
    /// Into the conversion destination tree, under a directory named after the extension.
    #[default]
    Staged,
    /// Into the incumbent file's directory.
    Alongside,
}

/// Lossless sources that are transcoded rather than copied.
pub fn needs_conversion(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map_or(false, |e| e.eq_ignore_ascii_case("flac"))
}

/// `dest` joined with the source path from the `anchor` component on, as `.m4a`.
/// Without the anchor only the file name is kept.
pub fn expected_conversion_output(source: &Path, dest: &Path, anchor: &str) -> PathBuf {
    let components: Vec<_> = source.components().collect();
    let relative: PathBuf = match components.iter().position(|c| c.as_os_str() == anchor) {
        Some(index) => components[index..].iter().collect(),
        None => source.file_name().map(PathBuf::from).unwrap_or_default(),
    };
    dest.join(relative).with_extension(CONVERTED_EXTENSION)
}

/// The file name plus up to `parents` directories above it.
fn path_tail(source: &Path, parents: usize) -> PathBuf {
    let names: Vec<_> = source
        .components()
        .filter(|c| matches!(c, Component::Normal(_)))
        .collect();
    let start = names.len().saturating_sub(parents + 1);
    names[start..].iter().collect()
}

/// Rows whose error is recorded in the failures checkpoint instead of stopping the stage.
fn is_row_failure(error: &UpgraderError) -> bool {
    matches!(
        error,
        UpgraderError::ConversionOutputMissing(_)
            | UpgraderError::CandidateMissing(_)
            | UpgraderError::DestinationTaken(_)
            | UpgraderError::Command { .. }
    )
}

/// Copies or converts each eligible candidate and reconciles its year tag.
pub struct Materializer<'a> {
    library: &'a dyn LibraryService,
    tags: &'a dyn TagReader,
    writer: &'a dyn TagWriter,
    files: FileManager,
    placement: Placement,
    convert_dest: PathBuf,
    convert_source_dir: String,
    data_dir: PathBuf,
    /// Destinations already written in this run.
    claimed: RefCell<HashSet<PathBuf>>,
}

impl<'a> Materializer<'a> {
    pub fn new(
        library: &'a dyn LibraryService,
        tags: &'a dyn TagReader,
        writer: &'a dyn TagWriter,
        library_config: &LibraryConfig,
        settings: &MaterializeSettings,
        data_dir: impl Into<PathBuf>,
    ) -> Self {
        log::info!(
            "Materializer initialized. Placement: {:?}, conversion output: {}",
            settings.placement,
            library_config.convert_dest.display()
        );
        Self {
            library,
            tags,
            writer,
            files: FileManager::new(),
            placement: settings.placement,
            convert_dest: library_config.convert_dest.clone(),
            convert_source_dir: library_config.convert_source_dir.clone(),
            data_dir: data_dir.into(),
            claimed: RefCell::new(HashSet::new()),
        }
    }

    /// Reserves `path` for one row. A second row aiming at the same path
    /// would back up the first row's file and leave its checkpoint row
    /// pointing at the wrong audio.
    fn claim(&self, path: &Path) -> Result<()> {
        if self.claimed.borrow_mut().insert(path.to_path_buf()) {
            Ok(())
        } else {
            Err(UpgraderError::DestinationTaken(path.to_path_buf()))
        }
    }

    /// `convert_dest/<EXT>/<path after the EXT component>`, e.g. an MP3 under
    /// `.../MP3/Artist/Album/` lands in `convert_dest/MP3/Artist/Album/`.
    /// Without that component the artist and album directories are kept.
    pub fn staged_destination(&self, source: &Path) -> PathBuf {
        let ext = source
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("other")
            .to_uppercase();
        let components: Vec<_> = source.components().collect();
        let relative: PathBuf = match components.iter().position(|c| c.as_os_str() == ext.as_str()) {
            Some(index) => components[index + 1..].iter().collect(),
            None => path_tail(source, KEPT_PARENT_DIRS),
        };
        self.convert_dest.join(ext).join(relative)
    }

    fn destination(&self, source: &Path, incumbent: &Path) -> PathBuf {
        match (self.placement, incumbent.parent(), source.file_name()) {
            (Placement::Alongside, Some(dir), Some(name)) if !dir.as_os_str().is_empty() => dir.join(name),
            (Placement::Alongside, _, _) => {
                log::warn!("\tNo incumbent directory for {}, staging instead", source.display());
                self.staged_destination(source)
            }
            (Placement::Staged, _, _) => self.staged_destination(source),
        }
    }

    fn convert(&self, record: &UpgradeCheckRecord, source: &Path) -> Result<MaterializedFile> {
        let converted = expected_conversion_output(source, &self.convert_dest, &self.convert_source_dir);
        self.claim(&converted)?;

        // The converter writes straight to its output path; move any earlier file there aside.
        let target_existed = converted.exists();
        if target_existed {
            let backup = self.files.backup_path(&converted);
            std::fs::rename(&converted, &backup)?;
            log::info!("\tBacked up previous conversion output to {}", backup.display());
        }

        log::info!(
            "Converting '{}' by {} from the album '{}'",
            record.track.track_name, record.track.track_artist, record.track.album
        );
        self.library.convert(source)?;
        if !converted.is_file() {
            return Err(UpgraderError::ConversionOutputMissing(converted));
        }
        log::info!("\tNew file located at {}", converted.display());

        match self.placement {
            Placement::Staged => Ok(MaterializedFile { path: converted, target_existed }),
            Placement::Alongside => {
                let destination = self.destination(&converted, &record.track.location);
                self.claim(&destination)?;
                self.files.place_copy(&converted, &destination)
            }
        }
    }

    /// Places the candidate and reconciles its year tag.
    pub fn materialize(
        &self,
        record: &UpgradeCheckRecord,
        candidate: &Candidate,
    ) -> Result<(MaterializedFile, YearUpdate)> {
        let source = &candidate.path;
        if !source.is_file() {
            return Err(UpgraderError::CandidateMissing(source.clone()));
        }

        let placed = if needs_conversion(source) {
            self.convert(record, source)?
        } else {
            log::info!(
                "Copying '{}' by {} from the album '{}'",
                record.track.track_name, record.track.track_artist, record.track.album
            );
            let destination = self.destination(source, &record.track.location);
            self.claim(&destination)?;
            self.files.place_copy(source, &destination)?
        };

        let year_update = self.reconcile_year(record, &placed.path);
        Ok((placed, year_update))
    }

    /// Rewrites the date tag when the configured year source disagrees with the file.
    fn reconcile_year(&self, record: &UpgradeCheckRecord, path: &Path) -> YearUpdate {
        let Some(year) = record.year_action.resolve(record) else {
            return YearUpdate::Unchanged;
        };
        let current = self.tags.read_tags(path).ok().and_then(|tags| tags.year);
        if current.as_deref() == Some(year.as_str()) {
            return YearUpdate::Unchanged;
        }

        log::info!(
            "\tUpdating year from {} to {} as per year action {}",
            current.as_deref().unwrap_or("none"),
            year,
            record.year_action
        );
        match self.writer.write_year(path, &year) {
            Ok(()) => YearUpdate::Written,
            Err(e) => {
                log::warn!("\t{}", e);
                YearUpdate::Failed
            }
        }
    }

    pub fn run(&self, input: &Path) -> Result<StageReport> {
        let rows: Vec<UpgradeCheckRecord> = read_checkpoint(input)?;
        let mut report = StageReport::new("materialize");
        let mut failures = Vec::new();

        let (done, error) = process_rows(rows, |row| {
            let candidate = match row.decision.candidate() {
                Some(candidate) if row.decision.is_eligible() => candidate.clone(),
                _ => {
                    log::info!("Skipping '{}': {}", row.track.track_name, row.decision.outcome());
                    report.tally("skipped");
                    return Ok(None);
                }
            };
            match self.materialize(&row, &candidate) {
                Ok((file, year_update)) => {
                    report.tally("materialized");
                    if file.target_existed {
                        report.note("backed_up");
                    }
                    if year_update == YearUpdate::Failed {
                        report.note("year_write_failed");
                    }
                    Ok(Some(MaterializedRecord { check: row, file, year_update }))
                }
                Err(e) if is_row_failure(&e) => {
                    log::warn!("Could not materialize '{}': {}", row.track.track_name, e);
                    report.tally("failed");
                    failures.push(MaterializeFailure { check: row, error: e.to_string() });
                    Ok(None)
                }
                Err(e) => Err(e),
            }
        });
        let materialized: Vec<MaterializedRecord> = done.into_iter().flatten().collect();

        let now = Utc::now();
        report.outputs.push(write_new_checkpoint(&self.data_dir, MATERIALIZED_PREFIX, &materialized, now)?);
        if !failures.is_empty() {
            report.outputs.push(write_new_checkpoint(&self.data_dir, FAILED_PREFIX, &failures, now)?);
        }

        finish(report, error)
    }
}
