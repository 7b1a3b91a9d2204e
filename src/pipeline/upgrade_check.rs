use std::path::{Path, PathBuf};
use chrono::Utc;
use crate::analyzers::identity::IdentityMatcher;
use crate::analyzers::quality::QualityComparator;
use crate::audio::metadata::TagReader;
use crate::config::UpgradeSettings;
use crate::pipeline::records::{Candidate, TrackRecord, UpgradeCheckRecord, UpgradeDecision, UpgradeOutcome};
use crate::pipeline::{finish, process_rows, StageReport};
use crate::services::library::{LibraryMatch, LibraryService};
use crate::utils::checkpoint::{read_checkpoint, write_new_checkpoint};
use crate::{Result, UpgraderError};

pub const ELIGIBLE_PREFIX: &str = "upgrade_checks";
pub const INELIGIBLE_PREFIX: &str = "no_upgrade";

/// Finds a replacement for each snapshot row and decides whether it is an upgrade.
pub struct UpgradeCheck<'a> {
    library: &'a dyn LibraryService,
    tags: &'a dyn TagReader,
    settings: &'a UpgradeSettings,
    data_dir: PathBuf,
}

impl<'a> UpgradeCheck<'a> {
    pub fn new(
        library: &'a dyn LibraryService,
        tags: &'a dyn TagReader,
        settings: &'a UpgradeSettings,
        data_dir: impl Into<PathBuf>,
    ) -> Self {
        log::info!("Upgrade check initialized. Comparing file tags: {}", settings.compare_tags);
        Self {
            library,
            tags,
            settings,
            data_dir: data_dir.into(),
        }
    }

    /// Tries each configured strategy in order. A malformed fuzzy query
    /// counts as no result; any other service failure is returned.
    pub fn find_candidate(&self, track: &TrackRecord) -> Result<Option<LibraryMatch>> {
        let track_number = Some(track.track_number).filter(|n| *n > 0);
        for strategy in &self.settings.strategies {
            let query = strategy.build(&track.track_name, &track.track_artist, &track.album, track_number);
            if query.terms.is_empty() {
                continue;
            }
            log::debug!("Querying library with {} strategy", strategy);
            match self.library.find_track(&query) {
                Ok(Some(found)) => {
                    log::debug!("Found match with {} strategy", strategy);
                    return Ok(Some(found));
                }
                Ok(None) => {}
                Err(UpgraderError::InvalidQuery(message)) => {
                    log::warn!("Invalid {} query for '{}': {}", strategy, track.track_name, message);
                }
                Err(e) => return Err(e),
            }
        }
        log::warn!("Track not found: {} by {}", track.track_name, track.track_artist);
        Ok(None)
    }

    /// Identity check (when enabled) first, then quality.
    pub fn decide(&self, incumbent: &Path, candidate: Candidate) -> UpgradeDecision {
        if self.settings.compare_tags && !IdentityMatcher::new(self.tags).is_same_track(incumbent, &candidate.path) {
            return UpgradeDecision::with_candidate(UpgradeOutcome::DoNotMatch, candidate);
        }
        let outcome = match QualityComparator::new(self.tags).is_upgradable(incumbent, &candidate.path) {
            Ok(true) => UpgradeOutcome::BetterQuality,
            Ok(false) => UpgradeOutcome::SameQuality,
            Err(e) => {
                log::warn!("No quality verdict: {}", e);
                UpgradeOutcome::Unreadable
            }
        };
        UpgradeDecision::with_candidate(outcome, candidate)
    }

    pub fn process_row(&self, track: TrackRecord) -> Result<UpgradeCheckRecord> {
        log::info!(
            "Processing: '{}' by {} from the album '{}'",
            track.track_name, track.track_artist, track.album
        );

        let decision = match self.find_candidate(&track)? {
            Some(found) => {
                let candidate = Candidate {
                    path: found.path,
                    id: found.id,
                    original_year: found.original_year,
                    year: found.year,
                };
                self.decide(&track.location, candidate)
            }
            None => UpgradeDecision::not_found(),
        };

        if decision.is_eligible() {
            log::info!("\tthis track will be upgraded");
        } else {
            log::info!("\tthis track will not be upgraded. Reason: {}", decision.outcome());
        }

        Ok(UpgradeCheckRecord {
            track,
            decision,
            year_action: self.settings.year_action,
        })
    }

    /// Writes eligible rows to `upgrade_checks_<ts>.csv` and, when there are
    /// any, the rest to `no_upgrade_<ts>.csv`.
    pub fn run(&self, snapshot: &Path) -> Result<StageReport> {
        let tracks: Vec<TrackRecord> = read_checkpoint(snapshot)?;
        let mut report = StageReport::new("check-upgrade");

        let (checked, error) = process_rows(tracks, |track| self.process_row(track));
        for row in &checked {
            report.tally(row.decision.outcome().as_str());
        }
        let (eligible, ineligible): (Vec<_>, Vec<_>) =
            checked.into_iter().partition(|row| row.decision.is_eligible());

        let now = Utc::now();
        report.outputs.push(write_new_checkpoint(&self.data_dir, ELIGIBLE_PREFIX, &eligible, now)?);
        if !ineligible.is_empty() {
            report.outputs.push(write_new_checkpoint(&self.data_dir, INELIGIBLE_PREFIX, &ineligible, now)?);
        }

        finish(report, error)
    }
}
