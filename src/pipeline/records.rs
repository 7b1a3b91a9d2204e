//! Row types carried between stages, one per checkpoint kind.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use chrono::NaiveDateTime;
use serde::Deserialize;
use crate::utils::checkpoint::{format_bool, CheckpointRow, Row};
use crate::Result;

const LAST_PLAYED_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Formats the player or earlier checkpoints may have produced.
const LAST_PLAYED_INPUT_FORMATS: &[&str] = &[
    LAST_PLAYED_FORMAT,
    "%Y-%m-%dT%H:%M:%S",
    "%A, %B %d, %Y at %I:%M:%S %p",
    "%A, %d %B %Y at %H:%M:%S",
    "%m/%d/%Y %H:%M:%S",
];

/// `None` for anything unparsable; a bad date never fails a row.
pub fn parse_last_played(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    if value.is_empty() || value == "missing value" {
        return None;
    }
    if let Ok(parsed) = chrono::DateTime::parse_from_rfc3339(value) {
        return Some(parsed.naive_utc());
    }
    LAST_PLAYED_INPUT_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
}

/// One track as enumerated from the player.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackRecord {
    pub persistent_id: String,
    pub track_number: u32,
    pub track_name: String,
    pub track_artist: String,
    pub album: String,
    pub album_artist: String,
    pub track_year: String,
    pub last_played: Option<NaiveDateTime>,
    pub play_count: u32,
    pub location: PathBuf,
}

impl CheckpointRow for TrackRecord {
    fn columns() -> Vec<&'static str> {
        vec![
            "persistent_id",
            "track_number",
            "track_name",
            "track_artist",
            "album",
            "album_artist",
            "track_year",
            "last_played",
            "play_count",
            "location",
        ]
    }

    fn to_fields(&self) -> Vec<String> {
        vec![
            self.persistent_id.clone(),
            self.track_number.to_string(),
            self.track_name.clone(),
            self.track_artist.clone(),
            self.album.clone(),
            self.album_artist.clone(),
            self.track_year.clone(),
            self.last_played
                .map(|t| t.format(LAST_PLAYED_FORMAT).to_string())
                .unwrap_or_default(),
            self.play_count.to_string(),
            self.location.to_string_lossy().into_owned(),
        ]
    }

    fn from_row(row: &Row<'_>) -> Result<Self> {
        let persistent_id = row.get("persistent_id").trim().to_string();
        if persistent_id.is_empty() {
            return Err(row.invalid("empty persistent_id".into()));
        }
        Ok(Self {
            persistent_id,
            track_number: row.parse_or_default("track_number")?,
            track_name: row.get("track_name").to_string(),
            track_artist: row.get("track_artist").to_string(),
            album: row.get("album").to_string(),
            album_artist: row.get("album_artist").to_string(),
            track_year: row.get("track_year").trim().to_string(),
            last_played: parse_last_played(row.get("last_played")),
            play_count: row.parse_or_default("play_count")?,
            location: PathBuf::from(row.get("location")),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum UpgradeOutcome {
    BetterQuality,
    SameQuality,
    DoNotMatch,
    NotFound,
    /// A candidate was found but its quality could not be judged.
    Unreadable,
}

impl UpgradeOutcome {
    pub const ALL: [UpgradeOutcome; 5] = [
        UpgradeOutcome::BetterQuality,
        UpgradeOutcome::SameQuality,
        UpgradeOutcome::DoNotMatch,
        UpgradeOutcome::NotFound,
        UpgradeOutcome::Unreadable,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            UpgradeOutcome::BetterQuality => "BETTER_QUALITY",
            UpgradeOutcome::SameQuality => "SAME_QUALITY",
            UpgradeOutcome::DoNotMatch => "DO_NOT_MATCH",
            UpgradeOutcome::NotFound => "NOT_FOUND",
            UpgradeOutcome::Unreadable => "UNREADABLE",
        }
    }
}

impl fmt::Display for UpgradeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for UpgradeOutcome {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|outcome| outcome.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown upgrade outcome '{}'", s))
    }
}

/// The replacement file the library service proposed.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub path: PathBuf,
    pub id: String,
    pub original_year: String,
    pub year: String,
}

/// An outcome, plus the candidate whenever one was found.
///
/// `BETTER_QUALITY` can only be built with a candidate, so eligible rows
/// always carry a candidate path.
#[derive(Debug, Clone, PartialEq)]
pub struct UpgradeDecision {
    outcome: UpgradeOutcome,
    candidate: Option<Candidate>,
}

impl UpgradeDecision {
    pub fn not_found() -> Self {
        Self { outcome: UpgradeOutcome::NotFound, candidate: None }
    }

    pub fn with_candidate(outcome: UpgradeOutcome, candidate: Candidate) -> Self {
        Self { outcome, candidate: Some(candidate) }
    }

    pub fn outcome(&self) -> UpgradeOutcome {
        self.outcome
    }

    pub fn candidate(&self) -> Option<&Candidate> {
        self.candidate.as_ref()
    }

    pub fn is_eligible(&self) -> bool {
        self.outcome == UpgradeOutcome::BetterQuality
    }
}

/// Where the year written into a replacement file comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum YearAction {
    /// Leave the replacement file's date tag alone.
    Keep,
    CandidateOriginalYear,
    CandidateYear,
    /// The year the player currently shows for the track.
    #[default]
    IncumbentYear,
}

impl YearAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            YearAction::Keep => "keep",
            YearAction::CandidateOriginalYear => "candidate_original_year",
            YearAction::CandidateYear => "candidate_year",
            YearAction::IncumbentYear => "incumbent_year",
        }
    }

    /// The year to stamp, if the policy names a known one.
    pub fn resolve(&self, record: &UpgradeCheckRecord) -> Option<String> {
        let year = match self {
            YearAction::Keep => return None,
            YearAction::CandidateOriginalYear => record.decision.candidate()?.original_year.as_str(),
            YearAction::CandidateYear => record.decision.candidate()?.year.as_str(),
            YearAction::IncumbentYear => record.track.track_year.as_str(),
        };
        let year = year.trim();
        // Both the player and the library report unknown years as 0.
        if year.is_empty() || year == "0" {
            None
        } else {
            Some(year.to_string())
        }
    }
}

impl fmt::Display for YearAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for YearAction {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" | "keep" => Ok(YearAction::Keep),
            "candidate_original_year" => Ok(YearAction::CandidateOriginalYear),
            "candidate_year" => Ok(YearAction::CandidateYear),
            "incumbent_year" => Ok(YearAction::IncumbentYear),
            other => Err(format!("unknown year action '{}'", other)),
        }
    }
}

/// A snapshot row with the upgrade-check verdict attached.
#[derive(Debug, Clone, PartialEq)]
pub struct UpgradeCheckRecord {
    pub track: TrackRecord,
    pub decision: UpgradeDecision,
    pub year_action: YearAction,
}

impl CheckpointRow for UpgradeCheckRecord {
    fn columns() -> Vec<&'static str> {
        let mut columns = TrackRecord::columns();
        columns.extend([
            "upgrade_reason",
            "can_upgrade",
            "candidate_file",
            "candidate_id",
            "candidate_original_year",
            "candidate_year",
            "year_action",
        ]);
        columns
    }

    fn to_fields(&self) -> Vec<String> {
        let mut fields = self.track.to_fields();
        let candidate = self.decision.candidate();
        fields.extend([
            self.decision.outcome().to_string(),
            format_bool(self.decision.is_eligible()),
            candidate.map(|c| c.path.to_string_lossy().into_owned()).unwrap_or_default(),
            candidate.map(|c| c.id.clone()).unwrap_or_default(),
            candidate.map(|c| c.original_year.clone()).unwrap_or_default(),
            candidate.map(|c| c.year.clone()).unwrap_or_default(),
            self.year_action.to_string(),
        ]);
        fields
    }

    fn from_row(row: &Row<'_>) -> Result<Self> {
        let track = TrackRecord::from_row(row)?;
        let outcome: UpgradeOutcome = row.get("upgrade_reason").parse().map_err(|e| row.invalid(e))?;
        let candidate_file = row.get("candidate_file").trim();

        let decision = if candidate_file.is_empty() {
            if outcome != UpgradeOutcome::NotFound {
                return Err(row.invalid(format!("{} row has no candidate_file", outcome)));
            }
            UpgradeDecision::not_found()
        } else {
            UpgradeDecision::with_candidate(
                outcome,
                Candidate {
                    path: PathBuf::from(candidate_file),
                    id: row.get("candidate_id").trim().to_string(),
                    original_year: row.get("candidate_original_year").trim().to_string(),
                    year: row.get("candidate_year").trim().to_string(),
                },
            )
        };
        let year_action = row.get("year_action").parse().map_err(|e| row.invalid(e))?;

        Ok(Self { track, decision, year_action })
    }
}

/// Where a replacement file ended up on disk.
#[derive(Debug, Clone, PartialEq)]
pub struct MaterializedFile {
    pub path: PathBuf,
    /// An earlier occupant of `path` was renamed to a backup first.
    pub target_existed: bool,
}

/// What became of the replacement file's date tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum YearUpdate {
    /// Nothing to write, or the tag already held the year.
    Unchanged,
    Written,
    /// The rewrite was attempted and failed; the file keeps its old date.
    Failed,
}

impl YearUpdate {
    pub fn as_str(&self) -> &'static str {
        match self {
            YearUpdate::Unchanged => "unchanged",
            YearUpdate::Written => "written",
            YearUpdate::Failed => "failed",
        }
    }
}

impl fmt::Display for YearUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for YearUpdate {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "unchanged" => Ok(YearUpdate::Unchanged),
            "written" => Ok(YearUpdate::Written),
            "failed" => Ok(YearUpdate::Failed),
            other => Err(format!("unknown year update '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MaterializedRecord {
    pub check: UpgradeCheckRecord,
    pub file: MaterializedFile,
    pub year_update: YearUpdate,
}

impl CheckpointRow for MaterializedRecord {
    fn columns() -> Vec<&'static str> {
        let mut columns = UpgradeCheckRecord::columns();
        columns.extend(["new_file", "target_existed", "year_update"]);
        columns
    }

    fn to_fields(&self) -> Vec<String> {
        let mut fields = self.check.to_fields();
        fields.push(self.file.path.to_string_lossy().into_owned());
        fields.push(format_bool(self.file.target_existed));
        fields.push(self.year_update.to_string());
        fields
    }

    fn from_row(row: &Row<'_>) -> Result<Self> {
        let check = UpgradeCheckRecord::from_row(row)?;
        let new_file = row.get("new_file").trim();
        if new_file.is_empty() {
            return Err(row.invalid("empty new_file".into()));
        }
        Ok(Self {
            check,
            file: MaterializedFile {
                path: PathBuf::from(new_file),
                target_existed: row.parse_bool("target_existed")?,
            },
            year_update: row.get("year_update").parse().map_err(|e| row.invalid(e))?,
        })
    }
}

/// A row the materialization stage could not finish.
#[derive(Debug, Clone, PartialEq)]
pub struct MaterializeFailure {
    pub check: UpgradeCheckRecord,
    pub error: String,
}

impl CheckpointRow for MaterializeFailure {
    fn columns() -> Vec<&'static str> {
        let mut columns = UpgradeCheckRecord::columns();
        columns.push("error");
        columns
    }

    fn to_fields(&self) -> Vec<String> {
        let mut fields = self.check.to_fields();
        fields.push(self.error.clone());
        fields
    }

    fn from_row(row: &Row<'_>) -> Result<Self> {
        Ok(Self {
            check: UpgradeCheckRecord::from_row(row)?,
            error: row.get("error").to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApplyRecord {
    pub materialized: MaterializedRecord,
    pub success: bool,
}

impl CheckpointRow for ApplyRecord {
    fn columns() -> Vec<&'static str> {
        let mut columns = MaterializedRecord::columns();
        columns.push("success");
        columns
    }

    fn to_fields(&self) -> Vec<String> {
        let mut fields = self.materialized.to_fields();
        fields.push(format_bool(self.success));
        fields
    }

    fn from_row(row: &Row<'_>) -> Result<Self> {
        Ok(Self {
            materialized: MaterializedRecord::from_row(row)?,
            success: row.parse_bool("success")?,
        })
    }
}
