use std::path::PathBuf;

pub mod analyzers;
pub mod audio;
pub mod cli;
pub mod config;
pub mod pipeline;
pub mod services;
pub mod utils;

#[derive(Debug, thiserror::Error)]
pub enum UpgraderError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("Config parse error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Config error: {0}")]
    Config(String),
    #[error("Unreadable media file {path}: {reason}")]
    UnreadableMedia { path: PathBuf, reason: String },
    #[error("Could not write tags to {path}: {reason}")]
    TagWrite { path: PathBuf, reason: String },
    #[error("Invalid library query: {0}")]
    InvalidQuery(String),
    #[error("Command '{program}' failed: {message}")]
    Command { program: String, message: String },
    #[error("Automation bridge error: {0}")]
    Bridge(String),
    #[error("Candidate file not found at {0}")]
    CandidateMissing(PathBuf),
    #[error("Converted file not found at {0}")]
    ConversionOutputMissing(PathBuf),
    #[error("Destination {0} was already produced for another track in this run")]
    DestinationTaken(PathBuf),
    #[error("Replacement file not found at {0}")]
    ReplacementMissing(PathBuf),
    #[error("Thread pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
    #[error("Checkpoint file not found: {0}")]
    CheckpointMissing(PathBuf),
    #[error("Checkpoint {path} is missing column '{column}'")]
    MissingColumn { path: PathBuf, column: String },
    #[error("Invalid row {line} in {path}: {reason}")]
    InvalidRow { path: PathBuf, line: u64, reason: String },
    #[error("Stage aborted, partial results saved to {checkpoint}: {source}")]
    StageAborted {
        checkpoint: PathBuf,
        #[source]
        source: Box<UpgraderError>,
    },
}

pub type Result<T> = std::result::Result<T, UpgraderError>;

// Re-exports for convenience
pub use analyzers::identity::IdentityMatcher;
pub use analyzers::quality::{AudioCodec, QualityComparator};
pub use audio::metadata::{MetadataExtractor, TagReader, TagWriter, TrackTags};
pub use config::Config;
pub use pipeline::records::{
    ApplyRecord, Candidate, MaterializedFile, MaterializedRecord, TrackRecord, UpgradeCheckRecord,
    UpgradeDecision, UpgradeOutcome, YearAction, YearUpdate,
};
