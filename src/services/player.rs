//! Scripting bridge to the desktop media player.
//!
//! The player accepts one command at a time. Each per-track request selects
//! the track by persistent ID and acts on it within the same script, so a
//! request is a single round trip.

use std::process::Command;
use crate::{Result, UpgraderError};

pub const DEFAULT_VOLUME_NAME: &str = "Macintosh HD";

/// Fields read for one track, in the order the info script returns them.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TrackInfo {
    pub track_number: String,
    pub name: String,
    pub artist: String,
    pub album: String,
    pub album_artist: String,
    pub year: String,
    pub last_played: String,
    pub play_count: String,
    /// Colon-delimited location; empty when the file is missing.
    pub location: String,
}

impl TrackInfo {
    /// Missing trailing lines are read as empty fields.
    pub fn parse(output: &str) -> Self {
        let mut lines = output.lines();
        let mut next = || lines.next().unwrap_or("").trim().to_string();
        Self {
            track_number: next(),
            name: next(),
            artist: next(),
            album: next(),
            album_artist: next(),
            year: next(),
            last_played: next(),
            play_count: next(),
            location: next(),
        }
    }
}

pub trait PlayerBridge: Send + Sync {
    fn enumerate_all_persistent_ids(&self) -> Result<Vec<String>>;
    fn track_info(&self, persistent_id: &str) -> Result<TrackInfo>;
    fn set_file_location(&self, persistent_id: &str, hfs_path: &str) -> Result<()>;
}

/// `Macintosh HD:Users:me:a.mp3` to `/Users/me/a.mp3`. The volume name is dropped.
pub fn hfs_to_posix(hfs_path: &str) -> String {
    let mut tokens = hfs_path.split(':');
    tokens.next();
    format!("/{}", tokens.collect::<Vec<_>>().join("/"))
}

/// `/Users/me/a.mp3` to `<volume>:Users:me:a.mp3`. Assumes a single volume.
pub fn posix_to_hfs(posix_path: &str, volume_name: &str) -> String {
    format!("{}{}", volume_name, posix_path).replace('/', ":")
}

fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

pub fn select_track_script(persistent_id: &str) -> String {
    format!(
        "tell application \"Music\"\n    set t to first track of library playlist 1 whose persistent ID is {}\nend tell\n",
        quote(persistent_id)
    )
}

const TRACK_INFO_SCRIPT: &str = r#"tell application "Music" to tell t
    set loc to ""
    try
        set loc to (location as text)
    end try
    set lastPlayed to ""
    try
        set lastPlayed to (played date as text)
    end try
    return (track number as text) & linefeed & name & linefeed & artist & linefeed & album & linefeed & album artist & linefeed & (year as text) & linefeed & lastPlayed & linefeed & (played count as text) & linefeed & loc
end tell"#;

const ALL_IDS_SCRIPT: &str = r#"tell application "Music" to get persistent ID of every track of library playlist 1"#;

/// Runs AppleScript through `osascript`.
pub struct OsaScriptBridge;

impl OsaScriptBridge {
    pub fn new() -> Self {
        Self
    }

    fn run(&self, script: &str) -> Result<String> {
        let output = Command::new("osascript")
            .arg("-e")
            .arg(script)
            .output()
            .map_err(|e| UpgraderError::Bridge(format!("could not start osascript: {}", e)))?;
        if !output.status.success() {
            return Err(UpgraderError::Bridge(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl Default for OsaScriptBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl PlayerBridge for OsaScriptBridge {
    fn enumerate_all_persistent_ids(&self) -> Result<Vec<String>> {
        let output = self.run(ALL_IDS_SCRIPT)?;
        Ok(output
            .split(',')
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .collect())
    }

    fn track_info(&self, persistent_id: &str) -> Result<TrackInfo> {
        let script = format!("{}{}", select_track_script(persistent_id), TRACK_INFO_SCRIPT);
        Ok(TrackInfo::parse(&self.run(&script)?))
    }

    fn set_file_location(&self, persistent_id: &str, hfs_path: &str) -> Result<()> {
        let script = format!(
            "{}tell application \"Music\" to tell t\n    set location to alias {}\nend tell",
            select_track_script(persistent_id),
            quote(hfs_path)
        );
        self.run(&script).map(|_| ())
    }
}
