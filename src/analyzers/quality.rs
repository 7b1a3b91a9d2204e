use std::fmt;
use std::path::Path;
use crate::audio::metadata::{TagReader, TrackTags};
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AudioCodec {
    Mp3,
    Aac,
    Flac,
    Alac,
    Other,
}

impl AudioCodec {
    pub fn is_lossy(&self) -> bool {
        matches!(self, AudioCodec::Mp3 | AudioCodec::Aac)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AudioCodec::Mp3 => "MP3",
            AudioCodec::Aac => "AAC",
            AudioCodec::Flac => "FLAC",
            AudioCodec::Alac => "ALAC",
            AudioCodec::Other => "Other",
        }
    }
}

impl fmt::Display for AudioCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// File container, judged by extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Container {
    Mpeg,
    Mp4,
    Flac,
    Wav,
    Other,
}

impl Container {
    pub fn from_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "mp3" => Container::Mpeg,
            "m4a" | "mp4" | "aac" => Container::Mp4,
            "flac" => Container::Flac,
            "wav" => Container::Wav,
            _ => Container::Other,
        }
    }
}

/// The parts of a file that the upgrade policy looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub codec: AudioCodec,
    pub container: Container,
    pub bitrate: Option<u32>,
}

impl From<&TrackTags> for AudioFormat {
    fn from(tags: &TrackTags) -> Self {
        Self {
            codec: tags.codec,
            container: tags.container,
            bitrate: tags.bitrate,
        }
    }
}

/// Which policy case made a candidate an upgrade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpgradeRule {
    HigherBitrate,
    LosslessCompressed,
    LosslessContainer,
}

impl UpgradeRule {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpgradeRule::HigherBitrate => "higher bitrate in the same lossy codec",
            UpgradeRule::LosslessCompressed => "lossy to FLAC",
            UpgradeRule::LosslessContainer => "lossy to ALAC",
        }
    }
}

impl fmt::Display for UpgradeRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// First matching case wins. Only moves away from lossy compression count.
pub fn upgrade_rule(old: &AudioFormat, new: &AudioFormat) -> Option<UpgradeRule> {
    if !old.codec.is_lossy() {
        return None;
    }
    if new.codec == old.codec {
        return match (old.bitrate, new.bitrate) {
            (Some(old_rate), Some(new_rate)) if new_rate > old_rate => Some(UpgradeRule::HigherBitrate),
            _ => None,
        };
    }
    match (new.codec, new.container) {
        (AudioCodec::Flac, _) => Some(UpgradeRule::LosslessCompressed),
        (AudioCodec::Alac, Container::Mp4) => Some(UpgradeRule::LosslessContainer),
        _ => None,
    }
}

pub struct QualityComparator<'a> {
    reader: &'a dyn TagReader,
}

impl<'a> QualityComparator<'a> {
    pub fn new(reader: &'a dyn TagReader) -> Self {
        Self { reader }
    }

    /// Errors when either file cannot be read; that is "no verdict", not a refusal.
    pub fn is_upgradable(&self, old: &Path, new: &Path) -> Result<bool> {
        let old_tags = self.reader.read_tags(old)?;
        let new_tags = self.reader.read_tags(new)?;
        let rule = upgrade_rule(&AudioFormat::from(&old_tags), &AudioFormat::from(&new_tags));

        match rule {
            Some(rule) => log::debug!(
                "{} ({} {:?} kbps) upgrades {} ({} {:?} kbps): {}",
                new.display(), new_tags.codec, new_tags.bitrate,
                old.display(), old_tags.codec, old_tags.bitrate,
                rule
            ),
            None => log::debug!(
                "{} ({}) is not an upgrade over {} ({})",
                new.display(), new_tags.codec, old.display(), old_tags.codec
            ),
        }
        Ok(rule.is_some())
    }
}
