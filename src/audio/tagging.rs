use std::path::Path;
use lofty::config::WriteOptions;
use lofty::prelude::*;
use lofty::probe::Probe;
use lofty::tag::{ItemKey, Tag};
use crate::audio::metadata::{MetadataExtractor, TagWriter};
use crate::{Result, UpgraderError};

/// Bitrate of the audio stream alone in kbps, as the container reports it.
/// Tag data such as embedded artwork or padding is not counted.
pub fn audio_bitrate(path: &Path) -> Option<u32> {
    match Probe::open(path).and_then(|opened| opened.read()) {
        Ok(tagged_file) => tagged_file.properties().audio_bitrate().filter(|rate| *rate > 0),
        Err(e) => {
            log::debug!("No stream bitrate for {}: {}", path.display(), e);
            None
        }
    }
}

impl TagWriter for MetadataExtractor {
    /// Replaces the recording date with a bare year. A full date such as
    /// `1999-01-01` is not preserved.
    fn write_year(&self, path: &Path, year: &str) -> Result<()> {
        let tag_error = |reason: String| UpgraderError::TagWrite {
            path: path.to_path_buf(),
            reason,
        };

        let mut tagged_file = Probe::open(path)
            .and_then(|opened| opened.read())
            .map_err(|e| tag_error(e.to_string()))?;

        if tagged_file.primary_tag().is_none() {
            let tag_type = tagged_file.primary_tag_type();
            tagged_file.insert_tag(Tag::new(tag_type));
        }
        let tag = tagged_file
            .primary_tag_mut()
            .ok_or_else(|| tag_error("file does not support tags".into()))?;

        tag.insert_text(ItemKey::RecordingDate, year.to_string());
        tag.save_to_path(path, WriteOptions::default())
            .map_err(|e| tag_error(e.to_string()))?;

        log::debug!("Wrote year {} to {}", year, path.display());
        Ok(())
    }
}
