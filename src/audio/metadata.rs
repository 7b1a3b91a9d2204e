use std::path::{Path, PathBuf};
use symphonia::core::codecs::{CodecType, CODEC_TYPE_AAC, CODEC_TYPE_ALAC, CODEC_TYPE_FLAC, CODEC_TYPE_MP3};
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::{MetadataOptions, StandardTagKey, Tag};
use symphonia::core::probe::Hint;
use crate::analyzers::quality::{AudioCodec, Container};
use crate::audio::tagging::audio_bitrate;
use crate::{Result, UpgraderError};

/// Tags and stream properties that the matcher and comparator work from.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackTags {
    pub path: PathBuf,
    pub title: String,
    pub artist: String,
    pub album: String,
    pub codec: AudioCodec,
    pub container: Container,
    /// Bitrate of the audio stream in kbps. Tag bytes such as artwork are excluded.
    pub bitrate: Option<u32>,
    pub year: Option<String>,
}

/// Read-only access to a media file's tags.
pub trait TagReader {
    fn read_tags(&self, path: &Path) -> Result<TrackTags>;
}

/// Rewrites the date tag of a media file in place.
pub trait TagWriter {
    fn write_year(&self, path: &Path, year: &str) -> Result<()>;
}

pub struct MetadataExtractor;

impl MetadataExtractor {
    pub fn new() -> Self {
        Self
    }

    pub fn extract_metadata(path: impl AsRef<Path>) -> Result<TrackTags> {
        let path = path.as_ref();
        let unreadable = |reason: String| UpgraderError::UnreadableMedia {
            path: path.to_path_buf(),
            reason,
        };

        let file = std::fs::File::open(path).map_err(|e| unreadable(e.to_string()))?;

        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        // Create hint to help with format detection
        let mut hint = Hint::new();
        if let Some(extension) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(extension);
        }

        let mut probed = symphonia::default::get_probe()
            .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .map_err(|e| unreadable(e.to_string()))?;

        // ID3v2 tags surface while probing, container tags on the format reader.
        let mut tags: Vec<Tag> = Vec::new();
        if let Some(metadata) = probed.metadata.get() {
            if let Some(revision) = metadata.current() {
                tags.extend(revision.tags().iter().cloned());
            }
        }
        let mut format = probed.format;
        if let Some(revision) = format.metadata().current() {
            tags.extend(revision.tags().iter().cloned());
        }

        let track = format
            .default_track()
            .ok_or_else(|| unreadable("no audio track".into()))?;
        let params = &track.codec_params;

        let codec = codec_from_type(params.codec);

        let find = |key: StandardTagKey| {
            tags.iter()
                .find(|tag| tag.std_key == Some(key))
                .map(|tag| tag.value.to_string().trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let title = find(StandardTagKey::TrackTitle).ok_or_else(|| unreadable("missing title tag".into()))?;
        let artist = find(StandardTagKey::Artist).ok_or_else(|| unreadable("missing artist tag".into()))?;
        let album = find(StandardTagKey::Album).ok_or_else(|| unreadable("missing album tag".into()))?;
        let year = find(StandardTagKey::Date).and_then(|date| year_of(&date));

        Ok(TrackTags {
            path: path.to_path_buf(),
            title,
            artist,
            album,
            codec,
            container: Container::from_path(path),
            bitrate: audio_bitrate(path),
            year,
        })
    }
}

impl Default for MetadataExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl TagReader for MetadataExtractor {
    fn read_tags(&self, path: &Path) -> Result<TrackTags> {
        Self::extract_metadata(path)
    }
}

fn codec_from_type(codec: CodecType) -> AudioCodec {
    match codec {
        CODEC_TYPE_MP3 => AudioCodec::Mp3,
        CODEC_TYPE_AAC => AudioCodec::Aac,
        CODEC_TYPE_FLAC => AudioCodec::Flac,
        CODEC_TYPE_ALAC => AudioCodec::Alac,
        _ => AudioCodec::Other,
    }
}

/// Leading four-digit year of a date tag such as `1990` or `1990-04-01`.
pub fn year_of(date: &str) -> Option<String> {
    let year: String = date.trim().chars().take(4).collect();
    if year.len() == 4 && year.chars().all(|c| c.is_ascii_digit()) {
        Some(year)
    } else {
        None
    }
}
