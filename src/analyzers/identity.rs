use std::path::Path;
use any_ascii::any_ascii;
use once_cell::sync::Lazy;
use regex::Regex;
use crate::audio::metadata::{TagReader, TrackTags};

static MULTI_SPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Trailing "(...)" or "[...]" groups, e.g. "(Remastered)" or "[Live]".
static BRACKET_SUFFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s*[\(\[][^\(\)\[\]]*[\)\]]\s*$").unwrap());

/// Lower-cases and transliterates to ASCII so that curly apostrophes,
/// typographic dashes and accented letters compare equal to their plain forms.
pub fn normalize(text: &str) -> String {
    let ascii = any_ascii(text).to_lowercase();
    MULTI_SPACE.replace_all(ascii.trim(), " ").into_owned()
}

/// Removes every trailing parenthetical or bracketed group from a title.
pub fn strip_title_suffixes(title: &str) -> String {
    let mut stripped = title.trim().to_string();
    loop {
        let next = BRACKET_SUFFIX.replace(&stripped, "").into_owned();
        if next == stripped || next.is_empty() {
            return stripped;
        }
        stripped = next;
    }
}

/// Title, album and artist must be equal after normalization.
pub fn same_identity(a: &TrackTags, b: &TrackTags) -> bool {
    normalize(&a.title) == normalize(&b.title)
        && normalize(&a.album) == normalize(&b.album)
        && normalize(&a.artist) == normalize(&b.artist)
}

pub struct IdentityMatcher<'a> {
    reader: &'a dyn TagReader,
}

impl<'a> IdentityMatcher<'a> {
    pub fn new(reader: &'a dyn TagReader) -> Self {
        Self { reader }
    }

    /// Never fails: a file whose tags cannot be read matches nothing.
    pub fn is_same_track(&self, a: &Path, b: &Path) -> bool {
        let (tags_a, tags_b) = match (self.reader.read_tags(a), self.reader.read_tags(b)) {
            (Ok(tags_a), Ok(tags_b)) => (tags_a, tags_b),
            (Err(e), _) | (_, Err(e)) => {
                log::debug!("Treating as different tracks: {}", e);
                return false;
            }
        };

        let same = same_identity(&tags_a, &tags_b);
        if !same {
            log::debug!(
                "Tags differ: '{}' / '{}' / '{}' vs '{}' / '{}' / '{}'",
                tags_a.title, tags_a.artist, tags_a.album,
                tags_b.title, tags_b.artist, tags_b.album
            );
        }
        same
    }
}
