use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use crate::pipeline::records::MaterializedFile;
use crate::Result;

const BACKUP_EXTENSION: &str = "bak";

/// Collision-safe file placement. Nothing already on disk is replaced
/// without first being renamed to a backup.
pub struct FileManager;

impl FileManager {
    pub fn new() -> Self {
        Self
    }

    /// `x.mp3` backs up to `x.bak`, then `x.1.bak`, `x.2.bak`, ... while taken.
    pub fn backup_path(&self, target: &Path) -> PathBuf {
        let mut backup = target.with_extension(BACKUP_EXTENSION);
        let stem = target.file_stem().and_then(|s| s.to_str()).unwrap_or("backup");
        let mut counter = 1;
        while backup.exists() {
            backup = target.with_file_name(format!("{}.{}.{}", stem, counter, BACKUP_EXTENSION));
            counter += 1;
        }
        backup
    }

    /// Copies `source` byte for byte to `destination`, creating parent
    /// directories and backing up any existing occupant first.
    pub fn place_copy(&self, source: &Path, destination: &Path) -> Result<MaterializedFile> {
        if destination.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("target {} is a directory", destination.display()),
            )
            .into());
        }

        if let (Ok(a), Ok(b)) = (fs::canonicalize(source), fs::canonicalize(destination)) {
            if a == b {
                log::info!("\t{} is already in place", destination.display());
                return Ok(MaterializedFile { path: destination.to_path_buf(), target_existed: false });
            }
        }

        if let Some(parent) = destination.parent() {
            self.ensure_directory(parent)?;
        }

        // Copy next to the target first so a failed copy never leaves a partial file in place.
        let partial = destination.with_extension("part");
        fs::copy(source, &partial)?;

        let target_existed = destination.exists();
        if target_existed {
            let backup = self.backup_path(destination);
            fs::rename(destination, &backup)?;
            log::info!("\tBacked up previous file to {}", backup.display());
        }
        fs::rename(&partial, destination)?;
        log::info!("\tPlaced {} at {}", source.display(), destination.display());

        Ok(MaterializedFile { path: destination.to_path_buf(), target_existed })
    }

    /// Deletes `path`, returning whether it existed.
    pub fn remove_if_exists(&self, path: &Path) -> Result<bool> {
        match fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    pub fn ensure_directory(&self, path: impl AsRef<Path>) -> Result<()> {
        fs::create_dir_all(path.as_ref())?;
        Ok(())
    }
}

impl Default for FileManager {
    fn default() -> Self {
        Self::new()
    }
}
