use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use serde::Deserialize;
use crate::pipeline::materialize::Placement;
use crate::pipeline::records::YearAction;
use crate::pipeline::snapshot::DEFAULT_WORKERS;
use crate::services::library::SearchStrategy;
use crate::services::player::DEFAULT_VOLUME_NAME;
use crate::{Result, UpgraderError};

#[derive(Debug, Deserialize)]
pub struct Config {
    /// Where checkpoint files are read from and written to.
    pub data_dir: PathBuf,
    #[serde(default)]
    pub default_library: Option<String>,
    pub libraries: BTreeMap<String, LibraryConfig>,
    #[serde(default)]
    pub upgrade: UpgradeSettings,
    #[serde(default)]
    pub materialize: MaterializeSettings,
    #[serde(default)]
    pub player: PlayerSettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LibraryConfig {
    /// Program and leading arguments, e.g. `["beet", "-c", "/path/config.yaml"]`.
    pub command: Vec<String>,
    /// Root of the tree the conversion tool writes into.
    pub convert_dest: PathBuf,
    /// Path component of a source file that the conversion output mirrors from.
    #[serde(default = "default_convert_source_dir")]
    pub convert_source_dir: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct UpgradeSettings {
    #[serde(default = "default_true")]
    pub compare_tags: bool,
    #[serde(default = "default_strategies")]
    pub strategies: Vec<SearchStrategy>,
    #[serde(default)]
    pub year_action: YearAction,
}

impl Default for UpgradeSettings {
    fn default() -> Self {
        Self {
            compare_tags: true,
            strategies: default_strategies(),
            year_action: YearAction::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct MaterializeSettings {
    #[serde(default)]
    pub placement: Placement,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PlayerSettings {
    #[serde(default = "default_volume_name")]
    pub volume_name: String,
    #[serde(default = "default_workers")]
    pub workers: usize,
}

impl Default for PlayerSettings {
    fn default() -> Self {
        Self {
            volume_name: default_volume_name(),
            workers: default_workers(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_strategies() -> Vec<SearchStrategy> {
    vec![SearchStrategy::Exact, SearchStrategy::Parsed]
}

fn default_convert_source_dir() -> String {
    "FLAC".into()
}

fn default_volume_name() -> String {
    DEFAULT_VOLUME_NAME.into()
}

fn default_workers() -> usize {
    DEFAULT_WORKERS
}

/// Expands a leading `~` to `$HOME`.
pub fn expand_home(path: &Path) -> PathBuf {
    expand_home_with(path, std::env::var_os("HOME").map(PathBuf::from).as_deref())
}

/// Expands a leading `~` to `home`, when there is one.
pub fn expand_home_with(path: &Path, home: Option<&Path>) -> PathBuf {
    match (path.strip_prefix("~"), home) {
        (Ok(rest), Some(home)) => home.join(rest),
        _ => path.to_path_buf(),
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Config> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            UpgraderError::Config(format!("could not read {}: {}", path.display(), e))
        })?;
        let config = Self::from_toml_str(&contents)?;
        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn from_toml_str(contents: &str) -> Result<Config> {
        let mut config: Config = toml::from_str(contents)?;
        config.data_dir = expand_home(&config.data_dir);
        for library in config.libraries.values_mut() {
            library.convert_dest = expand_home(&library.convert_dest);
        }
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.libraries.is_empty() {
            return Err(UpgraderError::Config("at least one [libraries.<name>] table is required".into()));
        }
        if let Some((name, _)) = self.libraries.iter().find(|(_, l)| l.command.is_empty()) {
            return Err(UpgraderError::Config(format!("library '{}' has an empty command", name)));
        }
        if self.upgrade.strategies.is_empty() {
            return Err(UpgraderError::Config("upgrade.strategies must not be empty".into()));
        }
        if self.player.workers == 0 {
            return Err(UpgraderError::Config("player.workers must be at least 1".into()));
        }
        Ok(())
    }

    /// The named library, else `default_library`, else the only one configured.
    pub fn library(&self, name: Option<&str>) -> Result<(&str, &LibraryConfig)> {
        let name = match name.or(self.default_library.as_deref()) {
            Some(name) => name,
            None if self.libraries.len() == 1 => self.libraries.keys().next().map(String::as_str).unwrap_or_default(),
            None => {
                return Err(UpgraderError::Config(
                    "several libraries configured; pick one with --database or default_library".into(),
                ))
            }
        };
        self.libraries
            .get_key_value(name)
            .map(|(name, library)| (name.as_str(), library))
            .ok_or_else(|| UpgraderError::Config(format!("unknown library '{}'", name)))
    }
}
