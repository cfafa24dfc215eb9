use std::fs;
use std::path::{Path, PathBuf};

use crate::config::model::{Config, OutputFormat};
use crate::config::validate::validate_config;
use crate::error::ConfigError;
use crate::paths::traverses_parent;

/// File names looked up in the working directory, in order.
const LOCAL_CANDIDATES: &[&str] = &["logwrap.yaml", "logwrap.yml", ".logwrap.yaml", ".logwrap.yml"];

/// Paths relative to the home directory, looked up after the local candidates.
const HOME_CANDIDATES: &[&str] = &[
    ".config/logwrap/config.yaml",
    ".config/logwrap/config.yml",
    ".logwrap.yaml",
    ".logwrap.yml",
];

/// Settings given on the command line. `None` keeps the configured value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Overrides {
    pub template: Option<String>,
    pub utc: Option<bool>,
    pub colors: Option<bool>,
    pub format: Option<OutputFormat>,
}

impl Overrides {
    pub fn apply(&self, config: &mut Config) {
        if let Some(template) = self.template.as_ref().filter(|t| !t.is_empty()) {
            config.prefix.template = template.clone();
        }
        if let Some(utc) = self.utc {
            config.prefix.timestamp.utc = utc;
        }
        if let Some(colors) = self.colors {
            config.prefix.colors.enabled = colors;
        }
        if let Some(format) = self.format {
            config.output.format = format;
        }
    }
}

/// Build the effective configuration: defaults, then the file at `path` (if any), then
/// `overrides`. The result is validated.
pub fn load(path: Option<&Path>, overrides: &Overrides) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(path) => load_from_path(path)?,
        None => Config::default(),
    };
    overrides.apply(&mut config);
    validate_config(&config)?;
    Ok(config)
}

/// Read a YAML config file. Omitted settings keep their defaults. Does not validate.
pub fn load_from_path(path: &Path) -> Result<Config, ConfigError> {
    validate_config_path(path)?;

    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    if contents.trim().is_empty() {
        return Ok(Config::default());
    }

    let config = serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    tracing::debug!(path = %path.display(), "Loaded configuration file");
    Ok(config)
}

/// Reject config paths climbing into a parent directory and files not ending in `.yaml`/`.yml`.
pub fn validate_config_path(path: &Path) -> Result<(), ConfigError> {
    if traverses_parent(path) {
        return Err(ConfigError::PathTraversal {
            path: path.to_path_buf(),
        });
    }

    let extension = path
        .extension()
        .map(|ext| ext.to_string_lossy().to_lowercase());
    match extension.as_deref() {
        Some("yaml" | "yml") => Ok(()),
        _ => Err(ConfigError::InvalidFileType {
            path: path.to_path_buf(),
        }),
    }
}

/// Search the standard locations for a config file.
///
/// Looks in the working directory first (`logwrap.yaml`, `logwrap.yml`, `.logwrap.yaml`,
/// `.logwrap.yml`), then in the home directory (`~/.config/logwrap/config.yaml`,
/// `~/.config/logwrap/config.yml`, `~/.logwrap.yaml`, `~/.logwrap.yml`).
pub fn find_config_file() -> Option<PathBuf> {
    let home = home_dir();
    find_config_file_in(Path::new("."), home.as_deref())
}

fn find_config_file_in(working_dir: &Path, home: Option<&Path>) -> Option<PathBuf> {
    let local = LOCAL_CANDIDATES.iter().map(|name| {
        match working_dir == Path::new(".") {
            true => PathBuf::from(name),
            false => working_dir.join(name),
        }
    });
    let global = home
        .into_iter()
        .flat_map(|home| HOME_CANDIDATES.iter().map(move |rel| home.join(rel)));

    local.chain(global).find(|candidate| candidate.is_file())
}

fn home_dir() -> Option<PathBuf> {
    let var = if cfg!(windows) { "USERPROFILE" } else { "HOME" };
    std::env::var_os(var)
        .filter(|home| !home.is_empty())
        .map(PathBuf::from)
}
