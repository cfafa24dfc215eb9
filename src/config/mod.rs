//! Configuration of the line formatter.
//!
//! - The YAML-backed data model with its built-in defaults (`model.rs`).
//! - Locating and loading a config file, applying command line overrides (`loader.rs`).
//! - Validation of a merged configuration (`validate.rs`).

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{Overrides, find_config_file, load, load_from_path, validate_config_path};
pub use model::{
    BufferMode, Color, ColorsConfig, Config, DetectionConfig, LogLevelConfig, OutputConfig,
    OutputFormat, PidConfig, PidFormat, PrefixConfig, TimestampConfig, UserConfig, UserFormat,
};
pub use validate::validate_config;

/// Color names accepted in `prefix.colors`, compared case-insensitively.
pub const VALID_COLORS: &[&str] = &[
    "black", "red", "green", "yellow", "blue", "magenta", "cyan", "white", "none",
];

/// Level names accepted as stream defaults and detection keys, all upper or all lower case.
pub const VALID_LEVELS: &[&str] = &["TRACE", "DEBUG", "INFO", "WARN", "ERROR", "FATAL"];
