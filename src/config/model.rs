use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const DEFAULT_TEMPLATE: &str = "[{{.Timestamp}}] [{{.Level}}] [{{.User}}:{{.PID}}] ";
pub const DEFAULT_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%z";

/// Complete configuration. Every section falls back to its default when omitted.
///
/// ```yaml
/// prefix:
///   template: "[{{.Timestamp}}] [{{.Level}}] "
///   timestamp:
///     format: "%H:%M:%S"
///     utc: true
///   colors:
///     enabled: true
///     error: magenta
/// output:
///   format: structured
/// log_level:
///   default_stderr: WARN
///   detection:
///     keywords:
///       error: ["panicked at"]
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub prefix: PrefixConfig,
    pub output: OutputConfig,
    pub log_level: LogLevelConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PrefixConfig {
    /// Prefix rendered in front of every line in text output.
    pub template: String,
    pub timestamp: TimestampConfig,
    pub colors: ColorsConfig,
    pub user: UserConfig,
    pub pid: PidConfig,
}

impl Default for PrefixConfig {
    fn default() -> Self {
        Self {
            template: DEFAULT_TEMPLATE.to_string(),
            timestamp: TimestampConfig::default(),
            colors: ColorsConfig::default(),
            user: UserConfig::default(),
            pid: PidConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TimestampConfig {
    /// strftime format, e.g. `%Y-%m-%d %H:%M:%S`.
    pub format: String,
    pub utc: bool,
}

impl Default for TimestampConfig {
    fn default() -> Self {
        Self {
            format: DEFAULT_TIMESTAMP_FORMAT.to_string(),
            utc: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ColorsConfig {
    pub enabled: bool,
    pub info: Color,
    pub error: Color,
    pub timestamp: Color,
}

impl Default for ColorsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            info: Color::Green,
            error: Color::Red,
            timestamp: Color::Blue,
        }
    }
}

/// A terminal color. `none` and the empty string disable coloring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Color {
    Black,
    Red,
    Green,
    Yellow,
    Blue,
    Magenta,
    Cyan,
    White,
    None,
}

impl Color {
    /// The ANSI escape sequence selecting this color as foreground. Empty for [Color::None].
    pub fn ansi_code(self) -> &'static str {
        match self {
            Color::Black => "\x1b[30m",
            Color::Red => "\x1b[31m",
            Color::Green => "\x1b[32m",
            Color::Yellow => "\x1b[33m",
            Color::Blue => "\x1b[34m",
            Color::Magenta => "\x1b[35m",
            Color::Cyan => "\x1b[36m",
            Color::White => "\x1b[37m",
            Color::None => "",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Color::Black => "black",
            Color::Red => "red",
            Color::Green => "green",
            Color::Yellow => "yellow",
            Color::Blue => "blue",
            Color::Magenta => "magenta",
            Color::Cyan => "cyan",
            Color::White => "white",
            Color::None => "none",
        }
    }
}

impl Display for Color {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Color {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let color = match s.to_lowercase().as_str() {
            "black" => Color::Black,
            "red" => Color::Red,
            "green" => Color::Green,
            "yellow" => Color::Yellow,
            "blue" => Color::Blue,
            "magenta" => Color::Magenta,
            "cyan" => Color::Cyan,
            "white" => Color::White,
            "none" | "" => Color::None,
            _ => {
                return Err(ConfigError::InvalidColor {
                    value: s.to_string(),
                });
            }
        };
        Ok(color)
    }
}

impl TryFrom<String> for Color {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Color> for String {
    fn from(color: Color) -> Self {
        color.name().to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UserConfig {
    pub enabled: bool,
    pub format: UserFormat,
}

impl Default for UserConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            format: UserFormat::Username,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserFormat {
    /// The login name, e.g. `alice`.
    #[default]
    Username,

    /// The numeric user id, e.g. `1000`.
    Uid,

    /// Both, as `alice(1000)`.
    Full,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PidConfig {
    pub enabled: bool,
    pub format: PidFormat,
}

impl Default for PidConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            format: PidFormat::Decimal,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PidFormat {
    #[default]
    Decimal,

    /// `0x`-prefixed lower case hexadecimal.
    Hex,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutputConfig {
    pub format: OutputFormat,
    pub buffer: BufferMode,
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Rendered prefix followed by the line.
    #[default]
    Text,

    /// One JSON object per line.
    Json,

    /// `key=value` pairs.
    Structured,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BufferMode {
    /// Flush after every line.
    #[default]
    Line,

    /// Same as [BufferMode::Line].
    None,

    /// Flush once the command finished.
    Full,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogLevelConfig {
    /// Level of stdout lines matching no keyword.
    pub default_stdout: String,

    /// Level of stderr lines matching no keyword.
    pub default_stderr: String,

    pub detection: DetectionConfig,
}

impl Default for LogLevelConfig {
    fn default() -> Self {
        Self {
            default_stdout: "INFO".to_string(),
            default_stderr: "ERROR".to_string(),
            detection: DetectionConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DetectionConfig {
    pub enabled: bool,

    /// Level name to the keywords identifying it. The built-in set applies when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keywords: Option<BTreeMap<String, Vec<String>>>,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            keywords: None,
        }
    }
}

impl DetectionConfig {
    /// The keywords in effect: the configured ones, or the built-in set.
    pub fn effective_keywords(&self) -> BTreeMap<String, Vec<String>> {
        match &self.keywords {
            Some(keywords) => keywords.clone(),
            None => default_keywords(),
        }
    }
}

fn default_keywords() -> BTreeMap<String, Vec<String>> {
    fn keywords(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    BTreeMap::from([
        (
            "error".to_string(),
            keywords(&["ERROR", "FATAL", "PANIC", "error:", "Error:", "ERROR:"]),
        ),
        (
            "warn".to_string(),
            keywords(&["WARN", "WARNING", "warn:", "Warn:", "WARN:", "WARNING:"]),
        ),
        (
            "debug".to_string(),
            keywords(&["DEBUG", "TRACE", "debug:", "Debug:", "DEBUG:", "TRACE:"]),
        ),
        (
            "info".to_string(),
            keywords(&["INFO", "info:", "Info:", "INFO:"]),
        ),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use assertr::prelude::*;

    #[test]
    fn partial_yaml_falls_back_to_defaults() {
        let config: Config = serde_yaml::from_str(
            r#"
prefix:
  timestamp:
    utc: true
output:
  format: json
"#,
        )
        .unwrap();

        assert_that(config.prefix.template.as_str()).is_equal_to(DEFAULT_TEMPLATE);
        assert_that(config.prefix.timestamp.format.as_str()).is_equal_to(DEFAULT_TIMESTAMP_FORMAT);
        assert_that(config.prefix.timestamp.utc).is_true();
        assert_that(config.output.format).is_equal_to(OutputFormat::Json);
        assert_that(config.output.buffer).is_equal_to(BufferMode::Line);
        assert_that(config.log_level).is_equal_to(LogLevelConfig::default());
    }

    #[test]
    fn parses_colors_case_insensitively() {
        let colors: ColorsConfig =
            serde_yaml::from_str("enabled: true\ninfo: CYAN\nerror: Magenta\ntimestamp: ''")
                .unwrap();

        assert_that(colors.info).is_equal_to(Color::Cyan);
        assert_that(colors.error).is_equal_to(Color::Magenta);
        assert_that(colors.timestamp).is_equal_to(Color::None);
    }

    #[test]
    fn rejects_unknown_color() {
        let err = serde_yaml::from_str::<ColorsConfig>("info: purple").unwrap_err();

        assert_that(err.to_string().as_str()).contains("invalid color 'purple'");
    }

    #[test]
    fn rejects_unknown_enum_values() {
        assert_that(serde_yaml::from_str::<OutputConfig>("format: xml").is_err()).is_true();
        assert_that(serde_yaml::from_str::<UserConfig>("format: email").is_err()).is_true();
        assert_that(serde_yaml::from_str::<PidConfig>("format: octal").is_err()).is_true();
        assert_that(serde_yaml::from_str::<OutputConfig>("buffer: huge").is_err()).is_true();
    }

    #[test]
    fn built_in_keywords_apply_when_none_are_configured() {
        let detection = DetectionConfig::default();

        let keywords = detection.effective_keywords();
        assert_that(keywords.len()).is_equal_to(4);
        assert_that(keywords["error"].contains(&"PANIC".to_string())).is_true();
    }

    #[test]
    fn configured_keywords_replace_built_in_ones() {
        let detection: DetectionConfig =
            serde_yaml::from_str("keywords:\n  fatal: [\"panicked at\"]").unwrap();

        let keywords = detection.effective_keywords();
        assert_that(keywords.len()).is_equal_to(1);
        assert_that(keywords["fatal"].clone()).contains_exactly(&["panicked at"]);
    }
}
