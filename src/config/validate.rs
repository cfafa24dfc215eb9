use crate::config::VALID_LEVELS;
use crate::config::model::Config;
use crate::error::ConfigError;
use crate::formatter::{PrefixTemplate, format_timestamp};
use crate::stream_processor::StreamKind;

/// Check a merged configuration before it is handed to the formatter.
///
/// This checks:
/// - the template is non-empty and parses
/// - the timestamp format is non-empty and can format the current time
/// - both stream default levels are known
/// - detection is not disabled while keywords are configured
/// - every keyword level is known and carries at least one non-empty keyword
///
/// Colors and the various format selectors are typed and were checked while deserializing.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    validate_prefix(config)?;
    validate_log_level(config)?;
    Ok(())
}

fn validate_prefix(config: &Config) -> Result<(), ConfigError> {
    let prefix = &config.prefix;
    if prefix.template.is_empty() {
        return Err(ConfigError::TemplateEmpty);
    }
    PrefixTemplate::parse(&prefix.template)?;

    let format = &prefix.timestamp.format;
    if format.is_empty() {
        return Err(ConfigError::TimestampFormatEmpty);
    }
    format_timestamp(format, prefix.timestamp.utc).map_err(|err| {
        ConfigError::InvalidTimestampFormat {
            format: format.clone(),
            reason: err.to_string(),
        }
    })?;

    Ok(())
}

fn validate_log_level(config: &Config) -> Result<(), ConfigError> {
    let log_level = &config.log_level;
    for (stream, level) in [
        (StreamKind::Stdout, &log_level.default_stdout),
        (StreamKind::Stderr, &log_level.default_stderr),
    ] {
        if !is_valid_level(level) {
            return Err(ConfigError::InvalidDefaultLevel {
                stream,
                level: level.clone(),
            });
        }
    }

    let Some(keywords) = &log_level.detection.keywords else {
        return Ok(());
    };
    if !log_level.detection.enabled && !keywords.is_empty() {
        return Err(ConfigError::DetectionDisabledWithKeywords);
    }
    for (level, words) in keywords {
        if !is_valid_level(&level.to_uppercase()) {
            return Err(ConfigError::InvalidLevel {
                level: level.clone(),
            });
        }
        if words.is_empty() {
            return Err(ConfigError::NoDetectionKeywords {
                level: level.clone(),
            });
        }
        if words.iter().any(String::is_empty) {
            return Err(ConfigError::EmptyKeyword {
                level: level.clone(),
            });
        }
    }

    Ok(())
}

/// Known levels, written either all upper or all lower case.
fn is_valid_level(level: &str) -> bool {
    VALID_LEVELS
        .iter()
        .any(|valid| *valid == level || valid.to_lowercase() == level)
}
