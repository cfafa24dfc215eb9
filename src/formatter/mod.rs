//! Turning a raw line of the wrapped command into the line written to stdout.

mod level;
mod template;

pub use template::PrefixTemplate;

use crate::config::{Color, Config, OutputFormat, PidFormat, UserFormat};
use crate::error::FormatterError;
use crate::stream_processor::StreamKind;
use jiff::fmt::strtime;
use jiff::tz::TimeZone;
use jiff::{Timestamp, Zoned};
use level::LevelDetector;
use serde::Serialize;
use template::TemplateData;

const RESET: &str = "\x1b[0m";

/// Formats single lines read from one of the wrapped command's streams.
///
/// Implementations are called concurrently by the stdout and stderr readers.
/// An empty line must be formatted to an empty string.
pub trait LineFormatter: Send + Sync + 'static {
    fn format_line(&self, line: &str, kind: StreamKind) -> String;
}

impl<T> LineFormatter for T
where
    T: Fn(&str, StreamKind) -> String + Send + Sync + 'static,
{
    fn format_line(&self, line: &str, kind: StreamKind) -> String {
        self(line, kind)
    }
}

/// Colors in effect when coloring is enabled.
#[derive(Debug, Clone, Copy)]
struct Palette {
    info: Color,
    error: Color,
    timestamp: Color,
}

impl Palette {
    fn for_level(&self, level: &str) -> Color {
        match level.to_uppercase().as_str() {
            "ERROR" | "FATAL" | "PANIC" => self.error,
            "INFO" | "DEBUG" | "TRACE" | "WARN" | "WARNING" => self.info,
            _ => Color::None,
        }
    }
}

fn paint(out: &mut String, text: &str, color: Color) {
    let code = color.ansi_code();
    if code.is_empty() {
        out.push_str(text);
    } else {
        out.push_str(code);
        out.push_str(text);
        out.push_str(RESET);
    }
}

/// The configurable formatter: a timestamp, a detected level, the user and the pid of the wrapper,
/// rendered as text, JSON or `key=value` pairs.
#[derive(Debug)]
pub struct LogFormatter {
    output: OutputFormat,
    template: PrefixTemplate,
    timestamp_format: String,
    utc: bool,
    palette: Option<Palette>,
    levels: LevelDetector,
    user: String,
    pid: String,
}

impl LogFormatter {
    /// Everything except the timestamp and level is resolved once, here.
    ///
    /// # Errors
    ///
    /// Fails on an unparsable template or timestamp format and when the current user cannot be
    /// looked up.
    pub fn new(config: &Config) -> Result<Self, FormatterError> {
        let prefix = &config.prefix;
        let template = PrefixTemplate::parse(&prefix.template)?;

        let timestamp_format = prefix.timestamp.format.clone();
        format_timestamp(&timestamp_format, prefix.timestamp.utc).map_err(|err| {
            FormatterError::TimestampFormat {
                format: timestamp_format.clone(),
                reason: err.to_string(),
            }
        })?;

        let user = match prefix.user.enabled {
            true => user_string(prefix.user.format)?,
            false => String::new(),
        };
        let pid = match prefix.pid.enabled {
            true => pid_string(std::process::id(), prefix.pid.format),
            false => String::new(),
        };
        let palette = prefix.colors.enabled.then_some(Palette {
            info: prefix.colors.info,
            error: prefix.colors.error,
            timestamp: prefix.colors.timestamp,
        });

        Ok(Self {
            output: config.output.format,
            template,
            timestamp_format,
            utc: prefix.timestamp.utc,
            palette,
            levels: LevelDetector::new(&config.log_level),
            user,
            pid,
        })
    }

    fn timestamp(&self) -> String {
        format_timestamp(&self.timestamp_format, self.utc).unwrap_or_default()
    }

    fn format_text(&self, data: &TemplateData<'_>) -> String {
        let mut prefix = String::new();
        self.template.render_into(data, &mut prefix);

        let Some(palette) = &self.palette else {
            prefix.push_str(data.line);
            return prefix;
        };
        let mut out = String::with_capacity(prefix.len() + data.line.len() + 16);
        paint(&mut out, &prefix, palette.timestamp);
        paint(&mut out, data.line, palette.for_level(data.level));
        out
    }

    fn format_json(&self, data: &TemplateData<'_>) -> String {
        #[derive(Serialize)]
        struct JsonLine<'a> {
            level: &'a str,
            message: &'a str,
            pid: &'a str,
            timestamp: &'a str,
            user: &'a str,
        }

        let record = JsonLine {
            level: data.level,
            message: data.line,
            pid: data.pid,
            timestamp: data.timestamp,
            user: data.user,
        };
        serde_json::to_string(&record).unwrap_or_else(|_| data.line.to_string())
    }

    fn format_structured(&self, data: &TemplateData<'_>) -> String {
        format!(
            "timestamp={} level={} user={} pid={} message={:?}",
            quote_if_needed(data.timestamp),
            quote_if_needed(data.level),
            quote_if_needed(data.user),
            quote_if_needed(data.pid),
            data.line,
        )
    }
}

impl LineFormatter for LogFormatter {
    fn format_line(&self, line: &str, kind: StreamKind) -> String {
        if line.is_empty() {
            return String::new();
        }

        let timestamp = self.timestamp();
        let level = self.levels.detect(line, kind);
        let data = TemplateData {
            timestamp: &timestamp,
            level: &level,
            user: &self.user,
            pid: &self.pid,
            line,
        };

        match self.output {
            OutputFormat::Text => self.format_text(&data),
            OutputFormat::Json => self.format_json(&data),
            OutputFormat::Structured => self.format_structured(&data),
        }
    }
}

/// Format the current time with a strftime format.
///
/// A bare `%f` renders microseconds (six digits). Explicit widths like `%3f` are kept.
pub(crate) fn format_timestamp(format: &str, utc: bool) -> Result<String, jiff::Error> {
    let now = match utc {
        true => Timestamp::now().to_zoned(TimeZone::UTC),
        false => Zoned::now(),
    };
    strtime::format(pin_fraction_width(format).as_str(), &now)
}

/// Rewrites `%f` to `%6f`, leaving escaped `%%` and every other directive untouched.
fn pin_fraction_width(format: &str) -> String {
    let mut pinned = String::with_capacity(format.len() + 2);
    let mut chars = format.chars();
    while let Some(c) = chars.next() {
        if c != '%' {
            pinned.push(c);
            continue;
        }
        match chars.next() {
            Some('f') => pinned.push_str("%6f"),
            Some(next) => {
                pinned.push('%');
                pinned.push(next);
            }
            None => pinned.push('%'),
        }
    }
    pinned
}

fn pid_string(pid: u32, format: PidFormat) -> String {
    match format {
        PidFormat::Decimal => pid.to_string(),
        PidFormat::Hex => format!("0x{pid:x}"),
    }
}

fn user_string(format: UserFormat) -> Result<String, FormatterError> {
    let (name, uid) = current_user()?;
    Ok(match format {
        UserFormat::Username => name,
        UserFormat::Uid => uid,
        UserFormat::Full => format!("{name}({uid})"),
    })
}

/// Name and id of the user running this process.
#[cfg(unix)]
fn current_user() -> Result<(String, String), FormatterError> {
    use nix::unistd::{Uid, User};

    let uid = Uid::current();
    let user = User::from_uid(uid).map_err(|err| FormatterError::UserLookup {
        source: std::io::Error::from(err),
    })?;
    // Users without a passwd entry (common in containers) are named by their id.
    let name = match user {
        Some(user) => user.name,
        None => uid.to_string(),
    };
    Ok((name, uid.to_string()))
}

#[cfg(not(unix))]
fn current_user() -> Result<(String, String), FormatterError> {
    let name = std::env::var("USERNAME").map_err(|err| FormatterError::UserLookup {
        source: std::io::Error::new(std::io::ErrorKind::NotFound, err),
    })?;
    Ok((name, String::new()))
}

fn needs_quoting(value: &str) -> bool {
    value.chars().any(|c| {
        matches!(c, ' ' | '\t' | '\n' | '\r' | '"' | '\'' | '\\' | '=') || c.is_control()
    })
}

fn quote_if_needed(value: &str) -> String {
    match needs_quoting(value) {
        true => format!("{value:?}"),
        false => value.to_string(),
    }
}
