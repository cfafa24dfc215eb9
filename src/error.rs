//! Error types for process, stream, configuration and formatting operations.

use crate::line_reader::NumBytes;
use crate::stream_processor::StreamKind;
use std::fmt::{self, Display, Formatter};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by the [crate::ProcessRunner].
#[derive(Debug, Error)]
pub enum RunnerError {
    /// The command vector was empty.
    #[error("Command cannot be empty")]
    EmptyCommand,

    /// The executable path traverses into a parent directory.
    #[error("Path traversal not allowed in command '{program}'")]
    PathTraversal {
        /// The rejected executable path.
        program: String,
    },

    /// `start` was called more than once.
    #[error("Process '{process_name}' was already started")]
    AlreadyStarted {
        /// The name of the process.
        process_name: String,
    },

    /// `wait` was called before `start`.
    #[error("Process '{process_name}' was not started")]
    NotStarted {
        /// The name of the process.
        process_name: String,
    },

    /// Failed to spawn the process.
    #[error("Failed to spawn process '{process_name}': {source}")]
    SpawnFailed {
        /// The name of the process.
        process_name: String,
        /// The underlying IO error.
        #[source]
        source: io::Error,
    },

    /// Waiting for the process failed at the OS level. A non-zero exit is not reported here.
    #[error("IO error occurred while waiting for process '{process_name}': {source}")]
    WaitFailed {
        /// The name of the process.
        process_name: String,
        /// The underlying IO error.
        #[source]
        source: io::Error,
    },

    /// Failed to send a signal to the process.
    #[error("Failed to send '{signal}' signal to process '{process_name}': {source}")]
    SignallingFailed {
        /// The name of the process.
        process_name: String,
        /// The signal that could not be sent.
        signal: &'static str,
        /// The underlying IO error.
        #[source]
        source: io::Error,
    },
}

/// A fault on one stream. Cloneable, so collected errors can be handed out as copies.
#[derive(Debug, Clone, Error)]
pub enum StreamError {
    /// Reading from the stream failed for a reason other than end-of-stream or shutdown.
    #[error("failed to read from stream: {source}")]
    Read {
        #[source]
        source: Arc<io::Error>,
    },

    /// A single line exceeded the configured maximum.
    #[error("line exceeds the maximum length of {max_line_length}")]
    LineTooLong { max_line_length: NumBytes },

    /// Writing a formatted line to the sink failed.
    #[error("failed to write to output: {source}")]
    Write {
        #[source]
        source: Arc<io::Error>,
    },

    /// The reader task panicked or was aborted.
    #[error("reader task terminated abnormally: {reason}")]
    TaskFailed { reason: String },
}

impl StreamError {
    pub(crate) fn read(source: io::Error) -> Self {
        StreamError::Read {
            source: Arc::new(source),
        }
    }

    pub(crate) fn write(source: io::Error) -> Self {
        StreamError::Write {
            source: Arc::new(source),
        }
    }
}

/// A [StreamError] tagged with the stream it occurred on.
#[derive(Debug, Clone, Error)]
#[error("{stream} processing error: {error}")]
pub struct StreamFailure {
    pub stream: StreamKind,
    #[source]
    pub error: StreamError,
}

/// Every stream fault collected during one processing run, in the order they were recorded.
#[derive(Debug, Clone, Default)]
pub struct StreamFailures(Vec<StreamFailure>);

impl StreamFailures {
    pub(crate) fn new(failures: Vec<StreamFailure>) -> Self {
        Self(failures)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &StreamFailure> {
        self.0.iter()
    }

    /// The first error recorded for `stream`, if any.
    pub fn get(&self, stream: StreamKind) -> Option<&StreamError> {
        self.0
            .iter()
            .find(|failure| failure.stream == stream)
            .map(|failure| &failure.error)
    }

    pub fn failed(&self, stream: StreamKind) -> bool {
        self.get(stream).is_some()
    }

    pub fn into_inner(self) -> Vec<StreamFailure> {
        self.0
    }
}

impl Display for StreamFailures {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for (i, failure) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{failure}")?;
        }
        Ok(())
    }
}

/// Errors raised by the [crate::StreamProcessor].
#[derive(Debug, Error)]
pub enum ProcessingError {
    /// A reader handle was absent.
    #[error("stdout and stderr readers cannot be absent")]
    ReadersMissing,

    /// At least one stream failed.
    #[error("Processing errors occurred: {0}")]
    Streams(StreamFailures),

    /// The reader tasks did not complete in time.
    #[error("Stream processing did not complete within {timeout:?}")]
    Timeout { timeout: Duration },
}

/// Errors in a prefix template.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("failed to parse template: unclosed action starting at byte {position}")]
    UnclosedAction { position: usize },

    #[error("failed to parse template: unknown field '{name}'")]
    UnknownField { name: String },
}

/// Errors raised while building the [crate::LogFormatter].
#[derive(Debug, Error)]
pub enum FormatterError {
    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error("invalid strftime format '{format}': {reason}")]
    TimestampFormat { format: String, reason: String },

    #[error("failed to get user info: {source}")]
    UserLookup {
        #[source]
        source: io::Error,
    },
}

/// Errors raised while loading or validating the configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("template cannot be empty")]
    TemplateEmpty,

    #[error("invalid template: {0}")]
    InvalidTemplate(#[from] TemplateError),

    #[error("timestamp format cannot be empty")]
    TimestampFormatEmpty,

    #[error("invalid strftime format '{format}': {reason}")]
    InvalidTimestampFormat { format: String, reason: String },

    #[error("invalid color '{value}', valid colors: {valid}", valid = crate::config::VALID_COLORS.join(", "))]
    InvalidColor { value: String },

    #[error("invalid default {stream} log level '{level}', valid levels: {valid}", valid = crate::config::VALID_LEVELS.join(", "))]
    InvalidDefaultLevel { stream: StreamKind, level: String },

    #[error("invalid log level '{level}' in detection keywords")]
    InvalidLevel { level: String },

    #[error("log level has no detection keywords '{level}'")]
    NoDetectionKeywords { level: String },

    #[error("empty keyword in detection keywords for level '{level}'")]
    EmptyKeyword { level: String },

    #[error("detection disabled but keywords are configured")]
    DetectionDisabledWithKeywords,

    #[error("path traversal not allowed: '{}'", .path.display())]
    PathTraversal { path: PathBuf },

    #[error("only .yaml and .yml files are allowed: '{}'", .path.display())]
    InvalidFileType { path: PathBuf },

    #[error("failed to read config file '{}': {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse YAML config '{}': {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Errors preventing the orchestrator from running a command at all.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("failed to create process runner: {0}")]
    Runner(#[from] RunnerError),

    #[error("failed to create formatter: {0}")]
    Formatter(#[from] FormatterError),

    #[error("failed to subscribe to termination signals: {0}")]
    Signals(#[source] io::Error),
}
