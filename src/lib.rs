pub mod cli;
pub mod config;
mod error;
mod formatter;
mod line_reader;
pub mod logging;
mod orchestrator;
mod paths;
mod process_runner;
mod signal;
mod stream_processor;

pub use error::{
    ConfigError, FormatterError, OrchestratorError, ProcessingError, RunnerError, StreamError,
    StreamFailure, StreamFailures, TemplateError,
};
pub use formatter::{LineFormatter, LogFormatter, PrefixTemplate};
pub use line_reader::{LineParsingOptions, NumBytes, NumBytesExt};
pub use orchestrator::{ExitOutcome, Orchestrator, run_command};
pub use process_runner::{ProcessRunner, RunnerState};
pub use signal::{SignalSender, SignalSubscription, TerminationSignal};
pub use stream_processor::{FlushPolicy, ProcessorOptions, StreamKind, StreamProcessor};
