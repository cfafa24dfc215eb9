//! Command line parsing using `clap`.

use crate::config::{OutputFormat, Overrides};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// Command line arguments of `logwrap`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "logwrap",
    version,
    about = "Run a command and prefix every line of its output with a timestamp, level, user and pid.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to a YAML config file.
    ///
    /// When omitted, `logwrap.yaml`, `logwrap.yml`, `.logwrap.yaml` and `.logwrap.yml` are looked
    /// up in the working directory, then `~/.config/logwrap/config.yaml` and friends.
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Prefix template, e.g. `"[{{.Timestamp}}] [{{.Level}}] "`.
    #[arg(long, value_name = "TEMPLATE")]
    pub template: Option<String>,

    /// Render timestamps in UTC (`--utc=false` forces local time).
    #[arg(long, value_name = "BOOL", num_args = 0..=1, require_equals = true, default_missing_value = "true")]
    pub utc: Option<bool>,

    /// Colorize output (`--colors=false` disables colors).
    #[arg(long, value_name = "BOOL", num_args = 0..=1, require_equals = true, default_missing_value = "true")]
    pub colors: Option<bool>,

    /// Output format.
    #[arg(long, value_enum, value_name = "FORMAT")]
    pub format: Option<OutputFormat>,

    /// Diagnostics level of logwrap itself (error, warn, info, debug, trace).
    ///
    /// If omitted, `LOGWRAP_LOG` or `warn` is used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// The command to run, followed by its arguments.
    #[arg(
        value_name = "COMMAND",
        required = true,
        trailing_var_arg = true,
        allow_hyphen_values = true
    )]
    pub command: Vec<String>,
}

impl CliArgs {
    pub fn overrides(&self) -> Overrides {
        Overrides {
            template: self.template.clone(),
            utc: self.utc,
            colors: self.colors,
            format: self.format,
        }
    }
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

#[cfg(test)]
mod tests {
    use super::*;
    use assertr::prelude::*;

    fn parse(args: &[&str]) -> CliArgs {
        CliArgs::try_parse_from(args.iter().copied()).unwrap()
    }

    #[test]
    fn everything_after_the_first_positional_is_the_command() {
        let args = parse(&["logwrap", "--utc", "ls", "-la", "--colors"]);

        assert_that(args.command).contains_exactly(&["ls", "-la", "--colors"]);
        assert_that(args.utc).is_equal_to(Some(true));
        assert_that(args.colors).is_none();
    }

    #[test]
    fn double_dash_separates_command() {
        let args = parse(&["logwrap", "--", "--weird-program", "x"]);

        assert_that(args.command).contains_exactly(&["--weird-program", "x"]);
    }

    #[test]
    fn collects_overrides() {
        let args = parse(&[
            "logwrap",
            "--config",
            "conf/logwrap.yaml",
            "--template",
            "[{{.Level}}] ",
            "--colors=false",
            "--format",
            "json",
            "--log-level",
            "debug",
            "make",
        ]);

        assert_that(args.config.clone()).is_equal_to(Some(PathBuf::from("conf/logwrap.yaml")));
        assert_that(args.log_level).is_equal_to(Some(LogLevel::Debug));
        assert_that(args.overrides()).is_equal_to(Overrides {
            template: Some("[{{.Level}}] ".to_string()),
            utc: None,
            colors: Some(false),
            format: Some(OutputFormat::Json),
        });
    }

    #[test]
    fn requires_a_command() {
        let err = CliArgs::try_parse_from(["logwrap", "--utc"]).unwrap_err();

        assert_that(err.kind()).is_equal_to(clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn rejects_unknown_format() {
        assert_that(CliArgs::try_parse_from(["logwrap", "--format", "xml", "ls"]).is_err())
            .is_true();
    }
}
