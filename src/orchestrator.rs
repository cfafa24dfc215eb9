//! Running one command end to end: spawn it, format its output, shut it down on a termination
//! signal and compute the exit code of the wrapper.

use crate::config::{BufferMode, Config};
use crate::error::{OrchestratorError, RunnerError};
use crate::formatter::{LineFormatter, LogFormatter};
use crate::process_runner::ProcessRunner;
use crate::signal::{SignalSubscription, TerminationSignal};
use crate::stream_processor::{FlushPolicy, ProcessorOptions, StreamProcessor};
use std::time::Duration;
use tokio::io::AsyncWrite;
use tokio_util::sync::CancellationToken;

/// How a run ended.
#[derive(Debug)]
pub enum ExitOutcome {
    /// The command terminated on its own (or was killed by a signal it did not get from us).
    Exited { code: i32 },

    /// The wrapper received a termination signal and shut the command down.
    Signalled { signal: TerminationSignal },

    /// Waiting for the command failed.
    Failed(RunnerError),
}

impl ExitOutcome {
    /// The exit code for the wrapper itself.
    pub fn exit_code(&self) -> i32 {
        match self {
            ExitOutcome::Exited { code } => *code,
            ExitOutcome::Signalled { signal } => signal.exit_code(),
            ExitOutcome::Failed(_) => 1,
        }
    }
}

/// Sequences a [ProcessRunner] and a [StreamProcessor].
///
/// The command's exit races the signals of the given subscription. A received signal stops the
/// processor and asks the command to terminate, escalating to a kill after the graceful timeout.
/// Output is then drained for at most the drain timeout. Both timeouts apply one after the other.
pub struct Orchestrator<F, W> {
    runner: ProcessRunner,
    processor: StreamProcessor<F, W>,
    signals: SignalSubscription,
    graceful_timeout: Duration,
    drain_timeout: Duration,
}

impl<F, W> Orchestrator<F, W>
where
    F: LineFormatter,
    W: AsyncWrite + Unpin + Send + 'static,
{
    pub const DEFAULT_GRACEFUL_TIMEOUT: Duration = Duration::from_secs(5);
    pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(3);

    pub fn new(
        runner: ProcessRunner,
        processor: StreamProcessor<F, W>,
        signals: SignalSubscription,
    ) -> Self {
        Self {
            runner,
            processor,
            signals,
            graceful_timeout: Self::DEFAULT_GRACEFUL_TIMEOUT,
            drain_timeout: Self::DEFAULT_DRAIN_TIMEOUT,
        }
    }

    pub fn with_timeouts(mut self, graceful_timeout: Duration, drain_timeout: Duration) -> Self {
        self.graceful_timeout = graceful_timeout;
        self.drain_timeout = drain_timeout;
        self
    }

    /// Run the command to completion.
    ///
    /// # Errors
    ///
    /// Only if the command could not be started. How a started command ended is described by the
    /// returned [ExitOutcome].
    pub async fn run(mut self) -> Result<ExitOutcome, OrchestratorError> {
        self.runner.start()?;

        let (stdout, stderr) = self.runner.take_streams();
        let cancel = CancellationToken::new();
        let mut processing = {
            let processor = self.processor.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { processor.process_streams(cancel, stdout, stderr).await })
        };

        let mut received = None;
        let waited = tokio::select! {
            waited = self.runner.wait() => waited,
            Some(signal) = self.signals.recv() => {
                received = Some(signal);
                self.shut_down(signal).await
            }
        };

        match tokio::time::timeout(self.drain_timeout, &mut processing).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(err))) => {
                tracing::warn!(process = %self.runner.name(), error = %err, "Output processing failed");
            }
            Ok(Err(err)) => {
                tracing::warn!(process = %self.runner.name(), error = %err, "Output processing task failed");
            }
            Err(_elapsed) => {
                tracing::warn!(
                    process = %self.runner.name(),
                    timeout = ?self.drain_timeout,
                    "Output processing did not complete in time, trailing output may be lost"
                );
                self.processor.stop();
                cancel.cancel();
            }
        }

        self.runner.cleanup();
        self.signals.close();

        let outcome = match (received, waited) {
            (Some(signal), waited) => {
                if let Err(err) = waited {
                    tracing::warn!(process = %self.runner.name(), error = %err, "Failed to wait for process after signal");
                }
                ExitOutcome::Signalled { signal }
            }
            (None, Ok(())) => ExitOutcome::Exited {
                code: self.runner.exit_code(),
            },
            (None, Err(err)) => ExitOutcome::Failed(err),
        };
        tracing::debug!(process = %self.runner.name(), ?outcome, "Run finished");
        Ok(outcome)
    }

    async fn shut_down(&mut self, signal: TerminationSignal) -> Result<(), RunnerError> {
        tracing::warn!(process = %self.runner.name(), %signal, "Received signal, initiating graceful shutdown");

        self.processor.stop();
        if let Err(err) = self.runner.stop() {
            tracing::warn!(process = %self.runner.name(), error = %err, "Failed to stop process gracefully");
        }

        match tokio::time::timeout(self.graceful_timeout, self.runner.wait()).await {
            Ok(waited) => waited,
            Err(_elapsed) => {
                tracing::warn!(
                    process = %self.runner.name(),
                    timeout = ?self.graceful_timeout,
                    "Graceful shutdown timed out, killing process"
                );
                if let Err(err) = self.runner.kill() {
                    tracing::warn!(process = %self.runner.name(), error = %err, "Failed to kill process");
                }
                self.runner.wait().await
            }
        }
    }
}

/// Run `command`, writing its formatted output to stdout, shutting it down on `SIGINT`/`SIGTERM`.
pub async fn run_command(
    config: &Config,
    command: Vec<String>,
) -> Result<ExitOutcome, OrchestratorError> {
    let runner = ProcessRunner::new(command)?;
    let formatter = LogFormatter::new(config)?;

    let flush = match config.output.buffer {
        BufferMode::Line | BufferMode::None => FlushPolicy::PerLine,
        BufferMode::Full => FlushPolicy::OnCompletion,
    };
    let processor = StreamProcessor::with_options(
        formatter,
        tokio::io::BufWriter::new(tokio::io::stdout()),
        ProcessorOptions {
            flush,
            ..Default::default()
        },
    );

    let signals = SignalSubscription::os(&[
        TerminationSignal::Interrupt,
        TerminationSignal::Terminate,
    ])
    .map_err(OrchestratorError::Signals)?;

    Orchestrator::new(runner, processor, signals).run().await
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::signal::SignalSender;
    use crate::stream_processor::StreamKind;
    use assertr::prelude::*;
    use std::time::Instant;
    use tracing_test::traced_test;

    fn tagging_formatter(line: &str, kind: StreamKind) -> String {
        match kind {
            StreamKind::Stdout => format!("OUT {line}"),
            StreamKind::Stderr => format!("ERR {line}"),
        }
    }

    type TestProcessor = StreamProcessor<fn(&str, StreamKind) -> String, Vec<u8>>;

    struct Harness {
        orchestrator: Orchestrator<fn(&str, StreamKind) -> String, Vec<u8>>,
        processor: TestProcessor,
        signals: SignalSender,
    }

    fn harness(command: &[&str]) -> Harness {
        let (_relay_sender, relay) = SignalSubscription::channel();
        let runner = ProcessRunner::new(command.iter().copied())
            .unwrap()
            .with_signal_subscription(relay);
        let processor: TestProcessor = StreamProcessor::new(
            tagging_formatter as fn(&str, StreamKind) -> String,
            Vec::new(),
        );
        let (signals, subscription) = SignalSubscription::channel();
        Harness {
            orchestrator: Orchestrator::new(runner, processor.clone(), subscription),
            processor,
            signals,
        }
    }

    async fn sink_lines(processor: &TestProcessor) -> Vec<String> {
        let mut lines: Vec<String> = String::from_utf8_lossy(&processor.sink().await)
            .lines()
            .map(str::to_string)
            .collect();
        lines.sort();
        lines
    }

    #[tokio::test]
    async fn passes_through_exit_code_of_command() {
        let harness = harness(&["sh", "-c", "echo hi; echo oops >&2; exit 4"]);

        let outcome = harness.orchestrator.run().await.unwrap();

        assert_that(matches!(outcome, ExitOutcome::Exited { code: 4 })).is_true();
        assert_that(outcome.exit_code()).is_equal_to(4);
        assert_that(sink_lines(&harness.processor).await).contains_exactly(&["ERR oops", "OUT hi"]);
        drop(harness.signals);
    }

    #[tokio::test]
    async fn formats_all_lines_of_successful_command() {
        let harness = harness(&["printf", "a\\nb\\nc"]);

        let outcome = harness.orchestrator.run().await.unwrap();

        assert_that(outcome.exit_code()).is_equal_to(0);
        assert_that(sink_lines(&harness.processor).await).contains_exactly(&["OUT a", "OUT b", "OUT c"]);
    }

    #[tokio::test]
    #[traced_test]
    async fn maps_received_signal_to_exit_code() {
        let harness = harness(&["sleep", "30"]);
        let signals = harness.signals.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            signals.send(TerminationSignal::Interrupt).await.unwrap();
        });

        let outcome = tokio::time::timeout(Duration::from_secs(10), harness.orchestrator.run())
            .await
            .expect("run did not finish")
            .unwrap();

        assert_that(matches!(
            outcome,
            ExitOutcome::Signalled {
                signal: TerminationSignal::Interrupt
            }
        ))
        .is_true();
        assert_that(outcome.exit_code()).is_equal_to(130);
        assert!(logs_contain("initiating graceful shutdown"));
    }

    #[tokio::test]
    #[traced_test]
    async fn kills_command_ignoring_termination() {
        let graceful = Duration::from_millis(300);
        let drain = Duration::from_millis(300);
        let harness = harness(&["sh", "-c", "trap '' TERM INT; echo ready; exec sleep 30"]);
        let orchestrator = harness.orchestrator.with_timeouts(graceful, drain);
        let signals = harness.signals.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            signals.send(TerminationSignal::Terminate).await.unwrap();
        });

        let started = Instant::now();
        let outcome = tokio::time::timeout(Duration::from_secs(10), orchestrator.run())
            .await
            .expect("run did not finish")
            .unwrap();

        assert_that(outcome.exit_code()).is_equal_to(143);
        // Signal delay, both budgets and some slack.
        assert_that(started.elapsed() < Duration::from_secs(3)).is_true();
        assert!(logs_contain("Graceful shutdown timed out, killing process"));
    }

    #[tokio::test]
    #[traced_test]
    async fn stops_waiting_for_output_after_drain_timeout() {
        let drain = Duration::from_millis(300);
        // The background sleep keeps both pipes open after the shell exited.
        let harness = harness(&["sh", "-c", "sleep 5 & echo hi; exit 2"]);
        let orchestrator = harness
            .orchestrator
            .with_timeouts(Duration::from_millis(200), drain);

        let started = Instant::now();
        let outcome = tokio::time::timeout(Duration::from_secs(4), orchestrator.run())
            .await
            .expect("run did not finish")
            .unwrap();

        assert_that(matches!(outcome, ExitOutcome::Exited { code: 2 })).is_true();
        assert_that(started.elapsed() >= drain).is_true();
        assert_that(started.elapsed() < Duration::from_secs(2)).is_true();
        assert_that(sink_lines(&harness.processor).await).contains_exactly(&["OUT hi"]);
        assert!(logs_contain("did not complete in time"));
    }

    #[tokio::test]
    async fn fails_to_run_unknown_program() {
        let harness = harness(&["/definitely/not/a/program"]);

        let result = harness.orchestrator.run().await;

        assert_that(matches!(
            result,
            Err(OrchestratorError::Runner(RunnerError::SpawnFailed { .. }))
        ))
        .is_true();
    }

    #[tokio::test]
    async fn rejects_empty_command_before_spawning() {
        let result = run_command(&Config::default(), Vec::new()).await;

        assert_that(matches!(
            result,
            Err(OrchestratorError::Runner(RunnerError::EmptyCommand))
        ))
        .is_true();
    }

    #[test]
    fn failed_outcome_maps_to_generic_error_code() {
        let outcome = ExitOutcome::Failed(RunnerError::NotStarted {
            process_name: "x".to_string(),
        });

        assert_that(outcome.exit_code()).is_equal_to(1);
    }
}
