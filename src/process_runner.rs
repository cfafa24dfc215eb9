use crate::error::RunnerError;
use crate::paths::traverses_parent;
use crate::signal::{SignalSubscription, TerminationSignal, send_signal};
use std::fmt::{self, Debug, Formatter};
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Lifecycle of a [ProcessRunner]. States only ever move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    Created,
    Started,

    /// Terminated on its own with the given exit code.
    Exited(i32),

    /// Terminated by the given signal number.
    KilledBySignal(i32),

    /// Spawning the process failed.
    StartFailed,
}

impl RunnerState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunnerState::Exited(_) | RunnerState::KilledBySignal(_) | RunnerState::StartFailed
        )
    }
}

/// Owns one child process, from spawning it to reaping it.
///
/// Stdout and stderr of the child are piped and handed out once through
/// [ProcessRunner::take_streams]. While the child runs, the termination signals this process
/// receives (interrupt, terminate, quit) are relayed to it.
pub struct ProcessRunner {
    name: String,
    command: Command,
    state: RunnerState,
    child: Option<Child>,
    pid: Option<u32>,
    stdout: Option<ChildStdout>,
    stderr: Option<ChildStderr>,
    exit_code: i32,
    signals: Option<SignalSubscription>,
    relay: Option<JoinHandle<()>>,
    relay_stop: CancellationToken,
}

impl Debug for ProcessRunner {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessRunner")
            .field("name", &self.name)
            .field("state", &self.state)
            .field("pid", &self.pid)
            .field("exit_code", &self.exit_code)
            .finish_non_exhaustive()
    }
}

impl ProcessRunner {
    /// Prepare `command` (program followed by its arguments) for execution. Nothing is spawned.
    ///
    /// # Errors
    ///
    /// - [RunnerError::EmptyCommand] if `command` yields nothing.
    /// - [RunnerError::PathTraversal] if the program path climbs into a parent directory.
    pub fn new<I, S>(command: I) -> Result<Self, RunnerError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut parts = command.into_iter().map(Into::into);
        let program: String = parts.next().ok_or(RunnerError::EmptyCommand)?;
        let args: Vec<String> = parts.collect();

        if traverses_parent(Path::new(&program)) {
            return Err(RunnerError::PathTraversal { program });
        }

        let mut name = program.clone();
        for arg in &args {
            name.push_str(" \"");
            name.push_str(arg);
            name.push('"');
        }

        let mut cmd = Command::new(&program);
        cmd.args(&args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        Ok(Self {
            name,
            command: cmd,
            state: RunnerState::Created,
            child: None,
            pid: None,
            stdout: None,
            stderr: None,
            exit_code: 0,
            signals: None,
            relay: None,
            relay_stop: CancellationToken::new(),
        })
    }

    /// Relay the signals of `subscription` instead of the ones delivered to this process.
    pub fn with_signal_subscription(mut self, subscription: SignalSubscription) -> Self {
        self.signals = Some(subscription);
        self
    }

    /// Spawn the process and start relaying termination signals to it.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// - [RunnerError::AlreadyStarted] on any call but the first.
    /// - [RunnerError::SpawnFailed] if the OS could not spawn the process. The runner is then in
    ///   its terminal [RunnerState::StartFailed] state.
    pub fn start(&mut self) -> Result<(), RunnerError> {
        if self.state != RunnerState::Created {
            return Err(RunnerError::AlreadyStarted {
                process_name: self.name.clone(),
            });
        }

        let mut child = match self.command.spawn() {
            Ok(child) => child,
            Err(source) => {
                self.state = RunnerState::StartFailed;
                return Err(RunnerError::SpawnFailed {
                    process_name: self.name.clone(),
                    source,
                });
            }
        };
        self.pid = child.id();
        self.stdout = child.stdout.take();
        self.stderr = child.stderr.take();
        self.child = Some(child);
        self.state = RunnerState::Started;
        tracing::debug!(process = %self.name, pid = ?self.pid, "Process started");

        self.install_signal_relay();
        Ok(())
    }

    fn install_signal_relay(&mut self) {
        let Some(pid) = self.pid else {
            return;
        };
        let subscription = match self.signals.take() {
            Some(subscription) => subscription,
            None => match SignalSubscription::os(&[
                TerminationSignal::Interrupt,
                TerminationSignal::Terminate,
                TerminationSignal::Quit,
            ]) {
                Ok(subscription) => subscription,
                Err(err) => {
                    tracing::warn!(
                        process = %self.name,
                        error = %err,
                        "Failed to subscribe to termination signals, signals will not be relayed"
                    );
                    return;
                }
            },
        };

        let name = self.name.clone();
        let stop = self.relay_stop.clone();
        self.relay = Some(tokio::spawn(async move {
            let mut subscription = subscription;
            loop {
                let signal = tokio::select! {
                    biased;
                    _ = stop.cancelled() => break,
                    signal = subscription.recv() => match signal {
                        Some(signal) => signal,
                        None => break,
                    },
                };
                match send_signal(pid, signal) {
                    Ok(()) => tracing::debug!(process = %name, %signal, "Relayed signal"),
                    Err(err) => tracing::warn!(
                        process = %name,
                        %signal,
                        error = %err,
                        "Failed to relay signal"
                    ),
                }
            }
            subscription.close();
        }));
    }

    /// Wait for the process to terminate and record how it terminated.
    ///
    /// A non-zero exit code is not an error. Once the process terminated, further calls return
    /// immediately. This function is cancel safe.
    ///
    /// # Errors
    ///
    /// - [RunnerError::NotStarted] if the process was never (successfully) started.
    /// - [RunnerError::WaitFailed] if waiting failed at the OS level.
    pub async fn wait(&mut self) -> Result<(), RunnerError> {
        match self.state {
            RunnerState::Started => {}
            RunnerState::Exited(_) | RunnerState::KilledBySignal(_) => return Ok(()),
            RunnerState::Created | RunnerState::StartFailed => {
                return Err(RunnerError::NotStarted {
                    process_name: self.name.clone(),
                });
            }
        }
        let Some(child) = self.child.as_mut() else {
            return Err(RunnerError::NotStarted {
                process_name: self.name.clone(),
            });
        };

        let status = child
            .wait()
            .await
            .map_err(|source| RunnerError::WaitFailed {
                process_name: self.name.clone(),
                source,
            })?;
        self.relay_stop.cancel();
        self.record_exit(status);
        Ok(())
    }

    fn record_exit(&mut self, status: ExitStatus) {
        let (state, exit_code) = match status.code() {
            Some(code) => (RunnerState::Exited(code), code),
            None => Self::signal_exit(status),
        };
        self.state = state;
        self.exit_code = exit_code;
        tracing::debug!(process = %self.name, ?state, exit_code, "Process terminated");
    }

    #[cfg(unix)]
    fn signal_exit(status: ExitStatus) -> (RunnerState, i32) {
        use std::os::unix::process::ExitStatusExt;

        match status.signal() {
            Some(signal) => (RunnerState::KilledBySignal(signal), 128 + signal),
            None => (RunnerState::Exited(-1), -1),
        }
    }

    #[cfg(not(unix))]
    fn signal_exit(_status: ExitStatus) -> (RunnerState, i32) {
        (RunnerState::Exited(-1), -1)
    }

    /// Ask the process to terminate by sending it `SIGTERM` (`CTRL_BREAK_EVENT` on Windows).
    ///
    /// Does not wait for the process to exit. A no-op unless the process is running.
    pub fn stop(&self) -> Result<(), RunnerError> {
        if self.state != RunnerState::Started {
            return Ok(());
        }
        let Some(pid) = self.pid else {
            return Ok(());
        };
        let signal = TerminationSignal::Terminate;
        send_signal(pid, signal).map_err(|source| RunnerError::SignallingFailed {
            process_name: self.name.clone(),
            signal: signal.name(),
            source,
        })
    }

    /// Forcefully kill the process (`SIGKILL` on Unix).
    ///
    /// Does not wait for the process to exit. A no-op unless the process is running.
    pub fn kill(&mut self) -> Result<(), RunnerError> {
        if self.state != RunnerState::Started {
            return Ok(());
        }
        let Some(child) = self.child.as_mut() else {
            return Ok(());
        };
        child
            .start_kill()
            .map_err(|source| RunnerError::SignallingFailed {
                process_name: self.name.clone(),
                signal: "SIGKILL",
                source,
            })
    }

    /// Hand out the readers of the child's stdout and stderr. Yields `None`s before `start` and on
    /// every call but the first.
    pub fn take_streams(&mut self) -> (Option<ChildStdout>, Option<ChildStderr>) {
        (self.stdout.take(), self.stderr.take())
    }

    /// The recorded exit code. `0` until the process terminated.
    pub fn exit_code(&self) -> i32 {
        self.exit_code
    }

    pub fn is_finished(&self) -> bool {
        matches!(
            self.state,
            RunnerState::Exited(_) | RunnerState::KilledBySignal(_)
        )
    }

    pub fn state(&self) -> RunnerState {
        self.state
    }

    /// OS process id, once started.
    pub fn id(&self) -> Option<u32> {
        self.pid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Close stream readers that were never taken and stop relaying signals. Idempotent.
    ///
    /// Before `start` there is nothing to release; the runner can still be started afterwards.
    pub fn cleanup(&mut self) {
        self.stdout = None;
        self.stderr = None;
        if self.state == RunnerState::Created {
            return;
        }
        self.relay_stop.cancel();
        if let Some(relay) = self.relay.take() {
            relay.abort();
        }
        if let Some(mut signals) = self.signals.take() {
            signals.close();
        }
    }
}

impl Drop for ProcessRunner {
    fn drop(&mut self) {
        self.cleanup();
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use assertr::prelude::*;
    use std::time::Duration;
    use tokio::io::AsyncReadExt;

    /// A runner not listening to the real signals of the test process.
    fn runner(command: &[&str]) -> ProcessRunner {
        let (_sender, subscription) = SignalSubscription::channel();
        ProcessRunner::new(command.iter().copied())
            .unwrap()
            .with_signal_subscription(subscription)
    }

    #[test]
    fn rejects_empty_command() {
        let err = ProcessRunner::new(Vec::<String>::new()).unwrap_err();

        assert_that(matches!(err, RunnerError::EmptyCommand)).is_true();
    }

    #[test]
    fn rejects_parent_traversal_in_program() {
        for program in ["../../../etc/passwd", "./../../secret"] {
            let err = ProcessRunner::new([program]).unwrap_err();
            assert_that(matches!(err, RunnerError::PathTraversal { .. }))
                .with_detail_message(format!("Program: {program}"))
                .is_true();
        }
        assert_that(ProcessRunner::new(["bin/../echo"]).is_ok()).is_true();
        assert_that(ProcessRunner::new(["echo", "../not-the-program"]).is_ok()).is_true();
    }

    #[test]
    fn names_process_after_program_and_quoted_args() {
        let runner = ProcessRunner::new(["ls", "-la", "my dir"]).unwrap();

        assert_that(runner.name()).is_equal_to(r#"ls "-la" "my dir""#);
        assert_that(runner.state()).is_equal_to(RunnerState::Created);
        assert_that(runner.exit_code()).is_equal_to(0);
        assert_that(runner.is_finished()).is_false();
        assert_that(runner.id()).is_none();
    }

    #[tokio::test]
    async fn runs_command_and_hands_out_its_streams() {
        let mut runner = runner(&["sh", "-c", "printf out; printf err >&2"]);
        runner.start().unwrap();

        let (stdout, stderr) = runner.take_streams();
        let (mut stdout, mut stderr) = (stdout.unwrap(), stderr.unwrap());
        let mut out = String::new();
        let mut err = String::new();
        stdout.read_to_string(&mut out).await.unwrap();
        stderr.read_to_string(&mut err).await.unwrap();
        runner.wait().await.unwrap();

        assert_that(out).is_equal_to("out".to_string());
        assert_that(err).is_equal_to("err".to_string());
        assert_that(runner.state()).is_equal_to(RunnerState::Exited(0));
        assert_that(runner.is_finished()).is_true();

        let (stdout, stderr) = runner.take_streams();
        assert_that(stdout.is_none()).is_true();
        assert_that(stderr.is_none()).is_true();
    }

    #[tokio::test]
    async fn start_twice_fails() {
        let mut runner = runner(&["true"]);
        runner.start().unwrap();

        let err = runner.start().unwrap_err();

        assert_that(matches!(err, RunnerError::AlreadyStarted { .. })).is_true();
        runner.wait().await.unwrap();
    }

    #[tokio::test]
    async fn wait_before_start_fails() {
        let mut runner = runner(&["true"]);

        let err = runner.wait().await.unwrap_err();

        assert_that(matches!(err, RunnerError::NotStarted { .. })).is_true();
    }

    #[tokio::test]
    async fn failing_spawn_is_terminal() {
        let mut runner = runner(&["/definitely/not/a/program"]);

        let err = runner.start().unwrap_err();
        assert_that(matches!(err, RunnerError::SpawnFailed { .. })).is_true();
        assert_that(runner.state()).is_equal_to(RunnerState::StartFailed);

        assert_that(matches!(runner.start(), Err(RunnerError::AlreadyStarted { .. }))).is_true();
        assert_that(matches!(runner.wait().await, Err(RunnerError::NotStarted { .. }))).is_true();
    }

    #[tokio::test]
    async fn non_zero_exit_is_recorded_not_returned() {
        let mut runner = runner(&["sh", "-c", "exit 3"]);
        runner.start().unwrap();

        runner.wait().await.unwrap();

        assert_that(runner.exit_code()).is_equal_to(3);
        assert_that(runner.state()).is_equal_to(RunnerState::Exited(3));
    }

    #[tokio::test]
    async fn wait_is_idempotent() {
        let mut runner = runner(&["sh", "-c", "exit 7"]);
        runner.start().unwrap();

        runner.wait().await.unwrap();
        runner.wait().await.unwrap();

        assert_that(runner.exit_code()).is_equal_to(7);
    }

    #[tokio::test]
    async fn stop_and_kill_are_no_ops_unless_running() {
        let mut runner = runner(&["true"]);
        assert_that(runner.stop().is_ok()).is_true();
        assert_that(runner.kill().is_ok()).is_true();
        assert_that(runner.state()).is_equal_to(RunnerState::Created);

        runner.start().unwrap();
        runner.wait().await.unwrap();
        assert_that(runner.stop().is_ok()).is_true();
        assert_that(runner.kill().is_ok()).is_true();
        assert_that(runner.stop().is_ok()).is_true();
    }

    #[tokio::test]
    async fn stop_terminates_running_process() {
        let mut runner = runner(&["sleep", "30"]);
        runner.start().unwrap();

        runner.stop().unwrap();
        tokio::time::timeout(Duration::from_secs(5), runner.wait())
            .await
            .expect("process did not terminate")
            .unwrap();

        assert_that(runner.state()).is_equal_to(RunnerState::KilledBySignal(15));
        assert_that(runner.exit_code()).is_equal_to(143);
    }

    #[tokio::test]
    async fn kill_terminates_running_process() {
        let mut runner = runner(&["sleep", "30"]);
        runner.start().unwrap();

        runner.kill().unwrap();
        runner.kill().unwrap();
        tokio::time::timeout(Duration::from_secs(5), runner.wait())
            .await
            .expect("process did not terminate")
            .unwrap();

        assert_that(runner.state()).is_equal_to(RunnerState::KilledBySignal(9));
        assert_that(runner.exit_code()).is_equal_to(137);
    }

    #[tokio::test]
    async fn relays_received_signals_to_the_child() {
        let (sender, subscription) = SignalSubscription::channel();
        let mut runner = ProcessRunner::new(["sleep", "30"])
            .unwrap()
            .with_signal_subscription(subscription);
        runner.start().unwrap();

        sender.send(TerminationSignal::Interrupt).await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), runner.wait())
            .await
            .expect("relayed signal did not terminate the process")
            .unwrap();

        assert_that(runner.state()).is_equal_to(RunnerState::KilledBySignal(2));
        assert_that(runner.exit_code()).is_equal_to(130);

        // The relay stopped listening once the process terminated.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_that(sender.is_closed()).is_true();
    }

    #[tokio::test]
    async fn cleanup_is_idempotent() {
        let mut runner = runner(&["sleep", "30"]);
        runner.start().unwrap();

        runner.cleanup();
        runner.cleanup();
        let (stdout, stderr) = runner.take_streams();
        assert_that(stdout.is_none()).is_true();
        assert_that(stderr.is_none()).is_true();

        runner.kill().unwrap();
        runner.wait().await.unwrap();
        runner.cleanup();
        assert_that(runner.is_finished()).is_true();
    }

    #[tokio::test]
    async fn cleanup_before_start_keeps_signal_relay() {
        let (sender, subscription) = SignalSubscription::channel();
        let mut runner = ProcessRunner::new(["sleep", "30"])
            .unwrap()
            .with_signal_subscription(subscription);

        runner.cleanup();
        assert_that(sender.is_closed()).is_false();
        runner.start().unwrap();

        sender.send(TerminationSignal::Terminate).await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), runner.wait())
            .await
            .expect("relayed signal did not terminate the process")
            .unwrap();

        assert_that(runner.state()).is_equal_to(RunnerState::KilledBySignal(15));
    }
}
