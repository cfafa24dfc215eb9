//! Concurrent, line-oriented processing of a child's stdout and stderr into one shared sink.

use crate::error::{ProcessingError, StreamError, StreamFailure, StreamFailures};
use crate::formatter::LineFormatter;
use crate::line_reader::{LineParsingOptions, LineReader, LineTooLong, NumBytes, NumBytesExt};
use bytes::BytesMut;
use std::fmt::{self, Debug, Display, Formatter};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::Instrument;

/// The standard stream a line was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

impl Display for StreamKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            StreamKind::Stdout => f.write_str("stdout"),
            StreamKind::Stderr => f.write_str("stderr"),
        }
    }
}

/// When the sink is flushed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushPolicy {
    /// Flush after every written line.
    PerLine,

    /// Flush once, when a stream reached its end.
    OnCompletion,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessorOptions {
    pub line_parsing: LineParsingOptions,

    /// Size of the buffer used for a single read from a stream.
    ///
    /// default: 16 KiB
    pub read_chunk_size: NumBytes,

    /// default: [FlushPolicy::PerLine]
    pub flush: FlushPolicy,
}

impl Default for ProcessorOptions {
    fn default() -> Self {
        Self {
            line_parsing: LineParsingOptions::default(),
            read_chunk_size: 16.kilobytes(),
            flush: FlushPolicy::PerLine,
        }
    }
}

/// Drains a stdout and a stderr reader concurrently, formats every line and writes it to a single
/// sink.
///
/// Lines of one stream reach the sink in the order they were read. Lines of the two streams may
/// interleave arbitrarily. Writes are serialized through a mutex owned by the processor, so the
/// sink never sees two lines mixed into each other.
///
/// A fault on one stream (read error, over-long line, failed write) ends that stream's task only.
/// All faults are collected and reported together once both tasks have terminated.
/// Cancellation is never reported as a fault.
pub struct StreamProcessor<F, W> {
    inner: Arc<Inner<F, W>>,
}

struct Inner<F, W> {
    formatter: F,
    sink: Mutex<W>,
    errors: std::sync::Mutex<Vec<StreamFailure>>,
    stop: CancellationToken,
    tracker: TaskTracker,
    options: ProcessorOptions,
}

impl<F, W> Clone for StreamProcessor<F, W> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<F, W> Debug for StreamProcessor<F, W> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamProcessor")
            .field("options", &self.inner.options)
            .field("stopped", &self.inner.stop.is_cancelled())
            .field("active_readers", &self.inner.tracker.len())
            .finish_non_exhaustive()
    }
}

impl<F, W> StreamProcessor<F, W>
where
    F: LineFormatter,
    W: AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(formatter: F, sink: W) -> Self {
        Self::with_options(formatter, sink, ProcessorOptions::default())
    }

    pub fn with_options(formatter: F, sink: W, options: ProcessorOptions) -> Self {
        let tracker = TaskTracker::new();
        // Closed right away, so that `wait` returns once no reader is active.
        tracker.close();
        Self {
            inner: Arc::new(Inner {
                formatter,
                sink: Mutex::new(sink),
                errors: std::sync::Mutex::new(Vec::new()),
                stop: CancellationToken::new(),
                tracker,
                options,
            }),
        }
    }

    /// Read both streams to their end, or until `cancel` fires or [StreamProcessor::stop] is
    /// called.
    ///
    /// Returns only after both reader tasks have terminated.
    ///
    /// # Errors
    ///
    /// - [ProcessingError::ReadersMissing] if either reader is `None`. Nothing is spawned then.
    /// - [ProcessingError::Streams] naming every stream that failed.
    pub async fn process_streams<O, E>(
        &self,
        cancel: CancellationToken,
        stdout: Option<O>,
        stderr: Option<E>,
    ) -> Result<(), ProcessingError>
    where
        O: AsyncRead + Unpin + Send + 'static,
        E: AsyncRead + Unpin + Send + 'static,
    {
        let (Some(stdout), Some(stderr)) = (stdout, stderr) else {
            return Err(ProcessingError::ReadersMissing);
        };

        let stdout_task = self.spawn_reader(cancel.clone(), StreamKind::Stdout, stdout);
        let stderr_task = self.spawn_reader(cancel, StreamKind::Stderr, stderr);
        let (stdout_result, stderr_result) = tokio::join!(stdout_task, stderr_task);

        for (kind, result) in [
            (StreamKind::Stdout, stdout_result),
            (StreamKind::Stderr, stderr_result),
        ] {
            if let Err(err) = result {
                self.inner.record(
                    kind,
                    StreamError::TaskFailed {
                        reason: err.to_string(),
                    },
                );
            }
        }

        let errors = self.errors();
        match errors.is_empty() {
            true => Ok(()),
            false => Err(ProcessingError::Streams(StreamFailures::new(errors))),
        }
    }

    fn spawn_reader<R>(&self, cancel: CancellationToken, kind: StreamKind, reader: R) -> JoinHandle<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        let task = async move {
            let result = match inner.read_lines(&cancel, kind, reader).await {
                Ok(()) => inner.flush_sink().await,
                Err(err) => Err(err),
            };
            match result {
                Ok(()) => tracing::trace!(stream = %kind, "Stream processing completed"),
                Err(err) => {
                    tracing::warn!(stream = %kind, error = %err, "Stream processing failed");
                    inner.record(kind, err);
                }
            }
        };
        self.inner.tracker.spawn(task.in_current_span())
    }
}

impl<F, W> StreamProcessor<F, W> {
    /// Signal both reader tasks to stop at their next line boundary. Idempotent.
    pub fn stop(&self) {
        self.inner.stop.cancel();
    }

    /// Wait until no reader task is active anymore.
    ///
    /// # Errors
    ///
    /// [ProcessingError::Timeout] if the readers did not terminate within `timeout`. The readers
    /// are stopped in that case.
    pub async fn wait(&self, timeout: Duration) -> Result<(), ProcessingError> {
        match tokio::time::timeout(timeout, self.inner.tracker.wait()).await {
            Ok(()) => Ok(()),
            Err(_elapsed) => {
                self.stop();
                Err(ProcessingError::Timeout { timeout })
            }
        }
    }

    /// A copy of all stream faults recorded so far, in recording order.
    pub fn errors(&self) -> Vec<StreamFailure> {
        match self.inner.errors.lock() {
            Ok(errors) => errors.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Exclusive access to the sink. Blocks writers while held.
    pub async fn sink(&self) -> MutexGuard<'_, W> {
        self.inner.sink.lock().await
    }
}

impl<F, W> Inner<F, W> {
    fn record(&self, stream: StreamKind, error: StreamError) {
        let failure = StreamFailure { stream, error };
        match self.errors.lock() {
            Ok(mut errors) => errors.push(failure),
            Err(poisoned) => poisoned.into_inner().push(failure),
        }
    }

    fn is_cancelled(&self, cancel: &CancellationToken) -> bool {
        cancel.is_cancelled() || self.stop.is_cancelled()
    }
}

impl<F, W> Inner<F, W>
where
    F: LineFormatter,
    W: AsyncWrite + Unpin + Send + 'static,
{
    async fn read_lines<R>(
        &self,
        cancel: &CancellationToken,
        kind: StreamKind,
        mut reader: R,
    ) -> Result<(), StreamError>
    where
        R: AsyncRead + Unpin,
    {
        let options = self.options.line_parsing;
        let mut chunk = BytesMut::with_capacity(self.options.read_chunk_size.bytes().max(1));
        let mut line_buffer = BytesMut::new();

        loop {
            chunk.clear();
            let read = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(()),
                _ = self.stop.cancelled() => return Ok(()),
                read = reader.read_buf(&mut chunk) => read,
            };

            match read {
                Ok(0) => {
                    if let Some(line) = LineReader::finish(&mut line_buffer) {
                        if !self.is_cancelled(cancel) {
                            self.write_line(kind, &line).await?;
                        }
                    }
                    return Ok(());
                }
                Ok(_) => {
                    for line in LineReader::new(&chunk, &mut line_buffer, options) {
                        let line = line.map_err(|LineTooLong| StreamError::LineTooLong {
                            max_line_length: options.max_line_length,
                        })?;
                        if self.is_cancelled(cancel) {
                            return Ok(());
                        }
                        self.write_line(kind, &line).await?;
                    }
                }
                // A pipe torn down during shutdown is not a fault.
                Err(err)
                    if self.is_cancelled(cancel)
                        || err.kind() == io::ErrorKind::UnexpectedEof
                        || err.kind() == io::ErrorKind::BrokenPipe =>
                {
                    tracing::debug!(stream = %kind, error = %err, "Stream closed");
                    return Ok(());
                }
                Err(err) => return Err(StreamError::read(err)),
            }
        }
    }

    async fn write_line(&self, kind: StreamKind, line: &str) -> Result<(), StreamError> {
        let mut formatted = self.formatter.format_line(line, kind);
        formatted.push('\n');

        let mut sink = self.sink.lock().await;
        sink.write_all(formatted.as_bytes())
            .await
            .map_err(StreamError::write)?;
        if self.options.flush == FlushPolicy::PerLine {
            sink.flush().await.map_err(StreamError::write)?;
        }
        Ok(())
    }

    async fn flush_sink(&self) -> Result<(), StreamError> {
        self.sink
            .lock()
            .await
            .flush()
            .await
            .map_err(StreamError::write)
    }
}
