//! Termination signals: sending them to a child and subscribing to the ones the wrapper receives.

use std::fmt::{self, Debug, Display, Formatter};
use std::io;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// The termination-class signals the wrapper reacts to and relays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TerminationSignal {
    /// `SIGINT`, typically sent by the controlling terminal on `Ctrl+C`.
    Interrupt,

    /// `SIGTERM`, typically sent when the operating system requests a termination.
    Terminate,

    /// `SIGQUIT`.
    Quit,
}

impl TerminationSignal {
    /// The conventional (POSIX) signal number. Used on every platform for exit code mapping.
    pub fn number(self) -> i32 {
        match self {
            TerminationSignal::Interrupt => 2,
            TerminationSignal::Quit => 3,
            TerminationSignal::Terminate => 15,
        }
    }

    /// The exit code a shell reports for a process ended by this signal: `128 + number`.
    pub fn exit_code(self) -> i32 {
        128 + self.number()
    }

    pub fn name(self) -> &'static str {
        match self {
            TerminationSignal::Interrupt => "SIGINT",
            TerminationSignal::Terminate => "SIGTERM",
            TerminationSignal::Quit => "SIGQUIT",
        }
    }
}

impl Display for TerminationSignal {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Send `signal` to the process identified by `pid`.
///
/// - on `cfg(unix)`: Sends the matching POSIX signal.
/// - on `cfg(windows)`: Sends `CTRL_C_EVENT` for an interrupt and `CTRL_BREAK_EVENT` otherwise.
/// - raises a panic on any other platform!
pub(crate) fn send_signal(pid: u32, signal: TerminationSignal) -> io::Result<()> {
    #[cfg(unix)]
    {
        use nix::sys::signal::{self, Signal};
        use nix::unistd::Pid;

        let sig = match signal {
            TerminationSignal::Interrupt => Signal::SIGINT,
            TerminationSignal::Terminate => Signal::SIGTERM,
            TerminationSignal::Quit => Signal::SIGQUIT,
        };
        signal::kill(Pid::from_raw(pid as i32), sig).map_err(io::Error::from)?;
        Ok(())
    }

    #[cfg(windows)]
    {
        use windows_sys::Win32::Foundation::{CTRL_BREAK_EVENT, CTRL_C_EVENT};
        use windows_sys::Win32::System::Console::GenerateConsoleCtrlEvent;

        let event = match signal {
            TerminationSignal::Interrupt => CTRL_C_EVENT,
            TerminationSignal::Terminate | TerminationSignal::Quit => CTRL_BREAK_EVENT,
        };
        let success = unsafe { GenerateConsoleCtrlEvent(event, pid) };
        if success == 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    #[cfg(all(not(windows), not(unix)))]
    {
        let _ = (pid, signal);
        panic!("Cannot send signal to process. Platform is unsupported.")
    }
}

/// Sending half of a [SignalSubscription] created through [SignalSubscription::channel].
pub type SignalSender = mpsc::Sender<TerminationSignal>;

/// An owned subscription to termination signals.
///
/// A subscription either listens to the signals delivered to this process by the operating
/// system ([SignalSubscription::os]) or is fed manually ([SignalSubscription::channel]).
/// Listening stops when the subscription is closed or dropped.
pub struct SignalSubscription {
    receiver: mpsc::Receiver<TerminationSignal>,
    listeners: Vec<JoinHandle<()>>,
}

impl Debug for SignalSubscription {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignalSubscription")
            .field("listeners", &self.listeners.len())
            .finish_non_exhaustive()
    }
}

impl SignalSubscription {
    const CAPACITY: usize = 8;

    /// Subscribe to the given signals as delivered to this process.
    ///
    /// Must be called from within a tokio runtime.
    pub fn os(signals: &[TerminationSignal]) -> io::Result<Self> {
        let (sender, receiver) = mpsc::channel(Self::CAPACITY);
        let mut subscription = Self {
            receiver,
            listeners: Vec::with_capacity(signals.len()),
        };
        for &signal in signals {
            if let Some(listener) = listen(signal, sender.clone())? {
                subscription.listeners.push(listener);
            }
        }
        Ok(subscription)
    }

    /// A subscription that only yields what is sent through the returned [SignalSender].
    pub fn channel() -> (SignalSender, Self) {
        let (sender, receiver) = mpsc::channel(Self::CAPACITY);
        (
            sender,
            Self {
                receiver,
                listeners: Vec::new(),
            },
        )
    }

    /// Wait for the next signal. Returns `None` once no more signals can arrive.
    ///
    /// This function is cancel safe.
    pub async fn recv(&mut self) -> Option<TerminationSignal> {
        self.receiver.recv().await
    }

    /// Stop listening. Idempotent.
    pub fn close(&mut self) {
        for listener in self.listeners.drain(..) {
            listener.abort();
        }
        self.receiver.close();
    }
}

impl Drop for SignalSubscription {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(unix)]
fn listen(signal: TerminationSignal, sender: SignalSender) -> io::Result<Option<JoinHandle<()>>> {
    use tokio::signal::unix::{SignalKind, signal as os_signal};

    let kind = match signal {
        TerminationSignal::Interrupt => SignalKind::interrupt(),
        TerminationSignal::Terminate => SignalKind::terminate(),
        TerminationSignal::Quit => SignalKind::quit(),
    };
    let mut stream = os_signal(kind)?;
    Ok(Some(tokio::spawn(async move {
        while stream.recv().await.is_some() {
            tracing::debug!(%signal, "Received signal");
            if sender.send(signal).await.is_err() {
                // Subscription closed.
                break;
            }
        }
    })))
}

#[cfg(windows)]
fn listen(signal: TerminationSignal, sender: SignalSender) -> io::Result<Option<JoinHandle<()>>> {
    use tokio::signal::windows;

    match signal {
        TerminationSignal::Interrupt => {
            let mut stream = windows::ctrl_c()?;
            Ok(Some(tokio::spawn(async move {
                while stream.recv().await.is_some() {
                    if sender.send(signal).await.is_err() {
                        break;
                    }
                }
            })))
        }
        TerminationSignal::Terminate => {
            let mut stream = windows::ctrl_break()?;
            Ok(Some(tokio::spawn(async move {
                while stream.recv().await.is_some() {
                    if sender.send(signal).await.is_err() {
                        break;
                    }
                }
            })))
        }
        // No console equivalent.
        TerminationSignal::Quit => Ok(None),
    }
}

#[cfg(all(not(windows), not(unix)))]
fn listen(_signal: TerminationSignal, _sender: SignalSender) -> io::Result<Option<JoinHandle<()>>> {
    Ok(None)
}
