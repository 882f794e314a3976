//! Runs a command under a pseudo-terminal and captures its session.
//!
//! The child sees a real terminal (colors, line editing and resizes keep
//! working) while everything it prints, and optionally everything the user
//! types, is queued on a [`BatchShipper`] as stream records.
//!
//! ```text
//!  real stdin ──► stdin thread ──► pty writer ──► child
//!                      │
//!                      └─► stdin records
//!  child ──► pty reader ──► output thread ──► real stdout
//!                                │
//!                                └─► stdout records
//! ```

use std::io::{self, IsTerminal, Read, Write};
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossterm::terminal;
use portable_pty::{ChildKiller, CommandBuilder, MasterPty, PtySize, native_pty_system};
use tokio::sync::oneshot;
use tokio::time::{MissedTickBehavior, interval, timeout};
use tracing::{debug, info, warn};
use vibelog_logs::{Origin, Record, now_millis};

use crate::error::CaptureError;
use crate::shipper::BatchShipper;
use crate::signal;

/// Value of `TERM` given to the child.
pub const CHILD_TERM: &str = "xterm-256color";

/// Size used when the real terminal size is unknown.
const FALLBACK_SIZE: (u16, u16) = (80, 24);

/// Read chunk size for pty output and stdin.
const CHUNK_SIZE: usize = 4096;

/// Longest wait for the output thread to drain after the child exits.
const OUTPUT_DRAIN_WAIT: Duration = Duration::from_millis(500);

/// Capture session configuration.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Program and arguments.
    pub command: Vec<String>,
    /// Record typed input as well as forwarding it.
    pub capture_stdin: bool,
    /// Longest wait for the final delivery after the child exits.
    pub final_flush_wait: Duration,
    /// How often the real terminal size is checked.
    pub resize_poll: Duration,
}

impl CaptureConfig {
    /// Configuration for `command` with default timings.
    #[must_use]
    pub fn new(command: Vec<String>) -> Self {
        Self {
            command,
            capture_stdin: true,
            final_flush_wait: Duration::from_secs(2),
            resize_poll: Duration::from_millis(250),
        }
    }

    /// Enable or disable stdin capture.
    #[must_use]
    pub const fn with_capture_stdin(mut self, capture: bool) -> Self {
        self.capture_stdin = capture;
        self
    }

    /// Set the final delivery wait.
    #[must_use]
    pub const fn with_final_flush_wait(mut self, wait: Duration) -> Self {
        self.final_flush_wait = wait;
        self
    }
}

/// Default stream name for a command: the program's file name.
#[must_use]
pub fn default_stream_name(command: &[String]) -> Option<String> {
    let program = command.first()?;
    Path::new(program)
        .file_name()
        .and_then(|name| name.to_str())
        .filter(|name| !name.is_empty())
        .map(str::to_string)
}

fn pty_size((cols, rows): (u16, u16)) -> PtySize {
    PtySize {
        rows,
        cols,
        pixel_width: 0,
        pixel_height: 0,
    }
}

fn terminal_size() -> Option<(u16, u16)> {
    terminal::size().ok().filter(|(cols, rows)| *cols > 0 && *rows > 0)
}

/// Puts the real terminal in raw mode until dropped.
struct RawModeGuard;

impl RawModeGuard {
    fn enable() -> io::Result<Self> {
        terminal::enable_raw_mode()?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if let Err(e) = terminal::disable_raw_mode() {
            warn!(error = %e, "Failed to restore terminal mode");
        }
    }
}

/// How the child session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    Exited(i32),
    Signalled(signal::Termination),
}

/// Runs one command and captures its terminal session.
#[derive(Debug)]
pub struct CaptureAgent {
    config: CaptureConfig,
    shipper: Arc<BatchShipper>,
}

impl CaptureAgent {
    /// Create an agent shipping through `shipper`.
    #[must_use]
    pub const fn new(config: CaptureConfig, shipper: Arc<BatchShipper>) -> Self {
        Self { config, shipper }
    }

    /// Runs the command to completion and returns its exit code.
    ///
    /// A termination signal kills the child and yields 130 (SIGINT) or
    /// 143 (SIGTERM). Shipping failures never affect the result.
    ///
    /// # Errors
    ///
    /// Returns an error if the pseudo-terminal or the child cannot be set up.
    pub async fn run(self) -> Result<i32, CaptureError> {
        let Some(program) = self.config.command.first() else {
            return Err(CaptureError::EmptyCommand);
        };

        let size = terminal_size().unwrap_or(FALLBACK_SIZE);
        let pair = native_pty_system()
            .openpty(pty_size(size))
            .map_err(|e| CaptureError::Pty(e.to_string()))?;

        let mut builder = CommandBuilder::new(program);
        builder.args(&self.config.command[1..]);
        builder.env("TERM", CHILD_TERM);
        if let Ok(cwd) = std::env::current_dir() {
            builder.cwd(cwd);
        }

        let mut child = pair
            .slave
            .spawn_command(builder)
            .map_err(|e| CaptureError::Spawn {
                command: program.clone(),
                reason: e.to_string(),
            })?;
        drop(pair.slave);
        info!(command = %program, pid = ?child.process_id(), stream = %self.shipper.name(), "Capturing session");

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| CaptureError::Pty(e.to_string()))?;
        // Dropping the writer sends EOF to the child, so it lives until the end.
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| CaptureError::Pty(e.to_string()))?;

        let flush_task = self.shipper.spawn();
        let output_done = spawn_output_thread(reader, Arc::clone(&self.shipper));

        let interactive = io::stdin().is_terminal();
        let raw_mode = if interactive {
            match RawModeGuard::enable() {
                Ok(guard) => Some(guard),
                Err(e) => {
                    warn!(error = %e, "Failed to enable raw mode");
                    None
                }
            }
        } else {
            None
        };
        let _input_writer = if interactive {
            let shipper = self.config.capture_stdin.then(|| Arc::clone(&self.shipper));
            spawn_input_thread(writer, shipper);
            None
        } else {
            Some(writer)
        };

        let resize_task = tokio::spawn(forward_resizes(pair.master, size, self.config.resize_poll));

        let killer = child.clone_killer();
        let wait = tokio::task::spawn_blocking(move || child.wait());

        let end = tokio::select! {
            status = wait => match status {
                Ok(Ok(status)) => SessionEnd::Exited(status.exit_code() as i32),
                Ok(Err(e)) => {
                    warn!(error = %e, "Failed to wait for child");
                    SessionEnd::Exited(1)
                }
                Err(e) => {
                    warn!(error = %e, "Child wait task failed");
                    SessionEnd::Exited(1)
                }
            },
            received = signal::termination() => SessionEnd::Signalled(received),
        };

        let code = match end {
            SessionEnd::Exited(code) => {
                // Let trailing output land before the exit record.
                let _ = timeout(OUTPUT_DRAIN_WAIT, output_done).await;
                code
            }
            SessionEnd::Signalled(received) => {
                kill_child(killer);
                received.exit_code()
            }
        };
        debug!(code, "Session ended");

        self.shipper.enqueue(Record::exit(now_millis(), code));
        self.shipper.close();
        resize_task.abort();

        if timeout(self.config.final_flush_wait, flush_task).await.is_err() {
            warn!(
                pending = self.shipper.pending_len(),
                "Final delivery did not finish in time"
            );
        }

        drop(raw_mode);
        Ok(code)
    }
}

fn kill_child(mut killer: Box<dyn ChildKiller + Send + Sync>) {
    if let Err(e) = killer.kill() {
        debug!(error = %e, "Failed to kill child");
    }
}

/// Copies pty output to stdout and queues it. Signals `done` at EOF.
fn spawn_output_thread(
    mut reader: Box<dyn Read + Send>,
    shipper: Arc<BatchShipper>,
) -> oneshot::Receiver<()> {
    let (done_tx, done_rx) = oneshot::channel();
    thread::spawn(move || {
        let mut stdout = io::stdout();
        let mut buf = [0u8; CHUNK_SIZE];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    let chunk = &buf[..n];
                    shipper.enqueue(Record::output(now_millis(), Origin::Stdout, chunk));
                    if stdout.write_all(chunk).and_then(|()| stdout.flush()).is_err() {
                        // Keep capturing even when our own stdout is gone.
                        continue;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                // EIO once the child side closes.
                Err(_) => break,
            }
        }
        let _ = done_tx.send(());
    });
    done_rx
}

/// Forwards real stdin to the pty, queuing it when `shipper` is set.
fn spawn_input_thread(mut writer: Box<dyn Write + Send>, shipper: Option<Arc<BatchShipper>>) {
    thread::spawn(move || {
        let mut stdin = io::stdin();
        let mut buf = [0u8; CHUNK_SIZE];
        loop {
            match stdin.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    let chunk = &buf[..n];
                    if let Some(shipper) = &shipper {
                        shipper.enqueue(Record::output(now_millis(), Origin::Stdin, chunk));
                    }
                    if writer.write_all(chunk).and_then(|()| writer.flush()).is_err() {
                        break;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(_) => break,
            }
        }
    });
}

/// Polls the real terminal size and resizes the pty when it changes.
async fn forward_resizes(master: Box<dyn MasterPty + Send>, initial: (u16, u16), every: Duration) {
    let mut current = initial;
    let mut ticker = interval(every.max(Duration::from_millis(10)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        let Some(size) = terminal_size() else {
            continue;
        };
        if size == current {
            continue;
        }
        match master.resize(pty_size(size)) {
            Ok(()) => {
                debug!(cols = size.0, rows = size.1, "Resized pty");
                current = size;
            }
            Err(e) => warn!(error = %e, "Failed to resize pty"),
        }
    }
}
