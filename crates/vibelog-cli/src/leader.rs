//! Single-collector leader election.
//!
//! Any number of capture processes may start at once. Before shipping they
//! make sure a collector is reachable, and at most one of them launches it:
//!
//! - a healthy collector means someone else owns it, nothing to do;
//! - otherwise the process tries to create the lock file exclusively;
//! - an existing lock whose recorded pid is dead is stale and is taken over,
//!   as is one that stayed empty past a short grace period;
//! - the winner launches a detached collector and waits for it to come up.
//!
//! Exclusive file creation is the only arbitration primitive.

use std::ffi::OsString;
use std::fs::{self, OpenOptions};
use std::future::Future;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;
use sysinfo::{Pid, ProcessesToUpdate, System};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval, sleep};
use tracing::{debug, info, warn};

use crate::client::{DEFAULT_COLLECTOR_URL, DEFAULT_PROBE_TIMEOUT};
use crate::shipper::FailureHook;

/// Probes whether a collector is serving.
pub trait HealthProbe: Send + Sync {
    /// Returns true if the collector answered its health check.
    fn is_healthy(&self) -> Pin<Box<dyn Future<Output = bool> + Send + '_>>;
}

/// Starts a collector process.
pub trait CollectorLauncher: Send + Sync {
    /// Launches the collector without waiting for it.
    ///
    /// # Errors
    ///
    /// Returns an error if the process could not be started.
    fn launch(&self) -> io::Result<()>;
}

/// Result of trying to take the lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockOutcome {
    /// The lock file was created by us.
    Acquired,
    /// A lock left by a dead process was overwritten.
    Reclaimed {
        /// Pid recorded in the stale lock, `None` if it never got one.
        stale_pid: Option<u32>,
    },
    /// Another live process holds the lock. `None` when the recorded pid
    /// could not be read, typically a racer that has not written it yet.
    HeldBy(Option<u32>),
}

impl LockOutcome {
    /// Returns true if the caller now holds the lock.
    #[must_use]
    pub const fn is_acquired(&self) -> bool {
        matches!(self, Self::Acquired | Self::Reclaimed { .. })
    }
}

/// How long an empty or garbled lock counts as a racer mid-write.
pub const DEFAULT_UNREADABLE_GRACE: Duration = Duration::from_secs(3);

/// The leadership lock file.
#[derive(Debug, Clone)]
pub struct LeaderLock {
    path: PathBuf,
    pid: u32,
    unreadable_grace: Duration,
}

impl LeaderLock {
    /// A lock at `path` owned by the current process.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_pid(path, std::process::id())
    }

    /// A lock at `path` recorded under `pid`.
    #[must_use]
    pub fn with_pid(path: impl Into<PathBuf>, pid: u32) -> Self {
        Self {
            path: path.into(),
            pid,
            unreadable_grace: DEFAULT_UNREADABLE_GRACE,
        }
    }

    /// Set how long a lock without a valid pid is left alone.
    #[must_use]
    pub const fn with_unreadable_grace(mut self, grace: Duration) -> Self {
        self.unreadable_grace = grace;
        self
    }

    /// The lock file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Tries to take the lock.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock file cannot be created, read or written
    /// for reasons other than it already existing.
    pub fn try_acquire(&self) -> io::Result<LockOutcome> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        match OpenOptions::new().write(true).create_new(true).open(&self.path) {
            Ok(mut file) => {
                write!(file, "{}", self.pid)?;
                file.flush()?;
                return Ok(LockOutcome::Acquired);
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
            Err(e) => return Err(e),
        }

        let holder = match fs::read_to_string(&self.path) {
            Ok(content) => content.trim().parse::<u32>().ok(),
            // Released between our create attempt and the read.
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => return Err(e),
        };

        match holder {
            Some(pid) if !process_alive(pid) => {
                fs::write(&self.path, self.pid.to_string())?;
                Ok(LockOutcome::Reclaimed {
                    stale_pid: Some(pid),
                })
            }
            None if self.unreadable_for_too_long()? => {
                // The writer died between creating the file and writing its pid.
                fs::write(&self.path, self.pid.to_string())?;
                Ok(LockOutcome::Reclaimed { stale_pid: None })
            }
            other => Ok(LockOutcome::HeldBy(other)),
        }
    }

    fn unreadable_for_too_long(&self) -> io::Result<bool> {
        let modified = match fs::metadata(&self.path) {
            Ok(meta) => meta.modified()?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e),
        };
        let age = SystemTime::now()
            .duration_since(modified)
            .unwrap_or(Duration::ZERO);
        Ok(age > self.unreadable_grace)
    }

    /// Deletes the lock if it still records our pid.
    ///
    /// Returns true if the file was removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock exists but cannot be read or removed.
    pub fn release(&self) -> io::Result<bool> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e),
        };
        if content.trim().parse::<u32>().ok() != Some(self.pid) {
            return Ok(false);
        }
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// Returns true if a process with `pid` exists.
#[must_use]
pub fn process_alive(pid: u32) -> bool {
    let pid = Pid::from_u32(pid);
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    system.process(pid).is_some()
}

/// This process's view of leadership.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LeaderState {
    /// Not determined yet.
    #[default]
    Unknown,
    /// Someone else runs the collector.
    NotLeader,
    /// We hold the lock and are responsible for the collector.
    Leader,
}

/// Leader supervisor configuration.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Collector base URL.
    pub collector_url: String,
    /// Lock file path.
    pub lock_path: PathBuf,
    /// How often the watchdog re-checks the collector.
    pub watchdog_period: Duration,
    /// How long to wait for a launched collector to become healthy.
    pub startup_wait: Duration,
    /// Poll interval while waiting for startup.
    pub startup_poll: Duration,
    /// Timeout of one health probe.
    pub probe_timeout: Duration,
}

impl SupervisorConfig {
    /// Configuration for a lock at `lock_path` with default timings.
    #[must_use]
    pub fn new(lock_path: impl Into<PathBuf>) -> Self {
        Self {
            collector_url: DEFAULT_COLLECTOR_URL.to_string(),
            lock_path: lock_path.into(),
            watchdog_period: Duration::from_secs(5),
            startup_wait: Duration::from_secs(3),
            startup_poll: Duration::from_millis(100),
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }

    /// Set the collector URL.
    #[must_use]
    pub fn with_collector_url(mut self, url: impl Into<String>) -> Self {
        self.collector_url = url.into();
        self
    }

    /// Set the watchdog period.
    #[must_use]
    pub const fn with_watchdog_period(mut self, period: Duration) -> Self {
        self.watchdog_period = period;
        self
    }

    /// Set the startup wait.
    #[must_use]
    pub const fn with_startup_wait(mut self, wait: Duration) -> Self {
        self.startup_wait = wait;
        self
    }

    /// Set the startup poll interval.
    #[must_use]
    pub const fn with_startup_poll(mut self, poll: Duration) -> Self {
        self.startup_poll = poll;
        self
    }
}

/// Keeps exactly one collector running across cooperating processes.
pub struct LeaderSupervisor {
    config: SupervisorConfig,
    lock: LeaderLock,
    state: Mutex<LeaderState>,
    election: tokio::sync::Mutex<()>,
    probe: Arc<dyn HealthProbe>,
    launcher: Arc<dyn CollectorLauncher>,
}

impl std::fmt::Debug for LeaderSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeaderSupervisor")
            .field("config", &self.config)
            .field("lock", &self.lock)
            .field("state", &*self.state.lock())
            .finish_non_exhaustive()
    }
}

impl LeaderSupervisor {
    /// Create a supervisor for the current process.
    #[must_use]
    pub fn new(
        config: SupervisorConfig,
        probe: Arc<dyn HealthProbe>,
        launcher: Arc<dyn CollectorLauncher>,
    ) -> Self {
        let lock =
            LeaderLock::new(config.lock_path.clone()).with_unreadable_grace(config.startup_wait);
        Self::with_lock(config, lock, probe, launcher)
    }

    /// Create a supervisor around an explicit lock.
    #[must_use]
    pub fn with_lock(
        config: SupervisorConfig,
        lock: LeaderLock,
        probe: Arc<dyn HealthProbe>,
        launcher: Arc<dyn CollectorLauncher>,
    ) -> Self {
        Self {
            config,
            lock,
            state: Mutex::new(LeaderState::Unknown),
            election: tokio::sync::Mutex::new(()),
            probe,
            launcher,
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> LeaderState {
        *self.state.lock()
    }

    fn set_state(&self, next: LeaderState) {
        let mut state = self.state.lock();
        if *state != next {
            debug!(from = ?*state, to = ?next, "Leader state changed");
            *state = next;
        }
    }

    /// Makes sure a collector is reachable, taking leadership if nobody has it.
    ///
    /// Concurrent calls (watchdog and delivery failures) run one at a time.
    pub async fn ensure_leadership(&self) -> LeaderState {
        let _election = self.election.lock().await;
        if self.probe.is_healthy().await {
            if self.state() != LeaderState::Leader {
                self.set_state(LeaderState::NotLeader);
            }
            return self.state();
        }

        if self.state() != LeaderState::Leader {
            match self.lock.try_acquire() {
                Ok(outcome) if outcome.is_acquired() => {
                    info!(outcome = ?outcome, lock = %self.lock.path().display(), "Acquired collector leadership");
                    self.set_state(LeaderState::Leader);
                }
                Ok(outcome) => {
                    debug!(outcome = ?outcome, "Collector leadership held elsewhere");
                    self.set_state(LeaderState::NotLeader);
                }
                Err(e) => {
                    warn!(error = %e, lock = %self.lock.path().display(), "Failed to take leadership lock");
                    self.set_state(LeaderState::NotLeader);
                }
            }
        }

        if self.state() == LeaderState::Leader {
            self.start_collector().await;
        }
        self.state()
    }

    async fn start_collector(&self) {
        if let Err(e) = self.launcher.launch() {
            warn!(error = %e, "Failed to launch collector");
            return;
        }

        let deadline = Instant::now() + self.config.startup_wait;
        while Instant::now() < deadline {
            if self.probe.is_healthy().await {
                info!(url = %self.config.collector_url, "Collector is up");
                return;
            }
            sleep(self.config.startup_poll).await;
        }
        warn!(
            url = %self.config.collector_url,
            wait = ?self.config.startup_wait,
            "Collector did not become healthy in time"
        );
    }

    /// Re-runs [`Self::ensure_leadership`] every watchdog period.
    pub fn spawn_watchdog(self: &Arc<Self>) -> JoinHandle<()> {
        let supervisor = Arc::clone(self);
        let period = self.config.watchdog_period.max(Duration::from_millis(10));
        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let _ = supervisor.ensure_leadership().await;
            }
        })
    }

    /// Deletes the lock if we are the leader.
    pub fn release(&self) {
        if self.state() != LeaderState::Leader {
            return;
        }
        match self.lock.release() {
            Ok(true) => info!("Released collector leadership"),
            Ok(false) => debug!("Leadership lock no longer ours"),
            Err(e) => warn!(error = %e, "Failed to release leadership lock"),
        }
        self.set_state(LeaderState::Unknown);
    }
}

impl FailureHook for LeaderSupervisor {
    fn on_delivery_failure(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            let _ = self.ensure_leadership().await;
        })
    }
}

/// Launches `<exe> serve [args…]` detached from the terminal.
#[derive(Debug, Clone)]
pub struct DetachedLauncher {
    program: PathBuf,
    args: Vec<OsString>,
}

impl DetachedLauncher {
    /// Launches the currently running executable.
    ///
    /// # Errors
    ///
    /// Returns an error if the current executable path is unknown.
    pub fn current_exe() -> io::Result<Self> {
        Ok(Self::new(std::env::current_exe()?))
    }

    /// Launches `program`.
    #[must_use]
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: vec![OsString::from("serve")],
        }
    }

    /// Append an argument after `serve`.
    #[must_use]
    pub fn with_arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// The full argument list.
    #[must_use]
    pub fn args(&self) -> &[OsString] {
        &self.args
    }
}

impl CollectorLauncher for DetachedLauncher {
    fn launch(&self) -> io::Result<()> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            // Own process group: terminal signals aimed at the capture session
            // must not reach the collector.
            command.process_group(0);
        }

        let child = command.spawn()?;
        info!(pid = child.id(), program = %self.program.display(), "Launched collector");
        Ok(())
    }
}
