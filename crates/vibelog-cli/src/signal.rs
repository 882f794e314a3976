//! Termination signal handling.

use tracing::info;

/// A signal that asked the process to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// SIGINT / Ctrl-C.
    Interrupt,
    /// SIGTERM.
    Terminate,
}

impl Termination {
    /// Conventional shell exit code for a process killed by this signal.
    #[must_use]
    pub const fn exit_code(self) -> i32 {
        match self {
            Self::Interrupt => 130,
            Self::Terminate => 143,
        }
    }
}

/// Waits for SIGINT or SIGTERM.
///
/// Never completes if no handler could be installed.
pub async fn termination() -> Termination {
    let received = wait_for_signal().await;
    info!(signal = ?received, "Received termination signal");
    received
}

#[cfg(unix)]
async fn wait_for_signal() -> Termination {
    use tokio::signal::unix::{SignalKind, signal};

    match (signal(SignalKind::interrupt()), signal(SignalKind::terminate())) {
        (Ok(mut interrupt), Ok(mut terminate)) => tokio::select! {
            _ = interrupt.recv() => Termination::Interrupt,
            _ = terminate.recv() => Termination::Terminate,
        },
        _ => ctrl_c().await,
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> Termination {
    ctrl_c().await
}

async fn ctrl_c() -> Termination {
    if matches!(tokio::signal::ctrl_c().await, Ok(())) {
        Termination::Interrupt
    } else {
        std::future::pending().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_follow_shell_convention() {
        assert_eq!(Termination::Interrupt.exit_code(), 130);
        assert_eq!(Termination::Terminate.exit_code(), 143);
    }
}
