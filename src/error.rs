use thiserror::Error;

/// Setup failures that can occur while bringing the painter online.
///
/// These are the only recoverable error conditions in this crate:
/// everything else either cannot fail (register reads/writes once the
/// window is mapped) or is a programmer-error `panic!`.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("failed to map the GPIO register window (errno {errno})")]
    MmapFailed { errno: i32 },

    #[error("failed to create the interval timer (errno {errno})")]
    TimerCreateFailed { errno: i32 },

    #[error("failed to arm the interval timer (errno {errno})")]
    TimerArmFailed { errno: i32 },
}
