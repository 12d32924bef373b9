//! External process lifecycle events

use serde::{Deserialize, Serialize};

/// Emitted by the process executor for every tool or script it launches
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum ProcessEvent {
    /// Process spawned
    Started {
        command: String,
        args: Vec<String>,
        timeout_secs: Option<u64>,
    },

    /// Process exited on its own
    Completed {
        command: String,
        /// `None` when the process was ended by a signal
        exit_code: Option<i32>,
        duration_ms: u64,
        stdout_bytes: usize,
        stderr_bytes: usize,
    },

    /// Wall-clock limit reached; the process group was killed
    TimedOut {
        command: String,
        timeout_secs: u64,
        duration_ms: u64,
    },

    /// Caller cancelled the run; the process group was killed
    Cancelled { command: String, duration_ms: u64 },

    /// The process could not be spawned or its pipes failed
    Failed {
        command: String,
        error_message: String,
    },
}
