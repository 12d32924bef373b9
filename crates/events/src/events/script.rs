//! Check script evaluation events

use fleetpkg_types::ScriptKind;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum ScriptEvent {
    Started { item: String, kind: ScriptKind },

    Completed {
        item: String,
        kind: ScriptKind,
        exit_code: Option<i32>,
        timed_out: bool,
    },

    /// External script failed the permission check and was not run
    Refused {
        item: String,
        kind: ScriptKind,
        path: String,
        reason: String,
    },

    /// Script could not produce a verdict; evaluation moved to the next rule
    Degraded {
        item: String,
        kind: ScriptKind,
        reason: String,
    },
}
