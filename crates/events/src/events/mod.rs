use serde::{Deserialize, Serialize};

use crate::EventSource;
use fleetpkg_errors::UserFacingError;

/// Serializable snapshot of a `UserFacingError`, carried by failure events
/// and by per-item scan results
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureContext {
    /// Dotted code such as `script.insecure_permissions`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    pub retryable: bool,
}

impl FailureContext {
    #[must_use]
    pub fn from_error<E: UserFacingError + ?Sized>(error: &E) -> Self {
        Self {
            code: error.user_code().map(str::to_owned),
            message: error.user_message().into_owned(),
            hint: error.user_hint().map(str::to_owned),
            retryable: error.is_retryable(),
        }
    }
}

pub mod general;
pub mod package;
pub mod process;
pub mod scan;
pub mod script;

pub use general::*;
pub use package::*;
pub use process::*;
pub use scan::*;
pub use script::*;

/// Every event a library crate can emit, tagged by domain on the wire
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "domain", content = "event", rename_all = "snake_case")]
pub enum AppEvent {
    /// Domain-free warnings and tolerated errors
    General(GeneralEvent),

    /// External tool and script processes
    Process(ProcessEvent),

    /// Check script evaluation
    Script(ScriptEvent),

    /// Catalog scans and per-item verdicts
    Scan(ScanEvent),

    /// Installer package introspection
    Package(PackageEvent),
}

impl AppEvent {
    /// Identify the source domain for this event (used for logging).
    #[must_use]
    pub fn event_source(&self) -> EventSource {
        match self {
            Self::General(_) => EventSource::GENERAL,
            Self::Process(_) => EventSource::PROCESS,
            Self::Script(_) => EventSource::SCRIPT,
            Self::Scan(_) => EventSource::SCAN,
            Self::Package(_) => EventSource::PACKAGE,
        }
    }

    /// Level the front end logs this event at
    #[must_use]
    pub fn log_level(&self) -> tracing::Level {
        use tracing::Level;

        match self {
            Self::General(GeneralEvent::Error { .. })
            | Self::Script(ScriptEvent::Refused { .. })
            | Self::Scan(ScanEvent::ItemFailed { .. })
            | Self::Package(PackageEvent::InspectionFailed { .. }) => Level::ERROR,

            Self::General(GeneralEvent::Warning { .. })
            | Self::Process(
                ProcessEvent::TimedOut { .. }
                | ProcessEvent::Cancelled { .. }
                | ProcessEvent::Failed { .. },
            )
            | Self::Script(ScriptEvent::Degraded { .. }) => Level::WARN,

            Self::Process(ProcessEvent::Started { .. } | ProcessEvent::Completed { .. })
            | Self::Script(ScriptEvent::Started { .. } | ScriptEvent::Completed { .. })
            | Self::Scan(ScanEvent::ItemEvaluated { .. }) => Level::DEBUG,

            // Scan and registry progress
            _ => Level::INFO,
        }
    }

    /// Event rendered as a single JSON object for log sinks
    #[must_use]
    pub fn log_fields(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| format!("{self:?}"))
    }
}
