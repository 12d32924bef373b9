use serde::{Deserialize, Serialize};

/// Problems that belong to no particular domain, such as a degraded receipt
/// registry or malformed catalog data that is tolerated
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GeneralEvent {
    /// Work continues with reduced fidelity
    Warning {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        context: Option<String>,
    },

    /// Something was wrong but a fallback answer was used
    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        details: Option<String>,
    },
}

impl GeneralEvent {
    #[must_use]
    pub fn warning(message: impl Into<String>, context: Option<String>) -> Self {
        Self::Warning {
            message: message.into(),
            context,
        }
    }

    #[must_use]
    pub fn error(message: impl Into<String>, details: Option<String>) -> Self {
        Self::Error {
            message: message.into(),
            details,
        }
    }

    /// Message plus its context or details, for one-line display
    #[must_use]
    pub fn summary(&self) -> String {
        let (message, extra) = match self {
            Self::Warning { message, context } => (message, context),
            Self::Error { message, details } => (message, details),
        };
        match extra {
            Some(extra) => format!("{message} ({extra})"),
            None => message.clone(),
        }
    }
}
