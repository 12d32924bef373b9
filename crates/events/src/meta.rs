use std::borrow::Cow;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Subsystem an event came from, recorded as the `source` log field
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct EventSource(Cow<'static, str>);

impl EventSource {
    pub const GENERAL: Self = Self(Cow::Borrowed("general"));
    pub const PROCESS: Self = Self(Cow::Borrowed("process"));
    pub const SCRIPT: Self = Self(Cow::Borrowed("script"));
    pub const SCAN: Self = Self(Cow::Borrowed("scan"));
    pub const PACKAGE: Self = Self(Cow::Borrowed("package"));

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EventSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
