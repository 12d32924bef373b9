//! Loose version comparison and normalization
//!
//! Installer versions are not semver: vendors ship `10.15`, `10.15.0`,
//! `1.0b3`, `2019.12.0-abc1` and worse. Versions are split into numeric and
//! textual components (dots are separators, digit/non-digit boundaries start
//! a new component) and compared after padding the shorter side with zeros:
//! - `10.15` == `10.15.0`
//! - `1.2` < `1.10` (numeric, not lexical)
//! - `1.0b1` < `1.0` (text sorts before any number)

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use std::sync::LazyLock;

/// Outcome of comparing an installed version against a wanted one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionComparison {
    Older,
    Same,
    Newer,
}

impl From<Ordering> for VersionComparison {
    fn from(ordering: Ordering) -> Self {
        match ordering {
            Ordering::Less => Self::Older,
            Ordering::Equal => Self::Same,
            Ordering::Greater => Self::Newer,
        }
    }
}

impl fmt::Display for VersionComparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Older => write!(f, "older"),
            Self::Same => write!(f, "the same"),
            Self::Newer => write!(f, "newer"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Component {
    /// Non-numeric run, e.g. `b` in `1.0b2` or `-abc` in `10.0.0-abc1`
    Text(String),
    /// Decimal digits with leading zeros stripped (`"0"` for zero)
    Number(String),
}

impl Component {
    fn zero() -> Self {
        Self::Number("0".to_string())
    }

    fn is_zero(&self) -> bool {
        matches!(self, Self::Number(n) if n == "0")
    }

    fn number(digits: &str) -> Self {
        let trimmed = digits.trim_start_matches('0');
        if trimmed.is_empty() {
            Self::zero()
        } else {
            Self::Number(trimmed.to_string())
        }
    }
}

impl Ord for Component {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            // Stripped decimal strings order by length first, then digit by digit
            (Self::Number(a), Self::Number(b)) => a.len().cmp(&b.len()).then_with(|| a.cmp(b)),
            (Self::Text(a), Self::Text(b)) => a.cmp(b),
            (Self::Text(_), Self::Number(_)) => Ordering::Less,
            (Self::Number(_), Self::Text(_)) => Ordering::Greater,
        }
    }
}

impl PartialOrd for Component {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A version string with padding-aware total ordering
#[derive(Debug, Clone)]
pub struct LooseVersion {
    raw: String,
    components: Vec<Component>,
}

impl LooseVersion {
    /// Parse a version string. Never fails: an empty string is version `0`.
    #[must_use]
    pub fn parse(input: &str) -> Self {
        let mut components = Vec::new();
        for part in input.trim().split('.') {
            let mut chars = part.char_indices().peekable();
            while let Some(&(start, c)) = chars.peek() {
                let numeric = c.is_ascii_digit();
                let mut end = start;
                while let Some(&(idx, c)) = chars.peek() {
                    if c.is_ascii_digit() != numeric {
                        break;
                    }
                    end = idx + c.len_utf8();
                    chars.next();
                }
                let run = &part[start..end];
                if numeric {
                    components.push(Component::number(run));
                } else {
                    components.push(Component::Text(run.to_string()));
                }
            }
        }
        Self {
            raw: input.trim().to_string(),
            components,
        }
    }

    /// The string this version was parsed from
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Whether the version has at least one numeric component
    #[must_use]
    pub fn has_numeric_component(&self) -> bool {
        self.components
            .iter()
            .any(|c| matches!(c, Component::Number(_)))
    }

    /// Components with trailing zeros removed; equal versions share this form.
    fn significant(&self) -> &[Component] {
        let mut len = self.components.len();
        while len > 0 && self.components[len - 1].is_zero() {
            len -= 1;
        }
        &self.components[..len]
    }
}

impl Ord for LooseVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        let max = self.components.len().max(other.components.len());
        let zero = Component::zero();
        for idx in 0..max {
            let a = self.components.get(idx).unwrap_or(&zero);
            let b = other.components.get(idx).unwrap_or(&zero);
            match a.cmp(b) {
                Ordering::Equal => {}
                unequal => return unequal,
            }
        }
        Ordering::Equal
    }
}

impl PartialOrd for LooseVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for LooseVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for LooseVersion {}

impl Hash for LooseVersion {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for component in self.significant() {
            match component {
                Component::Text(t) => {
                    0u8.hash(state);
                    t.hash(state);
                }
                Component::Number(n) => {
                    1u8.hash(state);
                    n.hash(state);
                }
            }
        }
    }
}

impl FromStr for LooseVersion {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

impl fmt::Display for LooseVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Compare `this` (usually the installed version) against `that`.
#[must_use]
pub fn compare(this: &str, that: &str) -> VersionComparison {
    LooseVersion::parse(this)
        .cmp(&LooseVersion::parse(that))
        .into()
}

/// Drop lone trailing `.0` components while more than major.minor remain.
///
/// `10.0.0.0` → `10.0`, `10.0.0-abc1.0` → `10.0.0-abc1`.
#[must_use]
pub fn trim(version: &str) -> String {
    let mut parts: Vec<&str> = version.split('.').collect();
    while parts.len() > 2 && parts.last() == Some(&"0") {
        parts.pop();
    }
    parts.join(".")
}

/// Normalize to exactly `count` dot-separated components.
#[must_use]
pub fn pad_version(version: Option<&str>, count: usize) -> String {
    let mut parts: Vec<&str> = version.unwrap_or("0").split('.').collect();
    parts.resize(count, "0");
    parts.join(".")
}

static NAME_VERSION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[0-9]+(\.[0-9]+)((\.|a|b|d|v)[0-9]+)+").expect("name/version pattern is valid")
});

/// Split a file or bundle name into a name and a version.
///
/// `TextWrangler2.3b1` → (`TextWrangler`, `2.3b1`),
/// `AdobePhotoshopCS3-11.2.1` → (`AdobePhotoshopCS3`, `11.2.1`).
#[must_use]
pub fn name_and_version(input: &str) -> (String, String) {
    const SEPARATORS: &[char] = &[' ', '.', '-', '_', 'v'];

    if let Some(m) = NAME_VERSION_RE.find(input) {
        let name = input[..m.start()].trim_end_matches(SEPARATORS);
        return (name.to_string(), m.as_str().to_string());
    }

    // Walk backwards over version-ish characters, allowing one of a/b/d/v
    let chars: Vec<char> = input.chars().collect();
    let mut start = chars.len();
    let mut seen_letter = false;
    while start > 0 {
        let c = chars[start - 1];
        if c.is_ascii_digit() || c == '.' || c == '_' {
            start -= 1;
        } else if matches!(c, 'a' | 'b' | 'd' | 'v') && !seen_letter {
            seen_letter = true;
            start -= 1;
        } else {
            break;
        }
    }
    if start == chars.len() {
        return (input.to_string(), String::new());
    }
    // The version must begin with a digit
    while start < chars.len() && !chars[start].is_ascii_digit() {
        start += 1;
    }
    let name: String = chars[..start].iter().collect();
    let version: String = chars[start..].iter().collect();
    (name.trim_end_matches(SEPARATORS).to_string(), version)
}
