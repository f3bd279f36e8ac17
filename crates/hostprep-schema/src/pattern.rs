//! Shell-style file name patterns for include directories (`*.conf`).

use crate::plan::PlanError;
use glob::{MatchOptions, Pattern};
use serde::{Serialize, Serializer};
use std::fmt;

const NAME_MATCH: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: true,
};

/// A file name glob (`*`, `?`, `[...]` classes). Patterns never match
/// across `/`, and a leading dot must be matched literally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePattern(Pattern);

impl FilePattern {
    pub fn parse(pattern: &str) -> Result<Self, PlanError> {
        if pattern.is_empty() || pattern.contains('/') {
            return Err(PlanError::InvalidPattern(pattern.to_owned()));
        }
        Pattern::new(pattern)
            .map(Self)
            .map_err(|e| PlanError::InvalidPattern(format!("{pattern} ({})", e.msg)))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// Hidden files are never matched, the same way a shell glob skips them.
    pub fn matches(&self, file_name: &str) -> bool {
        // An empty leading `*` would otherwise let `*.conf` match `.conf`.
        if file_name.starts_with('.') && !self.as_str().starts_with('.') {
            return false;
        }
        self.0.matches_with(file_name, NAME_MATCH)
    }
}

impl Serialize for FilePattern {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl fmt::Display for FilePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
