//! Error types for rule loading and evaluation.

use std::fmt;
use std::path::PathBuf;

use dupsweep_core::CatalogError;
use serde::{Deserialize, Serialize};
use strum::Display;
use thiserror::Error;

/// The two rule families of a policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, Serialize, Deserialize)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum RuleFamily {
    DirCommons,
    SameFiles,
}

/// Position of a rule in its family's ordered list (zero-based).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RuleId {
    pub family: RuleFamily,
    pub index: usize,
}

impl RuleId {
    pub fn dir_commons(index: usize) -> Self {
        Self {
            family: RuleFamily::DirCommons,
            index,
        }
    }

    pub fn same_files(index: usize) -> Self {
        Self {
            family: RuleFamily::SameFiles,
            index,
        }
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.family, self.index)
    }
}

/// Which pattern of a rule an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum PatternField {
    Keep,
    Delete,
    Skip,
}

/// Errors from policy loading, rule compilation and resolution passes.
#[derive(Debug, Error)]
pub enum RuleError {
    /// A pattern is not a valid regular expression.
    #[error("{rule}: invalid {field} pattern: {source}")]
    Compilation {
        rule: RuleId,
        field: PatternField,
        #[source]
        source: Box<fancy_regex::Error>,
    },

    /// A group referenced by a condition or a `groups` list is not declared.
    #[error("{rule}: {field} pattern does not declare group '{group}'")]
    MissingGroup {
        rule: RuleId,
        field: PatternField,
        group: String,
    },

    /// A rule lacks a pattern it needs.
    #[error("{rule}: {message}")]
    MissingPattern { rule: RuleId, message: String },

    /// The regex engine gave up on a subject (backtrack limit).
    #[error("{rule}: pattern evaluation failed: {source}")]
    Evaluation {
        rule: RuleId,
        #[source]
        source: Box<fancy_regex::Error>,
    },

    /// The policy document could not be parsed.
    #[error("Invalid policy document: {message}")]
    Parse { message: String },

    /// The policy document could not be read.
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Catalog failure while resolving or applying decisions.
    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

impl RuleError {
    /// Rule the error is attributed to, if any.
    pub fn rule(&self) -> Option<RuleId> {
        match self {
            Self::Compilation { rule, .. }
            | Self::MissingGroup { rule, .. }
            | Self::MissingPattern { rule, .. }
            | Self::Evaluation { rule, .. } => Some(*rule),
            Self::Parse { .. } | Self::Io { .. } | Self::Catalog(_) => None,
        }
    }
}

/// Result alias for rule operations.
pub type RuleResult<T> = Result<T, RuleError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_id_display() {
        assert_eq!(RuleId::dir_commons(3).to_string(), "dir-commons[3]");
        assert_eq!(RuleId::same_files(0).to_string(), "same-files[0]");
    }

    #[test]
    fn test_error_carries_position() {
        let err = RuleError::MissingGroup {
            rule: RuleId::same_files(2),
            field: PatternField::Keep,
            group: "name".into(),
        };
        assert_eq!(err.rule(), Some(RuleId::same_files(2)));
        assert_eq!(
            err.to_string(),
            "same-files[2]: keep pattern does not declare group 'name'"
        );
    }
}
