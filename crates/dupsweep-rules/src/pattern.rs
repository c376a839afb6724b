//! Compiled patterns with named capture groups.

use std::collections::BTreeMap;
use std::fmt;

use fancy_regex::Regex;

use crate::error::{PatternField, RuleError, RuleId, RuleResult};

/// Named captures of one successful match.
///
/// Only groups that participated in the match are present.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Captures(BTreeMap<String, String>);

impl Captures {
    /// Captured text of a group.
    pub fn get(&self, group: &str) -> Option<&str> {
        self.0.get(group).map(String::as_str)
    }

    /// Whether both matches captured equal text for every listed group.
    ///
    /// A group missing from either side never agrees.
    pub fn agrees_on<S: AsRef<str>>(&self, other: &Captures, groups: &[S]) -> bool {
        groups.iter().all(|g| {
            let g = g.as_ref();
            matches!((self.get(g), other.get(g)), (Some(a), Some(b)) if a == b)
        })
    }

    /// Values of the listed groups, in list order.
    pub fn project<S: AsRef<str>>(&self, groups: &[S]) -> Vec<Option<String>> {
        groups
            .iter()
            .map(|g| self.get(g.as_ref()).map(str::to_owned))
            .collect()
    }
}

/// A regular expression anchored at the start of its subject.
#[derive(Clone)]
pub struct Pattern {
    rule: RuleId,
    field: PatternField,
    source: String,
    regex: Regex,
    groups: Vec<String>,
}

impl Pattern {
    /// Compile `source` for the given rule position.
    pub fn compile(rule: RuleId, field: PatternField, source: &str) -> RuleResult<Self> {
        let regex = Regex::new(&format!("^(?:{source})")).map_err(|e| RuleError::Compilation {
            rule,
            field,
            source: Box::new(e),
        })?;
        let groups = regex.capture_names().flatten().map(str::to_owned).collect();
        Ok(Self {
            rule,
            field,
            source: source.to_owned(),
            regex,
            groups,
        })
    }

    /// The pattern text as written in the policy.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Declared named groups, in declaration order.
    pub fn groups(&self) -> &[String] {
        &self.groups
    }

    /// Whether the pattern declares a named group.
    pub fn declares(&self, group: &str) -> bool {
        self.groups.iter().any(|g| g == group)
    }

    /// Fail with `MissingGroup` unless every listed group is declared.
    pub fn require_groups<S: AsRef<str>>(&self, groups: &[S]) -> RuleResult<()> {
        match groups.iter().find(|g| !self.declares(g.as_ref())) {
            Some(group) => Err(RuleError::MissingGroup {
                rule: self.rule,
                field: self.field,
                group: group.as_ref().to_owned(),
            }),
            None => Ok(()),
        }
    }

    pub fn is_match(&self, subject: &str) -> RuleResult<bool> {
        self.regex.is_match(subject).map_err(|e| self.evaluation_error(e))
    }

    /// Match `subject` and collect named captures.
    pub fn captures(&self, subject: &str) -> RuleResult<Option<Captures>> {
        let Some(caps) = self
            .regex
            .captures(subject)
            .map_err(|e| self.evaluation_error(e))?
        else {
            return Ok(None);
        };
        let named = self
            .groups
            .iter()
            .filter_map(|g| caps.name(g).map(|m| (g.clone(), m.as_str().to_owned())))
            .collect();
        Ok(Some(Captures(named)))
    }

    fn evaluation_error(&self, source: fancy_regex::Error) -> RuleError {
        RuleError::Evaluation {
            rule: self.rule,
            source: Box::new(source),
        }
    }
}

impl fmt::Debug for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pattern")
            .field("rule", &self.rule)
            .field("field", &self.field)
            .field("source", &self.source)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern(source: &str) -> Pattern {
        Pattern::compile(RuleId::same_files(0), PatternField::Delete, source).unwrap()
    }

    #[test]
    fn test_anchored_at_start_only() {
        let p = pattern("Backup/");
        assert!(p.is_match("Backup/2020").unwrap());
        assert!(!p.is_match("Old/Backup/2020").unwrap());
    }

    #[test]
    fn test_alternation_is_anchored_as_a_whole() {
        let p = pattern("a|b");
        assert!(p.is_match("b-side").unwrap());
        assert!(!p.is_match("xb").unwrap());
    }

    #[test]
    fn test_lookahead_captures() {
        let p = pattern(r"(?P<name>((?!cam).)+)\.(?P<ext>.+)$");
        assert_eq!(p.groups(), ["name", "ext"]);

        let caps = p.captures("photo.jpg").unwrap().unwrap();
        assert_eq!(caps.get("name"), Some("photo"));
        assert_eq!(caps.get("ext"), Some("jpg"));
        assert!(p.captures("photocam.jpg").unwrap().is_none());
    }

    #[test]
    fn test_non_participating_group_never_agrees() {
        let p = pattern(r"(?P<name>[a-z]+)(?P<num>\d+)?");
        let a = p.captures("abc").unwrap().unwrap();
        let b = p.captures("abc").unwrap().unwrap();
        assert!(a.agrees_on(&b, &["name"]));
        assert!(!a.agrees_on(&b, &["num"]));
        assert!(a.agrees_on::<&str>(&b, &[]));
    }

    #[test]
    fn test_invalid_pattern_reports_rule() {
        let err = Pattern::compile(RuleId::dir_commons(4), PatternField::Skip, "(unclosed")
            .unwrap_err();
        assert!(matches!(
            err,
            RuleError::Compilation {
                rule,
                field: PatternField::Skip,
                ..
            } if rule == RuleId::dir_commons(4)
        ));
    }

    #[test]
    fn test_require_groups() {
        let p = pattern(r"(?P<name>.+)\.bak$");
        assert!(p.require_groups(&["name"]).is_ok());
        let err = p.require_groups(&["name", "ext"]).unwrap_err();
        assert!(matches!(err, RuleError::MissingGroup { group, .. } if group == "ext"));
    }
}
