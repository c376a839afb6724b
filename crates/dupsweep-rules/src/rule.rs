//! Compiled rule families.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::{PatternField, RuleError, RuleId, RuleResult};
use crate::pattern::{Captures, Pattern};

/// Default name of the capture group conditions compare.
pub const DEFAULT_ORDER_GROUP: &str = "date";

/// Cross-candidate tie-break of a dir-commons rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Condition {
    /// Retain only the greatest captured value of each group.
    Latest,
    /// Retain only the smallest captured value of each group.
    Earliest,
}

impl Condition {
    /// Pick the retained value among the values of one group.
    pub fn select<'a>(&self, values: impl Iterator<Item = &'a str>) -> Option<&'a str> {
        match self {
            Condition::Latest => values.max(),
            Condition::Earliest => values.min(),
        }
    }
}

/// Outcome of testing one path against one dir-commons rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathMatch {
    /// Skip pattern matched.
    Skip,
    /// Delete pattern matched and no skip pattern did.
    Delete,
    /// Only the keep pattern matched.
    Keep,
    None,
}

/// A rule over full paths, deciding whole subtrees.
#[derive(Debug, Clone)]
pub struct DirCommonsRule {
    pub id: RuleId,
    pub keep: Pattern,
    pub delete: Option<Pattern>,
    pub skip: Option<Pattern>,
    pub condition: Option<Condition>,
    /// Group compared by `condition`.
    pub order_group: String,
}

impl DirCommonsRule {
    pub fn new(
        id: RuleId,
        keep: &str,
        delete: Option<&str>,
        skip: Option<&str>,
        condition: Option<Condition>,
        order_group: Option<&str>,
    ) -> RuleResult<Self> {
        let keep = Pattern::compile(id, PatternField::Keep, keep)?;
        let delete = delete
            .map(|p| Pattern::compile(id, PatternField::Delete, p))
            .transpose()?;
        let skip = skip
            .map(|p| Pattern::compile(id, PatternField::Skip, p))
            .transpose()?;
        let order_group = order_group.unwrap_or(DEFAULT_ORDER_GROUP).to_owned();

        if delete.is_none() && skip.is_none() {
            return Err(RuleError::MissingPattern {
                rule: id,
                message: "needs a delete or a skip pattern".into(),
            });
        }
        if let Some(condition) = condition {
            let Some(delete) = &delete else {
                return Err(RuleError::MissingPattern {
                    rule: id,
                    message: format!("condition '{condition}' needs a delete pattern"),
                });
            };
            keep.require_groups(&[&order_group])?;
            delete.require_groups(&[&order_group])?;
        }

        Ok(Self {
            id,
            keep,
            delete,
            skip,
            condition,
            order_group,
        })
    }

    /// Single-path verdict, ignoring any condition.
    pub fn match_path(&self, path: &str) -> RuleResult<PathMatch> {
        if self.skips(path)? {
            return Ok(PathMatch::Skip);
        }
        if let Some(delete) = &self.delete {
            if delete.is_match(path)? {
                return Ok(PathMatch::Delete);
            }
        }
        if self.keep.is_match(path)? {
            return Ok(PathMatch::Keep);
        }
        Ok(PathMatch::None)
    }

    pub fn skips(&self, path: &str) -> RuleResult<bool> {
        match &self.skip {
            Some(skip) => skip.is_match(path),
            None => Ok(false),
        }
    }

    /// Groups both patterns declare, minus the order group.
    ///
    /// Candidates of a conditional rule are compared only within equal
    /// values of these groups.
    pub fn key_groups(&self) -> Vec<&str> {
        let Some(delete) = &self.delete else {
            return Vec::new();
        };
        self.keep
            .groups()
            .iter()
            .filter(|g| **g != self.order_group && delete.declares(g))
            .map(String::as_str)
            .collect()
    }
}

/// A rule over file names, linking a variant to a canonical sibling.
#[derive(Debug, Clone)]
pub struct SameFilesRule {
    pub id: RuleId,
    pub keep: Pattern,
    pub delete: Pattern,
    pub skip: Option<Pattern>,
    pub groups: Vec<String>,
}

impl SameFilesRule {
    pub fn new(
        id: RuleId,
        keep: &str,
        delete: &str,
        skip: Option<&str>,
        groups: Vec<String>,
    ) -> RuleResult<Self> {
        let keep = Pattern::compile(id, PatternField::Keep, keep)?;
        let delete = Pattern::compile(id, PatternField::Delete, delete)?;
        let skip = skip
            .map(|p| Pattern::compile(id, PatternField::Skip, p))
            .transpose()?;
        keep.require_groups(&groups)?;
        delete.require_groups(&groups)?;

        Ok(Self {
            id,
            keep,
            delete,
            skip,
            groups,
        })
    }

    /// Whether `candidate` (captures of the delete pattern) and a sibling
    /// (captures of the keep pattern) denote the same logical file.
    pub fn links(&self, candidate: &Captures, canonical: &Captures) -> bool {
        candidate.agrees_on(canonical, &self.groups)
    }
}

/// Both rule families in evaluation order.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    pub dir_commons: Vec<DirCommonsRule>,
    pub same_files: Vec<SameFilesRule>,
}

impl RuleSet {
    pub fn is_empty(&self) -> bool {
        self.dir_commons.is_empty() && self.same_files.is_empty()
    }

    pub fn len(&self) -> usize {
        self.dir_commons.len() + self.same_files.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skip_beats_delete_in_same_rule() {
        let rule = DirCommonsRule::new(
            RuleId::dir_commons(0),
            "Data/",
            Some("Backup/"),
            Some("Backup/keepme"),
            None,
            None,
        )
        .unwrap();
        assert_eq!(rule.match_path("Backup/keepme/x").unwrap(), PathMatch::Skip);
        assert_eq!(rule.match_path("Backup/other").unwrap(), PathMatch::Delete);
        assert_eq!(rule.match_path("Data/x").unwrap(), PathMatch::Keep);
        assert_eq!(rule.match_path("Elsewhere").unwrap(), PathMatch::None);
    }

    #[test]
    fn test_rule_needs_delete_or_skip() {
        let err = DirCommonsRule::new(RuleId::dir_commons(1), "a", None, None, None, None)
            .unwrap_err();
        assert!(matches!(err, RuleError::MissingPattern { .. }));
        assert_eq!(err.rule(), Some(RuleId::dir_commons(1)));
    }

    #[test]
    fn test_condition_requires_order_group() {
        let err = DirCommonsRule::new(
            RuleId::dir_commons(2),
            r"Backup/(?P<date>\d+)",
            Some(r"Backup/\d+"),
            None,
            Some(Condition::Latest),
            None,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            RuleError::MissingGroup {
                field: PatternField::Delete,
                ..
            }
        ));
    }

    #[test]
    fn test_key_groups_exclude_order_group() {
        let rule = DirCommonsRule::new(
            RuleId::dir_commons(0),
            r"(?P<host>[^/]+)/(?P<date>[0-9-]+)$",
            Some(r"(?P<host>[^/]+)/(?P<date>[0-9-]+)$"),
            None,
            Some(Condition::Earliest),
            None,
        )
        .unwrap();
        assert_eq!(rule.key_groups(), vec!["host"]);
    }

    #[test]
    fn test_condition_select() {
        let values = ["2020-06-01", "2021-01-01", "2020-01-01"];
        assert_eq!(Condition::Latest.select(values.into_iter()), Some("2021-01-01"));
        assert_eq!(Condition::Earliest.select(values.into_iter()), Some("2020-01-01"));
    }

    #[test]
    fn test_same_files_groups_must_exist() {
        let err = SameFilesRule::new(
            RuleId::same_files(5),
            r"(?P<name>.+)$",
            r"(?P<name>.+)\.bak$",
            None,
            vec!["name".into(), "ext".into()],
        )
        .unwrap_err();
        assert!(matches!(err, RuleError::MissingGroup { rule, .. } if rule == RuleId::same_files(5)));
    }
}
