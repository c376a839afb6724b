//! Directory resolution: dir-commons rules over full paths.
//!
//! Each top-level directory is walked top-down. The first rule giving a
//! node a terminal verdict decides it, and a terminal verdict ends the
//! descent: nothing below a condemned or protected node is evaluated again.

use std::collections::HashMap;

use dupsweep_core::{Catalog, CatalogError, NodeId};
use itertools::Itertools;
use tracing::{debug, trace};

use crate::config::ConditionalVeto;
use crate::decision::{Decision, Verdict};
use crate::error::{RuleId, RuleResult};
use crate::resolve::map_units;
use crate::rule::{DirCommonsRule, PathMatch};

/// Standing of a candidate within its conditional group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Standing {
    /// Holds the retained value of its group.
    Retained,
    /// Matches the delete pattern with a non-retained value.
    Condemned,
}

type StandingTable = HashMap<NodeId, Standing>;

struct Member {
    node: NodeId,
    key: Vec<Option<String>>,
    value: String,
    deletable: bool,
}

/// Rank every candidate of every conditional rule.
///
/// Returns one table per rule, empty for rules without a condition.
pub(crate) fn standing_tables(
    catalog: &Catalog,
    rules: &[DirCommonsRule],
    nodes: &[NodeId],
    parallel: bool,
) -> RuleResult<Vec<StandingTable>> {
    rules
        .iter()
        .map(|rule| match rule.condition {
            Some(_) => standing_table(catalog, rule, nodes, parallel),
            None => Ok(StandingTable::new()),
        })
        .collect()
}

fn standing_table(
    catalog: &Catalog,
    rule: &DirCommonsRule,
    nodes: &[NodeId],
    parallel: bool,
) -> RuleResult<StandingTable> {
    let (Some(condition), Some(delete)) = (rule.condition, &rule.delete) else {
        return Ok(StandingTable::new());
    };
    let key_groups = rule.key_groups();

    let members = map_units(parallel, nodes, |&node| -> RuleResult<Option<Member>> {
        let path = catalog.path_of(node)?;
        let kept = rule.keep.captures(path)?;
        let condemned = delete.captures(path)?;
        let deletable = condemned.is_some();
        let Some(captures) = kept.or(condemned) else {
            return Ok(None);
        };
        Ok(captures.get(&rule.order_group).map(|value| Member {
            node,
            key: captures.project(&key_groups),
            value: value.to_owned(),
            deletable,
        }))
    })?;

    let groups = members.into_iter().flatten().into_group_map_by(|m| m.key.clone());

    let mut table = StandingTable::new();
    for members in groups.values() {
        let Some(retained) = condition.select(members.iter().map(|m| m.value.as_str())) else {
            continue;
        };
        for member in members {
            if member.value == retained {
                table.insert(member.node, Standing::Retained);
            } else if member.deletable {
                table.insert(member.node, Standing::Condemned);
            }
        }
    }

    debug!(
        rule = %rule.id,
        %condition,
        groups = groups.len(),
        condemned = table.values().filter(|s| **s == Standing::Condemned).count(),
        "ranked conditional candidates"
    );
    Ok(table)
}

/// Decisions for one top-level subtree.
#[derive(Debug, Default)]
pub(crate) struct SubtreeOutcome {
    pub decisions: Vec<Decision>,
    /// Directories with no terminal verdict on themselves or any ancestor.
    pub surviving_dirs: Vec<NodeId>,
}

pub(crate) struct DirPass<'a> {
    pub catalog: &'a Catalog,
    pub rules: &'a [DirCommonsRule],
    pub tables: &'a [StandingTable],
    pub veto: ConditionalVeto,
}

impl DirPass<'_> {
    /// Evaluate the subtree rooted at `top`.
    pub fn run(&self, top: NodeId) -> RuleResult<SubtreeOutcome> {
        let mut outcome = SubtreeOutcome::default();
        let mut stack = vec![top];

        while let Some(id) = stack.pop() {
            let node = self
                .catalog
                .node(id)
                .ok_or(CatalogError::UnknownNode { node: id })?;

            if let Some((verdict, rule)) = self.evaluate(id, node.path())? {
                debug!(path = %node.path(), %verdict, %rule, "dir-commons verdict");
                outcome.decisions.push(Decision {
                    node: id,
                    disk: node.disk,
                    path: node.path().to_owned(),
                    verdict,
                    rule,
                });
                if verdict.is_terminal() {
                    continue;
                }
            }

            if node.is_dir() {
                outcome.surviving_dirs.push(id);
                stack.extend(node.children());
            }
        }
        Ok(outcome)
    }

    fn evaluate(&self, id: NodeId, path: &str) -> RuleResult<Option<(Verdict, RuleId)>> {
        let mut kept_by = None;

        for (index, rule) in self.rules.iter().enumerate() {
            let verdict = match rule.condition {
                None => match rule.match_path(path)? {
                    PathMatch::Skip => Some(Verdict::Skip),
                    PathMatch::Delete => Some(Verdict::Delete),
                    PathMatch::Keep => {
                        kept_by.get_or_insert(rule.id);
                        None
                    }
                    PathMatch::None => None,
                },
                Some(_) if rule.skips(path)? => Some(Verdict::Skip),
                Some(_) => match self.tables.get(index).and_then(|t| t.get(&id)) {
                    Some(Standing::Retained) => {
                        kept_by.get_or_insert(rule.id);
                        None
                    }
                    Some(Standing::Condemned) if self.vetoed(index, id)? => {
                        debug!(%path, rule = %rule.id, "conditional delete vetoed by a later skip");
                        None
                    }
                    Some(Standing::Condemned) => Some(Verdict::Delete),
                    None => {
                        if rule.keep.is_match(path)? {
                            kept_by.get_or_insert(rule.id);
                        }
                        None
                    }
                },
            };

            if let Some(verdict) = verdict {
                return Ok(Some((verdict, rule.id)));
            }
        }

        trace!(%path, "no terminal dir-commons verdict");
        Ok(kept_by.map(|rule| (Verdict::Keep, rule)))
    }

    /// Whether a later skip pattern protects the node or anything below it.
    fn vetoed(&self, index: usize, id: NodeId) -> RuleResult<bool> {
        if self.veto == ConditionalVeto::Final {
            return Ok(false);
        }
        let later: Vec<&DirCommonsRule> = self.rules[index + 1..]
            .iter()
            .filter(|r| r.skip.is_some())
            .collect();
        if later.is_empty() {
            return Ok(false);
        }
        for node in self.catalog.tree().subtree(id)? {
            let path = self.catalog.path_of(node)?;
            for rule in &later {
                if rule.skips(path)? {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }
}
