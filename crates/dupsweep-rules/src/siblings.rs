//! Same-name resolution: same-files rules within one directory.

use std::collections::HashSet;

use dupsweep_core::{Catalog, CatalogError, FsNode, NodeId};
use tracing::debug;

use crate::decision::{Decision, DecisionSet, Verdict};
use crate::error::{RuleId, RuleResult};
use crate::rule::SameFilesRule;

pub(crate) struct SiblingPass<'a> {
    pub catalog: &'a Catalog,
    pub rules: &'a [SameFilesRule],
    /// Verdicts of the directory pass.
    pub dir_decisions: &'a DecisionSet,
    pub require_identical_content: bool,
}

impl SiblingPass<'_> {
    /// Evaluate the files directly inside `dir`, in name order.
    pub fn run(&self, dir: NodeId) -> RuleResult<Vec<Decision>> {
        let parent = self
            .catalog
            .node(dir)
            .ok_or(CatalogError::UnknownNode { node: dir })?;
        let files: Vec<&FsNode> = parent
            .children()
            .filter_map(|id| self.catalog.node(id))
            .filter(|n| n.is_file())
            .collect();
        if files.len() < 2 && self.rules.iter().all(|r| r.skip.is_none()) {
            return Ok(Vec::new());
        }

        let mut condemned: HashSet<NodeId> = files
            .iter()
            .filter(|f| self.dir_decisions.verdict(f.id) == Verdict::Delete)
            .map(|f| f.id)
            .collect();

        let mut decisions = Vec::new();
        for file in &files {
            let decided = self
                .dir_decisions
                .get(file.id)
                .is_some_and(|d| d.verdict.is_terminal());
            if decided {
                continue;
            }
            let Some((verdict, rule)) = self.evaluate(file, &files, &condemned)? else {
                continue;
            };
            if verdict == Verdict::Delete {
                condemned.insert(file.id);
            }
            decisions.push(Decision {
                node: file.id,
                disk: file.disk,
                path: file.path().to_owned(),
                verdict,
                rule,
            });
        }
        Ok(decisions)
    }

    fn evaluate(
        &self,
        file: &FsNode,
        siblings: &[&FsNode],
        condemned: &HashSet<NodeId>,
    ) -> RuleResult<Option<(Verdict, RuleId)>> {
        for rule in self.rules {
            if let Some(skip) = &rule.skip {
                if skip.is_match(&file.name)? {
                    return Ok(Some((Verdict::Skip, rule.id)));
                }
            }
            let Some(candidate) = rule.delete.captures(&file.name)? else {
                continue;
            };

            for sibling in siblings {
                if sibling.id == file.id || condemned.contains(&sibling.id) {
                    continue;
                }
                if self.require_identical_content && sibling.content != file.content {
                    continue;
                }
                let Some(canonical) = rule.keep.captures(&sibling.name)? else {
                    continue;
                };
                if rule.links(&candidate, &canonical) {
                    debug!(
                        path = %file.path(),
                        canonical = %sibling.name,
                        rule = %rule.id,
                        "same-files duplicate"
                    );
                    return Ok(Some((Verdict::Delete, rule.id)));
                }
            }
        }
        Ok(None)
    }
}
