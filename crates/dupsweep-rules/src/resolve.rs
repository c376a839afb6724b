//! Resolution passes and decision application.

use dupsweep_core::{Catalog, DeleteSummary, DiskId, NodeId};
use rayon::prelude::*;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::ResolverConfig;
use crate::decision::{DecisionSet, Verdict};
use crate::dirs::{DirPass, standing_tables};
use crate::error::RuleResult;
use crate::rule::RuleSet;
use crate::siblings::SiblingPass;

/// Map over independent units, on the rayon pool when `parallel`.
pub(crate) fn map_units<T, R, F>(parallel: bool, units: &[T], f: F) -> RuleResult<Vec<R>>
where
    T: Sync,
    R: Send,
    F: Fn(&T) -> RuleResult<R> + Sync + Send,
{
    if parallel {
        units.par_iter().map(f).collect()
    } else {
        units.iter().map(f).collect()
    }
}

/// Runs both engines over a frozen catalog.
#[derive(Debug, Clone, Default)]
pub struct Resolver {
    rules: RuleSet,
    config: ResolverConfig,
}

impl Resolver {
    pub fn new(rules: RuleSet, config: ResolverConfig) -> Self {
        Self { rules, config }
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Resolve every disk of the catalog.
    pub fn resolve(&self, catalog: &Catalog) -> RuleResult<DecisionSet> {
        let disks: Vec<DiskId> = catalog.disks().map(|d| d.id).collect();
        self.resolve_disks(catalog, &disks)
    }

    /// Resolve the given disks.
    ///
    /// The directory pass runs first and to completion; the same-files pass
    /// then visits only directories it left standing.
    pub fn resolve_disks(&self, catalog: &Catalog, disks: &[DiskId]) -> RuleResult<DecisionSet> {
        let parallel = self.config.parallel;
        let roots = disks
            .iter()
            .map(|&disk| catalog.tree().root(disk))
            .collect::<Result<Vec<NodeId>, _>>()?;

        let tables = if self.rules.dir_commons.iter().any(|r| r.condition.is_some()) {
            let mut nodes = Vec::new();
            for root in &roots {
                nodes.extend(catalog.tree().subtree(*root)?.into_iter().skip(1));
            }
            standing_tables(catalog, &self.rules.dir_commons, &nodes, parallel)?
        } else {
            vec![Default::default(); self.rules.dir_commons.len()]
        };

        let mut tops = Vec::new();
        for root in &roots {
            tops.extend(catalog.children(*root)?);
        }

        let dir_pass = DirPass {
            catalog,
            rules: &self.rules.dir_commons,
            tables: &tables,
            veto: self.config.conditional_veto,
        };
        let outcomes = map_units(parallel, &tops, |&top| dir_pass.run(top))?;

        let mut decisions = DecisionSet::new();
        let mut dirs = roots;
        for outcome in outcomes {
            decisions.extend(outcome.decisions);
            dirs.extend(outcome.surviving_dirs);
        }

        let sibling_decisions = if self.rules.same_files.is_empty() {
            Vec::new()
        } else {
            let sibling_pass = SiblingPass {
                catalog,
                rules: &self.rules.same_files,
                dir_decisions: &decisions,
                require_identical_content: self.config.require_identical_content,
            };
            map_units(parallel, &dirs, |&dir| sibling_pass.run(dir))?
        };
        decisions.extend(sibling_decisions.into_iter().flatten());

        let counts = decisions.counts();
        info!(
            disks = disks.len(),
            keep = counts.keep,
            delete = counts.delete,
            skip = counts.skip,
            "resolution pass complete"
        );
        Ok(decisions)
    }
}

/// What applying a decision set changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ApplyReport {
    /// Delete decisions carried out.
    pub applied: usize,
    /// Delete decisions whose node no longer exists or moved.
    pub stale: usize,
    pub removed: DeleteSummary,
}

/// Remove every condemned subtree from the catalog, one at a time.
pub fn apply(catalog: &mut Catalog, decisions: &DecisionSet) -> RuleResult<ApplyReport> {
    let mut report = ApplyReport::default();

    for decision in decisions.deletions() {
        let current = catalog.node(decision.node).map(|n| n.path());
        if current != Some(decision.path.as_str()) {
            warn!(path = %decision.path, rule = %decision.rule, "stale decision, node changed");
            report.stale += 1;
            continue;
        }
        let summary = catalog.delete_subtree(decision.node)?;
        report.removed.merge(summary);
        report.applied += 1;
    }

    info!(
        applied = report.applied,
        stale = report.stale,
        files = report.removed.files_removed,
        bytes = report.removed.bytes_removed,
        "applied decisions"
    );
    Ok(report)
}

/// Sum of the bytes a decision set would reclaim.
pub fn reclaimable_bytes(catalog: &Catalog, decisions: &DecisionSet) -> u64 {
    decisions
        .iter()
        .filter(|d| d.verdict == Verdict::Delete)
        .filter_map(|d| catalog.tree().subtree(d.node).ok())
        .flatten()
        .filter_map(|id| catalog.content_of(id))
        .map(|record| record.size)
        .sum()
}
