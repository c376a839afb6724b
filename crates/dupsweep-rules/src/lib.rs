//! Rule model and resolution engines for dupsweep.
//!
//! A policy holds two ordered rule families:
//!
//! - **dir-commons** rules match full paths (segments joined by `/`, no
//!   leading slash) and decide whole subtrees: `keep`, `delete` or `skip`.
//!   Conditional rules (`latest` / `earliest`) compare a captured value across
//!   all candidates of the rule and retain only the extreme one.
//! - **same-files** rules match file names and condemn a file when a
//!   surviving sibling matches the keep pattern with equal captures for the
//!   rule's `groups`.
//!
//! Patterns are anchored at the start of the subject.
//!
//! ```rust,ignore
//! use dupsweep_rules::{Policy, Resolver, ResolverConfig, apply};
//!
//! let policy = Policy::load(Path::new("policy.yaml"))?;
//! let resolver = Resolver::new(policy.rules, ResolverConfig::default());
//! let decisions = resolver.resolve(&catalog)?;
//! let report = apply(&mut catalog, &decisions)?;
//! ```

mod config;
mod decision;
mod dirs;
mod error;
mod pattern;
mod policy;
mod resolve;
mod rule;
mod siblings;

pub use config::{ConditionalVeto, ResolverConfig, ResolverConfigBuilder};
pub use decision::{Decision, DecisionCounts, DecisionSet, Verdict};
pub use error::{PatternField, RuleError, RuleFamily, RuleId, RuleResult};
pub use pattern::{Captures, Pattern};
pub use policy::{DirCommonsEntry, Policy, PolicyDocument, SameFilesEntry};
pub use resolve::{ApplyReport, Resolver, apply, reclaimable_bytes};
pub use rule::{Condition, DEFAULT_ORDER_GROUP, DirCommonsRule, PathMatch, RuleSet, SameFilesRule};
