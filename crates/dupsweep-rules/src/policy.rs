//! Policy documents: content types and both rule lists.
//!
//! ```yaml
//! content-types:
//!   image: [jpg, jpeg, png]
//! dir-commons:
//!   - keep: 'Photos/'
//!     delete: 'Backup/(?P<date>[0-9-]+)/Photos/'
//! same-files:
//!   - keep: '(?P<name>.+)$'
//!     delete: '(?P<name>.+)\.bak$'
//!     groups: [name]
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use dupsweep_core::ContentTypes;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{RuleError, RuleId, RuleResult};
use crate::rule::{Condition, DirCommonsRule, RuleSet, SameFilesRule};

/// One `dir-commons` entry as written.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DirCommonsEntry {
    pub keep: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,
    /// Capture group the condition orders by (default `date`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
}

/// One `same-files` entry as written.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SameFilesEntry {
    pub keep: String,
    pub delete: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip: Option<String>,
    #[serde(default)]
    pub groups: Vec<String>,
}

/// Uncompiled policy document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct PolicyDocument {
    #[serde(default)]
    pub content_types: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub dir_commons: Vec<DirCommonsEntry>,
    #[serde(default)]
    pub same_files: Vec<SameFilesEntry>,
}

/// Compiled policy.
#[derive(Debug, Clone, Default)]
pub struct Policy {
    pub rules: RuleSet,
    pub content_types: ContentTypes,
}

impl PolicyDocument {
    pub fn from_yaml(text: &str) -> RuleResult<Self> {
        serde_yaml::from_str(text).map_err(|e| RuleError::Parse {
            message: e.to_string(),
        })
    }

    pub fn from_json(text: &str) -> RuleResult<Self> {
        serde_json::from_str(text).map_err(|e| RuleError::Parse {
            message: e.to_string(),
        })
    }

    /// Read a document; `.json` files are JSON, anything else YAML.
    pub fn load(path: &Path) -> RuleResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| RuleError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        if is_json {
            Self::from_json(&text)
        } else {
            Self::from_yaml(&text)
        }
    }

    /// Compile every pattern. The first bad rule aborts with its position.
    pub fn compile(&self) -> RuleResult<Policy> {
        let mut content_types = ContentTypes::new();
        for (name, extensions) in &self.content_types {
            content_types.register(name.as_str(), extensions)?;
        }

        let dir_commons = self
            .dir_commons
            .iter()
            .enumerate()
            .map(|(index, entry)| {
                DirCommonsRule::new(
                    RuleId::dir_commons(index),
                    &entry.keep,
                    entry.delete.as_deref(),
                    entry.skip.as_deref(),
                    entry.condition,
                    entry.group.as_deref(),
                )
            })
            .collect::<RuleResult<Vec<_>>>()?;

        let same_files = self
            .same_files
            .iter()
            .enumerate()
            .map(|(index, entry)| {
                SameFilesRule::new(
                    RuleId::same_files(index),
                    &entry.keep,
                    &entry.delete,
                    entry.skip.as_deref(),
                    entry.groups.clone(),
                )
            })
            .collect::<RuleResult<Vec<_>>>()?;

        info!(
            dir_commons = dir_commons.len(),
            same_files = same_files.len(),
            content_types = content_types.len(),
            "compiled policy"
        );

        Ok(Policy {
            rules: RuleSet {
                dir_commons,
                same_files,
            },
            content_types,
        })
    }
}

impl Policy {
    /// Load and compile a policy file.
    pub fn load(path: &Path) -> RuleResult<Self> {
        PolicyDocument::load(path)?.compile()
    }
}
