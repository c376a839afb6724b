//! Resolver configuration.

use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Whether a later skip pattern may overturn an earlier conditional delete.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum ConditionalVeto {
    /// A `latest`/`earliest` delete stands once computed.
    #[default]
    Final,
    /// A skip pattern of any later dir-commons rule matching the condemned
    /// node or one of its descendants cancels the delete.
    LaterSkip,
}

/// Configuration for a resolution pass.
#[derive(Debug, Clone, Builder, Serialize, Deserialize)]
#[builder(setter(into))]
pub struct ResolverConfig {
    #[builder(default)]
    #[serde(default)]
    pub conditional_veto: ConditionalVeto,

    /// Evaluate top-level directories on the rayon pool.
    #[builder(default = "true")]
    #[serde(default = "default_true")]
    pub parallel: bool,

    /// Same-files deletes additionally require equal content digests.
    #[builder(default)]
    #[serde(default)]
    pub require_identical_content: bool,
}

fn default_true() -> bool {
    true
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            conditional_veto: ConditionalVeto::Final,
            parallel: true,
            require_identical_content: false,
        }
    }
}

impl ResolverConfig {
    /// Create a new config builder.
    pub fn builder() -> ResolverConfigBuilder {
        ResolverConfigBuilder::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_veto_parses_from_kebab_case() {
        assert_eq!("later-skip".parse::<ConditionalVeto>().unwrap(), ConditionalVeto::LaterSkip);
        assert_eq!(ConditionalVeto::Final.to_string(), "final");
    }

    #[test]
    fn test_builder_defaults() {
        let config = ResolverConfig::builder().build().unwrap();
        assert_eq!(config.conditional_veto, ConditionalVeto::Final);
        assert!(config.parallel);
        assert!(!config.require_identical_content);
    }
}
