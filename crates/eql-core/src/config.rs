//! # Engine Configuration
//!
//! Tunables for resolution and rule evaluation.
//!
//! Deserializable with serde so the application can load it from the
//! `[engine]` table of a TOML file; every field has a default.

use crate::primitives::CARTESIAN_WARNING_THRESHOLD;
use serde::{Deserialize, Serialize};

/// How sibling `Alternative` branches of a rule node are tested once no
/// `Refinement` fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlternativePolicy {
    /// Stop at the first alternative whose condition holds.
    #[default]
    FirstMatch,
    /// Fire every alternative whose condition holds.
    AllMatching,
}

/// Engine configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Alternative precedence in rule trees.
    pub alternative_policy: AlternativePolicy,
    /// Domain size above which an unconstrained projected variable is
    /// reported as a cartesian product.
    pub cartesian_warning_threshold: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            alternative_policy: AlternativePolicy::default(),
            cartesian_warning_threshold: CARTESIAN_WARNING_THRESHOLD,
        }
    }
}

impl EngineConfig {
    /// Override the alternative policy.
    #[must_use]
    pub fn with_alternative_policy(mut self, policy: AlternativePolicy) -> Self {
        self.alternative_policy = policy;
        self
    }

    /// Override the cartesian warning threshold.
    #[must_use]
    pub fn with_cartesian_warning_threshold(mut self, threshold: usize) -> Self {
        self.cartesian_warning_threshold = threshold;
        self
    }
}
