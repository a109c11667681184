//! Rule engine
//!
//! Gates acceptance of proposed artifact versions. Rules are `(scope, type,
//! config)` triples stored by the local store; this module owns the
//! evaluators that interpret the config strings and the dispatch that runs
//! them. An artifact-scoped rule of a given type shadows the global rule of
//! that type; with neither present the proposal is accepted unconditionally.
//!
//! A rejection is an expected outcome, not a fault: the log entry that
//! carried the proposal stays recorded, the store simply does not advance.

pub mod compat;
pub mod validity;

use std::collections::BTreeMap;

use bytes::Bytes;
use thiserror::Error;

use crate::store::types::{ArtifactType, RuleType, VersionRecord};
pub use compat::{CompatibilityChecker, CompatibilityEvaluator, JsonStructureChecker};
pub use validity::ValidityEvaluator;

/// A proposed version under evaluation
#[derive(Debug, Clone, Copy)]
pub struct ProposedVersion<'a> {
    /// Content type tag
    pub artifact_type: ArtifactType,
    /// Proposed content
    pub content: &'a Bytes,
}

/// Rejection of a proposed version by a rule
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{rule_type} rule rejected the version: {reason}")]
pub struct RuleViolation {
    /// Rule that rejected
    pub rule_type: RuleType,
    /// Human-readable reason
    pub reason: String,
}

impl RuleViolation {
    /// Build a violation for `rule_type`
    pub fn new(rule_type: RuleType, reason: impl Into<String>) -> Self {
        Self {
            rule_type,
            reason: reason.into(),
        }
    }
}

/// Evaluates one rule type against a proposed version
pub trait RuleEvaluator: Send + Sync {
    /// Accept or reject `proposed` under `config`
    ///
    /// `history` holds the artifact's existing versions in creation order
    /// (empty for a first version).
    fn evaluate(
        &self,
        config: &str,
        proposed: &ProposedVersion<'_>,
        history: &[VersionRecord],
    ) -> Result<(), RuleViolation>;
}

/// Dispatches configured rules to their evaluators
pub struct RuleEngine {
    evaluators: BTreeMap<RuleType, Box<dyn RuleEvaluator>>,
}

impl RuleEngine {
    /// Engine with no evaluators registered
    pub fn empty() -> Self {
        Self {
            evaluators: BTreeMap::new(),
        }
    }

    /// Engine with the built-in validity and compatibility evaluators
    pub fn with_defaults() -> Self {
        let mut engine = Self::empty();
        engine.register(RuleType::Validity, Box::new(ValidityEvaluator));
        engine.register(
            RuleType::Compatibility,
            Box::new(CompatibilityEvaluator::new(Box::new(JsonStructureChecker))),
        );
        engine
    }

    /// Register (or replace) the evaluator for a rule type
    pub fn register(&mut self, rule_type: RuleType, evaluator: Box<dyn RuleEvaluator>) {
        self.evaluators.insert(rule_type, evaluator);
    }

    /// Evaluate a proposed version against the effective rules
    ///
    /// `artifact_rules` shadow `global_rules` per rule type. Rule types are
    /// checked in their natural order; the first rejection wins.
    pub fn evaluate(
        &self,
        artifact_rules: &BTreeMap<RuleType, String>,
        global_rules: &BTreeMap<RuleType, String>,
        proposed: &ProposedVersion<'_>,
        history: &[VersionRecord],
    ) -> Result<(), RuleViolation> {
        let mut configured: BTreeMap<RuleType, &String> =
            global_rules.iter().map(|(t, c)| (*t, c)).collect();
        for (rule_type, config) in artifact_rules {
            configured.insert(*rule_type, config);
        }

        for (rule_type, config) in configured {
            let evaluator = self.evaluators.get(&rule_type).ok_or_else(|| {
                RuleViolation::new(rule_type, "no evaluator registered for this rule type")
            })?;
            evaluator.evaluate(config, proposed, history)?;
        }

        Ok(())
    }
}
