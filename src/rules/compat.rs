//! Compatibility rule evaluator
//!
//! Compares proposed content against existing versions. The config string
//! carries both the direction (`BACKWARD`, `FORWARD`, `FULL`, `NONE`) and
//! the history subset policy: a `_TRANSITIVE` suffix compares against every
//! existing version instead of only the latest.
//!
//! The comparison body itself sits behind `CompatibilityChecker` so callers
//! can plug in format-aware checkers; the built-in `JsonStructureChecker`
//! does a structural field-presence comparison.

use std::str::FromStr;

use serde_json::Value;

use crate::rules::{ProposedVersion, RuleEvaluator, RuleViolation};
use crate::store::types::{RuleType, VersionRecord};

/// Direction of a compatibility check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// New content must be readable by consumers of the old
    Backward,
    /// Old content must be readable by consumers of the new
    Forward,
}

/// Compatibility level parsed from rule config
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompatibilityLevel {
    /// Accept everything
    None,
    Backward,
    BackwardTransitive,
    Forward,
    ForwardTransitive,
    /// Both directions
    Full,
    FullTransitive,
}

impl CompatibilityLevel {
    /// Directions this level checks
    fn directions(&self) -> &'static [Direction] {
        match self {
            CompatibilityLevel::None => &[],
            CompatibilityLevel::Backward | CompatibilityLevel::BackwardTransitive => {
                &[Direction::Backward]
            }
            CompatibilityLevel::Forward | CompatibilityLevel::ForwardTransitive => {
                &[Direction::Forward]
            }
            CompatibilityLevel::Full | CompatibilityLevel::FullTransitive => {
                &[Direction::Backward, Direction::Forward]
            }
        }
    }

    /// Whether the whole history is compared, not just the latest version
    fn transitive(&self) -> bool {
        matches!(
            self,
            CompatibilityLevel::BackwardTransitive
                | CompatibilityLevel::ForwardTransitive
                | CompatibilityLevel::FullTransitive
        )
    }
}

impl FromStr for CompatibilityLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "NONE" => Ok(CompatibilityLevel::None),
            "BACKWARD" => Ok(CompatibilityLevel::Backward),
            "BACKWARD_TRANSITIVE" => Ok(CompatibilityLevel::BackwardTransitive),
            "FORWARD" => Ok(CompatibilityLevel::Forward),
            "FORWARD_TRANSITIVE" => Ok(CompatibilityLevel::ForwardTransitive),
            "FULL" => Ok(CompatibilityLevel::Full),
            "FULL_TRANSITIVE" => Ok(CompatibilityLevel::FullTransitive),
            other => Err(format!("unknown compatibility level: {}", other)),
        }
    }
}

/// Pluggable content comparison
pub trait CompatibilityChecker: Send + Sync {
    /// Check one (existing, proposed) pair in `direction`
    ///
    /// Returns a reason on incompatibility.
    fn check(
        &self,
        existing: &VersionRecord,
        proposed: &ProposedVersion<'_>,
        direction: Direction,
    ) -> Result<(), String>;
}

/// Built-in compatibility evaluator
pub struct CompatibilityEvaluator {
    checker: Box<dyn CompatibilityChecker>,
}

impl CompatibilityEvaluator {
    /// Evaluator using `checker` for the content comparison
    pub fn new(checker: Box<dyn CompatibilityChecker>) -> Self {
        Self { checker }
    }
}

impl RuleEvaluator for CompatibilityEvaluator {
    fn evaluate(
        &self,
        config: &str,
        proposed: &ProposedVersion<'_>,
        history: &[VersionRecord],
    ) -> Result<(), RuleViolation> {
        let level = CompatibilityLevel::from_str(config)
            .map_err(|reason| RuleViolation::new(RuleType::Compatibility, reason))?;

        let subset: &[VersionRecord] = if level.transitive() {
            history
        } else {
            match history.last() {
                Some(latest) => std::slice::from_ref(latest),
                None => &[],
            }
        };

        for existing in subset {
            for direction in level.directions() {
                self.checker
                    .check(existing, proposed, *direction)
                    .map_err(|reason| {
                        RuleViolation::new(
                            RuleType::Compatibility,
                            format!("against version {}: {}", existing.version, reason),
                        )
                    })?;
            }
        }

        Ok(())
    }
}

/// Structural JSON field-presence checker
///
/// Backward: the proposed document must keep every top-level field of the
/// existing one. Forward: the inverse. Non-JSON-syntax content is accepted
/// unchecked; unparseable JSON-syntax content is incompatible.
pub struct JsonStructureChecker;

impl CompatibilityChecker for JsonStructureChecker {
    fn check(
        &self,
        existing: &VersionRecord,
        proposed: &ProposedVersion<'_>,
        direction: Direction,
    ) -> Result<(), String> {
        if !proposed.artifact_type.is_json_syntax() {
            return Ok(());
        }

        let old: Value = serde_json::from_slice(&existing.content)
            .map_err(|e| format!("existing content is not valid JSON: {}", e))?;
        let new: Value = serde_json::from_slice(proposed.content)
            .map_err(|e| format!("proposed content is not valid JSON: {}", e))?;

        let (required_in, provider, missing_from) = match direction {
            Direction::Backward => (&old, &new, "proposed"),
            Direction::Forward => (&new, &old, "existing"),
        };

        let (Some(required), Some(present)) = (required_in.as_object(), provider.as_object())
        else {
            // Field comparison only makes sense for objects
            return Ok(());
        };

        for field in required.keys() {
            if !present.contains_key(field) {
                return Err(format!("field \"{}\" missing from {} content", field, missing_from));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::identity::GlobalId;
    use crate::store::types::{ArtifactType, EditableMetadata};

    fn record(version: u64, content: &'static [u8]) -> VersionRecord {
        VersionRecord {
            version,
            global_id: GlobalId::new(version),
            artifact_type: ArtifactType::Json,
            content: Bytes::from_static(content),
            metadata: EditableMetadata::default(),
            created_on: version,
        }
    }

    fn eval(config: &str, history: &[VersionRecord], content: &'static [u8]) -> Result<(), RuleViolation> {
        let content = Bytes::from_static(content);
        CompatibilityEvaluator::new(Box::new(JsonStructureChecker)).evaluate(
            config,
            &ProposedVersion {
                artifact_type: ArtifactType::Json,
                content: &content,
            },
            history,
        )
    }

    #[test]
    fn test_backward_keeps_fields() {
        let history = [record(1, b"{\"a\":1,\"b\":2}")];
        assert!(eval("BACKWARD", &history, b"{\"a\":0,\"b\":0,\"c\":0}").is_ok());
        let err = eval("BACKWARD", &history, b"{\"a\":0}").unwrap_err();
        assert!(err.reason.contains("\"b\""));
    }

    #[test]
    fn test_forward_is_inverse() {
        let history = [record(1, b"{\"a\":1}")];
        assert!(eval("FORWARD", &history, b"{\"a\":0}").is_ok());
        // Proposed adds a field the existing content lacks
        assert!(eval("FORWARD", &history, b"{\"a\":0,\"b\":0}").is_err());
        assert!(eval("BACKWARD", &history, b"{\"a\":0,\"b\":0}").is_ok());
    }

    #[test]
    fn test_transitive_checks_whole_history() {
        let history = [record(1, b"{\"a\":1}"), record(2, b"{\"b\":2}")];
        // Non-transitive only compares against version 2
        assert!(eval("BACKWARD", &history, b"{\"b\":0}").is_ok());
        let err = eval("BACKWARD_TRANSITIVE", &history, b"{\"b\":0}").unwrap_err();
        assert!(err.reason.contains("version 1"));
    }

    #[test]
    fn test_full_checks_both_directions() {
        let history = [record(1, b"{\"a\":1}")];
        assert!(eval("FULL", &history, b"{\"a\":0}").is_ok());
        assert!(eval("FULL", &history, b"{\"a\":0,\"b\":0}").is_err());
        assert!(eval("FULL", &history, b"{}").is_err());
    }

    #[test]
    fn test_none_and_empty_history() {
        let history = [record(1, b"{\"a\":1}")];
        assert!(eval("NONE", &history, b"garbage-is-never-compared").is_ok());
        assert!(eval("BACKWARD", &[], b"{\"x\":1}").is_ok());
    }

    #[test]
    fn test_unknown_level_rejects() {
        let err = eval("SIDEWAYS", &[], b"{}").unwrap_err();
        assert!(err.reason.contains("unknown compatibility level"));
    }
}
