//! Validity rule evaluator
//!
//! Inspects proposed content in isolation. The config string selects a
//! level: `NONE` accepts everything, `SYNTAX_ONLY` requires the content to
//! parse under its declared type, `FULL` additionally requires JSON-syntax
//! content to be a document object.

use std::str::FromStr;

use serde_json::Value;

use crate::rules::{ProposedVersion, RuleEvaluator, RuleViolation};
use crate::store::types::{RuleType, VersionRecord};

/// Validity strictness level parsed from rule config
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidityLevel {
    /// Accept everything
    None,
    /// Content must parse under its declared type
    SyntaxOnly,
    /// Syntax plus structural checks
    Full,
}

impl FromStr for ValidityLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "NONE" => Ok(ValidityLevel::None),
            "SYNTAX_ONLY" => Ok(ValidityLevel::SyntaxOnly),
            "FULL" => Ok(ValidityLevel::Full),
            other => Err(format!("unknown validity level: {}", other)),
        }
    }
}

/// Built-in validity evaluator
pub struct ValidityEvaluator;

impl RuleEvaluator for ValidityEvaluator {
    fn evaluate(
        &self,
        config: &str,
        proposed: &ProposedVersion<'_>,
        _history: &[VersionRecord],
    ) -> Result<(), RuleViolation> {
        let level = ValidityLevel::from_str(config)
            .map_err(|reason| RuleViolation::new(RuleType::Validity, reason))?;

        if level == ValidityLevel::None {
            return Ok(());
        }

        if proposed.content.is_empty() {
            return Err(RuleViolation::new(RuleType::Validity, "content is empty"));
        }

        if proposed.artifact_type.is_json_syntax() {
            let value: Value = serde_json::from_slice(proposed.content).map_err(|e| {
                RuleViolation::new(RuleType::Validity, format!("content is not valid JSON: {}", e))
            })?;
            if level == ValidityLevel::Full && !value.is_object() {
                return Err(RuleViolation::new(
                    RuleType::Validity,
                    "content must be a JSON object",
                ));
            }
        } else if std::str::from_utf8(proposed.content).is_err() {
            return Err(RuleViolation::new(
                RuleType::Validity,
                "content is not valid UTF-8",
            ));
        }

        Ok(())
    }
}
