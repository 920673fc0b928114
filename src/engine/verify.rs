use async_trait::async_trait;
use indexmap::IndexMap;
use log::{info, warn};
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case", tag = "outcome", content = "detail")]
pub enum CheckOutcome {
    Pass,
    Fail(String),
    Inconclusive(String),
}

impl CheckOutcome {
    pub fn is_pass(&self) -> bool {
        matches!(self, Self::Pass)
    }

    pub fn detail(&self) -> Option<&str> {
        match self {
            Self::Pass => None,
            Self::Fail(detail) | Self::Inconclusive(detail) => Some(detail),
        }
    }
}

impl fmt::Display for CheckOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pass => f.write_str("pass"),
            Self::Fail(_) => f.write_str("fail"),
            Self::Inconclusive(_) => f.write_str("inconclusive"),
        }
    }
}

/// A named postcondition, evaluated independently of any other check.
#[async_trait]
pub trait Assertion: Send + Sync {
    async fn evaluate(&self) -> CheckOutcome;
}

pub struct Check {
    pub name: String,
    /// A gating check that does not pass fails its step. Other checks only
    /// produce warnings.
    pub gating: bool,
    pub assertion: Box<dyn Assertion>,
}

impl Check {
    pub fn new(name: impl Into<String>, assertion: Box<dyn Assertion>) -> Self {
        Self {
            name: name.into(),
            gating: false,
            assertion,
        }
    }

    #[must_use]
    pub fn gating(mut self, gating: bool) -> Self {
        self.gating = gating;
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckEntry {
    pub outcome: CheckOutcome,
    pub gating: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct VerificationReport {
    pub checks: IndexMap<String, CheckEntry>,
}

impl VerificationReport {
    pub fn all_passed(&self) -> bool {
        self.checks.values().all(|entry| entry.outcome.is_pass())
    }

    /// Names of gating checks that did not pass.
    pub fn gating_failures(&self) -> Vec<&str> {
        self.checks
            .iter()
            .filter(|(_, entry)| entry.gating && !entry.outcome.is_pass())
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// One line per non-passing check, in evaluation order.
    pub fn diagnostics(&self) -> Vec<String> {
        self.checks
            .iter()
            .filter_map(|(name, entry)| {
                entry
                    .outcome
                    .detail()
                    .map(|detail| format!("check {name}: {} ({detail})", entry.outcome))
            })
            .collect()
    }
}

/// Evaluate every check in order. A failing check never stops the others.
pub async fn verify(checks: &[Check]) -> VerificationReport {
    let mut report = VerificationReport::default();
    for check in checks {
        let outcome = check.assertion.evaluate().await;
        match &outcome {
            CheckOutcome::Pass => info!("Check passed: {}", check.name),
            CheckOutcome::Fail(detail) | CheckOutcome::Inconclusive(detail) => {
                warn!("Check {} {outcome}: {detail}", check.name);
            }
        }
        report.checks.insert(
            check.name.clone(),
            CheckEntry {
                outcome,
                gating: check.gating,
            },
        );
    }
    report
}
