use async_trait::async_trait;
use serde::Serialize;
use std::fmt;

use super::descriptor::ResourceDescriptor;

/// Observed state of a resource relative to its desired spec.
///
/// `Unknown` means the platform could not be read. It is never folded into
/// `Absent`: creating a resource that exists but could not be read is exactly
/// the mistake the state check is there to prevent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case", tag = "state", content = "reason")]
pub enum ProbeState {
    Absent,
    PresentMatching,
    PresentDivergent,
    Unknown(String),
}

impl fmt::Display for ProbeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Absent => f.write_str("absent"),
            Self::PresentMatching => f.write_str("present (matching)"),
            Self::PresentDivergent => f.write_str("present (divergent)"),
            Self::Unknown(reason) => write!(f, "unknown ({reason})"),
        }
    }
}

/// Read-only state detection against an external platform.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, descriptor: &ResourceDescriptor) -> ProbeState;
}
