use async_trait::async_trait;
use log::{debug, info};
use std::fmt;

use super::descriptor::ResourceDescriptor;
use super::probe::ProbeState;
use crate::error::Result;

/// Mutating half of a platform client.
///
/// Each call must issue at most one write against the platform. Retrying a
/// create is not safe, so implementations never retry internally.
#[async_trait]
pub trait Applier: Send + Sync {
    async fn create(&self, descriptor: &ResourceDescriptor) -> Result<()>;

    /// Update an existing resource with merge semantics, leaving fields the
    /// desired spec does not mention untouched.
    async fn patch(&self, descriptor: &ResourceDescriptor) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Created,
    Patched,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => f.write_str("created"),
            Self::Patched => f.write_str("patched"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConvergeOutcome {
    Applied(Action),
    Skipped,
    HardFailure(String),
}

/// Bring one resource in line with its desired spec, given a fresh probe.
pub async fn converge(
    applier: &dyn Applier,
    descriptor: &ResourceDescriptor,
    state: &ProbeState,
) -> ConvergeOutcome {
    match state {
        ProbeState::PresentMatching => {
            debug!("{descriptor} already matches desired state");
            ConvergeOutcome::Skipped
        }
        ProbeState::Absent => match applier.create(descriptor).await {
            Ok(()) => {
                info!("Created {descriptor}");
                ConvergeOutcome::Applied(Action::Created)
            }
            Err(e) => ConvergeOutcome::HardFailure(format!("create {descriptor} failed: {e}")),
        },
        ProbeState::PresentDivergent => match applier.patch(descriptor).await {
            Ok(()) => {
                info!("Patched {descriptor}");
                ConvergeOutcome::Applied(Action::Patched)
            }
            Err(e) => ConvergeOutcome::HardFailure(format!("patch {descriptor} failed: {e}")),
        },
        ProbeState::Unknown(reason) => ConvergeOutcome::HardFailure(format!(
            "state of {descriptor} could not be determined ({reason}); refusing to apply"
        )),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::engine::descriptor::{DesiredSpec, ResourceKind};
    use crate::engine::probe::Prober;
    use crate::error::ProvisionError;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// In-memory platform that counts writes.
    #[derive(Default)]
    pub(crate) struct FakePlatform {
        pub live: Mutex<Option<Value>>,
        pub unreachable: Mutex<bool>,
        pub reject_writes: bool,
        pub creates: AtomicUsize,
        pub patches: AtomicUsize,
    }

    impl FakePlatform {
        pub fn with_live(value: Value) -> Self {
            Self {
                live: Mutex::new(Some(value)),
                ..Self::default()
            }
        }

        pub fn creates(&self) -> usize {
            self.creates.load(Ordering::SeqCst)
        }

        pub fn patches(&self) -> usize {
            self.patches.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Prober for FakePlatform {
        async fn probe(&self, descriptor: &ResourceDescriptor) -> ProbeState {
            if *self.unreachable.lock().unwrap() {
                return ProbeState::Unknown("connection refused".into());
            }
            match &*self.live.lock().unwrap() {
                None => ProbeState::Absent,
                Some(live) if descriptor.desired.matches(live) => ProbeState::PresentMatching,
                Some(_) => ProbeState::PresentDivergent,
            }
        }
    }

    #[async_trait]
    impl Applier for FakePlatform {
        async fn create(&self, descriptor: &ResourceDescriptor) -> Result<()> {
            self.creates.fetch_add(1, Ordering::SeqCst);
            if self.reject_writes {
                return Err(ProvisionError::ApiError {
                    status: 409,
                    message: "already exists".into(),
                });
            }
            *self.live.lock().unwrap() = Some(descriptor.desired.value().clone());
            Ok(())
        }

        async fn patch(&self, descriptor: &ResourceDescriptor) -> Result<()> {
            self.patches.fetch_add(1, Ordering::SeqCst);
            if self.reject_writes {
                return Err(ProvisionError::ApiError {
                    status: 403,
                    message: "forbidden".into(),
                });
            }
            *self.live.lock().unwrap() = Some(descriptor.desired.value().clone());
            Ok(())
        }
    }

    pub(crate) fn descriptor(desired: Value) -> ResourceDescriptor {
        ResourceDescriptor::new(
            ResourceKind::K8sObject {
                api_version: "v1".into(),
                kind: "ConfigMap".into(),
            },
            Some("stackrox".into()),
            "central-config",
            DesiredSpec::new(desired),
        )
    }

    #[tokio::test]
    async fn test_converging_twice_applies_once() {
        let platform = FakePlatform::default();
        let d = descriptor(json!({"data": {"a": "1"}}));

        let first = converge(&platform, &d, &platform.probe(&d).await).await;
        let second = converge(&platform, &d, &platform.probe(&d).await).await;

        assert_eq!(first, ConvergeOutcome::Applied(Action::Created));
        assert_eq!(second, ConvergeOutcome::Skipped);
        assert_eq!(platform.creates(), 1);
        assert_eq!(platform.patches(), 0);
    }

    #[tokio::test]
    async fn test_matching_resource_is_not_touched() {
        let platform = FakePlatform::with_live(json!({"data": {"a": "1"}}));
        let d = descriptor(json!({"data": {"a": "1"}}));

        let outcome = converge(&platform, &d, &platform.probe(&d).await).await;

        assert_eq!(outcome, ConvergeOutcome::Skipped);
        assert_eq!(platform.creates(), 0);
        assert_eq!(platform.patches(), 0);
    }

    #[tokio::test]
    async fn test_divergent_resource_is_patched() {
        let platform = FakePlatform::with_live(json!({"data": {"a": "old"}}));
        let d = descriptor(json!({"data": {"a": "new"}}));

        let state = platform.probe(&d).await;
        assert_eq!(state, ProbeState::PresentDivergent);
        let outcome = converge(&platform, &d, &state).await;

        assert_eq!(outcome, ConvergeOutcome::Applied(Action::Patched));
        assert_eq!(platform.patches(), 1);
        assert_eq!(platform.creates(), 0);
    }

    #[tokio::test]
    async fn test_unknown_state_never_creates() {
        let platform = FakePlatform::default();
        *platform.unreachable.lock().unwrap() = true;
        let d = descriptor(json!({"data": {"a": "1"}}));

        let state = platform.probe(&d).await;
        assert!(matches!(state, ProbeState::Unknown(_)));
        let outcome = converge(&platform, &d, &state).await;

        assert!(matches!(outcome, ConvergeOutcome::HardFailure(msg) if msg.contains("refusing")));
        assert_eq!(platform.creates(), 0);
        assert_eq!(platform.patches(), 0);
    }

    #[tokio::test]
    async fn test_write_error_is_captured_verbatim() {
        let platform = FakePlatform {
            reject_writes: true,
            ..FakePlatform::default()
        };
        let d = descriptor(json!({}));

        let outcome = converge(&platform, &d, &ProbeState::Absent).await;

        match outcome {
            ConvergeOutcome::HardFailure(msg) => assert!(msg.contains("already exists")),
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(platform.creates(), 1);
    }
}
