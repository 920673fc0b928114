use async_trait::async_trait;
use log::debug;
use std::sync::Arc;

use super::{ClusterClient, ObjectRef};
use crate::credentials::CredentialLookup;
use crate::engine::{
    Applier, Assertion, CheckOutcome, ProbeState, Prober, Readiness, ReadinessCheck,
    ResourceDescriptor, ResourceKind,
};
use crate::error::{ProvisionError, Result};
use crate::platforms::central::central_address;
use crate::platforms::json::{self, FieldMatch};

fn object_ref(descriptor: &ResourceDescriptor) -> Result<ObjectRef> {
    match &descriptor.kind {
        ResourceKind::K8sObject { api_version, kind } => Ok(ObjectRef {
            api_version: api_version.clone(),
            kind: kind.clone(),
            namespace: descriptor.namespace.clone(),
            name: descriptor.name.clone(),
        }),
        other => Err(ProvisionError::Config(format!(
            "{other} is not a cluster object"
        ))),
    }
}

#[async_trait]
impl Prober for ClusterClient {
    async fn probe(&self, descriptor: &ResourceDescriptor) -> ProbeState {
        let object = match object_ref(descriptor) {
            Ok(object) => object,
            Err(e) => return ProbeState::Unknown(e.to_string()),
        };
        match self.get(&object).await {
            Ok(None) => ProbeState::Absent,
            Ok(Some(live)) if descriptor.desired.matches(&live) => ProbeState::PresentMatching,
            Ok(Some(_)) => ProbeState::PresentDivergent,
            Err(e) => ProbeState::Unknown(e.to_string()),
        }
    }
}

#[async_trait]
impl Applier for ClusterClient {
    async fn create(&self, descriptor: &ResourceDescriptor) -> Result<()> {
        let object = object_ref(descriptor)?;
        self.create_object(&object, descriptor.desired.value()).await
    }

    async fn patch(&self, descriptor: &ResourceDescriptor) -> Result<()> {
        let object = object_ref(descriptor)?;
        self.patch_merge(&object, descriptor.desired.value()).await
    }
}

/// Ready when a field of the live object takes one of the `ready` values;
/// failed for good when it takes one of the `failed` values or any
/// `failed_when` condition holds (e.g. a `ReleaseFailed` condition is `True`).
pub struct FieldReadiness {
    pub client: Arc<ClusterClient>,
    pub field: String,
    pub ready: Vec<String>,
    pub failed: Vec<String>,
    pub failed_when: Vec<FieldMatch>,
}

#[async_trait]
impl ReadinessCheck for FieldReadiness {
    async fn readiness(&self, descriptor: &ResourceDescriptor) -> Readiness {
        let object = match object_ref(descriptor) {
            Ok(object) => object,
            Err(e) => return Readiness::Failed(e.to_string()),
        };
        let live = match self.client.get(&object).await {
            Ok(Some(live)) => live,
            Ok(None) => return Readiness::Pending(format!("{descriptor} not found yet")),
            Err(e) => return Readiness::Pending(e.to_string()),
        };
        if let Some(condition) = self.failed_when.iter().find(|c| c.matches(&live)) {
            return Readiness::Failed(format!("{} matched a failure condition", condition.field));
        }
        let Some(value) = json::extract(&live, &self.field).map(json::render) else {
            return Readiness::Pending(format!("{} not set yet", self.field));
        };
        if self.failed.contains(&value) {
            Readiness::Failed(format!("{} is {value}", self.field))
        } else if self.ready.contains(&value) {
            Readiness::Ready
        } else {
            Readiness::Pending(format!("{} is {value}", self.field))
        }
    }
}

/// Passes when the object does not exist.
pub struct ObjectAbsent {
    pub client: Arc<ClusterClient>,
    pub object: ObjectRef,
}

#[async_trait]
impl Assertion for ObjectAbsent {
    async fn evaluate(&self) -> CheckOutcome {
        match self.client.get(&self.object).await {
            Ok(None) => CheckOutcome::Pass,
            Ok(Some(_)) => CheckOutcome::Fail(format!(
                "{} {} still exists",
                self.object.resource_arg(),
                self.object.name
            )),
            Err(e) => CheckOutcome::Inconclusive(e.to_string()),
        }
    }
}

/// Passes when a field of the object renders to the expected string.
pub struct ObjectField {
    pub client: Arc<ClusterClient>,
    pub object: ObjectRef,
    pub field: String,
    pub equals: String,
}

#[async_trait]
impl Assertion for ObjectField {
    async fn evaluate(&self) -> CheckOutcome {
        match self.client.get(&self.object).await {
            Ok(None) => CheckOutcome::Fail(format!(
                "{} {} not found",
                self.object.resource_arg(),
                self.object.name
            )),
            Ok(Some(live)) => match json::extract(&live, &self.field).map(json::render) {
                Some(actual) if actual == self.equals => CheckOutcome::Pass,
                Some(actual) => CheckOutcome::Fail(format!(
                    "{} is {actual}, expected {}",
                    self.field, self.equals
                )),
                None => CheckOutcome::Fail(format!("{} is not set", self.field)),
            },
            Err(e) => CheckOutcome::Inconclusive(e.to_string()),
        }
    }
}

/// Passes when at least `min` objects of a kind satisfy every condition,
/// e.g. a `frontend-` pod that is `Running`.
pub struct ObjectsMatching {
    pub client: Arc<ClusterClient>,
    pub api_version: String,
    pub kind: String,
    pub namespace: Option<String>,
    pub conditions: Vec<FieldMatch>,
    pub min: usize,
}

#[async_trait]
impl Assertion for ObjectsMatching {
    async fn evaluate(&self) -> CheckOutcome {
        let items = match self
            .client
            .list(&self.api_version, &self.kind, self.namespace.as_deref())
            .await
        {
            Ok(items) => items,
            Err(e) => return CheckOutcome::Inconclusive(e.to_string()),
        };
        let matching = items
            .iter()
            .filter(|item| self.conditions.iter().all(|c| c.matches(item)))
            .count();
        if matching >= self.min {
            CheckOutcome::Pass
        } else {
            CheckOutcome::Fail(format!(
                "{matching} of {} {} match, expected at least {}",
                items.len(),
                self.kind,
                self.min
            ))
        }
    }
}

/// Derives the Central URL, and its scheme-less address as `roxctl` expects
/// it, from the Central route.
pub struct CentralRouteLookup {
    pub client: Arc<ClusterClient>,
    pub url_key: String,
    pub address_key: String,
    pub namespace: String,
    pub route: String,
}

#[async_trait]
impl CredentialLookup for CentralRouteLookup {
    async fn lookup(&self, key: &str) -> Option<String> {
        let with_scheme = if key == self.url_key {
            true
        } else if key == self.address_key {
            false
        } else {
            return None;
        };
        match self.client.route_host(&self.namespace, &self.route).await {
            Ok(host) if with_scheme => host.map(|h| format!("https://{h}")),
            Ok(host) => host.map(|h| central_address(&h)),
            Err(e) => {
                debug!("Route lookup for {key} failed: {e}");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::converge::converge;
    use crate::engine::{ConvergeOutcome, DesiredSpec};
    use crate::platforms::cluster::tests::{err, ok, servicemonitor, ScriptedRunner};
    use serde_json::json;

    const NOT_FOUND: &str =
        r#"Error from server (NotFound): servicemonitors.monitoring.coreos.com "central-monitor" not found"#;

    fn descriptor(desired: serde_json::Value) -> ResourceDescriptor {
        ResourceDescriptor::new(
            ResourceKind::K8sObject {
                api_version: "monitoring.coreos.com/v1".into(),
                kind: "ServiceMonitor".into(),
            },
            Some("stackrox".into()),
            "central-monitor",
            DesiredSpec::new(desired),
        )
    }

    #[tokio::test]
    async fn test_probe_states() {
        let runner = ScriptedRunner::new(vec![
            Ok(err(NOT_FOUND)),
            Ok(ok(r#"{"spec":{"interval":"30s"}}"#)),
            Ok(ok(r#"{"spec":{"interval":"60s"}}"#)),
            Ok(err("Unable to connect to the server: dial tcp: i/o timeout")),
        ]);
        let client = ClusterClient::new(runner, "oc");
        let d = descriptor(json!({"spec": {"interval": "30s"}}));

        assert_eq!(client.probe(&d).await, ProbeState::Absent);
        assert_eq!(client.probe(&d).await, ProbeState::PresentMatching);
        assert_eq!(client.probe(&d).await, ProbeState::PresentDivergent);
        assert!(matches!(client.probe(&d).await, ProbeState::Unknown(r) if r.contains("i/o timeout")));
    }

    #[tokio::test]
    async fn test_client_errors_leave_state_unknown() {
        let runner = ScriptedRunner::new(vec![
            Ok(err("error: context was not found for specified context: prod")),
            Ok(err(r#"error: cluster "lab" not found"#)),
            Ok(err("Error from server (NotFound): the server could not find the requested resource")),
        ]);
        let client = ClusterClient::new(runner.clone(), "oc");
        let d = descriptor(json!({"spec": {}}));

        for _ in 0..3 {
            let state = client.probe(&d).await;
            assert!(matches!(state, ProbeState::Unknown(_)), "{state}");
            assert!(matches!(converge(&client, &d, &state).await, ConvergeOutcome::HardFailure(_)));
        }
        assert_eq!(runner.verbs(), ["get", "get", "get"]);
    }

    #[tokio::test]
    async fn test_object_absent_inconclusive_on_client_errors() {
        let runner = ScriptedRunner::new(vec![
            Ok(err("error: context was not found for specified context: prod")),
            Ok(err("error: stat /root/.kube/lab: no such file or directory")),
            Ok(err("Error from server (NotFound): the server could not find the requested resource")),
        ]);
        let check = ObjectAbsent {
            client: Arc::new(ClusterClient::new(runner, "oc")),
            object: servicemonitor(),
        };

        for _ in 0..3 {
            assert!(matches!(check.evaluate().await, CheckOutcome::Inconclusive(_)));
        }
    }

    #[tokio::test]
    async fn test_unreachable_cluster_never_creates() {
        let runner = ScriptedRunner::new(vec![Ok(err(
            "error: You must be logged in to the server (Unauthorized)",
        ))]);
        let client = ClusterClient::new(runner.clone(), "oc");
        let d = descriptor(json!({"spec": {}}));

        let state = client.probe(&d).await;
        let outcome = converge(&client, &d, &state).await;

        assert!(matches!(outcome, ConvergeOutcome::HardFailure(_)));
        assert_eq!(runner.verbs(), ["get"]);
    }

    #[tokio::test]
    async fn test_divergent_object_gets_merge_patch() {
        let runner = ScriptedRunner::new(vec![
            Ok(ok(r#"{"spec":{"interval":"60s"}}"#)),
            Ok(ok("patched")),
        ]);
        let client = ClusterClient::new(runner.clone(), "oc");
        let d = descriptor(json!({"spec": {"interval": "30s"}}));

        let state = client.probe(&d).await;
        converge(&client, &d, &state).await;

        assert_eq!(runner.verbs(), ["get", "patch"]);
        let (args, _) = &runner.calls()[1];
        assert!(args.windows(2).any(|w| w == ["--type", "merge"]));
        assert!(args.contains(&r#"{"spec":{"interval":"30s"}}"#.to_string()));
    }

    #[tokio::test]
    async fn test_field_readiness() {
        let runner = ScriptedRunner::new(vec![
            Ok(err(NOT_FOUND)),
            Ok(ok(r#"{"status":{"phase":"Scheduling"}}"#)),
            Ok(ok(r#"{"status":{"phase":"Running"}}"#)),
            Ok(ok(r#"{"status":{"phase":"Failed"}}"#)),
        ]);
        let readiness = FieldReadiness {
            client: Arc::new(ClusterClient::new(runner, "oc")),
            field: ".status.phase".into(),
            ready: vec!["Running".into()],
            failed: vec!["Failed".into(), "ErrorUnschedulable".into()],
            failed_when: Vec::new(),
        };
        let d = descriptor(json!({}));

        assert!(matches!(readiness.readiness(&d).await, Readiness::Pending(m) if m.contains("not found")));
        assert_eq!(
            readiness.readiness(&d).await,
            Readiness::Pending(".status.phase is Scheduling".into())
        );
        assert_eq!(readiness.readiness(&d).await, Readiness::Ready);
        assert_eq!(
            readiness.readiness(&d).await,
            Readiness::Failed(".status.phase is Failed".into())
        );
    }

    #[tokio::test]
    async fn test_condition_readiness_by_type() {
        let conditions = |deployed: &str, failed: &str| {
            format!(
                r#"{{"status":{{"conditions":[{{"type":"Initialized","status":"True"}},{{"type":"Deployed","status":"{deployed}"}},{{"type":"ReleaseFailed","status":"{failed}"}}]}}}}"#
            )
        };
        let runner = ScriptedRunner::new(vec![
            Ok(ok(&conditions("Unknown", "False"))),
            Ok(ok(&conditions("True", "False"))),
            Ok(ok(&conditions("False", "True"))),
        ]);
        let readiness = FieldReadiness {
            client: Arc::new(ClusterClient::new(runner, "oc")),
            field: ".status.conditions[?type=Deployed].status".into(),
            ready: vec!["True".into()],
            failed: Vec::new(),
            failed_when: vec![FieldMatch {
                field: ".status.conditions[?type=ReleaseFailed].status".into(),
                equals: Some("True".into()),
                prefix: None,
            }],
        };
        let d = descriptor(json!({}));

        assert_eq!(
            readiness.readiness(&d).await,
            Readiness::Pending(".status.conditions[?type=Deployed].status is Unknown".into())
        );
        assert_eq!(readiness.readiness(&d).await, Readiness::Ready);
        assert!(matches!(readiness.readiness(&d).await, Readiness::Failed(m) if m.contains("ReleaseFailed")));
    }

    #[tokio::test]
    async fn test_object_absent_check() {
        let runner = ScriptedRunner::new(vec![
            Ok(err(NOT_FOUND)),
            Ok(ok("{}")),
            Ok(err("connection refused")),
        ]);
        let check = ObjectAbsent {
            client: Arc::new(ClusterClient::new(runner, "oc")),
            object: servicemonitor(),
        };

        assert_eq!(check.evaluate().await, CheckOutcome::Pass);
        assert!(matches!(check.evaluate().await, CheckOutcome::Fail(_)));
        assert!(matches!(check.evaluate().await, CheckOutcome::Inconclusive(_)));
    }

    #[tokio::test]
    async fn test_object_field_check() {
        let runner = ScriptedRunner::new(vec![
            Ok(ok(r#"{"data":{"enableUserWorkload":"true"}}"#)),
            Ok(ok(r#"{"data":{"enableUserWorkload":"false"}}"#)),
        ]);
        let check = ObjectField {
            client: Arc::new(ClusterClient::new(runner, "oc")),
            object: servicemonitor(),
            field: ".data.enableUserWorkload".into(),
            equals: "true".into(),
        };

        assert_eq!(check.evaluate().await, CheckOutcome::Pass);
        assert_eq!(
            check.evaluate().await,
            CheckOutcome::Fail(".data.enableUserWorkload is false, expected true".into())
        );
    }

    #[tokio::test]
    async fn test_objects_matching_check() {
        let pods = r#"{"items":[
            {"metadata":{"name":"frontend-6d4"},"status":{"phase":"Pending"}},
            {"metadata":{"name":"frontend-9f2"},"status":{"phase":"Running"}},
            {"metadata":{"name":"db-0"},"status":{"phase":"Running"}}
        ]}"#;
        let runner = ScriptedRunner::new(vec![
            Ok(ok(pods)),
            Ok(ok(pods)),
            Ok(err("Unable to connect to the server: dial tcp: i/o timeout")),
        ]);
        let cond = |field: &str, equals: Option<&str>, prefix: Option<&str>| FieldMatch {
            field: field.into(),
            equals: equals.map(String::from),
            prefix: prefix.map(String::from),
        };
        let mut check = ObjectsMatching {
            client: Arc::new(ClusterClient::new(runner, "oc")),
            api_version: "v1".into(),
            kind: "Pod".into(),
            namespace: Some("patient-portal".into()),
            conditions: vec![
                cond(".metadata.name", None, Some("frontend-")),
                cond(".status.phase", Some("Running"), None),
            ],
            min: 1,
        };

        assert_eq!(check.evaluate().await, CheckOutcome::Pass);
        check.min = 2;
        assert_eq!(
            check.evaluate().await,
            CheckOutcome::Fail("1 of 3 Pod match, expected at least 2".into())
        );
        assert!(matches!(check.evaluate().await, CheckOutcome::Inconclusive(_)));
    }

    fn route_lookup(runner: Arc<ScriptedRunner>) -> CentralRouteLookup {
        CentralRouteLookup {
            client: Arc::new(ClusterClient::new(runner, "oc")),
            url_key: "ROX_CENTRAL_URL".into(),
            address_key: "ROX_CENTRAL_ADDRESS".into(),
            namespace: "stackrox".into(),
            route: "central".into(),
        }
    }

    #[tokio::test]
    async fn test_route_lookup_only_answers_its_keys() {
        let runner = ScriptedRunner::new(vec![
            Ok(ok(r#"{"spec":{"host":"central.apps"}}"#)),
            Ok(ok(r#"{"spec":{"host":"central.apps"}}"#)),
        ]);
        let lookup = route_lookup(runner.clone());

        assert_eq!(lookup.lookup("ROX_API_TOKEN").await, None);
        assert_eq!(
            lookup.lookup("ROX_CENTRAL_URL").await.as_deref(),
            Some("https://central.apps")
        );
        assert_eq!(
            lookup.lookup("ROX_CENTRAL_ADDRESS").await.as_deref(),
            Some("central.apps")
        );
        assert_eq!(runner.calls().len(), 2);
    }
}
