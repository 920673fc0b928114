//! Declarative pipeline definitions.
//!
//! A manifest lists the credentials a pipeline needs and its steps in order.
//! It is plain data until [`Manifest::build`] wires every step to the cluster
//! and Central clients.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use crate::credentials::CredentialRequest;
use crate::engine::{
    Applier, Assertion, Check, CheckOutcome, DesiredSpec, Pipeline, PollPolicy, ProbeState,
    Prober, ReadinessCheck, ResourceDescriptor, ResourceKind, RestLookup, Step, Target, Wait,
};
use crate::error::{ProvisionError, Result};
use crate::platforms::central::{CentralClient, EndpointStatus, EntitiesMatching, EntityExists};
use crate::platforms::cluster::{
    ClusterClient, FieldReadiness, ObjectAbsent, ObjectField, ObjectRef, ObjectsMatching,
};
use crate::platforms::json::FieldMatch;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Manifest {
    pub name: String,
    #[serde(default)]
    pub credentials: Vec<CredentialRequest>,
    pub steps: Vec<StepSpec>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct StepSpec {
    pub name: String,
    #[serde(default)]
    pub best_effort: bool,
    #[serde(default)]
    pub requires: Vec<String>,
    #[serde(default)]
    pub resource: Option<ResourceSpec>,
    #[serde(default)]
    pub wait: Option<WaitSpec>,
    #[serde(default)]
    pub verify: Vec<CheckSpec>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", rename_all_fields = "kebab-case", tag = "type")]
pub enum ResourceSpec {
    /// A complete object manifest; identity comes from its `apiVersion`,
    /// `kind` and `metadata`.
    Kubernetes { manifest: Value },
    Rest {
        collection: String,
        #[serde(default = "by_path")]
        lookup: RestLookup,
        name: String,
        #[serde(default)]
        body: Value,
    },
}

fn by_path() -> RestLookup {
    RestLookup::ByPath
}

/// Omitted interval and budget fall back to the `[polling]` configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct WaitSpec {
    /// Field path such as `.status.phase`. Without one the step waits until
    /// the resource probes as matching.
    pub field: Option<String>,
    #[serde(default)]
    pub ready: Vec<String>,
    #[serde(default)]
    pub failed: Vec<String>,
    /// Conditions on other fields that also mean the resource failed.
    #[serde(default)]
    pub failed_when: Vec<FieldMatch>,
    pub interval_secs: Option<u64>,
    pub max_wait_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CheckSpec {
    pub name: String,
    #[serde(default)]
    pub gating: bool,
    #[serde(flatten)]
    pub check: CheckKind,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", rename_all_fields = "kebab-case", tag = "type")]
pub enum CheckKind {
    KubernetesAbsent {
        api_version: String,
        kind: String,
        namespace: Option<String>,
        name: String,
    },
    KubernetesField {
        api_version: String,
        kind: String,
        namespace: Option<String>,
        name: String,
        field: String,
        equals: String,
    },
    HttpStatus {
        path: String,
        #[serde(default = "status_ok")]
        expect: u16,
    },
    RestExists {
        collection: String,
        #[serde(default = "by_path")]
        lookup: RestLookup,
        name: String,
        created_by: Option<String>,
    },
    /// At least `min` listed objects meet every `where` condition.
    KubernetesList {
        api_version: String,
        kind: String,
        namespace: Option<String>,
        #[serde(default, rename = "where")]
        conditions: Vec<FieldMatch>,
        #[serde(default = "at_least_one")]
        min: usize,
    },
    /// At least `min` items of the `list-field` array returned by `path`
    /// meet every `where` condition.
    RestList {
        path: String,
        list_field: String,
        #[serde(default, rename = "where")]
        conditions: Vec<FieldMatch>,
        #[serde(default = "at_least_one")]
        min: usize,
    },
}

fn status_ok() -> u16 {
    200
}

fn at_least_one() -> usize {
    1
}

impl CheckKind {
    fn needs_central(&self) -> bool {
        matches!(
            self,
            Self::HttpStatus { .. } | Self::RestExists { .. } | Self::RestList { .. }
        )
    }
}

/// Clients a manifest is built against. Central is optional because its URL
/// is itself a credential that may not resolve.
pub struct Platforms {
    pub cluster: Arc<ClusterClient>,
    pub central: Option<Arc<CentralClient>>,
}

impl Manifest {
    /// Load and validate a manifest. The format follows the file extension;
    /// anything other than `.json` or `.toml` is read as YAML.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let manifest: Self = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => serde_json::from_str(&contents)?,
            Some("toml") => toml::from_str(&contents)?,
            _ => serde_yaml::from_str(&contents)?,
        };
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(ProvisionError::Manifest("pipeline name is empty".into()));
        }

        let declared: HashSet<&str> = self.credentials.iter().map(|c| c.key.as_str()).collect();
        if declared.len() != self.credentials.len() {
            return Err(ProvisionError::Manifest(format!(
                "pipeline {} declares a credential twice",
                self.name
            )));
        }

        let mut seen = HashSet::new();
        let mut targets: Vec<(&str, ResourceDescriptor)> = Vec::new();
        for step in &self.steps {
            if step.name.trim().is_empty() {
                return Err(ProvisionError::Manifest(format!(
                    "pipeline {} has a step without a name",
                    self.name
                )));
            }
            if !seen.insert(step.name.as_str()) {
                return Err(ProvisionError::Manifest(format!(
                    "step name {} is used more than once",
                    step.name
                )));
            }
            if let Some(key) = step.requires.iter().find(|k| !declared.contains(k.as_str())) {
                return Err(ProvisionError::Manifest(format!(
                    "step {} requires credential {key}, which the pipeline does not declare",
                    step.name
                )));
            }
            if step.wait.is_some() && step.resource.is_none() {
                return Err(ProvisionError::Manifest(format!(
                    "step {} waits but has no resource",
                    step.name
                )));
            }
            if let (Some(ResourceSpec::Rest { .. }), Some(wait)) = (&step.resource, &step.wait) {
                if wait.field.is_some() || !wait.failed_when.is_empty() {
                    return Err(ProvisionError::Manifest(format!(
                        "step {} waits on a field, which only cluster resources support",
                        step.name
                    )));
                }
            }
            if let Some(wait) = step.wait.as_ref().filter(|w| w.field.is_none()) {
                if !wait.failed_when.is_empty() {
                    return Err(ProvisionError::Manifest(format!(
                        "step {} declares failed-when without a wait field",
                        step.name
                    )));
                }
            }
            if let Some(resource) = &step.resource {
                let descriptor = resource.descriptor()?;
                descriptor.validate()?;
                // Two desired specs for one resource would patch it back and
                // forth on every run.
                if let Some((other, _)) = targets.iter().find(|(_, d)| d.same_identity(&descriptor)) {
                    return Err(ProvisionError::Manifest(format!(
                        "steps {other} and {} both manage {descriptor}",
                        step.name
                    )));
                }
                targets.push((step.name.as_str(), descriptor));
            }
            let mut checks = HashSet::new();
            if let Some(check) = step.verify.iter().find(|c| !checks.insert(c.name.as_str())) {
                return Err(ProvisionError::Manifest(format!(
                    "step {} has two checks named {}",
                    step.name, check.name
                )));
            }
        }
        Ok(())
    }

    /// Whether any step talks to the Central API.
    pub fn needs_central(&self) -> bool {
        self.steps.iter().any(|step| {
            matches!(step.resource, Some(ResourceSpec::Rest { .. }))
                || step.verify.iter().any(|c| c.check.needs_central())
        })
    }

    pub fn build(&self, platforms: &Platforms, default_wait: PollPolicy) -> Result<Pipeline> {
        let steps = self
            .steps
            .iter()
            .map(|spec| spec.build(platforms, default_wait))
            .collect::<Result<Vec<_>>>()?;
        Ok(Pipeline {
            name: self.name.clone(),
            steps,
        })
    }
}

impl ResourceSpec {
    pub fn descriptor(&self) -> Result<ResourceDescriptor> {
        match self {
            Self::Kubernetes { manifest } => {
                let text = |pointer: &str| manifest.pointer(pointer).and_then(Value::as_str);
                let (Some(api_version), Some(kind), Some(name)) =
                    (text("/apiVersion"), text("/kind"), text("/metadata/name"))
                else {
                    return Err(ProvisionError::Manifest(
                        "kubernetes manifest needs apiVersion, kind and metadata.name".into(),
                    ));
                };
                Ok(ResourceDescriptor::new(
                    ResourceKind::K8sObject {
                        api_version: api_version.into(),
                        kind: kind.into(),
                    },
                    text("/metadata/namespace").map(String::from),
                    name,
                    DesiredSpec::new(manifest.clone()),
                ))
            }
            Self::Rest {
                collection,
                lookup,
                name,
                body,
            } => Ok(ResourceDescriptor::new(
                ResourceKind::RestEntity {
                    collection: collection.clone(),
                    lookup: lookup.clone(),
                },
                None,
                name.clone(),
                DesiredSpec::new(body.clone()),
            )),
        }
    }
}

impl StepSpec {
    fn build(&self, platforms: &Platforms, default_wait: PollPolicy) -> Result<Step> {
        let mut step = Step::new(&self.name).best_effort(self.best_effort);
        for key in &self.requires {
            step = step.requires(key);
        }

        if let Some(resource) = &self.resource {
            let descriptor = resource.descriptor()?;
            let (prober, applier): (Arc<dyn Prober>, Arc<dyn Applier>) = match resource {
                ResourceSpec::Kubernetes { .. } => (
                    platforms.cluster.clone() as Arc<dyn Prober>,
                    platforms.cluster.clone() as Arc<dyn Applier>,
                ),
                ResourceSpec::Rest { .. } => match &platforms.central {
                    Some(central) => (
                        central.clone() as Arc<dyn Prober>,
                        central.clone() as Arc<dyn Applier>,
                    ),
                    None => (
                        Arc::new(CentralUnavailable) as Arc<dyn Prober>,
                        Arc::new(CentralUnavailable) as Arc<dyn Applier>,
                    ),
                },
            };
            let wait = self
                .wait
                .as_ref()
                .map(|w| w.build(platforms, default_wait))
                .transpose()?;
            step = step.target(Target {
                descriptor,
                prober,
                applier,
                wait,
            });
        }

        for spec in &self.verify {
            let check = Check::new(&spec.name, spec.check.assertion(platforms)).gating(spec.gating);
            step = step.check(check);
        }
        Ok(step)
    }
}

impl WaitSpec {
    fn build(&self, platforms: &Platforms, default_wait: PollPolicy) -> Result<Wait> {
        let interval = self
            .interval_secs
            .unwrap_or_else(|| default_wait.interval().as_secs());
        let max_wait = self
            .max_wait_secs
            .unwrap_or_else(|| default_wait.max_elapsed().as_secs());
        let policy = PollPolicy::from_secs(interval, max_wait)?;

        let readiness = self.field.as_ref().map(|field| {
            Arc::new(FieldReadiness {
                client: platforms.cluster.clone(),
                field: field.clone(),
                ready: self.ready.clone(),
                failed: self.failed.clone(),
                failed_when: self.failed_when.clone(),
            }) as Arc<dyn ReadinessCheck>
        });
        Ok(Wait { policy, readiness })
    }
}

impl CheckKind {
    fn assertion(&self, platforms: &Platforms) -> Box<dyn Assertion> {
        let object = |api_version: &str, kind: &str, namespace: &Option<String>, name: &str| {
            ObjectRef {
                api_version: api_version.into(),
                kind: kind.into(),
                namespace: namespace.clone(),
                name: name.into(),
            }
        };
        match self {
            Self::KubernetesAbsent {
                api_version,
                kind,
                namespace,
                name,
            } => Box::new(ObjectAbsent {
                client: platforms.cluster.clone(),
                object: object(api_version, kind, namespace, name),
            }),
            Self::KubernetesField {
                api_version,
                kind,
                namespace,
                name,
                field,
                equals,
            } => Box::new(ObjectField {
                client: platforms.cluster.clone(),
                object: object(api_version, kind, namespace, name),
                field: field.clone(),
                equals: equals.clone(),
            }),
            Self::HttpStatus { path, expect } => match &platforms.central {
                Some(client) => Box::new(EndpointStatus {
                    client: client.clone(),
                    path: path.clone(),
                    expect: *expect,
                }),
                None => Box::new(CentralUnavailable),
            },
            Self::RestExists {
                collection,
                lookup,
                name,
                created_by,
            } => match &platforms.central {
                Some(client) => Box::new(EntityExists {
                    client: client.clone(),
                    descriptor: ResourceDescriptor::new(
                        ResourceKind::RestEntity {
                            collection: collection.clone(),
                            lookup: lookup.clone(),
                        },
                        None,
                        name.clone(),
                        DesiredSpec::default(),
                    ),
                    created_by: created_by.clone(),
                }),
                None => Box::new(CentralUnavailable),
            },
            Self::KubernetesList {
                api_version,
                kind,
                namespace,
                conditions,
                min,
            } => Box::new(ObjectsMatching {
                client: platforms.cluster.clone(),
                api_version: api_version.clone(),
                kind: kind.clone(),
                namespace: namespace.clone(),
                conditions: conditions.clone(),
                min: *min,
            }),
            Self::RestList {
                path,
                list_field,
                conditions,
                min,
            } => match &platforms.central {
                Some(client) => Box::new(EntitiesMatching {
                    client: client.clone(),
                    path: path.clone(),
                    list_field: list_field.clone(),
                    conditions: conditions.clone(),
                    min: *min,
                }),
                None => Box::new(CentralUnavailable),
            },
        }
    }
}

/// Stands in for Central when its URL did not resolve. Reads are `Unknown`
/// so nothing is ever created blindly.
struct CentralUnavailable;

const CENTRAL_UNAVAILABLE: &str = "Central API is not configured (its URL did not resolve)";

#[async_trait]
impl Prober for CentralUnavailable {
    async fn probe(&self, _descriptor: &ResourceDescriptor) -> ProbeState {
        ProbeState::Unknown(CENTRAL_UNAVAILABLE.into())
    }
}

#[async_trait]
impl Applier for CentralUnavailable {
    async fn create(&self, _descriptor: &ResourceDescriptor) -> Result<()> {
        Err(ProvisionError::Config(CENTRAL_UNAVAILABLE.into()))
    }

    async fn patch(&self, _descriptor: &ResourceDescriptor) -> Result<()> {
        Err(ProvisionError::Config(CENTRAL_UNAVAILABLE.into()))
    }
}

#[async_trait]
impl Assertion for CentralUnavailable {
    async fn evaluate(&self) -> CheckOutcome {
        CheckOutcome::Inconclusive(CENTRAL_UNAVAILABLE.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::CredentialSet;
    use crate::engine::{Runner, RunStatus, StepStatus};
    use crate::platforms::cluster::tests::{err, ok, ScriptedRunner};
    use serde_json::json;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const MONITORING: &str = r#"
name: disable-monitoring
credentials:
  - key: ROX_CENTRAL_URL
    required: false
steps:
  - name: central-monitoring-off
    resource:
      type: kubernetes
      manifest:
        apiVersion: platform.stackrox.io/v1alpha1
        kind: Central
        metadata:
          name: stackrox-central-services
          namespace: stackrox
        spec:
          monitoring:
            openshift:
              enabled: false
    wait:
      interval-secs: 1
      max-wait-secs: 5
    verify:
      - name: servicemonitor removed
        type: kubernetes-absent
        api-version: monitoring.coreos.com/v1
        kind: ServiceMonitor
        namespace: stackrox
        name: central-monitor
        gating: true
"#;

    fn parse(yaml: &str) -> Manifest {
        serde_yaml::from_str(yaml).unwrap()
    }

    fn platforms(runner: Arc<ScriptedRunner>) -> Platforms {
        Platforms {
            cluster: Arc::new(ClusterClient::new(runner, "oc")),
            central: None,
        }
    }

    #[test]
    fn test_parse_yaml_manifest() {
        let manifest = parse(MONITORING);
        manifest.validate().unwrap();

        let step = &manifest.steps[0];
        let descriptor = step.resource.as_ref().unwrap().descriptor().unwrap();
        assert_eq!(descriptor.name, "stackrox-central-services");
        assert_eq!(descriptor.namespace.as_deref(), Some("stackrox"));
        assert_eq!(
            descriptor.kind,
            ResourceKind::K8sObject {
                api_version: "platform.stackrox.io/v1alpha1".into(),
                kind: "Central".into()
            }
        );
        assert!(step.verify[0].gating);
        assert!(matches!(step.verify[0].check, CheckKind::KubernetesAbsent { .. }));
        assert!(!manifest.needs_central());
    }

    #[test]
    fn test_parse_rest_step_with_list_lookup() {
        let manifest = parse(
            r#"
name: rbac
credentials:
  - key: ROX_API_TOKEN
    secret: true
steps:
  - name: permission-set
    requires: [ROX_API_TOKEN]
    resource:
      type: rest
      collection: /v1/permissionsets
      lookup:
        style: by-list
        list-field: permissionSets
        name-field: name
        id-field: id
      name: Prometheus Server
      body:
        resourceToAccess:
          Administration: READ_ACCESS
    verify:
      - name: metrics served
        type: http-status
        path: /metrics
"#,
        );
        manifest.validate().unwrap();

        assert!(manifest.needs_central());
        assert!(manifest.credentials[0].required);
        assert!(manifest.credentials[0].secret);
        let Some(ResourceSpec::Rest { lookup, .. }) = &manifest.steps[0].resource else {
            panic!("expected a rest resource");
        };
        assert_eq!(
            lookup,
            &RestLookup::ByList {
                list_field: "permissionSets".into(),
                name_field: "name".into(),
                id_field: "id".into(),
                update_path: None
            }
        );
        assert!(matches!(
            manifest.steps[0].verify[0].check,
            CheckKind::HttpStatus { expect: 200, .. }
        ));
    }

    #[test]
    fn test_duplicate_step_names_rejected() {
        let manifest = parse(
            r"
name: twice
steps:
  - name: a
  - name: a
",
        );
        let err = manifest.validate().unwrap_err();
        assert!(err.to_string().contains("used more than once"));
    }

    #[test]
    fn test_undeclared_credential_rejected() {
        let manifest = parse(
            r"
name: undeclared
steps:
  - name: a
    requires: [ROX_API_TOKEN]
",
        );
        let err = manifest.validate().unwrap_err();
        assert!(err.to_string().contains("ROX_API_TOKEN"));
    }

    #[test]
    fn test_same_resource_in_two_steps_rejected() {
        let manifest = parse(
            r"
name: conflicting
steps:
  - name: first
    resource:
      type: rest
      collection: /v1/roles
      name: Admin
      body: {permissionSetId: a}
  - name: second
    resource:
      type: rest
      collection: /v1/roles
      name: Admin
      body: {permissionSetId: b}
",
        );
        let err = manifest.validate().unwrap_err();
        assert!(err.to_string().contains("both manage rest:/v1/roles Admin"));
    }

    #[test]
    fn test_field_wait_on_rest_resource_rejected() {
        let manifest = parse(
            r"
name: rest-wait
steps:
  - name: role
    resource:
      type: rest
      collection: /v1/roles
      name: Admin
    wait:
      field: .status.phase
      ready: [Ready]
",
        );
        let err = manifest.validate().unwrap_err();
        assert!(err.to_string().contains("only cluster resources"));
    }

    #[test]
    fn test_failed_when_needs_wait_field() {
        let manifest = parse(
            r"
name: helm-wait
steps:
  - name: central
    resource:
      type: kubernetes
      manifest:
        apiVersion: platform.stackrox.io/v1alpha1
        kind: Central
        metadata:
          name: stackrox-central-services
          namespace: stackrox
    wait:
      failed-when:
        - field: .status.conditions[?type=ReleaseFailed].status
          equals: 'True'
",
        );
        let err = manifest.validate().unwrap_err();
        assert!(err.to_string().contains("failed-when without a wait field"));
    }

    #[test]
    fn test_parse_list_checks() {
        let manifest = parse(
            r#"
name: lab-progress
steps:
  - name: module-0
    verify:
      - name: frontend running
        type: kubernetes-list
        api-version: v1
        kind: Pod
        namespace: patient-portal
        where:
          - field: .metadata.name
            prefix: frontend-
          - field: .status.phase
            equals: Running
  - name: module-1
    verify:
      - name: policy created
        type: rest-list
        path: /v1/policies
        list-field: policies
        where:
          - field: name
            equals: finished-1-policy
        min: 1
"#,
        );
        manifest.validate().unwrap();

        assert!(manifest.needs_central());
        match &manifest.steps[0].verify[0].check {
            CheckKind::KubernetesList { conditions, min, .. } => {
                assert_eq!(*min, 1);
                assert_eq!(conditions[0].prefix.as_deref(), Some("frontend-"));
                assert_eq!(conditions[1].equals.as_deref(), Some("Running"));
            }
            other => panic!("unexpected check {other:?}"),
        }
        assert!(matches!(
            &manifest.steps[1].verify[0].check,
            CheckKind::RestList { list_field, .. } if list_field == "policies"
        ));
    }

    #[tokio::test]
    async fn test_built_list_check_counts_matching_pods() {
        let runner = ScriptedRunner::new(vec![Ok(ok(
            r#"{"items":[{"metadata":{"name":"frontend-abc"},"status":{"phase":"Running"}}]}"#,
        ))]);
        let manifest = parse(
            r"
name: lab-progress
steps:
  - name: module-0
    verify:
      - name: frontend running
        type: kubernetes-list
        api-version: v1
        kind: Pod
        namespace: patient-portal
        gating: true
        where:
          - field: .metadata.name
            prefix: frontend-
",
        );
        let pipeline = manifest
            .build(&platforms(runner.clone()), PollPolicy::from_secs(10, 600).unwrap())
            .unwrap();
        let credentials = CredentialSet::default();

        let report = Runner::new(&credentials).run(&pipeline).await;

        assert_eq!(report.status(), RunStatus::Success);
        let (args, _) = &runner.calls()[0];
        assert_eq!(args, &["get", "Pod", "-o", "json", "-n", "patient-portal"]);
    }

    #[test]
    fn test_incomplete_kubernetes_manifest_rejected() {
        let manifest = parse(
            r"
name: broken
steps:
  - name: a
    resource:
      type: kubernetes
      manifest:
        kind: ConfigMap
",
        );
        assert!(matches!(manifest.validate(), Err(ProvisionError::Manifest(_))));
    }

    #[test]
    fn test_load_json_by_extension() {
        let mut file = NamedTempFile::with_suffix(".json").unwrap();
        write!(
            file,
            "{}",
            json!({"name": "json-pipeline", "steps": [{"name": "only", "best-effort": true}]})
        )
        .unwrap();

        let manifest = Manifest::load(file.path()).unwrap();
        assert_eq!(manifest.name, "json-pipeline");
        assert!(manifest.steps[0].best_effort);
    }

    #[test]
    fn test_load_toml_by_extension() {
        let mut file = NamedTempFile::with_suffix(".toml").unwrap();
        write!(
            file,
            r#"
name = "toml-pipeline"

[[steps]]
name = "metrics"

[[steps.verify]]
name = "central metrics"
type = "http-status"
path = "/metrics"
expect = 200
gating = true
"#
        )
        .unwrap();

        let manifest = Manifest::load(file.path()).unwrap();
        assert_eq!(manifest.steps[0].verify[0].name, "central metrics");
        assert!(manifest.steps[0].verify[0].gating);
    }

    #[test]
    fn test_shipped_pipelines_are_valid() {
        let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("pipelines");
        for name in [
            "disable-monitoring.yaml",
            "rbac.yaml",
            "verify-metrics.yaml",
            "lab-progress.yaml",
        ] {
            let manifest = Manifest::load(&dir.join(name)).unwrap();
            assert!(!manifest.steps.is_empty(), "{name} has no steps");
        }
    }

    #[test]
    fn test_wait_falls_back_to_configured_polling() {
        let runner = ScriptedRunner::new(vec![]);
        let wait = WaitSpec {
            interval_secs: Some(2),
            ..WaitSpec::default()
        };
        let built = wait
            .build(&platforms(runner), PollPolicy::from_secs(10, 600).unwrap())
            .unwrap();
        assert_eq!(built.policy, PollPolicy::from_secs(2, 600).unwrap());
        assert!(built.readiness.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_built_pipeline_patches_and_verifies() {
        let not_found =
            r#"Error from server (NotFound): servicemonitors.monitoring.coreos.com "central-monitor" not found"#;
        let runner = ScriptedRunner::new(vec![
            Ok(ok(r#"{"spec":{"monitoring":{"openshift":{"enabled":true}}}}"#)),
            Ok(ok("patched")),
            Ok(ok(
                r#"{"apiVersion":"platform.stackrox.io/v1alpha1","kind":"Central","metadata":{"name":"stackrox-central-services","namespace":"stackrox"},"spec":{"monitoring":{"openshift":{"enabled":false}}}}"#,
            )),
            Ok(err(not_found)),
        ]);
        let pipeline = parse(MONITORING)
            .build(&platforms(runner.clone()), PollPolicy::from_secs(10, 600).unwrap())
            .unwrap();
        let credentials = CredentialSet::default();

        let report = Runner::new(&credentials).run(&pipeline).await;

        assert_eq!(report.status(), RunStatus::Success);
        assert_eq!(report.steps()[0].status(), StepStatus::Converged);
        assert_eq!(runner.verbs(), ["get", "patch", "get", "get"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_read_error_is_retried() {
        let runner = ScriptedRunner::new(vec![
            Ok(err("Unable to connect to the server: dial tcp 10.0.0.1:6443: i/o timeout")),
            Ok(ok(
                r#"{"apiVersion":"platform.stackrox.io/v1alpha1","kind":"Central","metadata":{"name":"stackrox-central-services","namespace":"stackrox"},"spec":{"monitoring":{"openshift":{"enabled":false}}}}"#,
            )),
        ]);
        let mut manifest = parse(MONITORING);
        manifest.steps[0].wait = None;
        manifest.steps[0].verify.clear();
        let pipeline = manifest
            .build(&platforms(runner.clone()), PollPolicy::from_secs(10, 600).unwrap())
            .unwrap();
        let credentials = CredentialSet::default();

        let report = Runner::new(&credentials)
            .with_read_retry(PollPolicy::from_secs(2, 10).unwrap())
            .run(&pipeline)
            .await;

        assert_eq!(report.status(), RunStatus::Success);
        assert_eq!(report.steps()[0].status(), StepStatus::Skipped);
        assert_eq!(report.steps()[0].elapsed_ms(), 2000);
        assert_eq!(runner.verbs(), ["get", "get"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rest_step_without_central_never_applies() {
        let manifest = parse(
            r"
name: rbac
steps:
  - name: role
    resource:
      type: rest
      collection: /v1/roles
      name: Prometheus Server
",
        );
        let pipeline = manifest
            .build(
                &platforms(ScriptedRunner::new(vec![])),
                PollPolicy::from_secs(10, 600).unwrap(),
            )
            .unwrap();
        let credentials = CredentialSet::default();

        let report = Runner::new(&credentials).run(&pipeline).await;

        assert_eq!(report.status(), RunStatus::Failed);
        assert_eq!(report.steps()[0].status(), StepStatus::HardFailure);
        assert!(report.steps()[0]
            .diagnostics()
            .iter()
            .any(|d| d.contains("not configured")));
    }
}
