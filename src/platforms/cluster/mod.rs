//! Cluster control-plane access through the `oc`/`kubectl` CLI.

mod backend;
mod command;

use log::debug;
use serde_json::Value;
use std::sync::Arc;

use crate::error::{ProvisionError, Result};

pub use backend::{CentralRouteLookup, FieldReadiness, ObjectAbsent, ObjectField, ObjectsMatching};
pub use command::{CommandOutput, CommandRunner, SystemRunner};

/// Identifies one object for the CLI: `Kind.version.group`, namespace, name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectRef {
    pub api_version: String,
    pub kind: String,
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectRef {
    /// Fully qualified resource argument so that CRDs with clashing kind
    /// names resolve unambiguously.
    pub fn resource_arg(&self) -> String {
        match self.api_version.split_once('/') {
            Some((group, version)) => format!("{}.{version}.{group}", self.kind),
            None => self.kind.clone(),
        }
    }
}

pub struct ClusterClient {
    runner: Arc<dyn CommandRunner>,
    cli: String,
    global_args: Vec<String>,
}

impl ClusterClient {
    pub fn new(runner: Arc<dyn CommandRunner>, cli: impl Into<String>) -> Self {
        Self {
            runner,
            cli: cli.into(),
            global_args: Vec::new(),
        }
    }

    #[must_use]
    pub fn kubeconfig(mut self, path: &str) -> Self {
        self.global_args.push(format!("--kubeconfig={path}"));
        self
    }

    #[must_use]
    pub fn context(mut self, context: &str) -> Self {
        self.global_args.push(format!("--context={context}"));
        self
    }

    async fn exec(&self, args: Vec<String>, stdin: Option<&str>) -> Result<CommandOutput> {
        let mut full = self.global_args.clone();
        full.extend(args);
        debug!("Running {} {}", self.cli, full.join(" "));
        let output = self.runner.run(&self.cli, &full, stdin).await.map_err(|e| {
            ProvisionError::Command {
                command: format!("{} {}", self.cli, full.join(" ")),
                stderr: e.to_string(),
            }
        })?;
        Ok(output)
    }

    fn failure(&self, verb: &str, object: &ObjectRef, output: CommandOutput) -> ProvisionError {
        ProvisionError::Command {
            command: format!("{} {verb} {} {}", self.cli, object.resource_arg(), object.name),
            stderr: output.stderr,
        }
    }

    fn namespaced(mut args: Vec<String>, object: &ObjectRef) -> Vec<String> {
        if let Some(ns) = &object.namespace {
            args.push("-n".into());
            args.push(ns.clone());
        }
        args
    }

    /// Fetch an object. `Ok(None)` only when the API server says it does not
    /// exist; every other failure is an error.
    pub async fn get(&self, object: &ObjectRef) -> Result<Option<Value>> {
        let args = Self::namespaced(
            vec![
                "get".into(),
                object.resource_arg(),
                object.name.clone(),
                "-o".into(),
                "json".into(),
            ],
            object,
        );
        let output = self.exec(args, None).await?;
        if !output.success {
            if is_not_found(&output.stderr) {
                return Ok(None);
            }
            return Err(self.failure("get", object, output));
        }
        Ok(Some(serde_json::from_str(&output.stdout)?))
    }

    pub async fn create_object(&self, object: &ObjectRef, manifest: &Value) -> Result<()> {
        let body = serde_json::to_string(manifest)?;
        let output = self
            .exec(vec!["create".into(), "-f".into(), "-".into()], Some(&body))
            .await?;
        if !output.success {
            return Err(self.failure("create", object, output));
        }
        Ok(())
    }

    pub async fn patch_merge(&self, object: &ObjectRef, patch: &Value) -> Result<()> {
        let args = Self::namespaced(
            vec![
                "patch".into(),
                object.resource_arg(),
                object.name.clone(),
                "--type".into(),
                "merge".into(),
                "-p".into(),
                serde_json::to_string(patch)?,
            ],
            object,
        );
        let output = self.exec(args, None).await?;
        if !output.success {
            return Err(self.failure("patch", object, output));
        }
        Ok(())
    }

    /// Every object of one kind in a namespace (`.items` of a list call).
    pub async fn list(
        &self,
        api_version: &str,
        kind: &str,
        namespace: Option<&str>,
    ) -> Result<Vec<Value>> {
        let scope = ObjectRef {
            api_version: api_version.into(),
            kind: kind.into(),
            namespace: namespace.map(String::from),
            name: String::new(),
        };
        let args = Self::namespaced(
            vec!["get".into(), scope.resource_arg(), "-o".into(), "json".into()],
            &scope,
        );
        let output = self.exec(args, None).await?;
        if !output.success {
            return Err(self.failure("get", &scope, output));
        }
        let mut listing: Value = serde_json::from_str(&output.stdout)?;
        match listing.get_mut("items").map(Value::take) {
            Some(Value::Array(items)) => Ok(items),
            _ => Err(ProvisionError::Command {
                command: format!("{} get {}", self.cli, scope.resource_arg()),
                stderr: "response has no items list".into(),
            }),
        }
    }

    /// Host of an OpenShift route, if the route exists.
    pub async fn route_host(&self, namespace: &str, name: &str) -> Result<Option<String>> {
        let route = ObjectRef {
            api_version: "route.openshift.io/v1".into(),
            kind: "Route".into(),
            namespace: Some(namespace.into()),
            name: name.into(),
        };
        Ok(self
            .get(&route)
            .await?
            .and_then(|r| r.pointer("/spec/host").and_then(Value::as_str).map(String::from)))
    }
}

/// Only the API server's own verdict about the named object counts. Client
/// errors (missing context or kubeconfig) and an unserved resource type leave
/// the object's state unknown.
fn is_not_found(stderr: &str) -> bool {
    stderr.contains("(NotFound)") && !stderr.contains("could not find the requested resource")
}
