use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

use super::CentralClient;
use crate::engine::{
    Applier, Assertion, CheckOutcome, DesiredSpec, ProbeState, Prober, ResourceDescriptor,
    ResourceKind, RestLookup,
};
use crate::error::{ProvisionError, Result};
use crate::platforms::json::{self, FieldMatch};

fn rest_target(descriptor: &ResourceDescriptor) -> Result<(&str, &RestLookup)> {
    match &descriptor.kind {
        ResourceKind::RestEntity { collection, lookup } => Ok((collection.as_str(), lookup)),
        other => Err(ProvisionError::Config(format!(
            "{other} is not a Central API entity"
        ))),
    }
}

/// A `{"$ref": {...}}` object inside a desired body, replaced by a field of
/// another entity before the body is compared or sent. Ids assigned by
/// Central (permission sets, auth providers) are wired this way.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct EntityRef {
    collection: String,
    #[serde(default = "by_path")]
    lookup: RestLookup,
    name: String,
    field: String,
}

fn by_path() -> RestLookup {
    RestLookup::ByPath
}

const REF_KEY: &str = "$ref";

fn collect_refs(value: &Value, pointer: &str, out: &mut Vec<(String, EntityRef)>) -> Result<()> {
    match value {
        Value::Object(map) if map.len() == 1 && map.contains_key(REF_KEY) => {
            let reference = serde_json::from_value(map[REF_KEY].clone())?;
            out.push((pointer.to_string(), reference));
        }
        Value::Object(map) => {
            for (key, child) in map {
                let escaped = key.replace('~', "~0").replace('/', "~1");
                collect_refs(child, &format!("{pointer}/{escaped}"), out)?;
            }
        }
        Value::Array(items) => {
            for (index, child) in items.iter().enumerate() {
                collect_refs(child, &format!("{pointer}/{index}"), out)?;
            }
        }
        _ => {}
    }
    Ok(())
}

impl CentralClient {
    /// The descriptor with every `$ref` in its desired body resolved. A
    /// reference to a missing entity is an error, never an empty value.
    async fn resolved(&self, descriptor: &ResourceDescriptor) -> Result<ResourceDescriptor> {
        let mut refs = Vec::new();
        collect_refs(descriptor.desired.value(), "", &mut refs)?;
        if refs.is_empty() {
            return Ok(descriptor.clone());
        }

        let mut body = descriptor.desired.value().clone();
        for (pointer, reference) in refs {
            let target = ResourceDescriptor::new(
                ResourceKind::RestEntity {
                    collection: reference.collection,
                    lookup: reference.lookup,
                },
                None,
                reference.name,
                DesiredSpec::default(),
            );
            let entity = self.find(&target).await?.ok_or_else(|| {
                ProvisionError::MissingDependency {
                    resource: target.to_string(),
                    needed_by: descriptor.to_string(),
                }
            })?;
            let value = json::extract(&entity, &reference.field).cloned().ok_or_else(|| {
                ProvisionError::ApiError {
                    status: 200,
                    message: format!("{target} has no {}", reference.field),
                }
            })?;
            if let Some(slot) = body.pointer_mut(&pointer) {
                *slot = value;
            }
        }

        let mut resolved = descriptor.clone();
        resolved.desired = DesiredSpec::new(body);
        Ok(resolved)
    }

    /// Current representation of the entity, or `None` when it does not exist.
    pub async fn find(&self, descriptor: &ResourceDescriptor) -> Result<Option<Value>> {
        let (collection, lookup) = rest_target(descriptor)?;
        match lookup {
            RestLookup::ByPath => {
                self.get_json(self.url(collection, Some(&descriptor.name))?)
                    .await
            }
            RestLookup::ByList {
                list_field,
                name_field,
                ..
            } => {
                let listing = self
                    .get_json(self.url(collection, None)?)
                    .await?
                    .ok_or_else(|| ProvisionError::ApiError {
                        status: 404,
                        message: format!("collection {collection} does not exist"),
                    })?;
                let items = listing
                    .get(list_field)
                    .and_then(Value::as_array)
                    .ok_or_else(|| ProvisionError::ApiError {
                        status: 200,
                        message: format!("{collection} response has no {list_field} array"),
                    })?;
                Ok(items
                    .iter()
                    .find(|item| {
                        json::extract(item, name_field).and_then(Value::as_str)
                            == Some(descriptor.name.as_str())
                    })
                    .cloned())
            }
        }
    }
}

#[async_trait]
impl Prober for CentralClient {
    async fn probe(&self, descriptor: &ResourceDescriptor) -> ProbeState {
        let descriptor = match self.resolved(descriptor).await {
            Ok(descriptor) => descriptor,
            Err(e) => return ProbeState::Unknown(e.to_string()),
        };
        match self.find(&descriptor).await {
            Ok(None) => ProbeState::Absent,
            Ok(Some(live)) if descriptor.desired.matches(&live) => ProbeState::PresentMatching,
            Ok(Some(_)) => ProbeState::PresentDivergent,
            Err(e) => ProbeState::Unknown(e.to_string()),
        }
    }
}

#[async_trait]
impl Applier for CentralClient {
    async fn create(&self, descriptor: &ResourceDescriptor) -> Result<()> {
        let descriptor = &self.resolved(descriptor).await?;
        let (collection, lookup) = rest_target(descriptor)?;
        let mut body = descriptor.desired.value().clone();
        let url = match lookup {
            RestLookup::ByPath => self.url(collection, Some(&descriptor.name))?,
            RestLookup::ByList { name_field, .. } => {
                // Nested name fields are left to the body.
                if let (Value::Object(map), false) = (&mut body, name_field.contains(&['.', '['][..])) {
                    map.entry(name_field.clone())
                        .or_insert_with(|| Value::String(descriptor.name.clone()));
                }
                self.url(collection, None)?
            }
        };
        self.post_json(url, &body).await?;
        Ok(())
    }

    /// Central replaces entities wholesale on PUT, so the desired fields are
    /// merged into the live entity first.
    async fn patch(&self, descriptor: &ResourceDescriptor) -> Result<()> {
        let descriptor = &self.resolved(descriptor).await?;
        let (collection, lookup) = rest_target(descriptor)?;
        let mut live = self.find(descriptor).await?.ok_or_else(|| {
            ProvisionError::ApiError {
                status: 404,
                message: format!("{descriptor} disappeared before it could be updated"),
            }
        })?;
        json::merge(&mut live, descriptor.desired.value());

        let url = match lookup {
            RestLookup::ByPath => self.url(collection, Some(&descriptor.name))?,
            RestLookup::ByList {
                update_path: Some(path),
                ..
            } => self.url(path, None)?,
            RestLookup::ByList { id_field, .. } => {
                let id = json::extract(&live, id_field)
                    .map(json::render)
                    .ok_or_else(|| ProvisionError::ApiError {
                        status: 200,
                        message: format!("{descriptor} has no {id_field}"),
                    })?;
                self.url(collection, Some(&id))?
            }
        };
        self.put_json(url, &live).await
    }
}

/// Passes when a GET on `path` answers with the expected status code.
pub struct EndpointStatus {
    pub client: Arc<CentralClient>,
    pub path: String,
    pub expect: u16,
}

#[async_trait]
impl Assertion for EndpointStatus {
    async fn evaluate(&self) -> CheckOutcome {
        match self.client.status(&self.path).await {
            Ok(status) if status == self.expect => CheckOutcome::Pass,
            Ok(status) => CheckOutcome::Fail(format!(
                "{} returned {status}, expected {}",
                self.path, self.expect
            )),
            Err(e) => CheckOutcome::Inconclusive(e.to_string()),
        }
    }
}

/// Passes when the entity exists. Used to gate on entities another pipeline
/// is expected to have created.
pub struct EntityExists {
    pub client: Arc<CentralClient>,
    pub descriptor: ResourceDescriptor,
    /// Where the operator should look if the entity is missing.
    pub created_by: Option<String>,
}

#[async_trait]
impl Assertion for EntityExists {
    async fn evaluate(&self) -> CheckOutcome {
        match self.client.find(&self.descriptor).await {
            Ok(Some(_)) => CheckOutcome::Pass,
            Ok(None) => CheckOutcome::Fail(match &self.created_by {
                Some(source) => format!("{} not found; it is created by {source}", self.descriptor),
                None => format!("{} not found", self.descriptor),
            }),
            Err(e) => CheckOutcome::Inconclusive(e.to_string()),
        }
    }
}

/// Passes when at least `min` items of the list at `path` satisfy every
/// condition, e.g. a policy named `finished-1-policy` in `/v1/policies`.
pub struct EntitiesMatching {
    pub client: Arc<CentralClient>,
    pub path: String,
    pub list_field: String,
    pub conditions: Vec<FieldMatch>,
    pub min: usize,
}

#[async_trait]
impl Assertion for EntitiesMatching {
    async fn evaluate(&self) -> CheckOutcome {
        let url = match self.client.url(&self.path, None) {
            Ok(url) => url,
            Err(e) => return CheckOutcome::Inconclusive(e.to_string()),
        };
        let listing = match self.client.get_json(url).await {
            Ok(Some(listing)) => listing,
            Ok(None) => return CheckOutcome::Fail(format!("{} does not exist", self.path)),
            Err(e) => return CheckOutcome::Inconclusive(e.to_string()),
        };
        let Some(items) = json::extract(&listing, &self.list_field).and_then(Value::as_array) else {
            return CheckOutcome::Inconclusive(format!(
                "{} response has no {} array",
                self.path, self.list_field
            ));
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
                self.list_field,
                self.min
            ))
        }
    }
}
