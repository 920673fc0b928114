//! Layered resolution of connection parameters and secrets.
//!
//! Sources are tried in a fixed order: the process environment, the persisted
//! shell profile, platform lookups, and finally an interactive prompt. The
//! first non-empty value wins. A required key nobody can supply is an error
//! naming the variable to set; it is never replaced by a default.
//!
//! Saving to the profile is best effort: a value that resolved is used for
//! the run even when it cannot be written back.

mod profile;
mod prompt;

use async_trait::async_trait;
use indexmap::IndexMap;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::auth::Token;
use crate::engine::CancelFlag;
use crate::error::{ProvisionError, Result};

pub use profile::ShellProfile;
pub use prompt::{ConsolePrompter, Prompter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CredentialSource {
    Environment,
    PersistedProfile,
    InteractivePrompt,
    PlatformLookup,
}

impl fmt::Display for CredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Environment => "environment",
            Self::PersistedProfile => "shell profile",
            Self::InteractivePrompt => "prompt",
            Self::PlatformLookup => "platform lookup",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone)]
pub struct Credential {
    pub key: String,
    pub value: Token,
    pub source: CredentialSource,
}

impl Credential {
    pub fn new(key: impl Into<String>, value: Token, source: CredentialSource) -> Self {
        Self {
            key: key.into(),
            value,
            source,
        }
    }
}

/// A credential a pipeline needs, as declared in its manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CredentialRequest {
    pub key: String,
    #[serde(default = "default_true")]
    pub required: bool,
    /// Prompt without echo.
    #[serde(default)]
    pub secret: bool,
    /// Extra guidance appended to the error when the key cannot be resolved.
    #[serde(default)]
    pub hint: Option<String>,
}

fn default_true() -> bool {
    true
}

impl CredentialRequest {
    pub fn required(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            required: true,
            secret: false,
            hint: None,
        }
    }

    pub fn optional(key: impl Into<String>) -> Self {
        Self {
            required: false,
            ..Self::required(key)
        }
    }

    #[must_use]
    pub fn secret(mut self) -> Self {
        self.secret = true;
        self
    }
}

#[derive(Debug, Clone)]
pub enum Resolution {
    Resolved(Credential),
    AbsentOptional,
}

/// Platform-side source for values that can be discovered, such as the
/// Central URL from its route.
#[async_trait]
pub trait CredentialLookup: Send + Sync {
    async fn lookup(&self, key: &str) -> Option<String>;
}

pub struct Resolver {
    env: HashMap<String, String>,
    profile: Option<ShellProfile>,
    lookups: Vec<Box<dyn CredentialLookup>>,
    prompter: Option<Arc<dyn Prompter>>,
    persist_prompted: bool,
    persist_discovered: bool,
    cancel: Option<CancelFlag>,
}

impl Resolver {
    /// Resolver over a snapshot of the current process environment. It starts
    /// non-interactive with no profile.
    pub fn from_process_env() -> Self {
        Self::with_env(std::env::vars().collect())
    }

    pub fn with_env(env: HashMap<String, String>) -> Self {
        Self {
            env,
            profile: None,
            lookups: Vec::new(),
            prompter: None,
            persist_prompted: false,
            persist_discovered: false,
            cancel: None,
        }
    }

    #[must_use]
    pub fn profile(mut self, profile: ShellProfile) -> Self {
        self.profile = Some(profile);
        self
    }

    #[must_use]
    pub fn lookup(mut self, lookup: Box<dyn CredentialLookup>) -> Self {
        self.lookups.push(lookup);
        self
    }

    /// Allow prompting for required values, optionally saving what the
    /// operator typed to the profile.
    #[must_use]
    pub fn interactive(mut self, prompter: Box<dyn Prompter>, persist_prompted: bool) -> Self {
        self.prompter = Some(Arc::from(prompter));
        self.persist_prompted = persist_prompted;
        self
    }

    /// Also save values found by platform lookups, such as the Central
    /// address derived from its route.
    #[must_use]
    pub fn persist_discovered(mut self, persist: bool) -> Self {
        self.persist_discovered = persist;
        self
    }

    /// Abandon a pending prompt once `cancel` fires.
    #[must_use]
    pub fn cancel_on(mut self, cancel: CancelFlag) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub async fn resolve(&self, request: &CredentialRequest) -> Result<Resolution> {
        let key = request.key.as_str();

        if let Some(value) = self.env.get(key).filter(|v| !v.is_empty()) {
            return Ok(self.found(key, value.clone(), CredentialSource::Environment));
        }

        if let Some(profile) = &self.profile {
            match profile.get(key) {
                Ok(Some(value)) if !value.is_empty() => {
                    return Ok(self.found(key, value, CredentialSource::PersistedProfile));
                }
                Ok(_) => {}
                Err(e) => warn!("Could not read {}: {e}", profile.path().display()),
            }
        }

        for lookup in &self.lookups {
            if let Some(value) = lookup.lookup(key).await.filter(|v| !v.is_empty()) {
                let resolution = self.found(key, value, CredentialSource::PlatformLookup);
                if let (true, Resolution::Resolved(credential)) = (self.persist_discovered, &resolution) {
                    self.remember(key, &credential.value);
                }
                return Ok(resolution);
            }
        }

        if !request.required {
            debug!("Optional credential {key} not set");
            return Ok(Resolution::AbsentOptional);
        }

        if let Some(prompter) = &self.prompter {
            let value = self.prompt(prompter, request).await?;
            if !value.is_empty() {
                let token = Token::from(value);
                if self.persist_prompted {
                    self.remember(key, &token);
                }
                info!("Resolved {key} from prompt");
                return Ok(Resolution::Resolved(Credential::new(
                    key,
                    token,
                    CredentialSource::InteractivePrompt,
                )));
            }
        }

        Err(self.missing(request))
    }

    /// Resolve every request, collecting failures instead of stopping at the
    /// first one so each step can report the keys it depends on.
    pub async fn resolve_all(&self, requests: &[CredentialRequest]) -> CredentialSet {
        let mut set = CredentialSet::default();
        for request in requests {
            match self.resolve(request).await {
                Ok(Resolution::Resolved(credential)) => set.insert_resolved(credential),
                Ok(Resolution::AbsentOptional) => set.insert_absent(&request.key),
                Err(e) => {
                    warn!("{e}");
                    set.insert_failure(&request.key, e.to_string());
                }
            }
        }
        set
    }

    /// Ask the operator on a blocking thread so the runtime keeps serving the
    /// interrupt handler. An unusable terminal yields an empty answer.
    async fn prompt(&self, prompter: &Arc<dyn Prompter>, request: &CredentialRequest) -> Result<String> {
        let prompter = Arc::clone(prompter);
        let key = request.key.clone();
        let secret = request.secret;
        let answer = tokio::task::spawn_blocking(move || prompter.prompt(&key, secret));
        let cancelled = async {
            match &self.cancel {
                Some(cancel) => cancel.cancelled().await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            joined = answer => match joined {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(e)) => {
                    warn!("Cannot prompt for {}: {e}", request.key);
                    Ok(String::new())
                }
                Err(e) => {
                    warn!("Prompt for {} did not complete: {e}", request.key);
                    Ok(String::new())
                }
            },
            () = cancelled => Err(ProvisionError::Cancelled(request.key.clone())),
        }
    }

    fn remember(&self, key: &str, value: &Token) {
        let Some(profile) = &self.profile else {
            return;
        };
        if let Err(e) = profile.persist(key, value) {
            warn!(
                "Could not save {key} to {}: {e}; it is used for this run only",
                profile.path().display()
            );
        }
    }

    fn found(&self, key: &str, value: String, source: CredentialSource) -> Resolution {
        let credential = Credential::new(key, Token::from(value), source);
        debug!("Resolved {key}={} from {source}", credential.value);
        Resolution::Resolved(credential)
    }

    fn missing(&self, request: &CredentialRequest) -> ProvisionError {
        let mut hint = format!("export {}=<value>", request.key);
        if let Some(profile) = &self.profile {
            hint.push_str(&format!(" or add it to {}", profile.path().display()));
        }
        if self.prompter.is_none() {
            hint.push_str(" (prompting is disabled)");
        }
        if let Some(extra) = &request.hint {
            hint.push_str(&format!("; {extra}"));
        }
        ProvisionError::MissingCredential {
            key: request.key.clone(),
            hint,
        }
    }
}

/// Outcome of resolving a pipeline's declared credentials.
#[derive(Debug, Default)]
pub struct CredentialSet {
    resolved: IndexMap<String, Credential>,
    absent: Vec<String>,
    failures: IndexMap<String, String>,
}

impl CredentialSet {
    pub fn insert_resolved(&mut self, credential: Credential) {
        self.resolved.insert(credential.key.clone(), credential);
    }

    pub fn insert_absent(&mut self, key: &str) {
        self.absent.push(key.to_string());
    }

    pub fn insert_failure(&mut self, key: &str, message: impl Into<String>) {
        self.failures.insert(key.to_string(), message.into());
    }

    pub fn get(&self, key: &str) -> Option<&Credential> {
        self.resolved.get(key)
    }

    pub fn value(&self, key: &str) -> Option<&Token> {
        self.get(key).map(|c| &c.value)
    }

    pub fn resolved(&self) -> impl Iterator<Item = &Credential> {
        self.resolved.values()
    }

    pub fn failures(&self) -> impl Iterator<Item = (&str, &str)> {
        self.failures.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Why a step depending on `key` cannot run, if it cannot.
    pub fn unmet(&self, key: &str) -> Option<String> {
        if self.resolved.contains_key(key) || self.absent.iter().any(|k| k == key) {
            return None;
        }
        Some(
            self.failures
                .get(key)
                .cloned()
                .unwrap_or_else(|| format!("credential {key} is not declared by the pipeline")),
        )
    }
}
