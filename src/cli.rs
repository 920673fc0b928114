use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use log::info;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use crate::config::{Config, OutputFormat};
use crate::credentials::{ConsolePrompter, CredentialRequest, CredentialSet, Resolver, ShellProfile};
use crate::engine::verify::verify;
use crate::engine::{CancelFlag, Pipeline, ProbeState, RunStatus, Runner};
use crate::manifest::{Manifest, Platforms};
use crate::output::{
    print_credentials, print_plan, print_run_summary, print_verification, write_results, PlanEntry,
    StepProgress,
};
use crate::platforms::central::{central_address, CentralClient, CentralSettings};
use crate::platforms::cluster::{CentralRouteLookup, ClusterClient, SystemRunner};

#[derive(Parser)]
#[command(name = "acs-provision")]
#[command(author, version, about = "Idempotent provisioning pipelines for RHACS", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (default: ./acs-provision.{toml,json,yaml,yml})
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Also write the report as JSON to this file
    #[arg(short, long, global = true)]
    output: Option<PathBuf>,

    #[arg(short, long, global = true, default_value_t = false)]
    pretty: bool,

    /// Never prompt; unresolved required credentials fail their steps
    #[arg(long, global = true, env = "ACS_NON_INTERACTIVE", default_value_t = false)]
    non_interactive: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a pipeline: converge, wait and verify every step in order
    Run { manifest: PathBuf },

    /// Probe every resource of a pipeline and show what a run would do
    Plan { manifest: PathBuf },

    /// Evaluate only the verification checks of a pipeline
    Verify {
        manifest: PathBuf,

        /// Write one success/failed line per step to this file
        #[arg(long)]
        results: Option<PathBuf>,
    },

    /// Resolve credentials and show where each one came from
    Resolve {
        #[arg(required = true)]
        keys: Vec<String>,

        /// Save prompted and discovered values to the shell profile
        #[arg(long, default_value_t = false)]
        persist: bool,
    },

    /// Write a configuration file with the default settings
    Init {
        #[arg(default_value = "acs-provision.toml")]
        path: PathBuf,

        #[arg(long, default_value_t = false)]
        force: bool,
    },
}

/// A loaded manifest with its credentials resolved and steps wired to clients.
struct Prepared {
    pipeline: Pipeline,
    credentials: CredentialSet,
}

impl Cli {
    fn cluster_client(config: &Config) -> Arc<ClusterClient> {
        let mut client = ClusterClient::new(Arc::new(SystemRunner), &config.cluster.cli);
        if let Some(kubeconfig) = &config.cluster.kubeconfig {
            client = client.kubeconfig(kubeconfig);
        }
        if let Some(context) = &config.cluster.context {
            client = client.context(context);
        }
        Arc::new(client)
    }

    fn resolver(
        &self,
        config: &Config,
        cluster: &Arc<ClusterClient>,
        persist: bool,
        cancel: &CancelFlag,
    ) -> Resolver {
        let mut resolver = Resolver::from_process_env()
            .persist_discovered(persist)
            .cancel_on(cancel.clone());

        let profile = config
            .credentials
            .profile
            .clone()
            .map(ShellProfile::new)
            .or_else(ShellProfile::default_location);
        if let Some(profile) = profile {
            resolver = resolver.profile(profile);
        }

        resolver = resolver.lookup(Box::new(CentralRouteLookup {
            client: cluster.clone(),
            url_key: config.central.url_env.clone(),
            address_key: config.central.address_env.clone(),
            namespace: config.central.namespace.clone(),
            route: config.central.route.clone(),
        }));

        if config.credentials.interactive && !self.non_interactive {
            resolver = resolver.interactive(
                Box::new(ConsolePrompter::new()),
                persist || config.credentials.persist_prompted,
            );
        }
        resolver
    }

    fn central_client(
        config: &Config,
        credentials: &CredentialSet,
    ) -> Result<Option<Arc<CentralClient>>> {
        let Some(url) = central_url(config, credentials) else {
            return Ok(None);
        };

        let mut settings = CentralSettings::new(
            url,
            credentials.value(&config.central.token_env).cloned(),
        );
        settings.ca_cert = config.central.ca_cert.clone();
        settings.client_cert = config.central.client_cert.clone();
        settings.client_key = config.central.client_key.clone();
        settings.insecure_skip_tls_verify = config.central.insecure_skip_tls_verify;
        settings.read_retries = config.central.read_retries;
        settings.retry_delay = config.central.retry_delay();

        let client = CentralClient::new(settings).context("Failed to configure Central client")?;
        info!("Using Central at {}", client.base_url());
        Ok(Some(Arc::new(client)))
    }

    async fn prepare(&self, config: &Config, path: &Path, cancel: &CancelFlag) -> Result<Prepared> {
        let manifest = Manifest::load(path)
            .with_context(|| format!("Failed to load pipeline manifest: {}", path.display()))?;
        info!(
            "Loaded pipeline {} ({} steps) from {}",
            manifest.name,
            manifest.steps.len(),
            path.display()
        );

        let mut requests = manifest.credentials.clone();
        if manifest.needs_central() {
            for key in [
                &config.central.url_env,
                &config.central.address_env,
                &config.central.token_env,
            ] {
                if !requests.iter().any(|r| &r.key == key) {
                    requests.push(CredentialRequest::optional(key.as_str()));
                }
            }
        }

        let cluster = Self::cluster_client(config);
        let credentials = self
            .resolver(config, &cluster, false, cancel)
            .resolve_all(&requests)
            .await;

        let central = if manifest.needs_central() {
            Self::central_client(config, &credentials)?
        } else {
            None
        };

        let pipeline = manifest
            .build(&Platforms { cluster, central }, config.polling.policy()?)
            .with_context(|| format!("Failed to build pipeline {}", manifest.name))?;

        Ok(Prepared {
            pipeline,
            credentials,
        })
    }

    fn write_json<T: Serialize>(&self, config: &Config, value: &T) -> Result<()> {
        let pretty = self.pretty || config.output.pretty;
        let json_output = if pretty {
            serde_json::to_string_pretty(value)?
        } else {
            serde_json::to_string(value)?
        };

        if let Some(output_path) = &self.output {
            std::fs::write(output_path, &json_output)
                .with_context(|| format!("Failed to write {}", output_path.display()))?;
            info!("Report written to: {}", output_path.display());
        }
        if config.output.format == OutputFormat::Json {
            println!("{json_output}");
        }
        Ok(())
    }

    async fn execute_run(&self, config: &Config, path: &Path, cancel: CancelFlag) -> Result<ExitCode> {
        let prepared = self.prepare(config, path, &cancel).await?;
        let read_retry = config.polling.read_retry_policy()?;

        let report = {
            let progress = StepProgress::new(&prepared.pipeline.name);
            Runner::new(&prepared.credentials)
                .with_cancel(cancel)
                .with_read_retry(read_retry)
                .with_observer(Box::new(progress))
                .run(&prepared.pipeline)
                .await
        };

        if config.output.format == OutputFormat::Summary {
            print_run_summary(&report);
        }
        self.write_json(config, &report)?;

        Ok(if report.status() == RunStatus::Failed {
            ExitCode::FAILURE
        } else {
            ExitCode::SUCCESS
        })
    }

    async fn execute_plan(&self, config: &Config, path: &Path, cancel: &CancelFlag) -> Result<ExitCode> {
        let prepared = self.prepare(config, path, cancel).await?;

        let mut entries = Vec::new();
        for step in &prepared.pipeline.steps {
            let Some(target) = &step.target else {
                continue;
            };
            let unmet = step
                .requires
                .iter()
                .find_map(|key| prepared.credentials.unmet(key));
            let state = match unmet {
                Some(message) => ProbeState::Unknown(message),
                None => target.prober.probe(&target.descriptor).await,
            };
            entries.push(PlanEntry {
                step: step.name.clone(),
                resource: target.descriptor.to_string(),
                state,
            });
        }

        print_plan(&prepared.pipeline.name, &entries);
        Ok(ExitCode::SUCCESS)
    }

    async fn execute_verify(
        &self,
        config: &Config,
        path: &Path,
        results: Option<&Path>,
        cancel: &CancelFlag,
    ) -> Result<ExitCode> {
        let prepared = self.prepare(config, path, cancel).await?;

        let mut reports = Vec::new();
        for step in &prepared.pipeline.steps {
            if step.checks.is_empty() {
                continue;
            }
            info!("Verifying {}", step.name);
            reports.push((step.name.clone(), verify(&step.checks).await));
        }

        if config.output.format == OutputFormat::Summary {
            print_verification(&prepared.pipeline.name, &reports);
        }
        self.write_json(config, &reports)?;
        if let Some(results) = results {
            write_results(results, &reports)
                .with_context(|| format!("Failed to write {}", results.display()))?;
            info!("Results written to: {}", results.display());
        }

        if reports.iter().all(|(_, report)| report.all_passed()) {
            info!("All checks of {} passed", prepared.pipeline.name);
        }

        let gating_failed = reports
            .iter()
            .any(|(_, report)| !report.gating_failures().is_empty());
        Ok(if gating_failed {
            ExitCode::FAILURE
        } else {
            ExitCode::SUCCESS
        })
    }

    async fn execute_resolve(
        &self,
        config: &Config,
        keys: &[String],
        persist: bool,
        cancel: &CancelFlag,
    ) -> Result<ExitCode> {
        let requests: Vec<CredentialRequest> = keys
            .iter()
            .map(|key| {
                let request = CredentialRequest::required(key.as_str());
                if is_secret_key(key) {
                    request.secret()
                } else {
                    request
                }
            })
            .collect();

        let cluster = Self::cluster_client(config);
        let credentials = self
            .resolver(config, &cluster, persist, cancel)
            .resolve_all(&requests)
            .await;

        print_credentials(&credentials);
        Ok(if credentials.failures().next().is_some() {
            ExitCode::FAILURE
        } else {
            ExitCode::SUCCESS
        })
    }

    fn execute_init(path: &Path, force: bool) -> Result<ExitCode> {
        if path.exists() && !force {
            bail!("{} already exists (use --force to overwrite)", path.display());
        }
        Config::default().save(path)?;
        info!("Default configuration written to: {}", path.display());
        Ok(ExitCode::SUCCESS)
    }

    pub async fn execute(&self, cancel: CancelFlag) -> Result<ExitCode> {
        if let Commands::Init { path, force } = &self.command {
            return Self::execute_init(path, *force);
        }

        let config = Config::load(self.config.as_deref())?;
        match &self.command {
            Commands::Run { manifest } => self.execute_run(&config, manifest, cancel).await,
            Commands::Plan { manifest } => self.execute_plan(&config, manifest, &cancel).await,
            Commands::Verify { manifest, results } => {
                self.execute_verify(&config, manifest, results.as_deref(), &cancel)
                    .await
            }
            Commands::Resolve { keys, persist } => {
                self.execute_resolve(&config, keys, *persist, &cancel).await
            }
            Commands::Init { path, force } => Self::execute_init(path, *force),
        }
    }
}

/// The Central URL, or `https://` plus the scheme-less address when only
/// that resolved.
fn central_url(config: &Config, credentials: &CredentialSet) -> Option<String> {
    if let Some(url) = credentials.value(&config.central.url_env) {
        return Some(url.as_str().to_string());
    }
    credentials
        .value(&config.central.address_env)
        .map(|address| format!("https://{}", central_address(address.as_str())))
}

/// Keys read without echo when prompted.
fn is_secret_key(key: &str) -> bool {
    ["TOKEN", "PASSWORD", "SECRET", "KEY"]
        .iter()
        .any(|marker| key.to_ascii_uppercase().contains(marker))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run_with_globals() {
        let cli = Cli::try_parse_from([
            "acs-provision",
            "run",
            "pipelines/rbac.yaml",
            "--output",
            "report.json",
            "--pretty",
            "--non-interactive",
        ])
        .unwrap();

        assert!(cli.pretty);
        assert!(cli.non_interactive);
        assert_eq!(cli.output, Some(PathBuf::from("report.json")));
        assert!(matches!(cli.command, Commands::Run { ref manifest } if manifest == Path::new("pipelines/rbac.yaml")));
    }

    #[test]
    fn test_resolve_needs_a_key() {
        assert!(Cli::try_parse_from(["acs-provision", "resolve"]).is_err());
        let cli = Cli::try_parse_from(["acs-provision", "resolve", "ROX_API_TOKEN", "--persist"]).unwrap();
        assert!(matches!(cli.command, Commands::Resolve { ref keys, persist: true } if keys == &["ROX_API_TOKEN"]));
    }

    #[test]
    fn test_parse_verify_with_results_file() {
        let cli = Cli::try_parse_from([
            "acs-provision",
            "verify",
            "pipelines/lab-progress.yaml",
            "--results",
            "results.txt",
        ])
        .unwrap();
        assert!(matches!(
            cli.command,
            Commands::Verify { ref results, .. } if results.as_deref() == Some(Path::new("results.txt"))
        ));
    }

    #[test]
    fn test_central_url_falls_back_to_address() {
        use crate::auth::Token;
        use crate::credentials::{Credential, CredentialSource};

        let config = Config::default();
        let mut credentials = CredentialSet::default();
        assert_eq!(central_url(&config, &credentials), None);

        credentials.insert_resolved(Credential::new(
            "ROX_CENTRAL_ADDRESS",
            Token::from("central.apps.lab:443"),
            CredentialSource::PersistedProfile,
        ));
        assert_eq!(
            central_url(&config, &credentials).as_deref(),
            Some("https://central.apps.lab:443")
        );

        credentials.insert_resolved(Credential::new(
            "ROX_CENTRAL_URL",
            Token::from("https://central.example.com"),
            CredentialSource::Environment,
        ));
        assert_eq!(
            central_url(&config, &credentials).as_deref(),
            Some("https://central.example.com")
        );
    }

    #[test]
    fn test_secret_keys() {
        assert!(is_secret_key("ROX_API_TOKEN"));
        assert!(is_secret_key("rox_admin_password"));
        assert!(!is_secret_key("ROX_CENTRAL_URL"));
    }

    #[test]
    fn test_init_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("acs-provision.toml");

        Cli::execute_init(&path, false).unwrap();
        assert!(Cli::execute_init(&path, false).is_err());
        Cli::execute_init(&path, true).unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.cluster.cli, "oc");
    }
}
