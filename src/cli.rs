//! Command-line front end.
//!
//! Progress goes to stderr; results are printed to stdout as JSON.

use std::path::PathBuf;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use crate::api::{
    AnalyzeResponse, DEFAULT_BRANCH, DEFAULT_LIST_LIMIT, DeployRequest, DeployResponse,
    ListResponse, StatusResponse,
};
use crate::config::Config;
use crate::coordinator::Coordinator;
use crate::credentials::Credentials;
use crate::model::{DeploymentId, DeploymentStatus, ProjectId};

#[derive(Parser)]
#[command(name = "rampa")]
#[command(about = "Build a repository and publish it as a static site")]
pub struct Cli {
    /// Configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Clone and analyze a repository
    Analyze {
        /// Repository URL
        repo: String,

        /// Branch to check out
        #[arg(long, default_value = DEFAULT_BRANCH)]
        branch: String,

        /// Analyze this local checkout instead of cloning
        #[arg(long)]
        path: Option<PathBuf>,
    },

    /// Build and publish an analyzed project
    Deploy {
        /// Project id from `analyze`
        project_id: String,

        /// Target provider (see `providers`)
        #[arg(long)]
        provider: String,

        /// Credential as key=value, repeatable
        #[arg(short = 'c', long = "credential", value_parser = Credentials::parse_pair)]
        credentials: Vec<(String, String)>,

        /// Custom domain served by the deployment
        #[arg(long)]
        domain: Option<String>,
    },

    /// Show a deployment and its log
    Status {
        /// Deployment id
        id: String,
    },

    /// List recent deployments
    List {
        #[arg(long, default_value_t = DEFAULT_LIST_LIMIT)]
        limit: usize,

        #[arg(long, default_value_t = 0)]
        offset: usize,
    },

    /// List available providers
    Providers,

    /// Ask the provider about a deployment's remote container
    RemoteStatus {
        /// Deployment id
        id: String,

        /// Credential as key=value, repeatable
        #[arg(short = 'c', long = "credential", value_parser = Credentials::parse_pair)]
        credentials: Vec<(String, String)>,
    },

    /// Delete a deployment's remote container
    Teardown {
        /// Deployment id
        id: String,

        /// Credential as key=value, repeatable
        #[arg(short = 'c', long = "credential", value_parser = Credentials::parse_pair)]
        credentials: Vec<(String, String)>,
    },

    /// Delete old finished deployment records
    Prune {
        /// Keep records younger than this many days
        #[arg(long)]
        days: Option<u32>,
    },
}

impl Cli {
    /// Configuration from `--config`, or `rampa.toml` when absent.
    pub fn load_config(&self) -> anyhow::Result<Config> {
        let config = match &self.config {
            Some(path) => Config::load_from(path),
            None => Config::load(),
        };
        config.context("loading configuration")
    }

    /// Dispatch the parsed command.
    pub async fn run(self, config: &Config) -> anyhow::Result<()> {
        let coordinator = Coordinator::from_config(config)
            .await
            .context("opening record store")?;

        match self.command {
            Command::Analyze { repo, branch, path } => {
                eprintln!("Analyzing {repo} ({branch})...");
                let project = match path {
                    Some(path) => coordinator.analyze_path(&repo, &branch, path).await?,
                    None => coordinator.analyze(&repo, &branch).await?,
                };
                let response = AnalyzeResponse::from(&project);
                eprintln!("{}", response.message);
                print_json(&response)?;
            }
            Command::Deploy {
                project_id,
                provider,
                credentials,
                domain,
            } => {
                let request = DeployRequest {
                    project_id: ProjectId::new(project_id),
                    provider,
                    credentials: credentials.into_iter().collect(),
                    custom_domain: domain,
                };
                let id = coordinator.deploy(request).await?;
                eprintln!("Deployment {id} started, waiting for it to finish...");
                print_json(&DeployResponse::started(id.clone()))?;

                let deployment = coordinator.wait(&id).await?;
                for entry in &deployment.logs {
                    eprintln!("  [{}] {}", entry.timestamp.format("%H:%M:%S"), entry.message);
                }
                print_json(&StatusResponse::from(&deployment))?;
                if deployment.status == DeploymentStatus::Failed {
                    bail!("deployment {id} failed");
                }
            }
            Command::Status { id } => {
                let deployment = coordinator.status(&DeploymentId::new(id)).await?;
                print_json(&StatusResponse::from(&deployment))?;
            }
            Command::List { limit, offset } => {
                let page = coordinator.list(offset, limit).await?;
                print_json(&ListResponse::from(page))?;
            }
            Command::Providers => {
                for name in coordinator.providers().names() {
                    println!("{name}");
                }
            }
            Command::RemoteStatus { id, credentials } => {
                let creds: Credentials = credentials.into_iter().collect();
                let status = coordinator
                    .remote_status(&DeploymentId::new(id), &creds)
                    .await?;
                print_json(&status)?;
            }
            Command::Teardown { id, credentials } => {
                let creds: Credentials = credentials.into_iter().collect();
                let id = DeploymentId::new(id);
                eprintln!("Tearing down {id}...");
                if !coordinator.teardown(&id, &creds).await? {
                    bail!("teardown of {id} did not complete, see log for details");
                }
                eprintln!("Remote container removed.");
            }
            Command::Prune { days } => {
                let retention = days.map_or_else(
                    || config.deploy.retention(),
                    |d| chrono::Duration::days(i64::from(d)),
                );
                let removed = coordinator.prune(retention).await?;
                eprintln!("Removed {removed} deployment record(s).");
            }
        }
        Ok(())
    }
}

/// Install the fmt subscriber. `RUST_LOG` wins over `level`.
pub fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("rampa={level}")));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
