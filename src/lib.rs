//! Analyze, build, and ship static sites to cloud object storage.
//!
//! Rampa takes a Git repository, works out which frontend framework it
//! uses and how to build it, runs the build, and publishes the output
//! to a public storage container on AWS S3 or Azure Blob Storage.
//!
//! The name comes from Portuguese for *ramp*: the short slope from a
//! repository to a live site.
//!
//! # Overview
//!
//! A deployment passes through these pieces:
//!
//! - [`ProjectAnalyzer`] inspects a checkout and produces an
//!   [`Analysis`] (language, framework, build command, output
//!   directory, file statistics)
//! - [`BuildExecutor`] installs dependencies and runs the build
//!   command, returning the output directory
//! - a [`StorageProvider`](provider::StorageProvider) such as [`S3`] or
//!   [`AzureBlob`] uploads that directory into a fresh public container
//! - [`Coordinator`] ties them together, runs each deployment on a
//!   background task, and keeps every [`Deployment`] record with its
//!   log in a [`RecordStore`](store::RecordStore)
//!
//! # Example
//!
//! Deploying a checked-out static site with an in-memory store:
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use rampa::api::DeployRequest;
//! use rampa::store::MemoryStore;
//! use rampa::{BuildExecutor, Coordinator, Credentials, ProviderRegistry};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let coordinator = Coordinator::new(
//!         Arc::new(MemoryStore::new()),
//!         BuildExecutor::new(Duration::from_secs(600)),
//!         ProviderRegistry::with_defaults(),
//!     );
//!
//!     let project = coordinator
//!         .analyze_path("https://example.com/site.git", "main", "./site".into())
//!         .await?;
//!
//!     let id = coordinator
//!         .deploy(DeployRequest {
//!             project_id: project.id,
//!             provider: "aws".into(),
//!             credentials: Credentials::new()
//!                 .with("access_key_id", "AKIA...")
//!                 .with("secret_access_key", "...")
//!                 .with("region", "eu-west-1"),
//!             custom_domain: None,
//!         })
//!         .await?;
//!
//!     let deployment = coordinator.wait(&id).await?;
//!     println!("{:?} {:?}", deployment.status, deployment.url());
//!     Ok(())
//! }
//! ```
//!
//! From the command line:
//!
//! ```sh
//! rampa analyze https://github.com/acme/site.git --branch main
//! rampa deploy <project-id> --provider aws \
//!     -c access_key_id=AKIA... -c secret_access_key=... -c region=eu-west-1
//! rampa status <deployment-id>
//! rampa teardown <deployment-id> -c access_key_id=AKIA... -c secret_access_key=...
//! ```

// Allow noisy pedantic lints that don't add value for a
// deployment tool crate.
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions
)]

pub mod analyze;
pub mod api;
pub mod build;
pub mod checkout;
pub mod cli;
pub mod cmd;
pub mod config;
pub mod coordinator;
pub mod credentials;
pub mod error;
pub mod model;
pub mod provider;
pub mod store;

pub use analyze::{Analysis, Framework, Language, PackageManager, ProjectAnalyzer};
pub use build::BuildExecutor;
pub use config::Config;
pub use coordinator::Coordinator;
pub use credentials::Credentials;
pub use error::{DeployError, DeployResult};
pub use model::{Deployment, DeploymentId, DeploymentStatus, Project, ProjectId};
pub use provider::{AzureBlob, ProviderRegistry, S3};
