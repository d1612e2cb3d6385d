use std::path::Path;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use super::{CLOUD_PAGE_SIZE, ObjectBody, ObjectPage, ObjectProps, StorageBackend};
use crate::cmd::Cmd;
use crate::credentials::Credentials;
use crate::error::{DeployError, DeployResult};

const PROVIDER: &str = "azure";

pub const SERVICE_PRINCIPAL_KEYS: &[&str] = &[
    "tenant_id",
    "client_id",
    "client_secret",
    "subscription_id",
    "storage_account",
];

#[derive(Debug, Clone)]
enum Auth {
    ConnectionString(String),
    ServicePrincipal {
        tenant_id: String,
        client_id: String,
        client_secret: String,
        subscription_id: String,
    },
}

/// Blob storage access through the `az` CLI.
///
/// Service principal sessions log in once into a private
/// `AZURE_CONFIG_DIR` so the operator's own `az` login is untouched.
/// Each backend gets its own directory, removed when it is dropped.
pub struct AzureCliBackend {
    auth: Auth,
    account: String,
    program: String,
    config_dir: TempDir,
    login: OnceCell<()>,
}

impl AzureCliBackend {
    pub fn from_credentials(credentials: &Credentials) -> DeployResult<Self> {
        if let Some(conn) = credentials.get("connection_string") {
            let account = account_from_connection_string(conn).ok_or_else(|| {
                DeployError::InvalidCredentials {
                    provider: PROVIDER.into(),
                    reason: "connection string has no AccountName".into(),
                }
            })?;
            return Self::new(Auth::ConnectionString(conn.to_string()), account);
        }

        let missing = credentials.missing(SERVICE_PRINCIPAL_KEYS);
        if !missing.is_empty() {
            return Err(DeployError::InvalidCredentials {
                provider: PROVIDER.into(),
                reason: format!("missing connection_string or {}", missing.join(", ")),
            });
        }

        let value = |key: &str| credentials.get(key).unwrap_or_default().to_string();
        let auth = Auth::ServicePrincipal {
            tenant_id: value("tenant_id"),
            client_id: value("client_id"),
            client_secret: value("client_secret"),
            subscription_id: value("subscription_id"),
        };
        Self::new(auth, value("storage_account"))
    }

    fn new(auth: Auth, account: String) -> DeployResult<Self> {
        let config_dir = tempfile::Builder::new().prefix("rampa-az-").tempdir()?;
        Ok(Self {
            auth,
            account,
            program: "az".to_string(),
            config_dir,
            login: OnceCell::new(),
        })
    }

    /// Run a specific `az` executable instead of the one on `PATH`.
    #[must_use]
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    #[must_use]
    pub fn account(&self) -> &str {
        &self.account
    }

    #[must_use]
    pub fn config_dir(&self) -> &Path {
        self.config_dir.path()
    }

    async fn ensure_login(&self) -> DeployResult<()> {
        let Auth::ServicePrincipal {
            tenant_id,
            client_id,
            client_secret,
            subscription_id,
        } = &self.auth
        else {
            return Ok(());
        };

        self.login
            .get_or_try_init(|| async {
                info!(account = %self.account, "logging in to azure");
                self.az()
                    .args(["login", "--service-principal", "--output", "none"])
                    .args(["--username", client_id.as_str(), "--tenant", tenant_id.as_str()])
                    .arg("--password")
                    .secret_arg(client_secret.as_str())
                    .output()
                    .await
                    .map_err(login_failure)?;
                self.az()
                    .args(["account", "set", "--subscription", subscription_id.as_str()])
                    .output()
                    .await?;
                Ok::<(), DeployError>(())
            })
            .await
            .map(drop)
    }

    fn az(&self) -> Cmd {
        Cmd::new(&self.program)
            .env("AZURE_CONFIG_DIR", &self.config_dir.path().to_string_lossy())
            .env("AZURE_CORE_ONLY_SHOW_ERRORS", "true")
    }

    /// `az storage <args>` with the account's auth attached.
    async fn storage(&self, args: &[&str]) -> DeployResult<Cmd> {
        self.ensure_login().await?;
        let cmd = self.az().arg("storage").args(args.iter().copied());
        Ok(match &self.auth {
            Auth::ConnectionString(conn) => cmd.env("AZURE_STORAGE_CONNECTION_STRING", conn),
            Auth::ServicePrincipal { .. } => {
                cmd.args(["--account-name", self.account.as_str(), "--auth-mode", "login"])
            }
        })
    }

    async fn call(cmd: Cmd) -> DeployResult<String> {
        debug!(command = %cmd.display(), "az");
        cmd.output()
            .await
            .map(|o| o.stdout)
            .map_err(|e| match e {
                DeployError::CommandFailed { stderr, .. } => DeployError::provider(PROVIDER, stderr),
                other => other,
            })
    }
}

/// Only the CLI's own message is kept. The command line never reaches
/// the error.
fn login_failure(err: DeployError) -> DeployError {
    let reason = match err {
        DeployError::CommandFailed { stderr, .. } => stderr,
        DeployError::CommandNotFound(program) => format!("{program} not found"),
        DeployError::CommandTimeout { limit, .. } => format!("az login timed out after {limit:?}"),
        _ => "az login failed".to_string(),
    };
    DeployError::InvalidCredentials {
        provider: PROVIDER.into(),
        reason,
    }
}

/// `AccountName` field of a storage connection string.
#[must_use]
pub fn account_from_connection_string(conn: &str) -> Option<String> {
    conn.split(';')
        .filter_map(|part| part.split_once('='))
        .find(|(k, _)| k.trim().eq_ignore_ascii_case("AccountName"))
        .map(|(_, v)| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub(crate) fn parse_flag(output: &str, field: &str) -> DeployResult<bool> {
    let parsed: serde_json::Value = serde_json::from_str(output)?;
    Ok(parsed[field].as_bool().unwrap_or(false))
}

pub(crate) fn parse_container_names(output: &str) -> DeployResult<Vec<String>> {
    if output.trim().is_empty() {
        return Ok(Vec::new());
    }
    let parsed: serde_json::Value = serde_json::from_str(output)?;
    Ok(parsed
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|c| c["name"].as_str())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default())
}

/// With `--show-next-marker` the CLI appends `{"nextMarker": ...}` to
/// the blob array.
pub(crate) fn parse_blob_page(output: &str) -> DeployResult<ObjectPage> {
    if output.trim().is_empty() {
        return Ok(ObjectPage::default());
    }
    let parsed: serde_json::Value = serde_json::from_str(output)?;
    let mut page = ObjectPage::default();
    for item in parsed.as_array().into_iter().flatten() {
        if let Some(name) = item["name"].as_str() {
            page.keys.push(name.to_string());
        } else if let Some(marker) = item["nextMarker"].as_str() {
            page.next = Some(marker.to_string()).filter(|m| !m.is_empty());
        }
    }
    Ok(page)
}

fn is_missing_blob(stderr: &str) -> bool {
    stderr.contains("BlobNotFound") || stderr.contains("does not exist")
}

#[async_trait]
impl StorageBackend for AzureCliBackend {
    async fn create_container(&self, name: &str) -> DeployResult<()> {
        let cmd = self
            .storage(&["container", "create", "--name", name, "--output", "json"])
            .await?;
        let output = Self::call(cmd).await?;
        if parse_flag(&output, "created")? {
            Ok(())
        } else {
            Err(DeployError::NameCollision(name.to_string()))
        }
    }

    async fn publish_container(&self, name: &str) -> DeployResult<()> {
        let cmd = self
            .storage(&[
                "container",
                "set-permission",
                "--name",
                name,
                "--public-access",
                "blob",
                "--output",
                "none",
            ])
            .await?;
        Self::call(cmd).await.map(drop)
    }

    async fn list_containers(&self) -> DeployResult<Vec<String>> {
        let cmd = self
            .storage(&["container", "list", "--num-results", "*", "--output", "json"])
            .await?;
        parse_container_names(&Self::call(cmd).await?)
    }

    async fn put_object(
        &self,
        container: &str,
        key: &str,
        body: ObjectBody,
        props: &ObjectProps,
    ) -> DeployResult<()> {
        let mut args = vec![
            "blob",
            "upload",
            "--container-name",
            container,
            "--name",
            key,
            "--content-type",
            props.content_type.as_str(),
            "--overwrite",
            "--no-progress",
            "--output",
            "none",
        ];
        if let Some(cache) = &props.cache_control {
            args.extend(["--content-cache-control", cache.as_str()]);
        }
        let cmd = self.storage(&args).await?;
        let cmd = match body {
            ObjectBody::File(path) => cmd.arg("--file").arg(path.to_string_lossy()),
            ObjectBody::Bytes(data) => cmd.args(["--file", "/dev/stdin"]).stdin(data),
        };
        Self::call(cmd).await.map(drop)
    }

    async fn get_object(&self, container: &str, key: &str) -> DeployResult<Option<Vec<u8>>> {
        let cmd = self
            .storage(&[
                "blob",
                "download",
                "--container-name",
                container,
                "--name",
                key,
                "--file",
                "/dev/stdout",
                "--no-progress",
                "--output",
                "none",
            ])
            .await?;
        match cmd.output().await {
            Ok(out) => Ok(Some(out.stdout.into_bytes())),
            Err(DeployError::CommandFailed { stderr, .. }) if is_missing_blob(&stderr) => Ok(None),
            Err(DeployError::CommandFailed { stderr, .. }) => {
                Err(DeployError::provider(PROVIDER, stderr))
            }
            Err(e) => Err(e),
        }
    }

    async fn list_objects(&self, container: &str, token: Option<&str>) -> DeployResult<ObjectPage> {
        let page_size = CLOUD_PAGE_SIZE.to_string();
        let mut args = vec![
            "blob",
            "list",
            "--container-name",
            container,
            "--num-results",
            page_size.as_str(),
            "--show-next-marker",
            "--query",
            "[].{name:name,nextMarker:nextMarker}",
            "--output",
            "json",
        ];
        if let Some(token) = token {
            args.extend(["--marker", token]);
        }
        let cmd = self.storage(&args).await?;
        parse_blob_page(&Self::call(cmd).await?)
    }

    /// The CLI has no keyed batch delete, so keys go one at a time.
    async fn delete_objects(&self, container: &str, keys: &[String]) -> DeployResult<Vec<String>> {
        let mut failed = Vec::new();
        for key in keys {
            let cmd = self
                .storage(&[
                    "blob",
                    "delete",
                    "--container-name",
                    container,
                    "--name",
                    key.as_str(),
                    "--output",
                    "none",
                ])
                .await?;
            if let Err(e) = Self::call(cmd).await {
                debug!(key = %key, error = %e, "blob delete failed");
                failed.push(key.clone());
            }
        }
        Ok(failed)
    }

    async fn delete_container(&self, name: &str) -> DeployResult<()> {
        let cmd = self
            .storage(&["container", "delete", "--name", name, "--output", "json"])
            .await?;
        let output = Self::call(cmd).await?;
        if parse_flag(&output, "deleted")? {
            Ok(())
        } else {
            Err(DeployError::provider(
                PROVIDER,
                format!("container {name} was not deleted"),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_name_from_connection_string() {
        let conn = "DefaultEndpointsProtocol=https;AccountName=sites01;AccountKey=abc==;EndpointSuffix=core.windows.net";
        assert_eq!(account_from_connection_string(conn).as_deref(), Some("sites01"));
        assert!(account_from_connection_string("AccountKey=abc").is_none());
    }

    #[test]
    fn blob_page_reads_marker() {
        let out = r#"[{"name":"index.html","nextMarker":null},{"name":"app.js","nextMarker":null},{"name":null,"nextMarker":"2!abc"}]"#;
        let page = parse_blob_page(out).expect("parse");

        assert_eq!(page.keys, vec!["index.html", "app.js"]);
        assert_eq!(page.next.as_deref(), Some("2!abc"));
    }

    #[test]
    fn create_flag() {
        assert!(parse_flag(r#"{"created": true}"#, "created").expect("parse"));
        assert!(!parse_flag(r#"{"created": false}"#, "created").expect("parse"));
    }

    #[test]
    fn partial_service_principal_rejected() {
        let creds = Credentials::new()
            .with("tenant_id", "t")
            .with("client_id", "c");
        let err = AzureCliBackend::from_credentials(&creds).err();

        assert!(matches!(err, Some(DeployError::InvalidCredentials { .. })));
    }

    fn service_principal() -> Credentials {
        Credentials::new()
            .with("tenant_id", "t")
            .with("client_id", "c")
            .with("client_secret", "s3cr3t-value")
            .with("subscription_id", "sub")
            .with("storage_account", "acct")
    }

    #[test]
    fn each_session_gets_its_own_config_dir() {
        let first = AzureCliBackend::from_credentials(&service_principal()).expect("backend");
        let second = AzureCliBackend::from_credentials(&service_principal()).expect("backend");
        let dir = first.config_dir().to_path_buf();

        assert_ne!(dir, second.config_dir());
        assert!(dir.is_dir());
        drop(first);
        assert!(!dir.exists());
    }

    #[test]
    fn login_failure_keeps_only_cli_message() {
        let err = login_failure(DeployError::CommandFailed {
            command: "az login --password s3cr3t-value".into(),
            code: Some(1),
            stderr: "AADSTS7000215: Invalid client secret".into(),
        });

        match err {
            DeployError::InvalidCredentials { reason, .. } => {
                assert_eq!(reason, "AADSTS7000215: Invalid client secret");
            }
            other => panic!("expected invalid credentials, got {other:?}"),
        }
    }
}
