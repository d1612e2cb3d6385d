use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use super::{CLOUD_PAGE_SIZE, ObjectBody, ObjectPage, ObjectProps, StorageBackend};
use crate::cmd::Cmd;
use crate::credentials::Credentials;
use crate::error::{DeployError, DeployResult};

pub const DEFAULT_REGION: &str = "us-east-1";

const PROVIDER: &str = "aws";

/// Served by the website endpoint for missing keys.
pub const ERROR_DOCUMENT: &str = "error.html";

/// S3 access through the `aws` CLI.
///
/// Credentials are handed to the CLI through its environment, never
/// on the command line.
pub struct AwsCliBackend {
    access_key_id: String,
    secret_access_key: String,
    session_token: Option<String>,
    region: String,
}

impl AwsCliBackend {
    pub fn from_credentials(credentials: &Credentials) -> DeployResult<Self> {
        let missing = credentials.missing(&["access_key_id", "secret_access_key"]);
        if !missing.is_empty() {
            return Err(DeployError::InvalidCredentials {
                provider: PROVIDER.into(),
                reason: format!("missing {}", missing.join(", ")),
            });
        }
        Ok(Self {
            access_key_id: credentials.get("access_key_id").unwrap_or_default().to_string(),
            secret_access_key: credentials
                .get("secret_access_key")
                .unwrap_or_default()
                .to_string(),
            session_token: credentials.get("session_token").map(String::from),
            region: region_of(credentials).to_string(),
        })
    }

    #[must_use]
    pub fn region(&self) -> &str {
        &self.region
    }

    fn s3api(&self, subcommand: &str) -> Cmd {
        let mut cmd = Cmd::new("aws")
            .args(["s3api", subcommand, "--region", self.region.as_str(), "--output", "json"])
            .env("AWS_ACCESS_KEY_ID", &self.access_key_id)
            .env("AWS_SECRET_ACCESS_KEY", &self.secret_access_key)
            .env("AWS_PAGER", "");
        if let Some(token) = &self.session_token {
            cmd = cmd.env("AWS_SESSION_TOKEN", token);
        }
        cmd
    }

    async fn call(cmd: Cmd) -> DeployResult<String> {
        debug!(command = %cmd.display(), "aws");
        cmd.output()
            .await
            .map(|o| o.stdout)
            .map_err(|e| match e {
                DeployError::CommandFailed { stderr, .. } => DeployError::provider(PROVIDER, stderr),
                other => other,
            })
    }
}

/// Region from the credential bag, `us-east-1` when absent.
#[must_use]
pub fn region_of(credentials: &Credentials) -> &str {
    credentials.get("region").unwrap_or(DEFAULT_REGION)
}

fn is_collision(stderr: &str) -> bool {
    stderr.contains("BucketAlreadyExists") || stderr.contains("BucketAlreadyOwnedByYou")
}

fn is_missing_key(stderr: &str) -> bool {
    stderr.contains("NoSuchKey") || stderr.contains("404") || stderr.contains("Not Found")
}

pub(crate) fn website_config() -> String {
    json!({
        "IndexDocument": { "Suffix": "index.html" },
        "ErrorDocument": { "Key": ERROR_DOCUMENT }
    })
    .to_string()
}

pub(crate) fn public_read_policy(bucket: &str) -> String {
    json!({
        "Version": "2012-10-17",
        "Statement": [{
            "Sid": "PublicReadGetObject",
            "Effect": "Allow",
            "Principal": "*",
            "Action": "s3:GetObject",
            "Resource": format!("arn:aws:s3:::{bucket}/*")
        }]
    })
    .to_string()
}

pub(crate) fn parse_bucket_names(output: &str) -> DeployResult<Vec<String>> {
    if output.trim().is_empty() {
        return Ok(Vec::new());
    }
    let parsed: serde_json::Value = serde_json::from_str(output)?;
    Ok(parsed["Buckets"]
        .as_array()
        .map(|buckets| {
            buckets
                .iter()
                .filter_map(|b| b["Name"].as_str())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default())
}

pub(crate) fn parse_object_page(output: &str) -> DeployResult<ObjectPage> {
    if output.trim().is_empty() {
        return Ok(ObjectPage::default());
    }
    let parsed: serde_json::Value = serde_json::from_str(output)?;
    let keys = parsed["Contents"]
        .as_array()
        .map(|objects| {
            objects
                .iter()
                .filter_map(|o| o["Key"].as_str())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default();
    let next = parsed["NextToken"].as_str().map(String::from);
    Ok(ObjectPage { keys, next })
}

pub(crate) fn delete_request(keys: &[String]) -> String {
    let objects: Vec<_> = keys.iter().map(|k| json!({ "Key": k })).collect();
    json!({ "Objects": objects, "Quiet": true }).to_string()
}

pub(crate) fn parse_delete_errors(output: &str) -> DeployResult<Vec<String>> {
    if output.trim().is_empty() {
        return Ok(Vec::new());
    }
    let parsed: serde_json::Value = serde_json::from_str(output)?;
    Ok(parsed["Errors"]
        .as_array()
        .map(|errors| {
            errors
                .iter()
                .filter_map(|e| e["Key"].as_str())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default())
}

#[async_trait]
impl StorageBackend for AwsCliBackend {
    async fn create_container(&self, name: &str) -> DeployResult<()> {
        let mut cmd = self.s3api("create-bucket").args(["--bucket", name]);
        if self.region != DEFAULT_REGION {
            cmd = cmd.args([
                "--create-bucket-configuration".to_string(),
                format!("LocationConstraint={}", self.region),
            ]);
        }
        match cmd.output().await {
            Ok(_) => Ok(()),
            Err(DeployError::CommandFailed { stderr, .. }) if is_collision(&stderr) => {
                Err(DeployError::NameCollision(name.to_string()))
            }
            Err(DeployError::CommandFailed { stderr, .. }) => {
                Err(DeployError::provider(PROVIDER, stderr))
            }
            Err(e) => Err(e),
        }
    }

    async fn publish_container(&self, name: &str) -> DeployResult<()> {
        Self::call(self.s3api("delete-public-access-block").args(["--bucket", name])).await?;
        Self::call(self.s3api("put-bucket-website").args([
            "--bucket",
            name,
            "--website-configuration",
            website_config().as_str(),
        ]))
        .await?;
        Self::call(self.s3api("put-bucket-policy").args([
            "--bucket",
            name,
            "--policy",
            public_read_policy(name).as_str(),
        ]))
        .await?;
        Ok(())
    }

    async fn list_containers(&self) -> DeployResult<Vec<String>> {
        let output = Self::call(self.s3api("list-buckets")).await?;
        parse_bucket_names(&output)
    }

    async fn put_object(
        &self,
        container: &str,
        key: &str,
        body: ObjectBody,
        props: &ObjectProps,
    ) -> DeployResult<()> {
        let mut cmd = self.s3api("put-object").args([
            "--bucket",
            container,
            "--key",
            key,
            "--content-type",
            props.content_type.as_str(),
        ]);
        if let Some(cache) = &props.cache_control {
            cmd = cmd.args(["--cache-control", cache.as_str()]);
        }
        cmd = match body {
            ObjectBody::File(path) => cmd.arg("--body").arg(path.to_string_lossy()),
            ObjectBody::Bytes(data) => cmd.args(["--body", "/dev/stdin"]).stdin(data),
        };
        Self::call(cmd).await.map(drop)
    }

    async fn get_object(&self, container: &str, key: &str) -> DeployResult<Option<Vec<u8>>> {
        let cmd = Cmd::new("aws")
            .args(["s3", "cp", format!("s3://{container}/{key}").as_str(), "-"])
            .args(["--region", self.region.as_str()])
            .env("AWS_ACCESS_KEY_ID", &self.access_key_id)
            .env("AWS_SECRET_ACCESS_KEY", &self.secret_access_key);
        let cmd = match &self.session_token {
            Some(token) => cmd.env("AWS_SESSION_TOKEN", token),
            None => cmd,
        };
        match cmd.output().await {
            Ok(out) => Ok(Some(out.stdout.into_bytes())),
            Err(DeployError::CommandFailed { stderr, .. }) if is_missing_key(&stderr) => Ok(None),
            Err(DeployError::CommandFailed { stderr, .. }) => {
                Err(DeployError::provider(PROVIDER, stderr))
            }
            Err(e) => Err(e),
        }
    }

    async fn list_objects(&self, container: &str, token: Option<&str>) -> DeployResult<ObjectPage> {
        let mut cmd = self.s3api("list-objects-v2").args([
            "--bucket".to_string(),
            container.to_string(),
            "--max-items".to_string(),
            CLOUD_PAGE_SIZE.to_string(),
        ]);
        if let Some(token) = token {
            cmd = cmd.args(["--starting-token", token]);
        }
        let output = Self::call(cmd).await?;
        parse_object_page(&output)
    }

    async fn delete_objects(&self, container: &str, keys: &[String]) -> DeployResult<Vec<String>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let cmd = self
            .s3api("delete-objects")
            .args(["--bucket", container, "--delete", "file:///dev/stdin"])
            .stdin(delete_request(keys).into_bytes());
        let output = Self::call(cmd).await?;
        parse_delete_errors(&output)
    }

    async fn delete_container(&self, name: &str) -> DeployResult<()> {
        Self::call(self.s3api("delete-bucket").args(["--bucket", name]))
            .await
            .map(drop)
    }
}
