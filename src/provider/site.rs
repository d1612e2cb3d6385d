//! Publishing a build directory into one storage container.
//!
//! Both providers share this flow: claim a uniquely named container,
//! make it public, upload every file with its content type and cache
//! policy, and finish with a metadata object that later status and
//! teardown calls read back.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::backend::{ObjectBody, ObjectProps, StorageBackend};
use super::{ContainerMetadata, RemoteStatus};
use crate::error::{DeployError, DeployResult};
use crate::model::DeploymentId;

/// Hidden object describing the deployment a container belongs to.
pub const METADATA_KEY: &str = ".deployment-metadata.json";

const CONTAINER_PREFIX: &str = "deploy-";
const UPLOAD_CONCURRENCY: usize = 8;

const CONTENT_TYPES: &[(&str, &str)] = &[
    ("html", "text/html"),
    ("htm", "text/html"),
    ("css", "text/css"),
    ("js", "application/javascript"),
    ("mjs", "application/javascript"),
    ("json", "application/json"),
    ("map", "application/json"),
    ("xml", "application/xml"),
    ("txt", "text/plain"),
    ("md", "text/markdown"),
    ("csv", "text/csv"),
    ("png", "image/png"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("gif", "image/gif"),
    ("svg", "image/svg+xml"),
    ("ico", "image/x-icon"),
    ("webp", "image/webp"),
    ("avif", "image/avif"),
    ("woff", "font/woff"),
    ("woff2", "font/woff2"),
    ("ttf", "font/ttf"),
    ("otf", "font/otf"),
    ("eot", "application/vnd.ms-fontobject"),
    ("pdf", "application/pdf"),
    ("wasm", "application/wasm"),
    ("webmanifest", "application/manifest+json"),
    ("mp4", "video/mp4"),
    ("webm", "video/webm"),
    ("mp3", "audio/mpeg"),
];

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

#[must_use]
pub fn content_type(path: &Path) -> &'static str {
    let Some(ext) = path.extension() else {
        return DEFAULT_CONTENT_TYPE;
    };
    let ext = ext.to_string_lossy().to_lowercase();
    CONTENT_TYPES
        .iter()
        .find(|(e, _)| *e == ext)
        .map_or(DEFAULT_CONTENT_TYPE, |&(_, ct)| ct)
}

/// Long cache for images and fonts, short for text and scripts.
#[must_use]
pub fn cache_control(content_type: &str) -> Option<&'static str> {
    if content_type.starts_with("image/") || content_type.starts_with("font/") {
        Some("max-age=86400")
    } else if content_type.starts_with("text/")
        || content_type == "application/javascript"
        || content_type == "application/json"
    {
        Some("max-age=3600")
    } else {
        None
    }
}

/// `deploy-<short id>-<unix seconds>`, with `-r<n>` on retry `n`.
#[must_use]
pub fn container_name(id: &DeploymentId, attempt: u32) -> String {
    let base = format!(
        "{CONTAINER_PREFIX}{}-{}",
        id.short().to_lowercase(),
        Utc::now().timestamp()
    );
    if attempt == 0 {
        base
    } else {
        format!("{base}-r{attempt}")
    }
}

fn name_prefix(id: &DeploymentId) -> String {
    format!("{CONTAINER_PREFIX}{}-", id.short().to_lowercase())
}

const VCS_DIRS: &[&str] = &[".git", ".hg", ".svn"];

/// Every regular file under `root` as `(key, path)`, keys using
/// forward slashes. Version control directories are skipped.
pub fn collect_files(root: &Path) -> DeployResult<Vec<(String, PathBuf)>> {
    let mut files = Vec::new();
    let walker = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| {
            e.depth() == 0
                || !(e.file_type().is_dir()
                    && VCS_DIRS.contains(&e.file_name().to_string_lossy().as_ref()))
        });
    for entry in walker {
        let entry = entry.map_err(|e| DeployError::Other(format!("walking build output: {e}")))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(root) else {
            continue;
        };
        let key = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        if key == METADATA_KEY {
            continue;
        }
        files.push((key, entry.into_path()));
    }
    Ok(files)
}

/// Inputs for one site upload.
pub struct SiteUpload<'a> {
    pub provider: &'a str,
    pub deployment_id: &'a DeploymentId,
    pub build_dir: &'a Path,
    pub collision_retries: u32,
    pub framework: String,
    pub region: Option<String>,
    pub account: Option<String>,
    pub custom_domain: Option<&'a str>,
}

/// Upload a build directory and return the metadata written with it.
/// `url_for` maps the final container name to the public URL.
pub async fn publish<F>(
    backend: Arc<dyn StorageBackend>,
    upload: SiteUpload<'_>,
    url_for: F,
) -> DeployResult<ContainerMetadata>
where
    F: Fn(&str) -> String + Send,
{
    let files = collect_files(upload.build_dir)?;
    let container = claim_container(
        backend.as_ref(),
        upload.deployment_id,
        upload.collision_retries,
    )
    .await?;
    backend.publish_container(&container).await?;

    info!(
        provider = upload.provider,
        container = %container,
        files = files.len(),
        "uploading site"
    );
    let keys = upload_files(&backend, &container, files).await?;

    let metadata = ContainerMetadata {
        deployment_id: upload.deployment_id.clone(),
        provider: upload.provider.to_string(),
        url: url_for(&container),
        container,
        framework: upload.framework,
        region: upload.region,
        account: upload.account,
        uploaded_files: keys.len() as u64,
        files: keys,
        custom_domain: upload.custom_domain.map(String::from),
        deployed_at: Utc::now(),
    };
    write_metadata(backend.as_ref(), &metadata).await?;
    Ok(metadata)
}

/// Create a fresh container, retrying with a new name on collision.
pub async fn claim_container(
    backend: &dyn StorageBackend,
    id: &DeploymentId,
    retries: u32,
) -> DeployResult<String> {
    let mut attempt = 0;
    loop {
        let name = container_name(id, attempt);
        match backend.create_container(&name).await {
            Ok(()) => return Ok(name),
            Err(DeployError::NameCollision(taken)) if attempt < retries => {
                attempt += 1;
                warn!(name = %taken, attempt, "container name taken, retrying");
            }
            Err(e) => return Err(e),
        }
    }
}

async fn upload_files(
    backend: &Arc<dyn StorageBackend>,
    container: &str,
    files: Vec<(String, PathBuf)>,
) -> DeployResult<Vec<String>> {
    let permits = Arc::new(Semaphore::new(UPLOAD_CONCURRENCY));
    let mut tasks = JoinSet::new();

    for (key, path) in files {
        let backend = Arc::clone(backend);
        let permits = Arc::clone(&permits);
        let container = container.to_string();
        tasks.spawn(async move {
            let _permit = permits
                .acquire_owned()
                .await
                .map_err(|e| DeployError::Other(e.to_string()))?;
            let content_type = content_type(&path);
            let props = ObjectProps {
                content_type: content_type.to_string(),
                cache_control: cache_control(content_type).map(String::from),
            };
            backend
                .put_object(&container, &key, ObjectBody::File(path), &props)
                .await?;
            debug!(key = %key, "uploaded");
            Ok::<_, DeployError>(key)
        });
    }

    let mut keys = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        let key = joined.map_err(|e| DeployError::Other(format!("upload task failed: {e}")))??;
        keys.push(key);
    }
    keys.sort();
    Ok(keys)
}

async fn write_metadata(
    backend: &dyn StorageBackend,
    metadata: &ContainerMetadata,
) -> DeployResult<()> {
    let body = serde_json::to_vec_pretty(metadata)?;
    let props = ObjectProps {
        content_type: "application/json".to_string(),
        cache_control: None,
    };
    backend
        .put_object(
            &metadata.container,
            METADATA_KEY,
            ObjectBody::Bytes(body),
            &props,
        )
        .await
}

async fn read_metadata(backend: &dyn StorageBackend, container: &str) -> Option<ContainerMetadata> {
    let raw = backend.get_object(container, METADATA_KEY).await.ok()??;
    serde_json::from_slice(&raw).ok()
}

/// Find the container holding a deployment. A container whose metadata
/// names the deployment wins over a bare name match.
pub async fn find_container(
    backend: &dyn StorageBackend,
    id: &DeploymentId,
) -> DeployResult<Option<(String, Option<ContainerMetadata>)>> {
    let prefix = name_prefix(id);
    let mut fallback = None;

    for name in backend.list_containers().await? {
        if !name.starts_with(&prefix) {
            continue;
        }
        match read_metadata(backend, &name).await {
            Some(meta) if meta.deployment_id == *id => return Ok(Some((name, Some(meta)))),
            Some(_) => {}
            None => {
                if fallback.is_none() {
                    fallback = Some((name, None));
                }
            }
        }
    }
    Ok(fallback)
}

/// Remote status of a deployment. Backend failures become
/// [`RemoteStatus::Error`].
pub async fn status(backend: &dyn StorageBackend, id: &DeploymentId) -> RemoteStatus {
    match find_container(backend, id).await {
        Ok(Some((container, metadata))) => RemoteStatus::Active {
            container,
            metadata,
        },
        Ok(None) => RemoteStatus::NotFound,
        Err(e) => RemoteStatus::Error {
            message: e.to_string(),
        },
    }
}

/// Delete a deployment's objects page by page, then the container.
/// Returns `false` if nothing matched or any step failed.
pub async fn teardown(backend: &dyn StorageBackend, id: &DeploymentId) -> bool {
    let container = match find_container(backend, id).await {
        Ok(Some((container, _))) => container,
        Ok(None) => {
            warn!(deployment_id = %id, "no container found for deployment");
            return false;
        }
        Err(e) => {
            warn!(deployment_id = %id, error = %e, "container lookup failed");
            return false;
        }
    };

    if let Err(e) = drain(backend, &container).await {
        warn!(container = %container, error = %e, "emptying container failed");
        return false;
    }
    match backend.delete_container(&container).await {
        Ok(()) => {
            info!(container = %container, "container deleted");
            true
        }
        Err(e) => {
            warn!(container = %container, error = %e, "deleting container failed");
            false
        }
    }
}

async fn drain(backend: &dyn StorageBackend, container: &str) -> DeployResult<()> {
    let mut failed = Vec::new();
    let mut token: Option<String> = None;

    loop {
        let page = backend.list_objects(container, token.as_deref()).await?;
        if !page.keys.is_empty() {
            for key in backend.delete_objects(container, &page.keys).await? {
                warn!(container = %container, key = %key, "object not deleted");
                failed.push(key);
            }
        }
        match page.next {
            Some(next) => token = Some(next),
            None => break,
        }
    }

    if failed.is_empty() {
        Ok(())
    } else {
        Err(DeployError::provider(
            "storage",
            format!("{} object(s) could not be deleted", failed.len()),
        ))
    }
}
