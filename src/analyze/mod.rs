//! Project detection: what a checked-out repository contains and how
//! to build it.
//!
//! Detectors run in a fixed order and the first manifest found wins:
//! `package.json`, then `requirements.txt`, then `index.html`. A tree
//! matching none of them is a valid outcome with an unknown language.
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use rampa::analyze::{Framework, ProjectAnalyzer};
//!
//! let analysis = ProjectAnalyzer::new().analyze(Path::new("./my-site"));
//! if analysis.framework == Framework::React {
//!     assert_eq!(analysis.output_directory, "build");
//! }
//! ```

pub mod framework;
pub mod tree;

use std::fs;
use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{DeployError, DeployResult};

pub use framework::{Framework, FrameworkProfile, Language, PackageManager};
pub use tree::FileStats;

pub const PACKAGE_JSON: &str = "package.json";
pub const YARN_LOCK: &str = "yarn.lock";
pub const PACKAGE_LOCK: &str = "package-lock.json";
pub const REQUIREMENTS_TXT: &str = "requirements.txt";
pub const SETUP_PY: &str = "setup.py";
pub const INDEX_HTML: &str = "index.html";

/// Output directory assumed when the framework has no table entry.
pub const DEFAULT_OUTPUT_DIR: &str = "build";

/// Everything the analyzer learned about a repository.
///
/// `build_command` is `Some` exactly when the framework is a
/// recognized non-static one. A populated `error` means the tree
/// could not be inspected and the project is unsupported.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Analysis {
    pub language: Language,
    pub framework: Framework,
    pub build_command: Option<String>,
    pub output_directory: String,
    pub package_manager: PackageManager,
    pub is_static_site: bool,
    pub dependencies: IndexMap<String, String>,
    pub scripts: IndexMap<String, String>,
    pub node_version: Option<String>,
    pub has_requirements: bool,
    pub has_setup_py: bool,
    pub has_css: bool,
    pub has_js: bool,
    pub files: FileStats,
    pub warnings: Vec<String>,
    pub error: Option<String>,
}

impl Default for Analysis {
    fn default() -> Self {
        Self {
            language: Language::Unknown,
            framework: Framework::Unknown,
            build_command: None,
            output_directory: DEFAULT_OUTPUT_DIR.to_string(),
            package_manager: PackageManager::None,
            is_static_site: false,
            dependencies: IndexMap::new(),
            scripts: IndexMap::new(),
            node_version: None,
            has_requirements: false,
            has_setup_py: false,
            has_css: false,
            has_js: false,
            files: FileStats::default(),
            warnings: Vec::new(),
            error: None,
        }
    }
}

impl Analysis {
    /// An analysis that could not be completed.
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::default()
        }
    }

    /// True when the framework has a known recipe and nothing went
    /// wrong while inspecting the tree.
    #[must_use]
    pub const fn supported(&self) -> bool {
        self.error.is_none() && self.framework.is_supported()
    }

    fn apply_profile(&mut self) {
        match self.framework.profile() {
            Some(profile) => {
                self.build_command = profile.build_command.map(String::from);
                self.output_directory = profile.output_dir.to_string();
                self.is_static_site = true;
            }
            None => {
                self.build_command = None;
                self.output_directory = DEFAULT_OUTPUT_DIR.to_string();
                self.is_static_site = false;
            }
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct PackageManifest {
    dependencies: IndexMap<String, String>,
    dev_dependencies: IndexMap<String, String>,
    scripts: IndexMap<String, String>,
    engines: IndexMap<String, String>,
}

/// Inspects repository trees. Read-only and deterministic.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProjectAnalyzer;

impl ProjectAnalyzer {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Never fails: problems end up in [`Analysis::error`] or
    /// [`Analysis::warnings`].
    #[must_use]
    pub fn analyze(&self, repo: &Path) -> Analysis {
        match Self::try_analyze(repo) {
            Ok(analysis) => {
                info!(
                    path = %repo.display(),
                    language = %analysis.language,
                    framework = %analysis.framework,
                    files = analysis.files.total_files,
                    "analysis complete"
                );
                analysis
            }
            Err(e) => {
                warn!(path = %repo.display(), error = %e, "analysis failed");
                Analysis::failed(e.to_string())
            }
        }
    }

    fn try_analyze(repo: &Path) -> DeployResult<Analysis> {
        if !repo.is_dir() {
            return Err(DeployError::Analysis(format!(
                "not a directory: {}",
                repo.display()
            )));
        }

        let mut analysis = Analysis {
            files: tree::scan(repo),
            ..Analysis::default()
        };

        if repo.join(PACKAGE_JSON).is_file() {
            detect_javascript(repo, &mut analysis);
        } else if repo.join(REQUIREMENTS_TXT).is_file() {
            detect_python(repo, &mut analysis);
        } else if repo.join(INDEX_HTML).is_file() {
            detect_static(repo, &mut analysis);
        } else {
            debug!(path = %repo.display(), "no manifest found");
        }

        analysis.apply_profile();
        Ok(analysis)
    }
}

fn detect_javascript(repo: &Path, analysis: &mut Analysis) {
    analysis.language = Language::Javascript;
    analysis.package_manager = if repo.join(YARN_LOCK).is_file() {
        PackageManager::Yarn
    } else {
        PackageManager::Npm
    };

    let manifest = match read_manifest(&repo.join(PACKAGE_JSON)) {
        Ok(m) => m,
        Err(reason) => {
            warn!(path = %repo.display(), %reason, "unreadable package.json");
            analysis.warnings.push(format!("package.json: {reason}"));
            return;
        }
    };

    let mut dependencies = manifest.dependencies;
    dependencies.extend(manifest.dev_dependencies);

    analysis.framework = framework::detect_js(|name| dependencies.contains_key(name));
    analysis.node_version = Some(
        manifest
            .engines
            .get("node")
            .cloned()
            .unwrap_or_else(|| "unknown".to_string()),
    );
    analysis.scripts = manifest.scripts;
    analysis.dependencies = dependencies;
}

fn read_manifest(path: &Path) -> Result<PackageManifest, String> {
    let raw = fs::read(path).map_err(|e| e.to_string())?;
    serde_json::from_slice(&raw).map_err(|e| e.to_string())
}

fn detect_python(repo: &Path, analysis: &mut Analysis) {
    analysis.language = Language::Python;
    analysis.has_requirements = true;
    analysis.has_setup_py = repo.join(SETUP_PY).is_file();

    let raw = match fs::read(repo.join(REQUIREMENTS_TXT)) {
        Ok(raw) => raw,
        Err(e) => {
            warn!(path = %repo.display(), error = %e, "unreadable requirements.txt");
            analysis.warnings.push(format!("requirements.txt: {e}"));
            return;
        }
    };
    let content = String::from_utf8_lossy(&raw);

    analysis.framework = framework::detect_python(&content);
    analysis.dependencies = content.lines().filter_map(parse_requirement).collect();
}

/// Split one `requirements.txt` line into name and version spec.
/// Comments, blank lines, and pip options yield `None`.
fn parse_requirement(line: &str) -> Option<(String, String)> {
    let line = line.split('#').next()?.trim();
    if line.is_empty() || line.starts_with('-') {
        return None;
    }

    let split = line
        .find(|c: char| matches!(c, '=' | '<' | '>' | '!' | '~' | ';' | '[' | '@') || c.is_whitespace())
        .unwrap_or(line.len());
    let name = line[..split].trim();
    if name.is_empty() {
        return None;
    }

    let mut rest = line[split..].trim_start();
    if rest.starts_with('[') {
        rest = rest.find(']').map_or("", |end| rest[end + 1..].trim_start());
    }

    let spec = if rest.is_empty() { "*" } else { rest };
    Some((name.to_string(), spec.to_string()))
}

fn detect_static(repo: &Path, analysis: &mut Analysis) {
    analysis.language = Language::Html;
    analysis.framework = Framework::Static;

    let entries = match fs::read_dir(repo) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(path = %repo.display(), error = %e, "unreadable site directory");
            analysis.warnings.push(format!("site directory: {e}"));
            return;
        }
    };
    for entry in entries {
        let Ok(entry) = entry else { continue };
        let name = entry.file_name().to_string_lossy().to_lowercase();
        if name.ends_with(".css") {
            analysis.has_css = true;
        } else if name.ends_with(".js") {
            analysis.has_js = true;
        }
    }
}
