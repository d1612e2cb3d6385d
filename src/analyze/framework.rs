use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Javascript,
    Python,
    Html,
    #[default]
    Unknown,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Framework {
    Next,
    Nuxt,
    Gatsby,
    Angular,
    React,
    Vue,
    Svelte,
    Django,
    Flask,
    Fastapi,
    Streamlit,
    Static,
    #[default]
    Unknown,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageManager {
    Npm,
    Yarn,
    #[default]
    None,
}

/// Fixed build recipe for a framework we know how to ship.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameworkProfile {
    /// `None` means the tree is served as-is.
    pub build_command: Option<&'static str>,
    pub output_dir: &'static str,
}

/// Package names that identify a JavaScript framework, highest
/// precedence first.
const JS_MARKERS: &[(Framework, &[&str])] = &[
    (Framework::Next, &["next"]),
    (Framework::Nuxt, &["nuxt"]),
    (Framework::Gatsby, &["gatsby"]),
    (Framework::Angular, &["@angular/core"]),
    (Framework::React, &["react", "react-dom"]),
    (Framework::Vue, &["vue", "@vue/cli"]),
    (Framework::Svelte, &["svelte"]),
];

const PY_MARKERS: &[(Framework, &str)] = &[
    (Framework::Django, "django"),
    (Framework::Flask, "flask"),
    (Framework::Fastapi, "fastapi"),
    (Framework::Streamlit, "streamlit"),
];

impl Framework {
    /// Build recipe, present only for frameworks that can be deployed.
    #[must_use]
    pub const fn profile(self) -> Option<FrameworkProfile> {
        let (build_command, output_dir) = match self {
            Self::React => (Some("npm run build"), "build"),
            Self::Vue | Self::Angular => (Some("npm run build"), "dist"),
            Self::Next => (Some("npm run build && npm run export"), "out"),
            Self::Gatsby => (Some("npm run build"), "public"),
            Self::Static => (None, "."),
            _ => return None,
        };
        Some(FrameworkProfile {
            build_command,
            output_dir,
        })
    }

    /// Frameworks with a known recipe: react, vue, angular, next,
    /// gatsby, and static.
    #[must_use]
    pub const fn is_supported(self) -> bool {
        self.profile().is_some()
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Next => "next",
            Self::Nuxt => "nuxt",
            Self::Gatsby => "gatsby",
            Self::Angular => "angular",
            Self::React => "react",
            Self::Vue => "vue",
            Self::Svelte => "svelte",
            Self::Django => "django",
            Self::Flask => "flask",
            Self::Fastapi => "fastapi",
            Self::Streamlit => "streamlit",
            Self::Static => "static",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Framework {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Javascript => "javascript",
            Self::Python => "python",
            Self::Html => "html",
            Self::Unknown => "unknown",
        })
    }
}

/// Classify a JavaScript project from its merged dependency names.
pub fn detect_js<F>(has_dependency: F) -> Framework
where
    F: Fn(&str) -> bool,
{
    JS_MARKERS
        .iter()
        .find(|(_, names)| names.iter().any(|n| has_dependency(n)))
        .map_or(Framework::Unknown, |(framework, _)| *framework)
}

/// Classify a Python project by case-insensitive substring search over
/// the raw requirements file.
#[must_use]
pub fn detect_python(requirements: &str) -> Framework {
    let lower = requirements.to_lowercase();
    PY_MARKERS
        .iter()
        .find(|(_, needle)| lower.contains(needle))
        .map_or(Framework::Unknown, |(framework, _)| *framework)
}
