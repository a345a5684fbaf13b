//! Remote descriptor types and bundle URL resolution.

use serde::{Deserialize, Serialize};

use crate::config::RevisionScheme;

/// Generic fallback when nothing more specific is offered.
pub const FALLBACK_BUNDLE_PATH: &str = "bundle.js";

/// Descriptor served at `{base_url}info.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointInfo {
    #[serde(default)]
    pub paths: Vec<String>,
    #[serde(default)]
    pub hash: Option<String>,
    pub version: String,
}

impl EndpointInfo {
    /// The revision string compared against the local marker.
    pub fn revision(&self, scheme: RevisionScheme) -> String {
        match (scheme, self.hash.as_deref()) {
            (RevisionScheme::VersionAndHash, Some(hash)) => format!("{}#{}", self.version, hash),
            (RevisionScheme::VersionAndHash, None) => self.version.clone(),
            (RevisionScheme::HashOnly, hash) => hash.unwrap_or_default().to_string(),
        }
    }

    /// Pick the bundle to download, most specific format first.
    ///
    /// An explicit `override_path` always wins. Otherwise the precompiled
    /// bytecode bundle for `bytecode_version` is preferred, then the minified
    /// bundle, then [`FALLBACK_BUNDLE_PATH`].
    pub fn resolve_path(&self, override_path: Option<&str>, bytecode_version: Option<u32>) -> String {
        if let Some(path) = override_path {
            return path.to_string();
        }

        let mut preference = Vec::with_capacity(3);
        if let Some(version) = bytecode_version {
            preference.push(format!("bundle.{version}.hbc"));
        }
        preference.push("bundle.min.js".to_string());

        preference
            .into_iter()
            .find_map(|wanted| {
                self.paths
                    .iter()
                    .find(|path| path.trim_start_matches('/') == wanted)
                    .cloned()
            })
            .unwrap_or_else(|| FALLBACK_BUNDLE_PATH.to_string())
    }
}

/// An available update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateInfo {
    pub url: String,
    pub revision: String,
}

impl UpdateInfo {
    pub fn new(url: impl Into<String>, revision: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            revision: revision.into(),
        }
    }
}

/// Join a relative path onto a base URL, treating the base as a directory.
pub fn join_url(base: &str, path: &str) -> String {
    let path = path.trim_start_matches('/');
    if base.ends_with('/') {
        format!("{base}{path}")
    } else {
        format!("{base}/{path}")
    }
}
