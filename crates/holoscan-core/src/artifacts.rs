//! Version-keyed artifact manifest.
//!
//! The manifest maps each supported SDK release to the images and packages
//! used to build for it:
//!
//! ```json
//! { "3.7.0": { "holoscan": {
//!     "wheel-version": "3.7.0", "debian-version": "3.7.0.1-1",
//!     "base-images": { "dgpu": "...", "igpu": "..." },
//!     "build-images": { "dgpu": { "x64-workstation": "..." } },
//!     "health-probes": { "linux/amd64": "...", "linux/arm64": "..." } } } }
//! ```
//!
//! Load it once per invocation and pass it by reference.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Canonical location of published manifests, one directory per CLI release.
pub const MANIFEST_BASE_URL: &str =
    "https://raw.githubusercontent.com/nvidia-holoscan/holoscan-cli/refs/heads/main/releases";

/// Default manifest file name.
pub const DEFAULT_MANIFEST_FILE: &str = "artifacts.json";

/// CUDA toolkit major versions with a published manifest.
pub const SUPPORTED_CUDA_VERSIONS: [u8; 2] = [12, 13];

#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("Unsupported CUDA version {0}; expected one of 12, 13")]
    UnsupportedCuda(u8),

    #[error("Artifact manifest not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Error downloading manifest file from {url}: {status} {reason}")]
    Download {
        url: String,
        status: u16,
        reason: String,
    },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Image reference that is either shared or keyed (by configuration or platform).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum ImageSet {
    /// One image for every key.
    Single(String),
    /// One image per key.
    Keyed(BTreeMap<String, String>),
}

impl ImageSet {
    /// Image for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        match self {
            Self::Single(image) => Some(image),
            Self::Keyed(map) => map.get(key).map(String::as_str),
        }
    }
}

/// Holoscan entries for one SDK release.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct HoloscanArtifacts {
    pub wheel_version: Option<String>,
    pub debian_version: Option<String>,
    pub base_images: Option<ImageSet>,
    /// Configuration to platform-keyed build images.
    pub build_images: Option<BTreeMap<String, ImageSet>>,
    #[serde(alias = "health-probe")]
    pub health_probes: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ReleaseEntry {
    holoscan: Option<HoloscanArtifacts>,
}

/// Loaded artifact manifest for one CUDA toolkit major version.
#[derive(Debug, Clone)]
pub struct ArtifactSources {
    cuda_version: u8,
    releases: BTreeMap<String, HoloscanArtifacts>,
}

/// Manifest file name for a CUDA major version.
pub fn manifest_file_name(cuda_version: u8) -> &'static str {
    if cuda_version == 12 {
        "artifacts-cu12.json"
    } else {
        DEFAULT_MANIFEST_FILE
    }
}

impl ArtifactSources {
    /// Creates an empty manifest for `cuda_version`.
    pub fn new(cuda_version: u8) -> Result<Self, ArtifactError> {
        if !SUPPORTED_CUDA_VERSIONS.contains(&cuda_version) {
            return Err(ArtifactError::UnsupportedCuda(cuda_version));
        }
        Ok(Self {
            cuda_version,
            releases: BTreeMap::new(),
        })
    }

    pub fn cuda_version(&self) -> u8 {
        self.cuda_version
    }

    pub fn manifest_file_name(&self) -> &'static str {
        manifest_file_name(self.cuda_version)
    }

    /// Published manifest URL for this CLI release.
    pub fn manifest_url(&self) -> String {
        let release = holoscan_schema::version::normalize(crate::CLI_VERSION)
            .unwrap_or_else(|| crate::CLI_VERSION.to_string());
        format!("{MANIFEST_BASE_URL}/{release}/{}", self.manifest_file_name())
    }

    /// Loads from a local file, a directory or an `http(s)://` URL.
    ///
    /// A directory is searched for the CUDA-qualified file name first, then
    /// `artifacts.json`. A malformed or empty file leaves the manifest empty.
    pub async fn load(&mut self, source: &str) -> Result<(), ArtifactError> {
        if source.starts_with("https://") || source.starts_with("http://") {
            return self.download(source).await;
        }

        let path = Path::new(source);
        let file = if path.is_dir() {
            let candidates = [
                path.join(self.manifest_file_name()),
                path.join(DEFAULT_MANIFEST_FILE),
            ];
            candidates
                .into_iter()
                .find(|p| p.is_file())
                .ok_or_else(|| ArtifactError::NotFound(path.to_path_buf()))?
        } else if path.is_file() {
            path.to_path_buf()
        } else {
            return Err(ArtifactError::NotFound(path.to_path_buf()));
        };

        debug!("Loading artifact manifest from {}", file.display());
        let raw = std::fs::read_to_string(&file)?;
        self.parse(&raw);
        Ok(())
    }

    /// Fetches the published manifest for this CLI release.
    pub async fn download_manifest(&mut self) -> Result<(), ArtifactError> {
        let url = self.manifest_url();
        self.download(&url).await
    }

    async fn download(&mut self, url: &str) -> Result<(), ArtifactError> {
        info!("Downloading artifact manifest from {url}");
        let client = Client::builder().user_agent(crate::USER_AGENT).build()?;
        let resp = client.get(url).send().await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(ArtifactError::Download {
                url: url.to_string(),
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or("Unknown").to_string(),
            });
        }

        let body = resp.text().await?;
        self.parse(&body);
        Ok(())
    }

    /// Replaces the loaded releases with the contents of `raw`.
    pub fn parse(&mut self, raw: &str) {
        self.releases.clear();
        if raw.trim().is_empty() {
            warn!("Artifact manifest is empty");
            return;
        }

        let document: BTreeMap<String, serde_json::Value> = match serde_json::from_str(raw) {
            Ok(document) => document,
            Err(e) => {
                warn!("Ignoring malformed artifact manifest: {e}");
                return;
            }
        };

        for (version, value) in document {
            match serde_json::from_value::<ReleaseEntry>(value) {
                Ok(ReleaseEntry {
                    holoscan: Some(artifacts),
                }) => {
                    self.releases.insert(version, artifacts);
                }
                Ok(_) => debug!("No Holoscan artifacts listed for {version}"),
                Err(e) => warn!("Skipping artifact entry for {version}: {e}"),
            }
        }
    }

    /// Versions listed in the manifest.
    pub fn supported_versions(&self) -> Vec<&str> {
        self.releases.keys().map(String::as_str).collect()
    }

    pub fn artifacts(&self, version: &str) -> Option<&HoloscanArtifacts> {
        self.releases.get(version)
    }

    pub fn debian_package_version(&self, version: &str) -> Option<&str> {
        self.artifacts(version)?.debian_version.as_deref()
    }

    pub fn wheel_package_version(&self, version: &str) -> Option<&str> {
        self.artifacts(version)?.wheel_version.as_deref()
    }

    pub fn base_image(&self, version: &str) -> Option<&ImageSet> {
        self.artifacts(version)?.base_images.as_ref()
    }

    pub fn build_images(&self, version: &str) -> Option<&BTreeMap<String, ImageSet>> {
        self.artifacts(version)?.build_images.as_ref()
    }

    pub fn health_probe(&self, version: &str) -> Option<&BTreeMap<String, String>> {
        self.artifacts(version)?.health_probes.as_ref()
    }
}
