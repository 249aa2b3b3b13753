//! Per-target build parameters.
//!
//! Pipeline: detect SDK, detect SDK version, validate the request, then
//! resolve images and packages for each requested platform in order.

use std::path::{Path, PathBuf};

use holoscan_schema::{
    ApplicationType, ImageReference, InternalPlatform, Platform, PlatformArch,
    PlatformConfiguration, SdkType,
};
use thiserror::Error;
use tracing::{debug, info};

use crate::artifacts::{ArtifactSources, SUPPORTED_CUDA_VERSIONS};
use crate::sdk::{MetadataSource, SdkDetector, SdkError, validate_holoscan_sdk_version};

/// CUDA toolkit major version used when none is requested.
pub const DEFAULT_CUDA_VERSION: u8 = 13;

#[derive(Error, Debug)]
pub enum PlatformError {
    #[error("Invalid value for --tag: '{0}'")]
    InvalidTag(String),

    #[error("Incompatible platform configuration: {0}")]
    Incompatible(String),

    #[error("No {what} found for Holoscan SDK {version} ({key}); specify one explicitly")]
    MissingArtifact {
        what: &'static str,
        version: String,
        key: String,
    },

    #[error(transparent)]
    Sdk(#[from] SdkError),
}

/// Holoscan SDK package installed into the image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SdkPackage {
    /// User-supplied `.deb` or `.whl` copied into the build context.
    File(PathBuf),
    /// Package version from the artifact manifest.
    Version(String),
}

impl SdkPackage {
    pub fn as_file(&self) -> Option<&Path> {
        match self {
            Self::File(path) => Some(path),
            Self::Version(_) => None,
        }
    }

    pub fn as_version(&self) -> Option<&str> {
        match self {
            Self::File(_) => None,
            Self::Version(version) => Some(version),
        }
    }
}

/// Everything needed to build the image for one platform.
#[derive(Debug, Clone)]
pub struct PlatformParameters {
    pub platform: Platform,
    pub internal: InternalPlatform,
    pub configuration: PlatformConfiguration,
    pub arch: PlatformArch,
    /// Full image tag.
    pub tag: String,
    /// Repository part of the requested tag.
    pub tag_prefix: String,
    /// Tag part of the requested tag, or the application version.
    pub version: String,
    pub base_image: Option<String>,
    pub custom_base_image: bool,
    pub build_image: Option<String>,
    pub holoscan_sdk_file: Option<SdkPackage>,
    pub custom_holoscan_sdk: bool,
    pub monai_deploy_sdk_file: Option<PathBuf>,
    /// `None` for Holoscan applications.
    pub custom_monai_deploy_sdk: Option<bool>,
    pub health_probe: Option<String>,
    pub cuda_version: u8,
}

impl PlatformParameters {
    /// Derives the image tag for `platform` from the requested `tag`.
    ///
    /// # Example
    ///
    /// ```
    /// use holoscan_core::platforms::PlatformParameters;
    /// use holoscan_schema::Platform;
    ///
    /// let params = PlatformParameters::new(Platform::X86_64, "my-app", "1.2.3", 13).unwrap();
    /// assert_eq!(params.tag, "my-app-x64-workstation-dgpu-linux-amd64:1.2.3");
    /// ```
    pub fn new(
        platform: Platform,
        tag: &str,
        app_version: &str,
        cuda_version: u8,
    ) -> Result<Self, PlatformError> {
        let reference =
            ImageReference::parse(tag).ok_or_else(|| PlatformError::InvalidTag(tag.to_string()))?;
        let version = reference.tag.unwrap_or_else(|| app_version.to_string());
        let arch = platform.arch();
        let full_tag = format!(
            "{}-{}-{}-{}:{}",
            reference.name,
            platform.internal(),
            platform.configuration(),
            arch.docker_platform().replace('/', "-"),
            version
        );

        Ok(Self {
            platform,
            internal: platform.internal(),
            configuration: platform.configuration(),
            arch,
            tag: full_tag,
            tag_prefix: reference.name,
            version,
            base_image: None,
            custom_base_image: false,
            build_image: None,
            holoscan_sdk_file: None,
            custom_holoscan_sdk: false,
            monai_deploy_sdk_file: None,
            custom_monai_deploy_sdk: None,
            health_probe: None,
            cuda_version,
        })
    }

    /// Container build platform, e.g. `linux/arm64`.
    pub fn docker_arch(&self) -> &'static str {
        self.arch.docker_platform()
    }

    pub fn holoscan_deb_arch(&self) -> &'static str {
        self.arch.holoscan_deb_arch()
    }

    pub fn cuda_deb_arch(&self) -> &'static str {
        self.arch.cuda_deb_arch()
    }

    pub fn target_arch(&self) -> &'static str {
        self.arch.target_arch()
    }

    /// Whether the target matches the host, i.e. no emulation is needed.
    pub fn same_arch_as_system(&self) -> bool {
        PlatformArch::host() == Some(self.arch)
    }
}

/// Inputs for [`PlatformResolver::configure_platforms`].
#[derive(Debug, Clone)]
pub struct PlatformRequest {
    pub platforms: Vec<Platform>,
    pub tag: String,
    pub app_version: String,
    pub app_type: ApplicationType,
    pub sdk: Option<SdkType>,
    pub sdk_version: Option<String>,
    pub holoscan_sdk_file: Option<PathBuf>,
    pub monai_deploy_sdk_file: Option<PathBuf>,
    pub base_image: Option<String>,
    pub build_image: Option<String>,
    pub cuda_version: u8,
}

/// Result of [`PlatformResolver::configure_platforms`].
#[derive(Debug, Clone)]
pub struct ResolvedPlatforms {
    pub sdk: SdkType,
    pub holoscan_version: String,
    pub monai_deploy_version: Option<String>,
    /// One entry per requested platform, in request order.
    pub platforms: Vec<PlatformParameters>,
}

/// Resolves [`PlatformParameters`] from a loaded artifact manifest.
#[derive(Debug)]
pub struct PlatformResolver<'a, M> {
    sources: &'a ArtifactSources,
    detector: &'a SdkDetector<M>,
}

impl<'a, M: MetadataSource> PlatformResolver<'a, M> {
    pub fn new(sources: &'a ArtifactSources, detector: &'a SdkDetector<M>) -> Self {
        Self { sources, detector }
    }

    pub fn configure_platforms(
        &self,
        request: &PlatformRequest,
    ) -> Result<ResolvedPlatforms, PlatformError> {
        let sdk = self.detector.detect_sdk(request.sdk)?;
        let (holoscan_version, monai_deploy_version) = self
            .detector
            .detect_sdk_version(sdk, request.sdk_version.as_deref())?;
        validate_holoscan_sdk_version(self.sources, &holoscan_version)?;
        info!(
            "Packaging for {sdk} with Holoscan SDK {holoscan_version}{}",
            monai_deploy_version
                .as_deref()
                .map(|v| format!(" and MONAI Deploy App SDK {v}"))
                .unwrap_or_default()
        );

        validate_request(sdk, request)?;

        let platforms = request
            .platforms
            .iter()
            .map(|platform| self.resolve(*platform, sdk, &holoscan_version, request))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ResolvedPlatforms {
            sdk,
            holoscan_version,
            monai_deploy_version,
            platforms,
        })
    }

    fn resolve(
        &self,
        platform: Platform,
        sdk: SdkType,
        version: &str,
        request: &PlatformRequest,
    ) -> Result<PlatformParameters, PlatformError> {
        let mut params = PlatformParameters::new(
            platform,
            &request.tag,
            &request.app_version,
            request.cuda_version,
        )?;

        let config = params.configuration.as_str();
        let internal = params.internal.as_str();

        if let Some(image) = &request.base_image {
            params.base_image = Some(image.clone());
            params.custom_base_image = true;
        } else {
            let image = self
                .sources
                .base_image(version)
                .and_then(|images| images.get(config))
                .ok_or_else(|| PlatformError::MissingArtifact {
                    what: "base image",
                    version: version.to_string(),
                    key: config.to_string(),
                })?;
            params.base_image = Some(image.to_string());
        }

        params.build_image = match &request.build_image {
            Some(image) => Some(image.clone()),
            None if request.app_type == ApplicationType::CppCMake => Some(
                self.sources
                    .build_images(version)
                    .and_then(|by_config| by_config.get(config))
                    .and_then(|images| images.get(internal))
                    .ok_or_else(|| PlatformError::MissingArtifact {
                        what: "build image",
                        version: version.to_string(),
                        key: format!("{config}/{internal}"),
                    })?
                    .to_string(),
            ),
            None => None,
        };

        params.holoscan_sdk_file = Some(match &request.holoscan_sdk_file {
            Some(file) => {
                params.custom_holoscan_sdk = true;
                SdkPackage::File(file.clone())
            }
            None => {
                let (what, found) = if request.app_type.is_python() {
                    ("wheel package", self.sources.wheel_package_version(version))
                } else {
                    ("debian package", self.sources.debian_package_version(version))
                };
                let found = found.ok_or_else(|| PlatformError::MissingArtifact {
                    what,
                    version: version.to_string(),
                    key: params.docker_arch().to_string(),
                })?;
                SdkPackage::Version(found.to_string())
            }
        });

        if sdk == SdkType::MonaiDeploy {
            params.monai_deploy_sdk_file.clone_from(&request.monai_deploy_sdk_file);
            params.custom_monai_deploy_sdk = Some(request.monai_deploy_sdk_file.is_some());
        }

        if params.build_image.is_some() {
            params.health_probe = self
                .sources
                .health_probe(version)
                .and_then(|probes| probes.get(params.docker_arch()))
                .cloned();
        }

        debug!(
            "Resolved {platform}: tag={} base={:?} build={:?}",
            params.tag, params.base_image, params.build_image
        );
        Ok(params)
    }
}

fn validate_request(sdk: SdkType, request: &PlatformRequest) -> Result<(), PlatformError> {
    if !SUPPORTED_CUDA_VERSIONS.contains(&request.cuda_version) {
        return Err(PlatformError::Incompatible(format!(
            "CUDA version {} is not supported; use 12 or 13",
            request.cuda_version
        )));
    }

    if sdk == SdkType::Holoscan && request.monai_deploy_sdk_file.is_some() {
        return Err(PlatformError::Incompatible(
            "--monai-deploy-sdk-file was used when --sdk was set to 'holoscan'".to_string(),
        ));
    }

    if let Some(file) = &request.holoscan_sdk_file {
        let mut arches = request.platforms.iter().map(|p| p.arch());
        let Some(first) = arches.next() else {
            return Ok(());
        };
        if arches.any(|arch| arch != first) {
            return Err(PlatformError::Incompatible(
                "--holoscan-sdk-file can only be used with platforms of the same architecture"
                    .to_string(),
            ));
        }
        if let Some(named) = arch_in_file_name(file)
            && named != first
        {
            return Err(PlatformError::Incompatible(format!(
                "--holoscan-sdk-file '{}' does not match the {} platform architecture",
                file.display(),
                first.target_arch()
            )));
        }
    }
    Ok(())
}

/// Architecture named by a package file such as `holoscan_3.7.0_arm64.deb`.
fn arch_in_file_name(file: &Path) -> Option<PlatformArch> {
    let name = file.file_name()?.to_string_lossy().to_lowercase();
    let tokens: Vec<&str> = name.split(|c: char| !c.is_ascii_alphanumeric()).collect();
    if tokens.iter().any(|t| matches!(*t, "amd64" | "x86" | "x64")) {
        Some(PlatformArch::Amd64)
    } else if tokens.iter().any(|t| matches!(*t, "arm64" | "aarch64" | "sbsa")) {
        Some(PlatformArch::Arm64)
    } else {
        None
    }
}
