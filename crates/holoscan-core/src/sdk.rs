//! SDK type and version detection.
//!
//! The SDK type comes from an explicit flag or the name the CLI was invoked
//! as. Installed versions are read from Python package metadata.

use holoscan_schema::SdkType;
use holoscan_schema::version::{normalize, release_version};
use thiserror::Error;
use tracing::{debug, info};

use crate::artifacts::ArtifactSources;
use crate::host::{CommandRunner, HostError};

/// Distributions that provide the Holoscan SDK, in lookup order.
pub const HOLOSCAN_DISTRIBUTIONS: [&str; 4] =
    ["holoscan-cu13", "holoscan-cu12", "holoscan", "holoscan-cli"];

/// Distribution that provides the MONAI Deploy App SDK.
pub const MONAI_DEPLOY_DISTRIBUTION: &str = "monai-deploy-app-sdk";

/// Supported MONAI Deploy App SDK releases.
pub const MONAI_DEPLOY_SUPPORTED: &str = ">=0.6.0, <4.0.0";

#[derive(Error, Debug)]
pub enum SdkError {
    #[error("Invalid SDK: {0}")]
    InvalidSdk(String),

    #[error("Failed to detect installed {0} version")]
    PackageNotFound(String),

    #[error("Failed to read package metadata: {0}")]
    Metadata(String),

    #[error("{sdk} version {version} is not supported (supported: {supported})")]
    UnsupportedVersion {
        sdk: String,
        version: String,
        supported: String,
    },
}

impl From<HostError> for SdkError {
    fn from(e: HostError) -> Self {
        Self::Metadata(e.to_string())
    }
}

/// Installed package metadata.
pub trait MetadataSource {
    /// Version of an installed distribution, `None` when it is not installed.
    fn version(&self, distribution: &str) -> Result<Option<String>, SdkError>;
}

const METADATA_SCRIPT: &str = "\
import sys, importlib.metadata as m
try:
    print(m.version(sys.argv[1]))
except m.PackageNotFoundError:
    sys.exit(3)
";

/// [`MetadataSource`] that asks the Python interpreter's `importlib.metadata`.
#[derive(Debug)]
pub struct PythonMetadata<R> {
    runner: R,
    interpreter: String,
}

impl<R: CommandRunner> PythonMetadata<R> {
    pub fn new(runner: R) -> Self {
        Self {
            runner,
            interpreter: "python3".to_string(),
        }
    }

    pub fn with_interpreter(mut self, interpreter: impl Into<String>) -> Self {
        self.interpreter = interpreter.into();
        self
    }
}

impl<R: CommandRunner> MetadataSource for PythonMetadata<R> {
    fn version(&self, distribution: &str) -> Result<Option<String>, SdkError> {
        let output = self.runner.output(
            &self.interpreter,
            &[
                "-c".to_string(),
                METADATA_SCRIPT.to_string(),
                distribution.to_string(),
            ],
        )?;
        match output.code {
            0 => Ok(Some(output.stdout.trim().to_string())),
            3 => Ok(None),
            code => Err(SdkError::Metadata(format!(
                "{} exited with code {code}: {}",
                self.interpreter,
                output.stderr.trim()
            ))),
        }
    }
}

/// Detects the SDK and its installed versions.
#[derive(Debug)]
pub struct SdkDetector<M> {
    metadata: M,
    program_name: String,
}

impl<M: MetadataSource> SdkDetector<M> {
    /// `program_name` is the basename the CLI was invoked as.
    pub fn new(metadata: M, program_name: impl Into<String>) -> Self {
        Self {
            metadata,
            program_name: program_name.into(),
        }
    }

    /// Explicit SDK, or the one implied by the program name.
    pub fn detect_sdk(&self, sdk: Option<SdkType>) -> Result<SdkType, SdkError> {
        if let Some(sdk) = sdk {
            return Ok(sdk);
        }
        match self.program_name.as_str() {
            "holoscan" => Ok(SdkType::Holoscan),
            "monai-deploy" => Ok(SdkType::MonaiDeploy),
            other => Err(SdkError::InvalidSdk(format!(
                "unable to infer SDK from '{other}'; use --sdk holoscan or --sdk monai-deploy"
            ))),
        }
    }

    /// Holoscan version, plus the MONAI Deploy version for MONAI Deploy apps.
    pub fn detect_sdk_version(
        &self,
        sdk: SdkType,
        sdk_version: Option<&str>,
    ) -> Result<(String, Option<String>), SdkError> {
        let holoscan = self.detect_holoscan_version(sdk_version)?;
        let monai = match sdk {
            SdkType::Holoscan => None,
            SdkType::MonaiDeploy => Some(self.detect_monaideploy_version(None)?),
        };
        Ok((holoscan, monai))
    }

    /// Explicit version, or the first installed Holoscan distribution.
    pub fn detect_holoscan_version(&self, sdk_version: Option<&str>) -> Result<String, SdkError> {
        if let Some(version) = sdk_version {
            return normalize(version).ok_or_else(|| SdkError::UnsupportedVersion {
                sdk: "Holoscan SDK".to_string(),
                version: version.to_string(),
                supported: "major.minor.patch".to_string(),
            });
        }

        for distribution in HOLOSCAN_DISTRIBUTIONS {
            let Some(raw) = self.metadata.version(&distribution.to_lowercase())? else {
                debug!("{distribution} is not installed");
                continue;
            };
            let version =
                normalize(&raw).ok_or_else(|| SdkError::PackageNotFound("Holoscan SDK".into()))?;
            info!("Detected Holoscan SDK {version} from {distribution}");
            return Ok(version);
        }
        Err(SdkError::PackageNotFound("Holoscan SDK".to_string()))
    }

    /// Explicit version, or the installed MONAI Deploy App SDK.
    ///
    /// Detected versions outside the supported range are rejected.
    pub fn detect_monaideploy_version(&self, sdk_version: Option<&str>) -> Result<String, SdkError> {
        if let Some(version) = sdk_version {
            return normalize(version).ok_or_else(|| SdkError::UnsupportedVersion {
                sdk: "MONAI Deploy App SDK".to_string(),
                version: version.to_string(),
                supported: MONAI_DEPLOY_SUPPORTED.to_string(),
            });
        }

        let raw = self
            .metadata
            .version(MONAI_DEPLOY_DISTRIBUTION)?
            .ok_or_else(|| SdkError::PackageNotFound("MONAI Deploy App SDK".to_string()))?;

        let unsupported = || SdkError::UnsupportedVersion {
            sdk: "MONAI Deploy App SDK".to_string(),
            version: raw.clone(),
            supported: MONAI_DEPLOY_SUPPORTED.to_string(),
        };
        let version = release_version(&raw).ok_or_else(unsupported)?;
        let range = semver::VersionReq::parse(MONAI_DEPLOY_SUPPORTED)
            .map_err(|e| SdkError::Metadata(e.to_string()))?;
        if !range.matches(&version) {
            return Err(unsupported());
        }
        info!("Detected MONAI Deploy App SDK {version}");
        Ok(version.to_string())
    }
}

/// Fails unless `version` is listed in the artifact manifest.
pub fn validate_holoscan_sdk_version(
    sources: &ArtifactSources,
    version: &str,
) -> Result<(), SdkError> {
    if sources.supported_versions().contains(&version) {
        return Ok(());
    }
    Err(SdkError::InvalidSdk(format!(
        "Invalid SDK version specified ({version}): valid values are: {}",
        sources.supported_versions().join(", ")
    )))
}

#[cfg(any(test, feature = "test-support"))]
pub mod fake {
    use std::collections::HashMap;

    use super::*;

    #[derive(Debug, Default)]
    pub struct FakeMetadata {
        pub installed: HashMap<String, String>,
        pub broken: bool,
    }

    impl FakeMetadata {
        pub fn with(distribution: &str, version: &str) -> Self {
            let mut fake = Self::default();
            fake.installed
                .insert(distribution.to_string(), version.to_string());
            fake
        }
    }

    impl MetadataSource for FakeMetadata {
        fn version(&self, distribution: &str) -> Result<Option<String>, SdkError> {
            if self.broken {
                return Err(SdkError::Metadata("error".to_string()));
            }
            Ok(self.installed.get(distribution).cloned())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fake::FakeMetadata;
    use super::*;
    use crate::host::fake::FakeRunner;

    fn detector(metadata: FakeMetadata) -> SdkDetector<FakeMetadata> {
        SdkDetector::new(metadata, "holoscan")
    }

    #[test]
    fn explicit_sdk_wins() {
        let d = SdkDetector::new(FakeMetadata::default(), "bla");
        assert_eq!(d.detect_sdk(Some(SdkType::Holoscan)).unwrap(), SdkType::Holoscan);
        assert_eq!(
            d.detect_sdk(Some(SdkType::MonaiDeploy)).unwrap(),
            SdkType::MonaiDeploy
        );
    }

    #[test]
    fn sdk_from_program_name() {
        let holoscan = SdkDetector::new(FakeMetadata::default(), "holoscan");
        assert_eq!(holoscan.detect_sdk(None).unwrap(), SdkType::Holoscan);
        let monai = SdkDetector::new(FakeMetadata::default(), "monai-deploy");
        assert_eq!(monai.detect_sdk(None).unwrap(), SdkType::MonaiDeploy);
        let unknown = SdkDetector::new(FakeMetadata::default(), "bla");
        assert!(matches!(unknown.detect_sdk(None), Err(SdkError::InvalidSdk(_))));
    }

    #[test]
    fn explicit_version_is_normalized() {
        let d = detector(FakeMetadata::default());
        assert_eq!(d.detect_holoscan_version(Some("1.0.0")).unwrap(), "1.0.0");
        assert_eq!(d.detect_monaideploy_version(Some("0.6.0")).unwrap(), "0.6.0");
    }

    #[test]
    fn detects_installed_holoscan() {
        for (raw, expected) in [
            ("1.0.0", "1.0.0"),
            ("1.0.0-beta-1", "1.0.0"),
            ("1.0a2+4.gcaa3b3fe", "1.0.0"),
            ("1", "1.0.0"),
            ("1.0", "1.0.0"),
            ("1.0.0.1", "1.0.0"),
        ] {
            let d = detector(FakeMetadata::with("holoscan", raw));
            assert_eq!(d.detect_holoscan_version(None).unwrap(), expected, "{raw}");
        }
    }

    #[test]
    fn first_distribution_wins() {
        let mut metadata = FakeMetadata::with("holoscan", "2.0.0");
        metadata
            .installed
            .insert("holoscan-cu12".to_string(), "3.1.0".to_string());
        assert_eq!(
            detector(metadata).detect_holoscan_version(None).unwrap(),
            "3.1.0"
        );
    }

    #[test]
    fn metadata_failure_is_distinguished() {
        let metadata = FakeMetadata {
            broken: true,
            ..FakeMetadata::default()
        };
        let d = detector(metadata);
        assert!(matches!(d.detect_holoscan_version(None), Err(SdkError::Metadata(_))));
        assert!(matches!(
            d.detect_monaideploy_version(None),
            Err(SdkError::Metadata(_))
        ));
    }

    #[test]
    fn nothing_installed_is_not_found() {
        let d = detector(FakeMetadata::default());
        assert!(matches!(
            d.detect_holoscan_version(None),
            Err(SdkError::PackageNotFound(_))
        ));
    }

    #[test]
    fn monai_range_is_enforced() {
        let ok = detector(FakeMetadata::with(MONAI_DEPLOY_DISTRIBUTION, "0.6.0-beta-1"));
        assert_eq!(ok.detect_monaideploy_version(None).unwrap(), "0.6.0");

        for raw in ["0.1.2", "100"] {
            let d = detector(FakeMetadata::with(MONAI_DEPLOY_DISTRIBUTION, raw));
            assert!(
                matches!(
                    d.detect_monaideploy_version(None),
                    Err(SdkError::UnsupportedVersion { .. })
                ),
                "{raw}"
            );
        }
    }

    #[test]
    fn sdk_version_pairs() {
        let mut metadata = FakeMetadata::with("holoscan", "3.7.0");
        metadata
            .installed
            .insert(MONAI_DEPLOY_DISTRIBUTION.to_string(), "3.0.0".to_string());
        let d = detector(metadata);
        assert_eq!(
            d.detect_sdk_version(SdkType::Holoscan, None).unwrap(),
            ("3.7.0".to_string(), None)
        );
        assert_eq!(
            d.detect_sdk_version(SdkType::MonaiDeploy, None).unwrap(),
            ("3.7.0".to_string(), Some("3.0.0".to_string()))
        );
    }

    #[test]
    fn validates_against_manifest() {
        let mut sources = ArtifactSources::new(13).unwrap();
        sources.parse(r#"{"1.0.0": {"holoscan": {}}}"#);
        assert!(validate_holoscan_sdk_version(&sources, "1.0.0").is_ok());
        for version in ["0.1.2", "100"] {
            assert!(matches!(
                validate_holoscan_sdk_version(&sources, version),
                Err(SdkError::InvalidSdk(_))
            ));
        }
    }

    #[test]
    fn python_metadata_exit_codes() {
        let runner = FakeRunner::new();
        runner
            .respond("python3 -c", 0, "3.7.0\n")
            .respond("python3 -c", 3, "")
            .respond_err("python3 -c", 1, "Traceback");
        let metadata = PythonMetadata::new(runner);
        assert_eq!(metadata.version("holoscan").unwrap().as_deref(), Some("3.7.0"));
        assert_eq!(metadata.version("holoscan-cu12").unwrap(), None);
        assert!(matches!(
            metadata.version("holoscan-cu13"),
            Err(SdkError::Metadata(_))
        ));
    }
}
