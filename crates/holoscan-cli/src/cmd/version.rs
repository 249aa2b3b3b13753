//! Version command

use std::path::{Path, PathBuf};

use holoscan_core::host::SystemRunner;
use holoscan_core::sdk::{MetadataSource, PythonMetadata, SdkDetector};
use holoscan_schema::SdkType;
use tracing::debug;

use crate::CliError;

const NOT_AVAILABLE: &str = "N/A";

/// Directory the CLI was invoked from.
pub fn invocation_dir() -> PathBuf {
    let argv0 = std::env::args().next().unwrap_or_default();
    let absolute = std::path::absolute(&argv0).unwrap_or_else(|_| PathBuf::from(&argv0));
    absolute
        .parent()
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf)
}

/// Basename the CLI was invoked as.
pub fn program_name() -> String {
    std::env::args()
        .next()
        .as_deref()
        .and_then(|argv0| Path::new(argv0).file_name())
        .map_or_else(|| "holoscan".to_string(), |n| n.to_string_lossy().into_owned())
}

/// Version report. Only an undetectable SDK is an error; missing versions
/// print as `N/A`.
pub fn report<M: MetadataSource>(
    detector: &SdkDetector<M>,
    location: &Path,
) -> anyhow::Result<String> {
    let sdk = detector.detect_sdk(None)?;

    let holoscan = detector.detect_holoscan_version(None).unwrap_or_else(|e| {
        debug!("{e}");
        NOT_AVAILABLE.to_string()
    });
    let mut out = format!(
        "You are executing Holoscan CLI from: {}\n\n\
         Holoscan SDK:           {holoscan}\n\
         Holoscan CLI:           {}\n",
        location.display(),
        crate::CLI_VERSION
    );
    if sdk == SdkType::MonaiDeploy {
        let monai = detector.detect_monaideploy_version(None).unwrap_or_else(|e| {
            debug!("{e}");
            NOT_AVAILABLE.to_string()
        });
        out.push_str(&format!("MONAI Deploy App SDK:   {monai}\n"));
    }
    Ok(out)
}

/// Print SDK and CLI versions
pub fn version() -> Result<(), CliError> {
    let detector = SdkDetector::new(PythonMetadata::new(SystemRunner), program_name());
    let out = report(&detector, &invocation_dir()).map_err(CliError::Version)?;
    print!("{out}");
    Ok(())
}
