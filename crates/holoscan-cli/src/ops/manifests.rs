//! `app.json` and `pkg.json` generation.

use std::collections::BTreeMap;
use std::io;
use std::path::Path;

use holoscan_core::parameters::PackageBuildParameters;
use holoscan_core::paths;
use holoscan_schema::manifest::API_VERSION;
use holoscan_schema::{
    ApplicationManifest, IoSpec, PackageManifest, PlatformConfiguration, Probe, SdkType,
};

use crate::ops::config::ApplicationConfiguration;
use crate::ops::models::Models;

pub const HOLOSCAN_INPUT_PATH: &str = "HOLOSCAN_INPUT_PATH";
pub const HOLOSCAN_OUTPUT_PATH: &str = "HOLOSCAN_OUTPUT_PATH";
pub const HOLOSCAN_WORKDIR: &str = "HOLOSCAN_WORKDIR";
pub const HOLOSCAN_MODEL_PATH: &str = "HOLOSCAN_MODEL_PATH";
pub const HOLOSCAN_CONFIG_PATH: &str = "HOLOSCAN_CONFIG_PATH";
pub const HOLOSCAN_APP_MANIFEST_PATH: &str = "HOLOSCAN_APP_MANIFEST_PATH";
pub const HOLOSCAN_PKG_MANIFEST_PATH: &str = "HOLOSCAN_PKG_MANIFEST_PATH";
pub const HOLOSCAN_DOCS_PATH: &str = "HOLOSCAN_DOCS_PATH";
pub const HOLOSCAN_LOGS_PATH: &str = "HOLOSCAN_LOGS_PATH";

/// Directory in the build context holding both manifests.
pub const MANIFEST_DIR: &str = "map";

/// Environment baked into every image.
pub fn environment() -> BTreeMap<String, String> {
    [
        (HOLOSCAN_INPUT_PATH, paths::INPUT_DIR),
        (HOLOSCAN_OUTPUT_PATH, paths::OUTPUT_DIR),
        (HOLOSCAN_WORKDIR, paths::WORK_DIR),
        (HOLOSCAN_MODEL_PATH, paths::MODELS_DIR),
        (HOLOSCAN_CONFIG_PATH, paths::CONFIG_PATH),
        (HOLOSCAN_APP_MANIFEST_PATH, paths::APP_MANIFEST_PATH),
        (HOLOSCAN_PKG_MANIFEST_PATH, paths::PKG_MANIFEST_PATH),
        (HOLOSCAN_DOCS_PATH, paths::DOCS_DIR),
        (HOLOSCAN_LOGS_PATH, paths::LOGS_DIR),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

/// Builds `app.json`.
///
/// `sdk_version` is the version of `sdk` itself, i.e. the MONAI Deploy App
/// SDK version for MONAI Deploy applications.
pub fn app_manifest(
    config: &ApplicationConfiguration,
    build: &PackageBuildParameters,
    sdk: SdkType,
    sdk_version: &str,
    version: &str,
    timeout: u64,
) -> ApplicationManifest {
    let probe = (sdk == SdkType::Holoscan).then(Probe::grpc_health);
    ApplicationManifest {
        api_version: API_VERSION.to_string(),
        command: build.command.clone(),
        environment: environment(),
        input: IoSpec {
            path: paths::INPUT_DIR.to_string(),
            formats: config.input_formats().map(<[String]>::to_vec),
        },
        output: IoSpec {
            path: paths::OUTPUT_DIR.to_string(),
            formats: config.output_formats().map(<[String]>::to_vec),
        },
        readiness: probe.clone(),
        liveness: probe,
        sdk,
        sdk_version: sdk_version.to_string(),
        timeout,
        version: version.to_string(),
        working_directory: paths::WORK_DIR.to_string(),
    }
}

/// Builds `pkg.json`; models are addressed by name under the model root.
pub fn package_manifest(
    config: &ApplicationConfiguration,
    models: &Models,
    version: &str,
    platform_config: PlatformConfiguration,
    sdk: SdkType,
) -> PackageManifest {
    PackageManifest {
        api_version: API_VERSION.to_string(),
        application_root: paths::APP_DIR.to_string(),
        model_root: paths::MODELS_DIR.to_string(),
        models: models
            .keys()
            .map(|name| (name.clone(), format!("{}/{name}", paths::MODELS_DIR)))
            .collect(),
        resources: config.resources().clone(),
        version: version.to_string(),
        platform_config,
        sdk_type: Some(sdk),
    }
}

/// Writes both manifests to `<context>/map/`.
pub fn write(
    context: &Path,
    app: &ApplicationManifest,
    pkg: &PackageManifest,
) -> io::Result<()> {
    let dir = context.join(MANIFEST_DIR);
    std::fs::create_dir_all(&dir)?;
    std::fs::write(dir.join("app.json"), serde_json::to_string_pretty(app)?)?;
    std::fs::write(dir.join("pkg.json"), serde_json::to_string_pretty(pkg)?)?;
    Ok(())
}
