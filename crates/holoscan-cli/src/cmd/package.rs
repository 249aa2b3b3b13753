//! Package command

use std::fmt::Write;

use anyhow::{Context, Result, bail};
use holoscan_core::artifacts::ArtifactSources;
use holoscan_core::docker::{ContainerEngine, DockerCli, image_exists};
use holoscan_core::host::SystemRunner;
use holoscan_core::parameters::PackageBuildParameters;
use holoscan_core::paths;
use holoscan_core::platforms::{PlatformRequest, PlatformResolver};
use holoscan_core::sdk::{MetadataSource, PythonMetadata, SdkDetector};
use tracing::{error, info};

use crate::cmd::version::program_name;
use crate::ops::builder::{BuildOptions, BuildResult, ContainerBuilder};
use crate::ops::config::ApplicationConfiguration;
use crate::ops::models;
use crate::{CliError, PackageArgs};

/// Loads the artifact manifest from `--source`, or downloads the published one.
pub async fn artifact_sources(args: &PackageArgs) -> Result<ArtifactSources> {
    let mut sources = ArtifactSources::new(args.cuda)?;
    match &args.source {
        Some(source) => sources
            .load(source)
            .await
            .with_context(|| format!("Failed to load artifact manifest from {source}"))?,
        None => sources
            .download_manifest()
            .await
            .context("Failed to download the artifact manifest")?,
    }
    Ok(sources)
}

/// Resolves every platform and builds one image each, in order.
///
/// Setup problems are errors; per-platform build failures are reported in
/// the returned results.
pub fn execute<E, M>(
    engine: &E,
    sources: &ArtifactSources,
    detector: &SdkDetector<M>,
    args: &PackageArgs,
) -> Result<Vec<BuildResult>>
where
    E: ContainerEngine + ?Sized,
    M: MetadataSource,
{
    let config = ApplicationConfiguration::read(&args.config)?;
    let app_version = config.resolve_version(args.version.as_deref())?;
    let build = PackageBuildParameters::new(&args.application)?
        .with_additional_libs(args.additional_libs.clone());
    let models = models::discover(args.models.as_deref()).context("Failed to read models")?;

    for image in [&args.base_image, &args.build_image].into_iter().flatten() {
        if !image_exists(engine, image) {
            bail!("Image '{image}' not found locally and could not be pulled");
        }
    }

    let request = PlatformRequest {
        platforms: args.platform.clone(),
        tag: args.tag.clone(),
        app_version: app_version.clone(),
        app_type: build.application_type,
        sdk: args.sdk,
        sdk_version: args.sdk_version.clone(),
        holoscan_sdk_file: args.holoscan_sdk_file.clone(),
        monai_deploy_sdk_file: args.monai_deploy_sdk_file.clone(),
        base_image: args.base_image.clone(),
        build_image: args.build_image.clone(),
        cuda_version: args.cuda,
    };
    let resolved = PlatformResolver::new(sources, detector).configure_platforms(&request)?;

    let options = BuildOptions {
        config,
        app_version,
        sdk: resolved.sdk,
        holoscan_version: resolved.holoscan_version,
        monai_deploy_version: resolved.monai_deploy_version,
        timeout: args.timeout.unwrap_or(paths::DEFAULT_TIMEOUT),
        docs: args.docs.clone(),
        models,
        input_data: args.input_data.clone(),
        includes: args.includes.clone(),
        add_hosts: args.add_host_map(),
        build_cache: args.build_cache.clone().or_else(paths::default_build_cache),
        cmake_args: args.cmake_args.clone(),
        no_cache: args.no_cache,
        output: args.output.clone(),
        username: args.username.clone(),
        uid: args.uid,
        gid: args.gid,
    };

    let builder = ContainerBuilder::new(engine, &build, &options);
    Ok(resolved
        .platforms
        .iter()
        .map(|platform| builder.build(platform))
        .collect())
}

/// Per-platform status block printed after all builds finish.
pub fn summary(results: &[BuildResult]) -> String {
    let mut out = String::new();
    for result in results {
        let _ = writeln!(
            out,
            "\nPlatform: {}/{}",
            result.platform,
            result.platform.configuration()
        );
        match &result.error {
            None => {
                let _ = writeln!(out, "    Status:     Succeeded");
                let _ = writeln!(out, "    Docker Tag: {}", result.tag);
                let tarball = result
                    .tarball
                    .as_ref()
                    .map_or_else(|| "N/A".to_string(), |p| p.display().to_string());
                let _ = writeln!(out, "    Tarball:    {tarball}");
            }
            Some(error) => {
                let _ = writeln!(out, "    Status: Failure");
                let _ = writeln!(out, "    Error:  {error}");
            }
        }
    }
    out
}

/// Package an application into MAP images
pub async fn package(args: &PackageArgs) -> Result<(), CliError> {
    let sources = artifact_sources(args).await.map_err(CliError::Package)?;
    let detector = SdkDetector::new(PythonMetadata::new(SystemRunner), program_name());
    let engine = DockerCli::new(SystemRunner);

    let results = execute(&engine, &sources, &detector, args).map_err(CliError::Package)?;

    info!("Build Summary:");
    print!("{}", summary(&results));

    let failed = results.iter().filter(|r| !r.succeeded()).count();
    if failed > 0 {
        error!("{failed} of {} platform builds failed", results.len());
        return Err(CliError::Package(anyhow::anyhow!(
            "{failed} platform build(s) failed"
        )));
    }
    Ok(())
}
