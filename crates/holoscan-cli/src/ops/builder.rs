//! Per-platform image build: build context, Dockerfile, `buildx` invocation.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use holoscan_core::docker::{BuildRequest, ContainerEngine, ContainerError, create_and_get_builder};
use holoscan_core::parameters::PackageBuildParameters;
use holoscan_core::platforms::{PlatformParameters, SdkPackage};
use holoscan_schema::{ApplicationType, Platform, SdkType};
use thiserror::Error;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::ops::config::ApplicationConfiguration;
use crate::ops::dockerfile::{self, DockerfileContext, Include};
use crate::ops::manifests;
use crate::ops::models::Models;

/// Name of the buildx builder shared by all packaging runs.
pub const BUILDER_NAME: &str = "holoscan_app_builder";

#[derive(Error, Debug)]
pub enum BuildError {
    #[error("Incompatible platform configuration: {0}")]
    Incompatible(String),

    #[error(transparent)]
    Container(#[from] ContainerError),

    #[error("Error preparing build context: {0}")]
    Io(#[from] io::Error),

    #[error("Error rendering Dockerfile: {0}")]
    Render(#[from] tera::Error),
}

/// Inputs shared by every platform build of one `package` invocation.
#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub config: ApplicationConfiguration,
    pub app_version: String,
    pub sdk: SdkType,
    pub holoscan_version: String,
    pub monai_deploy_version: Option<String>,
    pub timeout: u64,
    pub docs: Option<PathBuf>,
    pub models: Models,
    pub input_data: Option<PathBuf>,
    pub includes: Vec<Include>,
    pub add_hosts: BTreeMap<String, String>,
    pub build_cache: Option<PathBuf>,
    pub cmake_args: Option<String>,
    pub no_cache: bool,
    /// Directory receiving image tarballs; images are loaded when unset.
    pub output: Option<PathBuf>,
    pub username: String,
    pub uid: u32,
    pub gid: u32,
}

/// Outcome of one platform build, as listed in the build summary.
#[derive(Debug, Clone)]
pub struct BuildResult {
    pub platform: Platform,
    pub tag: String,
    pub tarball: Option<PathBuf>,
    pub error: Option<String>,
}

impl BuildResult {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Tarball file name for an image tag.
pub fn tarball_name(tag: &str) -> String {
    format!("{}.tar", tag.replace(':', "-"))
}

/// Builds one image per platform with a [`ContainerEngine`].
#[derive(Debug)]
pub struct ContainerBuilder<'a, E: ?Sized> {
    engine: &'a E,
    build: &'a PackageBuildParameters,
    options: &'a BuildOptions,
}

impl<'a, E: ContainerEngine + ?Sized> ContainerBuilder<'a, E> {
    pub fn new(engine: &'a E, build: &'a PackageBuildParameters, options: &'a BuildOptions) -> Self {
        Self {
            engine,
            build,
            options,
        }
    }

    /// Builds the image for `platform`; failures are captured in the result.
    pub fn build(&self, platform: &PlatformParameters) -> BuildResult {
        info!("Building image for {}: {}", platform.platform, platform.tag);
        let (tarball, error) = match self.try_build(platform) {
            Ok(tarball) => (tarball, None),
            Err(e) => (None, Some(e.to_string())),
        };
        BuildResult {
            platform: platform.platform,
            tag: platform.tag.clone(),
            tarball,
            error,
        }
    }

    fn try_build(&self, platform: &PlatformParameters) -> Result<Option<PathBuf>, BuildError> {
        let context = tempfile::Builder::new().prefix("holoscan_").tempdir()?;
        let dockerfile = self.prepare_context(context.path(), platform)?;

        let builder = create_and_get_builder(self.engine, BUILDER_NAME)?;
        let tarball = match &self.options.output {
            Some(dir) => {
                fs::create_dir_all(dir)?;
                Some(dir.join(tarball_name(&platform.tag)))
            }
            None => None,
        };
        let cache_dir = if self.options.no_cache {
            None
        } else {
            self.options.build_cache.clone()
        };
        if let Some(cache) = &cache_dir {
            fs::create_dir_all(cache)?;
        }

        let request = BuildRequest {
            context: context.path().to_path_buf(),
            dockerfile,
            builder: Some(builder),
            tags: vec![platform.tag.clone()],
            platforms: vec![platform.docker_arch().to_string()],
            build_args: self.build_args(platform),
            add_hosts: self.options.add_hosts.clone(),
            cache_dir,
            no_cache: self.options.no_cache,
            pull: !platform.custom_base_image,
            load: tarball.is_none(),
            tarball: tarball.clone(),
            progress: "auto".to_string(),
        };
        self.engine.build(&request)?;

        match &tarball {
            Some(path) => info!("{} exported to {}", platform.tag, path.display()),
            None => info!("{} loaded into the local image store", platform.tag),
        }
        Ok(tarball)
    }

    fn build_args(&self, platform: &PlatformParameters) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("UID".to_string(), self.options.uid.to_string()),
            ("GID".to_string(), self.options.gid.to_string()),
            ("UNAME".to_string(), self.options.username.clone()),
            ("GPU_TYPE".to_string(), platform.configuration.to_string()),
        ])
    }

    /// Writes the build context into `dir` and returns the Dockerfile path.
    pub fn prepare_context(
        &self,
        dir: &Path,
        platform: &PlatformParameters,
    ) -> Result<PathBuf, BuildError> {
        let options = self.options;
        let sdk_version = match options.sdk {
            SdkType::Holoscan => options.holoscan_version.as_str(),
            SdkType::MonaiDeploy => options
                .monai_deploy_version
                .as_deref()
                .unwrap_or(options.holoscan_version.as_str()),
        };
        let app = manifests::app_manifest(
            &options.config,
            self.build,
            options.sdk,
            sdk_version,
            &options.app_version,
            options.timeout,
        );
        let pkg = manifests::package_manifest(
            &options.config,
            &options.models,
            &options.app_version,
            platform.configuration,
            options.sdk,
        );
        manifests::write(dir, &app, &pkg)?;

        self.copy_application(&dir.join("app"))?;
        fs::copy(options.config.path(), dir.join("app.config"))?;

        for (name, path) in &options.models {
            let target = dir.join("models").join(name);
            if path.is_dir() {
                copy_dir(path, &target)?;
            } else {
                copy_file_into(path, &target)?;
            }
        }
        if let Some(docs) = &options.docs {
            copy_dir(docs, &dir.join("docs"))?;
        }
        for lib in &self.build.additional_libs {
            if let Some(name) = lib.file_name() {
                copy_dir(lib, &dir.join("lib").join(name))?;
            }
        }
        if let Some(input) = &options.input_data {
            copy_dir(input, &dir.join("input"))?;
        }

        if let Some(SdkPackage::File(path)) = &platform.holoscan_sdk_file {
            copy_file_into(path, &dir.join("sdk"))?;
        }
        if let Some(path) = &platform.monai_deploy_sdk_file {
            copy_file_into(path, &dir.join("sdk"))?;
        }

        let has_requirements = self.write_requirements(&dir.join("pip"))?;

        let ctx = DockerfileContext {
            build: self.build,
            platform,
            sdk: options.sdk,
            holoscan_version: &options.holoscan_version,
            monai_deploy_version: options.monai_deploy_version.as_deref(),
            title: options.config.title(),
            app_version: &options.app_version,
            includes: &options.includes,
            cmake_args: options.cmake_args.as_deref(),
            has_models: !options.models.is_empty(),
            has_docs: options.docs.is_some(),
            has_input_data: options.input_data.is_some(),
            has_requirements,
        };
        let rendered = dockerfile::render(&ctx)?;
        let path = dir.join("Dockerfile");
        fs::write(&path, rendered)?;
        debug!("Build context prepared in {}", dir.display());
        Ok(path)
    }

    fn copy_application(&self, target: &Path) -> io::Result<()> {
        let application = &self.build.application;
        match self.build.application_type {
            ApplicationType::PythonModule | ApplicationType::CppCMake => {
                copy_dir(application, target)
            }
            ApplicationType::PythonFile | ApplicationType::Binary => {
                copy_file_into(application, target)
            }
        }
    }

    /// Merges `requirements.txt` and `pip-packages` into one file.
    fn write_requirements(&self, dir: &Path) -> io::Result<bool> {
        let mut lines = Vec::new();
        if let Some(file) = &self.build.requirements_file {
            lines.extend(fs::read_to_string(file)?.lines().map(str::to_string));
        }
        if let Some(packages) = self.options.config.pip_packages() {
            lines.extend(packages.iter().cloned());
        }
        if lines.is_empty() {
            return Ok(false);
        }
        fs::create_dir_all(dir)?;
        fs::write(dir.join("requirements.txt"), lines.join("\n") + "\n")?;
        Ok(true)
    }
}

fn copy_file_into(file: &Path, dir: &Path) -> io::Result<()> {
    let name = file
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))?;
    fs::create_dir_all(dir)?;
    fs::copy(file, dir.join(name))?;
    Ok(())
}

fn copy_dir(src: &Path, dest: &Path) -> io::Result<()> {
    for entry in WalkDir::new(src) {
        let entry = entry.map_err(io::Error::from)?;
        let relative = entry.path().strip_prefix(src).map_err(io::Error::other)?;
        let target = dest.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}
