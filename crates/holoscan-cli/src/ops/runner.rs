//! MAP (packaged application image) run orchestration.
//!
//! `run` happens in four steps, each failing with its own error:
//! host dependency checks, manifest fetch from the image, package-specific
//! checks, then the container run itself.

use std::path::{Path, PathBuf};

use holoscan_core::docker::{ContainerEngine, ContainerError, Mount, RunSpec, create_or_use_network, image_exists};
use holoscan_core::host::{self, CommandRunner, HostError};
use holoscan_core::paths;
use holoscan_schema::version::release_version;
use holoscan_schema::{ApplicationManifest, PackageManifest};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::ops::manifests::HOLOSCAN_CONFIG_PATH;
use crate::ops::resources::{ResourceError, shared_memory_size};

/// Oldest NVIDIA Container Toolkit that can expose GPUs to a MAP.
pub const MIN_NVIDIA_CTK_VERSION: &str = "1.12.0";

#[derive(Error, Debug)]
pub enum RunError {
    #[error("'{0}' not found. Please make sure it is installed and on PATH.")]
    MissingDependency(String),

    #[error("Unable to find image '{0}' locally or in a registry")]
    ImageNotFound(String),

    #[error("Error reading MAP manifest: {0}")]
    ManifestRead(String),

    #[error("NVIDIA Container Toolkit {found} is not supported; version {required} or later is required")]
    ToolkitVersion { found: String, required: String },

    #[error("No device matches '{0}'")]
    UnmatchedDevice(String),

    #[error("Available GPUs ({available}) are less than required ({required})")]
    GpuResource { available: u64, required: u64 },

    #[error(transparent)]
    SharedMemory(#[from] ResourceError),

    #[error(transparent)]
    Container(#[from] ContainerError),

    #[error(transparent)]
    Host(#[from] HostError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Application exited with code {0}")]
    ExitCode(i32),
}

/// User choices for one `run` invocation.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub image: String,
    pub address: Option<String>,
    pub driver: bool,
    pub worker: bool,
    pub fragments: Option<String>,
    pub worker_address: Option<String>,
    pub input: Option<PathBuf>,
    pub output: Option<PathBuf>,
    pub config: Option<PathBuf>,
    pub name: Option<String>,
    pub health_check: bool,
    /// `None` means a network named after the image.
    pub network: Option<String>,
    pub nic: Option<String>,
    pub use_all_nics: bool,
    pub render: bool,
    pub quiet: bool,
    pub shm_size: Option<String>,
    pub terminal: bool,
    pub devices: Vec<String>,
    pub gpus: Option<String>,
    pub uid: u32,
    pub gid: u32,
    pub remove: bool,
}

/// Finds the device nodes matching each pattern.
///
/// Patterns are relative to `/dev` unless absolute; every pattern must match.
pub fn lookup_devices(patterns: &[String]) -> Result<Vec<String>, RunError> {
    let mut devices = Vec::new();
    for pattern in patterns {
        let full = if pattern.starts_with("/dev/") {
            pattern.clone()
        } else {
            format!("/dev/{pattern}")
        };
        let matches: Vec<String> = glob::glob(&full)
            .map_err(|_| RunError::UnmatchedDevice(pattern.clone()))?
            .filter_map(Result::ok)
            .map(|p| p.display().to_string())
            .collect();
        if matches.is_empty() {
            return Err(RunError::UnmatchedDevice(pattern.clone()));
        }
        debug!("Device pattern {full} matched {matches:?}");
        devices.extend(matches);
    }
    Ok(devices)
}

fn on_path(program: &str) -> bool {
    which::which(program).is_ok()
}

/// Runs MAPs through a [`ContainerEngine`], probing the host with a
/// [`CommandRunner`].
#[derive(Debug)]
pub struct MapRunner<'a, E: ?Sized, R: ?Sized> {
    engine: &'a E,
    host: &'a R,
    path_lookup: fn(&str) -> bool,
}

impl<'a, E: ContainerEngine + ?Sized, R: CommandRunner + ?Sized> MapRunner<'a, E, R> {
    pub fn new(engine: &'a E, host: &'a R) -> Self {
        Self {
            engine,
            host,
            path_lookup: on_path,
        }
    }

    /// Replaces the `PATH` lookup used for dependency checks.
    pub fn with_path_lookup(mut self, lookup: fn(&str) -> bool) -> Self {
        self.path_lookup = lookup;
        self
    }

    /// Checks for `docker`, the buildx plugin and the image.
    pub fn verify_dependencies(&self, image: &str) -> Result<(), RunError> {
        if !(self.path_lookup)("docker") {
            return Err(RunError::MissingDependency("docker".to_string()));
        }
        if !self.engine.buildx_available() {
            return Err(RunError::MissingDependency("docker-buildx".to_string()));
        }
        if !image_exists(self.engine, image) {
            return Err(RunError::ImageNotFound(image.to_string()));
        }
        Ok(())
    }

    /// Copies `app.json` and `pkg.json` out of the image.
    pub fn fetch_map_manifest(
        &self,
        image: &str,
    ) -> Result<(ApplicationManifest, PackageManifest), RunError> {
        let read = |e: &dyn std::fmt::Display| RunError::ManifestRead(e.to_string());
        let dir = tempfile::tempdir()?;
        let app_path = dir.path().join("app.json");
        let pkg_path = dir.path().join("pkg.json");

        info!("Reading MAP manifests from {image}");
        let container = self.engine.create_container(image).map_err(|e| read(&e))?;
        let copied = self
            .engine
            .copy_from_container(&container, paths::APP_MANIFEST_PATH, &app_path)
            .and_then(|()| {
                self.engine
                    .copy_from_container(&container, paths::PKG_MANIFEST_PATH, &pkg_path)
            });
        if let Err(e) = self.engine.remove_container(&container) {
            warn!("Unable to remove container {container}: {e}");
        }
        copied.map_err(|e| read(&e))?;

        let app = read_json(&app_path).map_err(|e| read(&e))?;
        let pkg = read_json(&pkg_path).map_err(|e| read(&e))?;
        Ok((app, pkg))
    }

    /// GPU packages need NVIDIA Container Toolkit 1.12.0 or later.
    pub fn verify_package_dependencies(&self, pkg: &PackageManifest) -> Result<(), RunError> {
        if pkg.requested_gpus() == 0 {
            return Ok(());
        }
        if !(self.path_lookup)("nvidia-ctk") {
            return Err(RunError::MissingDependency("nvidia-ctk".to_string()));
        }
        let line = host::run_cmd_output(
            self.host,
            "nvidia-ctk",
            &host::args(&["--version"]),
            Some("version"),
        )?;
        let unsupported = |found: &str| RunError::ToolkitVersion {
            found: found.to_string(),
            required: MIN_NVIDIA_CTK_VERSION.to_string(),
        };
        let found = line
            .split_whitespace()
            .find_map(release_version)
            .ok_or_else(|| unsupported(line.trim()))?;
        let minimum = release_version(MIN_NVIDIA_CTK_VERSION).ok_or_else(|| unsupported(""))?;
        if found < minimum {
            return Err(unsupported(&found.to_string()));
        }
        debug!("NVIDIA Container Toolkit {found}");
        Ok(())
    }

    /// Assembles the `docker run` invocation.
    pub fn run_spec(
        &self,
        options: &RunOptions,
        app: &ApplicationManifest,
        pkg: &PackageManifest,
    ) -> Result<RunSpec, RunError> {
        let required = pkg.requested_gpus();
        let igpu = host::host_is_native_igpu(self.host);
        if required > 0 {
            let available = u64::try_from(host::gpu_count(self.host)?).unwrap_or(u64::MAX);
            if available < required {
                return Err(RunError::GpuResource {
                    available,
                    required,
                });
            }
        }

        let devices = lookup_devices(&options.devices)?;
        let network = create_or_use_network(self.engine, options.network.as_deref(), &options.image)?;
        let shm_size = shared_memory_size(
            Some(&pkg.resources),
            options.worker,
            options.driver,
            options.fragments.as_deref(),
            options.shm_size.as_deref(),
        )?;

        let gpus = match &options.gpus {
            Some(selection) => Some(selection.clone()),
            None if required > 0 && !igpu => Some("all".to_string()),
            None => None,
        };
        let runtime = igpu.then(|| "nvidia".to_string());

        let mut env = vec![
            (
                "NVIDIA_DRIVER_CAPABILITIES".to_string(),
                if options.render {
                    "graphics,video,compute,utility,display".to_string()
                } else {
                    "compute,utility".to_string()
                },
            ),
            (
                "HOLOSCAN_HOSTING_SERVICE".to_string(),
                "HOLOSCAN_RUN".to_string(),
            ),
            (
                "UCX_CM_USE_ALL_DEVICES".to_string(),
                if options.use_all_nics { "y" } else { "n" }.to_string(),
            ),
        ];
        if let Some(nic) = &options.nic {
            env.push(("UCX_NET_DEVICES".to_string(), nic.clone()));
        }
        if options.health_check {
            env.push(("HOLOSCAN_ENABLE_HEALTH_CHECK".to_string(), "true".to_string()));
        }

        let mut mounts = Vec::new();
        if let Some(input) = &options.input {
            if input.is_dir() {
                mounts.push(Mount {
                    source: std::path::absolute(input)?,
                    target: container_path(&app.working_directory, &app.input.path),
                    read_only: true,
                });
            } else {
                warn!("Input directory {} not found; not mounting it", input.display());
            }
        }
        if let Some(output) = &options.output {
            std::fs::create_dir_all(output)?;
            mounts.push(Mount {
                source: std::path::absolute(output)?,
                target: container_path(&app.working_directory, &app.output.path),
                read_only: false,
            });
        }
        if let Some(config) = &options.config {
            mounts.push(Mount {
                source: std::path::absolute(config)?,
                target: app
                    .env(HOLOSCAN_CONFIG_PATH)
                    .unwrap_or(paths::CONFIG_PATH)
                    .to_string(),
                read_only: true,
            });
        }
        if options.render {
            for key in ["DISPLAY", "XDG_SESSION_TYPE", "XDG_RUNTIME_DIR"] {
                if let Ok(value) = std::env::var(key) {
                    env.push((key.to_string(), value));
                }
            }
            let x11 = Path::new("/tmp/.X11-unix");
            if x11.is_dir() {
                mounts.push(Mount {
                    source: x11.to_path_buf(),
                    target: "/tmp/.X11-unix".to_string(),
                    read_only: true,
                });
            }
        }

        let mut command = Vec::new();
        if options.driver {
            command.push("--driver".to_string());
        }
        if options.worker {
            command.push("--worker".to_string());
        }
        for (flag, value) in [
            ("--address", &options.address),
            ("--worker-address", &options.worker_address),
            ("--fragments", &options.fragments),
        ] {
            if let Some(value) = value {
                command.extend([flag.to_string(), value.clone()]);
            }
        }

        let name = options
            .name
            .clone()
            .or_else(|| options.driver.then(|| "driver".to_string()));

        Ok(RunSpec {
            image: options.image.clone(),
            name,
            network: Some(network),
            user: Some(format!("{}:{}", options.uid, options.gid)),
            group_adds: host::additional_groups(self.host, options.uid == 0, igpu),
            env,
            mounts,
            devices,
            gpus,
            runtime,
            shm_size: Some(shm_size),
            ipc_host: true,
            ulimits: vec!["memlock=-1".to_string(), "stack=67108864".to_string()],
            cap_add: vec!["CAP_SYS_PTRACE".to_string()],
            terminal: options.terminal,
            detach: options.quiet,
            remove: options.remove,
            command,
        })
    }

    /// Runs the MAP; a non-zero exit code is an error.
    pub fn run(
        &self,
        options: &RunOptions,
        app: &ApplicationManifest,
        pkg: &PackageManifest,
    ) -> Result<(), RunError> {
        let spec = self.run_spec(options, app, pkg)?;
        info!(
            "Launching {} ({} {})",
            spec.image,
            app.sdk,
            app.sdk_version
        );
        let code = self.engine.run(&spec)?;
        if code != 0 {
            return Err(RunError::ExitCode(code));
        }
        info!("Application exited successfully");
        Ok(())
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, String> {
    let raw = std::fs::read_to_string(path).map_err(|e| format!("{}: {e}", path.display()))?;
    serde_json::from_str(&raw).map_err(|e| format!("{}: {e}", path.display()))
}

/// Joins the manifest working directory and a relative I/O path.
fn container_path(working_directory: &str, relative: &str) -> String {
    let base = working_directory.trim_end_matches('/');
    let relative = relative.trim_matches('/');
    if relative.is_empty() {
        base.to_string()
    } else {
        format!("{base}/{relative}")
    }
}
