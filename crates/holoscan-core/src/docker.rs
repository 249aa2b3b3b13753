//! Container engine seam and its Docker CLI implementation.
//!
//! Orchestrators talk to a [`ContainerEngine`]; [`DockerCli`] shells out to
//! `docker` and `docker buildx` through a [`CommandRunner`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use holoscan_schema::ImageReference;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::host::{CommandRunner, HostError};

#[derive(Error, Debug)]
pub enum ContainerError {
    #[error("error retrieving network information: {0}")]
    NetworkList(String),

    #[error("error creating network '{name}': {message}")]
    NetworkCreate { name: String, message: String },

    #[error("invalid image name '{0}'")]
    InvalidImage(String),

    #[error("'{command}' failed with exit code {code}: {stderr}")]
    CommandFailed {
        command: String,
        code: i32,
        stderr: String,
    },

    #[error(transparent)]
    Host(#[from] HostError),
}

/// `docker buildx build` invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildRequest {
    pub context: PathBuf,
    pub dockerfile: PathBuf,
    pub builder: Option<String>,
    pub tags: Vec<String>,
    pub platforms: Vec<String>,
    pub build_args: BTreeMap<String, String>,
    pub add_hosts: BTreeMap<String, String>,
    /// Local cache directory used for both `--cache-from` and `--cache-to`.
    pub cache_dir: Option<PathBuf>,
    pub no_cache: bool,
    pub pull: bool,
    /// Load the result into the local image store.
    pub load: bool,
    /// Export the result as a docker-archive tarball instead of loading it.
    pub tarball: Option<PathBuf>,
    pub progress: String,
}

/// Bind mount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    pub source: PathBuf,
    pub target: String,
    pub read_only: bool,
}

/// `docker run` invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSpec {
    pub image: String,
    pub name: Option<String>,
    pub network: Option<String>,
    pub user: Option<String>,
    pub group_adds: Vec<String>,
    pub env: Vec<(String, String)>,
    pub mounts: Vec<Mount>,
    /// Device nodes passed with `--device`.
    pub devices: Vec<String>,
    /// `--gpus` value.
    pub gpus: Option<String>,
    /// `--runtime` value.
    pub runtime: Option<String>,
    pub shm_size: Option<u64>,
    pub ipc_host: bool,
    /// `name=soft[:hard]` ulimits.
    pub ulimits: Vec<String>,
    pub cap_add: Vec<String>,
    /// Allocate a TTY and keep stdin open.
    pub terminal: bool,
    pub detach: bool,
    pub remove: bool,
    /// Arguments appended after the image.
    pub command: Vec<String>,
}

/// Operations the CLI needs from a container engine.
pub trait ContainerEngine {
    /// Whether the image is in the local store.
    fn image_exists(&self, image: &str) -> Result<bool, ContainerError>;
    fn pull(&self, image: &str) -> Result<(), ContainerError>;
    fn network_exists(&self, name: &str) -> Result<bool, ContainerError>;
    fn create_network(&self, name: &str) -> Result<(), ContainerError>;
    /// Whether the `buildx` plugin is installed.
    fn buildx_available(&self) -> bool;
    fn builder_exists(&self, name: &str) -> Result<bool, ContainerError>;
    fn create_builder(&self, name: &str) -> Result<(), ContainerError>;
    fn build(&self, request: &BuildRequest) -> Result<(), ContainerError>;
    /// Creates a stopped container and returns its id.
    fn create_container(&self, image: &str) -> Result<String, ContainerError>;
    fn copy_from_container(
        &self,
        container: &str,
        source: &str,
        dest: &Path,
    ) -> Result<(), ContainerError>;
    fn remove_container(&self, container: &str) -> Result<(), ContainerError>;
    /// Runs a container and returns its exit code.
    fn run(&self, spec: &RunSpec) -> Result<i32, ContainerError>;
}

/// Whether `image` is available locally, pulling it if needed.
///
/// Engine errors are logged and reported as unavailable.
pub fn image_exists<E: ContainerEngine + ?Sized>(engine: &E, image: &str) -> bool {
    match engine.image_exists(image) {
        Ok(true) => true,
        Ok(false) => {
            info!("Image {image} not found locally, pulling...");
            match engine.pull(image) {
                Ok(()) => true,
                Err(e) => {
                    warn!("Unable to pull {image}: {e}");
                    false
                }
            }
        }
        Err(e) => {
            warn!("Unable to inspect {image}: {e}");
            false
        }
    }
}

/// Uses `network`, or `{image-name}-network` when none is given, creating it
/// if missing. Returns the network name.
pub fn create_or_use_network<E: ContainerEngine + ?Sized>(
    engine: &E,
    network: Option<&str>,
    image: &str,
) -> Result<String, ContainerError> {
    let name = match network {
        Some(network) => network.to_string(),
        None => {
            let reference = ImageReference::parse(image)
                .ok_or_else(|| ContainerError::InvalidImage(image.to_string()))?;
            format!("{}-network", reference.short_name())
        }
    };

    let exists = engine
        .network_exists(&name)
        .map_err(|e| ContainerError::NetworkList(e.to_string()))?;
    if !exists {
        info!("Creating Docker network {name}");
        engine
            .create_network(&name)
            .map_err(|e| ContainerError::NetworkCreate {
                name: name.clone(),
                message: e.to_string(),
            })?;
    }
    Ok(name)
}

/// Uses the named buildx builder, creating it if missing.
pub fn create_and_get_builder<E: ContainerEngine + ?Sized>(
    engine: &E,
    name: &str,
) -> Result<String, ContainerError> {
    if !engine.builder_exists(name)? {
        info!("Creating buildx builder {name}");
        engine.create_builder(name)?;
    }
    Ok(name.to_string())
}

/// [`ContainerEngine`] that drives the `docker` CLI.
#[derive(Debug, Clone)]
pub struct DockerCli<R> {
    runner: R,
    bin: String,
}

impl<R: CommandRunner> DockerCli<R> {
    pub fn new(runner: R) -> Self {
        Self {
            runner,
            bin: "docker".to_string(),
        }
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    fn exec(&self, args: Vec<String>) -> Result<String, ContainerError> {
        let output = self.runner.output(&self.bin, &args)?;
        if !output.success() {
            return Err(ContainerError::CommandFailed {
                command: format!("{} {}", self.bin, args.join(" ")),
                code: output.code,
                stderr: output.stderr.trim().to_string(),
            });
        }
        Ok(output.stdout)
    }

    fn succeeds(&self, args: Vec<String>) -> Result<bool, ContainerError> {
        Ok(self.runner.output(&self.bin, &args)?.success())
    }

    /// Arguments for `docker buildx build`.
    pub fn build_args(request: &BuildRequest) -> Vec<String> {
        let mut args: Vec<String> = vec!["buildx".into(), "build".into()];
        if let Some(builder) = &request.builder {
            args.extend(["--builder".into(), builder.clone()]);
        }
        args.extend(["--file".into(), request.dockerfile.display().to_string()]);
        for tag in &request.tags {
            args.extend(["--tag".into(), tag.clone()]);
        }
        if !request.platforms.is_empty() {
            args.extend(["--platform".into(), request.platforms.join(",")]);
        }
        for (key, value) in &request.build_args {
            args.extend(["--build-arg".into(), format!("{key}={value}")]);
        }
        for (host, ip) in &request.add_hosts {
            args.extend(["--add-host".into(), format!("{host}:{ip}")]);
        }
        if let Some(cache) = &request.cache_dir {
            args.extend([
                "--cache-from".into(),
                format!("type=local,src={}", cache.display()),
                "--cache-to".into(),
                format!("type=local,dest={}", cache.display()),
            ]);
        }
        if request.no_cache {
            args.push("--no-cache".into());
        }
        if request.pull {
            args.push("--pull".into());
        }
        if let Some(tarball) = &request.tarball {
            args.extend([
                "--output".into(),
                format!("type=docker,dest={}", tarball.display()),
            ]);
        } else if request.load {
            args.push("--load".into());
        }
        if !request.progress.is_empty() {
            args.extend(["--progress".into(), request.progress.clone()]);
        }
        args.push(request.context.display().to_string());
        args
    }

    /// Arguments for `docker run`.
    pub fn run_args(spec: &RunSpec) -> Vec<String> {
        let mut args: Vec<String> = vec!["run".into()];
        if spec.remove {
            args.push("--rm".into());
        }
        if spec.detach {
            args.push("--detach".into());
        }
        if spec.terminal {
            args.extend(["--interactive".into(), "--tty".into()]);
        }
        if let Some(name) = &spec.name {
            args.extend(["--name".into(), name.clone()]);
        }
        if let Some(network) = &spec.network {
            args.extend(["--network".into(), network.clone()]);
        }
        if let Some(user) = &spec.user {
            args.extend(["--user".into(), user.clone()]);
        }
        for group in &spec.group_adds {
            args.extend(["--group-add".into(), group.clone()]);
        }
        if spec.ipc_host {
            args.extend(["--ipc".into(), "host".into()]);
        }
        if let Some(size) = spec.shm_size {
            args.extend(["--shm-size".into(), size.to_string()]);
        }
        for cap in &spec.cap_add {
            args.extend(["--cap-add".into(), cap.clone()]);
        }
        for ulimit in &spec.ulimits {
            args.extend(["--ulimit".into(), ulimit.clone()]);
        }
        if let Some(runtime) = &spec.runtime {
            args.extend(["--runtime".into(), runtime.clone()]);
        }
        if let Some(gpus) = &spec.gpus {
            args.extend(["--gpus".into(), gpus.clone()]);
        }
        for device in &spec.devices {
            args.extend(["--device".into(), device.clone()]);
        }
        for (key, value) in &spec.env {
            args.extend(["--env".into(), format!("{key}={value}")]);
        }
        for mount in &spec.mounts {
            let mut value = format!(
                "type=bind,source={},target={}",
                mount.source.display(),
                mount.target
            );
            if mount.read_only {
                value.push_str(",readonly");
            }
            args.extend(["--mount".into(), value]);
        }
        args.push(spec.image.clone());
        args.extend(spec.command.iter().cloned());
        args
    }
}

impl<R: CommandRunner> ContainerEngine for DockerCli<R> {
    fn image_exists(&self, image: &str) -> Result<bool, ContainerError> {
        self.succeeds(vec!["image".into(), "inspect".into(), image.into()])
    }

    fn pull(&self, image: &str) -> Result<(), ContainerError> {
        self.exec(vec!["pull".into(), image.into()]).map(|_| ())
    }

    fn network_exists(&self, name: &str) -> Result<bool, ContainerError> {
        let out = self.exec(vec![
            "network".into(),
            "ls".into(),
            "--filter".into(),
            format!("name={name}"),
            "--format".into(),
            "{{.Name}}".into(),
        ])?;
        // The name filter matches substrings.
        Ok(out.lines().any(|line| line.trim() == name))
    }

    fn create_network(&self, name: &str) -> Result<(), ContainerError> {
        self.exec(vec![
            "network".into(),
            "create".into(),
            "--driver".into(),
            "bridge".into(),
            name.into(),
        ])
        .map(|_| ())
    }

    fn buildx_available(&self) -> bool {
        self.succeeds(vec!["buildx".into(), "version".into()])
            .unwrap_or(false)
    }

    fn builder_exists(&self, name: &str) -> Result<bool, ContainerError> {
        self.succeeds(vec!["buildx".into(), "inspect".into(), name.into()])
    }

    fn create_builder(&self, name: &str) -> Result<(), ContainerError> {
        self.exec(vec![
            "buildx".into(),
            "create".into(),
            "--name".into(),
            name.into(),
            "--driver".into(),
            "docker-container".into(),
            "--driver-opt".into(),
            "network=host".into(),
        ])
        .map(|_| ())
    }

    fn build(&self, request: &BuildRequest) -> Result<(), ContainerError> {
        let args = Self::build_args(request);
        debug!("docker {}", args.join(" "));
        let code = self.runner.status(&self.bin, &args)?;
        if code != 0 {
            return Err(ContainerError::CommandFailed {
                command: format!("{} buildx build", self.bin),
                code,
                stderr: String::new(),
            });
        }
        Ok(())
    }

    fn create_container(&self, image: &str) -> Result<String, ContainerError> {
        let out = self.exec(vec!["create".into(), image.into()])?;
        Ok(out.trim().to_string())
    }

    fn copy_from_container(
        &self,
        container: &str,
        source: &str,
        dest: &Path,
    ) -> Result<(), ContainerError> {
        self.exec(vec![
            "cp".into(),
            format!("{container}:{source}"),
            dest.display().to_string(),
        ])
        .map(|_| ())
    }

    fn remove_container(&self, container: &str) -> Result<(), ContainerError> {
        self.exec(vec!["rm".into(), "--force".into(), container.into()])
            .map(|_| ())
    }

    fn run(&self, spec: &RunSpec) -> Result<i32, ContainerError> {
        let args = Self::run_args(spec);
        debug!("docker {}", args.join(" "));
        Ok(self.runner.status(&self.bin, &args)?)
    }
}

#[cfg(any(test, feature = "test-support"))]
pub mod fake {
    use std::cell::RefCell;

    use super::*;

    /// In-memory engine recording builds and runs.
    #[derive(Debug, Default)]
    pub struct FakeEngine {
        pub images: RefCell<Vec<String>>,
        pub pullable: Vec<String>,
        pub networks: RefCell<Vec<String>>,
        pub builders: RefCell<Vec<String>>,
        pub fail_network_list: bool,
        pub fail_network_create: bool,
        pub builds: RefCell<Vec<BuildRequest>>,
        pub runs: RefCell<Vec<RunSpec>>,
        pub exit_code: i32,
        pub no_buildx: bool,
        /// In-container path to file contents served by `copy_from_container`.
        pub files: Vec<(String, String)>,
    }

    impl ContainerEngine for FakeEngine {
        fn image_exists(&self, image: &str) -> Result<bool, ContainerError> {
            Ok(self.images.borrow().iter().any(|i| i == image))
        }

        fn pull(&self, image: &str) -> Result<(), ContainerError> {
            if self.pullable.iter().any(|i| i == image) {
                self.images.borrow_mut().push(image.to_string());
                Ok(())
            } else {
                Err(ContainerError::CommandFailed {
                    command: format!("docker pull {image}"),
                    code: 1,
                    stderr: "not found".to_string(),
                })
            }
        }

        fn network_exists(&self, name: &str) -> Result<bool, ContainerError> {
            if self.fail_network_list {
                return Err(ContainerError::NetworkList("Network error".to_string()));
            }
            Ok(self.networks.borrow().iter().any(|n| n == name))
        }

        fn create_network(&self, name: &str) -> Result<(), ContainerError> {
            if self.fail_network_create {
                return Err(ContainerError::NetworkCreate {
                    name: name.to_string(),
                    message: "Creation error".to_string(),
                });
            }
            self.networks.borrow_mut().push(name.to_string());
            Ok(())
        }

        fn buildx_available(&self) -> bool {
            !self.no_buildx
        }

        fn builder_exists(&self, name: &str) -> Result<bool, ContainerError> {
            Ok(self.builders.borrow().iter().any(|b| b == name))
        }

        fn create_builder(&self, name: &str) -> Result<(), ContainerError> {
            self.builders.borrow_mut().push(name.to_string());
            Ok(())
        }

        fn build(&self, request: &BuildRequest) -> Result<(), ContainerError> {
            self.builds.borrow_mut().push(request.clone());
            Ok(())
        }

        fn create_container(&self, _image: &str) -> Result<String, ContainerError> {
            Ok("123456789abc".to_string())
        }

        fn copy_from_container(
            &self,
            container: &str,
            source: &str,
            dest: &Path,
        ) -> Result<(), ContainerError> {
            let (_, contents) = self
                .files
                .iter()
                .find(|(path, _)| path == source)
                .ok_or_else(|| ContainerError::CommandFailed {
                    command: format!("docker cp {container}:{source}"),
                    code: 1,
                    stderr: format!("Could not find the file {source} in container"),
                })?;
            let target = if dest.is_dir() {
                dest.join(source.rsplit('/').next().unwrap_or(source))
            } else {
                dest.to_path_buf()
            };
            std::fs::write(target, contents).map_err(HostError::from)?;
            Ok(())
        }

        fn remove_container(&self, _container: &str) -> Result<(), ContainerError> {
            Ok(())
        }

        fn run(&self, spec: &RunSpec) -> Result<i32, ContainerError> {
            self.runs.borrow_mut().push(spec.clone());
            Ok(self.exit_code)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fake::FakeEngine;
    use super::*;
    use crate::host::fake::FakeRunner;

    #[test]
    fn creates_missing_network() {
        let engine = FakeEngine::default();
        let name = create_or_use_network(&engine, Some("test-network"), "img").unwrap();
        assert_eq!(name, "test-network");
        assert_eq!(*engine.networks.borrow(), vec!["test-network"]);
    }

    #[test]
    fn reuses_existing_network() {
        let engine = FakeEngine::default();
        engine.networks.borrow_mut().push("test-network".into());
        create_or_use_network(&engine, Some("test-network"), "img").unwrap();
        assert_eq!(engine.networks.borrow().len(), 1);
    }

    #[test]
    fn network_named_after_image() {
        let engine = FakeEngine::default();
        let name = create_or_use_network(&engine, None, "myapp:latest").unwrap();
        assert_eq!(name, "myapp-network");

        let name = create_or_use_network(&engine, None, "nvcr.io/team/other:1.0").unwrap();
        assert_eq!(name, "other-network");
    }

    #[test]
    fn network_list_and_create_failures_differ() {
        let engine = FakeEngine {
            fail_network_list: true,
            ..FakeEngine::default()
        };
        let err = create_or_use_network(&engine, Some("n"), "img").unwrap_err();
        assert!(matches!(err, ContainerError::NetworkList(_)));
        assert!(err.to_string().contains("error retrieving network information"));

        let engine = FakeEngine {
            fail_network_create: true,
            ..FakeEngine::default()
        };
        let err = create_or_use_network(&engine, Some("n"), "img").unwrap_err();
        assert!(matches!(err, ContainerError::NetworkCreate { .. }));
    }

    #[test]
    fn image_exists_pulls_when_missing() {
        let engine = FakeEngine {
            pullable: vec!["test-image:latest".into()],
            ..FakeEngine::default()
        };
        assert!(image_exists(&engine, "test-image:latest"));
        assert!(engine.image_exists("test-image:latest").unwrap());
        assert!(!image_exists(&engine, "missing:latest"));
    }

    #[test]
    fn builder_created_once() {
        let engine = FakeEngine::default();
        create_and_get_builder(&engine, "test-builder").unwrap();
        create_and_get_builder(&engine, "test-builder").unwrap();
        assert_eq!(engine.builders.borrow().len(), 1);
    }

    #[test]
    fn buildx_args() {
        let request = BuildRequest {
            context: PathBuf::from("/tmp/ctx"),
            dockerfile: PathBuf::from("/tmp/ctx/Dockerfile"),
            builder: Some("holoscan_app_builder".into()),
            tags: vec!["app:1.0".into()],
            platforms: vec!["linux/amd64".into()],
            build_args: BTreeMap::from([("UID".into(), "1000".into())]),
            add_hosts: BTreeMap::from([("example.com".into(), "10.0.0.1".into())]),
            cache_dir: Some(PathBuf::from("/cache")),
            no_cache: false,
            pull: true,
            load: true,
            tarball: None,
            progress: "auto".into(),
        };
        let args = DockerCli::<FakeRunner>::build_args(&request).join(" ");
        assert!(args.starts_with("buildx build --builder holoscan_app_builder"));
        assert!(args.contains("--tag app:1.0"));
        assert!(args.contains("--platform linux/amd64"));
        assert!(args.contains("--build-arg UID=1000"));
        assert!(args.contains("--add-host example.com:10.0.0.1"));
        assert!(args.contains("--cache-from type=local,src=/cache"));
        assert!(args.contains("--cache-to type=local,dest=/cache"));
        assert!(args.contains("--pull"));
        assert!(args.contains("--load"));
        assert!(args.ends_with("/tmp/ctx"));

        let export = BuildRequest {
            tarball: Some(PathBuf::from("/out/app-1.0.tar")),
            ..request
        };
        let args = DockerCli::<FakeRunner>::build_args(&export).join(" ");
        assert!(args.contains("--output type=docker,dest=/out/app-1.0.tar"));
        assert!(!args.contains("--load"));
    }

    #[test]
    fn run_args() {
        let spec = RunSpec {
            image: "app:1.0".into(),
            name: Some("driver".into()),
            network: Some("host".into()),
            user: Some("1000:1000".into()),
            group_adds: vec!["44".into()],
            env: vec![("HOLOSCAN_HOSTING_SERVICE".into(), "HOLOSCAN_RUN".into())],
            mounts: vec![Mount {
                source: PathBuf::from("/host/input"),
                target: "/var/holoscan/input".into(),
                read_only: true,
            }],
            shm_size: Some(1024),
            ipc_host: true,
            ulimits: vec!["memlock=-1".into()],
            cap_add: vec!["CAP_SYS_PTRACE".into()],
            gpus: Some("all".into()),
            remove: true,
            command: vec!["--driver".into()],
            ..RunSpec::default()
        };
        let args = DockerCli::<FakeRunner>::run_args(&spec).join(" ");
        assert!(args.starts_with("run --rm --name driver --network host --user 1000:1000"));
        assert!(args.contains("--group-add 44"));
        assert!(args.contains("--ipc host --shm-size 1024 --cap-add CAP_SYS_PTRACE"));
        assert!(args.contains("--gpus all"));
        assert!(args.contains("--env HOLOSCAN_HOSTING_SERVICE=HOLOSCAN_RUN"));
        assert!(args.contains(
            "--mount type=bind,source=/host/input,target=/var/holoscan/input,readonly"
        ));
        assert!(args.ends_with("app:1.0 --driver"));
    }

    #[test]
    fn network_exists_matches_exact_name() {
        let runner = FakeRunner::new();
        runner.respond("docker network", 0, "my-net-2\nmy-net\n");
        let docker = DockerCli::new(runner);
        assert!(docker.network_exists("my-net").unwrap());
        assert!(!docker.network_exists("my").unwrap());
    }

    #[test]
    fn failed_command_carries_code() {
        let runner = FakeRunner::new();
        runner.respond_err("docker pull", 1, "manifest unknown");
        let docker = DockerCli::new(runner);
        match docker.pull("nope:1") {
            Err(ContainerError::CommandFailed { code, stderr, .. }) => {
                assert_eq!(code, 1);
                assert_eq!(stderr, "manifest unknown");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}
