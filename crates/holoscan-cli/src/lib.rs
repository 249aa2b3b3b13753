//! holoscan - package and run Holoscan applications
#![allow(missing_docs)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_panics_doc)]
//!
//! Turns a Holoscan or MONAI Deploy application into a MAP (MONAI
//! Application Package): a container image carrying the application, its
//! models and two manifests describing how to run it.
//!
//! # Commands
//!
//! - `package` resolves the target platforms, renders a Dockerfile and
//!   builds one image per platform with `docker buildx`.
//! - `run` reads the manifests back out of a MAP and starts it with the
//!   GPU, network and shared memory settings it asks for.
//! - `version` and `nics` report on the host.
//!
//! # Layout
//!
//! ```text
//! holoscan-schema   platform table, manifests, versions
//! holoscan-core     artifact manifest, SDK detection, platform resolution, docker
//! holoscan-cli      configuration, Dockerfile, build and run orchestration
//! ```

pub mod cmd;
pub mod ops;

pub use crate::ops::error::CliError;
pub use holoscan_core::CLI_VERSION;

use std::collections::BTreeMap;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use holoscan_schema::{Platform, SdkType};

use crate::ops::dockerfile::Include;

#[derive(Debug, Parser)]
#[command(name = "holoscan")]
#[command(author, version, about = "Holoscan CLI: package and run Holoscan applications")]
pub struct Cli {
    /// Set the logging level (default: INFO)
    #[arg(short = 'l', long, global = true, ignore_case = true)]
    pub log_level: Option<LogLevel>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
    Critical,
}

impl LogLevel {
    /// `tracing` filter directive for this level.
    pub fn directive(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error | Self::Critical => "error",
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Package a Holoscan application into a MAP container image
    Package(Box<PackageArgs>),
    /// Run a packaged application
    Run(Box<RunArgs>),
    /// Print SDK and CLI versions
    Version,
    /// List network interfaces and their addresses
    Nics,
}

#[derive(Debug, Args)]
pub struct PackageArgs {
    /// Application to package: a Python file or module, a CMake project or an executable
    #[arg(value_parser = existing_path)]
    pub application: PathBuf,

    /// Application configuration file (YAML)
    #[arg(short, long, value_parser = existing_file)]
    pub config: PathBuf,

    /// Target platforms, comma separated
    #[arg(long, required = true, value_delimiter = ',', value_parser = parse_platform)]
    pub platform: Vec<Platform>,

    /// Image name and tag, e.g. my-app:1.0
    #[arg(short, long)]
    pub tag: String,

    /// Documentation directory to include
    #[arg(long, value_parser = existing_path)]
    pub docs: Option<PathBuf>,

    /// Model file or directory to include
    #[arg(short, long, value_parser = existing_path)]
    pub models: Option<PathBuf>,

    /// Additional library directory (repeatable)
    #[arg(long = "add", value_parser = existing_dir)]
    pub additional_libs: Vec<PathBuf>,

    /// Application timeout in seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Application version, overriding the configuration file
    #[arg(long)]
    pub version: Option<String>,

    /// Extra host-to-IP mapping for the build, host:ip (repeatable)
    #[arg(long = "add-host", value_parser = parse_host_ip)]
    pub add_hosts: Vec<(String, String)>,

    /// Base image for the application image
    #[arg(long)]
    pub base_image: Option<String>,

    /// Image used to compile CMake applications
    #[arg(long)]
    pub build_image: Option<String>,

    /// Optional runtime dependencies to install (repeatable)
    #[arg(long, value_enum)]
    pub includes: Vec<Include>,

    /// Local buildx cache directory
    #[arg(long, env = "HOLOSCAN_BUILD_CACHE")]
    pub build_cache: Option<PathBuf>,

    /// Extra arguments passed to CMake
    #[arg(long)]
    pub cmake_args: Option<String>,

    /// Do not use the build cache
    #[arg(long)]
    pub no_cache: bool,

    /// SDK the application is written with
    #[arg(long, value_parser = parse_sdk)]
    pub sdk: Option<SdkType>,

    /// SDK version to install, instead of the detected one
    #[arg(long)]
    pub sdk_version: Option<String>,

    /// Artifact manifest: a file, a directory or a URL
    #[arg(long, env = "HOLOSCAN_ARTIFACT_SOURCE")]
    pub source: Option<String>,

    /// Export images as tarballs into this directory
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// User created in the image
    #[arg(long, default_value = holoscan_core::paths::DEFAULT_USERNAME)]
    pub username: String,

    /// Uid of the image user
    #[arg(long, default_value_t = holoscan_core::paths::DEFAULT_UID)]
    pub uid: u32,

    /// Gid of the image user
    #[arg(long, default_value_t = holoscan_core::paths::DEFAULT_GID)]
    pub gid: u32,

    /// Sample input data directory to include
    #[arg(long, value_parser = existing_dir)]
    pub input_data: Option<PathBuf>,

    /// CUDA major version of the image
    #[arg(long, default_value_t = 13, value_parser = clap::value_parser!(u8).range(12..=13))]
    pub cuda: u8,

    /// Holoscan SDK .deb or .whl to install
    #[arg(long, value_parser = existing_file)]
    pub holoscan_sdk_file: Option<PathBuf>,

    /// MONAI Deploy App SDK .whl to install
    #[arg(long, value_parser = existing_file)]
    pub monai_deploy_sdk_file: Option<PathBuf>,
}

impl PackageArgs {
    pub fn add_host_map(&self) -> BTreeMap<String, String> {
        self.add_hosts.iter().cloned().collect()
    }
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// MAP image to run
    pub map: String,

    /// Driver address, host:port
    #[arg(long)]
    pub address: Option<String>,

    /// Run the fragment driver
    #[arg(long)]
    pub driver: bool,

    /// Run a fragment worker
    #[arg(long)]
    pub worker: bool,

    /// Fragments to run, comma separated, or `all`
    #[arg(long)]
    pub fragments: Option<String>,

    /// Worker address, host:port
    #[arg(long)]
    pub worker_address: Option<String>,

    /// Input directory
    #[arg(short, long, default_value = "./input")]
    pub input: PathBuf,

    /// Output directory, created if missing
    #[arg(short, long, default_value = "./output")]
    pub output: PathBuf,

    /// Remove the container when it exits
    #[arg(long = "rm")]
    pub remove: bool,

    /// Configuration file overriding the packaged one
    #[arg(long, value_parser = existing_file)]
    pub config: Option<PathBuf>,

    /// Container name
    #[arg(long)]
    pub name: Option<String>,

    /// Start the gRPC health check service
    #[arg(long)]
    pub health_check: bool,

    /// Docker network
    #[arg(long, default_value = "host")]
    pub network: String,

    /// Network interfaces for UCX, comma separated
    #[arg(long)]
    pub nic: Option<String>,

    /// Let UCX use every network interface
    #[arg(long)]
    pub use_all_nics: bool,

    /// Enable graphics rendering
    #[arg(short, long)]
    pub render: bool,

    /// Run detached without streaming logs
    #[arg(short, long)]
    pub quiet: bool,

    /// Shared memory size, e.g. 1GB or 512Mi; `config` reads it from the package
    #[arg(long)]
    pub shm_size: Option<String>,

    /// Open an interactive terminal in the container
    #[arg(long)]
    pub terminal: bool,

    /// Host devices to map, as /dev patterns
    #[arg(long = "device", num_args = 1..)]
    pub devices: Vec<String>,

    /// GPUs to expose, e.g. all or device=0,1
    #[arg(long)]
    pub gpus: Option<String>,

    /// Uid to run as (default: current user)
    #[arg(long)]
    pub uid: Option<u32>,

    /// Gid to run as (default: current group)
    #[arg(long)]
    pub gid: Option<u32>,
}

fn existing_path(raw: &str) -> Result<PathBuf, String> {
    let path = PathBuf::from(raw);
    if path.exists() {
        Ok(path)
    } else {
        Err(format!("path '{raw}' does not exist"))
    }
}

fn existing_file(raw: &str) -> Result<PathBuf, String> {
    let path = existing_path(raw)?;
    if path.is_file() {
        Ok(path)
    } else {
        Err(format!("'{raw}' is not a file"))
    }
}

fn existing_dir(raw: &str) -> Result<PathBuf, String> {
    let path = existing_path(raw)?;
    if path.is_dir() {
        Ok(path)
    } else {
        Err(format!("'{raw}' is not a directory"))
    }
}

fn parse_platform(raw: &str) -> Result<Platform, String> {
    if raw.trim().is_empty() {
        return Err("empty platform entry".to_string());
    }
    raw.parse()
}

fn parse_sdk(raw: &str) -> Result<SdkType, String> {
    raw.parse()
}

/// Parses `host:ip`; exactly one colon with both sides present.
pub fn parse_host_ip(raw: &str) -> Result<(String, String), String> {
    match raw.split_once(':') {
        Some((host, ip)) if !host.is_empty() && !ip.is_empty() && !ip.contains(':') => {
            Ok((host.to_string(), ip.to_string()))
        }
        _ => Err(format!("invalid value '{raw}'; expected host:ip")),
    }
}
