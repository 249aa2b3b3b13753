//! Documents written into every packaged image under `/etc/holoscan/`.
//!
//! `app.json` describes how to launch the application; `pkg.json` describes
//! the package contents and resource requirements. `run` reads both back out
//! of the image before starting it.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{PlatformConfiguration, SdkType};

/// Schema version stamped into both manifests.
pub const API_VERSION: &str = "1.0.0";

/// Port the bundled gRPC health probe listens on.
pub const HEALTH_PROBE_PORT: u16 = 8777;

/// Input or output location of the application.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IoSpec {
    /// Path relative to the working directory.
    pub path: String,
    /// Data formats accepted or produced.
    #[serde(default)]
    pub formats: Option<Vec<String>>,
}

/// Container liveness/readiness probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Probe {
    /// Probe type; always `command`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Command executed inside the container.
    pub command: Vec<String>,
    /// Seconds before the first probe.
    pub initial_delay_seconds: u32,
    /// Seconds between probes.
    pub period_seconds: u32,
    /// Seconds before a probe times out.
    pub timeout_seconds: u32,
    /// Consecutive failures before the container is considered unhealthy.
    pub failure_threshold: u32,
}

impl Probe {
    /// gRPC health probe shipped in Holoscan images.
    pub fn grpc_health() -> Self {
        Self {
            kind: "command".to_string(),
            command: vec![
                "/bin/grpc_health_probe".to_string(),
                "-addr".to_string(),
                format!(":{HEALTH_PROBE_PORT}"),
            ],
            initial_delay_seconds: 1,
            period_seconds: 10,
            timeout_seconds: 1,
            failure_threshold: 3,
        }
    }
}

/// `/etc/holoscan/app.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationManifest {
    /// Manifest schema version.
    pub api_version: String,
    /// Launch command.
    pub command: Vec<String>,
    /// Environment variables set in the image.
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    /// Input location.
    pub input: IoSpec,
    /// Output location.
    pub output: IoSpec,
    /// Readiness probe, Holoscan applications only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readiness: Option<Probe>,
    /// Liveness probe, Holoscan applications only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub liveness: Option<Probe>,
    /// SDK the application is built with.
    pub sdk: SdkType,
    /// SDK version.
    pub sdk_version: String,
    /// Seconds before the application is stopped; zero disables the limit.
    #[serde(default)]
    pub timeout: u64,
    /// Application version.
    pub version: String,
    /// Working directory inside the container.
    pub working_directory: String,
}

impl ApplicationManifest {
    /// Looks up a manifest environment variable.
    pub fn env(&self, key: &str) -> Option<&str> {
        self.environment.get(key).map(String::as_str)
    }
}

/// `/etc/holoscan/pkg.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageManifest {
    /// Manifest schema version.
    pub api_version: String,
    /// Application directory inside the image.
    pub application_root: String,
    /// Model directory inside the image.
    pub model_root: String,
    /// Model name to in-image path.
    #[serde(default)]
    pub models: BTreeMap<String, String>,
    /// Resource requirements, verbatim from the application configuration.
    #[serde(default)]
    pub resources: serde_json::Value,
    /// Package version.
    pub version: String,
    /// GPU configuration the package was built for.
    pub platform_config: PlatformConfiguration,
    /// SDK the application is built with.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdk_type: Option<SdkType>,
}

impl PackageManifest {
    /// Number of GPUs requested in `resources.gpu`, zero when absent.
    pub fn requested_gpus(&self) -> u64 {
        match self.resources.get("gpu") {
            Some(serde_json::Value::Number(n)) => {
                n.as_u64().or_else(|| n.as_f64().map(|f| f.ceil() as u64)).unwrap_or(0)
            }
            Some(serde_json::Value::String(s)) => s.trim().parse().unwrap_or(0),
            _ => 0,
        }
    }
}
