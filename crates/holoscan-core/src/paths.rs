//! Fixed locations inside packaged images, and host-side defaults.

use std::path::PathBuf;

use dirs::home_dir;

/// Application files.
pub const APP_DIR: &str = "/opt/holoscan/app";
/// Application configuration file.
pub const CONFIG_PATH: &str = "/var/holoscan/app.yaml";
/// Documentation copied from `--docs`.
pub const DOCS_DIR: &str = "/opt/holoscan/docs";
/// Application logs.
pub const LOGS_DIR: &str = "/var/holoscan/logs";
/// Additional libraries from `--add`.
pub const LIB_DIR: &str = "/opt/holoscan/lib";
/// Models from `--models`.
pub const MODELS_DIR: &str = "/opt/holoscan/models";
/// Working directory.
pub const WORK_DIR: &str = "/var/holoscan/";
/// Input directory, relative to [`WORK_DIR`].
pub const INPUT_DIR: &str = "input/";
/// Output directory, relative to [`WORK_DIR`].
pub const OUTPUT_DIR: &str = "output/";
/// Application manifest.
pub const APP_MANIFEST_PATH: &str = "/etc/holoscan/app.json";
/// Package manifest.
pub const PKG_MANIFEST_PATH: &str = "/etc/holoscan/pkg.json";
/// Python requirements installed at build time.
pub const REQUIREMENTS_FILE: &str = "requirements.txt";

/// Default container user.
pub const DEFAULT_USERNAME: &str = "holoscan";
/// Default container uid.
pub const DEFAULT_UID: u32 = 1000;
/// Default container gid.
pub const DEFAULT_GID: u32 = 1000;
/// Default application timeout in seconds; zero disables it.
pub const DEFAULT_TIMEOUT: u64 = 0;
/// Shared memory size when nothing else is requested (1 GiB).
pub const DEFAULT_SHM_SIZE: u64 = 1_073_741_824;

/// Build cache name under the home directory.
const BUILD_CACHE_NAME: &str = ".holoscan_build_cache";

/// Default container build cache: `~/.holoscan_build_cache`.
pub fn default_build_cache() -> Option<PathBuf> {
    home_dir().map(|h| h.join(BUILD_CACHE_NAME))
}

/// In-image path of an additional library directory.
pub fn lib_dir_for(name: &str) -> String {
    format!("{LIB_DIR}/{name}")
}
