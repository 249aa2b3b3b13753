pub mod artifacts;
pub mod docker;
pub mod host;
pub mod parameters;
pub mod paths;
pub mod platforms;
pub mod sdk;

pub use artifacts::ArtifactSources;
pub use docker::{ContainerEngine, DockerCli};
pub use host::{CommandRunner, SystemRunner};
pub use platforms::{PlatformParameters, PlatformResolver};

/// Version of the CLI; selects the published artifact manifest.
pub const CLI_VERSION: &str = env!("CARGO_PKG_VERSION");

/// User Agent string for manifest downloads
pub const USER_AGENT: &str = concat!("holoscan-cli/", env!("CARGO_PKG_VERSION"));
