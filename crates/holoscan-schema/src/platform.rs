//! Hardware targets and the static platform table.
//!
//! Every user-facing [`Platform`] maps to exactly one [`PlatformArch`] and one
//! canonical ([`InternalPlatform`], [`PlatformConfiguration`]) pair. The pair
//! drives manifest lookups and image tags; the architecture drives the
//! container build platform and the debian/CUDA architecture strings.

use std::fmt;
use std::str::FromStr;

/// Target hardware platform as accepted on the command line.
///
/// # Example
///
/// ```
/// use holoscan_schema::{Platform, PlatformConfiguration};
///
/// let platform: Platform = " IGX-dGPU ".parse().unwrap();
/// assert_eq!(platform, Platform::IgxDgpu);
/// assert_eq!(platform.configuration(), PlatformConfiguration::Dgpu);
/// assert_eq!(platform.arch().docker_platform(), "linux/arm64");
/// ```
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
pub enum Platform {
    /// Generic x86-64 workstation with a discrete GPU.
    #[serde(rename = "x86_64")]
    X86_64,
    /// NVIDIA Jetson AGX Orin developer kit.
    #[serde(rename = "jetson")]
    Jetson,
    /// IGX Orin developer kit running on its integrated GPU.
    #[serde(rename = "igx-igpu")]
    IgxIgpu,
    /// IGX Orin developer kit running on a discrete GPU.
    #[serde(rename = "igx-dgpu")]
    IgxDgpu,
    /// Arm server base system architecture host with a discrete GPU.
    #[serde(rename = "sbsa")]
    Sbsa,
}

/// A row of the static platform table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlatformSpec {
    /// Canonical platform name used in tags and manifest keys.
    pub internal: InternalPlatform,
    /// GPU mode of the target.
    pub configuration: PlatformConfiguration,
    /// Architecture family of the target.
    pub arch: PlatformArch,
}

const PLATFORM_TABLE: [(Platform, PlatformSpec); 5] = [
    (
        Platform::X86_64,
        PlatformSpec {
            internal: InternalPlatform::X64Workstation,
            configuration: PlatformConfiguration::Dgpu,
            arch: PlatformArch::Amd64,
        },
    ),
    (
        Platform::Jetson,
        PlatformSpec {
            internal: InternalPlatform::JetsonAgxOrinDevkit,
            configuration: PlatformConfiguration::Igpu,
            arch: PlatformArch::Arm64,
        },
    ),
    (
        Platform::IgxIgpu,
        PlatformSpec {
            internal: InternalPlatform::IgxOrinDevkit,
            configuration: PlatformConfiguration::Igpu,
            arch: PlatformArch::Arm64,
        },
    ),
    (
        Platform::IgxDgpu,
        PlatformSpec {
            internal: InternalPlatform::IgxOrinDevkit,
            configuration: PlatformConfiguration::Dgpu,
            arch: PlatformArch::Arm64,
        },
    ),
    (
        Platform::Sbsa,
        PlatformSpec {
            internal: InternalPlatform::Sbsa,
            configuration: PlatformConfiguration::Dgpu,
            arch: PlatformArch::Arm64,
        },
    ),
];

impl Platform {
    /// All platforms, in table order.
    pub const ALL: [Platform; 5] = [
        Platform::X86_64,
        Platform::Jetson,
        Platform::IgxIgpu,
        Platform::IgxDgpu,
        Platform::Sbsa,
    ];

    /// Table row for this platform.
    pub fn spec(self) -> PlatformSpec {
        // Table rows are laid out in discriminant order.
        PLATFORM_TABLE[self as usize].1
    }

    /// Canonical internal platform.
    pub fn internal(self) -> InternalPlatform {
        self.spec().internal
    }

    /// GPU configuration of the canonical pair.
    pub fn configuration(self) -> PlatformConfiguration {
        self.spec().configuration
    }

    /// Architecture family.
    pub fn arch(self) -> PlatformArch {
        self.spec().arch
    }

    /// Command-line spelling.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::X86_64 => "x86_64",
            Self::Jetson => "jetson",
            Self::IgxIgpu => "igx-igpu",
            Self::IgxDgpu => "igx-dgpu",
            Self::Sbsa => "sbsa",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|p| p.as_str() == wanted)
            .ok_or_else(|| {
                let valid: Vec<&str> = Self::ALL.iter().map(|p| p.as_str()).collect();
                format!("Invalid platform '{s}'; expected one of: {}", valid.join(", "))
            })
    }
}

/// Canonical platform names used in image tags and build-image lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum InternalPlatform {
    /// IGX Orin developer kit.
    #[serde(rename = "igx-orin-devkit")]
    IgxOrinDevkit,
    /// Jetson AGX Orin developer kit.
    #[serde(rename = "jetson-agx-orin-devkit")]
    JetsonAgxOrinDevkit,
    /// x86-64 workstation.
    #[serde(rename = "x64-workstation")]
    X64Workstation,
    /// Arm server.
    #[serde(rename = "sbsa")]
    Sbsa,
}

impl InternalPlatform {
    /// Canonical spelling.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::IgxOrinDevkit => "igx-orin-devkit",
            Self::JetsonAgxOrinDevkit => "jetson-agx-orin-devkit",
            Self::X64Workstation => "x64-workstation",
            Self::Sbsa => "sbsa",
        }
    }
}

impl fmt::Display for InternalPlatform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// GPU operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlatformConfiguration {
    /// Integrated GPU.
    Igpu,
    /// Discrete GPU.
    Dgpu,
}

impl PlatformConfiguration {
    /// Lowercase spelling (`igpu` / `dgpu`), used as manifest key and `GPU_TYPE`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Igpu => "igpu",
            Self::Dgpu => "dgpu",
        }
    }
}

impl fmt::Display for PlatformConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlatformConfiguration {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "igpu" => Ok(Self::Igpu),
            "dgpu" => Ok(Self::Dgpu),
            _ => Err(format!("Invalid platform configuration '{s}'; expected dgpu or igpu")),
        }
    }
}

/// Architecture family of a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum PlatformArch {
    /// `x86_64` / `amd64`.
    #[serde(rename = "linux/amd64")]
    Amd64,
    /// `aarch64` / `arm64`.
    #[serde(rename = "linux/arm64")]
    Arm64,
}

impl PlatformArch {
    /// Container build platform (`linux/amd64`, `linux/arm64`).
    ///
    /// Also the key of the health-probe mapping in the artifact manifest.
    pub fn docker_platform(self) -> &'static str {
        match self {
            Self::Amd64 => "linux/amd64",
            Self::Arm64 => "linux/arm64",
        }
    }

    /// Debian architecture of the Holoscan package.
    pub fn holoscan_deb_arch(self) -> &'static str {
        match self {
            Self::Amd64 => "amd64",
            Self::Arm64 => "arm64",
        }
    }

    /// Architecture segment of CUDA repository paths.
    pub fn cuda_deb_arch(self) -> &'static str {
        match self {
            Self::Amd64 => "x86_64",
            Self::Arm64 => "sbsa",
        }
    }

    /// Compiler target architecture (`x86_64` / `aarch64`).
    ///
    /// Matches `std::env::consts::ARCH` on the corresponding host.
    pub fn target_arch(self) -> &'static str {
        match self {
            Self::Amd64 => "x86_64",
            Self::Arm64 => "aarch64",
        }
    }

    /// Architecture of the running host, if it is one of the supported families.
    pub fn host() -> Option<Self> {
        Self::from_machine(std::env::consts::ARCH)
    }

    /// Maps a machine name (`uname -m` style) onto a family.
    pub fn from_machine(machine: &str) -> Option<Self> {
        match machine.to_lowercase().as_str() {
            "x86_64" | "amd64" => Some(Self::Amd64),
            "aarch64" | "arm64" => Some(Self::Arm64),
            _ => None,
        }
    }
}

impl fmt::Display for PlatformArch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.docker_platform())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arm_platforms_share_arch_strings() {
        for platform in [
            Platform::Jetson,
            Platform::IgxIgpu,
            Platform::IgxDgpu,
            Platform::Sbsa,
        ] {
            let arch = platform.arch();
            assert_eq!(arch.holoscan_deb_arch(), "arm64");
            assert_eq!(arch.cuda_deb_arch(), "sbsa");
            assert_eq!(arch.target_arch(), "aarch64");
        }
    }

    #[test]
    fn x86_64_arch_strings() {
        let arch = Platform::X86_64.arch();
        assert_eq!(arch.holoscan_deb_arch(), "amd64");
        assert_eq!(arch.cuda_deb_arch(), "x86_64");
        assert_eq!(arch.target_arch(), "x86_64");
        assert_eq!(arch.docker_platform(), "linux/amd64");
    }

    #[test]
    fn table_rows_follow_discriminants() {
        for (index, (platform, _)) in PLATFORM_TABLE.iter().enumerate() {
            assert_eq!(*platform as usize, index);
            assert_eq!(Platform::ALL[index], *platform);
        }
    }

    #[test]
    fn table_pairs() {
        assert_eq!(
            Platform::Jetson.internal(),
            InternalPlatform::JetsonAgxOrinDevkit
        );
        assert_eq!(Platform::IgxIgpu.configuration(), PlatformConfiguration::Igpu);
        assert_eq!(Platform::IgxDgpu.configuration(), PlatformConfiguration::Dgpu);
        assert_eq!(Platform::Sbsa.internal(), InternalPlatform::Sbsa);
        assert_eq!(Platform::X86_64.internal().as_str(), "x64-workstation");
    }

    #[test]
    fn parse_is_case_and_space_insensitive() {
        assert_eq!("JETSON".parse::<Platform>(), Ok(Platform::Jetson));
        assert_eq!(" x86_64 ".parse::<Platform>(), Ok(Platform::X86_64));
        assert!("bad-platform".parse::<Platform>().is_err());
        assert!("".parse::<Platform>().is_err());
    }

    #[test]
    fn parse_configuration() {
        assert_eq!(
            " DGPU ".parse::<PlatformConfiguration>(),
            Ok(PlatformConfiguration::Dgpu)
        );
        assert!("bad-platform-config".parse::<PlatformConfiguration>().is_err());
        assert!("".parse::<PlatformConfiguration>().is_err());
    }

    #[test]
    fn machine_names() {
        assert_eq!(PlatformArch::from_machine("aarch64"), Some(PlatformArch::Arm64));
        assert_eq!(PlatformArch::from_machine("AMD64"), Some(PlatformArch::Amd64));
        assert_eq!(PlatformArch::from_machine("riscv64"), None);
    }
}
