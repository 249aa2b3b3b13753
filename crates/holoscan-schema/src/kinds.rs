//! SDK flavours and application kinds.

use std::fmt;
use std::str::FromStr;

/// SDK an application is built with.
///
/// `MonaiDeploy` applications still need the Holoscan SDK underneath; they
/// additionally carry the MONAI Deploy App SDK.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum SdkType {
    /// Holoscan SDK.
    #[serde(rename = "holoscan")]
    Holoscan,
    /// MONAI Deploy App SDK.
    #[serde(rename = "monai-deploy")]
    MonaiDeploy,
}

impl SdkType {
    /// Command-line and manifest spelling.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Holoscan => "holoscan",
            Self::MonaiDeploy => "monai-deploy",
        }
    }
}

impl fmt::Display for SdkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SdkType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "holoscan" => Ok(Self::Holoscan),
            "monai-deploy" => Ok(Self::MonaiDeploy),
            _ => Err(format!(
                "Invalid SDK '{s}'; expected holoscan or monai-deploy"
            )),
        }
    }
}

/// Shape of the application being packaged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ApplicationType {
    /// Directory with a `__main__.py` entry point.
    PythonModule,
    /// Single Python source file.
    PythonFile,
    /// Directory with a `CMakeLists.txt`.
    CppCMake,
    /// Prebuilt executable.
    Binary,
}

impl ApplicationType {
    /// Whether the application runs on the Python interpreter.
    pub fn is_python(self) -> bool {
        matches!(self, Self::PythonModule | Self::PythonFile)
    }

    /// Name used in logs and manifests.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PythonModule => "PythonModule",
            Self::PythonFile => "PythonFile",
            Self::CppCMake => "CppCMake",
            Self::Binary => "Binary",
        }
    }
}

impl fmt::Display for ApplicationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
