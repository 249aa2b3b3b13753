//! Application classification and launch layout.
//!
//! An application path is classified by the first matching rule:
//!
//! 1. directory containing `__main__.py` → [`ApplicationType::PythonModule`]
//! 2. `.py` file → [`ApplicationType::PythonFile`]
//! 3. directory containing `CMakeLists.txt` → [`ApplicationType::CppCMake`]
//! 4. executable file → [`ApplicationType::Binary`]
//!
//! Anything else is [`ApplicationError::UnknownApplicationType`].

use std::path::{Path, PathBuf};

use holoscan_schema::ApplicationType;
use thiserror::Error;
use tracing::debug;

use crate::paths;

pub const PYTHON_MAIN_FILE: &str = "__main__.py";
pub const CPP_CMAKELIST_FILE: &str = "CMakeLists.txt";
pub const PYTHON_EXECUTABLE: &str = "python3";

#[derive(Error, Debug)]
pub enum ApplicationError {
    #[error(
        "Unsupported application type: {}. Expected a Python module directory, a .py file, \
         a CMake project directory or an executable.",
        .0.display()
    )]
    UnknownApplicationType(PathBuf),

    #[error("Application path has no file name: {}", .0.display())]
    InvalidPath(PathBuf),
}

type Rule = (fn(&Path) -> bool, ApplicationType);

const RULES: [Rule; 4] = [
    (is_python_module, ApplicationType::PythonModule),
    (is_python_file, ApplicationType::PythonFile),
    (is_cmake_project, ApplicationType::CppCMake),
    (is_executable, ApplicationType::Binary),
];

fn is_python_module(path: &Path) -> bool {
    path.is_dir() && path.join(PYTHON_MAIN_FILE).exists()
}

fn is_python_file(path: &Path) -> bool {
    path.is_file() && path.extension().is_some_and(|e| e == "py")
}

fn is_cmake_project(path: &Path) -> bool {
    path.is_dir() && path.join(CPP_CMAKELIST_FILE).exists()
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .is_ok_and(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Classifies an application path.
pub fn classify(path: &Path) -> Result<ApplicationType, ApplicationError> {
    RULES
        .iter()
        .find(|(matches, _)| matches(path))
        .map(|(_, kind)| *kind)
        .ok_or_else(|| ApplicationError::UnknownApplicationType(path.to_path_buf()))
}

/// How the application is laid out in, and launched from, the image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageBuildParameters {
    pub application: PathBuf,
    pub application_type: ApplicationType,
    /// The application directory, or the directory holding a single-file app.
    pub application_directory: PathBuf,
    /// Launch command inside the container.
    pub command: Vec<String>,
    /// Base name of the application path.
    pub command_filename: String,
    /// `requirements.txt` next to the application, if any.
    pub requirements_file: Option<PathBuf>,
    /// Library directories copied to `/opt/holoscan/lib/<name>`.
    pub additional_libs: Vec<PathBuf>,
}

impl PackageBuildParameters {
    /// Classifies `application` and derives its launch command.
    pub fn new(application: &Path) -> Result<Self, ApplicationError> {
        let application_type = classify(application)?;
        let command_filename = application
            .file_name()
            .ok_or_else(|| ApplicationError::InvalidPath(application.to_path_buf()))?
            .to_string_lossy()
            .into_owned();

        let application_directory = if application.is_dir() {
            application.to_path_buf()
        } else {
            application
                .parent()
                .map_or_else(|| PathBuf::from("."), Path::to_path_buf)
        };

        let in_image = format!("{}/{command_filename}", paths::APP_DIR);
        let command = match application_type {
            ApplicationType::PythonModule => {
                vec![PYTHON_EXECUTABLE.to_string(), paths::APP_DIR.to_string()]
            }
            ApplicationType::PythonFile => vec![PYTHON_EXECUTABLE.to_string(), in_image],
            ApplicationType::CppCMake | ApplicationType::Binary => vec![in_image],
        };

        let requirements = application_directory.join(paths::REQUIREMENTS_FILE);
        let requirements_file = requirements.is_file().then_some(requirements);

        debug!(
            "Application {} classified as {application_type}",
            application.display()
        );
        Ok(Self {
            application: application.to_path_buf(),
            application_type,
            application_directory,
            command,
            command_filename,
            requirements_file,
            additional_libs: Vec::new(),
        })
    }

    pub fn with_additional_libs(mut self, libs: Vec<PathBuf>) -> Self {
        self.additional_libs = libs;
        self
    }

    pub fn has_requirements(&self) -> bool {
        self.requirements_file.is_some()
    }

    /// Launch command as a JSON array, for `ENTRYPOINT` and the manifest.
    pub fn command_json(&self) -> String {
        serde_json::to_string(&self.command).unwrap_or_else(|_| "[]".to_string())
    }

    /// In-image library directories joined with `:`.
    pub fn additional_lib_paths(&self) -> String {
        self.additional_libs
            .iter()
            .filter_map(|lib| lib.file_name())
            .map(|name| paths::lib_dir_for(&name.to_string_lossy()))
            .collect::<Vec<_>>()
            .join(":")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[cfg(unix)]
    fn make_executable(path: &Path) {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
    }

    #[test]
    fn python_module_round_trip() {
        let dir = TempDir::new().unwrap();
        let app = dir.path().join("app");
        fs::create_dir(&app).unwrap();
        fs::write(app.join(PYTHON_MAIN_FILE), "print('hi')").unwrap();
        fs::write(app.join("requirements.txt"), "numpy\n").unwrap();

        let params = PackageBuildParameters::new(&app).unwrap();
        assert_eq!(params.application_type, ApplicationType::PythonModule);
        assert_eq!(params.application_directory, app);
        assert_eq!(params.command, vec!["python3", "/opt/holoscan/app"]);
        assert_eq!(params.command_json(), r#"["python3","/opt/holoscan/app"]"#);
        assert_eq!(params.command_filename, "app");
        assert!(params.has_requirements());

        fs::remove_file(app.join(PYTHON_MAIN_FILE)).unwrap();
        assert!(matches!(
            PackageBuildParameters::new(&app),
            Err(ApplicationError::UnknownApplicationType(_))
        ));
    }

    #[test]
    fn python_file() {
        let dir = TempDir::new().unwrap();
        let app = dir.path().join("app.py");
        fs::write(&app, "print('hi')").unwrap();

        let params = PackageBuildParameters::new(&app).unwrap();
        assert_eq!(params.application_type, ApplicationType::PythonFile);
        assert_eq!(params.application_directory, dir.path());
        assert_eq!(params.command, vec!["python3", "/opt/holoscan/app/app.py"]);
        assert!(!params.has_requirements());
    }

    #[test]
    fn cmake_round_trip() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(CPP_CMAKELIST_FILE), "project(x)").unwrap();

        let params = PackageBuildParameters::new(dir.path()).unwrap();
        assert_eq!(params.application_type, ApplicationType::CppCMake);
        let name = dir.path().file_name().unwrap().to_string_lossy().into_owned();
        assert_eq!(params.command, vec![format!("/opt/holoscan/app/{name}")]);

        fs::remove_file(dir.path().join(CPP_CMAKELIST_FILE)).unwrap();
        assert!(classify(dir.path()).is_err());
    }

    #[test]
    fn main_file_wins_over_cmake() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(PYTHON_MAIN_FILE), "").unwrap();
        fs::write(dir.path().join(CPP_CMAKELIST_FILE), "").unwrap();
        assert_eq!(classify(dir.path()).unwrap(), ApplicationType::PythonModule);
    }

    #[cfg(unix)]
    #[test]
    fn binary_round_trip() {
        let dir = TempDir::new().unwrap();
        let exe = dir.path().join("exe");
        fs::write(&exe, "#!/bin/sh\n").unwrap();
        assert!(classify(&exe).is_err());

        make_executable(&exe);
        let params = PackageBuildParameters::new(&exe).unwrap();
        assert_eq!(params.application_type, ApplicationType::Binary);
        assert_eq!(params.application_directory, dir.path());
        assert_eq!(params.command, vec!["/opt/holoscan/app/exe"]);
    }

    #[test]
    fn missing_path_is_unknown() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            classify(&dir.path().join("nope")),
            Err(ApplicationError::UnknownApplicationType(_))
        ));
    }

    #[test]
    fn lib_paths_by_basename() {
        let dir = TempDir::new().unwrap();
        let app = dir.path().join("app.py");
        fs::write(&app, "").unwrap();
        let params = PackageBuildParameters::new(&app)
            .unwrap()
            .with_additional_libs(vec![PathBuf::from("/a/libfoo"), PathBuf::from("/b/libbar")]);
        assert_eq!(
            params.additional_lib_paths(),
            "/opt/holoscan/lib/libfoo:/opt/holoscan/lib/libbar"
        );
    }
}
