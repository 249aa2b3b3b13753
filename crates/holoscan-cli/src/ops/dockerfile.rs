//! Dockerfile generation.
//!
//! Dockerfiles are rendered with Tera from templates embedded at compile
//! time, one per CUDA major version. Each template branches on the
//! application kind (Python, CMake or binary).

use clap::ValueEnum;
use holoscan_core::parameters::PackageBuildParameters;
use holoscan_core::paths;
use holoscan_core::platforms::{PlatformParameters, SdkPackage};
use holoscan_schema::{ApplicationType, SdkType};
use tera::{Context, Tera};
use tracing::debug;

use crate::ops::builder::BuildError;
use crate::ops::manifests;

/// Template for CUDA 13 images.
pub const DOCKERFILE_TEMPLATE: &str = "Dockerfile.j2";
/// Template for CUDA 12 images.
pub const DOCKERFILE_CU12_TEMPLATE: &str = "Dockerfile-cu12.j2";

const TEMPLATES: [(&str, &str); 2] = [
    (DOCKERFILE_TEMPLATE, include_str!("templates/Dockerfile.j2")),
    (DOCKERFILE_CU12_TEMPLATE, include_str!("templates/Dockerfile-cu12.j2")),
];

/// Optional runtime dependencies installed into the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum)]
pub enum Include {
    Debug,
    Holoviz,
    Torch,
    Onnx,
}

impl Include {
    fn apt_packages(self) -> &'static [&'static str] {
        match self {
            Self::Debug => &["gdb", "strace", "procps", "less", "vim-tiny"],
            Self::Holoviz => &["libvulkan1", "libegl1", "libgl1", "libx11-6", "libxrandr2"],
            Self::Torch => &["libjpeg-turbo8", "libpng16-16", "libnuma1"],
            Self::Onnx => &["libnuma1"],
        }
    }
}

/// Template name for a CUDA major version.
pub fn select_template(cuda_version: u8) -> Result<&'static str, BuildError> {
    match cuda_version {
        12 => Ok(DOCKERFILE_CU12_TEMPLATE),
        13 => Ok(DOCKERFILE_TEMPLATE),
        other => Err(BuildError::Incompatible(format!(
            "CUDA version {other} has no Dockerfile template; use 12 or 13"
        ))),
    }
}

/// Everything the template needs for one platform.
#[derive(Debug)]
pub struct DockerfileContext<'a> {
    pub build: &'a PackageBuildParameters,
    pub platform: &'a PlatformParameters,
    pub sdk: SdkType,
    pub holoscan_version: &'a str,
    pub monai_deploy_version: Option<&'a str>,
    pub title: &'a str,
    pub app_version: &'a str,
    pub includes: &'a [Include],
    pub cmake_args: Option<&'a str>,
    pub has_models: bool,
    pub has_docs: bool,
    pub has_input_data: bool,
    /// A merged `pip/requirements.txt` is in the build context.
    pub has_requirements: bool,
}

impl DockerfileContext<'_> {
    /// apt packages for the release stage, deduplicated in install order.
    fn system_packages(&self) -> Vec<&'static str> {
        let mut packages = vec!["curl", "ca-certificates"];
        if self.build.application_type.is_python() || self.sdk == SdkType::MonaiDeploy {
            packages.extend(["python3", "python3-pip"]);
        }
        for include in self.includes {
            for &package in include.apt_packages() {
                if !packages.contains(&package) {
                    packages.push(package);
                }
            }
        }
        packages
    }

    fn to_context(&self) -> Context {
        let app_type = self.build.application_type;
        // The builder stage only exists for CMake projects.
        let build_image = self
            .platform
            .build_image
            .as_deref()
            .filter(|_| app_type == ApplicationType::CppCMake);
        let holoscan_sdk = self.platform.holoscan_sdk_file.as_ref();

        let mut context = Context::new();
        context.insert("cli_version", holoscan_core::CLI_VERSION);
        context.insert("build_image", &build_image);
        context.insert("base_image", self.platform.base_image.as_deref().unwrap_or_default());
        context.insert("tag", &self.platform.tag);
        context.insert("title", self.title);
        context.insert("app_version", self.app_version);
        context.insert("holoscan_version", self.holoscan_version);
        context.insert("monai_deploy", &(self.sdk == SdkType::MonaiDeploy));
        context.insert("monai_deploy_version", &self.monai_deploy_version);
        context.insert(
            "monai_deploy_sdk_file",
            &self.platform.monai_deploy_sdk_file.as_deref().map(sdk_file_name),
        );
        context.insert(
            "holoscan_sdk_file",
            &holoscan_sdk.and_then(SdkPackage::as_file).map(sdk_file_name),
        );
        context.insert("holoscan_sdk_version", &holoscan_sdk.and_then(SdkPackage::as_version));
        context.insert("health_probe", &self.platform.health_probe);
        context.insert("environment", &manifests::environment());
        context.insert("system_packages", &self.system_packages());
        context.insert("is_python", &app_type.is_python());
        context.insert("lib_paths", &self.build.additional_lib_paths());
        context.insert("cmake_args", self.cmake_args.unwrap_or_default());
        context.insert("command_filename", &self.build.command_filename);
        context.insert("command_json", &self.build.command_json());
        context.insert("has_models", &self.has_models);
        context.insert("has_docs", &self.has_docs);
        context.insert("has_libs", &!self.build.additional_libs.is_empty());
        context.insert("has_input_data", &self.has_input_data);
        context.insert("has_requirements", &self.has_requirements);

        context.insert("manifest_dir", manifests::MANIFEST_DIR);
        context.insert("app_dir", paths::APP_DIR);
        context.insert("lib_dir", paths::LIB_DIR);
        context.insert("models_dir", paths::MODELS_DIR);
        context.insert("docs_dir", paths::DOCS_DIR);
        context.insert("logs_dir", paths::LOGS_DIR);
        context.insert("work_dir", paths::WORK_DIR);
        context.insert("input_dir", paths::INPUT_DIR);
        context.insert("output_dir", paths::OUTPUT_DIR);
        context.insert("config_path", paths::CONFIG_PATH);
        context.insert("app_manifest_path", paths::APP_MANIFEST_PATH);
        context.insert("pkg_manifest_path", paths::PKG_MANIFEST_PATH);
        context
    }
}

/// In-context name of a user-supplied SDK package.
pub fn sdk_file_name(path: &std::path::Path) -> String {
    path.file_name()
        .map_or_else(|| "sdk-package".to_string(), |n| n.to_string_lossy().into_owned())
}

/// Tera instance holding every embedded template.
fn engine() -> Result<Tera, BuildError> {
    let mut tera = Tera::default();
    tera.autoescape_on(vec![]);
    tera.add_raw_templates(TEMPLATES)?;
    Ok(tera)
}

/// Renders the Dockerfile for `ctx`.
pub fn render(ctx: &DockerfileContext<'_>) -> Result<String, BuildError> {
    let template = select_template(ctx.platform.cuda_version)?;
    let rendered = engine()?.render(template, &ctx.to_context())?;
    debug!("Rendered {template} ({} bytes)", rendered.len());
    Ok(rendered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use holoscan_schema::Platform;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn python_app(dir: &TempDir) -> PackageBuildParameters {
        let app = dir.path().join("app");
        fs::create_dir(&app).unwrap();
        fs::write(app.join("__main__.py"), "").unwrap();
        PackageBuildParameters::new(&app).unwrap()
    }

    fn platform(cuda: u8) -> PlatformParameters {
        let mut params = PlatformParameters::new(Platform::X86_64, "image:tag", "1.0", cuda).unwrap();
        params.base_image = Some("nvcr.io/nvidia/cuda:13.0-runtime".into());
        params.holoscan_sdk_file = Some(SdkPackage::Version("3.7.0".into()));
        params
    }

    fn context<'a>(
        build: &'a PackageBuildParameters,
        platform: &'a PlatformParameters,
    ) -> DockerfileContext<'a> {
        DockerfileContext {
            build,
            platform,
            sdk: SdkType::Holoscan,
            holoscan_version: "3.7.0",
            monai_deploy_version: None,
            title: "My App",
            app_version: "1.0",
            includes: &[],
            cmake_args: None,
            has_models: false,
            has_docs: false,
            has_input_data: false,
            has_requirements: false,
        }
    }

    #[test]
    fn template_by_cuda_version() {
        assert_eq!(select_template(12).unwrap(), "Dockerfile-cu12.j2");
        assert_eq!(select_template(13).unwrap(), "Dockerfile.j2");
        assert!(matches!(select_template(11), Err(BuildError::Incompatible(_))));
    }

    #[test]
    fn embedded_templates_parse() {
        let tera = engine().unwrap();
        let mut names: Vec<&str> = tera.get_template_names().collect();
        names.sort_unstable();
        assert_eq!(names, ["Dockerfile-cu12.j2", "Dockerfile.j2"]);
    }

    #[test]
    fn unsupported_cuda_version_is_rejected_before_rendering() {
        let dir = TempDir::new().unwrap();
        let build = python_app(&dir);
        let mut platform = platform(13);
        platform.cuda_version = 11;
        assert!(matches!(
            render(&context(&build, &platform)),
            Err(BuildError::Incompatible(_))
        ));
    }

    #[test]
    fn cuda_12_renders_from_cu12_template() {
        let dir = TempDir::new().unwrap();
        let build = python_app(&dir);
        let platform = platform(12);
        let rendered = render(&context(&build, &platform)).unwrap();
        assert!(rendered.contains("from the Dockerfile-cu12 template"));
        assert!(rendered.contains("holoscan-cu12==3.7.0"));
        assert!(!rendered.contains("holoscan-cu13"));
    }

    #[test]
    fn line_continuations_are_never_followed_by_blank_lines() {
        let dir = TempDir::new().unwrap();
        let build = python_app(&dir);
        let platform = platform(13);
        let rendered = render(&context(&build, &platform)).unwrap();
        let lines: Vec<&str> = rendered.lines().collect();
        for pair in lines.windows(2) {
            if pair[0].ends_with('\\') {
                assert!(!pair[1].trim().is_empty(), "dangling continuation after {:?}", pair[0]);
            }
        }
        assert!(!rendered.contains("{{"));
        assert!(!rendered.contains("{%"));
    }

    #[test]
    fn python_module_layout() {
        let dir = TempDir::new().unwrap();
        let build = python_app(&dir);
        let platform = platform(13);
        let mut ctx = context(&build, &platform);
        ctx.has_requirements = true;
        ctx.includes = &[Include::Debug, Include::Holoviz];
        let rendered = render(&ctx).unwrap();

        assert!(rendered.contains("FROM nvcr.io/nvidia/cuda:13.0-runtime AS release"));
        assert!(!rendered.contains("AS builder"));
        assert!(rendered.contains("holoscan-cu13==3.7.0"));
        assert!(rendered.contains("COPY --chown=$UNAME:$UNAME ./app /opt/holoscan/app"));
        assert!(rendered.contains("-r /tmp/requirements.txt"));
        assert!(rendered.contains("gdb"));
        assert!(rendered.contains("libvulkan1"));
        assert!(rendered.contains("ENV HOLOSCAN_CONFIG_PATH=/var/holoscan/app.yaml"));
        assert!(rendered.trim_end().ends_with("ENTRYPOINT [\"python3\",\"/opt/holoscan/app\"]"));
    }

    #[test]
    fn cmake_app_uses_builder_stage_and_debian_package() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("CMakeLists.txt"), "").unwrap();
        let build = PackageBuildParameters::new(dir.path()).unwrap();
        let mut platform = platform(13);
        platform.build_image = Some("holoscan:v3.7.0-dgpu".into());
        platform.holoscan_sdk_file = Some(SdkPackage::Version("3.7.0.1-1".into()));
        platform.health_probe = Some("https://example.com/probe".into());
        let mut ctx = context(&build, &platform);
        ctx.cmake_args = Some("-DCMAKE_BUILD_TYPE=Release");
        let rendered = render(&ctx).unwrap();

        assert!(rendered.contains("FROM holoscan:v3.7.0-dgpu AS builder"));
        assert!(rendered.contains("-DCMAKE_BUILD_TYPE=Release"));
        assert!(rendered.contains("holoscan-cuda-13=3.7.0.1-1"));
        assert!(rendered.contains("COPY --from=builder"));
        assert!(rendered.contains("ADD --chmod=777 https://example.com/probe /bin/grpc_health_probe"));
    }

    #[test]
    fn custom_sdk_files_are_copied() {
        let dir = TempDir::new().unwrap();
        let build = python_app(&dir);
        let mut platform = platform(13);
        platform.holoscan_sdk_file =
            Some(SdkPackage::File(PathBuf::from("/sdk/holoscan-3.7.0-cp310-x86_64.whl")));
        platform.monai_deploy_sdk_file = Some(PathBuf::from("/sdk/monai_deploy.whl"));
        let mut ctx = context(&build, &platform);
        ctx.sdk = SdkType::MonaiDeploy;
        ctx.monai_deploy_version = Some("0.6.0");
        let rendered = render(&ctx).unwrap();

        assert!(rendered.contains("COPY ./sdk/holoscan-3.7.0-cp310-x86_64.whl"));
        assert!(rendered.contains("COPY ./sdk/monai_deploy.whl"));
        assert!(rendered.contains("LABEL org.monai.deploy.app-sdk=\"0.6.0\""));
    }

    #[test]
    fn binary_app_copies_the_executable_only() {
        let dir = TempDir::new().unwrap();
        let binary = dir.path().join("my-app");
        fs::write(&binary, "").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&binary, fs::Permissions::from_mode(0o755)).unwrap();
        }
        let build = PackageBuildParameters::new(&binary).unwrap();
        assert_eq!(build.application_type, ApplicationType::Binary);
        let mut platform = platform(12);
        platform.build_image = Some("holoscan:v3.7.0-dgpu".into());
        platform.holoscan_sdk_file = Some(SdkPackage::Version("3.7.0.1-1".into()));
        let rendered = render(&context(&build, &platform)).unwrap();

        assert!(!rendered.contains("AS builder"));
        assert!(rendered.contains("holoscan-cuda-12=3.7.0.1-1"));
        assert!(rendered.contains(&format!(
            "COPY --chown=$UNAME:$UNAME ./app/{name} /opt/holoscan/app/{name}",
            name = build.command_filename
        )));
        assert!(!rendered.contains("PYTHONPATH"));
    }
}
