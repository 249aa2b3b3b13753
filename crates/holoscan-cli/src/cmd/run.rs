//! Run command

use holoscan_core::docker::{ContainerEngine, DockerCli};
use holoscan_core::host::{self, CommandRunner, SystemRunner};
use tracing::info;

use crate::ops::runner::{MapRunner, RunError, RunOptions};
use crate::{CliError, RunArgs};

/// Run options for `args`; uid and gid default to `user` when not given.
pub fn options(args: &RunArgs, user: Option<(u32, u32)>) -> RunOptions {
    let (uid, gid) = user.unwrap_or((
        holoscan_core::paths::DEFAULT_UID,
        holoscan_core::paths::DEFAULT_GID,
    ));
    RunOptions {
        image: args.map.clone(),
        address: args.address.clone(),
        driver: args.driver,
        worker: args.worker,
        fragments: args.fragments.clone(),
        worker_address: args.worker_address.clone(),
        input: Some(args.input.clone()),
        output: Some(args.output.clone()),
        config: args.config.clone(),
        name: args.name.clone(),
        health_check: args.health_check,
        network: Some(args.network.clone()).filter(|n| !n.is_empty()),
        nic: args.nic.clone(),
        use_all_nics: args.use_all_nics,
        render: args.render,
        quiet: args.quiet,
        shm_size: args.shm_size.clone(),
        terminal: args.terminal,
        devices: args.devices.clone(),
        gpus: args.gpus.clone(),
        uid: args.uid.unwrap_or(uid),
        gid: args.gid.unwrap_or(gid),
        remove: args.remove,
    }
}

/// Verifies, reads the manifests, then runs. Problems found before the
/// container starts are [`CliError::Dependency`].
pub fn execute<E, R>(runner: &MapRunner<'_, E, R>, options: &RunOptions) -> Result<(), CliError>
where
    E: ContainerEngine + ?Sized,
    R: CommandRunner + ?Sized,
{
    let dependency = |e: RunError| CliError::Dependency(anyhow::Error::new(e));

    runner.verify_dependencies(&options.image).map_err(dependency)?;
    let (app, pkg) = runner.fetch_map_manifest(&options.image).map_err(dependency)?;
    runner.verify_package_dependencies(&pkg).map_err(dependency)?;

    runner
        .run(options, &app, &pkg)
        .map_err(|e| CliError::Run(anyhow::Error::new(e)))?;
    if options.quiet {
        info!("{} started in the background", options.image);
    }
    Ok(())
}

/// Run a packaged application
pub fn run(args: &RunArgs) -> Result<(), CliError> {
    let engine = DockerCli::new(SystemRunner);
    let runner = MapRunner::new(&engine, &SystemRunner);
    execute(&runner, &options(args, host::current_user_ids()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Cli, Commands};
    use clap::Parser;
    use holoscan_core::docker::fake::FakeEngine;
    use holoscan_core::host::fake::FakeRunner;
    use holoscan_core::paths;

    const APP_JSON: &str = r#"{
        "apiVersion": "1.0.0",
        "command": ["python3", "/opt/holoscan/app"],
        "environment": {"HOLOSCAN_CONFIG_PATH": "/var/holoscan/app.yaml"},
        "input": {"path": "input/"},
        "output": {"path": "output/"},
        "sdk": "holoscan",
        "sdkVersion": "3.7.0",
        "timeout": 0,
        "version": "1.0",
        "workingDirectory": "/var/holoscan/"
    }"#;

    const PKG_JSON: &str = r#"{
        "apiVersion": "1.0.0",
        "applicationRoot": "/opt/holoscan/app",
        "modelRoot": "/opt/holoscan/models",
        "models": {},
        "resources": {"cpu": 1},
        "version": "1.0",
        "platformConfig": "dgpu",
        "sdkType": "holoscan"
    }"#;

    fn args(extra: &[&str]) -> RunArgs {
        let argv = ["holoscan", "run", "my-app:1.0", "--input", "/nonexistent-input"];
        let cli = Cli::parse_from(argv.iter().chain(extra));
        match cli.command {
            Commands::Run(args) => *args,
            _ => unreachable!(),
        }
    }

    fn engine() -> FakeEngine {
        FakeEngine {
            images: vec!["my-app:1.0".to_string()].into(),
            networks: vec!["host".to_string()].into(),
            files: vec![
                (paths::APP_MANIFEST_PATH.to_string(), APP_JSON.to_string()),
                (paths::PKG_MANIFEST_PATH.to_string(), PKG_JSON.to_string()),
            ],
            ..FakeEngine::default()
        }
    }

    #[test]
    fn options_from_args() {
        let dir = tempfile::TempDir::new().unwrap();
        let output = dir.path().join("out");
        let args = args(&["--driver", "--uid", "0", "-o", output.to_str().unwrap(), "--rm"]);
        let options = options(&args, Some((1234, 5678)));
        assert_eq!(options.uid, 0);
        assert_eq!(options.gid, 5678);
        assert!(options.driver);
        assert!(options.remove);
        assert_eq!(options.network.as_deref(), Some("host"));
    }

    #[test]
    fn unknown_user_falls_back_to_default_ids() {
        let defaults = options(&args(&[]), None);
        assert_eq!((defaults.uid, defaults.gid), (paths::DEFAULT_UID, paths::DEFAULT_GID));
        let explicit_gid = options(&args(&["--gid", "44"]), None);
        assert_eq!(explicit_gid.uid, paths::DEFAULT_UID);
        assert_eq!(explicit_gid.gid, 44);
    }

    #[test]
    fn successful_run() {
        let dir = tempfile::TempDir::new().unwrap();
        let output = dir.path().join("out");
        let engine = engine();
        let host = FakeRunner::new();
        let runner = MapRunner::new(&engine, &host).with_path_lookup(|_| true);
        let args = args(&["-o", output.to_str().unwrap()]);

        execute(&runner, &options(&args, Some((1000, 1000)))).unwrap();
        assert_eq!(engine.runs.borrow().len(), 1);
        assert!(output.is_dir());
    }

    #[test]
    fn missing_docker_exits_2() {
        let engine = engine();
        let host = FakeRunner::new();
        let runner = MapRunner::new(&engine, &host).with_path_lookup(|_| false);
        let err = execute(&runner, &options(&args(&[]), None)).unwrap_err();
        assert_eq!(err.exit_code(), 2);
        assert!(engine.runs.borrow().is_empty());
    }

    #[test]
    fn unreadable_manifest_exits_2() {
        let engine = FakeEngine {
            files: Vec::new(),
            ..engine()
        };
        let host = FakeRunner::new();
        let runner = MapRunner::new(&engine, &host).with_path_lookup(|_| true);
        let err = execute(&runner, &options(&args(&[]), None)).unwrap_err();
        assert_eq!(err.exit_code(), 2);
        assert!(err.to_string().contains("Error reading MAP manifest"));
    }

    #[test]
    fn container_failure_exits_1() {
        let dir = tempfile::TempDir::new().unwrap();
        let output = dir.path().join("out");
        let engine = FakeEngine {
            exit_code: 137,
            ..engine()
        };
        let host = FakeRunner::new();
        let runner = MapRunner::new(&engine, &host).with_path_lookup(|_| true);
        let args = args(&["-o", output.to_str().unwrap()]);
        let err = execute(&runner, &options(&args, None)).unwrap_err();
        assert_eq!(err.exit_code(), 1);
    }
}
