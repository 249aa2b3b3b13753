//! Host process execution and host facts (GPUs, groups, network addresses).
//!
//! Everything that shells out goes through [`CommandRunner`] so resolvers and
//! orchestrators can be driven by a fake in tests.

use std::process::{Command, Stdio};

use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum HostError {
    #[error("'{0}' not found. Please make sure it is installed and on PATH.")]
    CommandNotFound(String),

    #[error("'{program}' exited with code {code}: {stderr}")]
    CommandFailed {
        program: String,
        code: i32,
        stderr: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Captured result of a finished process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code; `-1` when the process was killed by a signal.
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == 0
    }
}

/// Runs external programs.
pub trait CommandRunner {
    /// Runs to completion, capturing stdout and stderr.
    fn output(&self, program: &str, args: &[String]) -> Result<CommandOutput, HostError>;

    /// Runs to completion with inherited stdio, returning the exit code.
    fn status(&self, program: &str, args: &[String]) -> Result<i32, HostError>;
}

/// [`CommandRunner`] backed by `std::process::Command`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

fn spawn_error(program: &str, e: std::io::Error) -> HostError {
    if e.kind() == std::io::ErrorKind::NotFound {
        HostError::CommandNotFound(program.to_string())
    } else {
        HostError::Io(e)
    }
}

impl CommandRunner for SystemRunner {
    fn output(&self, program: &str, args: &[String]) -> Result<CommandOutput, HostError> {
        debug!("Running {program} {}", args.join(" "));
        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| spawn_error(program, e))?;

        Ok(CommandOutput {
            code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    fn status(&self, program: &str, args: &[String]) -> Result<i32, HostError> {
        debug!("Running {program} {}", args.join(" "));
        let status = Command::new(program)
            .args(args)
            .status()
            .map_err(|e| spawn_error(program, e))?;
        Ok(status.code().unwrap_or(-1))
    }
}

/// Converts a list of literals into owned arguments.
pub fn args(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| (*s).to_string()).collect()
}

/// Runs a command and returns its stdout.
///
/// With `grep`, returns the first line containing it, or the whole stdout
/// when no line matches.
pub fn run_cmd_output<R: CommandRunner + ?Sized>(
    runner: &R,
    program: &str,
    args: &[String],
    grep: Option<&str>,
) -> Result<String, HostError> {
    let output = runner.output(program, args)?;
    if let Some(pattern) = grep
        && let Some(line) = output.stdout.lines().find(|l| l.contains(pattern))
    {
        return Ok(line.to_string());
    }
    Ok(output.stdout)
}

/// Number of GPUs reported by `nvidia-smi`.
pub fn gpu_count<R: CommandRunner + ?Sized>(runner: &R) -> Result<usize, HostError> {
    let output = runner.output("nvidia-smi", &args(&["--list-gpus"]))?;
    if !output.success() {
        return Err(HostError::CommandFailed {
            program: "nvidia-smi".to_string(),
            code: output.code,
            stderr: output.stderr.trim().to_string(),
        });
    }
    Ok(output
        .stdout
        .lines()
        .filter(|l| l.trim_start().starts_with("GPU"))
        .count())
}

/// Whether the host GPU is an integrated (Tegra `nvgpu`) device.
pub fn host_is_native_igpu<R: CommandRunner + ?Sized>(runner: &R) -> bool {
    run_cmd_output(
        runner,
        "nvidia-smi",
        &args(&["--query-gpu", "name", "--format=csv,noheader"]),
        None,
    )
    .is_ok_and(|out| out.contains("nvgpu"))
}

/// Numeric id of a host group, via `getent group`.
pub fn group_id<R: CommandRunner + ?Sized>(runner: &R, group: &str) -> Option<u32> {
    let output = runner.output("getent", &args(&["group", group])).ok()?;
    if !output.success() {
        return None;
    }
    // video:x:44:user
    output.stdout.lines().next()?.split(':').nth(2)?.trim().parse().ok()
}

/// Supplementary groups for the run container.
///
/// Non-root users on an iGPU host need the `video` and `render` groups to
/// reach the GPU device nodes; root needs none.
pub fn additional_groups<R: CommandRunner + ?Sized>(
    runner: &R,
    is_root: bool,
    igpu_present: bool,
) -> Vec<String> {
    if is_root || !igpu_present {
        return Vec::new();
    }
    ["video", "render"]
        .into_iter()
        .filter_map(|group| {
            let gid = group_id(runner, group);
            if gid.is_none() {
                debug!("Host group '{group}' not found");
            }
            gid.map(|g| g.to_string())
        })
        .collect()
}

/// `(interface, address)` pairs.
pub type InterfaceAddresses = Vec<(String, String)>;

/// IPv4 and IPv6 addresses per interface, from `ip -o addr show`.
pub fn host_ip_addresses<R: CommandRunner + ?Sized>(
    runner: &R,
) -> Result<(InterfaceAddresses, InterfaceAddresses), HostError> {
    let output = runner.output("ip", &args(&["-o", "addr", "show"]))?;
    if !output.success() {
        return Err(HostError::CommandFailed {
            program: "ip".to_string(),
            code: output.code,
            stderr: output.stderr.trim().to_string(),
        });
    }
    Ok(parse_ip_addr(&output.stdout))
}

/// Parses `ip -o addr show` output.
///
/// Link-local IPv6 addresses get a `%interface` scope suffix.
pub fn parse_ip_addr(raw: &str) -> (InterfaceAddresses, InterfaceAddresses) {
    let mut ipv4 = Vec::new();
    let mut ipv6 = Vec::new();

    for line in raw.lines() {
        // 2: eth0    inet 10.20.12.100/23 brd 10.20.13.255 scope global eth0 ...
        let mut fields = line.split_whitespace();
        let (Some(_), Some(name), Some(family), Some(cidr)) =
            (fields.next(), fields.next(), fields.next(), fields.next())
        else {
            continue;
        };
        let name = name.split('@').next().unwrap_or(name);
        let address = cidr.split('/').next().unwrap_or(cidr);

        match family {
            "inet" => ipv4.push((name.to_string(), address.to_string())),
            "inet6" => {
                let address = if address.starts_with("fe80") && !address.contains('%') {
                    format!("{address}%{name}")
                } else {
                    address.to_string()
                };
                ipv6.push((name.to_string(), address));
            }
            _ => {}
        }
    }
    (ipv4, ipv6)
}

/// Real uid and gid of the current process.
#[cfg(unix)]
pub fn current_user_ids() -> Option<(u32, u32)> {
    use nix::unistd::{Gid, Uid};
    Some((Uid::current().as_raw(), Gid::current().as_raw()))
}

#[cfg(not(unix))]
pub fn current_user_ids() -> Option<(u32, u32)> {
    None
}

#[cfg(any(test, feature = "test-support"))]
pub mod fake {
    use std::cell::RefCell;
    use std::collections::VecDeque;

    use super::*;

    /// Replays canned outputs keyed by program and records every call.
    #[derive(Debug, Default)]
    pub struct FakeRunner {
        pub calls: RefCell<Vec<(String, Vec<String>)>>,
        responses: RefCell<Vec<(String, VecDeque<Result<CommandOutput, i32>>)>>,
    }

    impl FakeRunner {
        pub fn new() -> Self {
            Self::default()
        }

        /// Queues a captured result for `program` (matched against the
        /// program plus its first argument, then the program alone).
        pub fn respond(&self, key: &str, code: i32, stdout: &str) -> &Self {
            self.push(
                key,
                Ok(CommandOutput {
                    code,
                    stdout: stdout.to_string(),
                    stderr: String::new(),
                }),
            );
            self
        }

        pub fn respond_err(&self, key: &str, code: i32, stderr: &str) -> &Self {
            self.push(
                key,
                Ok(CommandOutput {
                    code,
                    stdout: String::new(),
                    stderr: stderr.to_string(),
                }),
            );
            self
        }

        /// Makes `program` look absent from PATH.
        pub fn missing(&self, key: &str) -> &Self {
            self.push(key, Err(127));
            self
        }

        fn push(&self, key: &str, response: Result<CommandOutput, i32>) {
            let mut responses = self.responses.borrow_mut();
            if let Some((_, queue)) = responses.iter_mut().find(|(k, _)| k == key) {
                queue.push_back(response);
            } else {
                responses.push((key.to_string(), VecDeque::from([response])));
            }
        }

        fn take(&self, program: &str, args: &[String]) -> Result<CommandOutput, HostError> {
            self.calls
                .borrow_mut()
                .push((program.to_string(), args.to_vec()));

            let keys = [
                args.first().map(|a| format!("{program} {a}")),
                Some(program.to_string()),
            ];
            let mut responses = self.responses.borrow_mut();
            for key in keys.into_iter().flatten() {
                if let Some((_, queue)) = responses.iter_mut().find(|(k, _)| *k == key) {
                    let response = if queue.len() > 1 {
                        queue.pop_front()
                    } else {
                        queue.front().cloned()
                    };
                    if let Some(response) = response {
                        return response
                            .map_err(|_| HostError::CommandNotFound(program.to_string()));
                    }
                }
            }
            Ok(CommandOutput::default())
        }

        pub fn called(&self, program: &str, first_arg: &str) -> Option<Vec<String>> {
            self.calls
                .borrow()
                .iter()
                .find(|(p, a)| p == program && a.first().is_some_and(|f| f == first_arg))
                .map(|(_, a)| a.clone())
        }
    }

    impl CommandRunner for FakeRunner {
        fn output(&self, program: &str, args: &[String]) -> Result<CommandOutput, HostError> {
            self.take(program, args)
        }

        fn status(&self, program: &str, args: &[String]) -> Result<i32, HostError> {
            self.take(program, args).map(|o| o.code)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fake::FakeRunner;
    use super::*;

    const IP_OUTPUT: &str = "\
1: lo    inet 127.0.0.1/8 scope host lo\\       valid_lft forever preferred_lft forever
1: lo    inet6 ::1/128 scope host \\       valid_lft forever preferred_lft forever
2: eth0    inet 10.20.12.100/23 brd 10.20.13.255 scope global eth0\\       valid_lft forever
2: eth0    inet6 fe80::e3cb:9e06:5545:817c/64 scope link \\       valid_lft forever
3: eth1    inet 10.20.12.101/23 brd 10.20.13.255 scope global eth1\\       valid_lft forever
3: eth1    inet6 fe80::87d5:3875:5f6d:749f/64 scope link \\       valid_lft forever
4: docker0    inet 172.17.0.1/16 brd 172.17.255.255 scope global docker0\\       valid_lft forever
";

    #[test]
    fn parses_interface_addresses() {
        let (ipv4, ipv6) = parse_ip_addr(IP_OUTPUT);
        assert_eq!(ipv4.len(), 4);
        assert_eq!(ipv6.len(), 3);
        assert!(ipv4.contains(&("lo".into(), "127.0.0.1".into())));
        assert!(ipv4.contains(&("eth0".into(), "10.20.12.100".into())));
        assert!(ipv4.contains(&("eth1".into(), "10.20.12.101".into())));
        assert!(ipv4.contains(&("docker0".into(), "172.17.0.1".into())));
        assert!(ipv6.contains(&("lo".into(), "::1".into())));
        assert!(ipv6.contains(&("eth0".into(), "fe80::e3cb:9e06:5545:817c%eth0".into())));
        assert!(!ipv6.iter().any(|(name, _)| name == "docker0"));
    }

    #[test]
    fn strips_peer_suffix_from_interface() {
        let (ipv4, _) = parse_ip_addr("7: veth0@if6    inet 10.0.0.2/24 scope global veth0");
        assert_eq!(ipv4, vec![("veth0".to_string(), "10.0.0.2".to_string())]);
    }

    #[test]
    fn grep_returns_matching_line_or_everything() {
        let runner = FakeRunner::new();
        runner.respond("ls", 0, "first line\nsecond line\nthird line\n");

        let matched = run_cmd_output(&runner, "ls", &args(&["-l"]), Some("second")).unwrap();
        assert_eq!(matched, "second line");

        let unmatched = run_cmd_output(&runner, "ls", &args(&["-l"]), Some("nonexistent")).unwrap();
        assert_eq!(unmatched, "first line\nsecond line\nthird line\n");

        let plain = run_cmd_output(&runner, "ls", &args(&["-l"]), None).unwrap();
        assert_eq!(plain, "first line\nsecond line\nthird line\n");
    }

    #[test]
    fn counts_gpus() {
        let runner = FakeRunner::new();
        runner.respond(
            "nvidia-smi --list-gpus",
            0,
            "GPU 0: NVIDIA RTX A6000 (UUID: GPU-1)\nGPU 1: NVIDIA RTX A6000 (UUID: GPU-2)\n",
        );
        assert_eq!(gpu_count(&runner).unwrap(), 2);
    }

    #[test]
    fn missing_nvidia_smi_is_an_error() {
        let runner = FakeRunner::new();
        runner.missing("nvidia-smi");
        assert!(matches!(
            gpu_count(&runner),
            Err(HostError::CommandNotFound(_))
        ));
        assert!(!host_is_native_igpu(&runner));
    }

    #[test]
    fn detects_integrated_gpu() {
        let runner = FakeRunner::new();
        runner.respond("nvidia-smi --query-gpu", 0, "nvgpu\n");
        assert!(host_is_native_igpu(&runner));
    }

    #[test]
    fn root_needs_no_groups() {
        let runner = FakeRunner::new();
        runner.respond("getent group", 0, "video:x:44:\n");
        assert!(additional_groups(&runner, true, true).is_empty());
        assert!(runner.calls.borrow().is_empty());
    }

    #[test]
    fn non_root_on_igpu_adds_video_and_render() {
        let runner = FakeRunner::new();
        runner
            .respond("getent group", 0, "video:x:44:user\n")
            .respond("getent group", 0, "render:x:109:\n");
        assert_eq!(additional_groups(&runner, false, true), vec!["44", "109"]);
    }

    #[test]
    fn dgpu_host_adds_nothing() {
        let runner = FakeRunner::new();
        assert!(additional_groups(&runner, false, false).is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn current_user_owns_new_files() {
        use std::os::unix::fs::MetadataExt;
        let file = tempfile::NamedTempFile::new().unwrap();
        let (uid, _) = current_user_ids().unwrap();
        assert_eq!(file.as_file().metadata().unwrap().uid(), uid);
    }
}
