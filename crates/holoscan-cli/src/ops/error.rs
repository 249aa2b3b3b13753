//! Top-level command failures and their process exit codes.

use thiserror::Error;

/// A failed command, carrying the exit code the process ends with.
#[derive(Error, Debug)]
pub enum CliError {
    #[error("Error packaging application:\n\n{0:#}")]
    Package(anyhow::Error),

    #[error("{0:#}")]
    Run(anyhow::Error),

    /// Host dependency or MAP manifest problems found before the run.
    #[error("{0:#}")]
    Dependency(anyhow::Error),

    #[error("Error executing version command.")]
    Version(anyhow::Error),

    #[error("Error executing nics command.")]
    Nics(anyhow::Error),
}

impl CliError {
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Package(_) | Self::Run(_) => 1,
            Self::Dependency(_) => 2,
            Self::Version(_) => 3,
            Self::Nics(_) => 4,
        }
    }

    /// Underlying cause, for debug logging when the message hides it.
    pub fn detail(&self) -> Option<&anyhow::Error> {
        match self {
            Self::Version(e) | Self::Nics(e) => Some(e),
            Self::Package(_) | Self::Run(_) | Self::Dependency(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes() {
        assert_eq!(CliError::Package(anyhow::anyhow!("x")).exit_code(), 1);
        assert_eq!(CliError::Run(anyhow::anyhow!("x")).exit_code(), 1);
        assert_eq!(CliError::Dependency(anyhow::anyhow!("x")).exit_code(), 2);
        assert_eq!(CliError::Version(anyhow::anyhow!("x")).exit_code(), 3);
        assert_eq!(CliError::Nics(anyhow::anyhow!("x")).exit_code(), 4);
    }

    #[test]
    fn package_message_wraps_cause() {
        let err = CliError::Package(anyhow::anyhow!("bad tag"));
        assert_eq!(err.to_string(), "Error packaging application:\n\nbad tag");
    }

    #[test]
    fn version_and_nics_hide_cause() {
        let err = CliError::Nics(anyhow::anyhow!("ip failed"));
        assert_eq!(err.to_string(), "Error executing nics command.");
        assert!(err.detail().is_some());
    }
}
