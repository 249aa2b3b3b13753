//! Nics command

use std::fmt::Write;

use holoscan_core::host::{self, CommandRunner, SystemRunner};

use crate::CliError;

/// Interface listing; IPv6 addresses are shown only when there is no IPv4.
pub fn report<R: CommandRunner + ?Sized>(runner: &R) -> anyhow::Result<String> {
    let (ipv4, ipv6) = host::host_ip_addresses(runner)?;
    let addresses = if ipv4.is_empty() { ipv6 } else { ipv4 };

    let mut out = String::from("Available network interface cards/IP addresses: \n\n");
    for (name, ip) in &addresses {
        writeln!(out, "{name:<16}: {ip}")?;
    }
    Ok(out)
}

/// List network interfaces and their addresses
pub fn nics() -> Result<(), CliError> {
    let out = report(&SystemRunner).map_err(CliError::Nics)?;
    print!("{out}");
    Ok(())
}
