//! Raw sandbox configuration as declared by the user

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// A declared TCP port or inclusive port range, not yet validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortSpec {
    Single(i64),
    Range(i64, i64),
}

impl FromStr for PortSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let parse = |v: &str| {
            v.trim()
                .parse::<i64>()
                .map_err(|e| format!("invalid port {v:?}: {e}"))
        };
        // A leading '-' is a sign, not a range separator
        match s.char_indices().skip(1).find(|(_, c)| *c == '-') {
            Some((idx, _)) => Ok(PortSpec::Range(parse(&s[..idx])?, parse(&s[idx + 1..])?)),
            None => Ok(PortSpec::Single(parse(s)?)),
        }
    }
}

impl fmt::Display for PortSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortSpec::Single(port) => write!(f, "{port}"),
            PortSpec::Range(start, end) => write!(f, "{start}-{end}"),
        }
    }
}

impl From<u16> for PortSpec {
    fn from(port: u16) -> Self {
        PortSpec::Single(i64::from(port))
    }
}

/// Everything the command line declares about the sandbox
///
/// Lists keep the order they were given in; [`crate::normalize`] merges
/// and sorts them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SandboxConfig {
    pub read_only_paths: Vec<PathBuf>,
    pub read_only_executable_paths: Vec<PathBuf>,
    pub read_write_paths: Vec<PathBuf>,
    pub read_write_executable_paths: Vec<PathBuf>,
    pub bind_tcp_ports: Vec<PortSpec>,
    pub connect_tcp_ports: Vec<PortSpec>,
    /// Degrade instead of failing when the kernel lacks a capability.
    pub best_effort: bool,
    /// Skip filesystem enforcement entirely.
    pub unrestricted_filesystem: bool,
    /// Skip network enforcement entirely.
    pub unrestricted_network: bool,
    /// Paths missing at commit time are skipped instead of failing.
    pub ignore_missing: bool,
}
