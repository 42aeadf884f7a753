//! Policy normalization
//!
//! Turns the raw [`SandboxConfig`] into a canonical [`Policy`]: one rule per
//! canonical path with the union of the requested rights, validated and
//! deduplicated ports, and a deterministic order (paths lexicographically,
//! ports by direction then number).

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::compat::CompatMode;
use crate::config::{PortSpec, SandboxConfig};
use crate::error::ConfigError;

/// Rights granted beneath one path. Read access is always implied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct AccessLevel {
    pub write: bool,
    pub execute: bool,
}

impl AccessLevel {
    pub const READ_ONLY: AccessLevel = AccessLevel {
        write: false,
        execute: false,
    };
    pub const READ_ONLY_EXECUTABLE: AccessLevel = AccessLevel {
        write: false,
        execute: true,
    };
    pub const READ_WRITE: AccessLevel = AccessLevel {
        write: true,
        execute: false,
    };
    pub const READ_WRITE_EXECUTABLE: AccessLevel = AccessLevel {
        write: true,
        execute: true,
    };

    /// Most permissive combination of both levels.
    pub fn union(self, other: AccessLevel) -> AccessLevel {
        AccessLevel {
            write: self.write || other.write,
            execute: self.execute || other.execute,
        }
    }
}

impl fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match (self.write, self.execute) {
            (false, false) => "ro",
            (false, true) => "rox",
            (true, false) => "rw",
            (true, true) => "rwx",
        })
    }
}

/// One filesystem grant after normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathRule {
    pub path: PathBuf,
    pub access: AccessLevel,
    /// False only for paths that exist and are not directories.
    pub is_dir: bool,
    /// A missing path is an error at commit time rather than skipped.
    pub must_exist: bool,
}

impl PathRule {
    pub fn description(&self) -> String {
        format!("{} ({})", self.path.display(), self.access)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Direction {
    Bind,
    Connect,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Direction::Bind => "bind",
            Direction::Connect => "connect",
        })
    }
}

/// One allowed TCP port for one direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PortRule {
    pub direction: Direction,
    pub port: u16,
}

impl PortRule {
    pub fn description(&self) -> String {
        format!("{}:{}", self.direction, self.port)
    }
}

/// The canonical policy handed to the ruleset builder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Policy {
    paths: Vec<PathRule>,
    ports: Vec<PortRule>,
    mode: CompatMode,
    unrestricted_filesystem: bool,
    unrestricted_network: bool,
}

impl Policy {
    pub fn paths(&self) -> &[PathRule] {
        &self.paths
    }

    pub fn ports(&self) -> &[PortRule] {
        &self.ports
    }

    pub fn mode(&self) -> CompatMode {
        self.mode
    }

    pub fn enforces_filesystem(&self) -> bool {
        !self.unrestricted_filesystem
    }

    pub fn enforces_network(&self) -> bool {
        !self.unrestricted_network
    }

    /// Nothing to enforce: both resource classes were opted out.
    pub fn is_unrestricted(&self) -> bool {
        self.unrestricted_filesystem && self.unrestricted_network
    }

    /// Descriptions of every declared rule, in application order.
    pub fn rule_descriptions(&self) -> Vec<String> {
        self.paths
            .iter()
            .map(PathRule::description)
            .chain(self.ports.iter().map(PortRule::description))
            .collect()
    }

    /// The configuration that normalizes back into this policy.
    pub fn to_config(&self) -> SandboxConfig {
        let mut config = SandboxConfig {
            best_effort: self.mode.is_best_effort(),
            unrestricted_filesystem: self.unrestricted_filesystem,
            unrestricted_network: self.unrestricted_network,
            ignore_missing: self.paths.first().is_some_and(|rule| !rule.must_exist),
            ..SandboxConfig::default()
        };
        for rule in &self.paths {
            let list = match (rule.access.write, rule.access.execute) {
                (false, false) => &mut config.read_only_paths,
                (false, true) => &mut config.read_only_executable_paths,
                (true, false) => &mut config.read_write_paths,
                (true, true) => &mut config.read_write_executable_paths,
            };
            list.push(rule.path.clone());
        }
        for rule in &self.ports {
            let list = match rule.direction {
                Direction::Bind => &mut config.bind_tcp_ports,
                Direction::Connect => &mut config.connect_tcp_ports,
            };
            list.push(PortSpec::from(rule.port));
        }
        config
    }
}

/// Merge, canonicalize and validate a raw configuration.
pub fn normalize(config: &SandboxConfig) -> Result<Policy, ConfigError> {
    let declared = [
        (&config.read_only_paths, AccessLevel::READ_ONLY),
        (
            &config.read_only_executable_paths,
            AccessLevel::READ_ONLY_EXECUTABLE,
        ),
        (&config.read_write_paths, AccessLevel::READ_WRITE),
        (
            &config.read_write_executable_paths,
            AccessLevel::READ_WRITE_EXECUTABLE,
        ),
    ];

    let mut merged: BTreeMap<PathBuf, (AccessLevel, bool)> = BTreeMap::new();
    for (paths, level) in declared {
        for raw in paths {
            let (path, is_dir) = canonicalize(raw)?;
            merged
                .entry(path)
                .and_modify(|(existing, _)| *existing = existing.union(level))
                .or_insert((level, is_dir));
        }
    }

    let mut ports = BTreeSet::new();
    for (specs, direction) in [
        (&config.bind_tcp_ports, Direction::Bind),
        (&config.connect_tcp_ports, Direction::Connect),
    ] {
        for spec in specs {
            for port in expand_ports(spec, direction)? {
                ports.insert(PortRule { direction, port });
            }
        }
    }

    if config.unrestricted_filesystem && !merged.is_empty() {
        debug!(
            count = merged.len(),
            "filesystem unrestricted, ignoring declared paths"
        );
        merged.clear();
    }
    if config.unrestricted_network && !ports.is_empty() {
        debug!(
            count = ports.len(),
            "network unrestricted, ignoring declared ports"
        );
        ports.clear();
    }

    let must_exist = !config.ignore_missing;
    Ok(Policy {
        paths: merged
            .into_iter()
            .map(|(path, (access, is_dir))| PathRule {
                path,
                access,
                is_dir,
                must_exist,
            })
            .collect(),
        ports: ports.into_iter().collect(),
        mode: CompatMode::from_best_effort(config.best_effort),
        unrestricted_filesystem: config.unrestricted_filesystem,
        unrestricted_network: config.unrestricted_network,
    })
}

/// Resolve symlinks when the path exists, otherwise make it absolute and
/// clean it lexically. Returns the path and whether it is a directory.
fn canonicalize(raw: &Path) -> Result<(PathBuf, bool), ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidPath {
        path: raw.display().to_string(),
        reason: reason.to_string(),
    };

    if raw.as_os_str().is_empty() {
        return Err(invalid("path is empty"));
    }

    match std::fs::canonicalize(raw) {
        Ok(path) => {
            let is_dir = path.metadata().map_or(true, |meta| meta.is_dir());
            Ok((path, is_dir))
        }
        Err(err) => {
            debug!(path = %raw.display(), error = %err, "cannot resolve path, using lexical form");
            let absolute = if raw.is_absolute() {
                raw.to_path_buf()
            } else {
                std::env::current_dir()
                    .map_err(|e| invalid(&format!("cannot resolve relative path: {e}")))?
                    .join(raw)
            };
            Ok((path_clean::clean(&absolute), true))
        }
    }
}

fn expand_ports(
    spec: &PortSpec,
    direction: Direction,
) -> Result<std::ops::RangeInclusive<u16>, ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidPort {
        direction: match direction {
            Direction::Bind => "bind",
            Direction::Connect => "connect",
        },
        value: spec.to_string(),
        reason: reason.to_string(),
    };
    let to_port = |value: i64| {
        u16::try_from(value)
            .map_err(|_| invalid("port must be between 0 and 65535"))
    };

    match *spec {
        PortSpec::Single(value) => {
            let port = to_port(value)?;
            Ok(port..=port)
        }
        PortSpec::Range(start, end) => {
            let (start, end) = (to_port(start)?, to_port(end)?);
            if start > end {
                return Err(invalid("range start is greater than range end"));
            }
            Ok(start..=end)
        }
    }
}
