//! Error taxonomy for sandbox construction
//!
//! Every stage returns its own error type. Only [`crate::apply`] decides
//! which of them end the run, so the stages never exit the process.

use std::path::PathBuf;

use thiserror::Error;

use crate::probe::RuleKind;

/// Invalid user input. Always fatal, best-effort never applies.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid path {path:?}: {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("invalid {direction} port {value}: {reason}")]
    InvalidPort {
        direction: &'static str,
        value: String,
        reason: String,
    },
}

/// The kernel facility could not be queried.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProbeError {
    /// Landlock is not built into this kernel or disabled at boot.
    #[error("Landlock is not supported by the running kernel ({0})")]
    Unsupported(&'static str),

    /// The probe itself was blocked, typically by an outer seccomp filter.
    #[error("probing Landlock support was denied ({0}); the host sandbox blocks landlock_create_ruleset")]
    PermissionDenied(nix::errno::Errno),

    /// The kernel rejected the version query for some other reason.
    #[error("unexpected error probing Landlock support ({0})")]
    Unexpected(nix::errno::Errno),
}

/// A declared rule needs a capability the kernel does not have.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BuildError {
    #[error("kernel cannot enforce {kind} (Landlock ABI {abi}) required by {rule}; rerun with --best-effort to drop it")]
    CapabilityMissing {
        kind: RuleKind,
        abi: i32,
        rule: String,
    },
}

/// Attaching a rule or restricting the process failed.
#[derive(Debug, Error)]
pub enum CommitError {
    #[error("failed to create Landlock ruleset")]
    CreateRuleset(#[source] landlock::RulesetError),

    #[error("path {} does not exist", path.display())]
    PathMissing { path: PathBuf },

    #[error("failed to open {}", path.display())]
    OpenPath {
        path: PathBuf,
        #[source]
        source: landlock::PathFdError,
    },

    #[error("failed to attach rule {rule}")]
    AttachRule {
        rule: String,
        #[source]
        source: landlock::RulesetError,
    },

    #[error("failed to restrict the current process")]
    Restrict(#[source] landlock::RulesetError),

    #[error("kernel reported the ruleset as {0}, refusing to continue")]
    NotFullyEnforced(&'static str),

    #[error("{0}")]
    Rejected(String),
}

/// Any fatal outcome of [`crate::apply`].
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Probe(#[from] ProbeError),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Commit(#[from] CommitError),
}
