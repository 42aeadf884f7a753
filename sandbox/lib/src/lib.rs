//! safe-run-lib: Landlock sandbox construction and enforcement
//!
//! Turns a declared access policy (paths with read/write/execute grants,
//! TCP bind/connect ports, best-effort and unrestricted flags) into a
//! Landlock ruleset and commits it to the calling thread:
//!
//! 1. [`normalize`] merges and validates the raw [`SandboxConfig`]
//! 2. [`Enforcer::probe`] detects what the kernel can enforce
//! 3. [`build`] maps the policy onto the detected capabilities
//! 4. [`commit`] attaches every rule and restricts the process
//!
//! After [`apply`] succeeds the caller can never regain the dropped rights.
//! Landlock restricts the calling thread and its future children, so call
//! it from the thread that will exec the target command.

mod compat;
mod config;
mod enforce;
mod error;
mod landlock_setup;
mod policy;
mod probe;
mod ruleset;

pub use compat::{CompatMode, DroppedRule};
pub use config::{PortSpec, SandboxConfig};
pub use enforce::{commit, EnforcementOutcome, Enforcer, RulesetHandle};
pub use error::{BuildError, CommitError, ConfigError, ProbeError, SandboxError};
pub use landlock_setup::{Landlock, LandlockRuleset};
pub use policy::{normalize, AccessLevel, Direction, PathRule, Policy, PortRule};
pub use probe::{probe, CapabilitySet, RuleKind};
pub use ruleset::{build, RuleDescriptor, RulesetPlan};

use tracing::{info, warn};

/// Apply `config` to the current thread using the kernel's Landlock LSM.
pub fn apply(config: &SandboxConfig) -> Result<EnforcementOutcome, SandboxError> {
    apply_with(&Landlock, config)
}

/// Normalize, probe, build and commit against the given enforcer.
///
/// Returns before touching the kernel when the configuration is invalid or
/// opts out of both resource classes.
pub fn apply_with<E: Enforcer>(
    enforcer: &E,
    config: &SandboxConfig,
) -> Result<EnforcementOutcome, SandboxError> {
    let policy = normalize(config)?;
    if policy.is_unrestricted() {
        info!("filesystem and network unrestricted, no sandbox applied");
        return Ok(EnforcementOutcome::Enforced { applied: 0 });
    }

    let caps = match enforcer.probe() {
        Ok(caps) => caps,
        Err(err @ ProbeError::Unsupported(_)) if policy.mode().is_best_effort() => {
            warn!(error = %err, "Landlock unavailable, running without a sandbox");
            return Ok(unenforced(&policy, &err));
        }
        Err(err) => return Err(err.into()),
    };

    let plan = build(&policy, &caps)?;
    Ok(commit(enforcer, plan)?)
}

/// Best-effort outcome when the facility is missing: every declared rule is
/// dropped and every enforced class is left unrestricted.
fn unenforced(policy: &Policy, err: &ProbeError) -> EnforcementOutcome {
    let reason = err.to_string();
    let dropped = policy
        .rule_descriptions()
        .into_iter()
        .map(|rule| DroppedRule {
            rule,
            reason: reason.clone(),
        })
        .collect();
    let unenforced = RuleKind::ALL
        .into_iter()
        .filter(|kind| {
            if kind.is_filesystem() {
                policy.enforces_filesystem()
            } else {
                policy.enforces_network()
            }
        })
        .collect();
    EnforcementOutcome::PartiallyEnforced {
        applied: 0,
        dropped,
        unenforced,
    }
}
