//! Enforcement: attach every planned rule, then restrict the process
//!
//! The restriction is irreversible and is always the last step. Once a
//! [`RulesetHandle`] is consumed by `restrict_self` it cannot be reused.

use std::fmt;

use landlock::{AccessFs, AccessNet, BitFlags};
use tracing::{debug, info, warn};

use crate::compat::DroppedRule;
use crate::error::{CommitError, ProbeError};
use crate::probe::{CapabilitySet, RuleKind};
use crate::ruleset::{RuleDescriptor, RulesetPlan};

/// The kernel facility: capability detection and ruleset creation.
pub trait Enforcer {
    type Handle: RulesetHandle;

    fn probe(&self) -> Result<CapabilitySet, ProbeError>;

    /// Create a ruleset that handles exactly the given access rights.
    fn create_ruleset(
        &self,
        handled_fs: BitFlags<AccessFs>,
        handled_net: BitFlags<AccessNet>,
    ) -> Result<Self::Handle, CommitError>;
}

/// A ruleset being filled in. Consumed by [`RulesetHandle::restrict_self`].
pub trait RulesetHandle {
    /// Attach one rule. Any file reference opened for it is released
    /// before this returns.
    fn attach(&mut self, rule: &RuleDescriptor) -> Result<(), CommitError>;

    /// Restrict the calling thread and its future children.
    fn restrict_self(self) -> Result<(), CommitError>;
}

/// What was actually enforced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnforcementOutcome {
    Enforced { applied: usize },
    /// Only reachable in best-effort mode.
    PartiallyEnforced {
        applied: usize,
        dropped: Vec<DroppedRule>,
        unenforced: Vec<RuleKind>,
    },
}

impl EnforcementOutcome {
    pub(crate) fn new(
        applied: usize,
        dropped: Vec<DroppedRule>,
        unenforced: Vec<RuleKind>,
    ) -> Self {
        if dropped.is_empty() && unenforced.is_empty() {
            EnforcementOutcome::Enforced { applied }
        } else {
            EnforcementOutcome::PartiallyEnforced {
                applied,
                dropped,
                unenforced,
            }
        }
    }

    pub fn applied(&self) -> usize {
        match self {
            EnforcementOutcome::Enforced { applied }
            | EnforcementOutcome::PartiallyEnforced { applied, .. } => *applied,
        }
    }

    pub fn dropped(&self) -> &[DroppedRule] {
        match self {
            EnforcementOutcome::Enforced { .. } => &[],
            EnforcementOutcome::PartiallyEnforced { dropped, .. } => dropped,
        }
    }

    pub fn unenforced(&self) -> &[RuleKind] {
        match self {
            EnforcementOutcome::Enforced { .. } => &[],
            EnforcementOutcome::PartiallyEnforced { unenforced, .. } => unenforced,
        }
    }

    pub fn is_fully_enforced(&self) -> bool {
        matches!(self, EnforcementOutcome::Enforced { .. })
    }
}

impl fmt::Display for EnforcementOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnforcementOutcome::Enforced { applied } => {
                write!(f, "sandbox enforced with {applied} rules")
            }
            EnforcementOutcome::PartiallyEnforced {
                applied,
                dropped,
                unenforced,
            } => {
                write!(f, "sandbox partially enforced with {applied} rules")?;
                if !dropped.is_empty() {
                    let rules: Vec<&str> = dropped.iter().map(|d| d.rule.as_str()).collect();
                    write!(f, "; dropped {}", rules.join(", "))?;
                }
                if !unenforced.is_empty() {
                    let kinds: Vec<String> = unenforced.iter().map(ToString::to_string).collect();
                    write!(f, "; unrestricted {}", kinds.join(", "))?;
                }
                Ok(())
            }
        }
    }
}

/// Attach every rule in `plan` and restrict the current thread.
///
/// In strict mode the first attach failure aborts before anything is
/// restricted. Best-effort skips failing rules. A failure of the final
/// restriction is always returned.
pub fn commit<E: Enforcer>(
    enforcer: &E,
    plan: RulesetPlan,
) -> Result<EnforcementOutcome, CommitError> {
    let RulesetPlan {
        handled_fs,
        handled_net,
        rules,
        mut dropped,
        unenforced,
        mode,
    } = plan;

    if handled_fs.is_empty() && handled_net.is_empty() {
        warn!("nothing the kernel can restrict, process left unrestricted");
        return Ok(EnforcementOutcome::new(0, dropped, unenforced));
    }

    let mut handle = enforcer.create_ruleset(handled_fs, handled_net)?;

    let mut applied = 0;
    for rule in &rules {
        match handle.attach(rule) {
            Ok(()) => {
                debug!(rule = %rule, "attached rule");
                applied += 1;
            }
            Err(CommitError::PathMissing { path }) if !rule.must_exist() => {
                debug!(path = %path.display(), "skipping missing path");
            }
            Err(err) => mode.degrade(rule.description(), err, &mut dropped)?,
        }
    }

    handle.restrict_self()?;
    info!(applied, dropped = dropped.len(), "process restricted");
    Ok(EnforcementOutcome::new(applied, dropped, unenforced))
}
