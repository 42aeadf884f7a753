//! Landlock backend for the enforcement committer
//!
//! Rules arrive already masked to the handled access set by the builder,
//! which only handles what the probed [`CapabilitySet`] reported. The ruleset
//! therefore runs with `CompatLevel::HardRequirement`: any right the crate
//! would have to drop is an error, never a silent downgrade. Each path rule
//! opens its own `O_PATH` descriptor, released once the rule is attached.

use landlock::{
    AccessFs, AccessNet, BitFlags, CompatLevel, Compatible, NetPort, PathBeneath, PathFd, Ruleset,
    RulesetAttr, RulesetCreated, RulesetCreatedAttr, RulesetStatus,
};

use crate::enforce::{Enforcer, RulesetHandle};
use crate::error::{CommitError, ProbeError};
use crate::probe::{self, CapabilitySet};
use crate::ruleset::RuleDescriptor;

/// The running kernel's Landlock LSM.
#[derive(Debug, Default, Clone, Copy)]
pub struct Landlock;

impl Enforcer for Landlock {
    type Handle = LandlockRuleset;

    fn probe(&self) -> Result<CapabilitySet, ProbeError> {
        probe::probe()
    }

    fn create_ruleset(
        &self,
        handled_fs: BitFlags<AccessFs>,
        handled_net: BitFlags<AccessNet>,
    ) -> Result<LandlockRuleset, CommitError> {
        let mut ruleset = Ruleset::default()
            .set_compatibility(CompatLevel::HardRequirement);
        if !handled_fs.is_empty() {
            ruleset = ruleset
                .handle_access(handled_fs)
                .map_err(CommitError::CreateRuleset)?;
        }
        if !handled_net.is_empty() {
            ruleset = ruleset
                .handle_access(handled_net)
                .map_err(CommitError::CreateRuleset)?;
        }
        let created = ruleset.create().map_err(CommitError::CreateRuleset)?;

        tracing::debug!(?handled_fs, ?handled_net, "created Landlock ruleset");
        Ok(LandlockRuleset { created })
    }
}

/// A created but not yet enforced Landlock ruleset.
pub struct LandlockRuleset {
    created: RulesetCreated,
}

impl RulesetHandle for LandlockRuleset {
    fn attach(&mut self, rule: &RuleDescriptor) -> Result<(), CommitError> {
        let attached = match rule {
            RuleDescriptor::Path { path, access, .. } => {
                // O_PATH descriptor, closed when the PathBeneath is dropped
                // at the end of this arm
                let fd = PathFd::new(path).map_err(|source| {
                    if matches!(path.try_exists(), Ok(false)) {
                        CommitError::PathMissing { path: path.clone() }
                    } else {
                        CommitError::OpenPath {
                            path: path.clone(),
                            source,
                        }
                    }
                })?;
                (&mut self.created).add_rule(PathBeneath::new(fd, *access))
            }
            RuleDescriptor::Port { port, access } => {
                (&mut self.created).add_rule(NetPort::new(*port, *access))
            }
        };
        attached
            .map(|_| ())
            .map_err(|source| CommitError::AttachRule {
                rule: rule.description(),
                source,
            })
    }

    fn restrict_self(self) -> Result<(), CommitError> {
        let status = self.created.restrict_self().map_err(CommitError::Restrict)?;

        match status.ruleset {
            RulesetStatus::FullyEnforced => {
                tracing::debug!(
                    no_new_privs = status.no_new_privs,
                    "Landlock fully enforced"
                );
                Ok(())
            }
            RulesetStatus::PartiallyEnforced => {
                Err(CommitError::NotFullyEnforced("partially enforced"))
            }
            _ => Err(CommitError::NotFullyEnforced("not enforced")),
        }
    }
}
