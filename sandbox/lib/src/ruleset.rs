//! Ruleset construction
//!
//! Maps a [`Policy`] onto Landlock access rights, using only rights the
//! [`CapabilitySet`] confirmed. Rights the kernel cannot restrict are left
//! unhandled, which grants them, rather than denied.

use std::fmt;
use std::path::PathBuf;

use landlock::{AccessFs, AccessNet, BitFlags};
use tracing::{debug, warn};

use crate::compat::{CompatMode, DroppedRule};
use crate::error::BuildError;
use crate::policy::{AccessLevel, Direction, PathRule, Policy};
use crate::probe::{CapabilitySet, RuleKind};

/// One grant ready to be attached to a ruleset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleDescriptor {
    Path {
        path: PathBuf,
        level: AccessLevel,
        access: BitFlags<AccessFs>,
        must_exist: bool,
    },
    Port { port: u16, access: AccessNet },
}

impl RuleDescriptor {
    pub fn description(&self) -> String {
        match self {
            RuleDescriptor::Path { path, level, .. } => format!("{} ({level})", path.display()),
            RuleDescriptor::Port { port, access } => match access {
                AccessNet::BindTcp => format!("bind:{port}"),
                _ => format!("connect:{port}"),
            },
        }
    }

    pub fn must_exist(&self) -> bool {
        match self {
            RuleDescriptor::Path { must_exist, .. } => *must_exist,
            RuleDescriptor::Port { .. } => true,
        }
    }
}

impl fmt::Display for RuleDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.description())
    }
}

/// Everything the committer needs: the handled access sets, the rules to
/// attach and what was already dropped while building.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RulesetPlan {
    pub handled_fs: BitFlags<AccessFs>,
    pub handled_net: BitFlags<AccessNet>,
    pub rules: Vec<RuleDescriptor>,
    pub dropped: Vec<DroppedRule>,
    /// Kinds the policy wanted restricted but the kernel cannot restrict.
    pub unenforced: Vec<RuleKind>,
    pub mode: CompatMode,
}

impl RulesetPlan {
    fn empty(mode: CompatMode) -> Self {
        Self {
            handled_fs: BitFlags::empty(),
            handled_net: BitFlags::empty(),
            rules: Vec::new(),
            dropped: Vec::new(),
            unenforced: Vec::new(),
            mode,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.handled_fs.is_empty() && self.handled_net.is_empty()
    }

    fn was_dropped(&self, rule: &str) -> bool {
        self.dropped.iter().any(|dropped| dropped.rule == rule)
    }
}

fn read_rights() -> BitFlags<AccessFs> {
    AccessFs::ReadFile | AccessFs::ReadDir
}

fn write_rights(caps: &CapabilitySet) -> BitFlags<AccessFs> {
    let mut rights = AccessFs::WriteFile
        | AccessFs::RemoveDir
        | AccessFs::RemoveFile
        | AccessFs::MakeChar
        | AccessFs::MakeDir
        | AccessFs::MakeReg
        | AccessFs::MakeSock
        | AccessFs::MakeFifo
        | AccessFs::MakeBlock
        | AccessFs::MakeSym;
    if caps.supports_refer() {
        rights |= AccessFs::Refer;
    }
    if caps.supports_truncate() {
        rights |= AccessFs::Truncate;
    }
    if caps.supports_ioctl_dev() {
        rights |= AccessFs::IoctlDev;
    }
    rights
}

/// Rights the kernel accepts on a rule whose path is not a directory.
fn file_rights() -> BitFlags<AccessFs> {
    AccessFs::ReadFile
        | AccessFs::WriteFile
        | AccessFs::Execute
        | AccessFs::Truncate
        | AccessFs::IoctlDev
}

fn rights_for(kind: RuleKind, caps: &CapabilitySet) -> BitFlags<AccessFs> {
    match kind {
        RuleKind::FsRead => read_rights(),
        RuleKind::FsWrite => write_rights(caps),
        RuleKind::FsExecute => AccessFs::Execute.into(),
        RuleKind::TcpBind | RuleKind::TcpConnect => BitFlags::empty(),
    }
}

fn path_access(rule: &PathRule, caps: &CapabilitySet) -> BitFlags<AccessFs> {
    let mut access = BitFlags::empty();
    if caps.supports(RuleKind::FsRead) {
        access |= read_rights();
    }
    if rule.access.write && caps.supports(RuleKind::FsWrite) {
        access |= write_rights(caps);
    }
    if rule.access.execute && caps.supports(RuleKind::FsExecute) {
        access |= AccessFs::Execute;
    }
    if !rule.is_dir {
        access &= file_rights();
    }
    access
}

/// Translate a policy into a ruleset plan for the detected capabilities.
///
/// Strict mode fails on the first capability the policy needs but the
/// kernel lacks. Best-effort records the affected rules as dropped and the
/// kind as unenforced.
pub fn build(policy: &Policy, caps: &CapabilitySet) -> Result<RulesetPlan, BuildError> {
    let mode = policy.mode();
    let mut plan = RulesetPlan::empty(mode);

    if policy.enforces_filesystem() {
        for kind in [RuleKind::FsRead, RuleKind::FsWrite, RuleKind::FsExecute] {
            if caps.supports(kind) {
                plan.handled_fs |= rights_for(kind, caps);
                continue;
            }
            if kind == RuleKind::FsExecute {
                // Cannot restrict execution, so it is granted everywhere
                warn!(
                    abi = caps.abi(),
                    "kernel cannot restrict execution, leaving it unrestricted"
                );
                continue;
            }
            let referencing: Vec<String> = policy
                .paths()
                .iter()
                .filter(|rule| kind == RuleKind::FsRead || rule.access.write)
                .map(PathRule::description)
                .collect();
            missing_capability(&mut plan, caps, kind, referencing, "filesystem access")?;
        }
        if !caps.supports_truncate() || !caps.supports_refer() || !caps.supports_ioctl_dev() {
            debug!(
                abi = caps.abi(),
                "older Landlock ABI, some write rights stay unrestricted"
            );
        }

        for rule in policy.paths() {
            if plan.was_dropped(&rule.description()) {
                continue;
            }
            let access = path_access(rule, caps) & plan.handled_fs;
            if access.is_empty() {
                // Only reachable in best-effort; the kind gap is already recorded
                plan.dropped.push(DroppedRule {
                    rule: rule.description(),
                    reason: "kernel cannot restrict filesystem access".into(),
                });
                continue;
            }
            plan.rules.push(RuleDescriptor::Path {
                path: rule.path.clone(),
                level: rule.access,
                access,
                must_exist: rule.must_exist,
            });
        }
    }

    if policy.enforces_network() {
        for (kind, direction, access) in [
            (RuleKind::TcpBind, Direction::Bind, AccessNet::BindTcp),
            (
                RuleKind::TcpConnect,
                Direction::Connect,
                AccessNet::ConnectTcp,
            ),
        ] {
            if caps.supports(kind) {
                plan.handled_net |= access;
                plan.rules.extend(
                    policy
                        .ports()
                        .iter()
                        .filter(|rule| rule.direction == direction)
                        .map(|rule| RuleDescriptor::Port {
                            port: rule.port,
                            access,
                        }),
                );
                continue;
            }
            let referencing: Vec<String> = policy
                .ports()
                .iter()
                .filter(|rule| rule.direction == direction)
                .map(|rule| rule.description())
                .collect();
            missing_capability(&mut plan, caps, kind, referencing, "network access")?;
        }
    }

    debug!(
        rules = plan.rules.len(),
        dropped = plan.dropped.len(),
        handled_fs = ?plan.handled_fs,
        handled_net = ?plan.handled_net,
        "built ruleset plan"
    );
    Ok(plan)
}

fn missing_capability(
    plan: &mut RulesetPlan,
    caps: &CapabilitySet,
    kind: RuleKind,
    referencing: Vec<String>,
    fallback: &str,
) -> Result<(), BuildError> {
    let reason = BuildError::CapabilityMissing {
        kind,
        abi: caps.abi(),
        rule: referencing
            .first()
            .cloned()
            .unwrap_or_else(|| fallback.to_string()),
    };
    if plan.mode == CompatMode::Strict {
        return Err(reason);
    }

    warn!(kind = %kind, abi = caps.abi(), "kernel cannot enforce {kind}, leaving it unrestricted");
    plan.unenforced.push(kind);
    for rule in referencing {
        if plan.was_dropped(&rule) {
            continue;
        }
        let missing = BuildError::CapabilityMissing {
            kind,
            abi: caps.abi(),
            rule: rule.clone(),
        };
        plan.mode.degrade(rule, missing, &mut plan.dropped)?;
    }
    Ok(())
}
