//! Landlock capability detection
//!
//! The kernel advertises its Landlock ABI version through
//! `landlock_create_ruleset(NULL, 0, LANDLOCK_CREATE_RULESET_VERSION)`.
//! Each version adds rule kinds, so the version maps onto a flat table of
//! booleans that the ruleset builder checks explicitly.

use std::fmt;

use crate::error::ProbeError;

/// A kind of access the kernel may or may not be able to restrict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RuleKind {
    FsRead,
    FsWrite,
    FsExecute,
    TcpBind,
    TcpConnect,
}

impl RuleKind {
    pub const ALL: [RuleKind; 5] = [
        RuleKind::FsRead,
        RuleKind::FsWrite,
        RuleKind::FsExecute,
        RuleKind::TcpBind,
        RuleKind::TcpConnect,
    ];

    pub fn is_filesystem(self) -> bool {
        matches!(
            self,
            RuleKind::FsRead | RuleKind::FsWrite | RuleKind::FsExecute
        )
    }
}

impl fmt::Display for RuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RuleKind::FsRead => "filesystem-read",
            RuleKind::FsWrite => "filesystem-write",
            RuleKind::FsExecute => "filesystem-execute",
            RuleKind::TcpBind => "tcp-bind",
            RuleKind::TcpConnect => "tcp-connect",
        })
    }
}

/// What the running kernel can enforce
///
/// Built once by [`probe`] (or [`CapabilitySet::from_abi`] in tests) and
/// never modified afterwards; the fields are private so a set can only
/// shrink through [`CapabilitySet::without`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapabilitySet {
    abi: i32,
    fs_read: bool,
    fs_write: bool,
    fs_execute: bool,
    /// ABI 2
    fs_refer: bool,
    /// ABI 3
    fs_truncate: bool,
    tcp_bind: bool,
    tcp_connect: bool,
    /// ABI 5
    fs_ioctl_dev: bool,
}

impl CapabilitySet {
    /// Latest ABI this crate knows how to map.
    pub const LATEST_ABI: i32 = 5;

    pub fn from_abi(abi: i32) -> Self {
        Self {
            abi,
            fs_read: abi >= 1,
            fs_write: abi >= 1,
            fs_execute: abi >= 1,
            fs_refer: abi >= 2,
            fs_truncate: abi >= 3,
            tcp_bind: abi >= 4,
            tcp_connect: abi >= 4,
            fs_ioctl_dev: abi >= 5,
        }
    }

    /// A copy of this set with one rule kind removed.
    pub fn without(mut self, kind: RuleKind) -> Self {
        match kind {
            RuleKind::FsRead => self.fs_read = false,
            RuleKind::FsWrite => self.fs_write = false,
            RuleKind::FsExecute => self.fs_execute = false,
            RuleKind::TcpBind => self.tcp_bind = false,
            RuleKind::TcpConnect => self.tcp_connect = false,
        }
        self
    }

    pub fn abi(&self) -> i32 {
        self.abi
    }

    pub fn supports(&self, kind: RuleKind) -> bool {
        match kind {
            RuleKind::FsRead => self.fs_read,
            RuleKind::FsWrite => self.fs_write,
            RuleKind::FsExecute => self.fs_execute,
            RuleKind::TcpBind => self.tcp_bind,
            RuleKind::TcpConnect => self.tcp_connect,
        }
    }

    pub fn supports_refer(&self) -> bool {
        self.fs_write && self.fs_refer
    }

    pub fn supports_truncate(&self) -> bool {
        self.fs_write && self.fs_truncate
    }

    pub fn supports_ioctl_dev(&self) -> bool {
        self.fs_write && self.fs_ioctl_dev
    }
}

#[cfg(target_os = "linux")]
const LANDLOCK_CREATE_RULESET_VERSION: libc::c_uint = 1 << 0;

/// Ask the kernel which Landlock ABI it implements.
///
/// There is no retry: the answer cannot change during the process lifetime.
#[cfg(target_os = "linux")]
pub fn probe() -> Result<CapabilitySet, ProbeError> {
    use nix::errno::Errno;

    // SAFETY: with a NULL attr and size 0 the kernel reads no memory and
    // only returns the ABI version.
    let ret = unsafe {
        libc::syscall(
            libc::SYS_landlock_create_ruleset,
            std::ptr::null::<libc::c_void>(),
            0usize,
            LANDLOCK_CREATE_RULESET_VERSION,
        )
    };

    match Errno::result(ret) {
        Ok(abi) => {
            let caps = CapabilitySet::from_abi(abi as i32);
            tracing::debug!(abi = caps.abi(), "detected Landlock ABI");
            Ok(caps)
        }
        Err(errno) => Err(classify(errno)),
    }
}

/// Map a failed version query onto the reason the caller reports.
fn classify(errno: nix::errno::Errno) -> ProbeError {
    use nix::errno::Errno;

    match errno {
        Errno::ENOSYS => ProbeError::Unsupported("not built into the kernel"),
        Errno::EOPNOTSUPP => ProbeError::Unsupported("disabled at boot"),
        Errno::EPERM | Errno::EACCES => ProbeError::PermissionDenied(errno),
        _ => ProbeError::Unexpected(errno),
    }
}

#[cfg(not(target_os = "linux"))]
pub fn probe() -> Result<CapabilitySet, ProbeError> {
    Err(ProbeError::Unsupported("Landlock is Linux-only"))
}
