//! Tests against the running kernel's Landlock LSM
//!
//! Landlock restricts only the calling thread, so every restriction happens
//! on a spawned thread and the test harness stays unrestricted. Tests return
//! early when the kernel (or an outer sandbox) does not allow Landlock.

use std::fs;
use std::io::ErrorKind;
use std::net::{Ipv4Addr, TcpListener, TcpStream};
use std::path::{Path, PathBuf};

use safe_run_lib::{
    apply, build, normalize, probe, CapabilitySet, CommitError, Enforcer, Landlock, PortSpec,
    RuleKind, RulesetHandle, SandboxConfig, SandboxError,
};
use tempfile::TempDir;

fn landlock_available() -> Option<CapabilitySet> {
    match probe() {
        Ok(caps) => Some(caps),
        Err(err) => {
            eprintln!("skipping: {err}");
            None
        }
    }
}

fn network_available() -> bool {
    let Some(caps) = landlock_available() else {
        return false;
    };
    let supported = caps.supports(RuleKind::TcpBind) && caps.supports(RuleKind::TcpConnect);
    if !supported {
        eprintln!("skipping: Landlock ABI {} has no TCP rules", caps.abi());
    }
    supported
}

fn local_listener() -> (TcpListener, u16) {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, port)
}

fn canonical(dir: &TempDir) -> PathBuf {
    fs::canonicalize(dir.path()).unwrap()
}

fn open_fds() -> usize {
    fs::read_dir("/proc/self/fd").map_or(0, |dir| dir.count())
}

#[test]
fn restricts_filesystem_to_declared_paths() {
    if landlock_available().is_none() {
        return;
    }

    let read_only = TempDir::new().unwrap();
    let read_write = TempDir::new().unwrap();
    let denied = TempDir::new().unwrap();
    let (ro, rw, no) = (canonical(&read_only), canonical(&read_write), canonical(&denied));
    fs::write(ro.join("visible"), b"ok").unwrap();
    fs::write(no.join("secret"), b"no").unwrap();

    let config = SandboxConfig {
        read_only_paths: vec![ro.clone()],
        read_write_paths: vec![rw.clone()],
        unrestricted_network: true,
        ..SandboxConfig::default()
    };

    std::thread::spawn(move || {
        let outcome = apply(&config).expect("sandbox should apply");
        assert!(outcome.is_fully_enforced(), "{outcome}");
        assert_eq!(outcome.applied(), 2);

        assert_eq!(fs::read(ro.join("visible")).unwrap(), b"ok");
        assert_eq!(
            fs::write(ro.join("new"), b"x").unwrap_err().kind(),
            ErrorKind::PermissionDenied
        );
        fs::write(rw.join("new"), b"x")
            .expect("read-write path should be writable");
        assert_eq!(
            fs::read(no.join("secret")).unwrap_err().kind(),
            ErrorKind::PermissionDenied
        );
    })
    .join()
    .expect("restricted thread panicked");
}

#[test]
fn strict_failure_leaves_the_thread_unrestricted() {
    if landlock_available().is_none() {
        return;
    }

    let denied = TempDir::new().unwrap();
    let no = canonical(&denied);
    fs::write(no.join("file"), b"still readable").unwrap();

    let config = SandboxConfig {
        read_only_paths: vec![PathBuf::from("/nonexistent-safe-run/missing")],
        unrestricted_network: true,
        ..SandboxConfig::default()
    };

    std::thread::spawn(move || {
        let err = apply(&config).unwrap_err();
        assert!(
            matches!(err, SandboxError::Commit(CommitError::PathMissing { .. })),
            "{err:?}"
        );
        assert_eq!(fs::read(no.join("file")).unwrap(), b"still readable");
    })
    .join()
    .expect("thread panicked");
}

#[test]
fn ignore_missing_skips_absent_paths() {
    if landlock_available().is_none() {
        return;
    }

    let present = TempDir::new().unwrap();
    let config = SandboxConfig {
        read_only_paths: vec![canonical(&present), PathBuf::from("/nonexistent-safe-run/missing")],
        unrestricted_network: true,
        ignore_missing: true,
        ..SandboxConfig::default()
    };

    std::thread::spawn(move || {
        let outcome = apply(&config).expect("sandbox should apply");
        assert_eq!(outcome.applied(), 1);
        assert!(outcome.is_fully_enforced());
    })
    .join()
    .expect("thread panicked");
}

#[test]
fn attaching_many_paths_does_not_accumulate_descriptors() {
    let Some(caps) = landlock_available() else {
        return;
    };

    let root = TempDir::new().unwrap();
    let paths: Vec<PathBuf> = (0..10_000)
        .map(|i| {
            let path = canonical(&root).join(format!("d{i}"));
            fs::create_dir(&path).unwrap();
            path
        })
        .collect();

    let config = SandboxConfig {
        read_only_paths: paths,
        unrestricted_network: true,
        ..SandboxConfig::default()
    };
    let policy = normalize(&config).unwrap();
    let plan = build(&policy, &caps).unwrap();
    assert_eq!(plan.rules.len(), 10_000);

    let before = open_fds();
    let mut handle = Landlock
        .create_ruleset(plan.handled_fs, plan.handled_net)
        .unwrap();
    for rule in &plan.rules {
        handle.attach(rule).unwrap();
    }
    let after = open_fds();
    // One descriptor for the ruleset itself plus noise from parallel tests
    assert!(
        after <= before + 32,
        "descriptors grew from {before} to {after} while attaching"
    );
}

#[test]
fn file_rules_accept_file_only_rights() {
    if landlock_available().is_none() {
        return;
    }

    let dir = TempDir::new().unwrap();
    let file = canonical(&dir).join("tool");
    fs::write(&file, b"#!/bin/sh\n").unwrap();
    let config = SandboxConfig {
        read_write_executable_paths: vec![file.clone()],
        unrestricted_network: true,
        ..SandboxConfig::default()
    };
    let sibling = canonical(&dir).join("sibling");
    fs::write(&sibling, b"x").unwrap();

    std::thread::spawn(move || {
        let outcome = apply(&config).expect("file rule should attach");
        assert_eq!(outcome.applied(), 1);
        assert!(fs::read(Path::new(&file)).is_ok());
        assert!(fs::read(&sibling).is_err());
    })
    .join()
    .expect("thread panicked");
}

#[test]
fn connect_is_limited_to_declared_ports() {
    if !network_available() {
        return;
    }

    let (_allowed_listener, allowed) = local_listener();
    let (_other_listener, other) = local_listener();
    let config = SandboxConfig {
        connect_tcp_ports: vec![PortSpec::from(allowed)],
        unrestricted_filesystem: true,
        ..SandboxConfig::default()
    };

    std::thread::spawn(move || {
        let outcome = apply(&config).expect("sandbox should apply");
        assert_eq!(outcome.applied(), 1);
        assert!(outcome.is_fully_enforced(), "{outcome}");

        TcpStream::connect((Ipv4Addr::LOCALHOST, allowed))
            .expect("declared port should connect");
        assert_eq!(
            TcpStream::connect((Ipv4Addr::LOCALHOST, other))
                .unwrap_err()
                .kind(),
            ErrorKind::PermissionDenied
        );
    })
    .join()
    .expect("restricted thread panicked");
}

#[test]
fn bind_is_limited_to_declared_ports() {
    if !network_available() {
        return;
    }

    // Released before restricting so the thread can take it again
    let port = local_listener().1;
    let config = SandboxConfig {
        bind_tcp_ports: vec![PortSpec::from(port)],
        unrestricted_filesystem: true,
        ..SandboxConfig::default()
    };

    std::thread::spawn(move || {
        let outcome = apply(&config).expect("sandbox should apply");
        assert!(outcome.is_fully_enforced(), "{outcome}");

        TcpListener::bind((Ipv4Addr::LOCALHOST, port))
            .expect("declared port should bind");
        // An ephemeral port is port 0 to Landlock, which was not declared
        assert_eq!(
            TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
                .unwrap_err()
                .kind(),
            ErrorKind::PermissionDenied
        );
    })
    .join()
    .expect("restricted thread panicked");
}
