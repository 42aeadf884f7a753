//! Replacing the launcher with the sandboxed command

use std::ffi::{OsStr, OsString};
use std::os::unix::fs::PermissionsExt;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result};

/// Exit status when the command exists but cannot be executed.
const EXIT_CANNOT_EXECUTE: i32 = 126;
/// Exit status when the command cannot be found.
const EXIT_NOT_FOUND: i32 = 127;

/// Compute the command's environment from `--env` values.
///
/// `KEY=VALUE` is passed literally, `KEY` passes the invoking value and is
/// omitted when unset. Nothing else is inherited.
pub fn resolve_env<F>(specs: &[String], lookup: F) -> Vec<(OsString, OsString)>
where
    F: Fn(&str) -> Option<OsString>,
{
    let mut env = Vec::with_capacity(specs.len());
    for spec in specs {
        match spec.split_once('=') {
            Some((key, value)) => env.push((OsString::from(key), OsString::from(value))),
            None => match lookup(spec) {
                Some(value) => env.push((OsString::from(spec), value)),
                None => tracing::debug!(key = %spec, "not set, omitting from environment"),
            },
        }
    }
    env
}

/// Find `program` the way a shell would: names containing a slash are used
/// as given, anything else is searched in `search_path` for a regular file
/// with an execute bit set.
pub fn resolve_program(program: &str, search_path: Option<&OsStr>) -> Option<PathBuf> {
    if program.contains('/') {
        return Some(PathBuf::from(program));
    }
    std::env::split_paths(search_path?)
        .map(|dir| dir.join(program))
        .find(|candidate| is_executable(candidate))
}

fn is_executable(path: &Path) -> bool {
    match std::fs::metadata(path) {
        Ok(meta) => meta.is_file() && meta.permissions().mode() & 0o111 != 0,
        Err(_) => false,
    }
}

/// Replace this process with `command`. Only returns on launcher errors;
/// exec failures exit with 126 or 127 directly.
pub fn exec(command: &[String], env: &[(OsString, OsString)]) -> Result<std::convert::Infallible> {
    let (program, args) = command.split_first().context("Missing command to run")?;

    // PATH from the command's environment wins over the launcher's own
    let launcher_path = std::env::var_os("PATH");
    let search_path = env
        .iter()
        .find(|(key, _)| key == "PATH")
        .map(|(_, value)| value.as_os_str())
        .or(launcher_path.as_deref());

    let Some(resolved) = resolve_program(program, search_path) else {
        eprintln!("[safe-run] {program}: command not found");
        std::process::exit(EXIT_NOT_FOUND);
    };

    tracing::debug!(program = %resolved.display(), "executing");
    let err = Command::new(&resolved)
        .arg0(program)
        .args(args)
        .env_clear()
        .envs(env.iter().map(|(key, value)| (key, value)))
        .exec();

    // exec() only returns on error
    eprintln!("[safe-run] Failed to execute {}: {err}", resolved.display());
    std::process::exit(exit_code_for(&resolved, &err));
}

fn exit_code_for(program: &Path, err: &std::io::Error) -> i32 {
    if err.kind() == std::io::ErrorKind::NotFound && !program.exists() {
        EXIT_NOT_FOUND
    } else {
        EXIT_CANNOT_EXECUTE
    }
}
