//! safe-run: run a command inside a Landlock sandbox
//!
//! Declares which paths and TCP ports the command may use, applies the
//! sandbox with safe-run-lib, then replaces this process with the command.
//! Restrictions are inherited across exec, so the command can never see
//! more than the declared policy.
//!
//! Exit codes: the command's own status on success, 125 when the sandbox
//! could not be applied, 126 when the command cannot be executed and 127
//! when it cannot be found.

mod exec;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use safe_run_lib::{EnforcementOutcome, PortSpec, SandboxConfig};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Exit status when the sandbox could not be applied.
const EXIT_SANDBOX_FAILED: i32 = 125;

/// Run a command in a Landlock sandbox
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Allow read-only access to this path
    #[arg(long = "ro", value_name = "PATH", value_delimiter = ',')]
    ro: Vec<PathBuf>,

    /// Allow read-only access with execution to this path
    #[arg(long = "rox", value_name = "PATH", value_delimiter = ',')]
    rox: Vec<PathBuf>,

    /// Allow read-write access to this path
    #[arg(long = "rw", value_name = "PATH", value_delimiter = ',')]
    rw: Vec<PathBuf>,

    /// Allow read-write access with execution to this path
    #[arg(long = "rwx", value_name = "PATH", value_delimiter = ',')]
    rwx: Vec<PathBuf>,

    /// Allow binding to these TCP ports (PORT or START-END)
    #[arg(long = "bind-tcp", value_name = "PORT", value_delimiter = ',')]
    bind_tcp: Vec<PortSpec>,

    /// Allow connecting to these TCP ports (PORT or START-END)
    #[arg(long = "connect-tcp", value_name = "PORT", value_delimiter = ',')]
    connect_tcp: Vec<PortSpec>,

    /// Fall back to a less restrictive sandbox when the kernel lacks support
    #[arg(long, default_value_t = false)]
    best_effort: bool,

    /// Allow unrestricted filesystem access
    #[arg(long, default_value_t = false)]
    unrestricted_filesystem: bool,

    /// Allow unrestricted network access
    #[arg(long, default_value_t = false)]
    unrestricted_network: bool,

    /// Skip declared paths that do not exist instead of failing
    #[arg(long, default_value_t = false)]
    ignore_missing: bool,

    /// Environment variable for the command (KEY=VALUE, or KEY to pass the current value)
    #[arg(long = "env", value_name = "KEY[=VALUE]")]
    env: Vec<String>,

    /// Logging level
    #[arg(long, value_enum, env = "SAFE_RUN_LOG_LEVEL", default_value_t = LogLevel::Error)]
    log_level: LogLevel,

    /// Command to run, followed by its arguments
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn as_filter(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

impl Args {
    fn sandbox_config(&self) -> SandboxConfig {
        SandboxConfig {
            read_only_paths: self.ro.clone(),
            read_only_executable_paths: self.rox.clone(),
            read_write_paths: self.rw.clone(),
            read_write_executable_paths: self.rwx.clone(),
            bind_tcp_ports: self.bind_tcp.clone(),
            connect_tcp_ports: self.connect_tcp.clone(),
            best_effort: self.best_effort,
            unrestricted_filesystem: self.unrestricted_filesystem,
            unrestricted_network: self.unrestricted_network,
            ignore_missing: self.ignore_missing,
        }
    }
}

fn init_logging(level: LogLevel) {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(level.as_filter()))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() {
    let args = Args::parse();
    init_logging(args.log_level);

    // run() only returns on failure; success replaces this process
    let err = match run(&args) {
        Ok(never) => match never {},
        Err(err) => err,
    };
    error!("{err:#}");
    std::process::exit(EXIT_SANDBOX_FAILED);
}

fn run(args: &Args) -> Result<std::convert::Infallible> {
    info!(command = ?args.command, "starting");

    let env = exec::resolve_env(&args.env, |key| std::env::var_os(key));
    let outcome = safe_run_lib::apply(&args.sandbox_config())
        .context("Failed to apply sandbox")?;
    report(&outcome);

    exec::exec(&args.command, &env)
}

/// Partial enforcement changes the user's security posture, so it is
/// printed regardless of the log level.
fn report(outcome: &EnforcementOutcome) {
    match outcome {
        EnforcementOutcome::Enforced { applied } => info!(applied, "sandbox fully enforced"),
        EnforcementOutcome::PartiallyEnforced { dropped, .. } => {
            eprintln!("[safe-run] Warning: {outcome}");
            for rule in dropped {
                warn!(rule = %rule.rule, reason = %rule.reason, "rule not enforced");
            }
        }
    }
}
