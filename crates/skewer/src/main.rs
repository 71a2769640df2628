//! skewer - a privilege-separated syslog collector and forwarder
//!
//! The same binary is both the supervisor and every worker: a process
//! started with `SKEWER_ROLE` set becomes the named worker, anything else
//! goes through the CLI.
//!
//! ```bash
//! skewer serve --loglevel info
//! skewer serve --test          # everything to stderr, no broker needed
//! ```
//!
//! Exit codes: 0 clean, 1 fatal initialization error, 2 fatal runtime
//! error. SIGTERM/SIGINT shut down gracefully, SIGHUP reloads the
//! configuration.

mod child;
mod child_proc;
mod handles;
mod ipc;
mod logging;
mod metrics_server;
mod supervisor;

use std::io::Write;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};

use handles::Role;
use logging::LogOutput;

#[derive(Parser, Debug)]
#[command(name = "skewer")]
#[command(version, about = "Collect syslog messages and forward them to your destinations")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the collector
    Serve(ServeArgs),
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// Print messages to stderr instead of the configured destinations
    #[arg(long)]
    test: bool,

    /// Send our own logs to the local syslog daemon
    #[arg(long)]
    syslog: bool,

    /// Logging level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    loglevel: String,

    /// Write logs to a file instead of stderr
    #[arg(long, default_value = "")]
    logfilename: String,

    /// Write logs in JSON format
    #[arg(long)]
    logjson: bool,

    /// Write the PID to this file
    #[arg(long, default_value = "")]
    pidfile: String,

    /// Register the services in the external directory service
    #[arg(long)]
    register: bool,

    /// Service name used when registering
    #[arg(long, default_value = "skewer")]
    servicename: String,

    /// Switch to this user after the privileged setup (root only)
    #[arg(long, default_value = "")]
    uid: String,

    /// Switch to this group after the privileged setup (root only)
    #[arg(long, default_value = "")]
    gid: String,

    /// Keep the process traceable/dumpable
    #[arg(long)]
    dumpable: bool,

    /// Expose supervisor state for profiling/debugging
    #[arg(long)]
    profile: bool,

    /// Configuration directory
    #[arg(long, default_value = "/etc/skewer")]
    confdir: String,

    /// Durable store directory
    #[arg(long, default_value = "/var/lib/skewer/store")]
    storepath: String,
}

fn main() -> ExitCode {
    // a worker re-execution bypasses the CLI entirely
    if let Ok(role) = std::env::var(handles::ENV_ROLE) {
        let Some(role) = Role::parse(role.trim()) else {
            eprintln!("unknown role: {role}");
            return ExitCode::from(1);
        };
        return match child::child_main(role) {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("fatal error in the {role} worker: {e:#}");
                ExitCode::from(2)
            }
        };
    }

    let cli = Cli::parse();
    match cli.command {
        Command::Serve(args) => match run_serve(args) {
            Ok(code) => ExitCode::from(code as u8),
            Err(e) => {
                eprintln!("fatal initialization error: {e:#}");
                ExitCode::from(1)
            }
        },
    }
}

fn run_serve(args: ServeArgs) -> Result<i32> {
    let log_output = LogOutput::open(&args.logfilename)
        .with_context(|| format!("opening the log file {:?}", args.logfilename))?;
    logging::init_parent(&args.loglevel, args.logjson, log_output.clone())?;
    if args.syslog {
        tracing::warn!("--syslog is accepted for compatibility; logs go to the configured output");
    }
    if args.register {
        tracing::warn!(
            service = args.servicename,
            "directory-service registration requires an external agent; flag noted"
        );
    }

    if !args.dumpable {
        // the parent holds session keys; stay out of core dumps
        unsafe {
            libc::prctl(libc::PR_SET_DUMPABLE, 0, 0, 0, 0);
        }
    }

    write_pidfile(&args.pidfile)?;

    std::fs::create_dir_all(&args.storepath)
        .with_context(|| format!("creating the store directory {:?}", args.storepath))?;

    // read only the metrics block up front; everything else flows through
    // the configuration service
    let metrics = skewer_config::BaseConfig::load(std::path::Path::new(&args.confdir))
        .map(|c| c.metrics)
        .unwrap_or_default();

    let options = supervisor::ServeOptions {
        test: args.test,
        conf_dir: args.confdir,
        store_path: args.storepath,
        profile: args.profile,
        uid: args.uid,
        gid: args.gid,
        log_output,
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building the runtime")?;
    let code = runtime.block_on(supervisor::serve(options, metrics))?;

    remove_pidfile(&args.pidfile);
    tracing::info!(code, "skewer exiting");
    Ok(code)
}

fn write_pidfile(path: &str) -> Result<()> {
    if path.is_empty() {
        return Ok(());
    }
    let mut file = std::fs::File::create(path)
        .with_context(|| format!("creating the pid file {path:?}"))?;
    writeln!(file, "{}", std::process::id())?;
    Ok(())
}

fn remove_pidfile(path: &str) {
    if !path.is_empty() {
        let _ = std::fs::remove_file(path);
    }
}
