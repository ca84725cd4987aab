//! quarry-worker: task privilege isolation diagnostics.
//!
//! The worker's run loop lives in the execution subsystem. This binary
//! wires the platform identity provider the same way and gives operators
//! a dry-run check of a payload's group list against the host, without
//! changing any membership.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use quarry_core::config::WorkerConfig;
use quarry_core::payload::validate_group_name;
use quarry_worker::identity::IdentityProvider;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[cfg(unix)]
use quarry_worker::identity::provider::platform_identity;

/// Task privilege isolation diagnostics for the quarry worker.
#[derive(Parser, Debug)]
#[command(name = "quarry-worker", version, about)]
struct Args {
    /// Path to the worker configuration file
    #[arg(short, long, default_value = "worker.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Resolve this OS group against the host and report, without
    /// changing any membership; may be given multiple times
    #[arg(long = "check-group", value_name = "NAME")]
    check_groups: Vec<String>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = if args.config.exists() {
        WorkerConfig::from_file(&args.config).context("failed to load worker configuration")?
    } else {
        info!(path = %args.config.display(), "no configuration file found, using defaults");
        WorkerConfig::default()
    };

    #[cfg(unix)]
    {
        let provider = platform_identity();
        run_checks(&config, &provider, &args.check_groups)
    }

    #[cfg(not(unix))]
    {
        let _ = config;
        anyhow::bail!("no platform identity provider is wired for this host");
    }
}

#[cfg(unix)]
fn run_checks(
    config: &WorkerConfig,
    provider: &impl IdentityProvider,
    groups: &[String],
) -> Result<()> {
    info!(
        model = %provider.model(),
        run_tasks_as_current_user = config.run_tasks_as_current_user,
        effective_uid = nix::unistd::geteuid().as_raw(),
        "worker identity wiring"
    );

    if config.run_tasks_as_current_user && !groups.is_empty() {
        warn!("tasks run as the current user; these groups would be skipped at task start");
    }

    let mut failures = 0usize;
    for name in groups {
        if let Err(error) = validate_group_name(name) {
            warn!(group = %name, %error, "group name failed validation");
            failures += 1;
            continue;
        }
        match provider.resolve_group(name) {
            Ok(group) => info!(
                group = %group.name,
                gid = group.gid,
                members = group.members.len(),
                "group resolves"
            ),
            Err(error) => {
                warn!(group = %name, %error, "group does not resolve");
                failures += 1;
            },
        }
    }

    if failures > 0 {
        anyhow::bail!("{failures} of {} group check(s) failed", groups.len());
    }
    Ok(())
}
