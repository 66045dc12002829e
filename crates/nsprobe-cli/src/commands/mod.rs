//! CLI command definitions and dispatch.

pub mod read;
pub mod stat;

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use nsprobe_common::config::NsprobeConfig;
use nsprobe_common::constants::{BIN_NAME, CONFIG_ENV, CONTAINER_MOUNT_ENV, HOSTFS_ENV};
use nsprobe_common::types::{NamespaceKind, NamespacePath, OperationKind};
use nsprobe_core::{NamespaceFileRequest, NsProbe};

/// Read and stat files inside another mount namespace.
#[derive(Parser, Debug)]
#[command(name = BIN_NAME, version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// Enter the mount namespace of this process. Takes precedence over `--ns`.
    #[arg(long, global = true)]
    pub pid: Option<u32>,

    /// Path of a mount namespace descriptor, e.g. `/proc/1234/ns/mnt`.
    #[arg(long, global = true, env = CONTAINER_MOUNT_ENV)]
    pub ns: Option<PathBuf>,

    /// User namespace to join before the mount namespace, for rootless
    /// containers, e.g. `/proc/1234/ns/user`.
    #[arg(long, global = true)]
    pub userns: Option<PathBuf>,

    /// Where the host filesystem is mounted when running inside a container.
    #[arg(long, global = true, env = HOSTFS_ENV, default_value = "")]
    pub hostfs: String,

    /// JSON file overriding timeouts and chunk size.
    #[arg(long, global = true, env = CONFIG_ENV)]
    pub config: Option<PathBuf>,
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Write the contents of files to stdout.
    Read(read::ReadArgs),
    /// Print metadata of files.
    Stat(stat::StatArgs),
}

/// The namespaces a command's workers join.
#[derive(Debug, Clone)]
pub struct Target {
    mount: NamespacePath,
    user: Option<NamespacePath>,
}

impl Target {
    /// The mount namespace descriptor.
    #[must_use]
    pub const fn mount(&self) -> &NamespacePath {
        &self.mount
    }

    /// Builds the request for `kind` on `file`, user namespace first.
    #[must_use]
    pub fn request(&self, kind: OperationKind, file: &Path) -> NamespaceFileRequest {
        let request = NamespaceFileRequest::new(kind, file, self.mount.clone());
        match &self.user {
            Some(user) => request.joining_first(user.clone()),
            None => request,
        }
    }
}

impl Cli {
    /// Resolves the mount namespace from `--pid` or `--ns`, plus `--userns`.
    ///
    /// # Errors
    ///
    /// Returns an error if neither `--pid` nor `--ns` was given.
    pub fn target(&self) -> anyhow::Result<Target> {
        let mount = match self.pid {
            Some(pid) => NamespacePath::for_pid(&self.hostfs, pid, NamespaceKind::Mount),
            None => self.ns.as_ref().map(NamespacePath::new).with_context(|| {
                format!("no namespace given: pass --pid or --ns, or set {CONTAINER_MOUNT_ENV}")
            })?,
        };
        Ok(Target {
            mount,
            user: self.userns.as_ref().map(NamespacePath::new),
        })
    }

    /// Builds the client, loading `--config` when given.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be loaded or is invalid.
    pub fn probe(&self) -> anyhow::Result<NsProbe> {
        let config = match &self.config {
            Some(path) => NsprobeConfig::load(path)
                .with_context(|| format!("failed to load config {}", path.display()))?,
            None => NsprobeConfig::default(),
        };
        Ok(NsProbe::with_config(config)?)
    }
}

/// Dispatches the parsed CLI command to its handler.
///
/// # Errors
///
/// Returns an error if the command execution fails.
pub fn execute(cli: Cli) -> anyhow::Result<()> {
    let target = cli.target()?;
    let probe = cli.probe()?;
    tracing::debug!(
        namespace = %target.mount(),
        userns = target.user.is_some(),
        "resolved target namespace"
    );

    match cli.command {
        Command::Read(args) => read::execute(&probe, &target, &args),
        Command::Stat(args) => stat::execute(&probe, &target, &args),
    }
}

/// Fails with a summary when some files could not be processed.
fn summarize(failed: usize, total: usize, verb: &str) -> anyhow::Result<()> {
    if failed > 0 {
        anyhow::bail!("{failed} of {total} files could not be {verb}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pid_builds_proc_path_under_hostfs() {
        let cli = Cli::try_parse_from([
            "nsprobe",
            "--pid",
            "42",
            "--hostfs",
            "/host/",
            "read",
            "/etc/os-release",
        ])
        .expect("parse");
        let target = cli.target().expect("target");
        assert_eq!(target.mount().as_path(), Path::new("/host/proc/42/ns/mnt"));
    }

    #[test]
    fn pid_takes_precedence_over_ns() {
        let cli = Cli::try_parse_from([
            "nsprobe", "--ns", "/tmp/ns", "--pid", "7", "--hostfs", "", "stat", "/",
        ])
        .expect("parse");
        assert_eq!(
            cli.target().expect("target").mount().as_path(),
            Path::new("/proc/7/ns/mnt")
        );
    }

    #[test]
    fn userns_is_joined_before_mount_namespace() {
        let cli = Cli::try_parse_from([
            "nsprobe",
            "--ns",
            "/proc/5/ns/mnt",
            "--userns",
            "/proc/5/ns/user",
            "stat",
            "/etc/hosts",
        ])
        .expect("parse");
        let request = cli
            .target()
            .expect("target")
            .request(OperationKind::Stat, Path::new("/etc/hosts"));

        let order: Vec<_> = request.join_order().map(NamespacePath::as_path).collect();
        assert_eq!(order, [Path::new("/proc/5/ns/user"), Path::new("/proc/5/ns/mnt")]);
        assert_eq!(request.kind(), OperationKind::Stat);
    }

    #[test]
    fn read_requires_a_file() {
        assert!(Cli::try_parse_from(["nsprobe", "--ns", "/tmp/ns", "read"]).is_err());
    }

    #[test]
    fn summarize_reports_failures() {
        assert!(summarize(0, 3, "read").is_ok());
        let err = summarize(2, 3, "read").unwrap_err();
        assert_eq!(err.to_string(), "2 of 3 files could not be read");
    }
}
