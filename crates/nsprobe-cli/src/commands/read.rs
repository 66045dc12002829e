//! `nsprobe read`: write file contents to stdout.

use std::io::Write;
use std::path::PathBuf;

use anyhow::Context;
use clap::Args;
use nsprobe_common::types::OperationKind;
use nsprobe_core::{NsProbe, Outcome};

use super::Target;

/// Arguments for the `read` command.
#[derive(Args, Debug)]
pub struct ReadArgs {
    /// Files to read, as paths inside the namespace.
    #[arg(required = true)]
    pub files: Vec<PathBuf>,
}

/// Executes the `read` command.
///
/// Contents are written back to back, exactly as read. A file that fails
/// is logged and skipped.
///
/// # Errors
///
/// Returns an error if any file failed or stdout could not be written.
pub fn execute(probe: &NsProbe, target: &Target, args: &ReadArgs) -> anyhow::Result<()> {
    let mut stdout = std::io::stdout().lock();
    let mut failed = 0;

    for file in &args.files {
        let result = probe
            .execute(&target.request(OperationKind::Read, file))
            .and_then(Outcome::into_bytes);
        match result {
            Ok(content) => stdout
                .write_all(&content)
                .context("failed to write to stdout")?,
            Err(e) => {
                tracing::error!(file = %file.display(), error = %e, "read failed");
                failed += 1;
            }
        }
    }
    stdout.flush().context("failed to flush stdout")?;

    super::summarize(failed, args.files.len(), "read")
}
