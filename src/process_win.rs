//! Implements run_command on Windows via std::process.
//!
//! Interleaving across the two streams is not preserved here; stderr
//! follows stdout in the captured output.

use crate::process::Termination;
use std::process::{Command, Stdio};

pub fn run_command(cmdline: &str, cwd: Option<&str>) -> anyhow::Result<(Termination, Vec<u8>)> {
    let mut cmd = Command::new("cmd");
    cmd.arg("/c").arg(cmdline).stdin(Stdio::null());
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }
    let out = cmd.output()?;
    let mut output = out.stdout;
    output.extend_from_slice(&out.stderr);
    let termination = if out.status.success() {
        Termination::Success
    } else {
        Termination::Failure
    };
    Ok((termination, output))
}
