//! Implements run_command on unix.
//!
//! Spawning goes through std::process, but both of the child's output fds
//! are pointed at a single pipe, so the captured stream interleaves stdout
//! and stderr in the order the child wrote them; the std API alone cannot
//! express that.

use crate::process::Termination;
use std::fs::File;
use std::io::{Read, Write};
use std::os::unix::io::FromRawFd;
use std::os::unix::process::ExitStatusExt;
use std::process::{Command, Stdio};

fn check_posix(func: &str, ret: libc::c_int) -> anyhow::Result<libc::c_int> {
    if ret < 0 {
        anyhow::bail!("{}: {}", func, std::io::Error::last_os_error());
    }
    Ok(ret)
}

pub fn run_command(cmdline: &str, cwd: Option<&str>) -> anyhow::Result<(Termination, Vec<u8>)> {
    let (mut read_end, child_stdout, child_stderr) = unsafe {
        let mut fds: [libc::c_int; 2] = [0; 2];
        check_posix("pipe", libc::pipe(fds.as_mut_ptr()))?;
        let dup = check_posix("dup", libc::dup(fds[1]))?;
        (
            File::from_raw_fd(fds[0]),
            Stdio::from_raw_fd(fds[1]),
            Stdio::from_raw_fd(dup),
        )
    };

    let mut cmd = Command::new("/bin/sh");
    cmd.arg("-c")
        .arg(cmdline)
        .stdin(Stdio::null())
        .stdout(child_stdout)
        .stderr(child_stderr);
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }
    let mut child = cmd.spawn()?;
    // The Command still owns our copies of the pipe's write end; drop it so
    // the read below sees EOF once the child exits.
    drop(cmd);

    let mut output = Vec::new();
    read_end.read_to_end(&mut output)?;
    let status = child.wait()?;

    let mut termination = Termination::Success;
    if !status.success() {
        termination = Termination::Failure;
        if let Some(sig) = status.signal() {
            match sig {
                libc::SIGINT => {
                    termination = Termination::Interrupted;
                    let _ = write!(output, "interrupted");
                }
                _ => {
                    let _ = write!(output, "signal {}", sig);
                }
            }
        }
    }

    Ok((termination, output))
}
