// Copyright (c) 2026 Meta Platforms, Inc. and affiliates.
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! Child process lifecycle: the supervised workload and the optional
//! out-of-process policy.

use std::io::BufReader;
use std::os::unix::process::CommandExt;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::Instant;

use anyhow::{Context, Result};
use log::warn;

use crate::clock;

/// Outcome of a non-blocking workload liveness check.
#[derive(Debug)]
pub enum PollStatus {
    Alive,
    Exited,
    Error(std::io::Error),
}

/// The supervised workload. Terminated (SIGTERM, then reaped) on drop if
/// still running.
pub struct Workload {
    child: Option<Child>,
    pid: u32,
    started: Instant,
}

impl Workload {
    /// Forks and execs the workload with the inherited environment and
    /// stdio.
    pub fn spawn(argv: &[String]) -> Result<Self> {
        let (program, args) = argv
            .split_first()
            .context("empty workload command line")?;
        let child = Command::new(program)
            .args(args)
            .spawn()
            .with_context(|| format!("failed to spawn workload `{program}`"))?;
        let pid = child.id();
        Ok(Self {
            child: Some(child),
            pid,
            started: clock::now(),
        })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn is_alive(&self) -> bool {
        self.child.is_some()
    }

    /// Milliseconds since the workload was spawned.
    pub fn elapsed_ms(&self) -> u64 {
        clock::to_millis(self.started.elapsed())
    }

    /// Non-blocking exit check. Errors are surfaced to the caller, which
    /// logs and keeps going.
    pub fn poll(&mut self) -> PollStatus {
        let Some(child) = self.child.as_mut() else {
            return PollStatus::Exited;
        };
        match child.try_wait() {
            Ok(None) => PollStatus::Alive,
            Ok(Some(_)) => {
                self.child = None;
                PollStatus::Exited
            }
            Err(e) => PollStatus::Error(e),
        }
    }

    /// Current CPU utilization of the workload in percent, aggregated over
    /// its threads via `ps`. Never fatal: any failure reads as 0.0.
    pub fn cpu_usage(&self) -> f64 {
        if self.child.is_none() {
            return 0.0;
        }
        let output = match Command::new("ps")
            .args(["-p", &self.pid.to_string(), "-mo", "pcpu"])
            .output()
        {
            Ok(output) => output,
            Err(e) => {
                warn!("failed to collect cpu usage: {e}");
                return 0.0;
            }
        };
        parse_pcpu(&String::from_utf8_lossy(&output.stdout))
    }

    /// SIGTERM + reap. Idempotent.
    pub fn terminate(&mut self) {
        terminate_child(&mut self.child);
    }
}

impl Drop for Workload {
    fn drop(&mut self) {
        self.terminate();
    }
}

/// Parses `ps -p <pid> -mo pcpu` output. With `-m` the first data row is
/// the per-thread aggregate, which is the value we want.
fn parse_pcpu(output: &str) -> f64 {
    output
        .lines()
        .nth(1)
        .and_then(|line| line.trim().parse().ok())
        .unwrap_or(0.0)
}

/// Line-oriented pipe pair connected to a policy child: our write end is
/// its stdin, our read end is its stdout.
pub struct PolicyPipes {
    pub stdin: ChildStdin,
    pub stdout: BufReader<ChildStdout>,
}

/// The out-of-process policy. Same termination contract as [`Workload`].
pub struct PolicyProcess {
    child: Option<Child>,
}

impl PolicyProcess {
    /// Spawns `shell_command` under `/bin/sh -c` with piped stdin/stdout.
    /// The child is set up to receive SIGTERM if the supervisor dies, so a
    /// crashed supervisor cannot strand a policy interpreter.
    pub fn spawn(shell_command: &str) -> Result<(Self, PolicyPipes)> {
        let mut cmd = Command::new("/bin/sh");
        cmd.arg("-c")
            .arg(shell_command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped());
        unsafe {
            cmd.pre_exec(|| {
                if libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM as libc::c_ulong) < 0 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }

        let mut child = cmd
            .spawn()
            .with_context(|| format!("failed to spawn policy process `{shell_command}`"))?;
        let stdin = child
            .stdin
            .take()
            .context("policy child has no stdin pipe")?;
        let stdout = child
            .stdout
            .take()
            .context("policy child has no stdout pipe")?;

        Ok((
            Self { child: Some(child) },
            PolicyPipes {
                stdin,
                stdout: BufReader::new(stdout),
            },
        ))
    }

    /// SIGTERM + reap. Idempotent.
    pub fn terminate(&mut self) {
        terminate_child(&mut self.child);
    }
}

impl Drop for PolicyProcess {
    fn drop(&mut self) {
        self.terminate();
    }
}

fn terminate_child(slot: &mut Option<Child>) {
    if let Some(mut child) = slot.take() {
        unsafe {
            libc::kill(child.id() as libc::pid_t, libc::SIGTERM);
        }
        let _ = child.wait();
    }
}
