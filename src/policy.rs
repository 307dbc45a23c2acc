// Copyright (c) 2026 Meta Platforms, Inc. and affiliates.
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! Per-mode policy plumbing: the collector CSV sink and the line-oriented
//! codec spoken with the predictor and agent processes.

use std::fs::File;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use log::{info, warn};

use crate::affinity::ClusterState;
use crate::hexfloat::format_hex;
use crate::perf::HwSample;
use crate::process::PolicyPipes;

/// Shell command the predictor mode runs, relative to the working directory.
pub const PREDICTOR_COMMAND: &str = "python3 ./predictor.py";
/// Shell command the agent mode runs.
pub const AGENT_COMMAND: &str = "python3 ./agent.py";

/// Scheduling policy, fixed at build time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Collect,
    Predictor,
    Agent,
}

impl Mode {
    /// The mode selected by the build's cargo feature.
    pub fn active() -> Mode {
        if cfg!(feature = "agent") {
            Mode::Agent
        } else if cfg!(feature = "predictor") {
            Mode::Predictor
        } else {
            Mode::Collect
        }
    }

    /// Shell command for the policy child, if this mode has one.
    pub fn policy_command(&self) -> Option<&'static str> {
        match self {
            Mode::Collect => None,
            Mode::Predictor => Some(PREDICTOR_COMMAND),
            Mode::Agent => Some(AGENT_COMMAND),
        }
    }
}

/// Counter deltas summed over every CPU for one tick.
#[derive(Debug, Clone, Copy, Default)]
pub struct CounterTotals {
    pub cycles: u64,
    pub instructions: u64,
    pub cache_misses: u64,
    pub branches: u64,
    pub branch_misses: u64,
}

impl CounterTotals {
    pub fn add(&mut self, sample: &HwSample) {
        self.cycles += sample.cycles;
        self.instructions += sample.instructions;
        self.cache_misses += sample.cache_misses;
        self.branches += sample.branches;
        self.branch_misses += sample.branch_misses;
    }
}

/// Derived scalars for one tick. Ratios are computed from the CPU-summed
/// totals, never averaged per CPU.
#[derive(Debug, Clone, Copy)]
pub struct TickMetrics {
    pub totals: CounterTotals,
    pub mkpi: f64,
    pub branch_miss_rate: f64,
    pub ipc: f64,
    pub cpu_usage: f64,
    pub elapsed_ms: u64,
}

impl TickMetrics {
    pub fn compute(totals: CounterTotals, cpu_usage: f64, elapsed_ms: u64) -> Self {
        Self {
            totals,
            mkpi: ratio(totals.cache_misses, totals.instructions) * 1000.0,
            branch_miss_rate: ratio(totals.branch_misses, totals.branches),
            ipc: ratio(totals.instructions, totals.cycles),
            cpu_usage,
            elapsed_ms,
        }
    }
}

/// An empty tick (no instructions, branches or cycles) yields 0.0 rather
/// than NaN for every derived ratio.
fn ratio(num: u64, den: u64) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

/// Collector-mode sink: one headerless CSV row per tick.
pub struct CollectSink {
    file: File,
    path: PathBuf,
}

impl CollectSink {
    pub fn create(dir: &Path, supervisor_pid: u32) -> Result<Self> {
        let path = dir.join(format!("scheduler_{supervisor_pid}.csv"));
        let file = File::create(&path)
            .with_context(|| format!("failed to open logging file {}", path.display()))?;
        info!("collecting to file {}", path.display());
        Ok(Self { file, path })
    }

    pub fn append(&mut self, metrics: &TickMetrics) -> Result<()> {
        let t = &metrics.totals;
        writeln!(
            self.file,
            "{},{},{},{},{},{}",
            metrics.elapsed_ms, t.cycles, t.instructions, t.cache_misses, t.branches, t.branch_misses
        )
        .with_context(|| format!("failed to append to {}", self.path.display()))
    }
}

/// Request/reply codec over the policy child's pipes. Requests are single
/// lines of space-separated tokens; float tokens use the hexadecimal form
/// so the exchange is lossless.
pub struct PolicyLink {
    pipes: PolicyPipes,
}

impl PolicyLink {
    pub fn new(pipes: PolicyPipes) -> Self {
        Self { pipes }
    }

    /// Writes one newline-terminated request. A short write or broken pipe
    /// is fatal to the run.
    pub fn send(&mut self, request: &str) -> Result<()> {
        self.pipes
            .stdin
            .write_all(request.as_bytes())
            .and_then(|_| self.pipes.stdin.write_all(b"\n"))
            .and_then(|_| self.pipes.stdin.flush())
            .context("failed to write to policy pipe")
    }

    /// Reads one reply line, accumulating until the newline regardless of
    /// how the child buffers its output. EOF is fatal.
    pub fn recv(&mut self) -> Result<String> {
        let mut line = String::new();
        let n = self
            .pipes
            .stdout
            .read_line(&mut line)
            .context("failed to read from policy pipe")?;
        if n == 0 {
            bail!("policy process closed its pipe");
        }
        Ok(line.trim_end().to_string())
    }

    /// Predictor exchange: one request per candidate cluster, replies are
    /// decimal MIPS estimates. Picks the argmax; candidates never win with
    /// a non-positive estimate, and equal estimates go to the later
    /// candidate, so a full tie commits `Both`.
    pub fn predict(&mut self, metrics: &TickMetrics, current: ClusterState) -> Result<ClusterState> {
        let mut best: Option<(f64, ClusterState)> = None;

        for candidate in ClusterState::CANDIDATES {
            let request = format!(
                "{} {} {} {} {} {}",
                format_hex(metrics.mkpi),
                format_hex(metrics.branch_miss_rate),
                format_hex(metrics.ipc),
                candidate.has_big() as u8,
                candidate.has_little() as u8,
                format_hex(metrics.cpu_usage),
            );
            self.send(&request)?;
            let reply = self.recv()?;
            let mips: f64 = match reply.trim().parse() {
                Ok(v) => v,
                Err(_) => {
                    warn!("predictor replied with an invalid MIPS estimate: {reply}");
                    continue;
                }
            };
            if mips > 0.0 && best.map_or(true, |(top, _)| mips >= top) {
                best = Some((mips, candidate));
            }
        }

        Ok(best.map_or(current, |(_, state)| state))
    }

    /// Agent exchange: one request, the reply names the cluster directly.
    /// Unknown replies keep the current state.
    pub fn consult_agent(
        &mut self,
        metrics: &TickMetrics,
        current: ClusterState,
    ) -> Result<ClusterState> {
        let request = format!(
            "{} {} {}",
            format_hex(metrics.mkpi),
            format_hex(metrics.branch_miss_rate),
            format_hex(metrics.ipc),
        );
        self.send(&request)?;
        let reply = self.recv()?;
        Ok(match reply.trim() {
            "4L" => ClusterState::Little,
            "4B" => ClusterState::Big,
            "4B4L" => ClusterState::Both,
            other => {
                warn!("scheduling agent replied with an invalid state: {other}");
                current
            }
        })
    }
}
