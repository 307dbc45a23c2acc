// Copyright (c) 2026 Meta Platforms, Inc. and affiliates.
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! The owning aggregate: startup, the 20 ms control loop, and teardown.
//!
//! Every handle the supervisor acquires (collector file, policy child and
//! pipes, workload child, perf fds) lives in one place so that any exit
//! path (normal completion, a fatal tick error, a signal) releases all of
//! them exactly once.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use anyhow::{bail, Context, Result};
use log::{debug, info, warn};

use crate::affinity::{self, ClusterState};
use crate::perf::PerfSampler;
use crate::policy::{CollectSink, CounterTotals, Mode, PolicyLink, TickMetrics};
use crate::process::{PolicyProcess, PollStatus, Workload};
use crate::TICK_PERIOD;

pub struct Supervisor {
    mode: Mode,
    state: ClusterState,
    out_dir: PathBuf,
    pid: u32,

    // Owned handles, in acquisition order. Each is taken exactly once by
    // shutdown(), which makes teardown idempotent.
    collect: Option<CollectSink>,
    link: Option<PolicyLink>,
    policy: Option<PolicyProcess>,
    workload: Option<Workload>,
    sampler: Option<PerfSampler>,
}

impl Supervisor {
    /// Brings up the mode's adapter, the workload and the counters, in
    /// that order. A failure at any step unwinds what was already
    /// acquired, in reverse.
    pub fn init(mode: Mode, workload_argv: &[String], out_dir: &Path) -> Result<Self> {
        Self::init_with_policy(mode, workload_argv, out_dir, None)
    }

    /// As [`init`](Self::init), with the policy shell command overridden.
    pub fn init_with_policy(
        mode: Mode,
        workload_argv: &[String],
        out_dir: &Path,
        policy_command: Option<&str>,
    ) -> Result<Self> {
        let pid = std::process::id();

        let mut collect = None;
        let mut link = None;
        let mut policy = None;
        match mode {
            Mode::Collect => collect = Some(CollectSink::create(out_dir, pid)?),
            Mode::Predictor | Mode::Agent => {
                let command = policy_command
                    .or_else(|| mode.policy_command())
                    .context("no policy command for mode")?;
                let (child, pipes) = PolicyProcess::spawn(command)?;
                policy = Some(child);
                link = Some(PolicyLink::new(pipes));
            }
        }

        let workload = Workload::spawn(workload_argv)?;
        debug!("spawned workload pid {}", workload.pid());

        let sampler = PerfSampler::init()?;

        Ok(Self {
            mode,
            state: ClusterState::Both,
            out_dir: out_dir.to_path_buf(),
            pid,
            collect,
            link,
            policy,
            workload: Some(workload),
            sampler: Some(sampler),
        })
    }

    /// Currently committed cluster state.
    pub fn state(&self) -> ClusterState {
        self.state
    }

    /// Drives the tick loop until the workload exits or `shutdown` is
    /// raised. On workload exit one final tick still runs, then the
    /// elapsed-time file is written.
    pub fn run(&mut self, shutdown: &AtomicBool) -> Result<()> {
        while !shutdown.load(Ordering::Relaxed) {
            thread::sleep(TICK_PERIOD);

            let alive = match self.workload.as_mut() {
                Some(workload) => match workload.poll() {
                    PollStatus::Alive => true,
                    PollStatus::Exited => false,
                    PollStatus::Error(e) => {
                        warn!("waitpid on workload failed: {e}");
                        true
                    }
                },
                None => false,
            };

            self.tick(alive)?;

            if !alive {
                let elapsed_ms = self.workload.as_ref().map_or(0, |w| w.elapsed_ms());
                self.write_time_file(elapsed_ms)?;
                info!("main application finished");
                return Ok(());
            }
        }

        info!("interrupted, shutting down");
        Ok(())
    }

    fn tick(&mut self, workload_alive: bool) -> Result<()> {
        let Some(workload) = self.workload.as_ref() else {
            bail!("tick without a workload");
        };
        let cpu_usage = workload.cpu_usage();
        let elapsed_ms = workload.elapsed_ms();
        let workload_pid = workload.pid();

        let Some(sampler) = self.sampler.as_mut() else {
            bail!("tick without counters");
        };
        let mut totals = CounterTotals::default();
        for cpu in 0..sampler.nprocs() {
            totals.add(&sampler.consume_hw(cpu)?);
        }

        let metrics = TickMetrics::compute(totals, cpu_usage, elapsed_ms);

        let next = match self.mode {
            Mode::Collect => {
                let Some(sink) = self.collect.as_mut() else {
                    bail!("tick without a collector sink");
                };
                sink.append(&metrics)?;
                None
            }
            Mode::Predictor => {
                let Some(link) = self.link.as_mut() else {
                    bail!("tick without a policy link");
                };
                Some(link.predict(&metrics, self.state)?)
            }
            Mode::Agent => {
                let Some(link) = self.link.as_mut() else {
                    bail!("tick without a policy link");
                };
                Some(link.consult_agent(&metrics, self.state)?)
            }
        };

        if let Some(next) = next {
            if affinity::needs_apply(self.state, next, workload_alive) {
                debug!("cluster {} -> {}", self.state, next);
                affinity::apply(next, workload_pid);
                self.state = next;
            }
        }

        Ok(())
    }

    fn write_time_file(&self, elapsed_ms: u64) -> Result<()> {
        let path = self.out_dir.join(format!("scheduler_{}.time", self.pid));
        fs::write(&path, elapsed_ms.to_string())
            .with_context(|| format!("failed to write time file {}", path.display()))
    }

    /// Releases every handle in reverse acquisition order: counters,
    /// workload, policy child, policy pipes, collector file. Safe to call
    /// any number of times, from any exit path.
    pub fn shutdown(&mut self) {
        debug!("cleaning up");
        self.sampler = None;
        if let Some(mut workload) = self.workload.take() {
            workload.terminate();
        }
        if let Some(mut policy) = self.policy.take() {
            policy.terminate();
        }
        self.link = None;
        self.collect = None;
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        self.shutdown();
    }
}
