// Copyright (c) 2026 Meta Platforms, Inc. and affiliates.
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! Per-CPU hardware counter sampling.
//!
//! One counter group per online CPU (leader: cycles) counting every process
//! on that CPU. The counters run from [`PerfSampler::init`] until drop;
//! [`PerfSampler::consume_hw`] surfaces the counts accumulated since the
//! previous consume and re-arms the group, so callers only ever see deltas.

use std::io;
use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};

use anyhow::{bail, Context, Result};
use perf_event_open_sys as sys;

/// Counter deltas for one CPU since the previous consume.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HwSample {
    pub cycles: u64,
    pub instructions: u64,
    pub cache_misses: u64,
    pub branches: u64,
    pub branch_misses: u64,
}

const NR_EVENTS: usize = 5;

/// Group members in open order; the leader must come first so the later
/// opens can name its fd.
const GROUP_EVENTS: [(u32, &str); NR_EVENTS] = [
    (sys::bindings::PERF_COUNT_HW_CPU_CYCLES, "cycles"),
    (sys::bindings::PERF_COUNT_HW_INSTRUCTIONS, "instructions"),
    (sys::bindings::PERF_COUNT_HW_CACHE_MISSES, "cache-misses"),
    (
        sys::bindings::PERF_COUNT_HW_BRANCH_INSTRUCTIONS,
        "branches",
    ),
    (sys::bindings::PERF_COUNT_HW_BRANCH_MISSES, "branch-misses"),
];

struct CpuGroup {
    counters: Vec<OwnedFd>,
}

impl CpuGroup {
    fn open(cpu: i32) -> Result<Self> {
        let mut counters: Vec<OwnedFd> = Vec::with_capacity(GROUP_EVENTS.len());

        for (config, name) in GROUP_EVENTS {
            let mut attrs = sys::bindings::perf_event_attr {
                type_: sys::bindings::PERF_TYPE_HARDWARE,
                size: mem::size_of::<sys::bindings::perf_event_attr>() as u32,
                config: config as u64,
                ..Default::default()
            };
            attrs.set_disabled(0);
            attrs.set_exclude_kernel(0);
            attrs.set_exclude_hv(0);

            let group_fd = counters.first().map(|fd| fd.as_raw_fd()).unwrap_or(-1);
            // pid = -1: count everything running on this CPU.
            let fd = unsafe { sys::perf_event_open(&mut attrs, -1, cpu, group_fd, 0) };
            if fd < 0 {
                return Err(io::Error::last_os_error())
                    .with_context(|| format!("failed to open {name} counter on CPU {cpu}"));
            }
            counters.push(unsafe { OwnedFd::from_raw_fd(fd) });
        }

        Ok(Self { counters })
    }

    fn read_and_reset(&mut self) -> Result<[u64; NR_EVENTS]> {
        let mut counts = [0u64; NR_EVENTS];

        for (slot, fd) in self.counters.iter().enumerate() {
            let mut count: u64 = 0;
            let size = mem::size_of::<u64>();
            let ret = unsafe {
                libc::read(
                    fd.as_raw_fd(),
                    &mut count as *mut u64 as *mut libc::c_void,
                    size,
                )
            };
            if ret != size as isize {
                bail!(
                    "failed to read {} counter: {}",
                    GROUP_EVENTS[slot].1,
                    io::Error::last_os_error()
                );
            }
            let reset = unsafe {
                libc::ioctl(
                    fd.as_raw_fd(),
                    sys::bindings::RESET as libc::c_ulong,
                    0 as libc::c_ulong,
                )
            };
            if reset < 0 {
                bail!(
                    "failed to reset {} counter: {}",
                    GROUP_EVENTS[slot].1,
                    io::Error::last_os_error()
                );
            }
            counts[slot] = count;
        }

        Ok(counts)
    }
}

/// Owns one counter group per online CPU. Dropping it closes every fd.
pub struct PerfSampler {
    cpus: Vec<CpuGroup>,
}

impl PerfSampler {
    /// Opens the hardware counter groups on every online CPU. Any single
    /// open failure aborts startup.
    pub fn init() -> Result<Self> {
        let nprocs = online_cpus()?;
        let mut cpus = Vec::with_capacity(nprocs);
        for cpu in 0..nprocs {
            cpus.push(CpuGroup::open(cpu as i32)?);
        }
        Ok(Self { cpus })
    }

    /// Number of CPUs being sampled.
    pub fn nprocs(&self) -> usize {
        self.cpus.len()
    }

    /// Returns the counts accumulated on `cpu` since the previous consume
    /// (or since init) and re-arms the counters.
    pub fn consume_hw(&mut self, cpu: usize) -> Result<HwSample> {
        let group = self
            .cpus
            .get_mut(cpu)
            .with_context(|| format!("no counter group for CPU {cpu}"))?;
        let counts = group.read_and_reset()?;
        Ok(HwSample {
            cycles: counts[0],
            instructions: counts[1],
            cache_misses: counts[2],
            branches: counts[3],
            branch_misses: counts[4],
        })
    }
}

fn online_cpus() -> Result<usize> {
    let n = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_ONLN) };
    if n < 1 {
        bail!(
            "sysconf(_SC_NPROCESSORS_ONLN) failed: {}",
            io::Error::last_os_error()
        );
    }
    Ok(n as usize)
}
