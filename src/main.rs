// Copyright (c) 2026 Meta Platforms, Inc. and affiliates.
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;

use asymsched::policy::Mode;
use asymsched::supervisor::Supervisor;

/// supervisor: a userspace cluster scheduler for asymmetric multi-core
/// CPUs.
///
/// Runs the given workload under supervision, samples hardware counters
/// and CPU usage on a 20 ms tick, and re-pins the workload to the LITTLE
/// cluster, the big cluster or both, as directed by the scheduling policy
/// this binary was built with (collect, predictor or agent).
#[derive(Debug, Parser)]
#[clap(name = "supervisor")]
struct Opts {
    /// Enable verbose output. Specify multiple times for more detail.
    #[clap(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Workload command and arguments.
    #[clap(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
    workload: Vec<String>,
}

fn main() -> Result<()> {
    let opts = match Opts::try_parse() {
        Ok(opts) => opts,
        Err(err)
            if matches!(
                err.kind(),
                clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion
            ) =>
        {
            err.exit()
        }
        Err(err) => {
            // Missing workload command: usage on stderr, exit code 1.
            let _ = err.print();
            std::process::exit(1);
        }
    };

    let llv = match opts.verbose {
        0 => simplelog::LevelFilter::Info,
        1 => simplelog::LevelFilter::Debug,
        _ => simplelog::LevelFilter::Trace,
    };
    let mut lcfg = simplelog::ConfigBuilder::new();
    lcfg.set_time_level(simplelog::LevelFilter::Error)
        .set_location_level(simplelog::LevelFilter::Off)
        .set_target_level(simplelog::LevelFilter::Off)
        .set_thread_level(simplelog::LevelFilter::Off);
    simplelog::TermLogger::init(
        llv,
        lcfg.build(),
        simplelog::TerminalMode::Stderr,
        simplelog::ColorChoice::Auto,
    )?;

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();
    ctrlc::set_handler(move || {
        shutdown_clone.store(true, Ordering::Relaxed);
    })
    .context("Error setting Ctrl-C handler")?;

    let mode = Mode::active();
    info!("scheduling mode {:?}", mode);

    let mut supervisor = Supervisor::init(mode, &opts.workload, Path::new("."))?;
    let result = supervisor.run(&shutdown);
    supervisor.shutdown();
    result
}
