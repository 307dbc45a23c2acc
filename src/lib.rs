// Copyright (c) 2026 Meta Platforms, Inc. and affiliates.
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

pub mod affinity;
pub mod clock;
pub mod hexfloat;
pub mod perf;
pub mod policy;
pub mod process;
pub mod supervisor;

use std::time::Duration;

/// Control loop period.
pub const TICK_PERIOD: Duration = Duration::from_millis(20);

#[cfg(all(feature = "collect", feature = "predictor"))]
compile_error!("features `collect` and `predictor` are mutually exclusive (use --no-default-features)");

#[cfg(all(feature = "collect", feature = "agent"))]
compile_error!("features `collect` and `agent` are mutually exclusive (use --no-default-features)");

#[cfg(all(feature = "predictor", feature = "agent"))]
compile_error!("features `predictor` and `agent` are mutually exclusive");

#[cfg(not(any(feature = "collect", feature = "predictor", feature = "agent")))]
compile_error!("select a scheduling mode feature: `collect`, `predictor` or `agent`");
