// Copyright (c) 2026 Meta Platforms, Inc. and affiliates.
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! Cluster states and the affinity effector.

use std::fmt;
use std::process::{Command, Stdio};

use log::warn;

/// Which clusters the workload may run on. An 8-core big.LITTLE layout is
/// assumed: CPUs 0-3 are the LITTLE cluster, CPUs 4-7 the big one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterState {
    Little,
    Big,
    Both,
}

impl ClusterState {
    /// Candidate enumeration order for the predictor. Equal estimates
    /// resolve to the later entry, so a full tie lands on `Both`.
    pub const CANDIDATES: [ClusterState; 3] =
        [ClusterState::Little, ClusterState::Big, ClusterState::Both];

    /// CPU list passed verbatim to the affinity utility.
    pub fn mask(&self) -> &'static str {
        match self {
            ClusterState::Little => "0-3",
            ClusterState::Big => "4-7",
            ClusterState::Both => "0-7",
        }
    }

    pub fn has_big(&self) -> bool {
        matches!(self, ClusterState::Big | ClusterState::Both)
    }

    pub fn has_little(&self) -> bool {
        matches!(self, ClusterState::Little | ClusterState::Both)
    }
}

impl fmt::Display for ClusterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ClusterState::Little => "LITTLE",
            ClusterState::Big => "big",
            ClusterState::Both => "big+LITTLE",
        };
        write!(f, "{name}")
    }
}

/// True when a decision warrants an affinity change: the workload must be
/// alive and the decision must differ from the committed state.
pub fn needs_apply(current: ClusterState, next: ClusterState, workload_alive: bool) -> bool {
    workload_alive && next != current
}

/// Re-pins `pid` (all threads) to the cluster's CPU list. Failure is
/// logged and swallowed; the caller commits the state regardless, so a
/// broken affinity utility does not retry every tick.
pub fn apply(state: ClusterState, pid: u32) {
    let mask = state.mask();
    match Command::new("taskset")
        .args(["-pac", mask, &pid.to_string()])
        .stdout(Stdio::null())
        .status()
    {
        Ok(status) if status.success() => {}
        Ok(status) => warn!("taskset -pac {mask} {pid} exited with {status}"),
        Err(e) => warn!("failed to run taskset: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_masks() {
        assert_eq!(ClusterState::Little.mask(), "0-3");
        assert_eq!(ClusterState::Big.mask(), "4-7");
        assert_eq!(ClusterState::Both.mask(), "0-7");
    }

    #[test]
    fn test_cluster_flags() {
        assert!(!ClusterState::Little.has_big());
        assert!(ClusterState::Little.has_little());
        assert!(ClusterState::Big.has_big());
        assert!(!ClusterState::Big.has_little());
        assert!(ClusterState::Both.has_big());
        assert!(ClusterState::Both.has_little());
    }

    #[test]
    fn test_needs_apply() {
        use ClusterState::*;
        // A repeated decision never re-issues the affinity call.
        assert!(!needs_apply(Big, Big, true));
        assert!(needs_apply(Both, Big, true));
        // No re-pinning once the workload is gone.
        assert!(!needs_apply(Both, Big, false));
        assert!(!needs_apply(Big, Big, false));
    }
}
