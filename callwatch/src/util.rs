// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Gustavo Noronha Silva <gustavo@noronha.dev.br>

use log::warn;
use nix::time::{clock_gettime, ClockId};

/// Nanoseconds on the monotonic clock.
pub fn monotonic_ns() -> u64 {
    match clock_gettime(ClockId::CLOCK_MONOTONIC) {
        Ok(ts) => (ts.tv_sec() as u64)
            .saturating_mul(1_000_000_000)
            .saturating_add(ts.tv_nsec() as u64),
        Err(errno) => {
            warn!("clock_gettime(CLOCK_MONOTONIC) failed: {errno}");
            0
        }
    }
}

/// Resolves a PID to a short human-readable process name.
pub trait ProcessNames: Send + Sync + 'static {
    fn process_name(&self, pid: u32) -> String;
}

/// Reads `/proc/<pid>/comm`; empty if the process is gone.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcComm;

impl ProcessNames for ProcComm {
    fn process_name(&self, pid: u32) -> String {
        std::fs::read_to_string(format!("/proc/{pid}/comm"))
            .map(|comm| comm.trim_end_matches('\n').to_string())
            .unwrap_or_default()
    }
}
