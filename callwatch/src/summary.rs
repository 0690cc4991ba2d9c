// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Gustavo Noronha Silva <gustavo@noronha.dev.br>

use std::{collections::HashMap, fmt};

use callwatch::SyscallEvent;

// Negative return values in this range are errno codes.
const MAX_ERRNO: i64 = 4095;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SyscallStats {
    pub calls: u64,
    pub errors: u64,
    pub total_ns: u64,
}

/// Per-syscall counts and time, as printed by `--summary`.
#[derive(Debug, Default)]
pub struct Summary {
    stats: HashMap<&'static str, SyscallStats>,
}

impl Summary {
    pub fn record(&mut self, event: &SyscallEvent) {
        let stats = self.stats.entry(event.syscall_name).or_default();
        stats.calls += 1;
        stats.total_ns = stats.total_ns.saturating_add(event.duration);
        if (-MAX_ERRNO..0).contains(&event.return_value) {
            stats.errors += 1;
        }
    }

    /// Rows sorted by call count, busiest first; ties by name.
    pub fn rows(&self) -> Vec<(&'static str, SyscallStats)> {
        let mut rows: Vec<_> = self.stats.iter().map(|(&n, &s)| (n, s)).collect();
        rows.sort_by(|a, b| b.1.calls.cmp(&a.1.calls).then(a.0.cmp(b.0)));
        rows
    }

    pub fn is_empty(&self) -> bool {
        self.stats.is_empty()
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:<20} {:>8} {:>8} {:>14}",
            "syscall", "calls", "errors", "total ns"
        )?;

        let mut totals = SyscallStats::default();
        for (name, stats) in self.rows() {
            writeln!(
                f,
                "{name:<20} {:>8} {:>8} {:>14}",
                stats.calls, stats.errors, stats.total_ns
            )?;
            totals.calls += stats.calls;
            totals.errors += stats.errors;
            totals.total_ns = totals.total_ns.saturating_add(stats.total_ns);
        }

        writeln!(
            f,
            "{:<20} {:>8} {:>8} {:>14}",
            "total", totals.calls, totals.errors, totals.total_ns
        )
    }
}
