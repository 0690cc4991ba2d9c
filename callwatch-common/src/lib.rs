// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Gustavo Noronha Silva <gustavo@noronha.dev.br>

use std::{collections::BTreeMap, fmt};

pub mod catalog;
pub mod syscalls;

pub use catalog::{SyscallCatalog, SyscallCatalogEntry, UNKNOWN_SYSCALL_NAME};

/// Number of argument registers a syscall can use.
pub const SYSCALL_ARGS: usize = 6;

/// One completed syscall, produced when the tracer sees its exit stop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyscallEvent {
    /// Monotonic clock reading at the entry stop, in nanoseconds.
    pub start_ts: u64,
    /// Time between the entry and exit stops, in nanoseconds.
    pub duration: u64,
    pub syscall_nr: i64,
    pub syscall_name: &'static str,
    pub return_value: i64,
    pub pid: u32,
    pub process_name: String,
    /// Decoded string arguments by argument position. Positions that are not
    /// strings, or that could not be read, are absent.
    pub decoded_string_args: BTreeMap<usize, String>,
}

impl fmt::Display for SyscallEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}(", self.pid, self.syscall_name)?;

        for (i, (idx, value)) in self.decoded_string_args.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{idx}: {value:?}")?;
        }

        write!(f, ") = {} <{} ns>", self.return_value, self.duration)
    }
}
