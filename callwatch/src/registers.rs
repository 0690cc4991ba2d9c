// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Gustavo Noronha Silva <gustavo@noronha.dev.br>

//! Calling-convention knowledge: which register carries the syscall number,
//! each argument and the return value. Nothing outside this module looks at
//! architecture register names.

use callwatch_common::SYSCALL_ARGS;
use nix::{sys::ptrace, unistd::Pid};

/// The architecture-independent view of the registers at one stop.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RegisterSnapshot {
    pub syscall_nr: i64,
    pub args: [u64; SYSCALL_ARGS],
    pub return_value: i64,
}

impl RegisterSnapshot {
    /// Reads the registers of a stopped tracee and maps them through the
    /// host's calling convention.
    pub fn capture(pid: Pid) -> nix::Result<Self> {
        let regs = ptrace::getregs(pid)?;
        Ok(HostConvention::snapshot(&regs))
    }
}

pub trait CallingConvention {
    type Registers;

    fn syscall_nr(regs: &Self::Registers) -> i64;

    /// Logical argument `index` (0-5). Out of range indexes read as 0.
    fn arg(regs: &Self::Registers, index: usize) -> u64;

    fn return_value(regs: &Self::Registers) -> i64;

    fn snapshot(regs: &Self::Registers) -> RegisterSnapshot {
        RegisterSnapshot {
            syscall_nr: Self::syscall_nr(regs),
            args: std::array::from_fn(|i| Self::arg(regs, i)),
            return_value: Self::return_value(regs),
        }
    }
}

#[cfg(target_arch = "x86_64")]
pub struct X86_64;

#[cfg(target_arch = "x86_64")]
impl CallingConvention for X86_64 {
    type Registers = libc::user_regs_struct;

    // rax is clobbered with -ENOSYS on entry, the kernel keeps the number
    // in orig_rax.
    fn syscall_nr(regs: &Self::Registers) -> i64 {
        regs.orig_rax as i64
    }

    fn arg(regs: &Self::Registers, index: usize) -> u64 {
        match index {
            0 => regs.rdi,
            1 => regs.rsi,
            2 => regs.rdx,
            3 => regs.r10,
            4 => regs.r8,
            5 => regs.r9,
            _ => 0,
        }
    }

    fn return_value(regs: &Self::Registers) -> i64 {
        regs.rax as i64
    }
}

#[cfg(target_arch = "aarch64")]
pub struct Aarch64;

#[cfg(target_arch = "aarch64")]
impl CallingConvention for Aarch64 {
    type Registers = libc::user_regs_struct;

    fn syscall_nr(regs: &Self::Registers) -> i64 {
        regs.regs[8] as i64
    }

    // x0 doubles as the return register, so argument 0 is only meaningful at
    // the entry stop.
    fn arg(regs: &Self::Registers, index: usize) -> u64 {
        if index < SYSCALL_ARGS {
            regs.regs[index]
        } else {
            0
        }
    }

    fn return_value(regs: &Self::Registers) -> i64 {
        regs.regs[0] as i64
    }
}

#[cfg(target_arch = "x86_64")]
pub type HostConvention = X86_64;

#[cfg(target_arch = "aarch64")]
pub type HostConvention = Aarch64;
