// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Gustavo Noronha Silva <gustavo@noronha.dev.br>

//! Syscall numbers for the architecture we are built for.
//!
//! Each architecture module declares its table through `declare_syscalls!`,
//! which produces one `SYS_<name>` constant per entry, `ALL_SYSCALLS` and
//! `syscall_name_from_nr()`.

macro_rules! declare_syscalls {
    ($($name:ident = $nr:literal),* $(,)?) => {
        $(
            #[allow(non_upper_case_globals)]
            pub const $name: i64 = $nr;
        )*

        /// Every syscall number known for this architecture, in ascending order.
        pub const ALL_SYSCALLS: &[i64] = &[$($nr),*];

        /// Name of a syscall as the kernel spells it, without the `SYS_` prefix.
        pub fn syscall_name_from_nr(nr: i64) -> Option<&'static str> {
            match nr {
                $($nr => Some(&stringify!($name)[4..]),)*
                _ => None,
            }
        }
    };
}

#[cfg(aarch64)]
mod aarch64;
#[cfg(aarch64)]
pub use aarch64::*;

#[cfg(x86_64)]
mod x86_64;
#[cfg(x86_64)]
pub use x86_64::*;

#[cfg(not(any(aarch64, x86_64)))]
compile_error!("Unsupported architecture. Currently only aarch64 and x86_64 are supported.");

// Names people tend to type that the kernel spells differently.
const ALIASES: &[(&str, &str)] = &[
    ("sigaction", "rt_sigaction"),
    ("sigprocmask", "rt_sigprocmask"),
    ("sigreturn", "rt_sigreturn"),
    ("sigsuspend", "rt_sigsuspend"),
    ("pread", "pread64"),
    ("pwrite", "pwrite64"),
    ("prlimit", "prlimit64"),
    ("fstatat", "newfstatat"),
];

/// Reverse lookup of `syscall_name_from_nr()`, accepting the common aliases.
pub fn syscall_nr_from_name(name: &str) -> Option<i64> {
    let name = ALIASES
        .iter()
        .find(|(alias, _)| *alias == name)
        .map_or(name, |(_, real)| real);

    ALL_SYSCALLS
        .iter()
        .copied()
        .find(|&nr| syscall_name_from_nr(nr) == Some(name))
}
