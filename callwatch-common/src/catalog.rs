// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Gustavo Noronha Silva <gustavo@noronha.dev.br>

//! Number to name/signature lookup for the syscalls of the host architecture.
//!
//! The catalog is built once, the first time it is used, out of the static
//! tables in [`crate::syscalls`] and [`SIGNATURES`]. It is never mutated
//! afterwards, so the `&'static` returned by [`SyscallCatalog::global`] can be
//! shared freely between threads.

use std::{collections::HashMap, sync::LazyLock};

use crate::syscalls::{syscall_name_from_nr, syscall_nr_from_name, ALL_SYSCALLS};

/// Name reported for numbers the catalog does not know about.
pub const UNKNOWN_SYSCALL_NAME: &str = "unknown";

/// Prototype and string-typed argument positions, keyed by syscall name so the
/// same table serves every architecture; names that do not exist on the
/// current one are simply never looked up.
const SIGNATURES: &[(&str, &str, &[usize])] = &[
    ("open", "open(const char *pathname, int flags, mode_t mode)", &[0]),
    ("openat", "openat(int dirfd, const char *pathname, int flags, mode_t mode)", &[1]),
    ("openat2", "openat2(int dirfd, const char *pathname, struct open_how *how, size_t size)", &[1]),
    ("creat", "creat(const char *pathname, mode_t mode)", &[0]),
    ("access", "access(const char *pathname, int mode)", &[0]),
    ("faccessat", "faccessat(int dirfd, const char *pathname, int mode)", &[1]),
    ("faccessat2", "faccessat2(int dirfd, const char *pathname, int mode, int flags)", &[1]),
    ("execve", "execve(const char *filename, char *const argv[], char *const envp[])", &[0]),
    (
        "execveat",
        "execveat(int dirfd, const char *pathname, char *const argv[], char *const envp[], int flags)",
        &[1],
    ),
    ("stat", "stat(const char *pathname, struct stat *statbuf)", &[0]),
    ("lstat", "lstat(const char *pathname, struct stat *statbuf)", &[0]),
    ("newfstatat", "newfstatat(int dirfd, const char *pathname, struct stat *statbuf, int flags)", &[1]),
    (
        "statx",
        "statx(int dirfd, const char *pathname, int flags, unsigned int mask, struct statx *statxbuf)",
        &[1],
    ),
    ("statfs", "statfs(const char *path, struct statfs *buf)", &[0]),
    ("truncate", "truncate(const char *path, off_t length)", &[0]),
    ("chdir", "chdir(const char *path)", &[0]),
    ("chroot", "chroot(const char *path)", &[0]),
    ("mkdir", "mkdir(const char *pathname, mode_t mode)", &[0]),
    ("mkdirat", "mkdirat(int dirfd, const char *pathname, mode_t mode)", &[1]),
    ("rmdir", "rmdir(const char *pathname)", &[0]),
    ("unlink", "unlink(const char *pathname)", &[0]),
    ("unlinkat", "unlinkat(int dirfd, const char *pathname, int flags)", &[1]),
    ("rename", "rename(const char *oldpath, const char *newpath)", &[0, 1]),
    (
        "renameat",
        "renameat(int olddirfd, const char *oldpath, int newdirfd, const char *newpath)",
        &[1, 3],
    ),
    (
        "renameat2",
        "renameat2(int olddirfd, const char *oldpath, int newdirfd, const char *newpath, unsigned int flags)",
        &[1, 3],
    ),
    ("link", "link(const char *oldpath, const char *newpath)", &[0, 1]),
    (
        "linkat",
        "linkat(int olddirfd, const char *oldpath, int newdirfd, const char *newpath, int flags)",
        &[1, 3],
    ),
    ("symlink", "symlink(const char *target, const char *linkpath)", &[0, 1]),
    ("symlinkat", "symlinkat(const char *target, int newdirfd, const char *linkpath)", &[0, 2]),
    ("readlink", "readlink(const char *pathname, char *buf, size_t bufsiz)", &[0]),
    ("readlinkat", "readlinkat(int dirfd, const char *pathname, char *buf, size_t bufsiz)", &[1]),
    ("chmod", "chmod(const char *pathname, mode_t mode)", &[0]),
    ("fchmodat", "fchmodat(int dirfd, const char *pathname, mode_t mode, int flags)", &[1]),
    ("fchmodat2", "fchmodat2(int dirfd, const char *pathname, mode_t mode, int flags)", &[1]),
    ("chown", "chown(const char *pathname, uid_t owner, gid_t group)", &[0]),
    ("lchown", "lchown(const char *pathname, uid_t owner, gid_t group)", &[0]),
    (
        "fchownat",
        "fchownat(int dirfd, const char *pathname, uid_t owner, gid_t group, int flags)",
        &[1],
    ),
    ("mknod", "mknod(const char *pathname, mode_t mode, dev_t dev)", &[0]),
    ("mknodat", "mknodat(int dirfd, const char *pathname, mode_t mode, dev_t dev)", &[1]),
    (
        "utimensat",
        "utimensat(int dirfd, const char *pathname, const struct timespec times[2], int flags)",
        &[1],
    ),
    (
        "mount",
        "mount(const char *source, const char *target, const char *filesystemtype, unsigned long mountflags, const void *data)",
        &[0, 1, 2],
    ),
    ("umount2", "umount2(const char *target, int flags)", &[0]),
    ("pivot_root", "pivot_root(const char *new_root, const char *put_old)", &[0, 1]),
    ("swapon", "swapon(const char *path, int swapflags)", &[0]),
    ("swapoff", "swapoff(const char *path)", &[0]),
    ("acct", "acct(const char *filename)", &[0]),
    (
        "setxattr",
        "setxattr(const char *path, const char *name, const void *value, size_t size, int flags)",
        &[0, 1],
    ),
    (
        "lsetxattr",
        "lsetxattr(const char *path, const char *name, const void *value, size_t size, int flags)",
        &[0, 1],
    ),
    (
        "getxattr",
        "getxattr(const char *path, const char *name, void *value, size_t size)",
        &[0, 1],
    ),
    (
        "lgetxattr",
        "lgetxattr(const char *path, const char *name, void *value, size_t size)",
        &[0, 1],
    ),
    ("listxattr", "listxattr(const char *path, char *list, size_t size)", &[0]),
    ("llistxattr", "llistxattr(const char *path, char *list, size_t size)", &[0]),
    ("removexattr", "removexattr(const char *path, const char *name)", &[0, 1]),
    ("lremovexattr", "lremovexattr(const char *path, const char *name)", &[0, 1]),
    ("inotify_add_watch", "inotify_add_watch(int fd, const char *pathname, uint32_t mask)", &[1]),
    ("memfd_create", "memfd_create(const char *name, unsigned int flags)", &[0]),
    // Known prototypes without string arguments, handy for consumers that
    // want to show them.
    ("read", "read(int fd, void *buf, size_t count)", &[]),
    ("write", "write(int fd, const void *buf, size_t count)", &[]),
    ("close", "close(int fd)", &[]),
    ("getpid", "getpid(void)", &[]),
];

/// One row of the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyscallCatalogEntry {
    pub number: i64,
    pub name: &'static str,
    pub signature: Option<&'static str>,
    pub string_arg_indices: &'static [usize],
}

#[derive(Debug)]
pub struct SyscallCatalog {
    entries: HashMap<i64, SyscallCatalogEntry>,
}

static CATALOG: LazyLock<SyscallCatalog> = LazyLock::new(SyscallCatalog::build);

impl SyscallCatalog {
    /// The process-wide catalog.
    pub fn global() -> &'static SyscallCatalog {
        &CATALOG
    }

    fn build() -> Self {
        let mut entries: HashMap<i64, SyscallCatalogEntry> = ALL_SYSCALLS
            .iter()
            .filter_map(|&number| {
                let name = syscall_name_from_nr(number)?;
                Some((
                    number,
                    SyscallCatalogEntry {
                        number,
                        name,
                        signature: None,
                        string_arg_indices: &[],
                    },
                ))
            })
            .collect();

        for &(name, signature, string_args) in SIGNATURES {
            let Some(number) = syscall_nr_from_name(name) else {
                continue;
            };

            if let Some(entry) = entries.get_mut(&number) {
                entry.signature = Some(signature);
                entry.string_arg_indices = string_args;
            }
        }

        SyscallCatalog { entries }
    }

    pub fn entry(&self, number: i64) -> Option<&SyscallCatalogEntry> {
        self.entries.get(&number)
    }

    /// Never fails: numbers missing from the table map to [`UNKNOWN_SYSCALL_NAME`].
    pub fn lookup_name(&self, number: i64) -> &'static str {
        self.entry(number)
            .map_or(UNKNOWN_SYSCALL_NAME, |entry| entry.name)
    }

    pub fn lookup_signature(&self, number: i64) -> Option<&'static str> {
        self.entry(number).and_then(|entry| entry.signature)
    }

    /// Argument positions that hold a pointer to a NUL-terminated string.
    pub fn string_arg_indices(&self, number: i64) -> &'static [usize] {
        self.entry(number)
            .map(|entry| entry.string_arg_indices)
            .unwrap_or_default()
    }

    pub fn number_from_name(&self, name: &str) -> Option<i64> {
        syscall_nr_from_name(name).filter(|nr| self.entries.contains_key(nr))
    }
}
