// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Gustavo Noronha Silva <gustavo@noronha.dev.br>

//! Reading strings out of the tracee's address space.

use nix::{errno::Errno, sys::ptrace, unistd::Pid};
use thiserror::Error;

/// Size of one `PTRACE_PEEKDATA` read.
pub const WORD_SIZE: usize = std::mem::size_of::<libc::c_long>();

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ReadError {
    #[error("cannot read target memory at {address:#x}: {errno}")]
    Unreadable { address: u64, errno: Errno },
}

/// Something we can read remote memory from, one machine word at a time.
pub trait WordSource {
    fn read_word(&self, address: u64) -> Result<[u8; WORD_SIZE], Errno>;
}

/// Word reads through `PTRACE_PEEKDATA`; only valid while the tracee is
/// attached and stopped.
#[derive(Debug, Clone, Copy)]
pub struct PtraceMemory {
    pid: Pid,
}

impl PtraceMemory {
    pub fn new(pid: Pid) -> Self {
        PtraceMemory { pid }
    }
}

impl WordSource for PtraceMemory {
    fn read_word(&self, address: u64) -> Result<[u8; WORD_SIZE], Errno> {
        let word = ptrace::read(self.pid, address as usize as ptrace::AddressType)?;
        Ok(word.to_ne_bytes())
    }
}

/// Reads a NUL-terminated string starting at `address`.
///
/// At most `max_len` bytes are collected; a string that is longer (or memory
/// that never contains a NUL) comes back truncated rather than being scanned
/// forever, so the number of reads is bounded by `max_len / WORD_SIZE + 1`.
/// Only word-aligned addresses are read, so a string that ends right before
/// an unmapped page is still readable. The first failed read abandons the
/// string. Invalid UTF-8 is replaced lossily.
pub fn read_c_string<S: WordSource + ?Sized>(
    source: &S,
    address: u64,
    max_len: usize,
) -> Result<String, ReadError> {
    let mut bytes = Vec::with_capacity(max_len.min(256));
    let mut skip = (address % WORD_SIZE as u64) as usize;
    let mut cursor = address - skip as u64;

    'words: while bytes.len() < max_len {
        let word = source
            .read_word(cursor)
            .map_err(|errno| ReadError::Unreadable {
                address: cursor,
                errno,
            })?;

        for &byte in &word[skip..] {
            if byte == 0 || bytes.len() == max_len {
                break 'words;
            }
            bytes.push(byte);
        }
        skip = 0;

        // Running off the end of the address space counts as a fault.
        cursor = cursor
            .checked_add(WORD_SIZE as u64)
            .ok_or(ReadError::Unreadable {
                address: cursor,
                errno: Errno::EFAULT,
            })?;
    }

    Ok(String::from_utf8_lossy(&bytes).into_owned())
}
