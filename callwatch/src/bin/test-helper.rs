// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Gustavo Noronha Silva <gustavo@noronha.dev.br>

//! Workloads for the integration tests. Each one prints "ready" once it is
//! safe to attach, then waits for a line on stdin before doing the syscalls
//! the test looks for.

use std::{
    ffi::CString,
    io::{BufRead as _, Write as _},
    time::Duration,
};

use anyhow::bail;

fn ready() -> anyhow::Result<()> {
    let mut stdout = std::io::stdout();
    writeln!(stdout, "ready")?;
    stdout.flush()?;
    Ok(())
}

fn wait_for_go() -> anyhow::Result<()> {
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    Ok(())
}

/// One getpid(), then one openat() on `path`, then exit.
fn getpid_openat(path: &str) -> anyhow::Result<()> {
    let path = CString::new(path)?;

    ready()?;
    wait_for_go()?;

    unsafe {
        libc::syscall(libc::SYS_getpid);
        let fd = libc::openat(libc::AT_FDCWD, path.as_ptr(), libc::O_RDONLY);
        if fd >= 0 {
            libc::close(fd);
        }
    }

    Ok(())
}

/// openat() on `path` stored in the very last bytes of a mapping, with the
/// next page unmapped.
fn page_end_openat(path: &str) -> anyhow::Result<()> {
    let path = CString::new(path)?;
    let bytes = path.as_bytes_with_nul();
    let page = unsafe { libc::sysconf(libc::_SC_PAGESIZE) } as usize;

    let name = unsafe {
        let base = libc::mmap(
            std::ptr::null_mut(),
            page * 2,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
            -1,
            0,
        );
        if base == libc::MAP_FAILED {
            bail!("mmap failed: {}", std::io::Error::last_os_error());
        }
        if libc::munmap(base.cast::<u8>().add(page).cast(), page) != 0 {
            bail!("munmap failed: {}", std::io::Error::last_os_error());
        }

        let name = base.cast::<u8>().add(page - bytes.len());
        std::ptr::copy_nonoverlapping(bytes.as_ptr(), name, bytes.len());
        name
    };

    ready()?;
    wait_for_go()?;

    unsafe {
        let fd = libc::openat(libc::AT_FDCWD, name.cast(), libc::O_RDONLY);
        if fd >= 0 {
            libc::close(fd);
        }
    }

    Ok(())
}

/// Sleeps without making syscalls, until killed.
fn idle() -> anyhow::Result<()> {
    ready()?;

    loop {
        std::thread::sleep(Duration::from_secs(3600));
    }
}

/// Calls getpid() forever, until killed.
fn spin() -> anyhow::Result<()> {
    ready()?;

    loop {
        unsafe { libc::syscall(libc::SYS_getpid) };
        std::thread::sleep(Duration::from_millis(2));
    }
}

fn main() -> anyhow::Result<()> {
    let mut args = std::env::args();

    // Ignore the binary name
    let _ = args.next();

    match args.next().as_deref() {
        Some("getpid_openat") => {
            let Some(path) = args.next() else {
                bail!("getpid_openat needs a path");
            };
            getpid_openat(&path)
        }
        Some("page_end_openat") => {
            let Some(path) = args.next() else {
                bail!("page_end_openat needs a path");
            };
            page_end_openat(&path)
        }
        Some("spin") => spin(),
        Some("idle") => idle(),
        Some(name) => bail!("Unknown test name: {name}"),
        None => bail!("Need a test name as the first argument"),
    }
}
