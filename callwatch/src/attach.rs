// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Gustavo Noronha Silva <gustavo@noronha.dev.br>

//! Taking and releasing ptrace control of a single process.

use log::{debug, trace, warn};
use nix::{
    errno::Errno,
    sys::{
        ptrace::{self, Options},
        signal::Signal,
        wait::{waitpid, WaitPidFlag, WaitStatus},
    },
    unistd::Pid,
};
use thiserror::Error;

use crate::{
    engine::Tracee,
    memory::{PtraceMemory, WordSource, WORD_SIZE},
    registers::RegisterSnapshot,
};

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum AttachError {
    #[error("permission denied tracing PID {pid}, make sure you are running with sudo")]
    PermissionDenied { pid: u32 },
    #[error("no such process: {pid}")]
    NoSuchProcess { pid: u32 },
    #[error("process {pid} did not stop after attaching")]
    UnexpectedState { pid: u32 },
    #[error("attaching to PID {pid} failed: {errno}")]
    Failed { pid: u32, errno: Errno },
}

impl AttachError {
    fn from_errno(pid: u32, errno: Errno) -> Self {
        match errno {
            Errno::EPERM | Errno::EACCES => AttachError::PermissionDenied { pid },
            Errno::ESRCH => AttachError::NoSuchProcess { pid },
            errno => AttachError::Failed { pid, errno },
        }
    }
}

/// Why `waitpid()` returned, reduced to what the trace loop cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stop {
    /// Syscall entry or exit; needs `PTRACE_O_TRACESYSGOOD`.
    SyscallBoundary,
    /// Signal-delivery stop. The signal is suppressed unless passed back on
    /// the next resume.
    Signal(Signal),
    /// `PTRACE_EVENT_*` stop.
    Event(i32),
    Exited(i32),
    Killed(Signal),
    /// Anything else: continued, group-stop noise, nothing to report.
    Other,
}

impl From<WaitStatus> for Stop {
    fn from(status: WaitStatus) -> Self {
        match status {
            WaitStatus::PtraceSyscall(_) => Stop::SyscallBoundary,
            WaitStatus::Stopped(_, signal) => Stop::Signal(signal),
            WaitStatus::PtraceEvent(_, _, event) => Stop::Event(event),
            WaitStatus::Exited(_, code) => Stop::Exited(code),
            WaitStatus::Signaled(_, signal, _) => Stop::Killed(signal),
            _ => Stop::Other,
        }
    }
}

/// A process we hold ptrace control over.
///
/// Dropping the handle detaches, so every path out of a trace session gives
/// the process back.
#[derive(Debug)]
pub struct AttachedHandle {
    pid: Pid,
    attached: bool,
    // The attach stop was some other signal, so our SIGSTOP is still queued
    // and must not reach the process.
    swallow_sigstop: bool,
    initial_signal: Option<Signal>,
}

/// Attaches to `pid` and waits for it to stop.
pub fn attach(pid: u32) -> Result<AttachedHandle, AttachError> {
    let raw = i32::try_from(pid)
        .ok()
        .filter(|&raw| raw > 0)
        .ok_or(AttachError::NoSuchProcess { pid })?;
    let target = Pid::from_raw(raw);

    ptrace::attach(target).map_err(|errno| AttachError::from_errno(pid, errno))?;

    let mut handle = AttachedHandle {
        pid: target,
        attached: true,
        swallow_sigstop: false,
        initial_signal: None,
    };

    match waitpid(target, Some(WaitPidFlag::__WALL)) {
        Ok(WaitStatus::Stopped(_, Signal::SIGSTOP)) => {
            trace!("PID {pid} stopped after attach");
        }
        Ok(WaitStatus::Stopped(_, signal)) => {
            debug!("PID {pid} stopped with {signal} instead of SIGSTOP after attach");
            handle.swallow_sigstop = true;
            handle.initial_signal = Some(signal);
        }
        Ok(status) => {
            warn!("PID {pid} reported {status:?} after attach, giving up");
            handle.detach(None);
            return Err(AttachError::UnexpectedState { pid });
        }
        Err(errno) => {
            handle.detach(None);
            return Err(AttachError::from_errno(pid, errno));
        }
    }

    let options = Options::PTRACE_O_TRACESYSGOOD | Options::PTRACE_O_TRACEEXEC;
    if let Err(errno) = ptrace::setoptions(target, options) {
        handle.detach(None);
        return Err(AttachError::from_errno(pid, errno));
    }

    debug!("Successfully attached to PID {pid}");

    Ok(handle)
}

impl AttachedHandle {
    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn is_attached(&self) -> bool {
        self.attached
    }

    /// Gives the process back, delivering `signal` if one is pending. Safe to
    /// call more than once; only the first call does anything.
    pub fn detach(&mut self, signal: Option<Signal>) {
        if !std::mem::replace(&mut self.attached, false) {
            return;
        }

        match ptrace::detach(self.pid, signal) {
            Ok(()) => debug!("Detached from PID {}", self.pid),
            // Already gone, or no longer stopped because it exited.
            Err(Errno::ESRCH) => debug!("PID {} went away before detach", self.pid),
            Err(errno) => warn!("Failed to detach from PID {}: {errno}", self.pid),
        }
    }

    /// Folds a wait status into a [`Stop`], tracking whether there is still
    /// anything to detach from.
    fn reduce(&mut self, status: WaitStatus) -> Stop {
        match Stop::from(status) {
            stop @ (Stop::Exited(_) | Stop::Killed(_)) => {
                self.attached = false;
                stop
            }
            Stop::Signal(Signal::SIGSTOP) if self.swallow_sigstop => {
                self.swallow_sigstop = false;
                Stop::Other
            }
            stop => stop,
        }
    }
}

impl Drop for AttachedHandle {
    fn drop(&mut self) {
        self.detach(None);
    }
}

impl WordSource for AttachedHandle {
    fn read_word(&self, address: u64) -> Result<[u8; WORD_SIZE], Errno> {
        PtraceMemory::new(self.pid).read_word(address)
    }
}

impl Tracee for AttachedHandle {
    fn pid(&self) -> u32 {
        self.pid.as_raw() as u32
    }

    fn initial_signal(&self) -> Option<Signal> {
        self.initial_signal
    }

    fn resume(&mut self, signal: Option<Signal>) -> nix::Result<()> {
        ptrace::syscall(self.pid, signal)
    }

    fn wait_stop(&mut self) -> nix::Result<Stop> {
        let status = waitpid(self.pid, Some(WaitPidFlag::__WALL))?;
        trace!("PID {}: {status:?}", self.pid);

        Ok(self.reduce(status))
    }

    fn registers(&self) -> nix::Result<RegisterSnapshot> {
        RegisterSnapshot::capture(self.pid)
    }

    fn detach(&mut self, signal: Option<Signal>) {
        AttachedHandle::detach(self, signal);
    }
}
