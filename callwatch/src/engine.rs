// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Gustavo Noronha Silva <gustavo@noronha.dev.br>

//! The trace session: a worker thread that attaches to one process, steps it
//! from syscall stop to syscall stop and turns each entry/exit pair into a
//! [`SyscallEvent`].

use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
};

use callwatch_common::{SyscallCatalog, SyscallEvent, SYSCALL_ARGS};
use log::{debug, trace, warn};
use nix::sys::signal::Signal;
use thiserror::Error;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

use crate::{
    attach::{attach, Stop},
    events::{self, EventSink, FinishReason, Finished, TraceMessage},
    memory::{read_c_string, WordSource},
    registers::RegisterSnapshot,
    util::{monotonic_ns, ProcComm, ProcessNames},
};

#[cfg(test)]
mod test;

/// Tunables for string decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceConfig {
    /// Longest string argument decoded, in bytes. Longer strings are
    /// truncated.
    pub max_string_len: usize,
    /// Pointer arguments at or below this address are never dereferenced.
    pub pointer_guard: u64,
}

impl Default for TraceConfig {
    fn default() -> Self {
        TraceConfig {
            max_string_len: 4096,
            pointer_guard: 0x1000,
        }
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("a trace session is already running")]
    SessionActive,
    #[error("failed to spawn tracer thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// A process under ptrace control, as seen by the trace loop.
pub trait Tracee: WordSource {
    fn pid(&self) -> u32;

    /// Signal to hand back on the very first resume.
    fn initial_signal(&self) -> Option<Signal> {
        None
    }

    /// Continues until the next syscall boundary, delivering `signal`.
    fn resume(&mut self, signal: Option<Signal>) -> nix::Result<()>;

    fn wait_stop(&mut self) -> nix::Result<Stop>;

    fn registers(&self) -> nix::Result<RegisterSnapshot>;

    /// Releases the process. Must tolerate being called when the process is
    /// already gone.
    fn detach(&mut self, signal: Option<Signal>);
}

/// Starts and stops trace sessions; at most one runs at a time.
pub struct TraceEngine {
    config: TraceConfig,
    names: Arc<dyn ProcessNames>,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl TraceEngine {
    pub fn new(config: TraceConfig) -> Self {
        TraceEngine {
            config,
            names: Arc::new(ProcComm),
            running: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    pub fn with_process_names(mut self, names: impl ProcessNames) -> Self {
        self.names = Arc::new(names);
        self
    }

    /// A channel whose sender can be handed to [`TraceEngine::start`].
    pub fn channel() -> (UnboundedSender<TraceMessage>, UnboundedReceiver<TraceMessage>) {
        events::channel()
    }

    /// Begins tracing `pid` on a new thread and returns right away.
    ///
    /// Attach failures are not returned here: they reach `sink` as the
    /// session's finish notification.
    pub fn start<S: EventSink>(&mut self, pid: u32, sink: S) -> Result<(), EngineError> {
        if self.is_active() {
            return Err(EngineError::SessionActive);
        }
        self.join();

        let running = Arc::new(AtomicBool::new(true));
        let session = TraceSession {
            target_pid: pid,
            running: running.clone(),
            config: self.config,
            names: self.names.clone(),
        };

        let worker = thread::Builder::new()
            .name(format!("callwatch-{pid}"))
            .spawn(move || session.run(sink))?;

        self.running = running;
        self.worker = Some(worker);

        Ok(())
    }

    /// Asks the session to end at its next stop. Does not wait; the sink gets
    /// its finish notification once the process has been let go.
    pub fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            debug!("Stop requested");
        }
    }

    pub fn is_active(&self) -> bool {
        self.worker
            .as_ref()
            .is_some_and(|worker| !worker.is_finished())
    }

    /// Waits for the current session's thread, if any, to finish.
    pub fn join(&mut self) {
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("Tracer thread panicked");
            }
        }
    }
}

impl Default for TraceEngine {
    fn default() -> Self {
        TraceEngine::new(TraceConfig::default())
    }
}

// The worker may be blocked in waitpid() for as long as the process sleeps,
// so dropping the engine only asks it to stop.
impl Drop for TraceEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

struct TraceSession {
    target_pid: u32,
    running: Arc<AtomicBool>,
    config: TraceConfig,
    names: Arc<dyn ProcessNames>,
}

impl TraceSession {
    fn run<S: EventSink>(self, mut sink: S) {
        let pid = self.target_pid;

        let mut handle = match attach(pid) {
            Ok(handle) => handle,
            Err(error) => {
                warn!("{error}");
                sink.on_finished(Finished::new(pid, FinishReason::AttachFailed(error)));
                return;
            }
        };

        debug!("Tracing {}", handle.pid());

        let process_name = self.names.process_name(pid);
        sink.on_attached(pid, &process_name);

        let mut tracer = Tracer::new(
            self.config,
            SyscallCatalog::global(),
            self.names.as_ref(),
            process_name,
            monotonic_ns,
        );
        let reason = tracer.run(&mut handle, &self.running, &mut sink);

        debug!("Trace session for {pid} finished: {reason:?}");
        sink.on_finished(Finished::new(pid, reason));
    }
}

/// What we keep from the entry stop until the matching exit stop.
#[derive(Debug, Clone, Copy)]
struct PendingSyscall {
    syscall_nr: i64,
    start_ts: u64,
    // Arguments must come from the entry stop: on aarch64 the return value
    // overwrites x0.
    args: [u64; SYSCALL_ARGS],
}

/// The entry/exit state machine, independent of how the process is driven.
pub(crate) struct Tracer<'a, C> {
    config: TraceConfig,
    catalog: &'static SyscallCatalog,
    names: &'a dyn ProcessNames,
    process_name: String,
    clock: C,
}

impl<'a, C: FnMut() -> u64> Tracer<'a, C> {
    pub(crate) fn new(
        config: TraceConfig,
        catalog: &'static SyscallCatalog,
        names: &'a dyn ProcessNames,
        process_name: String,
        clock: C,
    ) -> Self {
        Tracer {
            config,
            catalog,
            names,
            process_name,
            clock,
        }
    }

    /// Drives `tracee` until it goes away, something fails or `running` is
    /// cleared. The tracee has been released by the time this returns.
    pub(crate) fn run<T: Tracee, S: EventSink + ?Sized>(
        &mut self,
        tracee: &mut T,
        running: &AtomicBool,
        sink: &mut S,
    ) -> FinishReason {
        let mut pending: Option<PendingSyscall> = None;
        let mut signal = tracee.initial_signal();

        let reason = loop {
            if !running.load(Ordering::SeqCst) {
                break FinishReason::Requested;
            }

            if let Err(errno) = tracee.resume(signal.take()) {
                warn!("Failed to resume {}: {errno}", tracee.pid());
                break FinishReason::ControlFailed(errno);
            }

            let stop = match tracee.wait_stop() {
                Ok(stop) => stop,
                Err(errno) => {
                    warn!("Failed to wait for {}: {errno}", tracee.pid());
                    break FinishReason::ControlFailed(errno);
                }
            };

            match stop {
                Stop::SyscallBoundary => {}
                Stop::Signal(sig) => {
                    trace!("{} got {sig}, passing it on", tracee.pid());
                    signal = Some(sig);
                    continue;
                }
                Stop::Event(libc::PTRACE_EVENT_EXEC) => {
                    self.process_name = self.names.process_name(tracee.pid());
                    debug!("{} executed {}", tracee.pid(), self.process_name);
                    continue;
                }
                Stop::Event(_) | Stop::Other => continue,
                Stop::Exited(code) => break FinishReason::TargetExited(code),
                Stop::Killed(sig) => break FinishReason::TargetKilled(sig),
            }

            let regs = match tracee.registers() {
                Ok(regs) => regs,
                Err(errno) => {
                    warn!("Failed to read registers of {}: {errno}", tracee.pid());
                    break FinishReason::ControlFailed(errno);
                }
            };

            pending = match pending.take() {
                None => Some(PendingSyscall {
                    syscall_nr: regs.syscall_nr,
                    start_ts: (self.clock)(),
                    args: regs.args,
                }),
                Some(entry) => {
                    let end_ts = (self.clock)();
                    sink.on_event(self.complete(tracee, entry, &regs, end_ts));
                    None
                }
            };
        };

        tracee.detach(signal);

        reason
    }

    fn complete<T: Tracee>(
        &self,
        tracee: &T,
        entry: PendingSyscall,
        exit: &RegisterSnapshot,
        end_ts: u64,
    ) -> SyscallEvent {
        let syscall_name = self.catalog.lookup_name(entry.syscall_nr);
        let mut decoded_string_args = BTreeMap::new();

        for &index in self.catalog.string_arg_indices(entry.syscall_nr) {
            let address = entry.args[index];
            if address <= self.config.pointer_guard {
                continue;
            }

            match read_c_string(tracee, address, self.config.max_string_len) {
                Ok(value) => {
                    decoded_string_args.insert(index, value);
                }
                Err(error) => trace!("{syscall_name}: skipping argument {index}: {error}"),
            }
        }

        SyscallEvent {
            start_ts: entry.start_ts,
            duration: end_ts.saturating_sub(entry.start_ts),
            syscall_nr: entry.syscall_nr,
            syscall_name,
            return_value: exit.return_value,
            pid: tracee.pid(),
            process_name: self.process_name.clone(),
            decoded_string_args,
        }
    }
}
