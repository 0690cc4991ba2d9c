// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Gustavo Noronha Silva <gustavo@noronha.dev.br>

use std::{
    cell::Cell,
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use callwatch_common::{syscalls, SyscallCatalog, SyscallEvent, UNKNOWN_SYSCALL_NAME};
use nix::{errno::Errno, sys::signal::Signal};

use super::{TraceConfig, Tracee, Tracer};
use crate::{
    attach::Stop,
    events::{EventSink, FinishReason, Finished},
    memory::WORD_SIZE,
    registers::RegisterSnapshot,
    util::ProcessNames,
};

const PID: u32 = 4242;

/// One scripted `waitpid()` outcome; syscall stops carry the registers that
/// `registers()` will report for them.
enum Step {
    Boundary(RegisterSnapshot),
    Stop(Stop),
    WaitFails(Errno),
    RegistersFail,
    /// Clears the running flag from "inside" the wait, like a concurrent
    /// `TraceEngine::stop()` would.
    StopRequested(RegisterSnapshot),
    /// Same, but the stop is a signal-delivery stop.
    SignalThenStopRequested(Signal),
}

struct FakeTracee {
    script: VecDeque<Step>,
    current: Option<RegisterSnapshot>,
    registers_fail: bool,
    strings: HashMap<u64, Vec<u8>>,
    reads: Cell<usize>,
    running: Arc<AtomicBool>,
    resumes: Vec<Option<Signal>>,
    resume_error: Option<Errno>,
    initial_signal: Option<Signal>,
    detaches: Vec<Option<Signal>>,
}

impl FakeTracee {
    fn new(script: Vec<Step>) -> Self {
        FakeTracee {
            script: script.into(),
            current: None,
            registers_fail: false,
            strings: HashMap::new(),
            reads: Cell::new(0),
            running: Arc::new(AtomicBool::new(true)),
            resumes: vec![],
            resume_error: None,
            initial_signal: None,
            detaches: vec![],
        }
    }

    fn with_string(mut self, address: u64, value: &[u8]) -> Self {
        let mut bytes = value.to_vec();
        bytes.push(0);
        bytes.resize(bytes.len().next_multiple_of(WORD_SIZE), 0);
        self.strings.insert(address, bytes);
        self
    }
}

impl crate::memory::WordSource for FakeTracee {
    fn read_word(&self, address: u64) -> Result<[u8; WORD_SIZE], Errno> {
        self.reads.set(self.reads.get() + 1);

        for (&base, bytes) in &self.strings {
            let Some(offset) = address.checked_sub(base) else {
                continue;
            };
            if let Some(chunk) = bytes.get(offset as usize..offset as usize + WORD_SIZE) {
                let mut word = [0u8; WORD_SIZE];
                word.copy_from_slice(chunk);
                return Ok(word);
            }
        }

        Err(Errno::EIO)
    }
}

impl Tracee for FakeTracee {
    fn pid(&self) -> u32 {
        PID
    }

    fn initial_signal(&self) -> Option<Signal> {
        self.initial_signal
    }

    fn resume(&mut self, signal: Option<Signal>) -> nix::Result<()> {
        self.resumes.push(signal);
        match self.resume_error {
            Some(errno) => Err(errno),
            None => Ok(()),
        }
    }

    fn wait_stop(&mut self) -> nix::Result<Stop> {
        match self.script.pop_front().expect("script ran out") {
            Step::Boundary(regs) => {
                self.current = Some(regs);
                Ok(Stop::SyscallBoundary)
            }
            Step::StopRequested(regs) => {
                self.running.store(false, Ordering::SeqCst);
                self.current = Some(regs);
                Ok(Stop::SyscallBoundary)
            }
            Step::SignalThenStopRequested(signal) => {
                self.running.store(false, Ordering::SeqCst);
                Ok(Stop::Signal(signal))
            }
            Step::Stop(stop) => Ok(stop),
            Step::WaitFails(errno) => Err(errno),
            Step::RegistersFail => {
                self.registers_fail = true;
                Ok(Stop::SyscallBoundary)
            }
        }
    }

    fn registers(&self) -> nix::Result<RegisterSnapshot> {
        if self.registers_fail {
            return Err(Errno::ESRCH);
        }
        Ok(self.current.expect("registers read outside a syscall stop"))
    }

    fn detach(&mut self, signal: Option<Signal>) {
        self.detaches.push(signal);
    }
}

#[derive(Default)]
struct RecordingSink {
    events: Vec<SyscallEvent>,
    finished: Vec<Finished>,
}

impl EventSink for RecordingSink {
    fn on_event(&mut self, event: SyscallEvent) {
        self.events.push(event);
    }

    fn on_finished(&mut self, finished: Finished) {
        self.finished.push(finished);
    }
}

struct FixedName(&'static str);

impl ProcessNames for FixedName {
    fn process_name(&self, _pid: u32) -> String {
        self.0.to_string()
    }
}

fn entry(syscall_nr: i64, args: [u64; 6]) -> Step {
    Step::Boundary(RegisterSnapshot {
        syscall_nr,
        args,
        // What the kernel leaves in rax on entry.
        return_value: -(Errno::ENOSYS as i64),
    })
}

fn exit(syscall_nr: i64, return_value: i64) -> Step {
    Step::Boundary(RegisterSnapshot {
        syscall_nr,
        // Deliberately different from the entry arguments.
        args: [return_value as u64, 0, 0, 0, 0, 0],
        return_value,
    })
}

/// Runs the loop over `tracee`, with a clock that ticks through `ticks`.
fn run_with(
    tracee: &mut FakeTracee,
    config: TraceConfig,
    ticks: &[u64],
) -> (FinishReason, RecordingSink) {
    let mut ticks = ticks.to_vec().into_iter();
    let names = FixedName("after-exec");
    let mut tracer = Tracer::new(
        config,
        SyscallCatalog::global(),
        &names,
        "fake".to_string(),
        move || ticks.next().unwrap_or(0),
    );

    let mut sink = RecordingSink::default();
    let running = tracee.running.clone();
    let reason = tracer.run(tracee, &running, &mut sink);

    (reason, sink)
}

fn run(tracee: &mut FakeTracee) -> (FinishReason, RecordingSink) {
    run_with(tracee, TraceConfig::default(), &[100, 350, 400, 1000])
}

#[test]
fn single_syscall_until_exit() {
    let mut tracee = FakeTracee::new(vec![
        entry(syscalls::SYS_getpid, [0; 6]),
        exit(syscalls::SYS_getpid, PID as i64),
        Step::Stop(Stop::Exited(0)),
    ]);

    let (reason, sink) = run(&mut tracee);

    assert_eq!(reason, FinishReason::TargetExited(0));
    assert!(!reason.is_error());
    assert_eq!(
        sink.events,
        vec![SyscallEvent {
            start_ts: 100,
            duration: 250,
            syscall_nr: syscalls::SYS_getpid,
            syscall_name: "getpid",
            return_value: PID as i64,
            pid: PID,
            process_name: "fake".to_string(),
            decoded_string_args: Default::default(),
        }]
    );
    assert_eq!(tracee.resumes, vec![None, None, None]);
    assert_eq!(tracee.detaches, vec![None]);
    // The loop leaves the finish notification to its caller.
    assert!(sink.finished.is_empty());
}

#[test]
fn events_follow_boundary_pairs() {
    let mut tracee = FakeTracee::new(vec![
        entry(syscalls::SYS_getpid, [0; 6]),
        exit(syscalls::SYS_getpid, 1),
        entry(syscalls::SYS_getppid, [0; 6]),
        exit(syscalls::SYS_getppid, 2),
        entry(syscalls::SYS_getuid, [0; 6]),
        Step::Stop(Stop::Exited(0)),
    ]);

    let (_, sink) = run_with(
        &mut tracee,
        TraceConfig::default(),
        &[10, 20, 30, 40, 50, 60],
    );

    let summary: Vec<_> = sink
        .events
        .iter()
        .map(|e| (e.syscall_name, e.return_value, e.start_ts, e.duration))
        .collect();
    assert_eq!(summary, vec![("getpid", 1, 10, 10), ("getppid", 2, 30, 10)]);
}

#[test]
fn signals_are_passed_on_without_breaking_alternation() {
    let mut tracee = FakeTracee::new(vec![
        entry(syscalls::SYS_getpid, [0; 6]),
        Step::Stop(Stop::Signal(Signal::SIGCHLD)),
        exit(syscalls::SYS_getpid, 7),
        Step::Stop(Stop::Signal(Signal::SIGUSR1)),
        Step::Stop(Stop::Exited(0)),
    ]);

    let (reason, sink) = run(&mut tracee);

    assert_eq!(reason, FinishReason::TargetExited(0));
    assert_eq!(sink.events.len(), 1);
    assert_eq!(sink.events[0].syscall_name, "getpid");
    assert_eq!(sink.events[0].return_value, 7);
    assert_eq!(
        tracee.resumes,
        vec![
            None,
            None,
            Some(Signal::SIGCHLD),
            None,
            Some(Signal::SIGUSR1)
        ]
    );
}

#[test]
fn pending_signal_is_delivered_on_detach() {
    let mut tracee = FakeTracee::new(vec![
        entry(syscalls::SYS_getpid, [0; 6]),
        Step::SignalThenStopRequested(Signal::SIGTERM),
    ]);

    let (reason, sink) = run(&mut tracee);

    assert_eq!(reason, FinishReason::Requested);
    assert!(sink.events.is_empty());
    assert_eq!(tracee.resumes, vec![None, None]);
    assert_eq!(tracee.detaches, vec![Some(Signal::SIGTERM)]);
}

#[test]
fn initial_signal_goes_out_first() {
    let mut tracee = FakeTracee::new(vec![Step::Stop(Stop::Exited(0))]);
    tracee.initial_signal = Some(Signal::SIGCHLD);

    run(&mut tracee);

    assert_eq!(tracee.resumes, vec![Some(Signal::SIGCHLD)]);
}

#[test]
fn ptrace_events_do_not_toggle() {
    let mut tracee = FakeTracee::new(vec![
        entry(syscalls::SYS_execve, [0; 6]),
        Step::Stop(Stop::Event(libc::PTRACE_EVENT_EXEC)),
        Step::Stop(Stop::Other),
        exit(syscalls::SYS_execve, 0),
        Step::Stop(Stop::Exited(0)),
    ]);

    let (_, sink) = run(&mut tracee);

    assert_eq!(sink.events.len(), 1);
    assert_eq!(sink.events[0].syscall_name, "execve");
    assert_eq!(sink.events[0].return_value, 0);
    assert_eq!(sink.events[0].process_name, "after-exec");
}

#[test]
fn string_arguments_are_decoded_from_entry_registers() {
    let mut tracee = FakeTracee::new(vec![
        entry(
            syscalls::SYS_openat,
            [(-100i64) as u64, 0x7000_0000, 0, 0, 0, 0],
        ),
        exit(syscalls::SYS_openat, 3),
        Step::Stop(Stop::Exited(0)),
    ])
    .with_string(0x7000_0000, b"/etc/passwd");

    let (_, sink) = run(&mut tracee);

    let event = &sink.events[0];
    assert_eq!(event.syscall_name, "openat");
    assert_eq!(event.return_value, 3);
    assert_eq!(
        event.decoded_string_args.get(&1).map(String::as_str),
        Some("/etc/passwd")
    );
    assert_eq!(event.decoded_string_args.len(), 1);
}

#[test]
fn strings_are_truncated_to_the_limit() {
    let mut tracee = FakeTracee::new(vec![
        entry(syscalls::SYS_unlinkat, [0, 0x7000_0000, 0, 0, 0, 0]),
        exit(syscalls::SYS_unlinkat, 0),
        Step::Stop(Stop::Exited(0)),
    ])
    .with_string(0x7000_0000, b"/tmp/some-long-file-name");

    let config = TraceConfig {
        max_string_len: 4,
        ..Default::default()
    };
    let (_, sink) = run_with(&mut tracee, config, &[1, 2]);

    assert_eq!(sink.events[0].decoded_string_args[&1], "/tmp");
}

#[test]
fn small_pointers_are_not_dereferenced() {
    let mut tracee = FakeTracee::new(vec![
        entry(syscalls::SYS_openat, [0, 0x10, 0, 0, 0, 0]),
        exit(syscalls::SYS_openat, -(Errno::EFAULT as i64)),
        entry(syscalls::SYS_openat, [0, 0x1000, 0, 0, 0, 0]),
        exit(syscalls::SYS_openat, -(Errno::EFAULT as i64)),
        Step::Stop(Stop::Exited(0)),
    ]);

    let (_, sink) = run(&mut tracee);

    assert_eq!(sink.events.len(), 2);
    assert!(sink.events.iter().all(|e| e.decoded_string_args.is_empty()));
    assert_eq!(tracee.reads.get(), 0);
}

#[test]
fn unreadable_strings_are_left_out() {
    let mut tracee = FakeTracee::new(vec![
        entry(syscalls::SYS_openat, [0, 0x9000_0000, 0, 0, 0, 0]),
        exit(syscalls::SYS_openat, -(Errno::EFAULT as i64)),
        Step::Stop(Stop::Exited(0)),
    ]);

    let (_, sink) = run(&mut tracee);

    assert_eq!(sink.events.len(), 1);
    assert!(sink.events[0].decoded_string_args.is_empty());
    assert_eq!(sink.events[0].return_value, -(Errno::EFAULT as i64));
}

#[test]
fn unknown_syscalls_are_still_reported() {
    let mut tracee = FakeTracee::new(vec![
        entry(9999, [0x7000_0000; 6]),
        exit(9999, -(Errno::ENOSYS as i64)),
        Step::Stop(Stop::Exited(0)),
    ])
    .with_string(0x7000_0000, b"ignored");

    let (_, sink) = run(&mut tracee);

    assert_eq!(sink.events[0].syscall_nr, 9999);
    assert_eq!(sink.events[0].syscall_name, UNKNOWN_SYSCALL_NAME);
    assert!(sink.events[0].decoded_string_args.is_empty());
    assert_eq!(tracee.reads.get(), 0);
}

#[test]
fn backwards_clock_gives_zero_duration() {
    let mut tracee = FakeTracee::new(vec![
        entry(syscalls::SYS_getpid, [0; 6]),
        exit(syscalls::SYS_getpid, 1),
        Step::Stop(Stop::Exited(0)),
    ]);

    let (_, sink) = run_with(&mut tracee, TraceConfig::default(), &[500, 100]);

    assert_eq!(sink.events[0].start_ts, 500);
    assert_eq!(sink.events[0].duration, 0);
}

#[test]
fn stop_request_ends_at_next_stop() {
    let mut tracee = FakeTracee::new(vec![
        entry(syscalls::SYS_getpid, [0; 6]),
        Step::StopRequested(RegisterSnapshot {
            syscall_nr: syscalls::SYS_getpid,
            args: [0; 6],
            return_value: 1,
        }),
        entry(syscalls::SYS_getpid, [0; 6]),
    ]);

    let (reason, sink) = run(&mut tracee);

    assert_eq!(reason, FinishReason::Requested);
    assert!(!reason.is_error());
    // The exit that was already being waited for still completes its event.
    assert_eq!(sink.events.len(), 1);
    assert_eq!(tracee.resumes.len(), 2);
    assert_eq!(tracee.script.len(), 1);
    assert_eq!(tracee.detaches, vec![None]);
}

#[test]
fn stop_before_first_resume() {
    let mut tracee = FakeTracee::new(vec![]);
    tracee.running.store(false, Ordering::SeqCst);

    let (reason, sink) = run(&mut tracee);

    assert_eq!(reason, FinishReason::Requested);
    assert!(sink.events.is_empty());
    assert!(tracee.resumes.is_empty());
    assert_eq!(tracee.detaches, vec![None]);
}

#[test]
fn target_killed() {
    let mut tracee = FakeTracee::new(vec![
        entry(syscalls::SYS_getpid, [0; 6]),
        Step::Stop(Stop::Killed(Signal::SIGKILL)),
    ]);

    let (reason, sink) = run(&mut tracee);

    assert_eq!(reason, FinishReason::TargetKilled(Signal::SIGKILL));
    assert!(!reason.is_error());
    assert!(sink.events.is_empty());
}

#[test]
fn wait_failure_is_an_error() {
    let mut tracee = FakeTracee::new(vec![Step::WaitFails(Errno::ECHILD)]);

    let (reason, sink) = run(&mut tracee);

    assert_eq!(reason, FinishReason::ControlFailed(Errno::ECHILD));
    assert!(reason.is_error());
    assert!(sink.events.is_empty());
    assert_eq!(tracee.detaches, vec![None]);
}

#[test]
fn resume_failure_is_an_error() {
    let mut tracee = FakeTracee::new(vec![]);
    tracee.resume_error = Some(Errno::ESRCH);

    let (reason, _) = run(&mut tracee);

    assert_eq!(reason, FinishReason::ControlFailed(Errno::ESRCH));
    assert_eq!(tracee.detaches, vec![None]);
}

#[test]
fn register_failure_is_an_error() {
    let mut tracee = FakeTracee::new(vec![Step::RegistersFail]);

    let (reason, sink) = run(&mut tracee);

    assert_eq!(reason, FinishReason::ControlFailed(Errno::ESRCH));
    assert!(sink.events.is_empty());
}

#[test]
fn default_config() {
    let config = TraceConfig::default();
    assert_eq!(config.max_string_len, 4096);
    assert_eq!(config.pointer_guard, 0x1000);
}
