// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Gustavo Noronha Silva <gustavo@noronha.dev.br>

use callwatch_common::SyscallEvent;
use log::trace;
use nix::{errno::Errno, sys::signal::Signal};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::attach::AttachError;

/// How a trace session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    /// `TraceEngine::stop()` was called.
    Requested,
    /// The traced process exited with the given status.
    TargetExited(i32),
    /// The traced process was killed by a signal.
    TargetKilled(Signal),
    AttachFailed(AttachError),
    /// Resuming, waiting for or reading the registers of the process failed.
    ControlFailed(Errno),
}

impl FinishReason {
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            FinishReason::AttachFailed(_) | FinishReason::ControlFailed(_)
        )
    }
}

/// The last thing a session reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finished {
    pub pid: u32,
    pub reason: FinishReason,
    pub message: String,
}

impl Finished {
    pub fn new(pid: u32, reason: FinishReason) -> Self {
        let message = match reason {
            FinishReason::Requested => "Tracer stopped.".to_string(),
            FinishReason::TargetExited(code) => {
                format!("Process {pid} exited with status {code}.")
            }
            FinishReason::TargetKilled(signal) => format!("Process {pid} killed by {signal}."),
            FinishReason::AttachFailed(error) => format!("Error: {error}"),
            FinishReason::ControlFailed(errno) => {
                format!("Error: lost control of process {pid}: {errno}")
            }
        };

        Finished {
            pid,
            reason,
            message,
        }
    }

    pub fn is_error(&self) -> bool {
        self.reason.is_error()
    }
}

/// Everything a session sends over a channel, in order: at most one
/// `Attached`, any number of `Event`s, exactly one `Finished`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceMessage {
    Attached { pid: u32, process_name: String },
    Event(SyscallEvent),
    Finished(Finished),
}

/// Receives the output of a trace session, on the tracer's thread.
pub trait EventSink: Send + 'static {
    fn on_attached(&mut self, _pid: u32, _process_name: &str) {}

    fn on_event(&mut self, event: SyscallEvent);

    /// Called exactly once per session, after which the sink is dropped.
    fn on_finished(&mut self, finished: Finished);
}

// A consumer that went away is not the tracer's problem; the session keeps
// going until it is stopped or the target exits.
impl EventSink for UnboundedSender<TraceMessage> {
    fn on_attached(&mut self, pid: u32, process_name: &str) {
        let message = TraceMessage::Attached {
            pid,
            process_name: process_name.to_string(),
        };
        if self.send(message).is_err() {
            trace!("Receiver dropped, not reporting attach to {pid}");
        }
    }

    fn on_event(&mut self, event: SyscallEvent) {
        if self.send(TraceMessage::Event(event)).is_err() {
            trace!("Receiver dropped, discarding event");
        }
    }

    fn on_finished(&mut self, finished: Finished) {
        if self.send(TraceMessage::Finished(finished)).is_err() {
            trace!("Receiver dropped, discarding finish notification");
        }
    }
}

/// Creates a channel suitable for `TraceEngine::start()`.
pub fn channel() -> (UnboundedSender<TraceMessage>, UnboundedReceiver<TraceMessage>) {
    mpsc::unbounded_channel()
}
