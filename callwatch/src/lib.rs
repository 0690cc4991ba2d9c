// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Gustavo Noronha Silva <gustavo@noronha.dev.br>

//! Syscall tracing for an already running process, built on ptrace.
//!
//! [`TraceEngine::start`] attaches to a PID on a dedicated thread and reports
//! one [`SyscallEvent`] per completed syscall to an [`EventSink`], followed by
//! exactly one [`Finished`] notification.

pub mod attach;
pub mod engine;
pub mod events;
pub mod memory;
pub mod registers;
pub mod util;

pub use attach::AttachError;
pub use callwatch_common::{syscalls, SyscallCatalog, SyscallEvent};
pub use engine::{EngineError, TraceConfig, TraceEngine};
pub use events::{channel, EventSink, FinishReason, Finished, TraceMessage};
pub use memory::ReadError;
