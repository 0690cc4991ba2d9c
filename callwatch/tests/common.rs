// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Gustavo Noronha Silva <gustavo@noronha.dev.br>

#![allow(dead_code)]

use std::{
    io::{BufRead as _, BufReader, Write as _},
    process::{Child, ChildStdin, ChildStdout, Command, Stdio},
    time::Duration,
};

use assert_cmd::cargo::cargo_bin;
use callwatch::{AttachError, FinishReason, TraceMessage};
use tokio::sync::mpsc::UnboundedReceiver;

/// PID above the kernel's maximum, so nothing can ever have it.
pub const MISSING_PID: u32 = 4_194_400;

const MESSAGE_TIMEOUT: Duration = Duration::from_secs(10);

/// A running test-helper workload. Killed on drop.
pub struct Helper {
    child: Child,
    stdin: ChildStdin,
    _stdout: BufReader<ChildStdout>,
}

impl Helper {
    /// Starts `test-helper <args>` and waits for it to say it is ready.
    pub fn spawn(args: &[&str]) -> Self {
        let mut child = Command::new(cargo_bin("test-helper"))
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()
            .unwrap_or_else(|e| panic!("Failed to run test-helper: {e}"));

        let stdin = child.stdin.take().unwrap();
        let mut stdout = BufReader::new(child.stdout.take().unwrap());

        let mut line = String::new();
        stdout.read_line(&mut line).unwrap();
        assert_eq!(line, "ready\n", "test-helper did not start properly");

        Helper {
            child,
            stdin,
            _stdout: stdout,
        }
    }

    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    /// Lets the workload continue past its "ready" point.
    pub fn go(&mut self) {
        writeln!(self.stdin, "go").unwrap();
        self.stdin.flush().unwrap();
    }

    pub fn is_running(&mut self) -> bool {
        self.child.try_wait().unwrap().is_none()
    }
}

impl Drop for Helper {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

pub async fn next_message(rx: &mut UnboundedReceiver<TraceMessage>) -> TraceMessage {
    tokio::time::timeout(MESSAGE_TIMEOUT, rx.recv())
        .await
        .expect("timed out waiting for the tracer")
        .expect("tracer closed the channel without finishing")
}

/// Waits for the attach to succeed. Returns false, after logging why, if this
/// environment does not allow ptrace at all.
pub async fn wait_attached(rx: &mut UnboundedReceiver<TraceMessage>, pid: u32) -> bool {
    match next_message(rx).await {
        TraceMessage::Attached { pid: attached, .. } => {
            assert_eq!(attached, pid);
            true
        }
        TraceMessage::Finished(finished)
            if matches!(
                finished.reason,
                FinishReason::AttachFailed(AttachError::PermissionDenied { .. })
            ) =>
        {
            eprintln!("Skipping: {}", finished.message);
            false
        }
        other => panic!("Unexpected first message: {other:?}"),
    }
}
