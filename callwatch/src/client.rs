// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Gustavo Noronha Silva <gustavo@noronha.dev.br>

use std::collections::HashSet;

use anyhow::Result;
use callwatch::{channel, SyscallCatalog, TraceConfig, TraceEngine, TraceMessage};
use clap::Parser;
use log::debug;
use tokio::{
    io::AsyncWriteExt as _,
    signal::unix::{signal, SignalKind},
};

use crate::summary::Summary;

mod summary;

fn parse_syscall_names(names: &[String]) -> Result<HashSet<i64>, String> {
    let catalog = SyscallCatalog::global();
    names
        .iter()
        .map(|name| {
            catalog
                .number_from_name(name)
                .ok_or_else(|| format!("Unknown syscall name: {name}"))
        })
        .collect()
}

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// PID to trace
    #[arg(short = 'p', long = "pid")]
    pid: u32,

    /// Syscall(s) to show (can be repeated or comma-separated). Supports aliases like 'sigaction' for 'rt_sigaction'.
    #[arg(short = 'e', long = "event", value_delimiter = ',', action = clap::ArgAction::Append)]
    syscalls: Vec<String>,

    /// Longest string argument to decode, in bytes
    #[arg(long = "string-limit", env = "CALLWATCH_STRING_LIMIT", default_value_t = TraceConfig::default().max_string_len)]
    string_limit: usize,

    /// Print per-syscall counts and time when tracing ends
    #[arg(short = 'c', long = "summary")]
    summary: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let args = Args::parse();
    let filter = match parse_syscall_names(&args.syscalls) {
        Ok(v) => v,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };

    let config = TraceConfig {
        max_string_len: args.string_limit,
        ..Default::default()
    };
    let mut engine = TraceEngine::new(config);

    // Registered before attaching so an early interrupt is not lost.
    let mut interrupts = signal(SignalKind::interrupt())?;
    let mut stopping = false;

    let (tx, mut rx) = channel();
    engine.start(args.pid, tx)?;

    let mut summary = args.summary.then(Summary::default);
    let mut stdout = tokio::io::BufWriter::new(tokio::io::stdout());

    let finished = loop {
        tokio::select! {
            Some(()) = interrupts.recv() => {
                if stopping {
                    // The tracer may sit in waitpid() on an idle process for
                    // as long as it stays idle. Exiting detaches it.
                    eprintln!("Interrupted again, exiting without waiting for the tracer");
                    stdout.flush().await?;
                    std::process::exit(130);
                }
                debug!("Interrupted, stopping trace");
                eprintln!("Stopping, press Ctrl-C again to quit immediately");
                stopping = true;
                engine.stop();
            }
            message = rx.recv() => match message {
                Some(TraceMessage::Attached { pid, process_name }) => {
                    eprintln!("Tracing {pid} ({process_name})...");
                }
                Some(TraceMessage::Event(event)) => {
                    if !filter.is_empty() && !filter.contains(&event.syscall_nr) {
                        continue;
                    }
                    if let Some(summary) = summary.as_mut() {
                        summary.record(&event);
                    } else {
                        stdout.write_all(format!("{event}\n").as_bytes()).await?;
                        stdout.flush().await?;
                    }
                }
                Some(TraceMessage::Finished(finished)) => break Some(finished),
                None => break None,
            }
        }
    };

    engine.join();

    if let Some(summary) = summary.filter(|summary| !summary.is_empty()) {
        stdout.write_all(summary.to_string().as_bytes()).await?;
    }
    stdout.flush().await?;

    match finished {
        Some(finished) if finished.is_error() => {
            eprintln!("{}", finished.message);
            std::process::exit(1);
        }
        Some(finished) => eprintln!("{}", finished.message),
        None => anyhow::bail!("Tracer went away without reporting why"),
    }

    Ok(())
}
