// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Gustavo Noronha Silva <gustavo@noronha.dev.br>

// Selects the syscall table for the architecture being compiled for. The build
// script runs on the host, so look at the target through Cargo's env rather
// than through our own cfg!(target_arch).
fn main() {
    println!("cargo::rustc-check-cfg=cfg(aarch64)");
    println!("cargo::rustc-check-cfg=cfg(x86_64)");
    println!("cargo::rerun-if-env-changed=CARGO_CFG_TARGET_ARCH");

    match std::env::var("CARGO_CFG_TARGET_ARCH").as_deref() {
        Ok("aarch64") => println!("cargo::rustc-cfg=aarch64"),
        Ok("x86_64") => println!("cargo::rustc-cfg=x86_64"),
        Ok(other) => panic!("Unsupported architecture {other}. We only support aarch64 and x86_64, for now."),
        Err(e) => panic!("CARGO_CFG_TARGET_ARCH not available: {e}"),
    }
}
