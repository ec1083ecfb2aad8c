// SPDX-License-Identifier: GPL-3.0-only

use std::process::Command;

fn main() {
    println!("cargo::rerun-if-changed=.git/HEAD");
    println!("cargo::rerun-if-changed=.git/refs/tags");
    println!("cargo::rerun-if-env-changed=LUMA_RELAY_VERSION");

    // Packaged builds pin the version from outside the git checkout
    let version = std::env::var("LUMA_RELAY_VERSION").unwrap_or_else(|_| git_version());

    println!("cargo::rustc-env=GIT_VERSION={}", version);
}

/// Crate version suffixed with the short commit hash when git is available.
///
/// "0.1.0" at a clean tag becomes "0.1.0-abcdef1"; outside a checkout the
/// plain crate version is used.
fn git_version() -> String {
    let base = std::env::var("CARGO_PKG_VERSION").unwrap_or_else(|_| "0.0.0".to_string());

    let hash = Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()
        .filter(|output| output.status.success())
        .map(|output| String::from_utf8_lossy(&output.stdout).trim().to_string());

    match hash {
        Some(hash) if !hash.is_empty() => format!("{}-{}", base, hash),
        _ => base,
    }
}
