// SPDX-License-Identifier: GPL-3.0-only

use std::process::Command;

fn main() {
    // Re-run build script if git HEAD changes
    println!("cargo::rerun-if-changed=.git/HEAD");
    println!("cargo::rerun-if-changed=.git/refs/tags");
    println!("cargo::rerun-if-env-changed=GRID_AGGREGATOR_VERSION");

    // Packagers can pin the version explicitly
    let version = if let Ok(v) = std::env::var("GRID_AGGREGATOR_VERSION") {
        v
    } else {
        describe_version()
    };

    println!("cargo::rustc-env=GIT_VERSION={}", version);
}

/// Version string derived from `git describe`.
///
/// - "0.1.0" at a tag becomes "0.1.0-abcdef1"
/// - "0.1.0-5-gabcdef1" becomes "0.1.0-dirty-abcdef1"
/// - no git at all falls back to the crate version
fn describe_version() -> String {
    let output = Command::new("git")
        .args(["describe", "--tags", "--always", "--match", "v*"])
        .output();

    let described = match output {
        Ok(output) if output.status.success() => {
            String::from_utf8_lossy(&output.stdout).trim().to_string()
        }
        _ => return env_crate_version(),
    };

    let described = described.strip_prefix('v').unwrap_or(&described);
    let commit_hash = commit_hash().unwrap_or_else(|| "unknown".to_string());

    if described.contains('-') {
        let parts: Vec<&str> = described.rsplitn(3, '-').collect();
        if parts.len() >= 3 {
            let hash = parts[0].strip_prefix('g').unwrap_or(parts[0]);
            format!("{}-dirty-{}", parts[2], hash)
        } else {
            described.to_string()
        }
    } else if described == commit_hash {
        // No tags yet, only a bare hash
        format!("{}-{}", env_crate_version(), commit_hash)
    } else {
        format!("{}-{}", described, commit_hash)
    }
}

fn env_crate_version() -> String {
    std::env::var("CARGO_PKG_VERSION").unwrap_or_else(|_| "unknown".to_string())
}

fn commit_hash() -> Option<String> {
    let output = Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()?;

    if output.status.success() {
        Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
    } else {
        None
    }
}
