//! Injects build metadata reported by the `/version` endpoint.

use std::process::Command;

fn main() {
    println!(
        "cargo:rustc-env=BUILD_TIMESTAMP={}",
        chrono::Utc::now().to_rfc3339()
    );

    let commit = Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()
        .filter(|output| output.status.success())
        .map(|output| String::from_utf8_lossy(&output.stdout).trim().to_string());

    if let Some(commit) = commit {
        println!("cargo:rustc-env=GIT_COMMIT={}", commit);
    }

    println!("cargo:rerun-if-changed=.git/HEAD");
}
