use std::process::Command;

/// Trimmed stdout of a git command, empty when git is unavailable or fails.
fn git(args: &[&str]) -> String {
    Command::new("git")
        .args(args)
        .output()
        .ok()
        .filter(|o| o.status.success())
        .map(|o| String::from_utf8_lossy(&o.stdout).trim().to_string())
        .unwrap_or_default()
}

pub fn emit_git_metadata() {
    for path in [
        "build.rs",
        "../build/shared_git_metadata.rs",
        "../.git/HEAD",
        "../.git/refs",
        "../.git/packed-refs",
        "../.git/index",
    ] {
        println!("cargo:rerun-if-changed={path}");
    }

    let mut commit = git(&["rev-parse", "HEAD"]);
    if !commit.is_empty() && !git(&["status", "--porcelain", "--untracked-files=no"]).is_empty() {
        commit.push_str("-dirty");
    }
    println!("cargo:rustc-env=GIT_COMMIT={commit}");

    // Only set when HEAD carries a tag.
    let release = git(&["tag", "--points-at", "HEAD"])
        .lines()
        .next()
        .unwrap_or_default()
        .to_string();
    println!("cargo:rustc-env=RELEASE_VERSION={release}");
}
