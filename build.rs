use std::process::Command;

/// Trimmed stdout of a successful, non-empty `git` invocation.
fn git(args: &[&str]) -> Option<String> {
    let out = Command::new("git").args(args).output().ok()?;
    if !out.status.success() {
        return None;
    }
    let text = String::from_utf8(out.stdout).ok()?;
    Some(text.trim().to_string())
}

fn main() {
    let commit = git(&["rev-parse", "--short=12", "HEAD"]).filter(|s| !s.is_empty());
    let version = match commit {
        Some(hash) => {
            let dirty = git(&["status", "--porcelain", "--untracked-files=no"]).is_some_and(|s| !s.is_empty());
            if dirty { format!("{hash}-dirty") } else { hash }
        }
        None => "unknown".to_string(),
    };

    // HEAD moves on checkout; the branch ref it points at moves on commit
    println!("cargo:rerun-if-changed=.git/HEAD");
    if let Some(branch_ref) = git(&["symbolic-ref", "-q", "HEAD"]).filter(|s| !s.is_empty()) {
        println!("cargo:rerun-if-changed=.git/{branch_ref}");
    }
    println!("cargo:rerun-if-changed=src/");
    println!("cargo:rustc-env=BUILD_TIME_GIT_HASH={version}");
}
