use std::process::Command;

fn main() {
    let built_at = stdout_of("date", &["-u", "+%Y-%m-%dT%H:%M:%SZ"]);
    let revision = stdout_of("git", &["rev-parse", "--short", "HEAD"]);

    for (key, value) in [("BUILD_TIMESTAMP", built_at), ("BUILD_GIT_SHA", revision)] {
        println!(
            "cargo:rustc-env={key}={}",
            value.as_deref().unwrap_or("unknown")
        );
    }
    println!("cargo:rerun-if-changed=.git/HEAD");
}

/// Trimmed stdout of a successful run, `None` if the tool is missing or fails.
fn stdout_of(program: &str, args: &[&str]) -> Option<String> {
    let output = Command::new(program).args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8(output.stdout).ok()?;
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}
