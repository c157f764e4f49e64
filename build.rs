use std::process::Command;

fn main() {
    let built_at = command_stdout("date", &["-u", "+%Y-%m-%dT%H:%M:%SZ"])
        .or_else(|| {
            command_stdout(
                "powershell",
                &[
                    "-Command",
                    "(Get-Date).ToUniversalTime().ToString('yyyy-MM-ddTHH:mm:ssZ')",
                ],
            )
        })
        .unwrap_or_else(|| "unknown".into());
    println!("cargo:rustc-env=BUILD_TIMESTAMP={built_at}");

    let git_sha = command_stdout("git", &["rev-parse", "--short", "HEAD"])
        .unwrap_or_else(|| "unknown".into());
    println!("cargo:rustc-env=BUILD_GIT_SHA={git_sha}");

    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=build.rs");
}

/// Trimmed stdout of a successful command, `None` if it failed or printed nothing.
fn command_stdout(program: &str, args: &[&str]) -> Option<String> {
    Command::new(program)
        .args(args)
        .output()
        .ok()
        .filter(|o| o.status.success())
        .and_then(|o| String::from_utf8(o.stdout).ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}
