use std::process::Command;

// `snitray --version` reports the commit it was built from when built from a checkout.
fn main() {
    let output = Command::new("git").args(["rev-parse", "--short", "HEAD"]).output();
    if let Some(output) = output.ok().filter(|o| o.status.success()) {
        if let Ok(hash) = String::from_utf8(output.stdout) {
            println!("cargo:rustc-env=CARGO_PKG_VERSION={} {}", env!("CARGO_PKG_VERSION"), hash.trim());
        }
    }
}
