use std::io;
use std::process::Command;

/// Open `url` with the platform's default browser. Used as the default
/// URL-open hook for auth flows that send the user through a consent page;
/// providers accept an injectable replacement for tests.
pub fn open(url: &str) -> io::Result<()> {
    launcher_command(url).spawn().map(|_| ())
}

#[cfg(target_os = "linux")]
fn launcher_command(url: &str) -> Command {
    let mut cmd = Command::new("xdg-open");
    cmd.arg(url);
    cmd
}

#[cfg(target_os = "macos")]
fn launcher_command(url: &str) -> Command {
    let mut cmd = Command::new("open");
    cmd.arg(url);
    cmd
}

#[cfg(target_os = "windows")]
fn launcher_command(url: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.args(["/C", "start", ""]).arg(url);
    cmd
}
