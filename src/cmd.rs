use std::ffi::OsStr;
use std::process::Command;

pub fn command(program: impl AsRef<OsStr>) -> Command {
    let mut cmd = Command::new(program);
    configure_for_background(&mut cmd);
    cmd
}

/// Kills `pid` and every process it spawned (ffmpeg merges, helper shims).
///
/// On Unix the tool is started as a process-group leader, so the whole group
/// is signalled. Errors are swallowed: the process may already be gone.
pub fn kill_process_tree(pid: u32) {
    #[cfg(windows)]
    {
        let pid = pid.to_string();
        let _ = command("taskkill").args(["/PID", &pid, "/T", "/F"]).status();
    }

    #[cfg(unix)]
    {
        let group = format!("-{pid}");
        let _ = command("kill").args(["-KILL", "--", &group]).status();
    }
}

#[cfg(windows)]
fn configure_for_background(cmd: &mut Command) {
    use std::os::windows::process::CommandExt;

    // Prevent console windows from stealing focus on Windows while running tools.
    const CREATE_NO_WINDOW: u32 = 0x0800_0000;
    cmd.creation_flags(CREATE_NO_WINDOW);
}

#[cfg(unix)]
fn configure_for_background(cmd: &mut Command) {
    use std::os::unix::process::CommandExt;

    // New process group so a cancel reaches ffmpeg children too.
    cmd.process_group(0);
}

#[cfg(not(any(windows, unix)))]
fn configure_for_background(_cmd: &mut Command) {}
