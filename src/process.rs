//! Spawn capability for external tools.
//!
//! The registry owns spawning, but the actual launch goes through a
//! [`ProcessLauncher`] so hosts can route tools through wrappers and tests can
//! script process behaviour without touching the OS.

use crate::cmd;
use std::io::{self, Read};
use std::path::Path;
use std::process::{Child, Stdio};
use std::sync::{Arc, Mutex};

/// Exit status of a finished tool. `code` is `None` when the process died
/// from a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitStatus {
    pub code: Option<i32>,
}

impl ExitStatus {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// A running external process that can be polled and force-terminated from
/// any thread.
pub trait ToolProcess: Send + Sync {
    fn id(&self) -> u32;

    fn try_wait(&self) -> io::Result<Option<ExitStatus>>;

    /// Terminates the process and its children. Must be safe to call more
    /// than once and after the process exited.
    fn kill_tree(&self);
}

pub struct LaunchedProcess {
    pub process: Arc<dyn ToolProcess>,
    pub stdout: Box<dyn Read + Send>,
    pub stderr: Box<dyn Read + Send>,
}

pub trait ProcessLauncher: Send + Sync {
    fn launch(&self, program: &Path, args: &[String]) -> io::Result<LaunchedProcess>;
}

/// Launches real OS processes with piped output.
#[derive(Debug, Default, Clone)]
pub struct SystemLauncher;

impl ProcessLauncher for SystemLauncher {
    fn launch(&self, program: &Path, args: &[String]) -> io::Result<LaunchedProcess> {
        let mut child = cmd::command(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "stdout pipe missing"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "stderr pipe missing"))?;

        Ok(LaunchedProcess {
            process: Arc::new(SystemProcess {
                pid: child.id(),
                child: Mutex::new(child),
            }),
            stdout: Box::new(stdout),
            stderr: Box::new(stderr),
        })
    }
}

struct SystemProcess {
    pid: u32,
    child: Mutex<Child>,
}

impl ToolProcess for SystemProcess {
    fn id(&self) -> u32 {
        self.pid
    }

    fn try_wait(&self) -> io::Result<Option<ExitStatus>> {
        let mut child = self
            .child
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "process lock poisoned"))?;
        Ok(child.try_wait()?.map(|status| ExitStatus {
            code: status.code(),
        }))
    }

    fn kill_tree(&self) {
        cmd::kill_process_tree(self.pid);
        if let Ok(mut child) = self.child.lock() {
            let _ = child.kill();
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::{Duration, Instant};

    fn wait_exit(process: &dyn ToolProcess) -> ExitStatus {
        let started = Instant::now();
        loop {
            if let Some(status) = process.try_wait().expect("try_wait") {
                return status;
            }
            assert!(started.elapsed() < Duration::from_secs(10), "process did not exit");
            std::thread::sleep(Duration::from_millis(20));
        }
    }

    #[test]
    fn system_launcher_pipes_output_and_reports_exit_code() {
        let launched = SystemLauncher
            .launch(
                &PathBuf::from("sh"),
                &["-c".to_string(), "echo hello; exit 3".to_string()],
            )
            .expect("launch");
        let mut out = String::new();
        let mut stdout = launched.stdout;
        stdout.read_to_string(&mut out).expect("read");
        assert_eq!(out.trim(), "hello");
        assert_eq!(wait_exit(launched.process.as_ref()).code, Some(3));
    }

    #[test]
    fn kill_tree_terminates_long_running_process() {
        let launched = SystemLauncher
            .launch(
                &PathBuf::from("sh"),
                &["-c".to_string(), "sleep 30".to_string()],
            )
            .expect("launch");
        launched.process.kill_tree();
        let status = wait_exit(launched.process.as_ref());
        assert!(!status.success());
        launched.process.kill_tree();
    }
}
