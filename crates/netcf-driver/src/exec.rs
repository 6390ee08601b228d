//! External program execution for bringing interfaces up and down.
//!
//! Programs are started directly from an argument vector, never through a
//! shell, so interface names need no quoting. The call blocks until the
//! program exits.

use std::io;
use std::process::{Command, Stdio};
use tracing::{debug, trace, warn};

/// Outcome of one program run.
#[derive(Debug, Clone)]
pub struct ExecResult {
    /// Exit code; -1 when the program was killed by a signal.
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Both output streams, for error messages.
    pub fn combined_output(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

/// The command line as it would be typed, for messages.
pub fn command_line(argv: &[&str]) -> String {
    argv.join(" ")
}

/// Runs `argv[0]` with the remaining arguments and collects its output.
/// Only a failure to start the program is an `Err`; a non-zero exit is
/// reported through [`ExecResult::success`].
pub fn run_program(argv: &[&str]) -> io::Result<ExecResult> {
    let Some((program, args)) = argv.split_first() else {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "empty argument vector",
        ));
    };
    debug!(command = %command_line(argv), "running program");

    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()?;

    let result = ExecResult {
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    };

    if result.success() {
        trace!(command = %command_line(argv), "program succeeded");
    } else {
        warn!(
            command = %command_line(argv),
            exit_code = result.exit_code,
            stderr = %result.stderr,
            "program failed"
        );
    }
    Ok(result)
}

/// Runs `prog` with the single argument `arg`.
pub fn run1(prog: &str, arg: &str) -> io::Result<ExecResult> {
    run_program(&[prog, arg])
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_captures_output() {
        let result = run1("echo", "eth0").unwrap();
        assert!(result.success());
        assert_eq!(result.stdout, "eth0");
        assert_eq!(result.combined_output(), "eth0");
    }

    #[test]
    fn test_nonzero_exit_is_not_an_error() {
        let result = run_program(&["sh", "-c", "echo down >&2; exit 3"]).unwrap();
        assert!(!result.success());
        assert_eq!(result.exit_code, 3);
        assert_eq!(result.stderr, "down");
    }

    #[test]
    fn test_missing_program() {
        let err = run1("/nonexistent/netcf-ifup", "eth0").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn test_empty_argv() {
        assert_eq!(
            run_program(&[]).unwrap_err().kind(),
            io::ErrorKind::InvalidInput
        );
    }

    #[test]
    fn test_combined_output() {
        let result = ExecResult {
            exit_code: 1,
            stdout: "out".to_string(),
            stderr: "err".to_string(),
        };
        assert_eq!(result.combined_output(), "out\nerr");
    }
}
