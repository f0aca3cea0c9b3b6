//! Sandboxed EXEC
//!
//! Runs a file's sentences as shell command lines in a throwaway directory with
//! a cleared environment. The whole request shares one time budget; a command
//! that overruns it is killed and the rest are skipped.

use crate::error::{DfsError, DfsResult};

use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;

pub struct ExecSandbox {
    shell: PathBuf,
    path_env: String,
    timeout: Duration,
}

impl ExecSandbox {
    pub fn new(shell: PathBuf, path_env: String, timeout: Duration) -> Self {
        Self {
            shell,
            path_env,
            timeout,
        }
    }

    /// Runs each command in order and returns the combined transcript.
    ///
    /// Failures of the user's commands are part of the transcript; only a failure
    /// to set up the sandbox itself is an error.
    pub async fn run(&self, commands: &[String]) -> DfsResult<String> {
        let scratch = tempfile::Builder::new()
            .prefix("dfs-exec-")
            .tempdir()
            .map_err(|e| DfsError::Internal(format!("creating exec sandbox: {}", e)))?;

        let deadline = Instant::now() + self.timeout;
        let mut transcript = String::new();

        for command in commands {
            transcript.push_str(&format!("$ {}\n", command));

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                transcript.push_str("[timed out]\n");
                break;
            }

            let child = Command::new(&self.shell)
                .arg("-c")
                .arg(command)
                .env_clear()
                .env("PATH", &self.path_env)
                .env("HOME", scratch.path())
                .current_dir(scratch.path())
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .spawn();

            let child = match child {
                Ok(child) => child,
                Err(e) => {
                    tracing::error!("Failed to start {}: {}", self.shell.display(), e);
                    transcript.push_str(&format!("[failed to start: {}]\n", e));
                    continue;
                }
            };

            // Dropping the wait future on timeout drops the child, which kills it.
            match tokio::time::timeout(remaining, child.wait_with_output()).await {
                Ok(Ok(output)) => {
                    transcript.push_str(&String::from_utf8_lossy(&output.stdout));
                    transcript.push_str(&String::from_utf8_lossy(&output.stderr));
                    if !transcript.ends_with('\n') {
                        transcript.push('\n');
                    }
                    match output.status.code() {
                        Some(code) => transcript.push_str(&format!("[exit status: {}]\n", code)),
                        None => transcript.push_str("[terminated by signal]\n"),
                    }
                }
                Ok(Err(e)) => {
                    transcript.push_str(&format!("[failed: {}]\n", e));
                }
                Err(_) => {
                    tracing::warn!("EXEC command timed out: {}", command);
                    transcript.push_str("[timed out]\n");
                    break;
                }
            }
        }

        Ok(transcript)
    }
}
