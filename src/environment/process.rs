//! Child process helpers shared by environments and probes

use crate::environment::{EnvironmentError, ProcessResult};
use std::path::Path;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Run `command` through `sh -c`, logging its output line by line
///
/// # Errors
/// Returns `EnvironmentError::Spawn` if the shell cannot be started, and
/// `EnvironmentError::Io` if waiting on it fails. A non-zero exit is not an
/// error: it is reported through [`ProcessResult::success`].
pub async fn run(
    command: &str,
    cwd: Option<&Path>,
    log_key: &str,
) -> Result<ProcessResult, EnvironmentError> {
    debug!(step = %log_key, "Spawning: {}", command);

    let mut cmd = Command::new("sh");
    cmd.arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }

    let mut child = cmd.spawn().map_err(|source| EnvironmentError::Spawn {
        command: command.to_string(),
        source,
    })?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    tokio::join!(
        log_lines(stdout, log_key, false),
        log_lines(stderr, log_key, true)
    );

    let status = child.wait().await.map_err(EnvironmentError::Io)?;
    let exit_code = status.code();

    if !status.success() {
        warn!(step = %log_key, "Command exited with {:?}", exit_code);
    }

    Ok(ProcessResult {
        success: status.success(),
        exit_code,
    })
}

async fn log_lines<R: AsyncRead + Unpin>(stream: Option<R>, log_key: &str, is_stderr: bool) {
    let Some(stream) = stream else {
        return;
    };

    let mut lines = BufReader::new(stream).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) if is_stderr => warn!(step = %log_key, "{}", line),
            Ok(Some(line)) => info!(step = %log_key, "{}", line),
            Ok(None) => break,
            Err(e) => {
                debug!(step = %log_key, "Stopped reading output: {}", e);
                break;
            }
        }
    }
}

/// Run `command` through `sh -c` and return its trimmed stdout
///
/// # Errors
/// Fails when the command cannot be spawned or exits unsuccessfully.
pub async fn oneshot(command: &str) -> Result<String, EnvironmentError> {
    debug!("Running oneshot: {}", command);

    let output = Command::new("sh")
        .arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|source| EnvironmentError::Spawn {
            command: command.to_string(),
            source,
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(EnvironmentError::Failed {
            command: command.to_string(),
            exit_code: output.status.code(),
            stderr: stderr.trim().to_string(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}
