//! DH-014: Transport — run provisioning commands on the local host.
//!
//! Every engine invocation goes through here. Deployment targets are cloud
//! APIs reached by local CLIs, so there is no remote transport.

use std::path::Path;
use std::process::{Command, Stdio};

/// Output from executing a script.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// One-line failure summary: exit code plus trimmed stderr.
    pub fn failure_summary(&self) -> String {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            format!("exit code {}", self.exit_code)
        } else {
            format!("exit code {}: {}", self.exit_code, stderr)
        }
    }
}

/// Execute a shell script on the local host through `bash -c`.
///
/// Stdin is closed and `TF_IN_AUTOMATION` is set, so an engine that would
/// prompt fails instead of hanging.
pub fn exec_script(script: &str) -> Result<ExecOutput, String> {
    let output = Command::new("bash")
        .args(["-c", script])
        .env("TF_IN_AUTOMATION", "1")
        .stdin(Stdio::null())
        .output()
        .map_err(|e| format!("failed to spawn bash: {}", e))?;

    Ok(ExecOutput {
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

/// Single-quote a word for bash.
pub fn shell_quote(word: &str) -> String {
    format!("'{}'", word.replace('\'', r"'\''"))
}

/// Quote a path for bash.
pub fn quote_path(path: &Path) -> String {
    shell_quote(&path.to_string_lossy())
}
