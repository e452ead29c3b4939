//! Code-generation executor.
//!
//! Runs the generator binary (`<binary> exec <prompt>`) as a child process
//! in the working tree, captures its interleaved output, and supports hard
//! cancellation from the worker's `/kill` endpoint. The generator's
//! conventional output sections (`FILES_CHANGED:`, `SUMMARY:`) are parsed
//! out of the capture after a successful run.

use std::path::Path;
use std::process::Stdio;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

use pagewright_core::error::{Error, Result};

/// LLM credentials forwarded to the generator.
#[derive(Debug, Clone, Default)]
pub struct LlmEnv {
    /// API key (`OPENAI_API_KEY`).
    pub key: Option<String>,
    /// Endpoint override (`OPENAI_BASE_URL`).
    pub base_url: Option<String>,
}

#[derive(Debug, Default)]
struct ExecutorState {
    running: bool,
    cancel: Option<CancellationToken>,
}

/// Cancellable wrapper around the code-generation child process.
pub struct Executor {
    binary: String,
    llm: LlmEnv,
    state: Mutex<ExecutorState>,
    output: Arc<Mutex<String>>,
}

impl Executor {
    /// Creates an executor for the given generator binary.
    #[must_use]
    pub fn new(binary: impl Into<String>, llm: LlmEnv) -> Self {
        Self {
            binary: binary.into(),
            llm,
            state: Mutex::new(ExecutorState::default()),
            output: Arc::new(Mutex::new(String::new())),
        }
    }

    /// Runs the generator against `work_dir` with the given prompt.
    ///
    /// # Errors
    ///
    /// - `Conflict` if a run is already in progress
    /// - `Internal` if the child cannot be spawned, exits non-zero, or is
    ///   cancelled via [`Executor::kill`]
    pub async fn execute(&self, prompt: &str, work_dir: &Path) -> Result<()> {
        let cancel = self.begin()?;
        let result = self.run_child(prompt, work_dir, &cancel).await;
        self.finish();
        result
    }

    fn begin(&self) -> Result<CancellationToken> {
        let mut state = self.state.lock().map_err(|_| Error::Internal {
            message: "executor state poisoned".into(),
        })?;
        if state.running {
            return Err(Error::conflict("code generator is already running"));
        }
        let cancel = CancellationToken::new();
        state.running = true;
        state.cancel = Some(cancel.clone());
        if let Ok(mut output) = self.output.lock() {
            output.clear();
        }
        Ok(cancel)
    }

    fn finish(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.running = false;
            state.cancel = None;
        }
    }

    async fn run_child(
        &self,
        prompt: &str,
        work_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut command = tokio::process::Command::new(&self.binary);
        command
            .arg("exec")
            .arg(prompt)
            .current_dir(work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // No orphans if this future is dropped mid-run.
            .kill_on_drop(true);
        if let Some(key) = &self.llm.key {
            command.env("OPENAI_API_KEY", key);
        }
        if let Some(url) = &self.llm.base_url {
            command.env("OPENAI_BASE_URL", url);
        }

        let mut child = command
            .spawn()
            .map_err(|e| Error::internal(format!("failed to start code generator: {e}")))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::internal("failed to capture generator stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::internal("failed to capture generator stderr"))?;

        let out_task = tokio::spawn(Self::capture(stdout, Arc::clone(&self.output), "stdout"));
        let err_task = tokio::spawn(Self::capture(stderr, Arc::clone(&self.output), "stderr"));

        let wait = tokio::select! {
            () = cancel.cancelled() => {
                let _ = child.kill().await;
                let _ = out_task.await;
                let _ = err_task.await;
                return Err(Error::internal("code generator execution was cancelled"));
            }
            status = child.wait() => status,
        };
        let _ = out_task.await;
        let _ = err_task.await;

        let status =
            wait.map_err(|e| Error::internal(format!("failed to wait for generator: {e}")))?;
        if !status.success() {
            return Err(Error::internal(format!(
                "code generator exited with {status}"
            )));
        }
        Ok(())
    }

    async fn capture(
        stream: impl tokio::io::AsyncRead + Unpin,
        output: Arc<Mutex<String>>,
        label: &'static str,
    ) {
        let mut lines = BufReader::new(stream).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            tracing::debug!(stream = label, line = %line, "generator output");
            if let Ok(mut output) = output.lock() {
                output.push_str(&line);
                output.push('\n');
            }
        }
    }

    /// Hard-cancels the running generator.
    ///
    /// # Errors
    ///
    /// Returns `Conflict` if no run is in progress.
    pub fn kill(&self) -> Result<()> {
        let state = self.state.lock().map_err(|_| Error::Internal {
            message: "executor state poisoned".into(),
        })?;
        match (&state.cancel, state.running) {
            (Some(cancel), true) => {
                cancel.cancel();
                Ok(())
            }
            _ => Err(Error::conflict("code generator is not running")),
        }
    }

    /// Returns whether a run is in progress.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state.lock().map(|s| s.running).unwrap_or(false)
    }

    /// Returns the captured output so far.
    #[must_use]
    pub fn output(&self) -> String {
        self.output.lock().map(|o| o.clone()).unwrap_or_default()
    }

    /// Extracts the `FILES_CHANGED:` list and `SUMMARY:` paragraph from the
    /// captured output.
    #[must_use]
    pub fn parse_output(&self) -> (Vec<String>, String) {
        parse_sections(&self.output())
    }
}

fn parse_sections(output: &str) -> (Vec<String>, String) {
    let mut files_changed = Vec::new();
    if let Some(idx) = output.find("FILES_CHANGED:") {
        for line in output[idx..].lines().skip(1) {
            let line = line.trim();
            if line.is_empty() || line.starts_with("```") || line.starts_with("SUMMARY") {
                break;
            }
            let Some(rest) = line.strip_prefix("- ") else {
                continue;
            };
            // Accept both "- modified: path" and "- path".
            let path = match rest.split_once(':') {
                Some((_, path)) => path.trim(),
                None => rest.trim(),
            };
            if !path.is_empty() {
                files_changed.push(path.to_string());
            }
        }
    }

    let mut summary = String::new();
    if let Some(idx) = output.find("SUMMARY:") {
        for line in output[idx + "SUMMARY:".len()..].lines() {
            let line = line.trim();
            if line.is_empty() && !summary.is_empty() {
                break;
            }
            if line.starts_with("```") {
                break;
            }
            if line.is_empty() {
                continue;
            }
            if !summary.is_empty() {
                summary.push(' ');
            }
            summary.push_str(line);
        }
    }

    (files_changed, summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn parses_files_changed_and_summary() {
        let output = "\
noise\n\
FILES_CHANGED:\n\
- modified: pages/about.md\n\
- pages/index.md\n\
\n\
SUMMARY:\n\
Added an about page\n\
with navigation.\n\
\n\
trailing noise\n";
        let (files, summary) = parse_sections(output);
        assert_eq!(files, vec!["pages/about.md", "pages/index.md"]);
        assert_eq!(summary, "Added an about page with navigation.");
    }

    #[test]
    fn files_section_stops_at_summary_or_fence() {
        let output = "FILES_CHANGED:\n- a.md\nSUMMARY:\nDone\n";
        let (files, summary) = parse_sections(output);
        assert_eq!(files, vec!["a.md"]);
        assert_eq!(summary, "Done");

        let fenced = "FILES_CHANGED:\n- a.md\n```\n- b.md\n";
        let (files, _) = parse_sections(fenced);
        assert_eq!(files, vec!["a.md"]);
    }

    #[test]
    fn missing_sections_parse_to_empty() {
        let (files, summary) = parse_sections("no structured output at all");
        assert!(files.is_empty());
        assert!(summary.is_empty());
    }

    #[tokio::test]
    async fn executes_a_real_command_and_captures_output() {
        // `echo exec <prompt>` — any argv works since the executor always
        // passes `exec <prompt>`.
        let executor = Executor::new("echo", LlmEnv::default());
        let dir = tempfile::tempdir().expect("tempdir");
        executor
            .execute("SUMMARY:", dir.path())
            .await
            .expect("execute");
        assert!(executor.output().contains("exec"));
        assert!(!executor.is_running());
    }

    #[tokio::test]
    async fn failing_command_surfaces_exit_status() {
        let executor = Executor::new("false", LlmEnv::default());
        let dir = tempfile::tempdir().expect("tempdir");
        let err = executor.execute("prompt", dir.path()).await.unwrap_err();
        assert!(matches!(err, Error::Internal { .. }));
    }

    #[tokio::test]
    async fn missing_binary_fails_to_spawn() {
        let executor = Executor::new("/does/not/exist", LlmEnv::default());
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(executor.execute("prompt", dir.path()).await.is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn kill_cancels_a_long_run() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().expect("tempdir");
        // A stand-in generator that ignores its argv and sleeps.
        let script = dir.path().join("generator.sh");
        std::fs::write(&script, "#!/bin/sh\nsleep 30\n").expect("write script");
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755))
            .expect("chmod");

        let executor = Arc::new(Executor::new(
            script.to_string_lossy().into_owned(),
            LlmEnv::default(),
        ));
        let running = Arc::clone(&executor);
        let path = dir.path().to_path_buf();
        let task = tokio::spawn(async move { running.execute("prompt", &path).await });

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(executor.is_running());
        executor.kill().expect("kill");

        let result = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("cancelled promptly")
            .expect("join");
        assert!(result.is_err());
        assert!(!executor.is_running());
    }

    #[test]
    fn kill_without_a_run_conflicts() {
        let executor = Executor::new("echo", LlmEnv::default());
        assert!(matches!(executor.kill(), Err(Error::Conflict { .. })));
    }
}
