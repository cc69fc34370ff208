//! Spawning the external LLM CLI.
//!
//! The child receives the synthesized prompt and an ephemeral config file
//! exposing only this butler's tool endpoint — no ambient tool bleed.
//! Deadline expiry kills the child cooperatively: SIGTERM, a grace
//! period, then SIGKILL.

use std::io::Write as _;
use std::time::Duration;

use async_trait::async_trait;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::process::Command;
use tracing::{debug, warn};

use majordomo_storage::QueuedSession;

/// Outcome of one spawned session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnOutcome {
    /// Whether the child exited cleanly.
    pub success: bool,
    /// Failure detail (`deadline_exceeded`, stderr tail, spawn error).
    pub error: Option<String>,
    /// Model the session ran on, when known.
    pub model: Option<String>,
}

impl SpawnOutcome {
    /// A clean exit.
    #[must_use]
    pub fn ok(model: Option<String>) -> Self {
        Self {
            success: true,
            error: None,
            model,
        }
    }

    /// A failure with detail.
    #[must_use]
    pub fn failed(error: impl Into<String>, model: Option<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            model,
        }
    }
}

/// The seam between the pool and the actual CLI.
#[async_trait]
pub trait SessionLauncher: Send + Sync {
    /// Run one session to completion (or deadline).
    async fn launch(&self, session: &QueuedSession, prompt: &str) -> SpawnOutcome;
}

/// Launches the configured LLM CLI binary.
#[derive(Debug, Clone)]
pub struct CliLauncher {
    binary: String,
    model: Option<String>,
    endpoint_url: String,
    butler: String,
    allowed_tools: Vec<String>,
    deadline: Duration,
    kill_grace: Duration,
}

impl CliLauncher {
    /// Build a launcher for one butler.
    #[must_use]
    pub fn new(
        binary: impl Into<String>,
        model: Option<String>,
        endpoint_url: impl Into<String>,
        butler: impl Into<String>,
        allowed_tools: Vec<String>,
        deadline: Duration,
        kill_grace: Duration,
    ) -> Self {
        Self {
            binary: binary.into(),
            model,
            endpoint_url: endpoint_url.into(),
            butler: butler.into(),
            allowed_tools,
            deadline,
            kill_grace,
        }
    }

    /// The ephemeral CLI config: this butler's endpoint and nothing else.
    fn ephemeral_config(&self) -> serde_json::Value {
        serde_json::json!({
            "mcpServers": {
                self.butler.clone(): { "url": self.endpoint_url }
            },
            "allowedTools": self.allowed_tools,
        })
    }
}

#[async_trait]
impl SessionLauncher for CliLauncher {
    async fn launch(&self, session: &QueuedSession, prompt: &str) -> SpawnOutcome {
        // The config file must outlive the child; keep the handle in scope.
        let mut config_file = match tempfile::NamedTempFile::new() {
            Ok(f) => f,
            Err(e) => return SpawnOutcome::failed(format!("config file: {e}"), None),
        };
        if let Err(e) = config_file.write_all(self.ephemeral_config().to_string().as_bytes()) {
            return SpawnOutcome::failed(format!("config write: {e}"), None);
        }

        let mut command = Command::new(&self.binary);
        command
            .arg("-p")
            .arg(prompt)
            .arg("--mcp-config")
            .arg(config_file.path())
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);
        if let Some(model) = &self.model {
            command.arg("--model").arg(model);
        }

        let mut child = match command.spawn() {
            Ok(c) => c,
            Err(e) => return SpawnOutcome::failed(format!("spawn: {e}"), self.model.clone()),
        };
        debug!(session = %session.id, pid = child.id(), "session child spawned");

        let waited = tokio::time::timeout(self.deadline, child.wait()).await;
        match waited {
            Ok(Ok(status)) if status.success() => SpawnOutcome::ok(self.model.clone()),
            Ok(Ok(status)) => {
                let stderr_tail = read_stderr_tail(&mut child).await;
                let mut detail = status.to_string();
                if !stderr_tail.is_empty() {
                    detail.push_str(": ");
                    detail.push_str(&stderr_tail);
                }
                SpawnOutcome::failed(detail, self.model.clone())
            },
            Ok(Err(e)) => SpawnOutcome::failed(format!("wait: {e}"), self.model.clone()),
            Err(_) => {
                warn!(session = %session.id, "session deadline exceeded; terminating child");
                terminate(&mut child, self.kill_grace).await;
                SpawnOutcome::failed("deadline_exceeded", self.model.clone())
            },
        }
    }
}

/// SIGTERM, wait out the grace period, then SIGKILL whatever is left.
async fn terminate(child: &mut tokio::process::Child, grace: Duration) {
    if let Some(pid) = child.id() {
        #[allow(clippy::cast_possible_wrap)]
        let pid = Pid::from_raw(pid as i32);
        if let Err(e) = kill(pid, Signal::SIGTERM) {
            warn!(error = %e, "SIGTERM failed");
        }
        if tokio::time::timeout(grace, child.wait()).await.is_ok() {
            return;
        }
    }
    if let Err(e) = child.kill().await {
        warn!(error = %e, "SIGKILL failed");
    }
}

async fn read_stderr_tail(child: &mut tokio::process::Child) -> String {
    use tokio::io::AsyncReadExt as _;
    let Some(mut stderr) = child.stderr.take() else {
        return String::new();
    };
    let mut buf = String::new();
    let _bytes = stderr.read_to_string(&mut buf).await;
    buf.chars().rev().take(200).collect::<String>().chars().rev().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use majordomo_core::SessionId;

    fn session() -> QueuedSession {
        QueuedSession {
            id: SessionId::new(),
            trigger_source: "manual".to_owned(),
            prompt: "noop".to_owned(),
            request_context: None,
            enqueued_at: Utc::now(),
        }
    }

    fn launcher(binary: &str, deadline: Duration) -> CliLauncher {
        CliLauncher::new(
            binary,
            None,
            "ws://127.0.0.1:7821",
            "health",
            vec!["state.get".to_owned()],
            deadline,
            Duration::from_millis(200),
        )
    }

    #[tokio::test]
    async fn clean_exit_is_success() {
        // `true` ignores our arguments and exits zero.
        let outcome = launcher("true", Duration::from_secs(5))
            .launch(&session(), "prompt")
            .await;
        assert!(outcome.success);
        assert!(outcome.error.is_none());
    }

    #[tokio::test]
    async fn nonzero_exit_is_failure() {
        let outcome = launcher("false", Duration::from_secs(5))
            .launch(&session(), "prompt")
            .await;
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().starts_with("exit status"));
    }

    #[tokio::test]
    async fn missing_binary_is_failure() {
        let outcome = launcher("/nonexistent/llm-cli", Duration::from_secs(5))
            .launch(&session(), "prompt")
            .await;
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().starts_with("spawn:"));
    }

    #[tokio::test]
    async fn deadline_kills_the_child() {
        use std::os::unix::fs::PermissionsExt as _;

        // A stand-in CLI that ignores its arguments and hangs.
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("slow-cli");
        std::fs::write(&script, "#!/bin/sh\nsleep 30\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let started = std::time::Instant::now();
        let outcome = launcher(script.to_str().unwrap(), Duration::from_millis(300))
            .launch(&session(), "prompt")
            .await;
        assert!(!outcome.success);
        assert_eq!(outcome.error.as_deref(), Some("deadline_exceeded"));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn ephemeral_config_pins_the_tool_surface() {
        let launcher = launcher("true", Duration::from_secs(1));
        let config = launcher.ephemeral_config();
        assert_eq!(config["mcpServers"]["health"]["url"], "ws://127.0.0.1:7821");
        assert_eq!(config["allowedTools"][0], "state.get");
        assert!(config["mcpServers"].as_object().unwrap().len() == 1);
    }
}
