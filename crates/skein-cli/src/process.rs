//! Gateway backed by the agent's command-line interface
//!
//! Every request spawns one agent process in stream-json mode. Its stdout
//! lines are published on the output channels, stderr lines on the error
//! channels and its exit status on the complete channels. Lines go to the
//! generic channel only until the process reveals its session id; after
//! that they go to both the generic and the scoped channel.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use parking_lot::Mutex;
use regex::Regex;
use serde_json::{Value, json};
use skein_protocol::{ChannelKind, ChannelName, StreamMessage};
use skein_session::{EventBus, Gateway, GatewayError, RunningSession, SendRequest};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::LinesStream;
use tokio_util::sync::CancellationToken;

static NON_ALPHANUMERIC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9]").expect("valid regex"));

/// How a request addresses the conversation
#[derive(Debug, Clone, PartialEq, Eq)]
enum Mode {
    Start,
    Continue,
    Resume(String),
}

struct AgentProcess {
    key: u64,
    session_id: Option<String>,
    project_path: PathBuf,
    started_at: i64,
    cancel: CancellationToken,
}

/// Live agent processes
#[derive(Default)]
struct ProcessTable {
    next_key: u64,
    processes: Vec<AgentProcess>,
}

impl ProcessTable {
    fn insert(&mut self, project_path: PathBuf, cancel: CancellationToken) -> u64 {
        self.next_key += 1;
        self.processes.push(AgentProcess {
            key: self.next_key,
            session_id: None,
            project_path,
            started_at: chrono::Utc::now().timestamp_millis(),
            cancel,
        });
        self.next_key
    }

    fn get_mut(&mut self, key: u64) -> Option<&mut AgentProcess> {
        self.processes.iter_mut().find(|p| p.key == key)
    }

    fn remove(&mut self, key: u64) {
        self.processes.retain(|p| p.key != key);
    }
}

/// Spawns the agent CLI and relays its output onto the event bus
pub struct ProcessGateway {
    bus: EventBus,
    command: String,
    extra_args: Vec<String>,
    history_dir: PathBuf,
    table: Arc<Mutex<ProcessTable>>,
}

impl ProcessGateway {
    pub fn new(bus: EventBus, command: impl Into<String>, extra_args: Vec<String>, history_dir: PathBuf) -> Self {
        Self {
            bus,
            command: command.into(),
            extra_args,
            history_dir,
            table: Arc::default(),
        }
    }

    fn transcript_path(&self, project_id: &str, session_id: &str) -> PathBuf {
        self.history_dir
            .join(project_id)
            .join(format!("{}.jsonl", session_id))
    }

    fn build_command(&self, request: &SendRequest, mode: &Mode) -> Command {
        let mut cmd = Command::new(&self.command);
        cmd.args(&self.extra_args);
        match mode {
            Mode::Start => {}
            Mode::Continue => {
                cmd.arg("-c");
            }
            Mode::Resume(session_id) => {
                cmd.arg("--resume").arg(session_id);
            }
        }
        cmd.arg("-p")
            .arg(&request.prompt)
            .arg("--model")
            .arg(&request.model)
            .arg("--output-format")
            .arg("stream-json")
            .arg("--verbose")
            .current_dir(&request.project_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    fn spawn(&self, request: &SendRequest, mode: Mode) -> Result<(), GatewayError> {
        let mut child = self
            .build_command(request, &mode)
            .spawn()
            .map_err(|e| GatewayError::Spawn(format!("{}: {}", self.command, e)))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| GatewayError::Spawn("stdout was not captured".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| GatewayError::Spawn("stderr was not captured".into()))?;

        let cancel = CancellationToken::new();
        let key = self
            .table
            .lock()
            .insert(request.project_path.clone(), cancel.clone());
        tracing::debug!("Spawned agent process {} ({:?})", key, mode);

        tokio::spawn(supervise(
            child,
            stdout,
            stderr,
            cancel,
            self.bus.clone(),
            self.table.clone(),
            key,
        ));
        Ok(())
    }
}

/// Relay one process's output until it exits or is cancelled
async fn supervise(
    mut child: Child,
    stdout: ChildStdout,
    stderr: ChildStderr,
    cancel: CancellationToken,
    bus: EventBus,
    table: Arc<Mutex<ProcessTable>>,
    key: u64,
) {
    let cancelled = tokio::select! {
        _ = cancel.cancelled() => true,
        _ = relay_lines(stdout, stderr, &bus, &table, key) => false,
    };

    let success = if cancelled {
        if let Err(e) = child.kill().await {
            tracing::warn!("Failed to kill agent process {}: {}", key, e);
        }
        false
    } else {
        match child.wait().await {
            Ok(status) => status.success(),
            Err(e) => {
                tracing::warn!("Failed to wait for agent process {}: {}", key, e);
                false
            }
        }
    };

    let session_id = {
        let mut table = table.lock();
        let session_id = table.get_mut(key).and_then(|p| p.session_id.clone());
        table.remove(key);
        session_id
    };
    tracing::debug!(
        "Agent process {} finished (success: {}, cancelled: {})",
        key,
        success,
        cancelled
    );
    bus.publish(
        ChannelKind::Complete,
        session_id.as_deref(),
        json!({ "success": success, "session_id": session_id }).to_string(),
    );
}

enum Line {
    Out(std::io::Result<String>),
    Err(std::io::Result<String>),
}

async fn relay_lines(
    stdout: ChildStdout,
    stderr: ChildStderr,
    bus: &EventBus,
    table: &Arc<Mutex<ProcessTable>>,
    key: u64,
) {
    let out = LinesStream::new(BufReader::new(stdout).lines()).map(Line::Out);
    let err = LinesStream::new(BufReader::new(stderr).lines()).map(Line::Err);
    let mut lines = out.merge(err);
    let mut session_id: Option<String> = None;

    while let Some(line) = lines.next().await {
        match line {
            Line::Out(Ok(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                if session_id.is_none() {
                    session_id = session_id_of(&line);
                    if let Some(id) = &session_id {
                        tracing::debug!("Agent process {} is session {}", key, id);
                        if let Some(process) = table.lock().get_mut(key) {
                            process.session_id = Some(id.clone());
                        }
                    }
                }
                bus.publish(ChannelKind::Output, session_id.as_deref(), line);
            }
            Line::Err(Ok(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                // Once identified, stderr goes to the session's own channel only
                match &session_id {
                    Some(id) => bus.emit(&ChannelName::scoped(ChannelKind::Error, id), line),
                    None => bus.publish(ChannelKind::Error, None, line),
                };
            }
            Line::Out(Err(e)) | Line::Err(Err(e)) => {
                tracing::warn!("Failed to read agent output: {}", e);
            }
        }
    }
}

fn session_id_of(line: &str) -> Option<String> {
    StreamMessage::parse(line).ok().and_then(|m| m.session_id)
}

/// Encode a project path the way the agent names its history directories
pub fn encode_project_id(project_path: &Path) -> String {
    NON_ALPHANUMERIC
        .replace_all(&project_path.to_string_lossy(), "-")
        .into_owned()
}

#[async_trait]
impl Gateway for ProcessGateway {
    async fn start(&self, request: &SendRequest) -> Result<(), GatewayError> {
        self.spawn(request, Mode::Start)
    }

    async fn continue_latest(&self, request: &SendRequest) -> Result<(), GatewayError> {
        self.spawn(request, Mode::Continue)
    }

    async fn resume(&self, session_id: &str, request: &SendRequest) -> Result<(), GatewayError> {
        let project_id = self.project_id(&request.project_path);
        if !self.transcript_path(&project_id, session_id).exists() {
            return Err(GatewayError::UnknownSession(session_id.to_string()));
        }
        self.spawn(request, Mode::Resume(session_id.to_string()))
    }

    async fn cancel(&self, session_id: Option<&str>) -> Result<(), GatewayError> {
        let table = self.table.lock();
        let target = match session_id {
            Some(id) => table
                .processes
                .iter()
                .find(|p| p.session_id.as_deref() == Some(id)),
            None => table.processes.iter().max_by_key(|p| p.key),
        };
        match target {
            Some(process) => {
                tracing::debug!("Cancelling agent process {}", process.key);
                process.cancel.cancel();
                Ok(())
            }
            None => Err(GatewayError::NotRunning),
        }
    }

    async fn list_running(&self) -> Result<Vec<RunningSession>, GatewayError> {
        Ok(self
            .table
            .lock()
            .processes
            .iter()
            .filter_map(|p| {
                Some(RunningSession {
                    session_id: p.session_id.clone()?,
                    project_path: p.project_path.clone(),
                    started_at: p.started_at,
                })
            })
            .collect())
    }

    async fn load_history(&self, session_id: &str, project_id: &str) -> Result<Vec<Value>, GatewayError> {
        let path = self.transcript_path(project_id, session_id);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut entries = Vec::new();
        for (n, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Value>(line) {
                Ok(value) => entries.push(value),
                Err(e) => tracing::debug!("Skipping line {} of {}: {}", n + 1, path.display(), e),
            }
        }
        Ok(entries)
    }

    fn project_id(&self, project_path: &Path) -> String {
        encode_project_id(project_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skein_session::Subscription;
    use std::time::Duration;

    fn request(dir: &Path, prompt: &str) -> SendRequest {
        SendRequest {
            project_path: dir.to_path_buf(),
            prompt: prompt.to_string(),
            model: "sonnet".to_string(),
        }
    }

    async fn next(sub: &mut Subscription) -> skein_session::Delivery {
        tokio::time::timeout(Duration::from_secs(5), sub.next())
            .await
            .expect("delivery within timeout")
            .expect("subscription open")
    }

    #[test]
    fn test_project_id_encoding() {
        assert_eq!(
            encode_project_id(Path::new("/home/me/my_app.rs")),
            "-home-me-my-app-rs"
        );
    }

    #[test]
    fn test_session_id_of() {
        assert_eq!(
            session_id_of(r#"{"type":"system","subtype":"init","session_id":"s1"}"#),
            Some("s1".to_string())
        );
        assert_eq!(session_id_of("plain text"), None);
    }

    #[test]
    fn test_command_arguments() {
        let gateway = ProcessGateway::new(EventBus::new(), "claude", vec!["--x".into()], PathBuf::from("/h"));
        let cmd = gateway.build_command(&request(Path::new("/tmp"), "hi"), &Mode::Resume("abc".into()));
        let args: Vec<String> = cmd
            .as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            args,
            vec![
                "--x", "--resume", "abc", "-p", "hi", "--model", "sonnet", "--output-format", "stream-json",
                "--verbose"
            ]
        );
    }

    #[tokio::test]
    async fn test_resume_rejects_unknown_session() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = ProcessGateway::new(EventBus::new(), "claude", vec![], dir.path().to_path_buf());
        let err = gateway.resume("nope", &request(dir.path(), "hi")).await.unwrap_err();
        assert!(err.is_resume_rejection());
    }

    #[tokio::test]
    async fn test_load_history_reads_transcript() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = ProcessGateway::new(EventBus::new(), "claude", vec![], dir.path().to_path_buf());
        let project_dir = dir.path().join("-work-app");
        std::fs::create_dir_all(&project_dir).unwrap();
        std::fs::write(
            project_dir.join("s1.jsonl"),
            "{\"type\":\"user\",\"message\":{\"content\":\"hi\"}}\nnot json\n\n{\"type\":\"summary\"}\n",
        )
        .unwrap();

        let entries = gateway.load_history("s1", "-work-app").await.unwrap();
        assert_eq!(entries.len(), 2);
        assert!(gateway.load_history("missing", "-work-app").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_without_process() {
        let gateway = ProcessGateway::new(EventBus::new(), "claude", vec![], PathBuf::from("/h"));
        assert!(matches!(gateway.cancel(None).await, Err(GatewayError::NotRunning)));
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let gateway = ProcessGateway::new(EventBus::new(), "skein-no-such-agent", vec![], PathBuf::from("/h"));
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            gateway.start(&request(dir.path(), "hi")).await,
            Err(GatewayError::Spawn(_))
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_relays_output_and_completion() {
        let dir = tempfile::tempdir().unwrap();
        let bus = EventBus::new();
        let script = r#"echo '{"type":"system","subtype":"init","session_id":"s1"}'; echo '{"type":"assistant","message":{"content":"hi"}}'; sleep 0.2; echo oops >&2"#;
        let gateway = ProcessGateway::new(
            bus.clone(),
            "sh",
            vec!["-c".into(), script.into()],
            dir.path().to_path_buf(),
        );
        let mut scoped = bus.subscribe(&ChannelName::scoped_triple("s1"));

        gateway.start(&request(dir.path(), "hi")).await.unwrap();

        let mut outputs = Vec::new();
        let mut errors = Vec::new();
        loop {
            let delivery = next(&mut scoped).await;
            match delivery.channel.kind() {
                ChannelKind::Output => outputs.push(delivery.payload),
                ChannelKind::Error => errors.push(delivery.payload),
                ChannelKind::Complete => {
                    let payload: Value = serde_json::from_str(&delivery.payload).unwrap();
                    assert_eq!(payload["success"], true);
                    assert_eq!(payload["session_id"], "s1");
                    break;
                }
            }
        }
        assert_eq!(outputs.len(), 2);
        assert_eq!(errors, vec!["oops"]);
        assert!(gateway.list_running().await.unwrap().is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stderr_stays_off_generic_once_identified() {
        let dir = tempfile::tempdir().unwrap();
        let bus = EventBus::new();
        let script = r#"echo early >&2; sleep 0.2; echo '{"type":"system","subtype":"init","session_id":"s3"}'; sleep 0.2; echo late >&2"#;
        let gateway = ProcessGateway::new(
            bus.clone(),
            "sh",
            vec!["-c".into(), script.into()],
            dir.path().to_path_buf(),
        );
        let mut generic = bus.subscribe(&ChannelName::generic_triple());
        let mut scoped = bus.subscribe(&ChannelName::scoped_triple("s3"));

        gateway.start(&request(dir.path(), "hi")).await.unwrap();

        let mut generic_errors = Vec::new();
        loop {
            let delivery = next(&mut generic).await;
            match delivery.channel.kind() {
                ChannelKind::Error => generic_errors.push(delivery.payload),
                ChannelKind::Complete => break,
                ChannelKind::Output => {}
            }
        }
        let mut scoped_errors = Vec::new();
        loop {
            let delivery = next(&mut scoped).await;
            match delivery.channel.kind() {
                ChannelKind::Error => scoped_errors.push(delivery.payload),
                ChannelKind::Complete => break,
                ChannelKind::Output => {}
            }
        }
        assert_eq!(generic_errors, vec!["early"]);
        assert_eq!(scoped_errors, vec!["late"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cancel_kills_process() {
        let dir = tempfile::tempdir().unwrap();
        let bus = EventBus::new();
        let script = r#"echo '{"type":"system","subtype":"init","session_id":"s2"}'; sleep 30"#;
        let gateway = ProcessGateway::new(
            bus.clone(),
            "sh",
            vec!["-c".into(), script.into()],
            dir.path().to_path_buf(),
        );
        let mut scoped = bus.subscribe(&ChannelName::scoped_triple("s2"));

        gateway.start(&request(dir.path(), "hi")).await.unwrap();
        assert_eq!(next(&mut scoped).await.channel.kind(), ChannelKind::Output);

        let running = gateway.list_running().await.unwrap();
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].session_id, "s2");

        gateway.cancel(Some("s2")).await.unwrap();
        let delivery = next(&mut scoped).await;
        assert_eq!(delivery.channel.kind(), ChannelKind::Complete);
        assert!(delivery.payload.contains("\"success\":false"));
    }
}
