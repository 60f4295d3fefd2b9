//! Local Python runner.
//!
//! Every run starts a fresh interpreter with the embedded driver script
//! (`python -u -c <driver>`). The job goes to the child's stdin as the first
//! line; frames come back on stdout; input replies follow the job on stdin.
//! Anything the child writes to stderr is logged and kept for diagnostics.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;

use super::protocol::{DriverFrame, InputReply};
use super::{CodeRunner, RunHandle, RunJob};
use crate::config::InterpreterConfig;
use crate::errors::EngineError;

const DRIVER_SOURCE: &str = include_str!("driver.py");

/// Bytes of stderr kept for error messages.
const STDERR_TAIL: usize = 4096;

pub struct LocalPythonRunner {
    program: PathBuf,
    config: InterpreterConfig,
}

impl LocalPythonRunner {
    /// Resolve the configured interpreter on `PATH`.
    pub fn new(config: InterpreterConfig) -> Result<Self, EngineError> {
        let program = which::which(&config.command).map_err(|e| {
            EngineError::Launch(format!("Interpreter '{}' not found: {}", config.command, e))
        })?;
        log::debug!("Using interpreter {}", program.display());
        Ok(Self { program, config })
    }
}

enum RunDir {
    Scratch(TempDir),
    Shared(PathBuf),
}

impl RunDir {
    fn path(&self) -> &Path {
        match self {
            RunDir::Scratch(dir) => dir.path(),
            RunDir::Shared(path) => path,
        }
    }
}

#[async_trait]
impl CodeRunner for LocalPythonRunner {
    async fn launch(&self, job: &RunJob) -> Result<Box<dyn RunHandle>, EngineError> {
        let dir = match &self.config.working_dir {
            Some(path) => RunDir::Shared(path.clone()),
            None => RunDir::Scratch(tempfile::Builder::new().prefix("codedash-run-").tempdir()?),
        };

        let mut child = Command::new(&self.program)
            .args(&self.config.args)
            .arg("-c")
            .arg(DRIVER_SOURCE)
            .current_dir(dir.path())
            .envs(&self.config.env)
            .env("PYTHONIOENCODING", "utf-8")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                EngineError::Launch(format!("Failed to start {}: {}", self.program.display(), e))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| EngineError::Launch("Interpreter stdin is not piped".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| EngineError::Launch("Interpreter stdout is not piped".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| EngineError::Launch("Interpreter stderr is not piped".to_string()))?;

        let pid = child.id().unwrap_or_default();
        let stderr_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            let mut tail = String::new();
            while let Ok(Some(line)) = lines.next_line().await {
                log::debug!("[python {}] {}", pid, line);
                tail.push_str(&line);
                tail.push('\n');
                if tail.len() > STDERR_TAIL {
                    let cut = tail.len() - STDERR_TAIL;
                    let cut = (cut..tail.len()).find(|i| tail.is_char_boundary(*i)).unwrap_or(0);
                    tail.drain(..cut);
                }
            }
            tail
        });

        let mut handle = PythonRunHandle {
            child,
            stdin,
            frames: BufReader::new(stdout).lines(),
            stderr: Some(stderr_task),
            _dir: dir,
        };
        handle.write_line(&serde_json::to_string(job)?).await?;
        log::debug!("Started interpreter {} for a {:?} run", pid, job.mode);
        Ok(Box::new(handle))
    }
}

struct PythonRunHandle {
    child: Child,
    stdin: ChildStdin,
    frames: Lines<BufReader<ChildStdout>>,
    stderr: Option<JoinHandle<String>>,
    _dir: RunDir,
}

impl PythonRunHandle {
    async fn write_line(&mut self, line: &str) -> Result<(), EngineError> {
        self.stdin.write_all(line.as_bytes()).await?;
        self.stdin.write_all(b"\n").await?;
        self.stdin.flush().await?;
        Ok(())
    }

    async fn exit_report(&mut self) -> String {
        let status = match self.child.wait().await {
            Ok(status) => status.to_string(),
            Err(e) => format!("unknown status ({})", e),
        };
        let stderr = match self.stderr.take() {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };
        if stderr.trim().is_empty() {
            format!("interpreter exited with {}", status)
        } else {
            format!("interpreter exited with {}: {}", status, stderr.trim_end())
        }
    }
}

#[async_trait]
impl RunHandle for PythonRunHandle {
    async fn next_frame(&mut self) -> Result<Option<DriverFrame>, EngineError> {
        loop {
            match self.frames.next_line().await? {
                Some(line) if line.trim().is_empty() => continue,
                Some(line) => {
                    return serde_json::from_str(&line).map(Some).map_err(|e| {
                        EngineError::Protocol(format!("Malformed driver frame {:?}: {}", line, e))
                    });
                }
                None => {
                    let report = self.exit_report().await;
                    return Err(EngineError::Protocol(format!(
                        "No result before the {}",
                        report
                    )));
                }
            }
        }
    }

    async fn reply(&mut self, value: &str) -> Result<(), EngineError> {
        let line = serde_json::to_string(&InputReply { value })?;
        self.write_line(&line).await
    }

    async fn kill(&mut self) {
        if let Ok(Some(_)) = self.child.try_wait() {
            return;
        }
        if let Err(e) = self.child.kill().await {
            log::warn!("Failed to stop interpreter: {}", e);
        }
    }
}
