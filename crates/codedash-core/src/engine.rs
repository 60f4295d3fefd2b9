//! Execution engine
//!
//! The engine accepts one submission per session at a time, prepares it
//! (normalize, classify, rewrite if interactive), launches it through the
//! configured [`CodeRunner`] and turns the driver's frames into routed output,
//! input requests and finally an [`ExecutionResult`].
//!
//! Run states follow `Idle -> Compiling -> Running -> Idle`, with
//! `Running <-> AwaitingInput` while an interactive run waits for the client.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use crate::classifier::classify;
use crate::config::CodedashConfig;
use crate::core_types::{Bindings, EngineEvent, ExecutionResult, OutputEvent};
use crate::errors::EngineError;
use crate::executors::{CodeRunner, DriverFrame, LocalPythonRunner, RunHandle, RunJob};
use crate::normalizer::normalize;
use crate::rewriter::rewrite;
use crate::router::{RunGuard, RunState, SessionId, SessionRouter};
use crate::suggestions::{suggestion_for, ErrorKind};

/// How a run ended, before output and timing are attached.
#[derive(Debug)]
enum RunOutcome {
    Completed {
        bindings: Bindings,
    },
    Failed {
        error_type: String,
        message: String,
        line: Option<u32>,
        traceback: Option<String>,
    },
}

pub struct ExecutionEngine {
    router: Arc<SessionRouter>,
    runner: Arc<dyn CodeRunner>,
    run_timeout: Option<Duration>,
}

impl ExecutionEngine {
    pub fn new(runner: Arc<dyn CodeRunner>) -> Self {
        Self {
            router: Arc::new(SessionRouter::new()),
            runner,
            run_timeout: None,
        }
    }

    /// Engine backed by a local interpreter, as described by `config`.
    pub fn from_config(config: &CodedashConfig) -> Result<Self, EngineError> {
        let runner = LocalPythonRunner::new(config.interpreter.clone())?;
        Ok(Self::new(Arc::new(runner)).with_run_timeout(config.execution.run_timeout()))
    }

    pub fn with_run_timeout(mut self, run_timeout: Option<Duration>) -> Self {
        self.run_timeout = run_timeout;
        self
    }

    pub fn router(&self) -> &Arc<SessionRouter> {
        &self.router
    }

    /// Register a session. Live events of its interactive runs are sent to `events`.
    pub fn open_session(&self, events: mpsc::UnboundedSender<EngineEvent>) -> SessionId {
        let session = self.router.open(events);
        log::info!("Session {} opened", session);
        session
    }

    /// Destroy a session, cancelling its run if one is in flight.
    pub fn close_session(&self, session: SessionId) -> bool {
        let closed = self.router.close(session);
        if closed {
            log::info!("Session {} closed", session);
        }
        closed
    }

    pub fn state(&self, session: SessionId) -> Option<RunState> {
        self.router.state(session)
    }

    /// Deliver input to a run waiting for it. Dropped when nothing is waiting.
    pub fn supply_input(&self, session: SessionId, value: impl Into<String>) -> bool {
        self.router.deliver_input(session, value.into())
    }

    pub async fn execute(&self, session: SessionId, raw: &str) -> Result<ExecutionResult, EngineError> {
        let accepted = Instant::now();
        let mut guard = self.router.begin_run(session).map_err(|e| {
            log::warn!("Rejected submission for session {}: {}", session, e);
            e
        })?;

        let code = normalize(raw);
        let interactivity = classify(&code);
        let job = if interactivity.is_interactive() {
            let program = rewrite(&code);
            if !program.promoted.is_empty() {
                log::debug!("Promoted to coroutines: {}", program.promoted.join(", "));
            }
            RunJob::interactive(&code, program)
        } else {
            RunJob::direct(&code)
        };
        log::info!(
            "Session {} starting {:?} run ({} lines, input: {}, unbounded loop: {})",
            session,
            job.mode,
            code.as_str().lines().count(),
            interactivity.reads_input,
            interactivity.loops_forever
        );

        let outcome = match self.run_timeout {
            Some(limit) => match tokio::time::timeout(limit, self.run(&mut guard, &job)).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    log::warn!("Session {} run exceeded {:?}", session, limit);
                    Err(EngineError::Timeout(limit))
                }
            },
            None => self.run(&mut guard, &job).await,
        };

        let output = guard.finish();
        let duration = accepted.elapsed();
        let outcome = outcome.map_err(|e| {
            log::warn!("Session {} run aborted: {}", session, e);
            e
        })?;

        let result = match outcome {
            RunOutcome::Completed { bindings } => ExecutionResult::Success {
                output,
                duration,
                interactive: job.is_interactive(),
                bindings,
            },
            RunOutcome::Failed {
                error_type,
                message,
                line,
                traceback,
            } => {
                let error_kind = ErrorKind::from_exception(&error_type);
                ExecutionResult::Failure {
                    suggestion: suggestion_for(&error_kind, &message),
                    error_type,
                    error_kind,
                    message,
                    line,
                    traceback,
                    output,
                    duration,
                }
            }
        };
        log::info!(
            "Session {} finished in {:.3}s: {}",
            session,
            duration.as_secs_f64(),
            match &result {
                ExecutionResult::Failure { error_type, .. } => error_type.as_str(),
                ExecutionResult::Success { .. } => "success",
            }
        );
        Ok(result)
    }

    async fn run(&self, guard: &mut RunGuard, job: &RunJob) -> Result<RunOutcome, EngineError> {
        let mut handle = self.runner.launch(job).await?;
        let outcome = pump(guard, handle.as_mut(), job).await;
        handle.kill().await;
        outcome
    }
}

/// Route frames until the driver reports a terminal one.
async fn pump(guard: &mut RunGuard, handle: &mut dyn RunHandle, job: &RunJob) -> Result<RunOutcome, EngineError> {
    loop {
        let frame = tokio::select! {
            frame = handle.next_frame() => frame?,
            _ = guard.cancelled() => {
                return Err(EngineError::Cancelled(format!("session {} was closed", guard.session())));
            }
        };
        let Some(frame) = frame else {
            return Err(EngineError::Protocol(
                "Interpreter exited without reporting a result".to_string(),
            ));
        };

        match frame {
            DriverFrame::Compiled => {
                guard.set_state(RunState::Running);
                if job.is_interactive() {
                    guard.go_live();
                }
            }
            DriverFrame::Output { stream, content } => {
                guard.route_output(OutputEvent { stream, content });
            }
            DriverFrame::InputRequest { prompt } => {
                if !job.is_interactive() {
                    return Err(EngineError::Protocol(
                        "Input requested by a non-interactive run".to_string(),
                    ));
                }
                let waiter = guard.await_input(prompt)?;
                let value = tokio::select! {
                    value = waiter => value.map_err(|_| {
                        EngineError::Cancelled("input request was abandoned".to_string())
                    })?,
                    _ = guard.cancelled() => {
                        return Err(EngineError::Cancelled(format!("session {} was closed", guard.session())));
                    }
                };
                guard.set_state(RunState::Running);
                handle.reply(&value).await?;
            }
            DriverFrame::SyntaxError {
                error_type,
                message,
                line,
            } => {
                return Ok(RunOutcome::Failed {
                    error_type,
                    message,
                    line,
                    traceback: None,
                });
            }
            DriverFrame::Completed { bindings } => return Ok(RunOutcome::Completed { bindings }),
            DriverFrame::Raised {
                error_type,
                message,
                traceback,
                line,
            } => {
                return Ok(RunOutcome::Failed {
                    error_type,
                    message,
                    line,
                    traceback: (!traceback.is_empty()).then_some(traceback),
                });
            }
        }
    }
}
