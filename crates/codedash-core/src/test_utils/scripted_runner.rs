// src/test_utils/scripted_runner.rs
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::errors::EngineError;
use crate::executors::{CodeRunner, DriverFrame, RunHandle, RunJob};

#[derive(Debug, Clone)]
pub enum Step {
    Frame(DriverFrame),
    /// Never produce another frame.
    Hang,
}

/// Replays the same script for every launch and records what the engine sent.
pub struct ScriptedRunner {
    script: Vec<Step>,
    jobs: Mutex<Vec<RunJob>>,
    replies: Arc<Mutex<Vec<String>>>,
    killed: Arc<AtomicBool>,
}

impl ScriptedRunner {
    pub fn new(script: Vec<Step>) -> Self {
        Self {
            script,
            jobs: Mutex::new(Vec::new()),
            replies: Arc::new(Mutex::new(Vec::new())),
            killed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn jobs(&self) -> Vec<RunJob> {
        self.jobs.lock().unwrap().clone()
    }

    pub fn replies(&self) -> Vec<String> {
        self.replies.lock().unwrap().clone()
    }

    pub fn killed(&self) -> bool {
        self.killed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CodeRunner for ScriptedRunner {
    async fn launch(&self, job: &RunJob) -> Result<Box<dyn RunHandle>, EngineError> {
        log::debug!("Scripted runner launched a {:?} job", job.mode);
        self.jobs.lock().unwrap().push(job.clone());
        Ok(Box::new(ScriptedHandle {
            steps: VecDeque::from(self.script.clone()),
            replies: Arc::clone(&self.replies),
            killed: Arc::clone(&self.killed),
        }))
    }
}

struct ScriptedHandle {
    steps: VecDeque<Step>,
    replies: Arc<Mutex<Vec<String>>>,
    killed: Arc<AtomicBool>,
}

#[async_trait]
impl RunHandle for ScriptedHandle {
    async fn next_frame(&mut self) -> Result<Option<DriverFrame>, EngineError> {
        match self.steps.pop_front() {
            Some(Step::Frame(frame)) => Ok(Some(frame)),
            Some(Step::Hang) => std::future::pending().await,
            None => Ok(None),
        }
    }

    async fn reply(&mut self, value: &str) -> Result<(), EngineError> {
        self.replies.lock().unwrap().push(value.to_string());
        Ok(())
    }

    async fn kill(&mut self) {
        self.killed.store(true, Ordering::SeqCst);
    }
}

/// A runner whose interpreter can never be started.
pub struct FailingRunner;

#[async_trait]
impl CodeRunner for FailingRunner {
    async fn launch(&self, _job: &RunJob) -> Result<Box<dyn RunHandle>, EngineError> {
        Err(EngineError::Launch("no interpreter available".to_string()))
    }
}
