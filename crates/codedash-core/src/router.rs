//! Session and output routing
//!
//! The router owns the per-session state a run needs to talk to its client:
//! the active output sink and the outstanding input waiter. Runs acquire the
//! session through [`SessionRouter::begin_run`]; the returned [`RunGuard`]
//! releases everything when it is finished or dropped, so a failed or
//! cancelled run can never leave a sink or waiter behind.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::core_types::{EngineEvent, OutputEvent};
use crate::errors::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Compiling,
    Running,
    AwaitingInput,
}

#[derive(Debug)]
enum OutputSink {
    /// Collects output until the run completes.
    Buffered(String),
    /// Collects output and forwards each event to the session as it arrives.
    Live(String),
}

impl OutputSink {
    fn buffer_mut(&mut self) -> &mut String {
        match self {
            OutputSink::Buffered(buffer) | OutputSink::Live(buffer) => buffer,
        }
    }

    fn into_buffer(self) -> String {
        match self {
            OutputSink::Buffered(buffer) | OutputSink::Live(buffer) => buffer,
        }
    }
}

struct InputWaiter {
    prompt: String,
    sender: oneshot::Sender<String>,
}

struct SessionSlot {
    events: mpsc::UnboundedSender<EngineEvent>,
    state: RunState,
    sink: Option<OutputSink>,
    waiter: Option<InputWaiter>,
    interactive: bool,
    /// Held while a run owns the session; dropping it tells the run to stop.
    cancel: Option<oneshot::Sender<()>>,
}

impl SessionSlot {
    fn new(events: mpsc::UnboundedSender<EngineEvent>) -> Self {
        Self {
            events,
            state: RunState::Idle,
            sink: None,
            waiter: None,
            interactive: false,
            cancel: None,
        }
    }

    fn forward(&self, session: SessionId, event: EngineEvent) {
        if self.events.send(event).is_err() {
            log::debug!("Event channel for session {} is closed", session);
        }
    }

    fn release(&mut self) -> String {
        let output = self.sink.take().map(OutputSink::into_buffer).unwrap_or_default();
        self.waiter = None;
        self.cancel = None;
        self.interactive = false;
        self.state = RunState::Idle;
        output
    }
}

#[derive(Default)]
pub struct SessionRouter {
    sessions: Mutex<HashMap<SessionId, SessionSlot>>,
}

impl SessionRouter {
    pub fn new() -> Self {
        Self::default()
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<SessionId, SessionSlot>> {
        self.sessions.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a session whose live events go to `events`.
    pub fn open(&self, events: mpsc::UnboundedSender<EngineEvent>) -> SessionId {
        let session = SessionId::new();
        self.slots().insert(session, SessionSlot::new(events));
        log::debug!("Opened session {}", session);
        session
    }

    /// Remove a session. An outstanding waiter is dropped and an active run is
    /// signalled to stop.
    pub fn close(&self, session: SessionId) -> bool {
        let removed = self.slots().remove(&session);
        match removed {
            Some(slot) => {
                if slot.cancel.is_some() {
                    log::info!("Closing session {} with a run in progress", session);
                }
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, session: SessionId) -> bool {
        self.slots().contains_key(&session)
    }

    pub fn session_count(&self) -> usize {
        self.slots().len()
    }

    pub fn state(&self, session: SessionId) -> Option<RunState> {
        self.slots().get(&session).map(|slot| slot.state)
    }

    pub fn is_interactive(&self, session: SessionId) -> Option<bool> {
        self.slots().get(&session).map(|slot| slot.interactive)
    }

    pub fn pending_prompt(&self, session: SessionId) -> Option<String> {
        self.slots()
            .get(&session)
            .and_then(|slot| slot.waiter.as_ref().map(|waiter| waiter.prompt.clone()))
    }

    /// Claim the session for a run. The run starts compiling with a buffering sink.
    pub fn begin_run(self: &Arc<Self>, session: SessionId) -> Result<RunGuard, EngineError> {
        let mut slots = self.slots();
        let slot = slots
            .get_mut(&session)
            .ok_or(EngineError::UnknownSession(session))?;
        if slot.cancel.is_some() {
            return Err(EngineError::SessionBusy(session));
        }

        let (cancel, cancelled) = oneshot::channel();
        slot.cancel = Some(cancel);
        slot.sink = Some(OutputSink::Buffered(String::new()));
        slot.waiter = None;
        slot.interactive = false;
        slot.state = RunState::Compiling;

        Ok(RunGuard {
            router: Arc::clone(self),
            session,
            cancelled,
            released: false,
        })
    }

    /// Append an event to the session's active sink. Without a sink the event is dropped.
    pub fn route_output(&self, session: SessionId, event: OutputEvent) {
        let mut slots = self.slots();
        let Some(slot) = slots.get_mut(&session) else {
            log::debug!("Dropping output for unknown session {}", session);
            return;
        };
        let live = match slot.sink.as_mut() {
            Some(sink) => {
                sink.buffer_mut().push_str(&event.content);
                matches!(sink, OutputSink::Live(_))
            }
            None => {
                log::debug!("Dropping output for idle session {}", session);
                return;
            }
        };
        if live {
            slot.forward(session, EngineEvent::Output(event));
        }
    }

    /// Resolve the outstanding input waiter. Input that arrives while nothing
    /// is waiting is dropped, never queued.
    pub fn deliver_input(&self, session: SessionId, value: String) -> bool {
        let mut slots = self.slots();
        let Some(slot) = slots.get_mut(&session) else {
            log::debug!("Dropping input for unknown session {}", session);
            return false;
        };
        let Some(waiter) = slot.waiter.take() else {
            log::debug!("Dropping input for session {}: no input requested", session);
            return false;
        };
        if waiter.sender.send(value).is_err() {
            log::warn!("Failed to deliver input for session {}", session);
            return false;
        }
        slot.state = RunState::Running;
        true
    }

    fn set_state(&self, session: SessionId, state: RunState) {
        if let Some(slot) = self.slots().get_mut(&session) {
            slot.state = state;
        }
    }

    fn go_live(&self, session: SessionId) {
        if let Some(slot) = self.slots().get_mut(&session) {
            slot.interactive = true;
            slot.sink = Some(OutputSink::Live(
                slot.sink.take().map(OutputSink::into_buffer).unwrap_or_default(),
            ));
        }
    }

    fn await_input(&self, session: SessionId, prompt: String) -> Result<oneshot::Receiver<String>, EngineError> {
        let mut slots = self.slots();
        let slot = slots
            .get_mut(&session)
            .ok_or_else(|| EngineError::Cancelled(format!("session {} was closed", session)))?;
        let (sender, receiver) = oneshot::channel();
        if slot.waiter.is_some() {
            log::warn!("Replacing an unanswered input request for session {}", session);
        }
        slot.waiter = Some(InputWaiter {
            prompt: prompt.clone(),
            sender,
        });
        slot.state = RunState::AwaitingInput;
        slot.forward(session, EngineEvent::InputRequested { prompt });
        Ok(receiver)
    }

    fn release(&self, session: SessionId) -> String {
        match self.slots().get_mut(&session) {
            Some(slot) => slot.release(),
            None => String::new(),
        }
    }
}

/// Exclusive claim on a session for the duration of one run.
pub struct RunGuard {
    router: Arc<SessionRouter>,
    session: SessionId,
    cancelled: oneshot::Receiver<()>,
    released: bool,
}

impl RunGuard {
    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn set_state(&self, state: RunState) {
        self.router.set_state(self.session, state);
    }

    /// Switch to a forwarding sink for an interactive run.
    pub fn go_live(&self) {
        self.router.go_live(self.session);
    }

    pub fn route_output(&self, event: OutputEvent) {
        self.router.route_output(self.session, event);
    }

    /// Install an input waiter and tell the session what is being asked.
    pub fn await_input(&self, prompt: impl Into<String>) -> Result<oneshot::Receiver<String>, EngineError> {
        self.router.await_input(self.session, prompt.into())
    }

    /// Resolves once the session is closed underneath the run.
    pub fn cancelled(&mut self) -> &mut oneshot::Receiver<()> {
        &mut self.cancelled
    }

    /// Release the session and return everything the run's sink collected.
    pub fn finish(mut self) -> String {
        self.released = true;
        self.router.release(self.session)
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if !self.released {
            self.router.release(self.session);
        }
    }
}
