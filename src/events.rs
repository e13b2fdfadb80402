//! Typed event bus between the session and its host front-end.

use std::path::PathBuf;

use tokio::sync::mpsc;
use tracing::trace;

use crate::session::{DbgFlags, SessionState};

/// Internal debugger lifecycle events, consumed by the feature controllers
/// and forwarded to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebuggerEvent {
    ConnectedToProgram,
    ProgramStateChanged,
    ProgramExited,
    DebuggerExited,
    DebuggerBusy,
    DebuggerReady,
    ProgramRunning,
}

/// Everything the host can observe about a session.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    ShowMessage { text: String, duration_ms: u64 },
    GdbUserCommandStdout(String),
    GdbInternalCommandStdout(String),
    ApplicationStandardOutputLines(Vec<String>),
    ApplicationStandardErrorLines(Vec<String>),
    StateChanged(SessionState),
    GdbStateChanged { old: DbgFlags, new: DbgFlags },
    /// Current position moved; line is 0-based
    ShowStepInSource { file: PathBuf, line: usize, address: String },
    ShowStepInDisassemble { address: String },
    RaiseFramestackViews,
    RaiseGdbConsoleViews,
    Debugger(DebuggerEvent),
    Finished,
    Reset,
}

/// Sending half of the event bus. Sends never block; a host that has gone
/// away simply stops receiving.
#[derive(Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl EventSink {
    pub fn channel() -> (EventSink, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (EventSink { tx }, rx)
    }

    pub fn send(&self, event: SessionEvent) {
        trace!("event: {:?}", event);
        let _ = self.tx.send(event);
    }

    pub fn show_message(&self, text: impl Into<String>, duration_ms: u64) {
        self.send(SessionEvent::ShowMessage { text: text.into(), duration_ms });
    }
}
