//! Driver core for a GDB/MI debugger subprocess.
//!
//! The [`session::Session`] owns the GDB child, serializes a queue of MI
//! commands to it, parses the records streaming back, derives the session
//! state machine and fans notifications out to the breakpoint, variable,
//! frame-stack and disassembly controllers. A front-end talks to it through
//! a [`session::SessionHandle`] and observes it on the
//! [`events::SessionEvent`] bus.

pub mod config;
pub mod controllers;
pub mod driver;
pub mod error;
pub mod events;
pub mod mi;
pub mod process;
pub mod pty;
pub mod queue;
pub mod session;

pub use config::{GdbConfig, LaunchConfig, SessionContext, StartWith};
pub use error::{AppError, AppResult};
pub use events::{DebuggerEvent, EventSink, SessionEvent};
pub use session::{DbgFlags, Session, SessionHandle, SessionOp, SessionState};
