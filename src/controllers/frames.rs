//! Frame stack model: tracks the selected thread and frame (the default
//! context for var/stack commands) and mirrors the backtrace on each stop.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_with::{DisplayFromStr, serde_as, skip_serializing_none};
use tracing::warn;

use crate::mi::MiValueExt;
use crate::mi::commands::{CommandKind, GdbCommand};

#[serde_as]
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackFrame {
    #[serde_as(as = "DisplayFromStr")]
    pub level: u32,
    #[serde(rename = "func")]
    pub function: String,
    pub file: Option<String>,
    pub fullname: Option<String>,
    #[serde_as(as = "Option<DisplayFromStr>")]
    pub line: Option<u32>,
    pub addr: Option<String>,
}

pub struct FrameStackModel {
    current_thread: i32,
    current_frame: i32,
    depth: Option<u32>,
    frames: Vec<StackFrame>,
}

impl Default for FrameStackModel {
    fn default() -> Self {
        FrameStackModel { current_thread: -1, current_frame: -1, depth: None, frames: Vec::new() }
    }
}

impl FrameStackModel {
    /// The thread context applied to var/stack commands; -1 until known.
    pub fn current_thread(&self) -> i32 {
        self.current_thread
    }

    pub fn current_frame(&self) -> i32 {
        self.current_frame
    }

    pub fn set_current_frame(&mut self, frame: i32) {
        self.current_frame = frame;
    }

    /// A stop selects the reporting thread and resets the frame to the top.
    pub fn notify_stopped(&mut self, results: &Value) {
        if let Ok(thread) = results.literal_field("thread-id").parse::<i32>() {
            self.current_thread = thread;
        }
        self.current_frame = 0;
    }

    pub fn depth(&self) -> Option<u32> {
        self.depth
    }

    pub fn frames(&self) -> &[StackFrame] {
        &self.frames
    }

    pub(crate) fn set_depth(&mut self, depth: u32) {
        self.depth = Some(depth);
    }

    pub(crate) fn load_frames(&mut self, stack: &Value) {
        let Value::Array(items) = stack else {
            warn!("stack field is not a list");
            return;
        };
        self.frames.clear();
        for item in items {
            match serde_json::from_value::<StackFrame>(item.clone()) {
                Ok(frame) => self.frames.push(frame),
                Err(e) => warn!("unparseable stack frame: {e}"),
            }
        }
    }
}

/// Queries re-issued whenever the program state changed. Subject to queue
/// rationalization: if execution moves before these run, they are dropped.
pub(crate) fn refresh_commands() -> Vec<GdbCommand> {
    vec![
        GdbCommand::new(CommandKind::StackInfoDepth, "").with_result_handler(|session, record| {
            if let Ok(depth) = record.results.literal_field("depth").parse::<u32>() {
                session.frames.set_depth(depth);
            }
        }),
        GdbCommand::new(CommandKind::StackListFrames, "").with_result_handler(|session, record| {
            if let Some(stack) = record.results.field("stack") {
                session.frames.load_frames(stack);
            }
        }),
    ]
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn stop_selects_thread_and_top_frame() {
        let mut model = FrameStackModel::default();
        assert_eq!(model.current_thread(), -1);
        model.set_current_frame(3);
        model.notify_stopped(&json!({"reason": "breakpoint-hit", "thread-id": "2"}));
        assert_eq!(model.current_thread(), 2);
        assert_eq!(model.current_frame(), 0);
    }

    #[test]
    fn frames_load_from_stack_list() {
        let mut model = FrameStackModel::default();
        model.load_frames(&json!([
            {"level": "0", "func": "worker", "fullname": "/src/m.c", "line": "10", "addr": "0x400500"},
            {"level": "1", "func": "main", "addr": "0x400410"},
        ]));
        assert_eq!(model.frames().len(), 2);
        assert_eq!(model.frames()[0].function, "worker");
        assert_eq!(model.frames()[0].line, Some(10));
        assert_eq!(model.frames()[1].line, None);
    }

    #[test]
    fn refresh_issues_depth_and_frame_queries() {
        let kinds: Vec<_> = refresh_commands().iter().map(|c| c.kind()).collect();
        assert_eq!(kinds, vec![CommandKind::StackInfoDepth, CommandKind::StackListFrames]);
    }
}
