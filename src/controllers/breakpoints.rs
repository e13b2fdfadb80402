//! Breakpoint bookkeeping: the table mirrored from GDB's own breakpoint
//! list via `=breakpoint-*` notifications, plus the pending locations sent
//! in a batch right before the program starts.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_with::{DisplayFromStr, serde_as, skip_serializing_none};
use tracing::{debug, warn};

use crate::mi::MiValueExt;
use crate::mi::commands::{CommandKind, GdbCommand};

/// GDB breakpoint number, `major` or `major.minor` for multi-location
/// breakpoints.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct BreakpointNumber {
    pub major: usize,
    pub minor: Option<usize>,
}

impl std::str::FromStr for BreakpointNumber {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some((major, minor)) = s.split_once('.') {
            Ok(BreakpointNumber {
                major: major.parse::<usize>().map_err(|e| e.to_string())?,
                minor: Some(minor.parse::<usize>().map_err(|e| e.to_string())?),
            })
        } else {
            Ok(BreakpointNumber { major: s.parse::<usize>().map_err(|e| e.to_string())?, minor: None })
        }
    }
}

impl fmt::Display for BreakpointNumber {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if let Some(minor) = self.minor {
            write!(f, "{}.{}", self.major, minor)
        } else {
            write!(f, "{}", self.major)
        }
    }
}

/// `enabled="y"` / `enabled="n"`
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Enabled(pub bool);

impl<'de> Deserialize<'de> for Enabled {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s: String = serde::Deserialize::deserialize(deserializer)?;
        Ok(Enabled(s == "y"))
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SrcPosition {
    pub fullname: PathBuf,
    #[serde_as(as = "DisplayFromStr")]
    pub line: usize,
}

#[serde_as]
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Breakpoint {
    #[serde_as(as = "DisplayFromStr")]
    pub number: BreakpointNumber,
    /// May be `<PENDING>` or `<MULTIPLE>`, so not numeric
    pub addr: Option<String>,
    pub enabled: Enabled,
    #[serde(flatten)]
    pub src_pos: Option<SrcPosition>, // absent without debug information
    pub r#type: String,
    #[serde(rename = "disp")]
    pub display: String,
}

#[derive(Default)]
pub struct BreakpointController {
    table: HashMap<BreakpointNumber, Breakpoint>,
    pending: Vec<String>,
    delete_duplicates: bool,
}

impl BreakpointController {
    /// Remember a location to insert once the debugger is ready for
    /// breakpoints (dispatched by the run sentinel).
    pub fn ensure_pending(&mut self, location: &str) {
        if !self.pending.iter().any(|l| l == location) {
            self.pending.push(location.to_string());
        }
    }

    /// Commands inserting all pending breakpoints. Results land in the table
    /// through the usual `=breakpoint-created` notification as well; the
    /// handler covers GDB versions that only answer with `bkpt=`.
    pub fn init_send_breakpoints(&mut self) -> Vec<GdbCommand> {
        self.pending
            .drain(..)
            .map(|location| {
                GdbCommand::new(CommandKind::BreakInsert, location).with_result_handler(
                    |session, record| {
                        if let Some(bkpt) = record.results.field("bkpt") {
                            session.breakpoints.insert_from_value(bkpt);
                        }
                    },
                )
            })
            .collect()
    }

    /// While a user gdb script is being sourced, breakpoints it creates may
    /// repeat ones already in the table; those duplicates are deleted again.
    pub fn set_delete_duplicate_breakpoints(&mut self, enabled: bool) {
        self.delete_duplicates = enabled;
    }

    pub fn notify_created(&mut self, results: &Value) -> Vec<GdbCommand> {
        let Some(bkpt) = results.field("bkpt") else {
            return Vec::new();
        };
        let parsed: Breakpoint = match serde_json::from_value(bkpt.clone()) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!("unparseable breakpoint notification: {e}");
                return Vec::new();
            }
        };
        if self.delete_duplicates {
            if let Some(duplicate_of) = self.find_duplicate(&parsed) {
                debug!("deleting duplicate of breakpoint {duplicate_of}: {}", parsed.number);
                return vec![GdbCommand::new(CommandKind::BreakDelete, parsed.number.to_string())];
            }
        }
        self.table.insert(parsed.number, parsed);
        Vec::new()
    }

    pub fn notify_modified(&mut self, results: &Value) {
        if let Some(bkpt) = results.field("bkpt") {
            self.insert_from_value(bkpt);
        }
    }

    pub fn notify_deleted(&mut self, results: &Value) {
        let id = results.literal_field("id");
        let Ok(number) = id.parse::<BreakpointNumber>() else {
            warn!("breakpoint-deleted with unusable id {id:?}");
            return;
        };
        self.table.remove(&number);
        if number.minor.is_none() {
            // deleting a parent takes its sub-breakpoints with it
            self.table.retain(|n, _| n.major != number.major);
        }
    }

    pub(crate) fn insert_from_value(&mut self, bkpt: &Value) {
        match serde_json::from_value::<Breakpoint>(bkpt.clone()) {
            Ok(parsed) => {
                self.table.insert(parsed.number, parsed);
            }
            Err(e) => warn!("unparseable breakpoint record: {e}"),
        }
    }

    fn find_duplicate(&self, candidate: &Breakpoint) -> Option<BreakpointNumber> {
        let pos = candidate.src_pos.as_ref()?;
        self.table
            .values()
            .find(|existing| {
                existing.number != candidate.number
                    && existing
                        .src_pos
                        .as_ref()
                        .is_some_and(|e| e.fullname == pos.fullname && e.line == pos.line)
            })
            .map(|existing| existing.number)
    }

    pub fn get(&self, number: BreakpointNumber) -> Option<&Breakpoint> {
        self.table.get(&number)
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    fn bkpt_notification(number: &str, file: &str, line: &str) -> Value {
        json!({
            "bkpt": {
                "number": number,
                "type": "breakpoint",
                "disp": "keep",
                "enabled": "y",
                "addr": "0x0000000000400500",
                "fullname": file,
                "line": line,
            }
        })
    }

    #[test]
    fn created_notification_populates_table() {
        let mut controller = BreakpointController::default();
        let cmds = controller.notify_created(&bkpt_notification("1", "/src/m.c", "10"));
        assert!(cmds.is_empty());
        let number = "1".parse().unwrap();
        let bkpt = controller.get(number).expect("breakpoint stored");
        assert!(bkpt.enabled.0);
        assert_eq!(bkpt.src_pos.as_ref().unwrap().line, 10);
    }

    #[test]
    fn deleted_notification_removes_parent_and_children() {
        let mut controller = BreakpointController::default();
        controller.notify_created(&bkpt_notification("2", "/src/m.c", "10"));
        controller.notify_created(&bkpt_notification("2.1", "/src/m.c", "10"));
        controller.notify_deleted(&json!({"id": "2"}));
        assert!(controller.is_empty());
    }

    #[test]
    fn duplicate_breakpoints_deleted_while_sourcing_scripts() {
        let mut controller = BreakpointController::default();
        controller.notify_created(&bkpt_notification("1", "/src/m.c", "10"));
        controller.set_delete_duplicate_breakpoints(true);
        let cmds = controller.notify_created(&bkpt_notification("5", "/src/m.c", "10"));
        assert_eq!(cmds.len(), 1);
        assert_eq!(cmds[0].kind(), CommandKind::BreakDelete);
        assert_eq!(cmds[0].initial_string(), "-break-delete 5");
        assert_eq!(controller.len(), 1);
    }

    #[test]
    fn pending_locations_flushed_once() {
        let mut controller = BreakpointController::default();
        controller.ensure_pending("main");
        controller.ensure_pending("main");
        let cmds = controller.init_send_breakpoints();
        assert_eq!(cmds.len(), 1);
        assert_eq!(cmds[0].initial_string(), "-break-insert main");
        assert_eq!(controller.pending_count(), 0);
    }

    #[test]
    fn pending_addr_is_tolerated() {
        let bkpt: Breakpoint = serde_json::from_value(json!({
            "number": "3",
            "type": "breakpoint",
            "disp": "del",
            "enabled": "n",
            "addr": "<PENDING>",
        }))
        .unwrap();
        assert_eq!(bkpt.addr.as_deref(), Some("<PENDING>"));
        assert!(bkpt.src_pos.is_none());
        assert!(!bkpt.enabled.0);
    }
}
