//! Disassembly window: fetches instruction listings for an address range
//! and drives the disassembly-flavor toggle.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_with::skip_serializing_none;
use tracing::warn;

use crate::mi::MiValueExt;
use crate::mi::commands::{CommandKind, GdbCommand};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisassemblyFlavor {
    Att,
    Intel,
}

impl DisassemblyFlavor {
    fn gdb_name(self) -> &'static str {
        match self {
            DisassemblyFlavor::Att => "att",
            DisassemblyFlavor::Intel => "intel",
        }
    }
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisassemblyLine {
    pub address: String,
    #[serde(rename = "func-name")]
    pub func_name: Option<String>,
    pub offset: Option<String>,
    pub inst: String,
}

#[derive(Default)]
pub struct DisassemblyController {
    flavor: Option<DisassemblyFlavor>,
    window: Option<(String, String)>,
    lines: Vec<DisassemblyLine>,
}

impl DisassemblyController {
    pub fn flavor(&self) -> Option<DisassemblyFlavor> {
        self.flavor
    }

    pub fn window(&self) -> Option<(&str, &str)> {
        self.window.as_ref().map(|(s, e)| (s.as_str(), e.as_str()))
    }

    pub fn lines(&self) -> &[DisassemblyLine] {
        &self.lines
    }

    pub(crate) fn record_flavor(&mut self, value: &str) {
        self.flavor = match value {
            "att" => Some(DisassemblyFlavor::Att),
            "intel" => Some(DisassemblyFlavor::Intel),
            other => {
                warn!("unknown disassembly flavor reported: {other:?}");
                None
            }
        };
    }

    pub(crate) fn load(&mut self, window: (String, String), insns: &Value) {
        let Value::Array(items) = insns else {
            warn!("asm_insns field is not a list");
            return;
        };
        self.lines.clear();
        for item in items {
            match serde_json::from_value::<DisassemblyLine>(item.clone()) {
                Ok(line) => self.lines.push(line),
                Err(e) => warn!("unparseable disassembly line: {e}"),
            }
        }
        self.window = Some(window);
    }
}

/// Switch flavor, then read the setting back so the stored state reflects
/// what GDB actually accepted.
pub(crate) fn set_flavor_commands(flavor: DisassemblyFlavor) -> Vec<GdbCommand> {
    vec![
        GdbCommand::new(CommandKind::GdbSet, format!("disassembly-flavor {}", flavor.gdb_name())),
        GdbCommand::new(CommandKind::GdbShow, "disassembly-flavor").with_result_handler(
            |session, record| {
                let value = record.results.literal_field("value").to_string();
                session.disassembly.record_flavor(&value);
            },
        ),
    ]
}

/// Disassemble the given address window, instructions only.
pub(crate) fn disassemble_commands(start: String, end: String) -> Vec<GdbCommand> {
    let text = format!("-s {start} -e {end} -- 0");
    let window = (start, end);
    vec![GdbCommand::new(CommandKind::DataDisassemble, text).with_result_handler(
        move |session, record| {
            if let Some(insns) = record.results.field("asm_insns") {
                session.disassembly.load(window, insns);
            }
        },
    )]
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn loads_instruction_window() {
        let mut controller = DisassemblyController::default();
        controller.load(
            ("0x400500".to_string(), "0x400520".to_string()),
            &json!([
                {"address": "0x400500", "func-name": "main", "offset": "0", "inst": "push %rbp"},
                {"address": "0x400501", "func-name": "main", "offset": "1", "inst": "mov %rsp,%rbp"},
            ]),
        );
        assert_eq!(controller.lines().len(), 2);
        assert_eq!(controller.window(), Some(("0x400500", "0x400520")));
        assert_eq!(controller.lines()[1].inst, "mov %rsp,%rbp");
    }

    #[test]
    fn flavor_commands_set_then_read_back() {
        let cmds = set_flavor_commands(DisassemblyFlavor::Intel);
        assert_eq!(cmds[0].initial_string(), "-gdb-set disassembly-flavor intel");
        assert_eq!(cmds[1].initial_string(), "-gdb-show disassembly-flavor");

        let mut controller = DisassemblyController::default();
        controller.record_flavor("intel");
        assert_eq!(controller.flavor(), Some(DisassemblyFlavor::Intel));
    }
}
