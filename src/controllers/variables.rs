//! Variable objects: watches created with `var-create` and refreshed with
//! `var-update` on every program-state change.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_with::skip_serializing_none;
use tracing::warn;

use crate::events::SessionEvent;
use crate::mi::MiValueExt;
use crate::mi::commands::{CommandKind, GdbCommand};

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Variable {
    /// GDB's variable-object name (e.g. `var1`)
    pub name: String,
    pub r#type: Option<String>,
    pub value: Option<String>,
    /// The watched expression; not part of the MI record
    #[serde(default, skip_deserializing)]
    pub expression: Option<String>,
    #[serde(default)]
    pub in_scope: bool,
}

#[derive(Default)]
pub struct VariableController {
    watches: HashMap<String, Variable>,
}

impl VariableController {
    pub fn watches(&self) -> impl Iterator<Item = &Variable> {
        self.watches.values()
    }

    pub fn watch_count(&self) -> usize {
        self.watches.len()
    }

    pub(crate) fn insert_watch(&mut self, mut variable: Variable, expression: String) {
        variable.expression = Some(expression);
        variable.in_scope = true;
        self.watches.insert(variable.name.clone(), variable);
    }

    /// Apply a `var-update` changelist.
    pub fn apply_update(&mut self, results: &Value) {
        let Some(Value::Array(changes)) = results.field("changelist") else {
            return;
        };
        for change in changes {
            let name = change.literal_field("name");
            let Some(watch) = self.watches.get_mut(name) else {
                continue;
            };
            if change.literal_field("in_scope") == "false" {
                watch.in_scope = false;
                watch.value = None;
            } else {
                watch.in_scope = true;
                if change.has_field("value") {
                    watch.value = Some(change.literal_field("value").to_string());
                }
            }
        }
    }
}

/// Refresh issued on program-state change; dropped by rationalization when
/// execution moves first.
pub(crate) fn update_commands() -> Vec<GdbCommand> {
    vec![GdbCommand::new(CommandKind::VarUpdate, "--all-values *").with_result_handler(
        |session, record| session.variables.apply_update(&record.results),
    )]
}

/// `var-create` for a new watch; the result carries the assigned varobj
/// name, initial value and type.
pub(crate) fn create_watch_command(expression: String) -> GdbCommand {
    let text = format!("- * \"{}\"", expression.replace('"', "\\\""));
    GdbCommand::new(CommandKind::VarCreate, text).with_result_handler(move |session, record| {
        match serde_json::from_value::<Variable>(record.results.clone()) {
            Ok(variable) => session.variables.insert_watch(variable, expression),
            Err(e) => warn!("unparseable var-create result: {e}"),
        }
    })
}

/// One-shot expression evaluation, reported back through the message sink.
pub(crate) fn evaluate_command(expression: String) -> GdbCommand {
    let text = format!("\"{}\"", expression.replace('"', "\\\""));
    GdbCommand::new(CommandKind::DataEvaluateExpression, text).with_result_handler(
        move |session, record| {
            let value = record.results.literal_field("value");
            session
                .events
                .send(SessionEvent::ShowMessage {
                    text: format!("{expression} = {value}"),
                    duration_ms: 3000,
                });
        },
    )
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    fn watched(controller: &mut VariableController, name: &str, expr: &str, value: &str) {
        controller.insert_watch(
            Variable {
                name: name.to_string(),
                r#type: Some("int".to_string()),
                value: Some(value.to_string()),
                expression: None,
                in_scope: true,
            },
            expr.to_string(),
        );
    }

    #[test]
    fn update_changes_values() {
        let mut controller = VariableController::default();
        watched(&mut controller, "var1", "count", "1");
        controller.apply_update(&json!({
            "changelist": [{"name": "var1", "value": "2", "in_scope": "true", "type_changed": "false"}]
        }));
        let watch = controller.watches().next().unwrap();
        assert_eq!(watch.value.as_deref(), Some("2"));
        assert!(watch.in_scope);
    }

    #[test]
    fn update_marks_out_of_scope() {
        let mut controller = VariableController::default();
        watched(&mut controller, "var1", "count", "1");
        controller.apply_update(&json!({
            "changelist": [{"name": "var1", "in_scope": "false"}]
        }));
        let watch = controller.watches().next().unwrap();
        assert!(!watch.in_scope);
        assert!(watch.value.is_none());
    }

    #[test]
    fn create_watch_command_quotes_expression() {
        let cmd = create_watch_command("buf[i]->len".to_string());
        assert_eq!(cmd.initial_string(), "-var-create - * \"buf[i]->len\"");
    }
}
