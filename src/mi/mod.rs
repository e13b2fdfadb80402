pub mod commands;
pub mod output;

use serde_json::Value;

/// Field access helpers shared by everything that inspects parsed MI field
/// maps (`serde_json::Value` objects produced by the output parser).
pub trait MiValueExt {
    fn has_field(&self, name: &str) -> bool;
    fn field(&self, name: &str) -> Option<&Value>;
    /// The string form of a literal value, `""` for anything else.
    fn literal(&self) -> &str;
    /// The string form of a named literal field, `""` when absent.
    fn literal_field(&self, name: &str) -> &str;
}

impl MiValueExt for Value {
    fn has_field(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    fn field(&self, name: &str) -> Option<&Value> {
        self.get(name)
    }

    fn literal(&self) -> &str {
        self.as_str().unwrap_or("")
    }

    fn literal_field(&self, name: &str) -> &str {
        self.get(name).and_then(Value::as_str).unwrap_or("")
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn literal_field_access() {
        let v = json!({"reason": "breakpoint-hit", "frame": {"line": "10"}});
        assert!(v.has_field("reason"));
        assert_eq!(v.literal_field("reason"), "breakpoint-hit");
        assert_eq!(v.literal_field("missing"), "");
        assert_eq!(v.field("frame").unwrap().literal_field("line"), "10");
        assert_eq!(v.field("frame").unwrap().literal(), "");
    }
}
