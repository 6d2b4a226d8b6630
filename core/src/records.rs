use serde_json::{Map, Value};

/// One row from a ServiceNow table API `result` array.
///
/// The remote shape is not fixed: any field may be missing, `null`, a
/// scalar, or a reference object (`{"value": ..., "link": ...}`). Readers
/// only ever look up the fields they need and never fail.
#[derive(Debug, Clone, Copy)]
pub struct RemoteRecord<'a> {
    fields: Option<&'a Map<String, Value>>,
}

impl<'a> RemoteRecord<'a> {
    pub fn new(value: &'a Value) -> Self {
        Self {
            fields: value.as_object(),
        }
    }

    /// Display text of a field; empty when absent or `null`.
    pub fn text(&self, key: &str) -> String {
        self.optional_text(key).unwrap_or_default()
    }

    /// Display text of a field, `None` when absent, `null`, or empty.
    pub fn optional_text(&self, key: &str) -> Option<String> {
        let value = self.fields?.get(key)?;
        display_value(value).filter(|text| !text.is_empty())
    }

    /// Record label: `number`, falling back to `sys_id`.
    pub fn label(&self) -> String {
        self.optional_text("number")
            .or_else(|| self.optional_text("sys_id"))
            .unwrap_or_default()
    }
}

fn display_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        // Reference fields come back as {"link": ..., "value": ...}
        Value::Object(map) => map.get("value").and_then(display_value),
        Value::Array(_) => None,
    }
}
