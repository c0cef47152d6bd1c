use serde::Serialize;
use serde_json::{Map, Value};

/// A fetched page on its way through the pipeline
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Item {
    /// The work item's target
    pub url: String,

    /// Where the fetch ended up after redirects
    pub final_url: String,

    pub status_code: u16,
    pub content_type: String,
    pub body: String,

    /// Extracted and cleaned fields
    pub fields: Map<String, Value>,
}

impl Item {
    pub fn new(url: impl Into<String>, body: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            final_url: url.clone(),
            url,
            status_code: 200,
            content_type: "text/html".to_string(),
            body: body.into(),
            fields: Map::new(),
        }
    }

    /// A field rendered as text, arrays joined by newlines
    pub fn field_text(&self, name: &str) -> Option<String> {
        match self.fields.get(name)? {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            Value::Array(values) => Some(
                values
                    .iter()
                    .map(|v| match v {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect::<Vec<_>>()
                    .join("\n"),
            ),
            other => Some(other.to_string()),
        }
    }
}
