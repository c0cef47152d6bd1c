//! Built-in pipeline stages

use crate::job::JobSpec;
use crate::pipeline::{Item, PipelineRejection, Stage};
use crate::ConfigError;
use chrono::NaiveDate;
use regex::Regex;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Declarative form of a built-in stage, as written in a job file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "kebab-case")]
pub enum StageSpec {
    /// Apply the job's extraction rules to the body
    Extract,

    /// Strip leading and trailing whitespace from every field
    Trim,

    /// Collapse whitespace runs inside every field to one space
    NormalizeWhitespace,

    /// Reject items missing any of these fields, or holding them empty
    RequireFields { fields: Vec<String> },

    RejectEmptyBody,

    MinBodyLength { bytes: usize },

    /// Reject items whose field does not hold a value of `kind`
    Validate {
        field: String,
        kind: FieldKind,

        /// Let a missing or empty field through
        #[serde(default)]
        optional: bool,
    },
}

/// Value types a field can be checked against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FieldKind {
    /// Absolute URL with a scheme and a host
    Url,
    Email,
    Number,
    Integer,

    /// Calendar date as `YYYY-MM-DD` or `YYYY/MM/DD`
    Date,
    Boolean,
    Json,
}

/// Builds the stage chain for a job
pub fn build_stages(spec: &JobSpec) -> Result<Vec<Arc<dyn Stage>>, ConfigError> {
    spec.effective_stages()
        .into_iter()
        .map(|stage| -> Result<Arc<dyn Stage>, ConfigError> {
            Ok(match stage {
                StageSpec::Extract => Arc::new(ExtractStage::new(&spec.extraction_rules)?),
                StageSpec::Trim => Arc::new(TrimStage),
                StageSpec::NormalizeWhitespace => Arc::new(NormalizeWhitespaceStage),
                StageSpec::RequireFields { fields } => Arc::new(RequireFieldsStage { fields }),
                StageSpec::RejectEmptyBody => Arc::new(RejectEmptyBodyStage),
                StageSpec::MinBodyLength { bytes } => Arc::new(MinBodyLengthStage { bytes }),
                StageSpec::Validate {
                    field,
                    kind,
                    optional,
                } => Arc::new(ValidateStage::new(field, kind, optional)?),
            })
        })
        .collect()
}

/// Extracts fields with CSS selectors
///
/// One match yields a string, several yield an array, none yields null.
pub struct ExtractStage {
    rules: Vec<(String, Selector)>,
}

impl ExtractStage {
    pub fn new(rules: &BTreeMap<String, String>) -> Result<Self, ConfigError> {
        let rules = rules
            .iter()
            .map(|(field, css)| {
                Selector::parse(css)
                    .map(|selector| (field.clone(), selector))
                    .map_err(|e| ConfigError::InvalidSelector {
                        field: field.clone(),
                        message: format!("{:?}", e),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { rules })
    }
}

impl Stage for ExtractStage {
    fn name(&self) -> &str {
        "extract"
    }

    fn process(&self, mut item: Item) -> Result<Item, PipelineRejection> {
        let document = Html::parse_document(&item.body);

        for (field, selector) in &self.rules {
            let mut texts: Vec<String> = document
                .select(selector)
                .map(|element| element.text().collect::<String>())
                .collect();

            let value = match texts.len() {
                0 => Value::Null,
                1 => Value::String(texts.remove(0)),
                _ => Value::Array(texts.into_iter().map(Value::String).collect()),
            };
            item.fields.insert(field.clone(), value);
        }

        Ok(item)
    }
}

/// Applies `f` to every string in every field
fn map_strings(item: &mut Item, f: impl Fn(&str) -> String) {
    fn apply(value: &mut Value, f: &dyn Fn(&str) -> String) {
        match value {
            Value::String(s) => *s = f(s),
            Value::Array(values) => values.iter_mut().for_each(|v| apply(v, f)),
            Value::Object(map) => map.values_mut().for_each(|v| apply(v, f)),
            _ => {}
        }
    }

    for value in item.fields.values_mut() {
        apply(value, &f);
    }
}

pub struct TrimStage;

impl Stage for TrimStage {
    fn name(&self) -> &str {
        "trim"
    }

    fn process(&self, mut item: Item) -> Result<Item, PipelineRejection> {
        map_strings(&mut item, |s| s.trim().to_string());
        Ok(item)
    }
}

pub struct NormalizeWhitespaceStage;

impl Stage for NormalizeWhitespaceStage {
    fn name(&self) -> &str {
        "normalize-whitespace"
    }

    fn process(&self, mut item: Item) -> Result<Item, PipelineRejection> {
        map_strings(&mut item, |s| s.split_whitespace().collect::<Vec<_>>().join(" "));
        Ok(item)
    }
}

pub struct RequireFieldsStage {
    pub fields: Vec<String>,
}

impl Stage for RequireFieldsStage {
    fn name(&self) -> &str {
        "require-fields"
    }

    fn process(&self, item: Item) -> Result<Item, PipelineRejection> {
        for field in &self.fields {
            let present = match item.fields.get(field) {
                None | Some(Value::Null) => false,
                Some(Value::String(s)) => !s.trim().is_empty(),
                Some(Value::Array(values)) => !values.is_empty(),
                Some(_) => true,
            };
            if !present {
                return Err(PipelineRejection::new(
                    self.name(),
                    format!("missing required field '{}'", field),
                ));
            }
        }
        Ok(item)
    }
}

pub struct RejectEmptyBodyStage;

impl Stage for RejectEmptyBodyStage {
    fn name(&self) -> &str {
        "reject-empty-body"
    }

    fn process(&self, item: Item) -> Result<Item, PipelineRejection> {
        if item.body.trim().is_empty() {
            return Err(PipelineRejection::new(self.name(), "empty body"));
        }
        Ok(item)
    }
}

pub struct MinBodyLengthStage {
    pub bytes: usize,
}

impl Stage for MinBodyLengthStage {
    fn name(&self) -> &str {
        "min-body-length"
    }

    fn process(&self, item: Item) -> Result<Item, PipelineRejection> {
        if item.body.len() < self.bytes {
            return Err(PipelineRejection::new(
                self.name(),
                format!("body is {} bytes, need at least {}", item.body.len(), self.bytes),
            ));
        }
        Ok(item)
    }
}

/// Checks the type of one field
///
/// Arrays are valid when every element is. Strings are checked trimmed.
pub struct ValidateStage {
    field: String,
    kind: FieldKind,
    optional: bool,
    email: Regex,
}

impl ValidateStage {
    pub fn new(field: String, kind: FieldKind, optional: bool) -> Result<Self, ConfigError> {
        let email = Regex::new(r"^[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}$")
            .map_err(|e| ConfigError::Validation(format!("email pattern: {}", e)))?;
        Ok(Self {
            field,
            kind,
            optional,
            email,
        })
    }

    fn matches(&self, value: &Value) -> bool {
        match value {
            Value::Array(values) => values.iter().all(|v| self.matches(v)),
            Value::String(s) => self.matches_text(s.trim()),
            Value::Number(n) => match self.kind {
                FieldKind::Number => true,
                FieldKind::Integer => n.is_i64() || n.is_u64(),
                FieldKind::Boolean => n.as_u64().is_some_and(|n| n <= 1),
                FieldKind::Json => true,
                _ => false,
            },
            Value::Bool(_) => matches!(self.kind, FieldKind::Boolean | FieldKind::Json),
            Value::Object(_) => self.kind == FieldKind::Json,
            Value::Null => false,
        }
    }

    fn matches_text(&self, text: &str) -> bool {
        match self.kind {
            FieldKind::Url => url::Url::parse(text).is_ok_and(|url| url.has_host()),
            FieldKind::Email => self.email.is_match(text),
            FieldKind::Number => text.parse::<f64>().is_ok_and(f64::is_finite),
            FieldKind::Integer => text.parse::<i64>().is_ok(),
            FieldKind::Date => ["%Y-%m-%d", "%Y/%m/%d"]
                .iter()
                .any(|format| NaiveDate::parse_from_str(text, format).is_ok()),
            FieldKind::Boolean => matches!(
                text.to_lowercase().as_str(),
                "true" | "false" | "1" | "0" | "yes" | "no"
            ),
            FieldKind::Json => serde_json::from_str::<Value>(text).is_ok(),
        }
    }
}

impl Stage for ValidateStage {
    fn name(&self) -> &str {
        "validate"
    }

    fn process(&self, item: Item) -> Result<Item, PipelineRejection> {
        let value = match item.fields.get(&self.field) {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) if s.trim().is_empty() => None,
            Some(Value::Array(values)) if values.is_empty() => None,
            Some(value) => Some(value),
        };

        match value {
            None if self.optional => Ok(item),
            None => Err(PipelineRejection::new(
                self.name(),
                format!("missing field '{}'", self.field),
            )),
            Some(value) if self.matches(value) => Ok(item),
            Some(value) => Err(PipelineRejection::new(
                self.name(),
                format!("field '{}' is not a valid {:?}: {}", self.field, self.kind, value),
            )),
        }
    }
}
