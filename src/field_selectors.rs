//! Field selector support for filtering resources
//!
//! Field selectors select on values at dotted paths of the serialized
//! object, e.g. `metadata.name=web,spec.nodeName!=node-1`. Only the equality
//! operators the API server accepts are supported: `=`, `==` and `!=`.

use crate::{Error, Result};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldOperator {
    Equals,
    NotEquals,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldRequirement {
    pub field: String,
    pub operator: FieldOperator,
    pub value: String,
}

/// Parsed field selector; an empty selector matches every object.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldSelector {
    requirements: Vec<FieldRequirement>,
}

impl FieldSelector {
    pub fn parse(selector: &str) -> Result<Self> {
        let mut requirements = Vec::new();
        if selector.trim().is_empty() {
            return Ok(Self { requirements });
        }

        for raw in selector.split(',') {
            let raw = raw.trim();
            let (field, operator, value) = if let Some((f, v)) = raw.split_once("!=") {
                (f, FieldOperator::NotEquals, v)
            } else if let Some((f, v)) = raw.split_once("==") {
                (f, FieldOperator::Equals, v)
            } else if let Some((f, v)) = raw.split_once('=') {
                (f, FieldOperator::Equals, v)
            } else {
                return Err(Error::InvalidSelector(format!(
                    "field selector requirement {:?} has no operator",
                    raw
                )));
            };

            let field = field.trim();
            if field.is_empty() {
                return Err(Error::InvalidSelector(format!(
                    "field selector requirement {:?} has no field",
                    raw
                )));
            }
            requirements.push(FieldRequirement {
                field: field.to_string(),
                operator,
                value: value.trim().to_string(),
            });
        }

        Ok(Self { requirements })
    }

    pub fn requirements(&self) -> &[FieldRequirement] {
        &self.requirements
    }

    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }

    /// Evaluate the selector against a serialized object. Missing fields
    /// compare as the empty string, like the API server does.
    pub fn matches(&self, obj: &Value) -> bool {
        self.requirements.iter().all(|req| {
            let actual = field_value(obj, &req.field).unwrap_or_default();
            match req.operator {
                FieldOperator::Equals => actual == req.value,
                FieldOperator::NotEquals => actual != req.value,
            }
        })
    }
}

/// Resolve a dotted path to a scalar rendered as a string.
pub fn field_value(obj: &Value, path: &str) -> Option<String> {
    let target = path
        .split('.')
        .try_fold(obj, |current, segment| current.get(segment))?;

    match target {
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
