//! The canonical operation format.
//!
//! Operations are the exchange and history format consumed by the external
//! OT engine, so the wire shape is fixed: a JSON object with a position
//! array `p` and one or two payload keys:
//! `li`/`ld` (structural insert/delete, both present for a replace),
//! `oi`/`od` (attribute insert/delete), `si`/`sd` (text insert/delete).

use serde_json::{Map, Value};
use thiserror::Error;

use crate::path::{path_from_value, path_to_value, Path};

#[derive(Debug, Error)]
pub enum WireError {
    #[error("operation is not a JSON object")]
    NotAnObject,
    #[error("operation has no usable position array")]
    BadPath,
    #[error("unknown operation shape: {0}")]
    UnknownShape(String),
}

/// A position-addressed edit.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    /// Insert a serialized subtree at a child slot. Wire: `{p, li}`.
    ListInsert { path: Path, value: Value },
    /// Delete the subtree at a child slot, carrying its last serialized
    /// value. Wire: `{p, ld}`.
    ListDelete { path: Path, value: Value },
    /// Replace the value at a slot. At the tag slot this is a tag rename.
    /// Wire: `{p, ld, li}`.
    ListReplace { path: Path, old: Value, new: Value },
    /// Set an attribute, carrying the replaced value when there was one.
    /// Wire: `{p, oi}` or `{p, oi, od}`.
    AttributeInsert {
        path: Path,
        value: String,
        old: Option<String>,
    },
    /// Remove an attribute. Wire: `{p, od}`.
    AttributeDelete { path: Path, value: String },
    /// Insert text at the character offset ending the path. Wire: `{p, si}`.
    TextInsert { path: Path, text: String },
    /// Delete text at the character offset ending the path. Wire: `{p, sd}`.
    TextDelete { path: Path, text: String },
}

impl Operation {
    pub fn path(&self) -> &Path {
        match self {
            Operation::ListInsert { path, .. }
            | Operation::ListDelete { path, .. }
            | Operation::ListReplace { path, .. }
            | Operation::AttributeInsert { path, .. }
            | Operation::AttributeDelete { path, .. }
            | Operation::TextInsert { path, .. }
            | Operation::TextDelete { path, .. } => path,
        }
    }

    /// Encodes into the wire object.
    pub fn to_value(&self) -> Value {
        let mut obj = Map::new();
        obj.insert("p".to_owned(), path_to_value(self.path()));
        match self {
            Operation::ListInsert { value, .. } => {
                obj.insert("li".to_owned(), value.clone());
            }
            Operation::ListDelete { value, .. } => {
                obj.insert("ld".to_owned(), value.clone());
            }
            Operation::ListReplace { old, new, .. } => {
                obj.insert("ld".to_owned(), old.clone());
                obj.insert("li".to_owned(), new.clone());
            }
            Operation::AttributeInsert { value, old, .. } => {
                obj.insert("oi".to_owned(), Value::from(value.clone()));
                if let Some(old) = old {
                    obj.insert("od".to_owned(), Value::from(old.clone()));
                }
            }
            Operation::AttributeDelete { value, .. } => {
                obj.insert("od".to_owned(), Value::from(value.clone()));
            }
            Operation::TextInsert { text, .. } => {
                obj.insert("si".to_owned(), Value::from(text.clone()));
            }
            Operation::TextDelete { text, .. } => {
                obj.insert("sd".to_owned(), Value::from(text.clone()));
            }
        }
        Value::Object(obj)
    }

    /// Decodes one wire object.
    pub fn from_value(value: &Value) -> Result<Self, WireError> {
        let obj = value.as_object().ok_or(WireError::NotAnObject)?;
        let path = obj
            .get("p")
            .and_then(path_from_value)
            .ok_or(WireError::BadPath)?;
        let (li, ld) = (obj.get("li"), obj.get("ld"));
        let (oi, od) = (obj.get("oi"), obj.get("od"));
        let (si, sd) = (obj.get("si"), obj.get("sd"));
        match (li, ld, oi, od, si, sd) {
            (Some(li), Some(ld), None, None, None, None) => Ok(Operation::ListReplace {
                path,
                old: ld.clone(),
                new: li.clone(),
            }),
            (Some(li), None, None, None, None, None) => Ok(Operation::ListInsert {
                path,
                value: li.clone(),
            }),
            (None, Some(ld), None, None, None, None) => Ok(Operation::ListDelete {
                path,
                value: ld.clone(),
            }),
            (None, None, Some(oi), od, None, None) => Ok(Operation::AttributeInsert {
                path,
                value: string_payload(oi)?,
                old: od.map(string_payload).transpose()?,
            }),
            (None, None, None, Some(od), None, None) => Ok(Operation::AttributeDelete {
                path,
                value: string_payload(od)?,
            }),
            (None, None, None, None, Some(si), None) => Ok(Operation::TextInsert {
                path,
                text: string_payload(si)?,
            }),
            (None, None, None, None, None, Some(sd)) => Ok(Operation::TextDelete {
                path,
                text: string_payload(sd)?,
            }),
            _ => Err(WireError::UnknownShape(value.to_string())),
        }
    }
}

fn string_payload(value: &Value) -> Result<String, WireError> {
    value
        .as_str()
        .map(str::to_owned)
        .ok_or_else(|| WireError::UnknownShape(value.to_string()))
}
