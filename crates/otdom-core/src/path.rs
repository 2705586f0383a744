//! Persistable positions: token paths into the element-list form.
//!
//! A path addresses a slot in the serialized `[tag, attrs, ...children]`
//! form: integer tokens index into element lists (or give a character offset
//! at a text/attribute leaf), string tokens name attributes.

use serde_json::Value;

/// Slot index of the tag name inside an element list.
pub const TAG_SLOT: usize = 0;

/// Slot index of the attribute map inside an element list.
pub const ATTRIBUTE_SLOT: usize = 1;

/// Child indices are offset past the tag and attribute slots.
pub const ELEMENT_LIST_OFFSET: usize = 2;

/// One step of a persistable position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathToken {
    Index(usize),
    Key(String),
}

/// A persistable position, root to leaf.
pub type Path = Vec<PathToken>;

/// Encodes a path as the JSON array the wire format carries.
pub fn path_to_value(path: &[PathToken]) -> Value {
    Value::Array(
        path.iter()
            .map(|token| match token {
                PathToken::Index(i) => Value::from(*i),
                PathToken::Key(k) => Value::from(k.clone()),
            })
            .collect(),
    )
}

/// Decodes a wire path array. Returns `None` for anything that is not an
/// array of non-negative integers and strings.
pub fn path_from_value(value: &Value) -> Option<Path> {
    let items = value.as_array()?;
    let mut path = Path::with_capacity(items.len());
    for item in items {
        match item {
            Value::Number(n) => path.push(PathToken::Index(n.as_u64()? as usize)),
            Value::String(s) => path.push(PathToken::Key(s.clone())),
            _ => return None,
        }
    }
    Some(path)
}

/// Appends the attribute sub-path tokens for `name`.
pub fn attribute_sub_path(mut base: Path, name: &str) -> Path {
    base.push(PathToken::Index(ATTRIBUTE_SLOT));
    base.push(PathToken::Key(name.to_owned()));
    base
}

/// Appends a character-offset token.
pub fn with_offset(mut base: Path, offset: usize) -> Path {
    base.push(PathToken::Index(offset));
    base
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn round_trips_through_wire_form() {
        let path = vec![
            PathToken::Index(2),
            PathToken::Index(1),
            PathToken::Key("class".to_owned()),
        ];
        let value = path_to_value(&path);
        assert_eq!(value, json!([2, 1, "class"]));
        assert_eq!(path_from_value(&value), Some(path));
    }

    #[test]
    fn rejects_non_token_entries() {
        assert_eq!(path_from_value(&json!([2, null])), None);
        assert_eq!(path_from_value(&json!([2, -1])), None);
        assert_eq!(path_from_value(&json!("nope")), None);
    }

    #[test]
    fn attribute_sub_path_appends_slot_and_name() {
        let base = vec![PathToken::Index(3)];
        let path = attribute_sub_path(base, "href");
        assert_eq!(
            path,
            vec![
                PathToken::Index(3),
                PathToken::Index(ATTRIBUTE_SLOT),
                PathToken::Key("href".to_owned()),
            ]
        );
    }
}
