//! Element-list serialization between live subtrees and `[tag, attrs, ...children]` form.
//!
//! Text nodes serialize to plain strings, comments to `["!", text]`, and
//! doctypes to `["!doctype", name]`. The attribute slot is always present so
//! child indices are uniformly offset by [`ELEMENT_LIST_OFFSET`]. The stable
//! id travels in the reserved `__wid` attribute key; on the live side it is
//! a node field and never part of the attribute set.
//!
//! [`ELEMENT_LIST_OFFSET`]: crate::path::ELEMENT_LIST_OFFSET

use std::sync::OnceLock;

use otdom_live::{LiveNode, LiveTree};
use regex::Regex;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::policy::TransiencePolicy;

/// Reserved attribute key carrying the stable id on the wire.
pub const RESERVED_ID_ATTRIBUTE: &str = "__wid";

/// Marker tag for serialized comments.
pub const COMMENT_MARKER: &str = "!";

/// Marker tag for serialized doctypes.
pub const DOCTYPE_MARKER: &str = "!doctype";

const SVG_NAMESPACE: &str = "http://www.w3.org/2000/svg";

#[derive(Debug, Error)]
pub enum SerializeError {
    #[error("value is not serializable tree content: {0}")]
    UnsupportedValue(String),
    #[error("malformed element list: {0}")]
    MalformedList(String),
}

fn name_sanitizer() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^a-zA-Z0-9_\-.]").expect("static pattern"))
}

/// Replaces characters illegal in tag/attribute names with `_`.
///
/// The corrected name is what gets persisted; malformed input has no
/// name-stability guarantee.
pub fn sanitize_name(name: &str) -> String {
    if name.is_empty() {
        return "_".to_owned();
    }
    name_sanitizer().replace_all(name, "_").into_owned()
}

/// Serializes a live node, applying the transience filter.
///
/// Returns `None` when the filter rejects the node (and therefore its whole
/// subtree). Content inside an opaque container is retained verbatim.
pub fn to_list(node: &LiveNode, policy: &dyn TransiencePolicy) -> Option<Value> {
    serialize(node, policy, true)
}

/// Serializes a live node without consulting the transience filter, as is
/// done for opaque-container content.
pub fn to_list_verbatim(node: &LiveNode, policy: &dyn TransiencePolicy) -> Option<Value> {
    serialize(node, policy, false)
}

fn serialize(node: &LiveNode, policy: &dyn TransiencePolicy, filter: bool) -> Option<Value> {
    if let Some(text) = node.text() {
        if node.is_comment() {
            return Some(Value::Array(vec![
                Value::from(COMMENT_MARKER),
                Value::from(text),
            ]));
        }
        return Some(Value::from(text));
    }
    if let Some(name) = node.doctype_name() {
        return Some(Value::Array(vec![
            Value::from(DOCTYPE_MARKER),
            Value::from(name),
        ]));
    }
    if !node.is_element() {
        return None;
    }
    if filter && policy.element_is_transient(node) {
        return None;
    }

    let tag = sanitize_name(&node.tag().expect("element has a tag"));
    let mut attrs = Map::new();
    for (name, value) in node.attrs() {
        if filter && policy.attribute_is_transient(&tag, &name) {
            continue;
        }
        let name = sanitize_name(&name);
        // The style attribute reflects computed style when the host set it.
        let value = if name == "style" {
            node.style_text().unwrap_or(value)
        } else {
            value
        };
        attrs.insert(name, Value::from(value));
    }
    if let Some(style) = node.style_text() {
        if !attrs.contains_key("style") {
            attrs.insert("style".to_owned(), Value::from(style));
        }
    }
    if let Some(id) = node.stable_id() {
        attrs.insert(RESERVED_ID_ATTRIBUTE.to_owned(), Value::from(id));
    }

    let mut list = vec![Value::from(tag), Value::Object(attrs)];
    if node.is_opaque_container() {
        // Content is not subject to the filter; serialize it verbatim.
        for child in node.logical_children() {
            if let Some(value) = serialize(&child, policy, false) {
                list.push(value);
            }
        }
    } else {
        for child in node.children() {
            if let Some(value) = serialize(&child, policy, filter) {
                list.push(value);
            }
        }
    }
    Some(Value::Array(list))
}

/// Builds a live subtree from element-list form.
///
/// `namespace_hint` is the runtime namespace of the destination parent.
/// Namespaces are inherited from the nearest explicit `xmlns` declaration,
/// falling back to the hint, except that an `svg` root with no declaration
/// is assumed SVG. Script elements are not executed; they are collected into
/// `scripts` in document order for a separate caller-invoked step.
pub fn to_live_subtree(
    value: &Value,
    tree: &LiveTree,
    namespace_hint: Option<&str>,
    scripts: &mut Vec<LiveNode>,
) -> Result<LiveNode, SerializeError> {
    match value {
        Value::String(text) => Ok(tree.create_text(text)),
        Value::Array(items) => build_element(items, tree, namespace_hint, scripts),
        other => Err(SerializeError::UnsupportedValue(other.to_string())),
    }
}

fn build_element(
    items: &[Value],
    tree: &LiveTree,
    namespace_hint: Option<&str>,
    scripts: &mut Vec<LiveNode>,
) -> Result<LiveNode, SerializeError> {
    let raw_tag = items
        .first()
        .and_then(Value::as_str)
        .ok_or_else(|| SerializeError::MalformedList("missing tag slot".to_owned()))?;

    if raw_tag == COMMENT_MARKER || raw_tag == DOCTYPE_MARKER {
        let text = items
            .get(1)
            .and_then(Value::as_str)
            .ok_or_else(|| SerializeError::MalformedList("marker without payload".to_owned()))?;
        return Ok(if raw_tag == COMMENT_MARKER {
            tree.create_comment(text)
        } else {
            tree.create_doctype(text)
        });
    }

    let tag = sanitize_name(raw_tag);
    let attrs = match items.get(1) {
        Some(Value::Object(map)) => map.clone(),
        Some(Value::Null) | None => Map::new(),
        Some(other) => {
            return Err(SerializeError::MalformedList(format!(
                "attribute slot is not a map: {}",
                other
            )))
        }
    };

    let explicit_ns = attrs.get("xmlns").and_then(Value::as_str).map(str::to_owned);
    let namespace = match &explicit_ns {
        Some(ns) => Some(ns.clone()),
        // An svg root without a declaration is assumed SVG.
        None if tag == "svg" => Some(SVG_NAMESPACE.to_owned()),
        None => namespace_hint.map(str::to_owned),
    };

    let node = tree.create_element_ns(&tag, namespace.as_deref(), true);
    for (name, value) in &attrs {
        let value = value
            .as_str()
            .map(str::to_owned)
            .unwrap_or_else(|| value.to_string());
        if name == RESERVED_ID_ATTRIBUTE {
            node.set_stable_id(&value);
            continue;
        }
        let name = sanitize_name(name);
        node.set_attribute(&name, &value)
            .map_err(|e| SerializeError::MalformedList(e.to_string()))?;
    }

    if tag == "script" {
        scripts.push(node.clone());
    }

    for child in items.iter().skip(2) {
        let built = to_live_subtree(child, tree, namespace.as_deref(), scripts)?;
        node.append_child(&built)
            .map_err(|e| SerializeError::MalformedList(e.to_string()))?;
    }
    Ok(node)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{NoTransience, PrefixTransience};
    use serde_json::json;

    fn tree() -> LiveTree {
        LiveTree::new("body")
    }

    #[test]
    fn text_and_markers() {
        let t = tree();
        let policy = NoTransience;
        assert_eq!(to_list(&t.create_text("hi"), &policy), Some(json!("hi")));
        assert_eq!(
            to_list(&t.create_comment("note"), &policy),
            Some(json!(["!", "note"]))
        );
        assert_eq!(
            to_list(&t.create_doctype("html"), &policy),
            Some(json!(["!doctype", "html"]))
        );
    }

    #[test]
    fn element_with_attrs_and_children() {
        let t = tree();
        let div = t.create_element("div", true);
        div.set_attribute("class", "box").unwrap();
        div.append_child(&t.create_text("hello")).unwrap();
        assert_eq!(
            to_list(&div, &NoTransience),
            Some(json!(["div", {"class": "box"}, "hello"]))
        );
    }

    #[test]
    fn stable_id_rides_in_reserved_key() {
        let t = tree();
        let div = t.create_element("div", true);
        div.set_stable_id("abc123");
        assert_eq!(
            to_list(&div, &NoTransience),
            Some(json!(["div", {"__wid": "abc123"}]))
        );
        // And comes back out as a node field, not an attribute.
        let mut scripts = Vec::new();
        let rebuilt =
            to_live_subtree(&json!(["div", {"__wid": "abc123"}]), &t, None, &mut scripts).unwrap();
        assert_eq!(rebuilt.stable_id(), Some("abc123".to_owned()));
        assert_eq!(rebuilt.attr("__wid"), None);
    }

    #[test]
    fn transient_subtree_is_rejected() {
        let t = tree();
        let policy = PrefixTransience::default();
        let el = t.create_element("transient-widget", true);
        el.append_child(&t.create_text("secret")).unwrap();
        assert_eq!(to_list(&el, &policy), None);

        let parent = t.create_element("div", true);
        parent.append_child(&el).unwrap();
        parent.append_child(&t.create_text("kept")).unwrap();
        assert_eq!(to_list(&parent, &policy), Some(json!(["div", {}, "kept"])));
    }

    #[test]
    fn opaque_container_content_ignores_filter() {
        let t = tree();
        let policy = PrefixTransience::default();
        let template = t.create_element("template", true);
        let hidden = t.create_element("transient-widget", true);
        template.append_child(&hidden).unwrap();
        assert_eq!(
            to_list(&template, &policy),
            Some(json!(["template", {}, ["transient-widget", {}]]))
        );
    }

    #[test]
    fn sanitizes_names_both_ways() {
        assert_eq!(sanitize_name("foo\"bar"), "foo_bar");
        assert_eq!(sanitize_name("ok-name_1.x"), "ok-name_1.x");
        assert_eq!(sanitize_name(""), "_");

        let t = tree();
        let mut scripts = Vec::new();
        let node = to_live_subtree(
            &json!(["div", {"foo\"bar": "x"}]),
            &t,
            None,
            &mut scripts,
        )
        .unwrap();
        assert_eq!(node.attr("foo_bar"), Some("x".to_owned()));
        assert_eq!(node.attr("foo\"bar"), None);
    }

    #[test]
    fn svg_root_without_declaration_is_svg() {
        let t = tree();
        let mut scripts = Vec::new();
        let svg = to_live_subtree(
            &json!(["svg", {}, ["circle", {}]]),
            &t,
            None,
            &mut scripts,
        )
        .unwrap();
        assert_eq!(svg.namespace(), Some(SVG_NAMESPACE.to_owned()));
        assert_eq!(svg.children()[0].namespace(), Some(SVG_NAMESPACE.to_owned()));
    }

    #[test]
    fn explicit_xmlns_wins_over_hint() {
        let t = tree();
        let mut scripts = Vec::new();
        let node = to_live_subtree(
            &json!(["math", {"xmlns": "http://www.w3.org/1998/Math/MathML"}]),
            &t,
            Some("http://www.w3.org/1999/xhtml"),
            &mut scripts,
        )
        .unwrap();
        assert_eq!(
            node.namespace(),
            Some("http://www.w3.org/1998/Math/MathML".to_owned())
        );
    }

    #[test]
    fn scripts_collected_in_document_order() {
        let t = tree();
        let mut scripts = Vec::new();
        to_live_subtree(
            &json!(["div", {},
                ["script", {"src": "a.js"}],
                ["section", {}, ["script", {"src": "b.js"}]],
                ["script", {"src": "c.js"}]]),
            &t,
            None,
            &mut scripts,
        )
        .unwrap();
        let srcs: Vec<_> = scripts.iter().map(|s| s.attr("src").unwrap()).collect();
        assert_eq!(srcs, vec!["a.js", "b.js", "c.js"]);
    }

    #[test]
    fn round_trip_preserves_structure() {
        let t = tree();
        let value = json!(["div", {"class": "a b", "id": "x"},
            "lead ",
            ["span", {}, "inner"],
            ["!", "a comment"]]);
        let mut scripts = Vec::new();
        let live = to_live_subtree(&value, &t, None, &mut scripts).unwrap();
        assert_eq!(to_list(&live, &NoTransience), Some(value));
    }

    #[test]
    fn style_prefers_computed_text() {
        let t = tree();
        let div = t.create_element("div", true);
        div.set_attribute("style", "color:red").unwrap();
        div.set_style_text(Some("color: red;".to_owned())).unwrap();
        assert_eq!(
            to_list(&div, &NoTransience),
            Some(json!(["div", {"style": "color: red;"}]))
        );
    }
}
