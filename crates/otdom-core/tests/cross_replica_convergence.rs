//! Two-replica workflows: operations flushed from one session applied to
//! another must leave both documents identical, with no residual work.

mod common;

use common::new_session;
use otdom_core::Operation;
use serde_json::{json, Value};

fn replicate(source: &mut otdom_core::SyncSession, sink: &mut otdom_core::SyncSession) {
    let ops = source.flush().unwrap();
    // Round-trip through the wire format, as a real commit would.
    let wire: Vec<Value> = ops.iter().map(Operation::to_value).collect();
    let decoded: Vec<Operation> = wire
        .iter()
        .map(|v| Operation::from_value(v).unwrap())
        .collect();
    sink.receive(&decoded).unwrap();
}

#[test]
fn populate_then_serialize_is_identity() {
    let doc = json!([
        "html",
        { "__wid": "r" },
        ["head", { "__wid": "h" }, ["title", { "__wid": "t" }, "doc"]],
        ["body", { "__wid": "b" }, "text", ["!", " note "]]
    ]);
    let session = new_session(&doc);
    assert_eq!(session.serialize().unwrap(), doc);
}

#[test]
fn structural_and_text_edits_converge() {
    let doc = json!(["html", { "__wid": "r" }, ["body", { "__wid": "b" }, "draft"]]);
    let mut a = new_session(&doc);
    let mut b = new_session(&doc);

    let tree = a.tree().clone();
    let body = tree.root().child(0).unwrap();
    let div = tree.create_element("div", true);
    div.set_attribute("class", "card").unwrap();
    div.append_child(&tree.create_text("hello")).unwrap();
    body.append_child(&div).unwrap();
    body.child(0).unwrap().set_text("draft two").unwrap();

    replicate(&mut a, &mut b);

    assert_eq!(a.serialize(), b.serialize());
    assert!(a.flush().unwrap().is_empty());
    assert!(b.flush().unwrap().is_empty());
}

#[test]
fn attribute_diffs_converge_without_whole_replace() {
    let doc = json!(["html", { "__wid": "r" }, ["body", { "__wid": "b" }]]);
    let mut a = new_session(&doc);
    let mut b = new_session(&doc);

    let body = a.tree().root().child(0).unwrap();
    let long = "alpha bravo charlie delta echo foxtrot golf";
    body.set_attribute("class", long).unwrap();
    replicate(&mut a, &mut b);

    body.set_attribute("class", &long.replace("delta", "DELTA"))
        .unwrap();
    let ops = a.flush().unwrap();
    assert!(ops
        .iter()
        .all(|op| matches!(op, Operation::TextInsert { .. } | Operation::TextDelete { .. })));
    b.receive(&ops).unwrap();

    assert_eq!(a.serialize(), b.serialize());
    assert_eq!(
        b.tree().root().child(0).unwrap().attr("class").as_deref(),
        Some("alpha bravo charlie DELTA echo foxtrot golf")
    );
}

#[test]
fn repeated_text_edits_before_one_flush_converge() {
    let doc = json!(["html", { "__wid": "r" }, ["body", { "__wid": "b" }, "a"]]);
    let mut a = new_session(&doc);
    let mut b = new_session(&doc);

    let text = a.tree().root().child(0).and_then(|n| n.child(0)).unwrap();
    text.set_text("ab").unwrap();
    text.set_text("abc").unwrap();

    replicate(&mut a, &mut b);

    assert_eq!(a.serialize(), b.serialize());
    assert_eq!(
        b.tree()
            .root()
            .child(0)
            .and_then(|n| n.child(0))
            .and_then(|t| t.text())
            .as_deref(),
        Some("abc")
    );
}

#[test]
fn deletions_converge() {
    let doc = json!([
        "html",
        { "__wid": "r" },
        [
            "body",
            { "__wid": "b" },
            ["p", { "__wid": "p1" }, "one"],
            ["p", { "__wid": "p2" }, "two"]
        ]
    ]);
    let mut a = new_session(&doc);
    let mut b = new_session(&doc);

    let body = a.tree().root().child(0).unwrap();
    let first = body.child(0).unwrap();
    body.remove_child(&first).unwrap();

    replicate(&mut a, &mut b);

    assert_eq!(a.serialize(), b.serialize());
    let remaining = b.tree().root().child(0).unwrap();
    assert_eq!(remaining.child_count(), 1);
    assert_eq!(
        remaining.child(0).unwrap().stable_id().as_deref(),
        Some("p2")
    );
}

#[test]
fn received_batches_produce_no_follow_up_operations() {
    let doc = json!(["html", { "__wid": "r" }, ["body", { "__wid": "b" }, "x"]]);
    let mut a = new_session(&doc);
    let mut b = new_session(&doc);

    let text = a.tree().root().child(0).and_then(|n| n.child(0)).unwrap();
    text.set_text("xyz").unwrap();
    replicate(&mut a, &mut b);

    // If application re-entered translation, these would ping-pong forever.
    for _ in 0..3 {
        let ops = b.flush().unwrap();
        assert!(ops.is_empty());
        a.receive(&ops).unwrap();
        assert!(a.flush().unwrap().is_empty());
    }
}

#[test]
fn resync_recovers_a_session_for_further_edits() {
    let doc = json!(["html", { "__wid": "r" }, ["body", { "__wid": "b" }]]);
    let mut a = new_session(&doc);

    let body = a.tree().root().child(0).unwrap();
    body.append_child(&a.tree().clone().create_text("one"))
        .unwrap();
    a.flush().unwrap();

    a.resync();

    // Post-resync edits still translate from a consistent baseline.
    body.append_child(&a.tree().clone().create_text("two"))
        .unwrap();
    let ops = a.flush().unwrap();
    assert_eq!(ops.len(), 1);
    assert!(matches!(
        &ops[0],
        Operation::ListInsert { value, .. } if value == &Value::from("two")
    ));
}
