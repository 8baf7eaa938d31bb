use std::sync::Arc;

use rstest::rstest;
use xylem::expr::{Axis, ExprArena, ExprId, ExprKind, NodeTest};
use xylem::tree::{SimpleNode, attr, doc, elem};
use xylem::{
    AtomicValue, Controller, Error, ExecutableBuilder, Item, KeyManager, NodeInfo, Pattern, QName,
    Sequence, XPathContext, evaluate,
};

/// <a><b id="1"/><b id="2"/></a>
fn sample() -> SimpleNode {
    doc()
        .child(
            elem("a")
                .child(elem("b").attr(attr("id", "1")))
                .child(elem("b").attr(attr("id", "2"))),
        )
        .build()
}

fn id_use_expr(arena: &mut ExprArena) -> ExprId {
    arena.alloc(ExprKind::AxisStep {
        axis: Axis::Attribute,
        test: NodeTest::Name(QName::local_name("id")),
    })
}

fn builder_with_key() -> ExecutableBuilder {
    let mut b = ExecutableBuilder::new();
    let use_expr = id_use_expr(b.arena_mut());
    b.declare_key(
        QName::local_name("k"),
        Pattern::element(NodeTest::Name(QName::local_name("b"))),
        use_expr,
    );
    b
}

fn key_lookup(mut b: ExecutableBuilder, sought: AtomicValue, root: &SimpleNode) -> Result<Sequence<SimpleNode>, Error> {
    let arena = b.arena_mut();
    let value = arena.literal(sought);
    let call = arena.alloc(ExprKind::KeyCall {
        key: QName::local_name("k"),
        value,
    });
    let entry = b.declare_expression(call);
    let exec = Arc::new(b.compile()?);
    let compiled = exec.entry(entry)?;
    let controller = Controller::new(exec, Arc::new(KeyManager::new()));
    let ctx = XPathContext::new(controller)
        .new_major(compiled.slot_count)
        .with_focus(Item::Node(root.clone()), 1, Some(1));
    evaluate(compiled.body, &ctx)
}

fn id_of(item: &Item<SimpleNode>) -> String {
    match item {
        Item::Node(n) => n.attribute_value("id").unwrap_or_default(),
        Item::Atomic(a) => panic!("expected a node, got {a:?}"),
    }
}

#[rstest]
fn present_value_selects_the_matching_element() {
    let root = sample();
    let result = key_lookup(builder_with_key(), AtomicValue::String("1".into()), &root).unwrap();
    assert_eq!(result.len(), 1);
    assert_eq!(id_of(&result[0]), "1");
}

#[rstest]
fn absent_value_selects_nothing() {
    let root = sample();
    let result = key_lookup(builder_with_key(), AtomicValue::String("9".into()), &root).unwrap();
    assert!(result.is_empty());
}

#[rstest]
fn numeric_sought_value_converts_the_indexed_strings() {
    let root = sample();
    let result = key_lookup(builder_with_key(), AtomicValue::Double(2.0), &root).unwrap();
    assert_eq!(result.len(), 1);
    assert_eq!(id_of(&result[0]), "2");
}

#[rstest]
fn untyped_sought_value_fans_out_over_indexed_types() {
    let root = sample();
    let result = key_lookup(
        builder_with_key(),
        AtomicValue::UntypedAtomic("1".into()),
        &root,
    )
    .unwrap();
    assert_eq!(result.len(), 1);
    assert_eq!(id_of(&result[0]), "1");
}

#[rstest]
fn key_defined_in_terms_of_itself_is_circular() {
    let mut b = ExecutableBuilder::new();
    let arena = b.arena_mut();
    let inner_value = arena.literal(AtomicValue::String("1".into()));
    let self_call = arena.alloc(ExprKind::KeyCall {
        key: QName::local_name("k"),
        value: inner_value,
    });
    b.declare_key(
        QName::local_name("k"),
        Pattern::element(NodeTest::Name(QName::local_name("b"))),
        self_call,
    );
    let root = sample();
    let err = key_lookup(b, AtomicValue::String("1".into()), &root).unwrap_err();
    assert!(err.is_circularity(), "got {err}");
}

#[rstest]
fn two_documents_are_indexed_independently() {
    let root_a = sample();
    let root_b = doc()
        .child(elem("a").child(elem("b").attr(attr("id", "9"))))
        .build();
    let mut b = builder_with_key();
    let arena = b.arena_mut();
    let value = arena.literal(AtomicValue::String("9".into()));
    let call = arena.alloc(ExprKind::KeyCall {
        key: QName::local_name("k"),
        value,
    });
    let entry = b.declare_expression(call);
    let exec = Arc::new(b.compile().unwrap());
    let compiled = exec.entry(entry).unwrap();
    let keys = Arc::new(KeyManager::new());
    let controller = Controller::new(exec, keys);
    let base = XPathContext::new(controller).new_major(compiled.slot_count);

    let in_a = base.with_focus(Item::Node(root_a), 1, Some(1));
    assert!(evaluate(compiled.body, &in_a).unwrap().is_empty());

    let in_b = base.with_focus(Item::Node(root_b), 1, Some(1));
    let hits = evaluate(compiled.body, &in_b).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(id_of(&hits[0]), "9");
}

#[rstest]
fn overlapping_definitions_merge_in_document_order_without_duplicates() {
    // Two definitions share the name: one matches b elements, the other
    // matches every element. b is matched by both and must appear once,
    // ahead of c.
    let root = doc()
        .child(
            elem("a")
                .child(elem("b").attr(attr("id", "1")))
                .child(elem("c").attr(attr("id", "1"))),
        )
        .build();
    let mut b = ExecutableBuilder::new();
    let narrow = id_use_expr(b.arena_mut());
    b.declare_key(
        QName::local_name("k"),
        Pattern::element(NodeTest::Name(QName::local_name("b"))),
        narrow,
    );
    let wide = id_use_expr(b.arena_mut());
    b.declare_key(QName::local_name("k"), Pattern::element(NodeTest::AnyName), wide);
    let result = key_lookup(b, AtomicValue::String("1".into()), &root).unwrap();
    let names: Vec<String> = result
        .iter()
        .map(|item| match item {
            Item::Node(n) => n.name().map(|q| q.display_name()).unwrap_or_default(),
            Item::Atomic(a) => a.string_value(),
        })
        .collect();
    assert_eq!(names, ["b", "c"]);
}
