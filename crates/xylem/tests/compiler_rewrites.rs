use std::sync::Arc;

use rstest::rstest;
use xylem::expr::{Axis, BinaryOp, ExprArena, ExprId, ExprKind, NodeTest};
use xylem::tree::{SimpleNode, attr, doc, elem};
use xylem::{
    AtomicValue, Controller, Error, ExecutableBuilder, Item, KeyManager, NodeInfo, Pattern,
    QName, Sequence, XPathContext, evaluate,
};

fn sample() -> SimpleNode {
    doc()
        .child(
            elem("a")
                .child(elem("b").attr(attr("id", "1")))
                .child(elem("b").attr(attr("id", "2"))),
        )
        .build()
}

fn id_step(arena: &mut ExprArena) -> ExprId {
    arena.alloc(ExprKind::AxisStep {
        axis: Axis::Attribute,
        test: NodeTest::Name(QName::local_name("id")),
    })
}

/// /descendant::b[@id = <sought>]
fn document_sweep_filter(arena: &mut ExprArena, sought: &str) -> ExprId {
    let root = arena.alloc(ExprKind::Root);
    let step = arena.alloc(ExprKind::AxisStep {
        axis: Axis::Descendant,
        test: NodeTest::Name(QName::local_name("b")),
    });
    let base = arena.make_path(root, step);
    let lhs = id_step(arena);
    let rhs = arena.literal(AtomicValue::String(sought.into()));
    let predicate = arena.alloc(ExprKind::Binary {
        op: BinaryOp::Eq,
        lhs,
        rhs,
    });
    arena.alloc(ExprKind::Filter {
        base,
        predicate,
        positional: false,
    })
}

fn run(b: ExecutableBuilder, entry: usize, node: &SimpleNode) -> Result<Sequence<SimpleNode>, Error> {
    let exec = Arc::new(b.compile()?);
    let compiled = exec.entry(entry)?;
    let controller = Controller::new(exec, Arc::new(KeyManager::new()));
    let ctx = XPathContext::new(controller)
        .new_major(compiled.slot_count)
        .with_focus(Item::Node(node.clone()), 1, Some(1));
    evaluate(compiled.body, &ctx)
}

#[rstest]
fn document_sweep_filter_becomes_a_key_lookup() {
    let mut b = ExecutableBuilder::new();
    let use_expr = id_step(b.arena_mut());
    b.declare_key(
        QName::local_name("auto"),
        Pattern::element(NodeTest::Name(QName::local_name("b"))),
        use_expr,
    );
    let filter = document_sweep_filter(b.arena_mut(), "2");
    let entry = b.declare_expression(filter);
    let exec = Arc::new(b.compile().unwrap());
    let compiled = exec.entry(entry).unwrap();
    assert!(
        matches!(exec.arena().kind(compiled.body), ExprKind::KeyCall { .. }),
        "sweep filter should compile into an indexed lookup"
    );

    let controller = Controller::new(exec, Arc::new(KeyManager::new()));
    let ctx = XPathContext::new(controller)
        .new_major(compiled.slot_count)
        .with_focus(Item::Node(sample()), 1, Some(1));
    let hits = evaluate(compiled.body, &ctx).unwrap();
    assert_eq!(hits.len(), 1);
    match &hits[0] {
        Item::Node(n) => assert_eq!(n.attribute_value("id").as_deref(), Some("2")),
        other => panic!("expected a node, got {other:?}"),
    }
}

#[rstest]
fn same_filter_without_a_key_still_scans_correctly() {
    let mut b = ExecutableBuilder::new();
    let filter = document_sweep_filter(b.arena_mut(), "2");
    let entry = b.declare_expression(filter);
    let hits = run(b, entry, &sample()).unwrap();
    assert_eq!(hits.len(), 1);
}

#[rstest]
fn loop_invariant_subexpressions_hoist_into_a_let() {
    // for-each over descendant::b returning string-length($g): the body
    // never looks at the focus, so it is evaluated once outside the loop.
    let mut b = ExecutableBuilder::new();
    let arena = b.arena_mut();
    let init = arena.literal(AtomicValue::String("abc".into()));
    let g = arena.alloc(ExprKind::VarRef {
        name: QName::local_name("g"),
        binding: xylem::expr::Binding::unallocated(xylem::expr::BindingScope::Local),
    });
    let len = arena.alloc(ExprKind::FunctionCall {
        function: xylem::expr::SystemFunction::StringLength,
        args: vec![g],
    });
    let select = arena.alloc(ExprKind::AxisStep {
        axis: Axis::Descendant,
        test: NodeTest::Name(QName::local_name("b")),
    });
    let fe = arena.alloc(ExprKind::ForEach { select, body: len });
    b.declare_global(QName::local_name("g"), init);
    let entry = b.declare_expression(fe);
    let exec = Arc::new(b.compile().unwrap());
    let compiled = exec.entry(entry).unwrap();
    assert!(
        matches!(exec.arena().kind(compiled.body), ExprKind::Let { .. }),
        "invariant body should be bound outside the loop"
    );
    let controller = Controller::new(exec, Arc::new(KeyManager::new()));
    let ctx = XPathContext::new(controller)
        .new_major(compiled.slot_count)
        .with_focus(Item::Node(sample()), 1, Some(1));
    let result = evaluate(compiled.body, &ctx).unwrap();
    assert_eq!(
        result,
        vec![
            Item::Atomic(AtomicValue::Integer(3)),
            Item::Atomic(AtomicValue::Integer(3)),
        ]
    );
}

#[rstest]
fn for_each_tracks_position_across_the_input() {
    let mut b = ExecutableBuilder::new();
    let arena = b.arena_mut();
    let select = arena.alloc(ExprKind::AxisStep {
        axis: Axis::Descendant,
        test: NodeTest::Name(QName::local_name("b")),
    });
    let one = arena.literal(AtomicValue::Integer(1));
    let pos = arena.alloc(ExprKind::FunctionCall {
        function: xylem::expr::SystemFunction::Position,
        args: Vec::new(),
    });
    let sum = arena.alloc(ExprKind::Binary {
        op: BinaryOp::Add,
        lhs: pos,
        rhs: one,
    });
    let body = sum;
    let fe = arena.alloc(ExprKind::ForEach { select, body });
    let entry = b.declare_expression(fe);
    let result = run(b, entry, &sample()).unwrap();
    assert_eq!(
        result,
        vec![
            Item::Atomic(AtomicValue::Integer(2)),
            Item::Atomic(AtomicValue::Integer(3)),
        ]
    );
}

#[rstest]
fn block_concatenation_flattens_and_preserves_order() {
    let mut b = ExecutableBuilder::new();
    let arena = b.arena_mut();
    let x = arena.literal(AtomicValue::String("x".into()));
    let y = arena.literal(AtomicValue::String("y".into()));
    let inner = arena.make_block(vec![x, y]);
    let z = arena.literal(AtomicValue::String("z".into()));
    let outer = arena.make_block(vec![inner, z]);
    let entry = b.declare_expression(outer);
    let result = run(b, entry, &sample()).unwrap();
    let strings: Vec<String> = result.iter().map(|i| i.string_value()).collect();
    assert_eq!(strings, ["x", "y", "z"]);
}
