use std::sync::Arc;

use rstest::rstest;
use xylem::expr::{Axis, BinaryOp, ExprArena, ExprId, ExprKind, NodeTest};
use xylem::tree::{SimpleNode, attr, elem};
use xylem::{
    AtomicValue, Controller, Error, ErrorCode, ExecutableBuilder, Item, KeyManager, QName,
    Sequence, XPathContext, evaluate,
};

fn run_on(
    node: &SimpleNode,
    build: impl FnOnce(&mut ExprArena) -> ExprId,
) -> Result<Sequence<SimpleNode>, Error> {
    let mut b = ExecutableBuilder::new();
    let expr = build(b.arena_mut());
    let entry = b.declare_expression(expr);
    let exec = Arc::new(b.compile()?);
    let compiled = exec.entry(entry)?;
    let controller = Controller::new(exec, Arc::new(KeyManager::new()));
    let ctx = XPathContext::new(controller)
        .new_major(compiled.slot_count)
        .with_focus(Item::Node(node.clone()), 1, Some(1));
    evaluate(compiled.body, &ctx)
}

fn binary(arena: &mut ExprArena, op: BinaryOp, lhs: AtomicValue, rhs: AtomicValue) -> ExprId {
    let lhs = arena.literal(lhs);
    let rhs = arena.literal(rhs);
    arena.alloc(ExprKind::Binary { op, lhs, rhs })
}

fn bool_of(seq: &Sequence<SimpleNode>) -> bool {
    match seq.as_slice() {
        [Item::Atomic(AtomicValue::Boolean(b))] => *b,
        other => panic!("expected a single boolean, got {other:?}"),
    }
}

#[rstest]
#[case(BinaryOp::Eq, AtomicValue::Integer(2), AtomicValue::Double(2.0), true)]
#[case(BinaryOp::Lt, AtomicValue::Integer(2), AtomicValue::Double(2.5), true)]
#[case(BinaryOp::Ge, AtomicValue::Double(1.0), AtomicValue::Integer(2), false)]
#[case(
    BinaryOp::Eq,
    AtomicValue::UntypedAtomic("2".into()),
    AtomicValue::Integer(2),
    true
)]
#[case(
    BinaryOp::Ne,
    AtomicValue::UntypedAtomic("abc".into()),
    AtomicValue::Integer(2),
    true
)]
#[case(
    BinaryOp::Gt,
    AtomicValue::String("b".into()),
    AtomicValue::String("a".into()),
    true
)]
fn general_comparison_promotes_operands(
    #[case] op: BinaryOp,
    #[case] lhs: AtomicValue,
    #[case] rhs: AtomicValue,
    #[case] expected: bool,
) {
    let node = elem("e").build();
    let result = run_on(&node, |arena| binary(arena, op, lhs, rhs)).unwrap();
    assert_eq!(bool_of(&result), expected);
}

#[rstest]
fn untyped_attribute_compares_against_numbers() {
    let node = elem("e").attr(attr("n", "41")).build();
    let result = run_on(&node, |arena| {
        let lhs = arena.alloc(ExprKind::AxisStep {
            axis: Axis::Attribute,
            test: NodeTest::Name(QName::local_name("n")),
        });
        let rhs = arena.literal(AtomicValue::Integer(41));
        arena.alloc(ExprKind::Binary {
            op: BinaryOp::Eq,
            lhs,
            rhs,
        })
    })
    .unwrap();
    assert!(bool_of(&result));
}

#[rstest]
fn incomparable_pairs_raise_a_type_error() {
    let node = elem("e").build();
    let err = run_on(&node, |arena| {
        binary(
            arena,
            BinaryOp::Lt,
            AtomicValue::Boolean(true),
            AtomicValue::String("x".into()),
        )
    })
    .unwrap_err();
    assert_eq!(err.code, ErrorCode::XPTY0004);
}

#[rstest]
#[case(BinaryOp::Add, AtomicValue::Integer(2), AtomicValue::Integer(3), AtomicValue::Integer(5))]
#[case(BinaryOp::Mul, AtomicValue::Integer(4), AtomicValue::Integer(3), AtomicValue::Integer(12))]
#[case(BinaryOp::Div, AtomicValue::Integer(3), AtomicValue::Integer(2), AtomicValue::Double(1.5))]
#[case(BinaryOp::Add, AtomicValue::Integer(1), AtomicValue::Double(0.5), AtomicValue::Double(1.5))]
fn arithmetic_keeps_integers_integral(
    #[case] op: BinaryOp,
    #[case] lhs: AtomicValue,
    #[case] rhs: AtomicValue,
    #[case] expected: AtomicValue,
) {
    let node = elem("e").build();
    let result = run_on(&node, |arena| binary(arena, op, lhs, rhs)).unwrap();
    assert_eq!(result, vec![Item::Atomic(expected)]);
}

#[rstest]
#[case(BinaryOp::Add, i64::MAX, 1)]
#[case(BinaryOp::Sub, i64::MIN, 1)]
#[case(BinaryOp::Mul, i64::MAX, 2)]
fn integer_overflow_is_a_range_error(#[case] op: BinaryOp, #[case] lhs: i64, #[case] rhs: i64) {
    let node = elem("e").build();
    let err = run_on(&node, |arena| {
        binary(arena, op, AtomicValue::Integer(lhs), AtomicValue::Integer(rhs))
    })
    .unwrap_err();
    assert_eq!(err.code, ErrorCode::FOAR0002);
}

#[rstest]
fn arithmetic_over_an_empty_operand_is_empty() {
    let node = elem("e").build();
    let result = run_on(&node, |arena| {
        let lhs = arena.empty();
        let rhs = arena.literal(AtomicValue::Integer(1));
        arena.alloc(ExprKind::Binary {
            op: BinaryOp::Add,
            lhs,
            rhs,
        })
    })
    .unwrap();
    assert!(result.is_empty());
}

#[rstest]
fn and_or_short_circuit_on_literals() {
    let node = elem("e").build();
    let result = run_on(&node, |arena| {
        binary(
            arena,
            BinaryOp::Or,
            AtomicValue::Boolean(true),
            AtomicValue::Boolean(false),
        )
    })
    .unwrap();
    assert!(bool_of(&result));
}
