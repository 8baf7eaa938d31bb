use std::sync::Arc;

use rstest::rstest;
use xylem::expr::{ExprArena, ExprId, ExprKind, SystemFunction};
use xylem::tree::{SimpleNode, elem};
use xylem::{
    AtomicValue, Controller, Error, ErrorCode, ExecutableBuilder, Item, KeyManager, Sequence,
    XPathContext, evaluate,
};

fn call(
    arena: &mut ExprArena,
    function: SystemFunction,
    args: Vec<AtomicValue>,
) -> ExprId {
    let args = args
        .into_iter()
        .map(|v| arena.literal(v))
        .collect::<Vec<_>>();
    arena.alloc(ExprKind::FunctionCall { function, args })
}

fn run(build: impl FnOnce(&mut ExprArena) -> ExprId) -> Result<Sequence<SimpleNode>, Error> {
    let mut b = ExecutableBuilder::new();
    let expr = build(b.arena_mut());
    let entry = b.declare_expression(expr);
    let exec = Arc::new(b.compile()?);
    let compiled = exec.entry(entry)?;
    let controller = Controller::new(exec, Arc::new(KeyManager::new()));
    let ctx = XPathContext::new(controller)
        .new_major(compiled.slot_count)
        .with_focus(Item::Node(elem("e").build()), 1, Some(1));
    evaluate(compiled.body, &ctx)
}

fn s(v: &str) -> AtomicValue {
    AtomicValue::String(v.into())
}

#[rstest]
#[case("abracadabra", "bra", "", true)]
#[case("abracadabra", "^bra", "", false)]
#[case("ABRACADABRA", "bra", "i", true)]
#[case("a\nb", "^b", "m", true)]
#[case("a\nb", "a.b", "s", true)]
#[case("hello", "h e l l o", "x", true)]
fn matches_honors_flags(
    #[case] input: &str,
    #[case] pattern: &str,
    #[case] flags: &str,
    #[case] expected: bool,
) {
    let result = run(|arena| {
        call(
            arena,
            SystemFunction::Matches,
            vec![s(input), s(pattern), s(flags)],
        )
    })
    .unwrap();
    assert_eq!(result, vec![Item::Atomic(AtomicValue::Boolean(expected))]);
}

#[rstest]
fn tokenize_splits_on_the_pattern() {
    let result = run(|arena| {
        call(
            arena,
            SystemFunction::Tokenize,
            vec![s("red, green,  blue"), s(",\\s*")],
        )
    })
    .unwrap();
    let tokens: Vec<String> = result
        .iter()
        .map(|item| item.string_value())
        .collect();
    assert_eq!(tokens, ["red", "green", "blue"]);
}

#[rstest]
fn tokenize_of_the_empty_string_is_empty() {
    let result = run(|arena| {
        call(arena, SystemFunction::Tokenize, vec![s(""), s(",")])
    })
    .unwrap();
    assert!(result.is_empty());
}

#[rstest]
fn invalid_flag_is_forx0001() {
    let err = run(|arena| {
        call(
            arena,
            SystemFunction::Matches,
            vec![s("a"), s("a"), s("q")],
        )
    })
    .unwrap_err();
    assert_eq!(err.code, ErrorCode::FORX0001);
}

#[rstest]
fn invalid_pattern_is_forx0002() {
    let err = run(|arena| {
        call(arena, SystemFunction::Matches, vec![s("a"), s("a(")])
    })
    .unwrap_err();
    assert_eq!(err.code, ErrorCode::FORX0002);
}

#[rstest]
fn string_functions_compose_with_regex_results() {
    // count(tokenize("a b c", "\s")) = 3
    let result = run(|arena| {
        let tok = call(
            arena,
            SystemFunction::Tokenize,
            vec![s("a b c"), s("\\s")],
        );
        arena.alloc(ExprKind::FunctionCall {
            function: SystemFunction::Count,
            args: vec![tok],
        })
    })
    .unwrap();
    assert_eq!(result, vec![Item::Atomic(AtomicValue::Integer(3))]);
}
