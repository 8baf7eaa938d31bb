use std::sync::Arc;

use rstest::rstest;
use xylem::expr::{Axis, ExprKind, NodeTest};
use xylem::output::build::{Event, EventRecorder};
use xylem::tree::{SimpleNode, doc, elem, text};
use xylem::{
    AtomicValue, Controller, Error, ErrorCode, ExecutableBuilder, Item, KeyManager, Pattern,
    QName, RecoveryPolicy, XPathContext, process,
};

fn name_test(name: &str) -> NodeTest {
    NodeTest::Name(QName::local_name(name))
}

/// doc -> r -> a("one"), b("two"), a("three")
fn sample() -> SimpleNode {
    doc()
        .child(
            elem("r")
                .child(elem("a").child(text("one")))
                .child(elem("b").child(text("two")))
                .child(elem("a").child(text("three"))),
        )
        .build()
}

fn text_template(b: &mut ExecutableBuilder, label: &str) -> xylem::TemplateId {
    let arena = b.arena_mut();
    let select = arena.literal(AtomicValue::String(label.to_string()));
    let body = arena.alloc(ExprKind::TextCtor { select });
    b.declare_template(None, Vec::new(), body)
}

fn apply_root_entry(b: &mut ExecutableBuilder) -> usize {
    let arena = b.arena_mut();
    let select = arena.alloc(ExprKind::ContextItem);
    let apply = arena.alloc(ExprKind::ApplyTemplates { select, mode: None });
    b.declare_expression(apply)
}

fn drive(
    b: ExecutableBuilder,
    entry: usize,
    root: &SimpleNode,
    policy: RecoveryPolicy,
) -> Result<Vec<Event>, Error> {
    let exec = Arc::new(b.compile()?);
    let compiled = exec.entry(entry)?;
    let controller = Controller::new(exec, Arc::new(KeyManager::new())).with_recovery(policy);
    let ctx = XPathContext::new(controller)
        .new_major(compiled.slot_count)
        .with_focus(Item::Node(root.clone()), 1, Some(1));
    let mut sink: EventRecorder<SimpleNode> = EventRecorder::new();
    process(compiled.body, &ctx, &mut sink)?;
    Ok(sink.events)
}

#[rstest]
fn builtin_rules_recurse_and_copy_text() {
    let mut b = ExecutableBuilder::new();
    let entry = apply_root_entry(&mut b);
    let events = drive(b, entry, &sample(), RecoveryPolicy::DoNotRecover).unwrap();
    assert_eq!(
        events,
        vec![
            Event::Characters("one".into()),
            Event::Characters("two".into()),
            Event::Characters("three".into()),
        ]
    );
}

#[rstest]
fn constructor_sequence_template_body_streams_to_the_receiver() {
    let mut b = ExecutableBuilder::new();
    let t = {
        let arena = b.arena_mut();
        let first = arena.literal(AtomicValue::String("first".to_string()));
        let first = arena.alloc(ExprKind::TextCtor { select: first });
        let second = arena.literal(AtomicValue::String("second".to_string()));
        let second = arena.alloc(ExprKind::TextCtor { select: second });
        let body = arena.make_block(vec![first, second]);
        b.declare_template(None, Vec::new(), body)
    };
    b.add_rule(None, Pattern::element(name_test("r")), t, 0, None);
    let entry = apply_root_entry(&mut b);
    let events = drive(b, entry, &sample(), RecoveryPolicy::DoNotRecover).unwrap();
    assert_eq!(
        events,
        vec![
            Event::Characters("first".into()),
            Event::Characters("second".into()),
        ]
    );
}

#[rstest]
fn declared_rule_takes_over_for_matching_elements() {
    let mut b = ExecutableBuilder::new();
    let t = text_template(&mut b, "A!");
    b.add_rule(None, Pattern::element(name_test("a")), t, 0, None);
    let entry = apply_root_entry(&mut b);
    let events = drive(b, entry, &sample(), RecoveryPolicy::DoNotRecover).unwrap();
    assert_eq!(
        events,
        vec![
            Event::Characters("A!".into()),
            Event::Characters("two".into()),
            Event::Characters("A!".into()),
        ]
    );
}

#[rstest]
fn higher_priority_wins_regardless_of_declaration_order() {
    let mut b = ExecutableBuilder::new();
    let low = text_template(&mut b, "low");
    let high = text_template(&mut b, "high");
    b.add_rule(None, Pattern::element(name_test("a")), low, 0, Some(-1.0));
    b.add_rule(None, Pattern::element(name_test("a")), high, 0, Some(1.0));
    let entry = apply_root_entry(&mut b);
    let events = drive(b, entry, &sample(), RecoveryPolicy::DoNotRecover).unwrap();
    assert_eq!(events[0], Event::Characters("high".into()));
}

#[rstest]
fn ambiguous_match_is_an_error_when_not_recovering() {
    let mut b = ExecutableBuilder::new();
    let first = text_template(&mut b, "first");
    let second = text_template(&mut b, "second");
    b.add_rule(None, Pattern::element(name_test("a")), first, 0, Some(0.0));
    b.add_rule(None, Pattern::element(name_test("a")), second, 0, Some(0.0));
    let entry = apply_root_entry(&mut b);
    let err = drive(b, entry, &sample(), RecoveryPolicy::DoNotRecover).unwrap_err();
    assert_eq!(err.code, ErrorCode::XTRE0540);
}

#[rstest]
fn silent_recovery_picks_the_last_declared_rule() {
    let mut b = ExecutableBuilder::new();
    let first = text_template(&mut b, "first");
    let second = text_template(&mut b, "second");
    b.add_rule(None, Pattern::element(name_test("a")), first, 0, Some(0.0));
    b.add_rule(None, Pattern::element(name_test("a")), second, 0, Some(0.0));
    let entry = apply_root_entry(&mut b);
    let events = drive(b, entry, &sample(), RecoveryPolicy::RecoverSilently).unwrap();
    assert_eq!(events[0], Event::Characters("second".into()));
}

#[rstest]
fn import_precedence_beats_priority() {
    let mut b = ExecutableBuilder::new();
    let weak = text_template(&mut b, "weak");
    let strong = text_template(&mut b, "strong");
    b.add_rule(None, Pattern::element(name_test("a")), weak, 0, Some(10.0));
    b.add_rule(None, Pattern::element(name_test("a")), strong, 1, Some(-10.0));
    let entry = apply_root_entry(&mut b);
    let events = drive(b, entry, &sample(), RecoveryPolicy::DoNotRecover).unwrap();
    assert_eq!(events[0], Event::Characters("strong".into()));
}

#[rstest]
fn named_mode_only_sees_its_own_rules() {
    let mut b = ExecutableBuilder::new();
    let t = text_template(&mut b, "other-mode");
    b.add_rule(
        Some(QName::local_name("special")),
        Pattern::element(name_test("a")),
        t,
        0,
        None,
    );
    // Unmoded apply-templates falls back to the builtin rules.
    let entry = apply_root_entry(&mut b);
    let events = drive(b, entry, &sample(), RecoveryPolicy::DoNotRecover).unwrap();
    assert_eq!(events[0], Event::Characters("one".into()));
}
