//! Second analysis pass: bottom-up item type and cardinality inference,
//! path-form resolution, untyped-atomic conversion insertion, and the
//! descendant shortcut rewrite.

use crate::error::{Error, ErrorCode, Role};
use crate::item::PrimitiveType;
use crate::props::{Dependency, ItemType, StaticProperty};

use super::simplify::patch_child;
use super::{AnalysisState, Axis, ExprArena, ExprId, ExprKind, NodeTest};

/// Type-check the subtree rooted at `id` and return the surviving handle.
pub fn type_check(arena: &mut ExprArena, id: ExprId) -> Result<ExprId, Error> {
    if arena.state(id) >= AnalysisState::Checked {
        return Ok(id);
    }

    let children = arena.children(id);
    let mut replacements = Vec::new();
    for child in children {
        let new = type_check(arena, child)?;
        if new != child {
            replacements.push((child, new));
        }
    }
    for (old, new) in replacements {
        patch_child(arena, id, old, new);
    }
    arena.adopt_children(id);

    let surviving = check(arena, id)?;
    arena.compute_props(surviving);
    if arena.state(surviving) < AnalysisState::Checked {
        arena.set_state(surviving, AnalysisState::Checked);
    }
    Ok(surviving)
}

fn check(arena: &mut ExprArena, id: ExprId) -> Result<ExprId, Error> {
    match arena.kind(id).clone() {
        ExprKind::HybridPath { start, step } => resolve_path(arena, id, start, step),

        // A path already committed still gets the shortcut rewrite when
        // re-analyzed after promotion.
        ExprKind::Path { start, step } => Ok(rewrite_descendant_shortcut(arena, id, start, step)),

        ExprKind::Binary { op, lhs, rhs } if op.is_comparison() => {
            let lhs_t = arena.props(lhs).item_type;
            let rhs_t = arena.props(rhs).item_type;
            if needs_numeric_conversion(lhs_t, rhs_t) {
                let conv = wrap_convert(arena, lhs, PrimitiveType::Double);
                patch_child(arena, id, lhs, conv);
                arena.adopt_children(id);
            }
            let lhs_t = current_lhs_type(arena, id);
            if needs_numeric_conversion(rhs_t, lhs_t) {
                let conv = wrap_convert(arena, rhs, PrimitiveType::Double);
                patch_child(arena, id, rhs, conv);
                arena.adopt_children(id);
            }
            Ok(id)
        }

        ExprKind::FunctionCall { function, args } => {
            let (min, max) = function.arity();
            if args.len() < min || args.len() > max {
                return Err(Error::static_err(
                    ErrorCode::XPST0017,
                    format!(
                        "{}() called with {} arguments",
                        function.name(),
                        args.len()
                    ),
                ));
            }
            Ok(id)
        }

        ExprKind::Filter {
            base, predicate, ..
        } => {
            let p = arena.props(predicate);
            let positional = matches!(
                p.item_type,
                ItemType::Atomic(t) if t.is_numeric()
            ) || p.deps.intersects(Dependency::POSITION | Dependency::LAST);
            if let ExprKind::Filter {
                positional: slot, ..
            } = arena.kind_mut(id)
            {
                *slot = positional;
            }
            let _ = base;
            Ok(id)
        }

        _ => Ok(id),
    }
}

fn current_lhs_type(arena: &ExprArena, id: ExprId) -> ItemType {
    match arena.kind(id) {
        ExprKind::Binary { lhs, .. } => arena.props(*lhs).item_type,
        _ => ItemType::AnyItem,
    }
}

/// Untyped (or node, which atomizes to untyped) on one side and a known
/// numeric type on the other: the untyped side is converted to double.
fn needs_numeric_conversion(this: ItemType, other: ItemType) -> bool {
    let this_untyped = matches!(this, ItemType::Atomic(PrimitiveType::UntypedAtomic))
        || this.is_statically_nodes();
    let other_numeric = matches!(other, ItemType::Atomic(t) if t.is_numeric());
    this_untyped && other_numeric
}

fn wrap_convert(arena: &mut ExprArena, operand: ExprId, required: PrimitiveType) -> ExprId {
    let conv = arena.alloc(ExprKind::ConvertUntyped { operand, required });
    arena.adopt_children(conv);
    arena.compute_props(conv);
    arena.set_state(conv, AnalysisState::Checked);
    conv
}

/// Decide which composition form `start/step` takes, based on the static
/// type of the step.
fn resolve_path(
    arena: &mut ExprArena,
    id: ExprId,
    start: ExprId,
    step: ExprId,
) -> Result<ExprId, Error> {
    let start_t = arena.props(start).item_type;
    if start_t.is_statically_atomic() {
        return Err(Error::static_err(
            ErrorCode::XPTY0019,
            format!("path start is a {start_t:?}, not a node sequence"),
        )
        .with_role(&Role::binary("/", 0)));
    }

    let step_props = *arena.props(step);
    let step_t = step_props.item_type;
    if step_t.is_statically_nodes() && step_props.special.contains(StaticProperty::NON_CREATIVE) {
        *arena.kind_mut(id) = ExprKind::Path { start, step };
        let out = rewrite_descendant_shortcut(arena, id, start, step);
        return Ok(out);
    }
    if step_t.is_statically_atomic() {
        *arena.kind_mut(id) = ExprKind::SimpleMap { start, step };
        return Ok(id);
    }
    // Unknown until runtime; the hybrid evaluator inspects the first
    // delivered item and commits to one set of rules per evaluation.
    Ok(id)
}

/// `a/descendant-or-self::node()/child::x` becomes `a/descendant::x`
/// when the child step carries no filter. Also handles the
/// context-relative spelling where the inner path starts at `.`.
fn rewrite_descendant_shortcut(
    arena: &mut ExprArena,
    id: ExprId,
    start: ExprId,
    step: ExprId,
) -> ExprId {
    let ExprKind::AxisStep {
        axis: Axis::Child,
        test,
    } = arena.kind(step).clone()
    else {
        return id;
    };

    // start ends in descendant-or-self::node()?
    let inner = match arena.kind(start) {
        ExprKind::AxisStep {
            axis: Axis::DescendantOrSelf,
            test: NodeTest::AnyNode,
        } => None,
        ExprKind::Path {
            start: inner_start,
            step: inner_step,
        } => {
            if matches!(
                arena.kind(*inner_step),
                ExprKind::AxisStep {
                    axis: Axis::DescendantOrSelf,
                    test: NodeTest::AnyNode,
                }
            ) {
                Some(*inner_start)
            } else {
                return id;
            }
        }
        _ => return id,
    };

    let desc = arena.alloc(ExprKind::AxisStep {
        axis: Axis::Descendant,
        test,
    });
    arena.compute_props(desc);
    arena.set_state(desc, AnalysisState::Checked);
    match inner {
        Some(inner_start) => {
            *arena.kind_mut(id) = ExprKind::Path {
                start: inner_start,
                step: desc,
            };
            arena.adopt_children(id);
            id
        }
        None => desc,
    }
}

#[cfg(test)]
mod tests {
    use super::super::simplify::simplify;
    use super::*;
    use crate::item::AtomicValue;
    use crate::model::QName;

    fn axis_step(arena: &mut ExprArena, axis: Axis, test: NodeTest) -> ExprId {
        arena.alloc(ExprKind::AxisStep { axis, test })
    }

    #[test]
    fn node_step_resolves_to_path_form() {
        let mut a = ExprArena::new();
        let start = axis_step(&mut a, Axis::Child, NodeTest::Name(QName::local_name("a")));
        let step = axis_step(&mut a, Axis::Child, NodeTest::Name(QName::local_name("b")));
        let p = a.make_path(start, step);
        let p = simplify(&mut a, p).unwrap();
        let p = type_check(&mut a, p).unwrap();
        assert!(matches!(a.kind(p), ExprKind::Path { .. }));
    }

    #[test]
    fn atomic_step_resolves_to_simple_map() {
        let mut a = ExprArena::new();
        let start = axis_step(&mut a, Axis::Child, NodeTest::Name(QName::local_name("a")));
        let step = a.alloc(ExprKind::FunctionCall {
            function: super::super::SystemFunction::StringLength,
            args: vec![],
        });
        let p = a.make_path(start, step);
        let p = simplify(&mut a, p).unwrap();
        let p = type_check(&mut a, p).unwrap();
        assert!(matches!(a.kind(p), ExprKind::SimpleMap { .. }));
    }

    #[test]
    fn atomic_path_start_is_rejected_with_role() {
        let mut a = ExprArena::new();
        let start = a.literal(AtomicValue::Integer(1));
        let step = axis_step(&mut a, Axis::Child, NodeTest::AnyName);
        let p = a.make_path(start, step);
        let p = simplify(&mut a, p).unwrap();
        let err = type_check(&mut a, p).unwrap_err();
        assert_eq!(err.code, ErrorCode::XPTY0019);
        assert_eq!(err.role.as_deref(), Some("first operand of '/'"));
    }

    #[test]
    fn dot_slash_slash_becomes_descendant_step() {
        let mut a = ExprArena::new();
        let ctx = a.alloc(ExprKind::ContextItem);
        let dos = axis_step(&mut a, Axis::DescendantOrSelf, NodeTest::AnyNode);
        let inner = a.make_path(ctx, dos);
        let child = axis_step(&mut a, Axis::Child, NodeTest::Name(QName::local_name("x")));
        let outer = a.make_path(inner, child);
        let outer = simplify(&mut a, outer).unwrap();
        let outer = type_check(&mut a, outer).unwrap();
        match a.kind(outer) {
            ExprKind::Path { start, step } => {
                assert!(matches!(a.kind(*start), ExprKind::ContextItem));
                assert!(matches!(
                    a.kind(*step),
                    ExprKind::AxisStep {
                        axis: Axis::Descendant,
                        ..
                    }
                ));
            }
            other => panic!("expected rewritten path, got {other:?}"),
        }
    }
}
