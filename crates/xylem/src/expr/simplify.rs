//! First analysis pass: context-free rewrites that need no type
//! information. Literal-only folding, empty-operand short circuits, block
//! flattening and the redundant self-step collapse.

use crate::error::Error;
use crate::item::AtomicValue;
use crate::props::StaticProperty;

use super::eval;
use super::{AnalysisState, Axis, BinaryOp, ExprArena, ExprId, ExprKind, NodeTest};

/// Simplify the subtree rooted at `id` and return the surviving handle.
/// Idempotent: a node already at `Simplified` or later is returned as-is,
/// the very same handle.
pub fn simplify(arena: &mut ExprArena, id: ExprId) -> Result<ExprId, Error> {
    if arena.state(id) >= AnalysisState::Simplified {
        return Ok(id);
    }

    simplify_children(arena, id)?;
    let surviving = rewrite(arena, id)?;
    if arena.state(surviving) < AnalysisState::Simplified {
        arena.set_state(surviving, AnalysisState::Simplified);
    }
    Ok(surviving)
}

fn simplify_children(arena: &mut ExprArena, id: ExprId) -> Result<(), Error> {
    let children = arena.children(id);
    let mut replacements = Vec::new();
    for child in children {
        let new = simplify(arena, child)?;
        if new != child {
            replacements.push((child, new));
        }
    }
    for (old, new) in replacements {
        patch_child(arena, id, old, new);
    }
    arena.adopt_children(id);
    Ok(())
}

/// Swap one child handle for another inside the parent's kind.
pub(super) fn patch_child(arena: &mut ExprArena, parent: ExprId, old: ExprId, new: ExprId) {
    match arena.kind_mut(parent) {
        ExprKind::Path { start, step }
        | ExprKind::SimpleMap { start, step }
        | ExprKind::HybridPath { start, step } => {
            if *start == old {
                *start = new;
            }
            if *step == old {
                *step = new;
            }
        }
        ExprKind::Filter {
            base, predicate, ..
        } => {
            if *base == old {
                *base = new;
            }
            if *predicate == old {
                *predicate = new;
            }
        }
        ExprKind::If {
            condition,
            then_branch,
            else_branch,
        } => {
            for slot in [condition, then_branch, else_branch] {
                if *slot == old {
                    *slot = new;
                }
            }
        }
        ExprKind::Block(items) => {
            for slot in items {
                if *slot == old {
                    *slot = new;
                }
            }
        }
        ExprKind::Let { value, body, .. } => {
            if *value == old {
                *value = new;
            }
            if *body == old {
                *body = new;
            }
        }
        ExprKind::Binary { lhs, rhs, .. } => {
            if *lhs == old {
                *lhs = new;
            }
            if *rhs == old {
                *rhs = new;
            }
        }
        ExprKind::FunctionCall { args, .. } => {
            for slot in args {
                if *slot == old {
                    *slot = new;
                }
            }
        }
        ExprKind::KeyCall { value, .. } => {
            if *value == old {
                *value = new;
            }
        }
        ExprKind::ConvertUntyped { operand, .. } => {
            if *operand == old {
                *operand = new;
            }
        }
        ExprKind::DocOrderSort(e) | ExprKind::ReverseOrder(e) => {
            if *e == old {
                *e = new;
            }
        }
        ExprKind::ElementCtor { content, .. } => {
            if *content == old {
                *content = new;
            }
        }
        ExprKind::AttributeCtor { select, .. }
        | ExprKind::TextCtor { select }
        | ExprKind::CommentCtor { select }
        | ExprKind::PiCtor { select, .. } => {
            if *select == old {
                *select = new;
            }
        }
        ExprKind::ForEach { select, body } => {
            if *select == old {
                *select = new;
            }
            if *body == old {
                *body = new;
            }
        }
        ExprKind::ApplyTemplates { select, .. } => {
            if *select == old {
                *select = new;
            }
        }
        ExprKind::CallTemplate { params, .. } => {
            for (_, slot) in params {
                if *slot == old {
                    *slot = new;
                }
            }
        }
        ExprKind::Literal(_)
        | ExprKind::ContextItem
        | ExprKind::Root
        | ExprKind::AxisStep { .. }
        | ExprKind::VarRef { .. } => {}
    }
}

fn rewrite(arena: &mut ExprArena, id: ExprId) -> Result<ExprId, Error> {
    match arena.kind(id).clone() {
        ExprKind::Block(items) => {
            let needs_rebuild = items.iter().any(|i| {
                matches!(arena.kind(*i), ExprKind::Block(_)) || arena.is_empty_literal(*i)
            });
            if needs_rebuild {
                Ok(arena.make_block(items))
            } else {
                Ok(id)
            }
        }

        ExprKind::Path { start, step }
        | ExprKind::SimpleMap { start, step }
        | ExprKind::HybridPath { start, step } => {
            if arena.is_empty_literal(start) || arena.is_empty_literal(step) {
                return Ok(arena.empty());
            }
            // a/self::node() adds nothing when a is already in document
            // order with no duplicates.
            if matches!(
                arena.kind(step),
                ExprKind::AxisStep {
                    axis: Axis::SelfAxis,
                    test: NodeTest::AnyNode
                }
            ) {
                ensure_props(arena, start);
                if arena
                    .props(start)
                    .special
                    .contains(StaticProperty::ORDERED_NODESET)
                {
                    return Ok(start);
                }
            }
            Ok(id)
        }

        ExprKind::Filter { base, .. } | ExprKind::ForEach { select: base, .. } => {
            if arena.is_empty_literal(base) {
                Ok(arena.empty())
            } else {
                Ok(id)
            }
        }

        ExprKind::If {
            condition,
            then_branch,
            else_branch,
        } => match literal_ebv(arena, condition) {
            Some(true) => Ok(then_branch),
            Some(false) => Ok(else_branch),
            None => Ok(id),
        },

        ExprKind::Binary { op, lhs, rhs } => {
            if let (Some(a), Some(b)) = (singleton_literal(arena, lhs), singleton_literal(arena, rhs))
            {
                if let Some(folded) = eval::fold_binary(op, &a, &b) {
                    return Ok(arena.literal(folded));
                }
            }
            if matches!(op, BinaryOp::And | BinaryOp::Or) {
                // Short-circuit on a known left operand.
                if let Some(left) = literal_ebv(arena, lhs) {
                    return match (op, left) {
                        (BinaryOp::And, false) => Ok(arena.literal(AtomicValue::Boolean(false))),
                        (BinaryOp::Or, true) => Ok(arena.literal(AtomicValue::Boolean(true))),
                        _ => Ok(rhs_as_boolean(arena, rhs)),
                    };
                }
            }
            Ok(id)
        }

        ExprKind::ConvertUntyped { operand, required } => {
            if let ExprKind::Literal(values) = arena.kind(operand).clone() {
                let mut out = Vec::with_capacity(values.len());
                for v in values {
                    out.push(v.convert_to(required)?);
                }
                return Ok(arena.alloc(ExprKind::Literal(out)));
            }
            Ok(id)
        }

        ExprKind::FunctionCall { function, args }
            if function == super::SystemFunction::Not && args.len() == 1 =>
        {
            if let Some(b) = literal_ebv(arena, args[0]) {
                return Ok(arena.literal(AtomicValue::Boolean(!b)));
            }
            Ok(id)
        }

        _ => Ok(id),
    }
}

fn rhs_as_boolean(arena: &mut ExprArena, rhs: ExprId) -> ExprId {
    let id = arena.alloc(ExprKind::FunctionCall {
        function: super::SystemFunction::BooleanFn,
        args: vec![rhs],
    });
    arena.adopt_children(id);
    id
}

fn singleton_literal(arena: &ExprArena, id: ExprId) -> Option<AtomicValue> {
    match arena.kind(id) {
        ExprKind::Literal(values) if values.len() == 1 => Some(values[0].clone()),
        _ => None,
    }
}

/// Effective boolean value of a literal expression, when decidable.
fn literal_ebv(arena: &ExprArena, id: ExprId) -> Option<bool> {
    match arena.kind(id) {
        ExprKind::Literal(values) => match values.as_slice() {
            [] => Some(false),
            [one] => match one {
                AtomicValue::Boolean(b) => Some(*b),
                AtomicValue::String(s)
                | AtomicValue::UntypedAtomic(s)
                | AtomicValue::AnyUri(s) => Some(!s.is_empty()),
                AtomicValue::Integer(i) => Some(*i != 0),
                AtomicValue::Double(d) | AtomicValue::Decimal(d) => {
                    Some(*d != 0.0 && !d.is_nan())
                }
                _ => None,
            },
            _ => None,
        },
        _ => None,
    }
}

/// Bottom-up property computation for subtrees that need ordering facts
/// before the type-check pass has run.
pub(super) fn ensure_props(arena: &mut ExprArena, id: ExprId) {
    for child in arena.children(id) {
        ensure_props(arena, child);
    }
    arena.compute_props(id);
}

#[cfg(test)]
mod tests {
    use super::super::SystemFunction;
    use super::*;
    use crate::model::QName;

    #[test]
    fn simplify_is_idempotent_and_returns_same_handle() {
        let mut a = ExprArena::new();
        let x = a.literal(AtomicValue::Integer(1));
        let y = a.literal(AtomicValue::Integer(2));
        let block = a.alloc(ExprKind::Block(vec![x, y]));
        a.adopt_children(block);
        let once = simplify(&mut a, block).unwrap();
        let twice = simplify(&mut a, once).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn empty_path_operand_short_circuits() {
        let mut a = ExprArena::new();
        let start = a.empty();
        let step = a.alloc(ExprKind::AxisStep {
            axis: Axis::Child,
            test: NodeTest::Name(QName::local_name("x")),
        });
        let path = a.make_path(start, step);
        let out = simplify(&mut a, path).unwrap();
        assert!(a.is_empty_literal(out));
    }

    #[test]
    fn literal_comparison_folds() {
        let mut a = ExprArena::new();
        let one = a.literal(AtomicValue::Integer(1));
        let two = a.literal(AtomicValue::Integer(2));
        let cmp = a.alloc(ExprKind::Binary {
            op: BinaryOp::Lt,
            lhs: one,
            rhs: two,
        });
        a.adopt_children(cmp);
        let out = simplify(&mut a, cmp).unwrap();
        match a.kind(out) {
            ExprKind::Literal(v) => assert_eq!(v.as_slice(), &[AtomicValue::Boolean(true)]),
            other => panic!("expected folded literal, got {other:?}"),
        }
    }

    #[test]
    fn not_of_literal_folds() {
        let mut a = ExprArena::new();
        let t = a.literal(AtomicValue::Boolean(true));
        let call = a.alloc(ExprKind::FunctionCall {
            function: SystemFunction::Not,
            args: vec![t],
        });
        a.adopt_children(call);
        let out = simplify(&mut a, call).unwrap();
        match a.kind(out) {
            ExprKind::Literal(v) => assert_eq!(v.as_slice(), &[AtomicValue::Boolean(false)]),
            other => panic!("expected folded literal, got {other:?}"),
        }
    }
}
