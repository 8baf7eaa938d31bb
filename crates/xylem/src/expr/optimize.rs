//! Third analysis pass: loop-invariant hoisting, predicate pull-up,
//! filter-to-key-lookup rewriting, and insertion of the runtime sort or
//! reverse wrappers that restore the document-order contract where the
//! property algebra could not prove it statically.

use tracing::debug;

use crate::error::Error;
use crate::model::QName;
use crate::props::{Dependency, StaticProperty};

use super::promote::{self, PromotionOffer};
use super::simplify::{patch_child, simplify};
use super::typecheck::type_check;
use super::{AnalysisState, Axis, BinaryOp, ExprArena, ExprId, ExprKind, NodeTest, UNALLOCATED};

/// A key declaration visible to the optimizer: enough shape information
/// to recognize a filter expression that a key index can answer.
#[derive(Debug, Clone)]
pub struct KeyHint {
    pub name: QName,
    pub match_test: NodeTest,
    pub use_expr: ExprId,
}

#[derive(Debug, Default)]
pub struct OptimizeEnv {
    pub keys: Vec<KeyHint>,
}

/// Optimize the subtree rooted at `id` and return the surviving handle.
pub fn optimize(arena: &mut ExprArena, id: ExprId, env: &OptimizeEnv) -> Result<ExprId, Error> {
    if arena.state(id) >= AnalysisState::Optimized {
        return Ok(id);
    }

    let children = arena.children(id);
    let mut replacements = Vec::new();
    for child in children {
        let new = optimize(arena, child, env)?;
        if new != child {
            replacements.push((child, new));
        }
    }
    for (old, new) in replacements {
        patch_child(arena, id, old, new);
    }
    arena.adopt_children(id);
    arena.compute_props(id);

    let surviving = rewrite(arena, id, env)?;
    arena.compute_props(surviving);
    let surviving = insert_order_wrapper(arena, surviving);
    arena.compute_props(surviving);
    if arena.state(surviving) < AnalysisState::Optimized {
        arena.set_state(surviving, AnalysisState::Optimized);
    }
    Ok(surviving)
}

fn rewrite(arena: &mut ExprArena, id: ExprId, env: &OptimizeEnv) -> Result<ExprId, Error> {
    match arena.kind(id).clone() {
        ExprKind::ForEach { body, .. } => {
            let mut o = PromotionOffer::new();
            let new_body = promote::offer(arena, body, &mut o)?;
            if o.accepted.is_empty() {
                return Ok(id);
            }
            if new_body != body {
                patch_child(arena, id, body, new_body);
                arena.adopt_children(id);
            }
            debug!(bindings = o.accepted.len(), "hoisted loop-invariant subexpressions");
            let mut top = id;
            for hb in o.accepted.into_iter().rev() {
                top = arena.alloc(ExprKind::Let {
                    name: hb.name,
                    slot: UNALLOCATED,
                    value: hb.value,
                    body: top,
                });
                arena.adopt_children(top);
            }
            // Hoisting changed variable structure: re-run the full
            // analysis over the rewritten region.
            arena.reset(top);
            let top = simplify(arena, top)?;
            let top = type_check(arena, top)?;
            optimize(arena, top, env)
        }

        // a/b[pred] -> (a/b)[pred] when the predicate is not positional:
        // filtering after the merge gives the runtime a chance to use an
        // index over the whole path result.
        ExprKind::Path { start, step } => {
            if let ExprKind::Filter {
                base,
                predicate,
                positional: false,
            } = *arena.kind(step)
            {
                if !arena
                    .props(predicate)
                    .deps
                    .intersects(Dependency::POSITION | Dependency::LAST)
                {
                    let inner = arena.alloc(ExprKind::Path { start, step: base });
                    arena.adopt_children(inner);
                    arena.compute_props(inner);
                    arena.set_state(inner, AnalysisState::Checked);
                    let inner = insert_order_wrapper(arena, inner);
                    arena.compute_props(inner);
                    let filter = arena.alloc(ExprKind::Filter {
                        base: inner,
                        predicate,
                        positional: false,
                    });
                    arena.adopt_children(filter);
                    arena.compute_props(filter);
                    return rewrite(arena, filter, env);
                }
            }
            Ok(id)
        }

        ExprKind::Filter {
            base,
            predicate,
            positional: false,
        } => Ok(try_key_rewrite(arena, id, base, predicate, env)),

        _ => Ok(id),
    }
}

/// `//m[use = V]` becomes `key('k', V)` when a declared key has match
/// test `m` and use expression `use`, and `V` is focus-independent. The
/// key call consults (and on first use builds) the per-document index
/// instead of scanning.
fn try_key_rewrite(
    arena: &mut ExprArena,
    id: ExprId,
    base: ExprId,
    predicate: ExprId,
    env: &OptimizeEnv,
) -> ExprId {
    let ExprKind::Binary {
        op: BinaryOp::Eq,
        lhs,
        rhs,
    } = *arena.kind(predicate)
    else {
        return id;
    };
    if arena.props(rhs).deps.intersects(Dependency::FOCUS) {
        return id;
    }
    // Base must be a whole-document sweep: /descendant::m, possibly
    // behind the order wrapper the earlier stages inserted.
    let Some(match_test) = whole_document_sweep(arena, base) else {
        return id;
    };
    for hint in &env.keys {
        if hint.match_test == match_test && struct_eq(arena, hint.use_expr, lhs) {
            debug!(key = %hint.name, "rewrote filter to key lookup");
            let call = arena.alloc(ExprKind::KeyCall {
                key: hint.name.clone(),
                value: rhs,
            });
            arena.adopt_children(call);
            arena.compute_props(call);
            return call;
        }
    }
    id
}

fn whole_document_sweep(arena: &ExprArena, base: ExprId) -> Option<NodeTest> {
    let base = match arena.kind(base) {
        ExprKind::DocOrderSort(inner) => *inner,
        _ => base,
    };
    let ExprKind::Path { start, step } = arena.kind(base) else {
        return None;
    };
    if !matches!(arena.kind(*start), ExprKind::Root) {
        return None;
    }
    match arena.kind(*step) {
        ExprKind::AxisStep {
            axis: Axis::Descendant,
            test,
        } => Some(test.clone()),
        _ => None,
    }
}

/// Structural equality of two subtrees, ignoring handles and locations.
pub(crate) fn struct_eq(arena: &ExprArena, a: ExprId, b: ExprId) -> bool {
    if a == b {
        return true;
    }
    let (ka, kb) = (arena.kind(a), arena.kind(b));
    let shape_matches = match (ka, kb) {
        (ExprKind::Literal(x), ExprKind::Literal(y)) => x == y,
        (ExprKind::ContextItem, ExprKind::ContextItem)
        | (ExprKind::Root, ExprKind::Root) => true,
        (
            ExprKind::AxisStep { axis: xa, test: ta },
            ExprKind::AxisStep { axis: xb, test: tb },
        ) => xa == xb && ta == tb,
        (
            ExprKind::VarRef { name: na, .. },
            ExprKind::VarRef { name: nb, .. },
        ) => na == nb,
        (ExprKind::Binary { op: oa, .. }, ExprKind::Binary { op: ob, .. }) => oa == ob,
        (
            ExprKind::FunctionCall { function: fa, .. },
            ExprKind::FunctionCall { function: fb, .. },
        ) => fa == fb,
        (ExprKind::Path { .. }, ExprKind::Path { .. })
        | (ExprKind::SimpleMap { .. }, ExprKind::SimpleMap { .. })
        | (ExprKind::HybridPath { .. }, ExprKind::HybridPath { .. })
        | (ExprKind::Block(_), ExprKind::Block(_)) => true,
        (
            ExprKind::ConvertUntyped { required: ra, .. },
            ExprKind::ConvertUntyped { required: rb, .. },
        ) => ra == rb,
        (ExprKind::DocOrderSort(_), ExprKind::DocOrderSort(_))
        | (ExprKind::ReverseOrder(_), ExprKind::ReverseOrder(_)) => true,
        _ => false,
    };
    if !shape_matches {
        return false;
    }
    let ca = arena.children(a);
    let cb = arena.children(b);
    ca.len() == cb.len() && ca.iter().zip(&cb).all(|(x, y)| struct_eq(arena, *x, *y))
}

/// The document-order contract: a path whose natural order could not be
/// proven gets a runtime wrapper. Reverse-ordered results take the O(n)
/// reversal; anything else takes the full sort with deduplication.
fn insert_order_wrapper(arena: &mut ExprArena, id: ExprId) -> ExprId {
    if !matches!(arena.kind(id), ExprKind::Path { .. }) {
        return id;
    }
    let special = arena.props(id).special;
    if special.contains(StaticProperty::ORDERED_NODESET) {
        return id;
    }
    let wrapper = if special.contains(StaticProperty::REVERSE_DOCUMENT_ORDER) {
        ExprKind::ReverseOrder(id)
    } else {
        ExprKind::DocOrderSort(id)
    };
    let w = arena.alloc(wrapper);
    arena.adopt_children(w);
    arena.set_state(w, AnalysisState::Optimized);
    w
}
