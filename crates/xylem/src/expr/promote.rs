//! Loop-invariant hoisting. An optimizing construct (currently the
//! for-each loop) passes a [`PromotionOffer`] down through its body;
//! subexpressions that are focus-independent and create no nodes accept
//! the offer and are replaced by a reference to a binding hoisted above
//! the loop.

use compact_str::CompactString;

use crate::error::Error;
use crate::model::QName;
use crate::props::{Dependency, StaticProperty};

use super::simplify::patch_child;
use super::{Binding, BindingScope, ExprArena, ExprId, ExprKind};

const HOIST_NS: &str = "http://xylem-xml.org/ns/hoisted";

/// One binding pulled out of a loop. The synthetic name ties the variable
/// reference left behind to the `Let` the caller wraps around the loop;
/// slots are assigned by the regular allocation pass afterwards.
#[derive(Debug)]
pub struct HoistedBinding {
    pub name: QName,
    pub value: ExprId,
}

#[derive(Debug, Default)]
pub struct PromotionOffer {
    pub accepted: Vec<HoistedBinding>,
    counter: u32,
}

impl PromotionOffer {
    pub fn new() -> Self {
        Self::default()
    }

    fn fresh_name(&mut self) -> QName {
        self.counter += 1;
        QName::prefixed(
            "zz",
            HOIST_NS,
            CompactString::from(format!("hoisted-{}", self.counter)),
        )
    }
}

/// Walk the subtree offering promotion; returns the surviving handle for
/// the position `id` occupied (a variable reference if `id` itself was
/// hoisted).
pub fn offer(
    arena: &mut ExprArena,
    id: ExprId,
    o: &mut PromotionOffer,
) -> Result<ExprId, Error> {
    if accepts(arena, id) {
        let name = o.fresh_name();
        let var = arena.alloc(ExprKind::VarRef {
            name: name.clone(),
            binding: Binding::unallocated(BindingScope::Local),
        });
        o.accepted.push(HoistedBinding { name, value: id });
        return Ok(var);
    }

    // Constructs that introduce a fresh focus for part of their body only
    // expose the focus-free operand to the offer.
    let eligible: Vec<ExprId> = match arena.kind(id) {
        ExprKind::Path { start, .. }
        | ExprKind::SimpleMap { start, .. }
        | ExprKind::HybridPath { start, .. } => vec![*start],
        ExprKind::Filter { base, .. } => vec![*base],
        ExprKind::ForEach { select, .. } => vec![*select],
        ExprKind::ApplyTemplates { select, .. } => vec![*select],
        _ => arena.children(id),
    };

    for child in eligible {
        let new = offer(arena, child, o)?;
        if new != child {
            patch_child(arena, id, child, new);
            arena.adopt_children(id);
        }
    }
    Ok(id)
}

/// Eligibility: independent of the focus and of any local variable bound
/// inside the loop, creates no nodes, and is worth naming (leaves are
/// cheaper to re-evaluate than to bind).
fn accepts(arena: &ExprArena, id: ExprId) -> bool {
    let trivial = matches!(
        arena.kind(id),
        ExprKind::Literal(_)
            | ExprKind::VarRef { .. }
            | ExprKind::ContextItem
            | ExprKind::Root
            | ExprKind::AxisStep { .. }
    );
    if trivial {
        return false;
    }
    let props = arena.props(id);
    !props.deps.intersects(Dependency::FOCUS | Dependency::LOCAL_VARIABLES)
        && props.special.contains(StaticProperty::NON_CREATIVE)
}
