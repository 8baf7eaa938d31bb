//! Dual-mode evaluation of the expression tree: pull (`iterate` /
//! `evaluate`) and push (`process`). Push-mode template invocations
//! return a possible [`TailCall`] instead of recursing, and the
//! trampoline in [`drain_tail`] keeps the native stack flat no matter
//! how deep the template recursion goes.

use crate::context::XPathContext;
use crate::error::{Error, ErrorCode};
use crate::item::{AtomicValue, Item, PrimitiveType, Sequence, effective_boolean_value};
use crate::iter::{
    ListIterator, SequenceIterator, document_order_distinct, materialize, union_in_document_order,
};
use crate::key::key_set_named;
use crate::model::{NodeInfo, NodeKind, QName};
use crate::output::{Receiver, copy_node};
use crate::props::Dependency;
use crate::regex;
use crate::rule::TemplateId;

use super::{Axis, BinaryOp, BindingScope, ExprArena, ExprId, ExprKind, NodeTest, SystemFunction};

/// A template invocation handed back to the trampoline instead of being
/// made on the native stack. The context already carries the callee's
/// frame with its parameters bound.
pub struct TailCall<N: NodeInfo> {
    pub template: TemplateId,
    pub context: XPathContext<N>,
}

/// Run tail calls until a template body completes without producing one.
pub fn drain_tail<N: NodeInfo + 'static>(
    mut tail: Option<TailCall<N>>,
    out: &mut dyn Receiver<N>,
) -> Result<(), Error> {
    while let Some(tc) = tail {
        let body = tc.context.executable().template(tc.template)?.body;
        tail = process(body, &tc.context, out)?;
    }
    Ok(())
}

// ---------------------------------------------------------------------
// Pull evaluation

/// Materialized evaluation. Lazy kinds go through `iterate`.
pub fn evaluate<N: NodeInfo + 'static>(
    id: ExprId,
    ctx: &XPathContext<N>,
) -> Result<Sequence<N>, Error> {
    let exec = ctx.executable().clone();
    let arena = exec.arena();
    let result = match arena.kind(id) {
        ExprKind::Literal(values) => {
            Ok(values.iter().cloned().map(Item::Atomic).collect())
        }
        ExprKind::ContextItem => Ok(vec![ctx.context_item()?]),
        ExprKind::Root => {
            let node = ctx.context_node()?;
            Ok(vec![Item::Node(node.document_root())])
        }
        ExprKind::AxisStep { axis, test } => {
            let origin = ctx.context_node()?;
            Ok(axis_nodes(&origin, *axis, test)
                .into_iter()
                .map(Item::Node)
                .collect())
        }

        ExprKind::Path { .. } | ExprKind::SimpleMap { .. } => {
            materialize(&mut *iterate(id, ctx)?)
        }

        ExprKind::HybridPath { start, step } => {
            evaluate_hybrid(*start, *step, arena.props(*step).deps, ctx)
        }

        ExprKind::Filter {
            base, predicate, ..
        } => {
            let input = evaluate(*base, ctx)?;
            let last = input.len();
            let mut out = Vec::new();
            for (i, item) in input.into_iter().enumerate() {
                let pctx = ctx.with_focus(item.clone(), i + 1, Some(last));
                if predicate_holds(*predicate, &pctx, i + 1)? {
                    out.push(item);
                }
            }
            Ok(out)
        }

        ExprKind::If {
            condition,
            then_branch,
            else_branch,
        } => {
            let c = evaluate(*condition, ctx)?;
            if effective_boolean_value(&c)? {
                evaluate(*then_branch, ctx)
            } else {
                evaluate(*else_branch, ctx)
            }
        }

        ExprKind::Block(items) => {
            let items = items.clone();
            let mut out = Vec::new();
            for item in items {
                out.extend(evaluate(item, ctx)?);
            }
            Ok(out)
        }

        ExprKind::VarRef { binding, .. } => match binding.scope {
            BindingScope::Local => ctx.local(binding.slot),
            BindingScope::Global => ctx.global(binding.slot),
        },

        ExprKind::Let {
            slot, value, body, ..
        } => {
            let v = evaluate(*value, ctx)?;
            ctx.set_local(*slot, v)?;
            evaluate(*body, ctx)
        }

        ExprKind::Binary { op, lhs, rhs } => evaluate_binary(*op, *lhs, *rhs, ctx),

        ExprKind::FunctionCall { function, args } => {
            let args = args.clone();
            evaluate_function(*function, &args, ctx)
        }

        ExprKind::KeyCall { key, value } => {
            let key = key.clone();
            let value = *value;
            evaluate_key_call(&key, value, ctx)
        }

        ExprKind::ConvertUntyped { operand, required } => {
            let required = *required;
            let input = evaluate(*operand, ctx)?;
            let mut out = Vec::with_capacity(input.len());
            for item in input {
                let converted = match item {
                    Item::Node(_) => item.atomize().convert_to(required)?,
                    Item::Atomic(a)
                        if a.primitive_type() == PrimitiveType::UntypedAtomic =>
                    {
                        a.convert_to(required)?
                    }
                    Item::Atomic(a) => a,
                };
                out.push(Item::Atomic(converted));
            }
            Ok(out)
        }

        ExprKind::DocOrderSort(inner) => Ok(document_order_distinct(evaluate(*inner, ctx)?)),
        ExprKind::ReverseOrder(inner) => {
            let mut v = evaluate(*inner, ctx)?;
            v.reverse();
            Ok(v)
        }

        ExprKind::ForEach { select, body } => {
            let (select, body) = (*select, *body);
            let input = evaluate(select, ctx)?;
            let last = input.len();
            let mut out = Vec::new();
            for (i, item) in input.into_iter().enumerate() {
                let bctx = ctx.with_focus(item, i + 1, Some(last));
                out.extend(evaluate(body, &bctx)?);
            }
            Ok(out)
        }

        ExprKind::ElementCtor { .. }
        | ExprKind::AttributeCtor { .. }
        | ExprKind::TextCtor { .. }
        | ExprKind::CommentCtor { .. }
        | ExprKind::PiCtor { .. }
        | ExprKind::ApplyTemplates { .. }
        | ExprKind::CallTemplate { .. } => Err(Error::pipeline(
            ErrorCode::XPTY0004,
            "push-only instruction evaluated in pull mode; route it through a receiver",
        )),
    };
    result.map_err(|e| match arena.location(id) {
        Some(loc) => e.maybe_location(loc),
        None => e,
    })
}

/// Lazy cursor over the expression's result.
pub fn iterate<N: NodeInfo + 'static>(
    id: ExprId,
    ctx: &XPathContext<N>,
) -> Result<Box<dyn SequenceIterator<N>>, Error> {
    let exec = ctx.executable().clone();
    let arena = exec.arena();
    match arena.kind(id) {
        ExprKind::Path { start, step } | ExprKind::SimpleMap { start, step } => {
            let step_deps = arena.props(*step).deps;
            MappingIterator::start(*start, *step, step_deps, ctx).map(|m| {
                let b: Box<dyn SequenceIterator<N>> = Box::new(m);
                b
            })
        }
        _ => Ok(Box::new(ListIterator::new(evaluate(id, ctx)?))),
    }
}

pub fn effective_boolean<N: NodeInfo + 'static>(
    id: ExprId,
    ctx: &XPathContext<N>,
) -> Result<bool, Error> {
    effective_boolean_value(&evaluate(id, ctx)?)
}

/// Focus-tracking iterator behind path and mapping expressions: one step
/// evaluation per input item, results delivered in input order.
struct MappingIterator<N: NodeInfo> {
    input: Box<dyn SequenceIterator<N>>,
    step: ExprId,
    ctx: XPathContext<N>,
    current: Option<Box<dyn SequenceIterator<N>>>,
    position: usize,
    last: Option<usize>,
}

impl<N: NodeInfo + 'static> MappingIterator<N> {
    fn start(
        start: ExprId,
        step: ExprId,
        step_deps: Dependency,
        ctx: &XPathContext<N>,
    ) -> Result<Self, Error> {
        // last() inside the step forces the input to be counted up front.
        let (input, last): (Box<dyn SequenceIterator<N>>, Option<usize>) =
            if step_deps.contains(Dependency::LAST) {
                let items = evaluate(start, ctx)?;
                let len = items.len();
                (Box::new(ListIterator::new(items)), Some(len))
            } else {
                (iterate(start, ctx)?, None)
            };
        Ok(Self {
            input,
            step,
            ctx: ctx.clone(),
            current: None,
            position: 0,
            last,
        })
    }
}

impl<N: NodeInfo + 'static> SequenceIterator<N> for MappingIterator<N> {
    fn next(&mut self) -> Result<Option<Item<N>>, Error> {
        loop {
            if let Some(cur) = &mut self.current {
                if let Some(item) = cur.next()? {
                    return Ok(Some(item));
                }
                self.current = None;
            }
            match self.input.next()? {
                None => return Ok(None),
                Some(item) => {
                    self.position += 1;
                    let sctx = self.ctx.with_focus(item, self.position, self.last);
                    self.current = Some(iterate(self.step, &sctx)?);
                }
            }
        }
    }

    fn another(&self) -> Box<dyn SequenceIterator<N>> {
        Box::new(MappingIterator {
            input: self.input.another(),
            step: self.step,
            ctx: self.ctx.clone(),
            current: None,
            position: 0,
            last: self.last,
        })
    }
}

/// Runtime arbitration for a path whose step type was unknown at compile
/// time: the first delivered item commits the evaluation to node rules
/// (sort and dedup) or atomic rules (input order); mixing is an error.
fn evaluate_hybrid<N: NodeInfo + 'static>(
    start: ExprId,
    step: ExprId,
    step_deps: Dependency,
    ctx: &XPathContext<N>,
) -> Result<Sequence<N>, Error> {
    let input = evaluate(start, ctx)?;
    let last = if step_deps.contains(Dependency::LAST) {
        Some(input.len())
    } else {
        None
    };
    let mut out: Sequence<N> = Vec::new();
    let mut saw_node = false;
    let mut saw_atomic = false;
    for (i, item) in input.into_iter().enumerate() {
        let sctx = ctx.with_focus(item, i + 1, last);
        for produced in evaluate(step, &sctx)? {
            match &produced {
                Item::Node(_) => saw_node = true,
                Item::Atomic(_) => saw_atomic = true,
            }
            out.push(produced);
        }
    }
    if saw_node && saw_atomic {
        return Err(Error::dynamic(
            ErrorCode::XPTY0004,
            "path step delivered both nodes and atomic values",
        ));
    }
    if saw_node {
        out = document_order_distinct(out);
    }
    Ok(out)
}

/// Numeric predicate selects by position, anything else by effective
/// boolean value.
fn predicate_holds<N: NodeInfo + 'static>(
    predicate: ExprId,
    pctx: &XPathContext<N>,
    position: usize,
) -> Result<bool, Error> {
    let value = evaluate(predicate, pctx)?;
    if let [Item::Atomic(a)] = value.as_slice() {
        if a.primitive_type().is_numeric() {
            return Ok(a.as_number() == Some(position as f64));
        }
    }
    effective_boolean_value(&value)
}

// ---------------------------------------------------------------------
// Axes

/// The nodes an axis step delivers, in axis order.
pub fn axis_nodes<N: NodeInfo>(origin: &N, axis: Axis, test: &NodeTest) -> Vec<N> {
    let mut raw: Vec<N> = Vec::new();
    match axis {
        Axis::SelfAxis => raw.push(origin.clone()),
        Axis::Child => raw.extend(origin.children()),
        Axis::Attribute => raw.extend(origin.attributes()),
        Axis::Namespace => raw.extend(origin.namespaces()),
        Axis::Parent => raw.extend(origin.parent()),
        Axis::Ancestor => {
            let mut cur = origin.parent();
            while let Some(p) = cur {
                cur = p.parent();
                raw.push(p);
            }
        }
        Axis::AncestorOrSelf => {
            raw.push(origin.clone());
            let mut cur = origin.parent();
            while let Some(p) = cur {
                cur = p.parent();
                raw.push(p);
            }
        }
        Axis::Descendant => push_descendants(origin, &mut raw),
        Axis::DescendantOrSelf => {
            raw.push(origin.clone());
            push_descendants(origin, &mut raw);
        }
        Axis::FollowingSibling | Axis::PrecedingSibling => {
            if let Some(parent) = origin.parent() {
                let sibs = parent.children();
                let me = sibs.iter().position(|s| s == origin);
                if let Some(me) = me {
                    match axis {
                        Axis::FollowingSibling => raw.extend(sibs[me + 1..].iter().cloned()),
                        _ => raw.extend(sibs[..me].iter().rev().cloned()),
                    }
                }
            }
        }
        Axis::Following => {
            let mut cur = origin.clone();
            loop {
                let Some(parent) = cur.parent() else { break };
                let sibs = parent.children();
                if let Some(me) = sibs.iter().position(|s| s == &cur) {
                    for sib in &sibs[me + 1..] {
                        raw.push(sib.clone());
                        push_descendants(sib, &mut raw);
                    }
                }
                cur = parent;
            }
        }
        Axis::Preceding => {
            // Collect in document order, then reverse into axis order.
            let mut fwd: Vec<N> = Vec::new();
            let ancestors: Vec<N> = axis_nodes(origin, Axis::AncestorOrSelf, &NodeTest::AnyNode);
            let mut chain: Vec<N> = ancestors;
            chain.reverse();
            for window in chain.windows(2) {
                let (ancestor, along) = (&window[0], &window[1]);
                for child in ancestor.children() {
                    if &child == along {
                        break;
                    }
                    fwd.push(child.clone());
                    push_descendants(&child, &mut fwd);
                }
            }
            fwd.reverse();
            raw = fwd;
        }
    }
    raw.retain(|n| test.matches(axis, n));
    raw
}

fn push_descendants<N: NodeInfo>(node: &N, out: &mut Vec<N>) {
    for child in node.children() {
        out.push(child.clone());
        push_descendants(&child, out);
    }
}

// ---------------------------------------------------------------------
// Operators and functions

fn atomized<N: NodeInfo>(seq: Sequence<N>) -> Vec<AtomicValue> {
    seq.iter().map(Item::atomize).collect()
}

fn evaluate_binary<N: NodeInfo + 'static>(
    op: BinaryOp,
    lhs: ExprId,
    rhs: ExprId,
    ctx: &XPathContext<N>,
) -> Result<Sequence<N>, Error> {
    match op {
        BinaryOp::And | BinaryOp::Or => {
            let left = effective_boolean(lhs, ctx)?;
            let result = match (op, left) {
                (BinaryOp::And, false) => false,
                (BinaryOp::Or, true) => true,
                _ => effective_boolean(rhs, ctx)?,
            };
            Ok(vec![Item::Atomic(AtomicValue::Boolean(result))])
        }
        op if op.is_comparison() => {
            let left = atomized(evaluate(lhs, ctx)?);
            let right = atomized(evaluate(rhs, ctx)?);
            // General comparison: true when any pair compares true.
            for a in &left {
                for b in &right {
                    match compare_values(op, a, b) {
                        Some(true) => {
                            return Ok(vec![Item::Atomic(AtomicValue::Boolean(true))]);
                        }
                        Some(false) => {}
                        None => {
                            return Err(Error::dynamic(
                                ErrorCode::XPTY0004,
                                format!(
                                    "values of types {:?} and {:?} are not comparable",
                                    a.primitive_type(),
                                    b.primitive_type()
                                ),
                            ));
                        }
                    }
                }
            }
            Ok(vec![Item::Atomic(AtomicValue::Boolean(false))])
        }
        _ => {
            let left = atomized(evaluate(lhs, ctx)?);
            let right = atomized(evaluate(rhs, ctx)?);
            let (a, b) = match (left.as_slice(), right.as_slice()) {
                ([], _) | (_, []) => return Ok(Vec::new()),
                ([a], [b]) => (a, b),
                _ => {
                    return Err(Error::dynamic(
                        ErrorCode::XPTY0004,
                        format!("operands of '{}' must be singletons", op.symbol()),
                    ));
                }
            };
            match arith(op, a, b) {
                Ok(v) => Ok(vec![Item::Atomic(v)]),
                Err(ArithFailure::Overflow) => Err(Error::dynamic(
                    ErrorCode::FOAR0002,
                    format!("integer result of '{}' out of range", op.symbol()),
                )),
                Err(ArithFailure::Unsupported) => Err(Error::dynamic(
                    ErrorCode::XPTY0004,
                    format!("cannot apply '{}' to these operands", op.symbol()),
                )),
            }
        }
    }
}

fn cmp_bool(op: BinaryOp, ord: core::cmp::Ordering) -> bool {
    use core::cmp::Ordering::*;
    match op {
        BinaryOp::Eq => ord == Equal,
        BinaryOp::Ne => ord != Equal,
        BinaryOp::Lt => ord == Less,
        BinaryOp::Le => ord != Greater,
        BinaryOp::Gt => ord == Greater,
        BinaryOp::Ge => ord != Less,
        _ => false,
    }
}

/// Compare two atomic values under the general-comparison promotion
/// rules. `None` means the pair is not comparable at all.
pub(crate) fn compare_values(op: BinaryOp, a: &AtomicValue, b: &AtomicValue) -> Option<bool> {
    let ta = a.primitive_type();
    let tb = b.primitive_type();
    if ta.is_numeric() || tb.is_numeric() {
        return Some(match (a.as_number(), b.as_number()) {
            (Some(x), Some(y)) if !x.is_nan() && !y.is_nan() => {
                cmp_bool(op, x.partial_cmp(&y)?)
            }
            // NaN and unconvertible values: only != holds.
            _ => op == BinaryOp::Ne,
        });
    }
    if ta.is_string_family() && tb.is_string_family() {
        return Some(cmp_bool(op, a.string_value().cmp(&b.string_value())));
    }
    match (a, b) {
        (AtomicValue::Boolean(x), AtomicValue::Boolean(y)) => Some(cmp_bool(op, x.cmp(y))),
        (AtomicValue::DateTime(x), AtomicValue::DateTime(y)) => Some(cmp_bool(
            op,
            x.timestamp_millis().cmp(&y.timestamp_millis()),
        )),
        (AtomicValue::Date { date: x, .. }, AtomicValue::Date { date: y, .. }) => {
            Some(cmp_bool(op, x.cmp(y)))
        }
        (AtomicValue::Time { time: x, .. }, AtomicValue::Time { time: y, .. }) => {
            Some(cmp_bool(op, x.cmp(y)))
        }
        (AtomicValue::QName(x), AtomicValue::QName(y)) => match op {
            BinaryOp::Eq => Some(x == y),
            BinaryOp::Ne => Some(x != y),
            _ => None,
        },
        _ => None,
    }
}

enum ArithFailure {
    Unsupported,
    Overflow,
}

fn arith(op: BinaryOp, a: &AtomicValue, b: &AtomicValue) -> Result<AtomicValue, ArithFailure> {
    if let (AtomicValue::Integer(x), AtomicValue::Integer(y)) = (a, b) {
        let checked = match op {
            BinaryOp::Add => Some(x.checked_add(*y)),
            BinaryOp::Sub => Some(x.checked_sub(*y)),
            BinaryOp::Mul => Some(x.checked_mul(*y)),
            _ => None,
        };
        if let Some(result) = checked {
            return result
                .map(AtomicValue::Integer)
                .ok_or(ArithFailure::Overflow);
        }
    }
    let x = a.as_number().ok_or(ArithFailure::Unsupported)?;
    let y = b.as_number().ok_or(ArithFailure::Unsupported)?;
    Ok(match op {
        BinaryOp::Add => AtomicValue::Double(x + y),
        BinaryOp::Sub => AtomicValue::Double(x - y),
        BinaryOp::Mul => AtomicValue::Double(x * y),
        BinaryOp::Div => AtomicValue::Double(x / y),
        _ => return Err(ArithFailure::Unsupported),
    })
}

/// Literal-only folding shared with the simplifier. Anything that cannot
/// fold cleanly, overflow included, stays unfolded and fails (or not) at
/// evaluation time.
pub(crate) fn fold_binary(op: BinaryOp, a: &AtomicValue, b: &AtomicValue) -> Option<AtomicValue> {
    if op.is_comparison() {
        compare_values(op, a, b).map(AtomicValue::Boolean)
    } else if matches!(op, BinaryOp::And | BinaryOp::Or) {
        None
    } else {
        arith(op, a, b).ok()
    }
}

fn singleton_string<N: NodeInfo + 'static>(
    args: &[ExprId],
    index: usize,
    function: SystemFunction,
    ctx: &XPathContext<N>,
) -> Result<String, Error> {
    let v = evaluate(args[index], ctx)?;
    match v.as_slice() {
        [] => Ok(String::new()),
        [item] => Ok(item.string_value()),
        _ => Err(Error::dynamic(
            ErrorCode::XPTY0004,
            "a sequence of more than one item is not allowed here",
        )
        .with_role(&crate::error::Role::function_argument(
            function.name(),
            index,
        ))),
    }
}

fn evaluate_function<N: NodeInfo + 'static>(
    function: SystemFunction,
    args: &[ExprId],
    ctx: &XPathContext<N>,
) -> Result<Sequence<N>, Error> {
    let atomic = |v: AtomicValue| Ok(vec![Item::Atomic(v)]);
    match function {
        SystemFunction::Position => atomic(AtomicValue::Integer(ctx.position()? as i64)),
        SystemFunction::Last => atomic(AtomicValue::Integer(ctx.last()? as i64)),
        SystemFunction::Count => {
            let v = evaluate(args[0], ctx)?;
            atomic(AtomicValue::Integer(v.len() as i64))
        }
        SystemFunction::Not => {
            let b = effective_boolean(args[0], ctx)?;
            atomic(AtomicValue::Boolean(!b))
        }
        SystemFunction::BooleanFn => {
            let b = effective_boolean(args[0], ctx)?;
            atomic(AtomicValue::Boolean(b))
        }
        SystemFunction::StringFn => {
            let s = match args {
                [] => ctx.context_item()?.string_value(),
                _ => singleton_string(args, 0, function, ctx)?,
            };
            atomic(AtomicValue::String(s))
        }
        SystemFunction::NumberFn => {
            let s = match args {
                [] => ctx.context_item()?.string_value(),
                _ => singleton_string(args, 0, function, ctx)?,
            };
            let n = s.trim().parse::<f64>().unwrap_or(f64::NAN);
            atomic(AtomicValue::Double(n))
        }
        SystemFunction::NameFn => {
            let node = match args {
                [] => Some(ctx.context_node()?),
                _ => match evaluate(args[0], ctx)?.into_iter().next() {
                    Some(Item::Node(n)) => Some(n),
                    Some(Item::Atomic(_)) => {
                        return Err(Error::dynamic(
                            ErrorCode::XPTY0004,
                            "name() requires a node",
                        )
                        .with_role(&crate::error::Role::function_argument("name", 0)));
                    }
                    None => None,
                },
            };
            let s = node
                .and_then(|n| n.name())
                .map(|q| q.display_name())
                .unwrap_or_default();
            atomic(AtomicValue::String(s))
        }
        SystemFunction::Concat => {
            let mut s = String::new();
            for i in 0..args.len() {
                s.push_str(&singleton_string(args, i, function, ctx)?);
            }
            atomic(AtomicValue::String(s))
        }
        SystemFunction::StringLength => {
            let s = match args {
                [] => ctx.context_item()?.string_value(),
                _ => singleton_string(args, 0, function, ctx)?,
            };
            atomic(AtomicValue::Integer(s.chars().count() as i64))
        }
        SystemFunction::Matches => {
            let input = singleton_string(args, 0, function, ctx)?;
            let pattern = singleton_string(args, 1, function, ctx)?;
            let flags = if args.len() > 2 {
                singleton_string(args, 2, function, ctx)?
            } else {
                String::new()
            };
            atomic(AtomicValue::Boolean(regex::matches(
                &input, &pattern, &flags,
            )?))
        }
        SystemFunction::Tokenize => {
            let input = singleton_string(args, 0, function, ctx)?;
            let pattern = singleton_string(args, 1, function, ctx)?;
            let flags = if args.len() > 2 {
                singleton_string(args, 2, function, ctx)?
            } else {
                String::new()
            };
            Ok(regex::tokenize(&input, &pattern, &flags)?
                .into_iter()
                .map(|t| Item::Atomic(AtomicValue::String(t)))
                .collect())
        }
    }
}

fn evaluate_key_call<N: NodeInfo + 'static>(
    key: &QName,
    value: ExprId,
    ctx: &XPathContext<N>,
) -> Result<Sequence<N>, Error> {
    let set = key_set_named(ctx.executable().key_sets(), key)?;
    let doc_root = ctx.context_node()?.document_root();
    let sought = atomized(evaluate(value, ctx)?);
    let mut result: Vec<N> = Vec::new();
    for v in &sought {
        let hits = ctx
            .controller()
            .keys
            .select_by_key(&set, &doc_root, v, ctx)?;
        result = union_in_document_order(result, hits);
    }
    Ok(result.into_iter().map(Item::Node).collect())
}

// ---------------------------------------------------------------------
// Push evaluation

/// Push-mode evaluation. Only the last instruction of a block and the
/// branches of a conditional may propagate a tail call to the caller;
/// everything else drains locally.
pub fn process<N: NodeInfo + 'static>(
    id: ExprId,
    ctx: &XPathContext<N>,
    out: &mut dyn Receiver<N>,
) -> Result<Option<TailCall<N>>, Error> {
    let exec = ctx.executable().clone();
    let arena = exec.arena();
    match arena.kind(id) {
        ExprKind::Block(items) => {
            let items = items.clone();
            let Some((&last, init)) = items.split_last() else {
                return Ok(None);
            };
            for &item in init {
                let tail = process(item, ctx, out)?;
                drain_tail(tail, out)?;
            }
            process(last, ctx, out)
        }

        ExprKind::If {
            condition,
            then_branch,
            else_branch,
        } => {
            if effective_boolean(*condition, ctx)? {
                process(*then_branch, ctx, out)
            } else {
                process(*else_branch, ctx, out)
            }
        }

        ExprKind::Let {
            slot, value, body, ..
        } => {
            let v = evaluate(*value, ctx)?;
            ctx.set_local(*slot, v)?;
            process(*body, ctx, out)
        }

        ExprKind::ElementCtor { name, content } => {
            let (name, content) = (name.clone(), *content);
            out.start_element(&name)?;
            if let Some(p) = &name.prefix {
                if let Some(uri) = &name.ns_uri {
                    out.namespace(p, uri)?;
                }
            }
            let tail = process(content, ctx, out)?;
            drain_tail(tail, out)?;
            out.end_element()?;
            Ok(None)
        }

        ExprKind::AttributeCtor { name, select } => {
            let (name, select) = (name.clone(), *select);
            let value = joined_string_value(select, ctx)?;
            out.attribute(&name, &value)?;
            Ok(None)
        }

        ExprKind::TextCtor { select } => {
            let value = joined_string_value(*select, ctx)?;
            out.characters(&value)?;
            Ok(None)
        }

        ExprKind::CommentCtor { select } => {
            let value = joined_string_value(*select, ctx)?;
            out.comment(&value)?;
            Ok(None)
        }

        ExprKind::PiCtor { target, select } => {
            let (target, select) = (target.clone(), *select);
            let value = joined_string_value(select, ctx)?;
            out.processing_instruction(&target, &value)?;
            Ok(None)
        }

        ExprKind::ForEach { select, body } => {
            let (select, body) = (*select, *body);
            let input = evaluate(select, ctx)?;
            let last = input.len();
            for (i, item) in input.into_iter().enumerate() {
                let bctx = ctx.with_focus(item, i + 1, Some(last));
                let tail = process(body, &bctx, out)?;
                drain_tail(tail, out)?;
            }
            Ok(None)
        }

        ExprKind::ApplyTemplates { select, mode } => {
            let (select, mode) = (*select, mode.clone());
            let selected = evaluate(select, ctx)?;
            let mut nodes = Vec::with_capacity(selected.len());
            for item in selected {
                match item {
                    Item::Node(n) => nodes.push(n),
                    Item::Atomic(_) => {
                        return Err(Error::dynamic(
                            ErrorCode::XPTY0004,
                            "apply-templates selected an atomic value",
                        ));
                    }
                }
            }
            apply_templates(&nodes, mode.as_ref(), ctx, out)?;
            Ok(None)
        }

        ExprKind::CallTemplate { name, tail, params } => {
            let (name, is_tail, params) = (name.clone(), *tail, params.clone());
            let call = begin_template_call(&name, &params, ctx)?;
            if is_tail {
                Ok(Some(call))
            } else {
                drain_tail(Some(call), out)?;
                Ok(None)
            }
        }

        // Constructed content is already emitted in construction order, so
        // an ordering wrapper over a push branch forwards straight through.
        ExprKind::DocOrderSort(e) | ExprKind::ReverseOrder(e)
            if contains_push_only(arena, *e) =>
        {
            process(*e, ctx, out)
        }

        // Any pull-evaluable expression: evaluate and emit the items.
        _ => {
            let items = evaluate(id, ctx)?;
            emit_sequence(&items, out)?;
            Ok(None)
        }
    }
}

fn contains_push_only(arena: &ExprArena, id: ExprId) -> bool {
    if matches!(
        arena.kind(id),
        ExprKind::ElementCtor { .. }
            | ExprKind::AttributeCtor { .. }
            | ExprKind::TextCtor { .. }
            | ExprKind::CommentCtor { .. }
            | ExprKind::PiCtor { .. }
            | ExprKind::ApplyTemplates { .. }
            | ExprKind::CallTemplate { .. }
    ) {
        return true;
    }
    arena
        .children(id)
        .into_iter()
        .any(|c| contains_push_only(arena, c))
}

/// Apply template rules to each node of a sequence, falling back to the
/// built-in rules where no declared rule matches: documents and elements
/// recurse into their children, text and attribute nodes emit their
/// string value.
pub fn apply_templates<N: NodeInfo + 'static>(
    nodes: &[N],
    mode: Option<&QName>,
    ctx: &XPathContext<N>,
    out: &mut dyn Receiver<N>,
) -> Result<(), Error> {
    let exec = ctx.executable().clone();
    let policy = ctx.controller().recovery;
    let last = nodes.len();
    for (i, node) in nodes.iter().enumerate() {
        let rule = exec
            .mode(mode)
            .and_then(|m| m.match_rule(node, policy).transpose())
            .transpose()?;
        match rule {
            Some(rule) => {
                let template = exec.template(rule.template)?;
                let nctx = ctx
                    .new_major(template.slot_count)
                    .with_focus(Item::Node(node.clone()), i + 1, Some(last));
                let tail = process(template.body, &nctx, out)?;
                drain_tail(tail, out)?;
            }
            None => match node.kind() {
                NodeKind::Document | NodeKind::Element => {
                    apply_templates(&node.children(), mode, ctx, out)?;
                }
                NodeKind::Text | NodeKind::Attribute => {
                    out.characters(&node.string_value())?;
                }
                _ => {}
            },
        }
    }
    Ok(())
}

/// Bind the parameters into a fresh frame and hand back the call for the
/// trampoline. Parameters are evaluated in the caller's context.
pub fn begin_template_call<N: NodeInfo + 'static>(
    name: &QName,
    params: &[(i32, ExprId)],
    ctx: &XPathContext<N>,
) -> Result<TailCall<N>, Error> {
    let exec = ctx.executable().clone();
    let (template_id, template) = exec.template_named(name)?;
    let callee = ctx.new_major(template.slot_count);
    for (slot, expr) in params {
        let v = evaluate(*expr, ctx)?;
        callee.set_local(*slot, v)?;
    }
    Ok(TailCall {
        template: template_id,
        context: callee,
    })
}

fn joined_string_value<N: NodeInfo + 'static>(
    select: ExprId,
    ctx: &XPathContext<N>,
) -> Result<String, Error> {
    let items = evaluate(select, ctx)?;
    let mut s = String::new();
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            s.push(' ');
        }
        s.push_str(&item.string_value());
    }
    Ok(s)
}

/// Emit a materialized sequence: nodes are copied event by event,
/// adjacent atomic values are joined with single spaces.
fn emit_sequence<N: NodeInfo>(
    items: &[Item<N>],
    out: &mut dyn Receiver<N>,
) -> Result<(), Error> {
    let mut prev_atomic = false;
    for item in items {
        match item {
            Item::Node(n) => {
                copy_node(n, out)?;
                prev_atomic = false;
            }
            Item::Atomic(a) => {
                if prev_atomic {
                    out.characters(" ")?;
                }
                out.characters(&a.string_value())?;
                prev_atomic = true;
            }
        }
    }
    Ok(())
}
