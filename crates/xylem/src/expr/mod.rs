//! The expression tree: an arena of nodes addressed by [`ExprId`] handles.
//!
//! Expressions are built through [`ExprArena`], then pushed through the
//! three static-analysis passes (`simplify`, `type_check`, `optimize`).
//! Each pass returns the surviving handle for the subtree it was given;
//! callers patch their child links with the returned id. A per-node
//! [`AnalysisState`] makes every pass idempotent.

pub mod eval;
pub mod optimize;
pub mod promote;
pub mod simplify;
pub mod typecheck;

use compact_str::CompactString;

use crate::error::Location;
use crate::item::{AtomicValue, PrimitiveType};
use crate::model::{NodeInfo, NodeKind, QName};
use crate::props::{Cardinality, Dependency, ExprProps, ItemType, StaticProperty};

/// Handle to a node in an [`ExprArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExprId(pub(crate) u32);

impl ExprId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// Monotone analysis state. Passes that see a node at or past their own
/// stage return immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AnalysisState {
    Raw,
    Simplified,
    Checked,
    Optimized,
}

/// The thirteen XPath axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    Child,
    Descendant,
    DescendantOrSelf,
    Attribute,
    SelfAxis,
    Parent,
    Ancestor,
    AncestorOrSelf,
    FollowingSibling,
    PrecedingSibling,
    Following,
    Preceding,
    Namespace,
}

impl Axis {
    pub fn is_forward(self) -> bool {
        !self.is_reverse()
    }

    pub fn is_reverse(self) -> bool {
        matches!(
            self,
            Axis::Parent | Axis::Ancestor | Axis::AncestorOrSelf | Axis::PrecedingSibling | Axis::Preceding
        )
    }

    /// True when every result node is within the subtree rooted at the
    /// origin node.
    pub fn is_subtree(self) -> bool {
        matches!(
            self,
            Axis::Child
                | Axis::Descendant
                | Axis::DescendantOrSelf
                | Axis::Attribute
                | Axis::SelfAxis
                | Axis::Namespace
        )
    }

    /// True when no result node is an ancestor of another result node.
    pub fn is_peer(self) -> bool {
        matches!(
            self,
            Axis::Child
                | Axis::Attribute
                | Axis::SelfAxis
                | Axis::Parent
                | Axis::FollowingSibling
                | Axis::PrecedingSibling
                | Axis::Namespace
        )
    }

    /// The principal node kind of the axis.
    pub fn principal_node_kind(self) -> NodeKind {
        match self {
            Axis::Attribute => NodeKind::Attribute,
            Axis::Namespace => NodeKind::Namespace,
            _ => NodeKind::Element,
        }
    }
}

/// Node test applied to each candidate on an axis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeTest {
    /// `node()`
    AnyNode,
    /// `text()`, `comment()`, ... by kind.
    Kind(NodeKind),
    /// A name test against the principal node kind of the axis.
    Name(QName),
    /// `*` on the principal node kind.
    AnyName,
}

impl NodeTest {
    pub fn matches<N: NodeInfo>(&self, axis: Axis, node: &N) -> bool {
        match self {
            NodeTest::AnyNode => true,
            NodeTest::Kind(k) => node.kind() == *k,
            NodeTest::AnyName => node.kind() == axis.principal_node_kind(),
            NodeTest::Name(q) => {
                node.kind() == axis.principal_node_kind() && node.name().as_ref() == Some(q)
            }
        }
    }

    /// Default pattern priority in the XSLT scheme.
    pub fn default_priority(&self) -> f64 {
        match self {
            NodeTest::Name(_) => 0.0,
            NodeTest::AnyName => -0.25,
            NodeTest::AnyNode | NodeTest::Kind(_) => -0.5,
        }
    }

    /// The narrowest static item type this test can produce on `axis`.
    pub fn static_item_type(&self, axis: Axis) -> ItemType {
        match self {
            NodeTest::AnyNode => ItemType::AnyNode,
            NodeTest::Kind(k) => ItemType::Node(*k),
            NodeTest::AnyName | NodeTest::Name(_) => ItemType::Node(axis.principal_node_kind()),
        }
    }
}

/// Where a variable reference resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingScope {
    Local,
    Global,
}

/// Sentinel for a slot the allocator has not visited. Reading through it
/// is an internal error, reported distinctly from an out-of-range slot.
pub const UNALLOCATED: i32 = -999;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Binding {
    pub scope: BindingScope,
    pub slot: i32,
}

impl Binding {
    pub fn unallocated(scope: BindingScope) -> Self {
        Self {
            scope,
            slot: UNALLOCATED,
        }
    }
}

/// Value and general comparison / arithmetic operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
    And,
    Or,
}

impl BinaryOp {
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge
        )
    }

    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Eq => "=",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "div",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
        }
    }
}

/// Built-in functions the evaluator implements directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemFunction {
    Position,
    Last,
    Count,
    Not,
    BooleanFn,
    StringFn,
    NumberFn,
    NameFn,
    Concat,
    StringLength,
    Matches,
    Tokenize,
}

impl SystemFunction {
    pub fn name(self) -> &'static str {
        match self {
            SystemFunction::Position => "position",
            SystemFunction::Last => "last",
            SystemFunction::Count => "count",
            SystemFunction::Not => "not",
            SystemFunction::BooleanFn => "boolean",
            SystemFunction::StringFn => "string",
            SystemFunction::NumberFn => "number",
            SystemFunction::NameFn => "name",
            SystemFunction::Concat => "concat",
            SystemFunction::StringLength => "string-length",
            SystemFunction::Matches => "matches",
            SystemFunction::Tokenize => "tokenize",
        }
    }

    /// (min, max) argument count; `usize::MAX` means unbounded.
    pub fn arity(self) -> (usize, usize) {
        match self {
            SystemFunction::Position | SystemFunction::Last => (0, 0),
            SystemFunction::Count
            | SystemFunction::Not
            | SystemFunction::BooleanFn => (1, 1),
            SystemFunction::StringFn
            | SystemFunction::NumberFn
            | SystemFunction::NameFn
            | SystemFunction::StringLength => (0, 1),
            SystemFunction::Concat => (2, usize::MAX),
            SystemFunction::Matches | SystemFunction::Tokenize => (2, 3),
        }
    }
}

/// One expression or instruction node.
#[derive(Debug, Clone)]
pub enum ExprKind {
    /// A literal sequence of atomic values (the empty literal is the
    /// canonical empty-sequence expression).
    Literal(Vec<AtomicValue>),
    /// `.`
    ContextItem,
    /// `/` (root of the tree containing the context node).
    Root,
    /// One axis step.
    AxisStep { axis: Axis, test: NodeTest },
    /// `start/step` where the step is statically node-valued and
    /// non-creative: results are delivered in document order, deduped.
    Path { start: ExprId, step: ExprId },
    /// `start/step` (or `start!step`) where the step is statically
    /// atomic-valued: plain sequence concatenation in input order.
    SimpleMap { start: ExprId, step: ExprId },
    /// `start/step` where the step type is unknown until runtime; decides
    /// per evaluation whether path or mapping rules apply.
    HybridPath { start: ExprId, step: ExprId },
    /// `base[predicate]`. `positional` is resolved by type-check: a
    /// numeric or position-dependent predicate selects by position.
    Filter {
        base: ExprId,
        predicate: ExprId,
        positional: bool,
    },
    If {
        condition: ExprId,
        then_branch: ExprId,
        else_branch: ExprId,
    },
    /// Sequence concatenation of the children, in order.
    Block(Vec<ExprId>),
    VarRef { name: QName, binding: Binding },
    /// Local binding: evaluate `value` once, bind to `slot`, run `body`.
    Let {
        name: QName,
        slot: i32,
        value: ExprId,
        body: ExprId,
    },
    Binary {
        op: BinaryOp,
        lhs: ExprId,
        rhs: ExprId,
    },
    FunctionCall {
        function: SystemFunction,
        args: Vec<ExprId>,
    },
    /// `key('name', value)` against the document of the context item.
    KeyCall { key: QName, value: ExprId },
    /// Wrapper inserted by type-check: converts untyped-atomic items in
    /// the operand to the required primitive type.
    ConvertUntyped {
        operand: ExprId,
        required: PrimitiveType,
    },
    /// Runtime document-order sort + dedup wrapper.
    DocOrderSort(ExprId),
    /// O(n) reversal of a naturally-reverse-ordered nodeset.
    ReverseOrder(ExprId),
    /// Element constructor (push-only).
    ElementCtor { name: QName, content: ExprId },
    AttributeCtor { name: QName, select: ExprId },
    TextCtor { select: ExprId },
    CommentCtor { select: ExprId },
    PiCtor {
        target: CompactString,
        select: ExprId,
    },
    /// `xsl:for-each`: body runs with a fresh focus over `select`.
    ForEach { select: ExprId, body: ExprId },
    /// `xsl:apply-templates` in the given mode.
    ApplyTemplates {
        select: ExprId,
        mode: Option<QName>,
    },
    /// `xsl:call-template`. When `tail` is set and the instruction sits in
    /// a tail position, `process` returns the call to the trampoline
    /// instead of recursing.
    CallTemplate {
        name: QName,
        tail: bool,
        params: Vec<(i32, ExprId)>,
    },
}

#[derive(Debug, Clone)]
pub struct ExprNode {
    pub kind: ExprKind,
    pub parent: Option<ExprId>,
    pub state: AnalysisState,
    pub props: ExprProps,
    pub location: Option<Location>,
}

/// Owning store for expression nodes. Nodes are never freed individually;
/// rewrites orphan subtrees, which simply become unreachable.
#[derive(Debug, Default, Clone)]
pub struct ExprArena {
    nodes: Vec<ExprNode>,
}

impl ExprArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc(&mut self, kind: ExprKind) -> ExprId {
        let id = ExprId(u32::try_from(self.nodes.len()).unwrap_or(u32::MAX));
        self.nodes.push(ExprNode {
            kind,
            parent: None,
            state: AnalysisState::Raw,
            props: ExprProps::default(),
            location: None,
        });
        // Children are allocated before their parent; link them up now.
        for child in self.children(id) {
            self.nodes[child.index()].parent = Some(id);
        }
        id
    }

    pub fn alloc_at(&mut self, kind: ExprKind, location: Location) -> ExprId {
        let id = self.alloc(kind);
        self.nodes[id.index()].location = Some(location);
        id
    }

    pub fn node(&self, id: ExprId) -> &ExprNode {
        &self.nodes[id.index()]
    }

    pub fn kind(&self, id: ExprId) -> &ExprKind {
        &self.nodes[id.index()].kind
    }

    pub fn kind_mut(&mut self, id: ExprId) -> &mut ExprKind {
        &mut self.nodes[id.index()].kind
    }

    pub fn state(&self, id: ExprId) -> AnalysisState {
        self.nodes[id.index()].state
    }

    pub fn set_state(&mut self, id: ExprId, state: AnalysisState) {
        self.nodes[id.index()].state = state;
    }

    /// Drop a subtree back to Raw so a later pass re-analyzes it (used
    /// after a promotion rewrite).
    pub fn reset(&mut self, id: ExprId) {
        self.nodes[id.index()].state = AnalysisState::Raw;
        for child in self.children(id) {
            self.reset(child);
        }
    }

    pub fn props(&self, id: ExprId) -> &ExprProps {
        &self.nodes[id.index()].props
    }

    pub fn set_props(&mut self, id: ExprId, props: ExprProps) {
        self.nodes[id.index()].props = props;
    }

    pub fn parent(&self, id: ExprId) -> Option<ExprId> {
        self.nodes[id.index()].parent
    }

    pub fn location(&self, id: ExprId) -> Option<Location> {
        self.nodes[id.index()].location
    }

    pub fn set_location(&mut self, id: ExprId, location: Location) {
        self.nodes[id.index()].location = Some(location);
    }

    /// Child handles of a node, in evaluation order.
    pub fn children(&self, id: ExprId) -> Vec<ExprId> {
        match &self.nodes[id.index()].kind {
            ExprKind::Literal(_)
            | ExprKind::ContextItem
            | ExprKind::Root
            | ExprKind::AxisStep { .. }
            | ExprKind::VarRef { .. } => Vec::new(),
            ExprKind::Path { start, step }
            | ExprKind::SimpleMap { start, step }
            | ExprKind::HybridPath { start, step } => vec![*start, *step],
            ExprKind::Filter {
                base, predicate, ..
            } => vec![*base, *predicate],
            ExprKind::If {
                condition,
                then_branch,
                else_branch,
            } => vec![*condition, *then_branch, *else_branch],
            ExprKind::Block(items) => items.clone(),
            ExprKind::Let { value, body, .. } => vec![*value, *body],
            ExprKind::Binary { lhs, rhs, .. } => vec![*lhs, *rhs],
            ExprKind::FunctionCall { args, .. } => args.clone(),
            ExprKind::KeyCall { value, .. } => vec![*value],
            ExprKind::ConvertUntyped { operand, .. } => vec![*operand],
            ExprKind::DocOrderSort(e) | ExprKind::ReverseOrder(e) => vec![*e],
            ExprKind::ElementCtor { content, .. } => vec![*content],
            ExprKind::AttributeCtor { select, .. }
            | ExprKind::TextCtor { select }
            | ExprKind::CommentCtor { select }
            | ExprKind::PiCtor { select, .. } => vec![*select],
            ExprKind::ForEach { select, body } => vec![*select, *body],
            ExprKind::ApplyTemplates { select, .. } => vec![*select],
            ExprKind::CallTemplate { params, .. } => {
                params.iter().map(|(_, e)| *e).collect()
            }
        }
    }

    /// Re-point every child's parent link at `id`. Called after a rewrite
    /// swapped child handles in place.
    pub fn adopt_children(&mut self, id: ExprId) {
        for child in self.children(id) {
            self.nodes[child.index()].parent = Some(id);
        }
    }

    /// Build a sequence-concatenation expression, flattening nested blocks
    /// and dropping empty literals. Zero survivors collapse to the empty
    /// literal, one survivor is returned as-is.
    pub fn make_block(&mut self, items: Vec<ExprId>) -> ExprId {
        let mut flat: Vec<ExprId> = Vec::with_capacity(items.len());
        for item in items {
            match self.kind(item) {
                ExprKind::Block(inner) => {
                    let inner = inner.clone();
                    for sub in inner {
                        if !self.is_empty_literal(sub) {
                            flat.push(sub);
                        }
                    }
                }
                ExprKind::Literal(values) if values.is_empty() => {}
                _ => flat.push(item),
            }
        }
        match flat.len() {
            0 => self.alloc(ExprKind::Literal(Vec::new())),
            1 => flat[0],
            _ => {
                let id = self.alloc(ExprKind::Block(flat));
                self.adopt_children(id);
                id
            }
        }
    }

    pub fn is_empty_literal(&self, id: ExprId) -> bool {
        matches!(self.kind(id), ExprKind::Literal(v) if v.is_empty())
    }

    /// Build a relative path, leaving the path/map/hybrid decision to the
    /// type checker. Until then it is a hybrid.
    pub fn make_path(&mut self, start: ExprId, step: ExprId) -> ExprId {
        let id = self.alloc(ExprKind::HybridPath { start, step });
        self.adopt_children(id);
        id
    }

    pub fn literal(&mut self, value: AtomicValue) -> ExprId {
        self.alloc(ExprKind::Literal(vec![value]))
    }

    pub fn empty(&mut self) -> ExprId {
        self.alloc(ExprKind::Literal(Vec::new()))
    }

    /// Compute and cache the static properties of `id` from its kind and
    /// its children's cached properties. Children must already be done.
    pub fn compute_props(&mut self, id: ExprId) {
        let props = self.props_for(id);
        self.nodes[id.index()].props = props;
    }

    fn props_for(&self, id: ExprId) -> ExprProps {
        use StaticProperty as P;
        match self.kind(id) {
            ExprKind::Literal(values) => {
                let card = match values.len() {
                    0 => Cardinality::Empty,
                    1 => Cardinality::ExactlyOne,
                    _ => Cardinality::OneOrMore,
                };
                let item_type = values
                    .first()
                    .map_or(ItemType::Nothing, |v| ItemType::Atomic(v.primitive_type()));
                ExprProps {
                    item_type,
                    cardinality: card,
                    special: P::NON_CREATIVE,
                    deps: Dependency::empty(),
                }
            }
            ExprKind::ContextItem => ExprProps {
                item_type: ItemType::AnyItem,
                cardinality: Cardinality::ExactlyOne,
                special: P::ORDERED_NODESET
                    | P::PEER_NODESET
                    | P::SUBTREE_NODESET
                    | P::SINGLE_DOCUMENT_NODESET
                    | P::NON_CREATIVE,
                deps: Dependency::CONTEXT_ITEM,
            },
            ExprKind::Root => ExprProps {
                item_type: ItemType::Node(NodeKind::Document),
                cardinality: Cardinality::ExactlyOne,
                special: P::ORDERED_NODESET
                    | P::PEER_NODESET
                    | P::SINGLE_DOCUMENT_NODESET
                    | P::NON_CREATIVE,
                deps: Dependency::CONTEXT_ITEM,
            },
            ExprKind::AxisStep { axis, test } => {
                let mut special = P::NON_CREATIVE | P::SINGLE_DOCUMENT_NODESET;
                if axis.is_forward() {
                    special |= P::ORDERED_NODESET;
                } else {
                    special |= P::REVERSE_DOCUMENT_ORDER;
                }
                if axis.is_peer() {
                    special |= P::PEER_NODESET;
                }
                if axis.is_subtree() {
                    special |= P::SUBTREE_NODESET;
                }
                if matches!(axis, Axis::Attribute | Axis::Namespace) {
                    special |= P::ATTRIBUTE_NS_NODESET;
                }
                ExprProps {
                    item_type: test.static_item_type(*axis),
                    cardinality: Cardinality::ZeroOrMore,
                    special,
                    deps: Dependency::CONTEXT_ITEM,
                }
            }
            ExprKind::Path { start, step } => {
                self.path_props(self.props(*start), self.props(*step))
            }
            ExprKind::HybridPath { start, step } | ExprKind::SimpleMap { start, step } => {
                let start_p = self.props(*start);
                let step_p = self.props(*step);
                ExprProps {
                    item_type: step_p.item_type,
                    cardinality: start_p.cardinality.compose(step_p.cardinality),
                    special: StaticProperty::empty(),
                    deps: start_p.deps | (step_p.deps & !Dependency::FOCUS),
                }
            }
            ExprKind::Filter {
                base, predicate, ..
            } => {
                let base_p = self.props(*base);
                let pred_p = self.props(*predicate);
                ExprProps {
                    item_type: base_p.item_type,
                    cardinality: base_p.cardinality.union(Cardinality::Empty),
                    special: base_p.special,
                    deps: base_p.deps | (pred_p.deps & !Dependency::FOCUS),
                }
            }
            ExprKind::If {
                condition,
                then_branch,
                else_branch,
            } => {
                let t = self.props(*then_branch);
                let e = self.props(*else_branch);
                ExprProps {
                    item_type: t.item_type.union(e.item_type),
                    cardinality: t.cardinality.union(e.cardinality),
                    special: t.special & e.special,
                    deps: self.props(*condition).deps | t.deps | e.deps,
                }
            }
            ExprKind::Block(items) => {
                let mut card = Cardinality::Empty;
                let mut item_type = ItemType::Nothing;
                let mut special = P::all();
                let mut deps = Dependency::empty();
                for item in items {
                    let p = self.props(*item);
                    card = card.add(p.cardinality);
                    item_type = item_type.union(p.item_type);
                    special &= p.special;
                    deps |= p.deps;
                }
                // Concatenation only keeps non-creative; ordering is lost.
                special &= P::NON_CREATIVE;
                ExprProps {
                    item_type,
                    cardinality: card,
                    special,
                    deps,
                }
            }
            ExprKind::VarRef { binding, .. } => ExprProps {
                item_type: ItemType::AnyItem,
                cardinality: Cardinality::ZeroOrMore,
                special: P::NON_CREATIVE,
                deps: match binding.scope {
                    BindingScope::Local => Dependency::LOCAL_VARIABLES,
                    BindingScope::Global => Dependency::GLOBAL_VARIABLES,
                },
            },
            ExprKind::Let { value, body, .. } => {
                let v = self.props(*value);
                let b = self.props(*body);
                ExprProps {
                    item_type: b.item_type,
                    cardinality: b.cardinality,
                    special: b.special,
                    deps: v.deps | b.deps,
                }
            }
            ExprKind::Binary { op, lhs, rhs } => {
                let deps = self.props(*lhs).deps | self.props(*rhs).deps;
                let item_type = if op.is_comparison() || matches!(op, BinaryOp::And | BinaryOp::Or)
                {
                    ItemType::Atomic(PrimitiveType::Boolean)
                } else {
                    ItemType::Atomic(PrimitiveType::Double)
                };
                let cardinality = if matches!(
                    op,
                    BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div
                ) {
                    Cardinality::ZeroOrOne
                } else {
                    Cardinality::ExactlyOne
                };
                ExprProps {
                    item_type,
                    cardinality,
                    special: P::NON_CREATIVE,
                    deps,
                }
            }
            ExprKind::FunctionCall { function, args } => {
                let mut deps = Dependency::empty();
                for a in args {
                    deps |= self.props(*a).deps;
                }
                match function {
                    SystemFunction::Position => deps |= Dependency::POSITION,
                    SystemFunction::Last => deps |= Dependency::LAST,
                    _ => {}
                }
                // Zero-argument string()/number()/name() read the context item.
                if args.is_empty()
                    && matches!(
                        function,
                        SystemFunction::StringFn
                            | SystemFunction::NumberFn
                            | SystemFunction::NameFn
                            | SystemFunction::StringLength
                    )
                {
                    deps |= Dependency::CONTEXT_ITEM;
                }
                let item_type = match function {
                    SystemFunction::Position
                    | SystemFunction::Last
                    | SystemFunction::Count
                    | SystemFunction::StringLength => ItemType::Atomic(PrimitiveType::Integer),
                    SystemFunction::Not | SystemFunction::BooleanFn | SystemFunction::Matches => {
                        ItemType::Atomic(PrimitiveType::Boolean)
                    }
                    SystemFunction::NumberFn => ItemType::Atomic(PrimitiveType::Double),
                    _ => ItemType::Atomic(PrimitiveType::String),
                };
                let cardinality = if matches!(function, SystemFunction::Tokenize) {
                    Cardinality::ZeroOrMore
                } else {
                    Cardinality::ExactlyOne
                };
                ExprProps {
                    item_type,
                    cardinality,
                    special: P::NON_CREATIVE,
                    deps,
                }
            }
            ExprKind::KeyCall { value, .. } => ExprProps {
                item_type: ItemType::AnyNode,
                cardinality: Cardinality::ZeroOrMore,
                special: P::ORDERED_NODESET | P::SINGLE_DOCUMENT_NODESET | P::NON_CREATIVE,
                deps: self.props(*value).deps | Dependency::CONTEXT_ITEM,
            },
            ExprKind::ConvertUntyped { operand, required } => {
                let p = self.props(*operand);
                ExprProps {
                    item_type: ItemType::Atomic(*required),
                    cardinality: p.cardinality,
                    special: P::NON_CREATIVE,
                    deps: p.deps,
                }
            }
            ExprKind::DocOrderSort(e) => {
                let p = self.props(*e);
                ExprProps {
                    item_type: p.item_type,
                    cardinality: p.cardinality,
                    special: p.special | P::ORDERED_NODESET,
                    deps: p.deps,
                }
            }
            ExprKind::ReverseOrder(e) => {
                let p = self.props(*e);
                ExprProps {
                    item_type: p.item_type,
                    cardinality: p.cardinality,
                    special: (p.special & !P::REVERSE_DOCUMENT_ORDER) | P::ORDERED_NODESET,
                    deps: p.deps,
                }
            }
            ExprKind::ElementCtor { content, .. } => ExprProps {
                item_type: ItemType::Node(NodeKind::Element),
                cardinality: Cardinality::ExactlyOne,
                special: P::ORDERED_NODESET | P::PEER_NODESET | P::SINGLE_DOCUMENT_NODESET,
                deps: self.props(*content).deps,
            },
            // A freshly constructed singleton node is trivially in order.
            ExprKind::AttributeCtor { select, .. } => ExprProps {
                item_type: ItemType::Node(NodeKind::Attribute),
                cardinality: Cardinality::ExactlyOne,
                special: P::ORDERED_NODESET | P::PEER_NODESET | P::SINGLE_DOCUMENT_NODESET,
                deps: self.props(*select).deps,
            },
            ExprKind::TextCtor { select } => ExprProps {
                item_type: ItemType::Node(NodeKind::Text),
                cardinality: Cardinality::ExactlyOne,
                special: P::ORDERED_NODESET | P::PEER_NODESET | P::SINGLE_DOCUMENT_NODESET,
                deps: self.props(*select).deps,
            },
            ExprKind::CommentCtor { select } => ExprProps {
                item_type: ItemType::Node(NodeKind::Comment),
                cardinality: Cardinality::ExactlyOne,
                special: P::ORDERED_NODESET | P::PEER_NODESET | P::SINGLE_DOCUMENT_NODESET,
                deps: self.props(*select).deps,
            },
            ExprKind::PiCtor { select, .. } => ExprProps {
                item_type: ItemType::Node(NodeKind::ProcessingInstruction),
                cardinality: Cardinality::ExactlyOne,
                special: P::ORDERED_NODESET | P::PEER_NODESET | P::SINGLE_DOCUMENT_NODESET,
                deps: self.props(*select).deps,
            },
            ExprKind::ForEach { select, body } => {
                let s = self.props(*select);
                let b = self.props(*body);
                ExprProps {
                    item_type: b.item_type,
                    cardinality: s.cardinality.compose(b.cardinality),
                    special: StaticProperty::empty(),
                    deps: s.deps | (b.deps & !Dependency::FOCUS),
                }
            }
            ExprKind::ApplyTemplates { select, .. } => ExprProps {
                item_type: ItemType::AnyItem,
                cardinality: Cardinality::ZeroOrMore,
                special: StaticProperty::empty(),
                deps: self.props(*select).deps | Dependency::GLOBAL_VARIABLES,
            },
            ExprKind::CallTemplate { params, .. } => {
                let mut deps = Dependency::GLOBAL_VARIABLES;
                for (_, e) in params {
                    deps |= self.props(*e).deps;
                }
                ExprProps {
                    item_type: ItemType::AnyItem,
                    cardinality: Cardinality::ZeroOrMore,
                    special: StaticProperty::empty(),
                    deps,
                }
            }
        }
    }

    /// Ordering-property algebra for `start/step`, following the
    /// path-expression rules: the result is naturally sorted when the
    /// start is ordered and single-document and the step is either
    /// attribute/namespace, or peer+subtree+forward, or the start is
    /// additionally peer and the step subtree+forward.
    fn path_props(&self, start: &ExprProps, step: &ExprProps) -> ExprProps {
        use StaticProperty as P;
        let s = start.special;
        let t = step.special;
        let start_ordered =
            s.contains(P::ORDERED_NODESET) && s.contains(P::SINGLE_DOCUMENT_NODESET);
        let step_forward = t.contains(P::ORDERED_NODESET);

        let mut special = P::empty();
        if s.contains(P::NON_CREATIVE) && t.contains(P::NON_CREATIVE) {
            special |= P::NON_CREATIVE;
        }
        if s.contains(P::SINGLE_DOCUMENT_NODESET) && t.contains(P::SUBTREE_NODESET) {
            special |= P::SINGLE_DOCUMENT_NODESET;
        }
        if s.contains(P::PEER_NODESET) && t.contains(P::PEER_NODESET) && t.contains(P::SUBTREE_NODESET) {
            special |= P::PEER_NODESET;
        }
        if s.contains(P::SUBTREE_NODESET) && t.contains(P::SUBTREE_NODESET) {
            special |= P::SUBTREE_NODESET;
        }

        let naturally_sorted = start_ordered
            && (t.contains(P::ATTRIBUTE_NS_NODESET)
                || (step_forward && s.contains(P::PEER_NODESET) && t.contains(P::SUBTREE_NODESET)));
        if naturally_sorted {
            special |= P::ORDERED_NODESET;
        }
        // Singleton start + reverse step yields straight reverse order.
        let naturally_reverse = start.cardinality == Cardinality::ExactlyOne
            && t.contains(P::REVERSE_DOCUMENT_ORDER);
        if naturally_reverse {
            special |= P::REVERSE_DOCUMENT_ORDER;
        }

        ExprProps {
            item_type: step.item_type,
            cardinality: start.cardinality.compose(step.cardinality),
            special,
            deps: start.deps | (step.deps & !Dependency::FOCUS),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn make_block_flattens_nested_blocks() {
        let mut a = ExprArena::new();
        let x = a.literal(AtomicValue::Integer(1));
        let y = a.literal(AtomicValue::Integer(2));
        let inner = a.make_block(vec![x, y]);
        let z = a.literal(AtomicValue::Integer(3));
        let outer = a.make_block(vec![inner, z]);
        match a.kind(outer) {
            ExprKind::Block(items) => assert_eq!(items, &vec![x, y, z]),
            other => panic!("expected flattened block, got {other:?}"),
        }
    }

    #[test]
    fn make_block_drops_empty_and_collapses_singleton() {
        let mut a = ExprArena::new();
        let e = a.empty();
        let x = a.literal(AtomicValue::Integer(1));
        let b = a.make_block(vec![e, x]);
        assert_eq!(b, x);
        let e2 = a.empty();
        let e3 = a.empty();
        let b2 = a.make_block(vec![e2, e3]);
        assert!(a.is_empty_literal(b2));
    }

    #[test]
    fn forward_child_step_is_ordered_and_peer() {
        let mut a = ExprArena::new();
        let step = a.alloc(ExprKind::AxisStep {
            axis: Axis::Child,
            test: NodeTest::AnyName,
        });
        a.compute_props(step);
        let p = a.props(step);
        assert!(p.special.contains(StaticProperty::ORDERED_NODESET));
        assert!(p.special.contains(StaticProperty::PEER_NODESET));
        assert!(p.special.contains(StaticProperty::SUBTREE_NODESET));
    }

    #[test]
    fn ancestor_step_is_reverse_ordered() {
        let mut a = ExprArena::new();
        let step = a.alloc(ExprKind::AxisStep {
            axis: Axis::Ancestor,
            test: NodeTest::AnyNode,
        });
        a.compute_props(step);
        assert!(
            a.props(step)
                .special
                .contains(StaticProperty::REVERSE_DOCUMENT_ORDER)
        );
    }
}
