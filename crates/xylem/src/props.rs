use bitflags::bitflags;

use crate::item::PrimitiveType;
use crate::model::NodeKind;

bitflags! {
    /// Special properties of a node-sequence-valued expression, computed
    /// during static analysis and consulted when deciding whether a path
    /// composition needs a runtime sort.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct StaticProperty: u32 {
        /// Result is in document order with no duplicate nodes.
        const ORDERED_NODESET = 1 << 0;
        /// Result is in reverse document order (reverse axes).
        const REVERSE_DOCUMENT_ORDER = 1 << 1;
        /// No node in the result is an ancestor of another.
        const PEER_NODESET = 1 << 2;
        /// Every result node lies within the subtree rooted at the
        /// context node.
        const SUBTREE_NODESET = 1 << 3;
        /// Result contains only attribute and namespace nodes.
        const ATTRIBUTE_NS_NODESET = 1 << 4;
        /// All result nodes come from one document.
        const SINGLE_DOCUMENT_NODESET = 1 << 5;
        /// The expression constructs no new nodes.
        const NON_CREATIVE = 1 << 6;
    }
}

bitflags! {
    /// What parts of the evaluation context an expression depends on.
    /// Focus independence is the eligibility test for promotion; global
    /// variable dependence marks key indexes as non-reusable.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Dependency: u32 {
        const CONTEXT_ITEM = 1 << 0;
        const POSITION = 1 << 1;
        const LAST = 1 << 2;
        const LOCAL_VARIABLES = 1 << 3;
        const GLOBAL_VARIABLES = 1 << 4;
    }
}

impl Dependency {
    pub const FOCUS: Dependency = Dependency::CONTEXT_ITEM
        .union(Dependency::POSITION)
        .union(Dependency::LAST);

    pub fn depends_on_focus(self) -> bool {
        self.intersects(Self::FOCUS)
    }
}

/// Static cardinality of an expression's result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    Empty,
    ExactlyOne,
    ZeroOrOne,
    OneOrMore,
    ZeroOrMore,
}

impl Cardinality {
    pub fn allows_zero(self) -> bool {
        !matches!(self, Cardinality::ExactlyOne | Cardinality::OneOrMore)
    }

    pub fn allows_many(self) -> bool {
        matches!(self, Cardinality::OneOrMore | Cardinality::ZeroOrMore)
    }

    /// Cardinality of evaluating `other` once for every item produced by
    /// `self` (sequencing composition: counts multiply).
    pub fn compose(self, other: Cardinality) -> Cardinality {
        use Cardinality::*;
        match (self, other) {
            (Empty, _) | (_, Empty) => Empty,
            (ExactlyOne, c) => c,
            (c, ExactlyOne) => c,
            (ZeroOrOne, ZeroOrOne) => ZeroOrOne,
            (OneOrMore, OneOrMore) => OneOrMore,
            _ => ZeroOrMore,
        }
    }

    /// Cardinality of concatenating the two results (counts add).
    pub fn add(self, other: Cardinality) -> Cardinality {
        use Cardinality::*;
        match (self, other) {
            (Empty, c) | (c, Empty) => c,
            (a, b) => {
                if a.allows_zero() && b.allows_zero() {
                    ZeroOrMore
                } else {
                    OneOrMore
                }
            }
        }
    }

    /// Least upper bound, used for conditional branches.
    pub fn union(self, other: Cardinality) -> Cardinality {
        use Cardinality::*;
        if self == other {
            return self;
        }
        let zero = self.allows_zero() || other.allows_zero();
        let many = self.allows_many() || other.allows_many();
        match (zero, many) {
            (false, false) => ExactlyOne,
            (true, false) => ZeroOrOne,
            (false, true) => OneOrMore,
            (true, true) => ZeroOrMore,
        }
    }
}

/// Static item type, deliberately coarse: enough to decide whether a path
/// step is statically nodes, statically atomic, or unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemType {
    /// Anything; nothing is statically known.
    AnyItem,
    AnyNode,
    Node(NodeKind),
    Atomic(PrimitiveType),
    /// The expression can produce nothing (statically empty).
    Nothing,
}

impl ItemType {
    pub fn is_statically_nodes(self) -> bool {
        matches!(self, ItemType::AnyNode | ItemType::Node(_))
    }

    pub fn is_statically_atomic(self) -> bool {
        matches!(self, ItemType::Atomic(_))
    }

    /// Least upper bound for branches and blocks.
    pub fn union(self, other: ItemType) -> ItemType {
        use ItemType::*;
        match (self, other) {
            (Nothing, t) | (t, Nothing) => t,
            (a, b) if a == b => a,
            (AnyNode | Node(_), AnyNode | Node(_)) => AnyNode,
            _ => AnyItem,
        }
    }
}

/// Full set of statically computed facts cached on an expression node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExprProps {
    pub item_type: ItemType,
    pub cardinality: Cardinality,
    pub special: StaticProperty,
    pub deps: Dependency,
}

impl Default for ExprProps {
    fn default() -> Self {
        Self {
            item_type: ItemType::AnyItem,
            cardinality: Cardinality::ZeroOrMore,
            special: StaticProperty::empty(),
            deps: Dependency::empty(),
        }
    }
}

impl ExprProps {
    pub fn atomic(t: PrimitiveType, c: Cardinality) -> Self {
        Self {
            item_type: ItemType::Atomic(t),
            cardinality: c,
            special: StaticProperty::NON_CREATIVE,
            deps: Dependency::empty(),
        }
    }
}
