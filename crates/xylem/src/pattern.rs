//! Match patterns for template rules and key definitions. A pattern is a
//! right-to-left chain of node tests: the rightmost test applies to the
//! candidate node itself, each `WithParent` link constrains an ancestor
//! step.

use crate::expr::{Axis, NodeTest};
use crate::model::{NodeInfo, NodeKind};

#[derive(Debug, Clone, PartialEq)]
pub enum Pattern {
    /// `node()`: matches anything.
    AnyNode,
    /// `/`: matches only a document node.
    Root,
    /// A single node test on the given axis's principal node kind
    /// (element tests use `Child`, attribute tests use `Attribute`).
    Test { axis: Axis, test: NodeTest },
    /// `parent/child`: the node must satisfy `test` and its parent must
    /// match the inner pattern.
    WithParent {
        parent: Box<Pattern>,
        axis: Axis,
        test: NodeTest,
    },
}

impl Pattern {
    pub fn element(test: NodeTest) -> Self {
        Pattern::Test {
            axis: Axis::Child,
            test,
        }
    }

    pub fn attribute(test: NodeTest) -> Self {
        Pattern::Test {
            axis: Axis::Attribute,
            test,
        }
    }

    pub fn matches<N: NodeInfo>(&self, node: &N) -> bool {
        match self {
            Pattern::AnyNode => true,
            Pattern::Root => node.kind() == NodeKind::Document,
            Pattern::Test { axis, test } => test.matches(*axis, node),
            Pattern::WithParent { parent, axis, test } => {
                test.matches(*axis, node)
                    && node.parent().is_some_and(|p| parent.matches(&p))
            }
        }
    }

    /// Default priority in the XSLT scheme: plain name tests are 0,
    /// wildcard name tests -0.25, kind tests -0.5, and any pattern with
    /// structure above a single test is 0.5.
    pub fn default_priority(&self) -> f64 {
        match self {
            Pattern::AnyNode => -0.5,
            Pattern::Root => -0.5,
            Pattern::Test { test, .. } => test.default_priority(),
            Pattern::WithParent { .. } => 0.5,
        }
    }

    /// The node test a candidate must pass, for optimizer shape matching.
    pub fn terminal_test(&self) -> Option<&NodeTest> {
        match self {
            Pattern::Test { test, .. } | Pattern::WithParent { test, .. } => Some(test),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::QName;
    use crate::tree::{attr, elem};

    #[test]
    fn parent_chain_constrains_match() {
        let tree = elem("a").child(elem("b")).build();
        let b = tree.children()[0].clone();
        let p = Pattern::WithParent {
            parent: Box::new(Pattern::element(NodeTest::Name(QName::local_name("a")))),
            axis: Axis::Child,
            test: NodeTest::Name(QName::local_name("b")),
        };
        assert!(p.matches(&b));
        assert!(!p.matches(&tree));
    }

    #[test]
    fn attribute_pattern_matches_attributes_only() {
        let tree = elem("a").attr(attr("id", "1")).build();
        let id = tree.attributes()[0].clone();
        let p = Pattern::attribute(NodeTest::Name(QName::local_name("id")));
        assert!(p.matches(&id));
        assert!(!p.matches(&tree));
    }

    #[test]
    fn priorities_follow_the_xslt_scheme() {
        assert_eq!(
            Pattern::element(NodeTest::Name(QName::local_name("x"))).default_priority(),
            0.0
        );
        assert_eq!(Pattern::element(NodeTest::AnyName).default_priority(), -0.25);
        assert_eq!(Pattern::AnyNode.default_priority(), -0.5);
    }
}
