//! Arc-backed in-memory tree used by the tests, the receiver-side tree
//! builder and quick prototypes. Not optimized; correctness and ergonomic
//! construction only.

use std::fmt;
use std::sync::{Arc, RwLock, Weak};

use crate::model::{DocumentId, NodeInfo, NodeKind, QName, compare_by_ancestry};

#[derive(Debug)]
struct Inner {
    kind: NodeKind,
    name: Option<QName>,
    value: RwLock<Option<String>>,
    parent: RwLock<Option<Weak<Inner>>>,
    attributes: RwLock<Vec<SimpleNode>>,
    namespaces: RwLock<Vec<SimpleNode>>,
    children: RwLock<Vec<SimpleNode>>,
}

/// A simple reference-counted node. Identity is pointer identity.
#[derive(Clone)]
pub struct SimpleNode(Arc<Inner>);

impl PartialEq for SimpleNode {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}
impl Eq for SimpleNode {}

impl std::hash::Hash for SimpleNode {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        std::ptr::hash(Arc::as_ptr(&self.0), state);
    }
}

impl fmt::Debug for SimpleNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.kind {
            NodeKind::Element => write!(
                f,
                "<{}>",
                self.0.name.as_ref().map(QName::display_name).unwrap_or_default()
            ),
            NodeKind::Attribute => write!(
                f,
                "@{}={:?}",
                self.0.name.as_ref().map(QName::display_name).unwrap_or_default(),
                self.0.value.read().unwrap().clone().unwrap_or_default()
            ),
            NodeKind::Text => write!(f, "text({:?})", self.0.value.read().unwrap()),
            k => write!(f, "{k:?}"),
        }
    }
}

impl SimpleNode {
    fn new(kind: NodeKind, name: Option<QName>, value: Option<String>) -> Self {
        Self(Arc::new(Inner {
            kind,
            name,
            value: RwLock::new(value),
            parent: RwLock::new(None),
            attributes: RwLock::new(Vec::new()),
            namespaces: RwLock::new(Vec::new()),
            children: RwLock::new(Vec::new()),
        }))
    }

    pub fn document() -> Self {
        Self::new(NodeKind::Document, None, None)
    }

    pub fn element(name: QName) -> Self {
        Self::new(NodeKind::Element, Some(name), None)
    }

    pub fn attribute(name: QName, value: impl Into<String>) -> Self {
        Self::new(NodeKind::Attribute, Some(name), Some(value.into()))
    }

    pub fn text(value: impl Into<String>) -> Self {
        Self::new(NodeKind::Text, None, Some(value.into()))
    }

    pub fn comment(value: impl Into<String>) -> Self {
        Self::new(NodeKind::Comment, None, Some(value.into()))
    }

    pub fn processing_instruction(target: impl AsRef<str>, value: impl Into<String>) -> Self {
        Self::new(
            NodeKind::ProcessingInstruction,
            Some(QName::local_name(target)),
            Some(value.into()),
        )
    }

    pub fn namespace_node(prefix: impl AsRef<str>, uri: impl Into<String>) -> Self {
        Self::new(
            NodeKind::Namespace,
            Some(QName::local_name(prefix)),
            Some(uri.into()),
        )
    }

    pub fn append_child(&self, child: SimpleNode) {
        *child.0.parent.write().unwrap() = Some(Arc::downgrade(&self.0));
        self.0.children.write().unwrap().push(child);
    }

    pub fn add_attribute(&self, attr: SimpleNode) {
        *attr.0.parent.write().unwrap() = Some(Arc::downgrade(&self.0));
        self.0.attributes.write().unwrap().push(attr);
    }

    pub fn add_namespace(&self, ns: SimpleNode) {
        *ns.0.parent.write().unwrap() = Some(Arc::downgrade(&self.0));
        self.0.namespaces.write().unwrap().push(ns);
    }

    /// Attribute value lookup by local name, for test assertions.
    pub fn attribute_value(&self, local: &str) -> Option<String> {
        self.0
            .attributes
            .read()
            .unwrap()
            .iter()
            .find(|a| a.name().is_some_and(|q| q.local == local))
            .map(|a| a.string_value())
    }
}

impl NodeInfo for SimpleNode {
    fn kind(&self) -> NodeKind {
        self.0.kind
    }

    fn name(&self) -> Option<QName> {
        self.0.name.clone()
    }

    fn string_value(&self) -> String {
        match self.0.kind {
            NodeKind::Document | NodeKind::Element => {
                let mut out = String::new();
                for c in self.0.children.read().unwrap().iter() {
                    match c.kind() {
                        NodeKind::Text | NodeKind::Element | NodeKind::Document => {
                            out.push_str(&c.string_value());
                        }
                        _ => {}
                    }
                }
                out
            }
            _ => self.0.value.read().unwrap().clone().unwrap_or_default(),
        }
    }

    fn document_id(&self) -> DocumentId {
        DocumentId(Arc::as_ptr(&self.document_root().0) as u64)
    }

    fn parent(&self) -> Option<Self> {
        self.0
            .parent
            .read()
            .unwrap()
            .as_ref()
            .and_then(Weak::upgrade)
            .map(SimpleNode)
    }

    fn children(&self) -> Vec<Self> {
        self.0.children.read().unwrap().clone()
    }

    fn attributes(&self) -> Vec<Self> {
        self.0.attributes.read().unwrap().clone()
    }

    fn namespaces(&self) -> Vec<Self> {
        self.0.namespaces.read().unwrap().clone()
    }

    fn compare_document_order(&self, other: &Self) -> core::cmp::Ordering {
        compare_by_ancestry(self, other)
    }
}

/// Fluent builder mirroring the shape of the tree being built.
pub struct NodeBuilder {
    node: SimpleNode,
}

pub fn doc() -> NodeBuilder {
    NodeBuilder {
        node: SimpleNode::document(),
    }
}

pub fn elem(name: impl AsRef<str>) -> NodeBuilder {
    NodeBuilder {
        node: SimpleNode::element(QName::local_name(name)),
    }
}

pub fn elem_ns(ns_uri: impl AsRef<str>, name: impl AsRef<str>) -> NodeBuilder {
    NodeBuilder {
        node: SimpleNode::element(QName::with_ns(ns_uri, name)),
    }
}

pub fn text(value: impl Into<String>) -> NodeBuilder {
    NodeBuilder {
        node: SimpleNode::text(value),
    }
}

pub fn attr(name: impl AsRef<str>, value: impl Into<String>) -> SimpleNode {
    SimpleNode::attribute(QName::local_name(name), value)
}

impl NodeBuilder {
    pub fn child(self, child: NodeBuilder) -> Self {
        self.node.append_child(child.node);
        self
    }

    pub fn attr(self, attribute: SimpleNode) -> Self {
        self.node.add_attribute(attribute);
        self
    }

    pub fn namespace(self, prefix: impl AsRef<str>, uri: impl Into<String>) -> Self {
        self.node.add_namespace(SimpleNode::namespace_node(prefix, uri));
        self
    }

    pub fn build(self) -> SimpleNode {
        self.node
    }
}
