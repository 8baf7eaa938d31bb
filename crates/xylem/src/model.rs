use core::cmp::Ordering;
use core::fmt;

use compact_str::CompactString;

/// The seven node kinds of the XDM data model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Document,
    Element,
    Attribute,
    Text,
    Comment,
    ProcessingInstruction,
    Namespace,
}

/// A lexical QName: optional prefix, local part, optional namespace URI.
/// Equality ignores the prefix (expanded-name semantics).
#[derive(Debug, Clone)]
pub struct QName {
    pub prefix: Option<CompactString>,
    pub local: CompactString,
    pub ns_uri: Option<CompactString>,
}

impl QName {
    pub fn local_name(local: impl AsRef<str>) -> Self {
        Self {
            prefix: None,
            local: CompactString::new(local.as_ref()),
            ns_uri: None,
        }
    }

    pub fn with_ns(ns_uri: impl AsRef<str>, local: impl AsRef<str>) -> Self {
        Self {
            prefix: None,
            local: CompactString::new(local.as_ref()),
            ns_uri: Some(CompactString::new(ns_uri.as_ref())),
        }
    }

    pub fn prefixed(
        prefix: impl AsRef<str>,
        ns_uri: impl AsRef<str>,
        local: impl AsRef<str>,
    ) -> Self {
        Self {
            prefix: Some(CompactString::new(prefix.as_ref())),
            local: CompactString::new(local.as_ref()),
            ns_uri: Some(CompactString::new(ns_uri.as_ref())),
        }
    }

    /// Display name as it would appear in serialized output.
    pub fn display_name(&self) -> String {
        match &self.prefix {
            Some(p) if !p.is_empty() => format!("{p}:{}", self.local),
            _ => self.local.to_string(),
        }
    }
}

impl PartialEq for QName {
    fn eq(&self, other: &Self) -> bool {
        self.local == other.local && self.ns_uri == other.ns_uri
    }
}

impl Eq for QName {}

impl core::hash::Hash for QName {
    fn hash<H: core::hash::Hasher>(&self, state: &mut H) {
        self.local.hash(state);
        self.ns_uri.hash(state);
    }
}

impl fmt::Display for QName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.ns_uri {
            Some(uri) => write!(f, "{{{uri}}}{}", self.local),
            None => write!(f, "{}", self.local),
        }
    }
}

/// Identity token for a document. Indexes built over a document are cached
/// against this token and must be explicitly invalidated when the document
/// is mutated or discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentId(pub u64);

/// Read access to an external node tree. The evaluation core never builds
/// or mutates trees through this trait; it only navigates them.
///
/// `compare_document_order` must be a total order over all nodes the
/// implementation can produce; nodes from different documents are ordered
/// by `DocumentId` so that merged sequences remain stable.
pub trait NodeInfo: Clone + Eq + core::hash::Hash + fmt::Debug + Send + Sync {
    fn kind(&self) -> NodeKind;
    fn name(&self) -> Option<QName>;
    fn string_value(&self) -> String;
    fn document_id(&self) -> DocumentId;

    fn parent(&self) -> Option<Self>;
    fn children(&self) -> Vec<Self>;
    fn attributes(&self) -> Vec<Self>;
    fn namespaces(&self) -> Vec<Self> {
        Vec::new()
    }

    fn compare_document_order(&self, other: &Self) -> Ordering;

    /// The root of the tree containing this node (document node if present).
    fn document_root(&self) -> Self {
        let mut cur = self.clone();
        while let Some(p) = cur.parent() {
            cur = p;
        }
        cur
    }

    /// True if `self` is an ancestor of `other` (not reflexive).
    fn is_ancestor_of(&self, other: &Self) -> bool {
        let mut cur = other.parent();
        while let Some(p) = cur {
            if p == *self {
                return true;
            }
            cur = p.parent();
        }
        false
    }
}

/// Fallback document-order comparison based on ancestry and sibling
/// position. Attributes and namespaces sort before child nodes of the same
/// parent, preserving the order the tree reports them in.
pub fn compare_by_ancestry<N: NodeInfo>(a: &N, b: &N) -> Ordering {
    if a == b {
        return Ordering::Equal;
    }
    if a.document_id() != b.document_id() {
        return a.document_id().cmp(&b.document_id());
    }
    fn path_to_root<N: NodeInfo>(mut n: N) -> Vec<N> {
        let mut p = vec![n.clone()];
        while let Some(parent) = n.parent() {
            p.push(parent.clone());
            n = parent;
        }
        p.reverse();
        p
    }
    let pa = path_to_root(a.clone());
    let pb = path_to_root(b.clone());
    let mut i = 0usize;
    let len = core::cmp::min(pa.len(), pb.len());
    while i < len && pa[i] == pb[i] {
        i += 1;
    }
    if i == len {
        // One path is a prefix of the other: the ancestor comes first.
        return if pa.len() < pb.len() {
            Ordering::Less
        } else {
            Ordering::Greater
        };
    }
    if i == 0 {
        // Shared document id but disjoint ancestry; treat as equal-rank and
        // fall back to a stable tiebreak so sorting stays total.
        return Ordering::Equal;
    }
    let parent = &pa[i - 1];
    let mut sibs: Vec<N> = Vec::new();
    sibs.extend(parent.attributes());
    sibs.extend(parent.namespaces());
    sibs.extend(parent.children());
    let posa = sibs.iter().position(|n| n == &pa[i]);
    let posb = sibs.iter().position(|n| n == &pb[i]);
    match (posa, posb) {
        (Some(x), Some(y)) => x.cmp(&y),
        _ => Ordering::Equal,
    }
}
