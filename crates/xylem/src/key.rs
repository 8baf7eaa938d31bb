//! Named keys and their per-document indexes.
//!
//! An index is built at most once per (key set, document, sought type)
//! and cached against the document's identity token until explicitly
//! invalidated. Construction is serialized per document across threads;
//! the building thread re-entering its own construction means the key is
//! defined in terms of itself.

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, ThreadId};

use tracing::debug;

use crate::collation::Collation;
use crate::context::XPathContext;
use crate::error::{Error, ErrorCode};
use crate::expr::{ExprId, eval};
use crate::item::{AtomicValue, Item, MatchKey, PrimitiveType, match_key};
use crate::iter::union_in_document_order;
use crate::model::{DocumentId, NodeInfo, QName};
use crate::pattern::Pattern;

/// One `xsl:key` declaration: nodes matching the pattern are indexed
/// under each atomized value of the use expression.
#[derive(Debug, Clone)]
pub struct KeyDefinition {
    pub pattern: Pattern,
    pub use_expr: ExprId,
}

/// All definitions sharing one key name. A set whose use expressions
/// depend on invocation state (global parameters) is not reusable across
/// invocations and is indexed in the invocation-local cache instead.
#[derive(Debug, Clone)]
pub struct KeyDefinitionSet {
    pub name: QName,
    pub definitions: Vec<KeyDefinition>,
    pub reusable: bool,
    pub collation_uri: Option<String>,
}

/// Index keys are partitioned by the primitive type the lookup compares
/// under, after collapsing the comparable families.
fn normalized(t: PrimitiveType) -> PrimitiveType {
    if t.is_string_family() {
        PrimitiveType::String
    } else if t.is_numeric() {
        PrimitiveType::Double
    } else {
        t
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct IndexId {
    key: QName,
    doc: DocumentId,
    sought: PrimitiveType,
}

/// A built index plus the normalized primitive types actually seen among
/// the use values, which drives the fan-out for untyped sought values.
pub struct KeyIndex<N> {
    map: HashMap<MatchKey, Vec<N>>,
    found_types: Vec<PrimitiveType>,
}

impl<N: NodeInfo> KeyIndex<N> {
    fn hits(&self, k: &MatchKey) -> Vec<N> {
        self.map.get(k).cloned().unwrap_or_default()
    }
}

enum IndexState<N> {
    UnderConstruction(ThreadId),
    Built(Arc<KeyIndex<N>>),
}

/// Shared index cache. The only shared mutable state in an evaluation;
/// synchronization is per index entry, and waiting happens only when
/// another thread is building the index this one needs.
pub struct KeyManager<N: NodeInfo> {
    indexes: Mutex<HashMap<IndexId, IndexState<N>>>,
    built: Condvar,
}

impl<N: NodeInfo> Default for KeyManager<N> {
    fn default() -> Self {
        Self {
            indexes: Mutex::new(HashMap::new()),
            built: Condvar::new(),
        }
    }
}

impl<N: NodeInfo + 'static> KeyManager<N> {
    pub fn new() -> Self {
        Self::default()
    }

    /// All nodes the key selects for one sought value, in document order
    /// without duplicates.
    pub fn select_by_key(
        &self,
        set: &KeyDefinitionSet,
        doc_root: &N,
        sought: &AtomicValue,
        ctx: &XPathContext<N>,
    ) -> Result<Vec<N>, Error> {
        let collation = resolve_collation(set, ctx)?;
        let doc = doc_root.document_id();

        if sought.primitive_type() == PrimitiveType::UntypedAtomic {
            // An untyped value compares under every type the index
            // actually contains: one lookup per found type, merged.
            let first = self.obtain(set, doc_root, doc, PrimitiveType::String, ctx)?;
            let mut result: Vec<N> = Vec::new();
            for t in first.found_types.clone() {
                let index = if t == PrimitiveType::String {
                    Arc::clone(&first)
                } else {
                    self.obtain(set, doc_root, doc, t, ctx)?
                };
                if let Some(k) = match_key(sought, t, collation_for(t, collation.as_deref())) {
                    result = union_in_document_order(result, index.hits(&k));
                }
            }
            return Ok(result);
        }

        let t = normalized(sought.primitive_type());
        let index = self.obtain(set, doc_root, doc, t, ctx)?;
        Ok(match match_key(sought, t, collation_for(t, collation.as_deref())) {
            Some(k) => index.hits(&k),
            // NaN or inconvertible: under key() semantics it matches
            // nothing rather than failing.
            None => Vec::new(),
        })
    }

    fn obtain(
        &self,
        set: &KeyDefinitionSet,
        doc_root: &N,
        doc: DocumentId,
        sought: PrimitiveType,
        ctx: &XPathContext<N>,
    ) -> Result<Arc<KeyIndex<N>>, Error> {
        if !set.reusable {
            return ctx
                .controller()
                .local_keys
                .obtain(set, doc_root, doc, sought, ctx);
        }

        let me = thread::current().id();
        let id = IndexId {
            key: set.name.clone(),
            doc,
            sought,
        };
        let mut map = self.indexes.lock().unwrap();
        loop {
            match map.get(&id) {
                Some(IndexState::Built(index)) => return Ok(Arc::clone(index)),
                Some(IndexState::UnderConstruction(tid)) if *tid == me => {
                    return Err(Error::circularity(format!(
                        "key {} is defined in terms of itself",
                        set.name
                    )));
                }
                Some(IndexState::UnderConstruction(_)) => {
                    map = self.built.wait(map).unwrap();
                }
                None => {
                    map.insert(id.clone(), IndexState::UnderConstruction(me));
                    break;
                }
            }
        }
        drop(map);

        let outcome = build_index(set, doc_root, sought, ctx);
        let mut map = self.indexes.lock().unwrap();
        let result = match outcome {
            Ok(index) => {
                let index = Arc::new(index);
                map.insert(id, IndexState::Built(Arc::clone(&index)));
                Ok(index)
            }
            Err(e) => {
                map.remove(&id);
                Err(e)
            }
        };
        self.built.notify_all();
        result
    }

    /// Drop every index over the given document. Must be called when the
    /// document is mutated or discarded.
    pub fn invalidate(&self, doc: DocumentId) {
        let mut map = self.indexes.lock().unwrap();
        map.retain(|id, _| id.doc != doc);
    }
}

/// Invocation-local cache for non-reusable key sets. Lives on the
/// controller, so no synchronization; circularity is caught with a plain
/// in-progress set.
pub struct LocalKeyCache<N> {
    indexes: std::cell::RefCell<HashMap<IndexId, Arc<KeyIndex<N>>>>,
    building: std::cell::RefCell<std::collections::HashSet<IndexId>>,
}

impl<N> Default for LocalKeyCache<N> {
    fn default() -> Self {
        Self {
            indexes: std::cell::RefCell::new(HashMap::new()),
            building: std::cell::RefCell::new(std::collections::HashSet::new()),
        }
    }
}

impl<N: NodeInfo + 'static> LocalKeyCache<N> {
    fn obtain(
        &self,
        set: &KeyDefinitionSet,
        doc_root: &N,
        doc: DocumentId,
        sought: PrimitiveType,
        ctx: &XPathContext<N>,
    ) -> Result<Arc<KeyIndex<N>>, Error> {
        let id = IndexId {
            key: set.name.clone(),
            doc,
            sought,
        };
        if let Some(index) = self.indexes.borrow().get(&id) {
            return Ok(Arc::clone(index));
        }
        if !self.building.borrow_mut().insert(id.clone()) {
            return Err(Error::circularity(format!(
                "key {} is defined in terms of itself",
                set.name
            )));
        }
        let outcome = build_index(set, doc_root, sought, ctx);
        self.building.borrow_mut().remove(&id);
        let index = Arc::new(outcome?);
        self.indexes
            .borrow_mut()
            .insert(id, Arc::clone(&index));
        Ok(index)
    }
}

fn resolve_collation<N: NodeInfo + 'static>(
    set: &KeyDefinitionSet,
    ctx: &XPathContext<N>,
) -> Result<Option<Arc<dyn Collation>>, Error> {
    match &set.collation_uri {
        Some(uri) => Ok(Some(ctx.controller().collations.resolve(uri)?)),
        None => Ok(None),
    }
}

/// String-family comparison goes through the collation; every other type
/// compares by value.
fn collation_for(t: PrimitiveType, collation: Option<&dyn Collation>) -> Option<&dyn Collation> {
    if t.is_string_family() { collation } else { None }
}

/// Single pass over the document: every node matching any definition's
/// pattern contributes one entry per use value convertible to the sought
/// type. The first definition's matches arrive in document order and are
/// appended; later definitions merge with a backward insertion scan.
fn build_index<N: NodeInfo + 'static>(
    set: &KeyDefinitionSet,
    doc_root: &N,
    sought: PrimitiveType,
    ctx: &XPathContext<N>,
) -> Result<KeyIndex<N>, Error> {
    debug!(key = %set.name, sought = ?sought, "building key index");
    let collation = resolve_collation(set, ctx)?;
    let mut map: HashMap<MatchKey, Vec<N>> = HashMap::new();
    let mut found_types: Vec<PrimitiveType> = Vec::new();

    for (def_index, def) in set.definitions.iter().enumerate() {
        walk(doc_root, &mut |node| {
            if !def.pattern.matches(node) {
                return Ok(());
            }
            let node_ctx = ctx.with_focus(Item::Node(node.clone()), 1, Some(1));
            let values = eval::evaluate(def.use_expr, &node_ctx)?;
            for item in values {
                let value = item.atomize();
                let t = normalized(value.primitive_type());
                if !found_types.contains(&t) {
                    found_types.push(t);
                }
                let Some(k) = match_key(
                    &value,
                    sought,
                    collation_for(sought, collation.as_deref()),
                ) else {
                    continue;
                };
                let entry = map.entry(k).or_default();
                if def_index == 0 {
                    // Document-order walk: only the tail can duplicate.
                    if entry.last() != Some(node) {
                        entry.push(node.clone());
                    }
                } else {
                    insert_in_document_order(entry, node);
                }
            }
            Ok(())
        })?;
    }

    Ok(KeyIndex { map, found_types })
}

fn insert_in_document_order<N: NodeInfo>(entry: &mut Vec<N>, node: &N) {
    let mut i = entry.len();
    while i > 0 {
        match entry[i - 1].compare_document_order(node) {
            core::cmp::Ordering::Equal => return,
            core::cmp::Ordering::Greater => i -= 1,
            core::cmp::Ordering::Less => break,
        }
    }
    entry.insert(i, node.clone());
}

/// Preorder walk: the node, its attributes, then its children.
fn walk<N: NodeInfo>(
    node: &N,
    f: &mut impl FnMut(&N) -> Result<(), Error>,
) -> Result<(), Error> {
    f(node)?;
    for attr in node.attributes() {
        f(&attr)?;
    }
    for child in node.children() {
        walk(&child, f)?;
    }
    Ok(())
}

/// Resolve a key name against the executable's declarations.
pub fn key_set_named(
    sets: &HashMap<QName, Arc<KeyDefinitionSet>>,
    name: &QName,
) -> Result<Arc<KeyDefinitionSet>, Error> {
    sets.get(name).cloned().ok_or_else(|| {
        Error::dynamic(
            ErrorCode::XTDE1260,
            format!("there is no key named {name}"),
        )
    })
}
