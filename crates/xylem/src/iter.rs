use std::sync::Arc;

use crate::error::Error;
use crate::item::{Item, Sequence};
use crate::model::NodeInfo;

/// Pull-based lazy sequence cursor. Single use and forward only: once
/// `next` has returned `Ok(None)` it keeps returning `Ok(None)`. To
/// re-iterate, obtain an independent clone with `another`.
pub trait SequenceIterator<N: NodeInfo> {
    fn next(&mut self) -> Result<Option<Item<N>>, Error>;

    /// A fresh iterator over the same underlying sequence, positioned at
    /// the start and independent of this one's state.
    fn another(&self) -> Box<dyn SequenceIterator<N>>;
}

pub struct EmptyIterator;

impl<N: NodeInfo + 'static> SequenceIterator<N> for EmptyIterator {
    fn next(&mut self) -> Result<Option<Item<N>>, Error> {
        Ok(None)
    }
    fn another(&self) -> Box<dyn SequenceIterator<N>> {
        Box::new(EmptyIterator)
    }
}

pub struct SingletonIterator<N> {
    item: Item<N>,
    done: bool,
}

impl<N: NodeInfo> SingletonIterator<N> {
    pub fn new(item: Item<N>) -> Self {
        Self { item, done: false }
    }
}

impl<N: NodeInfo + 'static> SequenceIterator<N> for SingletonIterator<N> {
    fn next(&mut self) -> Result<Option<Item<N>>, Error> {
        if self.done {
            Ok(None)
        } else {
            self.done = true;
            Ok(Some(self.item.clone()))
        }
    }
    fn another(&self) -> Box<dyn SequenceIterator<N>> {
        Box::new(SingletonIterator::new(self.item.clone()))
    }
}

/// Iterator over a materialized sequence. The backing storage is shared so
/// `another` never copies the items.
pub struct ListIterator<N> {
    items: Arc<Vec<Item<N>>>,
    pos: usize,
}

impl<N: NodeInfo> ListIterator<N> {
    pub fn new(items: Vec<Item<N>>) -> Self {
        Self {
            items: Arc::new(items),
            pos: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl<N: NodeInfo + 'static> SequenceIterator<N> for ListIterator<N> {
    fn next(&mut self) -> Result<Option<Item<N>>, Error> {
        match self.items.get(self.pos) {
            Some(item) => {
                self.pos += 1;
                Ok(Some(item.clone()))
            }
            None => Ok(None),
        }
    }
    fn another(&self) -> Box<dyn SequenceIterator<N>> {
        Box::new(ListIterator {
            items: Arc::clone(&self.items),
            pos: 0,
        })
    }
}

/// Drain an iterator into a materialized sequence.
pub fn materialize<N: NodeInfo>(
    iter: &mut dyn SequenceIterator<N>,
) -> Result<Sequence<N>, Error> {
    let mut out = Vec::new();
    while let Some(item) = iter.next()? {
        out.push(item);
    }
    Ok(out)
}

/// Sort a node sequence into document order and drop duplicate node
/// identities. Atomic values in the input are a caller bug; they are
/// passed through ahead of the nodes unchanged.
pub fn document_order_distinct<N: NodeInfo>(seq: Sequence<N>) -> Sequence<N> {
    let mut atoms = Vec::new();
    let mut nodes: Vec<N> = Vec::with_capacity(seq.len());
    for item in seq {
        match item {
            Item::Node(n) => nodes.push(n),
            a @ Item::Atomic(_) => atoms.push(a),
        }
    }
    nodes.sort_by(|a, b| a.compare_document_order(b));
    nodes.dedup_by(|a, b| a == b);
    atoms.extend(nodes.into_iter().map(Item::Node));
    atoms
}

/// Merge two document-ordered node lists into one, dropping duplicates.
/// Used when an untyped sought value fans out over several per-type
/// indexes whose results must be combined.
pub fn union_in_document_order<N: NodeInfo>(a: Vec<N>, b: Vec<N>) -> Vec<N> {
    let mut out = Vec::with_capacity(a.len() + b.len());
    let mut ia = a.into_iter().peekable();
    let mut ib = b.into_iter().peekable();
    loop {
        match (ia.peek(), ib.peek()) {
            (Some(x), Some(y)) => match x.compare_document_order(y) {
                core::cmp::Ordering::Less => out.push(ia.next().unwrap()),
                core::cmp::Ordering::Greater => out.push(ib.next().unwrap()),
                core::cmp::Ordering::Equal => {
                    out.push(ia.next().unwrap());
                    ib.next();
                }
            },
            (Some(_), None) => out.push(ia.next().unwrap()),
            (None, Some(_)) => out.push(ib.next().unwrap()),
            (None, None) => break,
        }
    }
    out
}

/// Reversal wrapper: materializes once, then yields items back to front.
/// Used where static analysis proves the input is in reverse document
/// order, making an O(n) reversal equivalent to a full sort.
pub struct ReverseIterator<N> {
    items: Arc<Vec<Item<N>>>,
    // Remaining count; next item is items[pos - 1].
    pos: usize,
}

impl<N: NodeInfo> ReverseIterator<N> {
    pub fn new(items: Vec<Item<N>>) -> Self {
        let pos = items.len();
        Self {
            items: Arc::new(items),
            pos,
        }
    }
}

impl<N: NodeInfo + 'static> SequenceIterator<N> for ReverseIterator<N> {
    fn next(&mut self) -> Result<Option<Item<N>>, Error> {
        if self.pos == 0 {
            Ok(None)
        } else {
            self.pos -= 1;
            Ok(Some(self.items[self.pos].clone()))
        }
    }
    fn another(&self) -> Box<dyn SequenceIterator<N>> {
        Box::new(ReverseIterator {
            items: Arc::clone(&self.items),
            pos: self.items.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::AtomicValue;
    use crate::tree::SimpleNode;

    fn ints(vals: &[i64]) -> Sequence<SimpleNode> {
        vals.iter()
            .map(|v| Item::Atomic(AtomicValue::Integer(*v)))
            .collect()
    }

    #[test]
    fn list_iterator_keeps_returning_none_after_exhaustion() {
        let mut it = ListIterator::new(ints(&[1, 2]));
        assert!(SequenceIterator::<SimpleNode>::next(&mut it).unwrap().is_some());
        assert!(SequenceIterator::<SimpleNode>::next(&mut it).unwrap().is_some());
        for _ in 0..3 {
            assert!(SequenceIterator::<SimpleNode>::next(&mut it).unwrap().is_none());
        }
    }

    #[test]
    fn another_restarts_independently() {
        let mut it = ListIterator::new(ints(&[1, 2, 3]));
        SequenceIterator::<SimpleNode>::next(&mut it).unwrap();
        let mut fresh = SequenceIterator::<SimpleNode>::another(&it);
        let first = fresh.next().unwrap().unwrap();
        assert_eq!(first, Item::Atomic(AtomicValue::Integer(1)));
    }

    #[test]
    fn reverse_iterator_yields_back_to_front() {
        let mut it = ReverseIterator::new(ints(&[1, 2, 3]));
        let got = materialize::<SimpleNode>(&mut it).unwrap();
        assert_eq!(got, ints(&[3, 2, 1]));
    }
}
