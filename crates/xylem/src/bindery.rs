//! Slot allocation and the global variable store.
//!
//! Local variables live in dense per-frame slot arrays; the numbers are
//! handed out by a [`SlotManager`] per compiled template or function.
//! Global variables live in the per-evaluation [`Bindery`], evaluated
//! lazily with a busy flag that turns circular definitions into an error
//! instead of unbounded recursion.

use std::cell::RefCell;

use crate::error::{Error, ErrorCode};
use crate::expr::UNALLOCATED;
use crate::item::Sequence;
use crate::model::{NodeInfo, QName};

/// Allocates dense local slot numbers for one compiled unit and remembers
/// the variable names for diagnostics.
#[derive(Debug, Default, Clone)]
pub struct SlotManager {
    names: Vec<QName>,
}

impl SlotManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate(&mut self, name: QName) -> i32 {
        let slot = self.names.len() as i32;
        self.names.push(name);
        slot
    }

    pub fn slot_count(&self) -> usize {
        self.names.len()
    }

    pub fn name_of(&self, slot: i32) -> Option<&QName> {
        usize::try_from(slot).ok().and_then(|i| self.names.get(i))
    }
}

/// Validate a slot number against a frame of `len` slots. The unallocated
/// sentinel means the compiler never ran slot allocation over this
/// variable; anything else out of range means the frame itself is wrong.
pub fn check_slot(slot: i32, len: usize) -> Result<usize, Error> {
    if slot == UNALLOCATED {
        return Err(Error::dynamic(
            ErrorCode::SXLM0001,
            "variable slot was never allocated",
        ));
    }
    match usize::try_from(slot) {
        Ok(i) if i < len => Ok(i),
        _ => Err(Error::dynamic(
            ErrorCode::SXLM0002,
            format!("slot {slot} out of range for frame of {len}"),
        )),
    }
}

enum GlobalState<N> {
    Unevaluated,
    /// Evaluation in progress; re-entry is a circular definition.
    Busy,
    Value(Sequence<N>),
}

/// Store for global variable values, one per evaluation. Interior
/// mutability because the context chain shares it behind an `Rc`.
pub struct Bindery<N: NodeInfo> {
    globals: RefCell<Vec<GlobalState<N>>>,
}

/// Outcome of asking the bindery for a global's value.
#[derive(Debug)]
pub enum GlobalLookup<N> {
    /// Already evaluated.
    Value(Sequence<N>),
    /// The caller now owns evaluation; the slot is marked busy and must
    /// be completed with `save_value` (or released on error).
    MustEvaluate,
}

impl<N: NodeInfo> Bindery<N> {
    pub fn new(slot_count: usize) -> Self {
        let mut globals = Vec::with_capacity(slot_count);
        for _ in 0..slot_count {
            globals.push(GlobalState::Unevaluated);
        }
        Self {
            globals: RefCell::new(globals),
        }
    }

    pub fn fetch(&self, slot: i32, name: &QName) -> Result<GlobalLookup<N>, Error> {
        let mut globals = self.globals.borrow_mut();
        let i = check_slot(slot, globals.len())?;
        match &globals[i] {
            GlobalState::Value(v) => Ok(GlobalLookup::Value(v.clone())),
            GlobalState::Busy => Err(Error::circularity(format!(
                "circular definition of global variable ${name}"
            ))),
            GlobalState::Unevaluated => {
                globals[i] = GlobalState::Busy;
                Ok(GlobalLookup::MustEvaluate)
            }
        }
    }

    pub fn save_value(&self, slot: i32, value: Sequence<N>) -> Result<(), Error> {
        let mut globals = self.globals.borrow_mut();
        let i = check_slot(slot, globals.len())?;
        globals[i] = GlobalState::Value(value);
        Ok(())
    }

    /// Clear a busy flag after a failed evaluation so a later attempt is
    /// not misreported as circular.
    pub fn release(&self, slot: i32) {
        if let Ok(i) = usize::try_from(slot) {
            let mut globals = self.globals.borrow_mut();
            if i < globals.len() && matches!(globals[i], GlobalState::Busy) {
                globals[i] = GlobalState::Unevaluated;
            }
        }
    }

    /// Supply an externally provided parameter value before evaluation
    /// starts.
    pub fn define_parameter(&self, slot: i32, value: Sequence<N>) -> Result<(), Error> {
        self.save_value(slot, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::{AtomicValue, Item};
    use crate::tree::SimpleNode;

    #[test]
    fn unallocated_slot_is_distinct_from_out_of_range() {
        let e = check_slot(UNALLOCATED, 4).unwrap_err();
        assert_eq!(e.code, ErrorCode::SXLM0001);
        let e = check_slot(7, 4).unwrap_err();
        assert_eq!(e.code, ErrorCode::SXLM0002);
        assert_eq!(check_slot(3, 4).unwrap(), 3);
    }

    #[test]
    fn busy_global_reports_circularity() {
        let b: Bindery<SimpleNode> = Bindery::new(1);
        let name = QName::local_name("x");
        assert!(matches!(
            b.fetch(0, &name).unwrap(),
            GlobalLookup::MustEvaluate
        ));
        let err = b.fetch(0, &name).unwrap_err();
        assert!(err.is_circularity());
        assert_eq!(err.code, ErrorCode::XTDE0640);

        b.save_value(0, vec![Item::Atomic(AtomicValue::Integer(5))])
            .unwrap();
        match b.fetch(0, &name).unwrap() {
            GlobalLookup::Value(v) => assert_eq!(v.len(), 1),
            GlobalLookup::MustEvaluate => panic!("value should be cached"),
        }
    }

    #[test]
    fn release_clears_busy_flag() {
        let b: Bindery<SimpleNode> = Bindery::new(1);
        let name = QName::local_name("x");
        let _ = b.fetch(0, &name).unwrap();
        b.release(0);
        assert!(matches!(
            b.fetch(0, &name).unwrap(),
            GlobalLookup::MustEvaluate
        ));
    }
}
