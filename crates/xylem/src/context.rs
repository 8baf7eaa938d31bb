//! Evaluation context chain. Minor contexts share the caller's stack
//! frame and only change the focus; major contexts (template and function
//! entry) carry a fresh frame. The chain is single threaded: one
//! evaluation owns one chain, so the internals are `Rc`-based.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use crate::bindery::{self, Bindery, GlobalLookup};
use crate::collation::CollationRegistry;
use crate::error::{Error, ErrorCode};
use crate::executable::Executable;
use crate::item::{Item, Sequence};
use crate::key::{KeyManager, LocalKeyCache};
use crate::model::NodeInfo;
use crate::rule::RecoveryPolicy;

/// The context item with its position and, when known, the size of the
/// sequence being iterated. `last` is filled only when something in the
/// step actually asked for it at compile time.
#[derive(Debug, Clone)]
pub struct Focus<N> {
    pub item: Item<N>,
    pub position: usize,
    pub last: Option<usize>,
}

/// Per-invocation state shared by every context in one evaluation.
pub struct Controller<N: NodeInfo> {
    pub executable: Arc<Executable>,
    pub bindery: Bindery<N>,
    pub keys: Arc<KeyManager<N>>,
    pub collations: Arc<CollationRegistry>,
    pub recovery: RecoveryPolicy,
    /// Indexes for key definition sets that depend on invocation state;
    /// discarded with the controller.
    pub local_keys: LocalKeyCache<N>,
}

impl<N: NodeInfo> Controller<N> {
    pub fn new(executable: Arc<Executable>, keys: Arc<KeyManager<N>>) -> Self {
        let globals = executable.global_slot_count();
        Self {
            executable,
            bindery: Bindery::new(globals),
            keys,
            collations: Arc::new(CollationRegistry::default()),
            recovery: RecoveryPolicy::DoNotRecover,
            local_keys: LocalKeyCache::default(),
        }
    }

    pub fn with_recovery(mut self, recovery: RecoveryPolicy) -> Self {
        self.recovery = recovery;
        self
    }
}

struct StackFrame<N> {
    slots: Vec<Option<Sequence<N>>>,
}

/// One link in the context chain. Cloning yields a minor context: same
/// controller, same frame, same focus, independently replaceable.
pub struct XPathContext<N: NodeInfo> {
    controller: Rc<Controller<N>>,
    frame: Rc<RefCell<StackFrame<N>>>,
    focus: Option<Focus<N>>,
}

impl<N: NodeInfo> Clone for XPathContext<N> {
    fn clone(&self) -> Self {
        Self {
            controller: Rc::clone(&self.controller),
            frame: Rc::clone(&self.frame),
            focus: self.focus.clone(),
        }
    }
}

impl<N: NodeInfo + 'static> XPathContext<N> {
    pub fn new(controller: Controller<N>) -> Self {
        Self {
            controller: Rc::new(controller),
            frame: Rc::new(RefCell::new(StackFrame { slots: Vec::new() })),
            focus: None,
        }
    }

    pub fn controller(&self) -> &Rc<Controller<N>> {
        &self.controller
    }

    pub fn executable(&self) -> &Arc<Executable> {
        &self.controller.executable
    }

    /// Minor context with a new focus.
    pub fn with_focus(&self, item: Item<N>, position: usize, last: Option<usize>) -> Self {
        let mut ctx = self.clone();
        ctx.focus = Some(Focus {
            item,
            position,
            last,
        });
        ctx
    }

    /// Major context: fresh stack frame of `slot_count` locals, keeping
    /// the current focus.
    pub fn new_major(&self, slot_count: usize) -> Self {
        let mut ctx = self.clone();
        ctx.frame = Rc::new(RefCell::new(StackFrame {
            slots: vec![None; slot_count],
        }));
        ctx
    }

    pub fn focus(&self) -> Option<&Focus<N>> {
        self.focus.as_ref()
    }

    pub fn context_item(&self) -> Result<Item<N>, Error> {
        self.focus
            .as_ref()
            .map(|f| f.item.clone())
            .ok_or_else(|| Error::dynamic(ErrorCode::XPDY0002, "the context item is absent"))
    }

    pub fn context_node(&self) -> Result<N, Error> {
        match self.context_item()? {
            Item::Node(n) => Ok(n),
            Item::Atomic(_) => Err(Error::dynamic(
                ErrorCode::XPTY0004,
                "the context item is not a node",
            )),
        }
    }

    pub fn position(&self) -> Result<usize, Error> {
        self.focus
            .as_ref()
            .map(|f| f.position)
            .ok_or_else(|| Error::dynamic(ErrorCode::XPDY0002, "position() with no focus"))
    }

    pub fn last(&self) -> Result<usize, Error> {
        self.focus
            .as_ref()
            .and_then(|f| f.last)
            .ok_or_else(|| Error::dynamic(ErrorCode::XPDY0002, "last() with no focus"))
    }

    pub fn local(&self, slot: i32) -> Result<Sequence<N>, Error> {
        let frame = self.frame.borrow();
        let i = bindery::check_slot(slot, frame.slots.len())?;
        frame.slots[i].clone().ok_or_else(|| {
            Error::dynamic(
                ErrorCode::SXLM0002,
                format!("local variable slot {slot} read before it was set"),
            )
        })
    }

    pub fn set_local(&self, slot: i32, value: Sequence<N>) -> Result<(), Error> {
        let mut frame = self.frame.borrow_mut();
        let len = frame.slots.len();
        let i = bindery::check_slot(slot, len)?;
        frame.slots[i] = Some(value);
        Ok(())
    }

    /// Lazily evaluated global variable access, with circularity
    /// detection through the bindery's busy flags.
    pub fn global(&self, slot: i32) -> Result<Sequence<N>, Error> {
        let decl = self.controller.executable.global_by_slot(slot)?;
        match self.controller.bindery.fetch(slot, &decl.name)? {
            GlobalLookup::Value(v) => Ok(v),
            GlobalLookup::MustEvaluate => {
                // Globals are evaluated with no focus and an empty frame.
                let mut gctx = self.new_major(decl.slot_count);
                gctx.focus = None;
                let result = crate::expr::eval::evaluate(decl.select, &gctx);
                match result {
                    Ok(v) => {
                        self.controller.bindery.save_value(slot, v.clone())?;
                        Ok(v)
                    }
                    Err(e) => {
                        self.controller.bindery.release(slot);
                        Err(e)
                    }
                }
            }
        }
    }
}
