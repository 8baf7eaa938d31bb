pub mod bindery;
pub mod collation;
pub mod context;
pub mod error;
pub mod executable;
pub mod expr;
pub mod item;
pub mod iter;
pub mod key;
pub mod model;
pub mod output;
pub mod pattern;
pub mod props;
pub mod regex;
pub mod rule;
pub mod tree;

pub use context::{Controller, Focus, XPathContext};
pub use error::{Error, ErrorCode, ErrorKind, Location};
pub use executable::{Executable, ExecutableBuilder, GlobalVariable};
pub use expr::eval::{apply_templates, drain_tail, evaluate, iterate, process};
pub use expr::{Axis, ExprArena, ExprId, ExprKind, NodeTest};
pub use item::{AtomicValue, Item, PrimitiveType, Sequence};
pub use iter::SequenceIterator;
pub use key::{KeyDefinitionSet, KeyManager};
pub use model::{NodeInfo, NodeKind, QName};
pub use output::complex::ComplexContentOutputter;
pub use output::{HostLanguage, Receiver};
pub use pattern::Pattern;
pub use rule::{Mode, RecoveryPolicy, Rule, Template, TemplateId};
pub use tree::{SimpleNode, attr, doc, elem, elem_ns, text};
