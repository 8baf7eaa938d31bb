//! The push-mode event pipeline. Instructions deliver their output as a
//! stream of events to a [`Receiver`]; the
//! [`ComplexContentOutputter`](complex::ComplexContentOutputter) sits in
//! front of any real sink and enforces the element construction rules.

pub mod build;
pub mod complex;

use crate::error::Error;
use crate::model::{NodeInfo, NodeKind, QName};

/// The construction rules differ between the two host languages in which
/// error is raised for each misuse; the conditions themselves are shared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostLanguage {
    Xslt,
    Xquery,
}

/// Event sink for push-mode output.
///
/// Contract: attributes and namespaces for an element arrive between
/// `start_element` and `start_content`; `start_content` fires exactly
/// once per element, before any child content; `characters`, `comment`
/// and `processing_instruction` never arrive between `start_element` and
/// `start_content` when the stream has passed through the outputter.
pub trait Receiver<N: NodeInfo> {
    fn start_document(&mut self) -> Result<(), Error>;
    fn end_document(&mut self) -> Result<(), Error>;
    fn start_element(&mut self, name: &QName) -> Result<(), Error>;
    fn namespace(&mut self, prefix: &str, uri: &str) -> Result<(), Error>;
    fn attribute(&mut self, name: &QName, value: &str) -> Result<(), Error>;
    fn start_content(&mut self) -> Result<(), Error>;
    fn characters(&mut self, text: &str) -> Result<(), Error>;
    fn comment(&mut self, text: &str) -> Result<(), Error>;
    fn processing_instruction(&mut self, target: &str, data: &str) -> Result<(), Error>;
    fn end_element(&mut self) -> Result<(), Error>;
}

/// Decompose an existing node into events. Used when a sequence being
/// pushed contains nodes from a source tree.
pub fn copy_node<N: NodeInfo>(node: &N, out: &mut dyn Receiver<N>) -> Result<(), Error> {
    match node.kind() {
        NodeKind::Document => {
            out.start_document()?;
            for child in node.children() {
                copy_node(&child, out)?;
            }
            out.end_document()
        }
        NodeKind::Element => {
            let name = node.name().unwrap_or_else(|| QName::local_name(""));
            out.start_element(&name)?;
            for ns in node.namespaces() {
                let prefix = ns.name().map(|q| q.local.to_string()).unwrap_or_default();
                out.namespace(&prefix, &ns.string_value())?;
            }
            for attr in node.attributes() {
                if let Some(aname) = attr.name() {
                    out.attribute(&aname, &attr.string_value())?;
                }
            }
            out.start_content()?;
            for child in node.children() {
                copy_node(&child, out)?;
            }
            out.end_element()
        }
        NodeKind::Attribute => {
            let name = node.name().unwrap_or_else(|| QName::local_name(""));
            out.attribute(&name, &node.string_value())
        }
        NodeKind::Namespace => {
            let prefix = node.name().map(|q| q.local.to_string()).unwrap_or_default();
            out.namespace(&prefix, &node.string_value())
        }
        NodeKind::Text => out.characters(&node.string_value()),
        NodeKind::Comment => out.comment(&node.string_value()),
        NodeKind::ProcessingInstruction => {
            let target = node.name().map(|q| q.local.to_string()).unwrap_or_default();
            out.processing_instruction(&target, &node.string_value())
        }
    }
}
