//! Receiver sinks: an event recorder for assertions and a tree builder
//! that materializes pushed output as `SimpleNode` trees.

use std::marker::PhantomData;

use crate::error::{Error, ErrorCode};
use crate::model::{NodeInfo, QName};
use crate::tree::SimpleNode;

use super::Receiver;

/// Flat record of every event received, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    StartDocument,
    EndDocument,
    StartElement(String),
    Namespace(String, String),
    Attribute(String, String),
    StartContent,
    Characters(String),
    Comment(String),
    Pi(String, String),
    EndElement,
}

#[derive(Debug)]
pub struct EventRecorder<N> {
    pub events: Vec<Event>,
    _marker: PhantomData<N>,
}

impl<N> Default for EventRecorder<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<N> EventRecorder<N> {
    pub fn new() -> Self {
        Self {
            events: Vec::new(),
            _marker: PhantomData,
        }
    }
}

impl<N: NodeInfo> Receiver<N> for EventRecorder<N> {
    fn start_document(&mut self) -> Result<(), Error> {
        self.events.push(Event::StartDocument);
        Ok(())
    }
    fn end_document(&mut self) -> Result<(), Error> {
        self.events.push(Event::EndDocument);
        Ok(())
    }
    fn start_element(&mut self, name: &QName) -> Result<(), Error> {
        self.events.push(Event::StartElement(name.display_name()));
        Ok(())
    }
    fn namespace(&mut self, prefix: &str, uri: &str) -> Result<(), Error> {
        self.events
            .push(Event::Namespace(prefix.to_string(), uri.to_string()));
        Ok(())
    }
    fn attribute(&mut self, name: &QName, value: &str) -> Result<(), Error> {
        self.events
            .push(Event::Attribute(name.display_name(), value.to_string()));
        Ok(())
    }
    fn start_content(&mut self) -> Result<(), Error> {
        self.events.push(Event::StartContent);
        Ok(())
    }
    fn characters(&mut self, text: &str) -> Result<(), Error> {
        self.events.push(Event::Characters(text.to_string()));
        Ok(())
    }
    fn comment(&mut self, text: &str) -> Result<(), Error> {
        self.events.push(Event::Comment(text.to_string()));
        Ok(())
    }
    fn processing_instruction(&mut self, target: &str, data: &str) -> Result<(), Error> {
        self.events
            .push(Event::Pi(target.to_string(), data.to_string()));
        Ok(())
    }
    fn end_element(&mut self) -> Result<(), Error> {
        self.events.push(Event::EndElement);
        Ok(())
    }
}

/// Builds `SimpleNode` trees from the event stream. Top-level events with
/// no open element become individual roots, so the result doubles as a
/// sequence collector for pushed output.
#[derive(Default)]
pub struct TreeBuilder {
    stack: Vec<SimpleNode>,
    roots: Vec<SimpleNode>,
}

impl TreeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_nodes(self) -> Vec<SimpleNode> {
        self.roots
    }

    fn attach(&mut self, node: SimpleNode) {
        match self.stack.last() {
            Some(parent) => parent.append_child(node),
            None => self.roots.push(node),
        }
    }

    fn current(&self) -> Result<&SimpleNode, Error> {
        self.stack.last().ok_or_else(|| {
            Error::pipeline(
                ErrorCode::XTDE0410,
                "event received with no open element or document",
            )
        })
    }
}

impl Receiver<SimpleNode> for TreeBuilder {
    fn start_document(&mut self) -> Result<(), Error> {
        let doc = SimpleNode::document();
        self.attach(doc.clone());
        self.stack.push(doc);
        Ok(())
    }

    fn end_document(&mut self) -> Result<(), Error> {
        self.stack.pop();
        Ok(())
    }

    fn start_element(&mut self, name: &QName) -> Result<(), Error> {
        let elem = SimpleNode::element(name.clone());
        self.attach(elem.clone());
        self.stack.push(elem);
        Ok(())
    }

    fn namespace(&mut self, prefix: &str, uri: &str) -> Result<(), Error> {
        self.current()?
            .add_namespace(SimpleNode::namespace_node(prefix, uri.to_string()));
        Ok(())
    }

    fn attribute(&mut self, name: &QName, value: &str) -> Result<(), Error> {
        self.current()?
            .add_attribute(SimpleNode::attribute(name.clone(), value));
        Ok(())
    }

    fn start_content(&mut self) -> Result<(), Error> {
        Ok(())
    }

    fn characters(&mut self, text: &str) -> Result<(), Error> {
        self.attach(SimpleNode::text(text));
        Ok(())
    }

    fn comment(&mut self, text: &str) -> Result<(), Error> {
        self.attach(SimpleNode::comment(text));
        Ok(())
    }

    fn processing_instruction(&mut self, target: &str, data: &str) -> Result<(), Error> {
        self.attach(SimpleNode::processing_instruction(target, data.to_string()));
        Ok(())
    }

    fn end_element(&mut self) -> Result<(), Error> {
        self.stack.pop();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::HostLanguage;
    use super::super::complex::ComplexContentOutputter;
    use super::*;

    #[test]
    fn builder_materializes_pushed_tree() {
        let mut b = TreeBuilder::new();
        {
            let mut out = ComplexContentOutputter::new(&mut b, HostLanguage::Xslt);
            let out: &mut dyn Receiver<SimpleNode> = &mut out;
            out.start_element(&QName::local_name("r")).unwrap();
            out.attribute(&QName::local_name("id"), "1").unwrap();
            out.characters("hi").unwrap();
            out.end_element().unwrap();
        }
        let roots = b.into_nodes();
        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0].attribute_value("id").as_deref(), Some("1"));
        assert_eq!(roots[0].string_value(), "hi");
    }
}
