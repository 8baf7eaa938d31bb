//! Outputter that enforces the element construction rules: attributes and
//! namespaces are buffered after `start_element` and flushed with
//! namespace fixup on the first content event.

use compact_str::CompactString;
use smallvec::SmallVec;

use crate::error::{Error, ErrorCode};
use crate::model::{NodeInfo, QName};

use super::{HostLanguage, Receiver};

/// Wraps the next receiver in the pipeline. At most one element start can
/// be pending at a time; the flush assigns deterministic substitute
/// prefixes when the proposed prefixes conflict.
pub struct ComplexContentOutputter<'a, N: NodeInfo> {
    next: &'a mut dyn Receiver<N>,
    host: HostLanguage,
    pending_element: Option<QName>,
    pending_attrs: SmallVec<[(QName, String); 8]>,
    pending_ns: SmallVec<[(CompactString, CompactString); 8]>,
    prefix_seq: u32,
}

impl<'a, N: NodeInfo> ComplexContentOutputter<'a, N> {
    pub fn new(next: &'a mut dyn Receiver<N>, host: HostLanguage) -> Self {
        Self {
            next,
            host,
            pending_element: None,
            pending_attrs: SmallVec::new(),
            pending_ns: SmallVec::new(),
            prefix_seq: 0,
        }
    }

    fn attribute_misplaced(&self, what: &str) -> Error {
        let code = match self.host {
            HostLanguage::Xslt => ErrorCode::XTDE0410,
            HostLanguage::Xquery => ErrorCode::XQTY0024,
        };
        Error::dynamic(
            code,
            format!("cannot write {what} after child content has been written"),
        )
    }

    fn prefix_conflict(&self, prefix: &str, a: &str, b: &str) -> Error {
        let code = match self.host {
            HostLanguage::Xslt => ErrorCode::XTDE0430,
            HostLanguage::Xquery => ErrorCode::XQDY0102,
        };
        Error::dynamic(
            code,
            format!("prefix '{prefix}' bound to both '{a}' and '{b}' on one element"),
        )
    }

    fn binding_for(&self, prefix: &str) -> Option<&str> {
        self.pending_ns
            .iter()
            .find(|(p, _)| p == prefix)
            .map(|(_, u)| u.as_str())
    }

    /// Make sure `prefix -> uri` can be declared on the pending element,
    /// substituting a generated prefix when the proposed one is taken.
    /// Returns the prefix actually usable.
    fn check_proposed_prefix(&mut self, prefix: &str, uri: &str) -> CompactString {
        let bound = self.binding_for(prefix).map(str::to_string);
        match bound {
            None => {
                self.pending_ns
                    .push((CompactString::new(prefix), CompactString::new(uri)));
                CompactString::new(prefix)
            }
            Some(bound) if bound == uri => CompactString::new(prefix),
            Some(_) => {
                // Taken with a different URI: generate prefix_seq.
                loop {
                    self.prefix_seq += 1;
                    let candidate =
                        CompactString::new(format!("{prefix}_{}", self.prefix_seq));
                    if self.binding_for(&candidate).is_none() {
                        self.pending_ns.push((candidate.clone(), CompactString::new(uri)));
                        return candidate;
                    }
                }
            }
        }
    }

    /// Emit the buffered element start. No-op when nothing is pending.
    fn flush_pending(&mut self) -> Result<(), Error> {
        let Some(mut name) = self.pending_element.take() else {
            return Ok(());
        };

        // Element name prefix.
        if let Some(uri) = name.ns_uri.clone() {
            if !uri.is_empty() {
                let proposed = name.prefix.clone().unwrap_or_default();
                let actual = self.check_proposed_prefix(&proposed, &uri);
                name.prefix = Some(actual);
            }
        }

        // A default namespace must not leak onto an element in no
        // namespace.
        let elem_in_no_ns = name.ns_uri.as_deref().is_none_or(str::is_empty);
        if elem_in_no_ns {
            if let Some((_, uri)) = self.pending_ns.iter().find(|(p, _)| p.is_empty()) {
                if !uri.is_empty() {
                    let code = match self.host {
                        HostLanguage::Xslt => ErrorCode::XTDE0440,
                        HostLanguage::Xquery => ErrorCode::XQDY0102,
                    };
                    return Err(Error::dynamic(
                        code,
                        "default namespace declared on an element in no namespace",
                    ));
                }
            }
        }

        // Attribute prefixes. An attribute never uses the default
        // namespace, so a namespaced attribute with no prefix gets a
        // generated one.
        let mut attrs = core::mem::take(&mut self.pending_attrs);
        for (aname, _) in &mut attrs {
            if let Some(uri) = aname.ns_uri.clone() {
                if !uri.is_empty() {
                    let proposed = match &aname.prefix {
                        Some(p) if !p.is_empty() => p.clone(),
                        _ => {
                            self.prefix_seq += 1;
                            CompactString::new(format!("ns_{}", self.prefix_seq))
                        }
                    };
                    let actual = self.check_proposed_prefix(&proposed, &uri);
                    aname.prefix = Some(actual);
                }
            }
        }

        self.next.start_element(&name)?;
        for (prefix, uri) in self.pending_ns.drain(..) {
            self.next.namespace(&prefix, &uri)?;
        }
        for (aname, value) in &attrs {
            self.next.attribute(aname, value)?;
        }
        self.next.start_content()?;
        Ok(())
    }
}

impl<N: NodeInfo> Receiver<N> for ComplexContentOutputter<'_, N> {
    fn start_document(&mut self) -> Result<(), Error> {
        self.flush_pending()?;
        self.next.start_document()
    }

    fn end_document(&mut self) -> Result<(), Error> {
        self.flush_pending()?;
        self.next.end_document()
    }

    fn start_element(&mut self, name: &QName) -> Result<(), Error> {
        self.flush_pending()?;
        self.pending_element = Some(name.clone());
        self.pending_attrs.clear();
        self.pending_ns.clear();
        Ok(())
    }

    fn namespace(&mut self, prefix: &str, uri: &str) -> Result<(), Error> {
        if self.pending_element.is_none() {
            return Err(self.attribute_misplaced("a namespace node"));
        }
        let bound = self.binding_for(prefix).map(str::to_string);
        match bound {
            None => {
                self.pending_ns
                    .push((CompactString::new(prefix), CompactString::new(uri)));
                Ok(())
            }
            Some(bound) if bound == uri => Ok(()),
            Some(bound) => Err(self.prefix_conflict(prefix, &bound, uri)),
        }
    }

    fn attribute(&mut self, name: &QName, value: &str) -> Result<(), Error> {
        if self.pending_element.is_none() {
            return Err(self.attribute_misplaced("an attribute node"));
        }
        if let Some(existing) = self.pending_attrs.iter_mut().find(|(n, _)| n == name) {
            match self.host {
                // XSLT: a later attribute of the same name wins.
                HostLanguage::Xslt => {
                    existing.1 = value.to_string();
                    Ok(())
                }
                HostLanguage::Xquery => Err(Error::dynamic(
                    ErrorCode::XQDY0025,
                    format!("duplicate attribute {}", name.display_name()),
                )),
            }
        } else {
            self.pending_attrs.push((name.clone(), value.to_string()));
            Ok(())
        }
    }

    fn start_content(&mut self) -> Result<(), Error> {
        self.flush_pending()
    }

    fn characters(&mut self, text: &str) -> Result<(), Error> {
        self.flush_pending()?;
        self.next.characters(text)
    }

    fn comment(&mut self, text: &str) -> Result<(), Error> {
        self.flush_pending()?;
        self.next.comment(text)
    }

    fn processing_instruction(&mut self, target: &str, data: &str) -> Result<(), Error> {
        self.flush_pending()?;
        self.next.processing_instruction(target, data)
    }

    fn end_element(&mut self) -> Result<(), Error> {
        self.flush_pending()?;
        self.next.end_element()
    }
}
