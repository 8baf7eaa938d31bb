use std::collections::HashMap;
use std::sync::Arc;

use unicode_normalization::UnicodeNormalization;

use crate::error::{Error, ErrorCode};

pub const CODEPOINT_URI: &str = "http://www.w3.org/2005/xpath-functions/collation/codepoint";
pub const CASE_BLIND_URI: &str = "http://xylem-xml.org/collation/case-blind";

/// Pluggable string comparison and key generation, consumed by the key
/// manager and by sorting. Keys must agree with `compare`: equal keys iff
/// the collation compares the strings equal.
pub trait Collation: Send + Sync {
    fn uri(&self) -> &str;
    fn compare(&self, a: &str, b: &str) -> core::cmp::Ordering;
    fn key(&self, s: &str) -> String {
        s.to_string()
    }
}

/// Unicode codepoint collation, the default.
pub struct CodepointCollation;

impl Collation for CodepointCollation {
    fn uri(&self) -> &str {
        CODEPOINT_URI
    }
    fn compare(&self, a: &str, b: &str) -> core::cmp::Ordering {
        a.cmp(b)
    }
}

/// Case-insensitive collation. Keys are NFC-normalized before folding so
/// that composed and decomposed spellings collate together.
pub struct CaseBlindCollation;

impl Collation for CaseBlindCollation {
    fn uri(&self) -> &str {
        CASE_BLIND_URI
    }
    fn compare(&self, a: &str, b: &str) -> core::cmp::Ordering {
        self.key(a).cmp(&self.key(b))
    }
    fn key(&self, s: &str) -> String {
        s.nfc().flat_map(char::to_lowercase).collect()
    }
}

pub struct CollationRegistry {
    by_uri: HashMap<String, Arc<dyn Collation>>,
}

impl Default for CollationRegistry {
    fn default() -> Self {
        let mut reg = Self {
            by_uri: HashMap::new(),
        };
        reg.register(Arc::new(CodepointCollation));
        reg.register(Arc::new(CaseBlindCollation));
        reg
    }
}

impl CollationRegistry {
    pub fn register(&mut self, collation: Arc<dyn Collation>) {
        self.by_uri.insert(collation.uri().to_string(), collation);
    }

    pub fn get(&self, uri: &str) -> Option<Arc<dyn Collation>> {
        self.by_uri.get(uri).cloned()
    }

    pub fn resolve(&self, uri: &str) -> Result<Arc<dyn Collation>, Error> {
        self.get(uri).ok_or_else(|| {
            Error::dynamic(ErrorCode::FOCH0002, format!("unknown collation URI: {uri}"))
        })
    }
}
