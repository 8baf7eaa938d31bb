use compact_str::CompactString;

/// Broad classification used when reporting an error to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Detected during static analysis; aborts compilation of the unit.
    Static,
    /// Detected during evaluation; propagates up the iterator/process chain.
    Dynamic,
    /// Circular definition of a global variable or key.
    Circularity,
    /// Misuse of the output pipeline; signals a caller bug, not a data error.
    Pipeline,
}

impl ErrorKind {
    pub fn label(self) -> &'static str {
        match self {
            ErrorKind::Static => "static",
            ErrorKind::Dynamic => "dynamic",
            ErrorKind::Circularity => "circularity",
            ErrorKind::Pipeline => "pipeline",
        }
    }
}

/// Stable machine-readable error codes. The string renderings are part of
/// the external interface; changing a code for an existing condition is a
/// compatibility break.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// General type error.
    XPTY0004,
    /// Left operand of '/' must be a node sequence.
    XPTY0019,
    /// Static syntax/structure error.
    XPST0003,
    /// Reference to an undeclared variable.
    XPST0008,
    /// Unknown function name/arity.
    XPST0017,
    /// Context item absent.
    XPDY0002,
    /// Effective boolean value not defined for this sequence.
    FORG0006,
    /// Invalid lexical form for a cast.
    FORG0001,
    /// Circular definition of variable or key.
    XTDE0640,
    /// Unknown key name in key().
    XTDE1260,
    /// Ambiguous template rule match (non-recoverable policy).
    XTRE0540,
    /// Called template does not exist.
    XTSE0650,
    /// Attribute or namespace written after content started (XSLT).
    XTDE0410,
    /// Same prefix bound to two URIs on one element (XSLT).
    XTDE0430,
    /// Default namespace declared on an element in no namespace (XSLT).
    XTDE0440,
    /// Attribute or namespace written after content started (XQuery).
    XQTY0024,
    /// Duplicate attribute name (XQuery construction).
    XQDY0025,
    /// Namespace conflict during XQuery construction.
    XQDY0102,
    /// Integer arithmetic overflow or underflow.
    FOAR0002,
    /// Invalid regular expression flags.
    FORX0001,
    /// Invalid regular expression pattern.
    FORX0002,
    /// Unknown collation URI.
    FOCH0002,
    /// Internal: variable slot never allocated (compiler bug).
    SXLM0001,
    /// Internal: stack frame shorter than an allocated slot (corrupt state).
    SXLM0002,
    /// Fallback for codes parsed from older artifacts.
    Unknown,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        use ErrorCode::*;
        match self {
            XPTY0004 => "err:XPTY0004",
            XPTY0019 => "err:XPTY0019",
            XPST0003 => "err:XPST0003",
            XPST0008 => "err:XPST0008",
            XPST0017 => "err:XPST0017",
            XPDY0002 => "err:XPDY0002",
            FORG0006 => "err:FORG0006",
            FORG0001 => "err:FORG0001",
            XTDE0640 => "err:XTDE0640",
            XTDE1260 => "err:XTDE1260",
            XTRE0540 => "err:XTRE0540",
            XTSE0650 => "err:XTSE0650",
            XTDE0410 => "err:XTDE0410",
            XTDE0430 => "err:XTDE0430",
            XTDE0440 => "err:XTDE0440",
            XQTY0024 => "err:XQTY0024",
            XQDY0025 => "err:XQDY0025",
            XQDY0102 => "err:XQDY0102",
            FOAR0002 => "err:FOAR0002",
            FORX0001 => "err:FORX0001",
            FORX0002 => "err:FORX0002",
            FOCH0002 => "err:FOCH0002",
            SXLM0001 => "err:SXLM0001",
            SXLM0002 => "err:SXLM0002",
            Unknown => "err:UNKNOWN",
        }
    }

    pub fn from_code(s: &str) -> Self {
        use ErrorCode::*;
        match s {
            "err:XPTY0004" => XPTY0004,
            "err:XPTY0019" => XPTY0019,
            "err:XPST0003" => XPST0003,
            "err:XPST0008" => XPST0008,
            "err:XPST0017" => XPST0017,
            "err:XPDY0002" => XPDY0002,
            "err:FORG0006" => FORG0006,
            "err:FORG0001" => FORG0001,
            "err:XTDE0640" => XTDE0640,
            "err:XTDE1260" => XTDE1260,
            "err:XTRE0540" => XTRE0540,
            "err:XTSE0650" => XTSE0650,
            "err:XTDE0410" => XTDE0410,
            "err:XTDE0430" => XTDE0430,
            "err:XTDE0440" => XTDE0440,
            "err:XQTY0024" => XQTY0024,
            "err:XQDY0025" => XQDY0025,
            "err:XQDY0102" => XQDY0102,
            "err:FOAR0002" => FOAR0002,
            "err:FORX0001" => FORX0001,
            "err:FORX0002" => FORX0002,
            "err:FOCH0002" => FOCH0002,
            "err:SXLM0001" => SXLM0001,
            "err:SXLM0002" => SXLM0002,
            _ => Unknown,
        }
    }
}

/// Source location attached to dynamic errors on the way up the call chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Location {
    pub line: u32,
    pub column: u32,
}

/// Where an operand sits inside its parent construct, used to generate
/// role descriptions for static type errors ("second operand of '/'").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleKind {
    BinaryOperand,
    FunctionArgument,
    TypeOperation,
}

#[derive(Debug, Clone)]
pub struct Role {
    kind: RoleKind,
    label: CompactString,
    index: usize,
}

impl Role {
    pub fn binary(operator: &str, index: usize) -> Self {
        Self {
            kind: RoleKind::BinaryOperand,
            label: CompactString::new(operator),
            index,
        }
    }

    pub fn function_argument(name: &str, index: usize) -> Self {
        Self {
            kind: RoleKind::FunctionArgument,
            label: CompactString::new(name),
            index,
        }
    }

    pub fn type_operation(op: &str) -> Self {
        Self {
            kind: RoleKind::TypeOperation,
            label: CompactString::new(op),
            index: 0,
        }
    }

    pub fn message(&self) -> String {
        match self.kind {
            RoleKind::BinaryOperand => {
                format!("{} operand of '{}'", ordinal(self.index), self.label)
            }
            RoleKind::FunctionArgument => {
                format!("argument {} of {}()", self.index + 1, self.label)
            }
            RoleKind::TypeOperation => format!("operand of {}", self.label),
        }
    }
}

fn ordinal(n: usize) -> &'static str {
    match n {
        0 => "first",
        1 => "second",
        2 => "third",
        3 => "fourth",
        _ => "later",
    }
}

/// Structured error record carried through both the static analysis passes
/// and the dynamic evaluation chain. Role and location are filled in at
/// most once on the way up; later attempts are ignored.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{} error {}: {}", .kind.label(), .code.as_str(), .message)]
pub struct Error {
    pub kind: ErrorKind,
    pub code: ErrorCode,
    pub message: String,
    pub role: Option<String>,
    pub location: Option<Location>,
}

impl Error {
    pub fn static_err(code: ErrorCode, msg: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Static,
            code,
            message: msg.into(),
            role: None,
            location: None,
        }
    }

    pub fn dynamic(code: ErrorCode, msg: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Dynamic,
            code,
            message: msg.into(),
            role: None,
            location: None,
        }
    }

    pub fn circularity(msg: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Circularity,
            code: ErrorCode::XTDE0640,
            message: msg.into(),
            role: None,
            location: None,
        }
    }

    pub fn pipeline(code: ErrorCode, msg: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Pipeline,
            code,
            message: msg.into(),
            role: None,
            location: None,
        }
    }

    /// Attach a role description, keeping one already present.
    #[must_use]
    pub fn with_role(mut self, role: &Role) -> Self {
        if self.role.is_none() {
            self.role = Some(role.message());
        }
        self
    }

    /// Attach a source location, keeping one already present. This is the
    /// fill-once builder used while an error propagates upwards.
    #[must_use]
    pub fn maybe_location(mut self, loc: Location) -> Self {
        if self.location.is_none() {
            self.location = Some(loc);
        }
        self
    }

    pub fn is_circularity(&self) -> bool {
        matches!(self.kind, ErrorKind::Circularity)
    }
}
