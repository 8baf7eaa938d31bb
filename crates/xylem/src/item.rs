use core::fmt;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, Timelike};

use crate::collation::Collation;
use crate::error::{Error, ErrorCode};
use crate::model::{NodeInfo, QName};

/// Primitive type tags carried by atomic values. Indexes are partitioned by
/// this tag: values of incomparable primitive types never share an index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveType {
    String,
    UntypedAtomic,
    AnyUri,
    Boolean,
    Integer,
    Decimal,
    Double,
    QName,
    DateTime,
    Date,
    Time,
}

impl PrimitiveType {
    /// String-family types compare via collation keys rather than by value.
    pub fn is_string_family(self) -> bool {
        matches!(
            self,
            PrimitiveType::String | PrimitiveType::UntypedAtomic | PrimitiveType::AnyUri
        )
    }

    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            PrimitiveType::Integer | PrimitiveType::Decimal | PrimitiveType::Double
        )
    }
}

/// A typed atomic value. Immutable; cloning is cheap enough to share freely.
#[derive(Debug, Clone, PartialEq)]
pub enum AtomicValue {
    String(String),
    UntypedAtomic(String),
    AnyUri(String),
    Boolean(bool),
    Integer(i64),
    Decimal(f64),
    Double(f64),
    QName(QName),
    DateTime(DateTime<FixedOffset>),
    Date {
        date: NaiveDate,
        tz: Option<FixedOffset>,
    },
    Time {
        time: NaiveTime,
        tz: Option<FixedOffset>,
    },
}

impl AtomicValue {
    pub fn primitive_type(&self) -> PrimitiveType {
        match self {
            AtomicValue::String(_) => PrimitiveType::String,
            AtomicValue::UntypedAtomic(_) => PrimitiveType::UntypedAtomic,
            AtomicValue::AnyUri(_) => PrimitiveType::AnyUri,
            AtomicValue::Boolean(_) => PrimitiveType::Boolean,
            AtomicValue::Integer(_) => PrimitiveType::Integer,
            AtomicValue::Decimal(_) => PrimitiveType::Decimal,
            AtomicValue::Double(_) => PrimitiveType::Double,
            AtomicValue::QName(_) => PrimitiveType::QName,
            AtomicValue::DateTime(_) => PrimitiveType::DateTime,
            AtomicValue::Date { .. } => PrimitiveType::Date,
            AtomicValue::Time { .. } => PrimitiveType::Time,
        }
    }

    pub fn string_value(&self) -> String {
        match self {
            AtomicValue::String(s) | AtomicValue::UntypedAtomic(s) | AtomicValue::AnyUri(s) => {
                s.clone()
            }
            AtomicValue::Boolean(b) => b.to_string(),
            AtomicValue::Integer(i) => i.to_string(),
            AtomicValue::Decimal(d) | AtomicValue::Double(d) => format_number(*d),
            AtomicValue::QName(q) => q.display_name(),
            AtomicValue::DateTime(dt) => dt.to_rfc3339(),
            AtomicValue::Date { date, .. } => date.to_string(),
            AtomicValue::Time { time, .. } => time.to_string(),
        }
    }

    pub fn is_nan(&self) -> bool {
        matches!(self, AtomicValue::Double(d) | AtomicValue::Decimal(d) if d.is_nan())
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            AtomicValue::Integer(i) => Some(*i as f64),
            AtomicValue::Decimal(d) | AtomicValue::Double(d) => Some(*d),
            AtomicValue::Boolean(b) => Some(if *b { 1.0 } else { 0.0 }),
            AtomicValue::String(s) | AtomicValue::UntypedAtomic(s) | AtomicValue::AnyUri(s) => {
                s.trim().parse::<f64>().ok()
            }
            _ => None,
        }
    }

    /// Cast to the given primitive type, XPath-style. Lexical failures are
    /// `FORG0001`; unsupported target/source pairs are `XPTY0004`.
    pub fn convert_to(&self, required: PrimitiveType) -> Result<AtomicValue, Error> {
        if self.primitive_type() == required {
            return Ok(self.clone());
        }
        match required {
            PrimitiveType::String => Ok(AtomicValue::String(self.string_value())),
            PrimitiveType::UntypedAtomic => Ok(AtomicValue::UntypedAtomic(self.string_value())),
            PrimitiveType::AnyUri => Ok(AtomicValue::AnyUri(self.string_value())),
            PrimitiveType::Double => self
                .as_number()
                .map(AtomicValue::Double)
                .ok_or_else(|| self.cast_failure("xs:double")),
            PrimitiveType::Decimal => self
                .as_number()
                .map(AtomicValue::Decimal)
                .ok_or_else(|| self.cast_failure("xs:decimal")),
            PrimitiveType::Integer => {
                let n = self
                    .as_number()
                    .ok_or_else(|| self.cast_failure("xs:integer"))?;
                if n.is_finite() {
                    Ok(AtomicValue::Integer(n.trunc() as i64))
                } else {
                    Err(self.cast_failure("xs:integer"))
                }
            }
            PrimitiveType::Boolean => match self {
                AtomicValue::String(s) | AtomicValue::UntypedAtomic(s) => match s.trim() {
                    "true" | "1" => Ok(AtomicValue::Boolean(true)),
                    "false" | "0" => Ok(AtomicValue::Boolean(false)),
                    _ => Err(self.cast_failure("xs:boolean")),
                },
                AtomicValue::Integer(i) => Ok(AtomicValue::Boolean(*i != 0)),
                AtomicValue::Double(d) | AtomicValue::Decimal(d) => {
                    Ok(AtomicValue::Boolean(*d != 0.0 && !d.is_nan()))
                }
                _ => Err(self.cast_failure("xs:boolean")),
            },
            PrimitiveType::DateTime => match self {
                AtomicValue::String(s) | AtomicValue::UntypedAtomic(s) => {
                    DateTime::parse_from_rfc3339(s.trim())
                        .map(AtomicValue::DateTime)
                        .map_err(|_| self.cast_failure("xs:dateTime"))
                }
                _ => Err(self.cast_failure("xs:dateTime")),
            },
            PrimitiveType::Date => match self {
                AtomicValue::String(s) | AtomicValue::UntypedAtomic(s) => s
                    .trim()
                    .parse::<NaiveDate>()
                    .map(|date| AtomicValue::Date { date, tz: None })
                    .map_err(|_| self.cast_failure("xs:date")),
                _ => Err(self.cast_failure("xs:date")),
            },
            PrimitiveType::Time => match self {
                AtomicValue::String(s) | AtomicValue::UntypedAtomic(s) => s
                    .trim()
                    .parse::<NaiveTime>()
                    .map(|time| AtomicValue::Time { time, tz: None })
                    .map_err(|_| self.cast_failure("xs:time")),
                _ => Err(self.cast_failure("xs:time")),
            },
            PrimitiveType::QName => Err(self.cast_failure("xs:QName")),
        }
    }

    fn cast_failure(&self, target: &str) -> Error {
        Error::dynamic(
            ErrorCode::FORG0001,
            format!("cannot cast '{}' to {target}", self.string_value()),
        )
    }
}

fn format_number(d: f64) -> String {
    if d.is_nan() {
        "NaN".to_string()
    } else if d.is_infinite() {
        if d > 0.0 { "INF" } else { "-INF" }.to_string()
    } else if d == d.trunc() && d.abs() < 1e15 {
        format!("{}", d as i64)
    } else {
        format!("{d}")
    }
}

/// The uniform unit of an XDM sequence: an atomic value or a node.
#[derive(Debug, Clone, PartialEq)]
pub enum Item<N> {
    Node(N),
    Atomic(AtomicValue),
}

impl<N: NodeInfo> Item<N> {
    pub fn string_value(&self) -> String {
        match self {
            Item::Node(n) => n.string_value(),
            Item::Atomic(a) => a.string_value(),
        }
    }

    /// Atomization: nodes become untyped atomic values of their string value.
    pub fn atomize(&self) -> AtomicValue {
        match self {
            Item::Node(n) => AtomicValue::UntypedAtomic(n.string_value()),
            Item::Atomic(a) => a.clone(),
        }
    }
}

impl<N> fmt::Display for Item<N>
where
    N: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Item::Node(_) => write!(f, "<node>"),
            Item::Atomic(a) => write!(f, "{a:?}"),
        }
    }
}

pub type Sequence<N> = Vec<Item<N>>;

/// Effective boolean value of a sequence.
pub fn effective_boolean_value<N: NodeInfo>(seq: &[Item<N>]) -> Result<bool, Error> {
    match seq {
        [] => Ok(false),
        [Item::Node(_), ..] => Ok(true),
        [Item::Atomic(a)] => match a {
            AtomicValue::Boolean(b) => Ok(*b),
            AtomicValue::String(s) | AtomicValue::UntypedAtomic(s) | AtomicValue::AnyUri(s) => {
                Ok(!s.is_empty())
            }
            AtomicValue::Integer(i) => Ok(*i != 0),
            AtomicValue::Double(d) | AtomicValue::Decimal(d) => Ok(*d != 0.0 && !d.is_nan()),
            _ => Err(Error::dynamic(
                ErrorCode::FORG0006,
                "effective boolean value is not defined for this value",
            )),
        },
        _ => Err(Error::dynamic(
            ErrorCode::FORG0006,
            "effective boolean value is not defined for a sequence of several atomic values",
        )),
    }
}

/// Hashable comparison key for index lookup. Two atomic values land on the
/// same key exactly when the key() comparison semantics treat them as equal
/// under the index's sought primitive type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MatchKey {
    Str(String),
    Bool(bool),
    /// Canonicalized f64 bit pattern (-0.0 folded into 0.0, never NaN).
    Num(u64),
    /// Millisecond instant for dateTime values.
    Instant(i64),
    /// Days-from-epoch for date values.
    Day(i32),
    /// Nanoseconds since midnight for time values.
    Clock(u64),
}

/// Convert an atomic value to its match key under the sought primitive
/// type. Returns `None` when the value is not comparable with that type
/// (the lenient key() semantics: such values simply never match) or when
/// the value is NaN.
pub fn match_key(
    value: &AtomicValue,
    sought: PrimitiveType,
    collation: Option<&dyn Collation>,
) -> Option<MatchKey> {
    if sought.is_string_family() {
        if !value.primitive_type().is_string_family() {
            return None;
        }
        let s = value.string_value();
        return Some(MatchKey::Str(match collation {
            Some(c) => c.key(&s),
            None => s,
        }));
    }
    match sought {
        PrimitiveType::Double | PrimitiveType::Decimal | PrimitiveType::Integer => {
            let n = value.as_number()?;
            if n.is_nan() {
                return None;
            }
            let canon = if n == 0.0 { 0.0 } else { n };
            Some(MatchKey::Num(canon.to_bits()))
        }
        PrimitiveType::Boolean => match value.convert_to(PrimitiveType::Boolean) {
            Ok(AtomicValue::Boolean(b)) => Some(MatchKey::Bool(b)),
            _ => None,
        },
        PrimitiveType::DateTime => match value.convert_to(PrimitiveType::DateTime) {
            Ok(AtomicValue::DateTime(dt)) => Some(MatchKey::Instant(dt.timestamp_millis())),
            _ => None,
        },
        PrimitiveType::Date => match value.convert_to(PrimitiveType::Date) {
            Ok(AtomicValue::Date { date, .. }) => Some(MatchKey::Day(
                date.signed_duration_since(NaiveDate::from_ymd_opt(1970, 1, 1)?)
                    .num_days() as i32,
            )),
            _ => None,
        },
        PrimitiveType::Time => match value.convert_to(PrimitiveType::Time) {
            Ok(AtomicValue::Time { time, .. }) => Some(MatchKey::Clock(
                u64::from(time.num_seconds_from_midnight()) * 1_000_000_000
                    + u64::from(time.nanosecond()),
            )),
            _ => None,
        },
        PrimitiveType::QName => None,
        // String family handled above.
        _ => None,
    }
}
