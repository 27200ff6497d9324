//! Tagged runtime values.
//!
//! The tag and payload live in a single enum, so the "tag matches live
//! member" invariant holds by construction and payload release on
//! overwrite is ordinary drop glue.
//!
//! All payloads are owned (or atomically shared), so a `Value` is `Send`
//! and can cross workers through a process mailbox.

use crate::failure::Failure;
use crate::function::FunctionValue;
use crate::stream::Stream;
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

/// Process identity. Monotonically increasing, never reused.
pub type Pid = u64;

// =============================================================================
// Type tags
// =============================================================================

/// Discriminant for every runtime value shape.
///
/// The numeric values mirror the original VT_* codes; comparison between
/// values of different shapes orders by this id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum TypeTag {
    Void = 0x00,
    Kind = 0x01,
    Str = 0x02,
    Function = 0x03,
    Bool = 0x04,
    Float = 0x05,
    Ref = 0x06,
    Tuple = 0x07,
    Native = 0x08,
    List = 0x09,
    Map = 0x0a,
    Vector = 0x0b,
    Int = 0x0d,
    Stream = 0x0e,
    Hashtag = 0x0f,
    Promise = 0x10,
    Failure = 0xff,
}

impl TypeTag {
    /// Primitive name, as printed in type descriptions and traces.
    pub fn name(self) -> &'static str {
        match self {
            TypeTag::Void => "void",
            TypeTag::Kind => "kind",
            TypeTag::Str => "string",
            TypeTag::Function => "function",
            TypeTag::Bool => "bool",
            TypeTag::Float => "float",
            TypeTag::Ref => "ref",
            TypeTag::Tuple => "tuple",
            TypeTag::Native => "function",
            TypeTag::List => "list",
            TypeTag::Map => "map",
            TypeTag::Vector => "vector",
            TypeTag::Int => "int",
            TypeTag::Stream => "stream",
            TypeTag::Hashtag => "hashtag",
            TypeTag::Promise => "promise",
            TypeTag::Failure => "failure",
        }
    }
}

/// A concrete type, as used for override dispatch.
///
/// Primitive types live in the `core` module; user types name the module
/// that declared them. Override matching is exact equality on both parts.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TypeDesc {
    pub module: Arc<str>,
    pub name: Arc<str>,
}

impl TypeDesc {
    pub fn new(module: &str, name: &str) -> Self {
        Self {
            module: Arc::from(module),
            name: Arc::from(name),
        }
    }

    /// The type of a primitive tag (module `core`).
    pub fn primitive(tag: TypeTag) -> Self {
        Self::new("core", tag.name())
    }
}

impl fmt::Display for TypeDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.module, self.name)
    }
}

// =============================================================================
// Values
// =============================================================================

/// A promise for the result of another process. Reserved for host natives;
/// the core instruction set does not mint these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromiseValue {
    pub pid: Pid,
}

/// A single runtime value.
///
/// `Ref` aliases another register slot in the same register window by its
/// encoded 16-bit id; it never owns a payload and a slot is never allowed
/// to reference itself (rejected at creation as an invariant violation).
#[derive(Debug, Clone)]
pub enum Value {
    Void,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Hashtag(Arc<str>),
    Kind(TypeDesc),
    Ref(u16),
    Tuple(Box<[Value]>),
    List(Box<Vec<Value>>),
    Map(Box<Vec<(Value, Value)>>),
    Vector(Box<Vec<Value>>),
    Function(Box<FunctionValue>),
    Promise(Box<PromiseValue>),
    Failure(Box<Failure>),
    Stream(Arc<Mutex<Stream>>),
}

impl Default for Value {
    fn default() -> Self {
        Value::Void
    }
}

impl Value {
    /// The shape discriminant of this value.
    pub fn tag(&self) -> TypeTag {
        match self {
            Value::Void => TypeTag::Void,
            Value::Bool(_) => TypeTag::Bool,
            Value::Int(_) => TypeTag::Int,
            Value::Float(_) => TypeTag::Float,
            Value::Str(_) => TypeTag::Str,
            Value::Hashtag(_) => TypeTag::Hashtag,
            Value::Kind(_) => TypeTag::Kind,
            Value::Ref(_) => TypeTag::Ref,
            Value::Tuple(_) => TypeTag::Tuple,
            Value::List(_) => TypeTag::List,
            Value::Map(_) => TypeTag::Map,
            Value::Vector(_) => TypeTag::Vector,
            Value::Function(f) => {
                if f.is_native() {
                    TypeTag::Native
                } else {
                    TypeTag::Function
                }
            }
            Value::Promise(_) => TypeTag::Promise,
            Value::Failure(_) => TypeTag::Failure,
            Value::Stream(_) => TypeTag::Stream,
        }
    }

    /// The concrete type used for override dispatch.
    pub fn type_desc(&self) -> TypeDesc {
        TypeDesc::primitive(self.tag())
    }

    #[inline]
    pub fn is_void(&self) -> bool {
        matches!(self, Value::Void)
    }

    #[inline]
    pub fn is_failure(&self) -> bool {
        matches!(self, Value::Failure(_))
    }

    #[inline]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    #[inline]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[inline]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Ordering used by the comparison branches.
    ///
    /// Values of different shapes order by type id; like shapes compare by
    /// payload. Shapes with no meaningful ordering compare equal.
    pub fn compare(&self, other: &Value) -> Ordering {
        let (ta, tb) = (self.tag(), other.tag());
        if ta != tb {
            return ta.cmp(&tb);
        }
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::Float(a), Value::Float(b)) => a.total_cmp(b),
            (Value::Str(a), Value::Str(b)) => a.cmp(b),
            (Value::Hashtag(a), Value::Hashtag(b)) => a.cmp(b),
            (Value::Tuple(a), Value::Tuple(b)) => compare_seq(a, b),
            (Value::List(a), Value::List(b)) => compare_seq(a, b),
            (Value::Vector(a), Value::Vector(b)) => compare_seq(a, b),
            _ => Ordering::Equal,
        }
    }
}

fn compare_seq(a: &[Value], b: &[Value]) -> Ordering {
    for (x, y) in a.iter().zip(b.iter()) {
        let ord = x.compare(y);
        if ord != Ordering::Equal {
            return ord;
        }
    }
    a.len().cmp(&b.len())
}

impl fmt::Display for Value {
    /// Printable form, as produced by the string-accumulate instruction.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Void => write!(f, "void"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Str(s) => write!(f, "{}", s),
            Value::Hashtag(h) => write!(f, "#{}", h),
            Value::Kind(t) => write!(f, "{}", t),
            Value::Ref(r) => write!(f, "ref({:#06x})", r),
            Value::Tuple(items) => {
                write!(f, "(")?;
                for (i, v) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{}", v)?;
                }
                write!(f, ")")
            }
            Value::List(items) | Value::Vector(items) => {
                write!(f, "[")?;
                for (i, v) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{}", v)?;
                }
                write!(f, "]")
            }
            Value::Map(entries) => {
                write!(f, "{{")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{}:{}", k, v)?;
                }
                write!(f, "}}")
            }
            Value::Function(fv) => write!(f, "{}/{}", fv.module_name(), fv.name()),
            Value::Promise(p) => write!(f, "promise({})", p.pid),
            Value::Failure(fail) => write!(f, "#{}", fail.tag),
            Value::Stream(_) => write!(f, "stream"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_matches_payload() {
        assert_eq!(Value::Void.tag(), TypeTag::Void);
        assert_eq!(Value::Int(3).tag(), TypeTag::Int);
        assert_eq!(Value::Str("x".into()).tag(), TypeTag::Str);
        assert_eq!(Value::Hashtag(Arc::from("oops")).tag(), TypeTag::Hashtag);
    }

    #[test]
    fn test_compare_orders_by_type_then_payload() {
        // int tag (0x0d) sorts after string tag (0x02)
        assert_eq!(
            Value::Str("z".into()).compare(&Value::Int(0)),
            Ordering::Less
        );
        assert_eq!(Value::Int(1).compare(&Value::Int(2)), Ordering::Less);
        assert_eq!(Value::Int(2).compare(&Value::Int(2)), Ordering::Equal);
        assert_eq!(
            Value::Str("b".into()).compare(&Value::Str("a".into())),
            Ordering::Greater
        );
    }

    #[test]
    fn test_compare_sequences() {
        let a = Value::Tuple(vec![Value::Int(1), Value::Int(2)].into_boxed_slice());
        let b = Value::Tuple(vec![Value::Int(1), Value::Int(3)].into_boxed_slice());
        assert_eq!(a.compare(&b), Ordering::Less);
    }

    #[test]
    fn test_display_for_accumulation() {
        assert_eq!(Value::Int(42).to_string(), "42");
        assert_eq!(Value::Str("hi".into()).to_string(), "hi");
        assert_eq!(Value::Bool(true).to_string(), "true");
        assert_eq!(Value::Hashtag(Arc::from("bad_input")).to_string(), "#bad_input");
    }

    #[test]
    fn test_type_desc_of_primitive() {
        let d = Value::Int(0).type_desc();
        assert_eq!(d.module.as_ref(), "core");
        assert_eq!(d.name.as_ref(), "int");
    }
}
