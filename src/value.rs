//! Values carried by promises.

use std::any::Any;
use std::fmt;
use std::rc::Rc;

use crate::Promise;

/// An opaque value flowing through promises and reactions.
///
/// The loop never looks inside a value except to tell whether it is a [`Promise`], which is
/// what lets `resolve` adopt another promise's state instead of fulfilling with it.
#[derive(Clone, Default)]
pub enum Value {
    /// The absence of a value.
    #[default]
    Undefined,

    /// A boolean.
    Bool(bool),

    /// A number.
    Number(f64),

    /// A string.
    String(Rc<str>),

    /// An ordered list, as produced by `all`.
    List(Rc<[Value]>),

    /// One outcome record, as produced by `all_settled`.
    Settled(Rc<Settlement>),

    /// An error object.
    Error(Rc<ErrorObject>),

    /// A promise.
    Promise(Promise),

    /// Host data the loop carries without inspecting.
    Opaque(Rc<dyn Any>),
}

impl Value {
    /// Wraps arbitrary host data.
    pub fn opaque<T: Any>(data: T) -> Value {
        Value::Opaque(Rc::new(data))
    }

    /// Creates a plain `Error` object with the given message.
    pub fn error(message: impl Into<String>) -> Value {
        Value::Error(Rc::new(ErrorObject::new(ErrorKind::Error, message)))
    }

    /// Creates a `TypeError` object with the given message.
    pub fn type_error(message: impl Into<String>) -> Value {
        Value::Error(Rc::new(ErrorObject::new(ErrorKind::TypeError, message)))
    }

    /// Creates an `AggregateError` carrying `errors` in order.
    pub fn aggregate(errors: Vec<Value>) -> Value {
        Value::Error(Rc::new(ErrorObject {
            kind: ErrorKind::AggregateError,
            message: "All promises were rejected".into(),
            errors,
        }))
    }

    /// Returns `true` if this is [`Value::Undefined`].
    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    /// Returns the number, if this is one.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the string, if this is one.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(&**s),
            _ => None,
        }
    }

    /// Returns the list elements, if this is a list.
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(&**items),
            _ => None,
        }
    }

    /// Returns the outcome record, if this is one.
    pub fn as_settled(&self) -> Option<&Settlement> {
        match self {
            Value::Settled(s) => Some(&**s),
            _ => None,
        }
    }

    /// Returns the error object, if this is one.
    pub fn as_error(&self) -> Option<&ErrorObject> {
        match self {
            Value::Error(e) => Some(&**e),
            _ => None,
        }
    }

    /// Returns the promise, if this is one.
    pub fn as_promise(&self) -> Option<&Promise> {
        match self {
            Value::Promise(p) => Some(p),
            _ => None,
        }
    }

    /// Downcasts opaque host data.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        match self {
            Value::Opaque(data) => data.downcast_ref(),
            _ => None,
        }
    }

    /// A short name for the kind of value, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::List(_) => "list",
            Value::Settled(_) => "outcome",
            Value::Error(_) => "error",
            Value::Promise(_) => "promise",
            Value::Opaque(_) => "opaque",
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Settled(a), Value::Settled(b)) => a == b,
            (Value::Error(a), Value::Error(b)) => a == b,
            (Value::Promise(a), Value::Promise(b)) => a == b,
            (Value::Opaque(a), Value::Opaque(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => f.write_str("Undefined"),
            Value::Bool(b) => f.debug_tuple("Bool").field(b).finish(),
            Value::Number(n) => f.debug_tuple("Number").field(n).finish(),
            Value::String(s) => f.debug_tuple("String").field(s).finish(),
            Value::List(items) => f.debug_list().entries(items.iter()).finish(),
            Value::Settled(s) => fmt::Debug::fmt(s, f),
            Value::Error(e) => fmt::Debug::fmt(e, f),
            Value::Promise(p) => fmt::Debug::fmt(p, f),
            Value::Opaque(_) => f.write_str("Opaque(..)"),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => f.write_str("undefined"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(n) => write!(f, "{n}"),
            Value::String(s) => f.write_str(s),
            Value::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Value::Settled(s) => match &**s {
                Settlement::Fulfilled(v) => write!(f, "{{ fulfilled: {v} }}"),
                Settlement::Rejected(r) => write!(f, "{{ rejected: {r} }}"),
            },
            Value::Error(e) => fmt::Display::fmt(e, f),
            Value::Promise(p) => write!(f, "promise {}", p.id()),
            Value::Opaque(_) => f.write_str("[opaque]"),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Value {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Value {
        Value::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Value {
        Value::Number(n.into())
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Value {
        Value::Number(n.into())
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Value {
        Value::String(s.into())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Value {
        Value::String(s.into())
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Value {
        Value::List(items.into())
    }
}

impl From<Promise> for Value {
    fn from(p: Promise) -> Value {
        Value::Promise(p)
    }
}

impl From<Settlement> for Value {
    fn from(s: Settlement) -> Value {
        Value::Settled(Rc::new(s))
    }
}

impl From<()> for Value {
    fn from(_: ()) -> Value {
        Value::Undefined
    }
}

/// The final state of a settled promise.
#[derive(Debug, Clone, PartialEq)]
pub enum Settlement {
    /// Fulfilled with a value.
    Fulfilled(Value),

    /// Rejected with a reason.
    Rejected(Value),
}

impl Settlement {
    /// Converts into a `Result`, mapping rejection to `Err`.
    pub fn into_result(self) -> Result<Value, Value> {
        match self {
            Settlement::Fulfilled(v) => Ok(v),
            Settlement::Rejected(r) => Err(r),
        }
    }

    /// Returns `true` if fulfilled.
    pub fn is_fulfilled(&self) -> bool {
        matches!(self, Settlement::Fulfilled(_))
    }
}

impl From<Result<Value, Value>> for Settlement {
    fn from(res: Result<Value, Value>) -> Settlement {
        match res {
            Ok(v) => Settlement::Fulfilled(v),
            Err(r) => Settlement::Rejected(r),
        }
    }
}

/// The class of an [`ErrorObject`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A generic error.
    Error,

    /// A type error, such as a promise resolved with itself.
    TypeError,

    /// Every input of `any` rejected.
    AggregateError,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ErrorKind::Error => "Error",
            ErrorKind::TypeError => "TypeError",
            ErrorKind::AggregateError => "AggregateError",
        })
    }
}

/// An error object used as a rejection reason.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorObject {
    kind: ErrorKind,
    message: String,
    errors: Vec<Value>,
}

impl ErrorObject {
    /// Creates an error object without nested errors.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> ErrorObject {
        ErrorObject {
            kind,
            message: message.into(),
            errors: Vec::new(),
        }
    }

    /// The error class.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// The error message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Individual reasons carried by an aggregate error, in input order.
    pub fn errors(&self) -> &[Value] {
        &self.errors
    }
}

impl fmt::Display for ErrorObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}
