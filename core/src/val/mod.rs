//! Script-visible values.
//!
//! A [`Value`] is one storage cell: a slot of a locals block, a field of an object instance, an
//! element of a composite literal. The interpreter never inspects the variant itself; typed
//! behavior lives behind [`Property`].

mod property;

pub use property::*;

use std::fmt;
use std::sync::Arc;

/// Identifier used for functions, fields and events. Cheap to clone.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Name(Arc<str>);

impl Name {
    pub const NONE: &'static str = "None";

    pub fn new(name: &str) -> Self {
        Self(Arc::from(name))
    }

    pub fn none() -> Self {
        Self::new(Self::NONE)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_none(&self) -> bool {
        self.as_str() == Self::NONE
    }
}

impl fmt::Debug for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.as_str())
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for Name {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FunctionId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PropertyId(pub u32);

impl PropertyId {
    /// Properties that are not registered in a program table (array inners, ad-hoc descriptors).
    pub const DETACHED: PropertyId = PropertyId(u32::MAX);
}

/// Generational handle into the object store. A destroyed object bumps the slot generation, so
/// stale handles never alias a newer instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectRef {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl ObjectRef {
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "obj#{}.{}", self.index, self.generation)
    }
}

/// A single-cast delegate: a receiver plus the name of the function to invoke on it.
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptDelegate {
    pub object: ObjectRef,
    pub function: Name,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub rotation: [f64; 4],
    pub translation: [f64; 3],
    pub scale: [f64; 3],
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            rotation: [0.0, 0.0, 0.0, 1.0],
            translation: [0.0; 3],
            scale: [1.0; 3],
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub enum Value {
    #[default]
    None,
    Bool(bool),
    Byte(u8),
    Int(i32),
    Int64(i64),
    UInt64(u64),
    Float(f32),
    Double(f64),
    Name(Name),
    Str(Arc<str>),
    Vector([f64; 3]),
    Rotator([f64; 3]),
    Transform(Box<Transform>),
    Object(Option<ObjectRef>),
    Class(Option<ClassId>),
    Interface(Option<ObjectRef>),
    Struct(Vec<Value>),
    Array(Vec<Value>),
    Set(Vec<Value>),
    Map(Vec<(Value, Value)>),
    Delegate(Option<ScriptDelegate>),
    MulticastDelegate(Vec<ScriptDelegate>),
}

impl Value {
    pub fn str(s: &str) -> Self {
        Value::Str(Arc::from(s))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "None",
            Value::Bool(_) => "Bool",
            Value::Byte(_) => "Byte",
            Value::Int(_) => "Int",
            Value::Int64(_) => "Int64",
            Value::UInt64(_) => "UInt64",
            Value::Float(_) => "Float",
            Value::Double(_) => "Double",
            Value::Name(_) => "Name",
            Value::Str(_) => "String",
            Value::Vector(_) => "Vector",
            Value::Rotator(_) => "Rotator",
            Value::Transform(_) => "Transform",
            Value::Object(_) => "Object",
            Value::Class(_) => "Class",
            Value::Interface(_) => "Interface",
            Value::Struct(_) => "Struct",
            Value::Array(_) => "Array",
            Value::Set(_) => "Set",
            Value::Map(_) => "Map",
            Value::Delegate(_) => "Delegate",
            Value::MulticastDelegate(_) => "MulticastDelegate",
        }
    }

    pub fn as_bool(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            Value::Byte(v) => *v != 0,
            Value::Int(v) => *v != 0,
            Value::Int64(v) => *v != 0,
            Value::UInt64(v) => *v != 0,
            Value::Object(o) | Value::Interface(o) => o.is_some(),
            Value::Class(c) => c.is_some(),
            _ => false,
        }
    }

    pub fn as_int(&self) -> i32 {
        match self {
            Value::Bool(b) => *b as i32,
            Value::Byte(v) => *v as i32,
            Value::Int(v) => *v,
            Value::Int64(v) => *v as i32,
            Value::UInt64(v) => *v as i32,
            Value::Float(v) => *v as i32,
            Value::Double(v) => *v as i32,
            _ => 0,
        }
    }

    pub fn as_i64(&self) -> i64 {
        match self {
            Value::Int64(v) => *v,
            Value::UInt64(v) => *v as i64,
            Value::Float(v) => *v as i64,
            Value::Double(v) => *v as i64,
            other => other.as_int() as i64,
        }
    }

    pub fn as_f64(&self) -> f64 {
        match self {
            Value::Float(v) => *v as f64,
            Value::Double(v) => *v,
            Value::Int64(v) => *v as f64,
            Value::UInt64(v) => *v as f64,
            other => other.as_int() as f64,
        }
    }

    pub fn as_object(&self) -> Option<ObjectRef> {
        match self {
            Value::Object(o) | Value::Interface(o) => *o,
            _ => None,
        }
    }

    pub fn as_class(&self) -> Option<ClassId> {
        match self {
            Value::Class(c) => *c,
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            Value::Name(n) => Some(n.as_str()),
            _ => None,
        }
    }

    /// Number of elements of a struct, array, set or map; `None` for scalars.
    pub fn container_len(&self) -> Option<usize> {
        match self {
            Value::Struct(v) | Value::Array(v) | Value::Set(v) => Some(v.len()),
            Value::Map(v) => Some(v.len()),
            _ => None,
        }
    }

    pub fn child(&self, index: usize) -> Option<&Value> {
        match self {
            Value::Struct(v) | Value::Array(v) | Value::Set(v) => v.get(index),
            _ => None,
        }
    }

    pub fn child_mut(&mut self, index: usize) -> Option<&mut Value> {
        match self {
            Value::Struct(v) | Value::Array(v) | Value::Set(v) => v.get_mut(index),
            _ => None,
        }
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Double(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::str(value)
    }
}

impl From<ObjectRef> for Value {
    fn from(value: ObjectRef) -> Self {
        Value::Object(Some(value))
    }
}
