use std::sync::Arc;

use super::{ClassId, FunctionId, Name, PropertyId, Value};

pub const CPF_PARM: u32 = 0x0000_0001;
pub const CPF_OUT_PARM: u32 = 0x0000_0002;
pub const CPF_RETURN_PARM: u32 = 0x0000_0004;
pub const CPF_REFERENCE_PARM: u32 = 0x0000_0008;
pub const CPF_EDIT_CONST: u32 = 0x0000_0010;

/// Setter indirection: receives the current storage and the staged new value.
pub type PropertySetter = fn(&mut Value, Value);

#[derive(Debug, Clone)]
pub enum PropertyKind {
    Bool,
    Byte,
    Int,
    Int64,
    UInt64,
    Float,
    Double,
    Name,
    Str,
    Vector,
    Rotator,
    Transform,
    Object(Option<ClassId>),
    Class(Option<ClassId>),
    Interface(ClassId),
    Struct(Arc<StructDef>),
    Array(Arc<Property>),
    Set(Arc<Property>),
    Map(Arc<Property>, Arc<Property>),
    Delegate,
    MulticastDelegate,
}

impl PropertyKind {
    pub fn default_value(&self) -> Value {
        match self {
            PropertyKind::Bool => Value::Bool(false),
            PropertyKind::Byte => Value::Byte(0),
            PropertyKind::Int => Value::Int(0),
            PropertyKind::Int64 => Value::Int64(0),
            PropertyKind::UInt64 => Value::UInt64(0),
            PropertyKind::Float => Value::Float(0.0),
            PropertyKind::Double => Value::Double(0.0),
            PropertyKind::Name => Value::Name(Name::none()),
            PropertyKind::Str => Value::str(""),
            PropertyKind::Vector => Value::Vector([0.0; 3]),
            PropertyKind::Rotator => Value::Rotator([0.0; 3]),
            PropertyKind::Transform => Value::Transform(Box::default()),
            PropertyKind::Object(_) => Value::Object(None),
            PropertyKind::Class(_) => Value::Class(None),
            PropertyKind::Interface(_) => Value::Interface(None),
            PropertyKind::Struct(def) => Value::Struct(def.fields.iter().map(|f| f.initialize_value()).collect()),
            PropertyKind::Array(_) => Value::Array(Vec::new()),
            PropertyKind::Set(_) => Value::Set(Vec::new()),
            PropertyKind::Map(_, _) => Value::Map(Vec::new()),
            PropertyKind::Delegate => Value::Delegate(None),
            PropertyKind::MulticastDelegate => Value::MulticastDelegate(Vec::new()),
        }
    }

    /// Normalizes a value on its way into storage of this kind.
    fn coerce(&self, value: Value) -> Value {
        match (self, value) {
            (PropertyKind::Bool, v) => Value::Bool(v.as_bool()),
            (PropertyKind::Byte, Value::Int(v)) => Value::Byte(v as u8),
            (PropertyKind::Int, Value::Byte(v)) => Value::Int(v as i32),
            (PropertyKind::Int64, Value::Int(v)) => Value::Int64(v as i64),
            (PropertyKind::Float, Value::Double(v)) => Value::Float(v as f32),
            (PropertyKind::Double, Value::Float(v)) => Value::Double(v as f64),
            (PropertyKind::Interface(_), Value::Object(o)) => Value::Interface(o),
            (PropertyKind::Object(_), Value::Interface(o)) => Value::Object(o),
            (_, v) => v,
        }
    }

    pub fn needs_destroy(&self) -> bool {
        matches!(
            self,
            PropertyKind::Str
                | PropertyKind::Transform
                | PropertyKind::Struct(_)
                | PropertyKind::Array(_)
                | PropertyKind::Set(_)
                | PropertyKind::Map(_, _)
                | PropertyKind::Delegate
                | PropertyKind::MulticastDelegate
        )
    }
}

#[derive(Debug)]
pub struct StructDef {
    pub name: Name,
    pub fields: Vec<Arc<Property>>,
}

/// Which container a property's offset indexes into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyOwner {
    Class(ClassId),
    SparseData(ClassId),
    Function(FunctionId),
    Struct,
    Free,
}

#[derive(Debug, Clone)]
pub struct Property {
    pub id: PropertyId,
    pub name: Name,
    pub kind: PropertyKind,
    pub flags: u32,
    pub offset: usize,
    pub owner: PropertyOwner,
    pub setter: Option<PropertySetter>,
}

impl Property {
    pub fn new(name: &str, kind: PropertyKind) -> Self {
        Self {
            id: PropertyId::DETACHED,
            name: Name::new(name),
            kind,
            flags: 0,
            offset: 0,
            owner: PropertyOwner::Free,
            setter: None,
        }
    }

    /// A detached element descriptor for array/set/map kinds.
    pub fn element(kind: PropertyKind) -> Arc<Property> {
        Arc::new(Self::new("Element", kind))
    }

    pub fn with_flags(mut self, flags: u32) -> Self {
        self.flags |= flags;
        self
    }

    pub fn with_setter(mut self, setter: PropertySetter) -> Self {
        self.setter = Some(setter);
        self
    }

    #[inline]
    pub fn has_any_flags(&self, flags: u32) -> bool {
        self.flags & flags != 0
    }

    pub fn is_parm(&self) -> bool {
        self.has_any_flags(CPF_PARM)
    }

    pub fn is_out_parm(&self) -> bool {
        self.has_any_flags(CPF_OUT_PARM)
    }

    pub fn is_return_parm(&self) -> bool {
        self.has_any_flags(CPF_RETURN_PARM)
    }

    pub fn has_setter(&self) -> bool {
        self.setter.is_some()
    }

    pub fn initialize_value(&self) -> Value {
        self.kind.default_value()
    }

    pub fn clear_value(&self, value: &mut Value) {
        *value = self.initialize_value();
    }

    pub fn copy_to_script_vm(&self, dst: &mut Value, src: &Value) {
        *dst = self.kind.coerce(src.clone());
    }

    pub fn identical(&self, a: &Value, b: &Value) -> bool {
        self.kind.coerce(a.clone()) == self.kind.coerce(b.clone())
    }

    pub fn needs_destroy(&self) -> bool {
        self.kind.needs_destroy()
    }

    /// Releases whatever the slot owns and leaves it empty.
    pub fn destroy_value(&self, value: &mut Value) {
        drop(std::mem::take(value));
    }

    /// Stores `value`, going through the setter when one is registered.
    pub fn set_value(&self, slot: &mut Value, value: Value) {
        let value = self.kind.coerce(value);
        match self.setter {
            Some(setter) => setter(slot, value),
            None => *slot = value,
        }
    }

    pub fn set_bool(&self, slot: &mut Value, value: bool) {
        self.set_value(slot, Value::Bool(value));
    }

    pub fn element_property(&self) -> Option<&Arc<Property>> {
        match &self.kind {
            PropertyKind::Array(inner) | PropertyKind::Set(inner) => Some(inner),
            _ => None,
        }
    }
}
