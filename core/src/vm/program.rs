//! Immutable program metadata: names, classes, functions and properties.
//!
//! A [`Program`] is produced once by [`ProgramBuilder::build`] and shared read-only (`Arc`) by
//! every VM that executes it. Bytecode refers into its tables by index.

use std::sync::Arc;

use anyhow::{Result, anyhow, bail};
use tracing::debug;

use crate::util::fast_map::{FastHashMap, FastHashSet, fast_hash_map_new, fast_hash_set_new};
use crate::val::{
    CPF_OUT_PARM, CPF_PARM, CPF_REFERENCE_PARM, CPF_RETURN_PARM, ClassId, FunctionId, Name, Property, PropertyId,
    PropertyKind, PropertyOwner, PropertySetter, StructDef, Value,
};

use super::bytecode::{FUNC_HAS_OUT_PARMS, Function, NativeFn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NameIndex(pub u32);

#[derive(Debug, Clone)]
pub struct Class {
    pub id: ClassId,
    pub name: Name,
    pub parent: Option<ClassId>,
    pub is_interface: bool,
    /// Every interface implemented by this class or an ancestor.
    pub interfaces: Vec<ClassId>,
    /// Instance layout, inherited fields first.
    pub fields: Vec<Arc<Property>>,
    pub sparse_fields: Vec<Arc<Property>>,
    pub sparse_defaults: Vec<Value>,
    /// Functions declared on this class.
    pub functions: FastHashMap<Name, FunctionId>,
    /// Virtual dispatch table: own functions override inherited ones by name.
    pub vtable: FastHashMap<Name, FunctionId>,
}

impl Class {
    pub fn find_property(&self, name: &str) -> Option<&Arc<Property>> {
        self.fields
            .iter()
            .rev()
            .find(|p| p.name.as_str() == name)
            .or_else(|| self.sparse_fields.iter().find(|p| p.name.as_str() == name))
    }

    pub fn find_function(&self, name: &Name) -> Option<FunctionId> {
        self.vtable.get(name).copied()
    }
}

#[derive(Debug)]
pub struct Program {
    names: Vec<Name>,
    classes: Vec<Class>,
    functions: Vec<Arc<Function>>,
    properties: Vec<Arc<Property>>,
    class_by_name: FastHashMap<Name, ClassId>,
}

impl Program {
    pub fn name(&self, index: u32) -> Option<&Name> {
        self.names.get(index as usize)
    }

    pub fn class(&self, id: ClassId) -> Option<&Class> {
        self.classes.get(id.0 as usize)
    }

    pub fn classes(&self) -> &[Class] {
        &self.classes
    }

    pub fn function(&self, id: FunctionId) -> Option<&Arc<Function>> {
        self.functions.get(id.0 as usize)
    }

    pub fn property(&self, id: PropertyId) -> Option<&Arc<Property>> {
        self.properties.get(id.0 as usize)
    }

    pub fn find_class(&self, name: &str) -> Option<ClassId> {
        self.class_by_name.get(&Name::new(name)).copied()
    }

    /// Virtual lookup against `class` and its ancestors.
    pub fn find_function(&self, class: ClassId, name: &Name) -> Option<FunctionId> {
        self.class(class).and_then(|c| c.find_function(name))
    }

    pub fn is_child_of(&self, class: ClassId, ancestor: ClassId) -> bool {
        let mut cursor = Some(class);
        while let Some(id) = cursor {
            if id == ancestor {
                return true;
            }
            cursor = self.class(id).and_then(|c| c.parent);
        }
        false
    }

    pub fn implements(&self, class: ClassId, interface: ClassId) -> bool {
        self.class(class)
            .is_some_and(|c| c.interfaces.contains(&interface))
    }
}

#[derive(Debug)]
struct ClassDecl {
    name: Name,
    parent: Option<ClassId>,
    is_interface: bool,
    interfaces: Vec<ClassId>,
    fields: Vec<PropertyId>,
    sparse_fields: Vec<(PropertyId, Value)>,
}

#[derive(Debug)]
struct FunctionDecl {
    name: Name,
    owner: ClassId,
    flags: u32,
    params: Vec<PropertyId>,
    locals: Vec<PropertyId>,
    script: Vec<u8>,
    native: Option<NativeFn>,
}

/// Incremental registration of program metadata.
///
/// Registration calls never fail; unknown ids are recorded and reported by [`build`](Self::build).
#[derive(Debug, Default)]
pub struct ProgramBuilder {
    names: Vec<Name>,
    name_index: FastHashMap<Name, u32>,
    classes: Vec<ClassDecl>,
    functions: Vec<FunctionDecl>,
    properties: Vec<Property>,
    errors: Vec<String>,
}

impl ProgramBuilder {
    pub fn new() -> Self {
        Self {
            name_index: fast_hash_map_new(),
            ..Default::default()
        }
    }

    pub fn intern(&mut self, name: &str) -> NameIndex {
        let name = Name::new(name);
        if let Some(&idx) = self.name_index.get(&name) {
            return NameIndex(idx);
        }
        let idx = self.names.len() as u32;
        self.names.push(name.clone());
        self.name_index.insert(name, idx);
        NameIndex(idx)
    }

    pub fn add_class(&mut self, name: &str, parent: Option<ClassId>) -> ClassId {
        self.push_class(name, parent, false)
    }

    pub fn has_class(&self, name: &str) -> bool {
        self.classes.iter().any(|decl| decl.name.as_str() == name)
    }

    pub fn add_interface(&mut self, name: &str) -> ClassId {
        self.push_class(name, None, true)
    }

    fn push_class(&mut self, name: &str, parent: Option<ClassId>, is_interface: bool) -> ClassId {
        let id = ClassId(self.classes.len() as u32);
        if let Some(parent) = parent
            && parent >= id
        {
            self.errors
                .push(format!("class {name}: parent {} is not registered yet", parent.0));
        }
        self.classes.push(ClassDecl {
            name: Name::new(name),
            parent,
            is_interface,
            interfaces: Vec::new(),
            fields: Vec::new(),
            sparse_fields: Vec::new(),
        });
        id
    }

    pub fn implement(&mut self, class: ClassId, interface: ClassId) {
        let is_interface = self.classes.get(interface.0 as usize).is_some_and(|c| c.is_interface);
        if !is_interface {
            self.errors.push(format!("class {} is not an interface", interface.0));
            return;
        }
        match self.classes.get_mut(class.0 as usize) {
            Some(decl) => decl.interfaces.push(interface),
            None => self.errors.push(format!("implement: unknown class {}", class.0)),
        }
    }

    fn push_property(&mut self, mut property: Property) -> PropertyId {
        let id = PropertyId(self.properties.len() as u32);
        property.id = id;
        self.properties.push(property);
        id
    }

    pub fn add_field(&mut self, class: ClassId, name: &str, kind: PropertyKind) -> PropertyId {
        self.push_field(class, Property::new(name, kind))
    }

    pub fn add_field_with_setter(
        &mut self,
        class: ClassId,
        name: &str,
        kind: PropertyKind,
        setter: PropertySetter,
    ) -> PropertyId {
        self.push_field(class, Property::new(name, kind).with_setter(setter))
    }

    fn push_field(&mut self, class: ClassId, mut property: Property) -> PropertyId {
        property.owner = PropertyOwner::Class(class);
        let id = self.push_property(property);
        match self.classes.get_mut(class.0 as usize) {
            Some(decl) => decl.fields.push(id),
            None => self.errors.push(format!("add_field: unknown class {}", class.0)),
        }
        id
    }

    /// Registers a per-class shared field, initialized to `default`.
    pub fn add_sparse_field(&mut self, class: ClassId, name: &str, kind: PropertyKind, default: Value) -> PropertyId {
        let mut property = Property::new(name, kind);
        property.owner = PropertyOwner::SparseData(class);
        let id = self.push_property(property);
        match self.classes.get_mut(class.0 as usize) {
            Some(decl) => decl.sparse_fields.push((id, default)),
            None => self.errors.push(format!("add_sparse_field: unknown class {}", class.0)),
        }
        id
    }

    /// Declares a struct type. Member ids are usable as `StructMemberContext` operands.
    pub fn add_struct(&mut self, name: &str, members: Vec<(&str, PropertyKind)>) -> (Arc<StructDef>, Vec<PropertyId>) {
        let mut fields = Vec::with_capacity(members.len());
        let mut ids = Vec::with_capacity(members.len());
        for (offset, (member, kind)) in members.into_iter().enumerate() {
            let mut property = Property::new(member, kind);
            property.owner = PropertyOwner::Struct;
            property.offset = offset;
            let id = self.push_property(property.clone());
            property.id = id;
            fields.push(Arc::new(property));
            ids.push(id);
        }
        let def = Arc::new(StructDef {
            name: Name::new(name),
            fields,
        });
        (def, ids)
    }

    /// A free-standing property, e.g. the element type operand of a composite literal.
    pub fn add_property(&mut self, name: &str, kind: PropertyKind) -> PropertyId {
        self.push_property(Property::new(name, kind))
    }

    pub fn add_function(&mut self, class: ClassId, name: &str, flags: u32) -> FunctionId {
        if class.0 as usize >= self.classes.len() {
            self.errors.push(format!("function {name}: unknown class {}", class.0));
        }
        let id = FunctionId(self.functions.len() as u32);
        self.functions.push(FunctionDecl {
            name: Name::new(name),
            owner: class,
            flags,
            params: Vec::new(),
            locals: Vec::new(),
            script: Vec::new(),
            native: None,
        });
        id
    }

    fn push_function_property(&mut self, function: FunctionId, property: Property, is_param: bool) -> PropertyId {
        let mut property = property;
        property.owner = PropertyOwner::Function(function);
        let id = self.push_property(property);
        match self.functions.get_mut(function.0 as usize) {
            Some(decl) if is_param => decl.params.push(id),
            Some(decl) => decl.locals.push(id),
            None => self.errors.push(format!("unknown function {}", function.0)),
        }
        id
    }

    pub fn add_param(&mut self, function: FunctionId, name: &str, kind: PropertyKind) -> PropertyId {
        let property = Property::new(name, kind).with_flags(CPF_PARM);
        self.push_function_property(function, property, true)
    }

    /// An out parameter; `by_ref` marks it as a reference parameter (read and written by the callee).
    pub fn add_out_param(&mut self, function: FunctionId, name: &str, kind: PropertyKind, by_ref: bool) -> PropertyId {
        let mut property = Property::new(name, kind).with_flags(CPF_PARM | CPF_OUT_PARM);
        if by_ref {
            property = property.with_flags(CPF_REFERENCE_PARM);
        }
        self.push_function_property(function, property, true)
    }

    pub fn add_return(&mut self, function: FunctionId, kind: PropertyKind) -> PropertyId {
        let property = Property::new("ReturnValue", kind).with_flags(CPF_PARM | CPF_OUT_PARM | CPF_RETURN_PARM);
        self.push_function_property(function, property, true)
    }

    pub fn add_local(&mut self, function: FunctionId, name: &str, kind: PropertyKind) -> PropertyId {
        self.push_function_property(function, Property::new(name, kind), false)
    }

    pub fn set_native(&mut self, function: FunctionId, native: NativeFn) {
        match self.functions.get_mut(function.0 as usize) {
            Some(decl) => decl.native = Some(native),
            None => self.errors.push(format!("set_native: unknown function {}", function.0)),
        }
    }

    pub fn set_script(&mut self, function: FunctionId, script: Vec<u8>) {
        match self.functions.get_mut(function.0 as usize) {
            Some(decl) => decl.script = script,
            None => self.errors.push(format!("set_script: unknown function {}", function.0)),
        }
    }

    pub fn build(self) -> Result<Arc<Program>> {
        if let Some(first) = self.errors.first() {
            bail!("program build failed: {first} ({} error(s))", self.errors.len());
        }

        let mut seen: FastHashSet<Name> = fast_hash_set_new();
        for decl in &self.classes {
            if !seen.insert(decl.name.clone()) {
                bail!("duplicate class {}", decl.name);
            }
        }

        let mut properties = self.properties;

        // Instance layout: inherited fields first, so a parent's offsets stay valid in children.
        let mut layouts: Vec<Vec<PropertyId>> = Vec::with_capacity(self.classes.len());
        for decl in &self.classes {
            let mut layout = match decl.parent {
                Some(parent) => layouts
                    .get(parent.0 as usize)
                    .cloned()
                    .ok_or_else(|| anyhow!("class {}: unknown parent {}", decl.name, parent.0))?,
                None => Vec::new(),
            };
            for &id in &decl.fields {
                properties[id.0 as usize].offset = layout.len();
                layout.push(id);
            }
            for (offset, (id, _)) in decl.sparse_fields.iter().enumerate() {
                properties[id.0 as usize].offset = offset;
            }
            layouts.push(layout);
        }

        let mut functions = Vec::with_capacity(self.functions.len());
        for (idx, decl) in self.functions.iter().enumerate() {
            let ids: Vec<PropertyId> = decl.params.iter().chain(decl.locals.iter()).copied().collect();
            for (offset, id) in ids.iter().enumerate() {
                properties[id.0 as usize].offset = offset;
            }
            let return_index = decl
                .params
                .iter()
                .position(|id| properties[id.0 as usize].is_return_parm());
            let mut flags = decl.flags;
            if decl.params.iter().any(|id| properties[id.0 as usize].is_out_parm()) {
                flags |= FUNC_HAS_OUT_PARMS;
            }
            functions.push((idx, ids, return_index, flags));
        }

        let properties: Vec<Arc<Property>> = properties.into_iter().map(Arc::new).collect();
        let prop = |id: &PropertyId| Arc::clone(&properties[id.0 as usize]);

        let functions: Vec<Arc<Function>> = functions
            .into_iter()
            .map(|(idx, ids, return_index, flags)| {
                let decl = &self.functions[idx];
                Arc::new(Function {
                    id: FunctionId(idx as u32),
                    name: decl.name.clone(),
                    owner: decl.owner,
                    flags,
                    properties: ids.iter().map(prop).collect(),
                    parms_count: decl.params.len(),
                    return_index,
                    script: decl.script.clone(),
                    native: decl.native,
                })
            })
            .collect();

        let mut classes: Vec<Class> = Vec::with_capacity(self.classes.len());
        for (idx, decl) in self.classes.iter().enumerate() {
            let id = ClassId(idx as u32);
            let parent = decl.parent.and_then(|p| classes.get(p.0 as usize));
            let mut vtable = parent.map(|p| p.vtable.clone()).unwrap_or_else(fast_hash_map_new);
            let mut interfaces = parent.map(|p| p.interfaces.clone()).unwrap_or_default();
            for iface in &decl.interfaces {
                if !interfaces.contains(iface) {
                    interfaces.push(*iface);
                }
            }
            let mut own = fast_hash_map_new();
            for function in functions.iter().filter(|f| f.owner == id) {
                own.insert(function.name.clone(), function.id);
                vtable.insert(function.name.clone(), function.id);
            }
            classes.push(Class {
                id,
                name: decl.name.clone(),
                parent: decl.parent,
                is_interface: decl.is_interface,
                interfaces,
                fields: layouts[idx].iter().map(prop).collect(),
                sparse_fields: decl.sparse_fields.iter().map(|(id, _)| prop(id)).collect(),
                sparse_defaults: decl.sparse_fields.iter().map(|(_, v)| v.clone()).collect(),
                functions: own,
                vtable,
            });
        }

        let class_by_name = classes.iter().map(|c| (c.name.clone(), c.id)).collect();
        debug!(
            target: "bcvm::vm",
            classes = classes.len(),
            functions = functions.len(),
            properties = properties.len(),
            "program built"
        );
        Ok(Arc::new(Program {
            names: self.names,
            classes,
            functions,
            properties,
            class_by_name,
        }))
    }
}
