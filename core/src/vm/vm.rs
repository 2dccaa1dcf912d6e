mod caches;
mod frame;
mod runtime;

use std::sync::Arc;

use anyhow::{Result, anyhow};
use tracing::debug;

use crate::val::{ClassId, FunctionId, ObjectRef, Property, Value};
use crate::vm::alloc::{PersistentFrames, VirtualStack};
use crate::vm::config::VmConfig;
use crate::vm::context::ExecutionContext;
use crate::vm::object::ObjectStore;
use crate::vm::program::Program;
use crate::vm::signal::{ScriptExceptionInfo, ScriptExceptionType, VmResult};

use caches::CallSiteCache;
pub use caches::CallSiteStats;
pub use frame::{Frame, FrameInfo, OutParmRec, Place, PlaceRoot};
pub use runtime::CallOutcome;

/// One interpreter instance: the program it runs, the objects it owns, the locals stack and the
/// persistent frames of its objects.
///
/// A `Vm` is driven by one thread at a time; its guard state lives in the [`ExecutionContext`]
/// handed to every entry point.
pub struct Vm {
    program: Arc<Program>,
    objects: ObjectStore,
    persistent: PersistentFrames,
    stack: VirtualStack,
    call_stack: Vec<FrameInfo>,
    call_sites: CallSiteCache,
}

impl Vm {
    pub fn new(program: Arc<Program>) -> Self {
        Self::with_config(program, &VmConfig::default())
    }

    pub fn with_config(program: Arc<Program>, config: &VmConfig) -> Self {
        let objects = ObjectStore::new(&program);
        debug!(
            target: "bcvm::vm",
            classes = program.classes().len(),
            pool = config.stack_pool_capacity,
            "vm created"
        );
        Self {
            program,
            objects,
            persistent: PersistentFrames::default(),
            stack: VirtualStack::new(config.stack_pool_capacity),
            call_stack: Vec::new(),
            call_sites: CallSiteCache::default(),
        }
    }

    pub fn program(&self) -> &Arc<Program> {
        &self.program
    }

    pub fn objects(&self) -> &ObjectStore {
        &self.objects
    }

    pub fn spawn(&mut self, class: ClassId) -> Result<ObjectRef> {
        self.objects.spawn(class)
    }

    /// Destroys `object` together with its persistent frames.
    pub fn destroy(&mut self, object: ObjectRef) -> bool {
        self.persistent.remove_object(object);
        self.objects.destroy(object)
    }

    pub fn mark_pending_kill(&mut self, object: ObjectRef) {
        self.objects.mark_pending_kill(object);
    }

    pub fn is_valid(&self, object: ObjectRef) -> bool {
        self.objects.is_valid(object)
    }

    pub fn default_object(&self, class: ClassId) -> Option<ObjectRef> {
        self.objects.default_object(class)
    }

    fn field_property(&self, object: ObjectRef, name: &str) -> Result<Arc<Property>> {
        let class = self
            .objects
            .class_of(object)
            .ok_or_else(|| anyhow!("{object} is not a live object"))?;
        self.program
            .class(class)
            .and_then(|c| c.fields.iter().rev().find(|p| p.name.as_str() == name))
            .cloned()
            .ok_or_else(|| anyhow!("class {} has no field {name}", class.0))
    }

    pub fn field(&self, object: ObjectRef, name: &str) -> Result<Value> {
        let property = self.field_property(object, name)?;
        self.read_place(&Place::new(PlaceRoot::Object(object), property.offset))
            .cloned()
            .ok_or_else(|| anyhow!("field {name} of {object} is out of range"))
    }

    /// Host write to an instance field; goes through the property's setter.
    pub fn set_field(&mut self, object: ObjectRef, name: &str, value: Value) -> Result<()> {
        let property = self.field_property(object, name)?;
        let place = Place::new(PlaceRoot::Object(object), property.offset);
        if !self.write_place(&place, &property, value) {
            return Err(anyhow!("field {name} of {object} is out of range"));
        }
        Ok(())
    }

    pub fn persistent_frame(&self, object: ObjectRef, function: FunctionId) -> Option<&[Value]> {
        self.persistent.get(object, function).map(Vec::as_slice)
    }

    /// Script functions currently executing, outermost first.
    pub fn script_stack(&self) -> &[FrameInfo] {
        &self.call_stack
    }

    pub fn call_site_stats(&self) -> CallSiteStats {
        self.call_sites.stats()
    }

    /// Live locals blocks.
    pub fn stack_depth(&self) -> usize {
        self.stack.depth()
    }

    pub fn stack_peak(&self) -> usize {
        self.stack.peak()
    }

    fn root(&self, root: PlaceRoot) -> Option<&Vec<Value>> {
        match root {
            PlaceRoot::Block(id) => self.stack.block(id),
            PlaceRoot::Persistent(object, function) => self.persistent.get(object, function),
            PlaceRoot::Object(object) => self.objects.get(object).map(|data| &data.fields),
            PlaceRoot::SparseData(class) => self.objects.sparse_data(class),
        }
    }

    fn root_mut(&mut self, root: PlaceRoot) -> Option<&mut Vec<Value>> {
        match root {
            PlaceRoot::Block(id) => self.stack.block_mut(id),
            PlaceRoot::Persistent(object, function) => self.persistent.get_mut(object, function),
            PlaceRoot::Object(object) => self.objects.get_mut(object).map(|data| &mut data.fields),
            PlaceRoot::SparseData(class) => self.objects.sparse_data_mut(class),
        }
    }

    pub fn read_place(&self, place: &Place) -> Option<&Value> {
        let (first, rest) = place.path.split_first()?;
        let mut value = self.root(place.root)?.get(*first)?;
        for &idx in rest {
            value = value.child(idx)?;
        }
        Some(value)
    }

    pub fn place_mut(&mut self, place: &Place) -> Option<&mut Value> {
        let (first, rest) = place.path.split_first()?;
        let mut value = self.root_mut(place.root)?.get_mut(*first)?;
        for &idx in rest {
            value = value.child_mut(idx)?;
        }
        Some(value)
    }

    /// Stores `value` through `property` (setter included); false when the place is gone.
    pub fn write_place(&mut self, place: &Place, property: &Property, value: Value) -> bool {
        match self.place_mut(place) {
            Some(slot) => {
                property.set_value(slot, value);
                true
            }
            None => false,
        }
    }

    /// Reports a script exception on behalf of `object`, rendering the current script stack.
    pub fn throw_script_exception(
        &self,
        ctx: &mut ExecutionContext,
        object: ObjectRef,
        frame: &Frame,
        kind: ScriptExceptionType,
        description: impl Into<String>,
    ) -> VmResult<()> {
        ctx.raise(object, frame, ScriptExceptionInfo::new(kind, description), &self.call_stack)
    }
}
