use anyhow::{Result, anyhow};
use tracing::trace;

use crate::val::{ClassId, ObjectRef, Value};

use super::Program;

#[derive(Debug, Clone)]
pub struct ObjectData {
    pub class: ClassId,
    pub fields: Vec<Value>,
    pub pending_kill: bool,
}

#[derive(Debug, Clone)]
struct Slot {
    generation: u32,
    data: Option<ObjectData>,
}

/// Generational arena of object instances.
///
/// One class default object is spawned per class at construction; new instances copy its fields.
/// Sparse class data lives beside the arena, one block per class.
#[derive(Debug, Clone, Default)]
pub struct ObjectStore {
    slots: Vec<Slot>,
    free: Vec<u32>,
    defaults: Vec<ObjectRef>,
    sparse: Vec<Vec<Value>>,
}

impl ObjectStore {
    pub fn new(program: &Program) -> Self {
        let mut store = Self::default();
        for class in program.classes() {
            let fields = class.fields.iter().map(|p| p.initialize_value()).collect();
            let cdo = store.insert(ObjectData {
                class: class.id,
                fields,
                pending_kill: false,
            });
            store.defaults.push(cdo);
            store.sparse.push(class.sparse_defaults.clone());
        }
        store
    }

    fn insert(&mut self, data: ObjectData) -> ObjectRef {
        match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.data = Some(data);
                ObjectRef {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot {
                    generation: 0,
                    data: Some(data),
                });
                ObjectRef { index, generation: 0 }
            }
        }
    }

    /// Creates an instance of `class` initialized from its class default object.
    pub fn spawn(&mut self, class: ClassId) -> Result<ObjectRef> {
        let cdo = self
            .default_object(class)
            .ok_or_else(|| anyhow!("spawn: unknown class {}", class.0))?;
        let fields = self
            .get(cdo)
            .map(|data| data.fields.clone())
            .ok_or_else(|| anyhow!("spawn: class default object of {} is gone", class.0))?;
        let object = self.insert(ObjectData {
            class,
            fields,
            pending_kill: false,
        });
        trace!(target: "bcvm::vm", %object, class = class.0, "spawned object");
        Ok(object)
    }

    /// Frees the slot and bumps its generation; returns whether `object` was live.
    pub fn destroy(&mut self, object: ObjectRef) -> bool {
        let Some(slot) = self.slots.get_mut(object.index as usize) else {
            return false;
        };
        if slot.generation != object.generation || slot.data.is_none() {
            return false;
        }
        slot.data = None;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(object.index);
        true
    }

    pub fn mark_pending_kill(&mut self, object: ObjectRef) {
        if let Some(data) = self.get_mut(object) {
            data.pending_kill = true;
        }
    }

    /// Live and not pending kill.
    pub fn is_valid(&self, object: ObjectRef) -> bool {
        self.get(object).is_some_and(|data| !data.pending_kill)
    }

    pub fn get(&self, object: ObjectRef) -> Option<&ObjectData> {
        self.slots
            .get(object.index as usize)
            .filter(|slot| slot.generation == object.generation)
            .and_then(|slot| slot.data.as_ref())
    }

    pub fn get_mut(&mut self, object: ObjectRef) -> Option<&mut ObjectData> {
        self.slots
            .get_mut(object.index as usize)
            .filter(|slot| slot.generation == object.generation)
            .and_then(|slot| slot.data.as_mut())
    }

    pub fn class_of(&self, object: ObjectRef) -> Option<ClassId> {
        self.get(object).map(|data| data.class)
    }

    pub fn default_object(&self, class: ClassId) -> Option<ObjectRef> {
        self.defaults.get(class.0 as usize).copied()
    }

    pub fn sparse_data(&self, class: ClassId) -> Option<&Vec<Value>> {
        self.sparse.get(class.0 as usize)
    }

    pub fn sparse_data_mut(&mut self, class: ClassId) -> Option<&mut Vec<Value>> {
        self.sparse.get_mut(class.0 as usize)
    }

    pub fn live_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.data.is_some()).count()
    }
}
