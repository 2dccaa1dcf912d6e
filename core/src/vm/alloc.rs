use std::sync::Arc;

use tracing::trace;

use crate::util::fast_map::{FastHashMap, fast_hash_map_new};
use crate::val::{FunctionId, ObjectRef, Property, Value};

/// Index of a live block on the [`VirtualStack`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockId(pub(crate) usize);

/// Height of the stack at a call boundary; releasing it pops every block pushed since.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackMark(usize);

/// Mark/release stack of locals blocks with a recycling pool, so steady-state calls do not touch
/// the general allocator.
#[derive(Debug)]
pub struct VirtualStack {
    blocks: Vec<Vec<Value>>,
    pool: Vec<Vec<Value>>,
    pool_capacity: usize,
    peak: usize,
    fresh_blocks: u64,
}

impl Default for VirtualStack {
    fn default() -> Self {
        Self::new(64)
    }
}

impl VirtualStack {
    pub fn new(pool_capacity: usize) -> Self {
        Self {
            blocks: Vec::new(),
            pool: Vec::with_capacity(pool_capacity),
            pool_capacity,
            peak: 0,
            fresh_blocks: 0,
        }
    }

    #[inline]
    pub fn mark(&self) -> StackMark {
        StackMark(self.blocks.len())
    }

    pub fn release(&mut self, mark: StackMark) {
        while self.blocks.len() > mark.0 {
            let Some(mut block) = self.blocks.pop() else { break };
            block.clear();
            if self.pool.len() < self.pool_capacity {
                self.pool.push(block);
            }
        }
    }

    fn next_block(&mut self, len: usize) -> Vec<Value> {
        match self.pool.pop() {
            Some(mut block) => {
                block.reserve(len);
                block
            }
            None => {
                self.fresh_blocks += 1;
                trace!(target: "bcvm::alloc", len, fresh = self.fresh_blocks, "allocating locals block");
                Vec::with_capacity(len)
            }
        }
    }

    fn push(&mut self, block: Vec<Value>) -> BlockId {
        let id = BlockId(self.blocks.len());
        self.blocks.push(block);
        if self.blocks.len() > self.peak {
            self.peak = self.blocks.len();
        }
        id
    }

    /// Pushes a block holding each property's initial value.
    pub fn push_block(&mut self, layout: &[Arc<Property>]) -> BlockId {
        let mut block = self.next_block(layout.len());
        block.extend(layout.iter().map(|p| p.initialize_value()));
        self.push(block)
    }

    pub fn block(&self, id: BlockId) -> Option<&Vec<Value>> {
        self.blocks.get(id.0)
    }

    pub fn block_mut(&mut self, id: BlockId) -> Option<&mut Vec<Value>> {
        self.blocks.get_mut(id.0)
    }

    pub fn depth(&self) -> usize {
        self.blocks.len()
    }

    pub fn peak(&self) -> usize {
        self.peak
    }

    pub fn fresh_blocks(&self) -> u64 {
        self.fresh_blocks
    }
}

/// Locals blocks that outlive a single invocation, keyed by (instance, function).
#[derive(Debug, Clone)]
pub struct PersistentFrames {
    frames: FastHashMap<(ObjectRef, FunctionId), Vec<Value>>,
}

impl Default for PersistentFrames {
    fn default() -> Self {
        Self {
            frames: fast_hash_map_new(),
        }
    }
}

impl PersistentFrames {
    /// Returns the existing block, or creates one from `layout`. Reused blocks keep their values.
    pub fn ensure(&mut self, object: ObjectRef, function: FunctionId, layout: &[Arc<Property>]) -> &mut Vec<Value> {
        self.frames.entry((object, function)).or_insert_with(|| {
            trace!(target: "bcvm::alloc", %object, function = function.0, "creating persistent frame");
            layout.iter().map(|p| p.initialize_value()).collect()
        })
    }

    pub fn get(&self, object: ObjectRef, function: FunctionId) -> Option<&Vec<Value>> {
        self.frames.get(&(object, function))
    }

    pub fn get_mut(&mut self, object: ObjectRef, function: FunctionId) -> Option<&mut Vec<Value>> {
        self.frames.get_mut(&(object, function))
    }

    pub fn remove_object(&mut self, object: ObjectRef) {
        self.frames.retain(|(owner, _), _| *owner != object);
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}
