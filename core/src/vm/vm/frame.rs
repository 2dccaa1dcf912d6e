use std::fmt;
use std::sync::Arc;

use tracing::error;

use crate::val::{ClassId, FunctionId, Name, ObjectRef, Property, PropertyId, Value};
use crate::vm::alloc::BlockId;
use crate::vm::bytecode::{Function, NULL_INDEX, Opcode};
use crate::vm::context::ExecutionContext;
use crate::vm::program::Program;
use crate::vm::signal::{Aborted, VmResult};

use super::Vm;

/// Storage container a [`Place`] starts from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlaceRoot {
    Block(BlockId),
    Persistent(ObjectRef, FunctionId),
    Object(ObjectRef),
    SparseData(ClassId),
}

/// An lvalue: a root container plus a path of offsets into nested composites.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Place {
    pub root: PlaceRoot,
    pub path: Vec<usize>,
}

impl Place {
    pub fn new(root: PlaceRoot, offset: usize) -> Self {
        Self {
            root,
            path: vec![offset],
        }
    }

    pub fn child(&self, offset: usize) -> Self {
        let mut path = Vec::with_capacity(self.path.len() + 1);
        path.extend_from_slice(&self.path);
        path.push(offset);
        Self { root: self.root, path }
    }
}

/// Where an out/reference parameter must be written back.
#[derive(Debug, Clone)]
pub struct OutParmRec {
    pub property: Arc<Property>,
    pub place: Place,
}

/// Entry of the diagnostic script stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameInfo {
    pub function: Name,
    pub object: ObjectRef,
    pub depth: usize,
}

impl fmt::Display for FrameInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} {} ({})", self.depth, self.function, self.object)
    }
}

/// Activation record of one invocation: bytecode cursor, locals root, out-parameter records
/// and the structured-flow stack.
#[derive(Debug)]
pub struct Frame {
    pub(crate) node: Arc<Function>,
    pub(crate) object: ObjectRef,
    pub(crate) pc: usize,
    pub(crate) locals: PlaceRoot,
    pub(crate) out_parms: Vec<OutParmRec>,
    pub(crate) flow_stack: Vec<usize>,
    pub(crate) most_recent_property: Option<Arc<Property>>,
    pub(crate) most_recent_place: Option<Place>,
    pub(crate) array_context_failed: bool,
    /// Next parameter slot handed out by [`Frame::arg`] on a code-less frame.
    pub(crate) compiled_in: usize,
}

impl Frame {
    pub(crate) fn new(node: Arc<Function>, object: ObjectRef, locals: PlaceRoot) -> Self {
        Self {
            node,
            object,
            pc: 0,
            locals,
            out_parms: Vec::new(),
            flow_stack: Vec::new(),
            most_recent_property: None,
            most_recent_place: None,
            array_context_failed: false,
            compiled_in: 0,
        }
    }

    pub fn node(&self) -> &Arc<Function> {
        &self.node
    }

    pub fn object(&self) -> ObjectRef {
        self.object
    }

    /// Current bytecode offset.
    pub fn offset(&self) -> usize {
        self.pc
    }

    pub fn locals(&self) -> PlaceRoot {
        self.locals
    }

    pub fn flow_depth(&self) -> usize {
        self.flow_stack.len()
    }

    pub fn most_recent_place(&self) -> Option<&Place> {
        self.most_recent_place.as_ref()
    }

    pub fn has_code(&self) -> bool {
        !self.node.script.is_empty()
    }

    pub(crate) fn malformed(&self, detail: &str) -> Aborted {
        error!(
            target: "bcvm::vm",
            function = %self.node.name,
            offset = self.pc,
            "malformed bytecode: {detail}"
        );
        Aborted::malformed(self.node.name.clone(), self.pc, detail)
    }

    // ---- cursor ----

    #[inline]
    pub(crate) fn peek_u8(&self) -> Option<u8> {
        self.node.script.get(self.pc).copied()
    }

    #[inline]
    pub(crate) fn jump_to(&mut self, offset: usize) {
        self.pc = offset;
    }

    #[inline]
    pub(crate) fn advance(&mut self, n: usize) {
        self.pc += n;
    }

    /// Bytes left after the cursor. Every encoded element takes at least one, so this bounds
    /// element counts read from the stream.
    #[inline]
    pub(crate) fn remaining(&self) -> usize {
        self.node.script.len().saturating_sub(self.pc)
    }

    fn read_array<const N: usize>(&mut self) -> VmResult<[u8; N]> {
        let end = self.pc + N;
        match self.node.script.get(self.pc..end) {
            Some(bytes) => {
                let mut out = [0u8; N];
                out.copy_from_slice(bytes);
                self.pc = end;
                Ok(out)
            }
            None => Err(self.malformed("unexpected end of bytecode")),
        }
    }

    #[inline]
    pub fn read_u8(&mut self) -> VmResult<u8> {
        let [byte] = self.read_array::<1>()?;
        Ok(byte)
    }

    pub fn read_u16(&mut self) -> VmResult<u16> {
        Ok(u16::from_le_bytes(self.read_array()?))
    }

    pub fn read_u32(&mut self) -> VmResult<u32> {
        Ok(u32::from_le_bytes(self.read_array()?))
    }

    pub fn read_i32(&mut self) -> VmResult<i32> {
        Ok(i32::from_le_bytes(self.read_array()?))
    }

    pub fn read_i64(&mut self) -> VmResult<i64> {
        Ok(i64::from_le_bytes(self.read_array()?))
    }

    pub fn read_u64(&mut self) -> VmResult<u64> {
        Ok(u64::from_le_bytes(self.read_array()?))
    }

    pub fn read_f32(&mut self) -> VmResult<f32> {
        Ok(f32::from_le_bytes(self.read_array()?))
    }

    pub fn read_f64(&mut self) -> VmResult<f64> {
        Ok(f64::from_le_bytes(self.read_array()?))
    }

    /// Reads a code offset operand.
    pub fn read_skip(&mut self) -> VmResult<usize> {
        Ok(self.read_u32()? as usize)
    }

    pub fn read_cstr(&mut self) -> VmResult<String> {
        let rest = self.node.script.get(self.pc..).unwrap_or_default();
        match rest.iter().position(|&b| b == 0) {
            Some(len) => {
                let text = String::from_utf8_lossy(&rest[..len]).into_owned();
                self.pc += len + 1;
                Ok(text)
            }
            None => Err(self.malformed("unterminated string constant")),
        }
    }

    /// `None` when the operand marks a property that is missing at runtime.
    pub fn read_property(&mut self, program: &Program) -> VmResult<Option<Arc<Property>>> {
        let id = self.read_u32()?;
        if id == NULL_INDEX {
            return Ok(None);
        }
        match program.property(PropertyId(id)) {
            Some(property) => Ok(Some(Arc::clone(property))),
            None => Err(self.malformed(&format!("unknown property index {id}"))),
        }
    }

    pub fn read_name(&mut self, program: &Program) -> VmResult<Name> {
        let idx = self.read_u32()?;
        match program.name(idx) {
            Some(name) => Ok(name.clone()),
            None => Err(self.malformed(&format!("unknown name index {idx}"))),
        }
    }

    pub fn read_function(&mut self, program: &Program) -> VmResult<Arc<Function>> {
        let id = self.read_u32()?;
        match program.function(FunctionId(id)) {
            Some(function) => Ok(Arc::clone(function)),
            None => Err(self.malformed(&format!("unknown function index {id}"))),
        }
    }

    pub fn read_class(&mut self, program: &Program) -> VmResult<Option<ClassId>> {
        let id = self.read_u32()?;
        if id == NULL_INDEX {
            return Ok(None);
        }
        match program.class(ClassId(id)) {
            Some(_) => Ok(Some(ClassId(id))),
            None => Err(self.malformed(&format!("unknown class index {id}"))),
        }
    }

    pub(crate) fn expect_opcode(&mut self, expected: Opcode) -> VmResult<()> {
        let byte = self.read_u8()?;
        if byte != expected as u8 {
            self.pc -= 1;
            return Err(self.malformed(&format!("expected {expected:?}, found byte {byte:#04x}")));
        }
        Ok(())
    }

    // ---- native argument helpers ----

    fn next_compiled_in(&mut self) -> Option<usize> {
        let params = self.node.params();
        while let Some(property) = params.get(self.compiled_in) {
            let idx = self.compiled_in;
            self.compiled_in += 1;
            if !property.is_return_parm() {
                return Some(idx);
            }
        }
        None
    }

    /// Evaluates the next by-value argument of a native call.
    pub fn arg(&mut self, vm: &mut Vm, ctx: &mut ExecutionContext) -> VmResult<Value> {
        if self.has_code() {
            let this = self.object;
            let mut value = Value::None;
            vm.step(ctx, self, this, Some(&mut value))?;
            return Ok(value);
        }
        match self.next_compiled_in() {
            Some(idx) => Ok(vm.read_place(&Place::new(self.locals, idx)).cloned().unwrap_or_default()),
            None => Err(self.malformed("native read past its parameter list")),
        }
    }

    /// Evaluates the next out/reference argument as an lvalue.
    pub fn arg_ref(&mut self, vm: &mut Vm, ctx: &mut ExecutionContext) -> VmResult<Option<Place>> {
        if self.has_code() {
            let this = self.object;
            self.most_recent_place = None;
            vm.step(ctx, self, this, None)?;
            return Ok(self.most_recent_place.take());
        }
        match self.next_compiled_in() {
            Some(idx) => Ok(Some(Place::new(self.locals, idx))),
            None => Err(self.malformed("native read past its parameter list")),
        }
    }

    /// Consumes the `EndFunctionParms` terminating a native's argument list.
    pub fn finish(&mut self) -> VmResult<()> {
        if self.has_code() {
            self.expect_opcode(Opcode::EndFunctionParms)?;
        }
        Ok(())
    }
}
