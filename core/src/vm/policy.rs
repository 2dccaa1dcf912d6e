//! Host collaborators the interpreter consults but does not implement.

use tracing::debug;

use crate::val::{ObjectRef, Value};

use super::{Function, ObjectStore};

/// Where a call should execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Callspace(u8);

impl Callspace {
    pub const ABSORBED: Callspace = Callspace(0);
    pub const LOCAL: Callspace = Callspace(0b01);
    pub const REMOTE: Callspace = Callspace(0b10);
    pub const BOTH: Callspace = Callspace(0b11);

    pub fn is_local(self) -> bool {
        self.0 & Self::LOCAL.0 != 0
    }

    pub fn is_remote(self) -> bool {
        self.0 & Self::REMOTE.0 != 0
    }
}

/// Network-authority policy for functions flagged as net functions.
pub trait CallspacePolicy {
    fn function_callspace(&self, object: ObjectRef, function: &Function) -> Callspace;

    /// Forwards a call to the replication channel with its bound parameter values.
    fn call_remote(&mut self, object: ObjectRef, function: &Function, parms: &[Value]);
}

/// Everything runs locally; remote dispatch is dropped.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalCallspace;

impl CallspacePolicy for LocalCallspace {
    fn function_callspace(&self, _object: ObjectRef, _function: &Function) -> Callspace {
        Callspace::LOCAL
    }

    fn call_remote(&mut self, object: ObjectRef, function: &Function, _parms: &[Value]) {
        debug!(target: "bcvm::vm", %object, function = %function.name, "remote call dropped by local-only policy");
    }
}

/// Transactional-memory provider backing the transaction opcodes.
pub trait TransactionalMemory {
    fn begin(&mut self, objects: &ObjectStore);

    fn commit(&mut self);

    /// Rolls `objects` back to the state captured by the matching `begin`.
    fn abort(&mut self, objects: &mut ObjectStore);

    fn depth(&self) -> usize;
}

/// Snapshot-per-scope provider. Covers object state only; locals blocks are not rolled back.
#[derive(Debug, Default, Clone)]
pub struct SnapshotTransactions {
    snapshots: Vec<ObjectStore>,
}

impl TransactionalMemory for SnapshotTransactions {
    fn begin(&mut self, objects: &ObjectStore) {
        self.snapshots.push(objects.clone());
    }

    fn commit(&mut self) {
        self.snapshots.pop();
    }

    fn abort(&mut self, objects: &mut ObjectStore) {
        if let Some(snapshot) = self.snapshots.pop() {
            *objects = snapshot;
        }
    }

    fn depth(&self) -> usize {
        self.snapshots.len()
    }
}
