use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Result, bail};
use tracing::{debug, warn};

use crate::util::fast_map::{FastHashMap, fast_hash_map_new};
use crate::val::{ObjectRef, Value};

use super::{
    Aborted, Callspace, CallspacePolicy, Frame, FrameInfo, Function, InstrumentationSignal, LocalCallspace,
    ObjectStore, ScriptExceptionInfo, ScriptExceptionType, SignalSink, SnapshotTransactions, TransactionalMemory,
    VmConfig, VmResult,
};

static DEFAULT_MAX_LOOP_ITERATIONS: AtomicU32 = AtomicU32::new(1_000_000);
static DEFAULT_RECURSION_LIMIT: AtomicU32 = AtomicU32::new(120);

fn positive(value: i64, what: &str) -> Result<u32> {
    if value <= 0 || value > u32::MAX as i64 {
        bail!("{what} must be a positive 32-bit value, got {value}");
    }
    Ok(value as u32)
}

/// Sets the branch ceiling picked up by contexts created afterwards.
pub fn set_default_max_loop_iterations(value: i64) -> Result<()> {
    DEFAULT_MAX_LOOP_ITERATIONS.store(positive(value, "max_loop_iterations")?, Ordering::Relaxed);
    Ok(())
}

pub fn set_default_recursion_limit(value: i64) -> Result<()> {
    DEFAULT_RECURSION_LIMIT.store(positive(value, "recursion_limit")?, Ordering::Relaxed);
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuardLimits {
    max_loop_iterations: u32,
    recursion_limit: u32,
    time_limit: Option<Duration>,
}

impl Default for GuardLimits {
    fn default() -> Self {
        Self {
            max_loop_iterations: DEFAULT_MAX_LOOP_ITERATIONS.load(Ordering::Relaxed),
            recursion_limit: DEFAULT_RECURSION_LIMIT.load(Ordering::Relaxed),
            time_limit: None,
        }
    }
}

impl GuardLimits {
    pub fn max_loop_iterations(&self) -> u32 {
        self.max_loop_iterations
    }

    pub fn recursion_limit(&self) -> u32 {
        self.recursion_limit
    }

    pub fn time_limit(&self) -> Option<Duration> {
        self.time_limit
    }

    pub fn set_max_loop_iterations(&mut self, value: i64) -> Result<()> {
        self.max_loop_iterations = positive(value, "max_loop_iterations")?;
        Ok(())
    }

    pub fn set_recursion_limit(&mut self, value: i64) -> Result<()> {
        self.recursion_limit = positive(value, "recursion_limit")?;
        Ok(())
    }

    pub fn set_time_limit(&mut self, limit: Option<Duration>) {
        self.time_limit = limit;
    }
}

/// Per-thread execution state passed explicitly into every entry point.
///
/// Holds the runaway/recursion guard, the signal sink and the host policies. The host owns its
/// lifecycle: call [`reset_runaway`](Self::reset_runaway) before each top-level script entry.
pub struct ExecutionContext {
    limits: GuardLimits,
    runaway: u64,
    recurse: u32,
    ran_away: bool,
    timed_out: bool,
    deadline: Option<Instant>,
    script_entry_tag: u32,
    transaction_abort_requested: bool,
    max_access_violation_warnings: u32,
    short_warnings: bool,
    access_violations: FastHashMap<ObjectRef, u32>,
    sink: Option<Box<dyn SignalSink>>,
    callspace: Box<dyn CallspacePolicy>,
    transactions: Box<dyn TransactionalMemory>,
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::with_limits(GuardLimits::default())
    }

    pub fn with_limits(limits: GuardLimits) -> Self {
        Self {
            limits,
            runaway: 0,
            recurse: 0,
            ran_away: false,
            timed_out: false,
            deadline: None,
            script_entry_tag: 0,
            transaction_abort_requested: false,
            max_access_violation_warnings: 0,
            short_warnings: false,
            access_violations: fast_hash_map_new(),
            sink: None,
            callspace: Box::new(LocalCallspace),
            transactions: Box::<SnapshotTransactions>::default(),
        }
    }

    pub fn with_config(config: &VmConfig) -> Result<Self> {
        config.validate()?;
        let mut limits = GuardLimits::default();
        limits.set_max_loop_iterations(config.max_loop_iterations as i64)?;
        limits.set_recursion_limit(config.recursion_limit as i64)?;
        limits.set_time_limit(config.time_limit_ms.map(Duration::from_millis));
        let mut ctx = Self::with_limits(limits);
        ctx.max_access_violation_warnings = config.max_access_violation_warnings;
        ctx.short_warnings = config.short_script_warnings;
        Ok(ctx)
    }

    pub fn limits(&self) -> &GuardLimits {
        &self.limits
    }

    pub fn limits_mut(&mut self) -> &mut GuardLimits {
        &mut self.limits
    }

    pub fn set_sink(&mut self, sink: Option<Box<dyn SignalSink>>) {
        self.sink = sink;
    }

    pub fn set_callspace_policy(&mut self, policy: Box<dyn CallspacePolicy>) {
        self.callspace = policy;
    }

    pub fn set_transactional_memory(&mut self, provider: Box<dyn TransactionalMemory>) {
        self.transactions = provider;
    }

    // ---- runaway / recursion guard ----

    /// Clears the guard and arms the time budget. Hosts call this before a top-level entry.
    pub fn reset_runaway(&mut self) {
        self.runaway = 0;
        self.recurse = 0;
        self.ran_away = false;
        self.timed_out = false;
        self.deadline = self.limits.time_limit.map(|limit| Instant::now() + limit);
    }

    /// Counts one branch. Every 256th branch also enforces the time budget.
    #[inline]
    pub fn add_runaway(&mut self) {
        self.runaway += 1;
        if self.runaway & 0xFF == 0 {
            self.enforce_time_limit();
        }
    }

    fn enforce_time_limit(&mut self) {
        if let Some(deadline) = self.deadline
            && Instant::now() >= deadline
        {
            self.runaway = self.limits.max_loop_iterations as u64 + 1;
            self.ran_away = true;
            self.timed_out = true;
        }
    }

    #[inline]
    pub fn runaway_exceeded(&self) -> bool {
        self.runaway > self.limits.max_loop_iterations as u64
    }

    /// Resets the branch counter and latches the ran-away state; returns the signal text.
    pub(crate) fn trip_runaway(&mut self) -> String {
        let message = if self.timed_out {
            "Computation timed out".to_string()
        } else {
            format!(
                "Runaway loop detected (over {} iterations)",
                self.limits.max_loop_iterations
            )
        };
        self.runaway = 0;
        self.ran_away = true;
        message
    }

    /// Returns false, leaving the depth unchanged, when the call would exceed the limit.
    pub(crate) fn enter_recursion(&mut self) -> bool {
        if self.recurse + 1 > self.limits.recursion_limit {
            return false;
        }
        self.recurse += 1;
        true
    }

    pub(crate) fn leave_recursion(&mut self) {
        self.recurse = self.recurse.saturating_sub(1);
    }

    pub(crate) fn latch_ran_away(&mut self) {
        self.ran_away = true;
    }

    pub fn runaway(&self) -> u64 {
        self.runaway
    }

    pub fn recursion_depth(&self) -> u32 {
        self.recurse
    }

    pub fn ran_away(&self) -> bool {
        self.ran_away
    }

    pub fn timed_out(&self) -> bool {
        self.timed_out
    }

    // ---- script entry tracking ----

    pub(crate) fn enter_script(&mut self) {
        self.script_entry_tag += 1;
    }

    pub(crate) fn leave_script(&mut self) {
        self.script_entry_tag = self.script_entry_tag.saturating_sub(1);
    }

    /// Nesting depth of host entries currently on the stack.
    pub fn script_entry_tag(&self) -> u32 {
        self.script_entry_tag
    }

    // ---- signal channel ----

    pub fn is_debugging(&self) -> bool {
        self.sink.is_some()
    }

    fn should_log(&mut self, object: ObjectRef, kind: ScriptExceptionType) -> bool {
        if kind.is_debug_signal() {
            return false;
        }
        if kind == ScriptExceptionType::AccessViolation && self.max_access_violation_warnings > 0 {
            let count = self.access_violations.entry(object).or_insert(0);
            *count += 1;
            return *count <= self.max_access_violation_warnings;
        }
        true
    }

    /// Reports a script exception; returns `Err` only for the aborting severities.
    pub fn raise(
        &mut self,
        object: ObjectRef,
        frame: &Frame,
        info: ScriptExceptionInfo,
        stack: &[FrameInfo],
    ) -> VmResult<()> {
        if self.should_log(object, info.kind) {
            let trace: String = if self.short_warnings {
                String::new()
            } else {
                stack.iter().rev().map(|entry| format!("\n\t{entry}")).collect()
            };
            warn!(
                target: "bcvm::script",
                kind = ?info.kind,
                %object,
                function = %frame.node().name,
                offset = frame.offset(),
                "{}{}",
                info.description,
                trace
            );
        }
        if let Some(sink) = self.sink.as_mut() {
            sink.on_script_exception(object, frame, &info);
        }
        if info.kind.is_aborting() {
            return Err(Aborted::signalled(info.kind));
        }
        Ok(())
    }

    pub(crate) fn instrument(&mut self, signal: InstrumentationSignal) {
        if let Some(sink) = self.sink.as_mut() {
            sink.on_instrumentation(&signal);
        }
    }

    // ---- host policies ----

    pub(crate) fn callspace(&self, object: ObjectRef, function: &Function) -> Callspace {
        if !function.is_net() {
            return Callspace::LOCAL;
        }
        self.callspace.function_callspace(object, function)
    }

    pub(crate) fn call_remote(&mut self, object: ObjectRef, function: &Function, parms: &[Value]) {
        debug!(target: "bcvm::vm", %object, function = %function.name, "dispatching remote call");
        self.callspace.call_remote(object, function, parms);
    }

    // ---- transactions ----

    pub(crate) fn begin_transaction(&mut self, objects: &ObjectStore) {
        self.transactions.begin(objects);
    }

    pub(crate) fn commit_transaction(&mut self) {
        self.transactions.commit();
    }

    pub(crate) fn abort_transaction(&mut self, objects: &mut ObjectStore) {
        self.transactions.abort(objects);
    }

    pub fn transaction_depth(&self) -> usize {
        self.transactions.depth()
    }

    /// Asks the innermost open transaction to abort at its next check.
    pub fn request_transaction_abort(&mut self) {
        if self.transaction_depth() > 0 {
            self.transaction_abort_requested = true;
        }
    }

    pub(crate) fn take_transaction_abort(&mut self) -> bool {
        std::mem::take(&mut self.transaction_abort_requested)
    }
}
