//! Transactional regions.
//!
//! `AutoRtfmTransact` drives its own body up to the `AutoRtfmStopTransact` carrying the same
//! id. An abort, whether requested by the body or forced by the runaway guard, rolls the object
//! store back and redirects the cursor to the region's abort target.

use tracing::debug;

use crate::vm::bytecode::{Opcode, StopTransactMode};
use crate::vm::context::ExecutionContext;
use crate::vm::signal::VmResult;
use crate::vm::vm::{Frame, Vm};

impl Vm {
    fn abort_region(&mut self, ctx: &mut ExecutionContext, frame: &mut Frame, target: usize) -> VmResult<()> {
        ctx.abort_transaction(&mut self.objects);
        debug!(target: "bcvm::vm", function = %frame.node.name, target, "transaction aborted");
        if target > frame.node.script.len() {
            return Err(frame.malformed(&format!("transaction abort target {target} is outside the script")));
        }
        frame.jump_to(target);
        Ok(())
    }

    pub(super) fn exec_transact(&mut self, ctx: &mut ExecutionContext, frame: &mut Frame) -> VmResult<()> {
        let id = frame.read_i32()?;
        let abort_target = frame.read_skip()?;
        ctx.begin_transaction(&self.objects);

        loop {
            let Some(byte) = frame.peek_u8() else {
                ctx.abort_transaction(&mut self.objects);
                return Err(frame.malformed(&format!("transaction {id} has no matching stop")));
            };

            if byte == Opcode::AutoRtfmStopTransact as u8 {
                frame.advance(1);
                let stop_id = frame.read_i32()?;
                let mode = frame.read_u8()?;
                if stop_id != id {
                    continue;
                }
                let Some(mode) = StopTransactMode::from_byte(mode) else {
                    ctx.abort_transaction(&mut self.objects);
                    return Err(frame.malformed(&format!("unknown stop-transaction mode {mode}")));
                };
                return match mode {
                    StopTransactMode::Graceful => {
                        ctx.commit_transaction();
                        Ok(())
                    }
                    StopTransactMode::AbortingExit => self.abort_region(ctx, frame, abort_target),
                    StopTransactMode::AbortingExitAndAbortParent => {
                        self.abort_region(ctx, frame, abort_target)?;
                        ctx.request_transaction_abort();
                        Ok(())
                    }
                };
            }

            if byte == Opcode::Return as u8 {
                ctx.commit_transaction();
                return Ok(());
            }

            let this = frame.object;
            if let Err(aborted) = self.step(ctx, frame, this, None) {
                ctx.abort_transaction(&mut self.objects);
                return Err(aborted);
            }

            if ctx.take_transaction_abort() || ctx.runaway_exceeded() || ctx.ran_away() {
                return self.abort_region(ctx, frame, abort_target);
            }
        }
    }

    /// A stop reached outside its region is consumed without effect.
    pub(super) fn exec_stop_transact(&mut self, frame: &mut Frame) -> VmResult<()> {
        frame.read_i32()?;
        frame.read_u8()?;
        Ok(())
    }

    pub(super) fn exec_abort_if_not(&mut self, ctx: &mut ExecutionContext, frame: &mut Frame) -> VmResult<()> {
        if !self.eval(ctx, frame)?.as_bool() {
            ctx.request_transaction_abort();
        }
        Ok(())
    }
}
