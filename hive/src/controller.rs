//! Per-tick execution protocol.
//!
//! The first [`Bridge::step`] of a VM runs its top-level body and `init`;
//! every step then delivers queued messages, calls `step` and releases the
//! strings the tick left unreferenced.
use vm::RuntimeError;

use crate::registry::VmInstance;
use crate::{Bridge, BridgeError, VmHandle, report};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecState {
    Unstepped,
    Stepped,
    Faulted,
    Destroyed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Ready,
    /// The VM is not ready; carries the diagnostic for its fault.
    Faulted(String),
}

impl Bridge {
    /// Run one tick of `vm`. Script faults are reported through the outcome
    /// and leave every other VM alone.
    pub fn step(&mut self, vm: VmHandle) -> Result<StepOutcome, BridgeError> {
        let instance = self.instance_mut(vm)?;
        if !instance.vm.is_ready() {
            instance.state = ExecState::Faulted;
            log::debug!("{vm}: not ready, step skipped");
            return Ok(StepOutcome::Faulted(report::diagnose(instance)));
        }

        match run_tick(instance) {
            Ok(()) => Ok(StepOutcome::Ready),
            Err(err) => {
                instance.state = ExecState::Faulted;
                let diagnostic = report::diagnose(instance);
                log::debug!("{vm}: faulted: {err}\n{}", instance.vm.dump());
                log::error!("{diagnostic}");
                Ok(StepOutcome::Faulted(diagnostic))
            }
        }
    }

    /// Whether `vm` has stopped being ready.
    pub fn done(&self, vm: VmHandle) -> Result<bool, BridgeError> {
        Ok(!self.require(vm)?.vm.is_ready())
    }

    pub fn exec_state(&self, vm: VmHandle) -> Result<ExecState, BridgeError> {
        Ok(self.require(vm)?.state)
    }
}

fn run_tick(instance: &mut VmInstance) -> Result<(), RuntimeError> {
    if !instance.stepped {
        instance.stepped = true;
        instance.vm.execute_script()?;
        instance.vm.function_call("init", &[])?;
        instance.state = ExecState::Stepped;
        log::debug!("{}: initialized", instance.handle);
    }
    instance.vm.process_inbound()?;
    instance.vm.function_call("step", &[])?;
    instance.vm.collect_strings();
    Ok(())
}
