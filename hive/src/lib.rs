//! Host-side bridge for a swarm of script VMs.
//!
//! A [`Bridge`] owns every loaded VM behind a [`VmHandle`], binds host
//! functions into scripts through numbered hook slots, runs the
//! init-once/step-many protocol and moves neighbor data and messages in and
//! out of each VM. [`SwarmHub`] drives a whole group of agents per tick.
pub mod controller;
pub mod environment;
pub mod hooks;
pub mod host;
pub mod hub;
pub mod marshal;
pub mod printer;
pub mod registry;
mod report;

#[cfg(test)]
mod testing;

pub use controller::{ExecState, StepOutcome};
pub use environment::POSITION_GLOBAL;
pub use hooks::{DEFAULT_HOOK_CAPACITY, HookError, HookSlot, HookTable, INIT_FUNCTION};
pub use host::{HookCall, HostFn, HostMember, HostModule, HostRuntime};
pub use hub::{Position, PositionBoard, SwarmHub, TickReport};
pub use marshal::HostValue;
pub use printer::PrintSink;
pub use registry::{
    Bridge, BridgeCreateInfo, BridgeError, LoadError, MAX_VMS, VmHandle, VmInstance,
};
