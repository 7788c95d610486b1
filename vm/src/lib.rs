//! A small stack machine that runs swarm scripts.
//!
//! Values are reference counted and a [`Vm`] is confined to the thread that
//! created it. Hosts drive it through [`Vm::execute_script`],
//! [`Vm::function_call`] and the message and neighbor accessors.
mod builtins;
pub mod interpreter;
pub mod messages;
pub mod neighbors;
pub mod strings;
pub mod value;

pub use interpreter::{Fault, NativeFn, RuntimeError, Vm, VmCreateInfo, VmState};
pub use messages::{InboundMessage, MessageQueues};
pub use neighbors::{Neighbor, NeighborSet};
pub use strings::{StringId, StringTable};
pub use value::{Closure, Table, TableKey, TableRef, Value};
