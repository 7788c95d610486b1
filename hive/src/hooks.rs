//! Slot-indexed table of host callables and the trampolines scripts call
//! them through.
//!
//! A slot is process wide: whichever VM calls the function installed for a
//! slot reaches the callable currently bound to it, and the VM's handle is
//! passed along in [`HookCall::vm`]. Binding a slot again replaces the
//! callable for every VM that installed it.
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use parking_lot::RwLock;
use vm::{NativeFn, RuntimeError, Value, Vm};

use crate::host::{HookCall, HostFn, HostModule};
use crate::marshal::{HostValue, to_host, to_vm};
use crate::{Bridge, VmHandle};

pub const DEFAULT_HOOK_CAPACITY: usize = 20;

/// Host function invoked by [`Bridge::register_init`].
pub const INIT_FUNCTION: &str = "host_init";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookError {
    SlotOutOfRange { slot: usize, capacity: usize },
    NoModuleImported,
    ModuleNotFound(String),
    UnresolvedName { module: String, name: String },
    NotCallable { module: String, name: String },
    UnknownVm(VmHandle),
    InitFailed(String),
}

impl fmt::Display for HookError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SlotOutOfRange { slot, capacity } => {
                write!(f, "hook slot {slot} is out of range (capacity {capacity})")
            }
            Self::NoModuleImported => write!(f, "no host module has been imported"),
            Self::ModuleNotFound(name) => write!(f, "host module '{name}' is not installed"),
            Self::UnresolvedName { module, name } => {
                write!(f, "can't find function '{name}' in module '{module}'")
            }
            Self::NotCallable { module, name } => {
                write!(f, "'{name}' in module '{module}' is not callable")
            }
            Self::UnknownVm(vm) => write!(f, "unknown virtual machine {vm}"),
            Self::InitFailed(message) => write!(f, "{INIT_FUNCTION} failed: {message}"),
        }
    }
}

impl std::error::Error for HookError {}

#[derive(Clone)]
pub struct HookSlot {
    pub name: String,
    pub callable: HostFn,
}

impl fmt::Debug for HookSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookSlot").field("name", &self.name).finish_non_exhaustive()
    }
}

/// Shared by the bridge and every trampoline it installed.
#[derive(Debug, Clone)]
pub struct HookTable {
    slots: Arc<RwLock<Vec<Option<HookSlot>>>>,
}

impl HookTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Arc::new(RwLock::new(vec![None; capacity])),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.read().len()
    }

    pub fn bind(&self, slot: usize, name: &str, callable: HostFn) -> Result<(), HookError> {
        let mut slots = self.slots.write();
        let capacity = slots.len();
        let entry = slots
            .get_mut(slot)
            .ok_or(HookError::SlotOutOfRange { slot, capacity })?;
        if let Some(previous) = entry.as_ref() {
            log::debug!(
                "hook slot {slot}: rebinding '{}' to '{name}'",
                previous.name
            );
        }
        *entry = Some(HookSlot {
            name: name.to_owned(),
            callable,
        });
        Ok(())
    }

    pub fn slot(&self, slot: usize) -> Option<HookSlot> {
        self.slots.read().get(slot).cloned().flatten()
    }

    /// Native function that dispatches through `slot` on behalf of `vm`.
    pub fn trampoline(&self, slot: usize, vm: VmHandle) -> NativeFn {
        let table = self.clone();
        Rc::new(move |machine: &mut Vm| table.dispatch(machine, slot, vm))
    }

    fn dispatch(&self, machine: &mut Vm, slot: usize, vm: VmHandle) -> Result<Value, RuntimeError> {
        let Some(bound) = self.slot(slot) else {
            let message = format!("hook slot {slot} is not bound");
            return Err(RuntimeError::Native(message));
        };

        let mut args = Vec::with_capacity(machine.local_count().saturating_sub(1));
        for idx in 1..machine.local_count() {
            let value = machine.local(idx)?;
            args.push(to_host(machine, &value));
        }

        let call = HookCall { vm: Some(vm), args };
        let result = (bound.callable)(&call).map_err(|message| {
            RuntimeError::Native(format!("hook '{}': {message}", bound.name))
        })?;
        if matches!(result, HostValue::Text(_) | HostValue::List(_)) {
            log::debug!(
                "hook '{}': {} result reaches the script as nil",
                bound.name,
                result.type_name()
            );
        }
        Ok(to_vm(machine, &result))
    }
}

// ── registration ───────────────────────────────────────────────────

impl Bridge {
    /// Make `module` available to [`Bridge::import_module`].
    pub fn install_module(&mut self, module: HostModule) {
        self.host.install(module);
    }

    /// Select the module hooks and the init function are resolved in.
    pub fn import_module(&mut self, name: &str) -> Result<(), HookError> {
        self.host.import(name)
    }

    /// Bind `slot` to the imported module's `name` and expose it to the
    /// scripts of `vm` as a global function of the same name.
    pub fn register_hook(
        &mut self,
        vm: VmHandle,
        slot: usize,
        name: &str,
    ) -> Result<(), HookError> {
        if self.instance(vm).is_none() {
            return Err(HookError::UnknownVm(vm));
        }
        let capacity = self.hooks.capacity();
        if slot >= capacity {
            return Err(HookError::SlotOutOfRange { slot, capacity });
        }
        let callable = self.host.resolve(name)?;
        self.hooks.bind(slot, name, callable)?;

        let trampoline = self.hooks.trampoline(slot, vm);
        let instance = self
            .instance_mut(vm)
            .map_err(|_| HookError::UnknownVm(vm))?;
        let closure = instance.vm.register_native(name, trampoline);
        instance.vm.set_global(name, closure);
        log::debug!("{vm}: hook '{name}' bound to slot {slot}");
        Ok(())
    }

    /// Call the imported module's init function once, outside any VM.
    pub fn register_init(&mut self) -> Result<(), HookError> {
        let init = self.host.resolve(INIT_FUNCTION)?;
        let call = HookCall {
            vm: None,
            args: Vec::new(),
        };
        init(&call).map_err(HookError::InitFailed)?;
        log::debug!("{INIT_FUNCTION} completed");
        Ok(())
    }
}
