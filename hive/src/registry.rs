use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use bytecode::{DebugTable, DebugTableError, Program, ProgramError};
use vm::{Value, Vm, VmCreateInfo};

use crate::controller::ExecState;
use crate::hooks::{DEFAULT_HOOK_CAPACITY, HookTable};
use crate::host::HostRuntime;
use crate::printer::{self, PrintSink};
use crate::report;

pub const MAX_VMS: usize = 15;

/// Index of a loaded VM. Handles are handed out in load order and are not
/// reused until [`Bridge::destroy_all`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VmHandle(usize);

impl VmHandle {
    pub(crate) fn new(index: usize) -> Self {
        Self(index)
    }

    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for VmHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "vm#{}", self.0)
    }
}

#[derive(Debug)]
pub enum LoadError {
    Capacity { max: usize },
    Io { path: PathBuf, source: io::Error },
    DebugRejected {
        path: PathBuf,
        error: DebugTableError,
    },
    BytecodeRejected { path: PathBuf, error: ProgramError },
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Capacity { max } => {
                write!(f, "cannot load more than {max} virtual machines")
            }
            Self::Io { path, source } => write!(f, "{}: {source}", path.display()),
            Self::DebugRejected { path, error } => {
                write!(
                    f,
                    "{}: can't load debug information: {error}",
                    path.display()
                )
            }
            Self::BytecodeRejected { path, error } => {
                write!(f, "{}: can't set the bytecode: {error}", path.display())
            }
        }
    }
}

impl std::error::Error for LoadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Capacity { .. } => None,
            Self::Io { source, .. } => Some(source),
            Self::DebugRejected { error, .. } => Some(error),
            Self::BytecodeRejected { error, .. } => Some(error),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeError {
    UnknownVm(VmHandle),
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownVm(vm) => write!(f, "unknown virtual machine {vm}"),
        }
    }
}

impl std::error::Error for BridgeError {}

#[derive(Debug, Clone)]
pub struct BridgeCreateInfo {
    pub max_vms: usize,
    pub hook_capacity: usize,
    /// Template for every VM; `context_id` is replaced on load.
    pub vm: VmCreateInfo,
    /// Where `print` and `log` write.
    pub output: PrintSink,
}

impl Default for BridgeCreateInfo {
    fn default() -> Self {
        Self {
            max_vms: MAX_VMS,
            hook_capacity: DEFAULT_HOOK_CAPACITY,
            vm: VmCreateInfo::default(),
            output: PrintSink::default(),
        }
    }
}

/// One loaded script and the VM running it.
pub struct VmInstance {
    pub(crate) handle: VmHandle,
    pub(crate) script: PathBuf,
    pub(crate) vm: Vm,
    pub(crate) debug: DebugTable,
    pub(crate) state: ExecState,
    pub(crate) stepped: bool,
}

impl VmInstance {
    pub fn handle(&self) -> VmHandle {
        self.handle
    }

    /// Bytecode path the instance was loaded from.
    pub fn script(&self) -> &Path {
        &self.script
    }

    pub fn vm(&self) -> &Vm {
        &self.vm
    }

    pub fn debug(&self) -> &DebugTable {
        &self.debug
    }

    pub fn state(&self) -> ExecState {
        self.state
    }
}

/// Registry of live VMs plus the host side they call into.
///
/// VMs hold reference-counted values, so a bridge stays on the thread that
/// created it. Every operation names its VM explicitly.
pub struct Bridge {
    max_vms: usize,
    vm_info: VmCreateInfo,
    output: PrintSink,
    pub(crate) instances: Vec<VmInstance>,
    pub(crate) hooks: HookTable,
    pub(crate) host: HostRuntime,
}

impl Bridge {
    pub fn new(info: BridgeCreateInfo) -> Self {
        Self {
            max_vms: info.max_vms,
            vm_info: info.vm,
            output: info.output,
            instances: Vec::new(),
            hooks: HookTable::new(info.hook_capacity),
            host: HostRuntime::new(),
        }
    }

    pub fn vm_count(&self) -> usize {
        self.instances.len()
    }

    pub fn max_vms(&self) -> usize {
        self.max_vms
    }

    pub fn instance(&self, vm: VmHandle) -> Option<&VmInstance> {
        self.instances.get(vm.index())
    }

    pub(crate) fn instance_mut(&mut self, vm: VmHandle) -> Result<&mut VmInstance, BridgeError> {
        self.instances
            .get_mut(vm.index())
            .ok_or(BridgeError::UnknownVm(vm))
    }

    pub(crate) fn require(&self, vm: VmHandle) -> Result<&VmInstance, BridgeError> {
        self.instance(vm).ok_or(BridgeError::UnknownVm(vm))
    }

    /// Load a compiled script and its debug table into a new VM.
    ///
    /// The new VM gets `print` and `log` plus the constants `True` and
    /// `False`. Nothing is registered when loading fails.
    pub fn load(
        &mut self,
        bytecode_path: impl AsRef<Path>,
        debug_path: impl AsRef<Path>,
        context_id: u16,
    ) -> Result<VmHandle, LoadError> {
        let bytecode_path = bytecode_path.as_ref();
        let debug_path = debug_path.as_ref();
        if self.instances.len() >= self.max_vms {
            return Err(LoadError::Capacity { max: self.max_vms });
        }

        let debug_bytes = read(debug_path)?;
        let debug = DebugTable::from_bytes(&debug_bytes).map_err(|error| LoadError::DebugRejected {
            path: debug_path.to_owned(),
            error,
        })?;
        let image = read(bytecode_path)?;
        let program = Program::from_bytes(&image).map_err(|error| LoadError::BytecodeRejected {
            path: bytecode_path.to_owned(),
            error,
        })?;

        self.host.bootstrap();

        let mut vm = Vm::new(
            program,
            VmCreateInfo {
                context_id,
                ..self.vm_info.clone()
            },
        );
        printer::install(&mut vm, self.output.clone());
        vm.set_global("True", Value::Int(1));
        vm.set_global("False", Value::Int(0));

        let handle = VmHandle::new(self.instances.len());
        self.instances.push(VmInstance {
            handle,
            script: bytecode_path.to_owned(),
            vm,
            debug,
            state: ExecState::Unstepped,
            stepped: false,
        });
        log::debug!(
            "{handle}: loaded {} (context id {context_id})",
            bytecode_path.display()
        );
        Ok(handle)
    }

    /// Tear every VM down in load order and empty the registry.
    ///
    /// A VM that already faulted is diagnosed instead of having its
    /// `destroy` function called. Returns the diagnostics that were logged.
    pub fn destroy_all(&mut self) -> Vec<String> {
        let mut diagnostics = Vec::new();
        for mut instance in self.instances.drain(..) {
            if instance.vm.is_ready() {
                let _ = instance.vm.function_call("destroy", &[]);
            }
            if !instance.vm.is_ready() {
                let diagnostic = report::diagnose(&instance);
                log::debug!(
                    "{}: state at teardown\n{}",
                    instance.handle,
                    instance.vm.dump()
                );
                log::error!("{diagnostic}");
                diagnostics.push(diagnostic);
            }
            instance.state = ExecState::Destroyed;
            log::debug!("{}: destroyed", instance.handle);
        }
        log::info!("Script execution stopped.");
        diagnostics
    }
}

fn read(path: &Path) -> Result<Vec<u8>, LoadError> {
    fs::read(path).map_err(|source| LoadError::Io {
        path: path.to_owned(),
        source,
    })
}
