//! Host modules: named collections of callables and plain attributes that
//! hooks are resolved against.
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::{HookError, HostValue, VmHandle};

/// Arguments of one host call. `vm` is the calling VM, or `None` for calls
/// made outside any VM such as the init function.
#[derive(Debug, Clone, PartialEq)]
pub struct HookCall {
    pub vm: Option<VmHandle>,
    pub args: Vec<HostValue>,
}

pub type HostFn = Arc<dyn Fn(&HookCall) -> Result<HostValue, String> + Send + Sync>;

#[derive(Clone)]
pub enum HostMember {
    Function(HostFn),
    Attribute(HostValue),
}

impl fmt::Debug for HostMember {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Function(_) => write!(f, "Function(..)"),
            Self::Attribute(value) => f.debug_tuple("Attribute").field(value).finish(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HostModule {
    name: String,
    members: HashMap<String, HostMember>,
}

impl HostModule {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            members: HashMap::new(),
        }
    }

    pub fn function<F>(mut self, name: &str, func: F) -> Self
    where
        F: Fn(&HookCall) -> Result<HostValue, String> + Send + Sync + 'static,
    {
        self.members
            .insert(name.to_owned(), HostMember::Function(Arc::new(func)));
        self
    }

    pub fn attribute(mut self, name: &str, value: impl Into<HostValue>) -> Self {
        self.members
            .insert(name.to_owned(), HostMember::Attribute(value.into()));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get(&self, name: &str) -> Option<&HostMember> {
        self.members.get(name)
    }
}

/// Installed modules plus the one currently imported.
#[derive(Debug, Default)]
pub struct HostRuntime {
    modules: HashMap<String, HostModule>,
    imported: Option<String>,
    bootstrapped: bool,
}

impl HostRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// One-time bring-up. Returns `true` only on the first call.
    pub fn bootstrap(&mut self) -> bool {
        if self.bootstrapped {
            return false;
        }
        self.bootstrapped = true;
        log::info!("host runtime initialized");
        true
    }

    pub fn is_bootstrapped(&self) -> bool {
        self.bootstrapped
    }

    /// Make `module` importable. A module with the same name is replaced.
    pub fn install(&mut self, module: HostModule) {
        log::debug!("installing host module '{}'", module.name);
        self.modules.insert(module.name.clone(), module);
    }

    pub fn import(&mut self, name: &str) -> Result<(), HookError> {
        if !self.modules.contains_key(name) {
            return Err(HookError::ModuleNotFound(name.to_owned()));
        }
        log::debug!("imported host module '{name}'");
        self.imported = Some(name.to_owned());
        Ok(())
    }

    pub fn imported(&self) -> Option<&HostModule> {
        self.imported.as_ref().and_then(|name| self.modules.get(name))
    }

    /// Look `name` up in the imported module and require a callable.
    pub fn resolve(&self, name: &str) -> Result<HostFn, HookError> {
        let module = self.imported().ok_or(HookError::NoModuleImported)?;
        match module.get(name) {
            Some(HostMember::Function(func)) => Ok(func.clone()),
            Some(HostMember::Attribute(_)) => Err(HookError::NotCallable {
                module: module.name.clone(),
                name: name.to_owned(),
            }),
            None => Err(HookError::UnresolvedName {
                module: module.name.clone(),
                name: name.to_owned(),
            }),
        }
    }
}
