//! Conversion between VM values and host values.
//!
//! Both directions copy. Strings leaving the VM become owned byte buffers and
//! bytes entering it are interned into that VM's string table, so neither
//! side ever holds on to the other's storage.
use vm::{Value, Vm};

/// A dynamically typed host value.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum HostValue {
    #[default]
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Bytes(Vec<u8>),
    Text(String),
    List(Vec<HostValue>),
}

impl HostValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Bytes(_) => "bytes",
            Self::Text(_) => "text",
            Self::List(_) => "list",
        }
    }
}

impl From<i64> for HostValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for HostValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for HostValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<Vec<u8>> for HostValue {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(value)
    }
}

impl From<&[u8]> for HostValue {
    fn from(value: &[u8]) -> Self {
        Self::Bytes(value.to_vec())
    }
}

impl From<String> for HostValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for HostValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

/// Copy a VM value out for the host. Tables and closures have no host
/// counterpart and come out as `None`.
pub fn to_host(vm: &Vm, value: &Value) -> HostValue {
    match value {
        Value::Int(i) => HostValue::Int(*i),
        Value::Float(f) => HostValue::Float(*f),
        Value::Str(id) => HostValue::Bytes(vm.string(*id).to_vec()),
        Value::Nil | Value::Table(_) | Value::Closure(_) => HostValue::None,
    }
}

/// Copy a host value into `vm`. Booleans become `0`/`1`; text, lists and
/// `None` become `nil`.
pub fn to_vm(vm: &mut Vm, value: &HostValue) -> Value {
    match value {
        HostValue::Int(i) => Value::Int(*i),
        HostValue::Float(f) => Value::Float(*f),
        HostValue::Bytes(bytes) => vm.intern(bytes),
        HostValue::Bool(b) => Value::Int(*b as i64),
        HostValue::None | HostValue::Text(_) | HostValue::List(_) => Value::Nil,
    }
}
