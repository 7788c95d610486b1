//! Script primitives every VM starts with.
//!
//! - `id`: the context id the VM was created with
//! - `send(payload)`: queue a string for transmission
//! - `listen(handler)`: `handler(sender, payload)` receives inbound messages
//! - `size(table)`: number of entries
//! - `foreach(table, f)`: `f(key, value)` for each entry in key order
use std::rc::Rc;

use crate::{RuntimeError, Value, Vm};

pub(crate) fn install(vm: &mut Vm) {
    vm.set_global("id", Value::Int(vm.context_id() as i64));

    let natives: [(&str, fn(&mut Vm) -> Result<Value, RuntimeError>); 4] = [
        ("send", send),
        ("listen", listen),
        ("size", size),
        ("foreach", foreach),
    ];
    for (name, func) in natives {
        let closure = vm.register_native(name, Rc::new(func));
        vm.set_global(name, closure);
    }
}

fn argument(vm: &Vm, idx: usize, op: &'static str) -> Result<Value, RuntimeError> {
    if idx >= vm.local_count() {
        return Err(RuntimeError::Native(format!(
            "{op}: expected at least {idx} argument(s)"
        )));
    }
    vm.local(idx)
}

fn type_error(op: &'static str, expected: &'static str, got: &Value) -> RuntimeError {
    RuntimeError::TypeError {
        op,
        expected,
        got: got.type_name(),
    }
}

fn send(vm: &mut Vm) -> Result<Value, RuntimeError> {
    let payload = match argument(vm, 1, "send")? {
        Value::Str(id) => vm.string(id).to_vec(),
        other => return Err(type_error("send", "string", &other)),
    };
    vm.push_outbound(payload);
    Ok(Value::Nil)
}

fn listen(vm: &mut Vm) -> Result<Value, RuntimeError> {
    let handler = argument(vm, 1, "listen")?;
    if !matches!(handler, Value::Closure(_)) {
        return Err(type_error("listen", "closure", &handler));
    }
    vm.set_listener(handler);
    Ok(Value::Nil)
}

fn size(vm: &mut Vm) -> Result<Value, RuntimeError> {
    match argument(vm, 1, "size")? {
        Value::Table(table) => Ok(Value::Int(table.len() as i64)),
        other => Err(type_error("size", "table", &other)),
    }
}

fn foreach(vm: &mut Vm) -> Result<Value, RuntimeError> {
    let table = argument(vm, 1, "foreach")?;
    let func = argument(vm, 2, "foreach")?;
    let Value::Table(table) = table else {
        return Err(type_error("foreach", "table", &table));
    };
    for (key, value) in table.entries() {
        vm.call_value(func.clone(), &[key.to_value(), value])?;
    }
    Ok(Value::Nil)
}
