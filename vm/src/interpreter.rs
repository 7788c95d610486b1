use std::collections::{HashMap, HashSet};
use std::fmt::{self, Write};
use std::rc::Rc;

use bytecode::{BinaryOp, DecodeError, Instruction, Program, decode_at};

use crate::builtins;
use crate::messages::{InboundMessage, MessageQueues};
use crate::neighbors::{Neighbor, NeighborSet};
use crate::strings::{StringId, StringTable};
use crate::value::{Closure, TableKey, TableRef, Value};

#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeError {
    StackUnderflow,
    StackOverflow,
    CallDepthExceeded,
    TypeError {
        op: &'static str,
        expected: &'static str,
        got: &'static str,
    },
    NotCallable { got: &'static str },
    UndefinedLocal { idx: u16 },
    InvalidTableKey { got: &'static str },
    DivisionByZero,
    UnexpectedDone,
    Decode(DecodeError),
    /// The VM already faulted; nothing was executed.
    Halted,
    /// Raised by a native function.
    Native(String),
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StackUnderflow => write!(f, "stack underflow"),
            Self::StackOverflow => write!(f, "stack overflow"),
            Self::CallDepthExceeded => write!(f, "maximum call depth exceeded"),
            Self::TypeError { op, expected, got } => {
                write!(f, "type error in {op}: expected {expected}, got {got}")
            }
            Self::NotCallable { got } => write!(f, "attempt to call a {got} value"),
            Self::UndefinedLocal { idx } => write!(f, "local symbol #{idx} is not defined"),
            Self::InvalidTableKey { got } => write!(f, "a {got} value cannot be a table key"),
            Self::DivisionByZero => write!(f, "division by zero"),
            Self::UnexpectedDone => write!(f, "script end reached inside a function"),
            Self::Decode(err) => write!(f, "{err}"),
            Self::Halted => write!(f, "virtual machine is not ready"),
            Self::Native(message) => write!(f, "{message}"),
        }
    }
}

impl std::error::Error for RuntimeError {}

/// Where and why execution stopped.
#[derive(Debug, Clone, PartialEq)]
pub struct Fault {
    pub pc: usize,
    pub error: RuntimeError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmState {
    Ready,
    Error,
}

pub type NativeFn = Rc<dyn Fn(&mut Vm) -> Result<Value, RuntimeError>>;

struct NativeFunction {
    name: String,
    func: NativeFn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameKind {
    /// The top-level script body; the only frame allowed to execute `Done`.
    Script,
    Function,
    Native,
}

#[derive(Debug)]
struct Frame {
    kind: FrameKind,
    return_pc: usize,
    /// Local symbols; slot 0 holds the callee.
    locals: Vec<Value>,
    stack_base: usize,
}

#[derive(Debug, Clone)]
pub struct VmCreateInfo {
    /// Forwarded to scripts as the global `id`.
    pub context_id: u16,
    pub max_stack: usize,
    pub max_call_depth: usize,
}

impl Default for VmCreateInfo {
    fn default() -> Self {
        Self {
            context_id: 0,
            max_stack: 1024,
            max_call_depth: 256,
        }
    }
}

pub struct Vm {
    info: VmCreateInfo,
    program: Program,
    /// Program string index → interned id.
    program_strings: Vec<StringId>,
    strings: StringTable,
    globals: HashMap<StringId, Value>,
    stack: Vec<Value>,
    frames: Vec<Frame>,
    natives: Vec<NativeFunction>,
    pc: usize,
    state: VmState,
    fault: Option<Fault>,
    listener: Option<Value>,
    neighbors: NeighborSet,
    neighbors_table: TableRef,
    messages: MessageQueues,
}

impl Vm {
    pub fn new(program: Program, info: VmCreateInfo) -> Self {
        let mut strings = StringTable::new();
        let program_strings = program
            .strings()
            .iter()
            .map(|s| strings.intern(s))
            .collect();

        let mut vm = Self {
            info,
            program,
            program_strings,
            strings,
            globals: HashMap::new(),
            stack: Vec::new(),
            frames: Vec::new(),
            natives: Vec::new(),
            pc: 0,
            state: VmState::Ready,
            fault: None,
            listener: None,
            neighbors: NeighborSet::default(),
            neighbors_table: TableRef::new(),
            messages: MessageQueues::default(),
        };
        builtins::install(&mut vm);
        vm.reset_neighbors();
        vm
    }

    pub fn context_id(&self) -> u16 {
        self.info.context_id
    }

    pub fn state(&self) -> VmState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == VmState::Ready
    }

    pub fn fault(&self) -> Option<&Fault> {
        self.fault.as_ref()
    }

    pub fn pc(&self) -> usize {
        self.pc
    }

    // ── strings and globals ────────────────────────────────────────

    pub fn intern(&mut self, bytes: &[u8]) -> Value {
        Value::Str(self.strings.intern(bytes))
    }

    pub fn string(&self, id: StringId) -> &[u8] {
        self.strings.get(id)
    }

    /// Number of strings currently interned.
    pub fn string_count(&self) -> usize {
        self.strings.len()
    }

    /// Release interned strings that no global, stack slot, local, listener
    /// or reachable table refers to. Only call between runs: natives may hold
    /// values the collector cannot see. Returns how many were released.
    pub fn collect_strings(&mut self) -> usize {
        let mut live: HashSet<StringId> = self.program_strings.iter().copied().collect();
        let mut seen = HashSet::new();
        let mut pending: Vec<Value> = Vec::new();

        for (name, value) in &self.globals {
            live.insert(*name);
            pending.push(value.clone());
        }
        pending.extend(self.stack.iter().cloned());
        for frame in &self.frames {
            pending.extend(frame.locals.iter().cloned());
        }
        pending.extend(self.listener.clone());
        pending.push(Value::Table(self.neighbors_table.clone()));

        while let Some(value) = pending.pop() {
            match value {
                Value::Str(id) => {
                    live.insert(id);
                }
                Value::Table(table) => {
                    if !seen.insert(table.addr()) {
                        continue;
                    }
                    for (key, value) in table.entries() {
                        if let TableKey::Str(id) = key {
                            live.insert(id);
                        }
                        pending.push(value);
                    }
                }
                Value::Nil | Value::Int(_) | Value::Float(_) | Value::Closure(_) => {}
            }
        }

        let released = self.strings.retain(&live);
        if released > 0 {
            log::debug!(
                "vm {}: released {released} strings, {} left",
                self.info.context_id,
                self.strings.len()
            );
        }
        released
    }

    pub fn set_global(&mut self, name: &str, value: Value) {
        let id = self.strings.intern(name.as_bytes());
        self.globals.insert(id, value);
    }

    pub fn global(&self, name: &str) -> Value {
        self.strings
            .lookup(name.as_bytes())
            .and_then(|id| self.globals.get(&id))
            .cloned()
            .unwrap_or(Value::Nil)
    }

    /// Table `{x, y, z}` with float fields.
    pub fn new_point(&mut self, x: f32, y: f32, z: f32) -> Value {
        let table = TableRef::new();
        for (name, coord) in [("x", x), ("y", y), ("z", z)] {
            let key = TableKey::Str(self.strings.intern(name.as_bytes()));
            table.put(key, Value::Float(coord as f64));
        }
        Value::Table(table)
    }

    /// Register a native function and return a closure value calling it.
    pub fn register_native(&mut self, name: &str, func: NativeFn) -> Value {
        let id = self.natives.len() as u32;
        self.natives.push(NativeFunction {
            name: name.to_owned(),
            func,
        });
        Value::Closure(Closure::Native { id })
    }

    // ── native calling convention ──────────────────────────────────

    /// Size of the current local-symbol frame, callee included.
    pub fn local_count(&self) -> usize {
        self.frames.last().map_or(0, |f| f.locals.len())
    }

    pub fn local(&self, idx: usize) -> Result<Value, RuntimeError> {
        self.frames
            .last()
            .and_then(|f| f.locals.get(idx))
            .cloned()
            .ok_or(RuntimeError::UndefinedLocal { idx: idx as u16 })
    }

    // ── environment ────────────────────────────────────────────────

    /// Start a fresh, empty `neighbors` table.
    pub fn reset_neighbors(&mut self) {
        self.neighbors.clear();
        self.neighbors_table = TableRef::new();
        self.set_global("neighbors", Value::Table(self.neighbors_table.clone()));
    }

    pub fn add_neighbor(&mut self, neighbor: Neighbor) {
        self.neighbors.insert(neighbor);
        let point = self.new_point(neighbor.x, neighbor.y, neighbor.z);
        self.neighbors_table
            .put(TableKey::Int(neighbor.id as i64), point);
    }

    pub fn neighbors(&self) -> &[Neighbor] {
        self.neighbors.as_slice()
    }

    pub fn push_inbound(&mut self, message: InboundMessage) {
        self.messages.push_inbound(message);
    }

    pub fn inbound_len(&self) -> usize {
        self.messages.inbound_len()
    }

    pub fn push_outbound(&mut self, payload: Vec<u8>) {
        self.messages.push_outbound(payload);
    }

    pub fn pop_outbound(&mut self) -> Option<Vec<u8>> {
        self.messages.pop_outbound()
    }

    pub fn has_outbound(&self) -> bool {
        self.messages.outbound_len() > 0
    }

    pub(crate) fn set_listener(&mut self, listener: Value) {
        self.listener = Some(listener);
    }

    // ── entry points ───────────────────────────────────────────────

    /// Run the top-level script body up to its `Done`.
    pub fn execute_script(&mut self) -> Result<(), RuntimeError> {
        if !self.is_ready() {
            return Err(RuntimeError::Halted);
        }
        self.pc = 0;
        self.frames.push(Frame {
            kind: FrameKind::Script,
            return_pc: 0,
            locals: vec![Value::Nil],
            stack_base: self.stack.len(),
        });
        self.run(0)
    }

    /// Call the global function `name`. An undefined name is skipped and
    /// yields `nil`.
    pub fn function_call(&mut self, name: &str, args: &[Value]) -> Result<Value, RuntimeError> {
        if !self.is_ready() {
            return Err(RuntimeError::Halted);
        }
        let callee = self.global(name);
        if callee.is_nil() {
            log::debug!("function '{name}' is not defined, skipping");
            return Ok(Value::Nil);
        }
        self.call_value(callee, args)
    }

    /// Call `callee` with `args` and return its result. Natives use this to
    /// call back into script closures.
    pub fn call_value(&mut self, callee: Value, args: &[Value]) -> Result<Value, RuntimeError> {
        if !self.is_ready() {
            return Err(RuntimeError::Halted);
        }
        let depth = self.frames.len();
        let result = self.push(callee).and_then(|()| {
            for arg in args {
                self.push(arg.clone())?;
            }
            self.call(args.len())
        });
        if let Err(err) = result {
            self.record_fault(self.pc, &err);
            return Err(err);
        }
        self.run(depth)?;
        self.pop()
    }

    /// Deliver queued inbound messages, oldest first, to the listener set
    /// with `listen`. Returns how many were delivered.
    pub fn process_inbound(&mut self) -> Result<usize, RuntimeError> {
        if !self.is_ready() {
            return Err(RuntimeError::Halted);
        }
        let mut delivered = 0;
        while let Some(message) = self.messages.pop_inbound() {
            let Some(listener) = self.listener.clone() else {
                log::debug!(
                    "vm {}: dropping message from {} without a listener",
                    self.info.context_id,
                    message.sender
                );
                continue;
            };
            let payload = self.intern(&message.payload);
            self.call_value(listener, &[Value::Int(message.sender as i64), payload])?;
            delivered += 1;
        }
        Ok(delivered)
    }

    // ── interpreter loop ───────────────────────────────────────────

    fn run(&mut self, stop_depth: usize) -> Result<(), RuntimeError> {
        while self.frames.len() > stop_depth {
            let op_pc = self.pc;
            let result = decode_at(self.program.code(), op_pc)
                .map_err(RuntimeError::Decode)
                .and_then(|(instruction, next)| {
                    self.pc = next;
                    self.execute(instruction)
                });
            if let Err(err) = result {
                self.record_fault(op_pc, &err);
                return Err(err);
            }
        }
        Ok(())
    }

    fn execute(&mut self, instruction: Instruction) -> Result<(), RuntimeError> {
        match instruction {
            Instruction::Done => {
                let frame = self.frames.pop().ok_or(RuntimeError::StackUnderflow)?;
                if frame.kind != FrameKind::Script {
                    return Err(RuntimeError::UnexpectedDone);
                }
                self.stack.truncate(frame.stack_base);
            }
            Instruction::Nop => {}
            Instruction::PushNil => self.push(Value::Nil)?,
            Instruction::PushInt { value } => self.push(Value::Int(value as i64))?,
            Instruction::PushFloat { value } => self.push(Value::Float(value))?,
            Instruction::PushString { string } => {
                let id = self.program_strings[string as usize];
                self.push(Value::Str(id))?;
            }
            Instruction::PushClosure { addr } => {
                self.push(Value::Closure(Closure::Script { addr }))?;
            }
            Instruction::PushTable => self.push(Value::Table(TableRef::new()))?,
            Instruction::Dup => {
                let top = self.stack.last().cloned().ok_or(RuntimeError::StackUnderflow)?;
                self.push(top)?;
            }
            Instruction::Pop => {
                self.pop()?;
            }
            Instruction::TablePut => {
                let value = self.pop()?;
                let key = self.pop()?;
                let table = self.pop()?;
                expect_table("table put", &table)?.put(table_key(&key)?, value);
            }
            Instruction::TableGet => {
                let key = self.pop()?;
                let table = self.pop()?;
                let value = expect_table("table get", &table)?.get(table_key(&key)?);
                self.push(value)?;
            }
            Instruction::GlobalLoad { name } => {
                let id = self.program_strings[name as usize];
                let value = self.globals.get(&id).cloned().unwrap_or(Value::Nil);
                self.push(value)?;
            }
            Instruction::GlobalStore { name } => {
                let id = self.program_strings[name as usize];
                let value = self.pop()?;
                self.globals.insert(id, value);
            }
            Instruction::LocalLoad { idx } => {
                let value = self.local(idx as usize)?;
                self.push(value)?;
            }
            Instruction::LocalStore { idx } => {
                let value = self.pop()?;
                let frame = self.frames.last_mut().ok_or(RuntimeError::StackUnderflow)?;
                let idx = idx as usize;
                if idx >= frame.locals.len() {
                    frame.locals.resize(idx + 1, Value::Nil);
                }
                frame.locals[idx] = value;
            }
            Instruction::Call { argc } => self.call(argc as usize)?,
            Instruction::Ret0 => self.ret(Value::Nil)?,
            Instruction::Ret1 => {
                let value = self.pop()?;
                self.ret(value)?;
            }
            Instruction::Jump { addr } => self.pc = addr as usize,
            Instruction::JumpIfZero { addr } => {
                if !self.pop()?.is_truthy() {
                    self.pc = addr as usize;
                }
            }
            Instruction::JumpIfNotZero { addr } => {
                if self.pop()?.is_truthy() {
                    self.pc = addr as usize;
                }
            }
            Instruction::Binary(op) => {
                let rhs = self.pop()?;
                let lhs = self.pop()?;
                self.push(binary(op, &lhs, &rhs)?)?;
            }
            Instruction::Neg => {
                let value = match self.pop()? {
                    Value::Int(i) => Value::Int(i.wrapping_neg()),
                    Value::Float(f) => Value::Float(-f),
                    other => {
                        return Err(RuntimeError::TypeError {
                            op: "negation",
                            expected: "number",
                            got: other.type_name(),
                        });
                    }
                };
                self.push(value)?;
            }
            Instruction::Not => {
                let value = self.pop()?;
                self.push(Value::Int(!value.is_truthy() as i64))?;
            }
        }
        Ok(())
    }

    /// Call the value below the top `argc` stack entries.
    fn call(&mut self, argc: usize) -> Result<(), RuntimeError> {
        let base = self
            .stack
            .len()
            .checked_sub(argc + 1)
            .ok_or(RuntimeError::StackUnderflow)?;
        if self.frames.len() >= self.info.max_call_depth {
            return Err(RuntimeError::CallDepthExceeded);
        }
        match self.stack[base].clone() {
            Value::Closure(Closure::Script { addr }) => {
                let locals = self.stack.split_off(base);
                self.frames.push(Frame {
                    kind: FrameKind::Function,
                    return_pc: self.pc,
                    locals,
                    stack_base: base,
                });
                self.pc = addr as usize;
                Ok(())
            }
            Value::Closure(Closure::Native { id }) => {
                let func = self
                    .natives
                    .get(id as usize)
                    .map(|n| n.func.clone())
                    .ok_or(RuntimeError::NotCallable { got: "unknown native" })?;
                let locals = self.stack.split_off(base);
                self.frames.push(Frame {
                    kind: FrameKind::Native,
                    return_pc: self.pc,
                    locals,
                    stack_base: base,
                });
                let result = func(self)?;
                self.ret(result)
            }
            other => Err(RuntimeError::NotCallable {
                got: other.type_name(),
            }),
        }
    }

    fn ret(&mut self, value: Value) -> Result<(), RuntimeError> {
        let frame = self.frames.pop().ok_or(RuntimeError::StackUnderflow)?;
        self.stack.truncate(frame.stack_base);
        self.pc = frame.return_pc;
        self.push(value)
    }

    fn push(&mut self, value: Value) -> Result<(), RuntimeError> {
        if self.stack.len() >= self.info.max_stack {
            return Err(RuntimeError::StackOverflow);
        }
        self.stack.push(value);
        Ok(())
    }

    fn pop(&mut self) -> Result<Value, RuntimeError> {
        let floor = self.frames.last().map_or(0, |f| f.stack_base);
        if self.stack.len() <= floor {
            return Err(RuntimeError::StackUnderflow);
        }
        self.stack.pop().ok_or(RuntimeError::StackUnderflow)
    }

    /// Only the innermost failure is kept; outer frames unwinding the same
    /// error leave it untouched. The stack and frames stay as they were for
    /// [`Vm::dump`].
    fn record_fault(&mut self, pc: usize, error: &RuntimeError) {
        if self.state != VmState::Ready {
            return;
        }
        log::debug!(
            "vm {}: faulted at offset {pc}: {error}",
            self.info.context_id
        );
        self.state = VmState::Error;
        self.fault = Some(Fault {
            pc,
            error: error.clone(),
        });
    }

    // ── inspection ─────────────────────────────────────────────────

    /// Human readable rendering of a value, as `print` shows it.
    pub fn describe(&self, value: &Value) -> String {
        match value {
            Value::Nil => "[nil]".to_owned(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => format!("{f:.6}"),
            Value::Str(id) => String::from_utf8_lossy(self.string(*id)).into_owned(),
            Value::Table(table) => format!("[table with {} elems]", table.len()),
            Value::Closure(Closure::Script { addr }) => format!("[c-closure @{addr}]"),
            Value::Closure(Closure::Native { id }) => format!("[n-closure @{id}]"),
        }
    }

    /// Multi-line snapshot of the execution state for diagnostics.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "vm {} state: {:?}, pc: {}",
            self.info.context_id, self.state, self.pc
        );
        if let Some(fault) = &self.fault {
            let _ = writeln!(out, "fault at offset {}: {}", fault.pc, fault.error);
        }
        let _ = writeln!(out, "stack ({} entries):", self.stack.len());
        for (i, value) in self.stack.iter().enumerate().rev() {
            let _ = match value {
                Value::Closure(Closure::Native { id }) => {
                    let name = self.natives.get(*id as usize).map_or("?", |n| n.name.as_str());
                    writeln!(out, "  [{i}] {} {name}", self.describe(value))
                }
                _ => writeln!(out, "  [{i}] {}", self.describe(value)),
            };
        }
        let _ = writeln!(out, "frames: {}", self.frames.len());
        out
    }
}

fn expect_table<'a>(op: &'static str, value: &'a Value) -> Result<&'a TableRef, RuntimeError> {
    value.as_table().ok_or(RuntimeError::TypeError {
        op,
        expected: "table",
        got: value.type_name(),
    })
}

fn table_key(value: &Value) -> Result<TableKey, RuntimeError> {
    TableKey::from_value(value).ok_or(RuntimeError::InvalidTableKey {
        got: value.type_name(),
    })
}

fn binary(op: BinaryOp, lhs: &Value, rhs: &Value) -> Result<Value, RuntimeError> {
    let truth = |b: bool| Value::Int(b as i64);
    match op {
        BinaryOp::And => return Ok(truth(lhs.is_truthy() && rhs.is_truthy())),
        BinaryOp::Or => return Ok(truth(lhs.is_truthy() || rhs.is_truthy())),
        BinaryOp::Eq => return Ok(truth(lhs.loosely_equals(rhs))),
        BinaryOp::Neq => return Ok(truth(!lhs.loosely_equals(rhs))),
        _ => {}
    }

    match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => {
            let (a, b) = (*a, *b);
            Ok(match op {
                BinaryOp::Add => Value::Int(a.wrapping_add(b)),
                BinaryOp::Sub => Value::Int(a.wrapping_sub(b)),
                BinaryOp::Mul => Value::Int(a.wrapping_mul(b)),
                BinaryOp::Div | BinaryOp::Mod if b == 0 => {
                    return Err(RuntimeError::DivisionByZero);
                }
                BinaryOp::Div => Value::Int(a.wrapping_div(b)),
                BinaryOp::Mod => Value::Int(a.wrapping_rem(b)),
                BinaryOp::Lt => truth(a < b),
                BinaryOp::Lte => truth(a <= b),
                BinaryOp::Gt => truth(a > b),
                BinaryOp::Gte => truth(a >= b),
                BinaryOp::And | BinaryOp::Or | BinaryOp::Eq | BinaryOp::Neq => unreachable!(),
            })
        }
        _ => {
            let a = as_float(op, lhs)?;
            let b = as_float(op, rhs)?;
            Ok(match op {
                BinaryOp::Add => Value::Float(a + b),
                BinaryOp::Sub => Value::Float(a - b),
                BinaryOp::Mul => Value::Float(a * b),
                BinaryOp::Div => Value::Float(a / b),
                BinaryOp::Mod => Value::Float(a % b),
                BinaryOp::Lt => truth(a < b),
                BinaryOp::Lte => truth(a <= b),
                BinaryOp::Gt => truth(a > b),
                BinaryOp::Gte => truth(a >= b),
                BinaryOp::And | BinaryOp::Or | BinaryOp::Eq | BinaryOp::Neq => unreachable!(),
            })
        }
    }
}

fn as_float(op: BinaryOp, value: &Value) -> Result<f64, RuntimeError> {
    match value {
        Value::Int(i) => Ok(*i as f64),
        Value::Float(f) => Ok(*f),
        other => Err(RuntimeError::TypeError {
            op: op_name(op),
            expected: "number",
            got: other.type_name(),
        }),
    }
}

fn op_name(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Add => "addition",
        BinaryOp::Sub => "subtraction",
        BinaryOp::Mul => "multiplication",
        BinaryOp::Div => "division",
        BinaryOp::Mod => "modulo",
        _ => "comparison",
    }
}
