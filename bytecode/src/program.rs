//! Program images: a string table followed by a code section.
//!
//! Layout: `HIVE` magic, `u8` version, `u16` string count, each string as a
//! `u16` length followed by raw bytes, `u32` code length, code bytes.
use std::collections::HashSet;
use std::fmt;

use crate::builder::{BytecodeBuilder, Label};
use crate::debug::{DebugTable, DebugTableBuilder};
use crate::decoder::{BytecodeDecoder, DecodeError};
use crate::instruction::Instruction;

pub const PROGRAM_MAGIC: &[u8; 4] = b"HIVE";
pub const PROGRAM_VERSION: u8 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgramError {
    BadMagic,
    UnsupportedVersion(u8),
    Truncated,
    TrailingBytes(usize),
    EmptyCode,
    Decode(DecodeError),
    StringOutOfRange { offset: usize, string: u16 },
    BadAddress { offset: usize, addr: u32 },
}

impl fmt::Display for ProgramError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadMagic => write!(f, "not a bytecode image"),
            Self::UnsupportedVersion(v) => write!(f, "unsupported bytecode version {v}"),
            Self::Truncated => write!(f, "bytecode image is truncated"),
            Self::TrailingBytes(n) => write!(f, "{n} unexpected bytes after the code section"),
            Self::EmptyCode => write!(f, "code section is empty"),
            Self::Decode(err) => write!(f, "{err}"),
            Self::StringOutOfRange { offset, string } => {
                write!(
                    f,
                    "string #{string} referenced at offset {offset} does not exist"
                )
            }
            Self::BadAddress { offset, addr } => {
                write!(
                    f,
                    "address @{addr} referenced at offset {offset} is not an instruction"
                )
            }
        }
    }
}

impl std::error::Error for ProgramError {}

impl From<DecodeError> for ProgramError {
    fn from(err: DecodeError) -> Self {
        Self::Decode(err)
    }
}

/// A validated program: every instruction decodes and every operand refers
/// to an existing string or instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Program {
    strings: Vec<Vec<u8>>,
    code: Vec<u8>,
}

impl Program {
    pub fn new(strings: Vec<Vec<u8>>, code: Vec<u8>) -> Result<Self, ProgramError> {
        let program = Self { strings, code };
        program.validate()?;
        Ok(program)
    }

    pub fn strings(&self) -> &[Vec<u8>] {
        &self.strings
    }

    pub fn code(&self) -> &[u8] {
        &self.code
    }

    fn validate(&self) -> Result<(), ProgramError> {
        if self.code.is_empty() {
            return Err(ProgramError::EmptyCode);
        }
        let mut starts = HashSet::new();
        let mut references = Vec::new();
        for decoded in BytecodeDecoder::new(&self.code) {
            let (offset, instruction) = decoded?;
            starts.insert(offset as u32);
            match instruction {
                Instruction::PushString { string }
                | Instruction::GlobalLoad { name: string }
                | Instruction::GlobalStore { name: string } => {
                    if string as usize >= self.strings.len() {
                        return Err(ProgramError::StringOutOfRange { offset, string });
                    }
                }
                Instruction::PushClosure { addr }
                | Instruction::Jump { addr }
                | Instruction::JumpIfZero { addr }
                | Instruction::JumpIfNotZero { addr } => references.push((offset, addr)),
                _ => {}
            }
        }
        for (offset, addr) in references {
            if !starts.contains(&addr) {
                return Err(ProgramError::BadAddress { offset, addr });
            }
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.code.len() + 16);
        buf.extend_from_slice(PROGRAM_MAGIC);
        buf.push(PROGRAM_VERSION);
        buf.extend_from_slice(&(self.strings.len() as u16).to_le_bytes());
        for string in &self.strings {
            buf.extend_from_slice(&(string.len() as u16).to_le_bytes());
            buf.extend_from_slice(string);
        }
        buf.extend_from_slice(&(self.code.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.code);
        buf
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProgramError> {
        if bytes.get(..4) != Some(PROGRAM_MAGIC.as_slice()) {
            return Err(ProgramError::BadMagic);
        }
        let mut pos = 4;
        let version = *bytes.get(pos).ok_or(ProgramError::Truncated)?;
        pos += 1;
        if version != PROGRAM_VERSION {
            return Err(ProgramError::UnsupportedVersion(version));
        }

        let count = u16::from_le_bytes(take(bytes, &mut pos)?);
        let mut strings = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let len = u16::from_le_bytes(take(bytes, &mut pos)?) as usize;
            let raw = bytes.get(pos..pos + len).ok_or(ProgramError::Truncated)?;
            pos += len;
            strings.push(raw.to_vec());
        }

        let code_len = u32::from_le_bytes(take(bytes, &mut pos)?) as usize;
        let code = bytes.get(pos..pos + code_len).ok_or(ProgramError::Truncated)?;
        pos += code_len;
        if pos != bytes.len() {
            return Err(ProgramError::TrailingBytes(bytes.len() - pos));
        }

        Self::new(strings, code.to_vec())
    }
}

fn take<const N: usize>(bytes: &[u8], pos: &mut usize) -> Result<[u8; N], ProgramError> {
    let raw = bytes.get(*pos..*pos + N).ok_or(ProgramError::Truncated)?;
    *pos += N;
    let mut out = [0u8; N];
    out.copy_from_slice(raw);
    Ok(out)
}

/// Assembles a program together with its debug-symbol table.
///
/// Strings are deduplicated; [`ProgramBuilder::mark`] attaches the current
/// code offset to a source position.
pub struct ProgramBuilder {
    file: String,
    strings: Vec<Vec<u8>>,
    code: BytecodeBuilder,
    debug: DebugTableBuilder,
}

impl ProgramBuilder {
    pub fn new(file: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            strings: Vec::new(),
            code: BytecodeBuilder::new(),
            debug: DebugTableBuilder::new(),
        }
    }

    /// Index of `value` in the string table, adding it when missing.
    pub fn string(&mut self, value: impl AsRef<[u8]>) -> u16 {
        let value = value.as_ref();
        match self.strings.iter().position(|s| s == value) {
            Some(idx) => idx as u16,
            None => {
                self.strings.push(value.to_vec());
                (self.strings.len() - 1) as u16
            }
        }
    }

    pub fn code(&mut self) -> &mut BytecodeBuilder {
        &mut self.code
    }

    pub fn mark(&mut self, line: u32, col: u32) {
        let pc = self.code.current_offset() as u32;
        self.debug.add(pc, &self.file, line, col);
    }

    /// Emit `name = <closure>` at the current position. Bind the returned
    /// label where the function body starts.
    pub fn define(&mut self, name: &str) -> Label {
        let name = self.string(name);
        let label = self.code.push_closure();
        self.code.global_store(name);
        label
    }

    pub fn push_str(&mut self, value: impl AsRef<[u8]>) {
        let idx = self.string(value);
        self.code.push_string(idx);
    }

    pub fn load_global(&mut self, name: &str) {
        let idx = self.string(name);
        self.code.global_load(idx);
    }

    pub fn store_global(&mut self, name: &str) {
        let idx = self.string(name);
        self.code.global_store(idx);
    }

    /// Push the global `name`, let `args` push the arguments and return how
    /// many it pushed, then call.
    pub fn call_global(&mut self, name: &str, args: impl FnOnce(&mut Self) -> u8) {
        self.load_global(name);
        let argc = args(self);
        self.code.call(argc);
    }

    pub fn finish(self) -> Result<(Program, DebugTable), ProgramError> {
        let program = Program::new(self.strings, self.code.into_bytes())?;
        Ok((program, self.debug.finish()))
    }
}
