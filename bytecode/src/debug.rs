//! Debug-symbol tables: map bytecode offsets to source `file:line:col`.
//!
//! On disk a table is the `HDBG` magic, a file name table (`u16` count, then
//! `u16` length-prefixed names) and a delta-encoded VLQ entry stream. Each
//! entry is 4 VLQ values:
//! - `delta_pc` (unsigned VLQ)
//! - `delta_line` (signed, zigzag + VLQ)
//! - `delta_col` (signed, zigzag + VLQ)
//! - `file` (unsigned VLQ index into the name table)
use std::fmt;

pub const DEBUG_MAGIC: &[u8; 4] = b"HDBG";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebugEntry {
    pub pc: u32,
    pub line: u32,
    pub col: u32,
    pub file: u32,
}

/// A resolved source position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location<'a> {
    pub file: &'a str,
    pub line: u32,
    pub col: u32,
}

impl fmt::Display for Location<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.col)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DebugTableError {
    BadMagic,
    Truncated,
    BadFileName,
    FileOutOfRange { file: u32 },
}

impl fmt::Display for DebugTableError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadMagic => write!(f, "not a debug-symbol table"),
            Self::Truncated => write!(f, "debug-symbol table is truncated"),
            Self::BadFileName => write!(f, "source file name is not valid UTF-8"),
            Self::FileOutOfRange { file } => {
                write!(f, "entry refers to unknown source file #{file}")
            }
        }
    }
}

impl std::error::Error for DebugTableError {}

/// Read-only offset → source location map, sorted by offset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DebugTable {
    files: Vec<String>,
    entries: Vec<DebugEntry>,
}

impl DebugTable {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Location of the last entry with `pc <= target_pc`.
    pub fn lookup(&self, target_pc: u32) -> Option<Location<'_>> {
        let idx = self.entries.partition_point(|e| e.pc <= target_pc);
        let entry = self.entries.get(idx.checked_sub(1)?)?;
        Some(Location {
            file: self.files.get(entry.file as usize)?,
            line: entry.line,
            col: entry.col,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(DEBUG_MAGIC);
        buf.extend_from_slice(&(self.files.len() as u16).to_le_bytes());
        for file in &self.files {
            buf.extend_from_slice(&(file.len() as u16).to_le_bytes());
            buf.extend_from_slice(file.as_bytes());
        }

        let mut prev_pc: u32 = 0;
        let mut prev_line: i64 = 0;
        let mut prev_col: i64 = 0;
        for entry in &self.entries {
            encode_unsigned_vlq(entry.pc - prev_pc, &mut buf);
            encode_unsigned_vlq(zigzag_encode(entry.line as i64 - prev_line), &mut buf);
            encode_unsigned_vlq(zigzag_encode(entry.col as i64 - prev_col), &mut buf);
            encode_unsigned_vlq(entry.file, &mut buf);

            prev_pc = entry.pc;
            prev_line = entry.line as i64;
            prev_col = entry.col as i64;
        }
        buf
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DebugTableError> {
        if bytes.get(..4) != Some(DEBUG_MAGIC.as_slice()) {
            return Err(DebugTableError::BadMagic);
        }
        let mut pos = 4;
        let file_count = read_u16(bytes, &mut pos)?;
        let mut files = Vec::with_capacity(file_count as usize);
        for _ in 0..file_count {
            let len = read_u16(bytes, &mut pos)? as usize;
            let name = bytes.get(pos..pos + len).ok_or(DebugTableError::Truncated)?;
            pos += len;
            let name = std::str::from_utf8(name).map_err(|_| DebugTableError::BadFileName)?;
            files.push(name.to_owned());
        }

        let mut entries = Vec::new();
        let mut pc: u32 = 0;
        let mut line: i64 = 0;
        let mut col: i64 = 0;
        while pos < bytes.len() {
            let mut next =
                || decode_unsigned_vlq(bytes, &mut pos).ok_or(DebugTableError::Truncated);
            pc = pc.checked_add(next()?).ok_or(DebugTableError::Truncated)?;
            line += zigzag_decode(next()?);
            col += zigzag_decode(next()?);
            let file = next()?;
            if file as usize >= files.len() {
                return Err(DebugTableError::FileOutOfRange { file });
            }
            entries.push(DebugEntry {
                pc,
                line: line as u32,
                col: col as u32,
                file,
            });
        }

        Ok(Self { files, entries })
    }
}

/// Accumulates debug entries while a program is emitted.
#[derive(Debug, Default)]
pub struct DebugTableBuilder {
    table: DebugTable,
}

impl DebugTableBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that code from `pc` onwards comes from `file:line:col`.
    pub fn add(&mut self, pc: u32, file: &str, line: u32, col: u32) {
        debug_assert!(
            self.table.entries.last().is_none_or(|e| e.pc <= pc),
            "debug entries must be added in offset order"
        );
        let file = match self.table.files.iter().position(|f| f == file) {
            Some(idx) => idx as u32,
            None => {
                self.table.files.push(file.to_owned());
                (self.table.files.len() - 1) as u32
            }
        };
        self.table.entries.push(DebugEntry {
            pc,
            line,
            col,
            file,
        });
    }

    pub fn finish(self) -> DebugTable {
        self.table
    }
}

fn read_u16(bytes: &[u8], pos: &mut usize) -> Result<u16, DebugTableError> {
    let raw = bytes.get(*pos..*pos + 2).ok_or(DebugTableError::Truncated)?;
    *pos += 2;
    Ok(u16::from_le_bytes([raw[0], raw[1]]))
}

// ── VLQ helpers ─────────────────────────────────────────────────────

/// Encode an unsigned integer as a variable-length quantity.
/// Each byte uses 7 data bits + 1 continuation bit (MSB).
fn encode_unsigned_vlq(mut value: u32, buf: &mut Vec<u8>) {
    loop {
        let mut byte = (value & 0x7F) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        buf.push(byte);
        if value == 0 {
            break;
        }
    }
}

/// Decode an unsigned VLQ from `encoded` starting at `pos`.
/// Advances `pos` past the consumed bytes.
fn decode_unsigned_vlq(encoded: &[u8], pos: &mut usize) -> Option<u32> {
    let mut result: u32 = 0;
    let mut shift = 0;
    loop {
        let byte = *encoded.get(*pos)?;
        *pos += 1;
        result |= ((byte & 0x7F) as u32) << shift;
        if byte & 0x80 == 0 {
            return Some(result);
        }
        shift += 7;
        if shift >= 35 {
            return None; // overflow
        }
    }
}

fn zigzag_encode(value: i64) -> u32 {
    ((value << 1) ^ (value >> 63)) as u32
}

fn zigzag_decode(value: u32) -> i64 {
    ((value >> 1) as i64) ^ (-((value & 1) as i64))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> DebugTable {
        let mut builder = DebugTableBuilder::new();
        builder.add(0, "main.bzz", 1, 1);
        builder.add(6, "main.bzz", 4, 3);
        builder.add(12, "lib.bzz", 2, 9);
        builder.add(20, "main.bzz", 3, 1);
        builder.finish()
    }

    #[test]
    fn empty_table() {
        let table = DebugTableBuilder::new().finish();
        assert!(table.is_empty());
        assert_eq!(table.lookup(0), None);
        let decoded = DebugTable::from_bytes(&table.to_bytes()).unwrap();
        assert!(decoded.is_empty());
    }

    #[test]
    fn lookup_uses_last_entry_at_or_before_pc() {
        let table = sample();
        assert_eq!(table.lookup(0).unwrap().to_string(), "main.bzz:1:1");
        assert_eq!(table.lookup(5).unwrap().to_string(), "main.bzz:1:1");
        assert_eq!(table.lookup(6).unwrap().to_string(), "main.bzz:4:3");
        assert_eq!(table.lookup(13).unwrap().to_string(), "lib.bzz:2:9");
        assert_eq!(table.lookup(500).unwrap().to_string(), "main.bzz:3:1");
    }

    #[test]
    fn lookup_before_first_entry() {
        let mut builder = DebugTableBuilder::new();
        builder.add(10, "a.bzz", 1, 1);
        let table = builder.finish();
        assert_eq!(table.lookup(9), None);
    }

    #[test]
    fn serialized_table_decodes_identically() {
        let table = sample();
        let decoded = DebugTable::from_bytes(&table.to_bytes()).unwrap();
        assert_eq!(decoded, table);
        assert_eq!(decoded.len(), 4);
    }

    #[test]
    fn rejects_bad_magic() {
        assert_eq!(
            DebugTable::from_bytes(b"NOPE\0\0"),
            Err(DebugTableError::BadMagic)
        );
    }

    #[test]
    fn rejects_truncated_entry() {
        let mut bytes = sample().to_bytes();
        bytes.push(0x80);
        assert_eq!(
            DebugTable::from_bytes(&bytes),
            Err(DebugTableError::Truncated)
        );
    }

    #[test]
    fn rejects_unknown_file_index() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(DEBUG_MAGIC);
        bytes.extend_from_slice(&0u16.to_le_bytes());
        bytes.extend_from_slice(&[0, 2, 2, 0]);
        assert_eq!(
            DebugTable::from_bytes(&bytes),
            Err(DebugTableError::FileOutOfRange { file: 0 })
        );
    }

    #[test]
    fn zigzag_handles_negative_deltas() {
        for v in [-1000, -1, 0, 1, 1000, i32::MAX as i64, i32::MIN as i64] {
            assert_eq!(zigzag_decode(zigzag_encode(v)), v);
        }
    }
}
