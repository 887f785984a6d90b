#![allow(dead_code)]

use gob_engine::expr::token;
use gob_engine::{DataCollection, GameRules, Interpreter, ScriptedHost};
use gob_formats::stk::{build_archive, StkSource};
use gob_formats::tot::{
    ENTRY_POINT_OFFSET, HEADER_SIZE, RESOURCE_TABLE_OFFSET, TEXT_TABLE_OFFSET,
    VARIABLE_COUNT_OFFSET,
};
use gob_formats::StkArchive;

/// Lays out a program blob: code placed at fixed offsets, an optional
/// resource table appended at the end.
pub struct ProgramBuilder {
    data: Vec<u8>,
    entry: usize,
    variable_count: u32,
    resources: Vec<Vec<u8>>,
}

impl ProgramBuilder {
    pub fn new(variable_count: u32) -> Self {
        ProgramBuilder {
            data: vec![0; HEADER_SIZE],
            entry: HEADER_SIZE,
            variable_count,
            resources: Vec::new(),
        }
    }

    /// Writes `bytes` at `offset`, zero-padding up to it.
    pub fn place(mut self, offset: usize, bytes: &[u8]) -> Self {
        assert!(offset >= HEADER_SIZE, "code would overwrite the header");
        if self.data.len() < offset + bytes.len() {
            self.data.resize(offset + bytes.len(), 0);
        }
        self.data[offset..offset + bytes.len()].copy_from_slice(bytes);
        self
    }

    pub fn entry(mut self, offset: usize) -> Self {
        self.entry = offset;
        self
    }

    pub fn resource(mut self, bytes: &[u8]) -> Self {
        self.resources.push(bytes.to_vec());
        self
    }

    pub fn build(self) -> Vec<u8> {
        let mut data = self.data;
        if data.len() <= self.entry {
            data.resize(self.entry + 1, 0);
        }
        data[VARIABLE_COUNT_OFFSET..VARIABLE_COUNT_OFFSET + 4]
            .copy_from_slice(&self.variable_count.to_le_bytes());
        data[TEXT_TABLE_OFFSET..TEXT_TABLE_OFFSET + 4].copy_from_slice(&u32::MAX.to_le_bytes());
        data[ENTRY_POINT_OFFSET..ENTRY_POINT_OFFSET + 4]
            .copy_from_slice(&(self.entry as u32).to_le_bytes());

        if self.resources.is_empty() {
            data[RESOURCE_TABLE_OFFSET..RESOURCE_TABLE_OFFSET + 4]
                .copy_from_slice(&u32::MAX.to_le_bytes());
            return data;
        }
        let table_at = data.len() as u32;
        data[RESOURCE_TABLE_OFFSET..RESOURCE_TABLE_OFFSET + 4]
            .copy_from_slice(&table_at.to_le_bytes());
        data.extend_from_slice(&(self.resources.len() as i16).to_le_bytes());
        data.push(0);
        let mut offset = 0i32;
        for resource in &self.resources {
            data.extend_from_slice(&offset.to_le_bytes());
            data.extend_from_slice(&(resource.len() as u16).to_le_bytes());
            data.extend_from_slice(&0u16.to_le_bytes());
            data.extend_from_slice(&0u16.to_le_bytes());
            offset += resource.len() as i32;
        }
        for resource in &self.resources {
            data.extend_from_slice(resource);
        }
        data
    }
}

/// `[1][count][len]` function block around already encoded opcodes.
pub fn func_block(ops: &[Vec<u8>]) -> Vec<u8> {
    let body: Vec<u8> = ops.concat();
    let mut block = vec![1, ops.len() as u8];
    block.extend_from_slice(&((body.len() + 2) as u16).to_le_bytes());
    block.extend_from_slice(&body);
    block
}

/// Immediate 16-bit expression.
pub fn imm(value: i16) -> Vec<u8> {
    let mut bytes = vec![token::IMM_INT16];
    bytes.extend_from_slice(&value.to_le_bytes());
    bytes.push(token::END_MARKER);
    bytes
}

/// `var[index] = value` on a 32-bit variable.
pub fn assign(index: u16, value: i16) -> Vec<u8> {
    let mut bytes = vec![0x90, token::VAR_INT32];
    bytes.extend_from_slice(&index.to_le_bytes());
    bytes.extend_from_slice(&imm(value));
    bytes
}

pub fn ret() -> Vec<u8> {
    vec![0xE0]
}

/// `loadSound` of program resource `id` into `slot`.
pub fn load_sound(slot: i16, id: i16) -> Vec<u8> {
    let mut bytes = vec![0xDA];
    bytes.extend_from_slice(&imm(slot));
    bytes.extend_from_slice(&id.to_le_bytes());
    bytes
}

/// `loadTot` with a literal name (without extension).
pub fn load_tot(name: &str) -> Vec<u8> {
    let mut bytes = vec![0xF2, name.len() as u8];
    bytes.extend_from_slice(name.as_bytes());
    bytes
}

/// `totSub` with a literal name (without extension).
pub fn tot_sub(name: &str, flags: u8) -> Vec<u8> {
    let mut bytes = vec![0xF8, name.len() as u8];
    bytes.extend_from_slice(name.as_bytes());
    bytes.push(flags);
    bytes
}

pub fn files_with(entries: &[(&str, Vec<u8>)]) -> DataCollection {
    let sources: Vec<StkSource<'_>> = entries
        .iter()
        .map(|(name, data)| StkSource {
            name: *name,
            data: data.as_slice(),
            pack: false,
        })
        .collect();
    let archive = StkArchive::from_bytes(build_archive(&sources, None).unwrap()).unwrap();
    let mut files = DataCollection::new();
    files.add_archive(archive);
    files
}

pub fn interpreter(files: DataCollection, host: ScriptedHost) -> Interpreter {
    Interpreter::new(GameRules::v1(), files, Box::new(host))
}
