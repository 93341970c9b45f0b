//! Dictionaries: per-column intern tables, the container-global severity
//! dictionary, and the message token pool shared by all templates.
//!
//! Entries are assigned ids in first-appearance order, which keeps container
//! output deterministic for identical input.

use crate::error::{Error, Result, Section};
use crate::varint::{self, Cursor};
use std::collections::HashMap;

/// Write-side intern table: byte string -> dense id.
#[derive(Debug, Default)]
pub struct DictBuilder {
    map: HashMap<Vec<u8>, u32>,
    entries: Vec<Vec<u8>>,
}

impl DictBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&mut self, value: &[u8]) -> u32 {
        if let Some(&id) = self.map.get(value) {
            return id;
        }
        let id = self.entries.len() as u32;
        self.map.insert(value.to_vec(), id);
        self.entries.push(value.to_vec());
        id
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[Vec<u8>] {
        &self.entries
    }

    /// Serialize as count + length-prefixed entries.
    pub fn write(&self, buf: &mut Vec<u8>) {
        varint::put(buf, self.entries.len() as u64);
        for e in &self.entries {
            varint::put(buf, e.len() as u64);
            buf.extend_from_slice(e);
        }
    }
}

/// Write-side message token pool. Backed by two flat arrays so the reader
/// can borrow entries straight out of the container body.
#[derive(Debug, Default)]
pub struct PoolBuilder {
    map: HashMap<Vec<u8>, u32>,
    offsets: Vec<u32>,
    bytes: Vec<u8>,
}

impl PoolBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&mut self, value: &[u8]) -> u32 {
        if let Some(&id) = self.map.get(value) {
            return id;
        }
        let id = self.offsets.len() as u32;
        self.map.insert(value.to_vec(), id);
        self.offsets.push(self.bytes.len() as u32);
        self.bytes.extend_from_slice(value);
        id
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    /// Serialize as count, entry lengths, then the byte blob.
    pub fn write(&self, buf: &mut Vec<u8>) {
        varint::put(buf, self.offsets.len() as u64);
        for i in 0..self.offsets.len() {
            let start = self.offsets[i] as usize;
            let end = self
                .offsets
                .get(i + 1)
                .map(|&o| o as usize)
                .unwrap_or(self.bytes.len());
            varint::put(buf, (end - start) as u64);
        }
        buf.extend_from_slice(&self.bytes);
    }
}

/// Read-side view of the message pool: offsets plus a borrowed byte blob.
#[derive(Debug)]
pub struct Pool<'a> {
    offsets: Vec<u32>,
    bytes: &'a [u8],
}

impl<'a> Pool<'a> {
    pub(crate) fn from_parts(offsets: Vec<u32>, bytes: &'a [u8]) -> Self {
        Self { offsets, bytes }
    }

    pub fn read(cur: &mut Cursor<'a>) -> Result<Self> {
        let n = cur.len()?;
        let mut lens = Vec::with_capacity(n);
        let mut total = 0u64;
        for _ in 0..n {
            let l = cur.u64()?;
            lens.push(l);
            total += l;
        }
        let mut offsets = Vec::with_capacity(n);
        let mut acc = 0u64;
        for l in &lens {
            offsets.push(acc as u32);
            acc += l;
        }
        let bytes = cur.bytes(total as usize)?;
        Ok(Self { offsets, bytes })
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    pub fn entry(&self, id: usize) -> Option<&'a [u8]> {
        let start = *self.offsets.get(id)? as usize;
        let end = self
            .offsets
            .get(id + 1)
            .map(|&o| o as usize)
            .unwrap_or(self.bytes.len());
        Some(&self.bytes[start..end])
    }
}

/// Read-side view of a serialized dictionary (severity or column-local).
pub fn read_dict<'a>(cur: &mut Cursor<'a>) -> Result<Vec<&'a [u8]>> {
    let n = cur.len()?;
    let mut entries = Vec::with_capacity(n);
    for _ in 0..n {
        let len = cur.len()?;
        entries.push(cur.bytes(len)?);
    }
    Ok(entries)
}

/// Read-side globals handed to column decoders.
#[derive(Debug)]
pub struct Globals<'a> {
    pub severity: Vec<&'a [u8]>,
    pub pool: Pool<'a>,
}

impl<'a> Globals<'a> {
    pub fn severity_entry(
        &self,
        id: u64,
        section: Section,
        offset: usize,
    ) -> Result<&'a [u8]> {
        self.severity
            .get(id as usize)
            .copied()
            .ok_or(Error::DictionaryIdOutOfRange {
                id,
                len: self.severity.len(),
                section,
                offset,
            })
    }

    pub fn pool_entry(&self, id: u64, section: Section, offset: usize) -> Result<&'a [u8]> {
        self.pool
            .entry(id as usize)
            .ok_or(Error::DictionaryIdOutOfRange {
                id,
                len: self.pool.len(),
                section,
                offset,
            })
    }
}
