//! Container layout: fixed header, entropy-coded body, sectioned footer.
//!
//! All fixed-width integers are little-endian.
//!
//! ```text
//! [ magic(4) | version(2) | flags(2) | footer_offset(8) ]
//! [ entropy dictionary (flag bit 0): len varint + bytes ]
//! [ zstd frame of the body ]
//! ```
//!
//! Decoded body, in order: template table, global dictionaries, template-id
//! stream, column blocks, column index, footer. `footer_offset` addresses
//! the footer within the decoded body; the footer's section offsets locate
//! every other section, and the column index locates any individual block
//! without scanning its neighbours. A CRC32 of the body precedes the footer
//! fields.

use crate::classify::FieldType;
use crate::column::{encode_block, encode_tid_stream, parse_block, Block, ColumnValues};
use crate::config::*;
use crate::dict::{DictBuilder, Globals, Pool, PoolBuilder};
use crate::error::{Error, Result, Section};
use crate::template::{Slot, Template};
use crate::varint::{self, Cursor};
use std::io::{Read, Write};

// =============================================================================
// Footer
// =============================================================================

#[derive(Debug, Clone)]
pub struct Footer {
    pub n_lines: u64,
    pub n_templates: u32,
    pub templates_offset: u64,
    pub globals_offset: u64,
    pub tidstream_offset: u64,
    pub columns_offset: u64,
    pub crc32: u32,
}

impl Footer {
    fn write_to(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.n_lines.to_le_bytes());
        buf.extend_from_slice(&self.n_templates.to_le_bytes());
        buf.extend_from_slice(&self.templates_offset.to_le_bytes());
        buf.extend_from_slice(&self.globals_offset.to_le_bytes());
        buf.extend_from_slice(&self.tidstream_offset.to_le_bytes());
        buf.extend_from_slice(&self.columns_offset.to_le_bytes());
        buf.extend_from_slice(&self.crc32.to_le_bytes());
    }

    fn read_from(body: &[u8], offset: usize) -> Result<Self> {
        if offset + FOOTER_LEN > body.len() {
            return Err(Error::TruncatedContainer {
                section: Section::Footer,
                offset,
            });
        }
        let mut cur = Cursor::new(&body[offset..offset + FOOTER_LEN], offset, Section::Footer);
        Ok(Self {
            n_lines: cur.u64_le()?,
            n_templates: cur.u32_le()?,
            templates_offset: cur.u64_le()?,
            globals_offset: cur.u64_le()?,
            tidstream_offset: cur.u64_le()?,
            columns_offset: cur.u64_le()?,
            crc32: cur.u32_le()?,
        })
    }
}

// =============================================================================
// Template table serialization
// =============================================================================

fn write_template_table(buf: &mut Vec<u8>, templates: &[Template]) {
    for t in templates {
        varint::put(buf, t.id as u64);
        varint::put(buf, t.slots().len() as u64);
        for slot in t.slots() {
            match slot {
                Slot::Literal(b) => {
                    buf.push(SLOT_LITERAL);
                    varint::put(buf, b.len() as u64);
                    buf.extend_from_slice(b);
                }
                Slot::Variable { field, column } => {
                    buf.push(SLOT_VARIABLE);
                    buf.push(*field as u8);
                    varint::put(buf, *column as u64);
                }
            }
        }
    }
}

fn read_template_table(cur: &mut Cursor<'_>, n_templates: u32) -> Result<Vec<Template>> {
    let mut templates = Vec::with_capacity(n_templates as usize);
    for _ in 0..n_templates {
        let id = cur.u64()? as u32;
        let n_slots = cur.len()?;
        let mut slots = Vec::with_capacity(n_slots);
        for _ in 0..n_slots {
            let at = cur.offset();
            let tag = cur.u8()?;
            match tag {
                SLOT_LITERAL => {
                    let len = cur.len()?;
                    slots.push(Slot::Literal(cur.bytes(len)?.to_vec()));
                }
                SLOT_VARIABLE => {
                    let field_byte = cur.u8()?;
                    let field = FieldType::from_u8(field_byte).ok_or(Error::MalformedSlot {
                        tag: field_byte,
                        offset: at,
                    })?;
                    let column = cur.u64()? as u32;
                    slots.push(Slot::Variable { field, column });
                }
                tag => return Err(Error::MalformedSlot { tag, offset: at }),
            }
        }
        templates.push(Template::from_slots(id, slots));
    }
    Ok(templates)
}

// =============================================================================
// Writer
// =============================================================================

/// Assemble and seal a container from the compression pipeline's outputs.
/// The body is built in one pass, then wrapped by the entropy coder.
pub fn assemble(
    templates: &[Template],
    severity: &DictBuilder,
    pool: &PoolBuilder,
    tids: &[u32],
    columns: &[Vec<ColumnValues>],
    config: &CompressConfig,
) -> Result<Vec<u8>> {
    let mut body = Vec::new();

    let templates_offset = body.len() as u64;
    write_template_table(&mut body, templates);

    let globals_offset = body.len() as u64;
    severity.write(&mut body);
    pool.write(&mut body);

    let tidstream_offset = body.len() as u64;
    encode_tid_stream(&mut body, tids);

    let blocks_start = body.len();
    let mut offsets: Vec<Vec<u64>> = Vec::with_capacity(columns.len());
    for cols in columns {
        let mut per_template = Vec::with_capacity(cols.len());
        for col in cols {
            per_template.push(body.len() as u64);
            encode_block(&mut body, col, config.raw_fallback_ratio);
        }
        offsets.push(per_template);
    }
    let blocks_end = body.len();

    let columns_offset = body.len() as u64;
    for per_template in &offsets {
        varint::put(&mut body, per_template.len() as u64);
        for &off in per_template {
            varint::put(&mut body, off);
        }
    }

    let footer_offset = body.len() as u64;
    let crc32 = crc32fast::hash(&body);
    let footer = Footer {
        n_lines: tids.len() as u64,
        n_templates: templates.len() as u32,
        templates_offset,
        globals_offset,
        tidstream_offset,
        columns_offset,
        crc32,
    };
    footer.write_to(&mut body);

    // Optional entropy dictionary trained on the leading column payloads.
    let dict = if config.train_entropy_dict {
        train_dict(&body[blocks_start..blocks_end], config)
    } else {
        None
    };

    let mut file = Vec::with_capacity(HEADER_LEN + body.len() / 2);
    file.extend_from_slice(&MAGIC);
    file.extend_from_slice(&VERSION.to_le_bytes());
    let flags: u16 = if dict.is_some() { FLAG_ENTROPY_DICT } else { 0 };
    file.extend_from_slice(&flags.to_le_bytes());
    file.extend_from_slice(&footer_offset.to_le_bytes());
    if let Some(d) = &dict {
        varint::put(&mut file, d.len() as u64);
        file.extend_from_slice(d);
    }

    let mut encoder = match &dict {
        Some(d) => zstd::stream::write::Encoder::with_dictionary(file, config.zstd_level, d),
        None => zstd::stream::write::Encoder::new(file, config.zstd_level),
    }
    .map_err(|e| Error::EntropyEncodeFailed(e.to_string()))?;
    encoder
        .write_all(&body)
        .map_err(|e| Error::EntropyEncodeFailed(e.to_string()))?;
    let file = encoder
        .finish()
        .map_err(|e| Error::EntropyEncodeFailed(e.to_string()))?;

    tracing::debug!(
        body = body.len(),
        sealed = file.len(),
        templates = templates.len(),
        "container sealed"
    );
    Ok(file)
}

fn train_dict(blocks: &[u8], config: &CompressConfig) -> Option<Vec<u8>> {
    let sample = &blocks[..blocks.len().min(config.dict_sample_bytes)];
    if sample.is_empty() {
        return None;
    }
    // Feed the sample as fixed-size windows; training needs several samples.
    let chunk = (sample.len() / 16).max(64).min(sample.len());
    let sizes: Vec<usize> = sample
        .chunks(chunk)
        .map(|c| c.len())
        .collect();
    match zstd::dict::from_continuous(sample, &sizes, config.dict_max_bytes) {
        Ok(d) if !d.is_empty() => Some(d),
        Ok(_) => None,
        Err(e) => {
            tracing::debug!(error = %e, "entropy dictionary training skipped");
            None
        }
    }
}

// =============================================================================
// Reader
// =============================================================================

/// An opened container: the decoded body plus parsed metadata. Sections are
/// decoded once; column blocks are sliced on demand.
pub struct Container {
    body: Vec<u8>,
    footer: Footer,
    templates: Vec<Template>,
    /// (offset, len) of each severity dictionary entry in `body`.
    severity_ranges: Vec<(usize, usize)>,
    pool_offsets: Vec<u32>,
    /// (offset, len) of the message pool byte blob in `body`.
    pool_range: (usize, usize),
    /// Absolute body offset of every column block, per template.
    column_index: Vec<Vec<u64>>,
    /// Stored vs computed CRC when they disagree.
    crc_mismatch: Option<(u32, u32)>,
}

impl Container {
    /// Parse a sealed container. The body is entropy-decoded into an owned
    /// buffer; checksum verification is recorded and enforced by
    /// [`Container::verify`] so that footer-only reads survive body damage.
    pub fn open(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(Error::TruncatedContainer {
                section: Section::Header,
                offset: bytes.len(),
            });
        }
        if bytes[0..4] != MAGIC {
            return Err(Error::InvalidMagic);
        }
        let version = u16::from_le_bytes([bytes[4], bytes[5]]);
        if version != VERSION {
            return Err(Error::UnsupportedVersion(version));
        }
        let flags = u16::from_le_bytes([bytes[6], bytes[7]]);
        let footer_offset = u64::from_le_bytes(bytes[8..16].try_into().unwrap()) as usize;

        let mut pos = HEADER_LEN;
        let dict: Option<&[u8]> = if flags & FLAG_ENTROPY_DICT != 0 {
            let mut cur = Cursor::new(&bytes[pos..], pos, Section::Header);
            let len = cur.len()?;
            let d = cur.bytes(len)?;
            pos = cur.offset();
            Some(d)
        } else {
            None
        };

        let compressed = &bytes[pos..];
        let mut body = Vec::new();
        let mut decoder = match dict {
            Some(d) => zstd::stream::read::Decoder::with_dictionary(std::io::BufReader::new(compressed), d),
            None => zstd::stream::read::Decoder::with_dictionary(std::io::BufReader::new(compressed), &[]),
        }
        .map_err(|e| Error::EntropyDecodeFailed(e.to_string()))?;
        decoder
            .read_to_end(&mut body)
            .map_err(|e| Error::EntropyDecodeFailed(e.to_string()))?;

        let footer = Footer::read_from(&body, footer_offset)?;
        let computed = crc32fast::hash(&body[..footer_offset]);
        let crc_mismatch = if computed != footer.crc32 {
            Some((footer.crc32, computed))
        } else {
            None
        };

        for (name, off) in [
            (Section::TemplateTable, footer.templates_offset),
            (Section::GlobalDictionaries, footer.globals_offset),
            (Section::TemplateIdStream, footer.tidstream_offset),
            (Section::ColumnIndex, footer.columns_offset),
        ] {
            if off as usize > footer_offset {
                return Err(Error::TruncatedContainer {
                    section: name,
                    offset: off as usize,
                });
            }
        }

        let t_off = footer.templates_offset as usize;
        let mut cur = Cursor::new(&body[t_off..footer_offset], t_off, Section::TemplateTable);
        let templates = read_template_table(&mut cur, footer.n_templates)?;

        let g_off = footer.globals_offset as usize;
        let mut cur = Cursor::new(
            &body[g_off..footer_offset],
            g_off,
            Section::GlobalDictionaries,
        );
        let n_sev = cur.len()?;
        let mut severity_ranges = Vec::with_capacity(n_sev);
        for _ in 0..n_sev {
            let len = cur.len()?;
            let start = cur.offset();
            cur.bytes(len)?;
            severity_ranges.push((start, len));
        }
        let n_pool = cur.len()?;
        let mut lens = Vec::with_capacity(n_pool);
        let mut total = 0usize;
        for _ in 0..n_pool {
            let l = cur.len()?;
            lens.push(l);
            total += l;
        }
        let mut pool_offsets = Vec::with_capacity(n_pool);
        let mut acc = 0u32;
        for l in &lens {
            pool_offsets.push(acc);
            acc += *l as u32;
        }
        let pool_start = cur.offset();
        cur.bytes(total)?;
        let pool_range = (pool_start, total);

        let c_off = footer.columns_offset as usize;
        let mut cur = Cursor::new(&body[c_off..footer_offset], c_off, Section::ColumnIndex);
        let mut column_index = Vec::with_capacity(templates.len());
        for _ in 0..templates.len() {
            let n_cols = cur.len()?;
            let mut per_template = Vec::with_capacity(n_cols);
            for _ in 0..n_cols {
                let off = cur.u64()?;
                if off as usize >= footer_offset {
                    return Err(Error::TruncatedContainer {
                        section: Section::ColumnIndex,
                        offset: off as usize,
                    });
                }
                per_template.push(off);
            }
            column_index.push(per_template);
        }

        tracing::debug!(
            lines = footer.n_lines,
            templates = templates.len(),
            body = body.len(),
            "container opened"
        );

        Ok(Self {
            body,
            footer,
            templates,
            severity_ranges,
            pool_offsets,
            pool_range,
            column_index,
            crc_mismatch,
        })
    }

    /// Line count, straight from the footer. No section is decoded.
    pub fn count(&self) -> u64 {
        self.footer.n_lines
    }

    pub fn templates(&self) -> &[Template] {
        &self.templates
    }

    /// Enforce the body checksum.
    pub fn verify(&self) -> Result<()> {
        match self.crc_mismatch {
            Some((stored, computed)) => Err(Error::ChecksumMismatch { stored, computed }),
            None => Ok(()),
        }
    }

    /// Global dictionaries as borrowed views.
    pub fn globals(&self) -> Globals<'_> {
        let severity = self
            .severity_ranges
            .iter()
            .map(|&(o, l)| &self.body[o..o + l])
            .collect();
        let (po, pl) = self.pool_range;
        Globals {
            severity,
            pool: Pool::from_parts(self.pool_offsets.clone(), &self.body[po..po + pl]),
        }
    }

    /// Decode the per-line template-id stream.
    pub fn tid_stream(&self) -> Result<Vec<u32>> {
        let off = self.footer.tidstream_offset as usize;
        crate::column::decode_tid_stream(&self.body[off..], off, self.footer.n_lines)
    }

    /// Slice one column block without touching its neighbours.
    pub fn column_block(&self, template: usize, column: usize) -> Result<Block<'_>> {
        let section = Section::ColumnBlock {
            template: template as u32,
            column: column as u32,
        };
        let off = *self
            .column_index
            .get(template)
            .and_then(|cols| cols.get(column))
            .ok_or(Error::TruncatedContainer {
                section,
                offset: self.footer.columns_offset as usize,
            })? as usize;
        parse_block(&self.body[off..], off, section)
    }

    pub(crate) fn body_mut(&mut self) -> &mut Vec<u8> {
        &mut self.body
    }
}
