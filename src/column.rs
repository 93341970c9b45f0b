//! Typed columns and the per-column codec layer.
//!
//! Every column block is self-describing: a one-byte codec tag, a
//! length-prefixed codec header, then a length-prefixed payload. Numeric
//! codecs (varint, zigzag, delta) are used only when the parsed value
//! renders back byte-identically; anything else falls back to dictionary
//! or raw encoding so reconstruction stays exact.

use crate::classify::{canonical_int, FieldType};
use crate::config::*;
use crate::dict::{read_dict, DictBuilder, Globals, PoolBuilder};
use crate::error::{Error, Result, Section};
use crate::varint::{self, Cursor};
use lazy_static::lazy_static;
use regex::bytes::Regex;

// =============================================================================
// Timestamp formats
// =============================================================================

const MONTHS: &[(&str, u32)] = &[
    ("Jan", 1),
    ("Feb", 2),
    ("Mar", 3),
    ("Apr", 4),
    ("May", 5),
    ("Jun", 6),
    ("Jul", 7),
    ("Aug", 8),
    ("Sep", 9),
    ("Oct", 10),
    ("Nov", 11),
    ("Dec", 12),
];

const WEEKDAYS: [&str; 7] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];

fn month_to_num(name: &[u8]) -> u32 {
    MONTHS
        .iter()
        .find(|(n, _)| n.as_bytes() == name)
        .map(|(_, v)| *v)
        .unwrap_or(1)
}

fn num_to_month(num: u32) -> &'static str {
    MONTHS
        .iter()
        .find(|(_, v)| *v == num)
        .map(|(n, _)| *n)
        .unwrap_or("Jan")
}

const DAYS_IN_MONTH: [i64; 12] = [31, 28, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];

fn is_leap(year: i64) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

fn civil_to_epoch_ms(year: i64, month: u32, day: u32, h: u32, mi: u32, s: u32) -> Option<i64> {
    if year < 1970 || !(1..=12).contains(&month) || day == 0 {
        return None;
    }
    let mut days: i64 = 0;
    for y in 1970..year {
        days += if is_leap(y) { 366 } else { 365 };
    }
    for m in 0..(month - 1) as usize {
        days += DAYS_IN_MONTH[m];
        if m == 1 && is_leap(year) {
            days += 1;
        }
    }
    days += (day - 1) as i64;
    let secs = days * 86400 + (h as i64) * 3600 + (mi as i64) * 60 + s as i64;
    Some(secs * 1000)
}

/// Split non-negative epoch milliseconds into civil fields.
fn epoch_ms_to_civil(ms: i64) -> (i64, u32, u32, u32, u32, u32) {
    let secs = ms / 1000;
    let mut days = secs / 86400;
    let rem = secs % 86400;
    let h = (rem / 3600) as u32;
    let mi = ((rem % 3600) / 60) as u32;
    let s = (rem % 60) as u32;

    let mut year: i64 = 1970;
    loop {
        let days_in_year = if is_leap(year) { 366 } else { 365 };
        if days < days_in_year {
            break;
        }
        days -= days_in_year;
        year += 1;
    }

    let mut month = 1u32;
    for m in 0..12 {
        let mut dim = DAYS_IN_MONTH[m];
        if m == 1 && is_leap(year) {
            dim = 29;
        }
        if days < dim {
            month = (m + 1) as u32;
            break;
        }
        days -= dim;
    }

    (year, month, (days + 1) as u32, h, mi, s)
}

fn weekday_of(ms: i64) -> &'static str {
    let days = ms / 86_400_000;
    WEEKDAYS[((days + 4) % 7) as usize]
}

/// Textual layout of a timestamp column, stored in the block header so the
/// original form is recoverable from the epoch value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TsFormat {
    /// "Thu Jun 09 06:07:04 2005" (weekday recomputed from the date)
    Asctime,
    /// "2024-12-01T10:00:00.123Z"; suffix bytes are kept verbatim
    Iso { sep: u8, subsec: u8, suffix: Vec<u8> },
    /// "Jun  9 06:06:01" (year-less, day space-padded; epoch base 1972,
    /// a leap year, so Feb 29 stays representable)
    Syslog,
    /// "09/Jun/2005:06:07:04"
    Clf,
}

const TS_FMT_ASCTIME: u8 = 0;
const TS_FMT_ISO: u8 = 1;
const TS_FMT_SYSLOG: u8 = 2;
const TS_FMT_CLF: u8 = 3;

impl TsFormat {
    fn write(&self, buf: &mut Vec<u8>) {
        match self {
            TsFormat::Asctime => buf.push(TS_FMT_ASCTIME),
            TsFormat::Iso { sep, subsec, suffix } => {
                buf.push(TS_FMT_ISO);
                buf.push(*sep);
                buf.push(*subsec);
                varint::put(buf, suffix.len() as u64);
                buf.extend_from_slice(suffix);
            }
            TsFormat::Syslog => buf.push(TS_FMT_SYSLOG),
            TsFormat::Clf => buf.push(TS_FMT_CLF),
        }
    }

    fn read(cur: &mut Cursor<'_>, section: Section) -> Result<Self> {
        let at = cur.offset();
        let variant = cur.u8()?;
        match variant {
            TS_FMT_ASCTIME => Ok(TsFormat::Asctime),
            TS_FMT_ISO => {
                let sep = cur.u8()?;
                let subsec = cur.u8()?;
                let len = cur.len()?;
                let suffix = cur.bytes(len)?.to_vec();
                Ok(TsFormat::Iso { sep, subsec, suffix })
            }
            TS_FMT_SYSLOG => Ok(TsFormat::Syslog),
            TS_FMT_CLF => Ok(TsFormat::Clf),
            tag => Err(Error::UnknownCodecTag {
                tag,
                section,
                offset: at,
            }),
        }
    }
}

lazy_static! {
    static ref ASCTIME_CAP: Regex = Regex::new(
        r"^(?:Mon|Tue|Wed|Thu|Fri|Sat|Sun) (Jan|Feb|Mar|Apr|May|Jun|Jul|Aug|Sep|Oct|Nov|Dec) (\d{2}) (\d{2}):(\d{2}):(\d{2}) (\d{4})$"
    )
    .unwrap();
    static ref ISO_CAP: Regex = Regex::new(
        r"^(\d{4})-(\d{2})-(\d{2})([T ])(\d{2}):(\d{2}):(\d{2})(?:\.(\d{1,3}))?(Z|[+-]\d{2}:?\d{2})?$"
    )
    .unwrap();
    static ref SYSLOG_CAP: Regex = Regex::new(
        r"^(Jan|Feb|Mar|Apr|May|Jun|Jul|Aug|Sep|Oct|Nov|Dec) ( \d|\d\d) (\d{2}):(\d{2}):(\d{2})$"
    )
    .unwrap();
    static ref CLF_CAP: Regex = Regex::new(
        r"^(\d{2})/(Jan|Feb|Mar|Apr|May|Jun|Jul|Aug|Sep|Oct|Nov|Dec)/(\d{4}):(\d{2}):(\d{2}):(\d{2})$"
    )
    .unwrap();
}

fn cap_int(m: &regex::bytes::Captures<'_>, i: usize) -> i64 {
    std::str::from_utf8(m.get(i).unwrap().as_bytes())
        .ok()
        .and_then(|s| s.trim_start().parse::<i64>().ok())
        .unwrap_or(0)
}

/// Parse a timestamp token into epoch milliseconds plus its textual layout.
/// Epoch values are wall-clock; any zone suffix is preserved as text.
pub fn parse_timestamp(text: &[u8]) -> Option<(i64, TsFormat)> {
    if let Some(m) = ASCTIME_CAP.captures(text) {
        let month = month_to_num(m.get(1).unwrap().as_bytes());
        let ms = civil_to_epoch_ms(
            cap_int(&m, 6),
            month,
            cap_int(&m, 2) as u32,
            cap_int(&m, 3) as u32,
            cap_int(&m, 4) as u32,
            cap_int(&m, 5) as u32,
        )?;
        return Some((ms, TsFormat::Asctime));
    }
    if let Some(m) = CLF_CAP.captures(text) {
        let month = month_to_num(m.get(2).unwrap().as_bytes());
        let ms = civil_to_epoch_ms(
            cap_int(&m, 3),
            month,
            cap_int(&m, 1) as u32,
            cap_int(&m, 4) as u32,
            cap_int(&m, 5) as u32,
            cap_int(&m, 6) as u32,
        )?;
        return Some((ms, TsFormat::Clf));
    }
    if let Some(m) = ISO_CAP.captures(text) {
        let mut ms = civil_to_epoch_ms(
            cap_int(&m, 1),
            cap_int(&m, 2) as u32,
            cap_int(&m, 3) as u32,
            cap_int(&m, 5) as u32,
            cap_int(&m, 6) as u32,
            cap_int(&m, 7) as u32,
        )?;
        let subsec = m.get(8).map(|s| s.as_bytes()).unwrap_or(b"");
        if !subsec.is_empty() {
            let v = cap_int(&m, 8);
            let scale = match subsec.len() {
                1 => 100,
                2 => 10,
                _ => 1,
            };
            ms += v * scale;
        }
        let suffix = m.get(9).map(|s| s.as_bytes().to_vec()).unwrap_or_default();
        return Some((
            ms,
            TsFormat::Iso {
                sep: m.get(4).unwrap().as_bytes()[0],
                subsec: subsec.len() as u8,
                suffix,
            },
        ));
    }
    if let Some(m) = SYSLOG_CAP.captures(text) {
        let month = month_to_num(m.get(1).unwrap().as_bytes());
        let ms = civil_to_epoch_ms(
            1972,
            month,
            cap_int(&m, 2) as u32,
            cap_int(&m, 3) as u32,
            cap_int(&m, 4) as u32,
            cap_int(&m, 5) as u32,
        )?;
        return Some((ms, TsFormat::Syslog));
    }
    None
}

/// Render epoch milliseconds back into the column's textual layout.
pub fn render_timestamp(ms: i64, fmt: &TsFormat, out: &mut Vec<u8>) {
    use std::io::Write;
    let ms = ms.max(0);
    let (year, month, day, h, mi, s) = epoch_ms_to_civil(ms);
    match fmt {
        TsFormat::Asctime => {
            let _ = write!(
                out,
                "{} {} {:02} {:02}:{:02}:{:02} {:04}",
                weekday_of(ms),
                num_to_month(month),
                day,
                h,
                mi,
                s,
                year
            );
        }
        TsFormat::Iso { sep, subsec, suffix } => {
            let _ = write!(
                out,
                "{:04}-{:02}-{:02}{}{:02}:{:02}:{:02}",
                year, month, day, *sep as char, h, mi, s
            );
            if *subsec > 0 {
                let frac = format!("{:03}", ms % 1000);
                let _ = write!(out, ".{}", &frac[..(*subsec as usize).min(3)]);
            }
            out.extend_from_slice(suffix);
        }
        TsFormat::Syslog => {
            let _ = write!(
                out,
                "{} {:>2} {:02}:{:02}:{:02}",
                num_to_month(month),
                day,
                h,
                mi,
                s
            );
        }
        TsFormat::Clf => {
            let _ = write!(
                out,
                "{:02}/{}/{:04}:{:02}:{:02}:{:02}",
                day,
                num_to_month(month),
                year,
                h,
                mi,
                s
            );
        }
    }
}

// =============================================================================
// Write-side columns
// =============================================================================

/// Values of one variable slot across all lines of a template, typed by the
/// slot's field.
#[derive(Debug)]
pub enum ColumnValues {
    Int(Vec<i64>),
    Ts { values: Vec<i64>, format: TsFormat },
    SeverityIds(Vec<u32>),
    PoolIds(Vec<u32>),
    Str(Vec<Vec<u8>>),
}

impl ColumnValues {
    pub fn len(&self) -> usize {
        match self {
            ColumnValues::Int(v) => v.len(),
            ColumnValues::Ts { values, .. } => values.len(),
            ColumnValues::SeverityIds(v) => v.len(),
            ColumnValues::PoolIds(v) => v.len(),
            ColumnValues::Str(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Build a typed column from raw slot values. Numeric forms are kept only
/// when every value survives a parse/render round trip; otherwise the
/// column stays textual.
pub fn build_column(
    field: FieldType,
    raw: &[&[u8]],
    severity: &mut DictBuilder,
    pool: &mut PoolBuilder,
) -> ColumnValues {
    match field {
        FieldType::Integer | FieldType::ProcessId => {
            let mut ints = Vec::with_capacity(raw.len());
            for v in raw {
                match canonical_int(v) {
                    Some(n) => ints.push(n),
                    None => return ColumnValues::Str(raw.iter().map(|v| v.to_vec()).collect()),
                }
            }
            ColumnValues::Int(ints)
        }
        FieldType::Timestamp => {
            let mut values = Vec::with_capacity(raw.len());
            let mut format: Option<TsFormat> = None;
            for v in raw {
                let Some((ms, fmt)) = parse_timestamp(v) else {
                    return ColumnValues::Str(raw.iter().map(|v| v.to_vec()).collect());
                };
                match &format {
                    None => {
                        let mut check = Vec::with_capacity(v.len());
                        render_timestamp(ms, &fmt, &mut check);
                        if check != *v {
                            return ColumnValues::Str(raw.iter().map(|v| v.to_vec()).collect());
                        }
                        format = Some(fmt);
                    }
                    Some(f) => {
                        let mut check = Vec::with_capacity(v.len());
                        render_timestamp(ms, f, &mut check);
                        if check != *v {
                            return ColumnValues::Str(raw.iter().map(|v| v.to_vec()).collect());
                        }
                    }
                }
                values.push(ms);
            }
            match format {
                Some(format) => ColumnValues::Ts { values, format },
                None => ColumnValues::Str(Vec::new()),
            }
        }
        FieldType::Severity => {
            ColumnValues::SeverityIds(raw.iter().map(|v| severity.intern(v)).collect())
        }
        FieldType::Message | FieldType::QuotedString => {
            ColumnValues::PoolIds(raw.iter().map(|v| pool.intern(v)).collect())
        }
        _ => ColumnValues::Str(raw.iter().map(|v| v.to_vec()).collect()),
    }
}

// =============================================================================
// Block encoding
// =============================================================================

fn write_block(buf: &mut Vec<u8>, tag: u8, header: &[u8], payload: &[u8]) {
    buf.push(tag);
    varint::put(buf, header.len() as u64);
    buf.extend_from_slice(header);
    varint::put(buf, payload.len() as u64);
    buf.extend_from_slice(payload);
}

/// Encode one column as a self-describing block.
pub fn encode_block(buf: &mut Vec<u8>, col: &ColumnValues, raw_fallback_ratio: f64) {
    match col {
        ColumnValues::Int(values) => {
            let mut payload = Vec::new();
            if values.iter().all(|&v| v >= 0) {
                for &v in values {
                    varint::put(&mut payload, v as u64);
                }
                write_block(buf, CODEC_VARINT, &[], &payload);
            } else {
                for &v in values {
                    varint::put_signed(&mut payload, v);
                }
                write_block(buf, CODEC_ZIGZAG_VARINT, &[], &payload);
            }
        }
        ColumnValues::Ts { values, format } => {
            let mut header = Vec::new();
            format.write(&mut header);
            let mut payload = Vec::new();
            let mut prev = 0i64;
            for &v in values {
                varint::put_signed(&mut payload, v.wrapping_sub(prev));
                prev = v;
            }
            write_block(buf, CODEC_DELTA_ZIGZAG_VARINT, &header, &payload);
        }
        ColumnValues::SeverityIds(ids) => {
            let mut payload = Vec::new();
            for &id in ids {
                varint::put(&mut payload, id as u64);
            }
            write_block(buf, CODEC_DICT_GLOBAL, &[GLOBAL_SEVERITY], &payload);
        }
        ColumnValues::PoolIds(ids) => {
            let mut payload = Vec::new();
            for &id in ids {
                varint::put(&mut payload, id as u64);
            }
            write_block(buf, CODEC_DICT_GLOBAL, &[GLOBAL_MESSAGE_POOL], &payload);
        }
        ColumnValues::Str(values) => {
            let mut dict = DictBuilder::new();
            let ids: Vec<u32> = values.iter().map(|v| dict.intern(v)).collect();
            let dense_enough =
                (dict.len() as f64) < raw_fallback_ratio * (values.len().max(1) as f64);
            if dense_enough {
                let mut header = Vec::new();
                dict.write(&mut header);
                let mut payload = Vec::new();
                for id in ids {
                    varint::put(&mut payload, id as u64);
                }
                write_block(buf, CODEC_DICT_LOCAL, &header, &payload);
            } else {
                let mut payload = Vec::new();
                for v in values {
                    varint::put(&mut payload, v.len() as u64);
                    payload.extend_from_slice(v);
                }
                write_block(buf, CODEC_RAW, &[], &payload);
            }
        }
    }
}

/// Encode the per-line template-id stream: RLE (run_length, value) pairs.
/// Runs of length one are valid pairs, so no escape marker is needed.
pub fn encode_tid_stream(buf: &mut Vec<u8>, tids: &[u32]) {
    let mut payload = Vec::new();
    let mut i = 0usize;
    while i < tids.len() {
        let v = tids[i];
        let mut run = 1u64;
        while i + (run as usize) < tids.len() && tids[i + run as usize] == v {
            run += 1;
        }
        varint::put(&mut payload, run);
        varint::put(&mut payload, v as u64);
        i += run as usize;
    }
    write_block(buf, CODEC_RLE_VARINT, &[], &payload);
}

// =============================================================================
// Block decoding
// =============================================================================

/// Parsed block frame: tag plus borrowed header and payload slices.
pub struct Block<'a> {
    pub tag: u8,
    pub header: &'a [u8],
    pub header_base: usize,
    pub payload: &'a [u8],
    pub payload_base: usize,
    /// Total encoded size of the block, for walking adjacent blocks.
    pub encoded_len: usize,
}

pub fn parse_block<'a>(data: &'a [u8], base: usize, section: Section) -> Result<Block<'a>> {
    let mut cur = Cursor::new(data, base, section);
    let tag = cur.u8()?;
    let header_len = cur.len()?;
    let header_base = cur.offset();
    let header = cur.bytes(header_len)?;
    let payload_len = cur.len()?;
    let payload_base = cur.offset();
    let payload = cur.bytes(payload_len)?;
    let encoded_len = cur.offset() - base;
    Ok(Block {
        tag,
        header,
        header_base,
        payload,
        payload_base,
        encoded_len,
    })
}

/// A fully decoded column. Byte-valued columns borrow from the container
/// body; numeric columns are materialized.
#[derive(Debug)]
pub enum DecodedColumn<'a> {
    Ints(Vec<i64>),
    Ts { values: Vec<i64>, format: TsFormat },
    Bytes(Vec<&'a [u8]>),
}

impl<'a> DecodedColumn<'a> {
    pub fn len(&self) -> usize {
        match self {
            DecodedColumn::Ints(v) => v.len(),
            DecodedColumn::Ts { values, .. } => values.len(),
            DecodedColumn::Bytes(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append the textual form of one row.
    pub fn render_row(&self, row: usize, out: &mut Vec<u8>) {
        use std::io::Write;
        match self {
            DecodedColumn::Ints(v) => {
                if let Some(n) = v.get(row) {
                    let _ = write!(out, "{}", n);
                }
            }
            DecodedColumn::Ts { values, format } => {
                if let Some(ms) = values.get(row) {
                    render_timestamp(*ms, format, out);
                }
            }
            DecodedColumn::Bytes(v) => {
                if let Some(b) = v.get(row) {
                    out.extend_from_slice(b);
                }
            }
        }
    }
}

/// Decode a whole column block. `section` names the block for error reports.
pub fn decode_block<'a>(
    block: &Block<'a>,
    section: Section,
    globals: &Globals<'a>,
) -> Result<DecodedColumn<'a>> {
    match block.tag {
        CODEC_VARINT => {
            let mut cur = Cursor::new(block.payload, block.payload_base, section);
            let mut out = Vec::new();
            while !cur.is_empty() {
                out.push(cur.u64()? as i64);
            }
            Ok(DecodedColumn::Ints(out))
        }
        CODEC_ZIGZAG_VARINT => {
            let mut cur = Cursor::new(block.payload, block.payload_base, section);
            let mut out = Vec::new();
            while !cur.is_empty() {
                out.push(cur.i64()?);
            }
            Ok(DecodedColumn::Ints(out))
        }
        CODEC_DELTA_ZIGZAG_VARINT => {
            let mut hcur = Cursor::new(block.header, block.header_base, section);
            let format = TsFormat::read(&mut hcur, section)?;
            let mut cur = Cursor::new(block.payload, block.payload_base, section);
            let mut out = Vec::new();
            let mut acc = 0i64;
            while !cur.is_empty() {
                acc = acc.wrapping_add(cur.i64()?);
                out.push(acc);
            }
            Ok(DecodedColumn::Ts {
                values: out,
                format,
            })
        }
        CODEC_DICT_LOCAL => {
            let mut hcur = Cursor::new(block.header, block.header_base, section);
            let entries = read_dict(&mut hcur)?;
            let mut cur = Cursor::new(block.payload, block.payload_base, section);
            let mut out = Vec::new();
            while !cur.is_empty() {
                let at = cur.offset();
                let id = cur.u64()?;
                let e = entries
                    .get(id as usize)
                    .copied()
                    .ok_or(Error::DictionaryIdOutOfRange {
                        id,
                        len: entries.len(),
                        section,
                        offset: at,
                    })?;
                out.push(e);
            }
            Ok(DecodedColumn::Bytes(out))
        }
        CODEC_DICT_GLOBAL => {
            let mut hcur = Cursor::new(block.header, block.header_base, section);
            let which = hcur.u8()?;
            let mut cur = Cursor::new(block.payload, block.payload_base, section);
            let mut out = Vec::new();
            while !cur.is_empty() {
                let at = cur.offset();
                let id = cur.u64()?;
                let e = match which {
                    GLOBAL_SEVERITY => globals.severity_entry(id, section, at)?,
                    GLOBAL_MESSAGE_POOL => globals.pool_entry(id, section, at)?,
                    tag => {
                        return Err(Error::UnknownCodecTag {
                            tag,
                            section,
                            offset: block.header_base,
                        })
                    }
                };
                out.push(e);
            }
            Ok(DecodedColumn::Bytes(out))
        }
        CODEC_RAW => {
            let mut cur = Cursor::new(block.payload, block.payload_base, section);
            let mut out = Vec::new();
            while !cur.is_empty() {
                let len = cur.len()?;
                out.push(cur.bytes(len)?);
            }
            Ok(DecodedColumn::Bytes(out))
        }
        CODEC_RLE_VARINT => {
            let mut cur = Cursor::new(block.payload, block.payload_base, section);
            let mut out = Vec::new();
            while !cur.is_empty() {
                let run = cur.u64()?;
                let v = cur.u64()? as i64;
                for _ in 0..run {
                    out.push(v);
                }
            }
            Ok(DecodedColumn::Ints(out))
        }
        tag => Err(Error::UnknownCodecTag {
            tag,
            section,
            offset: block.payload_base,
        }),
    }
}

/// Decode an RLE template-id stream into one id per line.
pub fn decode_tid_stream(data: &[u8], base: usize, n_lines: u64) -> Result<Vec<u32>> {
    let section = Section::TemplateIdStream;
    let block = parse_block(data, base, section)?;
    if block.tag != CODEC_RLE_VARINT {
        return Err(Error::UnknownCodecTag {
            tag: block.tag,
            section,
            offset: base,
        });
    }
    let mut cur = Cursor::new(block.payload, block.payload_base, section);
    let mut out = Vec::with_capacity(n_lines as usize);
    while !cur.is_empty() {
        let run = cur.u64()?;
        let v = cur.u64()?;
        for _ in 0..run.min(n_lines - out.len() as u64) {
            out.push(v as u32);
        }
    }
    if out.len() as u64 != n_lines {
        return Err(Error::TruncatedContainer {
            section,
            offset: block.payload_base + block.payload.len(),
        });
    }
    Ok(out)
}

// =============================================================================
// Pruned scans for the query executor
// =============================================================================

/// Rows whose dictionary id is in `targets`. Scans only the id payload.
pub fn scan_id_rows(block: &Block<'_>, section: Section, targets: &[u64]) -> Result<Vec<u32>> {
    let mut cur = Cursor::new(block.payload, block.payload_base, section);
    let mut rows = Vec::new();
    let mut row = 0u32;
    while !cur.is_empty() {
        let id = cur.u64()?;
        if targets.contains(&id) {
            rows.push(row);
        }
        row += 1;
    }
    Ok(rows)
}

/// Rows whose delta-decoded timestamp lies in `[lo, hi]`. The prefix sum is
/// streamed; nothing is materialized.
pub fn scan_ts_rows(block: &Block<'_>, section: Section, lo: i64, hi: i64) -> Result<Vec<u32>> {
    let mut cur = Cursor::new(block.payload, block.payload_base, section);
    let mut rows = Vec::new();
    let mut acc = 0i64;
    let mut row = 0u32;
    while !cur.is_empty() {
        acc = acc.wrapping_add(cur.i64()?);
        if acc >= lo && acc <= hi {
            rows.push(row);
        }
        row += 1;
    }
    Ok(rows)
}

/// Look up a value in a local-dictionary block header. `None` means the
/// value cannot occur in this column and its payload need not be scanned.
pub fn local_dict_id(block: &Block<'_>, section: Section, value: &[u8]) -> Result<Option<u64>> {
    let mut hcur = Cursor::new(block.header, block.header_base, section);
    let entries = read_dict(&mut hcur)?;
    Ok(entries
        .iter()
        .position(|e| *e == value)
        .map(|p| p as u64))
}

/// Rows of a raw block equal to `value` (fallback path for high-cardinality
/// columns).
pub fn scan_raw_rows(block: &Block<'_>, section: Section, value: &[u8]) -> Result<Vec<u32>> {
    let mut cur = Cursor::new(block.payload, block.payload_base, section);
    let mut rows = Vec::new();
    let mut row = 0u32;
    while !cur.is_empty() {
        let len = cur.len()?;
        if cur.bytes(len)? == value {
            rows.push(row);
        }
        row += 1;
    }
    Ok(rows)
}
