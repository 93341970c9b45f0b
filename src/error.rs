//! Typed errors for container reading, writing and queries.
//!
//! Read-side errors carry the section and the byte offset (within the
//! entropy-decoded body) at which the fault was detected.

use std::fmt;
use thiserror::Error;

/// Container region an error was detected in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    Header,
    Body,
    TemplateTable,
    GlobalDictionaries,
    TemplateIdStream,
    ColumnIndex,
    ColumnBlock { template: u32, column: u32 },
    Footer,
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Section::Header => write!(f, "header"),
            Section::Body => write!(f, "body"),
            Section::TemplateTable => write!(f, "template table"),
            Section::GlobalDictionaries => write!(f, "global dictionaries"),
            Section::TemplateIdStream => write!(f, "template-id stream"),
            Section::ColumnIndex => write!(f, "column index"),
            Section::ColumnBlock { template, column } => {
                write!(f, "column block (template {}, column {})", template, column)
            }
            Section::Footer => write!(f, "footer"),
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid magic bytes (expected LSC1)")]
    InvalidMagic,

    #[error("unsupported container version {0}")]
    UnsupportedVersion(u16),

    #[error("container truncated in {section} at offset {offset}")]
    TruncatedContainer { section: Section, offset: usize },

    #[error("body checksum mismatch (stored {stored:#010x}, computed {computed:#010x})")]
    ChecksumMismatch { stored: u32, computed: u32 },

    #[error("unknown codec tag {tag:#04x} in {section} at offset {offset}")]
    UnknownCodecTag {
        tag: u8,
        section: Section,
        offset: usize,
    },

    #[error("template budget exceeded: {count} templates (ceiling {ceiling})")]
    TemplateBudgetExceeded { count: usize, ceiling: usize },

    #[error("dictionary id {id} out of range ({len} entries) in {section} at offset {offset}")]
    DictionaryIdOutOfRange {
        id: u64,
        len: usize,
        section: Section,
        offset: usize,
    },

    #[error("varint does not terminate within 64 bits in {section} at offset {offset}")]
    VarintOverflow { section: Section, offset: usize },

    #[error("entropy decode failed: {0}")]
    EntropyDecodeFailed(String),

    #[error("entropy encode failed: {0}")]
    EntropyEncodeFailed(String),

    #[error("malformed slot (tag {tag:#04x}) in template table at offset {offset}")]
    MalformedSlot { tag: u8, offset: usize },
}

pub type Result<T> = std::result::Result<T, Error>;
