//! Configuration and on-disk constants for the LSC container format

/// Magic bytes for an LSC container.
pub const MAGIC: [u8; 4] = *b"LSC1";

/// Current format version.
pub const VERSION: u16 = 1;

/// Header flag bit 0: an entropy dictionary precedes the compressed body.
pub const FLAG_ENTROPY_DICT: u16 = 0x0001;

/// Fixed header size: magic(4) + version(2) + flags(2) + footer_offset(8).
pub const HEADER_LEN: usize = 16;

/// Fixed footer size: n_lines(8) + n_templates(4) + four section offsets(32) + crc32(4).
pub const FOOTER_LEN: usize = 48;

/// Column block codec tags
pub const CODEC_RAW: u8 = 0x01;
pub const CODEC_VARINT: u8 = 0x02;
pub const CODEC_ZIGZAG_VARINT: u8 = 0x03;
pub const CODEC_DELTA_ZIGZAG_VARINT: u8 = 0x04;
pub const CODEC_DICT_LOCAL: u8 = 0x05;
pub const CODEC_DICT_GLOBAL: u8 = 0x06;
pub const CODEC_RLE_VARINT: u8 = 0x07;

/// Template table slot tags
pub const SLOT_LITERAL: u8 = 0x00;
pub const SLOT_VARIABLE: u8 = 0x01;

/// Global dictionary selectors (header byte of a CODEC_DICT_GLOBAL block)
pub const GLOBAL_SEVERITY: u8 = 0;
pub const GLOBAL_MESSAGE_POOL: u8 = 1;

/// Configuration for the compression pipeline
#[derive(Debug, Clone)]
pub struct CompressConfig {
    /// Minimum lines sharing a shape before it becomes a template (default 3)
    pub min_support: usize,
    /// Positional agreement required to absorb an unmatched line (default 0.8)
    pub absorb_threshold: f64,
    /// Ceiling on distinct templates before compression aborts (default 10000)
    pub max_templates: usize,
    /// zstd compression level for the entropy pass (default 15)
    pub zstd_level: i32,
    /// Train a zstd dictionary on column payloads before the entropy pass
    pub train_entropy_dict: bool,
    /// Sample budget for dictionary training (default 1 MiB)
    pub dict_sample_bytes: usize,
    /// Size cap for a trained dictionary (default 16 KiB)
    pub dict_max_bytes: usize,
    /// Local dictionaries fall back to raw when distinct/rows reaches this ratio
    pub raw_fallback_ratio: f64,
}

impl Default for CompressConfig {
    fn default() -> Self {
        Self {
            min_support: 3,
            absorb_threshold: 0.8,
            max_templates: 10_000,
            zstd_level: 15,
            train_entropy_dict: false,
            dict_sample_bytes: 1024 * 1024,
            dict_max_bytes: 16 * 1024,
            raw_fallback_ratio: 0.5,
        }
    }
}
