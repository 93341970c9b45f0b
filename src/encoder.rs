//! Compression pipeline: lines -> tokens -> templates -> columns -> container.
//!
//! The stages run sequentially; each consumes the previous stage's full
//! output. Tokens and line assignments live only for the duration of one
//! `compress` call.

use crate::classify::{label_tokens, LabeledToken};
use crate::column::{build_column, ColumnValues};
use crate::config::CompressConfig;
use crate::container;
use crate::dict::{DictBuilder, PoolBuilder};
use crate::error::Result;
use crate::template::{Slot, TemplateExtractor};
use crate::tokenize::tokenize;

/// Summary of one compression run.
#[derive(Debug, Clone)]
pub struct CompressStats {
    pub input_bytes: u64,
    pub output_bytes: u64,
    pub n_lines: u64,
    pub n_templates: u32,
    /// Fraction of lines in templates at or above the support threshold.
    pub coverage: f64,
}

impl CompressStats {
    pub fn ratio(&self) -> f64 {
        if self.output_bytes == 0 {
            return 0.0;
        }
        self.input_bytes as f64 / self.output_bytes as f64
    }
}

/// A template surfaced by schema extraction.
#[derive(Debug, Clone)]
pub struct SchemaEntry {
    pub pattern: String,
    pub matches: u64,
    pub fields: Vec<&'static str>,
}

pub struct Compressor {
    config: CompressConfig,
}

impl Compressor {
    pub fn new(config: CompressConfig) -> Self {
        Self { config }
    }

    /// Compress a finite ordered sequence of lines into one container blob.
    /// A single trailing newline per line is tolerated and stripped.
    pub fn compress<'a, I>(&self, lines: I) -> Result<(Vec<u8>, CompressStats)>
    where
        I: IntoIterator<Item = &'a [u8]>,
    {
        let lines: Vec<&[u8]> = lines
            .into_iter()
            .map(|l| l.strip_suffix(b"\n").unwrap_or(l))
            .collect();
        let input_bytes: u64 = lines.iter().map(|l| l.len() as u64).sum();

        let labeled: Vec<Vec<LabeledToken>> = lines
            .iter()
            .map(|l| label_tokens(l, &tokenize(l)))
            .collect();

        let extraction = TemplateExtractor::new(&self.config).extract(&lines, &labeled)?;
        let templates = &extraction.templates;
        tracing::debug!(
            lines = lines.len(),
            templates = templates.len(),
            "templates extracted"
        );

        // Gather raw slot values per template, row-aligned by construction:
        // the k-th append into each column belongs to the k-th line of the
        // template.
        let mut raw_columns: Vec<Vec<Vec<&[u8]>>> = templates
            .iter()
            .map(|t| vec![Vec::new(); t.n_columns() as usize])
            .collect();
        for (i, line) in lines.iter().enumerate() {
            let t = extraction.assignments[i] as usize;
            let vals = templates[t]
                .capture(line, &labeled[i])
                .expect("assigned line fits its template shape");
            for (c, v) in vals.into_iter().enumerate() {
                raw_columns[t][c].push(v);
            }
        }

        // Typed columns; global dictionaries fill in template-major order.
        let mut severity = DictBuilder::new();
        let mut pool = PoolBuilder::new();
        let columns: Vec<Vec<ColumnValues>> = templates
            .iter()
            .zip(raw_columns.iter())
            .map(|(t, raws)| {
                raws.iter()
                    .enumerate()
                    .map(|(c, raw)| {
                        let field = t
                            .column_field(c as u32)
                            .unwrap_or(crate::classify::FieldType::Message);
                        build_column(field, raw, &mut severity, &mut pool)
                    })
                    .collect()
            })
            .collect();

        let bytes = container::assemble(
            templates,
            &severity,
            &pool,
            &extraction.assignments,
            &columns,
            &self.config,
        )?;

        let covered: u64 = templates
            .iter()
            .filter(|t| t.match_count >= self.config.min_support as u64)
            .map(|t| t.match_count)
            .sum();
        let stats = CompressStats {
            input_bytes,
            output_bytes: bytes.len() as u64,
            n_lines: lines.len() as u64,
            n_templates: templates.len() as u32,
            coverage: if lines.is_empty() {
                0.0
            } else {
                covered as f64 / lines.len() as f64
            },
        };
        tracing::debug!(
            input = stats.input_bytes,
            output = stats.output_bytes,
            "compression finished"
        );
        Ok((bytes, stats))
    }

    /// Compress a whole text buffer. The final newline terminates the last
    /// line rather than opening an empty one.
    pub fn compress_text(&self, input: &[u8]) -> Result<(Vec<u8>, CompressStats)> {
        let mut lines: Vec<&[u8]> = input.split(|&b| b == b'\n').collect();
        if input.ends_with(b"\n") || input.is_empty() {
            lines.pop();
        }
        self.compress(lines)
    }

    /// Recover templates without building a container.
    pub fn extract_schemas<'a, I>(&self, lines: I) -> Result<Vec<SchemaEntry>>
    where
        I: IntoIterator<Item = &'a [u8]>,
    {
        let lines: Vec<&[u8]> = lines
            .into_iter()
            .map(|l| l.strip_suffix(b"\n").unwrap_or(l))
            .collect();
        let labeled: Vec<Vec<LabeledToken>> = lines
            .iter()
            .map(|l| label_tokens(l, &tokenize(l)))
            .collect();
        let extraction = TemplateExtractor::new(&self.config).extract(&lines, &labeled)?;
        Ok(extraction
            .templates
            .iter()
            .map(|t| SchemaEntry {
                pattern: t.pattern(),
                matches: t.match_count,
                fields: t
                    .slots()
                    .iter()
                    .filter_map(|s| match s {
                        Slot::Variable { field, .. } => Some(field.name()),
                        Slot::Literal(_) => None,
                    })
                    .collect(),
            })
            .collect())
    }
}

impl Default for Compressor {
    fn default() -> Self {
        Self::new(CompressConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::Container;

    const APACHE: &[&[u8]] = &[
        b"[Thu Jun 09 06:07:04 2005] [notice] LDAP: Built with OpenLDAP",
        b"[Thu Jun 09 06:07:05 2005] [notice] LDAP: SSL support unavailable",
        b"[Thu Jun 09 06:07:06 2005] [error] LDAP: lookup failed",
    ];

    #[test]
    fn test_compress_basic() {
        let (bytes, stats) = Compressor::default()
            .compress(APACHE.iter().copied())
            .unwrap();
        assert!(!bytes.is_empty());
        assert_eq!(stats.n_lines, 3);
        assert_eq!(stats.n_templates, 1);
        let c = Container::open(&bytes).unwrap();
        assert_eq!(c.count(), 3);
        // Severity dictionary carries the observed forms in order.
        let g = c.globals();
        assert_eq!(g.severity, vec![&b"notice"[..], b"error"]);
    }

    #[test]
    fn test_deterministic_output() {
        let compressor = Compressor::default();
        let (a, _) = compressor.compress(APACHE.iter().copied()).unwrap();
        let (b, _) = compressor.compress(APACHE.iter().copied()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_compress_text_trailing_newline() {
        let compressor = Compressor::default();
        let (_, stats) = compressor.compress_text(b"one plain line\n").unwrap();
        assert_eq!(stats.n_lines, 1);
        let (_, stats) = compressor.compress_text(b"a line\nanother line").unwrap();
        assert_eq!(stats.n_lines, 2);
        let (_, stats) = compressor.compress_text(b"").unwrap();
        assert_eq!(stats.n_lines, 0);
    }

    #[test]
    fn test_extract_schemas() {
        let schemas = Compressor::default()
            .extract_schemas(APACHE.iter().copied())
            .unwrap();
        assert_eq!(schemas.len(), 1);
        assert_eq!(schemas[0].matches, 3);
        assert_eq!(
            schemas[0].pattern,
            "[<TIMESTAMP>] [<SEVERITY>] LDAP: <MESSAGE>"
        );
        assert_eq!(schemas[0].fields, vec!["TIMESTAMP", "SEVERITY", "MESSAGE"]);
    }

    #[test]
    fn test_single_line_container() {
        let (bytes, stats) = Compressor::default()
            .compress([&b"server started successfully"[..]])
            .unwrap();
        assert_eq!(stats.n_templates, 1);
        let c = Container::open(&bytes).unwrap();
        assert_eq!(c.count(), 1);
        // No repetition, so nothing became a variable slot.
        assert_eq!(c.templates()[0].n_columns(), 0);
    }

    #[test]
    fn test_empty_input() {
        let (bytes, stats) = Compressor::default().compress(Vec::<&[u8]>::new()).unwrap();
        assert_eq!(stats.n_lines, 0);
        let c = Container::open(&bytes).unwrap();
        assert_eq!(c.count(), 0);
    }
}
