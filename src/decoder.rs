//! Full reconstruction of the original line stream from a container.
//!
//! Every column of every template is decoded and lines are re-rendered in
//! input order by interleaving literal slots with column values.

use crate::column::{decode_block, DecodedColumn};
use crate::container::Container;
use crate::error::{Error, Result, Section};
use crate::template::{Slot, Template};

/// Render one row of a template by walking its shape.
pub(crate) fn render_line(tmpl: &Template, cols: &[DecodedColumn<'_>], row: usize) -> Vec<u8> {
    let mut out = Vec::new();
    for slot in tmpl.slots() {
        match slot {
            Slot::Literal(b) => out.extend_from_slice(b),
            Slot::Variable { column, .. } => {
                if let Some(col) = cols.get(*column as usize) {
                    col.render_row(row, &mut out);
                }
            }
        }
    }
    out
}

/// Decode all columns of one template, checking row counts.
pub(crate) fn decode_template_columns<'a>(
    container: &'a Container,
    template: usize,
    expected_rows: usize,
) -> Result<Vec<DecodedColumn<'a>>> {
    let globals = container.globals();
    let tmpl = &container.templates()[template];
    let n_cols = tmpl.n_columns() as usize;
    let mut cols = Vec::with_capacity(n_cols);
    for c in 0..n_cols {
        let section = Section::ColumnBlock {
            template: template as u32,
            column: c as u32,
        };
        let block = container.column_block(template, c)?;
        let col = decode_block(&block, section, &globals)?;
        if col.len() < expected_rows {
            return Err(Error::TruncatedContainer {
                section,
                offset: block.payload_base + block.payload.len(),
            });
        }
        cols.push(col);
    }
    Ok(cols)
}

/// Decompressor over one opened container.
pub struct Decompressor {
    container: Container,
}

impl Decompressor {
    /// Open a container for full reconstruction. The body checksum is
    /// enforced here; partial reads (count, filtered queries) go through
    /// [`Container`] directly and survive localized damage.
    pub fn new(bytes: &[u8]) -> Result<Self> {
        let container = Container::open(bytes)?;
        container.verify()?;
        Ok(Self { container })
    }

    pub fn container(&self) -> &Container {
        &self.container
    }

    /// Reconstruct every line, byte-exact, in input order.
    pub fn lines(&self) -> Result<Vec<Vec<u8>>> {
        let tids = self.container.tid_stream()?;
        let n_templates = self.container.templates().len();

        let mut rows_per_template = vec![0usize; n_templates];
        for &t in &tids {
            if (t as usize) < n_templates {
                rows_per_template[t as usize] += 1;
            } else {
                return Err(Error::DictionaryIdOutOfRange {
                    id: t as u64,
                    len: n_templates,
                    section: Section::TemplateIdStream,
                    offset: 0,
                });
            }
        }

        let mut columns: Vec<Option<Vec<DecodedColumn<'_>>>> = Vec::new();
        columns.resize_with(n_templates, || None);

        let mut next_row = vec![0usize; n_templates];
        let mut out = Vec::with_capacity(tids.len());
        for &t in &tids {
            let t = t as usize;
            if columns[t].is_none() {
                columns[t] = Some(decode_template_columns(
                    &self.container,
                    t,
                    rows_per_template[t],
                )?);
            }
            let cols = columns[t].as_ref().unwrap();
            let row = next_row[t];
            next_row[t] += 1;
            out.push(render_line(&self.container.templates()[t], cols, row));
        }
        Ok(out)
    }

    /// Reconstruct into a single buffer with newline separators.
    pub fn text(&self) -> Result<Vec<u8>> {
        let lines = self.lines()?;
        let mut out = Vec::new();
        for line in &lines {
            out.extend_from_slice(line);
            out.push(b'\n');
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CompressConfig;
    use crate::encoder::Compressor;

    fn roundtrip(lines: &[&[u8]]) {
        let (bytes, _) = Compressor::default().compress(lines.iter().copied()).unwrap();
        let got = Decompressor::new(&bytes).unwrap().lines().unwrap();
        assert_eq!(got.len(), lines.len());
        for (i, (orig, dec)) in lines.iter().zip(got.iter()).enumerate() {
            assert_eq!(
                *orig,
                dec.as_slice(),
                "line {} mismatch: {:?} vs {:?}",
                i,
                String::from_utf8_lossy(orig),
                String::from_utf8_lossy(dec)
            );
        }
    }

    #[test]
    fn test_roundtrip_apache() {
        roundtrip(&[
            b"[Thu Jun 09 06:07:04 2005] [notice] LDAP: Built with OpenLDAP",
            b"[Thu Jun 09 06:07:05 2005] [notice] LDAP: SSL support unavailable",
            b"[Thu Jun 09 06:07:06 2005] [error] LDAP: lookup failed",
        ]);
    }

    #[test]
    fn test_roundtrip_syslog() {
        roundtrip(&[
            b"Jun  9 06:06:01 combo sshd[19939]: session opened for user root",
            b"Jun  9 06:06:02 combo sshd[19940]: session opened for user web",
            b"Jun  9 06:07:02 combo sshd[19939]: session closed for user root",
        ]);
    }

    #[test]
    fn test_roundtrip_preserves_whitespace() {
        roundtrip(&[
            b"  padded   line  one ",
            b"  padded   line  two ",
            b"  padded   line  three ",
            b"\ttab\tseparated\tvalues",
        ]);
    }

    #[test]
    fn test_roundtrip_empty_and_singleton_lines(){
        roundtrip(&[
            b"",
            b"an only line of its kind",
            b"",
            b"key=value pairs user=alice ip=10.0.0.1",
            b"",
        ]);
    }

    #[test]
    fn test_roundtrip_minority_absorbed() {
        let mut lines: Vec<Vec<u8>> = (0..1000)
            .map(|i| format!("request {} served in {} ms", i, i % 97).into_bytes())
            .collect();
        lines.push(b"request 4 dropped by filter".to_vec());
        lines.push(b"request 9 rejected by quota".to_vec());
        let refs: Vec<&[u8]> = lines.iter().map(|l| l.as_slice()).collect();
        roundtrip(&refs);
    }

    #[test]
    fn test_roundtrip_quoted_and_ipv6() {
        roundtrip(&[
            b"accept from 2001:db8:0:0:0:0:0:1 msg=\"hello there\"",
            b"accept from 2001:db8:0:0:0:0:0:2 msg=\"bye for now\"",
            b"accept from 2001:db8:0:0:0:0:0:1 msg=\"hello there\"",
        ]);
    }

    #[test]
    fn test_roundtrip_binary_bytes() {
        roundtrip(&[
            b"odd \x01 bytes \xFE\xFF here",
            b"odd \x02 bytes \xFD\xFC here",
            b"odd \x03 bytes \xFB\xFA here",
        ]);
    }

    #[test]
    fn test_roundtrip_mixed_timestamp_layouts() {
        // Layout differs across rows of one column: the codec must fall
        // back rather than normalize.
        roundtrip(&[
            b"at 2024-12-01 10:00:00 ok",
            b"at 2024-12-01T10:00:01Z ok",
            b"at 2024-12-01 10:00:02 ok",
        ]);
    }

    #[test]
    fn test_text_roundtrip_with_newlines() {
        let input = b"alpha beta 1\nalpha beta 2\nalpha beta 3\n";
        let (bytes, _) = Compressor::default().compress_text(input).unwrap();
        let out = Decompressor::new(&bytes).unwrap().text().unwrap();
        assert_eq!(out, input);
    }

    #[test]
    fn test_roundtrip_high_cardinality_hosts() {
        // Force the raw fallback path for a string column.
        let lines: Vec<Vec<u8>> = (0..40)
            .map(|i| format!("probe host{}.example.com alive", i).into_bytes())
            .collect();
        let refs: Vec<&[u8]> = lines.iter().map(|l| l.as_slice()).collect();
        roundtrip(&refs);
    }

    #[test]
    fn test_roundtrip_with_min_support_one() {
        let config = CompressConfig {
            min_support: 1,
            ..Default::default()
        };
        let compressor = Compressor::new(config);
        let lines: Vec<&[u8]> = vec![
            b"first singular line 11",
            b"second singular line 22",
            b"third line of a different shape entirely",
        ];
        let (bytes, _) = compressor.compress(lines.iter().copied()).unwrap();
        let got = Decompressor::new(&bytes).unwrap().lines().unwrap();
        let got_refs: Vec<&[u8]> = got.iter().map(|l| l.as_slice()).collect();
        assert_eq!(got_refs, lines);
    }
}
