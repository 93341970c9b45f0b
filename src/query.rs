//! Query execution against an opened container.
//!
//! Predicates are conjunctions over severity, source address and timestamp
//! range. Evaluation decodes only the columns a predicate names, cheapest
//! first (severity ids, then timestamps, then addresses); templates whose
//! local dictionary cannot contain the requested value are skipped without
//! touching their payloads. Row projection decodes the remaining columns
//! only for templates that produced matches.

use crate::classify::FieldType;
use crate::column::{local_dict_id, scan_id_rows, scan_raw_rows, scan_ts_rows, DecodedColumn};
use crate::config::{CODEC_DELTA_ZIGZAG_VARINT, CODEC_DICT_LOCAL, CODEC_RAW};
use crate::container::Container;
use crate::decoder::{decode_template_columns, render_line};
use crate::error::{Error, Result, Section};

/// A conjunctive filter over the indexed fields.
#[derive(Debug, Clone, Default)]
pub struct Predicate {
    severities: Option<Vec<Vec<u8>>>,
    ipv4: Option<Vec<u8>>,
    ts_lo: Option<i64>,
    ts_hi: Option<i64>,
}

impl Predicate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Match any of the given severity names, case-insensitively.
    pub fn severity<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.severities = Some(
            names
                .into_iter()
                .map(|s| s.as_ref().as_bytes().to_vec())
                .collect(),
        );
        self
    }

    /// Match an exact source address in dotted-quad form.
    pub fn ipv4(mut self, addr: &str) -> Self {
        self.ipv4 = Some(addr.as_bytes().to_vec());
        self
    }

    /// Match timestamps in `[lo, hi]` (epoch milliseconds, inclusive).
    pub fn ts_range(mut self, lo: i64, hi: i64) -> Self {
        self.ts_lo = Some(lo);
        self.ts_hi = Some(hi);
        self
    }

    pub fn ts_after(mut self, lo: i64) -> Self {
        self.ts_lo = Some(lo);
        self
    }

    pub fn ts_before(mut self, hi: i64) -> Self {
        self.ts_hi = Some(hi);
        self
    }

    fn has_ts(&self) -> bool {
        self.ts_lo.is_some() || self.ts_hi.is_some()
    }

    fn is_empty(&self) -> bool {
        self.severities.is_none() && self.ipv4.is_none() && !self.has_ts()
    }
}

/// One matching line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryMatch {
    pub line: u64,
    pub text: Vec<u8>,
}

/// Matches in input order, plus templates that had to be skipped because a
/// column block failed to decode. Damage in one template never hides
/// matches from the others.
#[derive(Debug)]
pub struct QueryResult {
    pub matches: Vec<QueryMatch>,
    pub unreadable: Vec<(u32, Error)>,
}

fn intersect_sorted(a: Vec<u32>, b: Vec<u32>) -> Vec<u32> {
    let mut out = Vec::with_capacity(a.len().min(b.len()));
    let (mut i, mut j) = (0usize, 0usize);
    while i < a.len() && j < b.len() {
        match a[i].cmp(&b[j]) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                out.push(a[i]);
                i += 1;
                j += 1;
            }
        }
    }
    out
}

impl Container {
    /// Evaluate a predicate, returning the first `limit` matches in input
    /// order (all matches when `limit` is `None`).
    pub fn filter(&self, pred: &Predicate, limit: Option<usize>) -> Result<QueryResult> {
        let mut unreadable: Vec<(u32, Error)> = Vec::new();

        // Requested severities resolve to global dictionary ids up front; an
        // empty id set cannot match anywhere.
        let severity_ids: Option<Vec<u64>> = pred.severities.as_ref().map(|names| {
            let globals = self.globals();
            let mut ids = Vec::new();
            for (id, entry) in globals.severity.iter().enumerate() {
                if names.iter().any(|n| n.eq_ignore_ascii_case(entry)) {
                    ids.push(id as u64);
                }
            }
            ids
        });
        if matches!(&severity_ids, Some(ids) if ids.is_empty()) {
            return Ok(QueryResult {
                matches: Vec::new(),
                unreadable,
            });
        }

        let tids = self.tid_stream()?;
        let n_templates = self.templates().len();
        let mut lines_of: Vec<Vec<u64>> = vec![Vec::new(); n_templates];
        for (line, &t) in tids.iter().enumerate() {
            if (t as usize) < n_templates {
                lines_of[t as usize].push(line as u64);
            }
        }

        // (line, template, row) triples for every surviving candidate.
        let mut candidates: Vec<(u64, u32, u32)> = Vec::new();
        for t in 0..n_templates {
            if lines_of[t].is_empty() {
                continue;
            }
            match self.template_rows(t, lines_of[t].len() as u32, pred, &severity_ids) {
                Ok(Some(rows)) => {
                    for row in rows {
                        if let Some(&line) = lines_of[t].get(row as usize) {
                            candidates.push((line, t as u32, row));
                        }
                    }
                }
                Ok(None) => {}
                Err(e) => unreadable.push((t as u32, e)),
            }
        }

        candidates.sort_unstable_by_key(|&(line, _, _)| line);
        if let Some(k) = limit {
            candidates.truncate(k);
        }

        // Projection: decode full columns only for templates with matches.
        let mut decoded: Vec<Option<Vec<DecodedColumn<'_>>>> = Vec::new();
        decoded.resize_with(n_templates, || None);
        let mut matches = Vec::with_capacity(candidates.len());
        for (line, t, row) in candidates {
            let t = t as usize;
            if decoded[t].is_none() {
                match decode_template_columns(self, t, lines_of[t].len()) {
                    Ok(cols) => decoded[t] = Some(cols),
                    Err(e) => {
                        unreadable.push((t as u32, e));
                        decoded[t] = Some(Vec::new());
                        continue;
                    }
                }
            }
            let cols = decoded[t].as_ref().unwrap();
            if cols.len() != self.templates()[t].n_columns() as usize {
                continue;
            }
            matches.push(QueryMatch {
                line,
                text: render_line(&self.templates()[t], cols, row as usize),
            });
        }

        Ok(QueryResult { matches, unreadable })
    }

    /// Matching rows of one template, or `None` when the template cannot
    /// contribute (missing field, dictionary miss, unparsed timestamps).
    fn template_rows(
        &self,
        t: usize,
        n_rows: u32,
        pred: &Predicate,
        severity_ids: &Option<Vec<u64>>,
    ) -> Result<Option<Vec<u32>>> {
        let tmpl = &self.templates()[t];
        let mut rows: Option<Vec<u32>> = None;

        if let Some(ids) = severity_ids {
            let Some(col) = tmpl.find_column(FieldType::Severity) else {
                return Ok(None);
            };
            let section = Section::ColumnBlock {
                template: t as u32,
                column: col,
            };
            let block = self.column_block(t, col as usize)?;
            let hit = scan_id_rows(&block, section, ids)?;
            if hit.is_empty() {
                return Ok(None);
            }
            rows = Some(hit);
        }

        if pred.has_ts() {
            let Some(col) = tmpl.find_column(FieldType::Timestamp) else {
                return Ok(None);
            };
            let section = Section::ColumnBlock {
                template: t as u32,
                column: col,
            };
            let block = self.column_block(t, col as usize)?;
            if block.tag != CODEC_DELTA_ZIGZAG_VARINT {
                // Timestamps that did not parse numerically cannot satisfy
                // an epoch-range predicate.
                return Ok(None);
            }
            let lo = pred.ts_lo.unwrap_or(i64::MIN);
            let hi = pred.ts_hi.unwrap_or(i64::MAX);
            let hit = scan_ts_rows(&block, section, lo, hi)?;
            if hit.is_empty() {
                return Ok(None);
            }
            rows = Some(match rows {
                Some(prev) => intersect_sorted(prev, hit),
                None => hit,
            });
            if matches!(&rows, Some(r) if r.is_empty()) {
                return Ok(None);
            }
        }

        if let Some(addr) = &pred.ipv4 {
            let Some(col) = tmpl.find_column(FieldType::Ipv4) else {
                return Ok(None);
            };
            let section = Section::ColumnBlock {
                template: t as u32,
                column: col,
            };
            let block = self.column_block(t, col as usize)?;
            let hit = match block.tag {
                CODEC_DICT_LOCAL => match local_dict_id(&block, section, addr)? {
                    // Dictionary miss: the address occurs nowhere in this
                    // template, so no row is visited.
                    None => return Ok(None),
                    Some(id) => scan_id_rows(&block, section, &[id])?,
                },
                CODEC_RAW => scan_raw_rows(&block, section, addr)?,
                _ => return Ok(None),
            };
            if hit.is_empty() {
                return Ok(None);
            }
            rows = Some(match rows {
                Some(prev) => intersect_sorted(prev, hit),
                None => hit,
            });
            if matches!(&rows, Some(r) if r.is_empty()) {
                return Ok(None);
            }
        }

        match rows {
            Some(r) => Ok(Some(r)),
            // Empty predicate: every row matches.
            None => Ok(Some((0..n_rows).collect())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::parse_timestamp;
    use crate::encoder::Compressor;

    fn compress(lines: &[&[u8]]) -> Vec<u8> {
        Compressor::default()
            .compress(lines.iter().copied())
            .unwrap()
            .0
    }

    fn texts(result: &QueryResult) -> Vec<String> {
        result
            .matches
            .iter()
            .map(|m| String::from_utf8_lossy(&m.text).into_owned())
            .collect()
    }

    const APACHE: &[&[u8]] = &[
        b"[Thu Jun 09 06:07:04 2005] [notice] LDAP: Built with OpenLDAP",
        b"[Thu Jun 09 06:07:05 2005] [notice] LDAP: SSL support unavailable",
        b"[Thu Jun 09 06:07:06 2005] [error] LDAP: lookup failed",
    ];

    #[test]
    fn test_severity_filter_apache() {
        let bytes = compress(APACHE);
        let c = Container::open(&bytes).unwrap();
        assert_eq!(c.count(), 3);

        let result = c.filter(&Predicate::new().severity(["error"]), None).unwrap();
        assert!(result.unreadable.is_empty());
        assert_eq!(result.matches.len(), 1);
        assert_eq!(result.matches[0].line, 2);
        assert_eq!(
            result.matches[0].text,
            b"[Thu Jun 09 06:07:06 2005] [error] LDAP: lookup failed".to_vec()
        );

        // Case-insensitive and multi-valued.
        let result = c
            .filter(&Predicate::new().severity(["NOTICE", "ERROR"]), None)
            .unwrap();
        assert_eq!(result.matches.len(), 3);
    }

    #[test]
    fn test_unknown_severity_matches_nothing() {
        let bytes = compress(APACHE);
        let c = Container::open(&bytes).unwrap();
        let result = c.filter(&Predicate::new().severity(["fatal"]), None).unwrap();
        assert!(result.matches.is_empty());
    }

    #[test]
    fn test_time_range_thousand_lines() {
        let base = parse_timestamp(b"2024-12-01 10:00:00").unwrap().0;
        let lines: Vec<Vec<u8>> = (0..1000)
            .map(|i| {
                let mut ts = Vec::new();
                crate::column::render_timestamp(
                    base + i * 1000,
                    &crate::column::TsFormat::Iso {
                        sep: b' ',
                        subsec: 0,
                        suffix: Vec::new(),
                    },
                    &mut ts,
                );
                let mut line = ts;
                line.extend_from_slice(b" tick");
                line
            })
            .collect();
        let refs: Vec<&[u8]> = lines.iter().map(|l| l.as_slice()).collect();
        let bytes = compress(&refs);
        let c = Container::open(&bytes).unwrap();

        let pred = Predicate::new().ts_range(base + 100_000, base + 199_000);
        let result = c.filter(&pred, None).unwrap();
        assert_eq!(result.matches.len(), 100);
        assert_eq!(result.matches[0].line, 100);
        assert_eq!(result.matches[99].line, 199);
        for (m, i) in result.matches.iter().zip(100u64..) {
            assert_eq!(m.line, i);
            assert_eq!(m.text, lines[i as usize]);
        }
    }

    #[test]
    fn test_limit_returns_first_matches() {
        let bytes = compress(APACHE);
        let c = Container::open(&bytes).unwrap();
        let result = c
            .filter(&Predicate::new().severity(["notice"]), Some(1))
            .unwrap();
        assert_eq!(result.matches.len(), 1);
        assert_eq!(result.matches[0].line, 0);

        // Empty predicate with a limit lists the head of the stream.
        let result = c.filter(&Predicate::new(), Some(2)).unwrap();
        assert_eq!(result.matches.len(), 2);
        assert_eq!(result.matches[0].line, 0);
        assert_eq!(result.matches[1].line, 1);
    }

    #[test]
    fn test_conjunction() {
        let lines: Vec<&[u8]> = vec![
            b"2024-12-01 10:00:00 WARN conn from 10.0.0.1",
            b"2024-12-01 10:00:01 INFO conn from 10.0.0.1",
            b"2024-12-01 10:00:02 WARN conn from 10.0.0.2",
            b"2024-12-01 10:00:03 WARN conn from 10.0.0.1",
            b"2024-12-01 10:00:04 INFO conn from 10.0.0.2",
        ];
        let bytes = compress(&lines);
        let c = Container::open(&bytes).unwrap();
        let base = parse_timestamp(b"2024-12-01 10:00:00").unwrap().0;

        let pred = Predicate::new()
            .severity(["warn"])
            .ipv4("10.0.0.1")
            .ts_range(base, base + 3_000);
        let result = c.filter(&pred, None).unwrap();
        assert_eq!(
            result.matches.iter().map(|m| m.line).collect::<Vec<_>>(),
            vec![0, 3]
        );
    }

    #[test]
    fn test_ipv4_dictionary_miss_skips_template() {
        let lines: Vec<&[u8]> = vec![
            b"conn from 10.0.0.1 accepted",
            b"conn from 10.0.0.2 accepted",
            b"conn from 10.0.0.1 accepted",
            b"conn from 10.0.0.1 accepted",
        ];
        let bytes = compress(&lines);
        let mut c = Container::open(&bytes).unwrap();

        // Locate the address column and clobber its id payload. A query for
        // an absent address must still succeed because the dictionary miss
        // prunes the template before any row is read.
        let t = 0usize;
        let col = c.templates()[t]
            .find_column(FieldType::Ipv4)
            .unwrap() as usize;
        let block = c.column_block(t, col).unwrap();
        assert_eq!(block.tag, CODEC_DICT_LOCAL);
        let (start, len) = (block.payload_base, block.payload.len());
        for b in &mut c.body_mut()[start..start + len] {
            *b = 0x80;
        }

        let miss = c
            .filter(&Predicate::new().ipv4("10.0.0.3"), None)
            .unwrap();
        assert!(miss.matches.is_empty());
        assert!(miss.unreadable.is_empty());

        // The present address now trips on the corrupted payload instead.
        let hit = c.filter(&Predicate::new().ipv4("10.0.0.1"), None).unwrap();
        assert!(hit.matches.is_empty());
        assert_eq!(hit.unreadable.len(), 1);
        assert!(matches!(
            hit.unreadable[0].1,
            Error::VarintOverflow { .. }
        ));
    }

    #[test]
    fn test_corrupt_message_column_is_local() {
        // Two templates: severities live in one, messages in the other.
        let lines: Vec<&[u8]> = vec![
            b"[warn] disk almost full",
            b"[error] disk almost full",
            b"[warn] disk almost full",
            b"job 1 says hello",
            b"job 2 says goodbye",
            b"job 3 says nothing",
        ];
        let bytes = compress(&lines);
        let mut c = Container::open(&bytes).unwrap();

        // Find the template with a MESSAGE column and corrupt it.
        let (mt, mc) = c
            .templates()
            .iter()
            .enumerate()
            .find_map(|(i, t)| t.find_column(FieldType::Message).map(|col| (i, col as usize)))
            .expect("message template");
        let block = c.column_block(mt, mc).unwrap();
        let (start, len) = (block.payload_base, block.payload.len());
        for b in &mut c.body_mut()[start..start + len] {
            *b = 0xFF;
        }

        // Footer-only and unrelated-template reads still work.
        assert_eq!(c.count(), 6);
        let result = c.filter(&Predicate::new().severity(["error"]), None).unwrap();
        assert_eq!(result.matches.len(), 1);
        assert_eq!(texts(&result), vec!["[error] disk almost full"]);

        // Decoding the damaged column reports a typed fault with an offset.
        let section = Section::ColumnBlock {
            template: mt as u32,
            column: mc as u32,
        };
        let block = c.column_block(mt, mc).unwrap();
        let err = crate::column::decode_block(&block, section, &c.globals()).unwrap_err();
        match err {
            Error::VarintOverflow { offset, .. } => assert!(offset >= start),
            Error::DictionaryIdOutOfRange { offset, .. } => assert!(offset >= start),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_missing_field_excludes_template() {
        let lines: Vec<&[u8]> = vec![
            b"[warn] cache is cold",
            b"[error] cache is cold",
            b"[warn] cache is cold",
            b"plain status line 1",
            b"plain status line 2",
            b"plain status line 3",
        ];
        let bytes = compress(&lines);
        let c = Container::open(&bytes).unwrap();
        let result = c
            .filter(&Predicate::new().severity(["warn", "error"]), None)
            .unwrap();
        assert_eq!(
            result.matches.iter().map(|m| m.line).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
    }
}
