//! Semantic classification of surface tokens.
//!
//! Each token gets exactly one label from a closed set. Matching is ordered;
//! the first accepting pattern wins. Every match carries a confidence and the
//! template extractor treats anything below [`CONFIDENCE_FLOOR`] as a literal,
//! so words that merely resemble identifiers stay constant.
//!
//! Timestamps that span several surface tokens (`Thu Jun 09 06:07:04 2005`,
//! `Jun  9 06:06:01`) are coalesced into a single TIMESTAMP token before
//! per-token classification runs.

use crate::tokenize::{Token, TokenKind};
use lazy_static::lazy_static;
use regex::bytes::Regex;

/// Labels below this confidence are demoted to LITERAL.
pub const CONFIDENCE_FLOOR: f64 = 0.5;

/// Bounded severity vocabulary, matched case-insensitively.
pub const SEVERITY_LEVELS: &[&[u8]] = &[
    b"TRACE", b"DEBUG", b"INFO", b"NOTICE", b"WARN", b"WARNING", b"ERROR", b"FATAL", b"CRITICAL",
];

/// Closed set of field types. The discriminant is the byte stored in the
/// template table, so the order is part of the container format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FieldType {
    Timestamp = 0,
    Severity = 1,
    Ipv4 = 2,
    Ipv6 = 3,
    Integer = 4,
    Hex = 5,
    Uuid = 6,
    Host = 7,
    ProcessId = 8,
    Path = 9,
    Url = 10,
    QuotedString = 11,
    Message = 12,
    Literal = 13,
    Whitespace = 14,
}

impl FieldType {
    pub fn from_u8(b: u8) -> Option<Self> {
        match b {
            0 => Some(Self::Timestamp),
            1 => Some(Self::Severity),
            2 => Some(Self::Ipv4),
            3 => Some(Self::Ipv6),
            4 => Some(Self::Integer),
            5 => Some(Self::Hex),
            6 => Some(Self::Uuid),
            7 => Some(Self::Host),
            8 => Some(Self::ProcessId),
            9 => Some(Self::Path),
            10 => Some(Self::Url),
            11 => Some(Self::QuotedString),
            12 => Some(Self::Message),
            13 => Some(Self::Literal),
            14 => Some(Self::Whitespace),
            _ => None,
        }
    }

    /// Whether tokens of this type become variable slots in a template.
    pub fn is_variable(self) -> bool {
        !matches!(self, Self::Literal | Self::Whitespace)
    }

    /// Placeholder name used when rendering template patterns.
    pub fn name(self) -> &'static str {
        match self {
            Self::Timestamp => "TIMESTAMP",
            Self::Severity => "SEVERITY",
            Self::Ipv4 => "IPV4",
            Self::Ipv6 => "IPV6",
            Self::Integer => "INTEGER",
            Self::Hex => "HEX",
            Self::Uuid => "UUID",
            Self::Host => "HOST",
            Self::ProcessId => "PROCESS_ID",
            Self::Path => "PATH",
            Self::Url => "URL",
            Self::QuotedString => "QUOTED_STRING",
            Self::Message => "MESSAGE",
            Self::Literal => "LITERAL",
            Self::Whitespace => "WHITESPACE",
        }
    }
}

/// A surface token with its semantic label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LabeledToken {
    pub start: usize,
    pub len: usize,
    pub label: FieldType,
}

impl LabeledToken {
    #[inline]
    pub fn text<'a>(&self, line: &'a [u8]) -> &'a [u8] {
        &line[self.start..self.start + self.len]
    }
}

const MONTHS_ALT: &str = "Jan|Feb|Mar|Apr|May|Jun|Jul|Aug|Sep|Oct|Nov|Dec";

lazy_static! {
    // "Thu Jun 09 06:07:04 2005"
    static ref ASCTIME_RE: Regex = Regex::new(&format!(
        r"^(?:Mon|Tue|Wed|Thu|Fri|Sat|Sun) (?:{}) \d{{2}} \d{{2}}:\d{{2}}:\d{{2}} \d{{4}}",
        MONTHS_ALT
    ))
    .unwrap();

    // "09/Jun/2005:06:07:04"
    static ref CLF_RE: Regex = Regex::new(&format!(
        r"^\d{{2}}/(?:{})/\d{{4}}:\d{{2}}:\d{{2}}:\d{{2}}",
        MONTHS_ALT
    ))
    .unwrap();

    // "2024-12-01 10:00:00", "2024-12-01T10:00:00.123Z", offset suffixes
    static ref ISO_RE: Regex = Regex::new(
        r"^\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}:\d{2}(?:\.\d{1,3})?(?:Z|[+-]\d{2}:?\d{2})?"
    )
    .unwrap();

    // "Jun  9 06:06:01" (day space-padded to width 2)
    static ref SYSLOG_RE: Regex = Regex::new(&format!(
        r"^(?:{}) (?: \d|\d\d) \d{{2}}:\d{{2}}:\d{{2}}",
        MONTHS_ALT
    ))
    .unwrap();

    // Full (8-group) or compressed ("::") IPv6, assembled across tokens.
    static ref IPV6_RE: Regex = Regex::new(
        r"^(?:(?:[0-9A-Fa-f]{1,4}:){7}[0-9A-Fa-f]{1,4}|(?:[0-9A-Fa-f]{1,4}:)*:(?::?[0-9A-Fa-f]{1,4})+|::)"
    )
    .unwrap();

    static ref UUID_RE: Regex = Regex::new(
        r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$"
    )
    .unwrap();

    static ref HEX_RE: Regex = Regex::new(r"^(?:0x)?[0-9a-fA-F]{8,}$").unwrap();

    static ref HOST_RE: Regex = Regex::new(
        r"^[A-Za-z0-9][A-Za-z0-9-]*(?:\.[A-Za-z0-9][A-Za-z0-9-]*)+$"
    )
    .unwrap();

    static ref PATH_RE: Regex = Regex::new(r"^/[\w./~%+-]+$").unwrap();

    static ref URL_RE: Regex = Regex::new(r"^[a-z][a-z0-9+.-]*://[!-~]+$").unwrap();

    // URLs contain ':' and so always span several surface tokens.
    static ref URL_SPAN_RE: Regex = Regex::new(r"^[a-z][a-z0-9+.-]*://[!-~]+").unwrap();

    static ref INT_RE: Regex = Regex::new(r"^-?\d+$").unwrap();
}

/// Parse a canonical decimal integer: no leading zeros, no "-0", fits i64.
/// Values that fail this render differently than their source text and must
/// stay literal to keep reconstruction exact.
pub fn canonical_int(text: &[u8]) -> Option<i64> {
    if !INT_RE.is_match(text) {
        return None;
    }
    let digits = if text[0] == b'-' { &text[1..] } else { text };
    if digits.len() > 1 && digits[0] == b'0' {
        return None;
    }
    if text == b"-0" {
        return None;
    }
    std::str::from_utf8(text).ok()?.parse::<i64>().ok()
}

/// Canonical dotted-quad check: four octets 0-255, no leading zeros.
pub fn is_canonical_ipv4(text: &[u8]) -> bool {
    let mut parts = 0;
    for part in text.split(|&b| b == b'.') {
        parts += 1;
        if parts > 4 || part.is_empty() || part.len() > 3 {
            return false;
        }
        if !part.iter().all(|b| b.is_ascii_digit()) {
            return false;
        }
        if part.len() > 1 && part[0] == b'0' {
            return false;
        }
        let v: u32 = std::str::from_utf8(part).unwrap().parse().unwrap();
        if v > 255 {
            return false;
        }
    }
    parts == 4
}

pub fn is_severity(text: &[u8]) -> bool {
    SEVERITY_LEVELS
        .iter()
        .any(|lvl| lvl.eq_ignore_ascii_case(text))
}

/// Classify a single word-like token. First accepting pattern fixes the
/// label; ties are broken by this fixed ordering.
pub fn classify(text: &[u8]) -> (FieldType, f64) {
    if UUID_RE.is_match(text) {
        return (FieldType::Uuid, 0.98);
    }
    if is_canonical_ipv4(text) {
        return (FieldType::Ipv4, 0.95);
    }
    if canonical_int(text).is_some() {
        return (FieldType::Integer, 0.9);
    }
    if HEX_RE.is_match(text) {
        // All-letter runs like "deadbeef" are as likely English as hex.
        let has_digit = text.iter().any(|b| b.is_ascii_digit());
        return (FieldType::Hex, if has_digit { 0.85 } else { 0.4 });
    }
    if HOST_RE.is_match(text) {
        let has_alpha = text.iter().any(|b| b.is_ascii_alphabetic());
        let conf = if has_alpha && text.len() > 4 { 0.7 } else { 0.3 };
        return (FieldType::Host, conf);
    }
    if URL_RE.is_match(text) {
        return (FieldType::Url, 0.9);
    }
    if PATH_RE.is_match(text) && text.len() > 1 {
        return (FieldType::Path, 0.8);
    }
    if is_severity(text) {
        return (FieldType::Severity, 0.95);
    }
    (FieldType::Literal, 1.0)
}

/// Try to coalesce a run of tokens starting at `j` into one timestamp or
/// IPv6 token. The match must end exactly on a token boundary.
fn coalesce_at(line: &[u8], tokens: &[Token], j: usize) -> Option<(usize, usize, FieldType)> {
    let start = tokens[j].start;
    let rest = &line[start..];
    let candidates: [(&Regex, FieldType); 6] = [
        (&ASCTIME_RE, FieldType::Timestamp),
        (&CLF_RE, FieldType::Timestamp),
        (&ISO_RE, FieldType::Timestamp),
        (&SYSLOG_RE, FieldType::Timestamp),
        (&URL_SPAN_RE, FieldType::Url),
        (&IPV6_RE, FieldType::Ipv6),
    ];
    for (re, label) in candidates {
        let Some(m) = re.find(rest) else { continue };
        let mlen = m.end();
        // Walk tokens until the cumulative length equals the match length.
        let mut k = j;
        let mut covered = 0usize;
        while k < tokens.len() && covered < mlen {
            covered += tokens[k].len;
            k += 1;
        }
        if covered == mlen {
            // An IPv6 match of a single token with no colon is just a number.
            if label == FieldType::Ipv6 && k == j + 1 {
                continue;
            }
            return Some((k, mlen, label));
        }
    }
    None
}

/// Label every token of a line. Output covers the same bytes as the input
/// tokens; adjacent tokens may have merged into one TIMESTAMP/IPV6 token.
pub fn label_tokens(line: &[u8], tokens: &[Token]) -> Vec<LabeledToken> {
    let mut out = Vec::with_capacity(tokens.len());
    let mut j = 0usize;
    while j < tokens.len() {
        let tok = tokens[j];
        match tok.kind {
            TokenKind::Whitespace => {
                out.push(LabeledToken {
                    start: tok.start,
                    len: tok.len,
                    label: FieldType::Whitespace,
                });
                j += 1;
            }
            TokenKind::Punct => {
                out.push(LabeledToken {
                    start: tok.start,
                    len: tok.len,
                    label: FieldType::Literal,
                });
                j += 1;
            }
            TokenKind::Quoted => {
                out.push(LabeledToken {
                    start: tok.start,
                    len: tok.len,
                    label: FieldType::QuotedString,
                });
                j += 1;
            }
            TokenKind::Word | TokenKind::Number => {
                if let Some((next, mlen, label)) = coalesce_at(line, tokens, j) {
                    out.push(LabeledToken {
                        start: tok.start,
                        len: mlen,
                        label,
                    });
                    j = next;
                    continue;
                }
                let text = tok.text(line);
                let label = if tok.kind == TokenKind::Number && is_process_id(line, tokens, j) {
                    FieldType::ProcessId
                } else {
                    let (label, conf) = classify(text);
                    if conf < CONFIDENCE_FLOOR {
                        FieldType::Literal
                    } else {
                        label
                    }
                };
                out.push(LabeledToken {
                    start: tok.start,
                    len: tok.len,
                    label,
                });
                j += 1;
            }
        }
    }
    out
}

/// A digit run is a process id when it sits in `name[NNN]` position.
fn is_process_id(line: &[u8], tokens: &[Token], j: usize) -> bool {
    let text = tokens[j].text(line);
    if canonical_int(text).is_none() {
        return false;
    }
    let before = j >= 2
        && tokens[j - 1].kind == TokenKind::Punct
        && tokens[j - 1].text(line) == b"["
        && tokens[j - 2].kind == TokenKind::Word
        && tokens[j - 2].end() == tokens[j - 1].start;
    let after = j + 1 < tokens.len()
        && tokens[j + 1].kind == TokenKind::Punct
        && tokens[j + 1].text(line) == b"]";
    before && after
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenize::tokenize;

    fn labels(line: &[u8]) -> Vec<(FieldType, Vec<u8>)> {
        let toks = tokenize(line);
        label_tokens(line, &toks)
            .iter()
            .map(|t| (t.label, t.text(line).to_vec()))
            .collect()
    }

    #[test]
    fn test_asctime_coalesced() {
        let got = labels(b"[Thu Jun 09 06:07:04 2005] [notice] LDAP: ok");
        let ts: Vec<_> = got
            .iter()
            .filter(|(l, _)| *l == FieldType::Timestamp)
            .collect();
        assert_eq!(ts.len(), 1);
        assert_eq!(ts[0].1, b"Thu Jun 09 06:07:04 2005");
        assert!(got
            .iter()
            .any(|(l, t)| *l == FieldType::Severity && t == b"notice"));
    }

    #[test]
    fn test_syslog_coalesced() {
        let got = labels(b"Jun  9 06:06:01 combo sshd[19939]: opened");
        assert_eq!(got[0].0, FieldType::Timestamp);
        assert_eq!(got[0].1, b"Jun  9 06:06:01");
        assert!(got
            .iter()
            .any(|(l, t)| *l == FieldType::ProcessId && t == b"19939"));
    }

    #[test]
    fn test_iso_variants() {
        for line in [
            &b"2024-12-01 10:00:00 ready"[..],
            b"2024-12-01T10:00:00.123Z ready",
            b"2024-12-01T10:00:00+02:00 ready",
        ] {
            let got = labels(line);
            assert_eq!(got[0].0, FieldType::Timestamp, "line {:?}", line);
        }
    }

    #[test]
    fn test_bare_time_is_not_timestamp() {
        let got = labels(b"06:07:04 elapsed");
        assert!(got.iter().all(|(l, _)| *l != FieldType::Timestamp));
    }

    #[test]
    fn test_ipv4_and_leading_zero() {
        assert_eq!(classify(b"10.0.0.1").0, FieldType::Ipv4);
        assert_ne!(classify(b"010.0.0.1").0, FieldType::Ipv4);
        assert_ne!(classify(b"10.0.0.256").0, FieldType::Ipv4);
    }

    #[test]
    fn test_ipv6_coalesced() {
        let got = labels(b"peer 2001:db8:0:0:0:0:0:1 connected");
        assert!(got
            .iter()
            .any(|(l, t)| *l == FieldType::Ipv6 && t == b"2001:db8:0:0:0:0:0:1"));
    }

    #[test]
    fn test_integer_canonicality() {
        assert_eq!(canonical_int(b"123"), Some(123));
        assert_eq!(canonical_int(b"-45"), Some(-45));
        assert_eq!(canonical_int(b"0"), Some(0));
        assert_eq!(canonical_int(b"09"), None);
        assert_eq!(canonical_int(b"-0"), None);
    }

    #[test]
    fn test_low_confidence_demoted_to_literal() {
        // Hex-alphabet English words stay literal.
        let got = labels(b"decade facade deadbeef");
        assert!(got
            .iter()
            .filter(|(l, _)| *l != FieldType::Whitespace)
            .all(|(l, _)| *l == FieldType::Literal));
    }

    #[test]
    fn test_uuid_beats_hex() {
        assert_eq!(
            classify(b"550e8400-e29b-41d4-a716-446655440000").0,
            FieldType::Uuid
        );
    }

    #[test]
    fn test_host_path_url() {
        assert_eq!(classify(b"db.example.com").0, FieldType::Host);
        assert_eq!(classify(b"/var/log/syslog").0, FieldType::Path);
        assert_eq!(classify(b"https://example.com/x").0, FieldType::Url);
    }

    #[test]
    fn test_severity_vocab() {
        for s in [&b"ERROR"[..], b"error", b"Warn", b"notice", b"CRITICAL"] {
            assert_eq!(classify(s).0, FieldType::Severity, "{:?}", s);
        }
        assert_ne!(classify(b"ERRORS").0, FieldType::Severity);
    }
}
