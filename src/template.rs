//! Template extraction: recover the latent line schemas of a log batch.
//!
//! Lines are bucketed by shape (label sequence plus literal bytes), buckets
//! above the support threshold become templates via per-position alignment,
//! and leftover lines are greedily absorbed into the closest template by
//! widening disagreeing positions to MESSAGE. A trailing run of widened
//! positions collapses into a single free-form tail slot.

use crate::classify::{FieldType, LabeledToken};
use crate::config::CompressConfig;
use crate::error::{Error, Result};

/// One position of a template shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Slot {
    /// Exact bytes shared by every member line.
    Literal(Vec<u8>),
    /// A typed variable; `column` is its ordinal among the template's
    /// variable slots and names the column that stores its values.
    Variable { field: FieldType, column: u32 },
}

/// A line schema shared by a set of input lines.
#[derive(Debug, Clone)]
pub struct Template {
    pub id: u32,
    slots: Vec<Slot>,
    pub match_count: u64,
}

impl Template {
    /// Reader-side constructor; `match_count` is a write-side statistic and
    /// starts at zero.
    pub(crate) fn from_slots(id: u32, slots: Vec<Slot>) -> Self {
        Self {
            id,
            slots,
            match_count: 0,
        }
    }

    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    pub fn n_columns(&self) -> u32 {
        self.slots
            .iter()
            .filter(|s| matches!(s, Slot::Variable { .. }))
            .count() as u32
    }

    /// First column holding the given field type, if any.
    pub fn find_column(&self, field: FieldType) -> Option<u32> {
        self.slots.iter().find_map(|s| match s {
            Slot::Variable { field: f, column } if *f == field => Some(*column),
            _ => None,
        })
    }

    /// Field type of a column by ordinal.
    pub fn column_field(&self, column: u32) -> Option<FieldType> {
        self.slots.iter().find_map(|s| match s {
            Slot::Variable { field, column: c } if *c == column => Some(*field),
            _ => None,
        })
    }

    /// Whether the final slot is a free-form MESSAGE tail. A tail consumes
    /// the remainder of the line, whitespace included.
    pub fn has_tail(&self) -> bool {
        matches!(
            self.slots.last(),
            Some(Slot::Variable {
                field: FieldType::Message,
                ..
            })
        )
    }

    /// Human-readable pattern with `<TYPE>` placeholders.
    pub fn pattern(&self) -> String {
        let mut out = String::new();
        for slot in &self.slots {
            match slot {
                Slot::Literal(b) => out.push_str(&String::from_utf8_lossy(b)),
                Slot::Variable { field, .. } => {
                    out.push('<');
                    out.push_str(field.name());
                    out.push('>');
                }
            }
        }
        out
    }

    /// Extract this line's value for every variable slot, in column order.
    /// Returns `None` if the line does not fit the template.
    pub fn capture<'a>(&self, line: &'a [u8], toks: &[LabeledToken]) -> Option<Vec<&'a [u8]>> {
        let n = self.slots.len();
        let mut vals = Vec::with_capacity(self.n_columns() as usize);
        for (i, slot) in self.slots.iter().enumerate() {
            if i == n - 1 {
                if let Slot::Variable {
                    field: FieldType::Message,
                    ..
                } = slot
                {
                    let start = toks.get(i).map(|t| t.start).unwrap_or(line.len());
                    vals.push(&line[start..]);
                    return Some(vals);
                }
            }
            let tok = toks.get(i)?;
            match slot {
                Slot::Literal(b) => {
                    if tok.text(line) != &b[..] {
                        return None;
                    }
                }
                Slot::Variable { .. } => vals.push(tok.text(line)),
            }
        }
        if toks.len() != n {
            return None;
        }
        Some(vals)
    }
}

/// Shape atom used while templates are still under construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum WorkSlot {
    Lit(Vec<u8>),
    Var(FieldType),
}

struct WorkTemplate {
    slots: Vec<WorkSlot>,
    lines: Vec<usize>,
    first_line: usize,
}

/// Result of template extraction: the table plus one template id per line.
#[derive(Debug)]
pub struct Extraction {
    pub templates: Vec<Template>,
    pub assignments: Vec<u32>,
}

pub struct TemplateExtractor {
    min_support: usize,
    absorb_threshold: f64,
    max_templates: usize,
}

impl TemplateExtractor {
    pub fn new(config: &CompressConfig) -> Self {
        Self {
            min_support: config.min_support,
            absorb_threshold: config.absorb_threshold,
            max_templates: config.max_templates,
        }
    }

    pub fn extract(&self, lines: &[&[u8]], labeled: &[Vec<LabeledToken>]) -> Result<Extraction> {
        debug_assert_eq!(lines.len(), labeled.len());

        let shapes: Vec<Vec<WorkSlot>> = labeled
            .iter()
            .zip(lines.iter())
            .map(|(toks, line)| line_shape(line, toks))
            .collect();

        // Bucket lines by shape, preserving first-appearance order.
        let mut bucket_of: std::collections::HashMap<&[WorkSlot], usize> =
            std::collections::HashMap::new();
        let mut buckets: Vec<Vec<usize>> = Vec::new();
        for (i, shape) in shapes.iter().enumerate() {
            match bucket_of.get(shape.as_slice()) {
                Some(&b) => buckets[b].push(i),
                None => {
                    bucket_of.insert(shape.as_slice(), buckets.len());
                    buckets.push(vec![i]);
                }
            }
        }

        let mut work: Vec<WorkTemplate> = Vec::new();
        let mut unmatched: Vec<usize> = Vec::new();

        for members in buckets {
            if members.len() >= self.min_support {
                self.check_budget(work.len())?;
                let slots = align_bucket(&shapes[members[0]], &members, lines, labeled);
                work.push(WorkTemplate {
                    slots,
                    first_line: members[0],
                    lines: members,
                });
            } else {
                unmatched.extend(members);
            }
        }
        unmatched.sort_unstable();

        // Greedy absorption of leftover lines, in input order.
        for i in unmatched {
            let toks = &labeled[i];
            let line = lines[i];
            let mut best: Option<(usize, f64, Vec<usize>)> = None;
            for (t, tmpl) in work.iter().enumerate() {
                if let Some((score, diffs)) = agreement(&tmpl.slots, line, toks) {
                    let better = match &best {
                        Some((_, s, _)) => score > *s,
                        None => true,
                    };
                    if better {
                        best = Some((t, score, diffs));
                    }
                }
            }
            match best {
                Some((t, score, diffs)) if score >= self.absorb_threshold => {
                    for d in diffs {
                        work[t].slots[d] = WorkSlot::Var(FieldType::Message);
                    }
                    collapse_tail(&mut work[t].slots);
                    work[t].lines.push(i);
                    work[t].first_line = work[t].first_line.min(i);
                }
                _ => {
                    self.check_budget(work.len())?;
                    work.push(WorkTemplate {
                        slots: shapes[i].clone(),
                        lines: vec![i],
                        first_line: i,
                    });
                }
            }
        }

        // Dense ids in order of first appearance.
        let mut order: Vec<usize> = (0..work.len()).collect();
        order.sort_by_key(|&t| work[t].first_line);

        let mut templates = Vec::with_capacity(work.len());
        let mut assignments = vec![0u32; lines.len()];
        for (id, &t) in order.iter().enumerate() {
            let wt = &work[t];
            templates.push(Template {
                id: id as u32,
                slots: finalize_slots(&wt.slots),
                match_count: wt.lines.len() as u64,
            });
            for &line_idx in &wt.lines {
                assignments[line_idx] = id as u32;
            }
        }

        Ok(Extraction {
            templates,
            assignments,
        })
    }

    fn check_budget(&self, current: usize) -> Result<()> {
        if current + 1 > self.max_templates {
            return Err(Error::TemplateBudgetExceeded {
                count: current + 1,
                ceiling: self.max_templates,
            });
        }
        Ok(())
    }
}

fn line_shape(line: &[u8], toks: &[LabeledToken]) -> Vec<WorkSlot> {
    toks.iter()
        .map(|t| {
            if t.label.is_variable() {
                WorkSlot::Var(t.label)
            } else {
                WorkSlot::Lit(t.text(line).to_vec())
            }
        })
        .collect()
}

/// Within one shape bucket, variable positions whose bytes never vary are
/// frozen back into literals.
fn align_bucket(
    shape: &[WorkSlot],
    members: &[usize],
    lines: &[&[u8]],
    labeled: &[Vec<LabeledToken>],
) -> Vec<WorkSlot> {
    let mut slots = shape.to_vec();
    for (pos, slot) in slots.iter_mut().enumerate() {
        if let WorkSlot::Var(_) = slot {
            let first = labeled[members[0]][pos].text(lines[members[0]]);
            let constant = members[1..]
                .iter()
                .all(|&m| labeled[m][pos].text(lines[m]) == first);
            if constant && members.len() > 1 {
                *slot = WorkSlot::Lit(first.to_vec());
            } else if members.len() == 1 {
                *slot = WorkSlot::Lit(first.to_vec());
            }
        }
    }
    slots
}

/// Position-wise agreement between a template and a line. Returns the score
/// and the disagreeing positions, or `None` when the line cannot fit at all.
fn agreement(slots: &[WorkSlot], line: &[u8], toks: &[LabeledToken]) -> Option<(f64, Vec<usize>)> {
    let has_tail = matches!(slots.last(), Some(WorkSlot::Var(FieldType::Message)));
    let prefix_len = if has_tail { slots.len() - 1 } else { slots.len() };

    if has_tail {
        if toks.len() < prefix_len {
            return None;
        }
    } else if toks.len() != slots.len() {
        return None;
    }

    // Two empty shapes agree perfectly.
    if prefix_len == 0 {
        return Some((1.0, Vec::new()));
    }

    let mut diffs = Vec::new();
    let mut matches = 0usize;
    for (p, slot) in slots[..prefix_len].iter().enumerate() {
        let agrees = match slot {
            WorkSlot::Lit(b) => toks[p].text(line) == &b[..],
            WorkSlot::Var(FieldType::Message) => true,
            WorkSlot::Var(f) => toks[p].label == *f,
        };
        if agrees {
            matches += 1;
        } else {
            diffs.push(p);
        }
    }
    Some((matches as f64 / prefix_len as f64, diffs))
}

/// Collapse a trailing `MESSAGE (ws MESSAGE)*` run into one tail slot.
fn collapse_tail(slots: &mut Vec<WorkSlot>) {
    if !matches!(slots.last(), Some(WorkSlot::Var(FieldType::Message))) {
        return;
    }
    let mut s = slots.len() - 1;
    while s >= 2
        && matches!(&slots[s - 1], WorkSlot::Lit(b) if b.iter().all(|c| *c == b' ' || *c == b'\t'))
        && matches!(slots[s - 2], WorkSlot::Var(FieldType::Message))
    {
        s -= 2;
    }
    slots.truncate(s);
    slots.push(WorkSlot::Var(FieldType::Message));
}

fn finalize_slots(work: &[WorkSlot]) -> Vec<Slot> {
    let mut column = 0u32;
    work.iter()
        .map(|s| match s {
            WorkSlot::Lit(b) => Slot::Literal(b.clone()),
            WorkSlot::Var(f) => {
                let slot = Slot::Variable {
                    field: *f,
                    column,
                };
                column += 1;
                slot
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::label_tokens;
    use crate::tokenize::tokenize;

    fn run(lines: &[&[u8]], config: &CompressConfig) -> Extraction {
        let labeled: Vec<_> = lines
            .iter()
            .map(|l| label_tokens(l, &tokenize(l)))
            .collect();
        TemplateExtractor::new(config)
            .extract(lines, &labeled)
            .unwrap()
    }

    fn capture_all(lines: &[&[u8]], ex: &Extraction) -> Vec<Vec<Vec<u8>>> {
        lines
            .iter()
            .enumerate()
            .map(|(i, l)| {
                let toks = label_tokens(l, &tokenize(l));
                ex.templates[ex.assignments[i] as usize]
                    .capture(l, &toks)
                    .unwrap()
                    .into_iter()
                    .map(|v| v.to_vec())
                    .collect()
            })
            .collect()
    }

    #[test]
    fn test_apache_style_single_template() {
        let lines: Vec<&[u8]> = vec![
            b"[Thu Jun 09 06:07:04 2005] [notice] LDAP: Built with OpenLDAP",
            b"[Thu Jun 09 06:07:05 2005] [notice] LDAP: SSL support unavailable",
            b"[Thu Jun 09 06:07:06 2005] [error] LDAP: lookup failed",
        ];
        let ex = run(&lines, &CompressConfig::default());
        assert_eq!(ex.templates.len(), 1);
        let t = &ex.templates[0];
        assert_eq!(
            t.pattern(),
            "[<TIMESTAMP>] [<SEVERITY>] LDAP: <MESSAGE>"
        );
        assert!(t.has_tail());
        // Row values reconstruct the tails.
        let caps = capture_all(&lines, &ex);
        assert_eq!(caps[0][2], b"Built with OpenLDAP");
        assert_eq!(caps[2][1], b"error");
        assert_eq!(caps[2][2], b"lookup failed");
    }

    #[test]
    fn test_supported_bucket_becomes_template() {
        let lines: Vec<&[u8]> = vec![
            b"conn from 10.0.0.1 port 80",
            b"conn from 10.0.0.2 port 443",
            b"conn from 10.0.0.3 port 8080",
        ];
        let ex = run(&lines, &CompressConfig::default());
        assert_eq!(ex.templates.len(), 1);
        assert_eq!(
            ex.templates[0].pattern(),
            "conn from <IPV4> port <INTEGER>"
        );
    }

    #[test]
    fn test_constant_variable_position_freezes() {
        let lines: Vec<&[u8]> = vec![
            b"worker 7 started",
            b"worker 7 started",
            b"worker 7 started",
        ];
        let ex = run(&lines, &CompressConfig::default());
        assert_eq!(ex.templates.len(), 1);
        // The integer never varies, so it is a literal slot.
        assert_eq!(ex.templates[0].n_columns(), 0);
        assert_eq!(ex.templates[0].pattern(), "worker 7 started");
    }

    #[test]
    fn test_minority_shape_absorbed() {
        let mut lines: Vec<Vec<u8>> = (0..1000)
            .map(|i| format!("job {} finished ok", i).into_bytes())
            .collect();
        lines.push(b"job 77 finished badly".to_vec());
        lines.push(b"job 78 finished late".to_vec());
        let refs: Vec<&[u8]> = lines.iter().map(|l| l.as_slice()).collect();
        let ex = run(&refs, &CompressConfig::default());
        assert_eq!(ex.templates.len(), 1);
        // Reconstruction data survives for the minority lines.
        let caps = capture_all(&refs, &ex);
        assert!(caps[1000].iter().any(|v| v == b"badly"));
        assert!(caps[1001].iter().any(|v| v == b"late"));
    }

    #[test]
    fn test_singleton_line_all_literals() {
        let lines: Vec<&[u8]> = vec![b"server started successfully"];
        let ex = run(&lines, &CompressConfig::default());
        assert_eq!(ex.templates.len(), 1);
        assert_eq!(ex.templates[0].n_columns(), 0);
    }

    #[test]
    fn test_empty_line_gets_empty_template() {
        let lines: Vec<&[u8]> = vec![b"", b"", b""];
        let ex = run(&lines, &CompressConfig::default());
        assert_eq!(ex.templates.len(), 1);
        assert!(ex.templates[0].slots().is_empty());
    }

    #[test]
    fn test_ids_dense_in_first_appearance_order() {
        let lines: Vec<&[u8]> = vec![
            b"alpha event one",
            b"beta 1 done",
            b"beta 2 done",
            b"beta 3 done",
            b"gamma closing",
        ];
        let ex = run(&lines, &CompressConfig::default());
        assert_eq!(ex.assignments[0], 0);
        assert_eq!(ex.assignments[1], 1);
        assert_eq!(ex.assignments[4], ex.templates.len() as u32 - 1);
        for (i, t) in ex.templates.iter().enumerate() {
            assert_eq!(t.id, i as u32);
        }
    }

    #[test]
    fn test_template_budget() {
        let lines: Vec<Vec<u8>> = (0..20)
            .map(|i| {
                // Distinct token counts so nothing can absorb.
                format!("evt{} {}end", i, "word ".repeat(i + 1)).into_bytes()
            })
            .collect();
        let refs: Vec<&[u8]> = lines.iter().map(|l| l.as_slice()).collect();
        let labeled: Vec<_> = refs
            .iter()
            .map(|l| label_tokens(l, &tokenize(l)))
            .collect();
        let config = CompressConfig {
            max_templates: 4,
            ..Default::default()
        };
        let err = TemplateExtractor::new(&config)
            .extract(&refs, &labeled)
            .unwrap_err();
        assert!(matches!(err, Error::TemplateBudgetExceeded { ceiling: 4, .. }));
    }
}
