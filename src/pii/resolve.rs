// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Span conflict resolution and the redaction renderer.

use super::{PiiEntity, PiiSource};

/// True when `challenger` beats `incumbent` on overlap.
///
/// Policy: regex-sourced entities always win over NER-sourced ones
/// (structured pattern matches are higher precision); among same-source
/// overlaps the longer span wins, ties break toward the earlier start, and
/// a final confidence tie-break makes the order total.
fn wins_over(challenger: &PiiEntity, incumbent: &PiiEntity) -> bool {
    match (challenger.source, incumbent.source) {
        (PiiSource::Regex, PiiSource::Ner) => true,
        (PiiSource::Ner, PiiSource::Regex) => false,
        _ => {
            let c_len = challenger.end - challenger.start;
            let i_len = incumbent.end - incumbent.start;
            if c_len != i_len {
                return c_len > i_len;
            }
            if challenger.start != incumbent.start {
                return challenger.start < incumbent.start;
            }
            challenger.confidence > incumbent.confidence
        }
    }
}

/// Resolve overlapping entities into a non-overlapping, start-sorted list.
///
/// Single sweep: sort by start offset, keep a last-accepted cursor, and on
/// overlap let the policy decide which of the pair survives. Replacing the
/// last accepted entity cannot re-open an earlier conflict because the
/// challenger starts at or after the replaced entity. Avoids the quadratic
/// all-pairs check.
pub fn resolve_conflicts(mut entities: Vec<PiiEntity>) -> Vec<PiiEntity> {
    entities.sort_by(|a, b| a.start.cmp(&b.start).then(b.end.cmp(&a.end)));

    let mut accepted: Vec<PiiEntity> = Vec::new();
    for entity in entities {
        match accepted.last() {
            // [start, end) ranges overlap
            Some(last) if entity.start < last.end => {
                if wins_over(&entity, last) {
                    accepted.pop();
                    accepted.push(entity);
                }
            }
            _ => accepted.push(entity),
        }
    }

    accepted
}

/// Render the redacted text: verbatim gaps, `<KIND>` placeholder per
/// entity. Depends on the resolved list being non-overlapping and sorted
/// by start offset.
pub fn render_redacted(text: &str, entities: &[PiiEntity]) -> String {
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0usize;

    for entity in entities {
        out.push_str(&text[cursor..entity.start]);
        out.push_str(&entity.kind.placeholder());
        cursor = entity.end;
    }
    out.push_str(&text[cursor..]);

    out
}
