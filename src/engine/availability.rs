use crate::model::*;

// ── Slot generation ─────────────────────────────────────────────

/// Enumerate bookable start times inside `window`.
///
/// Candidates sit on a fixed grid (`window.start + k * step`) and each one
/// needs `[start, start + duration)` to fit before `window.end` and to miss
/// every occupied and blocked span. Candidates are judged independently:
/// offering 09:00 never removes 09:30, even when the two would overlap.
/// Output is ascending because the grid is walked once.
pub fn generate_slots(
    window: &Span,
    duration: Ms,
    step: Ms,
    occupied: &[Span],
    blocked: &[Span],
) -> Vec<Ms> {
    if duration <= 0 || step <= 0 {
        return Vec::new();
    }

    let mut taken: Vec<Span> = occupied.iter().chain(blocked).copied().collect();
    taken.sort_by_key(|s| s.start);
    let taken = merge_overlapping(&taken);

    let mut slots = Vec::new();
    let mut ti = 0;
    let mut cursor = window.start;
    while cursor + duration <= window.end {
        let candidate = Span::new(cursor, cursor + duration);
        // Candidates only move forward, so anything ending before this one
        // starts is behind every later candidate too.
        while ti < taken.len() && taken[ti].end <= candidate.start {
            ti += 1;
        }
        let rejected = taken.get(ti).is_some_and(|t| t.overlaps(&candidate));
        if !rejected {
            slots.push(cursor);
        }
        cursor += step;
    }
    slots
}

/// Merge sorted overlapping/adjacent intervals into disjoint intervals.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end {
                last.end = last.end.max(span.end);
                continue;
            }
        merged.push(span);
    }
    merged
}
