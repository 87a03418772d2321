use chrono::NaiveDate;

use crate::model::*;

// ── Slot Algorithm ────────────────────────────────────────────────

/// Concrete spans the expert's active windows open on `date`, sorted by start.
pub fn windows_on(windows: &[ExpertAvailability], date: NaiveDate) -> Vec<Span> {
    let mut spans: Vec<Span> = windows.iter().filter_map(|w| w.span_on(date)).collect();
    spans.sort_by_key(|s| s.start);
    spans
}

/// Starts `window.start + k·duration` whose whole slot fits inside the window.
/// `duration` must be positive.
pub fn candidate_starts(window: Span, duration: Ms) -> impl Iterator<Item = Ms> {
    let last_start = window.end - duration;
    (0..)
        .map(move |k: i64| window.start + k * duration)
        .take_while(move |start| *start <= last_start)
}

/// Bookable slot starts of length `duration` inside `windows`, minus every
/// candidate whose `[start, start + duration)` intersects a `booked` span.
/// Ascending, without duplicates.
pub fn open_slots(windows: &[Span], booked: &[Span], duration: Ms) -> Vec<Ms> {
    if duration <= 0 || windows.is_empty() {
        return Vec::new();
    }

    let mut busy = booked.to_vec();
    busy.sort_by_key(|s| s.start);
    let busy = merge_overlapping(&busy);

    let mut slots: Vec<Ms> = windows
        .iter()
        .flat_map(|w| candidate_starts(*w, duration))
        .filter(|&start| !intersects_any(&busy, &Span::new(start, start + duration)))
        .collect();
    slots.sort_unstable();
    slots.dedup();
    slots
}

/// `busy` must be sorted and disjoint.
fn intersects_any(busy: &[Span], span: &Span) -> bool {
    let first_not_before = busy.partition_point(|b| b.end <= span.start);
    busy.get(first_not_before)
        .is_some_and(|b| b.overlaps(span))
}

/// Merge sorted overlapping/adjacent intervals into disjoint intervals.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end
        {
            last.end = last.end.max(span.end);
            continue;
        }
        merged.push(span);
    }
    merged
}
