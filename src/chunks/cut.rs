/// Where one write step ends inside the candidate string.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CutPoint {
    /// Exclusive end of the written substring.
    pub end: usize,
    /// Cursor position for the next step (past the consumed delimiter).
    pub next: usize,
}

/// Choose the cut for the window `s[lo..hi]` given a byte `budget`.
///
/// `appending` selects the top-up rule for an existing chunk: the whole
/// remainder is taken once the window's absolute upper bound reaches the end
/// of `s`. For a new chunk the remainder is taken when `budget >= len - lo`.
/// Otherwise the cut lands on the last `delimiter` inside the window and never
/// splits a key.
///
/// Returns `None` when no key boundary fits the window (no delimiter, or only
/// one at `lo`). A delimiter at `lo` means an empty key starts the window;
/// `ChunkWriter` drops empty keys before joining, so it never sees one.
pub fn cut_point(
    s: &str,
    lo: usize,
    hi: usize,
    budget: usize,
    appending: bool,
    delimiter: u8,
) -> Option<CutPoint> {
    let len = s.len();
    if lo >= len {
        return None;
    }
    let whole_remainder_fits = if appending {
        hi >= len
    } else {
        budget >= len - lo
    };
    if whole_remainder_fits {
        return Some(CutPoint {
            end: len,
            next: len,
        });
    }
    let window_end = hi.min(len);
    if window_end <= lo {
        return None;
    }
    let offset = s.as_bytes()[lo..window_end]
        .iter()
        .rposition(|byte| *byte == delimiter)?;
    if offset == 0 {
        return None;
    }
    let end = lo + offset;
    Some(CutPoint {
        end,
        next: end + 1,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const S: &str = "AAAAAAA,BBBBBBB,CCCCCCC";

    #[test]
    fn new_chunk_cuts_at_last_delimiter_in_window() {
        let cut = cut_point(S, 0, 20, 20, false, b',').unwrap();
        assert_eq!(&S[..cut.end], "AAAAAAA,BBBBBBB");
        assert_eq!(cut.next, 16);

        let cut = cut_point(S, 16, 36, 20, false, b',').unwrap();
        assert_eq!(&S[16..cut.end], "CCCCCCC");
        assert_eq!(cut.next, S.len());
    }

    #[test]
    fn remainder_equal_to_budget_is_taken_whole() {
        assert_eq!(
            cut_point(S, 0, 23, 23, false, b','),
            Some(CutPoint { end: 23, next: 23 })
        );
        assert_eq!(
            cut_point(S, 0, 23, 23, true, b','),
            Some(CutPoint { end: 23, next: 23 })
        );
        let cut = cut_point(S, 0, 22, 22, true, b',').unwrap();
        assert_eq!(cut.end, 15);
    }

    #[test]
    fn append_rule_uses_window_upper_bound() {
        // Upper bound past the end takes everything even with a small budget.
        assert_eq!(
            cut_point(S, 0, 40, 5, true, b','),
            Some(CutPoint { end: 23, next: 23 })
        );
        // The new-chunk rule only looks at the budget.
        assert_eq!(cut_point(S, 0, 40, 5, false, b',').map(|cut| cut.end), Some(15));
    }

    #[test]
    fn missing_boundary_yields_none() {
        assert_eq!(cut_point(S, 0, 5, 5, false, b','), None);
        assert_eq!(cut_point(S, 0, 5, 5, true, b','), None);
        assert_eq!(cut_point(",AAAA,BB", 0, 4, 4, false, b','), None);
        assert_eq!(cut_point(S, 23, 43, 20, false, b','), None);
    }
}
