use core::ops::Range;

// Assumes the ranges are sorted by `start`. Removes empty ranges.
pub fn merge_overlapping_ranges<T: Ord + Copy>(ranges: &mut Vec<Range<T>>) {
    let mut out_len = 0;
    for input_i in 0..ranges.len() {
        let range = ranges[input_i].clone();
        if range.is_empty() {
            continue;
        }
        if out_len > 0 && range.start <= ranges[out_len - 1].end {
            ranges[out_len - 1].end = ranges[out_len - 1].end.max(range.end);
        } else {
            ranges[out_len] = range;
            out_len += 1;
        }
    }
    ranges.truncate(out_len);
}

/// The smallest range containing all of `ranges`.
pub fn hull<'a, T: Ord + Copy + 'a>(
    ranges: impl IntoIterator<Item = &'a Range<T>>,
) -> Option<Range<T>> {
    ranges.into_iter().fold(None, |acc, range| match acc {
        None => Some(range.clone()),
        Some(acc) => Some(acc.start.min(range.start)..acc.end.max(range.end)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merges_touching_and_drops_empty() {
        let mut ranges = vec![0..3, 3..5, 6..6, 7..9, 8..12];
        merge_overlapping_ranges(&mut ranges);
        assert_eq!(ranges, [0..5, 7..12]);
    }

    #[test]
    fn hull_of_disjoint_ranges() {
        assert_eq!(hull(&[4u32..6, 1..2]), Some(1..6));
        assert_eq!(hull::<u32>(&[]), None);
    }
}
