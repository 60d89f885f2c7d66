//! Stable merge sort with a comparison that may fail.
//!
//! `slice::sort_by` cannot surface an error from its comparator, and both the
//! interpreter (`sorted`, `list.sort`) and the comparator must stop at the
//! first unorderable pair.

use std::cmp::Ordering;

/// Returns the permutation of `0..len` that sorts the elements, keeping equal
/// elements in their original order.
pub fn try_sort_indices<E>(
    len: usize,
    mut cmp: impl FnMut(usize, usize) -> Result<Ordering, E>,
) -> Result<Vec<usize>, E> {
    let mut order: Vec<usize> = (0..len).collect();
    let mut scratch = Vec::with_capacity(len);
    let mut width = 1;
    while width < len {
        scratch.clear();
        let mut start = 0;
        while start < len {
            let mid = (start + width).min(len);
            let end = (start + 2 * width).min(len);
            let (mut i, mut j) = (start, mid);
            while i < mid && j < end {
                if cmp(order[j], order[i])? == Ordering::Less {
                    scratch.push(order[j]);
                    j += 1;
                } else {
                    scratch.push(order[i]);
                    i += 1;
                }
            }
            scratch.extend_from_slice(&order[i..mid]);
            scratch.extend_from_slice(&order[j..end]);
            start = end;
        }
        std::mem::swap(&mut order, &mut scratch);
        width *= 2;
    }
    Ok(order)
}

/// Sorts `items` in place with a fallible comparison.
pub fn try_sort_by<T: Clone, E>(
    items: &mut Vec<T>,
    mut cmp: impl FnMut(&T, &T) -> Result<Ordering, E>,
) -> Result<(), E> {
    let order = try_sort_indices(items.len(), |a, b| cmp(&items[a], &items[b]))?;
    let sorted = order.into_iter().map(|i| items[i].clone()).collect();
    *items = sorted;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sorts_and_keeps_ties_in_order() {
        let mut items = vec![(3, 'a'), (1, 'b'), (3, 'c'), (2, 'd'), (1, 'e')];
        try_sort_by(&mut items, |a, b| Ok::<_, ()>(a.0.cmp(&b.0))).unwrap();
        assert_eq!(items, vec![(1, 'b'), (1, 'e'), (2, 'd'), (3, 'a'), (3, 'c')]);
    }

    #[test]
    fn stops_at_first_error() {
        let mut items = vec![1, 2, 0, 4];
        let result = try_sort_by(&mut items, |a, b| {
            if *a == 0 || *b == 0 {
                Err("unorderable")
            } else {
                Ok(a.cmp(b))
            }
        });
        assert_eq!(result, Err("unorderable"));
    }

    #[test]
    fn empty_and_single() {
        assert_eq!(try_sort_indices(0, |_, _| Ok::<_, ()>(Ordering::Equal)), Ok(vec![]));
        assert_eq!(try_sort_indices(1, |_, _| Ok::<_, ()>(Ordering::Equal)), Ok(vec![0]));
    }
}
