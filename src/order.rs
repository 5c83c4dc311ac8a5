// SPDX-License-Identifier: MIT

//! Recovering the declaration order of sibling collections.
//!
//! The collection tree only links siblings, it does not say in which
//! order they were declared. The bit spans do: a collection declared
//! before its sibling starts at a lower bit in any report they share.

use crate::aggregate::BitRangeTable;
use crate::caps::CollectionTree;

use std::cmp::Ordering;

/// Compare two sibling collections by the first report both have
/// fields in. Collections without a common report compare equal.
fn compare(table: &BitRangeTable, a: usize, b: usize) -> Ordering {
    let row_b = table.row(b);
    table
        .row(a)
        .iter()
        .filter_map(|(key, bits_a)| {
            row_b
                .get(key)
                .map(|bits_b| bits_a.first().cmp(&bits_b.first()))
        })
        .find(|ordering| ordering.is_ne())
        .unwrap_or(Ordering::Equal)
}

/// Stable insertion sort for a partial order.
///
/// Each element is inserted after the last already placed element
/// that must precede it, in front of the first one after that it must
/// precede. Without such an element it stays behind everything placed
/// so far. Elements that compare equal never change their relative
/// order and an inconsistent `compare` cannot make this loop forever.
fn insertion_sort<T, F>(items: &mut Vec<T>, mut compare: F)
where
    F: FnMut(&T, &T) -> Ordering,
{
    for i in 1..items.len() {
        let after = items[..i]
            .iter()
            .rposition(|placed| compare(&items[i], placed) == Ordering::Greater)
            .map_or(0, |pos| pos + 1);
        let position = items[after..i]
            .iter()
            .position(|placed| compare(&items[i], placed) == Ordering::Less)
            .map_or(i, |pos| after + pos);
        let item = items.remove(i);
        items.insert(position, item);
    }
}

/// The children of every collection, in the order they occupy
/// their reports. Indexed by collection.
pub fn child_order(tree: &CollectionTree, table: &BitRangeTable) -> Vec<Vec<usize>> {
    (0..tree.len())
        .map(|collection| {
            let mut children = tree.children(collection).to_vec();
            if children.len() > 1 {
                insertion_sort(&mut children, |a, b| compare(table, *a, *b));
            }
            children
        })
        .collect()
}
