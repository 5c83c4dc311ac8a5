// SPDX-License-Identifier: MIT

//! Per-collection bit spans.
//!
//! For every collection and every report the [BitRangeTable] holds
//! the bits covered by all fields declared in that collection or any
//! collection nested in it.

use crate::caps::{CollectionTree, ReportKey};
use crate::probe::{BitRange, ResolvedField};

use std::collections::BTreeMap;
use tracing::debug;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BitRangeTable {
    rows: Vec<BTreeMap<ReportKey, BitRange>>,
}

impl BitRangeTable {
    pub fn new(collections: usize) -> Self {
        BitRangeTable {
            rows: vec![BTreeMap::new(); collections],
        }
    }

    /// Extend the entry for `collection` and `key` so it covers `bits`.
    pub fn widen(&mut self, collection: usize, key: ReportKey, bits: &BitRange) {
        let entry = self.rows[collection]
            .entry(key)
            .or_insert(*bits);
        *entry = entry.union(bits);
    }

    pub fn get(&self, collection: usize, key: &ReportKey) -> Option<BitRange> {
        self.rows[collection].get(key).copied()
    }

    /// All known spans of `collection`, ordered by [ReportKey].
    pub fn row(&self, collection: usize) -> &BTreeMap<ReportKey, BitRange> {
        &self.rows[collection]
    }

    /// Widen every entry of `parent` by the matching entry of `child`.
    pub fn merge_into(&mut self, child: usize, parent: usize) {
        if child == parent {
            return;
        }
        let row = self.rows[child].clone();
        for (key, bits) in row.iter() {
            self.widen(parent, *key, bits);
        }
    }
}

/// Build the table for `fields`. Fields without a bit position
/// do not contribute.
pub fn aggregate(tree: &CollectionTree, fields: &[ResolvedField]) -> BitRangeTable {
    let mut table = BitRangeTable::new(tree.len());
    for field in fields {
        if let Some(bits) = &field.bits {
            table.widen(field.field.link_collection, field.report_key(), bits);
        }
    }

    // Deeper collections first so each parent already holds its
    // complete subtree when it is merged into the grandparent.
    for collection in tree.deepest_first() {
        if let Some(parent) = tree.parent(collection) {
            table.merge_into(collection, parent);
        }
    }

    debug!(
        "Aggregated bit ranges for {} collections on {} levels",
        tree.len(),
        tree.level_sizes().len()
    );
    table
}
