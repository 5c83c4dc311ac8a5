// SPDX-License-Identifier: MIT

//! Turning the collection tree and its fields into a flat list of
//! main items.
//!
//! Each collection's content is its child collections (in the order
//! recovered by [child_order](crate::order::child_order)) with the
//! fields declared directly in it slotted in between by bit position.
//! Fields without a position go last, in declaration order.

use crate::aggregate::BitRangeTable;
use crate::caps::{CollectionTree, FieldKind, ReportKey};
use crate::probe::{BitRange, ResolvedField};

use std::collections::BTreeMap;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy)]
pub enum MainItemNode<'a> {
    CollectionBegin(usize),
    CollectionEnd(usize),
    Field(ResolvedField<'a>),
    /// Constant bits no field claims.
    Padding { key: ReportKey, bits: BitRange },
}

#[derive(Debug, Clone, Copy)]
enum Entry {
    Child(usize),
    Field(usize),
}

/// Where `entry` starts in the report identified by `key`, if it
/// has any bits there.
fn entry_start(
    entry: &Entry,
    key: &ReportKey,
    table: &BitRangeTable,
    fields: &[ResolvedField],
) -> Option<usize> {
    match entry {
        Entry::Child(collection) => table.get(*collection, key).map(|b| b.first()),
        Entry::Field(idx) => {
            let field = &fields[*idx];
            (field.report_key() == *key)
                .then_some(field.bits)
                .flatten()
                .map(|b| b.first())
        }
    }
}

fn collection_entries(
    children: &[usize],
    direct: &[usize],
    table: &BitRangeTable,
    fields: &[ResolvedField],
) -> Vec<Entry> {
    let mut entries: Vec<Entry> = children.iter().map(|c| Entry::Child(*c)).collect();

    let mut resolved: Vec<(ReportKey, usize, usize)> = direct
        .iter()
        .filter_map(|idx| {
            let field = &fields[*idx];
            field.bits.map(|b| (field.report_key(), b.first(), *idx))
        })
        .collect();
    resolved.sort();

    for (key, first, idx) in resolved {
        let starts = |entry: &Entry| entry_start(entry, &key, table, fields);
        let position = entries
            .iter()
            .rposition(|e| starts(e).is_some_and(|s| s < first))
            .map(|pos| pos + 1)
            .or_else(|| {
                entries
                    .iter()
                    .position(|e| starts(e).is_some_and(|s| s > first))
            })
            .unwrap_or(entries.len());
        entries.insert(position, Entry::Field(idx));
    }

    entries.extend(
        direct
            .iter()
            .filter(|idx| fields[**idx].bits.is_none())
            .map(|idx| Entry::Field(*idx)),
    );
    entries
}

/// Produce the main items for the whole tree, depth first, starting
/// with the root collection. `order` is indexed by collection.
pub fn sequence<'a>(
    tree: &CollectionTree,
    order: &[Vec<usize>],
    table: &BitRangeTable,
    fields: &[ResolvedField<'a>],
    pad_gaps: bool,
) -> Vec<MainItemNode<'a>> {
    let mut direct: Vec<Vec<usize>> = vec![Vec::new(); tree.len()];
    for (idx, field) in fields.iter().enumerate() {
        direct[field.field.link_collection].push(idx);
    }

    let entries: Vec<Vec<Entry>> = (0..tree.len())
        .map(|c| {
            let children = order.get(c).map_or(tree.children(c), |o| o.as_slice());
            collection_entries(children, &direct[c], table, fields)
        })
        .collect();

    let mut nodes = vec![MainItemNode::CollectionBegin(0)];
    let mut stack: Vec<(usize, usize)> = vec![(0, 0)];
    while let Some((collection, next)) = stack.pop() {
        match entries[collection].get(next) {
            None => nodes.push(MainItemNode::CollectionEnd(collection)),
            Some(entry) => {
                stack.push((collection, next + 1));
                match entry {
                    Entry::Child(child) => {
                        nodes.push(MainItemNode::CollectionBegin(*child));
                        stack.push((*child, 0));
                    }
                    Entry::Field(idx) => nodes.push(MainItemNode::Field(fields[*idx])),
                }
            }
        }
    }

    let unresolved = fields.iter().filter(|f| f.bits.is_none()).count();
    if unresolved > 0 {
        debug!("{unresolved} fields placed in declaration order");
    }

    if pad_gaps {
        insert_padding(nodes)
    } else {
        nodes
    }
}

/// Insert [MainItemNode::Padding] for bits no field covers: gaps
/// between fields of one report and the bits up to the next byte
/// boundary after its last field.
pub fn insert_padding<'a>(nodes: Vec<MainItemNode<'a>>) -> Vec<MainItemNode<'a>> {
    let mut next_bit: BTreeMap<ReportKey, usize> = BTreeMap::new();
    let mut last_field: BTreeMap<ReportKey, usize> = BTreeMap::new();
    let mut padded = Vec::with_capacity(nodes.len());

    for node in nodes {
        if let MainItemNode::Field(field) = &node {
            if let Some(bits) = field.bits {
                let key = field.report_key();
                let next = next_bit.entry(key).or_insert(0);
                if bits.first() > *next {
                    if let Some(gap) = BitRange::new(*next, bits.first() - 1) {
                        padded.push(MainItemNode::Padding { key, bits: gap });
                    }
                } else if bits.first() < *next {
                    warn!(
                        "{} bits {bits} overlap the preceding field in {} report {}",
                        field.id, key.report_type, key.report_id
                    );
                }
                *next = (*next).max(bits.last() + 1);
                last_field.insert(key, padded.len());
            }
        }
        padded.push(node);
    }

    let mut trailing: Vec<(usize, MainItemNode<'a>)> = next_bit
        .iter()
        .filter_map(|(key, next)| {
            let position = last_field.get(key)? + 1;
            let bits = BitRange::with_width(*next, (8 - next % 8) % 8)?;
            Some((position, MainItemNode::Padding { key: *key, bits }))
        })
        .collect();
    trailing.sort_by_key(|(position, _)| std::cmp::Reverse(*position));
    for (position, node) in trailing {
        padded.insert(position, node);
    }
    padded
}

/// Whether `b` continues the run `a` belongs to, i.e. both can share
/// one set of global items and a single main item.
///
/// Only variable fields that directly follow each other in the same
/// report and agree on every attribute are merged. Value fields must
/// also be single items.
pub fn same_run(a: &ResolvedField, b: &ResolvedField) -> bool {
    let (fa, fb) = (a.field, b.field);
    if a.report_key() != b.report_key()
        || fa.usage_page != fb.usage_page
        || fa.bit_field != fb.bit_field
        || !fa.bit_field.is_variable()
    {
        return false;
    }
    match (a.bits, b.bits) {
        (Some(x), Some(y)) if y.first() == x.last() + 1 => {}
        _ => return false,
    }
    match (&fa.kind, &fb.kind) {
        (FieldKind::Button, FieldKind::Button) => true,
        (FieldKind::Value(x), FieldKind::Value(y)) => {
            x == y && usize::from(x.report_count) == 1
        }
        _ => false,
    }
}
