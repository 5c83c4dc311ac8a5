// SPDX-License-Identifier: MIT

//! The parsed capability data a host platform hands out instead of
//! the report descriptor itself.
//!
//! A [CapabilitySnapshot] consists of the link collection nodes (the
//! collection tree, rooted at index 0) and one [ReportCaps] per
//! [ReportType]. Each [FieldCapability] describes one button or value
//! field, but not where in the report it lives; that is what the
//! [probe](crate::probe) module finds out.

use crate::hid::{CollectionItem, DataFlags};
use crate::types::*;
use crate::{ensure, ReconstructError};

use std::collections::BTreeMap;

/// Collection trees are indexed with 16-bit values by the platform.
pub const MAX_COLLECTIONS: usize = 65535;

/// The three kinds of reports a HID device exchanges with its host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ReportType {
    Input,
    Output,
    Feature,
}

impl ReportType {
    pub const ALL: [ReportType; 3] = [ReportType::Input, ReportType::Output, ReportType::Feature];
}

impl std::fmt::Display for ReportType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReportType::Input => write!(f, "Input"),
            ReportType::Output => write!(f, "Output"),
            ReportType::Feature => write!(f, "Feature"),
        }
    }
}

/// Identifies one report layout: fields with the same [ReportKey]
/// share one report buffer and thus one bit numbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ReportKey {
    pub report_type: ReportType,
    pub report_id: ReportId,
}

/// One node of the collection tree. An index of 0 in
/// `first_child` or `next_sibling` means "none" since index 0
/// is always the root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkCollectionNode {
    pub usage_page: UsagePage,
    pub usage: UsageId,
    /// 0 = Physical, 1 = Application, 2 = Logical. Other values
    /// are written back unchanged.
    pub collection_type: u8,
    pub parent: usize,
    pub first_child: usize,
    pub next_sibling: usize,
}

impl LinkCollectionNode {
    pub fn collection_item(&self) -> CollectionItem {
        CollectionItem::from(self.collection_type)
    }
}

/// The usages of a field, either a single usage or a usage range.
/// Data indices correspond one-to-one to the usages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Usages {
    Single {
        usage: UsageId,
        data_index: DataIndex,
    },
    Range {
        usage_minimum: UsageId,
        usage_maximum: UsageId,
        data_index_minimum: DataIndex,
        data_index_maximum: DataIndex,
    },
}

impl Usages {
    pub fn first_usage(&self) -> UsageId {
        match self {
            Usages::Single { usage, .. } => *usage,
            Usages::Range { usage_minimum, .. } => *usage_minimum,
        }
    }

    pub fn last_usage(&self) -> UsageId {
        match self {
            Usages::Single { usage, .. } => *usage,
            Usages::Range { usage_maximum, .. } => *usage_maximum,
        }
    }

    pub fn first_data_index(&self) -> DataIndex {
        match self {
            Usages::Single { data_index, .. } => *data_index,
            Usages::Range {
                data_index_minimum, ..
            } => *data_index_minimum,
        }
    }

    /// The number of usages.
    pub fn usage_count(&self) -> usize {
        let first = u16::from(self.first_usage()) as usize;
        let last = u16::from(self.last_usage()) as usize;
        last.saturating_sub(first) + 1
    }

    /// The number of data indices, i.e. the number of
    /// controls the platform assigned to this field.
    pub fn data_index_count(&self) -> usize {
        match self {
            Usages::Single { .. } => 1,
            Usages::Range {
                data_index_minimum,
                data_index_maximum,
                ..
            } => {
                let first = u16::from(data_index_minimum) as usize;
                let last = u16::from(data_index_maximum) as usize;
                last.saturating_sub(first) + 1
            }
        }
    }

    fn check(&self) -> Result<(), String> {
        if let Usages::Range {
            usage_minimum,
            usage_maximum,
            data_index_minimum,
            data_index_maximum,
        } = self
        {
            if usage_minimum > usage_maximum {
                return Err(format!(
                    "usage minimum {usage_minimum} exceeds usage maximum {usage_maximum}"
                ));
            }
            if data_index_minimum > data_index_maximum {
                return Err(format!(
                    "data index minimum {data_index_minimum} exceeds maximum {data_index_maximum}"
                ));
            }
        }
        Ok(())
    }
}

/// The numeric attributes only value fields carry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ValueAttributes {
    pub logical_minimum: LogicalMinimum,
    pub logical_maximum: LogicalMaximum,
    pub physical_minimum: PhysicalMinimum,
    pub physical_maximum: PhysicalMaximum,
    pub unit_exponent: UnitExponent,
    pub unit: Unit,
    pub report_size: ReportSize,
    pub report_count: ReportCount,
}

impl ValueAttributes {
    /// The physical range is only meaningful if both ends are nonzero.
    pub fn has_physical_range(&self) -> bool {
        i32::from(self.physical_minimum) != 0 && i32::from(self.physical_maximum) != 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// One bit per usage.
    Button,
    Value(ValueAttributes),
}

/// One button or value capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldCapability {
    /// Index of the collection this field is declared in.
    pub link_collection: usize,
    pub report_id: ReportId,
    pub usage_page: UsagePage,
    /// The data of the Input, Output or Feature item.
    pub bit_field: DataFlags,
    pub usages: Usages,
    pub kind: FieldKind,
}

impl FieldCapability {
    fn check(&self) -> Result<(), String> {
        self.usages.check()?;
        if let FieldKind::Value(attrs) = &self.kind {
            // Both end up in a short item
            for (name, value) in [
                ("report size", usize::from(attrs.report_size)),
                ("report count", usize::from(attrs.report_count)),
            ] {
                if u32::try_from(value).is_err() {
                    return Err(format!("{name} {value} exceeds {}", u32::MAX));
                }
            }
        }
        Ok(())
    }

    pub fn is_button(&self) -> bool {
        matches!(self.kind, FieldKind::Button)
    }

    pub fn value_attributes(&self) -> Option<&ValueAttributes> {
        match &self.kind {
            FieldKind::Button => None,
            FieldKind::Value(attrs) => Some(attrs),
        }
    }

    /// The number of bits this field occupies in its report,
    /// `None` for a value field with zero size or count.
    pub fn bit_width(&self) -> Option<usize> {
        let width = match &self.kind {
            FieldKind::Button => self.usages.data_index_count(),
            FieldKind::Value(attrs) => {
                usize::from(attrs.report_size).checked_mul(usize::from(attrs.report_count))?
            }
        };
        (width > 0).then_some(width)
    }

    /// The number of report items (controls) this field stands for,
    /// i.e. its contribution to a Report Count.
    pub fn control_count(&self) -> usize {
        match &self.kind {
            FieldKind::Button => self.usages.data_index_count(),
            FieldKind::Value(attrs) => usize::from(attrs.report_count),
        }
    }
}

/// All fields of one report type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReportCaps {
    pub fields: Vec<FieldCapability>,
    /// The size in bytes of the largest report of this type,
    /// including the report ID byte.
    pub max_report_length: usize,
}

/// Identifies a field within a [CapabilitySnapshot].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FieldId {
    pub report_type: ReportType,
    pub index: usize,
}

impl std::fmt::Display for FieldId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} field {}", self.report_type, self.index)
    }
}

/// Everything the platform knows about a device's report descriptor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapabilitySnapshot {
    pub collections: Vec<LinkCollectionNode>,
    pub input: ReportCaps,
    pub output: ReportCaps,
    pub feature: ReportCaps,
}

impl CapabilitySnapshot {
    pub fn report(&self, report_type: ReportType) -> &ReportCaps {
        match report_type {
            ReportType::Input => &self.input,
            ReportType::Output => &self.output,
            ReportType::Feature => &self.feature,
        }
    }

    pub fn report_mut(&mut self, report_type: ReportType) -> &mut ReportCaps {
        match report_type {
            ReportType::Input => &mut self.input,
            ReportType::Output => &mut self.output,
            ReportType::Feature => &mut self.feature,
        }
    }

    /// All fields in declaration order, Input first.
    pub fn fields(&self) -> impl Iterator<Item = (FieldId, &FieldCapability)> + '_ {
        ReportType::ALL.into_iter().flat_map(move |report_type| {
            self.report(report_type)
                .fields
                .iter()
                .enumerate()
                .map(move |(index, field)| (FieldId { report_type, index }, field))
        })
    }

    /// Checks every field against the collection tree.
    pub fn validate_fields(&self) -> Result<(), ReconstructError> {
        for (id, field) in self.fields() {
            ensure!(
                field.link_collection < self.collections.len(),
                ReconstructError::UnknownCollection {
                    field: id,
                    collection: field.link_collection,
                }
            );
            field
                .check()
                .map_err(|message| ReconstructError::InvalidCapability { field: id, message })?;
        }
        Ok(())
    }
}

/// Which order the `first_child`/`next_sibling` chain lists
/// the children of a collection in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ChildLinkage {
    /// The chain is in declaration order.
    #[default]
    Declaration,
    /// The chain lists the last declared child first. This is
    /// what the Windows HID parser does.
    Reversed,
}

/// A validated view of the link collection nodes.
///
/// Building a [CollectionTree] walks the whole tree once and
/// rejects anything that is not a proper tree rooted at index 0.
/// All later stages index into it without further checks.
#[derive(Debug, Clone)]
pub struct CollectionTree<'a> {
    nodes: &'a [LinkCollectionNode],
    children: Vec<Vec<usize>>,
    depths: Vec<usize>,
}

fn malformed(index: usize, message: impl Into<String>) -> ReconstructError {
    ReconstructError::MalformedTree {
        index,
        message: message.into(),
    }
}

impl<'a> CollectionTree<'a> {
    pub fn new(
        nodes: &'a [LinkCollectionNode],
        linkage: ChildLinkage,
    ) -> Result<CollectionTree<'a>, ReconstructError> {
        ensure!(!nodes.is_empty(), malformed(0, "no root collection"));
        ensure!(
            nodes.len() <= MAX_COLLECTIONS,
            malformed(
                MAX_COLLECTIONS,
                format!("{} collections exceed the maximum", nodes.len())
            )
        );

        for (index, node) in nodes.iter().enumerate() {
            for (name, target) in [
                ("parent", node.parent),
                ("first child", node.first_child),
                ("next sibling", node.next_sibling),
            ] {
                ensure!(
                    target < nodes.len(),
                    malformed(index, format!("{name} {target} out of range"))
                );
            }
            ensure!(
                index == 0 || node.parent != index,
                malformed(index, "collection is its own parent")
            );
            ensure!(
                index == 0 || (node.first_child != index && node.next_sibling != index),
                malformed(index, "collection links to itself")
            );
        }
        ensure!(
            nodes[0].next_sibling == 0,
            malformed(0, "root collection has a sibling")
        );

        let mut children = vec![Vec::new(); nodes.len()];
        let mut depths = vec![0; nodes.len()];
        let mut visited = vec![false; nodes.len()];
        visited[0] = true;

        let mut stack = vec![0usize];
        while let Some(parent) = stack.pop() {
            let mut child = nodes[parent].first_child;
            while child != 0 {
                ensure!(
                    !visited[child],
                    malformed(child, "collection is linked more than once")
                );
                ensure!(
                    nodes[child].parent == parent,
                    malformed(
                        child,
                        format!(
                            "parent {} does not match linking collection {parent}",
                            nodes[child].parent
                        )
                    )
                );
                visited[child] = true;
                depths[child] = depths[parent] + 1;
                children[parent].push(child);
                stack.push(child);
                child = nodes[child].next_sibling;
            }
            if linkage == ChildLinkage::Reversed {
                children[parent].reverse();
            }
        }

        if let Some(index) = visited.iter().position(|v| !v) {
            return Err(malformed(index, "collection is not reachable from the root"));
        }

        Ok(CollectionTree {
            nodes,
            children,
            depths,
        })
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, index: usize) -> &LinkCollectionNode {
        &self.nodes[index]
    }

    pub fn parent(&self, index: usize) -> Option<usize> {
        (index != 0).then(|| self.nodes[index].parent)
    }

    /// The children of the collection in declaration order as far
    /// as the linkage tells, see [ChildLinkage].
    pub fn children(&self, index: usize) -> &[usize] {
        &self.children[index]
    }

    pub fn depth(&self, index: usize) -> usize {
        self.depths[index]
    }

    /// All collection indices, deepest first. Collections of the same
    /// depth are in index order.
    pub fn deepest_first(&self) -> Vec<usize> {
        let mut indices: Vec<usize> = (0..self.len()).collect();
        indices.sort_by_key(|&i| std::cmp::Reverse(self.depths[i]));
        indices
    }

    /// A map of collection depth to the number of collections at
    /// that depth.
    pub fn level_sizes(&self) -> BTreeMap<usize, usize> {
        let mut levels = BTreeMap::new();
        for depth in &self.depths {
            *levels.entry(*depth).or_insert(0) += 1;
        }
        levels
    }
}
