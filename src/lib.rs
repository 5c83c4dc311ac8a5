// SPDX-License-Identifier: MIT

//! Reconstruct a HID Report Descriptor from the parsed capabilities a
//! host platform exposes instead of the descriptor bytes.
//!
//! Some platforms (notably Windows) hand out a device's report
//! descriptor only in parsed form: a tree of link collections and one
//! capability record per button or value field. This crate turns that
//! back into a report descriptor that describes the same reports.
//!
//! Reconstruction runs in five steps:
//! 1. the [probe] module finds each field's bits by asking the platform
//!    to set the field in an empty report,
//! 2. the [aggregate] module sums these up per collection,
//! 3. the [order] module sorts sibling collections by the bits they occupy,
//! 4. the [sequence] module flattens the tree into a list of main items,
//!    slotting fields in between collections and merging adjacent fields,
//! 5. the [encode] module writes those as HID short items.
//!
//! ```
//! use hidreconstruct::*;
//! use hidreconstruct::caps::*;
//! use hidreconstruct::hid::DataFlags;
//! use hidreconstruct::probe::{ProbeError, ProbeTarget};
//!
//! let mut snapshot = CapabilitySnapshot::default();
//! snapshot.collections.push(LinkCollectionNode {
//!     usage_page: UsagePage(0x01),
//!     usage: UsageId(0x00),
//!     collection_type: 1,
//!     parent: 0,
//!     first_child: 0,
//!     next_sibling: 0,
//! });
//! snapshot.input.max_report_length = 2;
//! snapshot.input.fields.push(FieldCapability {
//!     link_collection: 0,
//!     report_id: ReportId(0),
//!     usage_page: UsagePage(0x01),
//!     bit_field: DataFlags(0x02),
//!     usages: Usages::Single {
//!         usage: UsageId(0x00),
//!         data_index: DataIndex(0),
//!     },
//!     kind: FieldKind::Value(ValueAttributes {
//!         logical_maximum: LogicalMaximum(255),
//!         report_size: ReportSize(8),
//!         report_count: ReportCount(1),
//!         ..Default::default()
//!     }),
//! });
//!
//! // The only field is the only byte after the report ID
//! let probe = |_: ReportType, _: &ProbeTarget, _: &FieldCapability, report: &mut [u8]| -> Result<(), ProbeError> {
//!     report[1] = 0xff;
//!     Ok(())
//! };
//! let rdesc = reconstruct(&snapshot, probe).unwrap();
//! assert_eq!(rdesc.bytes()[..6], [0x05, 0x01, 0x09, 0x00, 0xa1, 0x01]);
//! assert!(rdesc.unresolved().is_empty());
//! println!("{rdesc}");
//! ```
//!
//! A reconstructed descriptor is rarely byte-identical to the one the
//! device ships, [descriptor::compare] checks whether both describe
//! the same reports.

use thiserror::Error;
use tracing::debug;

pub mod aggregate;
pub mod caps;
pub mod descriptor;
pub mod encode;
pub mod hid;
pub mod order;
pub mod probe;
pub mod sequence;
pub mod types;

use caps::{CapabilitySnapshot, ChildLinkage, CollectionTree, FieldId};
use hid::{GlobalItem, HidError, ItemType, LocalItem, MainItem};
use probe::{BitProbe, BitResolver, ProbeResolver};

pub use descriptor::ParserError;
pub use types::*;

/// Return early with the given error unless the condition holds.
macro_rules! ensure {
    ($cond:expr, $err:expr) => {
        if !$cond {
            return Err($err);
        }
    };
}
pub(crate) use ensure;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ReconstructError {
    #[error("Malformed collection tree at collection {index}: {message}")]
    MalformedTree { index: usize, message: String },
    #[error("{field} refers to collection {collection} which does not exist")]
    UnknownCollection { field: FieldId, collection: usize },
    #[error("Invalid capability for {field}: {message}")]
    InvalidCapability { field: FieldId, message: String },
    #[error("Failed to encode {item}: {source}")]
    Encoding {
        item: String,
        #[source]
        source: HidError,
    },
}

/// Tunables for [reconstruct_with].
///
/// ```
/// # use hidreconstruct::*;
/// # use hidreconstruct::caps::ChildLinkage;
/// let options = ReconstructOptions::new()
///     .child_linkage(ChildLinkage::Reversed)
///     .pad_gaps(false);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconstructOptions {
    child_linkage: ChildLinkage,
    pad_gaps: bool,
}

impl Default for ReconstructOptions {
    fn default() -> Self {
        ReconstructOptions {
            child_linkage: ChildLinkage::Declaration,
            pad_gaps: true,
        }
    }
}

impl ReconstructOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// How the collection nodes chain their children.
    pub fn child_linkage(mut self, child_linkage: ChildLinkage) -> Self {
        self.child_linkage = child_linkage;
        self
    }

    /// Whether to fill bits no field claims with constant padding.
    pub fn pad_gaps(mut self, pad_gaps: bool) -> Self {
        self.pad_gaps = pad_gaps;
        self
    }
}

/// The result of a reconstruction.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconstructedDescriptor {
    bytes: Vec<u8>,
    items: Vec<ItemType>,
    unresolved: Vec<FieldId>,
}

impl ReconstructedDescriptor {
    /// The report descriptor bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// The items in the order they were written.
    pub fn items(&self) -> &[ItemType] {
        &self.items
    }

    /// Fields whose bit position could not be determined. These were
    /// placed after everything else in their collection and may be in
    /// the wrong position.
    pub fn unresolved(&self) -> &[FieldId] {
        &self.unresolved
    }
}

impl std::fmt::Display for ReconstructedDescriptor {
    /// One line per item, in the style of `hid-decode`.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut usage_page = UsagePage(0);
        let mut depth = 0usize;
        for item in &self.items {
            let bytes = item.encode().map_err(|_| std::fmt::Error)?;
            let hex: String = bytes.iter().map(|b| format!("0x{b:02x}, ")).collect();
            let name = match item {
                ItemType::Global(GlobalItem::UsagePage(up)) => {
                    usage_page = *up;
                    item.to_string()
                }
                ItemType::Local(LocalItem::UsageId(id)) => {
                    format!("Usage ({})", hid::usage_name(usage_page, *id))
                }
                _ => item.to_string(),
            };
            if let ItemType::Main(MainItem::EndCollection) = item {
                depth = depth.saturating_sub(1);
            }
            writeln!(f, "{hex:<30}// {:indent$}{name}", "", indent = depth * 2)?;
            if let ItemType::Main(MainItem::Collection(_)) = item {
                depth += 1;
            }
        }
        Ok(())
    }
}

/// Reconstruct the report descriptor for `snapshot`, locating fields
/// with the platform's `probe` and default [ReconstructOptions].
pub fn reconstruct<P: BitProbe>(
    snapshot: &CapabilitySnapshot,
    probe: P,
) -> Result<ReconstructedDescriptor, ReconstructError> {
    reconstruct_with(
        snapshot,
        &ProbeResolver::new(probe),
        &ReconstructOptions::default(),
    )
}

/// Reconstruct the report descriptor for `snapshot`, locating fields
/// with `resolver`.
///
/// The collection tree and every field's collection are validated
/// before anything else happens. Fields the resolver cannot locate
/// do not fail the reconstruction, see
/// [ReconstructedDescriptor::unresolved].
pub fn reconstruct_with<R: BitResolver + ?Sized>(
    snapshot: &CapabilitySnapshot,
    resolver: &R,
    options: &ReconstructOptions,
) -> Result<ReconstructedDescriptor, ReconstructError> {
    let tree = CollectionTree::new(&snapshot.collections, options.child_linkage)?;
    snapshot.validate_fields()?;
    debug!(
        "Reconstructing {} collections, {} fields",
        tree.len(),
        snapshot.fields().count()
    );

    let fields = probe::resolve_all(snapshot, resolver);
    let table = aggregate::aggregate(&tree, &fields);
    let order = order::child_order(&tree, &table);
    let nodes = sequence::sequence(&tree, &order, &table, &fields, options.pad_gaps);
    let encoded = encode::encode(&snapshot.collections, &nodes)?;

    let unresolved: Vec<FieldId> = fields
        .iter()
        .filter(|f| f.bits.is_none())
        .map(|f| f.id)
        .collect();

    Ok(ReconstructedDescriptor {
        bytes: encoded.bytes,
        items: encoded.items,
        unresolved,
    })
}
