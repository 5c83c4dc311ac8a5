// SPDX-License-Identifier: MIT

//! Writing the sequenced main items as HID short items.
//!
//! Global items are only written when their value differs from what
//! the [EncoderState] says the parser state already holds. Local items
//! (the usages) are written for every main item.

use crate::caps::{FieldKind, LinkCollectionNode, ReportType, Usages};
use crate::hid::{DataFlags, ItemType, LocalItem, MainItem};
use crate::probe::{BitRange, ResolvedField};
use crate::sequence::{same_run, MainItemNode};
use crate::types::*;
use crate::ReconstructError;

use tracing::debug;

type Result<T> = std::result::Result<T, ReconstructError>;

/// The global item state a parser of the encoded bytes would
/// have at the current position. `None` means never written.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EncoderState {
    /// Report ID 0 means no Report ID item has been written.
    report_id: ReportId,
    usage_page: Option<UsagePage>,
    logical_minimum: Option<LogicalMinimum>,
    logical_maximum: Option<LogicalMaximum>,
    physical_minimum: Option<PhysicalMinimum>,
    physical_maximum: Option<PhysicalMaximum>,
    unit_exponent: Option<UnitExponent>,
    unit: Option<Unit>,
    report_size: Option<ReportSize>,
    report_count: Option<ReportCount>,
}

/// Write the global item unless the state already holds its value.
macro_rules! write_global {
    ($encoder:ident, $which:ident, $value:expr) => {
        let value = $value;
        if $encoder.state.$which != Some(value) {
            $encoder.state.$which = Some(value);
            $encoder.write(value)?;
        }
    };
}

/// Write the global item only if the state holds a different value.
/// Used to clear attributes an earlier field set.
macro_rules! reset_global {
    ($encoder:ident, $which:ident, $value:expr) => {
        let value = $value;
        if $encoder.state.$which.is_some_and(|current| current != value) {
            $encoder.state.$which = Some(value);
            $encoder.write(value)?;
        }
    };
}

/// The encoded descriptor, as items and as bytes.
#[derive(Debug, Clone, Default)]
pub struct Encoded {
    pub items: Vec<ItemType>,
    pub bytes: Vec<u8>,
}

struct Encoder<'a> {
    collections: &'a [LinkCollectionNode],
    state: EncoderState,
    encoded: Encoded,
}

impl Encoder<'_> {
    fn write(&mut self, item: impl Into<ItemType>) -> Result<()> {
        let item: ItemType = item.into();
        let bytes = item.encode().map_err(|source| ReconstructError::Encoding {
            item: item.to_string(),
            source,
        })?;
        self.encoded.bytes.extend(bytes);
        self.encoded.items.push(item);
        Ok(())
    }

    /// Report ID 0 is never written, the parser state keeps
    /// whatever ID was written last.
    fn write_report_id(&mut self, report_id: ReportId) -> Result<()> {
        if report_id != ReportId(0) && self.state.report_id != report_id {
            self.state.report_id = report_id;
            self.write(report_id)?;
        }
        Ok(())
    }

    fn write_main(&mut self, report_type: ReportType, flags: DataFlags) -> Result<()> {
        let item = match report_type {
            ReportType::Input => MainItem::Input(flags),
            ReportType::Output => MainItem::Output(flags),
            ReportType::Feature => MainItem::Feature(flags),
        };
        self.write(item)
    }

    fn begin_collection(&mut self, index: usize) -> Result<()> {
        let node = self.collections[index];
        write_global!(self, usage_page, node.usage_page);
        self.write(node.usage)?;
        self.write(node.collection_item())
    }

    fn end_collection(&mut self) -> Result<()> {
        self.write(MainItem::EndCollection)
    }

    fn write_usages(&mut self, run: &[ResolvedField]) -> Result<()> {
        if let Some((minimum, maximum)) = usage_span(run) {
            self.write(UsageMinimum::from(minimum))?;
            return self.write(UsageMaximum::from(maximum));
        }
        for field in run {
            match field.field.usages {
                Usages::Single { usage, .. } => self.write(LocalItem::UsageId(usage))?,
                Usages::Range {
                    usage_minimum,
                    usage_maximum,
                    ..
                } => {
                    self.write(UsageMinimum::from(usage_minimum))?;
                    self.write(UsageMaximum::from(usage_maximum))?;
                }
            }
        }
        Ok(())
    }

    /// One main item for all fields in `run`. All fields in a run
    /// agree on everything but their usages, see [same_run].
    fn write_run(&mut self, run: &[ResolvedField]) -> Result<()> {
        let Some(first) = run.first() else {
            return Ok(());
        };
        let field = first.field;

        self.write_report_id(field.report_id)?;
        write_global!(self, usage_page, field.usage_page);
        self.write_usages(run)?;

        match &field.kind {
            FieldKind::Button => {
                write_global!(self, logical_minimum, LogicalMinimum(0));
                write_global!(self, logical_maximum, LogicalMaximum(1));
                self.write_no_physical_range()?;
                write_global!(self, report_size, ReportSize(1));
            }
            FieldKind::Value(attrs) => {
                write_global!(self, logical_minimum, attrs.logical_minimum);
                write_global!(self, logical_maximum, attrs.logical_maximum);
                if attrs.has_physical_range() {
                    write_global!(self, physical_minimum, attrs.physical_minimum);
                    write_global!(self, physical_maximum, attrs.physical_maximum);
                    write_global!(self, unit_exponent, attrs.unit_exponent);
                    write_global!(self, unit, attrs.unit);
                } else {
                    self.write_no_physical_range()?;
                }
                write_global!(self, report_size, attrs.report_size);
            }
        }

        let count: usize = run.iter().map(|f| f.field.control_count()).sum();
        write_global!(self, report_count, ReportCount(count));
        self.write_main(first.id.report_type, field.bit_field)
    }

    fn write_no_physical_range(&mut self) -> Result<()> {
        reset_global!(self, physical_minimum, PhysicalMinimum(0));
        reset_global!(self, physical_maximum, PhysicalMaximum(0));
        reset_global!(self, unit_exponent, UnitExponent(0));
        reset_global!(self, unit, Unit(0));
        Ok(())
    }

    fn write_padding(
        &mut self,
        report_type: ReportType,
        report_id: ReportId,
        bits: &BitRange,
    ) -> Result<()> {
        self.write_report_id(report_id)?;
        write_global!(self, report_size, ReportSize(bits.width()));
        write_global!(self, report_count, ReportCount(1));
        self.write_main(report_type, DataFlags::PADDING)
    }
}

/// The usages of `run` as a single `(minimum, maximum)` pair if they
/// form one contiguous span of more than one usage.
fn usage_span(run: &[ResolvedField]) -> Option<(UsageId, UsageId)> {
    let first = run.first()?.field.usages.first_usage();
    let mut last: Option<UsageId> = None;
    for usages in run.iter().map(|f| f.field.usages) {
        if let Some(previous) = last {
            if u32::from(u16::from(previous)) + 1 != u32::from(u16::from(usages.first_usage())) {
                return None;
            }
        }
        last = Some(usages.last_usage());
    }
    let last = last?;
    (last > first).then_some((first, last))
}

/// Encode `nodes`, merging consecutive fields into runs.
///
/// `collections` must be the nodes the [MainItemNode] indices
/// were taken from.
pub fn encode(collections: &[LinkCollectionNode], nodes: &[MainItemNode]) -> Result<Encoded> {
    let mut encoder = Encoder {
        collections,
        state: EncoderState::default(),
        encoded: Encoded::default(),
    };

    let mut run: Vec<ResolvedField> = Vec::new();
    let mut runs = 0;
    for node in nodes {
        if let MainItemNode::Field(field) = node {
            if run.last().is_some_and(|last| !same_run(last, field)) {
                encoder.write_run(&std::mem::take(&mut run))?;
                runs += 1;
            }
            run.push(*field);
            continue;
        }

        if !run.is_empty() {
            encoder.write_run(&std::mem::take(&mut run))?;
            runs += 1;
        }
        match node {
            MainItemNode::CollectionBegin(index) => encoder.begin_collection(*index)?,
            MainItemNode::CollectionEnd(_) => encoder.end_collection()?,
            MainItemNode::Padding { key, bits } => {
                encoder.write_padding(key.report_type, key.report_id, bits)?
            }
            MainItemNode::Field(_) => {}
        }
    }
    if !run.is_empty() {
        encoder.write_run(&run)?;
        runs += 1;
    }

    debug!(
        "Encoded {} main item nodes ({runs} field runs) as {} items, {} bytes",
        nodes.len(),
        encoder.encoded.items.len(),
        encoder.encoded.bytes.len()
    );
    Ok(encoder.encoded)
}
