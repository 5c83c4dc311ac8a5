// SPDX-License-Identifier: MIT

//! A reference parser for HID Report Descriptors.
//!
//! [ReportDescriptor] interprets the items of a descriptor the way a
//! host does: it tracks the global and local item state, assigns every
//! field its bits within its report and records the collections the
//! fields live in. This is what a reconstructed descriptor is checked
//! against, see [compare].
//!
//! ```
//! # use hidreconstruct::descriptor::*;
//! # use hidreconstruct::caps::ReportType;
//! let bytes = [
//!     0x05, 0x01, 0x09, 0x00, 0xa1, 0x01, // Collection (Application)
//!     0x15, 0x00, 0x26, 0xff, 0x00,       //   Logical Minimum (0), Logical Maximum (255)
//!     0x75, 0x08, 0x95, 0x01,             //   Report Size (8), Report Count (1)
//!     0x81, 0x02,                         //   Input (Data,Var,Abs)
//!     0xc0,                               // End Collection
//! ];
//! let rdesc = ReportDescriptor::try_from(bytes.as_slice()).unwrap();
//! let report = &rdesc.reports(ReportType::Input)[0];
//! assert_eq!(report.size, 8);
//! assert_eq!(report.fields[0].bits(), &(0..=7));
//! ```

use crate::caps::ReportType;
use crate::ensure;
use crate::hid::*;
use crate::types::*;

use std::ops::RangeInclusive;
use thiserror::Error;

/// Reports are limited to what a 16-bit length can describe.
const MAX_REPORT_BITS: usize = 0xffff * 8;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParserError {
    #[error("Invalid data at offset {offset}: {message}")]
    InvalidData { offset: usize, message: String },
    #[error("Main item at offset {offset} without a {item}")]
    MissingGlobal { offset: usize, item: &'static str },
    #[error("Unbalanced collection at offset {offset}")]
    UnbalancedCollection { offset: usize },
}

pub type Result<T> = std::result::Result<T, ParserError>;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Usage {
    pub usage_page: UsagePage,
    pub usage_id: UsageId,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LogicalRange {
    pub minimum: LogicalMinimum,
    pub maximum: LogicalMaximum,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PhysicalRange {
    pub minimum: PhysicalMinimum,
    pub maximum: PhysicalMaximum,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Collection {
    /// The data of the Collection item.
    pub collection_type: u8,
    /// The first usage declared before the Collection item.
    pub usage: Option<Usage>,
    /// Index of the enclosing collection.
    pub parent: Option<usize>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Field {
    Variable(VariableField),
    Array(ArrayField),
    Constant(ConstantField),
}

impl Field {
    pub fn bits(&self) -> &RangeInclusive<usize> {
        match self {
            Field::Variable(f) => &f.bits,
            Field::Array(f) => &f.bits,
            Field::Constant(f) => &f.bits,
        }
    }
}

/// One control of a variable main item. A main item with a
/// Report Count of N creates N of these.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VariableField {
    pub usage: Option<Usage>,
    pub bits: RangeInclusive<usize>,
    pub logical_range: LogicalRange,
    pub physical_range: Option<PhysicalRange>,
    pub unit: Option<Unit>,
    pub unit_exponent: Option<UnitExponent>,
    pub flags: DataFlags,
    pub collection: Option<usize>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArrayField {
    pub usages: Vec<Usage>,
    pub bits: RangeInclusive<usize>,
    pub logical_range: LogicalRange,
    pub report_size: ReportSize,
    pub report_count: ReportCount,
    pub flags: DataFlags,
    pub collection: Option<usize>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConstantField {
    pub bits: RangeInclusive<usize>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Report {
    pub report_type: ReportType,
    pub report_id: Option<ReportId>,
    /// The size of this report in bits, without the report ID byte
    pub size: usize,
    pub fields: Vec<Field>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReportDescriptor {
    collections: Vec<Collection>,
    input_reports: Vec<Report>,
    output_reports: Vec<Report>,
    feature_reports: Vec<Report>,
}

impl ReportDescriptor {
    /// All collections in the order they are declared.
    pub fn collections(&self) -> &[Collection] {
        &self.collections
    }

    /// The reports of the given type, in the order their
    /// first field is declared.
    pub fn reports(&self, report_type: ReportType) -> &[Report] {
        match report_type {
            ReportType::Input => &self.input_reports,
            ReportType::Output => &self.output_reports,
            ReportType::Feature => &self.feature_reports,
        }
    }

    fn report_mut(&mut self, report_type: ReportType, report_id: Option<ReportId>) -> &mut Report {
        let reports = match report_type {
            ReportType::Input => &mut self.input_reports,
            ReportType::Output => &mut self.output_reports,
            ReportType::Feature => &mut self.feature_reports,
        };
        let idx = match reports.iter().position(|r| r.report_id == report_id) {
            Some(idx) => idx,
            None => {
                reports.push(Report {
                    report_type,
                    report_id,
                    size: 0,
                    fields: vec![],
                });
                reports.len() - 1
            }
        };
        &mut reports[idx]
    }

    /// A description of the first difference in collections or
    /// field layout, `None` if both describe the same reports.
    ///
    /// Constant fields are ignored, report sizes are compared in bytes.
    /// A physical range of 0 to 0 is the same as no physical range and
    /// units are only compared for fields with a physical range.
    pub fn difference(&self, other: &ReportDescriptor) -> Option<String> {
        if self.collections.len() != other.collections.len() {
            return Some(format!(
                "{} collections vs {}",
                self.collections.len(),
                other.collections.len()
            ));
        }
        for (idx, (a, b)) in self.collections.iter().zip(&other.collections).enumerate() {
            if a.normalized() != b.normalized() {
                return Some(format!("Collection {idx}: {a:?} vs {b:?}"));
            }
        }

        for report_type in ReportType::ALL {
            let mut ours: Vec<&Report> = self.reports(report_type).iter().collect();
            let mut theirs: Vec<&Report> = other.reports(report_type).iter().collect();
            ours.sort_by_key(|r| r.report_id);
            theirs.sort_by_key(|r| r.report_id);
            if ours.len() != theirs.len() {
                return Some(format!(
                    "{} {report_type} reports vs {}",
                    ours.len(),
                    theirs.len()
                ));
            }
            for (a, b) in ours.iter().zip(theirs) {
                if let Some(reason) = a.difference(b) {
                    return Some(reason);
                }
            }
        }
        None
    }
}

impl Collection {
    fn normalized(&self) -> (u8, Option<Usage>, Option<usize>) {
        let usage = self
            .usage
            .filter(|u| u16::from(u.usage_page) != 0 || u16::from(u.usage_id) != 0);
        (self.collection_type, usage, self.parent)
    }
}

/// The parts of a field that must match for two fields to be the same.
#[derive(Debug, PartialEq)]
enum FieldSummary<'a> {
    Variable {
        usage: Option<Usage>,
        bits: &'a RangeInclusive<usize>,
        logical_range: LogicalRange,
        physical: Option<(PhysicalRange, Unit, UnitExponent)>,
        flags: DataFlags,
        collection: Option<usize>,
    },
    Array(&'a ArrayField),
}

impl Field {
    fn summary(&self) -> Option<FieldSummary<'_>> {
        match self {
            Field::Constant(_) => None,
            Field::Array(f) => Some(FieldSummary::Array(f)),
            Field::Variable(f) => Some(FieldSummary::Variable {
                usage: f.usage,
                bits: &f.bits,
                logical_range: f.logical_range,
                physical: f
                    .physical_range
                    .filter(|r| i32::from(r.minimum) != 0 || i32::from(r.maximum) != 0)
                    .map(|r| {
                        (
                            r,
                            f.unit.unwrap_or_default(),
                            f.unit_exponent.unwrap_or_default(),
                        )
                    }),
                flags: f.flags,
                collection: f.collection,
            }),
        }
    }
}

impl Report {
    fn difference(&self, other: &Report) -> Option<String> {
        let name = match self.report_id {
            Some(id) => format!("{} report {id}", self.report_type),
            None => format!("{} report", self.report_type),
        };
        if self.report_id != other.report_id {
            return Some(format!(
                "{name} vs report ID {:?}",
                other.report_id.map(u8::from)
            ));
        }
        if self.size.div_ceil(8) != other.size.div_ceil(8) {
            return Some(format!("{name}: {} bits vs {}", self.size, other.size));
        }
        let ours: Vec<FieldSummary> = self.fields.iter().filter_map(Field::summary).collect();
        let theirs: Vec<FieldSummary> = other.fields.iter().filter_map(Field::summary).collect();
        if ours.len() != theirs.len() {
            return Some(format!(
                "{name}: {} fields vs {}",
                ours.len(),
                theirs.len()
            ));
        }
        ours.iter()
            .zip(&theirs)
            .enumerate()
            .find(|(_, (a, b))| a != b)
            .map(|(idx, (a, b))| format!("{name}, field {idx}: {a:?} vs {b:?}"))
    }
}

impl TryFrom<&[u8]> for ReportDescriptor {
    type Error = ParserError;

    fn try_from(bytes: &[u8]) -> Result<ReportDescriptor> {
        parse_report_descriptor(bytes)
    }
}

impl TryFrom<&Vec<u8>> for ReportDescriptor {
    type Error = ParserError;

    fn try_from(bytes: &Vec<u8>) -> Result<ReportDescriptor> {
        parse_report_descriptor(bytes)
    }
}

/// The outcome of [compare].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Comparison {
    /// Byte for byte the same descriptor.
    Identical,
    /// Different bytes but the same collections and report layouts.
    Equivalent,
    Different { reason: String },
}

/// Compare two report descriptors, e.g. a reconstructed one against
/// one captured from the device.
pub fn compare(a: &[u8], b: &[u8]) -> Result<Comparison> {
    if a == b {
        return Ok(Comparison::Identical);
    }
    let ours = ReportDescriptor::try_from(a)?;
    let theirs = ReportDescriptor::try_from(b)?;
    Ok(match ours.difference(&theirs) {
        None => Comparison::Equivalent,
        Some(reason) => Comparison::Different { reason },
    })
}

#[derive(Clone, Copy, Debug, Default)]
struct Globals {
    usage_page: Option<UsagePage>,
    logical_minimum: Option<LogicalMinimum>,
    logical_maximum: Option<LogicalMaximum>,
    physical_minimum: Option<PhysicalMinimum>,
    physical_maximum: Option<PhysicalMaximum>,
    unit_exponent: Option<UnitExponent>,
    unit: Option<Unit>,
    report_size: Option<ReportSize>,
    report_id: Option<ReportId>,
    report_count: Option<ReportCount>,
}

/// A usage as declared by a local item. The usage page is
/// only known once the main item is reached.
#[derive(Clone, Copy, Debug)]
enum LocalUsage {
    Usage {
        usage_page: Option<UsagePage>,
        usage_id: UsageId,
    },
    Range {
        minimum: UsageMinimum,
        maximum: UsageMaximum,
    },
}

#[derive(Clone, Debug, Default)]
struct Locals {
    usages: Vec<LocalUsage>,
    usage_minimum: Option<UsageMinimum>,
    usage_maximum: Option<UsageMaximum>,
}

impl Locals {
    /// A Usage Minimum and Usage Maximum pair, in either order,
    /// make up one usage range.
    fn complete_range(&mut self) {
        if let (Some(minimum), Some(maximum)) = (self.usage_minimum, self.usage_maximum) {
            self.usages.push(LocalUsage::Range { minimum, maximum });
            self.usage_minimum = None;
            self.usage_maximum = None;
        }
    }
}

#[derive(Debug, Default)]
struct Stack {
    globals: Globals,
    pushed: Vec<Globals>,
    locals: Locals,
    collections: Vec<usize>,
}

impl Stack {
    fn push(&mut self) {
        self.pushed.push(self.globals);
    }

    fn pop(&mut self, offset: usize) -> Result<()> {
        self.globals = self.pushed.pop().ok_or(ParserError::InvalidData {
            offset,
            message: "Pop without Push".into(),
        })?;
        Ok(())
    }

    fn reset_locals(&mut self) {
        self.locals = Locals::default();
    }
}

fn missing(offset: usize, item: &'static str) -> ParserError {
    ParserError::MissingGlobal { offset, item }
}

fn compile_usages(globals: &Globals, locals: &Locals, offset: usize) -> Result<Vec<Usage>> {
    let global_page = || globals.usage_page.ok_or(missing(offset, "Usage Page"));
    let mut usages = Vec::new();
    for local in &locals.usages {
        match *local {
            // local item's Usage had a Usage Page included
            LocalUsage::Usage {
                usage_page: Some(usage_page),
                usage_id,
            } => usages.push(Usage {
                usage_page,
                usage_id,
            }),
            LocalUsage::Usage {
                usage_page: None,
                usage_id,
            } => usages.push(Usage {
                usage_page: global_page()?,
                usage_id,
            }),
            LocalUsage::Range { minimum, maximum } => {
                let (min, max) = (u32::from(minimum), u32::from(maximum));
                ensure!(
                    min <= max && max - min <= 0xffff,
                    ParserError::InvalidData {
                        offset,
                        message: format!("Invalid usage range {min:#x}..={max:#x}"),
                    }
                );
                for usage in min..=max {
                    let usage_page = match usage >> 16 {
                        0 => global_page()?,
                        page => UsagePage(page as u16),
                    };
                    usages.push(Usage {
                        usage_page,
                        usage_id: UsageId((usage & 0xffff) as u16),
                    });
                }
            }
        }
    }
    Ok(usages)
}

/// The range maxima are itemized as signed values. A negative maximum
/// after a non-negative minimum was meant as unsigned value.
fn unsigned_maximum(minimum: Option<i32>, maximum: i32, item: &ReportDescriptorItem) -> i32 {
    if minimum.is_some_and(|m| m >= 0) && maximum < 0 {
        return i32::try_from(item.unsigned_data()).unwrap_or(maximum);
    }
    maximum
}

fn handle_main_item(
    report_type: ReportType,
    flags: DataFlags,
    stack: &Stack,
    rdesc: &mut ReportDescriptor,
    offset: usize,
) -> Result<()> {
    let globals = &stack.globals;
    let report_size = usize::from(globals.report_size.ok_or(missing(offset, "Report Size"))?);
    let report_count = usize::from(globals.report_count.ok_or(missing(offset, "Report Count"))?);
    let nbits = report_size
        .checked_mul(report_count)
        .filter(|n| *n <= MAX_REPORT_BITS)
        .ok_or(ParserError::InvalidData {
            offset,
            message: format!("Field of {report_count} x {report_size} bits is too large"),
        })?;

    if nbits == 0 {
        return Ok(());
    }
    let report = rdesc.report_mut(report_type, globals.report_id);
    ensure!(
        report.size + nbits <= MAX_REPORT_BITS,
        ParserError::InvalidData {
            offset,
            message: format!("{report_type} report exceeds {MAX_REPORT_BITS} bits"),
        }
    );

    let bit_offset = report.size;
    if flags.is_constant() {
        report.fields.push(Field::Constant(ConstantField {
            bits: bit_offset..=bit_offset + nbits - 1,
        }));
        report.size += nbits;
        return Ok(());
    }

    let logical_range = LogicalRange {
        minimum: globals
            .logical_minimum
            .ok_or(missing(offset, "Logical Minimum"))?,
        maximum: globals
            .logical_maximum
            .ok_or(missing(offset, "Logical Maximum"))?,
    };
    let physical_range = match (globals.physical_minimum, globals.physical_maximum) {
        (Some(minimum), Some(maximum)) => Some(PhysicalRange { minimum, maximum }),
        _ => None,
    };
    let usages = compile_usages(globals, &stack.locals, offset)?;
    let collection = stack.collections.last().copied();

    if flags.is_variable() {
        for c in 0..report_count {
            let first = report.size;
            report.size += report_size;
            // Controls without their own usage repeat the last one
            let usage = usages.get(c).or(usages.last()).copied();
            report.fields.push(Field::Variable(VariableField {
                usage,
                bits: first..=first + report_size - 1,
                logical_range,
                physical_range,
                unit: globals.unit,
                unit_exponent: globals.unit_exponent,
                flags,
                collection,
            }));
        }
    } else {
        report.size += nbits;
        report.fields.push(Field::Array(ArrayField {
            usages,
            bits: bit_offset..=bit_offset + nbits - 1,
            logical_range,
            report_size: ReportSize(report_size),
            report_count: ReportCount(report_count),
            flags,
            collection,
        }));
    }

    Ok(())
}

macro_rules! update_stack {
    ($stack:ident, $class:ident, $which:ident, $from:expr) => {
        $stack.$class.$which = Some($from);
    };
}

fn parse_report_descriptor(bytes: &[u8]) -> Result<ReportDescriptor> {
    let items = ReportDescriptorItems::try_from(bytes)?;

    let mut stack = Stack::default();
    let mut rdesc = ReportDescriptor::default();

    for rdesc_item in items.iter() {
        let offset = rdesc_item.offset();
        match rdesc_item.item_type() {
            ItemType::Main(MainItem::Collection(c)) => {
                let usage = compile_usages(&stack.globals, &stack.locals, offset)?
                    .first()
                    .copied();
                rdesc.collections.push(Collection {
                    collection_type: u8::from(c),
                    usage,
                    parent: stack.collections.last().copied(),
                });
                stack.collections.push(rdesc.collections.len() - 1);
                stack.reset_locals();
            }
            ItemType::Main(MainItem::EndCollection) => {
                ensure!(
                    stack.collections.pop().is_some(),
                    ParserError::UnbalancedCollection { offset }
                );
                stack.reset_locals();
            }
            ItemType::Main(MainItem::Input(flags)) => {
                handle_main_item(ReportType::Input, flags, &stack, &mut rdesc, offset)?;
                stack.reset_locals();
            }
            ItemType::Main(MainItem::Output(flags)) => {
                handle_main_item(ReportType::Output, flags, &stack, &mut rdesc, offset)?;
                stack.reset_locals();
            }
            ItemType::Main(MainItem::Feature(flags)) => {
                handle_main_item(ReportType::Feature, flags, &stack, &mut rdesc, offset)?;
                stack.reset_locals();
            }
            ItemType::Reserved => {}
            ItemType::Global(GlobalItem::UsagePage(usage_page)) => {
                update_stack!(stack, globals, usage_page, usage_page);
            }
            ItemType::Global(GlobalItem::LogicalMinimum(minimum)) => {
                update_stack!(stack, globals, logical_minimum, minimum);
            }
            ItemType::Global(GlobalItem::LogicalMaximum(maximum)) => {
                let minimum = stack.globals.logical_minimum.map(i32::from);
                let maximum = unsigned_maximum(minimum, i32::from(maximum), rdesc_item);
                update_stack!(stack, globals, logical_maximum, LogicalMaximum(maximum));
            }
            ItemType::Global(GlobalItem::PhysicalMinimum(minimum)) => {
                update_stack!(stack, globals, physical_minimum, minimum);
            }
            ItemType::Global(GlobalItem::PhysicalMaximum(maximum)) => {
                let minimum = stack.globals.physical_minimum.map(i32::from);
                let maximum = unsigned_maximum(minimum, i32::from(maximum), rdesc_item);
                update_stack!(stack, globals, physical_maximum, PhysicalMaximum(maximum));
            }
            ItemType::Global(GlobalItem::UnitExponent(exponent)) => {
                update_stack!(stack, globals, unit_exponent, exponent);
            }
            ItemType::Global(GlobalItem::Unit(unit)) => {
                update_stack!(stack, globals, unit, unit);
            }
            ItemType::Global(GlobalItem::ReportSize(size)) => {
                update_stack!(stack, globals, report_size, size);
            }
            ItemType::Global(GlobalItem::ReportId(id)) => {
                update_stack!(stack, globals, report_id, id);
            }
            ItemType::Global(GlobalItem::ReportCount(count)) => {
                update_stack!(stack, globals, report_count, count);
            }
            ItemType::Global(GlobalItem::Push) => {
                stack.push();
            }
            ItemType::Global(GlobalItem::Pop) => {
                stack.pop(offset)?;
            }
            ItemType::Global(GlobalItem::Reserved) => {}
            ItemType::Local(LocalItem::Usage(usage_page, usage_id)) => {
                stack.locals.usages.push(LocalUsage::Usage {
                    usage_page: Some(usage_page),
                    usage_id,
                });
            }
            ItemType::Local(LocalItem::UsageId(usage_id)) => {
                stack.locals.usages.push(LocalUsage::Usage {
                    usage_page: None,
                    usage_id,
                });
            }
            ItemType::Local(LocalItem::UsageMinimum(minimum)) => {
                update_stack!(stack, locals, usage_minimum, minimum);
                stack.locals.complete_range();
            }
            ItemType::Local(LocalItem::UsageMaximum(maximum)) => {
                update_stack!(stack, locals, usage_maximum, maximum);
                stack.locals.complete_range();
            }
            ItemType::Local(LocalItem::Other { .. }) => {}
        };
    }

    ensure!(
        stack.collections.is_empty(),
        ParserError::UnbalancedCollection {
            offset: bytes.len()
        }
    );

    Ok(rdesc)
}
