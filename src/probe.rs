// SPDX-License-Identifier: MIT

//! Finding out where in its report a field lives.
//!
//! The platform capabilities do not say at which bit a field starts.
//! What the platform does offer is a way to set a field's value in a
//! report buffer, exactly the way the driver would pack it. Setting a
//! field to all ones in an otherwise zeroed buffer and looking for the
//! first set bit thus yields the field's offset.
//!
//! The platform primitive is abstracted as [BitProbe]. Anything that
//! can map a field to its bits (e.g. a table in a test) may instead
//! implement [BitResolver] directly.

use crate::caps::{CapabilitySnapshot, FieldCapability, FieldId, FieldKind, ReportKey, ReportType};
use crate::types::*;

use thiserror::Error;
use tracing::{debug, trace, warn};

/// An inclusive range of bits within a report. Bit 0 is the first
/// bit after the report ID byte.
///
/// There is no "unset" range: a field without a known position
/// has no [BitRange] at all, i.e. `Option<BitRange>` is `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BitRange {
    first: usize,
    last: usize,
}

impl BitRange {
    /// Returns `None` if `first > last`.
    pub fn new(first: usize, last: usize) -> Option<BitRange> {
        (first <= last).then_some(BitRange { first, last })
    }

    /// The range of `width` bits starting at `first`.
    pub fn with_width(first: usize, width: usize) -> Option<BitRange> {
        let last = first.checked_add(width.checked_sub(1)?)?;
        Some(BitRange { first, last })
    }

    pub fn first(&self) -> usize {
        self.first
    }

    pub fn last(&self) -> usize {
        self.last
    }

    pub fn width(&self) -> usize {
        self.last - self.first + 1
    }

    /// The smallest range covering both `self` and `other`.
    pub fn union(&self, other: &BitRange) -> BitRange {
        BitRange {
            first: self.first.min(other.first),
            last: self.last.max(other.last),
        }
    }

    /// Widen `range` to also cover `other`. An unset range
    /// becomes `other`.
    pub fn widen(range: &mut Option<BitRange>, other: &BitRange) {
        *range = Some(match range {
            None => *other,
            Some(r) => r.union(other),
        });
    }
}

impl std::fmt::Display for BitRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}..={}", self.first, self.last)
    }
}

/// What a [BitProbe] is asked to set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeTarget {
    /// Set the single control with this data index to its
    /// maximal bit pattern.
    DataIndex(DataIndex),
    /// Write `value` as the whole usage value array of `usage`.
    UsageValueArray { usage: UsageId, value: Vec<u8> },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProbeError {
    #[error("Platform rejected the probe with status {status:#010x}")]
    Status { status: u32 },
    #[error("Probe failed: {message}")]
    Failed { message: String },
}

/// The platform's field encoding primitive.
///
/// Implementations write the target's maximal value into `report`
/// (whose first byte is the report ID) with the same bit packing the
/// platform uses for real reports. Closures with a matching signature
/// implement this trait.
pub trait BitProbe {
    fn probe(
        &self,
        report_type: ReportType,
        target: &ProbeTarget,
        field: &FieldCapability,
        report: &mut [u8],
    ) -> Result<(), ProbeError>;
}

impl<F> BitProbe for F
where
    F: Fn(ReportType, &ProbeTarget, &FieldCapability, &mut [u8]) -> Result<(), ProbeError>,
{
    fn probe(
        &self,
        report_type: ReportType,
        target: &ProbeTarget,
        field: &FieldCapability,
        report: &mut [u8],
    ) -> Result<(), ProbeError> {
        self(report_type, target, field, report)
    }
}

/// Maps a field to the bits it occupies in its report.
pub trait BitResolver {
    /// Returns `None` if the position cannot be determined.
    fn resolve(
        &self,
        report_type: ReportType,
        field: &FieldCapability,
        max_report_length: usize,
    ) -> Option<BitRange>;
}

/// The platform reports its report lengths as 16-bit values.
pub const MAX_REPORT_LENGTH: usize = 0xffff;

/// A [BitResolver] that uses a [BitProbe] on a synthetic report.
#[derive(Debug, Clone)]
pub struct ProbeResolver<P> {
    probe: P,
}

impl<P: BitProbe> ProbeResolver<P> {
    pub fn new(probe: P) -> Self {
        ProbeResolver { probe }
    }

    /// Whether `field` can only be probed as a whole usage value array.
    ///
    /// A value field with more report items than usages repeats its
    /// last usage for the remaining items (Section 6.2.2.8). With a
    /// single usage this makes a usage value array whose items share
    /// one data index; setting that index alone would only reveal the
    /// first item.
    fn needs_value_array(field: &FieldCapability) -> bool {
        match &field.kind {
            FieldKind::Button => false,
            FieldKind::Value(attrs) => {
                usize::from(attrs.report_count) > 1 && field.usages.usage_count() == 1
            }
        }
    }

    fn target(field: &FieldCapability) -> ProbeTarget {
        match &field.kind {
            FieldKind::Value(attrs) if Self::needs_value_array(field) => {
                let bits = usize::from(attrs.report_count) * usize::from(attrs.report_size);
                ProbeTarget::UsageValueArray {
                    usage: field.usages.first_usage(),
                    value: vec![0xff; bits.div_ceil(8)],
                }
            }
            _ => ProbeTarget::DataIndex(field.usages.first_data_index()),
        }
    }
}

/// The position of the first set bit, not counting the report ID byte.
fn first_set_bit(report: &[u8]) -> Option<usize> {
    report
        .iter()
        .enumerate()
        .skip(1)
        .find(|(_, byte)| **byte != 0)
        .map(|(idx, byte)| (idx - 1) * 8 + byte.trailing_zeros() as usize)
}

impl<P: BitProbe> BitResolver for ProbeResolver<P> {
    fn resolve(
        &self,
        report_type: ReportType,
        field: &FieldCapability,
        max_report_length: usize,
    ) -> Option<BitRange> {
        let width = field.bit_width()?;
        if max_report_length < 2 {
            debug!("{report_type} reports have no room for data ({max_report_length} bytes)");
            return None;
        }
        if max_report_length > MAX_REPORT_LENGTH {
            debug!(
                "{report_type} report length {max_report_length} exceeds {MAX_REPORT_LENGTH} bytes"
            );
            return None;
        }
        if width > (max_report_length - 1) * 8 {
            debug!(
                "{report_type} field of {width} bits does not fit into {max_report_length} bytes"
            );
            return None;
        }

        let mut report = vec![0u8; max_report_length];
        report[0] = u8::from(field.report_id);

        let target = Self::target(field);
        if let Err(e) = self.probe.probe(report_type, &target, field, &mut report) {
            trace!("{report_type} probe for {target:?} failed: {e}");
            return None;
        }

        let first = first_set_bit(&report);
        trace!("{report_type} probe for {target:?}: first bit {first:?}");
        BitRange::with_width(first?, width)
    }
}

/// A field together with its position, if known.
#[derive(Debug, Clone, Copy)]
pub struct ResolvedField<'a> {
    pub id: FieldId,
    pub field: &'a FieldCapability,
    pub bits: Option<BitRange>,
}

impl ResolvedField<'_> {
    pub fn report_key(&self) -> ReportKey {
        ReportKey {
            report_type: self.id.report_type,
            report_id: self.field.report_id,
        }
    }
}

/// Resolve every field of the snapshot, in declaration order.
pub fn resolve_all<'a, R: BitResolver + ?Sized>(
    snapshot: &'a CapabilitySnapshot,
    resolver: &R,
) -> Vec<ResolvedField<'a>> {
    let fields: Vec<ResolvedField> = snapshot
        .fields()
        .map(|(id, field)| {
            let max_len = snapshot.report(id.report_type).max_report_length;
            let bits = resolver.resolve(id.report_type, field, max_len);
            if bits.is_none() {
                warn!(
                    "Bit position of {id} (usage page {:#06x}, usage {:#06x}) is unknown",
                    u16::from(field.usage_page),
                    u16::from(field.usages.first_usage())
                );
            }
            ResolvedField { id, field, bits }
        })
        .collect();
    debug!(
        "Resolved {} of {} fields",
        fields.iter().filter(|f| f.bits.is_some()).count(),
        fields.len()
    );
    fields
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::caps::{Usages, ValueAttributes};
    use crate::hid::DataFlags;
    use std::cell::RefCell;

    fn button(usage: u16, data_index: u16) -> FieldCapability {
        FieldCapability {
            link_collection: 0,
            report_id: ReportId(2),
            usage_page: UsagePage(0x09),
            bit_field: DataFlags(0x02),
            usages: Usages::Single {
                usage: UsageId(usage),
                data_index: DataIndex(data_index),
            },
            kind: FieldKind::Button,
        }
    }

    fn value(size: usize, count: usize) -> FieldCapability {
        FieldCapability {
            link_collection: 0,
            report_id: ReportId(0),
            usage_page: UsagePage(0x01),
            bit_field: DataFlags(0x02),
            usages: Usages::Single {
                usage: UsageId(0x30),
                data_index: DataIndex(4),
            },
            kind: FieldKind::Value(ValueAttributes {
                logical_minimum: LogicalMinimum(0),
                logical_maximum: LogicalMaximum(255),
                report_size: ReportSize(size),
                report_count: ReportCount(count),
                ..Default::default()
            }),
        }
    }

    #[test]
    fn bit_range() {
        assert_eq!(BitRange::new(3, 2), None);
        let r = BitRange::with_width(8, 8).unwrap();
        assert_eq!((r.first(), r.last(), r.width()), (8, 15, 8));
        assert_eq!(BitRange::with_width(8, 0), None);

        let mut range = None;
        BitRange::widen(&mut range, &r);
        assert_eq!(range, Some(r));
        BitRange::widen(&mut range, &BitRange::new(2, 4).unwrap());
        assert_eq!(range, BitRange::new(2, 15));
        BitRange::widen(&mut range, &BitRange::new(2, 4).unwrap());
        assert_eq!(range, BitRange::new(2, 15));
    }

    #[test]
    fn first_bit() {
        assert_eq!(first_set_bit(&[0xff, 0, 0]), None);
        assert_eq!(first_set_bit(&[0x01, 0x00, 0x10]), Some(12));
        assert_eq!(first_set_bit(&[0x00, 0x01]), Some(0));
    }

    #[test]
    fn resolve_button() {
        let seen = RefCell::new(Vec::new());
        let probe = |_: ReportType, target: &ProbeTarget, _: &FieldCapability, report: &mut [u8]| -> Result<(), ProbeError> {
            seen.borrow_mut().push((target.clone(), report[0]));
            report[2] |= 0b0000_1000;
            Ok(())
        };
        let resolver = ProbeResolver::new(probe);
        let bits = resolver.resolve(ReportType::Input, &button(3, 7), 4);
        assert_eq!(bits, BitRange::new(11, 11));
        assert_eq!(
            seen.borrow().as_slice(),
            [(ProbeTarget::DataIndex(DataIndex(7)), 2)]
        );
    }

    #[test]
    fn resolve_value_array() {
        let seen = RefCell::new(None);
        let probe = |_: ReportType, target: &ProbeTarget, _: &FieldCapability, report: &mut [u8]| -> Result<(), ProbeError> {
            *seen.borrow_mut() = Some(target.clone());
            report[1] = 0xff;
            Ok(())
        };
        let resolver = ProbeResolver::new(probe);
        let bits = resolver.resolve(ReportType::Feature, &value(12, 3), 8);
        assert_eq!(bits, BitRange::new(0, 35));
        assert_eq!(
            seen.borrow().clone(),
            Some(ProbeTarget::UsageValueArray {
                usage: UsageId(0x30),
                value: vec![0xff; 5],
            })
        );

        // a single item is probed through its data index
        let bits = resolver.resolve(ReportType::Feature, &value(8, 1), 8);
        assert_eq!(bits, BitRange::new(0, 7));
        assert_eq!(
            seen.borrow().clone(),
            Some(ProbeTarget::DataIndex(DataIndex(4)))
        );
    }

    #[test]
    fn oversized_fields_stay_unresolved() {
        let calls = RefCell::new(0);
        let probe = |_: ReportType, _: &ProbeTarget, _: &FieldCapability, report: &mut [u8]| -> Result<(), ProbeError> {
            *calls.borrow_mut() += 1;
            report[1] = 0xff;
            Ok(())
        };
        let resolver = ProbeResolver::new(probe);

        // 4 x 16 bits do not fit into 3 data bytes
        assert_eq!(resolver.resolve(ReportType::Input, &value(16, 4), 4), None);
        assert_eq!(resolver.resolve(ReportType::Input, &value(1 << 40, 2), 4), None);
        assert_eq!(
            resolver.resolve(ReportType::Input, &button(1, 0), MAX_REPORT_LENGTH + 1),
            None
        );
        assert_eq!(*calls.borrow(), 0);

        assert_eq!(
            resolver.resolve(ReportType::Input, &value(16, 4), 9),
            BitRange::new(0, 63)
        );
        assert_eq!(*calls.borrow(), 1);
    }

    #[test]
    fn resolve_failures() {
        let failing = |_: ReportType, _: &ProbeTarget, _: &FieldCapability, _: &mut [u8]| -> Result<(), ProbeError> {
            Err(ProbeError::Status { status: 0xc0110004 })
        };
        let resolver = ProbeResolver::new(failing);
        assert_eq!(resolver.resolve(ReportType::Input, &button(1, 0), 4), None);

        // success without any bit set
        let silent = |_: ReportType, _: &ProbeTarget, _: &FieldCapability, _: &mut [u8]| -> Result<(), ProbeError> { Ok(()) };
        let resolver = ProbeResolver::new(silent);
        assert_eq!(resolver.resolve(ReportType::Input, &button(1, 0), 4), None);

        // zero-sized value and a report without room for data
        let setting = |_: ReportType, _: &ProbeTarget, _: &FieldCapability, r: &mut [u8]| -> Result<(), ProbeError> {
            r[r.len() - 1] = 1;
            Ok(())
        };
        let resolver = ProbeResolver::new(setting);
        assert_eq!(resolver.resolve(ReportType::Input, &value(0, 1), 4), None);
        assert_eq!(resolver.resolve(ReportType::Input, &button(1, 0), 1), None);
        assert_eq!(
            resolver.resolve(ReportType::Input, &button(1, 0), 2),
            BitRange::new(0, 0)
        );
    }
}
