// SPDX-License-Identifier: MIT

//! A fake device for the integration tests. It takes a report
//! descriptor, derives the link collections and field capabilities
//! a host HID parser would expose for it and answers probes with the
//! bit positions from the parsed descriptor.

#![allow(dead_code)]

use hidreconstruct::caps::*;
use hidreconstruct::descriptor::{
    compare, Comparison, Field, PhysicalRange, ReportDescriptor, Usage, VariableField,
};
use hidreconstruct::probe::{ProbeError, ProbeResolver, ProbeTarget};
use hidreconstruct::*;

use std::collections::HashMap;
use std::ops::RangeInclusive;

/// Read a report descriptor written as whitespace separated hex bytes.
/// Everything after a `#` on a line is ignored.
pub fn read_rdesc(path: &str) -> Vec<u8> {
    let text = std::fs::read_to_string(path).unwrap_or_else(|e| panic!("{path}: {e}"));
    text.lines()
        .flat_map(|line| line.split('#').next().unwrap_or("").split_whitespace())
        .map(|byte| {
            let byte = byte.trim_end_matches(',').trim_start_matches("0x");
            u8::from_str_radix(byte, 16).unwrap_or_else(|e| panic!("{path}: {byte}: {e}"))
        })
        .collect()
}

pub struct Device {
    pub snapshot: CapabilitySnapshot,
    positions: HashMap<(ReportType, DataIndex), (ReportId, RangeInclusive<usize>)>,
    value_arrays: HashMap<(ReportType, ReportId, Usage), RangeInclusive<usize>>,
}

/// One variable control of a parsed report.
struct Control<'a> {
    report_id: ReportId,
    usage: Usage,
    field: &'a VariableField,
}

impl Control<'_> {
    fn width(&self) -> usize {
        self.field.bits.end() - self.field.bits.start() + 1
    }

    fn physical_range(&self) -> Option<PhysicalRange> {
        self.field
            .physical_range
            .filter(|r| i32::from(r.minimum) != 0 || i32::from(r.maximum) != 0)
    }

    fn is_button(&self) -> bool {
        let logical = (
            i32::from(self.field.logical_range.minimum),
            i32::from(self.field.logical_range.maximum),
        );
        self.width() == 1 && logical == (0, 1) && self.physical_range().is_none()
    }

    /// Whether `next` can be part of the same capability as `self`:
    /// same report, page and attributes, directly following.
    fn continues_with(&self, next: &Control) -> bool {
        let (a, b) = (self.field, next.field);
        self.report_id == next.report_id
            && self.usage.usage_page == next.usage.usage_page
            && a.collection == b.collection
            && a.flags == b.flags
            && a.logical_range == b.logical_range
            && a.physical_range == b.physical_range
            && a.unit == b.unit
            && a.unit_exponent == b.unit_exponent
            && self.width() == next.width()
            && *b.bits.start() == a.bits.end() + 1
    }
}

/// How the controls of one capability relate to each other.
#[derive(Clone, Copy, PartialEq)]
enum Shape {
    Single,
    /// Consecutive usages, one data index each
    Range,
    /// The same usage repeated, i.e. a usage value array
    Repeat,
}

/// Split `controls` into groups the way a host parser builds one
/// capability per main item.
fn group<'a, 'b>(controls: &'b [Control<'a>]) -> Vec<(Shape, &'b [Control<'a>])> {
    let mut groups = Vec::new();
    let mut start = 0;
    let mut shape = Shape::Single;
    for idx in 1..=controls.len() {
        let next_shape = controls.get(idx).and_then(|next| {
            let last = &controls[idx - 1];
            if !last.continues_with(next) {
                return None;
            }
            let (prev, this) = (u16::from(last.usage.usage_id), u16::from(next.usage.usage_id));
            let candidate = if this == prev.wrapping_add(1) && prev != u16::MAX {
                Shape::Range
            } else if this == prev && !last.is_button() {
                Shape::Repeat
            } else {
                return None;
            };
            (shape == Shape::Single || shape == candidate).then_some(candidate)
        });
        match next_shape {
            Some(s) => shape = s,
            None => {
                groups.push((shape, &controls[start..idx]));
                start = idx;
                shape = Shape::Single;
            }
        }
    }
    groups
}

impl Device {
    /// Emulate a device with the given report descriptor.
    ///
    /// Only variable fields become capabilities. Adjacent controls with
    /// the same attributes and consecutive usages become one ranged
    /// capability, repeating the same usage makes a usage value array.
    /// Single bit controls with a 0 to 1 logical range and no physical
    /// range are buttons, everything else is a value.
    pub fn new(bytes: &[u8]) -> Device {
        let rdesc = ReportDescriptor::try_from(bytes).expect("Failed to parse descriptor");
        let mut snapshot = CapabilitySnapshot::default();

        for collection in rdesc.collections() {
            let usage = collection.usage.unwrap_or_default();
            snapshot.collections.push(LinkCollectionNode {
                usage_page: usage.usage_page,
                usage: usage.usage_id,
                collection_type: collection.collection_type,
                parent: collection.parent.unwrap_or(0),
                first_child: 0,
                next_sibling: 0,
            });
        }
        let mut last_child: Vec<Option<usize>> = vec![None; snapshot.collections.len()];
        for idx in 1..snapshot.collections.len() {
            let parent = snapshot.collections[idx].parent;
            match last_child[parent] {
                None => snapshot.collections[parent].first_child = idx,
                Some(previous) => snapshot.collections[previous].next_sibling = idx,
            }
            last_child[parent] = Some(idx);
        }

        let mut positions = HashMap::new();
        let mut value_arrays = HashMap::new();
        for report_type in ReportType::ALL {
            let mut data_index = 0u16;
            let caps = snapshot.report_mut(report_type);
            let mut controls = Vec::new();
            for report in rdesc.reports(report_type) {
                let report_id = report.report_id.unwrap_or(ReportId(0));
                caps.max_report_length = caps.max_report_length.max(1 + report.size.div_ceil(8));
                controls.extend(report.fields.iter().filter_map(|field| match field {
                    Field::Variable(field) => field.usage.map(|usage| Control {
                        report_id,
                        usage,
                        field,
                    }),
                    _ => None,
                }));
            }

            for (shape, group) in group(&controls) {
                let first = &group[0];
                let last = &group[group.len() - 1];
                let usages = match shape {
                    Shape::Range => Usages::Range {
                        usage_minimum: first.usage.usage_id,
                        usage_maximum: last.usage.usage_id,
                        data_index_minimum: DataIndex(data_index),
                        data_index_maximum: DataIndex(data_index + group.len() as u16 - 1),
                    },
                    Shape::Single | Shape::Repeat => Usages::Single {
                        usage: first.usage.usage_id,
                        data_index: DataIndex(data_index),
                    },
                };
                let kind = if first.is_button() {
                    FieldKind::Button
                } else {
                    let physical = first.physical_range();
                    FieldKind::Value(ValueAttributes {
                        logical_minimum: first.field.logical_range.minimum,
                        logical_maximum: first.field.logical_range.maximum,
                        physical_minimum: physical.map(|r| r.minimum).unwrap_or_default(),
                        physical_maximum: physical.map(|r| r.maximum).unwrap_or_default(),
                        unit_exponent: physical.and(first.field.unit_exponent).unwrap_or_default(),
                        unit: physical.and(first.field.unit).unwrap_or_default(),
                        report_size: ReportSize(first.width()),
                        report_count: ReportCount(group.len()),
                    })
                };
                caps.fields.push(FieldCapability {
                    link_collection: first.field.collection.unwrap_or(0),
                    report_id: first.report_id,
                    usage_page: first.usage.usage_page,
                    bit_field: first.field.flags,
                    usages,
                    kind,
                });

                // A usage value array has a single data index for
                // all its controls
                let indexed = if shape == Shape::Repeat { &group[..1] } else { group };
                for control in indexed {
                    positions.insert(
                        (report_type, DataIndex(data_index)),
                        (control.report_id, control.field.bits.clone()),
                    );
                    data_index += 1;
                }
                if shape == Shape::Repeat {
                    value_arrays.insert(
                        (report_type, first.report_id, first.usage),
                        *first.field.bits.start()..=*last.field.bits.end(),
                    );
                }
            }
        }

        Device {
            snapshot,
            positions,
            value_arrays,
        }
    }

    /// The number of capabilities per report type whose
    /// usages are a range and which are usage value arrays.
    pub fn shapes(&self, report_type: ReportType) -> (usize, usize) {
        let fields = &self.snapshot.report(report_type).fields;
        let ranges = fields
            .iter()
            .filter(|f| matches!(f.usages, Usages::Range { .. }))
            .count();
        let arrays = fields
            .iter()
            .filter(|f| {
                matches!(f.usages, Usages::Single { .. }) && f.control_count() > 1
            })
            .count();
        (ranges, arrays)
    }

    /// Relink the children of every collection so the last declared
    /// child comes first.
    pub fn reverse_linkage(&mut self) {
        let nodes = &mut self.snapshot.collections;
        for parent in 0..nodes.len() {
            let mut children = Vec::new();
            let mut child = nodes[parent].first_child;
            while child != 0 {
                children.push(child);
                child = nodes[child].next_sibling;
            }
            children.reverse();
            nodes[parent].first_child = children.first().copied().unwrap_or(0);
            for pair in children.windows(2) {
                nodes[pair[0]].next_sibling = pair[1];
            }
            if let Some(last) = children.last() {
                nodes[*last].next_sibling = 0;
            }
        }
    }

    /// Set all bits of the targeted control, or write the value
    /// of a usage value array bit by bit.
    pub fn probe(
        &self,
        report_type: ReportType,
        target: &ProbeTarget,
        field: &FieldCapability,
        report: &mut [u8],
    ) -> Result<(), ProbeError> {
        let (report_id, bits, value) = match target {
            ProbeTarget::DataIndex(data_index) => {
                let (report_id, bits) = self
                    .positions
                    .get(&(report_type, *data_index))
                    .ok_or(ProbeError::Failed {
                        message: format!("no {report_type} control {data_index}"),
                    })?;
                (*report_id, bits.clone(), None)
            }
            ProbeTarget::UsageValueArray { usage, value } => {
                let usage = Usage {
                    usage_page: field.usage_page,
                    usage_id: *usage,
                };
                let bits = self
                    .value_arrays
                    .get(&(report_type, field.report_id, usage))
                    .ok_or(ProbeError::Status { status: 0xc0110004 })?;
                if value.len() != bits.clone().count().div_ceil(8) {
                    return Err(ProbeError::Status { status: 0xc0110007 });
                }
                (field.report_id, bits.clone(), Some(value))
            }
        };
        if report[0] != u8::from(report_id) {
            return Err(ProbeError::Status { status: 0xc0110002 });
        }
        for (idx, bit) in bits.enumerate() {
            if value.is_some_and(|v| v[idx / 8] & (1 << (idx % 8)) == 0) {
                continue;
            }
            let byte = 1 + bit / 8;
            if byte >= report.len() {
                return Err(ProbeError::Status { status: 0xc0110004 });
            }
            report[byte] |= 1 << (bit % 8);
        }
        Ok(())
    }

    pub fn reconstruct(&self, options: &ReconstructOptions) -> ReconstructedDescriptor {
        let probe = |report_type: ReportType,
                     target: &ProbeTarget,
                     field: &FieldCapability,
                     report: &mut [u8]|
         -> Result<(), ProbeError> { self.probe(report_type, target, field, report) };
        reconstruct_with(&self.snapshot, &ProbeResolver::new(probe), options)
            .expect("Reconstruction failed")
    }
}

/// Reconstruct `bytes` through an emulated device and check the
/// result describes the same reports.
pub fn assert_roundtrip(bytes: &[u8], name: &str) {
    let device = Device::new(bytes);
    let rdesc = device.reconstruct(&ReconstructOptions::new());
    assert!(rdesc.unresolved().is_empty(), "{name}: unresolved fields");
    match compare(rdesc.bytes(), bytes).unwrap_or_else(|e| panic!("{name}: {e}\n{rdesc}")) {
        Comparison::Identical | Comparison::Equivalent => {}
        Comparison::Different { reason } => panic!("{name}: {reason}\n{rdesc}"),
    }

    // Without padding the fields move, but it must still parse
    let unpadded = device.reconstruct(&ReconstructOptions::new().pad_gaps(false));
    ReportDescriptor::try_from(unpadded.bytes())
        .unwrap_or_else(|e| panic!("{name} without padding: {e}\n{unpadded}"));
}
