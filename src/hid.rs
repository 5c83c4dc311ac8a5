// SPDX-License-Identifier: MIT

//! HID short items: the item model, writing items as bytes and splitting
//! a report descriptor back into items.
//!
//! Unless stated otherwise, "Section a.b.c" refers to the
//! [HID Device Class Definition for HID 1.11](https://www.usb.org/document-library/device-class-definition-hid-111).
//!
//! # Encoding items
//!
//! Every item picks the smallest data size (1, 2 or 4 bytes) that holds
//! its value, see Section 6.2.2.2. The range items (logical and physical
//! minimum and maximum) are two's complement, all others unsigned.
//! Values that need more than 32 bits are rejected with [HidError::OutOfRange].
//!
//! ```
//! # use hidreconstruct::hid::*;
//! # use hidreconstruct::types::*;
//! let item = ItemType::from(LogicalMinimum::from(-129));
//! assert_eq!(item.encode().unwrap(), [0x16, 0x7f, 0xff]);
//!
//! let item = ItemType::from(ReportCount::from(0x1_0000_0000usize));
//! assert!(item.encode().is_err());
//! ```
//!
//! # Itemizing
//!
//! ```
//! # use hidreconstruct::hid::*;
//! let bytes = [0x05, 0x01, 0x09, 0x02, 0xa1, 0x01, 0xc0];
//! let items = ReportDescriptorItems::try_from(bytes.as_slice()).unwrap();
//! assert_eq!(items.len(), 4);
//! assert_eq!(items[2].offset(), 4);
//! assert_eq!(items[3].item_type(), ItemType::Main(MainItem::EndCollection));
//! ```

use crate::types::*;
use crate::{ensure, ParserError};

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum HidError {
    #[error("Invalid data: {message}")]
    InvalidData { message: String },
    #[error("Insufficient data")]
    InsufficientData,
    #[error("Value {value} does not fit into a short item")]
    OutOfRange { value: i128 },
}

type Result<T> = std::result::Result<T, HidError>;

/// Item prefixes, i.e. the header byte with the size bits cleared.
mod prefix {
    pub const INPUT: u8 = 0x80;
    pub const OUTPUT: u8 = 0x90;
    pub const COLLECTION: u8 = 0xa0;
    pub const FEATURE: u8 = 0xb0;
    pub const END_COLLECTION: u8 = 0xc0;

    pub const USAGE_PAGE: u8 = 0x04;
    pub const LOGICAL_MINIMUM: u8 = 0x14;
    pub const LOGICAL_MAXIMUM: u8 = 0x24;
    pub const PHYSICAL_MINIMUM: u8 = 0x34;
    pub const PHYSICAL_MAXIMUM: u8 = 0x44;
    pub const UNIT_EXPONENT: u8 = 0x54;
    pub const UNIT: u8 = 0x64;
    pub const REPORT_SIZE: u8 = 0x74;
    pub const REPORT_ID: u8 = 0x84;
    pub const REPORT_COUNT: u8 = 0x94;
    pub const PUSH: u8 = 0xa4;
    pub const POP: u8 = 0xb4;

    pub const USAGE: u8 = 0x08;
    pub const USAGE_MINIMUM: u8 = 0x18;
    pub const USAGE_MAXIMUM: u8 = 0x28;

    /// The header byte of a long item, Section 6.2.2.3.
    pub const LONG_ITEM_HEADER: u8 = 0xfe;
}

/// The smallest little endian representation of an unsigned `value`.
fn unsigned_data(value: u64) -> Result<Vec<u8>> {
    if let Ok(v) = u8::try_from(value) {
        Ok(vec![v])
    } else if let Ok(v) = u16::try_from(value) {
        Ok(v.to_le_bytes().to_vec())
    } else if let Ok(v) = u32::try_from(value) {
        Ok(v.to_le_bytes().to_vec())
    } else {
        Err(HidError::OutOfRange {
            value: value.into(),
        })
    }
}

/// The smallest two's complement representation of `value`.
fn signed_data(value: i64) -> Result<Vec<u8>> {
    if let Ok(v) = i8::try_from(value) {
        Ok(v.to_le_bytes().to_vec())
    } else if let Ok(v) = i16::try_from(value) {
        Ok(v.to_le_bytes().to_vec())
    } else if let Ok(v) = i32::try_from(value) {
        Ok(v.to_le_bytes().to_vec())
    } else {
        Err(HidError::OutOfRange {
            value: value.into(),
        })
    }
}

/// Header byte (prefix plus size bits) followed by `data`.
fn short_item(prefix: u8, data: &[u8]) -> Vec<u8> {
    let size = match data.len() {
        0 => 0b00,
        1 => 0b01,
        2 => 0b10,
        _ => 0b11,
    };
    let mut bytes = Vec::with_capacity(data.len() + 1);
    bytes.push(prefix | size);
    bytes.extend_from_slice(data);
    bytes
}

/// The little endian value of 0, 1, 2 or 4 data bytes.
fn data_value(data: &[u8]) -> Result<u32> {
    match *data {
        [] => Ok(0),
        [b0] => Ok(b0.into()),
        [b0, b1] => Ok(u16::from_le_bytes([b0, b1]).into()),
        [b0, b1, b2, b3] => Ok(u32::from_le_bytes([b0, b1, b2, b3])),
        _ => Err(HidError::InvalidData {
            message: format!("Invalid data size {}", data.len()),
        }),
    }
}

/// [data_value], sign-extended from the number of data bytes.
fn signed_data_value(data: &[u8]) -> Result<i32> {
    let value = data_value(data)?;
    Ok(match data.len() {
        1 => value as u8 as i8 as i32,
        2 => value as u16 as i16 as i32,
        _ => value as i32,
    })
}

/// One of the [MainItem], [GlobalItem] or [LocalItem] items.
/// [ItemType::Reserved] stands for the reserved item type 3.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ItemType {
    Main(MainItem),
    Global(GlobalItem),
    Local(LocalItem),
    Reserved,
}

fn unencodable(what: &str) -> HidError {
    HidError::InvalidData {
        message: format!("{what} cannot be encoded"),
    }
}

impl ItemType {
    /// The short item bytes of this item, the inverse of
    /// [`ItemType::try_from(&[u8])`](ItemType::try_from).
    ///
    /// ```
    /// # use hidreconstruct::hid::*;
    /// # use hidreconstruct::types::*;
    /// let item = ItemType::from(LogicalMinimum::from(128i32));
    /// let bytes = item.encode().unwrap();
    /// assert_eq!(bytes, [0x16, 0x80, 0x00]);
    /// assert_eq!(ItemType::try_from(bytes.as_slice()).unwrap(), item);
    /// ```
    pub fn encode(&self) -> Result<Vec<u8>> {
        match self {
            ItemType::Main(item) => item.encode(),
            ItemType::Global(item) => item.encode(),
            ItemType::Local(item) => item.encode(),
            ItemType::Reserved => Err(unencodable("Reserved item")),
        }
    }
}

impl std::fmt::Display for ItemType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ItemType::Main(item) => write!(f, "{item}"),
            ItemType::Global(item) => write!(f, "{item}"),
            ItemType::Local(item) => write!(f, "{item}"),
            ItemType::Reserved => write!(f, "Reserved"),
        }
    }
}

macro_rules! impl_item_from {
    ($tipo:ty, $class:ident) => {
        impl From<$tipo> for ItemType {
            fn from(item: $tipo) -> ItemType {
                ItemType::$class(item)
            }
        }
    };
    ($tipo:ty, $class:ident, $variant:ident) => {
        impl From<$tipo> for ItemType {
            fn from(item: $tipo) -> ItemType {
                ItemType::from($class::$variant(item))
            }
        }
    };
}

impl_item_from!(MainItem, Main);
impl_item_from!(GlobalItem, Global);
impl_item_from!(LocalItem, Local);
impl_item_from!(CollectionItem, MainItem, Collection);
impl_item_from!(UsagePage, GlobalItem, UsagePage);
impl_item_from!(LogicalMinimum, GlobalItem, LogicalMinimum);
impl_item_from!(LogicalMaximum, GlobalItem, LogicalMaximum);
impl_item_from!(PhysicalMinimum, GlobalItem, PhysicalMinimum);
impl_item_from!(PhysicalMaximum, GlobalItem, PhysicalMaximum);
impl_item_from!(UnitExponent, GlobalItem, UnitExponent);
impl_item_from!(Unit, GlobalItem, Unit);
impl_item_from!(ReportSize, GlobalItem, ReportSize);
impl_item_from!(ReportId, GlobalItem, ReportId);
impl_item_from!(ReportCount, GlobalItem, ReportCount);
impl_item_from!(UsageId, LocalItem, UsageId);
impl_item_from!(UsageMinimum, LocalItem, UsageMinimum);
impl_item_from!(UsageMaximum, LocalItem, UsageMaximum);

/// The human-readable name of a usage page, if known.
pub(crate) fn usage_page_name(usage_page: UsagePage) -> String {
    #[cfg(feature = "hut")]
    if let Ok(page) = hut::UsagePage::from_usage_page_value(u16::from(usage_page)) {
        return page.name();
    }
    format!("Usage Page {:#06x}", u16::from(usage_page))
}

/// The human-readable name of a usage on the given page, if known.
pub(crate) fn usage_name(usage_page: UsagePage, usage_id: UsageId) -> String {
    #[cfg(feature = "hut")]
    if let Ok(usage) =
        hut::Usage::new_from_page_and_id(u16::from(usage_page), u16::from(usage_id))
    {
        return usage.name();
    }
    format!("{:#06x}", u16::from(usage_id))
}

/// Main items, Section 6.2.2.4. Input, Output and Feature create the
/// fields of a report, Collection and End Collection group them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MainItem {
    Input(DataFlags),
    Output(DataFlags),
    Feature(DataFlags),
    Collection(CollectionItem),
    EndCollection,
}

impl MainItem {
    pub fn encode(&self) -> Result<Vec<u8>> {
        let (prefix, data) = match *self {
            MainItem::Input(flags) => (prefix::INPUT, unsigned_data(flags.bits().into())?),
            MainItem::Output(flags) => (prefix::OUTPUT, unsigned_data(flags.bits().into())?),
            MainItem::Feature(flags) => (prefix::FEATURE, unsigned_data(flags.bits().into())?),
            MainItem::Collection(c) => (prefix::COLLECTION, vec![u8::from(c)]),
            MainItem::EndCollection => (prefix::END_COLLECTION, vec![]),
        };
        Ok(short_item(prefix, &data))
    }
}

impl std::fmt::Display for MainItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MainItem::Input(flags) => write!(f, "Input ({flags})"),
            MainItem::Output(flags) => write!(f, "Output ({flags})"),
            MainItem::Feature(flags) => write!(f, "Feature ({flags})"),
            MainItem::Collection(c) => write!(f, "Collection ({c})"),
            MainItem::EndCollection => write!(f, "End Collection"),
        }
    }
}

/// The data of an Input, Output or Feature item, Section 6.2.2.5.
///
/// The platform capabilities carry these bits verbatim, so they are
/// kept as a bit field and written back unchanged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct DataFlags(pub u32);

impl DataFlags {
    pub const CONSTANT: u32 = 1 << 0;
    pub const VARIABLE: u32 = 1 << 1;
    pub const RELATIVE: u32 = 1 << 2;
    pub const WRAP: u32 = 1 << 3;
    pub const NONLINEAR: u32 = 1 << 4;
    pub const NO_PREFERRED_STATE: u32 = 1 << 5;
    pub const NULL_STATE: u32 = 1 << 6;
    pub const VOLATILE: u32 = 1 << 7;
    pub const BUFFERED_BYTES: u32 = 1 << 8;

    /// `Cnst,Var,Abs`, the flags of a padding field.
    pub const PADDING: DataFlags = DataFlags(Self::CONSTANT | Self::VARIABLE);

    pub fn bits(&self) -> u32 {
        self.0
    }

    fn has(&self, flag: u32) -> bool {
        self.0 & flag != 0
    }

    /// Constant fields carry no data, typically padding.
    pub fn is_constant(&self) -> bool {
        self.has(Self::CONSTANT)
    }

    /// One value per control. Otherwise the field is an array
    /// of indices into its usages.
    pub fn is_variable(&self) -> bool {
        self.has(Self::VARIABLE)
    }

    pub fn is_relative(&self) -> bool {
        self.has(Self::RELATIVE)
    }
}

impl From<u32> for DataFlags {
    fn from(bits: u32) -> DataFlags {
        DataFlags(bits)
    }
}

impl std::fmt::Display for DataFlags {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        const PAIRS: [(u32, &str, &str); 3] = [
            (DataFlags::CONSTANT, "Cnst", "Data"),
            (DataFlags::VARIABLE, "Var", "Arr"),
            (DataFlags::RELATIVE, "Rel", "Abs"),
        ];
        // Only listed when set
        const OPTIONAL: [(u32, &str); 6] = [
            (DataFlags::WRAP, "Wrap"),
            (DataFlags::NONLINEAR, "NonLin"),
            (DataFlags::NO_PREFERRED_STATE, "NoPref"),
            (DataFlags::NULL_STATE, "Null"),
            (DataFlags::VOLATILE, "Vol"),
            (DataFlags::BUFFERED_BYTES, "Buff"),
        ];
        let parts: Vec<&str> = PAIRS
            .iter()
            .map(|(flag, set, unset)| if self.has(*flag) { *set } else { *unset })
            .chain(
                OPTIONAL
                    .iter()
                    .filter(|(flag, _)| self.has(*flag))
                    .map(|(_, name)| *name),
            )
            .collect();
        write!(f, "{}", parts.join(","))
    }
}

/// The type of a collection, Section 6.2.2.6.
///
/// Reserved and vendor-defined types keep their numeric value so
/// they are written back as they came.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionItem {
    Physical,
    Application,
    Logical,
    Report,
    NamedArray,
    UsageSwitch,
    UsageModifier,
    Other(u8),
}

const COLLECTION_TYPES: [(CollectionItem, &str); 7] = [
    (CollectionItem::Physical, "Physical"),
    (CollectionItem::Application, "Application"),
    (CollectionItem::Logical, "Logical"),
    (CollectionItem::Report, "Report"),
    (CollectionItem::NamedArray, "Named Array"),
    (CollectionItem::UsageSwitch, "Usage Switch"),
    (CollectionItem::UsageModifier, "Usage Modifier"),
];

impl From<CollectionItem> for u8 {
    fn from(c: CollectionItem) -> u8 {
        match c {
            CollectionItem::Other(value) => value,
            known => COLLECTION_TYPES
                .iter()
                .position(|(ct, _)| *ct == known)
                .map_or(0, |pos| pos as u8),
        }
    }
}

impl From<u8> for CollectionItem {
    fn from(value: u8) -> CollectionItem {
        COLLECTION_TYPES
            .get(usize::from(value))
            .map_or(CollectionItem::Other(value), |(ct, _)| *ct)
    }
}

impl std::fmt::Display for CollectionItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CollectionItem::Other(value @ 0x80..=0xff) => write!(f, "Vendor Defined {value:#04x}"),
            CollectionItem::Other(value) => write!(f, "Reserved {value:#04x}"),
            known => {
                let name = COLLECTION_TYPES
                    .iter()
                    .find(|(ct, _)| ct == known)
                    .map_or("", |(_, name)| name);
                write!(f, "{name}")
            }
        }
    }
}

/// Global items, Section 6.2.2.7. These update the parser's item
/// state table and apply to every following main item.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GlobalItem {
    UsagePage(UsagePage),
    LogicalMinimum(LogicalMinimum),
    LogicalMaximum(LogicalMaximum),
    PhysicalMinimum(PhysicalMinimum),
    PhysicalMaximum(PhysicalMaximum),
    UnitExponent(UnitExponent),
    Unit(Unit),
    ReportSize(ReportSize),
    ReportId(ReportId),
    ReportCount(ReportCount),
    Push,
    Pop,
    Reserved,
}

impl GlobalItem {
    pub fn encode(&self) -> Result<Vec<u8>> {
        let (prefix, data) = match *self {
            GlobalItem::UsagePage(v) => (prefix::USAGE_PAGE, unsigned_data(u16::from(v).into())?),
            GlobalItem::LogicalMinimum(v) => {
                (prefix::LOGICAL_MINIMUM, signed_data(i32::from(v).into())?)
            }
            GlobalItem::LogicalMaximum(v) => {
                (prefix::LOGICAL_MAXIMUM, signed_data(i32::from(v).into())?)
            }
            GlobalItem::PhysicalMinimum(v) => {
                (prefix::PHYSICAL_MINIMUM, signed_data(i32::from(v).into())?)
            }
            GlobalItem::PhysicalMaximum(v) => {
                (prefix::PHYSICAL_MAXIMUM, signed_data(i32::from(v).into())?)
            }
            GlobalItem::UnitExponent(v) => {
                (prefix::UNIT_EXPONENT, unsigned_data(u32::from(v).into())?)
            }
            GlobalItem::Unit(v) => (prefix::UNIT, unsigned_data(u32::from(v).into())?),
            GlobalItem::ReportSize(v) => {
                (prefix::REPORT_SIZE, unsigned_data(usize::from(v) as u64)?)
            }
            GlobalItem::ReportId(v) => (prefix::REPORT_ID, vec![u8::from(v)]),
            GlobalItem::ReportCount(v) => {
                (prefix::REPORT_COUNT, unsigned_data(usize::from(v) as u64)?)
            }
            GlobalItem::Push => (prefix::PUSH, vec![]),
            GlobalItem::Pop => (prefix::POP, vec![]),
            GlobalItem::Reserved => return Err(unencodable("Reserved global item")),
        };
        Ok(short_item(prefix, &data))
    }
}

impl std::fmt::Display for GlobalItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GlobalItem::UsagePage(up) => write!(f, "Usage Page ({})", usage_page_name(*up)),
            GlobalItem::LogicalMinimum(v) => write!(f, "Logical Minimum ({v})"),
            GlobalItem::LogicalMaximum(v) => write!(f, "Logical Maximum ({v})"),
            GlobalItem::PhysicalMinimum(v) => write!(f, "Physical Minimum ({v})"),
            GlobalItem::PhysicalMaximum(v) => write!(f, "Physical Maximum ({v})"),
            GlobalItem::UnitExponent(v) => write!(f, "Unit Exponent ({v})"),
            GlobalItem::Unit(v) => write!(f, "Unit ({:#x})", u32::from(v)),
            GlobalItem::ReportSize(v) => write!(f, "Report Size ({v})"),
            GlobalItem::ReportId(v) => write!(f, "Report ID ({v})"),
            GlobalItem::ReportCount(v) => write!(f, "Report Count ({v})"),
            GlobalItem::Push => write!(f, "Push"),
            GlobalItem::Pop => write!(f, "Pop"),
            GlobalItem::Reserved => write!(f, "Reserved"),
        }
    }
}

/// Local items, Section 6.2.2.8. These only apply to the next main item.
///
/// A Usage with 4 data bytes carries its own usage page and is
/// [LocalItem::Usage], a shorter one is [LocalItem::UsageId] and
/// takes the page from the global state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LocalItem {
    Usage(UsagePage, UsageId),
    UsageId(UsageId),
    UsageMinimum(UsageMinimum),
    UsageMaximum(UsageMaximum),
    /// Designator, String and Delimiter items. These are
    /// itemized but not interpreted.
    Other { prefix: u8, value: u32 },
}

impl LocalItem {
    pub fn encode(&self) -> Result<Vec<u8>> {
        let (prefix, data) = match *self {
            LocalItem::Usage(page, id) => {
                let usage = (u32::from(u16::from(page)) << 16) | u32::from(u16::from(id));
                // always 4 bytes, anything shorter loses the page
                (prefix::USAGE, usage.to_le_bytes().to_vec())
            }
            LocalItem::UsageId(id) => (prefix::USAGE, unsigned_data(u16::from(id).into())?),
            LocalItem::UsageMinimum(v) => {
                (prefix::USAGE_MINIMUM, unsigned_data(u32::from(v).into())?)
            }
            LocalItem::UsageMaximum(v) => {
                (prefix::USAGE_MAXIMUM, unsigned_data(u32::from(v).into())?)
            }
            LocalItem::Other { prefix, value } => (prefix, unsigned_data(value.into())?),
        };
        Ok(short_item(prefix, &data))
    }
}

impl std::fmt::Display for LocalItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LocalItem::Usage(up, id) => write!(
                f,
                "Usage ({}: {})",
                usage_page_name(*up),
                usage_name(*up, *id)
            ),
            LocalItem::UsageId(id) => write!(f, "Usage ({:#06x})", u16::from(id)),
            LocalItem::UsageMinimum(v) => write!(f, "Usage Minimum ({v})"),
            LocalItem::UsageMaximum(v) => write!(f, "Usage Maximum ({v})"),
            LocalItem::Other { prefix, value } => write!(f, "Local Item {prefix:#04x} ({value})"),
        }
    }
}

impl TryFrom<&[u8]> for ItemType {
    type Error = HidError;

    /// Parse a single short item. `bytes` must be exactly
    /// the header byte and its data.
    fn try_from(bytes: &[u8]) -> Result<ItemType> {
        let (&header, data) = bytes.split_first().ok_or(HidError::InsufficientData)?;
        let prefix = header & 0b1111_1100;
        let unsigned = || data_value(data);
        let signed = || signed_data_value(data);
        let item = match prefix {
            prefix::INPUT => ItemType::Main(MainItem::Input(DataFlags(unsigned()?))),
            prefix::OUTPUT => ItemType::Main(MainItem::Output(DataFlags(unsigned()?))),
            prefix::FEATURE => ItemType::Main(MainItem::Feature(DataFlags(unsigned()?))),
            prefix::COLLECTION => {
                ItemType::from(CollectionItem::from((unsigned()? & 0xff) as u8))
            }
            prefix::END_COLLECTION => ItemType::Main(MainItem::EndCollection),
            // Whether a range maximum is meant unsigned depends on its
            // minimum, that is up to the caller
            prefix::USAGE_PAGE => ItemType::from(UsagePage((unsigned()? & 0xffff) as u16)),
            prefix::LOGICAL_MINIMUM => ItemType::from(LogicalMinimum(signed()?)),
            prefix::LOGICAL_MAXIMUM => ItemType::from(LogicalMaximum(signed()?)),
            prefix::PHYSICAL_MINIMUM => ItemType::from(PhysicalMinimum(signed()?)),
            prefix::PHYSICAL_MAXIMUM => ItemType::from(PhysicalMaximum(signed()?)),
            prefix::UNIT_EXPONENT => ItemType::from(UnitExponent(unsigned()?)),
            prefix::UNIT => ItemType::from(Unit(unsigned()?)),
            prefix::REPORT_SIZE | prefix::REPORT_ID | prefix::REPORT_COUNT => {
                ensure!(!data.is_empty(), HidError::InsufficientData);
                let value = unsigned()?;
                match prefix {
                    prefix::REPORT_SIZE => ItemType::from(ReportSize(value as usize)),
                    prefix::REPORT_ID => ItemType::from(ReportId((value & 0xff) as u8)),
                    _ => ItemType::from(ReportCount(value as usize)),
                }
            }
            prefix::PUSH => ItemType::Global(GlobalItem::Push),
            prefix::POP => ItemType::Global(GlobalItem::Pop),
            prefix::USAGE if data.len() == 4 => {
                let value = unsigned()?;
                ItemType::Local(LocalItem::Usage(
                    UsagePage((value >> 16) as u16),
                    UsageId((value & 0xffff) as u16),
                ))
            }
            prefix::USAGE => ItemType::from(UsageId((unsigned()? & 0xffff) as u16)),
            prefix::USAGE_MINIMUM => ItemType::from(UsageMinimum(unsigned()?)),
            prefix::USAGE_MAXIMUM => ItemType::from(UsageMaximum(unsigned()?)),
            _ => match prefix & 0b1100 {
                0b0000 => {
                    return Err(HidError::InvalidData {
                        message: format!("Invalid main item tag {prefix:#04x}"),
                    })
                }
                0b0100 => ItemType::Global(GlobalItem::Reserved),
                0b1000 => ItemType::Local(LocalItem::Other {
                    prefix,
                    value: unsigned()?,
                }),
                _ => ItemType::Reserved,
            },
        };
        Ok(item)
    }
}

/// One item of a report descriptor together with where it was found.
#[derive(Debug, Clone)]
pub struct ReportDescriptorItem {
    offset: usize,
    bytes: Vec<u8>,
    item_type: ItemType,
}

impl ReportDescriptorItem {
    /// The byte offset of this item in its report descriptor.
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn item_type(&self) -> ItemType {
        self.item_type
    }

    /// The header byte followed by the data bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// The data bytes read as unsigned value, 0 if there are none.
    pub fn unsigned_data(&self) -> u32 {
        data_value(&self.bytes[1..]).unwrap_or(0)
    }
}

/// A report descriptor split into its items but not interpreted.
/// Long items are rejected.
#[derive(Debug, Clone)]
pub struct ReportDescriptorItems {
    items: Vec<ReportDescriptorItem>,
}

impl std::ops::Deref for ReportDescriptorItems {
    type Target = [ReportDescriptorItem];

    fn deref(&self) -> &Self::Target {
        &self.items
    }
}

impl TryFrom<&[u8]> for ReportDescriptorItems {
    type Error = ParserError;

    fn try_from(bytes: &[u8]) -> crate::descriptor::Result<Self> {
        let invalid = |offset: usize, e: HidError| ParserError::InvalidData {
            offset,
            message: e.to_string(),
        };

        let mut items = Vec::new();
        let mut offset = 0;
        while let Some(&header) = bytes.get(offset) {
            if header == prefix::LONG_ITEM_HEADER {
                return Err(invalid(offset, unencodable("Long item")));
            }
            let size = match header & 0b11 {
                3 => 4,
                n => usize::from(n),
            };
            let item_bytes = bytes
                .get(offset..offset + 1 + size)
                .ok_or(invalid(offset, HidError::InsufficientData))?;
            let item_type = ItemType::try_from(item_bytes).map_err(|e| invalid(offset, e))?;
            items.push(ReportDescriptorItem {
                offset,
                bytes: item_bytes.to_vec(),
                item_type,
            });
            offset += item_bytes.len();
        }
        Ok(ReportDescriptorItems { items })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded_len(item: impl Into<ItemType>) -> usize {
        item.into().encode().unwrap().len() - 1
    }

    fn parse(bytes: &[u8]) -> ItemType {
        ItemType::try_from(bytes).unwrap()
    }

    #[test]
    fn item_conversions() {
        assert_eq!(
            ItemType::from(UsagePage(0x0c)),
            ItemType::Global(GlobalItem::UsagePage(UsagePage(0x0c)))
        );
        assert_eq!(
            ItemType::from(ReportId(2)),
            ItemType::Global(GlobalItem::ReportId(ReportId(2)))
        );
        assert_eq!(
            ItemType::from(UsageMaximum(5)),
            ItemType::Local(LocalItem::UsageMaximum(UsageMaximum(5)))
        );
        assert_eq!(
            ItemType::from(CollectionItem::Physical),
            ItemType::Main(MainItem::Collection(CollectionItem::Physical))
        );
    }

    #[test]
    fn data_sizes() {
        // Logical Minimum with 1, 2 and 4 data bytes
        assert_eq!(parse(&[0x15, 0x80]), ItemType::from(LogicalMinimum(-128)));
        assert_eq!(
            parse(&[0x16, 0xcc, 0xed]),
            ItemType::from(LogicalMinimum(-4660))
        );
        assert_eq!(
            parse(&[0x17, 0x00, 0x00, 0x00, 0x80]),
            ItemType::from(LogicalMinimum(i32::MIN))
        );
        // The same bytes are unsigned elsewhere
        assert_eq!(parse(&[0x75, 0x80]), ItemType::from(ReportSize(0x80)));
        assert_eq!(
            parse(&[0x67, 0x88, 0xa9, 0xcb, 0xed]),
            ItemType::from(Unit(0xedcba988))
        );
        assert_eq!(parse(&[0xc0]), ItemType::Main(MainItem::EndCollection));
        assert!(ItemType::try_from([0x15, 0x01, 0x02, 0x03].as_slice()).is_err());
        assert!(ItemType::try_from([0x74].as_slice()).is_err());
    }

    #[test]
    fn usages() {
        assert_eq!(parse(&[0x09, 0x30]), ItemType::from(UsageId(0x30)));
        assert_eq!(
            parse(&[0x0b, 0xe9, 0x00, 0x0c, 0x00]),
            ItemType::Local(LocalItem::Usage(UsagePage(0x0c), UsageId(0xe9)))
        );
        assert_eq!(
            parse(&[0x1a, 0x34, 0x12]),
            ItemType::from(UsageMinimum(0x1234))
        );
        // Designator Index
        assert_eq!(
            parse(&[0x39, 0x05]),
            ItemType::Local(LocalItem::Other {
                prefix: 0x38,
                value: 5
            })
        );
    }

    #[test]
    fn data_flags() {
        let item = parse(&[0x92, 0b1010_1010, 0b1]);
        let ItemType::Main(MainItem::Output(flags)) = item else {
            panic!("Wrong item type {item:?}");
        };
        assert!(!flags.is_constant());
        assert!(flags.is_variable());
        assert!(!flags.is_relative());
        assert_eq!(
            flags.to_string(),
            "Data,Var,Abs,Wrap,NoPref,Vol,Buff"
        );
        assert_eq!(DataFlags::PADDING.to_string(), "Cnst,Var,Abs");
    }

    #[test]
    fn unsigned_width() {
        for (count, width) in [
            (0usize, 1),
            (255, 1),
            (256, 2),
            (65535, 2),
            (65536, 4),
            (0xFFFF_FFFF, 4),
        ] {
            assert_eq!(encoded_len(ReportCount(count)), width, "count {count}");
        }

        let err = ItemType::from(ReportCount(0x1_0000_0000))
            .encode()
            .unwrap_err();
        assert_eq!(
            err,
            HidError::OutOfRange {
                value: 0x1_0000_0000
            }
        );
        assert!(unsigned_data(u64::MAX).is_err());
    }

    #[test]
    fn signed_width() {
        for (min, width) in [(-128, 1), (-129, 2), (127, 1), (128, 2)] {
            assert_eq!(encoded_len(LogicalMinimum(min)), width, "minimum {min}");
        }
        assert_eq!(encoded_len(LogicalMinimum(-32769)), 4);
        assert_eq!(encoded_len(PhysicalMaximum(i32::MAX)), 4);

        assert!(signed_data(i32::MAX as i64 + 1).is_err());
        assert!(signed_data(i32::MIN as i64 - 1).is_err());
    }

    #[test]
    fn encode_bytes() {
        assert_eq!(
            ItemType::from(LogicalMinimum(-1)).encode().unwrap(),
            [0x15, 0xff]
        );
        assert_eq!(
            ItemType::from(LogicalMaximum(255)).encode().unwrap(),
            [0x26, 0xff, 0x00]
        );
        assert_eq!(
            ItemType::from(UsageMaximum(0x1234)).encode().unwrap(),
            [0x2a, 0x34, 0x12]
        );
        assert_eq!(
            ItemType::from(Unit(0x0001_0001)).encode().unwrap(),
            [0x67, 0x01, 0x00, 0x01, 0x00]
        );
        assert_eq!(
            ItemType::from(UnitExponent(0x0e)).encode().unwrap(),
            [0x55, 0x0e]
        );
        assert_eq!(
            ItemType::from(LocalItem::Usage(UsagePage(0x0c), UsageId(0xe9)))
                .encode()
                .unwrap(),
            [0x0b, 0xe9, 0x00, 0x0c, 0x00]
        );
        assert_eq!(
            ItemType::from(MainItem::Input(DataFlags(0x02)))
                .encode()
                .unwrap(),
            [0x81, 0x02]
        );
        assert_eq!(
            ItemType::from(MainItem::Feature(DataFlags(0x102)))
                .encode()
                .unwrap(),
            [0xb2, 0x02, 0x01]
        );
        assert_eq!(
            ItemType::from(MainItem::EndCollection).encode().unwrap(),
            [0xc0]
        );
        assert_eq!(ItemType::from(GlobalItem::Push).encode().unwrap(), [0xa4]);
        assert!(ItemType::Reserved.encode().is_err());
    }

    #[test]
    fn collection_type_passthrough() {
        for value in [0x00u8, 0x01, 0x02, 0x06, 0x07, 0x42, 0x80, 0xff] {
            let item = ItemType::from(CollectionItem::from(value));
            let bytes = item.encode().unwrap();
            assert_eq!(bytes, [0xa1, value]);
            assert_eq!(parse(&bytes), item);
        }
        assert_eq!(CollectionItem::from(0x06), CollectionItem::UsageModifier);
        assert_eq!(CollectionItem::from(0x07), CollectionItem::Other(0x07));
        assert_eq!(CollectionItem::NamedArray.to_string(), "Named Array");
        assert_eq!(CollectionItem::Other(0x90).to_string(), "Vendor Defined 0x90");
    }

    #[test]
    fn itemize_items() {
        #[rustfmt::skip]
        let bytes = [
            0x05, 0x01,        // Usage Page (Generic Desktop)
            0x09, 0x02,        // Usage (Mouse)
            0xa1, 0x01,        // Collection (Application)
            0x16, 0x01, 0x80,  //   Logical Minimum (-32767)
            0x26, 0xff, 0x7f,  //   Logical Maximum (32767)
            0x75, 0x10,        //   Report Size (16)
            0x95, 0x02,        //   Report Count (2)
            0x81, 0x06,        //   Input (Data,Var,Rel)
            0xc0,              // End Collection
        ];
        let items = ReportDescriptorItems::try_from(bytes.as_slice()).unwrap();
        let offsets: Vec<usize> = items.iter().map(|i| i.offset()).collect();
        assert_eq!(offsets, [0, 2, 4, 6, 9, 12, 14, 16, 18]);
        assert_eq!(items[4].unsigned_data(), 0x7fff);
        assert_eq!(items[8].unsigned_data(), 0);

        let types: Vec<ItemType> = items.iter().map(|i| i.item_type()).collect();
        assert_eq!(types[0], ItemType::from(UsagePage(1)));
        assert_eq!(types[3], ItemType::from(LogicalMinimum(-32767)));
        assert_eq!(types[7], ItemType::from(MainItem::Input(DataFlags(0x06))));
        assert_eq!(types[8], ItemType::from(MainItem::EndCollection));

        // re-encoding each item gives back the original bytes
        let encoded: Vec<u8> = types.iter().flat_map(|t| t.encode().unwrap()).collect();
        assert_eq!(encoded, bytes);
    }

    #[test]
    fn itemize_errors() {
        let err = ReportDescriptorItems::try_from([0x05, 0x01, 0x26, 0xff].as_slice()).unwrap_err();
        assert!(matches!(err, ParserError::InvalidData { offset: 2, .. }));

        let err = ReportDescriptorItems::try_from([0xfe, 0x02, 0xf0, 0x00, 0x00].as_slice())
            .unwrap_err();
        assert!(matches!(err, ParserError::InvalidData { offset: 0, .. }));

        // Main item tag 0xd0 does not exist
        let err = ReportDescriptorItems::try_from([0x05, 0x01, 0xd1, 0x00].as_slice()).unwrap_err();
        assert!(matches!(err, ParserError::InvalidData { offset: 2, .. }));

        let items = ReportDescriptorItems::try_from([].as_slice()).unwrap();
        assert!(items.is_empty());
    }

    #[test]
    fn display() {
        assert_eq!(
            format!("{}", ItemType::from(MainItem::Input(DataFlags(0x02)))),
            "Input (Data,Var,Abs)"
        );
        assert_eq!(
            format!("{}", ItemType::from(MainItem::Output(DataFlags(0x03)))),
            "Output (Cnst,Var,Abs)"
        );
        assert_eq!(
            format!("{}", ItemType::from(CollectionItem::Application)),
            "Collection (Application)"
        );
        assert_eq!(format!("{}", ItemType::from(ReportCount(3))), "Report Count (3)");
        assert_eq!(format!("{}", ItemType::from(Unit(0x11))), "Unit (0x11)");
        assert_eq!(
            format!("{}", ItemType::from(MainItem::EndCollection)),
            "End Collection"
        );
    }
}
