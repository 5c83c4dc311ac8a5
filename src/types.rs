// SPDX-License-Identifier: MIT

//! Wrappers around the integer values of HID items and capabilities so
//! a report size cannot be passed where a report count is expected.
//!
//! Each type converts from and into its underlying integer and displays
//! as that integer.

/// Declares a newtype around an integer, with conversions both ways
/// (also from a reference) and a `Display` of the plain value.
macro_rules! newtype {
    ($(#[$meta:meta])* $name:ident($inner:ty)) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(pub $inner);

        impl From<$name> for $inner {
            fn from(v: $name) -> $inner {
                v.0
            }
        }

        impl From<&$name> for $inner {
            fn from(v: &$name) -> $inner {
                v.0
            }
        }

        impl From<$inner> for $name {
            fn from(v: $inner) -> $name {
                $name(v)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

newtype!(UsagePage(u16));
newtype!(LogicalMinimum(i32));
newtype!(LogicalMaximum(i32));
newtype!(PhysicalMinimum(i32));
newtype!(PhysicalMaximum(i32));
newtype!(Unit(u32));
newtype!(
    /// The Unit Exponent as it is stored in the item, i.e. the 4-bit
    /// two's complement nibble and not a sign-extended value.
    UnitExponent(u32)
);
newtype!(ReportSize(usize));
newtype!(
    /// Zero means the device does not use report IDs, the first
    /// byte of every report is then zero.
    ReportId(u8)
);
newtype!(ReportCount(usize));

newtype!(UsageId(u16));
newtype!(UsageMinimum(u32));
newtype!(UsageMaximum(u32));

impl From<UsageId> for UsageMinimum {
    fn from(id: UsageId) -> UsageMinimum {
        UsageMinimum(id.0.into())
    }
}

impl From<UsageId> for UsageMaximum {
    fn from(id: UsageId) -> UsageMaximum {
        UsageMaximum(id.0.into())
    }
}

newtype!(
    /// The index the platform parser assigns to each control of a report.
    /// Data indices are unique per report type and are what a bit probe
    /// addresses.
    DataIndex(u16)
);
