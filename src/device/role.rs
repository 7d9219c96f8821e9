//! Logical camera roles and physical device identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Fixed logical identity bound to a physical camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeviceRole {
    /// Near-infrared capable unit (left).
    LeftInfrared,
    /// Visible-light unit (right).
    RightVisible,
}

impl DeviceRole {
    /// Both roles, in default-assignment order.
    pub const ALL: [DeviceRole; 2] = [DeviceRole::LeftInfrared, DeviceRole::RightVisible];

    /// Dense index used for per-role arrays.
    #[inline]
    pub fn index(self) -> usize {
        match self {
            DeviceRole::LeftInfrared => 0,
            DeviceRole::RightVisible => 1,
        }
    }

    /// The opposite role.
    #[inline]
    pub fn other(self) -> DeviceRole {
        match self {
            DeviceRole::LeftInfrared => DeviceRole::RightVisible,
            DeviceRole::RightVisible => DeviceRole::LeftInfrared,
        }
    }

    /// Key under which the role's product id is persisted.
    pub fn store_key(self) -> &'static str {
        match self {
            DeviceRole::LeftInfrared => "PidL",
            DeviceRole::RightVisible => "PidR",
        }
    }

    /// Returns true for the infrared channel.
    #[inline]
    pub fn is_infrared(self) -> bool {
        matches!(self, DeviceRole::LeftInfrared)
    }
}

impl fmt::Display for DeviceRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceRole::LeftInfrared => f.write_str("left-infrared"),
            DeviceRole::RightVisible => f.write_str("right-visible"),
        }
    }
}

/// USB product code identifying a physical camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(pub u16);

impl ProductId {
    /// Vendor product codes accepted from host configuration payloads.
    pub const SUPPORTED: [u16; 8] = [
        0x2203, 0x2204, 0x2205, 0x2206, 0x2207, 0x2208, 0x2209, 0x2210,
    ];

    /// Returns true if this code is on the supported-device allow-list.
    pub fn is_supported(self) -> bool {
        Self::SUPPORTED.contains(&self.0)
    }

    /// Converts a persisted value back into a product id.
    ///
    /// Negative (unassigned) or out-of-range values yield `None`.
    pub fn from_stored(value: i32) -> Option<Self> {
        u16::try_from(value).ok().map(ProductId)
    }

    /// Value written to the role store.
    pub fn to_stored(self) -> i32 {
        i32::from(self.0)
    }
}

impl fmt::Display for ProductId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_indices_are_dense() {
        assert_eq!(DeviceRole::LeftInfrared.index(), 0);
        assert_eq!(DeviceRole::RightVisible.index(), 1);
        assert_eq!(DeviceRole::LeftInfrared.other(), DeviceRole::RightVisible);
    }

    #[test]
    fn test_allow_list() {
        assert!(ProductId(0x2203).is_supported());
        assert!(ProductId(0x2210).is_supported());
        // gap between 0x2209 and 0x2210 is not allowed
        assert!(!ProductId(0x220a).is_supported());
        assert!(!ProductId(514).is_supported());
    }

    #[test]
    fn test_stored_conversion() {
        assert_eq!(ProductId::from_stored(-1), None);
        assert_eq!(ProductId::from_stored(0x2204), Some(ProductId(0x2204)));
        assert_eq!(ProductId::from_stored(70_000), None);
        assert_eq!(ProductId(0x2204).to_string(), "0x2204");
    }
}
