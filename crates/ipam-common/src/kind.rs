//! Network purpose tags

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::IpamError;

/// Purpose of a network block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkKind {
    /// Customer-facing address space
    Customer,
    /// Provider infrastructure (PoP fabric, appliances)
    Infrastructure,
    /// Out-of-band management
    Management,
    /// Point-to-point links
    PointToPoint,
    /// Transit / peering interconnects
    Transit,
    /// Demilitarized zone
    Dmz,
    /// Router loopbacks
    Loopback,
}

impl NetworkKind {
    /// All kinds
    pub const ALL: [NetworkKind; 7] = [
        NetworkKind::Customer,
        NetworkKind::Infrastructure,
        NetworkKind::Management,
        NetworkKind::PointToPoint,
        NetworkKind::Transit,
        NetworkKind::Dmz,
        NetworkKind::Loopback,
    ];

    /// Longest prefix a planned block of this kind may have.
    ///
    /// Small requirements are rounded up to at least this block size.
    pub fn default_max_prefix(&self) -> u8 {
        match self {
            Self::Customer => 24,
            Self::Infrastructure => 26,
            Self::Management => 27,
            Self::Dmz => 26,
            Self::Transit => 29,
            Self::PointToPoint => 30,
            Self::Loopback => 30,
        }
    }

    /// Tag as used in configuration and reports
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Customer => "customer",
            Self::Infrastructure => "infrastructure",
            Self::Management => "management",
            Self::PointToPoint => "point_to_point",
            Self::Transit => "transit",
            Self::Dmz => "dmz",
            Self::Loopback => "loopback",
        }
    }
}

impl fmt::Display for NetworkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NetworkKind {
    type Err = IpamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let kind = match s.to_ascii_lowercase().as_str() {
            "customer" => Self::Customer,
            "infrastructure" | "infra" => Self::Infrastructure,
            "management" | "mgmt" => Self::Management,
            "point_to_point" | "p2p" => Self::PointToPoint,
            "transit" => Self::Transit,
            "dmz" => Self::Dmz,
            "loopback" => Self::Loopback,
            other => {
                return Err(IpamError::Validation(format!(
                    "unknown network kind: {other}"
                )))
            }
        };
        Ok(kind)
    }
}
