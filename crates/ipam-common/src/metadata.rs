//! Typed record metadata
//!
//! Recognized keys:
//! - `hostname`: DNS label of the bound host
//! - `mac_address`: colon or hyphen separated EUI-48
//! - `description`: free text
//! - `owner`: responsible team or person
//! - `tags`: list of strings
//!
//! Anything else lands in [`Metadata::extra`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::error::{IpamError, IpamResult};

/// Metadata attached to allocations and reservations
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    /// Hostname of the consumer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    /// MAC address of the consumer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac_address: Option<String>,
    /// Free-form description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Owning team or person
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    /// Labels
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Custom attributes
    #[serde(default, flatten)]
    pub extra: HashMap<String, Value>,
}

impl Metadata {
    /// Build from a loosely typed attribute bag
    pub fn from_map(mut map: HashMap<String, Value>) -> IpamResult<Self> {
        let mut take_str = |key: &str| -> IpamResult<Option<String>> {
            match map.remove(key) {
                None | Some(Value::Null) => Ok(None),
                Some(Value::String(s)) => Ok(Some(s)),
                Some(other) => Err(IpamError::Validation(format!(
                    "metadata key {key} must be a string, got {other}"
                ))),
            }
        };

        let hostname = take_str("hostname")?;
        let mac_address = take_str("mac_address")?;
        let description = take_str("description")?;
        let owner = take_str("owner")?;

        let tags = match map.remove("tags") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items
                .into_iter()
                .map(|v| match v {
                    Value::String(s) => Ok(s),
                    other => Err(IpamError::Validation(format!(
                        "metadata tags must be strings, got {other}"
                    ))),
                })
                .collect::<IpamResult<Vec<_>>>()?,
            Some(other) => {
                return Err(IpamError::Validation(format!(
                    "metadata tags must be a list, got {other}"
                )))
            }
        };

        let metadata = Self {
            hostname,
            mac_address,
            description,
            owner,
            tags,
            extra: map,
        };
        metadata.validate()?;
        Ok(metadata)
    }

    /// Set hostname
    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = Some(hostname.into());
        self
    }

    /// Set MAC address
    pub fn with_mac(mut self, mac: impl Into<String>) -> Self {
        self.mac_address = Some(mac.into());
        self
    }

    /// Set a custom attribute
    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    /// Check recognized keys
    pub fn validate(&self) -> IpamResult<()> {
        if let Some(mac) = &self.mac_address {
            if !is_valid_mac(mac) {
                return Err(IpamError::Validation(format!("invalid MAC address: {mac}")));
            }
        }
        if let Some(hostname) = &self.hostname {
            let valid = !hostname.is_empty()
                && hostname.len() <= 253
                && hostname.split('.').all(|label| {
                    !label.is_empty()
                        && label.len() <= 63
                        && !label.starts_with('-')
                        && !label.ends_with('-')
                        && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
                });
            if !valid {
                return Err(IpamError::Validation(format!("invalid hostname: {hostname}")));
            }
        }
        Ok(())
    }
}

fn is_valid_mac(mac: &str) -> bool {
    let parts: Vec<&str> = mac.split([':', '-']).collect();
    parts.len() == 6
        && parts
            .iter()
            .all(|p| p.len() == 2 && p.chars().all(|c| c.is_ascii_hexdigit()))
}
