//! Peer device identity
//!
//! A device is identified by its network address; the display name and
//! OS label are informational only and do not participate in equality.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::net::IpAddr;

/// A peer device on the local network.
///
/// Immutable once constructed. Two devices are equal when their
/// addresses are equal, regardless of display name or OS label.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    name: String,
    os: String,
    address: IpAddr,
}

impl Device {
    pub fn new(name: impl Into<String>, os: impl Into<String>, address: IpAddr) -> Self {
        Self {
            name: name.into(),
            os: os.into(),
            address,
        }
    }

    /// Build a device from a bare address, as done for inbound
    /// connections where only the peer address is known.
    pub fn from_address(address: IpAddr) -> Self {
        Self {
            name: address.to_string(),
            os: String::new(),
            address,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn os(&self) -> &str {
        &self.os
    }

    pub fn address(&self) -> IpAddr {
        self.address
    }
}

impl PartialEq for Device {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address
    }
}

impl Eq for Device {}

impl Hash for Device {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.address.hash(state);
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.address)
    }
}
