//! Link-layer (hardware) address type.
//!
//! Kernels report hardware addresses of varying length: six octets for
//! Ethernet, more for InfiniBand or IP-over-GRE tunnels. The address is
//! kept as raw octets and formatted the way `ip link` prints it.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error returned when a textual hardware address cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid hardware address: {0}")]
pub struct ParseHardwareAddressError(pub String);

/// A hardware address of arbitrary length.
///
/// # Examples
///
/// ```
/// use netcf_common::HardwareAddress;
///
/// let mac: HardwareAddress = "AA:BB:CC:DD:EE:FF".parse().unwrap();
/// assert_eq!(mac.to_string(), "aa:bb:cc:dd:ee:ff");
/// assert!(!mac.is_zero());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HardwareAddress(Vec<u8>);

impl HardwareAddress {
    pub fn new(octets: impl Into<Vec<u8>>) -> Self {
        HardwareAddress(octets.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True when the address has no octets or every octet is zero.
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }
}

impl fmt::Display for HardwareAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, b) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(":")?;
            }
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

impl FromStr for HardwareAddress {
    type Err = ParseHardwareAddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Support both colon and hyphen separators
        let separator = if s.contains(':') { ':' } else { '-' };

        let octets = s
            .split(separator)
            .map(|part| {
                if part.is_empty() || part.len() > 2 {
                    return Err(ParseHardwareAddressError(s.to_string()));
                }
                u8::from_str_radix(part, 16).map_err(|_| ParseHardwareAddressError(s.to_string()))
            })
            .collect::<Result<Vec<u8>, _>>()?;

        Ok(HardwareAddress(octets))
    }
}

impl From<[u8; 6]> for HardwareAddress {
    fn from(bytes: [u8; 6]) -> Self {
        HardwareAddress(bytes.to_vec())
    }
}
