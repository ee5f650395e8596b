// ── Hardware identity ──
//
// The MAC address is the only key a device is ever matched by: registry
// deduplication, ghost reconciliation, and store lookups all go through
// `MacAddress` equality.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

/// MAC address, normalized to uppercase bare hex (`A4CF12F45A11`).
///
/// Placeholder devices that never answered an identification request
/// carry a locator-derived value instead; those never pass
/// [`is_valid`](Self::is_valid).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MacAddress(String);

impl MacAddress {
    /// Create a normalized MAC address from any common format.
    /// Accepts colon-separated, dash-separated, dotted, or bare hex.
    pub fn new(raw: impl AsRef<str>) -> Self {
        let normalized = raw
            .as_ref()
            .chars()
            .filter(|c| !matches!(c, ':' | '-' | '.'))
            .collect::<String>()
            .to_uppercase();
        Self(normalized)
    }

    /// Identity for an endpoint whose hardware address is unknown.
    pub fn placeholder(address: IpAddr, port: u16) -> Self {
        Self(format!("@{address}:{port}"))
    }

    /// Twelve uppercase hex digits, nothing else.
    pub fn is_valid(&self) -> bool {
        self.0.len() == 12
            && self
                .0
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'A'..=b'F').contains(&b))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MacAddress {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::new(s))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn mac_address_normalizes_separators_and_case() {
        assert_eq!(MacAddress::new("a4:cf:12:f4:5a:11").as_str(), "A4CF12F45A11");
        assert_eq!(MacAddress::new("A4-CF-12-F4-5A-11").as_str(), "A4CF12F45A11");
        assert_eq!(MacAddress::new("a4cf12f45a11").as_str(), "A4CF12F45A11");
    }

    #[test]
    fn mac_address_validity() {
        assert!(MacAddress::new("a4cf12f45a11").is_valid());
        assert!(!MacAddress::new("A4CF12F45A1").is_valid());
        assert!(!MacAddress::new("shelly1-a4cf12").is_valid());
        let placeholder = MacAddress::placeholder("10.0.0.1".parse().unwrap(), 180);
        assert!(!placeholder.is_valid());
    }

    #[test]
    fn placeholders_differ_per_locator() {
        let a = MacAddress::placeholder("10.0.0.1".parse().unwrap(), 180);
        let b = MacAddress::placeholder("10.0.0.11".parse().unwrap(), 80);
        assert_ne!(a, b);
    }

    #[test]
    fn mac_address_from_str() {
        let mac: MacAddress = "44:17:93:d6:97:18".parse().unwrap();
        assert_eq!(mac.to_string(), "441793D69718");
    }
}
