// ── Ghost records ──
//
// Serializable snapshot of a device's identity and last-known state.
// Field names are the persisted short keys of the store document.

use std::net::IpAddr;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use super::device::Generation;
use super::mac::MacAddress;

/// A device as last seen, plus the user's free-text note.
///
/// Never carries live connection state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GhostRecord {
    #[serde(rename = "tid", default)]
    pub type_id: String,
    #[serde(rename = "tn", default)]
    pub type_name: String,
    #[serde(rename = "host")]
    pub hostname: String,
    pub mac: MacAddress,
    #[serde(rename = "ip")]
    pub address: IpAddr,
    pub port: u16,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub ssid: String,
    /// Last successful contact, epoch milliseconds (0 = never).
    #[serde(rename = "last", default)]
    pub last_contact: i64,
    #[serde(rename = "bat", default)]
    pub battery: bool,
    #[serde(rename = "gen", default)]
    pub generation: Generation,
    #[serde(default)]
    pub note: String,
}

impl GhostRecord {
    pub fn last_contact_time(&self) -> Option<DateTime<Utc>> {
        if self.last_contact <= 0 {
            return None;
        }
        Utc.timestamp_millis_opt(self.last_contact).single()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    #[test]
    fn reads_short_keys() {
        let record: GhostRecord = serde_json::from_value(json!({
            "tid": "SHSW-25", "tn": "Shelly 2.5", "host": "shellyswitch25-A4CF12F45A11",
            "mac": "A4CF12F45A11", "ip": "192.168.1.40", "port": 80, "name": "Garage",
            "ssid": "home", "last": 1_700_000_000_000_i64, "bat": false, "gen": 1, "note": "left door"
        }))
        .unwrap();

        assert_eq!(record.generation, Generation::Gen1);
        assert_eq!(record.note, "left door");
        assert_eq!(record.address, "192.168.1.40".parse::<IpAddr>().unwrap());
        assert!(record.last_contact_time().is_some());
    }

    #[test]
    fn optional_keys_default() {
        let record: GhostRecord = serde_json::from_value(json!({
            "host": "shellyplus1-441793D69718", "mac": "441793D69718", "ip": "10.0.0.9", "port": 80
        }))
        .unwrap();

        assert_eq!(record.generation, Generation::Unmanaged);
        assert_eq!(record.note, "");
        assert!(record.last_contact_time().is_none());
    }
}
