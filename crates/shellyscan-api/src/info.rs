// Identification payload returned by `GET /shelly`.
//
// Every generation answers this unauthenticated endpoint. The shape
// differs per generation, so only the discriminators are lifted into
// typed fields; the raw document stays available for drivers.

use serde_json::Value;

use crate::error::Error;

/// Parsed `GET /shelly` response.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceInfo {
    /// Hardware MAC as reported (not yet normalized).
    pub mac: String,
    /// `gen` field; absent on legacy firmware, which reads as `0`.
    pub generation: u64,
    /// Legacy model discriminator (`type`, e.g. `SHSW-25`).
    pub model_type: Option<String>,
    /// Current-generation model discriminator (`app`, e.g. `Plus1PM`).
    pub app: Option<String>,
    /// Hardware model code (`model`).
    pub model: Option<String>,
    /// Device name, when the firmware exposes it here.
    pub name: Option<String>,
    /// Firmware identifier (`fw` on gen1, `fw_id` on gen2+).
    pub firmware: Option<String>,
    /// Whether the device demands credentials.
    pub auth_required: bool,
    pub raw: Value,
}

impl DeviceInfo {
    /// Validate and lift a raw identification document.
    ///
    /// A response is a device of interest only if it is a JSON object
    /// carrying a non-empty `mac` field.
    pub fn from_value(address: &str, raw: Value) -> Result<Self, Error> {
        let Some(obj) = raw.as_object() else {
            return Err(Error::NotADevice {
                address: address.to_owned(),
                reason: "identification payload is not an object".into(),
            });
        };

        let mac = obj
            .get("mac")
            .and_then(Value::as_str)
            .filter(|m| !m.is_empty())
            .ok_or_else(|| Error::NotADevice {
                address: address.to_owned(),
                reason: "no hardware identity".into(),
            })?
            .to_owned();

        let text = |key: &str| obj.get(key).and_then(Value::as_str).map(str::to_owned);
        let flag = |key: &str| obj.get(key).and_then(Value::as_bool).unwrap_or(false);

        Ok(Self {
            mac,
            generation: obj.get("gen").and_then(Value::as_u64).unwrap_or(0),
            model_type: text("type"),
            app: text("app"),
            model: text("model"),
            name: text("name"),
            firmware: text("fw_id").or_else(|| text("fw")),
            auth_required: if obj.contains_key("auth_en") {
                flag("auth_en")
            } else {
                flag("auth")
            },
            raw,
        })
    }
}
