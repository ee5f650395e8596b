// ── Model catalog ──
//
// Registration tables mapping identification discriminators (`type` for
// gen1, `app` for gen2) to model metadata. Anything not listed falls back
// to the unmanaged entry of its generation.

use std::sync::Arc;

use shellyscan_api::{AuthScheme, DeviceInfo};

use super::{DeviceDriver, DriverCore, LegacyDriver, ProbeDriver, RpcDriver};
use crate::model::{Generation, ModelInfo};

/// One known model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatalogEntry {
    pub id: &'static str,
    pub name: &'static str,
    pub battery: bool,
}

const fn model(id: &'static str, name: &'static str) -> CatalogEntry {
    CatalogEntry {
        id,
        name,
        battery: false,
    }
}

const fn battery(id: &'static str, name: &'static str) -> CatalogEntry {
    CatalogEntry {
        id,
        name,
        battery: true,
    }
}

/// Gen1 models, keyed by the `type` field of `/shelly`.
pub const LEGACY_MODELS: &[CatalogEntry] = &[
    model("SHSW-1", "Shelly 1"),
    model("SHSW-L", "Shelly 1L"),
    model("SHSW-PM", "Shelly 1PM"),
    model("SHSW-21", "Shelly 2"),
    model("SHSW-25", "Shelly 2.5"),
    model("SHDM-1", "Shelly Dimmer"),
    model("SHDM-2", "Shelly Dimmer 2"),
    model("SHCB-1", "Shelly Duo RGBW"),
    model("SHBDUO-1", "Shelly Duo"),
    model("SHBLB-1", "Shelly Bulb"),
    model("SHRGBW2", "Shelly RGBW2"),
    model("SHEM", "Shelly EM"),
    model("SHEM-3", "Shelly 3EM"),
    model("SHIX3-1", "Shelly i3"),
    battery("SHBTN-2", "Shelly Button 1"),
    model("SHPLG-S", "Shelly Plug S"),
    model("SHPLG-1", "Shelly Plug"),
    model("SHPLG2-1", "Shelly Plug E"),
    model("SHPLG-U1", "Shelly Plug US"),
    model("SHUNI-1", "Shelly UNI"),
    battery("SHDW-1", "Shelly Door/Window"),
    battery("SHDW-2", "Shelly Door/Window 2"),
    battery("SHWT-1", "Shelly Flood"),
    battery("SHHT-1", "Shelly H&T"),
    battery("SHMOS-01", "Shelly Motion"),
    battery("SHMOS-02", "Shelly Motion 2"),
    battery("SHTRV-01", "Shelly TRV"),
];

/// Gen2 models, keyed by the `app` field of `/shelly`.
pub const RPC_MODELS: &[CatalogEntry] = &[
    model("Plus1", "Shelly Plus 1"),
    model("Plus1PM", "Shelly Plus 1PM"),
    model("Plus2PM", "Shelly Plus 2PM"),
    model("PlusI4", "Shelly Plus i4"),
    model("Mini1", "Shelly Plus 1 Mini"),
    model("Mini1PM", "Shelly Plus 1PM Mini"),
    model("MiniPM", "Shelly Plus PM Mini"),
    model("PlusPlugS", "Shelly Plus Plug S"),
    model("PlusPlugUK", "Shelly Plus Plug UK"),
    model("PlusPlugIT", "Shelly Plus Plug IT"),
    model("PlusPlugUS", "Shelly Plus Plug US"),
    model("PlusWallDimmer", "Shelly Plus Wall Dimmer"),
    battery("PlusHT", "Shelly Plus H&T"),
    battery("PlusSmoke", "Shelly Plus Smoke"),
    model("Pro1PM", "Shelly Pro 1PM"),
    model("Pro1", "Shelly Pro 1"),
    model("Pro2PM", "Shelly Pro 2PM"),
    model("Pro2", "Shelly Pro 2"),
    model("Pro3", "Shelly Pro 3"),
    model("Pro4PM", "Shelly Pro 4PM"),
];

/// Protocol family, which decides the driver and the auth scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    Legacy,
    Rpc,
    /// Unknown generation: identification endpoint only.
    Probe,
}

impl Family {
    pub fn auth_scheme(self) -> AuthScheme {
        match self {
            Self::Legacy | Self::Probe => AuthScheme::Basic,
            Self::Rpc => AuthScheme::Digest,
        }
    }

    /// Instantiate the driver for this family.
    pub fn driver(self, core: DriverCore, battery: bool) -> Arc<dyn DeviceDriver> {
        match self {
            Self::Legacy => Arc::new(LegacyDriver::new(core)),
            Self::Rpc => Arc::new(RpcDriver::new(core, battery)),
            Self::Probe => Arc::new(ProbeDriver::new(core)),
        }
    }
}

/// Outcome of looking an identification payload up in the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub generation: Generation,
    pub family: Family,
    pub model: ModelInfo,
    /// `false` for fallback entries.
    pub managed: bool,
}

impl Classification {
    fn fallback(generation: Generation, family: Family, id: Option<&str>, name: &str) -> Self {
        Self {
            generation,
            family,
            model: ModelInfo::new(id.unwrap_or_default(), name, false),
            managed: false,
        }
    }

    fn known(generation: Generation, family: Family, entry: &CatalogEntry) -> Self {
        Self {
            generation,
            family,
            model: ModelInfo::new(entry.id, entry.name, entry.battery),
            managed: true,
        }
    }
}

fn lookup<'a>(table: &'a [CatalogEntry], id: Option<&str>) -> Option<&'a CatalogEntry> {
    let id = id?;
    table.iter().find(|e| e.id == id)
}

/// Classify an identification payload.
///
/// Gen3 devices always resolve to the generation-wide unmanaged entry;
/// an unknown generation resolves to the generic probe-only entry.
pub fn classify(info: &DeviceInfo) -> Classification {
    match info.generation {
        0 => {
            let id = info.model_type.as_deref();
            lookup(LEGACY_MODELS, id).map_or_else(
                || Classification::fallback(Generation::Gen1, Family::Legacy, id, "Generic G1"),
                |entry| Classification::known(Generation::Gen1, Family::Legacy, entry),
            )
        }
        2 => {
            let id = info.app.as_deref();
            lookup(RPC_MODELS, id).map_or_else(
                || Classification::fallback(Generation::Gen2, Family::Rpc, id, "Generic G2"),
                |entry| Classification::known(Generation::Gen2, Family::Rpc, entry),
            )
        }
        3 => Classification::fallback(
            Generation::Gen3,
            Family::Rpc,
            info.app.as_deref(),
            "Generic G3",
        ),
        _ => Classification::fallback(
            Generation::Unmanaged,
            Family::Probe,
            info.model.as_deref(),
            "Generic",
        ),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    fn info(raw: serde_json::Value) -> DeviceInfo {
        DeviceInfo::from_value("test", raw).unwrap()
    }

    #[test]
    fn tables_have_unique_ids() {
        for table in [LEGACY_MODELS, RPC_MODELS] {
            let mut ids: Vec<_> = table.iter().map(|e| e.id).collect();
            ids.sort_unstable();
            ids.dedup();
            assert_eq!(ids.len(), table.len());
        }
        assert!(LEGACY_MODELS.len() >= 25);
        assert!(RPC_MODELS.len() >= 20);
    }

    #[test]
    fn known_legacy_type() {
        let c = classify(&info(json!({"type": "SHHT-1", "mac": "A4CF12F45A11"})));
        assert!(c.managed);
        assert_eq!(c.generation, Generation::Gen1);
        assert_eq!(c.family, Family::Legacy);
        assert!(c.model.battery);
    }

    #[test]
    fn unknown_legacy_type_falls_back() {
        let c = classify(&info(json!({"type": "SHXX-9", "mac": "A4CF12F45A11"})));
        assert!(!c.managed);
        assert_eq!(c.generation, Generation::Gen1);
        assert_eq!(c.model.type_id, "SHXX-9");
    }

    #[test]
    fn known_rpc_app() {
        let c = classify(&info(json!({"gen": 2, "app": "Pro4PM", "mac": "441793D69718"})));
        assert!(c.managed);
        assert_eq!(c.family.auth_scheme(), AuthScheme::Digest);
    }

    #[test]
    fn gen3_is_always_unmanaged() {
        let c = classify(&info(json!({"gen": 3, "app": "Mini1G3", "mac": "441793D69718"})));
        assert!(!c.managed);
        assert_eq!(c.generation, Generation::Gen3);
        assert_eq!(c.family, Family::Rpc);
    }

    #[test]
    fn unknown_generation_is_generic() {
        let c = classify(&info(json!({"gen": 7, "mac": "441793D69718"})));
        assert_eq!(c.generation, Generation::Unmanaged);
        assert_eq!(c.family, Family::Probe);
    }
}
