// ── Device drivers ──
//
// A driver is the per-model capability behind a `Device`: it knows which
// endpoints hold status and settings, how commands are encoded, and which
// sections make up a configuration backup. The engine treats drivers
// opaquely through `DeviceDriver`.

mod catalog;
mod legacy;
mod probe;
mod rpc;

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use shellyscan_api::Endpoint;
use tracing::debug;

use crate::error::CoreError;

pub use catalog::{CatalogEntry, Classification, Family, LEGACY_MODELS, RPC_MODELS, classify};
pub use legacy::LegacyDriver;
pub use probe::ProbeDriver;
pub use rpc::RpcDriver;

/// An opaque device command: a method name plus parameters.
///
/// Legacy devices map `method` to a path (`relay/0`) and `params` to the
/// query string; RPC devices send both as a JSON-RPC frame.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceCommand {
    pub method: String,
    pub params: Value,
}

impl DeviceCommand {
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            method: method.into(),
            params,
        }
    }
}

/// Result of a configuration backup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupOutcome {
    /// Every section was read live from the device.
    Complete,
    /// The device was unreachable; cached sections were written instead.
    Partial,
}

/// Fields lifted from a settings document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettingsSummary {
    pub name: Option<String>,
    pub ssid: Option<String>,
    pub extender: bool,
}

/// Last successful response per endpoint path.
#[derive(Debug, Default)]
pub struct SectionCache {
    sections: Mutex<HashMap<String, Value>>,
}

impl SectionCache {
    pub fn get(&self, path: &str) -> Option<Value> {
        self.sections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .cloned()
    }

    pub fn store(&self, path: &str, value: &Value) {
        self.sections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.to_owned(), value.clone());
    }
}

/// State every driver carries: the bound endpoint, the section cache, and
/// the pause between consecutive requests.
pub struct DriverCore {
    pub endpoint: Endpoint,
    pub sections: SectionCache,
    pub query_delay: Duration,
}

impl DriverCore {
    pub fn new(endpoint: Endpoint, query_delay: Duration) -> Self {
        Self {
            endpoint,
            sections: SectionCache::default(),
            query_delay,
        }
    }

    /// GET `path` and remember the answer.
    pub async fn fetch(&self, path: &str) -> Result<Value, CoreError> {
        let value = self.endpoint.get_json(path).await?;
        self.sections.store(path, &value);
        Ok(value)
    }
}

// ── DeviceDriver ────────────────────────────────────────────────────

/// Capability contract for one device model family.
#[async_trait]
pub trait DeviceDriver: Send + Sync {
    fn core(&self) -> &DriverCore;

    /// Poll the status document. `Ok(None)` means nothing was fetched.
    async fn refresh_status(&self) -> Result<Option<Value>, CoreError>;

    /// Fetch the settings document. `Ok(None)` means nothing was fetched.
    async fn refresh_settings(&self) -> Result<Option<Value>, CoreError>;

    async fn send_command(&self, command: &DeviceCommand) -> Result<Value, CoreError>;

    async fn reboot(&self) -> Result<(), CoreError>;

    /// Endpoints worth showing in a diagnostic dump.
    fn info_requests(&self) -> &'static [&'static str];

    /// Endpoints whose contents make up a configuration backup.
    fn backup_sections(&self) -> &'static [&'static str];

    /// Lift name/SSID/extender mode out of a settings document.
    fn summarize(&self, _settings: &Value) -> SettingsSummary {
        SettingsSummary::default()
    }

    /// Secondary ports exposed while in range-extender mode.
    async fn extender_ports(&self) -> Result<Vec<u16>, CoreError> {
        Ok(Vec::new())
    }

    /// Fetch every diagnostic endpoint; failures are kept per entry.
    async fn info(&self) -> Vec<(&'static str, Result<Value, CoreError>)> {
        let core = self.core();
        let mut out = Vec::new();
        for (i, path) in self.info_requests().iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(core.query_delay).await;
            }
            out.push((*path, core.fetch(path).await));
        }
        out
    }

    /// Write the backup sections to `target` as one JSON document.
    ///
    /// When the device is unreachable but every section has been seen
    /// before, the cached copies are written and the outcome is
    /// [`BackupOutcome::Partial`].
    async fn backup(&self, target: &Path) -> Result<BackupOutcome, CoreError> {
        let core = self.core();
        let sections = self.backup_sections();

        let mut bundle = Map::new();
        let mut outcome = BackupOutcome::Complete;
        for (i, path) in sections.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(core.query_delay).await;
            }
            match core.fetch(path).await {
                Ok(value) => {
                    bundle.insert(section_name(path), value);
                }
                Err(e) if e.is_transient() => {
                    let cached: Option<Map<String, Value>> = sections
                        .iter()
                        .map(|p| core.sections.get(p).map(|v| (section_name(p), v)))
                        .collect();
                    let Some(cached) = cached else {
                        return Err(e);
                    };
                    debug!(address = %core.endpoint.authority(), "device offline, writing cached backup");
                    bundle = cached;
                    outcome = BackupOutcome::Partial;
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        let bytes = serde_json::to_vec_pretty(&Value::Object(bundle))
            .map_err(|e| CoreError::Internal(format!("backup encoding: {e}")))?;
        tokio::fs::write(target, bytes)
            .await
            .map_err(|source| CoreError::Store {
                path: target.to_path_buf(),
                source,
            })?;
        Ok(outcome)
    }
}

/// `/rpc/Shelly.GetConfig` → `Shelly.GetConfig`, `/settings/actions` →
/// `settings.actions`.
fn section_name(path: &str) -> String {
    let path = path.split('?').next().unwrap_or(path);
    path.trim_start_matches('/')
        .trim_start_matches("rpc/")
        .replace('/', ".")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr};

    use serde_json::json;
    use shellyscan_api::{DeviceHttp, TransportConfig};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    #[test]
    fn section_names() {
        assert_eq!(section_name("/rpc/Shelly.GetConfig"), "Shelly.GetConfig");
        assert_eq!(section_name("/settings/actions"), "settings.actions");
        assert_eq!(
            section_name("/rpc/Shelly.GetDeviceInfo?ident=true"),
            "Shelly.GetDeviceInfo"
        );
    }

    async fn mount(server: &MockServer, route: &str, body: Value) {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn offline_backup_falls_back_to_cached_sections() {
        let server = MockServer::start().await;
        mount(&server, "/shelly", json!({"type": "SHSW-1", "mac": "98CDAC1F0A01"})).await;
        mount(&server, "/settings", json!({"name": "Garage"})).await;
        mount(&server, "/settings/actions", json!({"actions": {}})).await;

        let http = DeviceHttp::new(&TransportConfig::default()).unwrap();
        let address = server.address();
        let core = DriverCore::new(http.endpoint(address.ip(), address.port()), Duration::ZERO);
        let driver = LegacyDriver::new(core);
        let dir = tempfile::tempdir().unwrap();

        let live = dir.path().join("live.json");
        assert_eq!(driver.backup(&live).await.unwrap(), BackupOutcome::Complete);

        drop(server);
        let cached = dir.path().join("cached.json");
        assert_eq!(driver.backup(&cached).await.unwrap(), BackupOutcome::Partial);

        let written: Value = serde_json::from_slice(&std::fs::read(&cached).unwrap()).unwrap();
        assert_eq!(written["settings"]["name"], "Garage");
        assert_eq!(written["settings.actions"], json!({"actions": {}}));
        assert_eq!(written["shelly"]["mac"], "98CDAC1F0A01");
    }

    #[tokio::test]
    async fn offline_backup_without_cache_fails() {
        let http = DeviceHttp::new(&TransportConfig::default()).unwrap();
        let core = DriverCore::new(http.endpoint(IpAddr::V4(Ipv4Addr::LOCALHOST), 9), Duration::ZERO);
        let driver = LegacyDriver::new(core);
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("backup.json");

        let err = driver.backup(&target).await.unwrap_err();
        assert!(err.is_transient());
        assert!(!target.exists());
    }
}
