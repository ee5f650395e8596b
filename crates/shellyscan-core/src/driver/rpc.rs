// Gen2/Gen3 devices: JSON-RPC over HTTP with SHA-256 Digest auth.

use async_trait::async_trait;
use serde_json::{Value, json};

use super::{DeviceCommand, DeviceDriver, DriverCore, SettingsSummary};
use crate::error::CoreError;

pub struct RpcDriver {
    core: DriverCore,
    battery: bool,
}

impl RpcDriver {
    pub fn new(core: DriverCore, battery: bool) -> Self {
        Self { core, battery }
    }
}

/// Unwrap a JSON-RPC reply frame.
fn rpc_result(frame: Value) -> Result<Value, CoreError> {
    if let Some(error) = frame.get("error") {
        let code = error["code"].as_i64().unwrap_or_default();
        let message = error["message"].as_str().unwrap_or("unknown error");
        return Err(CoreError::Rejected {
            message: format!("{code}: {message}"),
        });
    }
    Ok(frame.get("result").cloned().unwrap_or(Value::Null))
}

/// Ports of clients attached to the range-extender access point.
fn extender_ports_from(clients: &Value) -> Vec<u16> {
    let mut ports: Vec<u16> = clients["ap_clients"]
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(|c| c["mport"].as_u64())
        .filter_map(|p| u16::try_from(p).ok())
        .filter(|p| *p != 0)
        .collect();
    ports.sort_unstable();
    ports.dedup();
    ports
}

#[async_trait]
impl DeviceDriver for RpcDriver {
    fn core(&self) -> &DriverCore {
        &self.core
    }

    async fn refresh_status(&self) -> Result<Option<Value>, CoreError> {
        self.core.fetch("/rpc/Shelly.GetStatus").await.map(Some)
    }

    async fn refresh_settings(&self) -> Result<Option<Value>, CoreError> {
        self.core.fetch("/rpc/Shelly.GetConfig").await.map(Some)
    }

    async fn send_command(&self, command: &DeviceCommand) -> Result<Value, CoreError> {
        let frame = json!({
            "id": 1,
            "method": command.method,
            "params": command.params,
        });
        rpc_result(self.core.endpoint.post_json("/rpc", &frame).await?)
    }

    async fn reboot(&self) -> Result<(), CoreError> {
        self.core.endpoint.get_json("/rpc/Shelly.Reboot").await?;
        Ok(())
    }

    fn info_requests(&self) -> &'static [&'static str] {
        if self.battery {
            &[
                "/rpc/Shelly.GetDeviceInfo?ident=true",
                "/rpc/Shelly.GetConfig",
                "/rpc/Shelly.GetStatus",
                "/rpc/Shelly.CheckForUpdate",
                "/rpc/Webhook.List",
                "/rpc/KVS.GetMany",
                "/rpc/Shelly.GetComponents",
            ]
        } else {
            &[
                "/rpc/Shelly.GetDeviceInfo?ident=true",
                "/rpc/Shelly.GetConfig",
                "/rpc/Shelly.GetStatus",
                "/rpc/Shelly.CheckForUpdate",
                "/rpc/Schedule.List",
                "/rpc/Webhook.List",
                "/rpc/Script.List",
                "/rpc/WiFi.ListAPClients",
                "/rpc/KVS.GetMany",
                "/rpc/Shelly.GetComponents",
            ]
        }
    }

    fn backup_sections(&self) -> &'static [&'static str] {
        // Battery devices sleep most of the time: no scripts, no schedules.
        if self.battery {
            &[
                "/rpc/Shelly.GetDeviceInfo",
                "/rpc/Shelly.GetConfig",
                "/rpc/Webhook.List",
                "/rpc/KVS.GetMany",
            ]
        } else {
            &[
                "/rpc/Shelly.GetDeviceInfo",
                "/rpc/Shelly.GetConfig",
                "/rpc/Schedule.List",
                "/rpc/Webhook.List",
                "/rpc/Script.List",
                "/rpc/KVS.GetMany",
            ]
        }
    }

    fn summarize(&self, settings: &Value) -> SettingsSummary {
        SettingsSummary {
            name: settings["sys"]["device"]["name"]
                .as_str()
                .map(str::to_owned),
            ssid: settings["wifi"]["sta"]["ssid"].as_str().map(str::to_owned),
            extender: settings["wifi"]["ap"]["range_extender"]["enable"]
                .as_bool()
                .unwrap_or(false),
        }
    }

    async fn extender_ports(&self) -> Result<Vec<u16>, CoreError> {
        let clients = self.core.fetch("/rpc/WiFi.ListAPClients").await?;
        Ok(extender_ports_from(&clients))
    }
}
