// Gen1 devices: plain REST endpoints with HTTP Basic auth.

use async_trait::async_trait;
use serde_json::Value;

use super::{DeviceCommand, DeviceDriver, DriverCore, SettingsSummary};
use crate::error::CoreError;

pub struct LegacyDriver {
    core: DriverCore,
}

impl LegacyDriver {
    pub fn new(core: DriverCore) -> Self {
        Self { core }
    }
}

/// `relay/0` + `{"turn": "on"}` → `/relay/0?turn=on`. Parameters are
/// emitted in key order.
fn command_path(command: &DeviceCommand) -> String {
    let mut path = format!("/{}", command.method.trim_start_matches('/'));
    if let Some(params) = command.params.as_object().filter(|p| !p.is_empty()) {
        let mut pairs: Vec<_> = params.iter().collect();
        pairs.sort_by(|a, b| a.0.cmp(b.0));
        let mut query = url::form_urlencoded::Serializer::new(String::new());
        for (key, value) in pairs {
            match value {
                Value::String(s) => query.append_pair(key, s),
                other => query.append_pair(key, &other.to_string()),
            };
        }
        path.push('?');
        path.push_str(&query.finish());
    }
    path
}

#[async_trait]
impl DeviceDriver for LegacyDriver {
    fn core(&self) -> &DriverCore {
        &self.core
    }

    async fn refresh_status(&self) -> Result<Option<Value>, CoreError> {
        self.core.fetch("/status").await.map(Some)
    }

    async fn refresh_settings(&self) -> Result<Option<Value>, CoreError> {
        self.core.fetch("/settings").await.map(Some)
    }

    async fn send_command(&self, command: &DeviceCommand) -> Result<Value, CoreError> {
        Ok(self.core.endpoint.get_json(&command_path(command)).await?)
    }

    async fn reboot(&self) -> Result<(), CoreError> {
        self.core.endpoint.get_json("/reboot").await?;
        Ok(())
    }

    fn info_requests(&self) -> &'static [&'static str] {
        &["/shelly", "/settings", "/settings/actions", "/status", "/ota/check"]
    }

    fn backup_sections(&self) -> &'static [&'static str] {
        &["/shelly", "/settings", "/settings/actions"]
    }

    fn summarize(&self, settings: &Value) -> SettingsSummary {
        SettingsSummary {
            name: settings["name"].as_str().map(str::to_owned),
            ssid: settings["wifi_sta"]["ssid"].as_str().map(str::to_owned),
            extender: false,
        }
    }
}
