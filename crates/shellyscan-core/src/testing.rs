// Test doubles shared by the unit tests of this crate.

use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use shellyscan_api::{DeviceHttp, TransportConfig};

use crate::driver::{DeviceCommand, DeviceDriver, DriverCore, SettingsSummary};
use crate::error::CoreError;
use crate::model::{Device, Generation, Locator, MacAddress, ModelInfo};

/// Scripted driver counting the calls it receives.
#[derive(Default)]
pub(crate) struct FakeDriver {
    core: Option<DriverCore>,
    pub offline: AtomicBool,
    /// Behave like a driver without a settings document.
    pub no_settings: AtomicBool,
    pub status_calls: AtomicU32,
    pub settings_calls: AtomicU32,
    pub reboots: AtomicU32,
    in_flight: AtomicU32,
    pub max_in_flight: AtomicU32,
    pub latency: Duration,
}

impl FakeDriver {
    pub fn new(latency: Duration) -> Arc<Self> {
        let http = DeviceHttp::with_client(reqwest::Client::new(), TransportConfig::default());
        Arc::new(Self {
            core: Some(DriverCore::new(
                http.endpoint(IpAddr::from([127, 0, 0, 1]), 9),
                Duration::from_millis(1),
            )),
            latency,
            ..Self::default()
        })
    }

    async fn call(&self, counter: &AtomicU32, payload: Value) -> Result<Option<Value>, CoreError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        counter.fetch_add(1, Ordering::SeqCst);

        let guard = InFlight(&self.in_flight);
        tokio::time::sleep(self.latency).await;
        drop(guard);

        if self.offline.load(Ordering::SeqCst) {
            Err(CoreError::Timeout { timeout_secs: 1 })
        } else {
            Ok(Some(payload))
        }
    }
}

/// Decrements the in-flight counter even when the call is cancelled.
struct InFlight<'a>(&'a AtomicU32);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl DeviceDriver for FakeDriver {
    fn core(&self) -> &DriverCore {
        self.core.as_ref().unwrap()
    }

    async fn refresh_status(&self) -> Result<Option<Value>, CoreError> {
        self.call(&self.status_calls, json!({"uptime": 1})).await
    }

    async fn refresh_settings(&self) -> Result<Option<Value>, CoreError> {
        if self.no_settings.load(Ordering::SeqCst) {
            return Ok(None);
        }
        self.call(&self.settings_calls, json!({"name": "fake"})).await
    }

    async fn send_command(&self, _command: &DeviceCommand) -> Result<Value, CoreError> {
        Ok(Value::Null)
    }

    async fn reboot(&self) -> Result<(), CoreError> {
        self.reboots.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn info_requests(&self) -> &'static [&'static str] {
        &[]
    }

    fn backup_sections(&self) -> &'static [&'static str] {
        &[]
    }

    fn summarize(&self, settings: &Value) -> SettingsSummary {
        SettingsSummary {
            name: settings["name"].as_str().map(str::to_owned),
            ..SettingsSummary::default()
        }
    }
}

pub(crate) fn managed(mac: &str, last: u8, driver: Arc<FakeDriver>) -> Device {
    Device::managed(
        MacAddress::new(mac),
        Locator::new(IpAddr::from([192, 168, 1, last]), 80, format!("shelly-{last}")),
        Generation::Gen2,
        ModelInfo::new("Plus1", "Shelly Plus 1", false),
        driver,
    )
}
