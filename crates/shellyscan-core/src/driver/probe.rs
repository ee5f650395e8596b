// Generic driver for endpoints that answered identification but belong to
// no known protocol family. Only the identification document is polled.

use async_trait::async_trait;
use serde_json::Value;

use super::{DeviceCommand, DeviceDriver, DriverCore};
use crate::error::CoreError;

pub struct ProbeDriver {
    core: DriverCore,
}

impl ProbeDriver {
    pub fn new(core: DriverCore) -> Self {
        Self { core }
    }
}

#[async_trait]
impl DeviceDriver for ProbeDriver {
    fn core(&self) -> &DriverCore {
        &self.core
    }

    async fn refresh_status(&self) -> Result<Option<Value>, CoreError> {
        self.core.fetch("/shelly").await.map(Some)
    }

    async fn refresh_settings(&self) -> Result<Option<Value>, CoreError> {
        Ok(None)
    }

    async fn send_command(&self, command: &DeviceCommand) -> Result<Value, CoreError> {
        Err(CoreError::Unsupported {
            operation: command.method.clone(),
        })
    }

    async fn reboot(&self) -> Result<(), CoreError> {
        Err(CoreError::Unsupported {
            operation: "reboot".into(),
        })
    }

    fn info_requests(&self) -> &'static [&'static str] {
        &["/shelly"]
    }

    fn backup_sections(&self) -> &'static [&'static str] {
        &["/shelly"]
    }
}
