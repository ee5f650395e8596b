//! Device rows and serializable summaries.

use std::sync::Arc;

use owo_colors::OwoColorize;
use serde::Serialize;
use tabled::Tabled;

use shellyscan_core::{Device, DeviceStatus, Engine};

use crate::cli::GlobalOpts;
use crate::error::CliError;
use crate::output;

// ── Table row ───────────────────────────────────────────────────────

#[derive(Tabled)]
struct DeviceRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Type")]
    type_name: String,
    #[tabled(rename = "Gen")]
    generation: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Address")]
    address: String,
    #[tabled(rename = "MAC")]
    mac: String,
    #[tabled(rename = "Note")]
    note: String,
}

/// Registry entry as printed by `-o json`.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceSummary {
    pub index: usize,
    pub mac: String,
    pub name: String,
    pub hostname: String,
    pub address: String,
    pub port: u16,
    pub type_id: String,
    pub type_name: String,
    pub generation: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub note: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_contact: Option<String>,
    #[serde(skip)]
    status_kind: Option<DeviceStatus>,
}

impl DeviceSummary {
    pub fn new(engine: &Engine, index: usize, device: &Arc<Device>) -> Self {
        let state = device.state();
        let note = if device.mac().is_valid() {
            engine.ghost(index).map(|g| g.note).unwrap_or_default()
        } else {
            String::new()
        };
        Self {
            index,
            mac: device.mac().to_string(),
            name: device.display_name(),
            hostname: device.hostname().to_owned(),
            address: device.address().to_string(),
            port: device.port(),
            type_id: device.model().type_id.clone(),
            type_name: device.model().type_name.clone(),
            generation: device.generation().to_string(),
            status: state.status.to_string(),
            error: device.error().map(str::to_owned),
            note,
            last_contact: state.last_contact.map(|t| t.to_rfc3339()),
            status_kind: Some(state.status),
        }
    }

    fn row(&self, color: bool) -> DeviceRow {
        let status = match (color, self.status_kind) {
            (true, Some(DeviceStatus::OnLine)) => self.status.green().to_string(),
            (true, Some(DeviceStatus::OffLine | DeviceStatus::Ghost)) => {
                self.status.dimmed().to_string()
            }
            (true, Some(DeviceStatus::Error)) => self.status.red().to_string(),
            (true, Some(DeviceStatus::NotLogged)) => self.status.yellow().to_string(),
            _ => self.status.clone(),
        };
        let address = if self.port == shellyscan_core::DEFAULT_PORT {
            self.address.clone()
        } else {
            format!("{}:{}", self.address, self.port)
        };
        DeviceRow {
            index: self.index,
            name: self.name.clone(),
            type_name: self.type_name.clone(),
            generation: self.generation.clone(),
            status,
            address,
            mac: self.mac.clone(),
            note: self.note.clone(),
        }
    }
}

/// Summaries of every registry entry, in index order.
pub fn summaries(engine: &Engine) -> Vec<DeviceSummary> {
    engine
        .devices()
        .iter()
        .enumerate()
        .map(|(index, device)| DeviceSummary::new(engine, index, device))
        .collect()
}

/// Print the registry in the selected output format.
pub fn print_devices(engine: &Engine, global: &GlobalOpts) -> Result<(), CliError> {
    let color = output::should_color(&global.color);
    let data = summaries(engine);
    let out = output::render_list(
        &global.output,
        &data,
        |s| s.row(color),
        |s| s.mac.clone(),
    )?;
    output::print_output(&out, global.quiet);
    Ok(())
}
