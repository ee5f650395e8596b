// ── Device domain types ──

use std::fmt;
use std::net::IpAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, warn};

use super::ghost::GhostRecord;
use super::mac::MacAddress;
use crate::driver::DeviceDriver;
use crate::error::CoreError;

/// Device protocol family, as persisted (`0` = unmanaged).
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display,
)]
#[serde(from = "u8", into = "u8")]
pub enum Generation {
    #[default]
    Unmanaged,
    #[strum(to_string = "G1")]
    Gen1,
    #[strum(to_string = "G2")]
    Gen2,
    #[strum(to_string = "G3")]
    Gen3,
}

impl From<u8> for Generation {
    fn from(tag: u8) -> Self {
        match tag {
            1 => Self::Gen1,
            2 => Self::Gen2,
            3 => Self::Gen3,
            _ => Self::Unmanaged,
        }
    }
}

impl From<Generation> for u8 {
    fn from(generation: Generation) -> Self {
        match generation {
            Generation::Unmanaged => 0,
            Generation::Gen1 => 1,
            Generation::Gen2 => 2,
            Generation::Gen3 => 3,
        }
    }
}

/// Runtime status shown for each registry entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
pub enum DeviceStatus {
    Reading,
    #[strum(to_string = "online")]
    OnLine,
    #[strum(to_string = "offline")]
    OffLine,
    #[strum(to_string = "error")]
    Error,
    #[strum(to_string = "not logged")]
    NotLogged,
    #[strum(to_string = "ghost")]
    Ghost,
}

/// Where a device is reached. Mutable across scans; never part of identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Locator {
    pub address: IpAddr,
    pub port: u16,
    pub hostname: String,
}

impl Locator {
    pub fn new(address: IpAddr, port: u16, hostname: impl Into<String>) -> Self {
        Self {
            address,
            port,
            hostname: hostname.into(),
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

/// Model classification resolved from the identification payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelInfo {
    pub type_id: String,
    pub type_name: String,
    pub battery: bool,
}

impl ModelInfo {
    pub fn new(type_id: impl Into<String>, type_name: impl Into<String>, battery: bool) -> Self {
        Self {
            type_id: type_id.into(),
            type_name: type_name.into(),
            battery,
        }
    }
}

/// How well the device was classified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceKind {
    /// Known model with a full driver.
    Managed,
    /// Detected but not classified, or classification failed with `error`.
    Unmanaged { error: Option<String> },
    /// Restored from the store; no live connection.
    Ghost,
}

/// Mutable per-device state, owned by the device and read by snapshot.
#[derive(Debug, Clone)]
pub struct DeviceState {
    pub status: DeviceStatus,
    pub last_contact: Option<DateTime<Utc>>,
    pub name: Option<String>,
    pub ssid: Option<String>,
    /// Range-extender mode is enabled in the current settings.
    pub extender: bool,
    pub status_payload: Option<Value>,
    pub settings_payload: Option<Value>,
    /// Last refresh failure, for diagnostic display.
    pub last_error: Option<String>,
}

impl DeviceState {
    fn new(status: DeviceStatus) -> Self {
        Self {
            status,
            last_contact: None,
            name: None,
            ssid: None,
            extender: false,
            status_payload: None,
            settings_payload: None,
            last_error: None,
        }
    }

    fn mark_contact(&mut self) {
        self.status = DeviceStatus::OnLine;
        self.last_contact = Some(Utc::now());
        self.last_error = None;
    }
}

// ── Device ──────────────────────────────────────────────────────────

/// A live registry entity.
///
/// Identity is the MAC address alone: two `Device` values with the same
/// MAC are the same logical device even when locator or classification
/// differ. Everything except [`DeviceState`] is fixed at construction;
/// the registry swaps whole devices rather than mutating them.
pub struct Device {
    mac: MacAddress,
    locator: Locator,
    generation: Generation,
    model: ModelInfo,
    kind: DeviceKind,
    driver: Option<Arc<dyn DeviceDriver>>,
    state: Mutex<DeviceState>,
}

impl Device {
    /// A fully classified device.
    pub fn managed(
        mac: MacAddress,
        locator: Locator,
        generation: Generation,
        model: ModelInfo,
        driver: Arc<dyn DeviceDriver>,
    ) -> Self {
        Self::build(mac, locator, generation, model, DeviceKind::Managed, Some(driver))
    }

    /// A detected but unclassified device, optionally carrying the error
    /// that prevented classification.
    pub fn unmanaged(
        mac: MacAddress,
        locator: Locator,
        generation: Generation,
        model: ModelInfo,
        driver: Option<Arc<dyn DeviceDriver>>,
        error: Option<String>,
    ) -> Self {
        let failed = error.is_some();
        let device = Self::build(
            mac,
            locator,
            generation,
            model,
            DeviceKind::Unmanaged { error },
            driver,
        );
        if failed {
            device.set_status(DeviceStatus::Error);
        }
        device
    }

    /// An endpoint that could not be identified at all.
    pub fn placeholder(
        locator: Locator,
        driver: Option<Arc<dyn DeviceDriver>>,
        error: &CoreError,
    ) -> Self {
        let mac = MacAddress::placeholder(locator.address, locator.port);
        let device = Self::unmanaged(
            mac,
            locator,
            Generation::Unmanaged,
            ModelInfo::new("", "Generic", false),
            driver,
            Some(error.to_string()),
        );
        device.lock_state().last_error = Some(error.to_string());
        device
    }

    /// A device restored from a ghost record.
    pub fn from_ghost(record: &GhostRecord) -> Self {
        let device = Self::build(
            record.mac.clone(),
            Locator::new(record.address, record.port, record.hostname.clone()),
            record.generation,
            ModelInfo::new(
                record.type_id.clone(),
                record.type_name.clone(),
                record.battery,
            ),
            DeviceKind::Ghost,
            None,
        );
        {
            let mut state = device.lock_state();
            state.status = DeviceStatus::Ghost;
            state.last_contact = record.last_contact_time();
            state.name = Some(record.name.clone()).filter(|n| !n.is_empty());
            state.ssid = Some(record.ssid.clone()).filter(|s| !s.is_empty());
        }
        device
    }

    fn build(
        mac: MacAddress,
        locator: Locator,
        generation: Generation,
        model: ModelInfo,
        kind: DeviceKind,
        driver: Option<Arc<dyn DeviceDriver>>,
    ) -> Self {
        Self {
            mac,
            locator,
            generation,
            model,
            kind,
            driver,
            state: Mutex::new(DeviceState::new(DeviceStatus::Reading)),
        }
    }

    // ── Accessors ────────────────────────────────────────────────────

    pub fn mac(&self) -> &MacAddress {
        &self.mac
    }

    pub fn locator(&self) -> &Locator {
        &self.locator
    }

    pub fn address(&self) -> IpAddr {
        self.locator.address
    }

    pub fn port(&self) -> u16 {
        self.locator.port
    }

    pub fn hostname(&self) -> &str {
        &self.locator.hostname
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn model(&self) -> &ModelInfo {
        &self.model
    }

    pub fn kind(&self) -> &DeviceKind {
        &self.kind
    }

    pub fn driver(&self) -> Option<&Arc<dyn DeviceDriver>> {
        self.driver.as_ref()
    }

    pub fn is_managed(&self) -> bool {
        self.kind == DeviceKind::Managed
    }

    pub fn is_ghost(&self) -> bool {
        self.kind == DeviceKind::Ghost
    }

    pub fn is_battery(&self) -> bool {
        self.model.battery
    }

    /// The classification error, for unmanaged devices that carry one.
    pub fn error(&self) -> Option<&str> {
        match &self.kind {
            DeviceKind::Unmanaged { error } => error.as_deref(),
            _ => None,
        }
    }

    /// Failed classification or missing credentials: live data about this
    /// device is less trustworthy than a stored record.
    pub fn is_degraded(&self) -> bool {
        self.error().is_some() || self.status() == DeviceStatus::NotLogged
    }

    fn lock_state(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> DeviceState {
        self.lock_state().clone()
    }

    pub fn status(&self) -> DeviceStatus {
        self.lock_state().status
    }

    pub fn set_status(&self, status: DeviceStatus) {
        self.lock_state().status = status;
    }

    /// User-facing name, falling back to the hostname.
    pub fn display_name(&self) -> String {
        self.lock_state()
            .name
            .clone()
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| self.locator.hostname.clone())
    }

    // ── Refresh ──────────────────────────────────────────────────────

    /// Poll the lightweight status endpoint.
    ///
    /// Returns whether anything was fetched. A driver with nothing to poll
    /// leaves the state untouched: no contact was made.
    pub async fn refresh_status(&self) -> Result<bool, CoreError> {
        let Some(driver) = self.driver.clone() else {
            return Ok(false);
        };
        match driver.refresh_status().await {
            Ok(Some(payload)) => {
                let mut state = self.lock_state();
                state.mark_contact();
                state.status_payload = Some(payload);
                Ok(true)
            }
            Ok(None) => Ok(false),
            Err(e) => Err(self.record_failure(e)),
        }
    }

    /// Re-fetch the full settings document. Returns whether anything was
    /// fetched.
    pub async fn refresh_settings(&self) -> Result<bool, CoreError> {
        let Some(driver) = self.driver.clone() else {
            return Ok(false);
        };
        match driver.refresh_settings().await {
            Ok(Some(settings)) => {
                let summary = driver.summarize(&settings);
                let mut state = self.lock_state();
                state.mark_contact();
                state.name = summary.name.or(state.name.take());
                state.ssid = summary.ssid.or(state.ssid.take());
                state.extender = summary.extender;
                state.settings_payload = Some(settings);
                Ok(true)
            }
            Ok(None) => Ok(false),
            Err(e) => Err(self.record_failure(e)),
        }
    }

    /// Map a refresh failure onto the device status.
    ///
    /// transient → `OffLine`, authentication → `NotLogged`, protocol →
    /// `Error`; anything else is `Error` and logged loudly.
    pub fn record_failure(&self, err: CoreError) -> CoreError {
        let status = if err.is_transient() {
            debug!(mac = %self.mac, address = %self.locator, error = %err, "device unreachable");
            DeviceStatus::OffLine
        } else if err.is_auth() {
            DeviceStatus::NotLogged
        } else if err.is_protocol() {
            warn!(mac = %self.mac, address = %self.locator, error = %err, "unexpected device response");
            DeviceStatus::Error
        } else {
            error!(mac = %self.mac, address = %self.locator, error = %err, "unexpected refresh failure");
            DeviceStatus::Error
        };
        let mut state = self.lock_state();
        state.status = status;
        state.last_error = Some(err.to_string());
        err
    }

    /// Snapshot this device as a ghost record with an empty note.
    pub fn to_record(&self) -> GhostRecord {
        let state = self.lock_state();
        GhostRecord {
            type_id: self.model.type_id.clone(),
            type_name: self.model.type_name.clone(),
            hostname: self.locator.hostname.clone(),
            mac: self.mac.clone(),
            address: self.locator.address,
            port: self.locator.port,
            name: state.name.clone().unwrap_or_default(),
            ssid: state.ssid.clone().unwrap_or_default(),
            last_contact: state.last_contact.map_or(0, |t| t.timestamp_millis()),
            battery: self.model.battery,
            generation: self.generation,
            note: String::new(),
        }
    }
}

impl PartialEq for Device {
    fn eq(&self, other: &Self) -> bool {
        self.mac == other.mac
    }
}

impl Eq for Device {}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("mac", &self.mac)
            .field("locator", &self.locator)
            .field("generation", &self.generation)
            .field("model", &self.model.type_id)
            .field("kind", &self.kind)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}, {})", self.display_name(), self.mac, self.locator)
    }
}
