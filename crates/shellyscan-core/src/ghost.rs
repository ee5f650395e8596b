// ── Ghost store ──
//
// Persists the registry as a list of ghost records so devices that are
// unreachable at startup still show up, and merges those records back
// into the registry after a (re)scan.
//
// Document layout (JSON):
//
//   { "ver": 0, "time": <epoch ms>, "dev": [ { "tid": ..., "mac": ..., ... } ] }

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, info};

use crate::error::CoreError;
use crate::model::{Device, GhostRecord, MacAddress};
use crate::registry::DeviceRegistry;

/// Version tag of the store document. Any other value is ignored on load.
pub const STORE_VERSION: u32 = 0;

#[derive(Serialize)]
struct StoreDocument<'a> {
    ver: u32,
    time: i64,
    dev: &'a [GhostRecord],
}

#[derive(Deserialize)]
struct RawDocument {
    /// Absent in early files, which are version 0.
    #[serde(default)]
    ver: u32,
    #[serde(default)]
    dev: Vec<Value>,
}

/// Last-loaded (or last-saved) ghost records, keyed by MAC.
///
/// Also the home of user notes: a note set on any device lives in the
/// record list until the next save writes it out.
#[derive(Debug, Default)]
pub struct GhostStore {
    records: Mutex<Vec<GhostRecord>>,
}

impl GhostStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<GhostRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The stored record for a MAC, if any.
    pub fn stored(&self, mac: &MacAddress) -> Option<GhostRecord> {
        self.lock().iter().find(|r| &r.mac == mac).cloned()
    }

    pub fn records(&self) -> Vec<GhostRecord> {
        self.lock().clone()
    }

    pub fn replace(&self, records: Vec<GhostRecord>) {
        *self.lock() = records;
    }

    // ── Snapshot ─────────────────────────────────────────────────────

    /// Records for every device in `devices`, in registry order.
    ///
    /// A degraded device (classification error, missing credentials)
    /// keeps its stored record, updated with the live locator; without a
    /// stored record its live data is used only if the MAC is real. A
    /// healthy device is recorded from live data, keeping the stored note.
    pub fn snapshot(&self, devices: &[Arc<Device>]) -> Vec<GhostRecord> {
        let stored = self.lock();
        let find = |mac: &MacAddress| stored.iter().find(|r| &r.mac == mac);

        devices
            .iter()
            .filter_map(|device| {
                let prior = find(device.mac());
                if device.is_ghost() {
                    return Some(prior.cloned().unwrap_or_else(|| device.to_record()));
                }
                if device.is_degraded() {
                    if let Some(prior) = prior {
                        let mut record = prior.clone();
                        record.address = device.address();
                        record.port = device.port();
                        return Some(record);
                    }
                }
                if !device.mac().is_valid() {
                    debug!(mac = %device.mac(), "no identity to persist");
                    return None;
                }
                let mut record = device.to_record();
                if let Some(prior) = prior {
                    record.note.clone_from(&prior.note);
                }
                Some(record)
            })
            .collect()
    }

    // ── Notes ────────────────────────────────────────────────────────

    /// The ghost record for `device`, created from its live data (and
    /// kept) if the store has none yet.
    pub fn ghost(&self, device: &Device) -> GhostRecord {
        let mut stored = self.lock();
        if let Some(record) = stored.iter().find(|r| &r.mac == device.mac()) {
            return record.clone();
        }
        let record = device.to_record();
        stored.push(record.clone());
        record
    }

    pub fn set_note(&self, device: &Device, note: impl Into<String>) {
        let note = note.into();
        let mut stored = self.lock();
        match stored.iter_mut().find(|r| &r.mac == device.mac()) {
            Some(record) => record.note = note,
            None => {
                let mut record = device.to_record();
                record.note = note;
                stored.push(record);
            }
        }
    }

    // ── Persistence ──────────────────────────────────────────────────

    /// Write `records` to `path` and make them the stored set.
    pub async fn persist(&self, path: &Path, records: Vec<GhostRecord>) -> Result<(), CoreError> {
        let document = StoreDocument {
            ver: STORE_VERSION,
            time: Utc::now().timestamp_millis(),
            dev: &records,
        };
        let json = serde_json::to_vec(&document).map_err(|e| CoreError::StoreFormat {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|source| store_io(path, source))?;
        }
        tokio::fs::write(path, json)
            .await
            .map_err(|source| store_io(path, source))?;

        debug!(path = %path.display(), count = records.len(), "ghost store saved");
        self.replace(records);
        Ok(())
    }

    /// Read `path` and make its records the stored set.
    ///
    /// A missing file is a first run (empty list). A document with another
    /// version is ignored whole. Individual malformed records are skipped.
    pub async fn load(&self, path: &Path) -> Result<Vec<GhostRecord>, CoreError> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no ghost store yet");
                self.replace(Vec::new());
                return Ok(Vec::new());
            }
            Err(source) => return Err(store_io(path, source)),
        };

        let document: RawDocument =
            serde_json::from_slice(&bytes).map_err(|e| CoreError::StoreFormat {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;

        if document.ver != STORE_VERSION {
            info!(path = %path.display(), version = document.ver, "ignoring ghost store with unknown version");
            self.replace(Vec::new());
            return Ok(Vec::new());
        }

        let records: Vec<GhostRecord> = document
            .dev
            .into_iter()
            .filter_map(|raw| {
                serde_json::from_value(raw)
                    .inspect_err(|e| error!(path = %path.display(), error = %e, "skipping malformed ghost record"))
                    .ok()
            })
            .collect();

        debug!(path = %path.display(), count = records.len(), "ghost store loaded");
        self.replace(records.clone());
        Ok(records)
    }

    // ── Reconcile ────────────────────────────────────────────────────

    /// Insert every record whose MAC is not live in `registry` as a
    /// no-schedule ghost entry. Returns how many were inserted.
    pub fn reconcile(registry: &DeviceRegistry, records: &[GhostRecord]) -> usize {
        records
            .iter()
            .filter(|r| registry.insert_ghost(r).is_some())
            .count()
    }
}

fn store_io(path: &Path, source: std::io::Error) -> CoreError {
    CoreError::Store {
        path: PathBuf::from(path),
        source,
    }
}
