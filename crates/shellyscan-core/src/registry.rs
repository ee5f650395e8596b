// ── Device registry ──
//
// The authoritative inventory: a stable-indexed list of slots, each
// holding one device and its refresh timer. Every mutation and every
// index lookup made on behalf of a background task happens under the one
// `slots` lock, so "is this still my slot" is answered atomically with
// respect to concurrent add/remove/clear.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::CoreError;
use crate::model::{Device, DeviceKind, DeviceStatus, GhostRecord, MacAddress};
use crate::scheduler::{RefreshHandle, RefreshScheduler, SlotState};

const EVENT_CHANNEL_SIZE: usize = 1024;

/// Registry change notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "UPPERCASE")]
pub enum RegistryEventKind {
    Add,
    Update,
    Substitute,
    Delete,
    Ready,
    Clear,
}

/// A change notification carrying the affected index, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryEvent {
    pub kind: RegistryEventKind,
    pub index: Option<usize>,
}

impl RegistryEvent {
    fn at(kind: RegistryEventKind, index: usize) -> Self {
        Self {
            kind,
            index: Some(index),
        }
    }

    fn global(kind: RegistryEventKind) -> Self {
        Self { kind, index: None }
    }
}

/// Result of [`DeviceRegistry::upsert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Added(usize),
    Substituted(usize),
    /// The incoming device was a downgrade and was dropped.
    Kept(usize),
}

impl UpsertOutcome {
    pub fn index(self) -> usize {
        match self {
            Self::Added(i) | Self::Substituted(i) | Self::Kept(i) => i,
        }
    }
}

/// Identity of one occupancy of a slot. A substitution gets a new key,
/// so a task holding the old key can tell its device was swapped out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotKey(u64);

struct Slot {
    device: Arc<Device>,
    key: SlotKey,
    /// `None` for ghosts, which are never polled.
    handle: Option<RefreshHandle>,
}

/// Whether `incoming` may replace `existing` in the same slot.
///
/// A failed or unclassified probe never clobbers a classified device;
/// anything replaces an unmanaged entry or a ghost.
fn replaces(existing: &Device, incoming: &Device) -> bool {
    incoming.is_managed() || !existing.is_managed()
}

pub struct DeviceRegistry {
    slots: Mutex<Vec<Slot>>,
    next_key: AtomicU64,
    events: broadcast::Sender<RegistryEvent>,
    scheduler: Arc<RefreshScheduler>,
}

impl DeviceRegistry {
    pub fn new(scheduler: Arc<RefreshScheduler>) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        Arc::new(Self {
            slots: Mutex::new(Vec::new()),
            next_key: AtomicU64::new(0),
            events,
            scheduler,
        })
    }

    pub fn scheduler(&self) -> &Arc<RefreshScheduler> {
        &self.scheduler
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn new_key(&self) -> SlotKey {
        SlotKey(self.next_key.fetch_add(1, Ordering::Relaxed))
    }

    fn emit(&self, event: RegistryEvent) {
        // No receivers is fine: nobody is watching.
        let _ = self.events.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }

    // ── Reads ────────────────────────────────────────────────────────

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn get(&self, index: usize) -> Option<Arc<Device>> {
        self.lock().get(index).map(|s| Arc::clone(&s.device))
    }

    pub fn devices(&self) -> Vec<Arc<Device>> {
        self.lock().iter().map(|s| Arc::clone(&s.device)).collect()
    }

    pub fn index_of(&self, mac: &MacAddress) -> Option<usize> {
        self.lock().iter().position(|s| s.device.mac() == mac)
    }

    /// Whether the slot has a live (not cancelled) refresh timer.
    pub fn has_schedule(&self, index: usize) -> bool {
        self.lock()
            .get(index)
            .and_then(|s| s.handle.as_ref())
            .is_some_and(|h| !h.is_cancelled())
    }

    /// Current scheduling counters of a slot. Waits for an in-flight
    /// refresh to finish.
    pub async fn slot_state(&self, index: usize) -> Option<SlotState> {
        let state = self
            .lock()
            .get(index)
            .and_then(|s| s.handle.as_ref())
            .map(|h| Arc::clone(&h.state))?;
        let snapshot = state.lock().await.clone();
        Some(snapshot)
    }

    // ── Mutations ────────────────────────────────────────────────────

    /// Add a device, or replace the slot holding the same MAC.
    ///
    /// Downgrades (an unmanaged device over a classified one) are
    /// dropped without notification.
    pub fn upsert(self: &Arc<Self>, device: Device) -> UpsertOutcome {
        let device = Arc::new(device);
        let mut slots = self.lock();
        self.upsert_locked(&mut slots, device)
    }

    fn upsert_locked(self: &Arc<Self>, slots: &mut Vec<Slot>, device: Arc<Device>) -> UpsertOutcome {
        if let Some(index) = slots.iter().position(|s| s.device == device) {
            if !replaces(&slots[index].device, &device) {
                debug!(mac = %device.mac(), index, "keeping classified device");
                return UpsertOutcome::Kept(index);
            }
            self.occupy(slots, index, device);
            self.emit(RegistryEvent::at(RegistryEventKind::Substitute, index));
            UpsertOutcome::Substituted(index)
        } else {
            let index = slots.len();
            let key = self.new_key();
            let handle = self.scheduler.install(
                Arc::downgrade(self),
                key,
                index,
                Arc::clone(&device),
                None,
            );
            slots.push(Slot {
                device,
                key,
                handle: Some(handle),
            });
            self.emit(RegistryEvent::at(RegistryEventKind::Add, index));
            UpsertOutcome::Added(index)
        }
    }

    /// Put `device` into the existing slot `index` with a fresh key and timer.
    fn occupy(self: &Arc<Self>, slots: &mut [Slot], index: usize, device: Arc<Device>) {
        let key = self.new_key();
        let handle = self.scheduler.install(
            Arc::downgrade(self),
            key,
            index,
            Arc::clone(&device),
            None,
        );
        let slot = &mut slots[index];
        if let Some(old) = slot.handle.replace(handle) {
            old.cancel();
        }
        slot.device = device;
        slot.key = key;
    }

    /// Replace the placeholder occupying `key` with a re-identified device.
    ///
    /// If the device's MAC already lives in another slot the normal upsert
    /// rule applies there and the placeholder slot is removed.
    pub(crate) fn upgrade(self: &Arc<Self>, key: SlotKey, device: Device) -> UpsertOutcome {
        let device = Arc::new(device);
        let mut slots = self.lock();
        let Some(index) = slots.iter().position(|s| s.key == key) else {
            return self.upsert_locked(&mut slots, device);
        };

        match slots.iter().position(|s| s.device == device) {
            Some(other) if other != index => {
                let outcome = self.upsert_locked(&mut slots, device);
                self.remove_locked(&mut slots, index);
                // Removal shifted everything above the placeholder down.
                let shifted = |i: usize| if i > index { i - 1 } else { i };
                match outcome {
                    UpsertOutcome::Added(i) => UpsertOutcome::Added(shifted(i)),
                    UpsertOutcome::Substituted(i) => UpsertOutcome::Substituted(shifted(i)),
                    UpsertOutcome::Kept(i) => UpsertOutcome::Kept(shifted(i)),
                }
            }
            _ => {
                self.occupy(&mut slots, index, device);
                self.emit(RegistryEvent::at(RegistryEventKind::Substitute, index));
                UpsertOutcome::Substituted(index)
            }
        }
    }

    /// Add a ghost placeholder unless its MAC is already present.
    pub fn insert_ghost(&self, record: &GhostRecord) -> Option<usize> {
        let mut slots = self.lock();
        if slots.iter().any(|s| s.device.mac() == &record.mac) {
            return None;
        }
        let index = slots.len();
        slots.push(Slot {
            device: Arc::new(Device::from_ghost(record)),
            key: self.new_key(),
            handle: None,
        });
        self.emit(RegistryEvent::at(RegistryEventKind::Add, index));
        Some(index)
    }

    /// Remove a slot; indices above it shift down.
    pub fn remove(&self, index: usize) -> Result<Arc<Device>, CoreError> {
        let mut slots = self.lock();
        if index >= slots.len() {
            return Err(CoreError::DeviceNotFound { index });
        }
        Ok(self.remove_locked(&mut slots, index))
    }

    fn remove_locked(&self, slots: &mut Vec<Slot>, index: usize) -> Arc<Device> {
        let slot = slots.remove(index);
        if let Some(handle) = slot.handle {
            handle.cancel();
        }
        self.emit(RegistryEvent::at(RegistryEventKind::Delete, index));
        slot.device
    }

    /// Cancel every timer and task, empty the list, and start a fresh
    /// scheduling substrate.
    pub fn clear(&self) {
        let mut slots = self.lock();
        for handle in slots.iter().filter_map(|s| s.handle.as_ref()) {
            handle.cancel();
        }
        slots.clear();
        self.scheduler.reset();
        self.emit(RegistryEvent::global(RegistryEventKind::Clear));
    }

    /// Signal that a scan (and ghost reconciliation) has finished.
    pub fn notify_ready(&self) {
        self.emit(RegistryEvent::global(RegistryEventKind::Ready));
    }

    // ── Scheduling ───────────────────────────────────────────────────

    /// Refresh a slot now.
    ///
    /// A slot already being read is left alone unless `force` is set, in
    /// which case its timer (and any firing in progress) is cancelled
    /// first. The timer is reinstalled once the refresh completes.
    /// Returns whether a refresh was started.
    pub fn refresh(self: &Arc<Self>, index: usize, force: bool) -> Result<bool, CoreError> {
        let slots = self.lock();
        let slot = slots.get(index).ok_or(CoreError::DeviceNotFound { index })?;
        let Some(handle) = slot.handle.as_ref() else {
            return Ok(false);
        };

        let busy = slot.device.status() == DeviceStatus::Reading || handle.state.try_lock().is_err();
        if busy && !force {
            return Ok(false);
        }

        handle.cancel();
        slot.device.set_status(DeviceStatus::Reading);
        self.scheduler.spawn_forced(
            Arc::downgrade(self),
            slot.key,
            Arc::clone(&slot.device),
            Arc::clone(&handle.state),
        );
        Ok(true)
    }

    /// Stop polling a slot without removing it.
    pub fn pause(&self, index: usize) -> Result<(), CoreError> {
        let slots = self.lock();
        let slot = slots.get(index).ok_or(CoreError::DeviceNotFound { index })?;
        if let Some(handle) = &slot.handle {
            handle.cancel();
        }
        Ok(())
    }

    /// Reboot the device in a slot; polling resumes after it settles.
    pub fn reboot(self: &Arc<Self>, index: usize) -> Result<(), CoreError> {
        let slots = self.lock();
        let slot = slots.get(index).ok_or(CoreError::DeviceNotFound { index })?;
        let Some(handle) = slot.handle.as_ref() else {
            return Err(CoreError::Unsupported {
                operation: "reboot".into(),
            });
        };
        handle.cancel();
        slot.device.set_status(DeviceStatus::Reading);
        self.scheduler.spawn_reboot(
            Arc::downgrade(self),
            slot.key,
            Arc::clone(&slot.device),
            Arc::clone(&handle.state),
        );
        Ok(())
    }

    /// Locate a slot by key, for tasks that started from it.
    pub(crate) fn key_at(&self, index: usize) -> Option<SlotKey> {
        self.lock().get(index).map(|s| s.key)
    }

    /// Mark the placeholder in `key` as being re-identified.
    pub(crate) fn pause_key(&self, key: SlotKey) {
        let slots = self.lock();
        if let Some(slot) = slots.iter().find(|s| s.key == key) {
            if let Some(handle) = &slot.handle {
                handle.cancel();
            }
            slot.device.set_status(DeviceStatus::Reading);
        }
    }

    /// After a forced refresh or reboot: reinstall the timer if it was
    /// cancelled and publish the slot.
    pub(crate) fn resume(self: &Arc<Self>, key: SlotKey) {
        let mut slots = self.lock();
        let Some(index) = slots.iter().position(|s| s.key == key) else {
            return;
        };
        let slot = &mut slots[index];
        if let Some(handle) = slot.handle.as_mut() {
            if handle.is_cancelled() {
                *handle = self.scheduler.install(
                    Arc::downgrade(self),
                    key,
                    index,
                    Arc::clone(&slot.device),
                    Some(Arc::clone(&handle.state)),
                );
            }
        }
        self.emit(RegistryEvent::at(RegistryEventKind::Update, index));
    }

    /// Publish an `UPDATE` for a timer firing, unless the timer was
    /// cancelled or its slot is gone.
    pub(crate) fn publish_update(&self, key: SlotKey, timer: &CancellationToken) {
        let slots = self.lock();
        if timer.is_cancelled() {
            return;
        }
        if let Some(index) = slots.iter().position(|s| s.key == key) {
            self.emit(RegistryEvent::at(RegistryEventKind::Update, index));
        }
    }

    /// Restore the degraded-placeholder status of a slot whose re-identify
    /// produced nothing.
    pub(crate) fn restore(self: &Arc<Self>, key: SlotKey) {
        let index = {
            let slots = self.lock();
            slots.iter().position(|s| s.key == key).map(|i| {
                let device = &slots[i].device;
                if matches!(device.kind(), DeviceKind::Unmanaged { error: Some(_) }) {
                    device.set_status(DeviceStatus::Error);
                }
                i
            })
        };
        if index.is_some() {
            self.resume(key);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::net::IpAddr;
    use std::time::Duration;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::model::{Generation, Locator, ModelInfo};
    use crate::scheduler::Cadence;
    use crate::testing::{FakeDriver, managed};

    fn registry() -> Arc<DeviceRegistry> {
        let cadence = Cadence {
            interval: Duration::from_secs(3600),
            full_refresh_ticks: 3,
            query_delay: Duration::from_millis(1),
            reboot_settle: Duration::from_millis(1),
        };
        DeviceRegistry::new(Arc::new(RefreshScheduler::new(cadence, 8)))
    }

    fn unmanaged(mac: &str, last: u8, error: Option<&str>) -> Device {
        Device::unmanaged(
            MacAddress::new(mac),
            Locator::new(IpAddr::from([192, 168, 1, last]), 80, format!("shelly-{last}")),
            Generation::Gen1,
            ModelInfo::new("SHXX", "Generic G1", false),
            None,
            error.map(str::to_owned),
        )
    }

    fn ghost(mac: &str) -> GhostRecord {
        GhostRecord {
            type_id: "SHSW-1".into(),
            type_name: "Shelly 1".into(),
            hostname: format!("shelly1-{mac}"),
            mac: MacAddress::new(mac),
            address: IpAddr::from([192, 168, 1, 99]),
            port: 80,
            name: String::new(),
            ssid: String::new(),
            last_contact: 0,
            battery: false,
            generation: Generation::Gen1,
            note: String::new(),
        }
    }

    #[tokio::test]
    async fn upsert_is_idempotent_by_mac() {
        let registry = registry();
        let mut events = registry.subscribe();

        assert_eq!(registry.upsert(unmanaged("A4CF12F45A11", 10, None)), UpsertOutcome::Added(0));
        assert_eq!(
            registry.upsert(unmanaged("a4:cf:12:f4:5a:11", 20, None)),
            UpsertOutcome::Substituted(0)
        );
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(0).unwrap().address(), IpAddr::from([192, 168, 1, 20]));

        assert_eq!(events.recv().await.unwrap().kind, RegistryEventKind::Add);
        assert_eq!(
            events.recv().await.unwrap(),
            RegistryEvent::at(RegistryEventKind::Substitute, 0)
        );
        assert!(registry.has_schedule(0));
    }

    #[tokio::test]
    async fn downgrade_keeps_classified_device() {
        let registry = registry();
        let driver = FakeDriver::new(Duration::ZERO);
        registry.upsert(managed("A4CF12F45A11", 10, driver));
        let mut events = registry.subscribe();

        let outcome = registry.upsert(unmanaged("A4CF12F45A11", 30, Some("timeout")));

        assert_eq!(outcome, UpsertOutcome::Kept(0));
        let kept = registry.get(0).unwrap();
        assert!(kept.is_managed());
        assert_eq!(kept.address(), IpAddr::from([192, 168, 1, 10]));
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn managed_replaces_unmanaged() {
        let registry = registry();
        registry.upsert(unmanaged("A4CF12F45A11", 10, Some("refused")));
        let outcome = registry.upsert(managed("A4CF12F45A11", 10, FakeDriver::new(Duration::ZERO)));
        assert_eq!(outcome, UpsertOutcome::Substituted(0));
        assert!(registry.get(0).unwrap().is_managed());
    }

    #[tokio::test]
    async fn ghost_is_replaced_by_any_live_signal() {
        let registry = registry();
        assert_eq!(registry.insert_ghost(&ghost("A4CF12F45A11")), Some(0));
        assert!(!registry.has_schedule(0));

        let outcome = registry.upsert(unmanaged("A4CF12F45A11", 10, Some("refused")));
        assert_eq!(outcome, UpsertOutcome::Substituted(0));
        assert!(!registry.get(0).unwrap().is_ghost());
        assert!(registry.has_schedule(0));
    }

    #[tokio::test]
    async fn insert_ghost_skips_live_mac() {
        let registry = registry();
        registry.upsert(unmanaged("A4CF12F45A11", 10, None));
        assert_eq!(registry.insert_ghost(&ghost("A4CF12F45A11")), None);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn remove_shifts_indices_and_cancels() {
        let registry = registry();
        registry.upsert(unmanaged("000000000001", 1, None));
        registry.upsert(unmanaged("000000000002", 2, None));
        registry.upsert(unmanaged("000000000003", 3, None));

        let removed = registry.remove(1).unwrap();
        assert_eq!(removed.mac().as_str(), "000000000002");
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.index_of(&MacAddress::new("000000000003")), Some(1));
        assert!(matches!(
            registry.remove(5),
            Err(CoreError::DeviceNotFound { index: 5 })
        ));
    }

    #[tokio::test]
    async fn clear_empties_and_notifies() {
        let registry = registry();
        let mut events = registry.subscribe();
        registry.upsert(unmanaged("000000000001", 1, None));
        registry.insert_ghost(&ghost("000000000002"));
        let old_token = registry.scheduler().token();

        registry.clear();

        assert!(registry.is_empty());
        assert!(old_token.is_cancelled());
        assert!(!registry.scheduler().token().is_cancelled());
        let kinds: Vec<_> = std::iter::from_fn(|| events.try_recv().ok())
            .map(|e| e.kind)
            .collect();
        assert_eq!(
            kinds,
            vec![RegistryEventKind::Add, RegistryEventKind::Add, RegistryEventKind::Clear]
        );
    }

    #[tokio::test]
    async fn pause_cancels_without_removing() {
        let registry = registry();
        registry.upsert(unmanaged("000000000001", 1, None));
        registry.pause(0).unwrap();
        assert_eq!(registry.len(), 1);
        assert!(!registry.has_schedule(0));
    }
}
