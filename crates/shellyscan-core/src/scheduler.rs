// ── Refresh scheduler ──
//
// One recurring timer per registry slot, plus the bounded pool every
// discovery and refresh task runs in. Timers alternate status-only polls
// with a periodic full (settings + status) refresh.
//
// All tasks are children of a single "substrate" cancellation token.
// A full rescan throws the whole substrate away and starts a fresh one
// instead of cancelling timers one by one.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::sync::{Mutex as AsyncMutex, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::error::CoreError;
use crate::model::{Device, DeviceStatus};
use crate::registry::{DeviceRegistry, SlotKey};

/// Timer cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cadence {
    pub interval: Duration,
    /// Every N-th firing is a full refresh.
    pub full_refresh_ticks: u32,
    pub query_delay: Duration,
    pub reboot_settle: Duration,
}

/// What the most recent firing did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    StatusOnly,
    Full,
    /// The driver had nothing to fetch; no contact was made.
    Idle,
    /// The refresh failed; the device was left in this status.
    Failed(DeviceStatus),
}

/// Per-slot scheduling state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlotState {
    /// Firings since the last successful full refresh, saturating at the
    /// full-refresh threshold.
    pub ticks: u32,
    pub firings: u64,
    pub full_refreshes: u64,
    pub last_outcome: Option<RefreshOutcome>,
}

/// Handle to one slot's timer.
///
/// The state mutex is also the slot's refresh gate: whoever holds it is
/// the only refresh in flight for that slot.
#[derive(Debug, Clone)]
pub struct RefreshHandle {
    pub(crate) timer: CancellationToken,
    pub(crate) state: Arc<AsyncMutex<SlotState>>,
}

impl RefreshHandle {
    pub fn cancel(&self) {
        self.timer.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.timer.is_cancelled()
    }
}

struct Substrate {
    token: CancellationToken,
    permits: Arc<Semaphore>,
}

impl Substrate {
    fn new(pool_size: usize) -> Self {
        Self {
            token: CancellationToken::new(),
            permits: Arc::new(Semaphore::new(pool_size.max(1))),
        }
    }
}

pub struct RefreshScheduler {
    cadence: Mutex<Cadence>,
    pool_size: usize,
    substrate: Mutex<Substrate>,
}

impl RefreshScheduler {
    pub fn new(cadence: Cadence, pool_size: usize) -> Self {
        Self {
            cadence: Mutex::new(cadence),
            pool_size,
            substrate: Mutex::new(Substrate::new(pool_size)),
        }
    }

    pub fn cadence(&self) -> Cadence {
        *self.cadence.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Change the cadence of timers installed from now on.
    pub fn set_cadence(&self, interval: Duration, full_refresh_ticks: u32) {
        let mut cadence = self.cadence.lock().unwrap_or_else(PoisonError::into_inner);
        cadence.interval = interval;
        cadence.full_refresh_ticks = full_refresh_ticks.max(1);
    }

    fn substrate(&self) -> MutexGuard<'_, Substrate> {
        self.substrate.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Token of the current substrate; cancelled by the next reset.
    pub fn token(&self) -> CancellationToken {
        self.substrate().token.clone()
    }

    /// Cancel every task and timer and start over with a fresh pool.
    pub fn reset(&self) {
        let mut substrate = self.substrate();
        substrate.token.cancel();
        *substrate = Substrate::new(self.pool_size);
    }

    /// Cancel everything without replacing the substrate.
    pub fn shutdown(&self) {
        self.substrate().token.cancel();
    }

    /// Run a one-shot task in the pool. It is dropped if the substrate is
    /// reset before or while it runs.
    pub fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.spawn_after(Duration::ZERO, task);
    }

    /// Like [`spawn`](Self::spawn), but the task only takes a pool slot
    /// once `delay` has elapsed.
    pub fn spawn_after<F>(&self, delay: Duration, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let (token, permits) = {
            let substrate = self.substrate();
            (substrate.token.clone(), Arc::clone(&substrate.permits))
        };
        tokio::spawn(async move {
            tokio::select! {
                biased;
                () = token.cancelled() => {}
                () = async {
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    let _permit = permits.acquire().await.ok();
                    task.await;
                } => {}
            }
        });
    }

    /// Install a recurring timer for the device in slot `key`.
    ///
    /// The first firing comes after `interval + index` milliseconds so
    /// slots added together do not poll in lockstep. `state` carries over
    /// the slot's counters when a timer is reinstalled.
    pub(crate) fn install(
        &self,
        registry: Weak<DeviceRegistry>,
        key: SlotKey,
        index: usize,
        device: Arc<Device>,
        state: Option<Arc<AsyncMutex<SlotState>>>,
    ) -> RefreshHandle {
        let cadence = self.cadence();
        let (timer, permits) = {
            let substrate = self.substrate();
            (substrate.token.child_token(), Arc::clone(&substrate.permits))
        };
        let handle = RefreshHandle {
            timer,
            state: state.unwrap_or_default(),
        };

        let stagger = Duration::from_millis(u64::try_from(index).unwrap_or(u64::MAX));
        tokio::spawn(run_timer(
            registry,
            key,
            device,
            handle.clone(),
            permits,
            cadence,
            cadence.interval.saturating_add(stagger),
        ));
        handle
    }

    /// Run one full refresh for a slot outside its timer, then reinstall
    /// the timer if it had been cancelled.
    pub(crate) fn spawn_forced(
        &self,
        registry: Weak<DeviceRegistry>,
        key: SlotKey,
        device: Arc<Device>,
        state: Arc<AsyncMutex<SlotState>>,
    ) {
        let cadence = self.cadence();
        self.spawn(async move {
            {
                let mut slot = state.lock().await;
                tokio::time::sleep(cadence.query_delay).await;
                full_refresh(&device, &mut slot, cadence).await;
            }
            if let Some(registry) = registry.upgrade() {
                registry.resume(key);
            }
        });
    }

    /// Reboot a device, wait for it to come back, then reinstall its timer.
    pub(crate) fn spawn_reboot(
        &self,
        registry: Weak<DeviceRegistry>,
        key: SlotKey,
        device: Arc<Device>,
        state: Arc<AsyncMutex<SlotState>>,
    ) {
        let cadence = self.cadence();
        self.spawn(async move {
            {
                let _gate = state.lock().await;
                if let Some(driver) = device.driver().cloned() {
                    if let Err(e) = driver.reboot().await {
                        device.record_failure(e);
                    }
                }
                tokio::time::sleep(cadence.reboot_settle).await;
            }
            if let Some(registry) = registry.upgrade() {
                registry.resume(key);
            }
        });
    }
}

// ── Timer task ──────────────────────────────────────────────────────

async fn run_timer(
    registry: Weak<DeviceRegistry>,
    key: SlotKey,
    device: Arc<Device>,
    handle: RefreshHandle,
    permits: Arc<Semaphore>,
    cadence: Cadence,
    first_delay: Duration,
) {
    let timer = &handle.timer;
    let mut delay = first_delay;

    loop {
        tokio::select! {
            biased;
            () = timer.cancelled() => break,
            () = tokio::time::sleep(delay) => {}
        }
        delay = cadence.interval;

        let _permit = tokio::select! {
            biased;
            () = timer.cancelled() => break,
            permit = permits.acquire() => permit.ok(),
        };
        let mut state = tokio::select! {
            biased;
            () = timer.cancelled() => break,
            state = handle.state.lock() => state,
        };

        // A cancelled firing is abandoned mid-flight and publishes nothing.
        let completed = tokio::select! {
            biased;
            () = timer.cancelled() => false,
            () = fire(&device, &mut state, cadence) => true,
        };
        drop(state);
        if !completed {
            break;
        }

        let Some(registry) = registry.upgrade() else {
            break;
        };
        registry.publish_update(key, timer);
    }
    trace!(mac = %device.mac(), "refresh timer stopped");
}

/// One timer firing: status poll, or a full refresh every N-th time.
async fn fire(device: &Device, state: &mut SlotState, cadence: Cadence) {
    let threshold = cadence.full_refresh_ticks.max(1);
    state.firings += 1;
    state.ticks = (state.ticks + 1).min(threshold);

    if state.ticks >= threshold {
        full_refresh(device, state, cadence).await;
    } else {
        state.last_outcome = Some(status_outcome(device.refresh_status().await, device));
    }
}

fn status_outcome(result: Result<bool, CoreError>, device: &Device) -> RefreshOutcome {
    match result {
        Ok(true) => RefreshOutcome::StatusOnly,
        Ok(false) => RefreshOutcome::Idle,
        Err(_) => RefreshOutcome::Failed(device.status()),
    }
}

/// Settings, a short pause, then status. Only a settings document that
/// was actually fetched resets the tick counter, so the first contact
/// after an outage is always a full refresh. Drivers without settings
/// stay at the threshold and poll status every firing.
async fn full_refresh(device: &Device, state: &mut SlotState, cadence: Cadence) {
    let outcome = match device.refresh_settings().await {
        Ok(true) => {
            state.ticks = 0;
            state.full_refreshes += 1;
            tokio::time::sleep(cadence.query_delay).await;
            match device.refresh_status().await {
                Ok(_) => RefreshOutcome::Full,
                Err(_) => RefreshOutcome::Failed(device.status()),
            }
        }
        Ok(false) => status_outcome(device.refresh_status().await, device),
        Err(_) => RefreshOutcome::Failed(device.status()),
    };
    state.last_outcome = Some(outcome);
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::Ordering;

    use pretty_assertions::assert_eq;
    use tokio::sync::broadcast;

    use super::*;
    use crate::registry::{RegistryEvent, RegistryEventKind};
    use crate::testing::{FakeDriver, managed};

    fn registry(interval_ms: u64) -> Arc<DeviceRegistry> {
        let cadence = Cadence {
            interval: Duration::from_millis(interval_ms),
            full_refresh_ticks: 3,
            query_delay: Duration::from_millis(5),
            reboot_settle: Duration::from_millis(50),
        };
        DeviceRegistry::new(Arc::new(RefreshScheduler::new(cadence, 16)))
    }

    async fn next_update(events: &mut broadcast::Receiver<RegistryEvent>) -> RegistryEvent {
        loop {
            let event = events.recv().await.unwrap();
            if event.kind == RegistryEventKind::Update {
                return event;
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn every_third_firing_is_a_full_refresh() {
        let registry = registry(1000);
        let driver = FakeDriver::new(Duration::from_millis(10));
        let mut events = registry.subscribe();
        registry.upsert(managed("A4CF12F45A11", 10, Arc::clone(&driver)));

        next_update(&mut events).await;
        next_update(&mut events).await;
        assert_eq!(driver.settings_calls.load(Ordering::SeqCst), 0);
        assert_eq!(driver.status_calls.load(Ordering::SeqCst), 2);
        assert_eq!(registry.slot_state(0).await.unwrap().ticks, 2);

        next_update(&mut events).await;
        let state = registry.slot_state(0).await.unwrap();
        assert_eq!(driver.settings_calls.load(Ordering::SeqCst), 1);
        assert_eq!(driver.status_calls.load(Ordering::SeqCst), 3);
        assert_eq!(state.ticks, 0);
        assert_eq!(state.full_refreshes, 1);
        assert_eq!(state.last_outcome, Some(RefreshOutcome::Full));
    }

    #[tokio::test(start_paused = true)]
    async fn outage_never_advances_past_threshold() {
        let registry = registry(1000);
        let driver = FakeDriver::new(Duration::from_millis(10));
        let mut events = registry.subscribe();
        registry.upsert(managed("A4CF12F45A11", 10, Arc::clone(&driver)));

        driver.offline.store(true, Ordering::SeqCst);
        for _ in 0..6 {
            next_update(&mut events).await;
            let state = registry.slot_state(0).await.unwrap();
            assert!(state.ticks <= 3);
            assert!(matches!(state.last_outcome, Some(RefreshOutcome::Failed(_))));
        }
        let state = registry.slot_state(0).await.unwrap();
        assert_eq!(state.ticks, 3);
        assert_eq!(state.full_refreshes, 0);
        assert_eq!(registry.get(0).unwrap().status(), DeviceStatus::OffLine);
        // The timer keeps firing through the outage.
        assert!(registry.has_schedule(0));

        // First contact after the outage is a full refresh.
        driver.offline.store(false, Ordering::SeqCst);
        let settings_before = driver.settings_calls.load(Ordering::SeqCst);
        next_update(&mut events).await;
        let state = registry.slot_state(0).await.unwrap();
        assert_eq!(driver.settings_calls.load(Ordering::SeqCst), settings_before + 1);
        assert_eq!(state.ticks, 0);
        assert_eq!(state.last_outcome, Some(RefreshOutcome::Full));
        assert_eq!(registry.get(0).unwrap().status(), DeviceStatus::OnLine);
    }

    #[tokio::test(start_paused = true)]
    async fn driver_without_settings_never_fakes_contact() {
        let registry = registry(1000);
        let driver = FakeDriver::new(Duration::from_millis(10));
        driver.no_settings.store(true, Ordering::SeqCst);
        driver.offline.store(true, Ordering::SeqCst);
        let mut events = registry.subscribe();
        registry.upsert(managed("A4CF12F45A11", 10, Arc::clone(&driver)));

        for _ in 0..4 {
            next_update(&mut events).await;
        }
        let state = registry.slot_state(0).await.unwrap();
        assert_eq!(state.ticks, 3);
        assert_eq!(state.full_refreshes, 0);
        let device = registry.get(0).unwrap();
        assert_eq!(device.status(), DeviceStatus::OffLine);
        assert!(device.state().last_contact.is_none());

        // Back online: status polls count as contact, the counter stays put.
        driver.offline.store(false, Ordering::SeqCst);
        next_update(&mut events).await;
        let state = registry.slot_state(0).await.unwrap();
        assert_eq!(state.ticks, 3);
        assert_eq!(state.full_refreshes, 0);
        assert_eq!(state.last_outcome, Some(RefreshOutcome::StatusOnly));
        assert!(registry.get(0).unwrap().state().last_contact.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_firing_publishes_nothing() {
        let registry = registry(1000);
        let driver = FakeDriver::new(Duration::from_millis(500));
        let mut events = registry.subscribe();
        registry.upsert(managed("A4CF12F45A11", 10, Arc::clone(&driver)));
        assert_eq!(events.recv().await.unwrap().kind, RegistryEventKind::Add);

        // Mid-firing: the status poll started at ~1000 ms and takes 500 ms.
        tokio::time::sleep(Duration::from_millis(1200)).await;
        assert_eq!(driver.status_calls.load(Ordering::SeqCst), 1);
        registry.pause(0).unwrap();

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(events.try_recv().is_err());
        assert!(!registry.has_schedule(0));
        assert_eq!(driver.status_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn forced_refresh_never_overlaps_and_reinstalls_timer() {
        let registry = registry(1000);
        let driver = FakeDriver::new(Duration::from_millis(500));
        let mut events = registry.subscribe();
        registry.upsert(managed("A4CF12F45A11", 10, Arc::clone(&driver)));

        tokio::time::sleep(Duration::from_millis(1200)).await;
        // A firing is in flight: a polite request is a no-op.
        assert!(!registry.refresh(0, false).unwrap());
        // A forced one cancels it and runs on its own.
        assert!(registry.refresh(0, true).unwrap());
        assert!(registry.refresh(0, true).unwrap());
        assert_eq!(registry.get(0).unwrap().status(), DeviceStatus::Reading);

        next_update(&mut events).await;
        next_update(&mut events).await;
        assert_eq!(driver.max_in_flight.load(Ordering::SeqCst), 1);
        assert!(registry.has_schedule(0));
        assert_eq!(registry.get(0).unwrap().status(), DeviceStatus::OnLine);

        // Exactly one timer survives the burst: one firing per interval.
        let before = driver.status_calls.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(5500)).await;
        let fired = driver.status_calls.load(Ordering::SeqCst) - before;
        assert!((3..=4).contains(&fired), "fired {fired} times");
    }

    #[tokio::test(start_paused = true)]
    async fn reboot_resumes_polling() {
        let registry = registry(1000);
        let driver = FakeDriver::new(Duration::from_millis(10));
        let mut events = registry.subscribe();
        registry.upsert(managed("A4CF12F45A11", 10, Arc::clone(&driver)));

        registry.reboot(0).unwrap();
        assert_eq!(registry.get(0).unwrap().status(), DeviceStatus::Reading);
        next_update(&mut events).await;
        assert_eq!(driver.reboots.load(Ordering::SeqCst), 1);
        assert!(registry.has_schedule(0));
    }

    #[tokio::test(start_paused = true)]
    async fn reset_stops_spawned_tasks() {
        let scheduler = RefreshScheduler::new(
            Cadence {
                interval: Duration::from_secs(1),
                full_refresh_ticks: 3,
                query_delay: Duration::ZERO,
                reboot_settle: Duration::ZERO,
            },
            4,
        );
        let ran = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        scheduler.spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            flag.store(true, Ordering::SeqCst);
        });
        scheduler.reset();
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(!ran.load(Ordering::SeqCst));
    }
}
