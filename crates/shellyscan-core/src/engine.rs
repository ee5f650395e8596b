// ── Discovery engine ──
//
// Facade wiring scanner, identifier, registry, scheduler and ghost store.
// Every per-device operation runs as a pool task; the public methods only
// schedule work and return.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use shellyscan_api::DeviceHttp;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use crate::config::{EngineConfig, ScanMode};
use crate::driver::{BackupOutcome, DeviceCommand};
use crate::error::CoreError;
use crate::ghost::GhostStore;
use crate::identify::{CredentialGate, CredentialProvider, DeviceIdentifier};
use crate::model::{Device, DeviceKind, DeviceStatus, GhostRecord, Locator};
use crate::registry::{DeviceRegistry, RegistryEvent};
use crate::scanner::{Candidate, CandidateSource, NetworkScanner, is_reachable};
use crate::scheduler::{Cadence, RefreshScheduler};

/// The main entry point for consumers.
///
/// Cheaply cloneable via `Arc<EngineInner>`. Construction does no I/O;
/// call [`start`](Self::start) to load the store and begin discovery.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    config: EngineConfig,
    identifier: DeviceIdentifier,
    registry: Arc<DeviceRegistry>,
    scanner: NetworkScanner,
    store: GhostStore,
    /// Outlives rescans; cancelled by [`Engine::close`].
    cancel: CancellationToken,
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        provider: Arc<dyn CredentialProvider>,
    ) -> Result<Self, CoreError> {
        let http = DeviceHttp::new(&config.transport)?;
        let identifier = DeviceIdentifier::new(
            http,
            provider,
            Arc::new(CredentialGate::default()),
            config.query_delay,
            config.extender_probe,
        );
        let scheduler = RefreshScheduler::new(
            Cadence {
                interval: config.refresh_interval,
                full_refresh_ticks: config.full_refresh_ticks.max(1),
                query_delay: config.query_delay,
                reboot_settle: config.reboot_settle,
            },
            config.pool_size,
        );
        let scanner = NetworkScanner::new(
            config.scan.clone(),
            config.probe_port,
            config.probe_stagger,
            config.liveness_timeout,
        );

        Ok(Self {
            inner: Arc::new(EngineInner {
                identifier,
                registry: DeviceRegistry::new(Arc::new(scheduler)),
                scanner,
                store: GhostStore::new(),
                cancel: CancellationToken::new(),
                config,
            }),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.inner.registry
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.inner.registry.subscribe()
    }

    pub fn devices(&self) -> Vec<Arc<Device>> {
        self.inner.registry.devices()
    }

    pub fn get(&self, index: usize) -> Option<Arc<Device>> {
        self.inner.registry.get(index)
    }

    fn device(&self, index: usize) -> Result<Arc<Device>, CoreError> {
        self.get(index).ok_or(CoreError::DeviceNotFound { index })
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Load the ghost store (if configured) and start discovery.
    ///
    /// Passive mode returns once browsing is up; an active sweep is
    /// scheduled and runs in the background. `READY` is emitted either way.
    pub async fn start(&self) -> Result<(), CoreError> {
        if let Some(path) = self.inner.config.store_path.clone() {
            self.load_store(&path).await?;
        }

        match self.inner.config.scan {
            ScanMode::Mdns => {
                let (tx, rx) = mpsc::unbounded_channel();
                self.inner
                    .scanner
                    .start(tx, self.inner.cancel.child_token())?;
                tokio::spawn(candidate_pump(self.clone(), rx, self.inner.cancel.clone()));
                info!("passive discovery started");

                if let Some(delay) = self.inner.config.auto_reconnect {
                    let engine = self.clone();
                    self.inner
                        .registry
                        .scheduler()
                        .spawn_after(delay, async move { engine.reconnect_ghosts() });
                }
            }
            ScanMode::Range { .. } => {
                info!(addresses = self.inner.scanner.candidates().len(), "active sweep started");
                self.sweep();
            }
        }

        self.inner.registry.notify_ready();
        Ok(())
    }

    /// Clear the registry and discover again.
    ///
    /// With `use_store`, the registry is snapshotted before the clear and
    /// the snapshot is reconciled back as ghosts, which live rediscovery
    /// then replaces.
    pub fn rescan(&self, use_store: bool) {
        trace!(use_store, "rescan");
        let ghosts = use_store.then(|| self.inner.store.snapshot(&self.devices()));

        self.inner.registry.clear();

        match self.inner.scanner.mode() {
            ScanMode::Mdns => {
                for candidate in self.inner.scanner.candidates() {
                    self.discover(candidate);
                }
            }
            ScanMode::Range { .. } => self.sweep(),
        }

        if let Some(ghosts) = ghosts {
            GhostStore::reconcile(&self.inner.registry, &ghosts);
        }
        debug!("end scan");
        self.inner.registry.notify_ready();
    }

    /// Stop every task and shut discovery down. The registry keeps its
    /// last contents but nothing updates it any more.
    pub fn close(&self) {
        self.inner.cancel.cancel();
        self.inner.registry.scheduler().shutdown();
        self.inner.scanner.close();
        debug!("engine closed");
    }

    // ── Discovery ────────────────────────────────────────────────────

    /// Identify a candidate in the background and register the result.
    pub fn discover(&self, candidate: Candidate) {
        let engine = self.clone();
        self.inner
            .registry
            .scheduler()
            .spawn(async move { engine.register(candidate).await });
    }

    async fn register(&self, candidate: Candidate) {
        let Some(identified) = self.inner.identifier.identify(&candidate).await else {
            return;
        };
        let locator = identified.device.locator().clone();
        let outcome = self.inner.registry.upsert(identified.device);
        trace!(address = %locator, ?outcome, "registered");
        self.probe_extenders(&locator, identified.extender_ports);
    }

    /// Each secondary port of a range extender is identified on its own.
    fn probe_extenders(&self, parent: &Locator, ports: Vec<u16>) {
        for port in ports {
            debug!(address = %parent, port, "probing extender port");
            let locator = Locator::new(
                parent.address,
                port,
                format!("{}-EX:{port}", parent.hostname),
            );
            self.discover(Candidate::new(locator, CandidateSource::Extender));
        }
    }

    /// Schedule one reachability check and probe per range address.
    fn sweep(&self) {
        let scanner = &self.inner.scanner;
        let liveness = scanner.liveness_timeout();
        let query_delay = self.inner.config.query_delay;

        let mut delay = Duration::ZERO;
        for candidate in scanner.candidates() {
            let engine = self.clone();
            self.inner.registry.scheduler().spawn_after(delay, async move {
                let locator = &candidate.locator;
                if is_reachable(SocketAddr::new(locator.address, locator.port), liveness).await {
                    tokio::time::sleep(query_delay).await;
                    engine.register(candidate).await;
                } else {
                    trace!(address = %locator, "no answer");
                }
            });
            delay += scanner.stagger();
        }
    }

    /// Re-probe mains-powered ghosts that sit on the probe port (80 unless
    /// configured otherwise).
    pub fn reconnect_ghosts(&self) {
        debug!("starting ghosts reconnect");
        let stagger = self.inner.scanner.stagger();
        let port = self.inner.config.probe_port;
        let mut delay = Duration::ZERO;
        for device in self.devices() {
            if !device.is_ghost() || device.is_battery() || device.port() != port {
                continue;
            }
            let locator = Locator::new(device.address(), device.port(), device.address().to_string());
            let engine = self.clone();
            self.inner.registry.scheduler().spawn_after(delay, async move {
                engine
                    .register(Candidate::new(locator, CandidateSource::GhostReconnect))
                    .await;
            });
            delay += stagger;
        }
    }

    // ── Per-device operations ────────────────────────────────────────

    /// Refresh a device now; see [`DeviceRegistry::refresh`].
    ///
    /// A device whose classification failed is identified again from its
    /// address instead of being polled, and replaced in place on success.
    pub fn refresh(&self, index: usize, force: bool) -> Result<bool, CoreError> {
        let device = self.device(index)?;
        if !matches!(device.kind(), DeviceKind::Unmanaged { error: Some(_) }) {
            return self.inner.registry.refresh(index, force);
        }
        if device.status() == DeviceStatus::Reading && !force {
            return Ok(false);
        }

        let registry = &self.inner.registry;
        let key = registry
            .key_at(index)
            .ok_or(CoreError::DeviceNotFound { index })?;
        registry.pause_key(key);

        let engine = self.clone();
        let candidate = Candidate::new(device.locator().clone(), CandidateSource::Refresh);
        registry.scheduler().spawn(async move {
            let registry = &engine.inner.registry;
            match engine.inner.identifier.identify(&candidate).await {
                Some(identified) => {
                    let locator = identified.device.locator().clone();
                    registry.upgrade(key, identified.device);
                    engine.probe_extenders(&locator, identified.extender_ports);
                }
                None => registry.restore(key),
            }
        });
        Ok(true)
    }

    pub fn pause(&self, index: usize) -> Result<(), CoreError> {
        self.inner.registry.pause(index)
    }

    pub fn reboot(&self, index: usize) -> Result<(), CoreError> {
        self.inner.registry.reboot(index)
    }

    pub fn remove(&self, index: usize) -> Result<Arc<Device>, CoreError> {
        self.inner.registry.remove(index)
    }

    pub async fn send_command(
        &self,
        index: usize,
        command: &DeviceCommand,
    ) -> Result<serde_json::Value, CoreError> {
        let device = self.device(index)?;
        let driver = device.driver().ok_or_else(|| CoreError::Unsupported {
            operation: command.method.clone(),
        })?;
        driver.send_command(command).await
    }

    /// Save the device configuration to `target`.
    pub async fn backup(&self, index: usize, target: &Path) -> Result<BackupOutcome, CoreError> {
        let device = self.device(index)?;
        let driver = device.driver().ok_or_else(|| CoreError::Unsupported {
            operation: "backup".into(),
        })?;
        driver.backup(target).await
    }

    // ── Ghost store ──────────────────────────────────────────────────

    /// Load ghosts from `path` and add those not already present.
    pub async fn load_store(&self, path: &Path) -> Result<usize, CoreError> {
        let records = self.inner.store.load(path).await?;
        Ok(GhostStore::reconcile(&self.inner.registry, &records))
    }

    /// Snapshot the registry to `path`. Returns the number of records.
    pub async fn save_store(&self, path: &Path) -> Result<usize, CoreError> {
        let records = self.inner.store.snapshot(&self.devices());
        let count = records.len();
        self.inner.store.persist(path, records).await?;
        Ok(count)
    }

    /// The ghost record (with note) for the device at `index`.
    pub fn ghost(&self, index: usize) -> Result<GhostRecord, CoreError> {
        let device = self.device(index)?;
        Ok(self.inner.store.ghost(&device))
    }

    pub fn set_note(&self, index: usize, note: impl Into<String>) -> Result<(), CoreError> {
        let device = self.device(index)?;
        self.inner.store.set_note(&device, note);
        Ok(())
    }

    // ── Runtime configuration ────────────────────────────────────────

    /// New cadence for timers installed from now on.
    pub fn set_refresh_time(&self, interval: Duration, full_refresh_ticks: u32) {
        self.inner
            .registry
            .scheduler()
            .set_cadence(interval, full_refresh_ticks);
    }

    /// New host range for the next active sweep.
    pub fn set_range(&self, first: u8, last: u8) {
        self.inner.scanner.set_range(first, last);
    }
}

/// Feeds passive-discovery candidates into identification.
async fn candidate_pump(
    engine: Engine,
    mut rx: mpsc::UnboundedReceiver<Candidate>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            candidate = rx.recv() => {
                let Some(candidate) = candidate else { break };
                engine.discover(candidate);
            }
        }
    }
}
