// ── Device identification ──
//
// Probe → classify → authenticate → materialize. Every failure is
// contained here: the caller gets a device (possibly a degraded one) or
// nothing, never an error.

use std::sync::Arc;
use std::time::Duration;

use shellyscan_api::auth::DIGEST_USER;
use shellyscan_api::{AuthScheme, Authorization, Credentials, DeviceHttp, DeviceInfo, Endpoint};
use tokio::sync::Mutex;
use tracing::{debug, error, trace, warn};

use crate::driver::{DriverCore, Family, classify};
use crate::error::CoreError;
use crate::model::{Device, DeviceStatus, Locator, MacAddress};
use crate::scanner::Candidate;

// ── Credentials ─────────────────────────────────────────────────────

/// What the credential provider is asked for.
#[derive(Debug, Clone)]
pub struct CredentialRequest {
    /// Hostname of the device being authenticated.
    pub device: String,
    pub scheme: AuthScheme,
    /// A previous answer for this device was rejected.
    pub retry: bool,
}

/// Supplies credentials for protected devices.
///
/// Called from a blocking thread, possibly several times in a row for the
/// same device. Returning `None` aborts authentication for that device.
pub trait CredentialProvider: Send + Sync {
    fn credentials(&self, request: &CredentialRequest) -> Option<Credentials>;
}

/// Provider for non-interactive runs: never has credentials.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCredentials;

impl CredentialProvider for NoCredentials {
    fn credentials(&self, _request: &CredentialRequest) -> Option<Credentials> {
        None
    }
}

/// The most recently accepted credential, shared by every identification.
///
/// The lock is held for a whole negotiation, so protected devices are
/// authenticated one at a time and each tries the latest credential
/// before the provider is asked again. Set whenever the provider answers;
/// never cleared.
#[derive(Debug, Default)]
pub struct CredentialGate {
    last: Mutex<Option<Credentials>>,
}

impl CredentialGate {
    pub fn new(initial: Option<Credentials>) -> Self {
        Self {
            last: Mutex::new(initial),
        }
    }

    pub async fn last(&self) -> Option<Credentials> {
        self.last.lock().await.clone()
    }
}

fn authorization(scheme: AuthScheme, credentials: &Credentials) -> Authorization {
    let credentials = match scheme {
        AuthScheme::Basic => credentials.clone(),
        AuthScheme::Digest => Credentials {
            user: DIGEST_USER.to_owned(),
            password: credentials.password.clone(),
        },
    };
    Authorization::new(scheme, credentials)
}

// ── DeviceIdentifier ────────────────────────────────────────────────

/// A freshly materialized device plus the extender ports to probe next.
#[derive(Debug)]
pub struct Identified {
    pub device: Device,
    pub extender_ports: Vec<u16>,
}

impl Identified {
    fn alone(device: Device) -> Self {
        Self {
            device,
            extender_ports: Vec::new(),
        }
    }
}

pub struct DeviceIdentifier {
    http: DeviceHttp,
    provider: Arc<dyn CredentialProvider>,
    gate: Arc<CredentialGate>,
    query_delay: Duration,
    extender_probe: bool,
}

impl DeviceIdentifier {
    pub fn new(
        http: DeviceHttp,
        provider: Arc<dyn CredentialProvider>,
        gate: Arc<CredentialGate>,
        query_delay: Duration,
        extender_probe: bool,
    ) -> Self {
        Self {
            http,
            provider,
            gate,
            query_delay,
            extender_probe,
        }
    }

    /// Identify one candidate.
    ///
    /// Timeouts drop the candidate. Other transport or protocol failures
    /// yield an error-carrying placeholder when the candidate is forced,
    /// and nothing otherwise.
    pub async fn identify(&self, candidate: &Candidate) -> Option<Identified> {
        let locator = &candidate.locator;
        match self.http.identify(locator.address, locator.port).await {
            Ok(info) => Some(self.materialize(locator.clone(), &info).await),
            Err(e) if e.is_timeout() => {
                trace!(address = %locator, "identification timed out");
                None
            }
            Err(e) if candidate.force() => {
                debug!(address = %locator, error = %e, "identification failed, tracking placeholder");
                let core = DriverCore::new(
                    self.http.endpoint(locator.address, locator.port),
                    self.query_delay,
                );
                let driver = Family::Probe.driver(core, false);
                let err = CoreError::from(e);
                Some(Identified::alone(Device::placeholder(
                    locator.clone(),
                    Some(driver),
                    &err,
                )))
            }
            Err(e) => {
                trace!(address = %locator, error = %e, "not a device");
                None
            }
        }
    }

    async fn materialize(&self, locator: Locator, info: &DeviceInfo) -> Identified {
        let class = classify(info);
        let mac = MacAddress::new(&info.mac);
        let endpoint = self.http.endpoint(locator.address, locator.port);
        let battery = class.model.battery;

        let auth = if info.auth_required {
            match self
                .negotiate(&endpoint, class.family.auth_scheme(), &locator.hostname)
                .await
            {
                Ok(auth) => {
                    tokio::time::sleep(self.query_delay).await;
                    auth
                }
                Err(e) => {
                    error!(address = %locator, error = %e, "device construction failed");
                    let core = DriverCore::new(endpoint, self.query_delay);
                    return Identified::alone(Device::unmanaged(
                        mac,
                        locator,
                        class.generation,
                        class.model,
                        Some(class.family.driver(core, battery)),
                        Some(e.to_string()),
                    ));
                }
            }
        } else {
            None
        };

        let logged_out = info.auth_required && auth.is_none();
        let core = DriverCore::new(endpoint.with_auth(auth), self.query_delay);
        let driver = class.family.driver(core, battery);
        let device = if class.managed {
            Device::managed(mac, locator, class.generation, class.model, Arc::clone(&driver))
        } else {
            Device::unmanaged(
                mac,
                locator,
                class.generation,
                class.model,
                Some(Arc::clone(&driver)),
                None,
            )
        };

        if logged_out {
            device.set_status(DeviceStatus::NotLogged);
        } else {
            self.initialize(&device).await;
        }

        let extender_ports = if self.extender_probe
            && class.family == Family::Rpc
            && device.state().extender
        {
            driver.extender_ports().await.unwrap_or_else(|e| {
                debug!(mac = %device.mac(), error = %e, "extender ports unavailable");
                Vec::new()
            })
        } else {
            Vec::new()
        };

        debug!(mac = %device.mac(), address = %device.locator(), model = %device.model().type_id, "device identified");
        Identified {
            device,
            extender_ports,
        }
    }

    /// First full read after construction. Failures only set the status.
    async fn initialize(&self, device: &Device) {
        let result = async {
            device.refresh_settings().await?;
            tokio::time::sleep(self.query_delay).await;
            device.refresh_status().await
        }
        .await;

        if let Err(e) = result {
            if !e.is_auth() {
                warn!(mac = %device.mac(), address = %device.locator(), error = %e, "initial read failed");
            }
        }
    }

    /// Find a credential the device accepts.
    ///
    /// `Ok(None)` means the provider gave up. Transport errors while
    /// testing a credential are returned as-is.
    async fn negotiate(
        &self,
        endpoint: &Endpoint,
        scheme: AuthScheme,
        hostname: &str,
    ) -> Result<Option<Authorization>, CoreError> {
        let mut last = self.gate.last.lock().await;
        let probe_path = scheme.probe_path();

        if let Some(ref credentials) = *last {
            let auth = authorization(scheme, credentials);
            if endpoint
                .clone()
                .with_auth(Some(auth.clone()))
                .check(probe_path)
                .await?
            {
                return Ok(Some(auth));
            }
        }

        let mut retry = false;
        loop {
            let provider = Arc::clone(&self.provider);
            let request = CredentialRequest {
                device: hostname.to_owned(),
                scheme,
                retry,
            };
            let answer = tokio::task::spawn_blocking(move || provider.credentials(&request))
                .await
                .map_err(|e| CoreError::Internal(format!("credential provider failed: {e}")))?;

            let Some(credentials) = answer else {
                debug!(device = hostname, "authentication aborted");
                return Ok(None);
            };
            let auth = authorization(scheme, &credentials);
            *last = Some(credentials);

            if endpoint
                .clone()
                .with_auth(Some(auth.clone()))
                .check(probe_path)
                .await?
            {
                return Ok(Some(auth));
            }
            retry = true;
        }
    }
}
