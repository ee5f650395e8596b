// Device HTTP client
//
// Wraps one pooled `reqwest::Client` shared by every device, with
// per-address request permits, URL construction, auth challenge
// handling and JSON body decoding. Endpoint-specific knowledge
// (which path returns status, which returns settings) lives with the
// drivers in `shellyscan-core`.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use reqwest::header::{AUTHORIZATION, WWW_AUTHENTICATE};
use reqwest::{Method, StatusCode};
use secrecy::ExposeSecret;
use serde_json::Value;
use tokio::sync::Semaphore;
use tracing::{debug, trace};
use url::Url;

use crate::auth::{AuthScheme, Authorization, DigestChallenge};
use crate::error::Error;
use crate::info::DeviceInfo;
use crate::transport::TransportConfig;

/// Raw HTTP client shared across all devices.
///
/// Cheaply cloneable; clones share the connection pool and the
/// per-address permits.
#[derive(Clone)]
pub struct DeviceHttp {
    http: reqwest::Client,
    config: Arc<TransportConfig>,
    /// One semaphore per device address bounding concurrent requests.
    hosts: Arc<DashMap<IpAddr, Arc<Semaphore>>>,
}

impl DeviceHttp {
    /// Create a new client from a `TransportConfig`.
    pub fn new(config: &TransportConfig) -> Result<Self, Error> {
        let http = config.build_client()?;
        Ok(Self::with_client(http, config.clone()))
    }

    /// Create a client around a pre-built `reqwest::Client`.
    pub fn with_client(http: reqwest::Client, config: TransportConfig) -> Self {
        Self {
            http,
            config: Arc::new(config),
            hosts: Arc::new(DashMap::new()),
        }
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Bind this client to one device endpoint.
    pub fn endpoint(&self, address: IpAddr, port: u16) -> Endpoint {
        Endpoint {
            http: self.clone(),
            address,
            port,
            auth: None,
        }
    }

    /// Send the lightweight identification request (`GET /shelly`).
    ///
    /// Fails with [`Error::NotADevice`] when the endpoint answers with
    /// something that is not a device payload.
    pub async fn identify(&self, address: IpAddr, port: u16) -> Result<DeviceInfo, Error> {
        let endpoint = self.endpoint(address, port);
        let raw = endpoint
            .request_json(Method::GET, "/shelly", None, self.config.probe_timeout)
            .await
            .map_err(|e| match e {
                Error::Http { status, .. } => Error::NotADevice {
                    address: endpoint.authority(),
                    reason: format!("HTTP {status}"),
                },
                Error::Deserialization { message, .. } => Error::NotADevice {
                    address: endpoint.authority(),
                    reason: message,
                },
                other => other,
            })?;
        DeviceInfo::from_value(&endpoint.authority(), raw)
    }

    fn permits_for(&self, address: IpAddr) -> Arc<Semaphore> {
        let max = self.config.max_connections_per_host.max(1);
        Arc::clone(
            self.hosts
                .entry(address)
                .or_insert_with(|| Arc::new(Semaphore::new(max)))
                .value(),
        )
    }
}

/// A device endpoint: address, port, and optional credentials.
#[derive(Clone)]
pub struct Endpoint {
    http: DeviceHttp,
    address: IpAddr,
    port: u16,
    auth: Option<Authorization>,
}

impl Endpoint {
    /// Attach credentials to every subsequent request.
    pub fn with_auth(mut self, auth: Option<Authorization>) -> Self {
        self.auth = auth;
        self
    }

    pub fn address(&self) -> IpAddr {
        self.address
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn auth(&self) -> Option<&Authorization> {
        self.auth.as_ref()
    }

    /// `host:port`, with brackets for IPv6.
    pub fn authority(&self) -> String {
        SocketAddr::new(self.address, self.port).to_string()
    }

    fn url(&self, path: &str) -> Result<Url, Error> {
        Ok(Url::parse(&format!("http://{}{path}", self.authority()))?)
    }

    // ── Request helpers ──────────────────────────────────────────────

    /// Send a GET request and decode the JSON body.
    pub async fn get_json(&self, path: &str) -> Result<Value, Error> {
        let timeout = self.http.config.request_timeout;
        self.request_json(Method::GET, path, None, timeout).await
    }

    /// Send a POST request with a JSON body and decode the JSON reply.
    pub async fn post_json(&self, path: &str, body: &Value) -> Result<Value, Error> {
        let timeout = self.http.config.request_timeout;
        self.request_json(Method::POST, path, Some(body), timeout)
            .await
    }

    /// Issue a GET and report only whether the device accepted it.
    ///
    /// Used to test a credential without caring about the body.
    pub async fn check(&self, path: &str) -> Result<bool, Error> {
        let timeout = self.http.config.request_timeout;
        let resp = self.send(Method::GET, path, None, timeout).await?;
        Ok(resp.status() == StatusCode::OK)
    }

    async fn request_json(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        timeout: Duration,
    ) -> Result<Value, Error> {
        let resp = self.send(method, path, body, timeout).await?;
        parse_body(resp, timeout).await
    }

    /// Send a request, answering a Digest challenge when one comes back.
    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        timeout: Duration,
    ) -> Result<reqwest::Response, Error> {
        let url = self.url(path)?;
        let permits = self.http.permits_for(self.address);
        // The semaphore is never closed, so a failed acquire cannot happen.
        let _permit = permits.acquire().await.ok();

        trace!("{method} {url}");

        let build = |authorization: Option<String>| {
            let mut builder = self
                .http
                .http
                .request(method.clone(), url.clone())
                .timeout(timeout);
            if let Some(json) = body {
                builder = builder.json(json);
            }
            match (&self.auth, authorization) {
                (_, Some(header)) => builder.header(AUTHORIZATION, header),
                (Some(auth), None) if auth.scheme == AuthScheme::Basic => builder.basic_auth(
                    &auth.credentials.user,
                    Some(auth.credentials.password.expose_secret()),
                ),
                _ => builder,
            }
        };

        let resp = build(None)
            .send()
            .await
            .map_err(|e| map_transport(e, timeout))?;

        let Some(auth) = self
            .auth
            .as_ref()
            .filter(|a| a.scheme == AuthScheme::Digest)
        else {
            return Ok(resp);
        };
        if resp.status() != StatusCode::UNAUTHORIZED {
            return Ok(resp);
        }

        let challenge = resp
            .headers()
            .get(WWW_AUTHENTICATE)
            .and_then(|v| v.to_str().ok())
            .ok_or(Error::Authentication { status: 401 })
            .and_then(DigestChallenge::parse)?;
        let cnonce = format!("{:016x}", rand::random::<u64>());
        let header = challenge.respond(method.as_str(), path, &auth.credentials, &cnonce)?;

        debug!(address = %self.address, "answering digest challenge");
        build(Some(header))
            .send()
            .await
            .map_err(|e| map_transport(e, timeout))
    }
}

fn map_transport(err: reqwest::Error, timeout: Duration) -> Error {
    if err.is_timeout() {
        Error::Timeout {
            timeout_secs: timeout.as_secs(),
        }
    } else {
        Error::Transport(err)
    }
}

/// Map the status line and decode the JSON body.
async fn parse_body(resp: reqwest::Response, timeout: Duration) -> Result<Value, Error> {
    let status = resp.status();

    if status == StatusCode::UNAUTHORIZED {
        return Err(Error::Authentication {
            status: status.as_u16(),
        });
    }

    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(Error::Http {
            status: status.as_u16(),
            body: body.chars().take(200).collect(),
        });
    }

    let body = resp.text().await.map_err(|e| map_transport(e, timeout))?;
    serde_json::from_str(&body).map_err(|e| {
        let preview: String = body.chars().take(200).collect();
        Error::Deserialization {
            message: format!("{e} (body preview: {preview:?})"),
            body,
        }
    })
}
