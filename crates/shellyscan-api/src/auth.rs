use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};

use crate::error::Error;

/// Fixed account name used by gen2/gen3 devices for Digest auth.
pub const DIGEST_USER: &str = "admin";

/// Which authentication strategy a device generation expects.
///
/// Marker enum (no data) -- the secret material lives in [`Credentials`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthScheme {
    /// HTTP Basic (legacy gen1 firmware).
    Basic,
    /// HTTP Digest with SHA-256 (gen2 and newer).
    Digest,
}

impl AuthScheme {
    /// Path used to check whether a credential is accepted.
    pub fn probe_path(self) -> &'static str {
        match self {
            Self::Basic => "/settings",
            Self::Digest => "/rpc/Shelly.GetStatus",
        }
    }
}

/// A user/secret pair.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub user: String,
    pub password: SecretString,
}

impl Credentials {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: SecretString::from(password.into()),
        }
    }
}

/// Credentials bound to the scheme a particular device speaks.
#[derive(Debug, Clone)]
pub struct Authorization {
    pub scheme: AuthScheme,
    pub credentials: Credentials,
}

impl Authorization {
    pub fn new(scheme: AuthScheme, credentials: Credentials) -> Self {
        Self {
            scheme,
            credentials,
        }
    }
}

// ── Digest ──────────────────────────────────────────────────────────

/// A parsed `WWW-Authenticate: Digest ...` challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestChallenge {
    pub realm: String,
    pub nonce: String,
    pub qop: Option<String>,
    pub algorithm: String,
    pub opaque: Option<String>,
}

impl DigestChallenge {
    /// Parse the value of a `WWW-Authenticate` header.
    pub fn parse(header: &str) -> Result<Self, Error> {
        let rest = header
            .trim()
            .strip_prefix("Digest")
            .ok_or_else(|| Error::Digest(format!("not a Digest challenge: {header}")))?;

        let mut realm = None;
        let mut nonce = None;
        let mut qop = None;
        let mut algorithm = None;
        let mut opaque = None;

        for (key, value) in split_params(rest) {
            match key.to_ascii_lowercase().as_str() {
                "realm" => realm = Some(value),
                "nonce" => nonce = Some(value),
                "qop" => qop = Some(value),
                "algorithm" => algorithm = Some(value),
                "opaque" => opaque = Some(value),
                _ => {}
            }
        }

        Ok(Self {
            realm: realm.ok_or_else(|| Error::Digest("challenge without realm".into()))?,
            nonce: nonce.ok_or_else(|| Error::Digest("challenge without nonce".into()))?,
            qop,
            algorithm: algorithm.unwrap_or_else(|| "SHA-256".into()),
            opaque,
        })
    }

    /// Build the `Authorization` header value answering this challenge.
    pub fn respond(
        &self,
        method: &str,
        uri: &str,
        credentials: &Credentials,
        cnonce: &str,
    ) -> Result<String, Error> {
        if !self.algorithm.eq_ignore_ascii_case("SHA-256") {
            return Err(Error::Digest(format!(
                "unsupported algorithm {}",
                self.algorithm
            )));
        }

        let nc = "00000001";
        let ha1 = sha256_hex(&format!(
            "{}:{}:{}",
            credentials.user,
            self.realm,
            credentials.password.expose_secret()
        ));
        let ha2 = sha256_hex(&format!("{method}:{uri}"));
        let response = if self.qop.is_some() {
            sha256_hex(&format!("{ha1}:{}:{nc}:{cnonce}:auth:{ha2}", self.nonce))
        } else {
            sha256_hex(&format!("{ha1}:{}:{ha2}", self.nonce))
        };

        let mut header = format!(
            "Digest username=\"{}\", realm=\"{}\", nonce=\"{}\", uri=\"{uri}\", algorithm=SHA-256, response=\"{response}\"",
            credentials.user, self.realm, self.nonce
        );
        if self.qop.is_some() {
            header.push_str(&format!(", qop=auth, nc={nc}, cnonce=\"{cnonce}\""));
        }
        if let Some(ref opaque) = self.opaque {
            header.push_str(&format!(", opaque=\"{opaque}\""));
        }
        Ok(header)
    }
}

pub(crate) fn sha256_hex(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))
}

/// Split `k1="v1", k2=v2` into pairs, honouring commas inside quotes.
fn split_params(input: &str) -> Vec<(String, String)> {
    let mut params = Vec::new();
    let mut current = String::new();
    let mut quoted = false;

    for ch in input.chars() {
        match ch {
            '"' => quoted = !quoted,
            ',' if !quoted => {
                push_param(&mut params, &current);
                current.clear();
            }
            _ => current.push(ch),
        }
    }
    push_param(&mut params, &current);
    params
}

fn push_param(params: &mut Vec<(String, String)>, raw: &str) {
    if let Some((key, value)) = raw.split_once('=') {
        params.push((key.trim().to_owned(), value.trim().to_owned()));
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const CHALLENGE: &str = r#"Digest qop="auth", realm="shellyplus1-a8032ab1e2f4", nonce="60dc59c6", algorithm=SHA-256"#;

    #[test]
    fn parses_shelly_challenge() {
        let challenge = DigestChallenge::parse(CHALLENGE).unwrap();
        assert_eq!(challenge.realm, "shellyplus1-a8032ab1e2f4");
        assert_eq!(challenge.nonce, "60dc59c6");
        assert_eq!(challenge.qop.as_deref(), Some("auth"));
        assert_eq!(challenge.algorithm, "SHA-256");
        assert!(challenge.opaque.is_none());
    }

    #[test]
    fn rejects_basic_challenge() {
        assert!(DigestChallenge::parse(r#"Basic realm="x""#).is_err());
    }

    #[test]
    fn response_follows_rfc7616_with_qop() {
        let challenge = DigestChallenge::parse(CHALLENGE).unwrap();
        let creds = Credentials::new(DIGEST_USER, "secret");
        let header = challenge
            .respond("GET", "/rpc/Shelly.GetStatus", &creds, "abcd")
            .unwrap();

        let ha1 = sha256_hex("admin:shellyplus1-a8032ab1e2f4:secret");
        let ha2 = sha256_hex("GET:/rpc/Shelly.GetStatus");
        let expected = sha256_hex(&format!("{ha1}:60dc59c6:00000001:abcd:auth:{ha2}"));

        assert!(header.starts_with("Digest username=\"admin\""));
        assert!(header.contains(&format!("response=\"{expected}\"")));
        assert!(header.contains("cnonce=\"abcd\""));
    }

    #[test]
    fn md5_challenge_is_unsupported() {
        let challenge =
            DigestChallenge::parse(r#"Digest realm="r", nonce="n", algorithm=MD5"#).unwrap();
        let creds = Credentials::new(DIGEST_USER, "secret");
        assert!(challenge.respond("GET", "/", &creds, "c").is_err());
    }
}
