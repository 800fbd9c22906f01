use std::env;
use std::fmt;

use serde::Deserialize;

use crate::{Error, Result};

pub const ENV_USERNAME: &str = "ICOMFORT_USERNAME";
pub const ENV_PASSWORD: &str = "ICOMFORT_PASSWORD";
pub const ENV_GATEWAY_SN: &str = "ICOMFORT_GATEWAY_SN";

/// Account credentials and gateway serial as stored by the host.
#[derive(Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialConfig {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub device_id: Option<String>,
}

impl CredentialConfig {
    pub fn new(
        username: impl Into<String>,
        password: impl Into<String>,
        device_id: impl Into<String>,
    ) -> Self {
        Self {
            username: Some(username.into()),
            password: Some(password.into()),
            device_id: Some(device_id.into()),
        }
    }

    /// Reads `ICOMFORT_USERNAME`, `ICOMFORT_PASSWORD` and `ICOMFORT_GATEWAY_SN`.
    /// Empty variables count as unset.
    pub fn from_env() -> Self {
        let var = |name: &str| env::var(name).ok().filter(|v| !v.trim().is_empty());
        Self {
            username: var(ENV_USERNAME),
            password: var(ENV_PASSWORD),
            device_id: var(ENV_GATEWAY_SN),
        }
    }
}

impl fmt::Debug for CredentialConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialConfig")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[redacted]"))
            .field("device_id", &self.device_id)
            .finish()
    }
}

/// Resolved credentials for a single dispatch.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    /// Empty when not configured; only `systemInfo` works without it.
    pub device_id: String,
}

impl Credentials {
    pub fn device_id(&self) -> Option<&str> {
        Some(self.device_id.as_str()).filter(|d| !d.is_empty())
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"[redacted]")
            .field("device_id", &self.device_id)
            .finish()
    }
}

/// Device serial presence is checked by the dispatcher, not here.
pub fn resolve(source: Option<&CredentialConfig>) -> Result<Credentials> {
    let source = source.ok_or(Error::Configuration)?;
    let non_empty = |v: &Option<String>| {
        v.as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    let username = non_empty(&source.username).ok_or(Error::Credentials)?;
    let password = source
        .password
        .clone()
        .filter(|p| !p.is_empty())
        .ok_or(Error::Credentials)?;

    Ok(Credentials {
        username,
        password,
        device_id: non_empty(&source.device_id).unwrap_or_default(),
    })
}
