use std::collections::BTreeMap;
use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use reqwest::{Method, Url};
use serde::Serialize;
use serde_json::Value;

use crate::credentials::Credentials;
use crate::types::WriteState;
use crate::{Error, Result};

pub const DEFAULT_BASE_URL: &str = "https://services.myicomfort.com/DBAcessService.svc";
pub const CONTENT_TYPE_JSON: &str = "application/json; charset=utf-8";
pub const REDACTED_AUTH: &str = "Basic [redacted]";

pub const PATH_STATE_LIST: &str = "GetTStatInfoList";
pub const PATH_SYSTEM_INFO: &str = "GetSystemsInfo";
pub const PATH_WRITE_STATE: &str = "SetTStatInfo";
pub const PATH_AWAY_MODE: &str = "SetAwayModeNew";

const TEMP_UNIT_FAHRENHEIT: &str = "0";
const CANCEL_AWAY_NO_CHANGE: &str = "-1";

/// A fully-formed vendor call. Building one performs no I/O.
pub struct VendorRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Value>,
}

impl VendorRequest {
    /// Debug representation with the authorization header replaced by a placeholder.
    pub fn debug(&self) -> RequestDebug {
        let headers = self
            .headers
            .iter()
            .map(|(name, value)| {
                let shown = if name == AUTHORIZATION {
                    REDACTED_AUTH.to_string()
                } else {
                    value.to_str().unwrap_or_default().to_string()
                };
                (name.as_str().to_string(), shown)
            })
            .collect();
        RequestDebug {
            url: self.url.to_string(),
            method: self.method.to_string(),
            body: self.body.clone(),
            headers,
        }
    }
}

impl fmt::Debug for VendorRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.debug(), f)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestDebug {
    pub url: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    pub headers: BTreeMap<String, String>,
}

/// Debug object returned alongside every dispatch result or failure.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DebugInfo {
    pub dispatch_id: String,
    pub request: RequestDebug,
    pub status: u16,
    pub status_text: String,
    /// Raw response text, only set on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

/// Body of the full-state write. The vendor rejects a numeric `Pref_Temp_Units`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WriteStateBody {
    #[serde(rename = "Cool_Set_Point", skip_serializing_if = "Option::is_none")]
    pub cool_set_point: Option<String>,
    #[serde(rename = "Heat_Set_Point", skip_serializing_if = "Option::is_none")]
    pub heat_set_point: Option<String>,
    #[serde(rename = "Fan_Mode", skip_serializing_if = "Option::is_none")]
    pub fan_mode: Option<i64>,
    #[serde(rename = "Operation_Mode", skip_serializing_if = "Option::is_none")]
    pub operation_mode: Option<i64>,
    #[serde(rename = "Zone_Number")]
    pub zone_number: u32,
    #[serde(rename = "GatewaySN")]
    pub gateway_sn: String,
    #[serde(rename = "Pref_Temp_Units")]
    pub pref_temp_units: &'static str,
}

/// Fixed two-decimal setpoint with ties rounded away from zero (70.125 -> "70.13").
fn two_decimals(v: f64) -> String {
    format!("{:.2}", (v * 100.0).round() / 100.0)
}

impl WriteStateBody {
    pub fn new(device_id: &str, state: &WriteState) -> Self {
        Self {
            cool_set_point: state.cooling_setpoint.map(two_decimals),
            heat_set_point: state.heating_setpoint.map(two_decimals),
            fan_mode: state.fan_mode.map(|m| m.code()),
            operation_mode: state.mode.map(|m| m.code()),
            zone_number: state.zone_number,
            gateway_sn: device_id.to_string(),
            pref_temp_units: TEMP_UNIT_FAHRENHEIT,
        }
    }
}

pub fn basic_auth(username: &str, password: &str) -> Result<HeaderValue> {
    let encoded = STANDARD.encode(format!("{username}:{password}"));
    let mut value = HeaderValue::from_str(&format!("Basic {encoded}"))
        .map_err(|_| Error::Credentials)?;
    value.set_sensitive(true);
    Ok(value)
}

fn headers(creds: &Credentials) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(AUTHORIZATION, basic_auth(&creds.username, &creds.password)?);
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(CONTENT_TYPE_JSON));
    Ok(headers)
}

fn endpoint(base_url: &str, path: &str, query: &[(&str, &str)]) -> Result<Url> {
    let raw = format!("{}/{path}", base_url.trim_end_matches('/'));
    let parsed = if query.is_empty() {
        Url::parse(&raw)
    } else {
        Url::parse_with_params(&raw, query)
    };
    parsed.map_err(|e| Error::InvalidUrl(format!("{raw}: {e}")))
}

pub fn refresh_request(base_url: &str, creds: &Credentials, device_id: &str) -> Result<VendorRequest> {
    Ok(VendorRequest {
        method: Method::GET,
        url: endpoint(
            base_url,
            PATH_STATE_LIST,
            &[
                ("GatewaySN", device_id),
                ("TempUnit", TEMP_UNIT_FAHRENHEIT),
                ("Cancel_Away", CANCEL_AWAY_NO_CHANGE),
            ],
        )?,
        headers: headers(creds)?,
        body: None,
    })
}

pub fn system_info_request(base_url: &str, creds: &Credentials) -> Result<VendorRequest> {
    Ok(VendorRequest {
        method: Method::GET,
        url: endpoint(base_url, PATH_SYSTEM_INFO, &[("userID", creds.username.as_str())])?,
        headers: headers(creds)?,
        body: None,
    })
}

pub fn write_state_request(
    base_url: &str,
    creds: &Credentials,
    device_id: &str,
    state: &WriteState,
) -> Result<VendorRequest> {
    let body = serde_json::to_value(WriteStateBody::new(device_id, state))?;
    Ok(VendorRequest {
        method: Method::PUT,
        url: endpoint(base_url, PATH_WRITE_STATE, &[])?,
        headers: headers(creds)?,
        body: Some(body),
    })
}

/// All parameters travel in the query string; the body is empty.
pub fn away_mode_request(
    base_url: &str,
    creds: &Credentials,
    device_id: &str,
    away: bool,
) -> Result<VendorRequest> {
    Ok(VendorRequest {
        method: Method::PUT,
        url: endpoint(
            base_url,
            PATH_AWAY_MODE,
            &[
                ("gatewaysn", device_id),
                ("zonenumber", "0"),
                ("awaymode", if away { "1" } else { "0" }),
            ],
        )?,
        headers: headers(creds)?,
        body: None,
    })
}
