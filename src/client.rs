use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{Instrument, debug, debug_span, error, trace, warn};
use uuid::Uuid;

use crate::credentials::{self, CredentialConfig, Credentials};
use crate::logger::{MessageLogMode, MessageLogger};
use crate::protocol::{self, DEFAULT_BASE_URL, DebugInfo, VendorRequest};
use crate::store::{StateStore, state_key};
use crate::timestamp;
use crate::types::*;
use crate::{Error, Result};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

const MIN_SETPOINT_GAP: f64 = 2.0;
const DEFAULT_HEAT_SETPOINT: f64 = 70.0;
const DEFAULT_COOL_SETPOINT: f64 = 75.0;

const RETURN_STATUS_OK: &str = "SUCCESS";

/// Static per-instance settings: defaults for calls that omit them, polling, mirroring.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AdapterOptions {
    pub default_command: Command,
    pub defaults: CommandParams,
    /// Seconds between polls; 0 disables polling.
    pub polling_secs: u64,
    pub poll_command: Command,
    /// Write the primary state record into the state store after each successful refresh or write.
    pub mirror_state: bool,
}

impl Default for AdapterOptions {
    fn default() -> Self {
        Self {
            default_command: Command::SystemInfo,
            defaults: CommandParams::default(),
            polling_secs: 0,
            poll_command: Command::Refresh,
            mirror_state: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DispatchResult {
    pub data: Value,
    pub debug: DebugInfo,
}

impl DispatchResult {
    /// Decoded `tStatInfo` records, empty for responses without any.
    pub fn states(&self) -> Vec<ThermostatState> {
        match self.data.get("tStatInfo") {
            Some(Value::Array(records)) => records.iter().map(ThermostatState::from_record).collect(),
            _ => Vec::new(),
        }
    }
}

/// Result of [`IComfortClient::handle`]. Failures are carried, never raised.
#[derive(Debug)]
pub struct Outcome {
    pub command: String,
    pub payload: Value,
    pub debug: Option<DebugInfo>,
    pub error: Option<Error>,
}

impl Outcome {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    pub fn error_message(&self) -> Option<String> {
        self.error.as_ref().map(|e| e.to_string())
    }

    /// Host-facing message: `{command, payload, debug, error}`.
    pub fn to_message(&self) -> Value {
        json!({
            "command": self.command,
            "payload": self.payload,
            "debug": self.debug,
            "error": self.error_message(),
        })
    }
}

pub struct IComfortClientBuilder {
    base_url: String,
    credentials: Option<CredentialConfig>,
    timeout: Duration,
    options: AdapterOptions,
    store: Option<Arc<dyn StateStore>>,
    log_mode: Option<MessageLogMode>,
    log_path: Option<String>,
}

impl IComfortClientBuilder {
    pub fn new() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            credentials: None,
            timeout: DEFAULT_TIMEOUT,
            options: AdapterOptions::default(),
            store: None,
            log_mode: None,
            log_path: None,
        }
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn credentials(mut self, credentials: CredentialConfig) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn options(mut self, options: AdapterOptions) -> Self {
        self.options = options;
        self
    }

    pub fn default_command(mut self, command: Command) -> Self {
        self.options.default_command = command;
        self
    }

    pub fn defaults(mut self, params: CommandParams) -> Self {
        self.options.defaults = params;
        self
    }

    pub fn polling(mut self, secs: u64) -> Self {
        self.options.polling_secs = secs;
        self
    }

    /// Enables mirroring of the primary state record into `store`.
    pub fn mirror_state(mut self, store: Arc<dyn StateStore>) -> Self {
        self.store = Some(store);
        self.options.mirror_state = true;
        self
    }

    pub fn message_log(mut self, mode: MessageLogMode, path: impl Into<String>) -> Self {
        self.log_mode = Some(mode);
        self.log_path = Some(path.into());
        self
    }

    pub fn build(self) -> Result<IComfortClient> {
        let http = reqwest::Client::builder().timeout(self.timeout).build()?;

        let logger = match (self.log_mode, self.log_path) {
            (Some(mode), Some(path)) => Some(Mutex::new(MessageLogger::new(mode, &path)?)),
            _ => None,
        };

        if self.options.mirror_state && self.store.is_none() {
            warn!("state mirroring enabled without a state store; nothing will be mirrored");
        }

        Ok(IComfortClient {
            http,
            base_url: self.base_url,
            credentials: self.credentials,
            options: self.options,
            store: self.store,
            logger,
        })
    }
}

impl Default for IComfortClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Dispatches commands against the iComfort cloud API.
///
/// Dispatches are independent: two overlapping calls race against the vendor
/// without any mutual exclusion.
pub struct IComfortClient {
    http: reqwest::Client,
    base_url: String,
    credentials: Option<CredentialConfig>,
    options: AdapterOptions,
    store: Option<Arc<dyn StateStore>>,
    logger: Option<Mutex<MessageLogger>>,
}

impl IComfortClient {
    pub fn builder() -> IComfortClientBuilder {
        IComfortClientBuilder::new()
    }

    pub fn options(&self) -> &AdapterOptions {
        &self.options
    }

    /// Resolves command and parameters against the static defaults, dispatches,
    /// and folds any failure into the returned [`Outcome`].
    pub async fn handle(&self, input: CommandInput) -> Outcome {
        let name = input
            .command
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| self.options.default_command.as_str().to_string());

        let inline = input.inline.or(&self.options.defaults);
        let params = match input.params {
            Some(nested) => nested.or(&inline),
            None => inline,
        };

        let result = match Command::from_name(&name) {
            Some(command) => self.dispatch(command, &params).await,
            None => Err(Error::UnsupportedCommand(name.clone())),
        };

        match result {
            Ok(result) => Outcome {
                command: name,
                payload: result.data,
                debug: Some(result.debug),
                error: None,
            },
            Err(e) => {
                error!(command = %name, error = %e, "command failed");
                Outcome {
                    command: name,
                    payload: Value::Null,
                    debug: e.debug().cloned(),
                    error: Some(e),
                }
            }
        }
    }

    pub async fn dispatch(&self, command: Command, params: &CommandParams) -> Result<DispatchResult> {
        let dispatch_id = Uuid::new_v4().to_string();
        let span = debug_span!("dispatch", id = %dispatch_id, %command);

        let result = self
            .run(&dispatch_id, command, params)
            .instrument(span)
            .await;

        if let Err(ref e) = result {
            self.with_logger(|logger| logger.log_error(&dispatch_id, &e.to_string()));
        }
        result
    }

    async fn run(&self, id: &str, command: Command, params: &CommandParams) -> Result<DispatchResult> {
        let creds = credentials::resolve(self.credentials.as_ref())?;
        let device_id = match creds.device_id() {
            Some(device_id) => device_id.to_string(),
            None if command.requires_device() => return Err(Error::DeviceRequired),
            None => String::new(),
        };

        debug!(device = %device_id, ?params, "dispatching command");
        self.with_logger(|logger| {
            let params = serde_json::to_value(params).unwrap_or(Value::Null);
            logger.log_command(id, command.as_str(), &params)
        });

        match command {
            Command::Refresh => {
                let request = protocol::refresh_request(&self.base_url, &creds, &device_id)?;
                let mut result = self.send(id, request).await?;
                timestamp::normalize_payload(&mut result.data);
                self.mirror(&device_id, &result.data);
                Ok(result)
            }
            Command::SystemInfo => {
                let request = protocol::system_info_request(&self.base_url, &creds)?;
                self.send(id, request).await
            }
            Command::Away | Command::Home => {
                let away = command == Command::Away;
                let request = protocol::away_mode_request(&self.base_url, &creds, &device_id, away)?;
                self.send(id, request).await
            }
            Command::SetSetpoints
            | Command::SetThermostatMode
            | Command::SetFanMode
            | Command::HeatLevelUp
            | Command::HeatLevelDown
            | Command::CoolLevelUp
            | Command::CoolLevelDown => {
                self.fetch_merge_write(id, command, params, &creds, &device_id)
                    .await
            }
        }
    }

    /// Read current state, overlay the command's delta, write the full state back.
    /// The vendor has no conditional write: a change made between the read and
    /// the write is overwritten.
    async fn fetch_merge_write(
        &self,
        id: &str,
        command: Command,
        params: &CommandParams,
        creds: &Credentials,
        device_id: &str,
    ) -> Result<DispatchResult> {
        let current = self.fetch_current(id, creds, device_id).await?;

        let mut state = WriteState::from(&current);
        apply_command(&mut state, command, params)?;
        debug!(?state, "merged write state");

        let request = protocol::write_state_request(&self.base_url, creds, device_id, &state)?;
        let mut result = self.send(id, request).await?;
        timestamp::normalize_payload(&mut result.data);
        self.mirror(device_id, &result.data);
        Ok(result)
    }

    async fn fetch_current(
        &self,
        id: &str,
        creds: &Credentials,
        device_id: &str,
    ) -> Result<ThermostatState> {
        let request = protocol::refresh_request(&self.base_url, creds, device_id)?;
        let fetched = self.send(id, request).await?;
        Ok(fetched
            .data
            .pointer("/tStatInfo/0")
            .map(ThermostatState::from_record)
            .unwrap_or_default())
    }

    async fn send(&self, id: &str, request: VendorRequest) -> Result<DispatchResult> {
        let request_debug = request.debug();
        let endpoint = request
            .url
            .path_segments()
            .and_then(|segments| segments.last())
            .unwrap_or_default()
            .to_string();

        debug!(method = %request.method, url = %request.url, "sending vendor request");
        self.with_logger(|logger| logger.log_request(id, &request_debug));

        let is_put = request.method == reqwest::Method::PUT;
        let mut builder = self
            .http
            .request(request.method, request.url)
            .headers(request.headers);
        if let Some(body) = &request.body {
            builder = builder.body(serde_json::to_vec(body)?);
        } else if is_put {
            builder = builder.body(Vec::<u8>::new());
        }

        let resp = builder.send().await?;
        let status = resp.status();
        let status_text = status.canonical_reason().unwrap_or_default().to_string();
        trace!(status = status.as_u16(), "vendor response");
        let text = resp.text().await?;

        let mut debug = DebugInfo {
            dispatch_id: id.to_string(),
            request: request_debug,
            status: status.as_u16(),
            status_text: status_text.clone(),
            body: None,
        };

        if !status.is_success() {
            self.with_logger(|logger| {
                logger.log_response(id, &endpoint, status.as_u16(), &Value::String(text.clone()))
            });
            debug.body = Some(text);
            return Err(Error::VendorHttp {
                status: status.as_u16(),
                status_text,
                debug: Box::new(debug),
            });
        }

        let data: Value = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text)?
        };
        self.with_logger(|logger| logger.log_response(id, &endpoint, status.as_u16(), &data));

        if let Some(return_status) = data.get("ReturnStatus").and_then(|v| v.as_str())
            && return_status != RETURN_STATUS_OK
        {
            return Err(Error::VendorApi {
                status: return_status.to_string(),
                body: data.clone(),
                debug: Box::new(debug),
            });
        }

        Ok(DispatchResult { data, debug })
    }

    fn mirror(&self, device_id: &str, data: &Value) {
        if !self.options.mirror_state {
            return;
        }
        let (Some(store), Some(record)) = (&self.store, data.pointer("/tStatInfo/0")) else {
            return;
        };
        let key = state_key(device_id);
        trace!(%key, "mirroring state");
        store.put(&key, record.clone());
    }

    fn with_logger(&self, f: impl FnOnce(&mut MessageLogger)) {
        if let Some(logger) = &self.logger
            && let Ok(mut guard) = logger.lock()
        {
            f(&mut guard);
        }
    }
}

fn present(value: &Option<Loose>) -> Option<&Loose> {
    value.as_ref().filter(|v| !v.is_blank())
}

/// Zero counts as unset.
fn setpoint_or(value: Option<f64>, default: f64) -> f64 {
    value.filter(|v| *v != 0.0).unwrap_or(default)
}

/// Overlays the command's delta onto the working copy of the fetched state.
pub fn apply_command(state: &mut WriteState, command: Command, params: &CommandParams) -> Result<()> {
    if command.is_mutating()
        && let Some(zone) = present(&params.zone_number).and_then(Loose::as_f64)
    {
        state.zone_number = zone.max(0.0) as u32;
    }

    match command {
        Command::SetFanMode => {
            let raw = present(&params.fan_mode)
                .ok_or_else(|| Error::Validation("Missing fan mode".to_string()))?;
            let mode = FanMode::from_param(raw)
                .ok_or_else(|| Error::Validation(format!("Unknown fan mode: {raw}")))?;
            state.fan_mode = Some(mode);
        }
        Command::SetSetpoints => {
            let heat = present(&params.heating_setpoint).and_then(Loose::as_f64);
            let cool = present(&params.cooling_setpoint).and_then(Loose::as_f64);
            let (Some(heat), Some(cool)) = (heat, cool) else {
                return Err(Error::Validation("Both setpoints required".to_string()));
            };
            if cool - heat < MIN_SETPOINT_GAP {
                return Err(Error::Validation(
                    "Cooling setpoint must be at least 2° higher than heating setpoint".to_string(),
                ));
            }
            state.heating_setpoint = Some(heat);
            state.cooling_setpoint = Some(cool);
        }
        Command::SetThermostatMode => {
            let raw = present(&params.thermostat_mode)
                .or_else(|| present(&params.mode))
                .ok_or_else(|| Error::Validation("Missing mode".to_string()))?;
            let mode = OperationMode::from_param(raw)
                .ok_or_else(|| Error::Validation(format!("Unknown mode: {raw}")))?;
            state.mode = Some(mode);
        }
        Command::HeatLevelUp | Command::HeatLevelDown => {
            let step = if command == Command::HeatLevelUp { 1.0 } else { -1.0 };
            let heat = setpoint_or(state.heating_setpoint, DEFAULT_HEAT_SETPOINT) + step;
            let cool = setpoint_or(state.cooling_setpoint, heat + MIN_SETPOINT_GAP);
            state.heating_setpoint = Some(heat);
            state.cooling_setpoint = Some(cool);
        }
        Command::CoolLevelUp | Command::CoolLevelDown => {
            let step = if command == Command::CoolLevelUp { 1.0 } else { -1.0 };
            let cool = setpoint_or(state.cooling_setpoint, DEFAULT_COOL_SETPOINT) + step;
            let heat = setpoint_or(state.heating_setpoint, cool - MIN_SETPOINT_GAP);
            state.cooling_setpoint = Some(cool);
            state.heating_setpoint = Some(heat);
        }
        Command::Refresh | Command::SystemInfo | Command::Away | Command::Home => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setpoints(heat: &str, cool: &str) -> CommandParams {
        CommandParams {
            heating_setpoint: Some(heat.into()),
            cooling_setpoint: Some(cool.into()),
            ..Default::default()
        }
    }

    fn validation_message(err: Error) -> String {
        match err {
            Error::Validation(msg) => msg,
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn setpoint_gap_of_one_is_rejected() {
        let mut state = WriteState::default();
        let err = apply_command(&mut state, Command::SetSetpoints, &setpoints("70", "71")).unwrap_err();
        assert!(validation_message(err).contains("at least 2°"));
        assert_eq!(state, WriteState::default());
    }

    #[test]
    fn setpoint_gap_of_two_is_accepted() {
        let mut state = WriteState::default();
        apply_command(&mut state, Command::SetSetpoints, &setpoints("70", "72")).unwrap();
        assert_eq!(state.heating_setpoint, Some(70.0));
        assert_eq!(state.cooling_setpoint, Some(72.0));
    }

    #[test]
    fn non_numeric_setpoint_is_rejected() {
        let mut state = WriteState::default();
        let err = apply_command(&mut state, Command::SetSetpoints, &setpoints("warm", "72")).unwrap_err();
        assert_eq!(validation_message(err), "Both setpoints required");

        let params = CommandParams {
            heating_setpoint: Some(Loose::Number(68.0)),
            ..Default::default()
        };
        let err = apply_command(&mut state, Command::SetSetpoints, &params).unwrap_err();
        assert_eq!(validation_message(err), "Both setpoints required");
    }

    #[test]
    fn heat_level_up_from_defaults() {
        let mut state = WriteState::default();
        apply_command(&mut state, Command::HeatLevelUp, &CommandParams::default()).unwrap();
        assert_eq!(state.heating_setpoint, Some(71.0));
        assert_eq!(state.cooling_setpoint, Some(73.0));
    }

    #[test]
    fn heat_level_down_keeps_existing_cooling() {
        let mut state = WriteState {
            heating_setpoint: Some(68.0),
            cooling_setpoint: Some(76.0),
            ..Default::default()
        };
        apply_command(&mut state, Command::HeatLevelDown, &CommandParams::default()).unwrap();
        assert_eq!(state.heating_setpoint, Some(67.0));
        assert_eq!(state.cooling_setpoint, Some(76.0));
    }

    #[test]
    fn cool_level_from_defaults() {
        let mut state = WriteState::default();
        apply_command(&mut state, Command::CoolLevelUp, &CommandParams::default()).unwrap();
        assert_eq!(state.cooling_setpoint, Some(76.0));
        assert_eq!(state.heating_setpoint, Some(74.0));

        let mut state = WriteState::default();
        apply_command(&mut state, Command::CoolLevelDown, &CommandParams::default()).unwrap();
        assert_eq!(state.cooling_setpoint, Some(74.0));
        assert_eq!(state.heating_setpoint, Some(72.0));
    }

    #[test]
    fn fan_mode_required() {
        let mut state = WriteState::default();
        let err = apply_command(&mut state, Command::SetFanMode, &CommandParams::default()).unwrap_err();
        assert_eq!(validation_message(err), "Missing fan mode");

        let params = CommandParams {
            fan_mode: Some("".into()),
            ..Default::default()
        };
        let err = apply_command(&mut state, Command::SetFanMode, &params).unwrap_err();
        assert_eq!(validation_message(err), "Missing fan mode");
    }

    #[test]
    fn fan_mode_overwrites_only_fan() {
        let mut state = WriteState {
            heating_setpoint: Some(68.0),
            mode: Some(OperationMode::Heat),
            ..Default::default()
        };
        let params = CommandParams {
            fan_mode: Some("circulate".into()),
            ..Default::default()
        };
        apply_command(&mut state, Command::SetFanMode, &params).unwrap();
        assert_eq!(state.fan_mode, Some(FanMode::Circulate));
        assert_eq!(state.heating_setpoint, Some(68.0));
        assert_eq!(state.mode, Some(OperationMode::Heat));
    }

    #[test]
    fn thermostat_mode_prefers_thermostatmode_alias() {
        let mut state = WriteState::default();
        let params = CommandParams {
            mode: Some("heat".into()),
            thermostat_mode: Some("cool".into()),
            ..Default::default()
        };
        apply_command(&mut state, Command::SetThermostatMode, &params).unwrap();
        assert_eq!(state.mode, Some(OperationMode::Cool));

        let params = CommandParams {
            mode: Some("emergency heat".into()),
            ..Default::default()
        };
        apply_command(&mut state, Command::SetThermostatMode, &params).unwrap();
        assert_eq!(state.mode, Some(OperationMode::EmergencyHeat));
    }

    #[test]
    fn thermostat_mode_missing_or_unknown() {
        let mut state = WriteState::default();
        let err = apply_command(&mut state, Command::SetThermostatMode, &CommandParams::default())
            .unwrap_err();
        assert_eq!(validation_message(err), "Missing mode");

        let params = CommandParams {
            mode: Some("turbo".into()),
            ..Default::default()
        };
        let err = apply_command(&mut state, Command::SetThermostatMode, &params).unwrap_err();
        assert_eq!(validation_message(err), "Unknown mode: turbo");
    }

    #[test]
    fn zone_number_param_overrides_fetched_zone() {
        let mut state = WriteState {
            zone_number: 0,
            ..Default::default()
        };
        let params = CommandParams {
            fan_mode: Some("on".into()),
            zone_number: Some("2".into()),
            ..Default::default()
        };
        apply_command(&mut state, Command::SetFanMode, &params).unwrap();
        assert_eq!(state.zone_number, 2);
    }

    #[test]
    fn default_options() {
        let options = AdapterOptions::default();
        assert_eq!(options.default_command, Command::SystemInfo);
        assert_eq!(options.poll_command, Command::Refresh);
        assert_eq!(options.polling_secs, 0);
        assert!(!options.mirror_state);
    }

    #[test]
    fn options_deserialize_from_host_config() {
        let options: AdapterOptions = serde_json::from_value(json!({
            "defaultCommand": "present",
            "defaults": { "heatingSetpoint": "68", "fanmode": "auto" },
            "pollingSecs": 60,
            "mirrorState": true
        }))
        .unwrap();
        assert_eq!(options.default_command, Command::Home);
        assert_eq!(options.defaults.heating_setpoint, Some(Loose::Text("68".into())));
        assert_eq!(options.polling_secs, 60);
        assert_eq!(options.poll_command, Command::Refresh);
        assert!(options.mirror_state);
    }
}
