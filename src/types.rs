use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Thermostat operation mode. Sent to and received from the vendor as an integer code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationMode {
    Off,
    Heat,
    Cool,
    Auto,
    EmergencyHeat,
}

const OPERATION_MODES: &[(OperationMode, &str, i64)] = &[
    (OperationMode::Off, "off", 0),
    (OperationMode::Heat, "heat", 1),
    (OperationMode::Cool, "cool", 2),
    (OperationMode::Auto, "auto", 3),
    (OperationMode::EmergencyHeat, "emergency heat", 4),
];

impl OperationMode {
    pub fn as_str(&self) -> &'static str {
        OPERATION_MODES
            .iter()
            .find(|(m, _, _)| m == self)
            .map(|(_, s, _)| *s)
            .unwrap_or("off")
    }

    pub fn code(&self) -> i64 {
        OPERATION_MODES
            .iter()
            .find(|(m, _, _)| m == self)
            .map(|(_, _, c)| *c)
            .unwrap_or(0)
    }

    pub fn from_code(code: i64) -> Option<Self> {
        OPERATION_MODES
            .iter()
            .find(|(_, _, c)| *c == code)
            .map(|(m, _, _)| *m)
    }

    pub fn from_name(s: &str) -> Option<Self> {
        match s.trim() {
            "emergencyHeat" | "emergency_heat" => Some(OperationMode::EmergencyHeat),
            name => OPERATION_MODES
                .iter()
                .find(|(_, n, _)| *n == name)
                .map(|(m, _, _)| *m),
        }
    }

    /// Accepts a symbolic name or an integer code.
    pub fn from_param(value: &Loose) -> Option<Self> {
        match value {
            Loose::Text(s) => Self::from_name(s)
                .or_else(|| s.trim().parse::<i64>().ok().and_then(Self::from_code)),
            Loose::Number(n) if n.fract() == 0.0 => Self::from_code(*n as i64),
            Loose::Number(_) => None,
        }
    }
}

impl fmt::Display for OperationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fan mode. Sent to and received from the vendor as an integer code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FanMode {
    Auto,
    On,
    Circulate,
}

const FAN_MODES: &[(FanMode, &str, i64)] = &[
    (FanMode::Auto, "auto", 0),
    (FanMode::On, "on", 1),
    (FanMode::Circulate, "circulate", 2),
];

impl FanMode {
    pub fn as_str(&self) -> &'static str {
        FAN_MODES
            .iter()
            .find(|(m, _, _)| m == self)
            .map(|(_, s, _)| *s)
            .unwrap_or("auto")
    }

    pub fn code(&self) -> i64 {
        FAN_MODES
            .iter()
            .find(|(m, _, _)| m == self)
            .map(|(_, _, c)| *c)
            .unwrap_or(0)
    }

    pub fn from_code(code: i64) -> Option<Self> {
        FAN_MODES
            .iter()
            .find(|(_, _, c)| *c == code)
            .map(|(m, _, _)| *m)
    }

    pub fn from_name(s: &str) -> Option<Self> {
        let name = s.trim();
        FAN_MODES
            .iter()
            .find(|(_, n, _)| *n == name)
            .map(|(m, _, _)| *m)
    }

    pub fn from_param(value: &Loose) -> Option<Self> {
        match value {
            Loose::Text(s) => Self::from_name(s)
                .or_else(|| s.trim().parse::<i64>().ok().and_then(Self::from_code)),
            Loose::Number(n) if n.fract() == 0.0 => Self::from_code(*n as i64),
            Loose::Number(_) => None,
        }
    }
}

impl fmt::Display for FanMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Refresh,
    SystemInfo,
    SetSetpoints,
    SetThermostatMode,
    SetFanMode,
    HeatLevelUp,
    HeatLevelDown,
    CoolLevelUp,
    CoolLevelDown,
    Away,
    Home,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Refresh => "refresh",
            Command::SystemInfo => "systemInfo",
            Command::SetSetpoints => "setSetpoints",
            Command::SetThermostatMode => "setThermostatMode",
            Command::SetFanMode => "setFanMode",
            Command::HeatLevelUp => "heatLevelUp",
            Command::HeatLevelDown => "heatLevelDown",
            Command::CoolLevelUp => "coolLevelUp",
            Command::CoolLevelDown => "coolLevelDown",
            Command::Away => "away",
            Command::Home => "home",
        }
    }

    /// Parses a command name. `present` is an alias of `home`, `getSystemInfo` of `systemInfo`.
    pub fn from_name(s: &str) -> Option<Self> {
        match s.trim() {
            "refresh" => Some(Command::Refresh),
            "systemInfo" | "getSystemInfo" => Some(Command::SystemInfo),
            "setSetpoints" => Some(Command::SetSetpoints),
            "setThermostatMode" => Some(Command::SetThermostatMode),
            "setFanMode" => Some(Command::SetFanMode),
            "heatLevelUp" => Some(Command::HeatLevelUp),
            "heatLevelDown" => Some(Command::HeatLevelDown),
            "coolLevelUp" => Some(Command::CoolLevelUp),
            "coolLevelDown" => Some(Command::CoolLevelDown),
            "away" => Some(Command::Away),
            "home" | "present" => Some(Command::Home),
            _ => None,
        }
    }

    /// Commands that go through the fetch-merge-write pipeline.
    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            Command::SetSetpoints
                | Command::SetThermostatMode
                | Command::SetFanMode
                | Command::HeatLevelUp
                | Command::HeatLevelDown
                | Command::CoolLevelUp
                | Command::CoolLevelDown
        )
    }

    pub fn requires_device(&self) -> bool {
        !matches!(self, Command::SystemInfo)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Command {
    fn serialize<S: serde::Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        s.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Command {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let name = String::deserialize(d)?;
        Command::from_name(&name)
            .ok_or_else(|| serde::de::Error::custom(format!("unsupported command: {name}")))
    }
}

/// Weakly typed scalar input: hosts send numbers and numeric strings interchangeably.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Loose {
    Number(f64),
    Text(String),
}

impl Loose {
    pub fn as_f64(&self) -> Option<f64> {
        let v = match self {
            Loose::Number(n) => *n,
            Loose::Text(s) => s.trim().parse().ok()?,
        };
        v.is_finite().then_some(v)
    }

    pub fn is_blank(&self) -> bool {
        matches!(self, Loose::Text(s) if s.trim().is_empty())
    }
}

impl fmt::Display for Loose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Loose::Number(n) => write!(f, "{n}"),
            Loose::Text(s) => f.write_str(s),
        }
    }
}

impl From<f64> for Loose {
    fn from(v: f64) -> Self {
        Loose::Number(v)
    }
}

impl From<&str> for Loose {
    fn from(v: &str) -> Self {
        Loose::Text(v.to_string())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heating_setpoint: Option<Loose>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cooling_setpoint: Option<Loose>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<Loose>,
    #[serde(default, rename = "fanmode", skip_serializing_if = "Option::is_none")]
    pub fan_mode: Option<Loose>,
    #[serde(default, rename = "thermostatmode", skip_serializing_if = "Option::is_none")]
    pub thermostat_mode: Option<Loose>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zone_number: Option<Loose>,
}

fn first_present(primary: Option<Loose>, fallback: &Option<Loose>) -> Option<Loose> {
    primary
        .filter(|v| !v.is_blank())
        .or_else(|| fallback.clone().filter(|v| !v.is_blank()))
}

impl CommandParams {
    /// Field-wise merge: values present in `self` win, blanks fall through to `fallback`.
    pub fn or(self, fallback: &CommandParams) -> CommandParams {
        CommandParams {
            heating_setpoint: first_present(self.heating_setpoint, &fallback.heating_setpoint),
            cooling_setpoint: first_present(self.cooling_setpoint, &fallback.cooling_setpoint),
            mode: first_present(self.mode, &fallback.mode),
            fan_mode: first_present(self.fan_mode, &fallback.fan_mode),
            thermostat_mode: first_present(self.thermostat_mode, &fallback.thermostat_mode),
            zone_number: first_present(self.zone_number, &fallback.zone_number),
        }
    }
}

/// Per-call input from the host: a command name plus parameters, either inline or
/// nested under `params`. Anything absent falls back to the adapter's static defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CommandInput {
    #[serde(default)]
    pub command: Option<String>,
    #[serde(flatten)]
    pub inline: CommandParams,
    #[serde(default)]
    pub params: Option<CommandParams>,
}

impl CommandInput {
    pub fn command(name: impl Into<String>) -> Self {
        Self {
            command: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn with_params(mut self, params: CommandParams) -> Self {
        self.params = Some(params);
        self
    }
}

/// Decoded view of one `tStatInfo` record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ThermostatState {
    pub heat_setpoint: Option<f64>,
    pub cool_setpoint: Option<f64>,
    pub fan_mode: Option<FanMode>,
    pub operation_mode: Option<OperationMode>,
    pub zone_number: u32,
    pub timestamp_marker: Option<String>,
    /// Raw `GMT_To_Local` offset in seconds, when the record carries a numeric one.
    pub gmt_offset_secs: Option<f64>,
    pub utc_millis: Option<i64>,
    pub local_display: Option<String>,
}

fn number_field(record: &Value, key: &str) -> Option<f64> {
    let value = match record.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    value.filter(|v| v.is_finite())
}

/// Enum codes must be whole numbers; `1.7` is not a fan mode.
fn code_field(record: &Value, key: &str) -> Option<i64> {
    number_field(record, key)
        .filter(|c| c.fract() == 0.0)
        .map(|c| c as i64)
}

impl ThermostatState {
    pub fn from_record(record: &Value) -> Self {
        Self {
            heat_setpoint: number_field(record, "Heat_Set_Point"),
            cool_setpoint: number_field(record, "Cool_Set_Point"),
            fan_mode: code_field(record, "Fan_Mode").and_then(FanMode::from_code),
            operation_mode: code_field(record, "Operation_Mode").and_then(OperationMode::from_code),
            zone_number: number_field(record, "Zone_Number")
                .map(|z| z.max(0.0) as u32)
                .unwrap_or(0),
            timestamp_marker: record
                .get("DateTime_Mark")
                .and_then(|v| v.as_str())
                .map(str::to_string),
            gmt_offset_secs: number_field(record, "GMT_To_Local"),
            utc_millis: record.get("DateTime").and_then(|v| v.as_i64()),
            local_display: record
                .get("DateTime_Local")
                .and_then(|v| v.as_str())
                .map(str::to_string),
        }
    }
}

/// Working copy for the fetch-merge-write pipeline.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteState {
    pub heating_setpoint: Option<f64>,
    pub cooling_setpoint: Option<f64>,
    pub fan_mode: Option<FanMode>,
    pub mode: Option<OperationMode>,
    pub zone_number: u32,
}

impl From<&ThermostatState> for WriteState {
    fn from(state: &ThermostatState) -> Self {
        Self {
            heating_setpoint: state.heat_setpoint,
            cooling_setpoint: state.cool_setpoint,
            fan_mode: state.fan_mode,
            mode: state.operation_mode,
            zone_number: state.zone_number,
        }
    }
}
