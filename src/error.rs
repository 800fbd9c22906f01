use std::fmt;

use serde_json::Value;

use crate::protocol::DebugInfo;

#[derive(Debug)]
pub enum Error {
    /// No credential source was configured.
    Configuration,
    /// Username or password missing from the credential source.
    Credentials,
    /// The command needs a gateway serial number and none was configured.
    DeviceRequired,
    Validation(String),
    /// Non-2xx response. The debug object carries the raw response body.
    VendorHttp {
        status: u16,
        status_text: String,
        debug: Box<DebugInfo>,
    },
    /// 2xx response whose `ReturnStatus` is not `SUCCESS`.
    VendorApi {
        status: String,
        body: Value,
        debug: Box<DebugInfo>,
    },
    UnsupportedCommand(String),
    InvalidUrl(String),
    Http(reqwest::Error),
    Json(serde_json::Error),
    Io(std::io::Error),
}

impl Error {
    /// Request/response debug attached to the failure, if any.
    pub fn debug(&self) -> Option<&DebugInfo> {
        match self {
            Error::VendorHttp { debug, .. } | Error::VendorApi { debug, .. } => {
                Some(debug.as_ref())
            }
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Configuration => write!(f, "no credential source configured"),
            Error::Credentials => write!(f, "missing credentials"),
            Error::DeviceRequired => {
                write!(f, "device id (gateway serial number) required for this command")
            }
            Error::Validation(msg) => write!(f, "{msg}"),
            Error::VendorHttp {
                status,
                status_text,
                debug,
            } => {
                write!(f, "vendor returned HTTP {status} {status_text}")?;
                match debug.body.as_deref() {
                    Some(body) if !body.is_empty() => write!(f, ": {body}"),
                    _ => Ok(()),
                }
            }
            Error::VendorApi { status, .. } => write!(f, "vendor API error: {status}"),
            Error::UnsupportedCommand(cmd) => write!(f, "unsupported command: {cmd}"),
            Error::InvalidUrl(msg) => write!(f, "invalid URL: {msg}"),
            Error::Http(e) => write!(f, "HTTP error: {e}"),
            Error::Json(e) => write!(f, "JSON error: {e}"),
            Error::Io(e) => write!(f, "IO error: {e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Http(e) => Some(e),
            Error::Json(e) => Some(e),
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Http(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Json(e)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
