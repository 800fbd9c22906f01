mod client;
mod credentials;
mod error;
mod logger;
mod poller;
mod protocol;
mod store;
pub mod timestamp;
mod types;

pub use client::{
    AdapterOptions, DispatchResult, IComfortClient, IComfortClientBuilder, Outcome, apply_command,
};
pub use credentials::{CredentialConfig, Credentials, resolve as resolve_credentials};
pub use error::{Error, Result};
pub use logger::MessageLogMode;
pub use poller::{PollHandle, Poller};
pub use protocol::{
    DEFAULT_BASE_URL, DebugInfo, RequestDebug, VendorRequest, WriteStateBody, away_mode_request,
    refresh_request, system_info_request, write_state_request,
};
pub use store::{MemoryStore, StateStore, state_key};
pub use types::*;
