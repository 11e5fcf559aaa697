pub mod client;
pub mod service;
pub mod settings;

pub use client::{
    ClientConfig, DeliveryError, DeliveryRequest, LrsClient, LrsResponse, XAPI_VERSION,
    statements_url,
};
pub use service::{LrsService, StatementSender};
pub use settings::{
    Credentials, DEFAULT_BATCH_SIZE, DEFAULT_TIMEOUT_SECS, LrsSettings, SettingsHandle,
};
