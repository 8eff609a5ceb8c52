use async_trait::async_trait;
use derive_more::Display;
use num_derive::{FromPrimitive, ToPrimitive};
use serde::{Deserialize, Serialize};

pub mod event;

pub use event::ModemEvent;

/// A negative status code returned by one of the modem driver's control calls.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("modem driver returned {code}")]
pub struct ModemError {
    pub code: i32,
}

impl ModemError {
    pub fn new(code: i32) -> Self {
        Self { code }
    }
}

/// Log filter levels understood by the modem driver.
#[derive(
    Debug,
    Display,
    Clone,
    Copy,
    PartialEq,
    Eq,
    FromPrimitive,
    ToPrimitive,
    Serialize,
    Deserialize,
)]
#[serde(rename_all = "lowercase")]
#[repr(u32)]
pub enum LogLevel {
    None = 0,
    Error = 1,
    Warning = 2,
    Info = 3,
    Debug = 4,
}

/// Radio access technology the modem is configured to camp on.
#[derive(
    Debug,
    Display,
    Clone,
    Copy,
    PartialEq,
    Eq,
    FromPrimitive,
    ToPrimitive,
    Serialize,
    Deserialize,
)]
#[serde(rename_all = "kebab-case")]
#[repr(u8)]
pub enum RadioMode {
    #[display("CAT-M1")]
    CatM1 = 0,
    #[display("NB-IoT")]
    CatNb1 = 1,
}

/// The wrapped modem driver.
///
/// Everything behind this trait (AT transport, PPP/socket stack, firmware transfer)
/// belongs to the driver. The bridge only ever calls into it and drains the event
/// channel handed out by [`ModemDriver::subscribe`].
#[async_trait]
pub trait ModemDriver: Send + Sync + 'static {
    /// Hands out the receiving end of the driver's single event slot. Subscribing
    /// again replaces the previous subscriber.
    fn subscribe(&self) -> flume::Receiver<ModemEvent>;

    async fn update_apn(&self, apn: &str) -> Result<(), ModemError>;

    async fn set_bands(&self, bands: &str) -> Result<(), ModemError>;

    async fn log_filter_set(&self, level: LogLevel) -> Result<(), ModemError>;

    async fn update_rat(&self, mode: RadioMode) -> Result<(), ModemError>;

    async fn imei(&self) -> Result<String, ModemError>;

    async fn firmware_version(&self) -> Result<String, ModemError>;

    async fn iccid(&self) -> Result<String, ModemError>;

    async fn serial_number(&self) -> Result<String, ModemError>;

    async fn imsi(&self) -> Result<String, ModemError>;

    /// Index of the operator profile in use. Unknown operators are an `Err`.
    async fn operator_index(&self) -> Result<u32, ModemError>;

    /// Asks the driver to replay its current status as synthetic events.
    async fn generate_status_events(&self) -> Result<(), ModemError>;

    async fn reset(&self) -> Result<(), ModemError>;

    async fn power_off(&self) -> Result<(), ModemError>;

    async fn perform_site_survey(&self) -> Result<(), ModemError>;

    async fn send_at_cmd(&self, cmd: &str) -> Result<(), ModemError>;

    async fn update_fw(&self, file_path: &str) -> Result<(), ModemError>;
}
