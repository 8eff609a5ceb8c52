use num_derive::FromPrimitive;
use num_traits::FromPrimitive as _;

/// Events delivered by the modem driver. Payloads are owned copies, nothing in
/// here points back into driver memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModemEvent {
    /// Raw registration state code, see [`NetworkState`].
    NetworkStateChange(u8),
    ApnUpdate(Apn),
    /// RSRP in dBm.
    Rssi(i32),
    /// SINR in dB.
    Sinr(i32),
    StartupStateChange(u8),
    SleepStateChange(u8),
    /// Raw [`super::RadioMode`] byte.
    Rat(u8),
    Bands(String),
    ActiveBands(String),
    Revision(String),
    /// `None` when the driver had no survey result to attach.
    SiteSurvey(Option<SiteSurvey>),
    FotaState(u8),
    FotaCount(u32),
    SocketStats(SocketStats),
    /// Any event kind the bridge has no mapping for (GPS, PoLTE, ...).
    Unknown(u8),
}

/// Network registration states, as reported by `+CEREG`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
#[repr(u8)]
pub enum NetworkState {
    NotRegistered = 0,
    HomeNetwork = 1,
    Searching = 2,
    RegistrationDenied = 3,
    OutOfCoverage = 4,
    Roaming = 5,
    Emergency = 8,
    UnableToConfigure = 0xf0,
}

impl NetworkState {
    pub fn from_code(code: u8) -> Option<Self> {
        Self::from_u8(code)
    }

    pub fn is_registered(&self) -> bool {
        matches!(self, NetworkState::HomeNetwork | NetworkState::Roaming)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Apn {
    pub value: String,
    pub username: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SiteSurvey {
    pub earfcn: u32,
    pub cell_id: u32,
    pub rsrp: i32,
    pub rsrq: i32,
}

/// Bytes moved over the modem's sockets since the previous report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SocketStats {
    pub udp_tx: u32,
    pub udp_rx: u32,
    pub tcp_tx: u32,
    pub tcp_rx: u32,
}

impl SocketStats {
    /// Sum of all four counters. Wraps like the u32 attribute it feeds.
    pub fn total(&self) -> u32 {
        self.udp_tx
            .wrapping_add(self.udp_rx)
            .wrapping_add(self.tcp_tx)
            .wrapping_add(self.tcp_rx)
    }
}
