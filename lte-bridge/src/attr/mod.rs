use derive_more::Display;

pub mod memory;

pub use memory::MemoryAttrStore;

/// Attributes the bridge reads or writes.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttrId {
    #[display("lte_apn")]
    Apn,
    #[display("lte_bands")]
    Bands,
    #[display("lte_active_bands")]
    ActiveBands,
    #[display("lte_log_lvl")]
    LogLevel,
    #[display("lte_rat")]
    Rat,
    #[display("lte_network_state")]
    NetworkState,
    #[display("lte_rsrp")]
    Rsrp,
    #[display("lte_sinr")]
    Sinr,
    #[display("lte_startup_state")]
    StartupState,
    #[display("lte_sleep_state")]
    SleepState,
    #[display("lte_version")]
    Version,
    #[display("lte_fup_status")]
    FupStatus,
    #[display("lte_udp_tx")]
    UdpTx,
    #[display("lte_udp_rx")]
    UdpRx,
    #[display("lte_tcp_tx")]
    TcpTx,
    #[display("lte_tcp_rx")]
    TcpRx,
    #[display("lte_data_total")]
    DataTotal,
    #[display("lte_init_error")]
    InitError,
    #[display("lte_imei")]
    Imei,
    #[display("lte_iccid")]
    Iccid,
    #[display("lte_sn")]
    SerialNumber,
    #[display("lte_imsi")]
    Imsi,
    #[display("lte_operator_index")]
    OperatorIndex,
}

impl AttrId {
    /// Traffic counters. They change with every socket report.
    pub const COUNTERS: [AttrId; 5] = [
        AttrId::UdpTx,
        AttrId::UdpRx,
        AttrId::TcpTx,
        AttrId::TcpRx,
        AttrId::DataTotal,
    ];

    pub fn attr_type(&self) -> AttrType {
        use AttrId::*;

        match self {
            Apn | Bands | ActiveBands | Version | Imei | Iccid | SerialNumber
            | Imsi => AttrType::String,
            Rat => AttrType::U8,
            Rsrp | Sinr | InitError => AttrType::I32,
            LogLevel | NetworkState | StartupState | SleepState | FupStatus
            | UdpTx | UdpRx | TcpTx | TcpRx | DataTotal | OperatorIndex => {
                AttrType::U32
            }
        }
    }
}

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum AttrType {
    #[display("u32")]
    U32,
    #[display("i32")]
    I32,
    #[display("u8")]
    U8,
    #[display("string")]
    String,
}

#[derive(Debug, Display, Clone, PartialEq, Eq)]
pub enum AttrValue {
    U32(u32),
    I32(i32),
    U8(u8),
    #[display("{_0:?}")]
    Str(String),
}

impl AttrValue {
    pub fn attr_type(&self) -> AttrType {
        match self {
            AttrValue::U32(_) => AttrType::U32,
            AttrValue::I32(_) => AttrType::I32,
            AttrValue::U8(_) => AttrType::U8,
            AttrValue::Str(_) => AttrType::String,
        }
    }
}

/// Whether a write notifies the change listener.
///
/// Writes that mirror state coming *from* the modem use
/// [`WriteMode::WithoutBroadcast`] so the listener does not push the same value
/// straight back down to the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    Broadcast,
    WithoutBroadcast,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum AttrError {
    #[error("{id} is declared as {expected}, got {actual}")]
    TypeMismatch {
        id: AttrId,
        expected: AttrType,
        actual: AttrType,
    },
    #[error("{id} value is {len} bytes long, max is {max}")]
    TooLong { id: AttrId, len: usize, max: usize },
}

/// The device's attribute store, as seen from the bridge.
pub trait AttributeStore: Send + Sync + 'static {
    fn get(&self, id: AttrId) -> Option<AttrValue>;

    fn set(&self, id: AttrId, value: AttrValue, mode: WriteMode) -> Result<(), AttrError>;

    /// Adds `delta` to a u32 attribute.
    fn add_u32(&self, id: AttrId, delta: u32) -> Result<(), AttrError>;

    /// Quiet attributes neither log nor broadcast their changes.
    fn set_quiet(&self, id: AttrId, quiet: bool) -> Result<(), AttrError>;

    /// Hands out the receiving end of the store's single change listener slot.
    /// Each message is one batch of changed ids, in the store's change order.
    fn subscribe(&self) -> flume::Receiver<Vec<AttrId>>;

    /// Reads an integer attribute, falling back to `default` when it is unset or
    /// not an unsigned integer.
    fn get_u32(&self, id: AttrId, default: u32) -> u32 {
        match self.get(id) {
            Some(AttrValue::U32(v)) => v,
            Some(AttrValue::U8(v)) => v.into(),
            _ => default,
        }
    }

    fn get_string(&self, id: AttrId) -> Option<String> {
        match self.get(id) {
            Some(AttrValue::Str(s)) => Some(s),
            _ => None,
        }
    }
}
