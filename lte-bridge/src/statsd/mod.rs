use derive_more::Display;
use std::sync::Arc;

pub mod dd;

/// Metric series the bridge feeds.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Metric {
    #[display("orb.lte.drop")]
    Drop,
    #[display("orb.lte.signal.rsrp")]
    Rsrp,
    #[display("orb.lte.signal.sinr")]
    Sinr,
    #[display("orb.lte.net.udp_tx_bytes")]
    UdpTx,
    #[display("orb.lte.net.udp_rx_bytes")]
    UdpRx,
    #[display("orb.lte.net.tcp_tx_bytes")]
    TcpTx,
    #[display("orb.lte.net.tcp_rx_bytes")]
    TcpRx,
    #[display("orb.lte.net.data_total_bytes")]
    DataTotal,
}

/// Best effort metrics pipeline. Nothing that goes in here is ever acknowledged.
pub trait TelemetrySink: Send + Sync + 'static {
    /// Adds `delta` to a counter series.
    fn add(&self, metric: Metric, delta: i64);

    /// Replaces the current value of a gauge series.
    fn set_signed(&self, metric: Metric, value: i64);
}

/// Discards everything. Used when statsd reporting is turned off.
pub struct NoopSink;

impl TelemetrySink for NoopSink {
    fn add(&self, _metric: Metric, _delta: i64) {}

    fn set_signed(&self, _metric: Metric, _value: i64) {}
}

impl<T: TelemetrySink + ?Sized> TelemetrySink for Box<T> {
    fn add(&self, metric: Metric, delta: i64) {
        (**self).add(metric, delta)
    }

    fn set_signed(&self, metric: Metric, value: i64) {
        (**self).set_signed(metric, value)
    }
}

impl<T: TelemetrySink + ?Sized> TelemetrySink for Arc<T> {
    fn add(&self, metric: Metric, delta: i64) {
        (**self).add(metric, delta)
    }

    fn set_signed(&self, metric: Metric, value: i64) {
        (**self).set_signed(metric, value)
    }
}
