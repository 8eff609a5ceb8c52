use crate::{
    attr::{AttrId, AttrValue, AttributeStore, WriteMode},
    modem::event::{Apn, ModemEvent, NetworkState, SiteSurvey, SocketStats},
    statsd::{Metric, TelemetrySink},
};
use color_eyre::Result;
use drop_tracker::DropTracker;
use std::{io::Write, sync::Arc};
use tokio::task::{self, JoinHandle};
use tracing::{debug, error, info, warn};

pub mod drop_tracker;

/// Output for site survey results, normally the device's serial console.
///
/// Written synchronously from the dispatcher task, so a console that can stall
/// holds up event delivery. Hand in a buffered or non-blocking writer in that case.
pub type Console = Box<dyn Write + Send>;

/// Turns modem events into attribute writes and metrics.
///
/// Owns the connection drop state, so there is exactly one dispatcher per modem.
pub struct EventDispatcher<S, T> {
    store: Arc<S>,
    telemetry: T,
    console: Option<Console>,
    drops: DropTracker,
}

impl<S, T> EventDispatcher<S, T>
where
    S: AttributeStore,
    T: TelemetrySink,
{
    pub fn new(store: Arc<S>, telemetry: T, console: Option<Console>) -> Self {
        Self {
            store,
            telemetry,
            console,
            drops: DropTracker::new(),
        }
    }

    /// Handles one event. Failures are logged, never returned: the driver has
    /// nobody to report them to.
    pub fn dispatch(&mut self, event: ModemEvent) {
        match event {
            ModemEvent::NetworkStateChange(code) => self.network_state(code),

            ModemEvent::ApnUpdate(Apn { value, .. }) => {
                self.write(AttrId::Apn, AttrValue::Str(value), WriteMode::WithoutBroadcast)
            }

            ModemEvent::Rssi(rsrp) => {
                self.write(AttrId::Rsrp, AttrValue::I32(rsrp), WriteMode::Broadcast);
                self.telemetry.set_signed(Metric::Rsrp, rsrp.into());
            }

            ModemEvent::Sinr(sinr) => {
                self.write(AttrId::Sinr, AttrValue::I32(sinr), WriteMode::Broadcast);
                self.telemetry.set_signed(Metric::Sinr, sinr.into());
            }

            ModemEvent::StartupStateChange(code) => self.write(
                AttrId::StartupState,
                AttrValue::U32(code.into()),
                WriteMode::Broadcast,
            ),

            ModemEvent::SleepStateChange(code) => self.write(
                AttrId::SleepState,
                AttrValue::U32(code.into()),
                WriteMode::Broadcast,
            ),

            ModemEvent::Rat(rat) => {
                self.write(AttrId::Rat, AttrValue::U8(rat), WriteMode::WithoutBroadcast)
            }

            ModemEvent::Bands(bands) => self.write(
                AttrId::Bands,
                AttrValue::Str(bands),
                WriteMode::WithoutBroadcast,
            ),

            ModemEvent::ActiveBands(bands) => self.write(
                AttrId::ActiveBands,
                AttrValue::Str(bands),
                WriteMode::Broadcast,
            ),

            ModemEvent::Revision(revision) => self.write(
                AttrId::Version,
                AttrValue::Str(revision),
                WriteMode::Broadcast,
            ),

            ModemEvent::SiteSurvey(survey) => {
                if let Some(survey) = survey {
                    self.print_survey(&survey);
                }
            }

            ModemEvent::FotaState(code) => self.write(
                AttrId::FupStatus,
                AttrValue::U32(code.into()),
                WriteMode::Broadcast,
            ),

            // reserved
            ModemEvent::FotaCount(_) => {}

            ModemEvent::SocketStats(stats) => self.socket_stats(stats),

            ModemEvent::Unknown(kind) => warn!("Unhandled event {kind}"),
        }
    }

    /// Drains `events` until the driver drops its end.
    pub fn spawn(mut self, events: flume::Receiver<ModemEvent>) -> JoinHandle<Result<()>> {
        info!("starting modem event dispatcher");

        task::spawn(async move {
            while let Ok(event) = events.recv_async().await {
                self.dispatch(event);
            }

            warn!("modem event channel closed, stopping dispatcher");

            Ok(())
        })
    }

    fn network_state(&mut self, code: u8) {
        self.write(
            AttrId::NetworkState,
            AttrValue::U32(code.into()),
            WriteMode::Broadcast,
        );

        if self.drops.on_network_state(NetworkState::from_code(code)) {
            info!("lte connection dropped (state {code})");
            self.telemetry.add(Metric::Drop, 1);
        }
    }

    fn socket_stats(&self, stats: SocketStats) {
        let counters = [
            ("UDP TX", stats.udp_tx, AttrId::UdpTx, Metric::UdpTx),
            ("UDP RX", stats.udp_rx, AttrId::UdpRx, Metric::UdpRx),
            ("TCP TX", stats.tcp_tx, AttrId::TcpTx, Metric::TcpTx),
            ("TCP RX", stats.tcp_rx, AttrId::TcpRx, Metric::TcpRx),
        ];

        for (label, bytes, _, _) in counters {
            if bytes != 0 {
                debug!("{label} bytes: {bytes}");
            }
        }

        let total = stats.total();
        for (_, bytes, _, metric) in counters {
            self.telemetry.add(metric, bytes.into());
        }
        self.telemetry.add(Metric::DataTotal, total.into());

        // zero deltas are accumulated as well
        for (_, bytes, id, _) in counters {
            self.accumulate(id, bytes);
        }
        self.accumulate(AttrId::DataTotal, total);
    }

    fn print_survey(&mut self, survey: &SiteSurvey) {
        let Some(console) = self.console.as_mut() else {
            return;
        };

        let result = writeln!(console, "EARFCN: {}", survey.earfcn)
            .and_then(|_| writeln!(console, "Cell Id: {}", survey.cell_id))
            .and_then(|_| writeln!(console, "RSRP: {}", survey.rsrp))
            .and_then(|_| writeln!(console, "RSRQ: {}", survey.rsrq))
            .and_then(|_| console.flush());

        if let Err(e) = result {
            error!("failed to print site survey: {e}");
        }
    }

    fn write(&self, id: AttrId, value: AttrValue, mode: WriteMode) {
        if let Err(e) = self.store.set(id, value, mode) {
            error!("Set {id} [{e}]");
        }
    }

    fn accumulate(&self, id: AttrId, delta: u32) {
        if let Err(e) = self.store.add_u32(id, delta) {
            error!("Add {id} [{e}]");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attr::MemoryAttrStore;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        calls: Mutex<Vec<(&'static str, Metric, i64)>>,
    }

    impl RecordingSink {
        fn calls(&self) -> Vec<(&'static str, Metric, i64)> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl TelemetrySink for RecordingSink {
        fn add(&self, metric: Metric, delta: i64) {
            self.calls.lock().unwrap().push(("add", metric, delta));
        }

        fn set_signed(&self, metric: Metric, value: i64) {
            self.calls.lock().unwrap().push(("set", metric, value));
        }
    }

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().write(buf)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuf {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    struct Fx {
        store: Arc<MemoryAttrStore>,
        sink: Arc<RecordingSink>,
        dispatcher: EventDispatcher<MemoryAttrStore, Arc<RecordingSink>>,
    }

    fn fx(console: Option<Console>) -> Fx {
        let store = Arc::new(MemoryAttrStore::new(64));
        let sink = Arc::new(RecordingSink::default());
        let dispatcher = EventDispatcher::new(store.clone(), sink.clone(), console);

        Fx {
            store,
            sink,
            dispatcher,
        }
    }

    fn drop_count(sink: &RecordingSink) -> i64 {
        sink.calls()
            .into_iter()
            .filter(|(_, metric, _)| *metric == Metric::Drop)
            .map(|(_, _, delta)| delta)
            .sum()
    }

    #[test]
    fn first_out_of_coverage_is_not_a_drop() {
        let mut fx = fx(None);

        fx.dispatcher.dispatch(ModemEvent::NetworkStateChange(4));

        assert_eq!(drop_count(&fx.sink), 0);
        assert_eq!(fx.store.get_u32(AttrId::NetworkState, 0), 4);
    }

    #[test]
    fn registered_then_disconnected_counts_one_drop() {
        let mut fx = fx(None);

        for code in [1, 4, 0] {
            fx.dispatcher.dispatch(ModemEvent::NetworkStateChange(code));
        }

        assert_eq!(drop_count(&fx.sink), 1);
        assert_eq!(fx.store.get_u32(AttrId::NetworkState, 99), 0);
    }

    #[test]
    fn unknown_state_codes_are_stored_verbatim() {
        let mut fx = fx(None);

        fx.dispatcher.dispatch(ModemEvent::NetworkStateChange(1));
        fx.dispatcher.dispatch(ModemEvent::NetworkStateChange(7));

        assert_eq!(fx.store.get_u32(AttrId::NetworkState, 0), 7);
        assert_eq!(drop_count(&fx.sink), 0);
    }

    #[test]
    fn rsrp_goes_to_attribute_and_gauge() {
        let mut fx = fx(None);

        fx.dispatcher.dispatch(ModemEvent::Rssi(-95));

        assert_eq!(fx.store.get(AttrId::Rsrp), Some(AttrValue::I32(-95)));
        assert_eq!(fx.sink.calls(), vec![("set", Metric::Rsrp, -95)]);
    }

    #[test]
    fn sinr_goes_to_attribute_and_gauge() {
        let mut fx = fx(None);

        fx.dispatcher.dispatch(ModemEvent::Sinr(12));

        assert_eq!(fx.store.get(AttrId::Sinr), Some(AttrValue::I32(12)));
        assert_eq!(fx.sink.calls(), vec![("set", Metric::Sinr, 12)]);
    }

    #[test]
    fn modem_originated_config_is_not_broadcast() {
        let mut fx = fx(None);
        let changes = fx.store.subscribe();

        fx.dispatcher.dispatch(ModemEvent::ApnUpdate(Apn {
            value: "em".into(),
            username: String::new(),
        }));
        fx.dispatcher.dispatch(ModemEvent::Rat(1));
        fx.dispatcher.dispatch(ModemEvent::Bands("3,20".into()));

        assert!(changes.is_empty());
        assert_eq!(fx.store.get_string(AttrId::Apn).as_deref(), Some("em"));
        assert_eq!(fx.store.get(AttrId::Rat), Some(AttrValue::U8(1)));
        assert_eq!(fx.store.get_string(AttrId::Bands).as_deref(), Some("3,20"));
    }

    #[test]
    fn active_bands_and_revision_are_broadcast() {
        let mut fx = fx(None);
        let changes = fx.store.subscribe();

        fx.dispatcher
            .dispatch(ModemEvent::ActiveBands("20".into()));
        fx.dispatcher
            .dispatch(ModemEvent::Revision("HL7800.4.6.9.4".into()));

        assert_eq!(
            changes.drain().collect::<Vec<_>>(),
            vec![vec![AttrId::ActiveBands], vec![AttrId::Version]]
        );
    }

    #[test]
    fn status_codes_are_written_verbatim() {
        let mut fx = fx(None);

        fx.dispatcher.dispatch(ModemEvent::StartupStateChange(2));
        fx.dispatcher.dispatch(ModemEvent::SleepStateChange(1));
        fx.dispatcher.dispatch(ModemEvent::FotaState(3));
        fx.dispatcher.dispatch(ModemEvent::FotaCount(1024));

        assert_eq!(fx.store.get_u32(AttrId::StartupState, 0), 2);
        assert_eq!(fx.store.get_u32(AttrId::SleepState, 0), 1);
        assert_eq!(fx.store.get_u32(AttrId::FupStatus, 0), 3);
    }

    #[test]
    fn socket_stats_accumulate_into_totals() {
        let mut fx = fx(None);
        let stats = SocketStats {
            udp_tx: 100,
            udp_rx: 0,
            tcp_tx: 50,
            tcp_rx: 25,
        };

        fx.dispatcher.dispatch(ModemEvent::SocketStats(stats));
        fx.dispatcher.dispatch(ModemEvent::SocketStats(stats));

        assert_eq!(fx.store.get_u32(AttrId::UdpTx, 0), 200);
        assert_eq!(fx.store.get_u32(AttrId::UdpRx, 99), 0);
        assert_eq!(fx.store.get_u32(AttrId::TcpTx, 0), 100);
        assert_eq!(fx.store.get_u32(AttrId::TcpRx, 0), 50);
        assert_eq!(fx.store.get_u32(AttrId::DataTotal, 0), 350);

        let once = vec![
            ("add", Metric::UdpTx, 100),
            ("add", Metric::UdpRx, 0),
            ("add", Metric::TcpTx, 50),
            ("add", Metric::TcpRx, 25),
            ("add", Metric::DataTotal, 175),
        ];
        assert_eq!(fx.sink.calls(), [once.clone(), once].concat());
    }

    #[test]
    fn only_non_zero_socket_counters_are_logged() {
        let logs = SharedBuf::default();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .with_writer({
                let logs = logs.clone();
                move || logs.clone()
            })
            .finish();
        let mut fx = fx(None);

        tracing::subscriber::with_default(subscriber, || {
            fx.dispatcher.dispatch(ModemEvent::SocketStats(SocketStats {
                udp_tx: 100,
                udp_rx: 0,
                tcp_tx: 50,
                tcp_rx: 25,
            }));
            fx.dispatcher.dispatch(ModemEvent::Unknown(13));
        });

        let logs = logs.contents();
        assert!(logs.contains("UDP TX bytes: 100"), "{logs}");
        assert!(logs.contains("TCP TX bytes: 50"), "{logs}");
        assert!(logs.contains("TCP RX bytes: 25"), "{logs}");
        assert!(!logs.contains("UDP RX bytes"), "{logs}");
        assert!(logs.contains("Unhandled event 13"), "{logs}");

        // zero counters are still accumulated
        assert_eq!(fx.store.get(AttrId::UdpRx), Some(AttrValue::U32(0)));
        assert_eq!(fx.store.get_u32(AttrId::DataTotal, 0), 175);
    }

    #[test]
    fn site_survey_is_printed_to_the_console() {
        let buf = SharedBuf::default();
        let mut fx = fx(Some(Box::new(buf.clone())));

        fx.dispatcher.dispatch(ModemEvent::SiteSurvey(None));
        assert_eq!(buf.contents(), "");

        fx.dispatcher
            .dispatch(ModemEvent::SiteSurvey(Some(SiteSurvey {
                earfcn: 6400,
                cell_id: 42,
                rsrp: -101,
                rsrq: -11,
            })));

        assert_eq!(
            buf.contents(),
            "EARFCN: 6400\nCell Id: 42\nRSRP: -101\nRSRQ: -11\n"
        );
    }

    #[test]
    fn survey_without_console_is_dropped() {
        let mut fx = fx(None);

        fx.dispatcher
            .dispatch(ModemEvent::SiteSurvey(Some(SiteSurvey::default())));
        fx.dispatcher.dispatch(ModemEvent::Unknown(13));

        assert!(fx.sink.calls().is_empty());
    }

    #[test]
    fn rejected_writes_do_not_stop_dispatch() {
        let store = Arc::new(MemoryAttrStore::new(4));
        let sink = Arc::new(RecordingSink::default());
        let mut dispatcher = EventDispatcher::new(store.clone(), sink.clone(), None);

        dispatcher.dispatch(ModemEvent::Revision("much too long".into()));
        dispatcher.dispatch(ModemEvent::Rssi(-80));

        assert_eq!(store.get(AttrId::Version), None);
        assert_eq!(store.get(AttrId::Rsrp), Some(AttrValue::I32(-80)));
    }

    #[tokio::test]
    async fn spawned_dispatcher_drains_until_the_driver_hangs_up() {
        let fx = fx(None);
        let (tx, rx) = flume::unbounded();

        let handle = fx.dispatcher.spawn(rx);
        tx.send(ModemEvent::NetworkStateChange(5)).unwrap();
        tx.send(ModemEvent::NetworkStateChange(0)).unwrap();
        drop(tx);

        handle.await.unwrap().unwrap();
        assert_eq!(fx.store.get_u32(AttrId::NetworkState, 99), 0);
        assert_eq!(drop_count(&fx.sink), 1);
    }
}
