use super::{Metric, TelemetrySink};
use flume::Sender;
use std::{thread, time::Duration};
use tracing::{error, warn};

const NO_TAGS: &[&str] = &[];

/// Forwards metrics to the local datadog agent.
///
/// The dogstatsd client does blocking socket I/O, so it lives on its own thread and
/// the sink only ever enqueues. Calls never wait for the agent.
pub struct DogstatsdSink {
    tx: Sender<Msg>,
}

impl DogstatsdSink {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        let backoff = Duration::from_secs(10);
        let (tx, rx) = flume::unbounded();

        thread::spawn(move || {
            let client = loop {
                match dogstatsd::Client::new(dogstatsd::Options::default()) {
                    Ok(client) => break client,
                    Err(e) => {
                        error!(
                            "failed to create dd client: {e}, trying again in {}s",
                            backoff.as_secs()
                        );

                        thread::sleep(backoff);
                    }
                }
            };

            while let Ok(msg) = rx.recv() {
                let result = match &msg {
                    Msg::IncrByValue { metric, value } => {
                        client.incr_by_value(metric.to_string(), *value, NO_TAGS)
                    }

                    Msg::Gauge { metric, value } => {
                        client.gauge(metric.to_string(), value.to_string(), NO_TAGS)
                    }
                };

                if let Err(e) = result {
                    warn!("failed to send {msg:?} to dogstatsd: {e}");
                }
            }
        });

        Self { tx }
    }

    fn enqueue(&self, msg: Msg) {
        if let Err(e) = self.tx.send(msg) {
            warn!("dogstatsd worker is gone, dropping {:?}", e.into_inner());
        }
    }
}

impl TelemetrySink for DogstatsdSink {
    fn add(&self, metric: Metric, delta: i64) {
        self.enqueue(Msg::IncrByValue {
            metric,
            value: delta,
        });
    }

    fn set_signed(&self, metric: Metric, value: i64) {
        self.enqueue(Msg::Gauge { metric, value });
    }
}

#[derive(Debug)]
enum Msg {
    IncrByValue { metric: Metric, value: i64 },
    Gauge { metric: Metric, value: i64 },
}
