use crate::{
    modem::{LogLevel, RadioMode},
    statsd::{NoopSink, TelemetrySink, dd::DogstatsdSink},
};
use figment::{
    Figment,
    providers::{Env, Format as _, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use serde_with::{DurationSeconds, serde_as};
use std::{path::Path, time::Duration};

pub const ENV_PREFIX: &str = "ORB_LTE_BRIDGE_";

/// Tunables of the bridge.
///
/// The only entry point besides [`Settings::default`] is [`Settings::get`].
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Reset the modem before publishing its identity.
    pub reset_on_boot: bool,
    /// Log filter level used while `lte_log_lvl` is unset.
    pub default_log_level: LogLevel,
    /// Radio mode used while `lte_rat` is unset.
    pub default_rat: RadioMode,
    /// Lower bound for the `hl cmd` log level restore delay.
    #[serde_as(as = "DurationSeconds<u64>")]
    pub min_log_restore_delay: Duration,
    /// Longest string value the in-memory store accepts.
    pub max_string_len: usize,
    /// Report metrics to the local datadog agent.
    pub statsd: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            reset_on_boot: false,
            default_log_level: LogLevel::Debug,
            default_rat: RadioMode::CatM1,
            min_log_restore_delay: Duration::from_secs(1),
            max_string_len: 64,
            statsd: true,
        }
    }
}

impl Settings {
    /// Built-in defaults, overridden by the TOML file at `config`, overridden by
    /// environment variables starting with `env_prefix`.
    pub fn get(config: impl AsRef<Path>, env_prefix: &str) -> figment::error::Result<Self> {
        Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(config))
            .merge(Env::prefixed(env_prefix))
            .extract()
    }

    pub fn telemetry_sink(&self) -> Box<dyn TelemetrySink> {
        if self.statsd {
            Box::new(DogstatsdSink::new())
        } else {
            Box::new(NoopSink)
        }
    }
}
