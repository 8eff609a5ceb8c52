use crate::{
    attr::{AttrId, AttributeStore},
    modem::{LogLevel, ModemDriver, ModemError, RadioMode},
};
use color_eyre::Result;
use num_traits::{FromPrimitive as _, ToPrimitive as _};
use std::sync::Arc;
use tokio::task::{self, JoinHandle};
use tracing::{error, info, warn};

/// Pushes user or cloud initiated attribute changes down into the modem.
///
/// Only APN, bands, log level and RAT are watched, everything else in a change
/// batch is skipped.
pub struct ChangeListener<D, S> {
    driver: Arc<D>,
    store: Arc<S>,
    default_log_level: LogLevel,
    default_rat: RadioMode,
}

impl<D, S> ChangeListener<D, S>
where
    D: ModemDriver,
    S: AttributeStore,
{
    pub fn new(
        driver: Arc<D>,
        store: Arc<S>,
        default_log_level: LogLevel,
        default_rat: RadioMode,
    ) -> Self {
        Self {
            driver,
            store,
            default_log_level,
            default_rat,
        }
    }

    /// Applies one batch of changes, in batch order. A failing driver call is
    /// logged and the rest of the batch still goes through.
    pub async fn on_changed(&self, ids: &[AttrId]) {
        for id in ids {
            match id {
                AttrId::Apn => {
                    let apn = self.store.get_string(AttrId::Apn).unwrap_or_default();
                    log_err(self.driver.update_apn(&apn).await, "Set APN");
                }

                AttrId::Bands => {
                    let bands = self.store.get_string(AttrId::Bands).unwrap_or_default();
                    log_err(self.driver.set_bands(&bands).await, "Set Bands");
                }

                AttrId::LogLevel => {
                    let Some(level) = self.log_level() else {
                        continue;
                    };
                    log_err(self.driver.log_filter_set(level).await, "Change log lvl");
                }

                AttrId::Rat => {
                    let Some(mode) = self.rat() else {
                        continue;
                    };
                    log_err(self.driver.update_rat(mode).await, "Change RAT");
                }

                _ => {}
            }
        }
    }

    /// Drains change batches until the store drops its end.
    pub fn spawn(self, changes: flume::Receiver<Vec<AttrId>>) -> JoinHandle<Result<()>> {
        info!("starting attribute change listener");

        task::spawn(async move {
            while let Ok(ids) = changes.recv_async().await {
                self.on_changed(&ids).await;
            }

            warn!("attribute change channel closed, stopping listener");

            Ok(())
        })
    }

    /// The persisted log level, or the default when it was never set.
    pub fn log_level(&self) -> Option<LogLevel> {
        persisted_log_level(self.store.as_ref(), self.default_log_level)
    }

    fn rat(&self) -> Option<RadioMode> {
        let default = self.default_rat.to_u32().unwrap_or_default();
        let raw = self.store.get_u32(AttrId::Rat, default);
        let mode = RadioMode::from_u32(raw);
        if mode.is_none() {
            error!("Change RAT [unsupported radio mode {raw}]");
        }

        mode
    }
}

/// Reads the log level attribute. Values the driver can not represent are logged
/// and yield `None`.
pub fn persisted_log_level(store: &impl AttributeStore, default: LogLevel) -> Option<LogLevel> {
    let raw = store.get_u32(AttrId::LogLevel, default.to_u32().unwrap_or_default());
    let level = LogLevel::from_u32(raw);
    if level.is_none() {
        error!("Change log lvl [unsupported log level {raw}]");
    }

    level
}

pub(crate) fn log_err<T>(result: Result<T, ModemError>, msg: &str) {
    if let Err(e) = result {
        error!("{msg} [{}]", e.code);
    }
}
