use attr::{AttrId, AttrValue, AttributeStore, WriteMode};
use color_eyre::eyre::{Result, eyre};
use dispatcher::{Console, EventDispatcher};
use listener::{ChangeListener, log_err, persisted_log_level};
use modem::{ModemDriver, ModemError};
use settings::Settings;
use statsd::TelemetrySink;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info};

pub mod attr;
pub mod dispatcher;
pub mod listener;
pub mod modem;
pub mod settings;
pub mod shell;
pub mod statsd;

pub type Tasks = Vec<JoinHandle<Result<()>>>;

/// Values of the `lte_init_error` attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum InitError {
    None = 0,
    Modem = -1,
}

/// Wires the modem driver and the attribute store together.
///
/// Applies the persisted log level, starts the change listener, optionally resets
/// the modem, publishes the modem's identity, starts the event dispatcher, asks for
/// a status replay and finally marks the traffic counters quiet. Returns the
/// listener and dispatcher tasks.
///
/// A failed boot reset returns `Err` before the identity is published and before
/// the dispatcher starts. The listener is left running.
#[bon::builder(finish_fn = run)]
pub async fn bridge<D, S, T>(
    driver: Arc<D>,
    store: Arc<S>,
    telemetry: T,
    #[builder(default)] settings: Settings,
    console: Option<Console>,
) -> Result<Tasks>
where
    D: ModemDriver,
    S: AttributeStore,
    T: TelemetrySink,
{
    info!("starting lte bridge with {settings:?}");

    if let Some(level) = persisted_log_level(store.as_ref(), settings.default_log_level) {
        log_err(driver.log_filter_set(level).await, "Change log lvl");
    }

    let listener = ChangeListener::new(
        driver.clone(),
        store.clone(),
        settings.default_log_level,
        settings.default_rat,
    )
    .spawn(store.subscribe());

    if settings.reset_on_boot {
        info!("resetting modem");

        if let Err(e) = driver.reset().await {
            error!("Modem reset [{}]", e.code);
            set_init_error(store.as_ref(), InitError::Modem);
            // dropping the handle detaches the listener, config changes keep
            // reaching the modem
            drop(listener);

            return Err(eyre!("modem reset failed: {e}"));
        }
    }

    publish(store.as_ref(), AttrId::Imei, driver.imei().await);
    publish(store.as_ref(), AttrId::Version, driver.firmware_version().await);
    publish(store.as_ref(), AttrId::Iccid, driver.iccid().await);
    publish(store.as_ref(), AttrId::SerialNumber, driver.serial_number().await);
    publish(store.as_ref(), AttrId::Imsi, driver.imsi().await);

    match driver.operator_index().await {
        Ok(index) => {
            if let Err(e) = store.set(
                AttrId::OperatorIndex,
                AttrValue::U32(index),
                WriteMode::Broadcast,
            ) {
                error!("Set {} [{e}]", AttrId::OperatorIndex);
            }
        }
        Err(e) => info!("no operator index [{}]", e.code),
    }

    let dispatcher = EventDispatcher::new(store.clone(), telemetry, console)
        .spawn(driver.subscribe());

    log_err(driver.generate_status_events().await, "Status replay");

    set_init_error(store.as_ref(), InitError::None);

    for id in AttrId::COUNTERS {
        if let Err(e) = store.set_quiet(id, true) {
            error!("Quiet {id} [{e}]");
        }
    }

    Ok(vec![listener, dispatcher])
}

fn publish(store: &impl AttributeStore, id: AttrId, value: Result<String, ModemError>) {
    let value = match value {
        Ok(value) => value,
        Err(e) => {
            error!("Get {id} [{}]", e.code);
            return;
        }
    };

    if let Err(e) = store.set(id, AttrValue::Str(value), WriteMode::Broadcast) {
        error!("Set {id} [{e}]");
    }
}

fn set_init_error(store: &impl AttributeStore, value: InitError) {
    let id = AttrId::InitError;
    if let Err(e) = store.set(id, AttrValue::I32(value as i32), WriteMode::Broadcast) {
        error!("Set {id} [{e}]");
    }
}
