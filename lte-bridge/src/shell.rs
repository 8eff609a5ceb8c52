use crate::{
    attr::AttributeStore,
    listener::{log_err, persisted_log_level},
    modem::{LogLevel, ModemDriver, ModemError},
    settings::Settings,
};
use clap::{Parser, error::ErrorKind};
use std::{
    ffi::OsString,
    io::{self, Write},
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};
use tokio::task::JoinHandle;
use tracing::{debug, error};

const CMD_OK_MSG: &str = "Ok";

/// HL7800 commands
#[derive(Parser, Debug, PartialEq, Eq)]
#[clap(name = "hl", arg_required_else_help = true)]
struct Args {
    #[clap(subcommand)]
    subcmd: SubCommand,
}

#[derive(Parser, Debug, PartialEq, Eq)]
enum SubCommand {
    /// CAUTION: Only use this for advanced debug! Send an AT command.
    #[clap(action)]
    Cmd {
        /// Seconds until the log level returns to normal
        #[clap(allow_hyphen_values = true)]
        delay: String,
        /// Raw AT command
        #[clap(allow_hyphen_values = true)]
        at_command: String,
    },
    /// Update firmware
    #[clap(action)]
    Fup {
        /// Firmware image on the modem's file system
        file: String,
    },
    /// Power off the modem. To turn it back on, reset it.
    #[clap(action)]
    Off,
    /// Reset and reconfigure the modem
    #[clap(action)]
    Reset,
    /// Site survey
    #[clap(action)]
    Survey,
}

#[derive(thiserror::Error, Debug)]
pub enum ShellError {
    #[error("invalid parameter")]
    InvalidParameter,
    #[error(transparent)]
    Driver(#[from] ModemError),
    #[error("failed to write shell output: {0}")]
    Io(#[from] io::Error),
}

impl ShellError {
    /// errno style return code.
    pub fn code(&self) -> i32 {
        match self {
            ShellError::InvalidParameter => -22,
            ShellError::Driver(e) => e.code,
            ShellError::Io(_) => -5,
        }
    }
}

/// The `hl` debug command group.
///
/// Pass-through to the modem driver. The only state is the pending log level
/// restore scheduled by `hl cmd`.
pub struct Shell<D, S> {
    driver: Arc<D>,
    store: Arc<S>,
    default_log_level: LogLevel,
    min_restore_delay: Duration,
    restore: Mutex<Option<JoinHandle<()>>>,
}

impl<D, S> Shell<D, S>
where
    D: ModemDriver,
    S: AttributeStore,
{
    pub fn new(driver: Arc<D>, store: Arc<S>, settings: &Settings) -> Self {
        Self {
            driver,
            store,
            default_log_level: settings.default_log_level,
            min_restore_delay: settings.min_log_restore_delay,
            restore: Mutex::new(None),
        }
    }

    /// Runs one `hl` invocation. `argv[0]` is the command group name itself.
    pub async fn execute<I, T>(&self, argv: I, out: &mut dyn Write) -> Result<(), ShellError>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let args = match Args::try_parse_from(argv) {
            Ok(args) => args,
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::DisplayHelp
                        | ErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
                ) =>
            {
                write!(out, "{}", e.render())?;
                return Ok(());
            }
            Err(e) => {
                debug!("rejected hl arguments: {e}");
                writeln!(out, "Invalid parameter")?;
                return Err(ShellError::InvalidParameter);
            }
        };

        match args.subcmd {
            SubCommand::Cmd { delay, at_command } => {
                self.send_at_cmd(&delay, &at_command, out).await
            }

            SubCommand::Fup { file } => {
                if let Err(e) = self.driver.update_fw(&file).await {
                    writeln!(out, "Command error")?;
                    return Err(e.into());
                }
                Ok(())
            }

            SubCommand::Off => {
                let result = self.driver.power_off().await;
                print_result(result, out)
            }

            SubCommand::Reset => {
                let result = self.driver.reset().await;
                print_result(result, out)
            }

            SubCommand::Survey => {
                // results show up later as a site survey event
                let status = match self.driver.perform_site_survey().await {
                    Ok(()) => 0,
                    Err(e) => e.code,
                };
                writeln!(out, "survey status: {status}")?;
                Ok(())
            }
        }
    }

    /// Whether a log level restore is scheduled and has not run yet.
    pub fn restore_pending(&self) -> bool {
        self.restore
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    async fn send_at_cmd(
        &self,
        delay: &str,
        at_command: &str,
        out: &mut dyn Write,
    ) -> Result<(), ShellError> {
        // responses to most commands are only visible at debug level
        log_err(
            self.driver.log_filter_set(LogLevel::Debug).await,
            "Change log lvl",
        );

        let result = self.driver.send_at_cmd(at_command).await;
        if result.is_err() {
            writeln!(out, "Command not accepted")?;
        }

        self.schedule_restore(self.restore_delay(delay));

        Ok(result?)
    }

    fn restore_delay(&self, delay: &str) -> Duration {
        u64::try_from(parse_delay(delay))
            .map(Duration::from_secs)
            .unwrap_or_default()
            .max(self.min_restore_delay)
    }

    fn schedule_restore(&self, delay: Duration) {
        let driver = self.driver.clone();
        let store = self.store.clone();
        let default = self.default_log_level;

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;

            if let Some(level) = persisted_log_level(store.as_ref(), default) {
                log_err(driver.log_filter_set(level).await, "Restore log lvl");
            }
        });

        let mut pending = self.restore.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = pending.replace(handle) {
            previous.abort();
        }
    }
}

fn print_result(result: Result<(), ModemError>, out: &mut dyn Write) -> Result<(), ShellError> {
    match result {
        Ok(()) => {
            writeln!(out, "{CMD_OK_MSG}")?;
            Ok(())
        }
        Err(e) => {
            error!("hl command failed [{}]", e.code);
            writeln!(out, "Error [{}]", e.code)?;
            Err(e.into())
        }
    }
}

/// Parses an integer the way C's `strtol(text, NULL, 0)` does: optional sign,
/// `0x` for hex, a leading `0` for octal. Parsing stops at the first invalid
/// digit and text without digits reads as 0. Out of range values saturate.
pub fn parse_delay(text: &str) -> i64 {
    let s = text.trim_start();
    let (negative, s) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };

    let (radix, digits) = if let Some(hex) = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .filter(|rest| rest.starts_with(|c: char| c.is_ascii_hexdigit()))
    {
        (16, hex)
    } else if s.starts_with('0') {
        (8, s)
    } else {
        (10, s)
    };

    let mut value: i64 = 0;
    for digit in digits.chars().map_while(|c| c.to_digit(radix)) {
        value = value
            .saturating_mul(radix.into())
            .saturating_add(digit.into());
    }

    if negative { value.saturating_neg() } else { value }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_parses_like_strtol() {
        assert_eq!(parse_delay("5"), 5);
        assert_eq!(parse_delay("  42"), 42);
        assert_eq!(parse_delay("0x1f"), 31);
        assert_eq!(parse_delay("0X10"), 16);
        assert_eq!(parse_delay("010"), 8);
        assert_eq!(parse_delay("-3"), -3);
        assert_eq!(parse_delay("+7"), 7);
        assert_eq!(parse_delay("12abc"), 12);
        assert_eq!(parse_delay("09"), 0);
        assert_eq!(parse_delay("0x"), 0);
        assert_eq!(parse_delay("soon"), 0);
        assert_eq!(parse_delay(""), 0);
        assert_eq!(parse_delay("99999999999999999999999"), i64::MAX);
    }

    #[test]
    fn subcommands_parse() {
        let args = Args::try_parse_from(["hl", "cmd", "10", "AT+CGMR"]).unwrap();
        assert_eq!(
            args.subcmd,
            SubCommand::Cmd {
                delay: "10".into(),
                at_command: "AT+CGMR".into(),
            }
        );

        let args = Args::try_parse_from(["hl", "cmd", "-1", "AT"]).unwrap();
        assert_eq!(
            args.subcmd,
            SubCommand::Cmd {
                delay: "-1".into(),
                at_command: "AT".into(),
            }
        );

        let args = Args::try_parse_from(["hl", "fup", "/fw.ua"]).unwrap();
        assert_eq!(
            args.subcmd,
            SubCommand::Fup {
                file: "/fw.ua".into()
            }
        );
    }

    #[test]
    fn wrong_argument_counts_are_rejected() {
        assert!(Args::try_parse_from(["hl", "cmd", "10"]).is_err());
        assert!(Args::try_parse_from(["hl", "cmd", "10", "AT", "extra"]).is_err());
        assert!(Args::try_parse_from(["hl", "fup"]).is_err());
        assert!(Args::try_parse_from(["hl", "off", "now"]).is_err());
    }

    #[test]
    fn error_codes() {
        assert_eq!(ShellError::InvalidParameter.code(), -22);
        assert_eq!(ShellError::Driver(ModemError::new(-116)).code(), -116);
    }
}
