use std::path::PathBuf;

use clap::Parser;

use crate::config::{AppConfig, BackendKind};
use crate::error::AppError;

/// Powers a printer relay while print jobs arrive and switches it off after
/// an idle delay.
#[derive(Debug, Parser)]
#[command(name = "printrelay", version, about)]
pub struct Cli {
    /// GPIO output line number [default: 23]
    #[arg(short = 'g', long = "gpio", value_name = "LINE")]
    pub gpio: Option<u32>,

    /// Seconds without print jobs before the printer is switched off [default: 180]
    #[arg(
        short = 't',
        long = "time",
        value_name = "SECONDS",
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub time: Option<u64>,

    /// JSON configuration file; command line options take precedence
    #[arg(short = 'c', long, env = "PRINTRELAY_CONFIG", value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// GPIO access method
    #[arg(long, value_enum)]
    pub backend: Option<BackendArg>,

    /// Stay attached to the terminal instead of daemonizing
    #[arg(short = 'f', long)]
    pub foreground: bool,

    /// Append log output to this file instead of stderr
    #[arg(long, value_name = "PATH")]
    pub log_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum BackendArg {
    Sysfs,
    Gpiod,
}

impl From<BackendArg> for BackendKind {
    fn from(arg: BackendArg) -> Self {
        match arg {
            BackendArg::Sysfs => BackendKind::Sysfs,
            BackendArg::Gpiod => BackendKind::Gpiod,
        }
    }
}

impl Cli {
    /// Parses `args`, leaving help and version requests to clap.
    pub fn parse_args<I, T>(args: I) -> Result<Self, AppError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        match Cli::try_parse_from(args) {
            Ok(cli) => Ok(cli),
            Err(e) if !e.use_stderr() => e.exit(),
            Err(e) => Err(AppError::OptionParse(e.to_string())),
        }
    }

    /// Defaults, then the configuration file, then command line options.
    pub fn resolve_config(&self) -> Result<AppConfig, AppError> {
        let mut config = match &self.config {
            Some(path) => AppConfig::load_from_file(path)?,
            None => AppConfig::default(),
        };
        if let Some(line) = self.gpio {
            config.gpio.line = line;
        }
        if let Some(secs) = self.time {
            config.off_delay_secs = secs;
        }
        if let Some(backend) = self.backend {
            config.gpio.backend = backend.into();
        }
        config.validate()?;
        Ok(config)
    }
}
