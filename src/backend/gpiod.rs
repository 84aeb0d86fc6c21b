use std::io;
use std::path::{Path, PathBuf};

use libgpiod::{chip::Chip, line, request};

use crate::config::DEFAULT_GPIO_CHIP;
use crate::error::AppError;
use crate::gpio::{GpioBackend, Level};

/// Character device backend (`/dev/gpiochipN`) for hosts without sysfs gpio.
pub struct LibgpiodBackend {
    chip: PathBuf,
    request: Option<request::Request>,
}

impl Default for LibgpiodBackend {
    fn default() -> Self {
        Self::new(DEFAULT_GPIO_CHIP)
    }
}

impl LibgpiodBackend {
    pub fn new<P: Into<PathBuf>>(chip: P) -> Self {
        Self {
            chip: chip.into(),
            request: None,
        }
    }

    fn open_chip(path: &Path) -> Result<Chip, AppError> {
        Chip::open(&path.to_path_buf())
            .map_err(|e| gpiod_error(format!("open chip {}", path.display()), e))
    }

    fn request_lines(chip: &Chip, line_cfg: &line::Config) -> Result<request::Request, AppError> {
        let mut req_cfg =
            request::Config::new().map_err(|e| gpiod_error("request config", e))?;
        req_cfg
            .set_consumer(env!("CARGO_PKG_NAME"))
            .map_err(|e| gpiod_error("request consumer", e))?;
        chip.request_lines(Some(&req_cfg), line_cfg)
            .map_err(|e| gpiod_error("request lines", e))
    }

    fn make_line_config(offset: u32, direction: line::Direction) -> Result<line::Config, AppError> {
        let mut ls = line::Settings::new().map_err(|e| gpiod_error("line settings", e))?;
        ls.set_direction(direction)
            .map_err(|e| gpiod_error("set direction", e))?;
        let mut cfg = line::Config::new().map_err(|e| gpiod_error("line config", e))?;
        cfg.add_line_settings(&[offset], ls)
            .map_err(|e| gpiod_error("line config add settings", e))?;
        Ok(cfg)
    }

    fn request_mut(&mut self, line: u32) -> Result<&mut request::Request, AppError> {
        self.request
            .as_mut()
            .ok_or_else(|| AppError::InvalidState(format!("gpio line {line} not requested")))
    }
}

impl GpioBackend for LibgpiodBackend {
    fn claim(&mut self, line: u32) -> Result<(), AppError> {
        if self.request.is_some() {
            return Err(AppError::ResourceUnavailable(format!(
                "gpio line {line} already requested"
            )));
        }
        let chip = Self::open_chip(&self.chip)?;
        let line_cfg = Self::make_line_config(line, line::Direction::Input)?;
        self.request = Some(Self::request_lines(&chip, &line_cfg)?);
        Ok(())
    }

    fn configure_output(&mut self, line: u32) -> Result<(), AppError> {
        let line_cfg = Self::make_line_config(line, line::Direction::Output)?;
        self.request_mut(line)?
            .reconfigure_lines(&line_cfg)
            .map_err(|e| gpiod_error("reconfigure lines", e))?;
        Ok(())
    }

    fn write(&mut self, line: u32, level: Level) -> Result<(), AppError> {
        let value = match level {
            Level::Low => line::Value::InActive,
            Level::High => line::Value::Active,
        };
        self.request_mut(line)?
            .set_value(line, value)
            .map_err(|e| AppError::Io(format!("set value: {e}")))?;
        Ok(())
    }

    fn release(&mut self, _line: u32) -> Result<(), AppError> {
        // dropping the request hands the line back to the kernel
        self.request.take();
        Ok(())
    }
}

fn gpiod_error(context: impl AsRef<str>, err: libgpiod::Error) -> AppError {
    match err {
        libgpiod::Error::OperationFailed(_, errno) => {
            AppError::from_io(context, io::Error::from_raw_os_error(errno.0))
        }
        other => AppError::Io(format!("{}: {other}", context.as_ref())),
    }
}
