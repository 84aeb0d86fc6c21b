use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use log::{debug, warn};

use crate::config::DEFAULT_SYSFS_ROOT;
use crate::error::AppError;
use crate::gpio::{GpioBackend, Level};

// udev may need a moment to create and chown gpioN after export
const SYSFS_EXPORT_SETTLE_RETRIES: u32 = 20;
const SYSFS_EXPORT_SETTLE_INTERVAL: Duration = Duration::from_millis(25);

/// Legacy `/sys/class/gpio` interface.
///
/// Every value is written as plain ASCII without a trailing newline:
/// the decimal line number into `export`/`unexport`, `out` into
/// `gpioN/direction` and `0`/`1` into `gpioN/value`.
pub struct SysfsBackend {
    root: PathBuf,
}

impl Default for SysfsBackend {
    fn default() -> Self {
        Self::new(DEFAULT_SYSFS_ROOT)
    }
}

impl SysfsBackend {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn line_dir(&self, line: u32) -> PathBuf {
        self.root.join(format!("gpio{line}"))
    }

    fn write_attr(path: &Path, contents: &str) -> Result<(), AppError> {
        // never create attribute files, a missing one means no such gpio
        let mut file = OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(path)
            .map_err(|e| AppError::from_io(format!("open {}", path.display()), e))?;
        file.write_all(contents.as_bytes())
            .map_err(|e| AppError::from_io(format!("write {}", path.display()), e))?;
        debug!("{} <- {contents}", path.display());
        Ok(())
    }

    fn wait_exported(&self, line: u32) -> Result<(), AppError> {
        let direction = self.line_dir(line).join("direction");
        for _ in 0..SYSFS_EXPORT_SETTLE_RETRIES {
            if direction.exists() {
                return Ok(());
            }
            thread::sleep(SYSFS_EXPORT_SETTLE_INTERVAL);
        }
        Err(AppError::NotFound(format!(
            "{} did not appear after export",
            direction.display()
        )))
    }
}

impl GpioBackend for SysfsBackend {
    fn claim(&mut self, line: u32) -> Result<(), AppError> {
        Self::write_attr(&self.root.join("export"), &line.to_string())?;
        if let Err(e) = self.wait_exported(line) {
            // no GpioLine exists yet to release it, undo the export here
            if let Err(unexport_err) = self.release(line) {
                warn!("unexport of gpio line {line} failed: {unexport_err}");
            }
            return Err(e);
        }
        Ok(())
    }

    fn configure_output(&mut self, line: u32) -> Result<(), AppError> {
        Self::write_attr(&self.line_dir(line).join("direction"), "out")
    }

    fn write(&mut self, line: u32, level: Level) -> Result<(), AppError> {
        Self::write_attr(&self.line_dir(line).join("value"), &level.to_string())
            .map_err(|e| match e {
                // any failure on an exported line is a plain I/O failure
                AppError::NotFound(msg) => AppError::Io(msg),
                other => other,
            })
    }

    fn release(&mut self, line: u32) -> Result<(), AppError> {
        Self::write_attr(&self.root.join("unexport"), &line.to_string())
    }
}
