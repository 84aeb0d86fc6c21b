use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Resource unavailable: {0}")]
    ResourceUnavailable(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Permission denied: {0}")]
    PermissionDenied(String),
    #[error("I/O error: {0}")]
    Io(String),
    #[error("Invalid state: {0}")]
    InvalidState(String),
    #[error("Bus connection failed: {0}")]
    BusConnection(String),
    #[error("Option parsing failed: {0}")]
    OptionParse(String),
    #[error("Configuration error: {0}")]
    Config(String),
}

impl AppError {
    /// Classifies an OS error raised while touching the GPIO subsystem.
    pub fn from_io(context: impl AsRef<str>, err: io::Error) -> Self {
        let context = context.as_ref();
        match err.kind() {
            io::ErrorKind::NotFound | io::ErrorKind::InvalidInput => {
                AppError::NotFound(format!("{context}: {err}"))
            }
            io::ErrorKind::PermissionDenied => {
                AppError::PermissionDenied(format!("{context}: {err}"))
            }
            io::ErrorKind::ResourceBusy => {
                AppError::ResourceUnavailable(format!("{context}: {err}"))
            }
            _ => AppError::Io(format!("{context}: {err}")),
        }
    }

    /// Process exit status for a fatal error, following sysexits(3).
    pub fn exit_code(&self) -> u8 {
        match self {
            AppError::OptionParse(_) => 64,
            AppError::ResourceUnavailable(_)
            | AppError::NotFound(_)
            | AppError::BusConnection(_) => 69,
            AppError::InvalidState(_) => 70,
            AppError::Io(_) => 74,
            AppError::PermissionDenied(_) => 77,
            AppError::Config(_) => 78,
        }
    }
}
