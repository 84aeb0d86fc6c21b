use std::fmt;

use log::{debug, warn};

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Level {
    Low,
    High,
}

impl Level {
    pub fn as_u8(self) -> u8 {
        match self {
            Level::Low => 0,
            Level::High => 1,
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u8())
    }
}

/// Lifecycle of the controlled line as seen by this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineState {
    Unclaimed,
    ClaimedInput,
    /// Output with the last level that was written successfully, if any.
    ClaimedOutput(Option<Level>),
    Released,
}

impl LineState {
    pub fn is_claimed(&self) -> bool {
        matches!(self, LineState::ClaimedInput | LineState::ClaimedOutput(_))
    }

    pub fn is_writable(&self) -> bool {
        matches!(self, LineState::ClaimedOutput(_))
    }
}

/// Host specific access to a single GPIO line.
///
/// Implementations only perform the raw operation; ordering rules (claim
/// before configure, configure before write, release once) are enforced by
/// [`GpioLine`].
pub trait GpioBackend: Send {
    fn claim(&mut self, line: u32) -> Result<(), AppError>;
    fn configure_output(&mut self, line: u32) -> Result<(), AppError>;
    fn write(&mut self, line: u32, level: Level) -> Result<(), AppError>;
    fn release(&mut self, line: u32) -> Result<(), AppError>;
}

/// Exclusive owner of one claimed GPIO line.
///
/// The line is released at most once: either through [`GpioLine::release`] or
/// when the value is dropped on an abnormal exit path.
pub struct GpioLine<B: GpioBackend> {
    line: u32,
    state: LineState,
    backend: B,
}

impl<B: GpioBackend> GpioLine<B> {
    pub fn claim(mut backend: B, line: u32) -> Result<Self, AppError> {
        backend.claim(line)?;
        debug!("claimed gpio line {line}");
        Ok(Self {
            line,
            state: LineState::ClaimedInput,
            backend,
        })
    }

    pub fn line(&self) -> u32 {
        self.line
    }

    pub fn state(&self) -> LineState {
        self.state
    }

    /// Last level written successfully, `None` before the first write.
    pub fn level(&self) -> Option<Level> {
        match self.state {
            LineState::ClaimedOutput(level) => level,
            _ => None,
        }
    }

    pub fn configure_output(&mut self) -> Result<(), AppError> {
        match self.state {
            LineState::ClaimedInput => {
                self.backend.configure_output(self.line)?;
                self.state = LineState::ClaimedOutput(None);
                debug!("gpio line {} configured as output", self.line);
                Ok(())
            }
            LineState::ClaimedOutput(_) => Ok(()),
            state => Err(AppError::InvalidState(format!(
                "cannot configure gpio line {} in state {state:?}",
                self.line
            ))),
        }
    }

    pub fn write(&mut self, level: Level) -> Result<(), AppError> {
        if !self.state.is_writable() {
            return Err(AppError::InvalidState(format!(
                "gpio line {} must be configured as output before writing",
                self.line
            )));
        }
        self.backend.write(self.line, level)?;
        self.state = LineState::ClaimedOutput(Some(level));
        Ok(())
    }

    pub fn release(&mut self) -> Result<(), AppError> {
        if !self.state.is_claimed() {
            return Ok(());
        }
        // a failed release is not retried, the line is gone from our side either way
        self.state = LineState::Released;
        self.backend.release(self.line)?;
        debug!("released gpio line {}", self.line);
        Ok(())
    }
}

impl<B: GpioBackend> Drop for GpioLine<B> {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!("release of gpio line {} failed: {e}", self.line);
        }
    }
}
