mod backend;
mod bus;
mod cli;
mod config;
mod daemon;
mod error;
mod gpio;
mod power;
mod timer;

pub use bus::{DbusJobSource, JobEvent, JobSource};
pub use cli::{BackendArg, Cli};
pub use config::{AppConfig, BackendKind, BusConfig, BusKind, GpioConfig};
pub use daemon::{Readiness, ReadinessWaiter, detach, serve, serve_notify, termination_signal};
pub use error::AppError;
pub use gpio::{GpioBackend, GpioLine, Level, LineState};
pub use power::{
    Polarity, PowerController, PowerEvent, PowerSettings, PowerState, TransitionCause,
};
pub use timer::{DebounceTimer, TimerHandle, TimerState};

#[cfg(feature = "gpiod")]
pub use backend::LibgpiodBackend;
pub use backend::{MockGpioBackend, SysfsBackend};
