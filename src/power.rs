use std::future::Future;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::{broadcast, mpsc};

use crate::bus::JobEvent;
use crate::config::AppConfig;
use crate::error::AppError;
use crate::gpio::{GpioBackend, GpioLine, Level, LineState};
use crate::timer::{DebounceTimer, TimerHandle, TimerState, epoch_millis};

const POWER_EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerState {
    Idle,
    Powered,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionCause {
    Startup,
    JobObserved,
    OffDelayElapsed,
    Shutdown,
}

#[derive(Debug, Clone)]
pub struct PowerEvent {
    pub state: PowerState,
    pub level: Level,
    pub cause: TransitionCause,
    /// Whether the level actually reached the line.
    pub applied: bool,
    pub timestamp_ms: u64,
}

/// Maps the logical relay state onto line levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Polarity {
    pub active_low: bool,
}

impl Polarity {
    pub fn on_level(&self) -> Level {
        if self.active_low { Level::Low } else { Level::High }
    }

    pub fn off_level(&self) -> Level {
        if self.active_low { Level::High } else { Level::Low }
    }
}

#[derive(Debug, Clone)]
pub struct PowerSettings {
    pub line: u32,
    pub off_delay: Duration,
    pub polarity: Polarity,
    pub power_on_at_start: bool,
}

impl From<&AppConfig> for PowerSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            line: config.gpio.line,
            off_delay: config.off_delay(),
            polarity: Polarity {
                active_low: config.gpio.active_low,
            },
            power_on_at_start: config.power_on_at_start,
        }
    }
}

/// Drives the relay line from job notifications and the off-delay timer.
///
/// The machine is `Powered` exactly while an off-delay is armed; the relay
/// state is read back from the line rather than tracked separately.
pub struct PowerController<B: GpioBackend> {
    line: GpioLine<B>,
    timer: DebounceTimer,
    pending_off: Option<TimerHandle>,
    settings: PowerSettings,
    events: broadcast::Sender<PowerEvent>,
}

impl<B: GpioBackend> PowerController<B> {
    /// Claims the line, switches it to output and drives the initial level.
    ///
    /// Any failure here is fatal; a line that was already claimed is
    /// released again before the error is returned.
    pub fn start(backend: B, settings: PowerSettings) -> Result<Self, AppError> {
        let mut line = GpioLine::claim(backend, settings.line)?;
        line.configure_output()?;
        line.write(settings.polarity.off_level())?;

        let (events, _) = broadcast::channel(POWER_EVENT_CAPACITY);
        let mut controller = Self {
            line,
            timer: DebounceTimer::new(),
            pending_off: None,
            settings,
            events,
        };

        info!(
            "gpio line {} ready, relay off, off-delay {}s",
            controller.settings.line,
            controller.settings.off_delay.as_secs()
        );

        if controller.settings.power_on_at_start {
            controller.power_on(TransitionCause::Startup);
        } else {
            let off = controller.settings.polarity.off_level();
            controller.publish(TransitionCause::Startup, off, true);
        }

        Ok(controller)
    }

    pub fn state(&self) -> PowerState {
        match self.timer.state() {
            TimerState::Armed => PowerState::Powered,
            _ => PowerState::Idle,
        }
    }

    /// `true` while the line carries the "on" level.
    pub fn is_output_asserted(&self) -> bool {
        self.line.level() == Some(self.settings.polarity.on_level())
    }

    pub fn line_state(&self) -> LineState {
        self.line.state()
    }

    pub fn settings(&self) -> &PowerSettings {
        &self.settings
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PowerEvent> {
        self.events.subscribe()
    }

    pub fn job_observed(&mut self, job: &JobEvent) {
        debug!(
            "print job observed from {}",
            job.sender.as_deref().unwrap_or("unknown sender")
        );
        self.power_on(TransitionCause::JobObserved);
    }

    pub fn off_delay_elapsed(&mut self) {
        self.pending_off = None;
        let off = self.settings.polarity.off_level();
        let applied = self.drive(off);
        if applied {
            info!(
                "no print jobs for {}s, relay off",
                self.settings.off_delay.as_secs()
            );
        }
        self.publish(TransitionCause::OffDelayElapsed, off, applied);
    }

    /// Processes jobs and timer expiries until `shutdown` resolves or the job
    /// source goes away, then switches the relay off and releases the line.
    pub async fn run<F>(
        mut self,
        jobs: &mut mpsc::Receiver<JobEvent>,
        shutdown: F,
    ) -> Result<(), AppError>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        let result = loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!("termination requested");
                    break Ok(());
                }
                job = jobs.recv() => match job {
                    Some(job) => self.job_observed(&job),
                    None => {
                        break Err(AppError::BusConnection("job event source closed".into()));
                    }
                },
                handle = self.timer.expired() => {
                    if Some(handle) == self.pending_off {
                        self.off_delay_elapsed();
                    }
                }
            }
        };

        jobs.close();
        if let Err(e) = self.shutdown() {
            warn!("release of gpio line failed during shutdown: {e}");
        }
        result
    }

    /// Cancels any pending off-delay, switches the relay off (best effort) and
    /// releases the line. Release failures are returned for logging only.
    pub fn shutdown(&mut self) -> Result<(), AppError> {
        if !self.line.state().is_claimed() {
            return Ok(());
        }
        if let Some(handle) = self.pending_off.take() {
            self.timer.cancel(handle);
        }
        let off = self.settings.polarity.off_level();
        let applied = self.drive(off);
        self.publish(TransitionCause::Shutdown, off, applied);
        self.line.release()
    }

    fn power_on(&mut self, cause: TransitionCause) {
        let on = self.settings.polarity.on_level();
        let was_asserted = self.is_output_asserted();
        let applied = self.drive(on);
        // rearm even after a failed write so the next expiry retries the off level
        self.pending_off = Some(self.timer.rearm(self.pending_off, self.settings.off_delay));
        if applied && !was_asserted {
            info!("print job activity, relay on");
        }
        self.publish(cause, on, applied);
    }

    fn drive(&mut self, level: Level) -> bool {
        match self.line.write(level) {
            Ok(()) => true,
            Err(e) => {
                warn!("write {level} to gpio line {} failed: {e}", self.settings.line);
                false
            }
        }
    }

    fn publish(&self, cause: TransitionCause, level: Level, applied: bool) {
        let _ = self.events.send(PowerEvent {
            state: self.state(),
            level,
            cause,
            applied,
            timestamp_ms: epoch_millis(),
        });
    }
}
