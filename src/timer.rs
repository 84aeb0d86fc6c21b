//! Single-slot, rearmable off-delay timer.
//!
//! The timer never runs a callback on its own. Its owner polls
//! [`DebounceTimer::expired`] from the event loop and performs the expiry
//! action there, so arming, rearming and expiry are serialized by `&mut self`.

use std::future::pending;
use std::pin::Pin;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::time::{Instant, Sleep, sleep_until};

// roughly 30 years, the cap for deadlines that overflow `Instant`
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerState {
    Idle,
    Armed,
    Fired,
    Cancelled,
}

/// Identifies one arming of a [`DebounceTimer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(u64);

pub struct DebounceTimer {
    sleep: Option<Pin<Box<Sleep>>>,
    state: TimerState,
    generation: u64,
}

impl Default for DebounceTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl DebounceTimer {
    pub fn new() -> Self {
        Self {
            sleep: None,
            state: TimerState::Idle,
            generation: 0,
        }
    }

    pub fn state(&self) -> TimerState {
        self.state
    }

    pub fn is_armed(&self) -> bool {
        self.state == TimerState::Armed
    }

    /// Deadline of the outstanding arming.
    pub fn deadline(&self) -> Option<Instant> {
        match &self.sleep {
            Some(sleep) if self.is_armed() => Some(sleep.deadline()),
            _ => None,
        }
    }

    /// Schedules an expiry `duration` from now. The slot holds one arming, so
    /// arming an armed timer replaces the previous arming. Durations past the
    /// representable range are capped to a deadline decades away.
    pub fn arm(&mut self, duration: Duration) -> TimerHandle {
        self.generation = self.generation.wrapping_add(1);
        let now = Instant::now();
        let deadline = now
            .checked_add(duration)
            .unwrap_or_else(|| now + FAR_FUTURE);
        match self.sleep.as_mut() {
            Some(sleep) => sleep.as_mut().reset(deadline),
            None => self.sleep = Some(Box::pin(sleep_until(deadline))),
        }
        self.state = TimerState::Armed;
        TimerHandle(self.generation)
    }

    /// Cancels `current` if it is still outstanding, then arms again.
    pub fn rearm(&mut self, current: Option<TimerHandle>, duration: Duration) -> TimerHandle {
        if let Some(handle) = current {
            self.cancel(handle);
        }
        self.arm(duration)
    }

    /// Returns `true` if `handle` was the outstanding arming. Stale handles
    /// are ignored.
    pub fn cancel(&mut self, handle: TimerHandle) -> bool {
        if handle.0 != self.generation || self.state != TimerState::Armed {
            return false;
        }
        self.state = TimerState::Cancelled;
        true
    }

    /// Resolves with the handle of the outstanding arming once it elapses.
    ///
    /// Pending forever while nothing is armed. Dropping the future before it
    /// resolves leaves the arming untouched, so it can be used as a
    /// `tokio::select!` branch.
    pub async fn expired(&mut self) -> TimerHandle {
        match self.sleep.as_mut() {
            Some(sleep) if self.state == TimerState::Armed => sleep.as_mut().await,
            _ => pending::<()>().await,
        }
        self.state = TimerState::Fired;
        TimerHandle(self.generation)
    }
}

/// Wall-clock milliseconds since the Unix epoch, 0 if the clock is before it.
pub(crate) fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
