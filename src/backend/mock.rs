use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::AppError;
use crate::gpio::{GpioBackend, Level};

/// In-memory backend. Clones share state, so a test can keep one clone to
/// inspect the line while the daemon owns another.
#[derive(Clone, Default)]
pub struct MockGpioBackend {
    inner: Arc<Mutex<MockState>>,
}

#[derive(Default)]
struct MockState {
    claimed: HashSet<u32>,
    outputs: HashSet<u32>,
    busy: HashSet<u32>,
    missing: HashSet<u32>,
    level: Option<Level>,
    writes: Vec<Level>,
    releases: usize,
    fail_configure: bool,
    fail_writes: bool,
    fail_release: bool,
}

impl MockGpioBackend {
    /// Marks `line` as held by another process.
    pub fn set_busy(&self, line: u32) {
        self.inner.lock().busy.insert(line);
    }

    pub fn set_missing(&self, line: u32) {
        self.inner.lock().missing.insert(line);
    }

    pub fn fail_configure(&self, fail: bool) {
        self.inner.lock().fail_configure = fail;
    }

    pub fn fail_writes(&self, fail: bool) {
        self.inner.lock().fail_writes = fail;
    }

    pub fn fail_release(&self, fail: bool) {
        self.inner.lock().fail_release = fail;
    }

    pub fn level(&self) -> Option<Level> {
        self.inner.lock().level
    }

    pub fn writes(&self) -> Vec<Level> {
        self.inner.lock().writes.clone()
    }

    pub fn is_claimed(&self, line: u32) -> bool {
        self.inner.lock().claimed.contains(&line)
    }

    pub fn release_count(&self) -> usize {
        self.inner.lock().releases
    }
}

impl GpioBackend for MockGpioBackend {
    fn claim(&mut self, line: u32) -> Result<(), AppError> {
        let mut state = self.inner.lock();
        if state.missing.contains(&line) {
            return Err(AppError::NotFound(format!("gpio line {line} does not exist")));
        }
        if state.busy.contains(&line) || !state.claimed.insert(line) {
            return Err(AppError::ResourceUnavailable(format!(
                "gpio line {line} is already claimed"
            )));
        }
        Ok(())
    }

    fn configure_output(&mut self, line: u32) -> Result<(), AppError> {
        let mut state = self.inner.lock();
        if !state.claimed.contains(&line) {
            return Err(AppError::InvalidState(format!("gpio line {line} not claimed")));
        }
        if state.fail_configure {
            return Err(AppError::Io(format!("direction of gpio line {line}")));
        }
        state.outputs.insert(line);
        Ok(())
    }

    fn write(&mut self, line: u32, level: Level) -> Result<(), AppError> {
        let mut state = self.inner.lock();
        if !state.outputs.contains(&line) {
            return Err(AppError::InvalidState(format!(
                "gpio line {line} is not an output"
            )));
        }
        if state.fail_writes {
            return Err(AppError::Io(format!("value of gpio line {line}")));
        }
        state.level = Some(level);
        state.writes.push(level);
        Ok(())
    }

    fn release(&mut self, line: u32) -> Result<(), AppError> {
        let mut state = self.inner.lock();
        state.releases += 1;
        state.outputs.remove(&line);
        state.claimed.remove(&line);
        if state.fail_release {
            return Err(AppError::Io(format!("unexport gpio line {line}")));
        }
        Ok(())
    }
}
