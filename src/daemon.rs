use std::fs::{File, OpenOptions};
use std::future::Future;
use std::io::{self, Read, Write};
use std::os::fd::AsRawFd;
use std::process;

use log::{error, info, warn};
use nix::sys::stat::{Mode, umask};
use nix::unistd::{ForkResult, chdir, dup2, fork, pipe, setsid};
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::mpsc;

use crate::bus::JobSource;
use crate::config::AppConfig;
use crate::error::AppError;
use crate::gpio::GpioBackend;
use crate::power::{PowerController, PowerSettings};

/// Startup sequencing and the main loop.
///
/// The line is claimed, configured and driven before `source` is asked to
/// subscribe, so a GPIO failure never touches the bus. Returns `Ok` after a
/// graceful shutdown.
pub async fn serve<B, S, F>(
    backend: B,
    config: &AppConfig,
    source: S,
    shutdown: F,
) -> Result<(), AppError>
where
    B: GpioBackend,
    S: JobSource,
    F: Future<Output = ()>,
{
    serve_notify(backend, config, source, shutdown, || {}).await
}

/// Same as [`serve`], calling `on_ready` once the line is driven and the job
/// subscription is established. `on_ready` is not called if startup fails.
pub async fn serve_notify<B, S, F, R>(
    backend: B,
    config: &AppConfig,
    source: S,
    shutdown: F,
    on_ready: R,
) -> Result<(), AppError>
where
    B: GpioBackend,
    S: JobSource,
    F: Future<Output = ()>,
    R: FnOnce(),
{
    let mut controller = PowerController::start(backend, PowerSettings::from(config))?;

    let (jobs_tx, mut jobs_rx) = mpsc::channel(config.job_queue_capacity);
    let listener = match source.subscribe(jobs_tx).await {
        Ok(listener) => listener,
        Err(e) => {
            if let Err(release_err) = controller.shutdown() {
                error!("release of gpio line failed: {release_err}");
            }
            return Err(e);
        }
    };

    on_ready();
    let result = controller.run(&mut jobs_rx, shutdown).await;
    listener.abort();
    result
}

/// Registers SIGINT and SIGTERM and returns a future resolving on either.
pub fn termination_signal() -> Result<impl Future<Output = ()>, AppError> {
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| AppError::Io(format!("can't catch SIGINT: {e}")))?;
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| AppError::Io(format!("can't catch SIGTERM: {e}")))?;

    Ok(async move {
        tokio::select! {
            _ = sigint.recv() => info!("SIGINT received"),
            _ = sigterm.recv() => info!("SIGTERM received"),
        }
    })
}

/// Startup outcome sent from a detached daemon to the process that launched
/// it. Only the first code is delivered; `0` means the daemon is serving.
#[derive(Debug, Default)]
pub struct Readiness {
    pipe: Option<File>,
}

impl Readiness {
    /// A readiness nobody listens to, for foreground runs.
    pub fn unattached() -> Self {
        Self::default()
    }

    /// Creates a connected notifier and waiter pair.
    pub fn channel() -> Result<(Self, ReadinessWaiter), AppError> {
        let (reader, writer) = pipe().map_err(|e| AppError::Io(format!("pipe: {e}")))?;
        let readiness = Self {
            pipe: Some(File::from(writer)),
        };
        let waiter = ReadinessWaiter {
            pipe: File::from(reader),
        };
        Ok((readiness, waiter))
    }

    pub fn notify(&mut self, code: u8) {
        if let Some(mut pipe) = self.pipe.take() {
            if let Err(e) = pipe.write_all(&[code]) {
                warn!("startup status not delivered: {e}");
            }
        }
    }
}

/// Receiving end of a [`Readiness`].
#[derive(Debug)]
pub struct ReadinessWaiter {
    pipe: File,
}

impl ReadinessWaiter {
    /// Blocks until the notifier reports. A notifier dropped without
    /// reporting reads as `1`.
    pub fn wait(mut self) -> u8 {
        let mut code = [0u8; 1];
        match self.pipe.read_exact(&mut code) {
            Ok(()) => code[0],
            Err(_) => 1,
        }
    }
}

/// Detaches from the controlling terminal: fork, new session, `umask(0)`, cwd
/// `/` and standard streams on `/dev/null`.
///
/// The parent stays until the child reports through the returned
/// [`Readiness`], then exits with the reported code.
///
/// Must run before any thread is spawned, i.e. before the tokio runtime.
pub fn detach() -> Result<Readiness, AppError> {
    let (mut readiness, waiter) = Readiness::channel()?;

    // SAFETY: called while the process is still single threaded
    match unsafe { fork() } {
        Ok(ForkResult::Parent { .. }) => {
            drop(readiness);
            process::exit(i32::from(waiter.wait()));
        }
        Ok(ForkResult::Child) => drop(waiter),
        Err(e) => return Err(AppError::Io(format!("fork: {e}"))),
    }

    if let Err(e) = new_session() {
        readiness.notify(e.exit_code());
        return Err(e);
    }
    Ok(readiness)
}

fn new_session() -> Result<(), AppError> {
    umask(Mode::empty());
    setsid().map_err(|e| AppError::Io(format!("setsid: {e}")))?;
    chdir("/").map_err(|e| AppError::Io(format!("chdir /: {e}")))?;

    let devnull = OpenOptions::new()
        .read(true)
        .write(true)
        .open("/dev/null")
        .map_err(|e| AppError::from_io("open /dev/null", e))?;
    for fd in [
        io::stdin().as_raw_fd(),
        io::stdout().as_raw_fd(),
        io::stderr().as_raw_fd(),
    ] {
        dup2(devnull.as_raw_fd(), fd).map_err(|e| AppError::Io(format!("dup2: {e}")))?;
    }
    Ok(())
}
