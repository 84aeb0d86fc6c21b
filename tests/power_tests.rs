use std::time::Duration;

use printrelay::{
    AppError, Cli, JobEvent, Level, LineState, MockGpioBackend, Polarity, PowerController,
    PowerEvent, PowerSettings, PowerState, TransitionCause,
};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep, sleep_until};

const LINE: u32 = 23;
const ON: Level = Level::Low;
const OFF: Level = Level::High;

fn settings(off_delay_secs: u64) -> PowerSettings {
    PowerSettings {
        line: LINE,
        off_delay: Duration::from_secs(off_delay_secs),
        polarity: Polarity { active_low: true },
        power_on_at_start: false,
    }
}

struct Harness {
    mock: MockGpioBackend,
    jobs: mpsc::Sender<JobEvent>,
    events: broadcast::Receiver<PowerEvent>,
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<(), AppError>>,
}

impl Harness {
    fn spawn(settings: PowerSettings) -> Self {
        let backend = MockGpioBackend::default();
        let mock = backend.clone();
        let controller = PowerController::start(backend, settings).expect("start");
        let events = controller.subscribe();
        let (jobs, mut jobs_rx) = mpsc::channel(8);
        let (stop, stop_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            let shutdown = async {
                let _ = stop_rx.await;
            };
            controller.run(&mut jobs_rx, shutdown).await
        });

        Self {
            mock,
            jobs,
            events,
            stop: Some(stop),
            task,
        }
    }

    async fn job(&mut self) -> PowerEvent {
        self.jobs.send(JobEvent::now(None)).await.expect("loop alive");
        self.next_event(TransitionCause::JobObserved).await
    }

    async fn next_event(&mut self, cause: TransitionCause) -> PowerEvent {
        loop {
            let event = self.events.recv().await.expect("event");
            if event.cause == cause {
                return event;
            }
        }
    }

    async fn stop(mut self) -> Result<(), AppError> {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        self.task.await.expect("run task")
    }
}

#[tokio::test(start_paused = true)]
async fn starts_idle_with_relay_off() {
    let backend = MockGpioBackend::default();
    let mock = backend.clone();
    let controller = PowerController::start(backend, settings(180)).expect("start");

    assert_eq!(controller.state(), PowerState::Idle);
    assert!(!controller.is_output_asserted());
    assert_eq!(controller.line_state(), LineState::ClaimedOutput(Some(OFF)));
    assert_eq!(mock.writes(), vec![OFF]);
}

#[tokio::test(start_paused = true)]
async fn power_on_at_start_acts_as_first_job() {
    let mut settings = settings(2);
    settings.power_on_at_start = true;
    let start = Instant::now();
    let mut harness = Harness::spawn(settings);

    assert_eq!(harness.mock.level(), Some(ON));
    harness.next_event(TransitionCause::OffDelayElapsed).await;
    assert_eq!(harness.mock.level(), Some(OFF));
    assert!(start.elapsed() >= Duration::from_secs(2));

    harness.stop().await.expect("graceful");
}

#[tokio::test(start_paused = true)]
async fn active_high_polarity_inverts_levels() {
    let mut settings = settings(1);
    settings.polarity = Polarity { active_low: false };
    let mut harness = Harness::spawn(settings);
    assert_eq!(harness.mock.level(), Some(Level::Low));

    let event = harness.job().await;
    assert_eq!(event.level, Level::High);
    assert_eq!(harness.mock.level(), Some(Level::High));

    harness.next_event(TransitionCause::OffDelayElapsed).await;
    assert_eq!(harness.mock.level(), Some(Level::Low));
    harness.stop().await.expect("graceful");
}

#[tokio::test(start_paused = true)]
async fn second_job_extends_power_window() {
    let mut harness = Harness::spawn(settings(2));
    let start = Instant::now();

    let event = harness.job().await;
    assert_eq!(event.state, PowerState::Powered);
    assert_eq!(harness.mock.level(), Some(ON));

    sleep_until(start + Duration::from_secs(1)).await;
    harness.job().await;

    sleep_until(start + Duration::from_millis(2500)).await;
    assert_eq!(harness.mock.level(), Some(ON));

    sleep_until(start + Duration::from_millis(3100)).await;
    assert_eq!(harness.mock.level(), Some(OFF));

    let off = harness.next_event(TransitionCause::OffDelayElapsed).await;
    assert_eq!(off.state, PowerState::Idle);
    assert_eq!(harness.mock.writes(), vec![OFF, ON, ON, OFF]);

    harness.stop().await.expect("graceful");
}

#[tokio::test(start_paused = true)]
async fn single_job_turns_off_after_exact_delay() {
    let mut harness = Harness::spawn(settings(5));
    let start = Instant::now();
    harness.job().await;

    sleep(Duration::from_millis(4999)).await;
    assert_eq!(harness.mock.level(), Some(ON));

    harness.next_event(TransitionCause::OffDelayElapsed).await;
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_secs(5));
    assert!(elapsed < Duration::from_millis(5005));

    harness.stop().await.expect("graceful");
}

#[tokio::test(start_paused = true)]
async fn burst_of_jobs_coalesces_into_one_off() {
    let mut harness = Harness::spawn(settings(3));
    for _ in 0..20 {
        harness.job().await;
        sleep(Duration::from_millis(200)).await;
        assert_eq!(harness.mock.level(), Some(ON));
    }

    sleep(Duration::from_secs(30)).await;
    let offs = harness
        .mock
        .writes()
        .into_iter()
        .skip(1)
        .filter(|level| *level == OFF)
        .count();
    assert_eq!(offs, 1);
    assert_eq!(harness.mock.level(), Some(OFF));

    harness.stop().await.expect("graceful");
}

#[tokio::test(start_paused = true)]
async fn job_at_expiry_instant_leaves_relay_on() {
    let mut harness = Harness::spawn(settings(2));
    let start = Instant::now();
    harness.job().await;

    sleep_until(start + Duration::from_secs(2)).await;
    harness.job().await;
    assert_eq!(harness.mock.level(), Some(ON));

    sleep_until(start + Duration::from_millis(3900)).await;
    assert_eq!(harness.mock.level(), Some(ON));

    sleep_until(start + Duration::from_millis(4100)).await;
    assert_eq!(harness.mock.level(), Some(OFF));
    harness.stop().await.expect("graceful");
}

#[tokio::test(start_paused = true)]
async fn write_failure_does_not_stop_the_loop() {
    let mut harness = Harness::spawn(settings(2));

    harness.mock.fail_writes(true);
    let failed = harness.job().await;
    assert!(!failed.applied);
    assert_eq!(harness.mock.level(), Some(OFF));

    harness.mock.fail_writes(false);
    let recovered = harness.job().await;
    assert!(recovered.applied);
    assert_eq!(harness.mock.level(), Some(ON));

    harness.stop().await.expect("graceful");
}

#[tokio::test(start_paused = true)]
async fn failed_off_write_is_retried_by_next_cycle() {
    let mut harness = Harness::spawn(settings(1));
    harness.job().await;

    harness.mock.fail_writes(true);
    let off = harness.next_event(TransitionCause::OffDelayElapsed).await;
    assert!(!off.applied);
    assert_eq!(off.state, PowerState::Idle);

    harness.mock.fail_writes(false);
    harness.job().await;
    let off = harness.next_event(TransitionCause::OffDelayElapsed).await;
    assert!(off.applied);
    assert_eq!(harness.mock.level(), Some(OFF));

    harness.stop().await.expect("graceful");
}

#[tokio::test(start_paused = true)]
async fn shutdown_while_armed_forces_off_and_releases() {
    let mut harness = Harness::spawn(settings(180));
    harness.job().await;
    let mock = harness.mock.clone();

    harness.stop().await.expect("graceful");

    assert_eq!(mock.level(), Some(OFF));
    assert!(!mock.is_claimed(LINE));
    assert_eq!(mock.release_count(), 1);

    let writes = mock.writes();
    sleep(Duration::from_secs(600)).await;
    assert_eq!(mock.writes(), writes);
}

#[tokio::test(start_paused = true)]
async fn closed_job_source_ends_loop_with_error() {
    let harness = Harness::spawn(settings(10));
    let Harness {
        mock,
        jobs,
        task,
        stop: _stop,
        ..
    } = harness;

    drop(jobs);
    let result = task.await.expect("run task");
    assert!(matches!(result, Err(AppError::BusConnection(_))));
    assert!(!mock.is_claimed(LINE));
    assert_eq!(mock.level(), Some(OFF));
}

#[tokio::test(start_paused = true)]
async fn start_fails_when_configure_fails_and_releases_line() {
    let backend = MockGpioBackend::default();
    let mock = backend.clone();
    mock.fail_configure(true);

    let err = PowerController::start(backend, settings(2)).err().expect("must fail");
    assert!(matches!(err, AppError::Io(_)));
    assert!(!mock.is_claimed(LINE));
    assert_eq!(mock.release_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn start_fails_when_initial_write_fails() {
    let backend = MockGpioBackend::default();
    let mock = backend.clone();
    mock.fail_writes(true);

    assert!(PowerController::start(backend, settings(2)).is_err());
    assert!(!mock.is_claimed(LINE));
}

#[tokio::test(start_paused = true)]
async fn maximal_off_delay_from_command_line_keeps_relay_on() {
    let cli = Cli::parse_args(["printrelay", "-t", "18446744073709551615"]).expect("parse");
    let config = cli.resolve_config().expect("resolve");
    let mut settings = PowerSettings::from(&config);
    settings.power_on_at_start = true;

    let mut harness = Harness::spawn(settings);
    assert_eq!(harness.mock.level(), Some(ON));

    harness.job().await;
    sleep(Duration::from_secs(86400 * 365)).await;
    assert_eq!(harness.mock.level(), Some(ON));

    harness.stop().await.expect("graceful");
}

#[tokio::test(start_paused = true)]
async fn power_events_share_the_job_clock() {
    let mut harness = Harness::spawn(settings(2));
    let job = JobEvent::now(None);
    let queued_at = job.timestamp_ms;
    assert!(queued_at > 0);

    harness.jobs.send(job).await.expect("loop alive");
    let event = harness.next_event(TransitionCause::JobObserved).await;
    assert!(event.timestamp_ms >= queued_at);

    harness.stop().await.expect("graceful");
}
